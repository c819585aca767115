//! Script decoding into opcodes and data chunks.
//!
//! Decoding stops at the first byte that is not a push and not in the opcode
//! table; whatever was collected up to that point is kept. Such partial
//! scripts classify as `OTHER`.

use serde::{Deserialize, Serialize};

macro_rules! opcodes {
    ($($name:ident = $byte:literal => $text:literal),* $(,)?) => {
        /// Script opcodes understood by the decoder.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($name),*
        }

        impl Opcode {
            /// Look up a single-byte opcode. Push lengths (0x01..=0x4b) are not opcodes.
            pub fn from_byte(byte: u8) -> Option<Self> {
                match byte {
                    $($byte => Some(Self::$name),)*
                    _ => None,
                }
            }

            pub fn to_byte(self) -> u8 {
                match self {
                    $(Self::$name => $byte),*
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$name => $text),*
                }
            }
        }
    };
}

opcodes! {
    Op0 = 0x00 => "OP_0",
    PushData1 = 0x4c => "OP_PUSHDATA1",
    PushData2 = 0x4d => "OP_PUSHDATA2",
    PushData4 = 0x4e => "OP_PUSHDATA4",
    Op1Negate = 0x4f => "OP_1NEGATE",
    Reserved = 0x50 => "OP_RESERVED",
    Op1 = 0x51 => "OP_1",
    Op2 = 0x52 => "OP_2",
    Op3 = 0x53 => "OP_3",
    Op4 = 0x54 => "OP_4",
    Op5 = 0x55 => "OP_5",
    Op6 = 0x56 => "OP_6",
    Op7 = 0x57 => "OP_7",
    Op8 = 0x58 => "OP_8",
    Op9 = 0x59 => "OP_9",
    Op10 = 0x5a => "OP_10",
    Op11 = 0x5b => "OP_11",
    Op12 = 0x5c => "OP_12",
    Op13 = 0x5d => "OP_13",
    Op14 = 0x5e => "OP_14",
    Op15 = 0x5f => "OP_15",
    Op16 = 0x60 => "OP_16",
    Nop = 0x61 => "OP_NOP",
    Ver = 0x62 => "OP_VER",
    If = 0x63 => "OP_IF",
    NotIf = 0x64 => "OP_NOTIF",
    VerIf = 0x65 => "OP_VERIF",
    VerNotIf = 0x66 => "OP_VERNOTIF",
    Else = 0x67 => "OP_ELSE",
    EndIf = 0x68 => "OP_ENDIF",
    Verify = 0x69 => "OP_VERIFY",
    Return = 0x6a => "OP_RETURN",
    ToAltStack = 0x6b => "OP_TOALTSTACK",
    FromAltStack = 0x6c => "OP_FROMALTSTACK",
    TwoDrop = 0x6d => "OP_2DROP",
    TwoDup = 0x6e => "OP_2DUP",
    ThreeDup = 0x6f => "OP_3DUP",
    TwoOver = 0x70 => "OP_2OVER",
    TwoRot = 0x71 => "OP_2ROT",
    TwoSwap = 0x72 => "OP_2SWAP",
    IfDup = 0x73 => "OP_IFDUP",
    Depth = 0x74 => "OP_DEPTH",
    Drop = 0x75 => "OP_DROP",
    Dup = 0x76 => "OP_DUP",
    Nip = 0x77 => "OP_NIP",
    Over = 0x78 => "OP_OVER",
    Pick = 0x79 => "OP_PICK",
    Roll = 0x7a => "OP_ROLL",
    Rot = 0x7b => "OP_ROT",
    Swap = 0x7c => "OP_SWAP",
    Tuck = 0x7d => "OP_TUCK",
    Cat = 0x7e => "OP_CAT",
    Substr = 0x7f => "OP_SUBSTR",
    Left = 0x80 => "OP_LEFT",
    Right = 0x81 => "OP_RIGHT",
    Size = 0x82 => "OP_SIZE",
    Invert = 0x83 => "OP_INVERT",
    And = 0x84 => "OP_AND",
    Or = 0x85 => "OP_OR",
    Xor = 0x86 => "OP_XOR",
    Equal = 0x87 => "OP_EQUAL",
    EqualVerify = 0x88 => "OP_EQUALVERIFY",
    Reserved1 = 0x89 => "OP_RESERVED1",
    Reserved2 = 0x8a => "OP_RESERVED2",
    Add1 = 0x8b => "OP_1ADD",
    Sub1 = 0x8c => "OP_1SUB",
    Mul2 = 0x8d => "OP_2MUL",
    Div2 = 0x8e => "OP_2DIV",
    Negate = 0x8f => "OP_NEGATE",
    Abs = 0x90 => "OP_ABS",
    Not = 0x91 => "OP_NOT",
    NotEqual0 = 0x92 => "OP_0NOTEQUAL",
    Add = 0x93 => "OP_ADD",
    Sub = 0x94 => "OP_SUB",
    Mul = 0x95 => "OP_MUL",
    Div = 0x96 => "OP_DIV",
    Mod = 0x97 => "OP_MOD",
    LShift = 0x98 => "OP_LSHIFT",
    RShift = 0x99 => "OP_RSHIFT",
    BoolAnd = 0x9a => "OP_BOOLAND",
    BoolOr = 0x9b => "OP_BOOLOR",
    NumEqual = 0x9c => "OP_NUMEQUAL",
    NumEqualVerify = 0x9d => "OP_NUMEQUALVERIFY",
    NumNotEqual = 0x9e => "OP_NUMNOTEQUAL",
    LessThan = 0x9f => "OP_LESSTHAN",
    GreaterThan = 0xa0 => "OP_GREATERTHAN",
    LessThanOrEqual = 0xa1 => "OP_LESSTHANOREQUAL",
    GreaterThanOrEqual = 0xa2 => "OP_GREATERTHANOREQUAL",
    Min = 0xa3 => "OP_MIN",
    Max = 0xa4 => "OP_MAX",
    Within = 0xa5 => "OP_WITHIN",
    Ripemd160 = 0xa6 => "OP_RIPEMD160",
    Sha1 = 0xa7 => "OP_SHA1",
    Sha256 = 0xa8 => "OP_SHA256",
    Hash160 = 0xa9 => "OP_HASH160",
    Hash256 = 0xaa => "OP_HASH256",
    CodeSeparator = 0xab => "OP_CODESEPARATOR",
    CheckSig = 0xac => "OP_CHECKSIG",
    CheckSigVerify = 0xad => "OP_CHECKSIGVERIFY",
    CheckMultisig = 0xae => "OP_CHECKMULTISIG",
    CheckMultisigVerify = 0xaf => "OP_CHECKMULTISIGVERIFY",
    Nop1 = 0xb0 => "OP_NOP1",
    CheckLockTimeVerify = 0xb1 => "OP_CHECKLOCKTIMEVERIFY",
    CheckSequenceVerify = 0xb2 => "OP_CHECKSEQUENCEVERIFY",
    Nop4 = 0xb3 => "OP_NOP4",
    Nop5 = 0xb4 => "OP_NOP5",
    Nop6 = 0xb5 => "OP_NOP6",
    Nop7 = 0xb6 => "OP_NOP7",
    Nop8 = 0xb7 => "OP_NOP8",
    Nop9 = 0xb8 => "OP_NOP9",
    Nop10 = 0xb9 => "OP_NOP10",
    // internal marker for a data push, never valid on the wire
    Data = 0xda => "OP_DATA",
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded script: raw bytes plus opcodes and the data chunks they pushed.
///
/// `opcodes` holds one [`Opcode::Data`] per entry in `chunks`, in order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Script {
    bytes: Vec<u8>,
    opcodes: Vec<Opcode>,
    chunks: Vec<Vec<u8>>,
}

impl Script {
    /// Decode `bytes`. Never fails; unknown opcodes end the scan early.
    pub fn decode(bytes: &[u8]) -> Self {
        let mut script = Self {
            bytes: bytes.to_vec(),
            opcodes: Vec::new(),
            chunks: Vec::new(),
        };
        script.scan();
        script
    }

    fn scan(&mut self) {
        let bytes = &self.bytes;
        let mut i = 0;
        while i < bytes.len() {
            let byte = bytes[i];
            i += 1;
            let length = match byte {
                0x02..=0x4b => Some(byte as usize),
                0x4c => read_len(bytes, i, 1),
                0x4d => read_len(bytes, i, 2),
                0x4e => read_len(bytes, i, 4),
                _ => {
                    match Opcode::from_byte(byte) {
                        Some(op) if op != Opcode::Data => self.opcodes.push(op),
                        _ => return,
                    }
                    continue;
                }
            };
            let Some(length) = length else {
                // length field itself is truncated
                return;
            };
            i += match byte {
                0x4c => 1,
                0x4d => 2,
                0x4e => 4,
                _ => 0,
            };
            let end = i.saturating_add(length).min(bytes.len());
            self.opcodes.push(Opcode::Data);
            self.chunks.push(bytes[i..end].to_vec());
            i = end;
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn opcodes(&self) -> &[Opcode] {
        &self.opcodes
    }

    pub fn chunks(&self) -> &[Vec<u8>] {
        &self.chunks
    }

    /// The first pushed data chunk, if any.
    pub fn first_chunk(&self) -> Option<&[u8]> {
        self.chunks.first().map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

fn read_len(bytes: &[u8], at: usize, width: usize) -> Option<usize> {
    let field = bytes.get(at..at.checked_add(width)?)?;
    let mut le = [0u8; 8];
    le[..width].copy_from_slice(field);
    usize::try_from(u64::from_le_bytes(le)).ok()
}

impl From<Script> for String {
    fn from(script: Script) -> Self {
        script.to_hex()
    }
}

impl TryFrom<String> for Script {
    type Error = hex::FromHexError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        hex::decode(s).map(|bytes| Script::decode(&bytes))
    }
}

// ─── Builder ─────────────────────────────────────────────────────────────────

/// Assembles script bytes; the inverse of [`Script::decode`].
#[derive(Debug, Clone, Default)]
pub struct ScriptBuilder {
    bytes: Vec<u8>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a single-byte opcode.
    pub fn op(mut self, op: Opcode) -> Self {
        self.bytes.push(op.to_byte());
        self
    }

    /// Append a data push using the smallest form the decoder reads back.
    ///
    /// A one-byte push goes through PUSHDATA1, since 0x01 is not a push
    /// length for the decoder.
    pub fn push(self, data: &[u8]) -> Self {
        match data.len() {
            2..=0x4b => self.push_direct(data),
            0..=0xff => self.push_data1(data),
            0x100..=0xffff => self.push_data2(data),
            _ => self.push_data4(data),
        }
    }

    fn push_direct(mut self, data: &[u8]) -> Self {
        self.bytes.push(data.len() as u8);
        self.bytes.extend_from_slice(data);
        self
    }

    pub fn push_data1(mut self, data: &[u8]) -> Self {
        self.bytes.push(0x4c);
        self.bytes.push(data.len() as u8);
        self.bytes.extend_from_slice(data);
        self
    }

    pub fn push_data2(mut self, data: &[u8]) -> Self {
        self.bytes.push(0x4d);
        self.bytes.extend_from_slice(&(data.len() as u16).to_le_bytes());
        self.bytes.extend_from_slice(data);
        self
    }

    pub fn push_data4(mut self, data: &[u8]) -> Self {
        self.bytes.push(0x4e);
        self.bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        self.bytes.extend_from_slice(data);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn build(self) -> Script {
        Script::decode(&self.bytes)
    }
}
