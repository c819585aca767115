//! chainpush-codec — Bitcoin wire-format decoding for ChainPush.
//!
//! # Architecture
//!
//! ```text
//! raw bytes → ByteCursor
//!               ├── BlockHeader   (80 bytes, double SHA-256 hash)
//!               ├── Transaction   (segwit marker, inputs, outputs, witness)
//!               │     └── Script  (opcodes + data chunks)
//!               │           └── classify → OutputType + address
//!               │                 ├── base58  (P2PKH / P2SH)
//!               │                 └── bech32  (P2WPKH / P2WSH)
//!               └── Block         (header + transactions, length-matched)
//! ```

pub mod address;
pub mod block;
pub mod classify;
pub mod cursor;
pub mod error;
pub mod hash;
pub mod script;
pub mod tx;

pub use address::Network;
pub use block::{Block, BlockHeader};
pub use classify::{classify, Classification, OutputType};
pub use cursor::{write_varint, ByteCursor};
pub use error::{AddressError, DecodeError};
pub use script::{Opcode, Script, ScriptBuilder};
pub use tx::{Transaction, TxInput, TxOutput};
