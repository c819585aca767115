//! JSON messages exchanged with push clients.

use chainpush_codec::{OutputType, Transaction, TxOutput};
use chainpush_core::types::Subscription;
use serde::{Deserialize, Serialize};

pub const UNKNOWN_OPERATION: &str = "Unknown operation";
pub const DECODE_ERROR: &str = "Error decoding JSON WebSocket Request";

/// A raw client request: `{"op": "...", "addr": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRequest {
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
}

/// What a client asked for, once validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Subscribe(Subscription),
    Unsubscribe(Subscription),
    Ping,
}

impl ClientRequest {
    /// Parse a text frame. Failures come back as the error reply to send.
    pub fn parse(text: &str) -> Result<Command, ServerMessage> {
        let request: ClientRequest =
            serde_json::from_str(text).map_err(|_| ServerMessage::error(DECODE_ERROR))?;
        request.into_command()
    }

    pub fn into_command(self) -> Result<Command, ServerMessage> {
        let target = || self.addr.clone().ok_or_else(|| ServerMessage::error(DECODE_ERROR));
        match self.op.as_str() {
            "addr_sub" => Ok(Command::Subscribe(Subscription::address(target()?))),
            "data_sub" => Ok(Command::Subscribe(Subscription::op_return_prefix(target()?))),
            "addr_unsub" => Ok(Command::Unsubscribe(Subscription::address(target()?))),
            "data_unsub" => Ok(Command::Unsubscribe(Subscription::op_return_prefix(target()?))),
            "ping" => Ok(Command::Ping),
            _ => Err(ServerMessage::error(UNKNOWN_OPERATION)),
        }
    }
}

/// One output as shown to clients: an address, or the OP_RETURN payload hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputView {
    Address {
        value: u64,
        #[serde(rename = "type")]
        output_type: OutputType,
        addr: String,
    },
    Data {
        value: u64,
        #[serde(rename = "type")]
        output_type: OutputType,
        data: String,
    },
}

impl From<&TxOutput> for OutputView {
    fn from(output: &TxOutput) -> Self {
        match output.output_type {
            OutputType::Data => Self::Data {
                value: output.value,
                output_type: output.output_type,
                data: output.data_hex().unwrap_or_default(),
            },
            output_type => Self::Address {
                value: output.value,
                output_type,
                addr: output.address.clone(),
            },
        }
    }
}

/// Body of a `utx` / `ctx` push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxPush {
    pub txid: String,
    pub version: u32,
    pub lock_time: u32,
    pub first_seen: i64,
    pub last_updated: i64,
    pub outputs: Vec<OutputView>,
}

impl From<&Transaction> for TxPush {
    fn from(tx: &Transaction) -> Self {
        Self {
            txid: tx.txid.clone(),
            version: tx.version,
            lock_time: tx.lock_time,
            first_seen: tx.first_seen,
            last_updated: tx.last_updated,
            outputs: tx.outputs.iter().map(OutputView::from).collect(),
        }
    }
}

/// Everything the server sends, tagged by `op`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ServerMessage {
    Pong,
    Error { error: String },
    /// Unconfirmed transaction.
    Utx(TxPush),
    /// Transaction with a known inclusion block.
    Ctx(TxPush),
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn push(tx: &Transaction) -> Self {
        if tx.is_confirmed() {
            Self::Ctx(tx.into())
        } else {
            Self::Utx(tx.into())
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
