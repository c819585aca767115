//! chainpush-ws — the client push channel.
//!
//! # Features
//! - JSON request/reply protocol (`addr_sub`, `data_sub`, their `_unsub`
//!   counterparts, `ping`)
//! - Per-session subscription lists, fed by the shared
//!   [`chainpush_core::SubscriptionRouter`]
//! - `utx` / `ctx` pushes over an unbounded per-session channel, so routing
//!   never waits on a slow client

pub mod error;
pub mod messages;
pub mod server;
pub mod sessions;

pub use error::WsError;
pub use messages::{ClientRequest, OutputView, ServerMessage, TxPush};
pub use server::PushServer;
pub use sessions::{SessionId, SessionRegistry};
