//! WebSocket accept loop and per-connection tasks.

use std::net::SocketAddr;
use std::sync::Arc;

use chainpush_core::router::SubscriptionRouter;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::WsError;
use crate::messages::{ClientRequest, Command, ServerMessage};
use crate::sessions::{SessionId, SessionRegistry};

/// Accepts push clients and serves the subscription protocol.
pub struct PushServer {
    listener: TcpListener,
    sessions: SessionRegistry,
    router: Arc<SubscriptionRouter>,
}

impl PushServer {
    /// Bind `addr`. `sessions` must be the registry the router broadcasts to.
    pub async fn bind(
        addr: &str,
        sessions: SessionRegistry,
        router: Arc<SubscriptionRouter>,
    ) -> Result<Self, WsError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| WsError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Self {
            listener,
            sessions,
            router,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, WsError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` flips to `true`. Open connections
    /// are closed on the same signal.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "push server listening");
        }

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let sessions = self.sessions.clone();
                        let router = self.router.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve(stream, peer, sessions, router, shutdown).await {
                                debug!(%peer, error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
            }
        }
        info!("push server stopped");
    }
}

async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    sessions: SessionRegistry,
    router: Arc<SubscriptionRouter>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), WsError> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut incoming) = ws.split();
    let (id, mut outbound) = sessions.register();
    info!(session = %id, %peer, "client connected");

    let result = loop {
        tokio::select! {
            msg = incoming.next() => match msg {
                None | Some(Ok(Message::Close(_))) => break Ok(()),
                Some(Err(e)) => break Err(e.into()),
                Some(Ok(Message::Text(text))) => {
                    let Some(reply) = handle_request(&text, id, &sessions, &router) else {
                        continue;
                    };
                    let sent = match reply.to_json() {
                        Ok(json) => sink.send(Message::Text(json)).await.map_err(WsError::from),
                        Err(e) => Err(e.into()),
                    };
                    if let Err(e) = sent {
                        break Err(e);
                    }
                }
                // control frames are answered by tungstenite; binary is not part of the protocol
                Some(Ok(_)) => {}
            },
            push = outbound.recv() => {
                let Some(json) = push else { break Ok(()) };
                if let Err(e) = sink.send(Message::Text(json)).await {
                    break Err(e.into());
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = sink.send(Message::Close(None)).await;
                    break Ok(());
                }
            }
        }
    };

    sessions.remove(id);
    info!(session = %id, %peer, "client disconnected");
    result
}

/// Apply one request to the session. Returns the reply, if the request has one.
fn handle_request(
    text: &str,
    id: SessionId,
    sessions: &SessionRegistry,
    router: &SubscriptionRouter,
) -> Option<ServerMessage> {
    let command = match ClientRequest::parse(text) {
        Ok(command) => command,
        Err(reply) => {
            debug!(session = %id, request = %text, "rejected request");
            return Some(reply);
        }
    };

    match command {
        Command::Ping => Some(ServerMessage::Pong),
        Command::Subscribe(subscription) => {
            debug!(session = %id, kind = %subscription.kind, target = %subscription.target, "subscribe");
            sessions.subscribe(id, subscription.clone());
            if let Err(e) = router.subscribe(subscription) {
                warn!(session = %id, error = %e, "subscription not persisted");
            }
            None
        }
        Command::Unsubscribe(subscription) => {
            debug!(session = %id, kind = %subscription.kind, target = %subscription.target, "unsubscribe");
            sessions.unsubscribe(id, &subscription);
            None
        }
    }
}
