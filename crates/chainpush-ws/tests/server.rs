//! End-to-end protocol tests against a live `PushServer`.

use std::sync::Arc;
use std::time::Duration;

use chainpush_codec::{Network, Opcode, ScriptBuilder, Transaction, TxOutput};
use chainpush_core::{Inbox, PersistWrite, Subscription, SubscriptionRouter, WorkQueue};
use chainpush_ws::{PushServer, SessionRegistry};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Harness {
    url: String,
    sessions: SessionRegistry,
    router: Arc<SubscriptionRouter>,
    // keeps the persist queue open
    _persist: Inbox<PersistWrite>,
    stop: watch::Sender<bool>,
}

async fn start() -> Harness {
    let sessions = SessionRegistry::new();
    let (persist, inbox) = WorkQueue::new("persist");
    let router = Arc::new(SubscriptionRouter::new(Arc::new(sessions.clone()), persist));
    let server = PushServer::bind("127.0.0.1:0", sessions.clone(), router.clone())
        .await
        .unwrap();
    let url = format!("ws://{}", server.local_addr().unwrap());
    let (stop, stop_rx) = watch::channel(false);
    tokio::spawn(server.run(stop_rx));
    Harness {
        url,
        sessions,
        router,
        _persist: inbox,
        stop,
    }
}

async fn connect(url: &str) -> Client {
    tokio_tungstenite::connect_async(url).await.unwrap().0
}

async fn send(client: &mut Client, request: Value) {
    client.send(Message::Text(request.to_string())).await.unwrap();
}

async fn recv(client: &mut Client) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("no message within 2s")
        .unwrap()
        .unwrap();
    match frame {
        Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("unexpected frame: {other:?}"),
    }
}

/// Requests are handled in order, so a pong means everything before it is applied.
async fn sync(client: &mut Client) {
    send(client, json!({"op": "ping"})).await;
    assert_eq!(recv(client).await, json!({"op": "pong"}));
}

fn paying_tx() -> Transaction {
    let script = ScriptBuilder::new()
        .op(Opcode::Op0)
        .push(&[0x5a; 20])
        .into_bytes();
    Transaction {
        txid: "5a".repeat(32),
        wtxid: "5a".repeat(32),
        version: 2,
        lock_time: 0,
        has_witness: false,
        inputs: vec![],
        outputs: vec![TxOutput::new(21_000, &script, Network::Mainnet)],
        size: 0,
        included_in: None,
        included_at_height: 0,
        first_seen: 1,
        last_updated: 1,
    }
}

#[tokio::test]
async fn ping_gets_pong() {
    let h = start().await;
    let mut client = connect(&h.url).await;
    sync(&mut client).await;
}

#[tokio::test]
async fn bad_requests_get_error_replies_and_keep_the_socket() {
    let h = start().await;
    let mut client = connect(&h.url).await;

    send(&mut client, json!({"op": "teleport"})).await;
    assert_eq!(
        recv(&mut client).await,
        json!({"op": "error", "error": "Unknown operation"})
    );

    client.send(Message::Text("{not json".into())).await.unwrap();
    assert_eq!(
        recv(&mut client).await,
        json!({"op": "error", "error": "Error decoding JSON WebSocket Request"})
    );

    sync(&mut client).await;
}

#[tokio::test]
async fn subscribed_client_receives_push() {
    let h = start().await;
    let mut client = connect(&h.url).await;
    let tx = paying_tx();
    let address = tx.outputs[0].address.clone();

    send(&mut client, json!({"op": "addr_sub", "addr": address})).await;
    sync(&mut client).await;
    assert!(h.router.subscriptions().contains(&Subscription::address(&address)));

    assert_eq!(h.router.route(&tx).unwrap(), 1);

    let push = recv(&mut client).await;
    assert_eq!(push["op"], "utx");
    assert_eq!(push["txid"], tx.txid);
    assert_eq!(push["outputs"][0]["addr"], address);
    assert_eq!(push["outputs"][0]["type"], "P2WPKH");
}

#[tokio::test]
async fn unsubscribe_stops_pushes_but_keeps_router_entry() {
    let h = start().await;
    let mut client = connect(&h.url).await;
    let tx = paying_tx();
    let address = tx.outputs[0].address.clone();

    send(&mut client, json!({"op": "addr_sub", "addr": address})).await;
    send(&mut client, json!({"op": "addr_unsub", "addr": address})).await;
    sync(&mut client).await;

    h.router.route(&tx).unwrap();
    // nothing queued ahead of the pong
    sync(&mut client).await;
    assert_eq!(h.router.len(), 1);
}

#[tokio::test]
async fn closing_removes_the_session_only() {
    let h = start().await;
    let mut client = connect(&h.url).await;
    send(&mut client, json!({"op": "data_sub", "addr": "cafe"})).await;
    sync(&mut client).await;
    assert_eq!(h.sessions.len(), 1);

    client.close(None).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !h.sessions.is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "session not removed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(h
        .router
        .subscriptions()
        .contains(&Subscription::op_return_prefix("cafe")));
}

#[tokio::test]
async fn shutdown_closes_clients() {
    let h = start().await;
    let mut client = connect(&h.url).await;
    sync(&mut client).await;

    h.stop.send(true).unwrap();

    let end = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match client.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(end.is_ok(), "client was not closed");
}
