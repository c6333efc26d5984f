use super::*;
use std::collections::HashMap as StdHashMap;

use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    routing::get,
    Router,
};
use serde_json::json;
use tokio::{net::TcpListener, sync::broadcast, task::JoinHandle};

/// Minimal in-process broker: topics are broadcast channels shared across
/// connections, so a reconnecting client sees the same topic space.
#[derive(Clone, Default)]
struct BrokerState {
    topics: Arc<Mutex<StdHashMap<String, broadcast::Sender<Value>>>>,
    /// Connections drop themselves when they see a publish to this topic.
    drop_topic: Option<String>,
}

impl BrokerState {
    async fn topic_sender(&self, topic: &str) -> broadcast::Sender<Value> {
        let mut topics = self.topics.lock().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<BrokerState>) -> axum::response::Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: BrokerState) {
    let (out_tx, mut out_rx) = tokio::sync::mpsc::unbounded_channel::<ServerFrame>();
    let (mut writer, mut reader) = {
        use futures::StreamExt as _;
        socket.split()
    };

    let writer_task: JoinHandle<()> = tokio::spawn(async move {
        use futures::SinkExt as _;
        while let Some(frame) = out_rx.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };
            if writer.send(AxumMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut forwarders: Vec<JoinHandle<()>> = Vec::new();
    loop {
        use futures::StreamExt as _;
        let Some(Ok(message)) = reader.next().await else {
            break;
        };
        let AxumMessage::Text(text) = message else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) else {
            continue;
        };
        match frame {
            ClientFrame::Subscribe { topic } => {
                let mut receiver = state.topic_sender(&topic).await.subscribe();
                let out_tx = out_tx.clone();
                forwarders.push(tokio::spawn(async move {
                    while let Ok(payload) = receiver.recv().await {
                        if out_tx
                            .send(ServerFrame::Message {
                                topic: topic.clone(),
                                payload,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                }));
            }
            ClientFrame::Unsubscribe { .. } => {
                // Lazy broker: forwarders die with the connection; the
                // client side already stopped listening.
            }
            ClientFrame::Publish { topic, payload } => {
                if state.drop_topic.as_deref() == Some(topic.as_str()) {
                    break;
                }
                let _ = state.topic_sender(&topic).await.send(payload);
            }
        }
    }

    for task in forwarders {
        task.abort();
    }
    writer_task.abort();
}

async fn spawn_broker(state: BrokerState) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new().route("/ws", get(ws_handler)).with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("ws://{addr}/ws")
}

#[tokio::test]
async fn subscribe_receives_published_payloads_in_topic_order() {
    let url = spawn_broker(BrokerState::default()).await;
    let channel = RealtimeChannel::connect(&url).await.expect("connect");

    let mut subscription = channel.subscribe("/topic/chat/r-1").await.expect("subscribe");
    for n in 1..=3 {
        channel
            .publish("/topic/chat/r-1", json!({ "seq": n }))
            .await
            .expect("publish");
    }

    for n in 1..=3 {
        let payload = subscription.recv().await.expect("payload");
        assert_eq!(payload["seq"], n);
    }
}

#[tokio::test]
async fn topics_are_isolated_from_each_other() {
    let url = spawn_broker(BrokerState::default()).await;
    let channel = RealtimeChannel::connect(&url).await.expect("connect");

    let mut chat = channel.subscribe("/topic/chat/r-1").await.expect("subscribe");
    let _wallet = channel
        .subscribe("/topic/wallet/u-1")
        .await
        .expect("subscribe");

    channel
        .publish("/topic/wallet/u-1", json!({ "kind": "wallet" }))
        .await
        .expect("publish");
    channel
        .publish("/topic/chat/r-1", json!({ "kind": "chat" }))
        .await
        .expect("publish");

    // The chat subscription sees only the chat payload.
    let payload = chat.recv().await.expect("payload");
    assert_eq!(payload["kind"], "chat");
}

#[tokio::test]
async fn unsubscribe_is_idempotent() {
    let url = spawn_broker(BrokerState::default()).await;
    let channel = RealtimeChannel::connect(&url).await.expect("connect");

    channel.subscribe("/topic/chat/r-1").await.expect("subscribe");
    channel.unsubscribe("/topic/chat/r-1").await.expect("first");
    channel.unsubscribe("/topic/chat/r-1").await.expect("second");
    // A topic that never existed is also fine.
    channel.unsubscribe("/topic/chat/ghost").await.expect("ghost");
}

#[tokio::test]
async fn unsubscribe_ends_live_subscriptions_on_the_topic() {
    let url = spawn_broker(BrokerState::default()).await;
    let channel = RealtimeChannel::connect(&url).await.expect("connect");

    let mut subscription = channel.subscribe("/topic/chat/r-1").await.expect("subscribe");
    channel.unsubscribe("/topic/chat/r-1").await.expect("unsubscribe");

    // The topic's sender is gone; the held handle drains to None instead
    // of hanging.
    assert!(subscription.recv().await.is_none());
}

#[tokio::test]
async fn close_is_idempotent_and_stops_publishing() {
    let url = spawn_broker(BrokerState::default()).await;
    let channel = RealtimeChannel::connect(&url).await.expect("connect");

    channel.close().await;
    channel.close().await;

    let err = channel
        .publish("/topic/chat/r-1", json!({}))
        .await
        .expect_err("closed channel cannot publish");
    assert!(matches!(err, ClientError::Channel(_)));
}

#[tokio::test]
async fn reconnects_and_resubscribes_after_a_dropped_connection() {
    let state = BrokerState {
        drop_topic: Some("/test/drop".into()),
        ..BrokerState::default()
    };
    let url = spawn_broker(state.clone()).await;
    let channel = RealtimeChannel::connect(&url).await.expect("connect");
    let mut signals = channel.subscribe_signals();
    assert_eq!(signals.recv().await.expect("signal"), ChannelSignal::Connected);

    let mut subscription = channel.subscribe("/topic/chat/r-1").await.expect("subscribe");

    // Force the broker to drop this connection.
    channel
        .publish("/test/drop", json!({}))
        .await
        .expect("drop trigger");
    assert_eq!(
        signals.recv().await.expect("signal"),
        ChannelSignal::Reconnected
    );

    // After reconnect the topic was re-subscribed server-side; publishing
    // through the broker reaches the old subscription handle.
    state
        .topic_sender("/topic/chat/r-1")
        .await
        .send(json!({ "after": "reconnect" }))
        .expect("broker publish");

    let payload = subscription.recv().await.expect("payload");
    assert_eq!(payload["after"], "reconnect");
}
