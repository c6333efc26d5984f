//! Publish/subscribe adapter over one WebSocket connection to the
//! backend's `/ws` endpoint. Topics are named channels keyed by entity id;
//! the broker guarantees FIFO delivery within a topic, nothing across
//! topics. For most consumers an inbound message is purely an invalidation
//! signal; only the chat topic carries data worth applying directly.

use std::{collections::HashMap, sync::Arc, time::Duration};

use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde_json::Value;
use shared::protocol::{ClientFrame, ServerFrame};
use tokio::{
    net::TcpStream,
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

use crate::error::ClientError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

const RECONNECT_ATTEMPTS: usize = 5;
const RECONNECT_DELAY: Duration = Duration::from_millis(500);
const TOPIC_BUFFER: usize = 256;

/// Connection-level signals for consumers that need to know when the
/// channel has gone quiet for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSignal {
    Connected,
    Reconnected,
    /// Reconnection attempts are exhausted; subscriptions are stale from
    /// here on until a new channel is opened.
    Lost,
}

struct ChannelInner {
    writer: Option<WsWriter>,
    topics: HashMap<String, broadcast::Sender<Value>>,
    reader_task: Option<JoinHandle<()>>,
    closed: bool,
}

pub struct RealtimeChannel {
    url: String,
    inner: Mutex<ChannelInner>,
    signals: broadcast::Sender<ChannelSignal>,
}

impl RealtimeChannel {
    /// Opens the transport and starts the dispatch loop. One channel per
    /// client; individual consumers subscribe to their own topics.
    pub async fn connect(url: impl Into<String>) -> Result<Arc<Self>, ClientError> {
        let url = url.into();
        let (stream, _) = connect_async(&url)
            .await
            .map_err(|err| ClientError::Channel(format!("connect failed: {err}")))?;
        let (writer, reader) = stream.split();

        let (signals, _) = broadcast::channel(16);
        let channel = Arc::new(Self {
            url,
            inner: Mutex::new(ChannelInner {
                writer: Some(writer),
                topics: HashMap::new(),
                reader_task: None,
                closed: false,
            }),
            signals,
        });

        let task = channel.clone().spawn_dispatch(reader);
        channel.inner.lock().await.reader_task = Some(task);
        let _ = channel.signals.send(ChannelSignal::Connected);
        Ok(channel)
    }

    pub fn subscribe_signals(&self) -> broadcast::Receiver<ChannelSignal> {
        self.signals.subscribe()
    }

    /// Subscribes to `topic`, opening it on the broker if this is the
    /// first local consumer. Messages arrive in broker order per topic.
    pub async fn subscribe(&self, topic: &str) -> Result<TopicSubscription, ClientError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(ClientError::Channel("channel is closed".into()));
        }

        let receiver = match inner.topics.get(topic) {
            Some(sender) => sender.subscribe(),
            None => {
                let (sender, receiver) = broadcast::channel(TOPIC_BUFFER);
                inner.topics.insert(topic.to_string(), sender);
                send_frame(
                    &mut inner.writer,
                    &ClientFrame::Subscribe {
                        topic: topic.to_string(),
                    },
                )
                .await?;
                receiver
            }
        };

        Ok(TopicSubscription {
            topic: topic.to_string(),
            receiver,
        })
    }

    /// Drops the broker subscription for `topic` and ends every live
    /// `TopicSubscription` on it (their `recv` returns `None`); stopping a
    /// topic watcher works by unsubscribing. Safe to call for topics that
    /// were never subscribed or were already unsubscribed.
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), ClientError> {
        let mut inner = self.inner.lock().await;
        if inner.topics.remove(topic).is_none() {
            return Ok(());
        }
        send_frame(
            &mut inner.writer,
            &ClientFrame::Unsubscribe {
                topic: topic.to_string(),
            },
        )
        .await
    }

    /// Fire-and-forget publish; no delivery acknowledgement is surfaced.
    pub async fn publish(&self, topic: &str, payload: Value) -> Result<(), ClientError> {
        let mut inner = self.inner.lock().await;
        send_frame(
            &mut inner.writer,
            &ClientFrame::Publish {
                topic: topic.to_string(),
                payload,
            },
        )
        .await
    }

    /// Tears the connection down. Idempotent.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        inner.topics.clear();
        if let Some(task) = inner.reader_task.take() {
            task.abort();
        }
        if let Some(mut writer) = inner.writer.take() {
            let _ = writer.close().await;
        }
    }

    fn spawn_dispatch(self: Arc<Self>, mut reader: WsReader) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                while let Some(message) = reader.next().await {
                    match message {
                        Ok(Message::Text(text)) => self.dispatch_frame(&text).await,
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(err) => {
                            warn!("realtime channel receive failed: {err}");
                            break;
                        }
                    }
                }

                if self.inner.lock().await.closed {
                    return;
                }

                match self.reestablish().await {
                    Some(new_reader) => {
                        reader = new_reader;
                        let _ = self.signals.send(ChannelSignal::Reconnected);
                    }
                    None => {
                        warn!("realtime channel lost after {RECONNECT_ATTEMPTS} reconnect attempts");
                        let mut inner = self.inner.lock().await;
                        inner.writer = None;
                        let _ = self.signals.send(ChannelSignal::Lost);
                        return;
                    }
                }
            }
        })
    }

    async fn dispatch_frame(&self, text: &str) {
        match serde_json::from_str::<ServerFrame>(text) {
            Ok(ServerFrame::Message { topic, payload }) => {
                let inner = self.inner.lock().await;
                if let Some(sender) = inner.topics.get(&topic) {
                    let _ = sender.send(payload);
                }
            }
            Ok(ServerFrame::Error { message }) => {
                warn!("realtime channel broker error: {message}");
            }
            Err(err) => {
                warn!("invalid realtime frame: {err}");
            }
        }
    }

    /// Bounded reconnect with a fixed delay between attempts. On success
    /// all live topics are re-subscribed before dispatch resumes.
    async fn reestablish(&self) -> Option<WsReader> {
        for attempt in 1..=RECONNECT_ATTEMPTS {
            tokio::time::sleep(RECONNECT_DELAY).await;
            if self.inner.lock().await.closed {
                return None;
            }
            match connect_async(&self.url).await {
                Ok((stream, _)) => {
                    let (writer, reader) = stream.split();
                    let mut inner = self.inner.lock().await;
                    inner.writer = Some(writer);
                    let topics: Vec<String> = inner.topics.keys().cloned().collect();
                    for topic in topics {
                        if let Err(err) =
                            send_frame(&mut inner.writer, &ClientFrame::Subscribe { topic }).await
                        {
                            warn!("re-subscribe after reconnect failed: {err}");
                        }
                    }
                    info!(attempt, "realtime channel reconnected");
                    return Some(reader);
                }
                Err(err) => {
                    warn!(attempt, "realtime channel reconnect failed: {err}");
                }
            }
        }
        None
    }
}

async fn send_frame(writer: &mut Option<WsWriter>, frame: &ClientFrame) -> Result<(), ClientError> {
    let writer = writer
        .as_mut()
        .ok_or_else(|| ClientError::Channel("not connected".into()))?;
    let text = serde_json::to_string(frame)?;
    writer
        .send(Message::Text(text))
        .await
        .map_err(|err| ClientError::Channel(format!("send failed: {err}")))
}

/// Handle for one topic subscription. Dropping it leaves the broker
/// subscription to the channel owner; call `RealtimeChannel::unsubscribe`
/// to release the topic.
pub struct TopicSubscription {
    pub topic: String,
    receiver: broadcast::Receiver<Value>,
}

impl TopicSubscription {
    /// Next payload on this topic, or `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "topic consumer lagged; messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/channel_tests.rs"]
mod tests;
