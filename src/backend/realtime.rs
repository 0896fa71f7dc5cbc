//! Websocket implementation of [`ChangeFeed`] speaking the phoenix-channel
//! framing used by the hosted realtime service: `phx_join` with a
//! `postgres_changes` config, periodic heartbeats, `postgres_changes` data
//! frames, `phx_leave` on release.
//!
//! One socket serves every subscription; a reader task routes data frames to
//! per-topic senders. Socket loss closes all subscriber streams and is
//! logged; there is no automatic resubscription.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, warn};

use crate::backend::{ChangeEvent, ChangeFeed, ChangeSubscription, EventKind, SubscriptionSpec};
use crate::error::{Error, Result};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const TOPIC_BUFFER: usize = 64;

/// Phoenix socket frame, both directions.
#[derive(Debug, Serialize, Deserialize)]
struct SocketMessage {
    topic: String,
    event: String,
    payload: Value,
    #[serde(rename = "ref")]
    reference: Option<String>,
}

type TopicRegistry = Arc<Mutex<HashMap<String, mpsc::Sender<ChangeEvent>>>>;

pub struct RealtimeClient {
    outbound: mpsc::UnboundedSender<SocketMessage>,
    topics: TopicRegistry,
    next_ref: AtomicU64,
    tasks: Vec<JoinHandle<()>>,
}

impl RealtimeClient {
    pub async fn connect(url: &str, api_key: &str) -> Result<Self> {
        let endpoint = format!("{url}?apikey={api_key}&vsn=1.0.0");
        let (socket, _) = connect_async(endpoint.as_str())
            .await
            .map_err(|err| Error::Subscription(format!("websocket connect failed: {err}")))?;
        let (mut sink, mut stream) = socket.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<SocketMessage>();
        let topics: TopicRegistry = Arc::new(Mutex::new(HashMap::new()));

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(error = %err, "unserializable realtime frame, skipping");
                        continue;
                    }
                };
                if let Err(err) = sink.send(Message::Text(text.into())).await {
                    error!(error = %err, "realtime socket write failed");
                    break;
                }
            }
        });

        let reader_topics = topics.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => dispatch(&reader_topics, text.as_str()),
                    Ok(Message::Close(_)) => {
                        warn!("realtime socket closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        error!(error = %err, "realtime socket read failed");
                        break;
                    }
                }
            }
            // Dropping the senders ends every subscriber stream.
            reader_topics
                .lock()
                .expect("topic registry lock poisoned")
                .clear();
        });

        let heartbeat_tx = outbound.clone();
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                ticker.tick().await;
                let beat = SocketMessage {
                    topic: "phoenix".to_string(),
                    event: "heartbeat".to_string(),
                    payload: json!({}),
                    reference: None,
                };
                if heartbeat_tx.send(beat).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            outbound,
            topics,
            next_ref: AtomicU64::new(1),
            tasks: vec![writer, reader, heartbeat],
        })
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn dispatch(topics: &TopicRegistry, text: &str) {
    let message: SocketMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(err) => {
            debug!(error = %err, "unparseable realtime frame");
            return;
        }
    };
    match message.event.as_str() {
        "postgres_changes" => {
            let Some(event) = change_event_from_payload(&message.payload) else {
                debug!(topic = %message.topic, "unrecognized change payload shape");
                return;
            };
            let sender = topics
                .lock()
                .expect("topic registry lock poisoned")
                .get(&message.topic)
                .cloned();
            if let Some(sender) = sender {
                if sender.try_send(event).is_err() {
                    debug!(topic = %message.topic, "subscriber gone or lagging, dropping event");
                }
            }
        }
        "phx_reply" => debug!(topic = %message.topic, "channel reply"),
        "phx_error" => warn!(topic = %message.topic, "channel errored"),
        _ => {}
    }
}

/// Decode the `postgres_changes` data frame into a [`ChangeEvent`].
fn change_event_from_payload(payload: &Value) -> Option<ChangeEvent> {
    let data = payload.get("data").unwrap_or(payload);
    let kind = match data.get("type").and_then(Value::as_str)? {
        "INSERT" => EventKind::Insert,
        "UPDATE" => EventKind::Update,
        _ => return None,
    };
    let table = data.get("table").and_then(Value::as_str)?.to_string();
    let row = data.get("record")?.clone();
    Some(ChangeEvent { table, kind, row })
}

/// The `phx_join` payload requesting one `postgres_changes` stream.
fn join_payload(spec: &SubscriptionSpec) -> Value {
    let event = match spec.kind {
        EventKind::Insert => "INSERT",
        EventKind::Update => "UPDATE",
    };
    let mut change = serde_json::Map::new();
    change.insert("event".to_string(), json!(event));
    change.insert("schema".to_string(), json!("public"));
    change.insert("table".to_string(), json!(spec.table));
    if let Some((column, value)) = &spec.filter {
        change.insert("filter".to_string(), json!(format!("{column}=eq.{value}")));
    }
    json!({ "config": { "postgres_changes": [Value::Object(change)] } })
}

#[async_trait]
impl ChangeFeed for RealtimeClient {
    async fn subscribe(&self, spec: SubscriptionSpec) -> Result<ChangeSubscription> {
        let reference = self.next_ref.fetch_add(1, Ordering::Relaxed);
        let topic = format!("realtime:public:{}:{}", spec.table, reference);

        let (tx, rx) = mpsc::channel(TOPIC_BUFFER);
        self.topics
            .lock()
            .expect("topic registry lock poisoned")
            .insert(topic.clone(), tx);

        let join = SocketMessage {
            topic: topic.clone(),
            event: "phx_join".to_string(),
            payload: join_payload(&spec),
            reference: Some(reference.to_string()),
        };
        if self.outbound.send(join).is_err() {
            self.topics
                .lock()
                .expect("topic registry lock poisoned")
                .remove(&topic);
            return Err(Error::Subscription("realtime socket is down".to_string()));
        }

        let outbound = self.outbound.clone();
        let topics = self.topics.clone();
        Ok(ChangeSubscription::new(rx, move || {
            topics
                .lock()
                .expect("topic registry lock poisoned")
                .remove(&topic);
            let leave = SocketMessage {
                topic,
                event: "phx_leave".to_string(),
                payload: json!({}),
                reference: None,
            };
            let _ = outbound.send(leave);
        }))
    }
}
