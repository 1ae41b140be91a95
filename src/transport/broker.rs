//! MQTT broker transport.
//!
//! Requests are published to `{prefix}/request/{session_id}` with a fresh
//! correlation id; a worker on the other side of the broker runs the
//! completion and publishes the result to `{prefix}/reply/{session_id}`.
//! A background listener task matches replies back to waiting callers
//! through the [`PendingReplies`] table. Replies that arrive after their
//! caller gave up are logged and dropped.

use crate::config::BrokerConfig;
use crate::error::BridgeError;
use crate::transport::{FunctionCall, InferenceRequest, InferenceTransport, Reply};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

const TRANSPORT_NAME: &str = "broker";

/// Wire format published for each inference request.
#[derive(Debug, Serialize)]
struct RequestPayload<'a> {
    correlation_id: &'a str,
    session_id: &'a str,
    dialog: &'a [crate::store::Turn],
    params: &'a crate::transport::GenerationParams,
    use_tools: bool,
}

/// Wire format expected on the reply topic.
#[derive(Debug, Deserialize)]
struct ReplyPayload {
    correlation_id: String,
    #[serde(default)]
    hint: Option<String>,
    #[serde(default)]
    function_calls: Vec<FunctionCall>,
    #[serde(default)]
    error: Option<String>,
}

/// Correlation table mapping in-flight request ids to their waiting callers.
///
/// Entries are registered before publish and removed either by the listener
/// (reply arrived) or by the caller (deadline passed). A reply whose id is
/// no longer in the table is an orphan.
#[derive(Default)]
struct PendingReplies {
    inflight: parking_lot::Mutex<HashMap<String, oneshot::Sender<ReplyPayload>>>,
}

impl PendingReplies {
    fn register(&self, correlation_id: &str) -> oneshot::Receiver<ReplyPayload> {
        let (tx, rx) = oneshot::channel();
        self.inflight.lock().insert(correlation_id.to_string(), tx);
        rx
    }

    /// Deliver a reply to its waiting caller. Returns false for orphans.
    fn resolve(&self, payload: ReplyPayload) -> bool {
        let Some(tx) = self.inflight.lock().remove(&payload.correlation_id) else {
            return false;
        };
        // A send error means the caller timed out between removal and here;
        // the reply is dropped the same as any other orphan.
        tx.send(payload).is_ok()
    }

    fn abandon(&self, correlation_id: &str) {
        self.inflight.lock().remove(correlation_id);
    }

    fn len(&self) -> usize {
        self.inflight.lock().len()
    }
}

pub struct BrokerTransport {
    client: AsyncClient,
    pending: Arc<PendingReplies>,
    topic_prefix: String,
    reply_timeout: Duration,
}

impl BrokerTransport {
    /// Connect to the broker and spawn the reply listener task. The
    /// connection is re-established automatically by the event loop.
    pub fn connect(config: &BrokerConfig) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

        let (client, mut event_loop) = AsyncClient::new(options, 64);
        let pending = Arc::new(PendingReplies::default());

        let listener_client = client.clone();
        let listener_pending = Arc::clone(&pending);
        let reply_filter = format!("{}/reply/#", config.topic_prefix);

        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        tracing::info!("connected to broker, subscribing {reply_filter}");
                        if let Err(err) = listener_client
                            .subscribe(&reply_filter, QoS::AtLeastOnce)
                            .await
                        {
                            tracing::error!("reply subscription failed: {err}");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        handle_reply(&listener_pending, &publish.payload);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!("broker connection error: {err}, retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            pending,
            topic_prefix: config.topic_prefix.clone(),
            reply_timeout: Duration::from_secs(config.reply_timeout_secs),
        }
    }
}

fn handle_reply(pending: &PendingReplies, payload: &[u8]) {
    let reply: ReplyPayload = match serde_json::from_slice(payload) {
        Ok(reply) => reply,
        Err(err) => {
            tracing::warn!("ignoring malformed reply payload: {err}");
            return;
        }
    };

    let correlation_id = reply.correlation_id.clone();
    if !pending.resolve(reply) {
        tracing::debug!("dropping orphaned reply {correlation_id}");
    }
}

#[async_trait]
impl InferenceTransport for BrokerTransport {
    fn name(&self) -> &'static str {
        TRANSPORT_NAME
    }

    async fn complete(&self, request: InferenceRequest<'_>) -> Result<Reply, BridgeError> {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let rx = self.pending.register(&correlation_id);

        let payload = RequestPayload {
            correlation_id: &correlation_id,
            session_id: request.session_id,
            dialog: request.dialog,
            params: request.params,
            use_tools: request.use_tools,
        };
        let body = serde_json::to_vec(&payload).map_err(|err| {
            self.pending.abandon(&correlation_id);
            BridgeError::InferenceUnavailable {
                transport: TRANSPORT_NAME,
                detail: format!("request encoding failed: {err}"),
            }
        })?;

        let topic = format!("{}/request/{}", self.topic_prefix, request.session_id);
        tracing::debug!(
            session_id = request.session_id,
            correlation_id = correlation_id.as_str(),
            "publishing inference request to {topic}"
        );

        if let Err(err) = self
            .client
            .publish(topic, QoS::AtLeastOnce, false, body)
            .await
        {
            self.pending.abandon(&correlation_id);
            return Err(BridgeError::InferenceUnavailable {
                transport: TRANSPORT_NAME,
                detail: format!("publish failed: {err}"),
            });
        }

        let reply = match tokio::time::timeout(self.reply_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_recv_closed)) => {
                return Err(BridgeError::InferenceUnavailable {
                    transport: TRANSPORT_NAME,
                    detail: "reply channel closed".to_string(),
                });
            }
            Err(_elapsed) => {
                // Late replies hit the table as orphans and are dropped.
                self.pending.abandon(&correlation_id);
                return Err(BridgeError::InferenceTimeout {
                    transport: TRANSPORT_NAME,
                    elapsed_secs: self.reply_timeout.as_secs(),
                });
            }
        };

        if let Some(error) = reply.error {
            return Err(BridgeError::InferenceUnavailable {
                transport: TRANSPORT_NAME,
                detail: error,
            });
        }

        Ok(Reply {
            content: reply.hint,
            function_calls: reply.function_calls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply_json(correlation_id: &str, hint: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "correlation_id": correlation_id,
            "hint": hint,
            "function_calls": []
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn registered_reply_is_delivered() {
        let pending = PendingReplies::default();
        let rx = pending.register("abc-123");

        handle_reply(&pending, &reply_json("abc-123", "go left"));

        let reply = rx.await.unwrap();
        assert_eq!(reply.hint.as_deref(), Some("go left"));
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn orphaned_reply_is_dropped() {
        let pending = PendingReplies::default();
        let rx = pending.register("abc-123");
        pending.abandon("abc-123");

        handle_reply(&pending, &reply_json("abc-123", "too late"));

        assert_eq!(pending.len(), 0);
        assert!(rx.await.is_err());
    }

    #[test]
    fn reply_for_unknown_correlation_id_is_orphan() {
        let pending = PendingReplies::default();
        handle_reply(&pending, &reply_json("never-registered", "hello"));
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn malformed_payload_is_ignored() {
        let pending = PendingReplies::default();
        let rx = pending.register("abc-123");

        handle_reply(&pending, b"not json at all");

        // The entry stays in flight for the real reply.
        assert_eq!(pending.len(), 1);
        drop(rx);
    }

    #[test]
    fn reply_payload_parses_function_calls() {
        let json = r#"{
            "correlation_id": "c1",
            "hint": "breaking a wall for you",
            "function_calls": [{"name": "break_wall", "arguments": {"x": 5, "y": 2}}]
        }"#;
        let reply: ReplyPayload = serde_json::from_str(json).unwrap();
        assert_eq!(reply.function_calls.len(), 1);
        assert_eq!(reply.function_calls[0].name, "break_wall");
        assert!(reply.error.is_none());
    }

    #[test]
    fn reply_payload_carries_worker_error() {
        let json = r#"{"correlation_id": "c1", "error": "model overloaded"}"#;
        let reply: ReplyPayload = serde_json::from_str(json).unwrap();
        assert_eq!(reply.error.as_deref(), Some("model overloaded"));
        assert!(reply.hint.is_none());
    }

    #[test]
    fn request_payload_shape() {
        let params = crate::transport::GenerationParams {
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 256,
        };
        let dialog = vec![crate::store::Turn::user("where is the exit?")];
        let payload = RequestPayload {
            correlation_id: "c1",
            session_id: "player-9",
            dialog: &dialog,
            params: &params,
            use_tools: true,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["correlation_id"], "c1");
        assert_eq!(json["session_id"], "player-9");
        assert_eq!(json["use_tools"], true);
        assert_eq!(json["dialog"][0]["role"], "user");
        assert_eq!(json["params"]["top_p"], 0.9);
    }
}
