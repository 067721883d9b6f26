use crate::emitter::{EmitError, EventEmitter};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use std::time::Duration;
use steward_core::{SessionEvent, StewardError, StewardResult};
use tracing::debug;

/// Content type understood by Kafka REST proxies for JSON records.
pub const KAFKA_JSON_V2: &str = "application/vnd.kafka.json.v2+json";

#[derive(Serialize)]
struct ProduceRequest<'a> {
    records: [ProduceRecord<'a>; 1],
}

#[derive(Serialize)]
struct ProduceRecord<'a> {
    key: &'a str,
    value: &'a SessionEvent,
}

/// Publishes events to a message broker through its REST proxy.
///
/// Each event becomes one record on `topic`, keyed by session id so a
/// partitioned topic keeps a session's events together.
pub struct BrokerEmitter {
    client: reqwest::Client,
    url: String,
    topic: String,
}

impl BrokerEmitter {
    /// Targets `{endpoint}/topics/{topic}`; every request is bounded by
    /// `timeout`.
    pub fn new(endpoint: &str, topic: &str, timeout: Duration) -> StewardResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StewardError::Config(format!("failed to build broker client: {e}")))?;
        Ok(Self {
            client,
            url: format!("{}/topics/{}", endpoint.trim_end_matches('/'), topic),
            topic: topic.to_string(),
        })
    }

    /// Produce endpoint the emitter posts to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EventEmitter for BrokerEmitter {
    fn name(&self) -> &str {
        "broker"
    }

    async fn emit(&self, event: &SessionEvent) -> Result<(), EmitError> {
        let body = serde_json::to_vec(&ProduceRequest {
            records: [ProduceRecord {
                key: &event.session_id,
                value: event,
            }],
        })?;

        let resp = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, KAFKA_JSON_V2)
            .body(body)
            .send()
            .await
            .map_err(|e| EmitError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(EmitError::Rejected(status.as_u16()));
        }
        debug!(topic = %self.topic, session_id = %event.session_id, "Event published");
        Ok(())
    }
}
