//! Notification dispatch for newly observed transfers.
//!
//! The sink is a trait so the engine never depends on the concrete social
//! API; `XApiNotifier` posts to the X v2 create-post endpoint. Every
//! dispatch attempt (including ones suppressed by test mode) lands in a
//! bounded history ring for the status endpoints.

use crate::tracker::types::TransferRecord;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Bound on the dispatch history. Oldest entries are evicted first.
const MAX_HISTORY: usize = 20;

/// Outcome of one publish call against the sink.
#[derive(Debug, Clone)]
pub enum PublishResult {
    Sent { id: Option<String> },
    RateLimited,
    Failed { error: String },
}

/// The downstream notification sink. Must be safe to call from the monitor
/// loop; failures are values, never panics.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, text: &str) -> PublishResult;
}

/// Posts notifications via the X API v2 (`POST /2/tweets`) using a
/// user-context bearer token.
pub struct XApiNotifier {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl XApiNotifier {
    pub fn new(base_url: String, access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            access_token,
        }
    }
}

#[async_trait]
impl Notifier for XApiNotifier {
    async fn publish(&self, text: &str) -> PublishResult {
        let url = format!("{}/tweets", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await;

        match resp {
            Ok(resp) if resp.status() == reqwest::StatusCode::CREATED => {
                let id = resp
                    .json::<serde_json::Value>()
                    .await
                    .ok()
                    .and_then(|v| v["data"]["id"].as_str().map(str::to_string));
                PublishResult::Sent { id }
            }
            Ok(resp) if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                PublishResult::RateLimited
            }
            Ok(resp) => PublishResult::Failed {
                error: format!("post endpoint returned status {}", resp.status()),
            },
            Err(e) => PublishResult::Failed {
                error: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Sent,
    RateLimited,
    SuppressedTestMode,
    Failed,
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationStatus::Sent => write!(f, "sent"),
            NotificationStatus::RateLimited => write!(f, "rate_limited"),
            NotificationStatus::SuppressedTestMode => write!(f, "suppressed_test_mode"),
            NotificationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One dispatch attempt, as kept in the history ring.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationRecord {
    pub timestamp: String,
    pub status: NotificationStatus,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Bounded FIFO history of dispatch attempts.
#[derive(Default)]
pub struct NotificationLog {
    entries: VecDeque<NotificationRecord>,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: NotificationRecord) {
        if self.entries.len() >= MAX_HISTORY {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&NotificationRecord> {
        self.entries.back()
    }

    /// Oldest first.
    pub fn recent(&self) -> Vec<NotificationRecord> {
        self.entries.iter().cloned().collect()
    }
}

/// Publish `text` through the sink (unless test mode suppresses it) and
/// append the outcome to the history.
pub async fn dispatch<N: Notifier + ?Sized>(
    notifier: &N,
    history: &Mutex<NotificationLog>,
    test_mode: bool,
    text: String,
) -> NotificationStatus {
    let record = if test_mode {
        info!(text = %text, "test mode, notification suppressed");
        NotificationRecord {
            timestamp: Utc::now().to_rfc3339(),
            status: NotificationStatus::SuppressedTestMode,
            text,
            id: None,
            error: None,
        }
    } else {
        match notifier.publish(&text).await {
            PublishResult::Sent { id } => {
                info!(id = ?id, "notification posted");
                NotificationRecord {
                    timestamp: Utc::now().to_rfc3339(),
                    status: NotificationStatus::Sent,
                    text,
                    id,
                    error: None,
                }
            }
            PublishResult::RateLimited => {
                warn!("notification sink rate limited, skipping post");
                NotificationRecord {
                    timestamp: Utc::now().to_rfc3339(),
                    status: NotificationStatus::RateLimited,
                    text,
                    id: None,
                    error: Some("sink rate limit reached".to_string()),
                }
            }
            PublishResult::Failed { error } => {
                warn!(error = %error, "notification post failed");
                NotificationRecord {
                    timestamp: Utc::now().to_rfc3339(),
                    status: NotificationStatus::Failed,
                    text,
                    id: None,
                    error: Some(error),
                }
            }
        }
    };

    let status = record.status.clone();
    history.lock().await.push(record);
    status
}

/// Direction of a transfer relative to the tracked address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// Per-cycle aggregate totals, computed once and reused for every
/// notification in the cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectionTotals {
    pub inbound_tao: Decimal,
    pub outbound_tao: Decimal,
}

impl DirectionTotals {
    pub fn from_buckets(inbound: &[TransferRecord], outbound: &[TransferRecord]) -> Self {
        Self {
            inbound_tao: inbound.iter().map(|r| r.tao_value()).sum::<Decimal>().round_dp(4),
            outbound_tao: outbound.iter().map(|r| r.tao_value()).sum::<Decimal>().round_dp(4),
        }
    }
}

fn shorten(addr: &str) -> String {
    if addr.len() > 12 {
        format!("{}...{}", &addr[..6], &addr[addr.len() - 6..])
    } else {
        addr.to_string()
    }
}

/// Build the text for one transfer notification. Pure; the caller supplies
/// the per-cycle totals so this never triggers extra classification work.
pub fn build_transfer_notice(
    record: &TransferRecord,
    direction: Direction,
    totals: &DirectionTotals,
) -> String {
    let amount = record.tao_value();
    let from = shorten(record.from_ss58().unwrap_or("unknown"));
    let to = shorten(record.to_ss58().unwrap_or("unknown"));

    let link = match (&record.extrinsic_id, record.block_number) {
        (Some(extrinsic_id), _) => {
            format!("https://taostats.io/extrinsic/{extrinsic_id}")
        }
        (None, Some(block)) => format!("https://taostats.io/block/{block}"),
        (None, None) => String::new(),
    };

    let mut text = format!(
        "New {direction} transfer: {amount} TAO\n\
         {from} -> {to}\n\
         Today: {} TAO in / {} TAO out",
        totals.inbound_tao, totals.outbound_tao,
    );
    if !link.is_empty() {
        text.push('\n');
        text.push_str(&link);
    }
    text.push('\n');
    text.push_str(&Utc::now().format("%H:%M:%S UTC").to_string());
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubNotifier {
        result: PublishResult,
        calls: AtomicUsize,
    }

    impl StubNotifier {
        fn new(result: PublishResult) -> Self {
            Self {
                result,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Notifier for StubNotifier {
        async fn publish(&self, _text: &str) -> PublishResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn record_json(json: &str) -> TransferRecord {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn history_evicts_oldest_beyond_cap() {
        let mut log = NotificationLog::new();
        for i in 0..25 {
            log.push(NotificationRecord {
                timestamp: String::new(),
                status: NotificationStatus::Sent,
                text: i.to_string(),
                id: None,
                error: None,
            });
        }
        assert_eq!(log.len(), 20);
        let recent = log.recent();
        assert_eq!(recent.first().unwrap().text, "5");
        assert_eq!(recent.last().unwrap().text, "24");
    }

    #[tokio::test]
    async fn test_mode_suppresses_without_calling_sink() {
        let notifier = StubNotifier::new(PublishResult::Sent { id: None });
        let history = Mutex::new(NotificationLog::new());

        let status = dispatch(&notifier, &history, true, "hello".to_string()).await;
        assert_eq!(status, NotificationStatus::SuppressedTestMode);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            history.lock().await.last().unwrap().status,
            NotificationStatus::SuppressedTestMode
        );
    }

    #[tokio::test]
    async fn failed_publish_is_recorded_with_detail() {
        let notifier = StubNotifier::new(PublishResult::Failed {
            error: "boom".to_string(),
        });
        let history = Mutex::new(NotificationLog::new());

        let status = dispatch(&notifier, &history, false, "hello".to_string()).await;
        assert_eq!(status, NotificationStatus::Failed);
        let log = history.lock().await;
        assert_eq!(log.last().unwrap().error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn rate_limited_publish_is_recorded() {
        let notifier = StubNotifier::new(PublishResult::RateLimited);
        let history = Mutex::new(NotificationLog::new());

        let status = dispatch(&notifier, &history, false, "hello".to_string()).await;
        assert_eq!(status, NotificationStatus::RateLimited);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn totals_sum_scaled_amounts() {
        let inbound = vec![
            record_json(r#"{"amount": "2000000000"}"#),
            record_json(r#"{"amount": "500000000"}"#),
        ];
        let outbound = vec![record_json(r#"{"amount": "1000000000"}"#)];

        let totals = DirectionTotals::from_buckets(&inbound, &outbound);
        assert_eq!(totals.inbound_tao.to_string(), "2.5000");
        assert_eq!(totals.outbound_tao.to_string(), "1.0000");
    }

    #[test]
    fn notice_includes_amount_path_totals_and_link() {
        let record = record_json(
            r#"{"extrinsic_id": "123-7",
                "from": {"ss58": "5AAAAAAAAAAAAAAAAAAAAA"},
                "to": {"ss58": "5BBBBBBBBBBBBBBBBBBBBB"},
                "amount": "2000000000"}"#,
        );
        let totals = DirectionTotals::from_buckets(std::slice::from_ref(&record), &[]);
        let text = build_transfer_notice(&record, Direction::Inbound, &totals);

        assert!(text.contains("inbound"));
        assert!(text.contains("2.0000 TAO"));
        assert!(text.contains("5AAAAA...AAAAAA -> 5BBBBB...BBBBBB"));
        assert!(text.contains("2.0000 TAO in / 0 TAO out"));
        assert!(text.contains("https://taostats.io/extrinsic/123-7"));
    }

    #[tokio::test]
    async fn x_notifier_maps_response_statuses() {
        use wiremock::matchers::{body_partial_json, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tweets"))
            .and(body_partial_json(serde_json::json!({"text": "hello"})))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(serde_json::json!({"data": {"id": "987"}})),
            )
            .mount(&server)
            .await;

        let notifier = XApiNotifier::new(server.uri(), "token".to_string());
        let result = notifier.publish("hello").await;
        assert!(matches!(result, PublishResult::Sent { id: Some(ref id) } if id == "987"));

        server.reset().await;
        Mock::given(method("POST"))
            .and(path("/tweets"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        assert!(matches!(
            notifier.publish("hello").await,
            PublishResult::RateLimited
        ));

        server.reset().await;
        Mock::given(method("POST"))
            .and(path("/tweets"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        assert!(matches!(
            notifier.publish("hello").await,
            PublishResult::Failed { .. }
        ));
    }

    #[test]
    fn notice_falls_back_to_block_link() {
        let record = record_json(
            r#"{"block_number": 42,
                "from": {"ss58": "5A"}, "to": {"ss58": "5B"},
                "amount": "1"}"#,
        );
        let text =
            build_transfer_notice(&record, Direction::Outbound, &DirectionTotals::default());
        assert!(text.contains("https://taostats.io/block/42"));
    }
}
