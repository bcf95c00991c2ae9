//! The transport seam: pull endpoints, push events, reconnect backoff.
//!
//! The core never talks HTTP directly; a [`Transport`] implementation maps
//! these calls onto `GET /self/logs/{db}/…` and the group equivalents
//! under `/groups/{groupId}/logs/{db}`, attaching the bearer token from the
//! external auth provider. All bodies are JSON with the field names of the
//! DTOs here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use lorica_bbs::keys::GroupPublicKey;
use lorica_chain::entry::{EncryptedPersonalEntry, GroupEntry};
use lorica_mls::access::EpochAccessKey;

/// Transport failure kinds. Everything here is retriable at some cadence;
/// [`TransportError::is_retriable`] marks what is worth retrying
/// immediately.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A non-success HTTP status.
    #[error("HTTP {code}: {body}")]
    HttpStatus { code: u16, body: String },

    /// The response body did not match the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The call exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// No transport is configured for this log.
    #[error("transport not configured")]
    NotConfigured,
}

impl TransportError {
    /// Whether an immediate retry is reasonable.
    pub fn is_retriable(&self) -> bool {
        match self {
            TransportError::Timeout => true,
            TransportError::HttpStatus { code, .. } => *code >= 500,
            _ => false,
        }
    }

    /// Whether this status signals an index conflict on append.
    pub fn is_conflict(&self) -> bool {
        matches!(self, TransportError::HttpStatus { code: 409, .. })
    }
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

/// `GET …/head` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadResponse<T> {
    pub head: Option<T>,
}

/// One page of `GET …?startIndex=i&limit=n`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPage<T> {
    pub logs: Vec<T>,
    pub has_more: bool,
}

/// `POST /self/logs/{db}` body.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendChainLogRequest {
    pub entry: EncryptedPersonalEntry,
}

/// `POST /groups/{groupId}/logs/{db}` body.
///
/// Epoch transitions ride alongside the entry so the server (which cannot
/// decrypt) can verify the transition proof against its current access key
/// before adopting the new one.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendGroupChainLogRequest {
    pub entry: GroupEntry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_access_key: Option<EpochAccessKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_proof: Option<String>,
}

/// `POST /groups` body.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub group_id: String,
    pub group_public_key: GroupPublicKey,
    pub initial_access_key: EpochAccessKey,
}

/// Server-to-client push events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    #[serde(rename_all = "camelCase")]
    Connected { address: String },
    #[serde(rename_all = "camelCase")]
    NewLog { entry: EncryptedPersonalEntry },
    #[serde(rename_all = "camelCase")]
    LogStreamEnd { last_index: i64 },
    #[serde(rename_all = "camelCase")]
    NewGroupLog { group_id: String, entry: GroupEntry },
    #[serde(rename_all = "camelCase")]
    GroupLogStreamEnd { group_id: String, last_index: i64 },
}

/// Client-to-server control frames on the push channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    #[serde(rename_all = "camelCase")]
    StreamLogs {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_index: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    SubscribeGroup { group_id: String },
    #[serde(rename_all = "camelCase")]
    UnsubscribeGroup { group_id: String },
    #[serde(rename_all = "camelCase")]
    StreamGroupLogs {
        group_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_index: Option<u64>,
    },
}

// ---------------------------------------------------------------------------
// The seam
// ---------------------------------------------------------------------------

/// Pull transport for both log families.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn personal_head(&self, db: &str) -> TransportResult<Option<EncryptedPersonalEntry>>;
    async fn personal_list(
        &self,
        db: &str,
        start_index: u64,
        limit: u32,
    ) -> TransportResult<ListPage<EncryptedPersonalEntry>>;
    async fn personal_get(&self, db: &str, index: u64)
        -> TransportResult<EncryptedPersonalEntry>;
    async fn personal_append(
        &self,
        db: &str,
        request: AppendChainLogRequest,
    ) -> TransportResult<EncryptedPersonalEntry>;

    async fn group_head(&self, group_id: &str, db: &str)
        -> TransportResult<Option<GroupEntry>>;
    async fn group_list(
        &self,
        group_id: &str,
        db: &str,
        start_index: u64,
        limit: u32,
    ) -> TransportResult<ListPage<GroupEntry>>;
    async fn group_get(&self, group_id: &str, db: &str, index: u64)
        -> TransportResult<GroupEntry>;
    async fn group_append(
        &self,
        group_id: &str,
        db: &str,
        request: AppendGroupChainLogRequest,
    ) -> TransportResult<GroupEntry>;

    async fn create_group(&self, request: CreateGroupRequest) -> TransportResult<()>;
}

// ---------------------------------------------------------------------------
// Reconnect backoff
// ---------------------------------------------------------------------------

/// Exponential reconnect schedule for the push channel:
/// `base · 2^min(attempt, max_shift)`, up to `max_attempts` tries.
#[derive(Clone, Debug)]
pub struct Backoff {
    pub base: Duration,
    pub factor: u32,
    pub max_shift: u32,
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2,
            max_shift: 5,
            max_attempts: 10,
        }
    }
}

impl Backoff {
    /// Delay before the given 0-based attempt, or `None` when attempts are
    /// exhausted.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let exponent = attempt.min(self.max_shift);
        Some(self.base * self.factor.pow(exponent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let backoff = Backoff::default();
        let delays: Vec<Option<u64>> = (0..11)
            .map(|a| backoff.delay(a).map(|d| d.as_secs()))
            .collect();
        assert_eq!(
            delays,
            vec![
                Some(1),
                Some(2),
                Some(4),
                Some(8),
                Some(16),
                Some(32),
                Some(32),
                Some(32),
                Some(32),
                Some(32),
                None
            ]
        );
    }

    #[test]
    fn test_retriable_classification() {
        assert!(TransportError::Timeout.is_retriable());
        assert!(TransportError::HttpStatus {
            code: 503,
            body: String::new()
        }
        .is_retriable());
        assert!(!TransportError::HttpStatus {
            code: 404,
            body: String::new()
        }
        .is_retriable());
        assert!(!TransportError::NotConfigured.is_retriable());
    }

    #[test]
    fn test_conflict_classification() {
        assert!(TransportError::HttpStatus {
            code: 409,
            body: String::new()
        }
        .is_conflict());
        assert!(!TransportError::Timeout.is_conflict());
    }

    #[test]
    fn test_push_event_wire_shape() {
        let event = PushEvent::GroupLogStreamEnd {
            group_id: "aabb".into(),
            last_index: 7,
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "group_log_stream_end");
        assert_eq!(json["groupId"], "aabb");
        assert_eq!(json["lastIndex"], 7);
    }

    #[test]
    fn test_control_frame_optional_fields() {
        let frame = ControlFrame::StreamLogs { from_index: None };
        let json = serde_json::to_string(&frame).expect("serialize");
        assert_eq!(json, r#"{"type":"stream_logs"}"#);

        let frame = ControlFrame::StreamGroupLogs {
            group_id: "aabb".into(),
            from_index: Some(4),
        };
        let json = serde_json::to_value(&frame).expect("serialize");
        assert_eq!(json["fromIndex"], 4);
    }
}
