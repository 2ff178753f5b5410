//! Message envelope and factory for inter-agent communication.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Reserved destination meaning "every registered agent except the sender".
pub const BROADCAST: &str = "broadcast";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Command,
    Query,
    Event,
    Response,
    StatusUpdate,
    AssistanceRequested,
    ValidationRequest,
    ValidationResponse,
    ComplianceRequest,
    ComplianceResponse,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageMetadata {
    pub priority: Priority,
    pub tags: HashMap<String, String>,
}

/// Body of a RESPONSE payload: either a result or a structured error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseBody {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl ResponseBody {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(code: impl Into<String>, message: impl Into<String>, details: Option<Value>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(ResponseError {
                code: code.into(),
                message: message.into(),
                details,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePayload {
    Command {
        name: String,
        args: Value,
    },
    Query {
        name: String,
        params: Value,
    },
    Event {
        name: String,
        data: Value,
    },
    Response(ResponseBody),
    StatusUpdate {
        state: String,
        detail: Value,
    },
    AssistanceRequested {
        reason: String,
        context: Value,
    },
    ValidationRequest {
        subject: String,
        rules: Value,
    },
    ValidationResponse {
        subject: String,
        passed: bool,
        findings: Value,
    },
    ComplianceRequest {
        subject: String,
        policy: String,
    },
    ComplianceResponse {
        subject: String,
        compliant: bool,
        findings: Value,
    },
}

impl MessagePayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Command { .. } => EventKind::Command,
            Self::Query { .. } => EventKind::Query,
            Self::Event { .. } => EventKind::Event,
            Self::Response(_) => EventKind::Response,
            Self::StatusUpdate { .. } => EventKind::StatusUpdate,
            Self::AssistanceRequested { .. } => EventKind::AssistanceRequested,
            Self::ValidationRequest { .. } => EventKind::ValidationRequest,
            Self::ValidationResponse { .. } => EventKind::ValidationResponse,
            Self::ComplianceRequest { .. } => EventKind::ComplianceRequest,
            Self::ComplianceResponse { .. } => EventKind::ComplianceResponse,
        }
    }
}

/// Envelope carried by every message on the bus. Immutable once built.
///
/// `kind` is derived from the payload variant at construction so the two can
/// never disagree. Field names serialize in the original camelCase wire shape
/// so a transport bridge preserves the envelope exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessage {
    pub message_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub destination: String,
    #[serde(rename = "eventType")]
    pub kind: EventKind,
    pub payload: MessagePayload,
    #[serde(default)]
    pub metadata: MessageMetadata,
    #[serde(default)]
    pub requires_response: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AgentMessage {
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        payload: MessagePayload,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            correlation_id: None,
            timestamp: Utc::now(),
            source: source.into(),
            destination: destination.into(),
            kind: payload.kind(),
            payload,
            metadata: MessageMetadata::default(),
            requires_response: false,
            expires_at: None,
        }
    }

    pub fn broadcast(source: impl Into<String>, payload: MessagePayload) -> Self {
        Self::new(source, BROADCAST, payload)
    }

    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.metadata.priority = priority;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_correlation(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn expecting_response(mut self) -> Self {
        self.requires_response = true;
        self
    }

    /// Set an absolute expiry deadline `ttl_secs` from now.
    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.expires_at = Some(Utc::now() + Duration::seconds(ttl_secs as i64));
        self
    }

    /// RESPONSE answering `original`, correlated by its message id and
    /// inheriting its metadata.
    pub fn success_response(original: &AgentMessage, result: Value) -> Self {
        Self::response_to(original, ResponseBody::ok(result))
    }

    pub fn error_response(
        original: &AgentMessage,
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<Value>,
    ) -> Self {
        Self::response_to(original, ResponseBody::err(code, message, details))
    }

    fn response_to(original: &AgentMessage, body: ResponseBody) -> Self {
        Self::new(
            original.destination.clone(),
            original.source.clone(),
            MessagePayload::Response(body),
        )
        .with_correlation(original.message_id)
        .with_metadata(original.metadata.clone())
    }

    pub fn is_broadcast(&self) -> bool {
        self.destination == BROADCAST
    }

    pub fn is_response(&self) -> bool {
        self.kind == EventKind::Response
    }

    /// A message is expired iff a deadline is set and has passed.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(deadline) => deadline <= Utc::now(),
            None => false,
        }
    }
}
