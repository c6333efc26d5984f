use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{
    ChatBoxId, CompanyRequestId, FileId, NotificationId, NotificationKind, NotificationStatus,
    RequestId, RevisionStatus, RevisionType, UserId,
};

/// Reference to a stored attachment (3D model or supporting file). The
/// asset bytes themselves live on the storage/CDN side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    pub file_id: FileId,
    pub file_name: String,
    pub url: String,
}

/// One unit of design work exchanged between a requesting company and a
/// designer, as the backend serializes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionRequest {
    pub id: RequestId,
    pub status: RevisionStatus,
    #[serde(rename = "type")]
    pub revision_type: RevisionType,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_proposal: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_file: Option<AttachmentRef>,
    #[serde(default)]
    pub revision_files: Vec<AttachmentRef>,
    pub company_request_id: CompanyRequestId,
    pub created_date: DateTime<Utc>,
}

impl RevisionRequest {
    /// Checks the record-level invariants the backend is supposed to
    /// maintain. Used to flag inconsistent payloads rather than trust them.
    pub fn is_consistent(&self) -> bool {
        let price_ok = match self.status {
            RevisionStatus::Pending => self.price_proposal.is_none(),
            _ => true,
        };
        let rejection_ok = match self.status {
            RevisionStatus::Rejected => self
                .rejection_reason
                .as_deref()
                .is_some_and(|reason| !reason.trim().is_empty()),
            _ => true,
        };
        let model_ok = match self.status {
            RevisionStatus::Delivered | RevisionStatus::Completed => self.model_file.is_some(),
            _ => true,
        };
        price_ok && rejection_ok && model_ok
    }
}

/// One-shot transition payload for `PUT /v1/request-revisions/{id}`: the
/// entire intended next status plus exactly the fields that transition
/// introduces. There is no separate propose/confirm round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionRequestUpdate {
    pub id: RequestId,
    pub status: RevisionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_proposal: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_file: Option<FileId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_description: Option<String>,
}

impl RevisionRequestUpdate {
    pub fn status_only(id: RequestId, status: RevisionStatus) -> Self {
        Self {
            id,
            status,
            price_proposal: None,
            rejection_reason: None,
            model_file: None,
            model_name: None,
            model_description: None,
        }
    }
}

/// Fields for creating a new revision request. File contents travel as
/// multipart parts alongside this metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRevisionRequest {
    #[serde(rename = "type")]
    pub revision_type: RevisionType,
    pub reason: String,
    pub company_request_id: CompanyRequestId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub chat_box_id: ChatBoxId,
    pub sender_email: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub status: NotificationStatus,
    pub title: String,
    pub content: String,
    /// Opaque navigation reference: for `Request` notifications this is the
    /// company-request id whose revision list went stale.
    pub key: String,
    pub created_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletBalance {
    pub balance: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub user_id: UserId,
    pub email: String,
    pub role: crate::domain::Role,
}

/// Topic names on the realtime channel, one per synchronized resource.
pub fn chat_topic(chat_box_id: &ChatBoxId) -> String {
    format!("/topic/chat/{chat_box_id}")
}

pub fn notification_topic(user_id: &UserId) -> String {
    format!("/topic/notification/{user_id}")
}

pub fn wallet_topic(user_id: &UserId) -> String {
    format!("/topic/wallet/{user_id}")
}

/// Frames the client sends on the realtime channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Publish { topic: String, payload: Value },
}

/// Frames the broker pushes to the client. Payloads are JSON objects
/// matching the corresponding REST resource shape; there is no message
/// schema versioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerFrame {
    Message { topic: String, payload: Value },
    Error { message: String },
}
