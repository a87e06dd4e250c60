//! Named event payloads pushed to a UI layer.

use serde::Serialize;

use crate::activity::ActivityItem;
use crate::unread::UnreadSummary;

pub const EVENT_UNREAD_CHANGED: &str = "unread-changed";
pub const EVENT_ACTIVITY_CHANGED: &str = "activity-changed";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadPayload {
    pub user_id: String,
    pub total: usize,
    pub per_chat: Vec<ChatUnread>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUnread {
    pub chat_id: String,
    pub count: usize,
}

impl UnreadPayload {
    pub fn new(user_id: &str, summary: &UnreadSummary) -> Self {
        Self {
            user_id: user_id.to_string(),
            total: summary.total(),
            per_chat: summary
                .per_chat
                .iter()
                .map(|(chat_id, count)| ChatUnread {
                    chat_id: chat_id.to_string(),
                    count: *count,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityPayload {
    pub user_id: String,
    pub items: Vec<ActivityItem>,
}

#[derive(Serialize)]
struct Envelope<'a, S> {
    event: &'a str,
    payload: &'a S,
}

/// One JSON line `{"event": ..., "payload": ...}`. Returns `None` and logs
/// when the payload cannot be encoded.
pub fn encode_event<S: Serialize>(event: &str, payload: &S) -> Option<String> {
    match serde_json::to_string(&Envelope { event, payload }) {
        Ok(line) => Some(line),
        Err(e) => {
            tracing::error!(event, error = %e, "Failed to encode event");
            None
        }
    }
}
