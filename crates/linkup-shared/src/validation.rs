//! Input checks applied before a write reaches the store.

use crate::constants::{
    MAX_GROUP_NAME_LENGTH, MAX_MESSAGE_LENGTH, MAX_POST_LENGTH, REPLY_PREVIEW_CHARS,
};
use crate::error::ValidationError;
use crate::types::UserId;

/// A message needs either text or at least one attachment.
pub fn validate_message_content(content: &str, has_attachments: bool) -> Result<(), ValidationError> {
    if content.trim().is_empty() && !has_attachments {
        return Err(ValidationError::EmptyContent);
    }
    check_length(content, MAX_MESSAGE_LENGTH)
}

pub fn validate_post_content(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    check_length(content, MAX_POST_LENGTH)
}

fn check_length(content: &str, max: usize) -> Result<(), ValidationError> {
    let len = content.chars().count();
    if len > max {
        return Err(ValidationError::ContentTooLong { len, max });
    }
    Ok(())
}

/// Direct chats have exactly two distinct, non-empty participants.
pub fn validate_direct_participants(
    participants: &[UserId],
) -> Result<(UserId, UserId), ValidationError> {
    ensure_non_empty_ids(participants)?;
    match participants {
        [a, b] if a != b => Ok((a.clone(), b.clone())),
        [_, _] => Err(ValidationError::InvalidParticipants(
            "a direct chat needs two different users".into(),
        )),
        other => Err(ValidationError::InvalidParticipants(format!(
            "a direct chat needs exactly 2 participants, got {}",
            other.len()
        ))),
    }
}

/// Groups need at least one participant. Duplicates are dropped, first
/// occurrence wins, so the creator stays first.
pub fn validate_group_participants(participants: &[UserId]) -> Result<Vec<UserId>, ValidationError> {
    ensure_non_empty_ids(participants)?;
    let mut unique: Vec<UserId> = Vec::with_capacity(participants.len());
    for id in participants {
        if !unique.contains(id) {
            unique.push(id.clone());
        }
    }
    if unique.is_empty() {
        return Err(ValidationError::InvalidParticipants(
            "a group needs at least one participant".into(),
        ));
    }
    Ok(unique)
}

pub fn validate_group_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::InvalidGroupName("name is empty".into()));
    }
    let len = trimmed.chars().count();
    if len > MAX_GROUP_NAME_LENGTH {
        return Err(ValidationError::InvalidGroupName(format!(
            "{len} characters (max {MAX_GROUP_NAME_LENGTH})"
        )));
    }
    Ok(())
}

fn ensure_non_empty_ids(ids: &[UserId]) -> Result<(), ValidationError> {
    if ids.iter().any(|id| id.as_str().trim().is_empty()) {
        return Err(ValidationError::EmptyUserId);
    }
    Ok(())
}

/// Shortened copy of a message used when replying to it.
pub fn reply_preview(content: &str) -> String {
    if content.chars().count() <= REPLY_PREVIEW_CHARS {
        return content.to_string();
    }
    let mut preview: String = content.chars().take(REPLY_PREVIEW_CHARS).collect();
    preview.push('…');
    preview
}
