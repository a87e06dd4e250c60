use thiserror::Error;

/// Input rejected before anything touches the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message content is empty")]
    EmptyContent,

    #[error("Content too long: {len} characters (max {max})")]
    ContentTooLong { len: usize, max: usize },

    #[error("Invalid participants: {0}")]
    InvalidParticipants(String),

    #[error("Invalid group name: {0}")]
    InvalidGroupName(String),

    #[error("User id must not be empty")]
    EmptyUserId,

    #[error("Unknown {field} value: {value}")]
    UnknownValue { field: &'static str, value: String },
}
