use linkup_shared::{ChatId, UserId, ValidationError};
use linkup_store::StoreError;
use uuid::Uuid;

/// Errors returned by the client services.
///
/// Precondition violations are reported before anything is written.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid input: {0}")]
    Invalid(#[from] ValidationError),

    #[error("Chat not found: {0}")]
    ChatNotFound(ChatId),

    #[error("Message not found: {0}")]
    MessageNotFound(Uuid),

    #[error("Friend request not found: {0}")]
    RequestNotFound(Uuid),

    #[error("Post not found: {0}")]
    PostNotFound(Uuid),

    #[error("{0} and {1} are not friends")]
    NotFriends(UserId, UserId),

    #[error("{user} is not a participant of chat {chat}")]
    NotParticipant { chat: ChatId, user: UserId },

    #[error("{user} is not an admin of chat {chat}")]
    NotGroupAdmin { chat: ChatId, user: UserId },

    #[error("Chat {0} is not a group")]
    NotAGroup(ChatId),

    #[error("Only the sender can change this message")]
    NotMessageOwner,

    #[error("Message was deleted for everyone")]
    MessageDeleted,

    #[error("Only the author can delete this post")]
    NotPostAuthor,

    #[error("Only the recipient can answer this friend request")]
    NotRequestRecipient,

    #[error("Only the sender can cancel this friend request")]
    NotRequestSender,

    #[error("Friend request was already answered")]
    RequestNotPending,

    #[error("A pending friend request already exists between {0} and {1}")]
    RequestAlreadyPending(UserId, UserId),

    #[error("{0} and {1} are already friends")]
    AlreadyFriends(UserId, UserId),

    #[error("Cannot send a friend request to yourself")]
    SelfRequest,

    #[error("Database lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, ClientError>;
