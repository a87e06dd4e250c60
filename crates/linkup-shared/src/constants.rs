/// Application name
pub const APP_NAME: &str = "LinkUp";

/// Separator placed between the two sorted user ids of a direct chat or
/// friendship key
pub const PAIR_KEY_SEPARATOR: char = '_';

/// Escapes a separator or escape character that appears inside a user id
pub const PAIR_KEY_ESCAPE: char = '\\';

/// Number of entries kept in a composed activity feed
pub const ACTIVITY_FEED_LIMIT: usize = 10;

/// Maximum message length in characters
pub const MAX_MESSAGE_LENGTH: usize = 4_000;

/// Maximum post length in characters
pub const MAX_POST_LENGTH: usize = 5_000;

/// Maximum group chat name length in characters
pub const MAX_GROUP_NAME_LENGTH: usize = 100;

/// Characters of the original message kept in a reply preview
pub const REPLY_PREVIEW_CHARS: usize = 100;

/// Content shown in place of a message deleted for everyone
pub const DELETED_MESSAGE_PLACEHOLDER: &str = "This message was deleted";

/// Default page size for message history
pub const MESSAGE_PAGE_SIZE: u32 = 50;

/// Default capacity of each subscription's outbound channel
pub const DEFAULT_SUBSCRIPTION_BUFFER: usize = 64;

/// Default capacity of the store's broadcast change feed
pub const DEFAULT_CHANGE_FEED_CAPACITY: usize = 256;
