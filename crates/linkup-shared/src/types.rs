use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{PAIR_KEY_ESCAPE, PAIR_KEY_SEPARATOR};
use crate::error::ValidationError;

// User identity is an opaque string handed out by the auth provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Key shared by a direct chat and the friendship between the same two users.
///
/// The ids are sorted before joining so `pair_key(a, b) == pair_key(b, a)`.
/// A separator or escape character inside an id is escaped, so two
/// different pairs never share a key.
pub fn pair_key(a: &UserId, b: &UserId) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    let mut key = String::with_capacity(first.0.len() + second.0.len() + 1);
    push_escaped(&mut key, &first.0);
    key.push(PAIR_KEY_SEPARATOR);
    push_escaped(&mut key, &second.0);
    key
}

fn push_escaped(key: &mut String, id: &str) {
    for c in id.chars() {
        if c == PAIR_KEY_SEPARATOR || c == PAIR_KEY_ESCAPE {
            key.push(PAIR_KEY_ESCAPE);
        }
        key.push(c);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ChatId(pub String);

impl ChatId {
    /// Deterministic id of the direct chat between two users.
    pub fn direct(a: &UserId, b: &UserId) -> Self {
        Self(pair_key(a, b))
    }

    /// Fresh id for a group chat.
    pub fn group() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChatId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident as $field:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( Self::$variant => $text ),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok(Self::$variant), )+
                    other => Err(ValidationError::UnknownValue {
                        field: $field,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum! {
    /// Platform role of a user. Everything except `User` is elevated.
    Role as "role" {
        User => "user",
        Support => "support",
        LevelAdmin => "level_admin",
        Developer => "developer",
        SuperAdmin => "super_admin",
    }
}

impl Role {
    pub fn is_elevated(&self) -> bool {
        !matches!(self, Role::User)
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

string_enum! {
    ChatKind as "chat kind" {
        Direct => "direct",
        Group => "group",
    }
}

string_enum! {
    MessageKind as "message kind" {
        Text => "text",
        Image => "image",
        Video => "video",
        Audio => "audio",
        Document => "document",
        System => "system",
    }
}

impl Default for MessageKind {
    fn default() -> Self {
        MessageKind::Text
    }
}

string_enum! {
    /// Who a deleted message disappears for.
    DeleteScope as "delete scope" {
        /// Hidden only in the deleting user's own view
        SenderOnly => "sender_only",
        /// Tombstoned for every participant
        Everyone => "everyone",
    }
}

string_enum! {
    RequestStatus as "request status" {
        Pending => "pending",
        Accepted => "accepted",
        Rejected => "rejected",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_chat_id_ignores_argument_order() {
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");
        assert_eq!(ChatId::direct(&alice, &bob), ChatId::direct(&bob, &alice));
        assert_eq!(ChatId::direct(&alice, &bob).as_str(), "alice_bob");
    }

    #[test]
    fn separator_inside_an_id_does_not_merge_pairs() {
        let left = pair_key(&UserId::from("a_b"), &UserId::from("c"));
        let right = pair_key(&UserId::from("a"), &UserId::from("b_c"));
        assert_ne!(left, right);
        assert_eq!(left, "a\\_b_c");
        assert_eq!(right, "a_b\\_c");

        let escaped = pair_key(&UserId::from("a\\"), &UserId::from("b"));
        assert_ne!(escaped, pair_key(&UserId::from("a"), &UserId::from("\\b")));
    }

    #[test]
    fn group_ids_are_fresh() {
        assert_ne!(ChatId::group(), ChatId::group());
    }

    #[test]
    fn only_plain_users_are_not_elevated() {
        assert!(!Role::User.is_elevated());
        for role in [
            Role::Support,
            Role::LevelAdmin,
            Role::Developer,
            Role::SuperAdmin,
        ] {
            assert!(role.is_elevated(), "{role} should be elevated");
        }
    }

    #[test]
    fn enum_text_matches_serde() {
        assert_eq!("level_admin".parse::<Role>().unwrap(), Role::LevelAdmin);
        assert_eq!(
            serde_json::to_string(&DeleteScope::SenderOnly).unwrap(),
            "\"sender_only\""
        );
        assert!(matches!(
            "owner".parse::<Role>(),
            Err(ValidationError::UnknownValue { field: "role", .. })
        ));
    }
}
