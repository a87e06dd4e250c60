//! v001 -- Initial schema creation.
//!
//! Users, chats (with participants), messages (with read markers and
//! per-user hidden markers), friendships, friend requests and posts.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id           TEXT PRIMARY KEY NOT NULL,
    display_name TEXT NOT NULL,
    role         TEXT NOT NULL DEFAULT 'user',
    created_at   TEXT NOT NULL                -- RFC-3339, microseconds
);

CREATE INDEX IF NOT EXISTS idx_users_created ON users(created_at DESC);

-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id           TEXT PRIMARY KEY NOT NULL,   -- sorted pair (direct) or UUID (group)
    kind         TEXT NOT NULL,               -- 'direct' | 'group'
    name         TEXT,
    last_message TEXT,                        -- JSON snapshot of the newest message
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chat_participants (
    chat_id   TEXT NOT NULL,                  -- FK -> chats(id)
    user_id   TEXT NOT NULL,
    position  INTEGER NOT NULL,               -- join order
    is_admin  INTEGER NOT NULL DEFAULT 0,     -- boolean 0/1
    joined_at TEXT NOT NULL,

    PRIMARY KEY (chat_id, user_id),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chat_participants_user ON chat_participants(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id                   TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    chat_id              TEXT NOT NULL,              -- FK -> chats(id)
    sender_id            TEXT NOT NULL,
    content              TEXT NOT NULL,
    kind                 TEXT NOT NULL,
    attachments          TEXT NOT NULL DEFAULT '[]', -- JSON array
    created_at           TEXT NOT NULL,
    edited_at            TEXT,
    deleted_for_everyone INTEGER NOT NULL DEFAULT 0,
    deleted_at           TEXT,
    reply_to             TEXT,                       -- JSON reply reference
    forwarded_from       TEXT,                       -- JSON forward provenance

    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
    ON messages(chat_id, created_at DESC);

CREATE TABLE IF NOT EXISTS message_reads (
    message_id TEXT NOT NULL,                 -- FK -> messages(id)
    user_id    TEXT NOT NULL,
    read_at    TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS message_hidden (
    message_id TEXT NOT NULL,                 -- FK -> messages(id)
    user_id    TEXT NOT NULL,
    hidden_at  TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Friendships and requests
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS friendships (
    id         TEXT PRIMARY KEY NOT NULL,     -- sorted pair key
    user_a     TEXT NOT NULL,                 -- lower id of the pair
    user_b     TEXT NOT NULL,                 -- higher id of the pair
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_friendships_a ON friendships(user_a);
CREATE INDEX IF NOT EXISTS idx_friendships_b ON friendships(user_b);

CREATE TABLE IF NOT EXISTS friend_requests (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    from_id    TEXT NOT NULL,
    to_id      TEXT NOT NULL,
    status     TEXT NOT NULL,                 -- 'pending' | 'accepted' | 'rejected'
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_friend_requests_to ON friend_requests(to_id, status);

-- ----------------------------------------------------------------
-- Posts
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS posts (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    author_id  TEXT NOT NULL,
    content    TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_posts_author_ts ON posts(author_id, created_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
