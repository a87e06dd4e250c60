//! # linkup-store
//!
//! Local document store for LinkUp, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection`, provides typed CRUD helpers for every collection
//! (users, chats, messages, friendships, friend requests, posts) and
//! publishes a [`Change`] on its broadcast feed after every committed write.
//! Live queries in `linkup-client` are built on top of that feed.

pub mod changes;
pub mod chats;
pub mod database;
pub mod friends;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod posts;
pub mod users;

mod codec;
mod error;

pub use changes::Change;
pub use codec::now;
pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
