//! Recent-activity feed merged from several live sources.
//!
//! Regular viewers see their own friendships and the posts of themselves
//! and their current friends. Elevated viewers see every new user and every
//! post on the platform. Each source is its own live query; the composer
//! keeps the latest snapshot of each and rebuilds the feed whenever one of
//! them reports.
//!
//! Items are ordered newest first. Equal timestamps are ordered by source
//! (friendship and user events before posts), then by item id.
//!
//! Cached display names are reloaded whenever a user record changes, so a
//! renamed actor shows up under the new name on the next emission.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use linkup_shared::UserId;
use linkup_store::{Change, Database, Friendship, Post, User};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::live::{spawn_query, Listener, Subscription};
use crate::state::{subscribe_changes, Backend, SharedDb};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    NewFriend,
    /// A post by the viewer, or any post for elevated viewers.
    NewPost,
    FriendPost,
    NewUser,
}

impl ActivityKind {
    fn source_rank(self) -> u8 {
        match self {
            ActivityKind::NewFriend | ActivityKind::NewUser => 0,
            ActivityKind::NewPost | ActivityKind::FriendPost => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Actor {
    pub id: UserId,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityItem {
    /// Stable id, prefixed with the source (`friendship:`, `post:`, `user:`).
    pub id: String,
    pub kind: ActivityKind,
    pub actor: Actor,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

fn feed_order(a: &ActivityItem, b: &ActivityItem) -> Ordering {
    b.timestamp
        .cmp(&a.timestamp)
        .then_with(|| a.kind.source_rank().cmp(&b.kind.source_rank()))
        .then_with(|| a.id.cmp(&b.id))
}

type NameCache = Arc<Mutex<HashMap<UserId, String>>>;

/// Builds the activity feed of one viewer.
///
/// Actor display names are cached on the instance and shared by all of its
/// subscriptions, so a name is looked up once.
pub struct ActivityComposer {
    backend: Backend,
    viewer: UserId,
    limit: usize,
    names: NameCache,
}

impl ActivityComposer {
    pub fn new(backend: Backend, viewer: UserId, limit: usize) -> Self {
        Self {
            backend,
            viewer,
            limit: limit.max(1),
            names: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn viewer(&self) -> &UserId {
        &self.viewer
    }

    /// Live activity feed. The viewer's role is read once, when
    /// subscribing.
    pub async fn subscribe(&self) -> Result<Subscription<Vec<ActivityItem>>> {
        let Some(role) = self.backend.with_db(|db| Ok(db.role_of(&self.viewer)?))? else {
            return Ok(Subscription::once(Vec::new()));
        };
        let Some((db, changes)) = self.backend.listen() else {
            return Ok(Subscription::once(Vec::new()));
        };

        let composer = Composer {
            db,
            viewer: self.viewer.clone(),
            elevated: role.is_elevated(),
            limit: self.limit,
            names: Arc::clone(&self.names),
            buffer: self.backend.buffer(),
        };
        debug!(viewer = %self.viewer, elevated = composer.elevated, "Subscribing to activity feed");

        let (tx, rx) = mpsc::channel(self.backend.buffer());
        let task = tokio::spawn(composer.run(changes, tx));
        Ok(Subscription::new(rx, task))
    }
}

enum SourceTick {
    Friendships(Vec<Friendship>),
    Posts { generation: u64, posts: Vec<Post> },
    Users(Vec<User>),
    Names(Vec<User>),
}

/// Latest snapshot of every source.
#[derive(Debug, Default)]
struct FeedSources {
    friendships: Vec<Friendship>,
    posts: Vec<Post>,
    users: Vec<User>,
}

impl FeedSources {
    fn actor_ids(&self, viewer: &UserId) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self
            .friendships
            .iter()
            .filter_map(|f| f.other(viewer).cloned())
            .chain(self.posts.iter().map(|p| p.author_id.clone()))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    fn compose(
        &self,
        viewer: &UserId,
        elevated: bool,
        names: &HashMap<UserId, String>,
        limit: usize,
    ) -> Vec<ActivityItem> {
        let actor_of = |id: &UserId| Actor {
            id: id.clone(),
            display_name: names
                .get(id)
                .cloned()
                .unwrap_or_else(|| id.as_str().to_string()),
        };

        let mut items = Vec::with_capacity(
            self.friendships.len() + self.posts.len() + self.users.len(),
        );

        for friendship in &self.friendships {
            let Some(friend) = friendship.other(viewer) else {
                continue;
            };
            let actor = actor_of(friend);
            items.push(ActivityItem {
                id: format!("friendship:{}", friendship.id),
                kind: ActivityKind::NewFriend,
                description: format!("You and {} are now friends", actor.display_name),
                actor,
                timestamp: friendship.created_at,
            });
        }

        for post in &self.posts {
            let own = &post.author_id == viewer;
            let kind = if elevated || own {
                ActivityKind::NewPost
            } else {
                ActivityKind::FriendPost
            };
            let actor = actor_of(&post.author_id);
            let description = if own {
                "You shared a new post".to_string()
            } else {
                format!("{} shared a new post", actor.display_name)
            };
            items.push(ActivityItem {
                id: format!("post:{}", post.id),
                kind,
                actor,
                description,
                timestamp: post.created_at,
            });
        }

        for user in &self.users {
            items.push(ActivityItem {
                id: format!("user:{}", user.id),
                kind: ActivityKind::NewUser,
                description: format!("{} joined LinkUp", user.display_name),
                actor: Actor {
                    id: user.id.clone(),
                    display_name: user.display_name.clone(),
                },
                timestamp: user.created_at,
            });
        }

        items.sort_by(feed_order);
        items.truncate(limit);
        items
    }
}

struct Composer {
    db: SharedDb,
    viewer: UserId,
    elevated: bool,
    limit: usize,
    names: NameCache,
    buffer: usize,
}

impl Composer {
    async fn run(
        self,
        changes: tokio::sync::broadcast::Receiver<Change>,
        tx: mpsc::Sender<Vec<ActivityItem>>,
    ) {
        let (source_tx, mut source_rx) = mpsc::channel::<SourceTick>(self.buffer);
        let mut sources = FeedSources::default();
        let limit = self.limit as u32;

        // Listeners stay alive as long as this task; aborting it drops them.
        let mut listeners: Vec<Listener> = Vec::new();
        let mut posts_listener: Option<Listener> = None;
        let mut authors: Option<Vec<UserId>> = None;
        let mut generation: u64 = 0;

        if let Some(user_changes) = subscribe_changes(&self.db) {
            listeners.push(self.spawn_names(user_changes, source_tx.clone()));
        }

        if self.elevated {
            let users_tx = source_tx.clone();
            listeners.push(spawn_query(
                Arc::clone(&self.db),
                changes,
                Change::is_user,
                move |db| Ok(SourceTick::Users(db.list_users(limit)?)),
                users_tx,
            ));
            posts_listener = self.spawn_posts(None, generation, source_tx.clone());
        } else {
            let viewer = self.viewer.clone();
            let watched = self.viewer.clone();
            listeners.push(spawn_query(
                Arc::clone(&self.db),
                changes,
                move |change| change.concerns_friendships_of(&watched),
                move |db| Ok(SourceTick::Friendships(db.list_friendships(&viewer)?)),
                source_tx.clone(),
            ));
        }

        while let Some(tick) = source_rx.recv().await {
            match tick {
                SourceTick::Friendships(friendships) => {
                    let mut next: Vec<UserId> = friendships
                        .iter()
                        .filter_map(|f| f.other(&self.viewer).cloned())
                        .chain(std::iter::once(self.viewer.clone()))
                        .collect();
                    next.sort();

                    if authors.as_ref() != Some(&next) {
                        generation += 1;
                        debug!(viewer = %self.viewer, authors = next.len(), "Friend set changed, re-subscribing to posts");
                        // Replacing the listener aborts the previous one.
                        posts_listener =
                            self.spawn_posts(Some(next.clone()), generation, source_tx.clone());
                        authors = Some(next);
                    }
                    sources.friendships = friendships;
                }
                SourceTick::Posts { generation: tick_generation, posts } => {
                    if tick_generation != generation {
                        continue;
                    }
                    sources.posts = posts;
                }
                SourceTick::Users(users) => {
                    self.remember_names(&users);
                    sources.users = users;
                }
                SourceTick::Names(users) => {
                    if !self.remember_names(&users) {
                        continue;
                    }
                }
            }

            self.resolve_names(&sources.actor_ids(&self.viewer));
            let feed = match self.names.lock() {
                Ok(names) => sources.compose(&self.viewer, self.elevated, &names, self.limit),
                Err(poisoned) => {
                    sources.compose(&self.viewer, self.elevated, &poisoned.into_inner(), self.limit)
                }
            };

            if tx.send(feed).await.is_err() {
                break;
            }
        }

        drop(posts_listener);
    }

    /// Posts by `authors`, or by everyone when `None`.
    fn spawn_posts(
        &self,
        authors: Option<Vec<UserId>>,
        generation: u64,
        tx: mpsc::Sender<SourceTick>,
    ) -> Option<Listener> {
        let changes = subscribe_changes(&self.db)?;
        let limit = self.limit as u32;
        let watched = authors.clone();
        Some(spawn_query(
            Arc::clone(&self.db),
            changes,
            move |change| match &watched {
                Some(authors) => {
                    matches!(change, Change::Post { author_id } if authors.contains(author_id))
                }
                None => change.is_post(),
            },
            move |db: &Database| {
                let posts = match &authors {
                    Some(authors) => db.list_posts_by_authors(authors, limit)?,
                    None => db.list_recent_posts(limit)?,
                };
                Ok(SourceTick::Posts { generation, posts })
            },
            tx,
        ))
    }

    /// Reloads every cached name after a user record changes.
    fn spawn_names(
        &self,
        changes: tokio::sync::broadcast::Receiver<Change>,
        tx: mpsc::Sender<SourceTick>,
    ) -> Listener {
        let names = Arc::clone(&self.names);
        spawn_query(
            Arc::clone(&self.db),
            changes,
            Change::is_user,
            move |db: &Database| {
                // The name cache is never locked while waiting on the database.
                let cached: Vec<UserId> = match names.lock() {
                    Ok(names) => names.keys().cloned().collect(),
                    Err(_) => Vec::new(),
                };
                let mut users = Vec::with_capacity(cached.len());
                for id in &cached {
                    if let Some(user) = db.find_user(id)? {
                        users.push(user);
                    }
                }
                Ok(SourceTick::Names(users))
            },
            tx,
        )
    }

    /// Cache the names of `users`. Returns whether any cached name changed.
    fn remember_names(&self, users: &[User]) -> bool {
        let Ok(mut names) = self.names.lock() else {
            return false;
        };
        let mut changed = false;
        for user in users {
            if names.get(&user.id) != Some(&user.display_name) {
                names.insert(user.id.clone(), user.display_name.clone());
                changed = true;
            }
        }
        changed
    }

    /// Look up display names not cached yet. Unknown users fall back to
    /// their id at render time and are retried on the next tick.
    fn resolve_names(&self, ids: &[UserId]) {
        let missing: Vec<UserId> = match self.names.lock() {
            Ok(names) => ids.iter().filter(|id| !names.contains_key(*id)).cloned().collect(),
            Err(_) => return,
        };
        if missing.is_empty() {
            return;
        }

        let mut found = Vec::with_capacity(missing.len());
        {
            let Ok(db) = self.db.lock() else {
                warn!("Database lock poisoned, cannot resolve display names");
                return;
            };
            for id in &missing {
                match db.find_user(id) {
                    Ok(Some(user)) => found.push(user),
                    Ok(None) => {}
                    Err(e) => warn!(user = %id, error = %e, "Failed to load display name"),
                }
            }
        }
        self.remember_names(&found);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;
    use linkup_shared::Role;
    use uuid::Uuid;

    use super::*;
    use crate::chats::tests::backend;
    use crate::friends::FriendService;
    use crate::posts::PostService;
    use crate::users::UserService;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn post(author: &str, secs: i64) -> Post {
        Post {
            id: Uuid::new_v4(),
            author_id: UserId::from(author),
            content: "text".into(),
            created_at: at(secs),
        }
    }

    fn friendship(a: &str, b: &str, secs: i64) -> Friendship {
        Friendship::new(&UserId::from(a), &UserId::from(b), at(secs))
    }

    fn timestamps(feed: &[ActivityItem]) -> Vec<DateTime<Utc>> {
        feed.iter().map(|i| i.timestamp).collect()
    }

    #[test]
    fn merged_feed_is_newest_first_whatever_the_arrival_order() {
        let me = UserId::from("me");
        let names = HashMap::new();
        let friendships = vec![friendship("me", "x", 1), friendship("me", "y", 3)];
        let posts = vec![post("x", 2), post("me", 4)];

        let mut friendships_first = FeedSources::default();
        friendships_first.friendships = friendships.clone();
        let partial = friendships_first.compose(&me, false, &names, 10);
        assert_eq!(timestamps(&partial), vec![at(3), at(1)]);
        friendships_first.posts = posts.clone();

        let mut posts_first = FeedSources::default();
        posts_first.posts = posts;
        posts_first.friendships = friendships;

        let a = friendships_first.compose(&me, false, &names, 10);
        let b = posts_first.compose(&me, false, &names, 10);
        assert_eq!(a, b);
        assert_eq!(timestamps(&a), vec![at(4), at(3), at(2), at(1)]);
        assert_eq!(a[0].kind, ActivityKind::NewPost);
        assert_eq!(a[2].kind, ActivityKind::FriendPost);
    }

    #[test]
    fn ties_prefer_friendships_then_ids() {
        let me = UserId::from("me");
        let mut sources = FeedSources::default();
        let mut p1 = post("x", 5);
        let mut p2 = post("x", 5);
        p1.id = Uuid::from_u128(2);
        p2.id = Uuid::from_u128(1);
        sources.posts = vec![p1.clone(), p2.clone()];
        sources.friendships = vec![friendship("me", "x", 5)];

        let feed = sources.compose(&me, false, &HashMap::new(), 10);
        assert_eq!(feed[0].kind, ActivityKind::NewFriend);
        assert_eq!(feed[1].id, format!("post:{}", p2.id));
        assert_eq!(feed[2].id, format!("post:{}", p1.id));
    }

    #[test]
    fn feed_is_capped() {
        let me = UserId::from("me");
        let mut sources = FeedSources::default();
        sources.posts = (0..15).map(|i| post("me", i)).collect();

        let feed = sources.compose(&me, false, &HashMap::new(), 10);
        assert_eq!(feed.len(), 10);
        assert_eq!(feed[0].timestamp, at(14));
        assert_eq!(feed[9].timestamp, at(5));
    }

    #[test]
    fn names_fall_back_to_ids() {
        let me = UserId::from("me");
        let mut sources = FeedSources::default();
        sources.friendships = vec![friendship("me", "x", 0)];
        let mut names = HashMap::new();

        let feed = sources.compose(&me, false, &names, 10);
        assert_eq!(feed[0].actor.display_name, "x");

        names.insert(UserId::from("x"), "Xavier".to_string());
        let feed = sources.compose(&me, false, &names, 10);
        assert_eq!(feed[0].description, "You and Xavier are now friends");
    }

    async fn wait_for<P>(sub: &mut Subscription<Vec<ActivityItem>>, pred: P) -> Vec<ActivityItem>
    where
        P: Fn(&[ActivityItem]) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let feed = sub.next().await.expect("subscription ended");
                if pred(&feed) {
                    return feed;
                }
            }
        })
        .await
        .expect("timed out waiting for feed")
    }

    #[tokio::test]
    async fn regular_feed_follows_friend_set() {
        let backend = backend();
        let users = UserService::new(backend.clone());
        let friends = FriendService::new(backend.clone());
        let posts = PostService::new(backend.clone());
        let (amy, bob, cat) = (UserId::from("amy"), UserId::from("bob"), UserId::from("cat"));
        for (id, name) in [(&amy, "Amy"), (&bob, "Bob"), (&cat, "Cat")] {
            users.register(id, name, Role::User).await.unwrap();
        }

        let request = friends.send_request(&amy, &bob).await.unwrap().unwrap();
        friends.accept_request(request, &bob).await.unwrap();
        posts.create_post(&cat, "stranger post").await.unwrap();

        let composer = ActivityComposer::new(backend.clone(), amy.clone(), 10);
        let mut sub = composer.subscribe().await.unwrap();

        posts.create_post(&bob, "hello").await.unwrap();
        let feed = wait_for(&mut sub, |f| f.iter().any(|i| i.kind == ActivityKind::FriendPost)).await;
        assert!(feed.iter().all(|i| i.actor.id != cat));
        let friend_post = feed.iter().find(|i| i.kind == ActivityKind::FriendPost).unwrap();
        assert_eq!(friend_post.actor.display_name, "Bob");
        assert!(feed.iter().any(|i| i.kind == ActivityKind::NewFriend));

        // Becoming friends with cat brings cat's older post in.
        let request = friends.send_request(&cat, &amy).await.unwrap().unwrap();
        friends.accept_request(request, &amy).await.unwrap();
        let feed = wait_for(&mut sub, |f| {
            f.iter().any(|i| i.actor.id == cat && i.kind == ActivityKind::FriendPost)
        })
        .await;
        let stamps = timestamps(&feed);
        assert!(stamps.windows(2).all(|w| w[0] >= w[1]));
    }

    #[tokio::test]
    async fn renamed_friend_shows_new_name() {
        let backend = backend();
        let users = UserService::new(backend.clone());
        let friends = FriendService::new(backend.clone());
        let (amy, bob) = (UserId::from("amy"), UserId::from("bob"));
        users.register(&amy, "Amy", Role::User).await.unwrap();
        users.register(&bob, "Bob", Role::User).await.unwrap();
        let request = friends.send_request(&amy, &bob).await.unwrap().unwrap();
        friends.accept_request(request, &bob).await.unwrap();

        let composer = ActivityComposer::new(backend.clone(), amy.clone(), 10);
        let mut sub = composer.subscribe().await.unwrap();
        wait_for(&mut sub, |f| f.iter().any(|i| i.actor.display_name == "Bob")).await;

        users.register(&bob, "Robert", Role::User).await.unwrap();
        let feed = wait_for(&mut sub, |f| {
            f.iter().any(|i| i.actor.display_name == "Robert")
        })
        .await;
        let friend = feed.iter().find(|i| i.kind == ActivityKind::NewFriend).unwrap();
        assert_eq!(friend.description, "You and Robert are now friends");
    }

    #[tokio::test]
    async fn elevated_feed_is_global() {
        let backend = backend();
        let users = UserService::new(backend.clone());
        let posts = PostService::new(backend.clone());
        let admin = UserId::from("admin");
        users.register(&admin, "Admin", Role::SuperAdmin).await.unwrap();
        users.register(&UserId::from("newbie"), "Newbie", Role::User).await.unwrap();

        let composer = ActivityComposer::new(backend.clone(), admin, 10);
        let mut sub = composer.subscribe().await.unwrap();

        posts.create_post(&UserId::from("stranger"), "anyone").await.unwrap();
        let feed = wait_for(&mut sub, |f| {
            f.iter().any(|i| i.kind == ActivityKind::NewPost)
                && f.iter().any(|i| i.id == "user:newbie")
        })
        .await;
        assert!(feed.iter().all(|i| i.kind != ActivityKind::FriendPost));
        let joined = feed.iter().find(|i| i.id == "user:newbie").unwrap();
        assert_eq!(joined.description, "Newbie joined LinkUp");
    }

    #[tokio::test]
    async fn disposing_stops_the_feed() {
        let backend = backend();
        let posts = PostService::new(backend.clone());
        let me = UserId::from("me");

        let composer = ActivityComposer::new(backend.clone(), me.clone(), 10);
        let mut sub = composer.subscribe().await.unwrap();
        posts.create_post(&me, "first").await.unwrap();
        wait_for(&mut sub, |f| f.len() == 1).await;

        sub.dispose();
        posts.create_post(&me, "second").await.unwrap();
        let next = tokio::time::timeout(Duration::from_millis(200), sub.next()).await;
        assert_eq!(next.unwrap(), None);
    }

    #[tokio::test]
    async fn offline_feed_is_empty() {
        let composer = ActivityComposer::new(Backend::offline(), UserId::from("me"), 10);
        let mut sub = composer.subscribe().await.unwrap();
        assert_eq!(sub.next().await, Some(Vec::new()));
        assert_eq!(sub.next().await, None);
    }
}
