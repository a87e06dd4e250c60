//! Friend requests and friendships.
//!
//! A request moves from `pending` to `accepted` or `rejected`, and only its
//! recipient can move it. Accepting creates the friendship in the same
//! transaction.

use linkup_shared::{RequestStatus, UserId, ValidationError};
use linkup_store::{now, FriendRequest, Friendship};
use tracing::info;
use uuid::Uuid;

use crate::error::{ClientError, Result};
use crate::state::Backend;

#[derive(Clone)]
pub struct FriendService {
    backend: Backend,
}

impl FriendService {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    pub async fn send_request(&self, from: &UserId, to: &UserId) -> Result<Option<Uuid>> {
        if from.as_str().trim().is_empty() || to.as_str().trim().is_empty() {
            return Err(ValidationError::EmptyUserId.into());
        }
        if from == to {
            return Err(ClientError::SelfRequest);
        }

        self.backend.with_db(|db| {
            if db.are_friends(from, to)? {
                return Err(ClientError::AlreadyFriends(from.clone(), to.clone()));
            }
            if db.find_pending_request(from, to)?.is_some()
                || db.find_pending_request(to, from)?.is_some()
            {
                return Err(ClientError::RequestAlreadyPending(from.clone(), to.clone()));
            }

            let ts = now();
            let request = FriendRequest {
                id: Uuid::new_v4(),
                from: from.clone(),
                to: to.clone(),
                status: RequestStatus::Pending,
                created_at: ts,
                updated_at: ts,
            };
            db.insert_friend_request(&request)?;
            info!(from = %from, to = %to, "Friend request sent");
            Ok(request.id)
        })
    }

    /// Accept a request addressed to `actor`.
    pub async fn accept_request(&self, request_id: Uuid, actor: &UserId) -> Result<Option<Friendship>> {
        Ok(self
            .backend
            .with_db(|db| {
                let request = answerable_request(db, request_id, actor)?;
                let friendship = db
                    .accept_friend_request(&request, now())?
                    .ok_or(ClientError::RequestNotPending)?;
                info!(from = %request.from, to = %request.to, "Friend request accepted");
                Ok(friendship)
            })?)
    }

    /// Reject a request addressed to `actor`.
    pub async fn reject_request(&self, request_id: Uuid, actor: &UserId) -> Result<()> {
        self.backend.with_db(|db| {
            let request = answerable_request(db, request_id, actor)?;
            if !db.set_request_status(&request, RequestStatus::Rejected, now())? {
                return Err(ClientError::RequestNotPending);
            }
            info!(from = %request.from, to = %request.to, "Friend request rejected");
            Ok(())
        })?;
        Ok(())
    }

    /// Withdraw a pending request. Only its sender can do this.
    pub async fn cancel_request(&self, request_id: Uuid, actor: &UserId) -> Result<()> {
        self.backend.with_db(|db| {
            let request = find_request(db, request_id)?;
            if &request.from != actor {
                return Err(ClientError::NotRequestSender);
            }
            if !request.is_pending() {
                return Err(ClientError::RequestNotPending);
            }
            db.delete_friend_request(&request)?;
            info!(from = %request.from, to = %request.to, "Friend request cancelled");
            Ok(())
        })?;
        Ok(())
    }

    /// Remove the friendship between two users. Returns `false` when they
    /// were not friends.
    pub async fn unfriend(&self, user: &UserId, friend: &UserId) -> Result<bool> {
        Ok(self
            .backend
            .with_db(|db| {
                let removed = db.delete_friendship(user, friend)?;
                if removed {
                    info!(user = %user, friend = %friend, "Friendship removed");
                }
                Ok(removed)
            })?
            .unwrap_or(false))
    }

    pub async fn are_friends(&self, a: &UserId, b: &UserId) -> Result<bool> {
        Ok(self
            .backend
            .with_db(|db| Ok(db.are_friends(a, b)?))?
            .unwrap_or(false))
    }

    /// Friends of `user`, most recent friendship first.
    pub async fn list_friends(&self, user: &UserId) -> Result<Vec<UserId>> {
        Ok(self
            .backend
            .with_db(|db| Ok(db.list_friend_ids(user)?))?
            .unwrap_or_default())
    }

    /// Pending requests waiting for `user`'s answer, newest first.
    pub async fn incoming_requests(&self, user: &UserId) -> Result<Vec<FriendRequest>> {
        Ok(self
            .backend
            .with_db(|db| Ok(db.list_incoming_requests(user)?))?
            .unwrap_or_default())
    }

    pub async fn outgoing_requests(&self, user: &UserId) -> Result<Vec<FriendRequest>> {
        Ok(self
            .backend
            .with_db(|db| Ok(db.list_outgoing_requests(user)?))?
            .unwrap_or_default())
    }
}

fn find_request(db: &linkup_store::Database, request_id: Uuid) -> Result<FriendRequest> {
    match db.get_friend_request(request_id) {
        Ok(request) => Ok(request),
        Err(linkup_store::StoreError::NotFound) => Err(ClientError::RequestNotFound(request_id)),
        Err(e) => Err(e.into()),
    }
}

fn answerable_request(db: &linkup_store::Database, request_id: Uuid, actor: &UserId) -> Result<FriendRequest> {
    let request = find_request(db, request_id)?;
    if &request.to != actor {
        return Err(ClientError::NotRequestRecipient);
    }
    if !request.is_pending() {
        return Err(ClientError::RequestNotPending);
    }
    Ok(request)
}
