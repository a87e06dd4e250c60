//! # linkup-daemon
//!
//! Opens the local LinkUp store and streams one user's live state as JSON
//! lines on stdout until Ctrl+C:
//! - `unread-changed` with per-chat and total unread counts
//! - `activity-changed` with the recent-activity feed
//!
//! Configuration comes from the environment (see `ClientConfig::from_env`),
//! plus `LINKUP_USER` naming the user to follow.

use anyhow::Context;
use linkup_client::events::{
    encode_event, ActivityPayload, UnreadPayload, EVENT_ACTIVITY_CHANGED, EVENT_UNREAD_CHANGED,
};
use linkup_client::{init_tracing, ClientConfig, LinkUp};
use linkup_shared::UserId;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("Starting LinkUp daemon v{}", env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let user = std::env::var("LINKUP_USER")
        .ok()
        .filter(|u| !u.trim().is_empty())
        .context("LINKUP_USER must name the user to follow")?;
    let user = UserId::from(user);

    let session = LinkUp::open(config).context("failed to open the LinkUp store")?;
    if session.is_offline() {
        warn!("No backend configured, only empty snapshots will be shown");
    }

    let aggregator = session.unread(user.clone());
    let mut unread = aggregator.subscribe();
    let mut activity = session
        .activity(user.clone())
        .subscribe()
        .await
        .context("failed to subscribe to the activity feed")?;

    let mut unread_open = true;
    let mut activity_open = true;

    while unread_open || activity_open {
        tokio::select! {
            summary = unread.next(), if unread_open => match summary {
                Some(summary) => {
                    let payload = UnreadPayload::new(user.as_str(), &summary);
                    if let Some(line) = encode_event(EVENT_UNREAD_CHANGED, &payload) {
                        println!("{line}");
                    }
                }
                None => unread_open = false,
            },
            items = activity.next(), if activity_open => match items {
                Some(items) => {
                    let payload = ActivityPayload {
                        user_id: user.to_string(),
                        items,
                    };
                    if let Some(line) = encode_event(EVENT_ACTIVITY_CHANGED, &payload) {
                        println!("{line}");
                    }
                }
                None => activity_open = false,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    unread.dispose();
    activity.dispose();
    info!(
        user = %user,
        total_unread = aggregator.total_unread_count(),
        "LinkUp daemon stopped"
    );
    Ok(())
}
