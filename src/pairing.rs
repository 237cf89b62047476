//! Per-user pairing of uploaded images and text
//!
//! Holds at most one unconsumed text and one unconsumed image per user.
//! A newer submission of the same kind replaces the older one, and the
//! submission that completes a pair removes both halves under one lock,
//! so every pair yields exactly one [`CombinedMessage`].

use crate::event::{SessionContext, UserId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

/// Text waiting for its image
#[derive(Debug, Clone)]
pub struct PendingText {
    /// Sender
    pub user_id: UserId,
    /// Message text
    pub text: String,
    /// Conversation the text arrived in
    pub session: SessionContext,
    /// Arrival time
    pub received_at: Instant,
}

/// Uploaded image waiting for its text
#[derive(Debug, Clone)]
pub struct PendingImage {
    /// Sender
    pub user_id: UserId,
    /// Public URL returned by the image host
    pub remote_url: String,
    /// Conversation the image arrived in
    pub session: SessionContext,
    /// Arrival time
    pub received_at: Instant,
}

/// A completed pair, ready to be forwarded downstream
#[derive(Debug, Clone)]
pub struct CombinedMessage {
    /// Sender of both halves
    pub user_id: UserId,
    /// Public image URL
    pub image_url: String,
    /// User text
    pub text: String,
    /// Session of the text half, which carries the user's request
    pub session: SessionContext,
    /// Completion time
    pub composed_at: DateTime<Utc>,
}

impl CombinedMessage {
    fn from_parts(text: PendingText, image: PendingImage) -> Self {
        Self {
            user_id: text.user_id,
            image_url: image.remote_url,
            text: text.text,
            session: text.session,
            composed_at: Utc::now(),
        }
    }
}

#[derive(Default)]
struct Pending {
    texts: HashMap<UserId, PendingText>,
    images: HashMap<UserId, PendingImage>,
}

/// In-memory pairing state, shared by all event handlers
///
/// The lock is held only while the maps are touched, never across I/O.
pub struct PairingStore {
    pending: Mutex<Pending>,
    ttl: Option<Duration>,
}

impl Default for PairingStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PairingStore {
    /// Create an empty store; entries older than `ttl` never complete a pair
    #[must_use]
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            pending: Mutex::new(Pending::default()),
            ttl,
        }
    }

    fn is_expired(&self, received_at: Instant, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(received_at) >= ttl)
    }

    /// Record text for `user_id`, completing the pair if an image is waiting
    pub async fn submit_text(
        &self,
        user_id: UserId,
        text: String,
        session: SessionContext,
    ) -> Option<CombinedMessage> {
        let now = Instant::now();
        let entry = PendingText {
            user_id: user_id.clone(),
            text,
            session,
            received_at: now,
        };

        let mut pending = self.pending.lock().await;
        match pending.images.remove(&user_id) {
            Some(image) if !self.is_expired(image.received_at, now) => {
                // Any older text is superseded by this one
                pending.texts.remove(&user_id);
                drop(pending);
                debug!(user_id = %user_id, "Text completed pending image");
                Some(CombinedMessage::from_parts(entry, image))
            }
            expired => {
                if expired.is_some() {
                    info!(user_id = %user_id, "Discarded expired pending image");
                }
                if pending.texts.insert(user_id.clone(), entry).is_some() {
                    debug!(user_id = %user_id, "Replaced pending text");
                }
                None
            }
        }
    }

    /// Record an uploaded image for `user_id`, completing the pair if text is waiting
    pub async fn submit_image(
        &self,
        user_id: UserId,
        remote_url: String,
        session: SessionContext,
    ) -> Option<CombinedMessage> {
        let now = Instant::now();
        let entry = PendingImage {
            user_id: user_id.clone(),
            remote_url,
            session,
            received_at: now,
        };

        let mut pending = self.pending.lock().await;
        match pending.texts.remove(&user_id) {
            Some(text) if !self.is_expired(text.received_at, now) => {
                pending.images.remove(&user_id);
                drop(pending);
                debug!(user_id = %user_id, "Image completed pending text");
                Some(CombinedMessage::from_parts(text, entry))
            }
            expired => {
                if expired.is_some() {
                    info!(user_id = %user_id, "Discarded expired pending text");
                }
                if pending.images.insert(user_id.clone(), entry).is_some() {
                    debug!(user_id = %user_id, "Replaced pending image");
                }
                None
            }
        }
    }

    /// Drop every expired entry and return how many were removed
    pub async fn purge_expired(&self) -> usize {
        if self.ttl.is_none() {
            return 0;
        }
        let now = Instant::now();
        let mut pending = self.pending.lock().await;
        let before = pending.texts.len() + pending.images.len();
        pending
            .texts
            .retain(|_, e| !self.is_expired(e.received_at, now));
        pending
            .images
            .retain(|_, e| !self.is_expired(e.received_at, now));
        before - (pending.texts.len() + pending.images.len())
    }

    /// Number of unconsumed `(texts, images)`
    pub async fn pending_counts(&self) -> (usize, usize) {
        let pending = self.pending.lock().await;
        (pending.texts.len(), pending.images.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn session(user: &str) -> SessionContext {
        SessionContext {
            session_id: format!("chat-{user}"),
            message_ref: "1".to_string(),
            user_id: UserId::new(user),
        }
    }

    #[tokio::test]
    async fn test_text_then_image_pairs() {
        let store = PairingStore::default();
        let user = UserId::new("u1");

        assert!(store
            .submit_text(user.clone(), "describe this".into(), session("u1"))
            .await
            .is_none());
        let combined = store
            .submit_image(user.clone(), "https://x/1.png".into(), session("u1"))
            .await
            .expect("pair completes");

        assert_eq!(combined.user_id, user);
        assert_eq!(combined.text, "describe this");
        assert_eq!(combined.image_url, "https://x/1.png");
        assert_eq!(store.pending_counts().await, (0, 0));
    }

    #[tokio::test]
    async fn test_image_then_text_pairs_identically() {
        let store = PairingStore::default();
        let user = UserId::new("u1");

        assert!(store
            .submit_image(user.clone(), "https://x/1.png".into(), session("u1"))
            .await
            .is_none());
        let combined = store
            .submit_text(user.clone(), "describe this".into(), session("u1"))
            .await
            .expect("pair completes");

        assert_eq!(combined.text, "describe this");
        assert_eq!(combined.image_url, "https://x/1.png");
        assert_eq!(combined.session, session("u1"));
        assert_eq!(store.pending_counts().await, (0, 0));
    }

    #[tokio::test]
    async fn test_text_alone_stays_pending() {
        let store = PairingStore::default();
        let user = UserId::new("u1");

        assert!(store
            .submit_text(user.clone(), "hello".into(), session("u1"))
            .await
            .is_none());
        assert!(store
            .submit_text(user, "again".into(), session("u1"))
            .await
            .is_none());
        assert_eq!(store.pending_counts().await, (1, 0));
    }

    #[tokio::test]
    async fn test_newer_text_wins() {
        let store = PairingStore::default();
        let user = UserId::new("u1");

        store
            .submit_text(user.clone(), "first".into(), session("u1"))
            .await;
        store
            .submit_text(user.clone(), "second".into(), session("u1"))
            .await;
        let combined = store
            .submit_image(user, "https://x/1.png".into(), session("u1"))
            .await
            .expect("pair completes");
        assert_eq!(combined.text, "second");
    }

    #[tokio::test]
    async fn test_newer_image_wins() {
        let store = PairingStore::default();
        let user = UserId::new("u1");

        store
            .submit_image(user.clone(), "https://x/old.png".into(), session("u1"))
            .await;
        store
            .submit_image(user.clone(), "https://x/new.png".into(), session("u1"))
            .await;
        let combined = store
            .submit_text(user, "what is it".into(), session("u1"))
            .await
            .expect("pair completes");
        assert_eq!(combined.image_url, "https://x/new.png");
    }

    #[tokio::test]
    async fn test_users_do_not_cross_pair() {
        let store = PairingStore::default();

        store
            .submit_text(UserId::new("alice"), "hi".into(), session("alice"))
            .await;
        assert!(store
            .submit_image(UserId::new("bob"), "https://x/b.png".into(), session("bob"))
            .await
            .is_none());
        assert_eq!(store.pending_counts().await, (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_half_does_not_pair() {
        let store = PairingStore::new(Some(Duration::from_secs(60)));
        let user = UserId::new("u1");

        store
            .submit_image(user.clone(), "https://x/stale.png".into(), session("u1"))
            .await;
        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(store
            .submit_text(user.clone(), "late".into(), session("u1"))
            .await
            .is_none());
        // The stale image is gone, the fresh text waits
        assert_eq!(store.pending_counts().await, (1, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = PairingStore::new(Some(Duration::from_secs(60)));

        store
            .submit_image(UserId::new("a"), "https://x/a.png".into(), session("a"))
            .await;
        tokio::time::advance(Duration::from_secs(30)).await;
        store
            .submit_text(UserId::new("b"), "b".into(), session("b"))
            .await;
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.pending_counts().await, (1, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ttl_keeps_entries() {
        let store = PairingStore::default();
        store
            .submit_image(UserId::new("a"), "https://x/a.png".into(), session("a"))
            .await;
        tokio::time::advance(Duration::from_secs(86_400)).await;

        assert_eq!(store.purge_expired().await, 0);
        assert!(store
            .submit_text(UserId::new("a"), "still there".into(), session("a"))
            .await
            .is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_halves_pair_once() {
        let store = Arc::new(PairingStore::default());

        for round in 0..200 {
            let user = UserId::new(format!("racer-{round}"));
            let text_store = Arc::clone(&store);
            let text_user = user.clone();
            let text = tokio::spawn(async move {
                text_store
                    .submit_text(text_user, "go".into(), session("r"))
                    .await
            });
            let image_store = Arc::clone(&store);
            let image = tokio::spawn(async move {
                image_store
                    .submit_image(user, "https://x/r.png".into(), session("r"))
                    .await
            });

            let (text, image) = (text.await.expect("join"), image.await.expect("join"));
            assert!(
                text.is_some() ^ image.is_some(),
                "round {round}: exactly one submission must complete the pair"
            );
        }
        assert_eq!(store.pending_counts().await, (0, 0));
    }
}
