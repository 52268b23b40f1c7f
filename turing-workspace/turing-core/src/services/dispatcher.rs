// turing-core/src/services/dispatcher.rs
//! Single consumer of the delay queue.
//!
//! Bans recorded by earlier runs are loaded into the moderation index before
//! the first event is taken. Ban and Censor update the index, cancel
//! matching pending units and persist the change; Unban closes windows in
//! both places. A Message that is still admissible gets a registry entry and
//! a spawned commit unit. Nothing here returns an error to the loop;
//! failures are logged and the next event is taken.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{EventEnvelope, MessageId, Payload, UserId};
use crate::memory::{hash_user, BanRecord, MessageStore};
use crate::services::committer::Committer;
use crate::services::delay_queue::DelayQueue;
use crate::services::moderation::ModerationIndex;
use crate::services::pending::{PendingKey, PendingWrites};

pub struct Dispatcher {
    queue: Arc<DelayQueue>,
    moderation: Arc<ModerationIndex>,
    pending: Arc<PendingWrites>,
    store: Arc<dyn MessageStore>,
    committer: Arc<Committer>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<DelayQueue>,
        moderation: Arc<ModerationIndex>,
        pending: Arc<PendingWrites>,
        store: Arc<dyn MessageStore>,
        committer: Arc<Committer>,
    ) -> Self {
        Self {
            queue,
            moderation,
            pending,
            store,
            committer,
        }
    }

    /// Consume events until `shutdown` fires. Events still queued at that
    /// point stay in the queue for the caller to drain.
    pub async fn run(self, shutdown: CancellationToken) {
        self.restore_bans().await;
        info!(delay_ms = self.queue.delay().as_millis() as u64, "dispatcher started");
        while let Some(event) = self.queue.get_or_cancel(&shutdown).await {
            self.dispatch(event).await;
        }
        info!("dispatcher stopped");
    }

    /// Re-open every persisted ban window. A store failure leaves the index
    /// empty and is logged; rebuilds still filter through the stored bans.
    pub async fn restore_bans(&self) {
        match self.store.select_bans().await {
            Ok(bans) => {
                for ban in &bans {
                    self.moderation.restore(ban);
                }
                info!(count = bans.len(), "bans restored");
            }
            Err(e) => warn!(error = %e, "bans not restored"),
        }
    }

    pub async fn dispatch(&self, event: EventEnvelope) {
        let (channel, at, payload) = event.into_parts();
        match payload {
            Payload::Ban { user, expires } => self.on_ban(channel, user, at, expires).await,
            Payload::Unban { user } => self.on_unban(&channel, &user, at).await,
            Payload::Censor { message } => self.on_censor(&channel, &message).await,
            Payload::Message {
                user,
                message,
                content,
            } => self.on_message(channel, user, message, content, at),
        }
    }

    async fn on_ban(
        &self,
        channel: String,
        user: UserId,
        at: DateTime<Utc>,
        expires: Option<DateTime<Utc>>,
    ) {
        let window = self.moderation.ban(&channel, &user, at, expires);
        let cancelled = self.pending.cancel_user(&channel, &user);
        info!(
            channel = %channel,
            cancelled,
            timeout = expires.is_some(),
            "ban applied"
        );
        let record = BanRecord {
            user_hash: hash_user(&user),
            channel,
            banned_at: at,
            covers_from: window.since,
            lifted_at: window.until,
        };
        if let Err(e) = self.store.insert_ban(&record).await {
            warn!(channel = %record.channel, error = %e, "ban not persisted");
        }
    }

    async fn on_unban(&self, channel: &str, user: &UserId, at: DateTime<Utc>) {
        let closed = self.moderation.unban(channel, user, at);
        match self.store.lift_bans(channel, &hash_user(user), at).await {
            Ok(lifted) => info!(channel = %channel, closed, lifted, "ban lifted"),
            Err(e) => warn!(channel = %channel, closed, error = %e, "unban not persisted"),
        }
    }

    /// Cancel before the UPDATE: a unit whose write lands after it sees its
    /// token cancelled and flags its own row.
    async fn on_censor(&self, channel: &str, message: &MessageId) {
        self.moderation.censor(channel, message);
        let cancelled = self.pending.cancel_message(channel, message);
        match self.store.exclude_message(channel, message.as_str()).await {
            Ok(stored) => {
                debug!(channel = %channel, message = %message, cancelled, stored, "message censored")
            }
            Err(e) => warn!(channel = %channel, message = %message, error = %e, "exclusion not persisted"),
        }
    }

    fn on_message(
        &self,
        channel: String,
        user: UserId,
        message: MessageId,
        content: String,
        sent_at: DateTime<Utc>,
    ) {
        let verdict = self
            .moderation
            .verdict(&channel, &user, &message, &content, sent_at);
        if !verdict.is_admitted() {
            debug!(
                channel = %channel,
                message = %message,
                verdict = verdict.as_str(),
                "message dropped"
            );
            return;
        }
        let Some(guard) = self.pending.register(PendingKey::new(channel, user, message.clone())) else {
            debug!(message = %message, "duplicate delivery dropped");
            return;
        };
        let committer = Arc::clone(&self.committer);
        tokio::spawn(async move {
            let outcome = committer.run(guard, sent_at, content).await;
            debug!(message = %message, ?outcome, "commit unit finished");
        });
    }
}
