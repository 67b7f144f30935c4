use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::score::{RankEntry, Scope, ScoreLedger};

pub type LeaderboardSnapshot = Vec<RankEntry>;

/// Scope-keyed registry of live leaderboard subscribers.
///
/// `publish` re-reads the ledger while holding the registry lock, so every
/// subscriber observes snapshots in non-decreasing ledger order: a publish
/// that starts later can never deliver an older snapshot first. Delivery is
/// at-most-once; a subscriber whose channel has closed is dropped silently.
pub struct LeaderboardPublisher {
    ledger: Arc<ScoreLedger>,
    topics: Mutex<HashMap<Scope, Vec<mpsc::UnboundedSender<LeaderboardSnapshot>>>>,
}

impl LeaderboardPublisher {
    pub fn new(ledger: Arc<ScoreLedger>) -> Self {
        Self {
            ledger,
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a new subscriber for a scope. The returned channel is
    /// unbounded and not restartable; dropping it unsubscribes.
    pub fn subscribe(&self, scope: Scope) -> mpsc::UnboundedReceiver<LeaderboardSnapshot> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics.lock().entry(scope).or_default().push(tx);
        rx
    }

    /// Subscribes and takes the current board in one step. Both happen under
    /// the registry lock, so a concurrent publish either lands before the
    /// snapshot (and is reflected in it) or after it (and arrives on the
    /// channel); the snapshot can never be newer than the first frame.
    pub fn subscribe_with_snapshot(
        &self,
        scope: Scope,
    ) -> (LeaderboardSnapshot, mpsc::UnboundedReceiver<LeaderboardSnapshot>) {
        let mut topics = self.topics.lock();
        let (tx, rx) = mpsc::unbounded_channel();
        topics.entry(scope).or_default().push(tx);
        let snapshot = self.ledger.rank(scope);
        (snapshot, rx)
    }

    /// Pushes the current full leaderboard for a scope to every live
    /// subscriber, pruning the ones that have disconnected.
    pub fn publish(&self, scope: Scope) {
        let mut topics = self.topics.lock();
        let Some(subscribers) = topics.get_mut(&scope) else {
            return;
        };

        let snapshot = self.ledger.rank(scope);
        subscribers.retain(|tx| tx.send(snapshot.clone()).is_ok());

        if subscribers.is_empty() {
            topics.remove(&scope);
        }
    }

    pub fn subscriber_count(&self, scope: Scope) -> usize {
        self.topics
            .lock()
            .get(&scope)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }
}
