use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// A ranking context: one problem, one whole contest, or the site-wide board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Problem(i64),
    Contest(i64),
    Global,
}

#[derive(Debug, Clone, PartialEq)]
struct ScoreEntry {
    score: i64,
    achieved_at: DateTime<Utc>,
}

/// One row of a leaderboard snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankEntry {
    pub username: String,
    pub score: i64,
    pub achieved_at: DateTime<Utc>,
}

/// In-memory best-score ledger, the only mutable state shared across
/// concurrent judge runs.
///
/// A single write lock serializes mutations, so updates to one (user, scope)
/// entry can never interleave; readers take the shared lock. Scores are
/// monotonically non-decreasing per entry.
#[derive(Default)]
pub struct ScoreLedger {
    entries: RwLock<HashMap<Scope, HashMap<String, ScoreEntry>>>,
}

impl ScoreLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `points` for (user, scope) if strictly better than the stored
    /// score (or if no score is stored yet). Returns whether an update
    /// occurred.
    pub fn record_if_better(
        &self,
        user: &str,
        scope: Scope,
        points: i64,
        at: DateTime<Utc>,
    ) -> bool {
        let mut entries = self.entries.write();
        Self::record_locked(&mut entries, user, scope, points, at)
    }

    /// Credits a passed problem: records the problem-scope best score and, on
    /// an actual improvement, adds the gained points to the contest-scope
    /// total (when the problem belongs to one) and the site-wide total. All
    /// updates happen under one write lock so concurrent passes cannot lose
    /// aggregate points.
    ///
    /// Returns whether the problem score improved (a repeat solve does not).
    pub fn credit_pass(
        &self,
        user: &str,
        problem_id: i64,
        contest_id: Option<i64>,
        points: i64,
        at: DateTime<Utc>,
    ) -> bool {
        let mut entries = self.entries.write();

        let previous = entries
            .get(&Scope::Problem(problem_id))
            .and_then(|scoped| scoped.get(user))
            .map(|entry| entry.score)
            .unwrap_or(0);
        if !Self::record_locked(&mut entries, user, Scope::Problem(problem_id), points, at) {
            return false;
        }

        let gained = points - previous;
        if let Some(contest_id) = contest_id {
            Self::add_locked(&mut entries, user, Scope::Contest(contest_id), gained, at);
        }
        Self::add_locked(&mut entries, user, Scope::Global, gained, at);

        true
    }

    /// Seeds a zero-score contest entry so registered users appear on the
    /// board before their first solve. Returns false if the user already has
    /// an entry for that contest.
    pub fn register(&self, user: &str, contest_id: i64, at: DateTime<Utc>) -> bool {
        let mut entries = self.entries.write();
        let scoped = entries.entry(Scope::Contest(contest_id)).or_default();
        if scoped.contains_key(user) {
            return false;
        }
        scoped.insert(
            user.to_string(),
            ScoreEntry {
                score: 0,
                achieved_at: at,
            },
        );
        true
    }

    pub fn score(&self, user: &str, scope: Scope) -> Option<i64> {
        self.entries
            .read()
            .get(&scope)
            .and_then(|scoped| scoped.get(user))
            .map(|entry| entry.score)
    }

    /// Full ordered leaderboard for a scope: score descending, earlier
    /// achievement first on ties, then username for determinism.
    pub fn rank(&self, scope: Scope) -> Vec<RankEntry> {
        let entries = self.entries.read();
        let mut board: Vec<RankEntry> = entries
            .get(&scope)
            .map(|scoped| {
                scoped
                    .iter()
                    .map(|(user, entry)| RankEntry {
                        username: user.clone(),
                        score: entry.score,
                        achieved_at: entry.achieved_at,
                    })
                    .collect()
            })
            .unwrap_or_default();

        board.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.achieved_at.cmp(&b.achieved_at))
                .then_with(|| a.username.cmp(&b.username))
        });
        board
    }

    fn add_locked(
        entries: &mut HashMap<Scope, HashMap<String, ScoreEntry>>,
        user: &str,
        scope: Scope,
        gained: i64,
        at: DateTime<Utc>,
    ) {
        let total = entries
            .get(&scope)
            .and_then(|scoped| scoped.get(user))
            .map(|entry| entry.score)
            .unwrap_or(0)
            + gained;
        Self::record_locked(entries, user, scope, total, at);
    }

    fn record_locked(
        entries: &mut HashMap<Scope, HashMap<String, ScoreEntry>>,
        user: &str,
        scope: Scope,
        points: i64,
        at: DateTime<Utc>,
    ) -> bool {
        let scoped = entries.entry(scope).or_default();
        match scoped.get_mut(user) {
            Some(entry) if points <= entry.score => false,
            Some(entry) => {
                entry.score = points;
                entry.achieved_at = at;
                true
            }
            None => {
                scoped.insert(
                    user.to_string(),
                    ScoreEntry {
                        score: points,
                        achieved_at: at,
                    },
                );
                true
            }
        }
    }
}
