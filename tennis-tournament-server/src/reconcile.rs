//! The scheduled rating reconciliation.
//!
//! Picks up completed matches of ranked tournaments whose rating change was never applied and
//! replays them in completion order. Matches settled through [`Settlement`] are already flagged
//! and never show up here. Matches that can never be rated (unranked tournament, no winner) are
//! flagged as skipped, matches with dangling references are left for a later pass.
//!
//! [`Settlement`]: crate::settlement::Settlement
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use tennis_tournament_api::settle::ReconcileReport;
use tennis_tournament_api::{Match, Player, PlayerId, TournamentId};
use tennis_tournament_core::EloPolicy;

use crate::settlement::{with_retries, SettlementError};
use crate::store::{Store, Transaction};

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn Store>,
    policy: EloPolicy,
    max_attempts: u32,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>, policy: EloPolicy, max_attempts: u32) -> Self {
        Self {
            store,
            policy,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Runs a single reconciliation pass. The pass is applied completely or not at all.
    pub async fn run(&self) -> Result<ReconcileReport, SettlementError> {
        let report = with_retries(self.max_attempts, "reconcile ratings", || self.try_run()).await?;

        log::info!(
            "Reconciled ratings: {} matches processed, {} skipped, {} players updated",
            report.processed,
            report.skipped,
            report.players_updated
        );

        Ok(report)
    }

    async fn try_run(&self) -> Result<ReconcileReport, SettlementError> {
        let mut tx = self.store.begin().await?;

        let matches = tx.unprocessed_matches().await?;
        log::debug!("Found {} completed matches without rating update", matches.len());

        let mut pass = Pass::default();
        for m in matches {
            if self.replay(&mut *tx, &mut pass, m).await? {
                pass.report.processed += 1;
            } else {
                pass.report.skipped += 1;
            }
        }

        for id in &pass.updated {
            if let Some(player) = pass.players.get(id) {
                tx.put_player(player).await?;
            }
        }
        pass.report.players_updated = pass.updated.len() as u32;

        tx.commit().await?;

        Ok(pass.report)
    }

    /// Applies the rating change of `m` to the running ratings in `pass`. Returns `false` if the
    /// match was skipped.
    async fn replay(
        &self,
        tx: &mut dyn Transaction,
        pass: &mut Pass,
        mut m: Match,
    ) -> Result<bool, SettlementError> {
        let winner_id = match m.winner_id.clone() {
            Some(id) => id,
            None => return skip(tx, m).await,
        };

        let is_ranked = match pass.tournaments.get(&m.tournament_id) {
            Some(is_ranked) => *is_ranked,
            None => {
                let is_ranked = tx
                    .get_tournament(&m.tournament_id)
                    .await?
                    .map(|tournament| tournament.is_ranked);

                pass.tournaments.insert(m.tournament_id.clone(), is_ranked);
                is_ranked
            }
        };

        match is_ranked {
            Some(true) => (),
            Some(false) => return skip(tx, m).await,
            None => {
                log::warn!(
                    "Skipping match {}: tournament {} not found",
                    m.id,
                    m.tournament_id
                );
                return Ok(false);
            }
        }

        let loser_id = match m.opponent_of(&winner_id) {
            Some(id) if *id != winner_id => id.clone(),
            _ => {
                log::warn!(
                    "Skipping match {}: winner {} does not play in it",
                    m.id,
                    winner_id
                );
                return Ok(false);
            }
        };

        for id in [&winner_id, &loser_id] {
            if !pass.players.contains_key(id) {
                if let Some(player) = tx.get_player(id).await? {
                    pass.players.insert(id.clone(), player);
                }
            }
        }

        let (winner, loser) = match (pass.players.get(&winner_id), pass.players.get(&loser_id)) {
            (Some(winner), Some(loser)) => (winner.rank_points, loser.rank_points),
            _ => {
                log::warn!("Skipping match {}: player not found", m.id);
                return Ok(false);
            }
        };

        let change = self.policy.decide(winner, loser);
        pass.set_rating(&winner_id, change.winner);
        pass.set_rating(&loser_id, change.loser);

        m.rankings_processed = true;
        tx.put_match(&m).await?;

        Ok(true)
    }
}

/// Marks `m` as never to be rated. Later passes won't load it again.
async fn skip(tx: &mut dyn Transaction, mut m: Match) -> Result<bool, SettlementError> {
    m.rankings_skipped = true;
    tx.put_match(&m).await?;

    Ok(false)
}

impl Debug for Reconciler {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("policy", &self.policy)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

/// The running state of one reconciliation pass.
#[derive(Debug, Default)]
struct Pass {
    report: ReconcileReport,
    /// `None` if the tournament doesn't exist.
    tournaments: HashMap<TournamentId, Option<bool>>,
    players: HashMap<PlayerId, Player>,
    /// Players with a changed rating, in order of their first change.
    updated: Vec<PlayerId>,
}

impl Pass {
    fn set_rating(&mut self, id: &PlayerId, rating: i64) {
        if let Some(player) = self.players.get_mut(id) {
            player.rank_points = rating;
        }

        if !self.updated.contains(id) {
            self.updated.push(id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use tennis_tournament_api::settle::ReconcileReport;
    use tennis_tournament_api::MatchStatus;
    use tennis_tournament_core::EloPolicy;

    use super::Reconciler;
    use crate::settlement::{SettleMatch, Settlement};
    use crate::store::{MemoryStore, Store};

    fn reconciler(store: &MemoryStore) -> Reconciler {
        Reconciler::new(Arc::new(store.clone()), EloPolicy::default(), 3)
    }

    /// Marks a match as completed without touching any rating, like a result entered outside
    /// of the settlement service.
    fn complete(store: &MemoryStore, id: &str, winner: Option<&str>, minute: i64) {
        let mut m = store.get_match(id).unwrap();
        m.status = MatchStatus::Completed;
        m.winner_id = winner.map(Into::into);
        m.completed_at =
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap() + Duration::minutes(minute));
        store.insert_match(m);
    }

    #[tokio::test]
    async fn test_reconcile_chains_in_completion_order() {
        let store = MemoryStore::fixture();

        // m7 is bea's win over ana, completed before m1.
        let mut m7 = store.get_match("m1").unwrap();
        m7.id = "m7".into();
        store.insert_match(m7);

        complete(&store, "m1", Some("ana"), 30);
        complete(&store, "m7", Some("bea"), 10);
        complete(&store, "m2", Some("dani"), 20);

        let report = reconciler(&store).run().await.unwrap();
        assert_eq!(
            report,
            ReconcileReport {
                processed: 3,
                skipped: 0,
                players_updated: 4,
            }
        );

        // bea 1000 -> 1016, then ana 984 -> 1001.
        assert_eq!(store.player("ana").unwrap().rank_points, 1001);
        assert_eq!(store.player("bea").unwrap().rank_points, 999);
        assert_eq!(store.player("dani").unwrap().rank_points, 1424);
        assert_eq!(store.player("carla").unwrap().rank_points, 1576);
        assert_eq!(store.player("eva").unwrap().rank_points, 1200);

        // Records are only changed by settlement.
        assert_eq!(store.player("ana").unwrap().global_wins, 0);

        for id in ["m1", "m2", "m7"] {
            assert!(store.get_match(id).unwrap().rankings_processed);
        }
    }

    #[tokio::test]
    async fn test_reconcile_skips() {
        let store = MemoryStore::fixture();

        // Unranked tournament.
        complete(&store, "m3", Some("ana"), 0);
        // No winner.
        complete(&store, "m1", None, 1);
        // Missing player.
        complete(&store, "m6", Some("ana"), 2);

        let reconciler = reconciler(&store);
        let report = reconciler.run().await.unwrap();
        assert_eq!(
            report,
            ReconcileReport {
                processed: 0,
                skipped: 3,
                players_updated: 0,
            }
        );

        for id in ["m1", "m3", "m6"] {
            assert!(!store.get_match(id).unwrap().rankings_processed);
        }
        assert!(store.get_match("m1").unwrap().rankings_skipped);
        assert!(store.get_match("m3").unwrap().rankings_skipped);
        assert!(!store.get_match("m6").unwrap().rankings_skipped);
        assert_eq!(store.player("ana").unwrap().rank_points, 1000);

        // Only the match with a dangling reference is looked at again.
        let report = reconciler.run().await.unwrap();
        assert_eq!(
            report,
            ReconcileReport {
                processed: 0,
                skipped: 1,
                players_updated: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_reconcile_ignores_settled_unranked_matches() {
        let store = MemoryStore::fixture();

        Settlement::new(Arc::new(store.clone()), EloPolicy::default(), 3)
            .settle(SettleMatch::new("m3", "ana", "6-4 6-4"))
            .await
            .unwrap();

        let reconciler = reconciler(&store);
        for _ in 0..2 {
            assert_eq!(reconciler.run().await.unwrap(), ReconcileReport::default());
        }

        let mut tx = store.begin().await.unwrap();
        assert!(tx.unprocessed_matches().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_is_noop_after_settlement() {
        let store = MemoryStore::fixture();

        Settlement::new(Arc::new(store.clone()), EloPolicy::default(), 3)
            .settle(SettleMatch::new("m1", "ana", "6-4 6-4"))
            .await
            .unwrap();

        let report = reconciler(&store).run().await.unwrap();
        assert_eq!(report, ReconcileReport::default());
        assert_eq!(store.player("ana").unwrap().rank_points, 1016);
        assert_eq!(store.player("bea").unwrap().rank_points, 984);
    }

    #[tokio::test]
    async fn test_reconcile_twice() {
        let store = MemoryStore::fixture();
        complete(&store, "m1", Some("ana"), 0);

        let reconciler = reconciler(&store);
        assert_eq!(reconciler.run().await.unwrap().processed, 1);
        assert_eq!(reconciler.run().await.unwrap().processed, 0);

        assert_eq!(store.player("ana").unwrap().rank_points, 1016);
    }

    #[tokio::test]
    async fn test_reconcile_retries_transient_failures() {
        let store = MemoryStore::fixture();
        complete(&store, "m1", Some("ana"), 0);
        store.fail_commits(1);

        let report = reconciler(&store).run().await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(store.player("ana").unwrap().rank_points, 1016);
    }
}
