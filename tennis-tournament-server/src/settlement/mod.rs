//! The match settlement procedure.
//!
//! Every entry point (the callable endpoint, the REST route and the command line) ends up in
//! [`Settlement::settle`]. A settlement has two stages:
//!
//! 1. Inside one store transaction: check the match is still open, record the result, update
//!    both players' records and, for ranked tournaments, their ratings. Either all of this is
//!    committed or nothing is.
//! 2. After the commit, once: the ladder bookkeeping in [`ladder`]. Its failures are reported but
//!    never undo stage 1.
mod error;
pub mod ladder;

pub use error::{Entity, SettlementError};
pub use ladder::LadderOutcome;

use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tennis_tournament_api::settle::{SettleMatchRequest, SettleResponse};
use tennis_tournament_api::{Match, MatchId, MatchStatus, Player, PlayerId, Tournament};
use tennis_tournament_core::{EloPolicy, RatingChange};

use crate::store::Store;

/// A validated settlement request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettleMatch {
    pub match_id: MatchId,
    pub winner_id: PlayerId,
    pub score: String,
    pub is_retirement: bool,
}

impl SettleMatch {
    pub fn new<M, W>(match_id: M, winner_id: W, score: &str) -> Self
    where
        M: Into<MatchId>,
        W: Into<PlayerId>,
    {
        Self {
            match_id: match_id.into(),
            winner_id: winner_id.into(),
            score: score.to_owned(),
            is_retirement: false,
        }
    }
}

impl TryFrom<SettleMatchRequest> for SettleMatch {
    type Error = SettlementError;

    fn try_from(req: SettleMatchRequest) -> Result<Self, Self::Error> {
        let match_id = req
            .match_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SettlementError::InvalidRequest(String::from("missing matchId")))?;

        let winner_id = req
            .winner_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SettlementError::InvalidRequest(String::from("missing winnerId")))?;

        Ok(Self {
            match_id,
            winner_id,
            score: req.score,
            is_retirement: req.is_retirement,
        })
    }
}

/// The state written by a committed stage 1.
#[derive(Clone, Debug)]
pub struct Committed {
    pub settled_match: Match,
    pub tournament: Tournament,
    pub winner: Player,
    pub loser: Player,
    /// The pre-match ratings, `None` for unranked tournaments.
    pub previous_ratings: Option<RatingChange>,
}

/// The result of a settlement whose stage 1 was committed.
#[derive(Debug)]
pub struct Settled {
    pub committed: Committed,
    pub ladder: LadderOutcome,
}

impl Settled {
    /// Returns the confirmation message shown to the caller.
    pub fn message(&self) -> String {
        let committed = &self.committed;
        let m = &committed.settled_match;

        let mut message = format!(
            "Match {} settled: {} def. {}",
            m.id, committed.winner.display_name, committed.loser.display_name
        );

        if let Some(score) = m.score.as_deref().filter(|score| !score.is_empty()) {
            message.push(' ');
            message.push_str(score);
        }

        if m.is_retirement {
            message.push_str(" (retirement)");
        }
        message.push('.');

        if let Some(previous) = committed.previous_ratings {
            message.push_str(&format!(
                " Ratings: {} {} -> {}, {} {} -> {}.",
                committed.winner.display_name,
                previous.winner,
                committed.winner.rank_points,
                committed.loser.display_name,
                previous.loser,
                committed.loser.rank_points,
            ));
        }

        match &self.ladder {
            LadderOutcome::NotApplicable => (),
            LadderOutcome::Defended => message.push_str(" Challenge defended."),
            LadderOutcome::Swapped(positions) => message.push_str(&format!(
                " Ladder positions swapped: {} is now #{}.",
                committed.winner.display_name, positions.challenger
            )),
            LadderOutcome::Failed(err) => message.push_str(&format!(
                " The result was recorded but the ladder update failed: {}",
                err
            )),
        }

        message
    }
}

impl From<&Settled> for SettleResponse {
    fn from(settled: &Settled) -> Self {
        SettleResponse::success(settled.message())
    }
}

/// The settlement service, shared by all entry points.
#[derive(Clone)]
pub struct Settlement {
    store: Arc<dyn Store>,
    policy: EloPolicy,
    max_attempts: u32,
}

impl Settlement {
    pub fn new(store: Arc<dyn Store>, policy: EloPolicy, max_attempts: u32) -> Self {
        Self {
            store,
            policy,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Settles a match.
    ///
    /// # Errors
    ///
    /// Returns an error if stage 1 could not be committed. In that case nothing was written.
    /// Failures of stage 2 are returned in [`Settled::ladder`] instead.
    pub async fn settle(&self, req: SettleMatch) -> Result<Settled, SettlementError> {
        let committed = with_retries(self.max_attempts, "settle match", || {
            self.try_commit(&req)
        })
        .await?;

        log::info!(
            "Settled match {}: {} def. {}",
            committed.settled_match.id,
            committed.winner.id,
            committed.loser.id
        );

        let ladder = ladder::update(&*self.store, &committed).await;

        Ok(Settled { committed, ladder })
    }

    /// Runs stage 1 once.
    async fn try_commit(&self, req: &SettleMatch) -> Result<Committed, SettlementError> {
        let mut tx = self.store.begin().await?;

        let mut m = tx
            .get_match(&req.match_id)
            .await?
            .ok_or_else(|| SettlementError::not_found(Entity::Match, &req.match_id))?;

        if m.is_completed() {
            return Err(SettlementError::AlreadySettled(m.id));
        }

        let loser_id = match m.opponent_of(&req.winner_id) {
            Some(id) if *id != req.winner_id => id.clone(),
            _ => {
                return Err(SettlementError::InvalidRequest(format!(
                    "player {} does not play in match {}",
                    req.winner_id, m.id
                )));
            }
        };

        let mut winner = tx
            .get_player(&req.winner_id)
            .await?
            .ok_or_else(|| SettlementError::not_found(Entity::Player, &req.winner_id))?;

        let mut loser = tx
            .get_player(&loser_id)
            .await?
            .ok_or_else(|| SettlementError::not_found(Entity::Player, &loser_id))?;

        let tournament = tx
            .get_tournament(&m.tournament_id)
            .await?
            .ok_or_else(|| SettlementError::not_found(Entity::Tournament, &m.tournament_id))?;

        winner.global_wins += 1;
        loser.global_losses += 1;

        let previous_ratings = if tournament.is_ranked {
            let previous = RatingChange {
                winner: winner.rank_points,
                loser: loser.rank_points,
            };

            let change = self.policy.decide(previous.winner, previous.loser);
            winner.rank_points = change.winner;
            loser.rank_points = change.loser;
            m.rankings_processed = true;

            Some(previous)
        } else {
            m.rankings_skipped = true;
            None
        };

        m.status = MatchStatus::Completed;
        m.winner_id = Some(winner.id.clone());
        m.score = Some(req.score.clone());
        m.is_retirement = req.is_retirement;
        m.completed_at = Some(Utc::now());

        tx.put_match(&m).await?;
        tx.put_player(&winner).await?;
        tx.put_player(&loser).await?;
        tx.commit().await?;

        Ok(Committed {
            settled_match: m,
            tournament,
            winner,
            loser,
            previous_ratings,
        })
    }
}

impl Debug for Settlement {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Settlement")
            .field("policy", &self.policy)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

/// Runs `f` until it succeeds, fails with an error that is not retryable or `max_attempts` runs
/// failed.
pub(crate) async fn with_retries<T, F, Fut>(
    max_attempts: u32,
    operation: &str,
    mut f: F,
) -> Result<T, SettlementError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SettlementError>>,
{
    let mut attempt = 1;
    loop {
        match f().await {
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                log::warn!(
                    "Failed to {} (attempt {}/{}), retrying: {}",
                    operation,
                    attempt,
                    max_attempts,
                    err
                );

                tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
                attempt += 1;
            }
            res => return res,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tennis_tournament_api::settle::{SettleMatchRequest, SettleResponse};
    use tennis_tournament_api::MatchStatus;
    use tennis_tournament_core::EloPolicy;

    use super::{Entity, LadderOutcome, SettleMatch, Settlement, SettlementError};
    use crate::store::MemoryStore;

    fn settlement(store: &MemoryStore) -> Settlement {
        Settlement::new(Arc::new(store.clone()), EloPolicy::default(), 3)
    }

    #[tokio::test]
    async fn test_settle_ranked() {
        let store = MemoryStore::fixture();

        let mut req = SettleMatch::new("m1", "ana", "6-4 3-6 7-5");
        req.is_retirement = true;
        let settled = settlement(&store).settle(req).await.unwrap();
        assert!(matches!(settled.ladder, LadderOutcome::NotApplicable));

        let m = store.get_match("m1").unwrap();
        assert_eq!(m.status, MatchStatus::Completed);
        assert_eq!(m.winner_id, Some("ana".into()));
        assert_eq!(m.score.as_deref(), Some("6-4 3-6 7-5"));
        assert!(m.is_retirement);
        assert!(m.rankings_processed);
        assert!(!m.rankings_skipped);
        assert!(m.completed_at.is_some());

        let ana = store.player("ana").unwrap();
        assert_eq!((ana.global_wins, ana.global_losses), (1, 0));
        assert_eq!(ana.rank_points, 1016);

        let bea = store.player("bea").unwrap();
        assert_eq!((bea.global_wins, bea.global_losses), (0, 1));
        assert_eq!(bea.rank_points, 984);

        // No other player is touched.
        for id in ["carla", "dani", "eva"] {
            let player = store.player(id).unwrap();
            assert_eq!((player.global_wins, player.global_losses), (0, 0));
        }
        assert_eq!(store.player("carla").unwrap().rank_points, 1600);

        assert_eq!(
            SettleResponse::from(&settled),
            SettleResponse::success(
                "Match m1 settled: Ana def. Bea 6-4 3-6 7-5 (retirement). Ratings: Ana 1000 -> 1016, Bea 1000 -> 984."
            )
        );
    }

    #[tokio::test]
    async fn test_settle_upset() {
        let store = MemoryStore::fixture();

        settlement(&store)
            .settle(SettleMatch::new("m2", "dani", "6-4 6-4"))
            .await
            .unwrap();

        assert_eq!(store.player("dani").unwrap().rank_points, 1424);
        assert_eq!(store.player("carla").unwrap().rank_points, 1576);
    }

    #[tokio::test]
    async fn test_settle_unranked() {
        let store = MemoryStore::fixture();

        settlement(&store)
            .settle(SettleMatch::new("m3", "bea", "6-0 6-0"))
            .await
            .unwrap();

        let m = store.get_match("m3").unwrap();
        assert!(m.is_completed());
        assert!(!m.rankings_processed);
        assert!(m.rankings_skipped);

        let bea = store.player("bea").unwrap();
        assert_eq!(bea.global_wins, 1);
        assert_eq!(bea.rank_points, 1000);
        assert_eq!(store.player("ana").unwrap().rank_points, 1000);
    }

    #[tokio::test]
    async fn test_settle_twice() {
        let store = MemoryStore::fixture();
        let settlement = settlement(&store);

        settlement
            .settle(SettleMatch::new("m1", "ana", "6-4 6-4"))
            .await
            .unwrap();

        let m = store.get_match("m1").unwrap();
        let ana = store.player("ana").unwrap();
        let bea = store.player("bea").unwrap();

        let err = settlement
            .settle(SettleMatch::new("m1", "bea", "6-4 6-4"))
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::AlreadySettled(_)));
        assert!(!err.is_retryable());

        assert_eq!(store.get_match("m1").unwrap(), m);
        assert_eq!(store.player("ana").unwrap(), ana);
        assert_eq!(store.player("bea").unwrap(), bea);
    }

    #[tokio::test]
    async fn test_settle_preconditions() {
        let store = MemoryStore::fixture();
        let settlement = settlement(&store);

        let err = settlement
            .settle(SettleMatch::new("m9", "ana", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::NotFound(Entity::Match, _)));

        let err = settlement
            .settle(SettleMatch::new("m1", "carla", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::InvalidRequest(_)));

        let err = settlement
            .settle(SettleMatch::new("m6", "ana", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::NotFound(Entity::Player, _)));

        // Nothing was written by the failed attempts.
        assert!(!store.get_match("m6").unwrap().is_completed());
        assert_eq!(store.player("ana").unwrap().global_wins, 0);
        assert_eq!(store.player("ana").unwrap().global_losses, 0);
    }

    #[tokio::test]
    async fn test_settle_missing_tournament() {
        let store = MemoryStore::fixture();
        let mut m = store.get_match("m1").unwrap();
        m.tournament_id = "gone".into();
        store.insert_match(m);

        let err = settlement(&store)
            .settle(SettleMatch::new("m1", "ana", ""))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SettlementError::NotFound(Entity::Tournament, _)
        ));
        assert_eq!(store.player("ana").unwrap().global_wins, 0);
    }

    #[test]
    fn test_settle_match_from_request() {
        let req = SettleMatchRequest {
            match_id: Some("m1".into()),
            winner_id: None,
            ..Default::default()
        };
        assert!(matches!(
            SettleMatch::try_from(req),
            Err(SettlementError::InvalidRequest(_))
        ));

        let req = SettleMatchRequest {
            match_id: Some("".into()),
            winner_id: Some("ana".into()),
            ..Default::default()
        };
        assert!(matches!(
            SettleMatch::try_from(req),
            Err(SettlementError::InvalidRequest(_))
        ));

        let req = SettleMatchRequest {
            match_id: Some("m1".into()),
            winner_id: Some("ana".into()),
            score: "6-1 6-1".to_owned(),
            is_retirement: true,
        };
        assert_eq!(
            SettleMatch::try_from(req).unwrap(),
            SettleMatch {
                match_id: "m1".into(),
                winner_id: "ana".into(),
                score: "6-1 6-1".to_owned(),
                is_retirement: true,
            }
        );
    }

    #[tokio::test]
    async fn test_settle_retries_transient_failures() {
        let store = MemoryStore::fixture();
        store.fail_commits(2);

        settlement(&store)
            .settle(SettleMatch::new("m1", "ana", "6-4 6-4"))
            .await
            .unwrap();

        let ana = store.player("ana").unwrap();
        assert_eq!(ana.global_wins, 1);
        assert_eq!(ana.rank_points, 1016);
    }

    #[tokio::test]
    async fn test_settle_gives_up() {
        let store = MemoryStore::fixture();
        store.fail_commits(3);

        let err = settlement(&store)
            .settle(SettleMatch::new("m1", "ana", "6-4 6-4"))
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::TransientStoreFailure(_)));

        assert!(!store.get_match("m1").unwrap().is_completed());
        assert_eq!(store.player("ana").unwrap().global_wins, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_settle_different_matches_concurrently() {
        let store = MemoryStore::fixture();
        let settlement = settlement(&store);

        let (a, b) = tokio::join!(
            settlement.settle(SettleMatch::new("m1", "ana", "6-4 6-4")),
            settlement.settle(SettleMatch::new("m2", "carla", "6-4 6-4")),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(store.player("ana").unwrap().global_wins, 1);
        assert_eq!(store.player("bea").unwrap().global_losses, 1);
        assert_eq!(store.player("carla").unwrap().global_wins, 1);
        assert_eq!(store.player("dani").unwrap().global_losses, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_settle_same_match_concurrently() {
        let store = MemoryStore::fixture();
        let settlement = settlement(&store);

        let tasks: Vec<_> = ["ana", "bea", "ana", "bea"]
            .into_iter()
            .map(|winner| {
                let settlement = settlement.clone();
                tokio::task::spawn(async move {
                    settlement
                        .settle(SettleMatch::new("m1", winner, "6-4 6-4"))
                        .await
                })
            })
            .collect();

        let mut settled = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => settled += 1,
                Err(SettlementError::AlreadySettled(_)) => (),
                Err(err) => panic!("unexpected error: {}", err),
            }
        }
        assert_eq!(settled, 1);

        let ana = store.player("ana").unwrap();
        let bea = store.player("bea").unwrap();
        assert_eq!(ana.global_wins + bea.global_wins, 1);
        assert_eq!(ana.global_losses + bea.global_losses, 1);
        assert_eq!(ana.rank_points + bea.rank_points, 2000);
    }
}
