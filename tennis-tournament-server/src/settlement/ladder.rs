//! Stage 2 of a settlement: the challenge bookkeeping of ladder tournaments.
//!
//! Runs once after the result was committed. Nothing here rolls the result back, failures are
//! logged and reported in the [`LadderOutcome`].
use tennis_tournament_api::{ChallengeId, ChallengeState, PlayerId};
use tennis_tournament_core::{should_swap, Positions};

use super::{Committed, Entity, SettlementError};
use crate::store::Store;

#[derive(Debug)]
pub enum LadderOutcome {
    /// Not a ladder match.
    NotApplicable,
    /// The challenged player won. The challenge was marked as played.
    Defended,
    /// The challenger won and both players traded places.
    Swapped(Positions),
    Failed(SettlementError),
}

impl LadderOutcome {
    #[inline]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

pub(super) async fn update(store: &dyn Store, committed: &Committed) -> LadderOutcome {
    let m = &committed.settled_match;

    let challenge_id = match &m.challenge_id {
        Some(id) if committed.tournament.kind.is_ladder() => id,
        _ => return LadderOutcome::NotApplicable,
    };

    match apply(store, committed, challenge_id).await {
        Ok(outcome) => outcome,
        Err(err) => {
            log::error!(
                "Ladder update for match {} failed, the result stays recorded: {}",
                m.id,
                err
            );

            LadderOutcome::Failed(err)
        }
    }
}

/// Runs the ladder update in its own transaction. Both inscriptions stay locked from the read
/// until the swapped positions are committed.
async fn apply(
    store: &dyn Store,
    committed: &Committed,
    challenge_id: &ChallengeId,
) -> Result<LadderOutcome, SettlementError> {
    let m = &committed.settled_match;
    let winner: &PlayerId = &committed.winner.id;

    let mut tx = store.begin().await?;

    let mut challenge = tx
        .get_challenge(challenge_id)
        .await?
        .ok_or_else(|| SettlementError::not_found(Entity::Challenge, challenge_id))?;

    let players = [&challenge.challenger_id, &challenge.challenged_id];
    if !players.contains(&&m.player1_id) || !players.contains(&&m.player2_id) {
        return Err(SettlementError::InconsistentState(format!(
            "challenge {} is not between the players of match {}",
            challenge.id, m.id
        )));
    }

    challenge.state = ChallengeState::Played;

    if !should_swap(
        committed.tournament.kind.is_ladder(),
        Some(&challenge.challenger_id),
        winner,
    ) {
        tx.put_challenge(&challenge).await?;
        tx.commit().await?;

        return Ok(LadderOutcome::Defended);
    }

    // Inscriptions are always locked in player id order.
    let challenger_first = challenge.challenger_id <= challenge.challenged_id;
    let (first, second) = if challenger_first {
        (&challenge.challenger_id, &challenge.challenged_id)
    } else {
        (&challenge.challenged_id, &challenge.challenger_id)
    };

    let first = tx.find_inscription(&challenge.event_id, first).await?;
    let second = tx.find_inscription(&challenge.event_id, second).await?;

    let (challenger, challenged) = if challenger_first {
        (first, second)
    } else {
        (second, first)
    };

    let (mut challenger, mut challenged) = match (challenger, challenged) {
        (Some(challenger), Some(challenged)) => (challenger, challenged),
        (challenger, _) => {
            let missing = match challenger {
                Some(_) => &challenge.challenged_id,
                None => &challenge.challenger_id,
            };

            let err = SettlementError::InconsistentState(format!(
                "player {} has no inscription in event {}",
                missing, challenge.event_id
            ));

            // The challenge was played either way.
            tx.put_challenge(&challenge).await?;
            tx.commit().await?;

            return Err(err);
        }
    };

    let positions = Positions {
        challenger: challenger.position,
        challenged: challenged.position,
    }
    .swap();

    challenger.position = positions.challenger;
    challenged.position = positions.challenged;

    tx.put_challenge(&challenge).await?;
    tx.put_inscription(&challenger).await?;
    tx.put_inscription(&challenged).await?;
    tx.commit().await?;

    Ok(LadderOutcome::Swapped(positions))
}
