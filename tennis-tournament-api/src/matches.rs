use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{ChallengeId, EventId, MatchId, PlayerId, TournamentId};

/// A single match between two players.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: MatchId,
    pub tournament_id: TournamentId,
    pub player1_id: PlayerId,
    pub player2_id: PlayerId,
    /// Set for ladder matches created from a [`Challenge`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge_id: Option<ChallengeId>,
    #[serde(default)]
    pub status: MatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<String>,
    #[serde(default)]
    pub is_retirement: bool,
    /// Whether the rating change of this match has been applied.
    #[serde(default)]
    pub rankings_processed: bool,
    /// Whether the rating job decided to never rate this match: the tournament is unranked or
    /// the match has no winner.
    #[serde(default)]
    pub rankings_skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Match {
    /// Creates a new pending `Match`.
    pub fn new<I, T>(id: I, tournament_id: T, player1_id: PlayerId, player2_id: PlayerId) -> Self
    where
        I: Into<MatchId>,
        T: Into<TournamentId>,
    {
        Self {
            id: id.into(),
            tournament_id: tournament_id.into(),
            player1_id,
            player2_id,
            challenge_id: None,
            status: MatchStatus::Pending,
            winner_id: None,
            score: None,
            is_retirement: false,
            rankings_processed: false,
            rankings_skipped: false,
            completed_at: None,
        }
    }

    /// Returns the other participant of the match, or `None` if `player` doesn't play in it.
    pub fn opponent_of(&self, player: &PlayerId) -> Option<&PlayerId> {
        if *player == self.player1_id {
            Some(&self.player2_id)
        } else if *player == self.player2_id {
            Some(&self.player1_id)
        } else {
            None
        }
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        self.status == MatchStatus::Completed
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchStatus {
    #[default]
    #[serde(rename = "Pendiente")]
    Pending,
    #[serde(rename = "En Progreso")]
    InProgress,
    #[serde(rename = "Completado")]
    Completed,
}

impl MatchStatus {
    #[inline]
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::InProgress => 1,
            Self::Completed => 2,
        }
    }
}

impl Display for MatchStatus {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "Pendiente",
            Self::InProgress => "En Progreso",
            Self::Completed => "Completado",
        })
    }
}

/// A ladder challenge from a lower ranked player (`retador`) to a higher ranked one (`retado`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: ChallengeId,
    #[serde(rename = "eventoId")]
    pub event_id: EventId,
    #[serde(rename = "retadorId")]
    pub challenger_id: PlayerId,
    #[serde(rename = "retadoId")]
    pub challenged_id: PlayerId,
    #[serde(rename = "estado", default)]
    pub state: ChallengeState,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeState {
    #[default]
    #[serde(rename = "Pendiente")]
    Pending,
    #[serde(rename = "Aceptado")]
    Accepted,
    #[serde(rename = "Jugado")]
    Played,
}

#[cfg(test)]
mod tests {
    use super::{Challenge, ChallengeState, Match, MatchStatus};
    use crate::id::PlayerId;

    #[test]
    fn test_match_wire_format() {
        let input = r#"{
            "id": "m1",
            "tournamentId": "t1",
            "player1Id": "ana",
            "player2Id": "bea",
            "challengeId": "c1",
            "status": "En Progreso"
        }"#;

        let m: Match = serde_json::from_str(input).unwrap();
        assert_eq!(m.status, MatchStatus::InProgress);
        assert_eq!(m.challenge_id.unwrap(), *"c1");
        assert!(!m.rankings_processed);
        assert!(!m.rankings_skipped);
        assert!(m.winner_id.is_none());

        let value = serde_json::to_value(Match::new(
            "m2",
            "t1",
            PlayerId::from("ana"),
            PlayerId::from("bea"),
        ))
        .unwrap();
        assert_eq!(value["status"], "Pendiente");
        assert_eq!(value["rankingsProcessed"], false);
        assert!(value.get("winnerId").is_none());
    }

    #[test]
    fn test_opponent_of() {
        let m = Match::new("m1", "t1", PlayerId::from("ana"), PlayerId::from("bea"));

        assert_eq!(m.opponent_of(&PlayerId::from("ana")).unwrap(), "bea");
        assert_eq!(m.opponent_of(&PlayerId::from("bea")).unwrap(), "ana");
        assert!(m.opponent_of(&PlayerId::from("cris")).is_none());
    }

    #[test]
    fn test_challenge_wire_format() {
        let input = r#"{"id":"c1","eventoId":"e1","retadorId":"ana","retadoId":"bea","estado":"Aceptado"}"#;

        let challenge: Challenge = serde_json::from_str(input).unwrap();
        assert_eq!(challenge.challenger_id, *"ana");
        assert_eq!(challenge.challenged_id, *"bea");
        assert_eq!(challenge.state, ChallengeState::Accepted);
    }
}
