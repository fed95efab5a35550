//! Request and response bodies of the settlement endpoints.
use serde::{Deserialize, Serialize};

use crate::id::{MatchId, PlayerId};

/// Body of `POST /v1/settleMatch`.
///
/// The ids are optional on the wire so that a missing field can be rejected with a proper
/// message instead of a generic decoding error.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettleMatchRequest {
    pub match_id: Option<MatchId>,
    pub winner_id: Option<PlayerId>,
    pub score: String,
    pub is_retirement: bool,
}

/// Body of `POST /v1/matches/{id}/result`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchResult {
    pub winner_id: Option<PlayerId>,
    pub score: String,
    pub is_retirement: bool,
}

impl MatchResult {
    pub fn into_request(self, match_id: MatchId) -> SettleMatchRequest {
        SettleMatchRequest {
            match_id: Some(match_id),
            winner_id: self.winner_id,
            score: self.score,
            is_retirement: self.is_retirement,
        }
    }
}

/// The outcome of every settlement call, successful or not.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleResponse {
    pub success: bool,
    pub message: String,
}

impl SettleResponse {
    pub fn success<T>(message: T) -> Self
    where
        T: ToString,
    {
        Self {
            success: true,
            message: message.to_string(),
        }
    }

    pub fn failure<T>(message: T) -> Self
    where
        T: ToString,
    {
        Self {
            success: false,
            message: message.to_string(),
        }
    }
}

/// Counters of a single reconciliation run.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Matches whose rating change was applied in this run.
    pub processed: u32,
    /// Completed matches left untouched (unranked, no winner or dangling references).
    pub skipped: u32,
    pub players_updated: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileResponse {
    pub success: bool,
    pub message: String,
    pub report: ReconcileReport,
}
