use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::id::TournamentId;

/// Tournament configuration. Settlement only ever reads it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tournament {
    pub id: TournamentId,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "tipoTorneo")]
    pub kind: TournamentKind,
    #[serde(rename = "isRanked", default)]
    pub is_ranked: bool,
    /// Free-form score format chosen in the creation wizard, e.g. "3 sets".
    #[serde(rename = "formatoMarcador", default)]
    pub score_format: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TournamentKind {
    /// Scheduled elimination rounds.
    #[serde(rename = "Eliminatoria")]
    Bracket,
    /// Linear standings that only change through challenges.
    #[serde(rename = "Escalera")]
    Ladder,
}

impl TournamentKind {
    #[inline]
    pub fn is_ladder(self) -> bool {
        matches!(self, Self::Ladder)
    }
}

impl Display for TournamentKind {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Bracket => "Eliminatoria",
            Self::Ladder => "Escalera",
        })
    }
}
