use serde::{Deserialize, Serialize};

use crate::id::{EventId, InscriptionId, PlayerId};

/// The enrollment of a participant in an event. Ladder events keep the standings here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inscription {
    pub id: InscriptionId,
    #[serde(rename = "eventoId")]
    pub event_id: EventId,
    #[serde(rename = "participanteId")]
    pub participant_id: PlayerId,
    /// 1-based ladder rank.
    #[serde(rename = "posicionActual")]
    pub position: u32,
}
