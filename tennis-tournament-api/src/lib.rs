//! # tennis-tournament-api
//!
//! Shared types of the tennis tournament system: the documents kept in the store and the bodies
//! exchanged with the settlement endpoints.
//!
//! Stored documents keep the field names used by the web application (`tipoTorneo`,
//! `posicionActual`, ...), the Rust side uses English names.
pub mod auth;
pub mod id;
pub mod inscriptions;
pub mod matches;
pub mod players;
pub mod settle;
pub mod tournaments;

pub use id::{ChallengeId, EventId, InscriptionId, MatchId, PlayerId, TournamentId};
pub use inscriptions::Inscription;
pub use matches::{Challenge, ChallengeState, Match, MatchStatus};
pub use players::{Player, Role};
pub use tournaments::{Tournament, TournamentKind};
