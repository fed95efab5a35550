//! # tennis-tournament-core
//!
//! The rules applied when a match result is recorded, free of any storage or transport:
//! - [`rating`]: Elo expected scores and the configurable [`EloPolicy`].
//! - [`ladder`]: when a challenge result swaps ladder positions.
//!
//! ## Feature Flags
//!
//! `serde`: Adds `Serialize` and `Deserialize` impls to the rating policy types.
//!
pub mod ladder;
pub mod rating;

pub use ladder::{should_swap, Positions};
pub use rating::{EloPolicy, HighRating, Outcome, PolicyError, RatingChange};
