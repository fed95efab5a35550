//! Ladder standings.
//!
//! In a ladder the standings only change through challenges: when the challenger beats the
//! challenged player, both players trade places. A successful defence leaves the ladder as it is.

/// Returns `true` if a match result moves the challenger up the ladder.
///
/// This is only the case if the tournament is a ladder, the match was played for a challenge
/// (`challenger` is `Some`) and the `winner` is that challenger.
pub fn should_swap<T>(is_ladder: bool, challenger: Option<&T>, winner: &T) -> bool
where
    T: PartialEq + ?Sized,
{
    match challenger {
        Some(challenger) => is_ladder && challenger == winner,
        None => false,
    }
}

/// The ladder positions of both sides of a challenge.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Positions {
    pub challenger: u32,
    pub challenged: u32,
}

impl Positions {
    /// Returns the positions after the challenger won.
    #[inline]
    pub fn swap(self) -> Self {
        Self {
            challenger: self.challenged,
            challenged: self.challenger,
        }
    }
}
