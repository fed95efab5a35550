//! Elo rating updates.
//!
//! All functions in this module are pure. The rounding to whole rating points happens in
//! [`EloPolicy`], the free functions work on exact values.
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The K-factor used when nothing else is configured.
pub const DEFAULT_K_FACTOR: f64 = 32.0;

/// The score of one side of a match.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Win,
    Draw,
    Loss,
}

impl Outcome {
    #[inline]
    pub fn score(self) -> f64 {
        match self {
            Self::Win => 1.0,
            Self::Draw => 0.5,
            Self::Loss => 0.0,
        }
    }

    /// Returns the outcome seen from the opponent.
    #[inline]
    pub fn reverse(self) -> Self {
        match self {
            Self::Win => Self::Loss,
            Self::Draw => Self::Draw,
            Self::Loss => Self::Win,
        }
    }
}

/// Returns the expected score of a player rated `rating` against a player rated `opponent`.
///
/// `expected_score(a, b) + expected_score(b, a) == 1` for all inputs.
#[inline]
pub fn expected_score(rating: f64, opponent: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent - rating) / 400.0))
}

/// Returns the new (unrounded) rating of a player rated `rating` after scoring `score` against
/// `opponent` with the K-factor `k`.
#[inline]
pub fn rate(rating: f64, opponent: f64, score: f64, k: f64) -> f64 {
    rating + k * (score - expected_score(rating, opponent))
}

/// The ratings of both sides after a decided match.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RatingChange {
    pub winner: i64,
    pub loser: i64,
}

/// A reduced K-factor for players above a rating threshold.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HighRating {
    /// Players rated strictly above this value use `k_factor`.
    pub threshold: i64,
    pub k_factor: f64,
}

/// How ratings move after a match.
///
/// The K-factor is chosen per player from their own pre-match rating, so two players in the same
/// match can use different factors.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EloPolicy {
    pub k_factor: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub high_rating: Option<HighRating>,
}

impl EloPolicy {
    /// Creates a new `EloPolicy` with a single K-factor for all ratings.
    #[inline]
    pub const fn new(k_factor: f64) -> Self {
        Self {
            k_factor,
            high_rating: None,
        }
    }

    /// Uses `k_factor` for all players rated above `threshold`.
    #[inline]
    pub fn with_high_rating(mut self, threshold: i64, k_factor: f64) -> Self {
        self.high_rating = Some(HighRating {
            threshold,
            k_factor,
        });
        self
    }

    /// Checks that all K-factors are finite and positive.
    pub fn validate(&self) -> Result<(), PolicyError> {
        let mut factors = vec![self.k_factor];
        if let Some(high_rating) = self.high_rating {
            factors.push(high_rating.k_factor);
        }

        for k in factors {
            if !k.is_finite() || k <= 0.0 {
                return Err(PolicyError::InvalidKFactor(k));
            }
        }

        Ok(())
    }

    /// Returns the K-factor applied to a player rated `rating`.
    pub fn k_factor_for(&self, rating: i64) -> f64 {
        match self.high_rating {
            Some(high_rating) if rating > high_rating.threshold => high_rating.k_factor,
            _ => self.k_factor,
        }
    }

    /// Returns the new rating of a player rated `rating` after `outcome` against `opponent`,
    /// rounded to the nearest whole point.
    pub fn rate(&self, rating: i64, opponent: i64, outcome: Outcome) -> i64 {
        let k = self.k_factor_for(rating);

        rate(rating as f64, opponent as f64, outcome.score(), k).round() as i64
    }

    /// Computes both new ratings of a decided match from the pre-match ratings.
    pub fn decide(&self, winner: i64, loser: i64) -> RatingChange {
        RatingChange {
            winner: self.rate(winner, loser, Outcome::Win),
            loser: self.rate(loser, winner, Outcome::Loss),
        }
    }
}

impl Default for EloPolicy {
    #[inline]
    fn default() -> Self {
        Self::new(DEFAULT_K_FACTOR)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Error)]
pub enum PolicyError {
    #[error("invalid k-factor: {0}")]
    InvalidKFactor(f64),
}

#[cfg(test)]
mod tests {
    use super::{expected_score, rate, EloPolicy, Outcome, PolicyError, RatingChange};

    #[test]
    fn test_expected_score_sums_to_one() {
        let ratings = [0.0, 100.0, 850.0, 1000.0, 1234.5, 1600.0, 2400.0, 2800.0];

        for a in ratings {
            for b in ratings {
                let sum = expected_score(a, b) + expected_score(b, a);
                assert!((sum - 1.0).abs() < 1e-12, "{} vs {} sums to {}", a, b, sum);
            }
        }
    }

    #[test]
    fn test_expected_score_equal_ratings() {
        assert_eq!(expected_score(1000.0, 1000.0), 0.5);
        assert!(expected_score(1400.0, 1000.0) > 0.9);
    }

    #[test]
    fn test_rate() {
        assert_eq!(rate(1000.0, 1000.0, 1.0, 32.0), 1016.0);
        assert_eq!(rate(1000.0, 1000.0, 0.0, 32.0), 984.0);
        assert_eq!(rate(1000.0, 1000.0, 0.5, 32.0), 1000.0);
    }

    #[test]
    fn test_decide_equal_ratings() {
        let policy = EloPolicy::default();

        assert_eq!(
            policy.decide(1000, 1000),
            RatingChange {
                winner: 1016,
                loser: 984
            }
        );
    }

    #[test]
    fn test_decide_upset() {
        let policy = EloPolicy::default();

        // The underdog gains more than the favourite would have.
        let upset = policy.decide(1400, 1600);
        let expected = policy.decide(1600, 1400);

        assert_eq!(upset.winner - 1400, 1600 - upset.loser);
        assert!(upset.winner - 1400 > expected.winner - 1600);
        assert_eq!(upset, RatingChange { winner: 1424, loser: 1576 });
    }

    #[test]
    fn test_high_rating_k_factor() {
        let policy = EloPolicy::new(32.0).with_high_rating(2400, 16.0);

        assert_eq!(policy.k_factor_for(2400), 32.0);
        assert_eq!(policy.k_factor_for(2401), 16.0);

        // Only the side above the threshold uses the reduced factor.
        let change = policy.decide(2500, 2500);
        assert_eq!(change, RatingChange { winner: 2508, loser: 2492 });

        let change = policy.decide(2300, 2500);
        assert_eq!(change.winner, 2300 + 24);
        assert_eq!(change.loser, 2500 - 12);
    }

    #[test]
    fn test_draw() {
        let policy = EloPolicy::default();

        assert_eq!(policy.rate(1000, 1000, Outcome::Draw), 1000);
        assert_eq!(Outcome::Win.reverse(), Outcome::Loss);
        assert_eq!(Outcome::Draw.reverse(), Outcome::Draw);
    }

    #[test]
    fn test_validate() {
        EloPolicy::default().validate().unwrap();

        assert_eq!(
            EloPolicy::new(0.0).validate(),
            Err(PolicyError::InvalidKFactor(0.0))
        );
        assert!(EloPolicy::new(32.0)
            .with_high_rating(2400, f64::NAN)
            .validate()
            .is_err());
    }
}
