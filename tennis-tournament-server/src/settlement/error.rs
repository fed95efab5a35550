use std::fmt::{self, Display, Formatter};

use tennis_tournament_api::MatchId;
use thiserror::Error;

use crate::auth::AuthError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error(transparent)]
    Unauthorized(#[from] AuthError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("{0} {1} not found")]
    NotFound(Entity, String),
    #[error("match {0} is already settled")]
    AlreadySettled(MatchId),
    #[error("inconsistent state: {0}")]
    InconsistentState(String),
    #[error("store temporarily unavailable: {0}")]
    TransientStoreFailure(StoreError),
    #[error(transparent)]
    Store(StoreError),
}

impl SettlementError {
    /// Returns `true` if running the whole operation again may succeed.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStoreFailure(_))
    }

    pub(crate) fn not_found<T>(entity: Entity, id: T) -> Self
    where
        T: ToString,
    {
        Self::NotFound(entity, id.to_string())
    }
}

impl From<StoreError> for SettlementError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            Self::TransientStoreFailure(err)
        } else {
            Self::Store(err)
        }
    }
}

/// The kind of document a [`SettlementError::NotFound`] refers to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Entity {
    Match,
    Player,
    Tournament,
    Challenge,
}

impl Display for Entity {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Match => "match",
            Self::Player => "player",
            Self::Tournament => "tournament",
            Self::Challenge => "challenge",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Entity, SettlementError};
    use crate::store::StoreError;

    #[test]
    fn test_store_error_classification() {
        let err = SettlementError::from(StoreError::Contention("deadlock".to_owned()));
        assert!(matches!(err, SettlementError::TransientStoreFailure(_)));
        assert!(err.is_retryable());

        let err = SettlementError::from(StoreError::UnknownDriver("sqlite".to_owned()));
        assert!(matches!(err, SettlementError::Store(_)));
        assert!(!err.is_retryable());

        assert!(!SettlementError::AlreadySettled("m1".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            SettlementError::not_found(Entity::Match, "m1").to_string(),
            "match m1 not found"
        );
        assert_eq!(
            SettlementError::AlreadySettled("m1".into()).to_string(),
            "match m1 is already settled"
        );
    }
}
