//! The document store consumed by the settlement service.
//!
//! All reads and writes go through a [`Transaction`]. Every document read inside a transaction
//! stays locked until it ends, nothing is visible to other callers before
//! [`Transaction::commit`] and dropping a transaction discards all of its writes.
mod memory;
mod mysql;

pub use memory::MemoryStore;
pub use mysql::MySqlStore;

use std::fmt::Debug;
use std::sync::Arc;

use futures::future::BoxFuture;
use tennis_tournament_api::{
    Challenge, ChallengeId, EventId, Inscription, Match, MatchId, Player, PlayerId, Tournament,
    TournamentId,
};
use thiserror::Error;

use crate::config::Database;

pub type StoreFuture<'a, T> = BoxFuture<'a, Result<T, StoreError>>;

pub trait Store: Send + Sync + Debug {
    /// Creates all tables that don't exist yet.
    fn migrate(&self) -> StoreFuture<'_, ()>;

    /// Starts a new [`Transaction`].
    fn begin(&self) -> StoreFuture<'_, Box<dyn Transaction>>;
}

pub trait Transaction: Send {
    fn get_match<'a>(&'a mut self, id: &'a MatchId) -> StoreFuture<'a, Option<Match>>;

    fn get_player<'a>(&'a mut self, id: &'a PlayerId) -> StoreFuture<'a, Option<Player>>;

    fn get_tournament<'a>(&'a mut self, id: &'a TournamentId)
        -> StoreFuture<'a, Option<Tournament>>;

    fn get_challenge<'a>(&'a mut self, id: &'a ChallengeId) -> StoreFuture<'a, Option<Challenge>>;

    /// Returns the [`Inscription`] of `participant` in the event `event`.
    fn find_inscription<'a>(
        &'a mut self,
        event: &'a EventId,
        participant: &'a PlayerId,
    ) -> StoreFuture<'a, Option<Inscription>>;

    /// Returns all completed matches that were neither rated nor skipped by the rating job,
    /// oldest completion first.
    fn unprocessed_matches(&mut self) -> StoreFuture<'_, Vec<Match>>;

    fn put_match<'a>(&'a mut self, m: &'a Match) -> StoreFuture<'a, ()>;

    fn put_player<'a>(&'a mut self, player: &'a Player) -> StoreFuture<'a, ()>;

    fn put_challenge<'a>(&'a mut self, challenge: &'a Challenge) -> StoreFuture<'a, ()>;

    fn put_inscription<'a>(&'a mut self, inscription: &'a Inscription) -> StoreFuture<'a, ()>;

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The operation collided with a concurrent writer. Retrying from scratch is safe.
    #[error("transaction aborted due to contention: {0}")]
    Contention(String),
    #[error("unknown database driver: {0}")]
    UnknownDriver(String),
    #[error("database error: {0}")]
    Sql(sqlx::Error),
    #[error("malformed document: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Contention(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if mysql::is_transient(&err) {
            log::debug!("Classified database error as transient: {}", err);

            Self::Contention(err.to_string())
        } else {
            Self::Sql(err)
        }
    }
}

/// Opens the store configured in `config`.
pub fn connect(config: &Database) -> Result<Arc<dyn Store>, StoreError> {
    match config.driver.as_str() {
        "memory" => {
            log::warn!("Using the in-memory store, all data is lost on shutdown");

            Ok(Arc::new(MemoryStore::new()))
        }
        "mysql" => Ok(Arc::new(MySqlStore::connect(config)?)),
        driver => Err(StoreError::UnknownDriver(driver.to_owned())),
    }
}
