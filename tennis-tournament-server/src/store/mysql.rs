use std::time::Duration;

use futures::TryStreamExt;
use serde::de::DeserializeOwned;
use sqlx::mysql::{MySqlDatabaseError, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{MySql, Row};
use tennis_tournament_api::{
    Challenge, ChallengeId, EventId, Inscription, Match, MatchId, MatchStatus, Player, PlayerId,
    Tournament, TournamentId,
};

use super::{Store, StoreError, StoreFuture, Transaction};
use crate::config::Database;

/// Lock wait timeout exceeded.
const ER_LOCK_WAIT_TIMEOUT: u16 = 1205;
/// Deadlock found when trying to get lock.
const ER_LOCK_DEADLOCK: u16 = 1213;

const TABLES: [&str; 5] = [
    "CREATE TABLE IF NOT EXISTS {prefix}users (id VARCHAR(128) PRIMARY KEY, data BLOB NOT NULL)",
    "CREATE TABLE IF NOT EXISTS {prefix}tournaments (id VARCHAR(128) PRIMARY KEY, data BLOB NOT NULL)",
    "CREATE TABLE IF NOT EXISTS {prefix}matches (id VARCHAR(128) PRIMARY KEY, tournament_id VARCHAR(128) NOT NULL, status TINYINT UNSIGNED NOT NULL, rankings_processed BOOLEAN NOT NULL, rankings_skipped BOOLEAN NOT NULL DEFAULT FALSE, completed_at DATETIME(6) NULL, data BLOB NOT NULL, INDEX (status, rankings_processed, rankings_skipped))",
    "CREATE TABLE IF NOT EXISTS {prefix}challenges (id VARCHAR(128) PRIMARY KEY, data BLOB NOT NULL)",
    "CREATE TABLE IF NOT EXISTS {prefix}inscriptions (id VARCHAR(128) PRIMARY KEY, evento_id VARCHAR(128) NOT NULL, participante_id VARCHAR(128) NOT NULL, data BLOB NOT NULL, UNIQUE (evento_id, participante_id))",
];

/// A [`Store`] keeping every document as a JSON blob in MySQL.
///
/// Transactions lock every row they read with `SELECT ... FOR UPDATE`, so a concurrent
/// transaction reading the same document blocks until the first one finished.
#[derive(Clone, Debug)]
pub struct MySqlStore {
    pool: MySqlPool,
    table_prefix: String,
}

impl MySqlStore {
    /// Creates a new `MySqlStore`. Connections are only established when they are first used.
    pub fn connect(config: &Database) -> Result<Self, StoreError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(8)
            .max_lifetime(Duration::new(3600, 0))
            .idle_timeout(Duration::new(60, 0))
            .connect_lazy(&config.connect_string())?;

        Ok(Self {
            pool,
            table_prefix: config.prefix.clone(),
        })
    }
}

impl Store for MySqlStore {
    fn migrate(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            for table in TABLES {
                let sql = table.replace("{prefix}", &self.table_prefix);
                sqlx::query(&sql).execute(&self.pool).await?;
            }

            Ok(())
        })
    }

    fn begin(&self) -> StoreFuture<'_, Box<dyn Transaction>> {
        Box::pin(async move {
            let tx = self.pool.begin().await?;

            Ok(Box::new(MySqlTransaction {
                tx,
                table_prefix: self.table_prefix.clone(),
            }) as Box<dyn Transaction>)
        })
    }
}

struct MySqlTransaction {
    tx: sqlx::Transaction<'static, MySql>,
    table_prefix: String,
}

impl Transaction for MySqlTransaction {
    fn get_match<'a>(&'a mut self, id: &'a MatchId) -> StoreFuture<'a, Option<Match>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT data FROM {}matches WHERE id = ? FOR UPDATE",
                self.table_prefix
            );

            let row = sqlx::query(&sql)
                .bind(id.as_str())
                .fetch_optional(&mut *self.tx)
                .await?;

            row.map(|row| decode(&row)).transpose()
        })
    }

    fn get_player<'a>(&'a mut self, id: &'a PlayerId) -> StoreFuture<'a, Option<Player>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT data FROM {}users WHERE id = ? FOR UPDATE",
                self.table_prefix
            );

            let row = sqlx::query(&sql)
                .bind(id.as_str())
                .fetch_optional(&mut *self.tx)
                .await?;

            row.map(|row| decode(&row)).transpose()
        })
    }

    fn get_tournament<'a>(
        &'a mut self,
        id: &'a TournamentId,
    ) -> StoreFuture<'a, Option<Tournament>> {
        Box::pin(async move {
            // Tournaments are never written during settlement, a shared lock is enough.
            let sql = format!(
                "SELECT data FROM {}tournaments WHERE id = ? LOCK IN SHARE MODE",
                self.table_prefix
            );

            let row = sqlx::query(&sql)
                .bind(id.as_str())
                .fetch_optional(&mut *self.tx)
                .await?;

            row.map(|row| decode(&row)).transpose()
        })
    }

    fn get_challenge<'a>(&'a mut self, id: &'a ChallengeId) -> StoreFuture<'a, Option<Challenge>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT data FROM {}challenges WHERE id = ? FOR UPDATE",
                self.table_prefix
            );

            let row = sqlx::query(&sql)
                .bind(id.as_str())
                .fetch_optional(&mut *self.tx)
                .await?;

            row.map(|row| decode(&row)).transpose()
        })
    }

    fn find_inscription<'a>(
        &'a mut self,
        event: &'a EventId,
        participant: &'a PlayerId,
    ) -> StoreFuture<'a, Option<Inscription>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT data FROM {}inscriptions WHERE evento_id = ? AND participante_id = ? FOR UPDATE",
                self.table_prefix
            );

            let row = sqlx::query(&sql)
                .bind(event.as_str())
                .bind(participant.as_str())
                .fetch_optional(&mut *self.tx)
                .await?;

            row.map(|row| decode(&row)).transpose()
        })
    }

    fn unprocessed_matches(&mut self) -> StoreFuture<'_, Vec<Match>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT data FROM {}matches WHERE status = ? AND rankings_processed = FALSE AND rankings_skipped = FALSE ORDER BY completed_at ASC, id ASC FOR UPDATE",
                self.table_prefix
            );

            let mut rows = sqlx::query(&sql)
                .bind(MatchStatus::Completed.to_u8())
                .fetch(&mut *self.tx);

            let mut matches = Vec::new();
            while let Some(row) = rows.try_next().await? {
                matches.push(decode(&row)?);
            }

            Ok(matches)
        })
    }

    fn put_match<'a>(&'a mut self, m: &'a Match) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let sql = format!(
                "INSERT INTO {}matches (id, tournament_id, status, rankings_processed, rankings_skipped, completed_at, data) VALUES (?, ?, ?, ?, ?, ?, ?) ON DUPLICATE KEY UPDATE tournament_id = VALUES(tournament_id), status = VALUES(status), rankings_processed = VALUES(rankings_processed), rankings_skipped = VALUES(rankings_skipped), completed_at = VALUES(completed_at), data = VALUES(data)",
                self.table_prefix
            );

            sqlx::query(&sql)
                .bind(m.id.as_str())
                .bind(m.tournament_id.as_str())
                .bind(m.status.to_u8())
                .bind(m.rankings_processed)
                .bind(m.rankings_skipped)
                .bind(m.completed_at)
                .bind(serde_json::to_vec(m)?)
                .execute(&mut *self.tx)
                .await?;

            Ok(())
        })
    }

    fn put_player<'a>(&'a mut self, player: &'a Player) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let sql = format!(
                "INSERT INTO {}users (id, data) VALUES (?, ?) ON DUPLICATE KEY UPDATE data = VALUES(data)",
                self.table_prefix
            );

            sqlx::query(&sql)
                .bind(player.id.as_str())
                .bind(serde_json::to_vec(player)?)
                .execute(&mut *self.tx)
                .await?;

            Ok(())
        })
    }

    fn put_challenge<'a>(&'a mut self, challenge: &'a Challenge) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let sql = format!(
                "INSERT INTO {}challenges (id, data) VALUES (?, ?) ON DUPLICATE KEY UPDATE data = VALUES(data)",
                self.table_prefix
            );

            sqlx::query(&sql)
                .bind(challenge.id.as_str())
                .bind(serde_json::to_vec(challenge)?)
                .execute(&mut *self.tx)
                .await?;

            Ok(())
        })
    }

    fn put_inscription<'a>(&'a mut self, inscription: &'a Inscription) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let sql = format!(
                "INSERT INTO {}inscriptions (id, evento_id, participante_id, data) VALUES (?, ?, ?, ?) ON DUPLICATE KEY UPDATE evento_id = VALUES(evento_id), participante_id = VALUES(participante_id), data = VALUES(data)",
                self.table_prefix
            );

            sqlx::query(&sql)
                .bind(inscription.id.as_str())
                .bind(inscription.event_id.as_str())
                .bind(inscription.participant_id.as_str())
                .bind(serde_json::to_vec(inscription)?)
                .execute(&mut *self.tx)
                .await?;

            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        let this = *self;

        Box::pin(async move {
            this.tx.commit().await?;
            Ok(())
        })
    }
}

fn decode<T>(row: &MySqlRow) -> Result<T, StoreError>
where
    T: DeserializeOwned,
{
    let data: Vec<u8> = row.try_get("data")?;
    Ok(serde_json::from_slice(&data)?)
}

/// Returns `true` if `err` was caused by lock contention and the whole transaction can be
/// retried.
pub(super) fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(err) => {
            // Serialization failure
            if err.code().as_deref() == Some("40001") {
                return true;
            }

            match err.try_downcast_ref::<MySqlDatabaseError>() {
                Some(err) => matches!(err.number(), ER_LOCK_WAIT_TIMEOUT | ER_LOCK_DEADLOCK),
                None => false,
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{is_transient, TABLES};

    #[test]
    fn test_is_transient() {
        assert!(is_transient(&sqlx::Error::PoolTimedOut));
        assert!(!is_transient(&sqlx::Error::RowNotFound));
        assert!(!is_transient(&sqlx::Error::PoolClosed));
    }

    #[test]
    fn test_tables_prefixed() {
        for table in TABLES {
            let sql = table.replace("{prefix}", "tt_");
            assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS tt_"));
        }
    }
}
