use std::env;
use std::io;
use std::net::SocketAddr;
use std::path::Path;

use jsonwebtoken::Algorithm;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use tennis_tournament_core::{EloPolicy, PolicyError};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

macro_rules! from_environment {
    ($config:expr, $($key:expr, $name:tt),*$(,)?) => {{
        $(
            {
                if let Ok(value) = env::var($key) {
                    if let Ok(value) = value.parse() {
                        $config.$name = value;
                    }
                }
            }
        )*
    }};
}

macro_rules! from_environment_error {
    ($config:expr, $($key:expr, $name:tt),*$(,)?) => {{
        $(
            let value = env::var($key).map_err(|_| ConfigError::MissingField($key))?;
            $config.$name = value.parse().map_err(|_| ConfigError::MissingField($key))?;
        )*
    }};
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub database: Database,
    pub loglevel: LevelFilter,
    pub bind: SocketAddr,

    pub authorization: Authorization,
    #[serde(default)]
    pub cron: Cron,
    #[serde(default)]
    pub rating: Rating,
    #[serde(default)]
    pub settlement: Settlement,
}

impl Config {
    pub async fn from_file<P>(path: P) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
    {
        let mut file = File::open(path).await?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;

        Ok(toml::from_slice(&buf)?)
    }

    /// Creates a complete [`Config`] instance from the environment.
    pub fn from_environment() -> Result<Self, ConfigError> {
        let mut this = Self::default();

        from_environment_error!(this, "TT_LOGLEVEL", loglevel, "TT_BIND", bind);

        this.database = Database::from_environment()?;
        this.authorization = Authorization::from_environment()?;
        this.cron = this.cron.with_environment();
        this.rating = this.rating.with_environment();
        this.settlement = this.settlement.with_environment();

        Ok(this)
    }

    pub fn with_environment(mut self) -> Self {
        from_environment!(self, "TT_LOGLEVEL", loglevel, "TT_BIND", bind);
        self.database = self.database.with_environment();
        self.authorization = self.authorization.with_environment();
        self.cron = self.cron.with_environment();
        self.rating = self.rating.with_environment();
        self.settlement = self.settlement.with_environment();

        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: Database::default(),
            loglevel: LevelFilter::Info,
            bind: SocketAddr::new([0, 0, 0, 0].into(), 3000),
            authorization: Authorization::default(),
            cron: Cron::default(),
            rating: Rating::default(),
            settlement: Settlement::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Database {
    /// Either `mysql` or `memory`.
    pub driver: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default)]
    pub prefix: String,
}

impl Database {
    pub fn connect_string(&self) -> String {
        format!(
            "{}://{}:{}@{}:{}/{}?ssl-mode=DISABLED",
            self.driver, self.user, self.password, self.host, self.port, self.database
        )
    }

    pub fn from_environment() -> Result<Self, ConfigError> {
        let mut this = Self::default();

        from_environment_error!(this, "TT_DB_DRIVER", driver);

        // The in-memory store needs no connection settings.
        if this.driver == "memory" {
            return Ok(this);
        }

        from_environment_error!(
            this,
            "TT_DB_HOST",
            host,
            "TT_DB_PORT",
            port,
            "TT_DB_USER",
            user,
            "TT_DB_PASSWORD",
            password,
            "TT_DB_DATABASE",
            database,
        );

        from_environment!(this, "TT_DB_PREFIX", prefix);

        Ok(this)
    }

    pub fn with_environment(mut self) -> Self {
        from_environment!(
            self,
            "TT_DB_DRIVER",
            driver,
            "TT_DB_HOST",
            host,
            "TT_DB_PORT",
            port,
            "TT_DB_USER",
            user,
            "TT_DB_PASSWORD",
            password,
            "TT_DB_DATABASE",
            database,
            "TT_DB_PREFIX",
            prefix,
        );

        self
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Authorization {
    pub alg: Algorithm,
    /// Shared secret of the identity provider used to sign auth tokens.
    pub secret: String,
}

impl Authorization {
    pub fn from_environment() -> Result<Self, ConfigError> {
        let mut this = Self::default();

        from_environment!(this, "TT_AUTH_ALG", alg);
        from_environment_error!(this, "TT_AUTH_SECRET", secret);

        Ok(this)
    }

    pub fn with_environment(mut self) -> Self {
        from_environment!(self, "TT_AUTH_ALG", alg, "TT_AUTH_SECRET", secret);

        self
    }
}

/// Settings of the scheduled reconciliation endpoint.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Cron {
    /// The secret the scheduler has to present. The endpoint rejects every call while empty.
    #[serde(default)]
    pub secret: String,
}

impl Cron {
    pub fn with_environment(mut self) -> Self {
        from_environment!(self, "TT_CRON_SECRET", secret);

        self
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Rating {
    pub k_factor: f64,
    /// Players rated above this use `high_rating_k_factor` instead.
    pub high_rating_threshold: Option<i64>,
    pub high_rating_k_factor: f64,
}

impl Rating {
    pub fn with_environment(mut self) -> Self {
        from_environment!(
            self,
            "TT_RATING_K_FACTOR",
            k_factor,
            "TT_RATING_HIGH_K_FACTOR",
            high_rating_k_factor,
        );

        if let Ok(value) = env::var("TT_RATING_HIGH_THRESHOLD") {
            if let Ok(value) = value.parse() {
                self.high_rating_threshold = Some(value);
            }
        }

        self
    }

    /// Returns the validated [`EloPolicy`] described by this section.
    pub fn policy(&self) -> Result<EloPolicy, PolicyError> {
        let mut policy = EloPolicy::new(self.k_factor);
        if let Some(threshold) = self.high_rating_threshold {
            policy = policy.with_high_rating(threshold, self.high_rating_k_factor);
        }

        policy.validate()?;
        Ok(policy)
    }
}

impl Default for Rating {
    fn default() -> Self {
        Self {
            k_factor: 32.0,
            high_rating_threshold: None,
            high_rating_k_factor: 16.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settlement {
    /// How often a settlement is attempted when the store reports contention.
    pub max_attempts: u32,
}

impl Settlement {
    pub fn with_environment(mut self) -> Self {
        from_environment!(self, "TT_SETTLEMENT_MAX_ATTEMPTS", max_attempts);

        self
    }
}

impl Default for Settlement {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[error("missing config field: {0}")]
    MissingField(&'static str),
}

#[cfg(test)]
mod tests {
    use std::env;

    use log::LevelFilter;
    use parking_lot::{const_mutex, Mutex};
    use tennis_tournament_core::EloPolicy;

    use super::{Config, ConfigError, Rating};

    /// Held by every test that touches the process environment.
    static ENV_LOCK: Mutex<()> = const_mutex(());

    const ENV_KEYS: [&str; 8] = [
        "TT_LOGLEVEL",
        "TT_BIND",
        "TT_DB_DRIVER",
        "TT_AUTH_SECRET",
        "TT_CRON_SECRET",
        "TT_RATING_K_FACTOR",
        "TT_RATING_HIGH_THRESHOLD",
        "TT_SETTLEMENT_MAX_ATTEMPTS",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_config_parse() {
        let input = r#"
            loglevel = "debug"
            bind = "127.0.0.1:8080"

            [database]
            driver = "mysql"
            host = "localhost"
            port = 3306
            user = "tennis"
            password = "tennis"
            database = "tennis"

            [authorization]
            alg = "HS256"
            secret = "jwt"

            [cron]
            secret = "cron"

            [rating]
            k_factor = 24
            high_rating_threshold = 2400
        "#;

        let config: Config = toml::from_str(input).unwrap();

        assert_eq!(config.loglevel, LevelFilter::Debug);
        assert_eq!(config.bind, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.database.prefix, "");
        assert_eq!(config.cron.secret, "cron");
        assert_eq!(config.settlement.max_attempts, 3);
        assert_eq!(
            config.rating.policy().unwrap(),
            EloPolicy::new(24.0).with_high_rating(2400, 16.0)
        );
    }

    #[test]
    fn test_config_defaults() {
        let input = r#"
            loglevel = "info"
            bind = "0.0.0.0:3000"

            [database]
            driver = "memory"
            host = ""
            port = 0
            user = ""
            password = ""
            database = ""

            [authorization]
            alg = "HS256"
            secret = "jwt"
        "#;

        let config: Config = toml::from_str(input).unwrap();

        assert!(config.cron.secret.is_empty());
        assert_eq!(config.rating.policy().unwrap(), EloPolicy::default());
    }

    #[test]
    fn test_config_from_environment() {
        let _guard = ENV_LOCK.lock();
        clear_env();

        env::set_var("TT_LOGLEVEL", "debug");
        env::set_var("TT_BIND", "127.0.0.1:9000");
        env::set_var("TT_DB_DRIVER", "memory");

        let err = Config::from_environment().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("TT_AUTH_SECRET")));

        env::set_var("TT_AUTH_SECRET", "jwt");
        env::set_var("TT_CRON_SECRET", "cron");
        env::set_var("TT_SETTLEMENT_MAX_ATTEMPTS", "7");

        let config = Config::from_environment().unwrap();
        clear_env();

        assert_eq!(config.loglevel, LevelFilter::Debug);
        assert_eq!(config.bind, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.database.driver, "memory");
        assert_eq!(config.authorization.secret, "jwt");
        assert_eq!(config.cron.secret, "cron");
        assert_eq!(config.settlement.max_attempts, 7);
    }

    #[test]
    fn test_config_with_environment_overrides_file() {
        let _guard = ENV_LOCK.lock();
        clear_env();

        let input = r#"
            loglevel = "info"
            bind = "0.0.0.0:3000"

            [database]
            driver = "memory"
            host = ""
            port = 0
            user = ""
            password = ""
            database = ""

            [authorization]
            alg = "HS256"
            secret = "jwt"

            [cron]
            secret = "from-file"
        "#;

        let config: Config = toml::from_str(input).unwrap();

        env::set_var("TT_BIND", "127.0.0.1:9000");
        env::set_var("TT_CRON_SECRET", "from-env");
        env::set_var("TT_RATING_K_FACTOR", "20");
        env::set_var("TT_RATING_HIGH_THRESHOLD", "2400");
        // Unparsable values keep the file's setting.
        env::set_var("TT_SETTLEMENT_MAX_ATTEMPTS", "many");

        let config = config.with_environment();
        clear_env();

        assert_eq!(config.loglevel, LevelFilter::Info);
        assert_eq!(config.bind, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.authorization.secret, "jwt");
        assert_eq!(config.cron.secret, "from-env");
        assert_eq!(config.settlement.max_attempts, 3);
        assert_eq!(
            config.rating.policy().unwrap(),
            EloPolicy::new(20.0).with_high_rating(2400, 16.0)
        );
    }

    #[test]
    fn test_rating_policy_invalid() {
        let rating = Rating {
            k_factor: -1.0,
            ..Default::default()
        };

        rating.policy().unwrap_err();
    }
}
