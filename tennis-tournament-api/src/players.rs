use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::PlayerId;

/// The rating every player starts with.
pub const DEFAULT_RANK_POINTS: i64 = 1000;

/// A registered user of the platform, stored in the `users` collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub global_wins: u32,
    #[serde(default)]
    pub global_losses: u32,
    /// Elo rating.
    #[serde(default = "default_rank_points")]
    pub rank_points: i64,
    #[serde(default)]
    pub role: Role,
}

impl Player {
    /// Creates a new `Player` with an empty record and the default rating.
    pub fn new<T>(id: T, display_name: &str) -> Self
    where
        T: Into<PlayerId>,
    {
        Self {
            id: id.into(),
            display_name: display_name.to_owned(),
            global_wins: 0,
            global_losses: 0,
            rank_points: DEFAULT_RANK_POINTS,
            role: Role::Player,
        }
    }
}

fn default_rank_points() -> i64 {
    DEFAULT_RANK_POINTS
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    Player,
}

impl Role {
    #[inline]
    pub fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Admin => "admin",
            Self::Player => "player",
        })
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "player" => Ok(Self::Player),
            _ => Err(UnknownRole(s.to_owned())),
        }
    }
}

#[derive(Clone, Debug, Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

#[cfg(test)]
mod tests {
    use super::{Player, Role, DEFAULT_RANK_POINTS};

    #[test]
    fn test_player_defaults() {
        let player: Player = serde_json::from_str(r#"{"id":"p1"}"#).unwrap();

        assert_eq!(player.rank_points, DEFAULT_RANK_POINTS);
        assert_eq!(player.global_wins, 0);
        assert_eq!(player.role, Role::Player);
    }

    #[test]
    fn test_player_wire_names() {
        let player: Player = serde_json::from_str(
            r#"{"id":"p1","displayName":"Ana","globalWins":4,"globalLosses":2,"rankPoints":1090,"role":"admin"}"#,
        )
        .unwrap();

        assert_eq!(player.display_name, "Ana");
        assert_eq!(player.global_wins, 4);
        assert_eq!(player.global_losses, 2);
        assert_eq!(player.rank_points, 1090);
        assert!(player.role.is_admin());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("player".parse::<Role>().unwrap(), Role::Player);
        "owner".parse::<Role>().unwrap_err();
    }
}
