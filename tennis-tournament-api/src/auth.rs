use serde::{Deserialize, Serialize};

use crate::id::PlayerId;
use crate::players::Role;

/// The claims carried by an auth token.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Claims {
    /// Subject
    pub sub: PlayerId,
    pub role: Role,
    /// Issued At
    pub iat: u64,
    /// Expiration time
    pub exp: u64,
    /// Not before time
    pub nbf: u64,
}

impl Claims {
    pub fn new(sub: PlayerId, role: Role) -> Self {
        Self {
            sub,
            role,
            iat: 0,
            exp: 0,
            nbf: 0,
        }
    }
}
