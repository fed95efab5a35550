use std::borrow::Borrow;
use std::convert::Infallible;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Document ids are opaque strings assigned by the store.
macro_rules! id {
    ($name:ident) => {
        #[derive(
            Clone,
            Debug,
            Default,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Serialize,
            Deserialize,
        )]
        #[repr(transparent)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            #[inline]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl Display for $name {
            #[inline]
            fn fmt(&self, f: &mut Formatter) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl AsRef<str> for $name {
            #[inline]
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            #[inline]
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            #[inline]
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl From<String> for $name {
            #[inline]
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            #[inline]
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl FromStr for $name {
            type Err = Infallible;

            #[inline]
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }
    };
}

id!(PlayerId);
id!(TournamentId);
id!(MatchId);
id!(ChallengeId);
id!(InscriptionId);
id!(EventId);

#[cfg(test)]
mod tests {
    use super::{MatchId, PlayerId};

    use serde_test::{assert_tokens, Token};

    #[test]
    fn test_id_serde() {
        assert_tokens(&MatchId::from("m-17"), &[Token::Str("m-17")]);
    }

    #[test]
    fn test_id_compare() {
        let id: PlayerId = "ana".parse().unwrap();

        assert!(id == *"ana");
        assert_eq!(id.to_string(), "ana");
        assert!(!id.is_empty());
        assert!(PlayerId::default().is_empty());
    }
}
