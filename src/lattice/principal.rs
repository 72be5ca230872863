//! Principals: origin-identified authorities.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::{Origin, Url};
use uuid::Uuid;

use super::LabelError;

/// Scheme used for principal strings that are not URLs themselves.
pub const ROLE_SCHEME: &str = "role";

/// Identity that can own authority or be a flow endpoint.
///
/// Two principals are equal iff their canonical origins are equal, and they
/// order lexicographically by origin, which gives roles a canonical form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Principal {
    origin: String,
}

impl Principal {
    /// Resolve a principal from a URI string.
    ///
    /// Absolute URLs keep their origin (`https://a.com/x` becomes
    /// `https://a.com`). Anything else is retried under the `role:` scheme,
    /// so `"alice"` becomes `role:alice`.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::InvalidPrincipal`] for blank input or input the
    /// URL parser rejects under both readings.
    pub fn parse(input: &str) -> Result<Self, LabelError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(LabelError::InvalidPrincipal {
                input: input.to_owned(),
                reason: "principal must not be empty".to_owned(),
            });
        }

        let url = match Url::parse(trimmed) {
            Ok(url) => url,
            Err(_) => Url::parse(&format!("{ROLE_SCHEME}:{trimmed}")).map_err(|e| {
                LabelError::InvalidPrincipal {
                    input: input.to_owned(),
                    reason: e.to_string(),
                }
            })?,
        };

        Ok(Self::from_url(&url))
    }

    /// Principal for an already parsed URL.
    pub fn from_url(url: &Url) -> Self {
        let origin = match url.origin() {
            origin @ Origin::Tuple(..) => origin.ascii_serialization(),
            Origin::Opaque(_) => url.as_str().to_owned(),
        };
        Self { origin }
    }

    /// A principal nobody else holds, for minting fresh authority.
    pub fn fresh() -> Self {
        Self {
            origin: format!("urn:uuid:{}", Uuid::new_v4()),
        }
    }

    /// Canonical origin string.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Whether this principal names a network origin (`http`/`https`).
    pub fn is_web_origin(&self) -> bool {
        self.origin.starts_with("http://") || self.origin.starts_with("https://")
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.origin)
    }
}

impl TryFrom<String> for Principal {
    type Error = LabelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Principal> for String {
    fn from(value: Principal) -> Self {
        value.origin
    }
}

impl std::str::FromStr for Principal {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
