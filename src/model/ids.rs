//! Validated scalar values used throughout the job model.
//!
//! Every scalar is a newtype around `String` whose constructor checks the
//! value against a pattern. Deserialization goes through the same
//! constructor, so invalid identifiers are rejected at the wire boundary and
//! the engine never sees them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A scalar value did not match its pattern.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {type_name} '{value}': must match {pattern}")]
pub struct ValidationError {
    pub type_name: &'static str,
    pub value: String,
    pub pattern: &'static str,
}

macro_rules! scalar {
    ($(#[$doc:meta])* $name:ident, $pattern:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub const PATTERN: &'static str = $pattern;

            pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
                static RE: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
                    regex::Regex::new($pattern).expect("scalar pattern is a valid regex")
                });
                let value = value.into();
                if RE.is_match(&value) {
                    Ok(Self(value))
                } else {
                    Err(ValidationError {
                        type_name: stringify!($name),
                        value,
                        pattern: $pattern,
                    })
                }
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

scalar!(
    /// Job identity, a UUID generated when the job is created.
    JobId,
    r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$"
);
scalar!(
    /// Task identity, assigned by the submitter and unique within a job.
    TaskId,
    r"^[A-Za-z0-9][A-Za-z0-9_.:-]{0,63}$"
);
scalar!(JobName, r"^[^\p{Cc}]{1,64}$");
scalar!(TaskName, r"^[^\p{Cc}]{1,64}$");
scalar!(JobType, r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,63}$");
scalar!(TaskType, r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,63}$");
scalar!(JobApplication, r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,63}$");
scalar!(UserName, r"^[A-Za-z0-9][A-Za-z0-9_.@-]{0,63}$");
scalar!(ElementId, r"^[A-Za-z0-9][A-Za-z0-9_.:-]{0,63}$");
scalar!(ElementName, r"^[^\p{Cc}]{1,64}$");
scalar!(ElementAlias, r"^[^\p{Cc}]{1,64}$");
scalar!(ElementRole, r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,63}$");
scalar!(GroupId, r"^[A-Za-z0-9][A-Za-z0-9_.:-]{0,63}$");
scalar!(GroupName, r"^[^\p{Cc}]{1,64}$");
scalar!(GroupType, r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,63}$");

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}
