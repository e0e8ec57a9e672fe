//! Value objects: identifiers, timestamps and credentials.

use std::fmt;

use thiserror::Error;

/// Errors raised when constructing a value object from untrusted input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// An identifier was empty or whitespace only
    #[error("{0} must not be empty")]
    EmptyId(&'static str),
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier, rejecting empty values
            pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(DomainError::EmptyId($label));
                }
                Ok(Self(value))
            }

            /// Borrow the identifier as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the identifier and return the inner string
            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = DomainError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }
    };
}

string_id!(
    /// Identifier of a room (a project chat)
    RoomId,
    "room id"
);
string_id!(
    /// Identifier of a single chat message
    MessageId,
    "message id"
);
string_id!(
    /// Identifier of a backend user
    UserId,
    "user id"
);

/// Unix timestamp in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Wrap a millisecond Unix timestamp
    pub fn new(millis: i64) -> Self {
        Self(millis)
    }

    /// Milliseconds since the Unix epoch
    pub fn value(&self) -> i64 {
        self.0
    }
}

/// Correlation id pairing an outgoing method call with its result.
///
/// Allocated from a counter that is never reset while the client lives, so an
/// id is unique for the lifetime of every connection the client opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(u64);

impl CallId {
    /// Wrap a raw counter value
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Parse the string form used on the wire
    pub fn parse(raw: &str) -> Option<Self> {
        raw.parse().ok().map(Self)
    }

    /// Raw counter value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Credentials handed to the core by the hosting page
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Backend user id
    pub user_id: UserId,
    /// Resume token used by the login handshake
    pub token: String,
}

impl Credentials {
    /// Build credentials from raw values.
    ///
    /// Returns `None` when either part is missing, which callers treat as
    /// "no credentials available".
    pub fn from_parts(user_id: &str, token: &str) -> Option<Self> {
        if token.trim().is_empty() {
            return None;
        }
        let user_id = UserId::new(user_id).ok()?;
        Some(Self {
            user_id,
            token: token.to_string(),
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("token", &"<redacted>")
            .finish()
    }
}
