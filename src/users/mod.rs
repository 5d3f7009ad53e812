//! Parsing of the declarative `SFTP_USERS` list.
//!
//! The list is a comma-separated sequence of `username:password[:ro]`
//! entries. A third field equal to `ro` marks the account read-only; any
//! other third field is accepted and treated as read-write.

use std::collections::HashSet;
use std::fmt;

use thiserror::Error;
use tracing::debug;

/// Third field value that enables read-only mode.
pub const READ_ONLY_FLAG: &str = "ro";

/// A single declared SFTP account.
#[derive(Clone, Eq, PartialEq)]
pub struct UserSpec {
    /// Account name, also used for the chroot directory.
    pub username: String,
    /// Plain-text password applied with `chpasswd`.
    pub password: String,
    /// Whether the session is forced into `internal-sftp -R`.
    pub read_only: bool,
}

impl UserSpec {
    /// Builds a spec from its parts.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>, read_only: bool) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            read_only,
        }
    }

    /// Short access label used in logs.
    #[must_use]
    pub const fn access_label(&self) -> &'static str {
        if self.read_only { "ro" } else { "rw" }
    }
}

impl fmt::Debug for UserSpec {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("UserSpec")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("read_only", &self.read_only)
            .finish()
    }
}

/// Errors raised while parsing the user list.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum UserSpecError {
    /// Raised when the list is empty after trimming.
    #[error("SFTP_USERS is empty")]
    Empty,
    /// Raised when the list contains characters outside the accepted set.
    #[error("SFTP_USERS contains invalid character {character:?}")]
    InvalidCharacters {
        /// First offending character.
        character: char,
    },
    /// Raised when an entry does not have two or three colon-separated fields.
    #[error("invalid SFTP_USERS format in entry {position}: expected user:password[:ro]")]
    InvalidFormat {
        /// One-based position of the entry in the list.
        position: usize,
    },
    /// Raised when a username is not safe to use as an account and path name.
    #[error(
        "invalid username {username:?} in entry {position}: use letters, digits, '_', '.' or '-', not starting with '.' or '-'"
    )]
    InvalidUsername {
        /// Rejected username.
        username: String,
        /// One-based position of the entry in the list.
        position: usize,
    },
    /// Raised when a username appears more than once.
    #[error("duplicate username: {username}")]
    DuplicateUser {
        /// Repeated username.
        username: String,
    },
}

/// Returns `true` for characters accepted in the raw user list.
#[must_use]
pub const fn is_allowed_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | ':' | '@' | '/' | '.' | ',')
}

/// Returns `true` when `username` can be used both as an account name and
/// as a single path component under the home root.
///
/// Accepts `[A-Za-z0-9_.-]` with no leading `.` or `-`, so `.`, `..` and
/// option-like names never reach the host.
#[must_use]
pub fn is_safe_username(username: &str) -> bool {
    !username.starts_with(['.', '-'])
        && username
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-'))
}

/// Rejects user lists containing characters outside `[A-Za-z0-9_-:@/.,]`.
///
/// # Errors
///
/// Returns [`UserSpecError::Empty`] or [`UserSpecError::InvalidCharacters`].
pub fn validate_charset(raw: &str) -> Result<(), UserSpecError> {
    if raw.trim().is_empty() {
        return Err(UserSpecError::Empty);
    }
    match raw.chars().find(|ch| !is_allowed_char(*ch)) {
        Some(character) => Err(UserSpecError::InvalidCharacters { character }),
        None => Ok(()),
    }
}

/// Parses the user list into specs, preserving input order.
///
/// # Errors
///
/// Returns [`UserSpecError::InvalidFormat`] when an entry has the wrong
/// arity or an empty username/password, [`UserSpecError::InvalidUsername`]
/// when a username is not a safe path component, and
/// [`UserSpecError::DuplicateUser`] when a username repeats.
pub fn parse_users(raw: &str) -> Result<Vec<UserSpec>, UserSpecError> {
    if raw.trim().is_empty() {
        return Err(UserSpecError::Empty);
    }

    let mut seen = HashSet::new();
    let mut specs = Vec::new();
    for (index, entry) in raw.split(',').enumerate() {
        let spec = parse_entry(entry, index + 1)?;
        if !seen.insert(spec.username.clone()) {
            return Err(UserSpecError::DuplicateUser {
                username: spec.username,
            });
        }
        specs.push(spec);
    }
    Ok(specs)
}

fn parse_entry(entry: &str, position: usize) -> Result<UserSpec, UserSpecError> {
    let fields: Vec<&str> = entry.split(':').collect();
    let (username, password, mode) = match fields.as_slice() {
        [username, password] => (*username, *password, None),
        [username, password, mode] => (*username, *password, Some(*mode)),
        _ => return Err(UserSpecError::InvalidFormat { position }),
    };
    if username.is_empty() || password.is_empty() {
        return Err(UserSpecError::InvalidFormat { position });
    }
    if !is_safe_username(username) {
        return Err(UserSpecError::InvalidUsername {
            username: username.to_owned(),
            position,
        });
    }

    let read_only = mode == Some(READ_ONLY_FLAG);
    if let Some(other) = mode.filter(|value| *value != READ_ONLY_FLAG) {
        debug!(username, mode = other, "unrecognised access mode, using read-write");
    }

    Ok(UserSpec::new(username, password, read_only))
}

#[cfg(test)]
mod tests;
