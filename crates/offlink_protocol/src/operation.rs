//! Registry of remote operations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named remote action.
///
/// The set is closed: adapters route on it and the offline queue stores it
/// as its replay key, so every action the application can perform is
/// listed here. On the wire and on disk an operation is its dotted name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum Operation {
    /// Primary credential login.
    AuthLogin,
    /// Credential refresh using the stored refresh token.
    AuthRefresh,
    /// Fetch the current user's profile.
    UserMe,
    /// Patch the current user's profile.
    UserUpdateProfile,
    /// Upload a new avatar image for the current user.
    UserUploadAvatar,
}

impl Operation {
    /// Every registered operation, in declaration order.
    pub const ALL: [Operation; 5] = [
        Operation::AuthLogin,
        Operation::AuthRefresh,
        Operation::UserMe,
        Operation::UserUpdateProfile,
        Operation::UserUploadAvatar,
    ];

    /// Returns the stable dotted name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::AuthLogin => "auth.login",
            Operation::AuthRefresh => "auth.refresh",
            Operation::UserMe => "user.me",
            Operation::UserUpdateProfile => "user.updateProfile",
            Operation::UserUploadAvatar => "user.uploadAvatar",
        }
    }

    /// Looks an operation up by its dotted name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == name)
    }

    /// Returns true for the login and refresh calls.
    ///
    /// These never carry an access token and never trigger a refresh.
    pub fn is_auth_flow(&self) -> bool {
        matches!(self, Operation::AuthLogin | Operation::AuthRefresh)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Operation> for &'static str {
    fn from(op: Operation) -> Self {
        op.as_str()
    }
}

/// Returned when a name is not in the operation registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operation: {0}")]
pub struct UnknownOperation(pub String);

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| UnknownOperation(s.to_string()))
    }
}

impl TryFrom<String> for Operation {
    type Error = UnknownOperation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
