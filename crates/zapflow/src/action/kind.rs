use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The actions a step can perform.
///
/// The wire identifier (what a step stores in `action_kind`) is the
/// camelCase name, e.g. `sendEmail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    /// Send an email over SMTP.
    SendEmail,
    /// Send a Telegram chat message.
    SendTelegram,
}

impl ActionKind {
    /// Every supported kind.
    pub const ALL: [ActionKind; 2] = [ActionKind::SendEmail, ActionKind::SendTelegram];

    /// The wire identifier for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::SendEmail => "sendEmail",
            ActionKind::SendTelegram => "sendTelegram",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no [`ActionKind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported action kind: {0}")]
pub struct UnknownActionKind(pub String);

impl FromStr for ActionKind {
    type Err = UnknownActionKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownActionKind(s.to_owned()))
    }
}
