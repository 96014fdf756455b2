//! Workflow, step and run types read by the pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

/// Identifier of one execution of a zap.
///
/// Run ids are UUID v7, so they sort by creation time.
///
/// # Example
///
/// ```
/// use zapflow::RunId;
///
/// let id = RunId::new();
/// let parsed: RunId = id.to_string().parse().unwrap();
/// assert_eq!(id, parsed);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Generate a fresh, time-ordered run id.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Borrow the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for RunId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an identifier issued by the CRUD layer.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_id!(
    /// Identifier of a zap (workflow).
    ZapId
);

string_id!(
    /// Identifier of the user owning a zap.
    UserId
);

/// The parts of a zap the ingestion gate needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zap {
    pub id: ZapId,
    pub user_id: UserId,
    pub active: bool,
}

/// One action of a zap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// 0-based ordinal, contiguous and unique within the zap.
    pub position: u32,
    /// Wire identifier of the action, e.g. `sendEmail`.
    pub action_kind: String,
    /// Parameter template, possibly containing `{{placeholders}}`.
    pub parameters: Value,
}

/// A recorded trigger invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    pub id: RunId,
    pub zap_id: ZapId,
    /// Trigger payload, used as the variable bag for interpolation.
    pub metadata: Value,
    pub created_at: OffsetDateTime,
}

/// A run together with its zap's steps, sorted by position.
#[derive(Debug, Clone, PartialEq)]
pub struct RunWithSteps {
    pub run: Run,
    pub steps: Vec<Step>,
}

impl RunWithSteps {
    /// Build from steps in any order.
    pub fn new(run: Run, mut steps: Vec<Step>) -> Self {
        steps.sort_by_key(|step| step.position);
        Self { run, steps }
    }

    /// The step whose position equals `stage`, if any.
    pub fn step_at(&self, stage: u32) -> Option<&Step> {
        self.steps
            .binary_search_by_key(&stage, |step| step.position)
            .ok()
            .map(|idx| &self.steps[idx])
    }

    /// Position of the final step, or `None` for a zap without steps.
    pub fn last_position(&self) -> Option<u32> {
        self.steps.last().map(|step| step.position)
    }
}
