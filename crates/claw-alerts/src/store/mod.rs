//! Persistence contract for alert definitions and instance rows.
//!
//! The scheduler only reads definitions and instance rows through
//! [`AlertStore`] and writes instance rows on state transitions. Definition
//! mutations go through [`DefinitionCommands`], which the API layer calls;
//! the scheduler observes their effect on its next reconciliation.

mod data;
mod file;
mod memory;

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::state::AlertState;
use crate::types::{AlertCondition, AlertDefinition, AlertDefinitionKey, AlertInstance, InstanceState, Labels};

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// The set of organizations whose definitions are scheduled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrgScope {
    /// Every organization.
    #[default]
    All,
    /// Only the listed organizations.
    Orgs(BTreeSet<i64>),
}

impl OrgScope {
    /// Creates a scope limited to `org_ids`.
    pub fn orgs(org_ids: impl IntoIterator<Item = i64>) -> Self {
        Self::Orgs(org_ids.into_iter().collect())
    }

    /// Returns true if `org_id` is in scope.
    #[must_use]
    pub fn contains(&self, org_id: i64) -> bool {
        match self {
            Self::All => true,
            Self::Orgs(orgs) => orgs.contains(&org_id),
        }
    }
}

impl fmt::Display for OrgScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Orgs(orgs) => {
                let ids: Vec<String> = orgs.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", ids.join(", "))
            }
        }
    }
}

/// Scheduler-facing store operations.
pub trait AlertStore: Send + Sync + fmt::Debug {
    /// Lists the definitions of all organizations in `scope`, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn list_definitions(&self, scope: &OrgScope) -> Result<Vec<AlertDefinition>>;

    /// Lists the persisted instance rows of all organizations in `scope`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn list_instances(&self, scope: &OrgScope) -> Result<Vec<AlertInstance>>;

    /// Upserts one instance row.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    fn save_instance(&self, cmd: SaveAlertInstanceCommand) -> Result<()>;
}

/// Definition mutations issued by the API layer.
pub trait DefinitionCommands: Send + Sync {
    /// Creates a definition.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidDefinition` for an empty title or a
    /// negative interval, and `AlertError::DefinitionExists` if the UID is
    /// taken within the organization.
    fn save_definition(&self, cmd: SaveAlertDefinitionCommand) -> Result<AlertDefinition>;

    /// Updates a definition and bumps its version.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::DefinitionNotFound` if the definition is missing,
    /// or `AlertError::InvalidDefinition` if the new values are invalid.
    fn update_definition(&self, cmd: UpdateAlertDefinitionCommand) -> Result<AlertDefinition>;

    /// Deletes a definition together with its instance rows.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::DefinitionNotFound` if the definition is missing.
    fn delete_definition(&self, cmd: DeleteAlertDefinitionCommand) -> Result<()>;

    /// Sets the paused flag of a batch of definitions and returns how many
    /// were found.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn set_paused(&self, cmd: UpdateAlertDefinitionPausedCommand) -> Result<usize>;

    /// Fetches one definition.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::DefinitionNotFound` if the definition is missing.
    fn get_definition(&self, key: &AlertDefinitionKey) -> Result<AlertDefinition>;
}

/// Creates a new definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveAlertDefinitionCommand {
    /// Owning organization.
    pub org_id: i64,
    /// UID to use; a random one is assigned when absent.
    #[serde(default)]
    pub uid: Option<String>,
    /// Title.
    pub title: String,
    /// Evaluable condition.
    pub condition: AlertCondition,
    /// Interval in seconds.
    pub interval_seconds: i64,
    /// Initial paused flag.
    #[serde(default)]
    pub paused: bool,
}

impl SaveAlertDefinitionCommand {
    /// Creates a command with a random UID.
    pub fn new(org_id: i64, title: impl Into<String>, condition: AlertCondition, interval_seconds: i64) -> Self {
        Self {
            org_id,
            uid: None,
            title: title.into(),
            condition,
            interval_seconds,
            paused: false,
        }
    }

    /// Uses a fixed UID.
    #[must_use]
    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }
}

/// Updates selected fields of a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateAlertDefinitionCommand {
    /// Owning organization.
    pub org_id: i64,
    /// Definition UID.
    pub uid: String,
    /// New title.
    #[serde(default)]
    pub title: Option<String>,
    /// New condition.
    #[serde(default)]
    pub condition: Option<AlertCondition>,
    /// New interval in seconds.
    #[serde(default)]
    pub interval_seconds: Option<i64>,
}

impl UpdateAlertDefinitionCommand {
    /// Creates an update that changes nothing yet.
    pub fn new(org_id: i64, uid: impl Into<String>) -> Self {
        Self {
            org_id,
            uid: uid.into(),
            title: None,
            condition: None,
            interval_seconds: None,
        }
    }

    /// Sets the new interval.
    #[must_use]
    pub const fn interval_seconds(mut self, interval_seconds: i64) -> Self {
        self.interval_seconds = Some(interval_seconds);
        self
    }

    /// Sets the new title.
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the new condition.
    #[must_use]
    pub fn condition(mut self, condition: AlertCondition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// Deletes a definition by UID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteAlertDefinitionCommand {
    /// Owning organization.
    pub org_id: i64,
    /// Definition UID.
    pub uid: String,
}

impl DeleteAlertDefinitionCommand {
    /// Creates the command.
    pub fn new(org_id: i64, uid: impl Into<String>) -> Self {
        Self {
            org_id,
            uid: uid.into(),
        }
    }
}

/// Pauses or unpauses a batch of definitions of one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAlertDefinitionPausedCommand {
    /// Owning organization.
    pub org_id: i64,
    /// Definition UIDs.
    pub uids: Vec<String>,
    /// New paused flag.
    pub paused: bool,
}

impl UpdateAlertDefinitionPausedCommand {
    /// Creates the command.
    pub fn new<I, S>(org_id: i64, uids: I, paused: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            org_id,
            uids: uids.into_iter().map(Into::into).collect(),
            paused,
        }
    }
}

/// Upserts one instance row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveAlertInstanceCommand {
    /// Organization of the owning definition.
    pub definition_org_id: i64,
    /// UID of the owning definition.
    pub definition_uid: String,
    /// Instance labels.
    pub labels: Labels,
    /// Persisted state.
    pub state: InstanceState,
    /// Time of the last evaluation.
    pub last_eval_time: DateTime<Utc>,
    /// Start of the current state.
    pub current_state_since: DateTime<Utc>,
    /// Expiry of the current state.
    pub current_state_end: DateTime<Utc>,
}

impl From<&AlertState> for SaveAlertInstanceCommand {
    fn from(state: &AlertState) -> Self {
        Self {
            definition_org_id: state.org_id,
            definition_uid: state.uid.clone(),
            labels: state.labels.clone(),
            state: state.state.into(),
            last_eval_time: state.last_evaluation_time,
            current_state_since: state.starts_at,
            current_state_end: state.ends_at,
        }
    }
}

impl From<SaveAlertInstanceCommand> for AlertInstance {
    fn from(cmd: SaveAlertInstanceCommand) -> Self {
        Self {
            definition_org_id: cmd.definition_org_id,
            definition_uid: cmd.definition_uid,
            labels: cmd.labels,
            current_state: cmd.state,
            current_state_since: cmd.current_state_since,
            current_state_end: cmd.current_state_end,
            last_eval_time: cmd.last_eval_time,
        }
    }
}
