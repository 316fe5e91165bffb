//! Store contents shared by the memory and file backends.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{
    DeleteAlertDefinitionCommand, OrgScope, SaveAlertDefinitionCommand, SaveAlertInstanceCommand,
    UpdateAlertDefinitionCommand, UpdateAlertDefinitionPausedCommand,
};
use crate::error::{AlertError, Result};
use crate::types::{validate_interval, validate_title, AlertDefinition, AlertDefinitionKey, AlertInstance};

/// Definitions and instance rows, keyed for ordered listing.
#[derive(Debug, Clone, Default)]
pub(super) struct StoreData {
    definitions: BTreeMap<AlertDefinitionKey, AlertDefinition>,
    /// Keyed by organization and CacheId.
    instances: BTreeMap<(i64, String), AlertInstance>,
}

/// On-disk form. Tuple map keys have no JSON representation.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(super) struct Snapshot {
    #[serde(default)]
    definitions: Vec<AlertDefinition>,
    #[serde(default)]
    instances: Vec<AlertInstance>,
}

impl StoreData {
    pub(super) fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut data = Self::default();
        for def in snapshot.definitions {
            data.definitions.insert(def.key(), def);
        }
        for instance in snapshot.instances {
            data.instances
                .insert((instance.definition_org_id, instance.cache_id()), instance);
        }
        data
    }

    pub(super) fn snapshot(&self) -> Snapshot {
        Snapshot {
            definitions: self.definitions.values().cloned().collect(),
            instances: self.instances.values().cloned().collect(),
        }
    }

    pub(super) fn list_definitions(&self, scope: &OrgScope) -> Vec<AlertDefinition> {
        self.definitions
            .values()
            .filter(|def| scope.contains(def.org_id))
            .cloned()
            .collect()
    }

    pub(super) fn list_instances(&self, scope: &OrgScope) -> Vec<AlertInstance> {
        self.instances
            .values()
            .filter(|row| scope.contains(row.definition_org_id))
            .cloned()
            .collect()
    }

    pub(super) fn save_instance(&mut self, cmd: SaveAlertInstanceCommand) {
        let instance = AlertInstance::from(cmd);
        self.instances
            .insert((instance.definition_org_id, instance.cache_id()), instance);
    }

    pub(super) fn get_definition(&self, key: &AlertDefinitionKey) -> Result<AlertDefinition> {
        self.definitions
            .get(key)
            .cloned()
            .ok_or_else(|| AlertError::DefinitionNotFound {
                key: key.to_string(),
            })
    }

    pub(super) fn save_definition(&mut self, cmd: SaveAlertDefinitionCommand) -> Result<AlertDefinition> {
        validate_title(&cmd.title)?;
        validate_interval(cmd.interval_seconds)?;

        let uid = match cmd.uid {
            Some(uid) if uid.is_empty() => {
                return Err(AlertError::InvalidDefinition {
                    reason: "uid cannot be empty".to_string(),
                });
            }
            Some(uid) => uid,
            None => Uuid::new_v4().to_string(),
        };

        let key = AlertDefinitionKey::new(cmd.org_id, uid);
        if self.definitions.contains_key(&key) {
            return Err(AlertError::DefinitionExists {
                key: key.to_string(),
            });
        }

        let def = AlertDefinition {
            org_id: key.org_id,
            uid: key.uid.clone(),
            title: cmd.title,
            condition: cmd.condition,
            interval_seconds: cmd.interval_seconds,
            paused: cmd.paused,
            version: 1,
            updated: Utc::now(),
        };
        debug!(definition = %key, interval = def.interval_seconds, "saved alert definition");
        self.definitions.insert(key, def.clone());
        Ok(def)
    }

    pub(super) fn update_definition(&mut self, cmd: UpdateAlertDefinitionCommand) -> Result<AlertDefinition> {
        let key = AlertDefinitionKey::new(cmd.org_id, cmd.uid);
        let def = self
            .definitions
            .get_mut(&key)
            .ok_or_else(|| AlertError::DefinitionNotFound {
                key: key.to_string(),
            })?;

        if let Some(title) = &cmd.title {
            validate_title(title)?;
        }
        if let Some(interval) = cmd.interval_seconds {
            validate_interval(interval)?;
        }

        if let Some(title) = cmd.title {
            def.title = title;
        }
        if let Some(condition) = cmd.condition {
            def.condition = condition;
        }
        if let Some(interval) = cmd.interval_seconds {
            def.interval_seconds = interval;
        }
        def.version += 1;
        def.updated = Utc::now();

        debug!(definition = %key, version = def.version, "updated alert definition");
        Ok(def.clone())
    }

    pub(super) fn delete_definition(&mut self, cmd: &DeleteAlertDefinitionCommand) -> Result<()> {
        let key = AlertDefinitionKey::new(cmd.org_id, cmd.uid.clone());
        if self.definitions.remove(&key).is_none() {
            return Err(AlertError::DefinitionNotFound {
                key: key.to_string(),
            });
        }

        self.instances
            .retain(|_, row| !(row.definition_org_id == key.org_id && row.definition_uid == key.uid));
        debug!(definition = %key, "deleted alert definition");
        Ok(())
    }

    pub(super) fn set_paused(&mut self, cmd: &UpdateAlertDefinitionPausedCommand) -> usize {
        let mut found = 0;
        for uid in &cmd.uids {
            let key = AlertDefinitionKey::new(cmd.org_id, uid.clone());
            if let Some(def) = self.definitions.get_mut(&key) {
                def.paused = cmd.paused;
                found += 1;
            }
        }
        found
    }
}
