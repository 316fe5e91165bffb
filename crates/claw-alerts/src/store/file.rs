//! JSON file-backed store.
//!
//! The whole store is loaded on open and written back as one snapshot after
//! every mutation. Writes go to a sibling temp file that is renamed over the
//! target, so a crash mid-write never leaves a truncated snapshot.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::data::{Snapshot, StoreData};
use super::{
    AlertStore, DefinitionCommands, DeleteAlertDefinitionCommand, OrgScope, SaveAlertDefinitionCommand,
    SaveAlertInstanceCommand, UpdateAlertDefinitionCommand, UpdateAlertDefinitionPausedCommand,
};
use crate::error::{AlertError, Result};
use crate::types::{AlertDefinition, AlertDefinitionKey, AlertInstance};

/// A store persisted as a single JSON document.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    data: RwLock<StoreData>,
}

impl JsonFileStore {
    /// Opens the store at `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let snapshot = if path.exists() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                Snapshot::default()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            debug!(path = %path.display(), "store file missing, starting empty");
            Snapshot::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(StoreData::from_snapshot(snapshot)),
        })
    }

    /// Returns the path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &StoreData) -> Result<()> {
        let json = serde_json::to_string_pretty(&data.snapshot())?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            warn!(path = %self.path.display(), error = %e, "failed to replace store file");
            AlertError::store(format!("replace {}: {e}", self.path.display()))
        })
    }

    /// Applies `op` to a copy of the data and installs it once persisted.
    ///
    /// Readers never observe a change that failed to reach disk.
    fn mutate<T>(&self, op: impl FnOnce(&mut StoreData) -> Result<T>) -> Result<T> {
        let mut data = self.data.write();
        let mut next = data.clone();
        let out = op(&mut next)?;
        self.persist(&next)?;
        *data = next;
        Ok(out)
    }
}

impl AlertStore for JsonFileStore {
    fn list_definitions(&self, scope: &OrgScope) -> Result<Vec<AlertDefinition>> {
        Ok(self.data.read().list_definitions(scope))
    }

    fn list_instances(&self, scope: &OrgScope) -> Result<Vec<AlertInstance>> {
        Ok(self.data.read().list_instances(scope))
    }

    fn save_instance(&self, cmd: SaveAlertInstanceCommand) -> Result<()> {
        self.mutate(|data| {
            data.save_instance(cmd);
            Ok(())
        })
    }
}

impl DefinitionCommands for JsonFileStore {
    fn save_definition(&self, cmd: SaveAlertDefinitionCommand) -> Result<AlertDefinition> {
        self.mutate(|data| data.save_definition(cmd))
    }

    fn update_definition(&self, cmd: UpdateAlertDefinitionCommand) -> Result<AlertDefinition> {
        self.mutate(|data| data.update_definition(cmd))
    }

    fn delete_definition(&self, cmd: DeleteAlertDefinitionCommand) -> Result<()> {
        self.mutate(|data| data.delete_definition(&cmd))
    }

    fn set_paused(&self, cmd: UpdateAlertDefinitionPausedCommand) -> Result<usize> {
        self.mutate(|data| Ok(data.set_paused(&cmd)))
    }

    fn get_definition(&self, key: &AlertDefinitionKey) -> Result<AlertDefinition> {
        self.data.read().get_definition(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertCondition, ComparisonOperator, InstanceState, Labels};
    use chrono::{DateTime, Utc};
    use tempfile::TempDir;

    fn save_cmd(uid: &str) -> SaveAlertDefinitionCommand {
        let condition = AlertCondition::new("cpu_usage", ComparisonOperator::GreaterThan, 80.0).unwrap();
        SaveAlertDefinitionCommand::new(1, "High CPU", condition, 10).with_uid(uid)
    }

    #[test]
    fn missing_file_opens_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("alerts.json")).unwrap();
        assert!(store.list_definitions(&OrgScope::All).unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn mutations_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("alerts.json");

        {
            let store = JsonFileStore::open(&path).unwrap();
            store.save_definition(save_cmd("cpu")).unwrap();
            store.save_definition(save_cmd("mem")).unwrap();
            store
                .set_paused(UpdateAlertDefinitionPausedCommand::new(1, ["mem"], true))
                .unwrap();

            let mut labels = Labels::new();
            labels.insert("host".to_string(), "a".to_string());
            let now = DateTime::<Utc>::UNIX_EPOCH;
            store
                .save_instance(SaveAlertInstanceCommand {
                    definition_org_id: 1,
                    definition_uid: "cpu".to_string(),
                    labels,
                    state: InstanceState::Firing,
                    last_eval_time: now,
                    current_state_since: now,
                    current_state_end: now,
                })
                .unwrap();
        }

        let store = JsonFileStore::open(&path).unwrap();
        let defs = store.list_definitions(&OrgScope::All).unwrap();
        assert_eq!(defs.len(), 2);
        assert!(store.get_definition(&AlertDefinitionKey::new(1, "mem")).unwrap().paused);

        let rows = store.list_instances(&OrgScope::All).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cache_id(), "cpu host=a");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn failed_command_does_not_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alerts.json");
        let store = JsonFileStore::open(&path).unwrap();

        assert!(store.delete_definition(DeleteAlertDefinitionCommand::new(1, "cpu")).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn failed_write_leaves_data_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alerts.json");
        let store = JsonFileStore::open(&path).unwrap();
        store.save_definition(save_cmd("cpu")).unwrap();

        // A directory in place of the temp file makes the snapshot write fail.
        let tmp = path.with_extension("json.tmp");
        fs::create_dir(&tmp).unwrap();

        assert!(store.save_definition(save_cmd("mem")).is_err());
        assert!(store
            .set_paused(UpdateAlertDefinitionPausedCommand::new(1, ["cpu"], true))
            .is_err());

        let defs = store.list_definitions(&OrgScope::All).unwrap();
        assert_eq!(defs.len(), 1);
        assert!(!defs[0].paused);
        assert!(store.get_definition(&AlertDefinitionKey::new(1, "mem")).is_err());

        fs::remove_dir(&tmp).unwrap();
        store.save_definition(save_cmd("disk")).unwrap();
        let reopened = JsonFileStore::open(&path).unwrap();
        let uids: Vec<String> = reopened
            .list_definitions(&OrgScope::All)
            .unwrap()
            .into_iter()
            .map(|d| d.uid)
            .collect();
        assert_eq!(uids, vec!["cpu".to_string(), "disk".to_string()]);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alerts.json");
        fs::write(&path, "{not json").unwrap();

        let result = JsonFileStore::open(&path);
        assert!(matches!(result, Err(AlertError::Serialization(_))));
    }

    #[test]
    fn empty_file_opens_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alerts.json");
        fs::write(&path, "").unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        assert!(store.list_instances(&OrgScope::All).unwrap().is_empty());
    }
}
