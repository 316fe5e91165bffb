//! In-memory store.

use parking_lot::RwLock;

use super::data::StoreData;
use super::{
    AlertStore, DefinitionCommands, DeleteAlertDefinitionCommand, OrgScope, SaveAlertDefinitionCommand,
    SaveAlertInstanceCommand, UpdateAlertDefinitionCommand, UpdateAlertDefinitionPausedCommand,
};
use crate::error::Result;
use crate::types::{AlertDefinition, AlertDefinitionKey, AlertInstance};

/// A store that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<StoreData>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AlertStore for MemoryStore {
    fn list_definitions(&self, scope: &OrgScope) -> Result<Vec<AlertDefinition>> {
        Ok(self.data.read().list_definitions(scope))
    }

    fn list_instances(&self, scope: &OrgScope) -> Result<Vec<AlertInstance>> {
        Ok(self.data.read().list_instances(scope))
    }

    fn save_instance(&self, cmd: SaveAlertInstanceCommand) -> Result<()> {
        self.data.write().save_instance(cmd);
        Ok(())
    }
}

impl DefinitionCommands for MemoryStore {
    fn save_definition(&self, cmd: SaveAlertDefinitionCommand) -> Result<AlertDefinition> {
        self.data.write().save_definition(cmd)
    }

    fn update_definition(&self, cmd: UpdateAlertDefinitionCommand) -> Result<AlertDefinition> {
        self.data.write().update_definition(cmd)
    }

    fn delete_definition(&self, cmd: DeleteAlertDefinitionCommand) -> Result<()> {
        self.data.write().delete_definition(&cmd)
    }

    fn set_paused(&self, cmd: UpdateAlertDefinitionPausedCommand) -> Result<usize> {
        Ok(self.data.write().set_paused(&cmd))
    }

    fn get_definition(&self, key: &AlertDefinitionKey) -> Result<AlertDefinition> {
        self.data.read().get_definition(key)
    }
}
