//! Working state persisted between test steps

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use stratus_core::resource::{ResourceId, State, Value};

use crate::flatten::{FlatMap, flatten};

/// Everything the harness knows about the resources a test created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u32,
    /// Incremented on every write
    pub serial: u64,
    pub lineage: String,
    pub resources: Vec<ResourceState>,
}

impl StateFile {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            serial: 0,
            lineage: uuid::Uuid::new_v4().to_string(),
            resources: Vec::new(),
        }
    }

    pub fn increment_serial(&mut self) {
        self.serial += 1;
    }

    /// Find a managed resource by address
    pub fn find_resource(&self, id: &ResourceId) -> Option<&ResourceState> {
        self.find(id, false)
    }

    /// Find a data source by address
    pub fn find_data_source(&self, id: &ResourceId) -> Option<&ResourceState> {
        self.find(id, true)
    }

    /// Find an entry by address
    ///
    /// `data.type.name` names a data source; `type.name` a managed resource
    /// or, failing that, a data source.
    pub fn find_address(&self, address: &str) -> Option<&ResourceState> {
        if let Some(found) = address
            .strip_prefix("data.")
            .and_then(ResourceId::parse_address)
            .and_then(|id| self.find_data_source(&id))
        {
            return Some(found);
        }
        let id = ResourceId::parse_address(address)?;
        self.find_resource(&id).or_else(|| self.find_data_source(&id))
    }

    fn find(&self, id: &ResourceId, data_source: bool) -> Option<&ResourceState> {
        self.resources.iter().find(|r| r.matches(id, data_source))
    }

    pub fn find_resource_mut(&mut self, id: &ResourceId) -> Option<&mut ResourceState> {
        self.resources.iter_mut().find(|r| r.matches(id, false))
    }

    /// Add or replace an entry with the same address and kind
    pub fn upsert_resource(&mut self, resource: ResourceState) {
        let id = resource.id();
        match self
            .resources
            .iter_mut()
            .find(|r| r.matches(&id, resource.data_source))
        {
            Some(existing) => *existing = resource,
            None => self.resources.push(resource),
        }
    }

    /// Remove a managed resource
    pub fn remove_resource(&mut self, id: &ResourceId) -> Option<ResourceState> {
        let pos = self.resources.iter().position(|r| r.matches(id, false))?;
        Some(self.resources.remove(pos))
    }

    pub fn managed_resources(&self) -> impl DoubleEndedIterator<Item = &ResourceState> {
        self.resources.iter().filter(|r| !r.data_source)
    }

    /// Provider states of managed resources keyed by address
    pub fn managed_states(&self) -> HashMap<ResourceId, State> {
        self.managed_resources()
            .map(|r| (r.id(), r.to_state()))
            .collect()
    }

    /// States of every entry keyed by reference address
    pub fn binding_states(&self) -> HashMap<String, State> {
        self.resources
            .iter()
            .map(|r| (r.address(), r.to_state()))
            .collect()
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a single resource or data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub resource_type: String,
    pub name: String,
    /// Identifier the provider uses to read the resource back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub attributes: HashMap<String, serde_json::Value>,
    /// Replaced on the next apply
    #[serde(default)]
    pub tainted: bool,
    #[serde(default)]
    pub data_source: bool,
}

impl ResourceState {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            identifier: None,
            attributes: HashMap::new(),
            tainted: false,
            data_source: false,
        }
    }

    /// Capture a provider state
    pub fn from_state(state: &State, data_source: bool) -> Self {
        Self {
            resource_type: state.id.resource_type.clone(),
            name: state.id.name.clone(),
            identifier: state.identifier.clone(),
            attributes: state
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
            tainted: state.tainted,
            data_source,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn id(&self) -> ResourceId {
        ResourceId::new(self.resource_type.clone(), self.name.clone())
    }

    /// Address other resources use to reference this entry
    pub fn address(&self) -> String {
        if self.data_source {
            self.id().data_address()
        } else {
            self.id().to_string()
        }
    }

    fn matches(&self, id: &ResourceId, data_source: bool) -> bool {
        self.data_source == data_source
            && self.resource_type == id.resource_type
            && self.name == id.name
    }

    /// Convert back into a provider state
    pub fn to_state(&self) -> State {
        let attributes: HashMap<String, Value> = self
            .attributes
            .iter()
            .filter_map(|(k, v)| Value::from_json(v).map(|v| (k.clone(), v)))
            .collect();
        let state = State::existing(self.id(), attributes).with_tainted(self.tainted);
        match &self.identifier {
            Some(identifier) => state.with_identifier(identifier.clone()),
            None => state,
        }
    }

    /// Flattened attributes including `id`
    pub fn flat_attributes(&self) -> FlatMap {
        flatten(&self.attributes, self.identifier.as_deref())
    }
}
