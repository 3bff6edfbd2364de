//! Resource and data source handlers
//!
//! Each submodule adds `read_*`, `create_*`, `update_*` and `delete_*`
//! methods to `AwsProvider`; `lib.rs` dispatches on the resource type.

pub mod account;
pub mod data_sources;
pub mod oam;
pub mod organization;
pub mod organizational_unit;
pub mod policy;
pub mod policy_attachment;

use std::collections::HashMap;

use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::resource::{Resource, ResourceId, State, Value};

use crate::api::ApiResult;

/// A configured string attribute the handler cannot work without
pub(crate) fn required_str<'a>(resource: &'a Resource, key: &str) -> ProviderResult<&'a str> {
    resource.get_str(key).ok_or_else(|| {
        ProviderError::validation(format!("attribute '{}' is required", key))
            .for_resource(resource.id.clone())
    })
}

/// Map a not-found API error to `None`; other errors are tied to `id`
pub(crate) fn found<T>(result: ApiResult<T>, id: &ResourceId) -> ProviderResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.for_resource(id)),
    }
}

/// Boolean flag carried in prior state (write-only attributes like `skip_destroy`)
pub(crate) fn flag(state: &State, key: &str) -> bool {
    state
        .attributes
        .get(key)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Attribute map builder used by the read handlers
#[derive(Default)]
pub(crate) struct Attributes(HashMap<String, Value>);

impl Attributes {
    pub(crate) fn string(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.insert(key.to_string(), Value::String(value.into()));
        self
    }

    pub(crate) fn list(mut self, key: &str, values: Vec<String>) -> Self {
        self.0.insert(key.to_string(), Value::string_list(values));
        self
    }

    pub(crate) fn value(mut self, key: &str, value: Value) -> Self {
        self.0.insert(key.to_string(), value);
        self
    }

    pub(crate) fn into_state(self, id: &ResourceId, identifier: impl Into<String>) -> State {
        State::existing(id.clone(), self.0).with_identifier(identifier)
    }
}
