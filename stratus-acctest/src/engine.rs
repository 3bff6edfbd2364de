//! In-process apply engine driving a provider from a configuration
//!
//! Each command takes the working-state lock for its whole duration. State is
//! written back after refresh, apply, import (when persisted), taint and
//! destroy, even when the command fails half way.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use log::{debug, info, warn};
use stratus_core::differ::{
    Diff, ambiguous_names, build_binding_map, create_plan, diff, get_resource_dependencies,
    resolve_refs, resolve_resource, sort_by_dependencies,
};
use stratus_core::plan::Plan;
use stratus_core::provider::Provider;
use stratus_core::resource::{Resource, ResourceId, State, Value};
use stratus_core::schema::ResourceSchema;

use crate::backend::{InMemoryBackend, StateBackend};
use crate::error::{AccResult, AccTestError};
use crate::lock::Command;
use crate::state::{ResourceState, StateFile};

pub struct Engine {
    provider: Arc<dyn Provider>,
    backend: Arc<dyn StateBackend>,
}

impl Engine {
    pub fn new(provider: Arc<dyn Provider>, backend: Arc<dyn StateBackend>) -> Self {
        Self { provider, backend }
    }

    /// Engine keeping its working state in memory
    pub fn in_memory(provider: Arc<dyn Provider>) -> Self {
        Self::new(provider, Arc::new(InMemoryBackend::new()))
    }

    pub fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    pub fn backend(&self) -> &dyn StateBackend {
        self.backend.as_ref()
    }

    /// Current working state, empty before the first write
    pub async fn state(&self) -> AccResult<StateFile> {
        Ok(self.backend.read_state().await?.unwrap_or_default())
    }

    /// Check every declared resource against the provider schema
    ///
    /// References by a bare name that several resources declare are
    /// rejected.
    pub fn validate(&self, config: &[Resource]) -> AccResult<()> {
        let ambiguous = ambiguous_names(config);
        for resource in config {
            let mut deps: Vec<String> = get_resource_dependencies(resource).into_iter().collect();
            deps.sort();
            if let Some(binding) = deps.into_iter().find(|d| ambiguous.contains(d.as_str())) {
                return Err(AccTestError::AmbiguousReference {
                    address: resource.address(),
                    binding,
                });
            }

            let schema = if resource.is_data_source() {
                self.provider.data_source_schema_for(&resource.id.resource_type)
            } else {
                self.provider.schema_for(&resource.id.resource_type)
            };
            let schema =
                schema.ok_or_else(|| AccTestError::UnsupportedType(resource.id.to_string()))?;
            schema
                .validate(&resource.attributes)
                .map_err(|errors| AccTestError::Schema {
                    address: resource.id.to_string(),
                    errors,
                })?;
        }
        Ok(())
    }

    /// Re-read every resource in state and every readable data source
    pub async fn refresh(&self, config: &[Resource]) -> AccResult<()> {
        self.locked(Command::Refresh, async {
            let mut state = self.state().await?;
            let result = self.refresh_state(&mut state, config).await;
            self.save(&mut state).await?;
            result
        })
        .await
    }

    /// Changes needed to reach `config`, optionally refreshing first
    ///
    /// A refresh done for planning is not persisted.
    pub async fn plan(&self, config: &[Resource], refresh: bool) -> AccResult<Plan> {
        self.locked(Command::Plan, async {
            self.validate(config)?;
            let mut state = self.state().await?;
            if refresh {
                self.refresh_state(&mut state, config).await?;
            }
            let mut desired = config.to_vec();
            resolve_refs(&mut desired, &state.binding_states());
            Ok(create_plan(&desired, &state.managed_states(), &self.schemas()))
        })
        .await
    }

    /// Validate, refresh, and converge remote objects on `config`
    pub async fn apply(&self, config: &[Resource]) -> AccResult<()> {
        self.locked(Command::Apply, async {
            self.validate(config)?;
            let mut state = self.state().await?;
            let result = self.apply_config(&mut state, config).await;
            self.save(&mut state).await?;
            result
        })
        .await
    }

    /// Import a remote object, recording it in state when `persist` is set
    pub async fn import(&self, id: &ResourceId, import_id: &str, persist: bool) -> AccResult<State> {
        self.locked(Command::Import, async {
            info!("importing {} from {}", id, import_id);
            let imported = self
                .provider
                .import(id, import_id)
                .await
                .map_err(AccTestError::provider("import"))?;
            if persist {
                let mut state = self.state().await?;
                state.upsert_resource(ResourceState::from_state(&imported, false));
                self.save(&mut state).await?;
            }
            Ok(imported)
        })
        .await
    }

    /// Mark resources for replacement on the next apply
    pub async fn taint(&self, addresses: &[String]) -> AccResult<()> {
        if addresses.is_empty() {
            return Ok(());
        }
        self.locked(Command::Taint, async {
            let mut state = self.state().await?;
            for address in addresses {
                let id = ResourceId::parse_address(address)
                    .ok_or_else(|| AccTestError::NotInState(address.clone()))?;
                let entry = state
                    .find_resource_mut(&id)
                    .ok_or_else(|| AccTestError::NotInState(address.clone()))?;
                entry.tainted = true;
                info!("{} tainted", address);
            }
            self.save(&mut state).await
        })
        .await
    }

    /// Delete every managed resource in state
    ///
    /// Resources declared in `config` go first, dependents before what they
    /// depend on; anything else follows in reverse creation order.
    pub async fn destroy(&self, config: &[Resource]) -> AccResult<()> {
        self.locked(Command::Destroy, async {
            let mut state = self.state().await?;
            let result = self.destroy_state(&mut state, config).await;
            self.save(&mut state).await?;
            result
        })
        .await
    }

    async fn locked<T>(
        &self,
        command: Command,
        body: impl Future<Output = AccResult<T>>,
    ) -> AccResult<T> {
        let lock = self.backend.acquire_lock(command).await?;
        debug!("{}: acquired state lock {}", command, lock.id);
        let result = body.await;
        let released = self.backend.release_lock(&lock).await;
        let value = result?;
        released?;
        Ok(value)
    }

    async fn save(&self, state: &mut StateFile) -> AccResult<()> {
        state.increment_serial();
        self.backend.write_state(state).await
    }

    fn schemas(&self) -> HashMap<String, ResourceSchema> {
        self.provider
            .resource_types()
            .into_iter()
            .map(|t| (t.name().to_string(), t.schema()))
            .collect()
    }

    async fn refresh_state(&self, state: &mut StateFile, config: &[Resource]) -> AccResult<()> {
        let schemas = self.schemas();
        let entries: Vec<ResourceState> = state.managed_resources().cloned().collect();

        for entry in entries {
            let id = entry.id();
            let prior = entry.to_state();
            let fresh = self
                .provider
                .read(&id, entry.identifier.as_deref())
                .await
                .map_err(AccTestError::provider("refresh"))?;

            if !fresh.exists {
                warn!("{} no longer exists, removing it from state", id);
                state.remove_resource(&id);
                continue;
            }

            let fresh = carry_write_only(fresh, &prior.attributes, schemas.get(&id.resource_type))
                .with_tainted(prior.tainted);
            state.upsert_resource(ResourceState::from_state(&fresh, false));
        }

        for resource in sort_by_dependencies(config)
            .iter()
            .filter(|r| r.is_data_source())
        {
            let bindings = build_binding_map(config, &state.binding_states());
            let resolved = resolve_resource(resource, &bindings);
            if has_unresolved_ref(&resolved) {
                debug!("{}: deferring read until its references are known", resolved.id);
                continue;
            }
            self.read_data_source(state, &resolved).await?;
        }
        Ok(())
    }

    async fn read_data_source(&self, state: &mut StateFile, resource: &Resource) -> AccResult<()> {
        debug!("reading data source {}", resource.id);
        let read = self
            .provider
            .read_data_source(resource)
            .await
            .map_err(AccTestError::provider("read data source"))?;
        state.upsert_resource(ResourceState::from_state(&read, true));
        Ok(())
    }

    async fn apply_config(&self, state: &mut StateFile, config: &[Resource]) -> AccResult<()> {
        self.refresh_state(state, config).await?;
        let schemas = self.schemas();
        let sorted = sort_by_dependencies(config);

        for resource in &sorted {
            let bindings = build_binding_map(&sorted, &state.binding_states());
            let mut desired = resolve_resource(resource, &bindings);
            if has_unresolved_ref(&desired) {
                return Err(AccTestError::UnresolvedReference(desired.id.to_string()));
            }
            if desired.is_data_source() {
                self.read_data_source(state, &desired).await?;
                continue;
            }

            let schema = schemas.get(&desired.id.resource_type);
            if let Some(schema) = schema {
                schema.apply_defaults(&mut desired.attributes);
            }
            let current = state
                .find_resource(&desired.id)
                .map(ResourceState::to_state)
                .unwrap_or_else(|| State::not_found(desired.id.clone()));

            match diff(&desired, &current, schema) {
                Diff::NoChange(id) => debug!("{}: no changes", id),
                Diff::Create(to) => self.create(state, &to, schema).await?,
                Diff::Update {
                    id,
                    from,
                    to,
                    changed_attributes,
                } => {
                    info!("updating {} ({})", id, changed_attributes.join(", "));
                    let identifier = from
                        .identifier
                        .clone()
                        .ok_or_else(|| AccTestError::NotInState(id.to_string()))?;
                    let updated = self
                        .provider
                        .update(&id, &identifier, &from, &to)
                        .await
                        .map_err(AccTestError::provider("apply"))?;
                    let updated = carry_write_only(updated, &to.attributes, schema);
                    state.upsert_resource(ResourceState::from_state(&updated, false));
                }
                Diff::Replace {
                    id,
                    from,
                    to,
                    changed_attributes,
                } => {
                    info!("replacing {} ({})", id, changed_attributes.join(", "));
                    self.delete(state, &from).await?;
                    self.create(state, &to, schema).await?;
                }
            }
        }

        let declared: Vec<&ResourceId> = config
            .iter()
            .filter(|r| !r.is_data_source())
            .map(|r| &r.id)
            .collect();
        let orphans: Vec<State> = state
            .managed_resources()
            .rev()
            .filter(|r| !declared.contains(&&r.id()))
            .map(ResourceState::to_state)
            .collect();
        for orphan in orphans {
            self.delete(state, &orphan).await?;
        }
        Ok(())
    }

    async fn create(
        &self,
        state: &mut StateFile,
        resource: &Resource,
        schema: Option<&ResourceSchema>,
    ) -> AccResult<()> {
        info!("creating {}", resource.id);
        let created = self
            .provider
            .create(resource)
            .await
            .map_err(AccTestError::provider("apply"))?;
        let created = carry_write_only(created, &resource.attributes, schema);
        state.upsert_resource(ResourceState::from_state(&created, false));
        Ok(())
    }

    async fn delete(&self, state: &mut StateFile, current: &State) -> AccResult<()> {
        if let Some(identifier) = &current.identifier {
            info!("deleting {}", current.id);
            match self.provider.delete(&current.id, identifier, current).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => warn!("{} was already gone", current.id),
                Err(e) => return Err(AccTestError::provider("delete")(e)),
            }
        }
        state.remove_resource(&current.id);
        Ok(())
    }

    async fn destroy_state(&self, state: &mut StateFile, config: &[Resource]) -> AccResult<()> {
        let mut order: Vec<ResourceId> = sort_by_dependencies(config)
            .into_iter()
            .rev()
            .filter(|r| !r.is_data_source())
            .map(|r| r.id)
            .collect();
        let remaining: Vec<ResourceId> = state
            .managed_resources()
            .rev()
            .map(ResourceState::id)
            .filter(|id| !order.contains(id))
            .collect();
        order.extend(remaining);

        for id in order {
            let Some(current) = state.find_resource(&id).map(ResourceState::to_state) else {
                continue;
            };
            self.delete(state, &current).await?;
        }
        state.resources.retain(|r| !r.data_source);
        Ok(())
    }
}

fn has_unresolved_ref(resource: &Resource) -> bool {
    resource.attributes.values().any(Value::has_unresolved_ref)
}

/// Copy write-only attributes the provider cannot read back
fn carry_write_only(
    mut state: State,
    source: &HashMap<String, Value>,
    schema: Option<&ResourceSchema>,
) -> State {
    let Some(schema) = schema else {
        return state;
    };
    for name in schema.write_only_attributes() {
        if let Some(value) = source.get(name) {
            state
                .attributes
                .entry(name.to_string())
                .or_insert_with(|| value.clone());
        }
    }
    state
}
