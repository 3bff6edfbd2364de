//! Stratus AWS Provider
//!
//! AWS Organizations and CloudWatch Observability Access Manager resources

pub mod api;
pub mod config;
pub mod resources;
pub mod schemas;
pub mod validation;
pub mod wait;

use std::collections::HashMap;
use std::sync::Arc;

use stratus_core::provider::{
    BoxFuture, Provider, ProviderError, ProviderResult, ResourceType,
};
use stratus_core::resource::{Resource, ResourceId, State, Value};
use stratus_core::schema::ResourceSchema;

use crate::api::memory::MemoryBackend;
use crate::api::sdk::SdkBackend;
use crate::api::{OamApi, OrganizationsApi};
use crate::config::{ConfigError, ProviderConfig};
use crate::schemas::oam::{LINK, SINK, SINK_POLICY, SINKS};
use crate::schemas::organizations::{
    ACCOUNT, ORGANIZATION, ORGANIZATIONAL_UNIT, ORGANIZATIONAL_UNITS, POLICY, POLICY_ATTACHMENT,
};

/// A resource or data source type backed by a schema constructor
pub struct AwsResourceType {
    name: &'static str,
    schema: fn() -> ResourceSchema,
}

impl ResourceType for AwsResourceType {
    fn name(&self) -> &'static str {
        self.name
    }

    fn schema(&self) -> ResourceSchema {
        (self.schema)()
    }
}

fn resource_type(name: &'static str, schema: fn() -> ResourceSchema) -> Box<dyn ResourceType> {
    Box::new(AwsResourceType { name, schema })
}

/// AWS Provider
pub struct AwsProvider {
    pub(crate) organizations: Arc<dyn OrganizationsApi>,
    pub(crate) oam: Arc<dyn OamApi>,
    pub(crate) config: ProviderConfig,
}

impl AwsProvider {
    /// Create a provider that talks to AWS
    pub async fn new(config: ProviderConfig) -> Self {
        let backend = Arc::new(SdkBackend::new(&config).await);
        Self::with_backends(backend.clone(), backend, config)
    }

    /// Create a provider from provider block attributes
    pub async fn from_attributes(attributes: &HashMap<String, Value>) -> Result<Self, ConfigError> {
        let config = ProviderConfig::from_attributes(attributes)?;
        Ok(Self::new(config).await)
    }

    /// Create with specific backends (for testing)
    pub fn with_backends(
        organizations: Arc<dyn OrganizationsApi>,
        oam: Arc<dyn OamApi>,
        config: ProviderConfig,
    ) -> Self {
        Self {
            organizations,
            oam,
            config,
        }
    }

    /// Provider over an in-memory backend with short poll intervals
    pub fn memory(backend: Arc<MemoryBackend>) -> Self {
        Self::with_backends(backend.clone(), backend, ProviderConfig::for_testing())
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

fn unknown_type(id: &ResourceId) -> ProviderError {
    ProviderError::validation(format!("Unknown resource type: {}", id.resource_type))
        .for_resource(id.clone())
}

impl Provider for AwsProvider {
    fn name(&self) -> &'static str {
        "aws"
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        vec![
            resource_type(ORGANIZATION, schemas::organizations::organization),
            resource_type(ORGANIZATIONAL_UNIT, schemas::organizations::organizational_unit),
            resource_type(ACCOUNT, schemas::organizations::account),
            resource_type(POLICY, schemas::organizations::policy),
            resource_type(POLICY_ATTACHMENT, schemas::organizations::policy_attachment),
            resource_type(SINK, schemas::oam::sink),
            resource_type(SINK_POLICY, schemas::oam::sink_policy),
            resource_type(LINK, schemas::oam::link),
        ]
    }

    fn data_source_types(&self) -> Vec<Box<dyn ResourceType>> {
        vec![
            resource_type(SINK, schemas::oam::sink_data_source),
            resource_type(SINKS, schemas::oam::sinks_data_source),
            resource_type(ORGANIZATIONAL_UNITS, schemas::organizations::organizational_units),
        ]
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.map(String::from);
        Box::pin(async move {
            let Some(identifier) = identifier else {
                return Ok(State::not_found(id));
            };
            match id.resource_type.as_str() {
                ORGANIZATION => self.read_organization(&id, &identifier).await,
                ORGANIZATIONAL_UNIT => self.read_organizational_unit(&id, &identifier).await,
                ACCOUNT => self.read_account(&id, &identifier).await,
                POLICY => self.read_policy(&id, &identifier).await,
                POLICY_ATTACHMENT => self.read_policy_attachment(&id, &identifier).await,
                SINK => self.read_sink(&id, &identifier).await,
                SINK_POLICY => self.read_sink_policy(&id, &identifier).await,
                LINK => self.read_link(&id, &identifier).await,
                _ => Err(unknown_type(&id)),
            }
        })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move {
            match resource.id.resource_type.as_str() {
                ORGANIZATION => self.create_organization(&resource).await,
                ORGANIZATIONAL_UNIT => self.create_organizational_unit(&resource).await,
                ACCOUNT => self.create_account(&resource).await,
                POLICY => self.create_policy(&resource).await,
                POLICY_ATTACHMENT => self.create_policy_attachment(&resource).await,
                SINK => self.create_sink(&resource).await,
                SINK_POLICY => self.put_sink_policy(&resource).await,
                LINK => self.create_link(&resource).await,
                _ => Err(unknown_type(&resource.id)),
            }
        })
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let from = from.clone();
        let to = to.clone();
        Box::pin(async move {
            match id.resource_type.as_str() {
                ORGANIZATION => self.update_organization(&id, &identifier, &to).await,
                ORGANIZATIONAL_UNIT => {
                    self.update_organizational_unit(&id, &identifier, &from, &to)
                        .await
                }
                ACCOUNT => self.update_account(&id, &identifier, &from, &to).await,
                POLICY => self.update_policy(&id, &identifier, &to).await,
                // Every configurable attribute besides skip_destroy forces replacement
                POLICY_ATTACHMENT => self.read_policy_attachment(&id, &identifier).await,
                SINK => self.read_sink(&id, &identifier).await,
                SINK_POLICY => self.put_sink_policy(&to).await,
                LINK => self.update_link(&id, &identifier, &to).await,
                _ => Err(unknown_type(&id)),
            }
        })
    }

    fn delete(
        &self,
        id: &ResourceId,
        identifier: &str,
        state: &State,
    ) -> BoxFuture<'_, ProviderResult<()>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let state = state.clone();
        Box::pin(async move {
            match id.resource_type.as_str() {
                ORGANIZATION => self.delete_organization(&id).await,
                ORGANIZATIONAL_UNIT => self.delete_organizational_unit(&id, &identifier).await,
                ACCOUNT => self.delete_account(&id, &identifier, &state).await,
                POLICY => self.delete_policy(&id, &identifier, &state).await,
                POLICY_ATTACHMENT => {
                    self.delete_policy_attachment(&id, &identifier, &state)
                        .await
                }
                SINK => self.delete_sink(&id, &identifier).await,
                SINK_POLICY => self.delete_sink_policy(&identifier).await,
                LINK => self.delete_link(&id, &identifier).await,
                _ => Err(unknown_type(&id)),
            }
        })
    }

    fn read_data_source(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move {
            match resource.id.resource_type.as_str() {
                SINK => self.read_sink_data_source(&resource).await,
                SINKS => self.read_sinks_data_source(&resource).await,
                ORGANIZATIONAL_UNITS => {
                    self.read_organizational_units_data_source(&resource)
                        .await
                }
                _ => Err(unknown_type(&resource.id)),
            }
        })
    }
}
