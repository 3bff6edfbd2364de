//! Data sources: oam_sink, oam_sinks, organizations_organizational_units

use std::collections::HashMap;

use stratus_core::provider::ProviderResult;
use stratus_core::resource::{Resource, State, Value};

use super::{Attributes, required_str};
use crate::AwsProvider;

impl AwsProvider {
    pub(crate) async fn read_sink_data_source(&self, resource: &Resource) -> ProviderResult<State> {
        let identifier = required_str(resource, "sink_identifier")?;
        let sink = self
            .oam
            .get_sink(identifier)
            .await
            .map_err(|e| e.for_resource(&resource.id))?;
        Ok(Attributes::default()
            .string("sink_identifier", identifier)
            .string("arn", &sink.arn)
            .string("name", &sink.name)
            .string("sink_id", &sink.id)
            .into_state(&resource.id, sink.arn))
    }

    pub(crate) async fn read_sinks_data_source(&self, resource: &Resource) -> ProviderResult<State> {
        let mut arns: Vec<String> = self
            .oam
            .list_sinks()
            .await
            .map_err(|e| e.for_resource(&resource.id))?
            .into_iter()
            .map(|s| s.arn)
            .collect();
        arns.sort();
        Ok(Attributes::default()
            .list("arns", arns)
            .into_state(&resource.id, self.config.region.clone()))
    }

    pub(crate) async fn read_organizational_units_data_source(&self, resource: &Resource) -> ProviderResult<State> {
        let parent_id = required_str(resource, "parent_id")?;
        let children = self
            .organizations
            .list_organizational_units_for_parent(parent_id)
            .await
            .map_err(|e| e.for_resource(&resource.id))?
            .into_iter()
            .map(|ou| {
                Value::Map(HashMap::from([
                    ("id".to_string(), Value::String(ou.id)),
                    ("arn".to_string(), Value::String(ou.arn)),
                    ("name".to_string(), Value::String(ou.name)),
                ]))
            })
            .collect();
        Ok(Attributes::default()
            .string("parent_id", parent_id)
            .value("children", Value::List(children))
            .into_state(&resource.id, parent_id))
    }
}

#[cfg(test)]
mod tests {
    use crate::AwsProvider;
    use crate::api::memory::MemoryBackend;
    use crate::api::{OamApi, OrganizationsApi};
    use std::sync::Arc;
    use stratus_core::provider::Provider;
    use stratus_core::resource::{Resource, Value};

    #[tokio::test]
    async fn sinks_lists_every_arn() {
        let backend = Arc::new(MemoryBackend::new());
        let a = backend.create_sink("a").await.unwrap();
        let b = backend.create_sink("b").await.unwrap();
        let provider = AwsProvider::memory(backend);

        let state = provider
            .read_data_source(&Resource::data("oam_sinks", "all"))
            .await
            .unwrap();
        let mut expected = vec![a.arn, b.arn];
        expected.sort();
        assert_eq!(state.attributes.get("arns"), Some(&Value::string_list(expected)));
    }

    #[tokio::test]
    async fn sink_lookup_fails_for_unknown_sink() {
        let provider = AwsProvider::memory(Arc::new(MemoryBackend::new()));
        let lookup = Resource::data("oam_sink", "missing")
            .with_attribute("sink_identifier", Value::string("arn:aws:oam:us-east-1:1:sink/none"));
        let err = provider.read_data_source(&lookup).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn organizational_units_lists_children() {
        let backend = Arc::new(MemoryBackend::new().with_organization());
        let root = backend.root_id().unwrap();
        let ou = backend.create_organizational_unit(&root, "dev").await.unwrap();
        let provider = AwsProvider::memory(backend);

        let state = provider
            .read_data_source(
                &Resource::data("organizations_organizational_units", "children")
                    .with_attribute("parent_id", Value::string(&root)),
            )
            .await
            .unwrap();
        let children = state.attributes.get("children").and_then(Value::as_list).unwrap();
        assert_eq!(children.len(), 1);
        match &children[0] {
            Value::Map(map) => {
                assert_eq!(map.get("id"), Some(&Value::String(ou.id.clone())));
                assert_eq!(map.get("name"), Some(&Value::string("dev")));
            }
            other => panic!("unexpected child {:?}", other),
        }
    }
}
