//! oam_sink, oam_sink_policy and oam_link

use log::info;
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::resource::{Resource, ResourceId, State};

use super::{Attributes, found, required_str};
use crate::AwsProvider;

fn resource_types(resource: &Resource) -> ProviderResult<Vec<String>> {
    let types = resource.get_string_list("resource_types");
    if types.is_empty() {
        return Err(ProviderError::validation("resource_types must not be empty")
            .for_resource(resource.id.clone()));
    }
    Ok(types)
}

impl AwsProvider {
    pub(crate) async fn read_sink(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
        let Some(sink) = found(self.oam.get_sink(identifier).await, id)? else {
            return Ok(State::not_found(id.clone()));
        };
        Ok(Attributes::default()
            .string("name", &sink.name)
            .string("arn", &sink.arn)
            .string("sink_id", &sink.id)
            .into_state(id, sink.arn))
    }

    pub(crate) async fn create_sink(&self, resource: &Resource) -> ProviderResult<State> {
        let name = required_str(resource, "name")?;
        let sink = self
            .oam
            .create_sink(name)
            .await
            .map_err(|e| e.for_resource(&resource.id))?;
        info!("created sink {}", sink.arn);
        self.read_sink(&resource.id, &sink.arn).await
    }

    pub(crate) async fn delete_sink(&self, id: &ResourceId, identifier: &str) -> ProviderResult<()> {
        self.oam
            .delete_sink(identifier)
            .await
            .map_err(|e| e.for_resource(id))
    }

    pub(crate) async fn read_sink_policy(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
        let Some(policy) = found(self.oam.get_sink_policy(identifier).await, id)? else {
            return Ok(State::not_found(id.clone()));
        };
        Ok(Attributes::default()
            .string("sink_identifier", &policy.sink_arn)
            .string("policy", &policy.policy)
            .string("arn", &policy.sink_arn)
            .string("sink_id", &policy.sink_id)
            .into_state(id, policy.sink_arn))
    }

    /// Create and update both put the whole policy
    pub(crate) async fn put_sink_policy(&self, resource: &Resource) -> ProviderResult<State> {
        let sink_identifier = required_str(resource, "sink_identifier")?;
        let policy = required_str(resource, "policy")?;
        let put = self
            .oam
            .put_sink_policy(sink_identifier, policy)
            .await
            .map_err(|e| e.for_resource(&resource.id))?;
        self.read_sink_policy(&resource.id, &put.sink_arn).await
    }

    /// OAM has no call to remove a sink policy; it goes away with the sink
    pub(crate) async fn delete_sink_policy(&self, identifier: &str) -> ProviderResult<()> {
        info!("sink policy for {} is removed with its sink", identifier);
        Ok(())
    }

    pub(crate) async fn read_link(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
        let Some(link) = found(self.oam.get_link(identifier).await, id)? else {
            return Ok(State::not_found(id.clone()));
        };
        let mut types = link.resource_types.clone();
        types.sort();
        Ok(Attributes::default()
            .string("label_template", &link.label_template)
            .list("resource_types", types)
            .string("sink_identifier", &link.sink_arn)
            .string("arn", &link.arn)
            .string("label", &link.label)
            .string("link_id", &link.id)
            .string("sink_arn", &link.sink_arn)
            .into_state(id, link.arn))
    }

    pub(crate) async fn create_link(&self, resource: &Resource) -> ProviderResult<State> {
        let label_template = required_str(resource, "label_template")?;
        let sink_identifier = required_str(resource, "sink_identifier")?;
        let types = resource_types(resource)?;
        let link = self
            .oam
            .create_link(label_template, &types, sink_identifier)
            .await
            .map_err(|e| e.for_resource(&resource.id))?;
        info!("created link {} to {}", link.arn, link.sink_arn);
        self.read_link(&resource.id, &link.arn).await
    }

    pub(crate) async fn update_link(&self, id: &ResourceId, identifier: &str, to: &Resource) -> ProviderResult<State> {
        let types = resource_types(to)?;
        self.oam
            .update_link(identifier, &types)
            .await
            .map_err(|e| e.for_resource(id))?;
        self.read_link(id, identifier).await
    }

    pub(crate) async fn delete_link(&self, id: &ResourceId, identifier: &str) -> ProviderResult<()> {
        self.oam
            .delete_link(identifier)
            .await
            .map_err(|e| e.for_resource(id))
    }
}

#[cfg(test)]
mod tests {
    use crate::AwsProvider;
    use crate::api::OamApi;
    use crate::api::memory::MemoryBackend;
    use std::sync::Arc;
    use stratus_core::provider::Provider;
    use stratus_core::resource::{Resource, Value};

    #[tokio::test]
    async fn link_lifecycle() {
        let backend = Arc::new(MemoryBackend::new());
        let provider = AwsProvider::memory(backend.clone());
        let sink = provider
            .create(&Resource::new("oam_sink", "sink").with_attribute("name", Value::string("monitoring")))
            .await
            .unwrap();
        let sink_arn = sink.identifier.clone().unwrap();

        let link = Resource::new("oam_link", "link")
            .with_attribute("label_template", Value::string("$AccountName"))
            .with_attribute(
                "resource_types",
                Value::string_list(["AWS::Logs::LogGroup", "AWS::CloudWatch::Metric"]),
            )
            .with_attribute("sink_identifier", Value::string(&sink_arn));
        let state = provider.create(&link).await.unwrap();
        assert_eq!(state.get_str("sink_arn"), Some(sink_arn.as_str()));
        assert_eq!(
            state.attributes.get("resource_types"),
            Some(&Value::string_list(["AWS::CloudWatch::Metric", "AWS::Logs::LogGroup"]))
        );

        let identifier = state.identifier.clone().unwrap();
        let to = link
            .clone()
            .with_attribute("resource_types", Value::string_list(["AWS::XRay::Trace"]));
        let updated = provider
            .update(&link.id, &identifier, &state, &to)
            .await
            .unwrap();
        assert_eq!(
            updated.attributes.get("resource_types"),
            Some(&Value::string_list(["AWS::XRay::Trace"]))
        );

        provider.delete(&link.id, &identifier, &updated).await.unwrap();
        assert!(backend.get_link(&identifier).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn sink_policy_update_replaces_document() {
        let backend = Arc::new(MemoryBackend::new());
        let provider = AwsProvider::memory(backend);
        let sink = provider
            .create(&Resource::new("oam_sink", "sink").with_attribute("name", Value::string("s")))
            .await
            .unwrap();
        let sink_arn = sink.identifier.unwrap();

        let policy = Resource::new("oam_sink_policy", "policy")
            .with_attribute("sink_identifier", Value::string(&sink_arn))
            .with_attribute("policy", Value::string(r#"{"Version":"2012-10-17"}"#));
        let state = provider.create(&policy).await.unwrap();
        assert_eq!(state.identifier.as_deref(), Some(sink_arn.as_str()));

        let to = policy
            .clone()
            .with_attribute("policy", Value::string(r#"{"Version":"2012-10-17","Statement":[]}"#));
        let updated = provider
            .update(&policy.id, &sink_arn, &state, &to)
            .await
            .unwrap();
        assert_eq!(
            updated.get_str("policy"),
            Some(r#"{"Version":"2012-10-17","Statement":[]}"#)
        );
    }
}
