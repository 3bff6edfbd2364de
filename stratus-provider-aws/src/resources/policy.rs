//! organizations_policy

use log::info;
use stratus_core::provider::ProviderResult;
use stratus_core::resource::{Resource, ResourceId, State};

use super::{Attributes, flag, found, required_str};
use crate::AwsProvider;
use crate::api::PolicyInput;
use crate::schemas::organizations::DEFAULT_POLICY_TYPE;

fn policy_input(resource: &Resource) -> ProviderResult<PolicyInput> {
    Ok(PolicyInput {
        name: required_str(resource, "name")?.to_string(),
        description: resource.get_str("description").unwrap_or_default().to_string(),
        content: required_str(resource, "content")?.to_string(),
        policy_type: resource
            .get_str("type")
            .unwrap_or(DEFAULT_POLICY_TYPE)
            .to_string(),
    })
}

impl AwsProvider {
    pub(crate) async fn read_policy(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
        let Some(policy) = found(self.organizations.describe_policy(identifier).await, id)? else {
            return Ok(State::not_found(id.clone()));
        };
        Ok(Attributes::default()
            .string("name", &policy.name)
            .string("content", &policy.content)
            .string("description", &policy.description)
            .string("type", &policy.policy_type)
            .string("arn", &policy.arn)
            .into_state(id, policy.id))
    }

    pub(crate) async fn create_policy(&self, resource: &Resource) -> ProviderResult<State> {
        let input = policy_input(resource)?;
        let policy = self
            .organizations
            .create_policy(&input)
            .await
            .map_err(|e| e.for_resource(&resource.id))?;
        info!("created policy {} ({})", policy.id, policy.name);
        self.read_policy(&resource.id, &policy.id).await
    }

    pub(crate) async fn update_policy(&self, id: &ResourceId, identifier: &str, to: &Resource) -> ProviderResult<State> {
        let input = policy_input(to)?;
        self.organizations
            .update_policy(identifier, &input)
            .await
            .map_err(|e| e.for_resource(id))?;
        self.read_policy(id, identifier).await
    }

    pub(crate) async fn delete_policy(&self, id: &ResourceId, identifier: &str, state: &State) -> ProviderResult<()> {
        if flag(state, "skip_destroy") {
            info!("retaining policy {} (skip_destroy)", identifier);
            return Ok(());
        }
        self.organizations
            .delete_policy(identifier)
            .await
            .map_err(|e| e.for_resource(id))
    }
}

#[cfg(test)]
mod tests {
    use crate::AwsProvider;
    use crate::api::OrganizationsApi;
    use crate::api::memory::MemoryBackend;
    use std::sync::Arc;
    use stratus_core::provider::Provider;
    use stratus_core::resource::{Resource, Value};

    const CONTENT: &str = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Action":"*","Resource":"*"}]}"#;

    fn policy() -> Resource {
        Resource::new("organizations_policy", "scp")
            .with_attribute("name", Value::string("allow-all"))
            .with_attribute("content", Value::string(CONTENT))
    }

    #[tokio::test]
    async fn create_defaults_to_service_control_policy() {
        let provider = AwsProvider::memory(Arc::new(MemoryBackend::new().with_organization()));
        let state = provider.create(&policy()).await.unwrap();
        assert_eq!(state.get_str("type"), Some("SERVICE_CONTROL_POLICY"));
        assert_eq!(state.get_str("content"), Some(CONTENT));
        assert!(state.get_str("arn").unwrap().contains("service_control_policy"));
    }

    #[tokio::test]
    async fn skip_destroy_keeps_policy() {
        let backend = Arc::new(MemoryBackend::new().with_organization());
        let provider = AwsProvider::memory(backend.clone());
        let resource = policy().with_attribute("skip_destroy", Value::Bool(true));
        let mut state = provider.create(&resource).await.unwrap();
        let identifier = state.identifier.clone().unwrap();
        state
            .attributes
            .insert("skip_destroy".to_string(), Value::Bool(true));

        provider
            .delete(&resource.id, &identifier, &state)
            .await
            .unwrap();
        assert!(backend.describe_policy(&identifier).await.is_ok());
        assert_eq!(backend.call_count("DeletePolicy"), 0);
    }
}
