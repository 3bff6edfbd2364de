//! organizations_organization

use std::collections::BTreeSet;

use log::info;
use stratus_core::provider::ProviderResult;
use stratus_core::resource::{Resource, ResourceId, State};

use super::{Attributes, found};
use crate::AwsProvider;
use crate::api::POLICY_TYPE_ENABLED;
use crate::wait::{default_root, wait_policy_type_disabled, wait_policy_type_enabled};

impl AwsProvider {
    pub(crate) async fn read_organization(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
        let Some(org) = found(self.organizations.describe_organization().await, id)? else {
            return Ok(State::not_found(id.clone()));
        };
        if org.id != identifier {
            return Ok(State::not_found(id.clone()));
        }

        let roots = self
            .organizations
            .list_roots()
            .await
            .map_err(|e| e.for_resource(id))?;
        let mut enabled: Vec<String> = roots
            .first()
            .map(|root| {
                root.policy_types
                    .iter()
                    .filter(|p| p.status == POLICY_TYPE_ENABLED)
                    .map(|p| p.policy_type.clone())
                    .collect()
            })
            .unwrap_or_default();
        enabled.sort();
        let root_id = roots.first().map(|r| r.id.clone()).unwrap_or_default();

        Ok(Attributes::default()
            .string("feature_set", &org.feature_set)
            .list("enabled_policy_types", enabled)
            .string("arn", &org.arn)
            .string("master_account_id", &org.master_account_id)
            .string("master_account_arn", &org.master_account_arn)
            .string("master_account_email", &org.master_account_email)
            .list("roots", roots.iter().map(|r| r.id.clone()).collect())
            .string("root_id", root_id)
            .into_state(id, org.id))
    }

    pub(crate) async fn create_organization(&self, resource: &Resource) -> ProviderResult<State> {
        let id = &resource.id;
        let feature_set = resource.get_str("feature_set").unwrap_or("ALL");
        let org = self
            .organizations
            .create_organization(feature_set)
            .await
            .map_err(|e| e.for_resource(id))?;
        info!("created organization {}", org.id);

        let desired = resource.get_string_list("enabled_policy_types");
        self.set_policy_types(id, &desired).await?;
        self.read_organization(id, &org.id).await
    }

    pub(crate) async fn update_organization(&self, id: &ResourceId, identifier: &str, to: &Resource) -> ProviderResult<State> {
        let desired = to.get_string_list("enabled_policy_types");
        self.set_policy_types(id, &desired).await?;
        self.read_organization(id, identifier).await
    }

    pub(crate) async fn delete_organization(&self, id: &ResourceId) -> ProviderResult<()> {
        self.organizations
            .delete_organization()
            .await
            .map_err(|e| e.for_resource(id))
    }

    /// Enable and disable policy types on the root until exactly `desired` is enabled
    async fn set_policy_types(&self, id: &ResourceId, desired: &[String]) -> ProviderResult<()> {
        let api = self.organizations.as_ref();
        let root = default_root(api).await.map_err(|e| e.for_resource(id))?;
        let current: BTreeSet<&str> = root
            .policy_types
            .iter()
            .filter(|p| p.status == POLICY_TYPE_ENABLED)
            .map(|p| p.policy_type.as_str())
            .collect();
        let desired: BTreeSet<&str> = desired.iter().map(String::as_str).collect();

        for policy_type in current.difference(&desired) {
            info!("disabling policy type {} on {}", policy_type, root.id);
            api.disable_policy_type(&root.id, policy_type)
                .await
                .map_err(|e| e.for_resource(id))?;
            wait_policy_type_disabled(api, policy_type, &self.config)
                .await
                .map_err(|e| e.for_resource(id.clone()))?;
        }
        for policy_type in desired.difference(&current) {
            info!("enabling policy type {} on {}", policy_type, root.id);
            api.enable_policy_type(&root.id, policy_type)
                .await
                .map_err(|e| e.for_resource(id))?;
            wait_policy_type_enabled(api, policy_type, &self.config)
                .await
                .map_err(|e| e.for_resource(id.clone()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::AwsProvider;
    use crate::api::memory::MemoryBackend;
    use std::sync::Arc;
    use stratus_core::provider::Provider;
    use stratus_core::resource::{Resource, Value};

    #[tokio::test]
    async fn create_enables_policy_types() {
        let backend = Arc::new(MemoryBackend::new().with_policy_type_polls(1));
        let provider = AwsProvider::memory(backend.clone());
        let resource = Resource::new("organizations_organization", "org")
            .with_attribute("feature_set", Value::string("ALL"))
            .with_attribute(
                "enabled_policy_types",
                Value::string_list(["TAG_POLICY", "SERVICE_CONTROL_POLICY"]),
            );

        let state = provider.create(&resource).await.unwrap();
        assert_eq!(
            state.attributes.get("enabled_policy_types"),
            Some(&Value::string_list(["SERVICE_CONTROL_POLICY", "TAG_POLICY"]))
        );
        assert_eq!(state.get_str("root_id"), backend.root_id().as_deref());
        assert_eq!(backend.call_count("EnablePolicyType"), 2);
    }

    #[tokio::test]
    async fn update_disables_removed_types() {
        let backend = Arc::new(MemoryBackend::new());
        let provider = AwsProvider::memory(backend.clone());
        let resource = Resource::new("organizations_organization", "org")
            .with_attribute("feature_set", Value::string("ALL"))
            .with_attribute("enabled_policy_types", Value::string_list(["TAG_POLICY"]));
        let state = provider.create(&resource).await.unwrap();

        let to = Resource::new("organizations_organization", "org")
            .with_attribute("feature_set", Value::string("ALL"))
            .with_attribute("enabled_policy_types", Value::List(vec![]));
        let identifier = state.identifier.clone().unwrap();
        let updated = provider
            .update(&resource.id, &identifier, &state, &to)
            .await
            .unwrap();
        assert_eq!(
            updated.attributes.get("enabled_policy_types"),
            Some(&Value::List(vec![]))
        );
    }
}
