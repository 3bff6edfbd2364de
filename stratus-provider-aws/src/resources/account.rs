//! organizations_account

use chrono::SecondsFormat;
use log::info;
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::resource::{Resource, ResourceId, State};

use super::{Attributes, flag, found, required_str};
use crate::AwsProvider;
use crate::api::{ACCOUNT_SUSPENDED, CreateAccountRequest};
use crate::wait::{retry_when_finalizing, wait_account_closed, wait_account_created};

impl AwsProvider {
    pub(crate) async fn read_account(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
        let Some(account) = found(self.organizations.describe_account(identifier).await, id)? else {
            return Ok(State::not_found(id.clone()));
        };
        // Closed accounts linger as SUSPENDED; they are gone as far as we are concerned
        if account.status == ACCOUNT_SUSPENDED {
            return Ok(State::not_found(id.clone()));
        }

        let parents = self
            .organizations
            .list_parents(identifier)
            .await
            .map_err(|e| e.for_resource(id))?;

        let mut attributes = Attributes::default()
            .string("name", &account.name)
            .string("email", &account.email)
            .string("arn", &account.arn)
            .string("status", &account.status)
            .string("joined_method", &account.joined_method);
        if let Some(joined) = account.joined_timestamp {
            attributes = attributes.string(
                "joined_timestamp",
                joined.to_rfc3339_opts(SecondsFormat::Secs, true),
            );
        }
        if let Some(parent) = parents.first() {
            attributes = attributes.string("parent_id", &parent.id);
        }
        Ok(attributes.into_state(id, account.id))
    }

    pub(crate) async fn create_account(&self, resource: &Resource) -> ProviderResult<State> {
        let id = &resource.id;
        let request = CreateAccountRequest {
            name: required_str(resource, "name")?.to_string(),
            email: required_str(resource, "email")?.to_string(),
            role_name: resource.get_str("role_name").map(String::from),
            iam_user_access_to_billing: resource
                .get_str("iam_user_access_to_billing")
                .map(String::from),
        };

        let started = retry_when_finalizing(&self.config, || {
            self.organizations.create_account(&request)
        })
        .await
        .map_err(|e| e.for_resource(id))?;
        info!("waiting for account {} (request {})", request.name, started.id);

        let status = wait_account_created(self.organizations.as_ref(), &started.id, &self.config)
            .await
            .map_err(|e| e.for_resource(id.clone()))?;
        let account_id = status.account_id.ok_or_else(|| {
            ProviderError::new("account creation succeeded without an account ID")
                .for_resource(id.clone())
        })?;
        info!("created account {}", account_id);

        if let Some(parent_id) = resource.get_str("parent_id") {
            self.move_account_to(id, &account_id, parent_id).await?;
        }
        self.read_account(id, &account_id).await
    }

    /// Only `parent_id` can change in place
    pub(crate) async fn update_account(&self, id: &ResourceId, identifier: &str, from: &State, to: &Resource) -> ProviderResult<State> {
        if let Some(parent_id) = to.get_str("parent_id")
            && from.get_str("parent_id") != Some(parent_id)
        {
            self.move_account_to(id, identifier, parent_id).await?;
        }
        self.read_account(id, identifier).await
    }

    pub(crate) async fn delete_account(&self, id: &ResourceId, identifier: &str, state: &State) -> ProviderResult<()> {
        let api = self.organizations.as_ref();
        if flag(state, "close_on_deletion") {
            info!("closing account {}", identifier);
            api.close_account(identifier)
                .await
                .map_err(|e| e.for_resource(id))?;
            wait_account_closed(api, identifier, &self.config)
                .await
                .map_err(|e| e.for_resource(id.clone()))
        } else {
            info!("removing account {} from the organization", identifier);
            api.remove_account_from_organization(identifier)
                .await
                .map_err(|e| e.for_resource(id))
        }
    }

    async fn move_account_to(&self, id: &ResourceId, account_id: &str, destination: &str) -> ProviderResult<()> {
        let parents = self
            .organizations
            .list_parents(account_id)
            .await
            .map_err(|e| e.for_resource(id))?;
        let source = parents.first().map(|p| p.id.clone()).ok_or_else(|| {
            ProviderError::new(format!("account {} has no parent", account_id))
                .for_resource(id.clone())
        })?;
        if source == destination {
            return Ok(());
        }
        info!("moving account {} from {} to {}", account_id, source, destination);
        self.organizations
            .move_account(account_id, &source, destination)
            .await
            .map_err(|e| e.for_resource(id))
    }
}

#[cfg(test)]
mod tests {
    use crate::AwsProvider;
    use crate::api::memory::MemoryBackend;
    use std::sync::Arc;
    use stratus_core::provider::Provider;
    use stratus_core::resource::{Resource, Value};

    fn account(email: &str) -> Resource {
        Resource::new("organizations_account", "member")
            .with_attribute("name", Value::string("member"))
            .with_attribute("email", Value::string(email))
    }

    #[tokio::test]
    async fn create_waits_and_moves_into_parent() {
        let backend = Arc::new(
            MemoryBackend::new()
                .with_organization()
                .with_account_creation_polls(2)
                .with_finalizing_failures(1),
        );
        let provider = AwsProvider::memory(backend.clone());
        let root = backend.root_id().unwrap();
        let ou = Resource::new("organizations_organizational_unit", "ou")
            .with_attribute("name", Value::string("members"))
            .with_attribute("parent_id", Value::string(&root));
        let ou_state = provider.create(&ou).await.unwrap();
        let ou_id = ou_state.identifier.unwrap();

        let resource = account("member@example.com").with_attribute("parent_id", Value::string(&ou_id));
        let state = provider.create(&resource).await.unwrap();
        assert_eq!(state.get_str("status"), Some("ACTIVE"));
        assert_eq!(state.get_str("parent_id"), Some(ou_id.as_str()));
        assert_eq!(state.get_str("joined_method"), Some("CREATED"));
        assert_eq!(backend.call_count("MoveAccount"), 1);
    }

    #[tokio::test]
    async fn create_reports_failure_reason() {
        let backend = Arc::new(MemoryBackend::new().with_organization());
        let provider = AwsProvider::memory(backend);

        let err = provider
            .create(&account(crate::api::memory::MASTER_ACCOUNT_EMAIL))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("EMAIL_ALREADY_EXISTS"), "{}", err);
        assert_eq!(
            err.resource_id.map(|id| id.to_string()),
            Some("organizations_account.member".to_string())
        );
    }

    #[tokio::test]
    async fn close_on_deletion_makes_account_disappear() {
        let backend = Arc::new(MemoryBackend::new().with_organization());
        let provider = AwsProvider::memory(backend.clone());
        let resource = account("close@example.com");
        let mut state = provider.create(&resource).await.unwrap();
        let identifier = state.identifier.clone().unwrap();
        state
            .attributes
            .insert("close_on_deletion".to_string(), Value::Bool(true));

        provider
            .delete(&resource.id, &identifier, &state)
            .await
            .unwrap();
        assert_eq!(backend.call_count("CloseAccount"), 1);
        let after = provider.read(&resource.id, Some(&identifier)).await.unwrap();
        assert!(!after.exists);
    }

    #[tokio::test]
    async fn default_deletion_removes_account() {
        let backend = Arc::new(MemoryBackend::new().with_organization());
        let provider = AwsProvider::memory(backend.clone());
        let resource = account("remove@example.com");
        let state = provider.create(&resource).await.unwrap();
        let identifier = state.identifier.clone().unwrap();

        provider
            .delete(&resource.id, &identifier, &state)
            .await
            .unwrap();
        assert_eq!(backend.call_count("RemoveAccountFromOrganization"), 1);
        assert!(!provider.read(&resource.id, Some(&identifier)).await.unwrap().exists);
    }
}
