//! organizations_organizational_unit

use log::info;
use stratus_core::provider::ProviderResult;
use stratus_core::resource::{Resource, ResourceId, State};

use super::{Attributes, found, required_str};
use crate::AwsProvider;
use crate::wait::retry_when_finalizing;

impl AwsProvider {
    pub(crate) async fn read_organizational_unit(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
        let Some(ou) = found(
            self.organizations.describe_organizational_unit(identifier).await,
            id,
        )?
        else {
            return Ok(State::not_found(id.clone()));
        };

        let parents = self
            .organizations
            .list_parents(identifier)
            .await
            .map_err(|e| e.for_resource(id))?;
        let mut accounts: Vec<String> = self
            .organizations
            .list_accounts_for_parent(identifier)
            .await
            .map_err(|e| e.for_resource(id))?
            .into_iter()
            .map(|a| a.id)
            .collect();
        accounts.sort();

        let mut attributes = Attributes::default()
            .string("name", &ou.name)
            .string("arn", &ou.arn)
            .list("accounts", accounts);
        if let Some(parent) = parents.first() {
            attributes = attributes.string("parent_id", &parent.id);
        }
        Ok(attributes.into_state(id, ou.id))
    }

    pub(crate) async fn create_organizational_unit(&self, resource: &Resource) -> ProviderResult<State> {
        let id = &resource.id;
        let parent_id = required_str(resource, "parent_id")?;
        let name = required_str(resource, "name")?;

        let ou = retry_when_finalizing(&self.config, || {
            self.organizations.create_organizational_unit(parent_id, name)
        })
        .await
        .map_err(|e| e.for_resource(id))?;
        info!("created organizational unit {} ({})", ou.id, name);

        self.read_organizational_unit(id, &ou.id).await
    }

    pub(crate) async fn update_organizational_unit(&self, id: &ResourceId, identifier: &str, from: &State, to: &Resource) -> ProviderResult<State> {
        let name = required_str(to, "name")?;
        if from.get_str("name") != Some(name) {
            self.organizations
                .update_organizational_unit(identifier, name)
                .await
                .map_err(|e| e.for_resource(id))?;
        }
        self.read_organizational_unit(id, identifier).await
    }

    pub(crate) async fn delete_organizational_unit(&self, id: &ResourceId, identifier: &str) -> ProviderResult<()> {
        self.organizations
            .delete_organizational_unit(identifier)
            .await
            .map_err(|e| e.for_resource(id))
    }
}
