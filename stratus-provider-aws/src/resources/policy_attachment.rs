//! organizations_policy_attachment
//!
//! Identifier is `target_id:policy_id`.

use log::info;
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::resource::{Resource, ResourceId, State};

use super::{Attributes, flag, found, required_str};
use crate::AwsProvider;
use crate::validation::parse_policy_attachment_id;

fn split_identifier(id: &ResourceId, identifier: &str) -> ProviderResult<(String, String)> {
    parse_policy_attachment_id(identifier)
        .map_err(|msg| ProviderError::validation(msg).for_resource(id.clone()))
}

impl AwsProvider {
    pub(crate) async fn read_policy_attachment(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
        let (target_id, policy_id) = split_identifier(id, identifier)?;
        let Some(targets) = found(
            self.organizations.list_targets_for_policy(&policy_id).await,
            id,
        )?
        else {
            return Ok(State::not_found(id.clone()));
        };
        if !targets.iter().any(|t| t.target_id == target_id) {
            return Ok(State::not_found(id.clone()));
        }
        Ok(Attributes::default()
            .string("policy_id", &policy_id)
            .string("target_id", &target_id)
            .into_state(id, identifier))
    }

    pub(crate) async fn create_policy_attachment(&self, resource: &Resource) -> ProviderResult<State> {
        let id = &resource.id;
        let policy_id = required_str(resource, "policy_id")?;
        let target_id = required_str(resource, "target_id")?;
        self.organizations
            .attach_policy(policy_id, target_id)
            .await
            .map_err(|e| e.for_resource(id))?;
        info!("attached policy {} to {}", policy_id, target_id);
        self.read_policy_attachment(id, &format!("{}:{}", target_id, policy_id))
            .await
    }

    pub(crate) async fn delete_policy_attachment(&self, id: &ResourceId, identifier: &str, state: &State) -> ProviderResult<()> {
        if flag(state, "skip_destroy") {
            info!("retaining policy attachment {} (skip_destroy)", identifier);
            return Ok(());
        }
        let (target_id, policy_id) = split_identifier(id, identifier)?;
        match self.organizations.detach_policy(&policy_id, &target_id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.for_resource(id)),
        }
    }
}
