//! AWS SDK backend for the API seam

use async_trait::async_trait;
use aws_sdk_oam::Client as OamClient;
use aws_sdk_organizations::Client as OrganizationsClient;
use aws_sdk_organizations::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_organizations::types as org_types;
use chrono::{DateTime, Utc};
use log::debug;

use super::{
    Account, ApiError, ApiResult, CreateAccountRequest, CreateAccountStatus, Link, OamApi,
    Organization, OrganizationalUnit, OrganizationsApi, Parent, Policy, PolicyInput, PolicyTarget,
    PolicyTypeSummary, Root, Sink, SinkPolicy, classify_error,
};
use crate::config::ProviderConfig;

/// Map an SDK error to an ApiError using its exception code
fn api_error<E, R>(operation: &'static str) -> impl FnOnce(SdkError<E, R>) -> ApiError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
    R: std::fmt::Debug,
{
    move |err| {
        let message = err
            .message()
            .map(String::from)
            .unwrap_or_else(|| format!("{:?}", err));
        let api_err = classify_error(operation, err.code(), Some(&message));
        debug!("{} failed: {}", operation, api_err);
        api_err
    }
}

fn missing(operation: &'static str, what: &str) -> ApiError {
    ApiError::service(operation, "InvalidResponse", format!("response has no {}", what))
}

/// Organizations and OAM clients built from the provider configuration
pub struct SdkBackend {
    organizations: OrganizationsClient,
    oam: OamClient,
}

impl SdkBackend {
    pub async fn new(config: &ProviderConfig) -> Self {
        let sdk_config = config.load_sdk_config().await;

        let mut org_config = aws_sdk_organizations::config::Builder::from(&sdk_config);
        if let Some(url) = &config.endpoints.organizations {
            org_config = org_config.endpoint_url(url);
        }
        let mut oam_config = aws_sdk_oam::config::Builder::from(&sdk_config);
        if let Some(url) = &config.endpoints.oam {
            oam_config = oam_config.endpoint_url(url);
        }

        Self {
            organizations: OrganizationsClient::from_conf(org_config.build()),
            oam: OamClient::from_conf(oam_config.build()),
        }
    }

    /// Create with specific clients (for testing)
    pub fn with_clients(organizations: OrganizationsClient, oam: OamClient) -> Self {
        Self { organizations, oam }
    }
}

fn organization_from_sdk(org: &org_types::Organization) -> Organization {
    Organization {
        id: org.id().unwrap_or_default().to_string(),
        arn: org.arn().unwrap_or_default().to_string(),
        feature_set: org
            .feature_set()
            .map(|f| f.as_str().to_string())
            .unwrap_or_default(),
        master_account_id: org.master_account_id().unwrap_or_default().to_string(),
        master_account_arn: org.master_account_arn().unwrap_or_default().to_string(),
        master_account_email: org.master_account_email().unwrap_or_default().to_string(),
    }
}

fn root_from_sdk(root: &org_types::Root) -> Root {
    Root {
        id: root.id().unwrap_or_default().to_string(),
        arn: root.arn().unwrap_or_default().to_string(),
        name: root.name().unwrap_or_default().to_string(),
        policy_types: root
            .policy_types()
            .iter()
            .map(|p| PolicyTypeSummary {
                policy_type: p.r#type().map(|t| t.as_str().to_string()).unwrap_or_default(),
                status: p.status().map(|s| s.as_str().to_string()).unwrap_or_default(),
            })
            .collect(),
    }
}

#[allow(deprecated)]
fn account_from_sdk(account: &org_types::Account) -> Account {
    Account {
        id: account.id().unwrap_or_default().to_string(),
        arn: account.arn().unwrap_or_default().to_string(),
        name: account.name().unwrap_or_default().to_string(),
        email: account.email().unwrap_or_default().to_string(),
        status: account
            .status()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default(),
        joined_method: account
            .joined_method()
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
        joined_timestamp: account
            .joined_timestamp()
            .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())),
    }
}

fn create_account_status_from_sdk(status: &org_types::CreateAccountStatus) -> CreateAccountStatus {
    CreateAccountStatus {
        id: status.id().unwrap_or_default().to_string(),
        state: status
            .state()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default(),
        account_id: status.account_id().map(String::from),
        failure_reason: status.failure_reason().map(|r| r.as_str().to_string()),
    }
}

fn ou_from_sdk(ou: &org_types::OrganizationalUnit) -> OrganizationalUnit {
    OrganizationalUnit {
        id: ou.id().unwrap_or_default().to_string(),
        arn: ou.arn().unwrap_or_default().to_string(),
        name: ou.name().unwrap_or_default().to_string(),
    }
}

fn policy_from_sdk(operation: &'static str, policy: Option<&org_types::Policy>) -> ApiResult<Policy> {
    let policy = policy.ok_or_else(|| missing(operation, "policy"))?;
    let summary = policy
        .policy_summary()
        .ok_or_else(|| missing(operation, "policy summary"))?;
    Ok(Policy {
        id: summary.id().unwrap_or_default().to_string(),
        arn: summary.arn().unwrap_or_default().to_string(),
        name: summary.name().unwrap_or_default().to_string(),
        description: summary.description().unwrap_or_default().to_string(),
        policy_type: summary
            .r#type()
            .map(|t| t.as_str().to_string())
            .unwrap_or_default(),
        content: policy.content().unwrap_or_default().to_string(),
    })
}

#[async_trait]
impl OrganizationsApi for SdkBackend {
    async fn describe_organization(&self) -> ApiResult<Organization> {
        let out = self
            .organizations
            .describe_organization()
            .send()
            .await
            .map_err(api_error("DescribeOrganization"))?;
        out.organization()
            .map(organization_from_sdk)
            .ok_or_else(|| missing("DescribeOrganization", "organization"))
    }

    async fn create_organization(&self, feature_set: &str) -> ApiResult<Organization> {
        let out = self
            .organizations
            .create_organization()
            .feature_set(org_types::OrganizationFeatureSet::from(feature_set))
            .send()
            .await
            .map_err(api_error("CreateOrganization"))?;
        out.organization()
            .map(organization_from_sdk)
            .ok_or_else(|| missing("CreateOrganization", "organization"))
    }

    async fn delete_organization(&self) -> ApiResult<()> {
        self.organizations
            .delete_organization()
            .send()
            .await
            .map_err(api_error("DeleteOrganization"))?;
        Ok(())
    }

    async fn list_roots(&self) -> ApiResult<Vec<Root>> {
        let mut roots = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let out = self
                .organizations
                .list_roots()
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(api_error("ListRoots"))?;
            roots.extend(out.roots().iter().map(root_from_sdk));
            match out.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(roots)
    }

    async fn enable_policy_type(&self, root_id: &str, policy_type: &str) -> ApiResult<()> {
        self.organizations
            .enable_policy_type()
            .root_id(root_id)
            .policy_type(org_types::PolicyType::from(policy_type))
            .send()
            .await
            .map_err(api_error("EnablePolicyType"))?;
        Ok(())
    }

    async fn disable_policy_type(&self, root_id: &str, policy_type: &str) -> ApiResult<()> {
        self.organizations
            .disable_policy_type()
            .root_id(root_id)
            .policy_type(org_types::PolicyType::from(policy_type))
            .send()
            .await
            .map_err(api_error("DisablePolicyType"))?;
        Ok(())
    }

    async fn create_account(&self, request: &CreateAccountRequest) -> ApiResult<CreateAccountStatus> {
        let out = self
            .organizations
            .create_account()
            .account_name(&request.name)
            .email(&request.email)
            .set_role_name(request.role_name.clone())
            .set_iam_user_access_to_billing(
                request
                    .iam_user_access_to_billing
                    .as_deref()
                    .map(org_types::IamUserAccessToBilling::from),
            )
            .send()
            .await
            .map_err(api_error("CreateAccount"))?;
        out.create_account_status()
            .map(create_account_status_from_sdk)
            .ok_or_else(|| missing("CreateAccount", "create account status"))
    }

    async fn describe_create_account_status(&self, request_id: &str) -> ApiResult<CreateAccountStatus> {
        let out = self
            .organizations
            .describe_create_account_status()
            .create_account_request_id(request_id)
            .send()
            .await
            .map_err(api_error("DescribeCreateAccountStatus"))?;
        out.create_account_status()
            .map(create_account_status_from_sdk)
            .ok_or_else(|| missing("DescribeCreateAccountStatus", "create account status"))
    }

    async fn describe_account(&self, account_id: &str) -> ApiResult<Account> {
        let out = self
            .organizations
            .describe_account()
            .account_id(account_id)
            .send()
            .await
            .map_err(api_error("DescribeAccount"))?;
        out.account()
            .map(account_from_sdk)
            .ok_or_else(|| missing("DescribeAccount", "account"))
    }

    async fn list_parents(&self, child_id: &str) -> ApiResult<Vec<Parent>> {
        let mut parents = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let out = self
                .organizations
                .list_parents()
                .child_id(child_id)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(api_error("ListParents"))?;
            parents.extend(out.parents().iter().map(|p| Parent {
                id: p.id().unwrap_or_default().to_string(),
                parent_type: p.r#type().map(|t| t.as_str().to_string()).unwrap_or_default(),
            }));
            match out.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(parents)
    }

    async fn move_account(&self, account_id: &str, source_parent_id: &str, destination_parent_id: &str) -> ApiResult<()> {
        self.organizations
            .move_account()
            .account_id(account_id)
            .source_parent_id(source_parent_id)
            .destination_parent_id(destination_parent_id)
            .send()
            .await
            .map_err(api_error("MoveAccount"))?;
        Ok(())
    }

    async fn close_account(&self, account_id: &str) -> ApiResult<()> {
        self.organizations
            .close_account()
            .account_id(account_id)
            .send()
            .await
            .map_err(api_error("CloseAccount"))?;
        Ok(())
    }

    async fn remove_account_from_organization(&self, account_id: &str) -> ApiResult<()> {
        self.organizations
            .remove_account_from_organization()
            .account_id(account_id)
            .send()
            .await
            .map_err(api_error("RemoveAccountFromOrganization"))?;
        Ok(())
    }

    async fn list_accounts_for_parent(&self, parent_id: &str) -> ApiResult<Vec<Account>> {
        let mut accounts = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let out = self
                .organizations
                .list_accounts_for_parent()
                .parent_id(parent_id)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(api_error("ListAccountsForParent"))?;
            accounts.extend(out.accounts().iter().map(account_from_sdk));
            match out.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(accounts)
    }

    async fn create_organizational_unit(&self, parent_id: &str, name: &str) -> ApiResult<OrganizationalUnit> {
        let out = self
            .organizations
            .create_organizational_unit()
            .parent_id(parent_id)
            .name(name)
            .send()
            .await
            .map_err(api_error("CreateOrganizationalUnit"))?;
        out.organizational_unit()
            .map(ou_from_sdk)
            .ok_or_else(|| missing("CreateOrganizationalUnit", "organizational unit"))
    }

    async fn describe_organizational_unit(&self, ou_id: &str) -> ApiResult<OrganizationalUnit> {
        let out = self
            .organizations
            .describe_organizational_unit()
            .organizational_unit_id(ou_id)
            .send()
            .await
            .map_err(api_error("DescribeOrganizationalUnit"))?;
        out.organizational_unit()
            .map(ou_from_sdk)
            .ok_or_else(|| missing("DescribeOrganizationalUnit", "organizational unit"))
    }

    async fn update_organizational_unit(&self, ou_id: &str, name: &str) -> ApiResult<OrganizationalUnit> {
        let out = self
            .organizations
            .update_organizational_unit()
            .organizational_unit_id(ou_id)
            .name(name)
            .send()
            .await
            .map_err(api_error("UpdateOrganizationalUnit"))?;
        out.organizational_unit()
            .map(ou_from_sdk)
            .ok_or_else(|| missing("UpdateOrganizationalUnit", "organizational unit"))
    }

    async fn delete_organizational_unit(&self, ou_id: &str) -> ApiResult<()> {
        self.organizations
            .delete_organizational_unit()
            .organizational_unit_id(ou_id)
            .send()
            .await
            .map_err(api_error("DeleteOrganizationalUnit"))?;
        Ok(())
    }

    async fn list_organizational_units_for_parent(&self, parent_id: &str) -> ApiResult<Vec<OrganizationalUnit>> {
        let mut units = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let out = self
                .organizations
                .list_organizational_units_for_parent()
                .parent_id(parent_id)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(api_error("ListOrganizationalUnitsForParent"))?;
            units.extend(out.organizational_units().iter().map(ou_from_sdk));
            match out.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(units)
    }

    async fn create_policy(&self, input: &PolicyInput) -> ApiResult<Policy> {
        let out = self
            .organizations
            .create_policy()
            .name(&input.name)
            .description(&input.description)
            .content(&input.content)
            .r#type(org_types::PolicyType::from(input.policy_type.as_str()))
            .send()
            .await
            .map_err(api_error("CreatePolicy"))?;
        policy_from_sdk("CreatePolicy", out.policy())
    }

    async fn describe_policy(&self, policy_id: &str) -> ApiResult<Policy> {
        let out = self
            .organizations
            .describe_policy()
            .policy_id(policy_id)
            .send()
            .await
            .map_err(api_error("DescribePolicy"))?;
        policy_from_sdk("DescribePolicy", out.policy())
    }

    async fn update_policy(&self, policy_id: &str, input: &PolicyInput) -> ApiResult<Policy> {
        let out = self
            .organizations
            .update_policy()
            .policy_id(policy_id)
            .name(&input.name)
            .description(&input.description)
            .content(&input.content)
            .send()
            .await
            .map_err(api_error("UpdatePolicy"))?;
        policy_from_sdk("UpdatePolicy", out.policy())
    }

    async fn delete_policy(&self, policy_id: &str) -> ApiResult<()> {
        self.organizations
            .delete_policy()
            .policy_id(policy_id)
            .send()
            .await
            .map_err(api_error("DeletePolicy"))?;
        Ok(())
    }

    async fn attach_policy(&self, policy_id: &str, target_id: &str) -> ApiResult<()> {
        self.organizations
            .attach_policy()
            .policy_id(policy_id)
            .target_id(target_id)
            .send()
            .await
            .map_err(api_error("AttachPolicy"))?;
        Ok(())
    }

    async fn detach_policy(&self, policy_id: &str, target_id: &str) -> ApiResult<()> {
        self.organizations
            .detach_policy()
            .policy_id(policy_id)
            .target_id(target_id)
            .send()
            .await
            .map_err(api_error("DetachPolicy"))?;
        Ok(())
    }

    async fn list_targets_for_policy(&self, policy_id: &str) -> ApiResult<Vec<PolicyTarget>> {
        let mut targets = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let out = self
                .organizations
                .list_targets_for_policy()
                .policy_id(policy_id)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(api_error("ListTargetsForPolicy"))?;
            targets.extend(out.targets().iter().map(|t| PolicyTarget {
                target_id: t.target_id().unwrap_or_default().to_string(),
                arn: t.arn().unwrap_or_default().to_string(),
                name: t.name().unwrap_or_default().to_string(),
                target_type: t.r#type().map(|ty| ty.as_str().to_string()).unwrap_or_default(),
            }));
            match out.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(targets)
    }
}

fn oam_resource_types(resource_types: &[String]) -> Vec<aws_sdk_oam::types::ResourceType> {
    resource_types
        .iter()
        .map(|t| aws_sdk_oam::types::ResourceType::from(t.as_str()))
        .collect()
}

#[async_trait]
impl OamApi for SdkBackend {
    async fn create_sink(&self, name: &str) -> ApiResult<Sink> {
        let out = self
            .oam
            .create_sink()
            .name(name)
            .send()
            .await
            .map_err(api_error("CreateSink"))?;
        Ok(Sink {
            arn: out.arn().ok_or_else(|| missing("CreateSink", "arn"))?.to_string(),
            id: out.id().unwrap_or_default().to_string(),
            name: out.name().unwrap_or_default().to_string(),
        })
    }

    async fn get_sink(&self, identifier: &str) -> ApiResult<Sink> {
        let out = self
            .oam
            .get_sink()
            .identifier(identifier)
            .send()
            .await
            .map_err(api_error("GetSink"))?;
        Ok(Sink {
            arn: out.arn().ok_or_else(|| missing("GetSink", "arn"))?.to_string(),
            id: out.id().unwrap_or_default().to_string(),
            name: out.name().unwrap_or_default().to_string(),
        })
    }

    async fn delete_sink(&self, identifier: &str) -> ApiResult<()> {
        self.oam
            .delete_sink()
            .identifier(identifier)
            .send()
            .await
            .map_err(api_error("DeleteSink"))?;
        Ok(())
    }

    async fn list_sinks(&self) -> ApiResult<Vec<Sink>> {
        let mut sinks = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let out = self
                .oam
                .list_sinks()
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(api_error("ListSinks"))?;
            sinks.extend(out.items().iter().map(|item| Sink {
                arn: item.arn().unwrap_or_default().to_string(),
                id: item.id().unwrap_or_default().to_string(),
                name: item.name().unwrap_or_default().to_string(),
            }));
            match out.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(sinks)
    }

    async fn put_sink_policy(&self, sink_identifier: &str, policy: &str) -> ApiResult<SinkPolicy> {
        let out = self
            .oam
            .put_sink_policy()
            .sink_identifier(sink_identifier)
            .policy(policy)
            .send()
            .await
            .map_err(api_error("PutSinkPolicy"))?;
        Ok(SinkPolicy {
            sink_arn: out.sink_arn().unwrap_or_default().to_string(),
            sink_id: out.sink_id().unwrap_or_default().to_string(),
            policy: out.policy().unwrap_or_default().to_string(),
        })
    }

    async fn get_sink_policy(&self, sink_identifier: &str) -> ApiResult<SinkPolicy> {
        let out = self
            .oam
            .get_sink_policy()
            .sink_identifier(sink_identifier)
            .send()
            .await
            .map_err(api_error("GetSinkPolicy"))?;
        Ok(SinkPolicy {
            sink_arn: out.sink_arn().unwrap_or_default().to_string(),
            sink_id: out.sink_id().unwrap_or_default().to_string(),
            policy: out.policy().unwrap_or_default().to_string(),
        })
    }

    async fn create_link(&self, label_template: &str, resource_types: &[String], sink_identifier: &str) -> ApiResult<Link> {
        let out = self
            .oam
            .create_link()
            .label_template(label_template)
            .set_resource_types(Some(oam_resource_types(resource_types)))
            .sink_identifier(sink_identifier)
            .send()
            .await
            .map_err(api_error("CreateLink"))?;
        Ok(Link {
            arn: out.arn().ok_or_else(|| missing("CreateLink", "arn"))?.to_string(),
            id: out.id().unwrap_or_default().to_string(),
            label: out.label().unwrap_or_default().to_string(),
            label_template: out.label_template().unwrap_or_default().to_string(),
            resource_types: out.resource_types().to_vec(),
            sink_arn: out.sink_arn().unwrap_or_default().to_string(),
        })
    }

    async fn get_link(&self, identifier: &str) -> ApiResult<Link> {
        let out = self
            .oam
            .get_link()
            .identifier(identifier)
            .send()
            .await
            .map_err(api_error("GetLink"))?;
        Ok(Link {
            arn: out.arn().ok_or_else(|| missing("GetLink", "arn"))?.to_string(),
            id: out.id().unwrap_or_default().to_string(),
            label: out.label().unwrap_or_default().to_string(),
            label_template: out.label_template().unwrap_or_default().to_string(),
            resource_types: out.resource_types().to_vec(),
            sink_arn: out.sink_arn().unwrap_or_default().to_string(),
        })
    }

    async fn update_link(&self, identifier: &str, resource_types: &[String]) -> ApiResult<Link> {
        let out = self
            .oam
            .update_link()
            .identifier(identifier)
            .set_resource_types(Some(oam_resource_types(resource_types)))
            .send()
            .await
            .map_err(api_error("UpdateLink"))?;
        Ok(Link {
            arn: out.arn().ok_or_else(|| missing("UpdateLink", "arn"))?.to_string(),
            id: out.id().unwrap_or_default().to_string(),
            label: out.label().unwrap_or_default().to_string(),
            label_template: out.label_template().unwrap_or_default().to_string(),
            resource_types: out.resource_types().to_vec(),
            sink_arn: out.sink_arn().unwrap_or_default().to_string(),
        })
    }

    async fn delete_link(&self, identifier: &str) -> ApiResult<()> {
        self.oam
            .delete_link()
            .identifier(identifier)
            .send()
            .await
            .map_err(api_error("DeleteLink"))?;
        Ok(())
    }
}
