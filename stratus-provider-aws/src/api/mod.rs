//! API seam between resource handlers and AWS
//!
//! Handlers talk to Organizations and OAM through the traits below. The `sdk`
//! backend calls AWS; the `memory` backend keeps everything in process.

pub mod memory;
pub mod sdk;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stratus_core::provider::ProviderError;
use stratus_core::resource::ResourceId;
use thiserror::Error;

pub const CREATE_ACCOUNT_IN_PROGRESS: &str = "IN_PROGRESS";
pub const CREATE_ACCOUNT_SUCCEEDED: &str = "SUCCEEDED";
pub const CREATE_ACCOUNT_FAILED: &str = "FAILED";

pub const ACCOUNT_ACTIVE: &str = "ACTIVE";
pub const ACCOUNT_PENDING_CLOSURE: &str = "PENDING_CLOSURE";
pub const ACCOUNT_SUSPENDED: &str = "SUSPENDED";

pub const POLICY_TYPE_ENABLED: &str = "ENABLED";
pub const POLICY_TYPE_PENDING_ENABLE: &str = "PENDING_ENABLE";
pub const POLICY_TYPE_PENDING_DISABLE: &str = "PENDING_DISABLE";

/// Errors returned by the API backends
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    #[error("{operation}: {code}: {message}")]
    NotFound {
        operation: &'static str,
        code: String,
        message: String,
    },

    #[error("{operation}: FinalizingOrganizationException: {message}")]
    FinalizingOrganization {
        operation: &'static str,
        message: String,
    },

    #[error("{operation}: ConcurrentModificationException: {message}")]
    ConcurrentModification {
        operation: &'static str,
        message: String,
    },

    #[error("{operation}: {code}: {message}")]
    Service {
        operation: &'static str,
        code: String,
        message: String,
    },
}

impl ApiError {
    pub fn not_found(operation: &'static str, code: &str, message: impl Into<String>) -> Self {
        Self::NotFound {
            operation,
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn service(operation: &'static str, code: &str, message: impl Into<String>) -> Self {
        Self::Service {
            operation,
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Organization is still being set up; the call may succeed later
    pub fn is_finalizing(&self) -> bool {
        matches!(self, Self::FinalizingOrganization { .. })
    }

    pub fn code(&self) -> &str {
        match self {
            Self::NotFound { code, .. } | Self::Service { code, .. } => code,
            Self::FinalizingOrganization { .. } => "FinalizingOrganizationException",
            Self::ConcurrentModification { .. } => "ConcurrentModificationException",
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            Self::NotFound { operation, .. }
            | Self::FinalizingOrganization { operation, .. }
            | Self::ConcurrentModification { operation, .. }
            | Self::Service { operation, .. } => operation,
        }
    }

    /// Wrap into a ProviderError for the given resource
    pub fn for_resource(self, id: &ResourceId) -> ProviderError {
        ProviderError::from(self).for_resource(id.clone())
    }
}

impl From<ApiError> for ProviderError {
    fn from(err: ApiError) -> Self {
        let message = format!("{} failed", err.operation());
        let base = if err.is_not_found() {
            ProviderError::not_found(message)
        } else {
            ProviderError::new(message)
        };
        base.with_cause(err)
    }
}

/// Exception codes that mean the object does not exist
pub const NOT_FOUND_CODES: &[&str] = &[
    "AccountNotFoundException",
    "OrganizationalUnitNotFoundException",
    "PolicyNotFoundException",
    "AWSOrganizationsNotInUseException",
    "CreateAccountStatusNotFoundException",
    "TargetNotFoundException",
    "ParentNotFoundException",
    "ChildNotFoundException",
    "ResourceNotFoundException",
];

/// Classify an AWS error by its exception code
pub fn classify_error(operation: &'static str, code: Option<&str>, message: Option<&str>) -> ApiError {
    let message = message.unwrap_or("Unknown error").to_string();
    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => ApiError::NotFound {
            operation,
            code: c.to_string(),
            message,
        },
        Some("FinalizingOrganizationException") => {
            ApiError::FinalizingOrganization { operation, message }
        }
        Some("ConcurrentModificationException") => {
            ApiError::ConcurrentModification { operation, message }
        }
        _ => ApiError::Service {
            operation,
            code: code.unwrap_or("Unknown").to_string(),
            message,
        },
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone, PartialEq)]
pub struct Organization {
    pub id: String,
    pub arn: String,
    pub feature_set: String,
    pub master_account_id: String,
    pub master_account_arn: String,
    pub master_account_email: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyTypeSummary {
    pub policy_type: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Root {
    pub id: String,
    pub arn: String,
    pub name: String,
    pub policy_types: Vec<PolicyTypeSummary>,
}

impl Root {
    pub fn policy_type_status(&self, policy_type: &str) -> Option<&str> {
        self.policy_types
            .iter()
            .find(|p| p.policy_type == policy_type)
            .map(|p| p.status.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrganizationalUnit {
    pub id: String,
    pub arn: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: String,
    pub arn: String,
    pub name: String,
    pub email: String,
    pub status: String,
    pub joined_method: String,
    pub joined_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateAccountRequest {
    pub name: String,
    pub email: String,
    pub role_name: Option<String>,
    pub iam_user_access_to_billing: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateAccountStatus {
    pub id: String,
    pub state: String,
    pub account_id: Option<String>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parent {
    pub id: String,
    pub parent_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    pub id: String,
    pub arn: String,
    pub name: String,
    pub description: String,
    pub policy_type: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyInput {
    pub name: String,
    pub description: String,
    pub content: String,
    pub policy_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyTarget {
    pub target_id: String,
    pub arn: String,
    pub name: String,
    pub target_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sink {
    pub arn: String,
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SinkPolicy {
    pub sink_arn: String,
    pub sink_id: String,
    pub policy: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub arn: String,
    pub id: String,
    pub label: String,
    pub label_template: String,
    pub resource_types: Vec<String>,
    pub sink_arn: String,
}

/// AWS Organizations calls used by the handlers
///
/// List calls return every page.
#[async_trait]
pub trait OrganizationsApi: Send + Sync {
    async fn describe_organization(&self) -> ApiResult<Organization>;
    async fn create_organization(&self, feature_set: &str) -> ApiResult<Organization>;
    async fn delete_organization(&self) -> ApiResult<()>;
    async fn list_roots(&self) -> ApiResult<Vec<Root>>;
    async fn enable_policy_type(&self, root_id: &str, policy_type: &str) -> ApiResult<()>;
    async fn disable_policy_type(&self, root_id: &str, policy_type: &str) -> ApiResult<()>;

    async fn create_account(&self, request: &CreateAccountRequest) -> ApiResult<CreateAccountStatus>;
    async fn describe_create_account_status(&self, request_id: &str) -> ApiResult<CreateAccountStatus>;
    async fn describe_account(&self, account_id: &str) -> ApiResult<Account>;
    async fn list_parents(&self, child_id: &str) -> ApiResult<Vec<Parent>>;
    async fn move_account(&self, account_id: &str, source_parent_id: &str, destination_parent_id: &str) -> ApiResult<()>;
    async fn close_account(&self, account_id: &str) -> ApiResult<()>;
    async fn remove_account_from_organization(&self, account_id: &str) -> ApiResult<()>;
    async fn list_accounts_for_parent(&self, parent_id: &str) -> ApiResult<Vec<Account>>;

    async fn create_organizational_unit(&self, parent_id: &str, name: &str) -> ApiResult<OrganizationalUnit>;
    async fn describe_organizational_unit(&self, ou_id: &str) -> ApiResult<OrganizationalUnit>;
    async fn update_organizational_unit(&self, ou_id: &str, name: &str) -> ApiResult<OrganizationalUnit>;
    async fn delete_organizational_unit(&self, ou_id: &str) -> ApiResult<()>;
    async fn list_organizational_units_for_parent(&self, parent_id: &str) -> ApiResult<Vec<OrganizationalUnit>>;

    async fn create_policy(&self, input: &PolicyInput) -> ApiResult<Policy>;
    async fn describe_policy(&self, policy_id: &str) -> ApiResult<Policy>;
    async fn update_policy(&self, policy_id: &str, input: &PolicyInput) -> ApiResult<Policy>;
    async fn delete_policy(&self, policy_id: &str) -> ApiResult<()>;
    async fn attach_policy(&self, policy_id: &str, target_id: &str) -> ApiResult<()>;
    async fn detach_policy(&self, policy_id: &str, target_id: &str) -> ApiResult<()>;
    async fn list_targets_for_policy(&self, policy_id: &str) -> ApiResult<Vec<PolicyTarget>>;
}

/// CloudWatch Observability Access Manager calls used by the handlers
#[async_trait]
pub trait OamApi: Send + Sync {
    async fn create_sink(&self, name: &str) -> ApiResult<Sink>;
    async fn get_sink(&self, identifier: &str) -> ApiResult<Sink>;
    async fn delete_sink(&self, identifier: &str) -> ApiResult<()>;
    async fn list_sinks(&self) -> ApiResult<Vec<Sink>>;

    async fn put_sink_policy(&self, sink_identifier: &str, policy: &str) -> ApiResult<SinkPolicy>;
    async fn get_sink_policy(&self, sink_identifier: &str) -> ApiResult<SinkPolicy>;

    async fn create_link(&self, label_template: &str, resource_types: &[String], sink_identifier: &str) -> ApiResult<Link>;
    async fn get_link(&self, identifier: &str) -> ApiResult<Link>;
    async fn update_link(&self, identifier: &str, resource_types: &[String]) -> ApiResult<Link>;
    async fn delete_link(&self, identifier: &str) -> ApiResult<()>;
}
