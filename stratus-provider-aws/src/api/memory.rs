//! In-memory Organizations and OAM service
//!
//! Backs acceptance tests without AWS credentials. Eventual consistency is
//! simulated with poll counters: account creation stays `IN_PROGRESS`, policy
//! types stay `PENDING_ENABLE` and closed accounts stay `PENDING_CLOSURE` for
//! a configurable number of status reads.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;

use super::{
    ACCOUNT_ACTIVE, ACCOUNT_PENDING_CLOSURE, ACCOUNT_SUSPENDED, Account, ApiError, ApiResult,
    CREATE_ACCOUNT_FAILED, CREATE_ACCOUNT_IN_PROGRESS, CREATE_ACCOUNT_SUCCEEDED,
    CreateAccountRequest, CreateAccountStatus, Link, OamApi, Organization, OrganizationalUnit,
    OrganizationsApi, POLICY_TYPE_ENABLED, POLICY_TYPE_PENDING_DISABLE,
    POLICY_TYPE_PENDING_ENABLE, Parent, Policy, PolicyInput, PolicyTarget, PolicyTypeSummary,
    Root, Sink, SinkPolicy,
};
use crate::validation::POLICY_TYPES;

pub const MASTER_ACCOUNT_ID: &str = "111111111111";
pub const MASTER_ACCOUNT_EMAIL: &str = "management@example.com";
const REGION: &str = "us-east-1";

#[derive(Debug, Clone)]
struct AccountRecord {
    account: Account,
    parent_id: Option<String>,
    close_polls_left: u32,
}

#[derive(Debug, Clone)]
struct CreateRequest {
    request: CreateAccountRequest,
    status: CreateAccountStatus,
    polls_left: u32,
}

#[derive(Debug, Clone)]
struct PolicyTypeChange {
    polls_left: u32,
}

#[derive(Debug, Default)]
struct MemoryState {
    organization: Option<Organization>,
    root: Option<Root>,
    policy_type_changes: HashMap<String, PolicyTypeChange>,
    accounts: BTreeMap<String, AccountRecord>,
    create_requests: HashMap<String, CreateRequest>,
    ous: BTreeMap<String, (OrganizationalUnit, String)>,
    policies: BTreeMap<String, Policy>,
    attachments: BTreeSet<(String, String)>,
    sinks: BTreeMap<String, Sink>,
    sink_policies: HashMap<String, String>,
    links: BTreeMap<String, Link>,
    finalizing_failures: u32,
    injected: HashMap<&'static str, VecDeque<ApiError>>,
    calls: Vec<&'static str>,
    next_account: u64,
}

/// In-memory backend implementing both API traits
#[derive(Debug)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    account_creation_polls: u32,
    account_close_polls: u32,
    policy_type_polls: u32,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn now_seconds() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(Utc::now().timestamp(), 0).unwrap_or_default()
}

impl MemoryBackend {
    /// Empty service: no organization, no sinks
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                next_account: 200_000_000_000,
                ..MemoryState::default()
            }),
            account_creation_polls: 1,
            account_close_polls: 1,
            policy_type_polls: 1,
        }
    }

    /// Start with an organization (feature set ALL) already in place
    pub fn with_organization(self) -> Self {
        {
            let mut state = self.lock();
            create_organization_record(&mut state, "ALL");
        }
        self
    }

    /// Status reads before a CreateAccount request completes
    pub fn with_account_creation_polls(mut self, polls: u32) -> Self {
        self.account_creation_polls = polls;
        self
    }

    /// Status reads before a closed account becomes SUSPENDED
    pub fn with_account_close_polls(mut self, polls: u32) -> Self {
        self.account_close_polls = polls;
        self
    }

    /// ListRoots calls before a policy type change settles
    pub fn with_policy_type_polls(mut self, polls: u32) -> Self {
        self.policy_type_polls = polls;
        self
    }

    /// Reject the next `count` account and OU creations as still finalizing
    pub fn with_finalizing_failures(self, count: u32) -> Self {
        self.lock().finalizing_failures = count;
        self
    }

    /// Fail the next call of `operation` with `error`
    pub fn inject_error(&self, operation: &'static str, error: ApiError) {
        self.lock()
            .injected
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Number of calls made to `operation`
    pub fn call_count(&self, operation: &str) -> usize {
        self.lock().calls.iter().filter(|c| **c == operation).count()
    }

    /// Root id of the organization, if one exists
    pub fn root_id(&self) -> Option<String> {
        self.lock().root.as_ref().map(|r| r.id.clone())
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record the call and return an injected error, if any
    fn begin(&self, operation: &'static str) -> ApiResult<MutexGuard<'_, MemoryState>> {
        let mut state = self.lock();
        debug!("memory backend: {}", operation);
        state.calls.push(operation);
        if let Some(err) = state.injected.get_mut(operation).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }
}

fn not_in_use(operation: &'static str) -> ApiError {
    ApiError::not_found(
        operation,
        "AWSOrganizationsNotInUseException",
        "Your account is not a member of an organization.",
    )
}

fn require_org(state: &MemoryState, operation: &'static str) -> ApiResult<Organization> {
    state.organization.clone().ok_or_else(|| not_in_use(operation))
}

fn check_finalizing(state: &mut MemoryState, operation: &'static str) -> ApiResult<()> {
    if state.finalizing_failures > 0 {
        state.finalizing_failures -= 1;
        return Err(ApiError::FinalizingOrganization {
            operation,
            message: "AWS Organizations can't complete your request because it conflicts with another attempt to modify the same entity.".to_string(),
        });
    }
    Ok(())
}

fn create_organization_record(state: &mut MemoryState, feature_set: &str) -> Organization {
    let org_id = format!("o-{}", short_id());
    let root_id = format!("r-{}", &short_id()[..4]);
    let org = Organization {
        id: org_id.clone(),
        arn: format!("arn:aws:organizations::{}:organization/{}", MASTER_ACCOUNT_ID, org_id),
        feature_set: feature_set.to_string(),
        master_account_id: MASTER_ACCOUNT_ID.to_string(),
        master_account_arn: format!(
            "arn:aws:organizations::{}:account/{}/{}",
            MASTER_ACCOUNT_ID, org_id, MASTER_ACCOUNT_ID
        ),
        master_account_email: MASTER_ACCOUNT_EMAIL.to_string(),
    };
    state.root = Some(Root {
        arn: format!(
            "arn:aws:organizations::{}:root/{}/{}",
            MASTER_ACCOUNT_ID, org_id, root_id
        ),
        id: root_id.clone(),
        name: "Root".to_string(),
        policy_types: Vec::new(),
    });
    state.accounts.insert(
        MASTER_ACCOUNT_ID.to_string(),
        AccountRecord {
            account: Account {
                id: MASTER_ACCOUNT_ID.to_string(),
                arn: org.master_account_arn.clone(),
                name: "management".to_string(),
                email: MASTER_ACCOUNT_EMAIL.to_string(),
                status: ACCOUNT_ACTIVE.to_string(),
                joined_method: "INVITED".to_string(),
                joined_timestamp: Some(now_seconds()),
            },
            parent_id: Some(root_id),
            close_polls_left: 0,
        },
    );
    state.organization = Some(org.clone());
    org
}

fn parent_exists(state: &MemoryState, parent_id: &str) -> bool {
    state.root.as_ref().is_some_and(|r| r.id == parent_id) || state.ous.contains_key(parent_id)
}

fn settle_policy_types(state: &mut MemoryState) {
    let Some(root) = state.root.as_mut() else {
        return;
    };
    let mut settled = Vec::new();
    for (policy_type, change) in state.policy_type_changes.iter_mut() {
        if change.polls_left > 0 {
            change.polls_left -= 1;
        }
        if change.polls_left == 0 {
            settled.push(policy_type.clone());
        }
    }
    for policy_type in settled {
        state.policy_type_changes.remove(&policy_type);
        let status = root.policy_type_status(&policy_type).map(str::to_string);
        match status.as_deref() {
            Some(POLICY_TYPE_PENDING_ENABLE) => {
                for summary in root.policy_types.iter_mut() {
                    if summary.policy_type == policy_type {
                        summary.status = POLICY_TYPE_ENABLED.to_string();
                    }
                }
            }
            Some(POLICY_TYPE_PENDING_DISABLE) => {
                root.policy_types.retain(|p| p.policy_type != policy_type);
            }
            _ => {}
        }
    }
}

fn finish_create_request(state: &mut MemoryState, request_id: &str) {
    let Some(req) = state.create_requests.get(request_id).cloned() else {
        return;
    };
    let email_taken = state
        .accounts
        .values()
        .any(|a| a.account.email == req.request.email && a.account.status != ACCOUNT_SUSPENDED);
    let mut status = req.status.clone();
    if email_taken {
        status.state = CREATE_ACCOUNT_FAILED.to_string();
        status.failure_reason = Some("EMAIL_ALREADY_EXISTS".to_string());
    } else {
        state.next_account += 1;
        let account_id = format!("{:012}", state.next_account);
        let (org_id, root_id) = match (&state.organization, &state.root) {
            (Some(org), Some(root)) => (org.id.clone(), root.id.clone()),
            _ => return,
        };
        state.accounts.insert(
            account_id.clone(),
            AccountRecord {
                account: Account {
                    arn: format!(
                        "arn:aws:organizations::{}:account/{}/{}",
                        MASTER_ACCOUNT_ID, org_id, account_id
                    ),
                    id: account_id.clone(),
                    name: req.request.name.clone(),
                    email: req.request.email.clone(),
                    status: ACCOUNT_ACTIVE.to_string(),
                    joined_method: "CREATED".to_string(),
                    joined_timestamp: Some(now_seconds()),
                },
                parent_id: Some(root_id),
                close_polls_left: 0,
            },
        );
        status.state = CREATE_ACCOUNT_SUCCEEDED.to_string();
        status.account_id = Some(account_id);
    }
    if let Some(entry) = state.create_requests.get_mut(request_id) {
        entry.status = status;
        entry.polls_left = 0;
    }
}

fn suspend_account(record: &mut AccountRecord) {
    record.account.status = ACCOUNT_SUSPENDED.to_string();
    record.parent_id = None;
}

fn target_info(state: &MemoryState, target_id: &str) -> Option<(String, String, String)> {
    if let Some(root) = state.root.as_ref().filter(|r| r.id == target_id) {
        return Some((root.arn.clone(), root.name.clone(), "ROOT".to_string()));
    }
    if let Some((ou, _)) = state.ous.get(target_id) {
        return Some((ou.arn.clone(), ou.name.clone(), "ORGANIZATIONAL_UNIT".to_string()));
    }
    state
        .accounts
        .get(target_id)
        .map(|a| (a.account.arn.clone(), a.account.name.clone(), "ACCOUNT".to_string()))
}

#[async_trait]
impl OrganizationsApi for MemoryBackend {
    async fn describe_organization(&self) -> ApiResult<Organization> {
        let state = self.begin("DescribeOrganization")?;
        require_org(&state, "DescribeOrganization")
    }

    async fn create_organization(&self, feature_set: &str) -> ApiResult<Organization> {
        let mut state = self.begin("CreateOrganization")?;
        if state.organization.is_some() {
            return Err(ApiError::service(
                "CreateOrganization",
                "AlreadyInOrganizationException",
                "The provided account is already a member of an organization.",
            ));
        }
        if feature_set != "ALL" && feature_set != "CONSOLIDATED_BILLING" {
            return Err(ApiError::service(
                "CreateOrganization",
                "InvalidInputException",
                format!("invalid feature set {}", feature_set),
            ));
        }
        Ok(create_organization_record(&mut state, feature_set))
    }

    async fn delete_organization(&self) -> ApiResult<()> {
        let mut state = self.begin("DeleteOrganization")?;
        require_org(&state, "DeleteOrganization")?;
        let members = state
            .accounts
            .values()
            .any(|a| a.account.id != MASTER_ACCOUNT_ID && a.account.status == ACCOUNT_ACTIVE);
        if members || !state.ous.is_empty() {
            return Err(ApiError::service(
                "DeleteOrganization",
                "OrganizationNotEmptyException",
                "The organization still has member accounts or organizational units.",
            ));
        }
        state.organization = None;
        state.root = None;
        state.accounts.clear();
        state.policies.clear();
        state.attachments.clear();
        state.policy_type_changes.clear();
        Ok(())
    }

    async fn list_roots(&self) -> ApiResult<Vec<Root>> {
        let mut state = self.begin("ListRoots")?;
        require_org(&state, "ListRoots")?;
        settle_policy_types(&mut state);
        Ok(state.root.iter().cloned().collect())
    }

    async fn enable_policy_type(&self, root_id: &str, policy_type: &str) -> ApiResult<()> {
        let mut state = self.begin("EnablePolicyType")?;
        require_org(&state, "EnablePolicyType")?;
        if !POLICY_TYPES.contains(&policy_type) {
            return Err(ApiError::service(
                "EnablePolicyType",
                "InvalidInputException",
                format!("invalid policy type {}", policy_type),
            ));
        }
        let polls = self.policy_type_polls;
        let root = match state.root.as_mut() {
            Some(root) if root.id == root_id => root,
            _ => {
                return Err(ApiError::not_found(
                    "EnablePolicyType",
                    "RootNotFoundException",
                    format!("root {} not found", root_id),
                ));
            }
        };
        if root.policy_type_status(policy_type).is_some() {
            return Err(ApiError::service(
                "EnablePolicyType",
                "PolicyTypeAlreadyEnabledException",
                format!("{} is already enabled", policy_type),
            ));
        }
        let status = if polls == 0 {
            POLICY_TYPE_ENABLED
        } else {
            POLICY_TYPE_PENDING_ENABLE
        };
        root.policy_types.push(PolicyTypeSummary {
            policy_type: policy_type.to_string(),
            status: status.to_string(),
        });
        if polls > 0 {
            state
                .policy_type_changes
                .insert(policy_type.to_string(), PolicyTypeChange { polls_left: polls });
        }
        Ok(())
    }

    async fn disable_policy_type(&self, root_id: &str, policy_type: &str) -> ApiResult<()> {
        let mut state = self.begin("DisablePolicyType")?;
        require_org(&state, "DisablePolicyType")?;
        let polls = self.policy_type_polls;
        let root = match state.root.as_mut() {
            Some(root) if root.id == root_id => root,
            _ => {
                return Err(ApiError::not_found(
                    "DisablePolicyType",
                    "RootNotFoundException",
                    format!("root {} not found", root_id),
                ));
            }
        };
        if root.policy_type_status(policy_type) != Some(POLICY_TYPE_ENABLED) {
            return Err(ApiError::service(
                "DisablePolicyType",
                "PolicyTypeNotEnabledException",
                format!("{} is not enabled", policy_type),
            ));
        }
        if polls == 0 {
            root.policy_types.retain(|p| p.policy_type != policy_type);
        } else {
            for summary in root.policy_types.iter_mut() {
                if summary.policy_type == policy_type {
                    summary.status = POLICY_TYPE_PENDING_DISABLE.to_string();
                }
            }
            state
                .policy_type_changes
                .insert(policy_type.to_string(), PolicyTypeChange { polls_left: polls });
        }
        Ok(())
    }

    async fn create_account(&self, request: &CreateAccountRequest) -> ApiResult<CreateAccountStatus> {
        let mut state = self.begin("CreateAccount")?;
        require_org(&state, "CreateAccount")?;
        check_finalizing(&mut state, "CreateAccount")?;

        let request_id = format!("car-{}", uuid::Uuid::new_v4().simple());
        let status = CreateAccountStatus {
            id: request_id.clone(),
            state: CREATE_ACCOUNT_IN_PROGRESS.to_string(),
            account_id: None,
            failure_reason: None,
        };
        state.create_requests.insert(
            request_id.clone(),
            CreateRequest {
                request: request.clone(),
                status: status.clone(),
                polls_left: self.account_creation_polls,
            },
        );
        if self.account_creation_polls == 0 {
            finish_create_request(&mut state, &request_id);
            if let Some(req) = state.create_requests.get(&request_id) {
                return Ok(req.status.clone());
            }
        }
        Ok(status)
    }

    async fn describe_create_account_status(&self, request_id: &str) -> ApiResult<CreateAccountStatus> {
        let mut state = self.begin("DescribeCreateAccountStatus")?;
        let polls_left = match state.create_requests.get_mut(request_id) {
            Some(req) => {
                if req.status.state == CREATE_ACCOUNT_IN_PROGRESS && req.polls_left > 0 {
                    req.polls_left -= 1;
                }
                req.polls_left
            }
            None => {
                return Err(ApiError::not_found(
                    "DescribeCreateAccountStatus",
                    "CreateAccountStatusNotFoundException",
                    format!("request {} not found", request_id),
                ));
            }
        };
        let in_progress = state
            .create_requests
            .get(request_id)
            .is_some_and(|r| r.status.state == CREATE_ACCOUNT_IN_PROGRESS);
        if in_progress && polls_left == 0 {
            finish_create_request(&mut state, request_id);
        }
        state
            .create_requests
            .get(request_id)
            .map(|r| r.status.clone())
            .ok_or_else(|| {
                ApiError::not_found(
                    "DescribeCreateAccountStatus",
                    "CreateAccountStatusNotFoundException",
                    format!("request {} not found", request_id),
                )
            })
    }

    async fn describe_account(&self, account_id: &str) -> ApiResult<Account> {
        let mut state = self.begin("DescribeAccount")?;
        require_org(&state, "DescribeAccount")?;
        let record = state.accounts.get_mut(account_id).ok_or_else(|| {
            ApiError::not_found(
                "DescribeAccount",
                "AccountNotFoundException",
                format!("account {} not found", account_id),
            )
        })?;
        if record.account.status == ACCOUNT_PENDING_CLOSURE {
            if record.close_polls_left > 0 {
                record.close_polls_left -= 1;
            }
            if record.close_polls_left == 0 {
                suspend_account(record);
            }
        }
        Ok(record.account.clone())
    }

    async fn list_parents(&self, child_id: &str) -> ApiResult<Vec<Parent>> {
        let state = self.begin("ListParents")?;
        require_org(&state, "ListParents")?;
        let root_id = state.root.as_ref().map(|r| r.id.clone()).unwrap_or_default();
        let parent_id = if let Some(record) = state.accounts.get(child_id) {
            record.parent_id.clone()
        } else if let Some((_, parent)) = state.ous.get(child_id) {
            Some(parent.clone())
        } else {
            return Err(ApiError::not_found(
                "ListParents",
                "ChildNotFoundException",
                format!("child {} not found", child_id),
            ));
        };
        Ok(parent_id
            .into_iter()
            .map(|id| Parent {
                parent_type: if id == root_id {
                    "ROOT".to_string()
                } else {
                    "ORGANIZATIONAL_UNIT".to_string()
                },
                id,
            })
            .collect())
    }

    async fn move_account(&self, account_id: &str, source_parent_id: &str, destination_parent_id: &str) -> ApiResult<()> {
        let mut state = self.begin("MoveAccount")?;
        require_org(&state, "MoveAccount")?;
        if !parent_exists(&state, destination_parent_id) {
            return Err(ApiError::service(
                "MoveAccount",
                "DestinationParentNotFoundException",
                format!("parent {} not found", destination_parent_id),
            ));
        }
        let record = state.accounts.get_mut(account_id).ok_or_else(|| {
            ApiError::not_found(
                "MoveAccount",
                "AccountNotFoundException",
                format!("account {} not found", account_id),
            )
        })?;
        if record.parent_id.as_deref() != Some(source_parent_id) {
            return Err(ApiError::service(
                "MoveAccount",
                "SourceParentNotFoundException",
                format!("account {} is not in {}", account_id, source_parent_id),
            ));
        }
        if source_parent_id == destination_parent_id {
            return Err(ApiError::service(
                "MoveAccount",
                "DuplicateAccountException",
                format!("account {} is already in {}", account_id, destination_parent_id),
            ));
        }
        record.parent_id = Some(destination_parent_id.to_string());
        Ok(())
    }

    async fn close_account(&self, account_id: &str) -> ApiResult<()> {
        let mut state = self.begin("CloseAccount")?;
        require_org(&state, "CloseAccount")?;
        let polls = self.account_close_polls;
        let record = state.accounts.get_mut(account_id).ok_or_else(|| {
            ApiError::not_found(
                "CloseAccount",
                "AccountNotFoundException",
                format!("account {} not found", account_id),
            )
        })?;
        if record.account.status != ACCOUNT_ACTIVE {
            return Err(ApiError::service(
                "CloseAccount",
                "AccountAlreadyClosedException",
                format!("account {} is already closed", account_id),
            ));
        }
        if polls == 0 {
            suspend_account(record);
        } else {
            record.account.status = ACCOUNT_PENDING_CLOSURE.to_string();
            record.close_polls_left = polls;
        }
        Ok(())
    }

    async fn remove_account_from_organization(&self, account_id: &str) -> ApiResult<()> {
        let mut state = self.begin("RemoveAccountFromOrganization")?;
        require_org(&state, "RemoveAccountFromOrganization")?;
        if account_id == MASTER_ACCOUNT_ID {
            return Err(ApiError::service(
                "RemoveAccountFromOrganization",
                "MasterCannotLeaveOrganizationException",
                "The management account can't leave the organization.",
            ));
        }
        if state.accounts.remove(account_id).is_none() {
            return Err(ApiError::not_found(
                "RemoveAccountFromOrganization",
                "AccountNotFoundException",
                format!("account {} not found", account_id),
            ));
        }
        state.attachments.retain(|(_, target)| target != account_id);
        Ok(())
    }

    async fn list_accounts_for_parent(&self, parent_id: &str) -> ApiResult<Vec<Account>> {
        let state = self.begin("ListAccountsForParent")?;
        require_org(&state, "ListAccountsForParent")?;
        if !parent_exists(&state, parent_id) {
            return Err(ApiError::not_found(
                "ListAccountsForParent",
                "ParentNotFoundException",
                format!("parent {} not found", parent_id),
            ));
        }
        Ok(state
            .accounts
            .values()
            .filter(|a| a.parent_id.as_deref() == Some(parent_id))
            .map(|a| a.account.clone())
            .collect())
    }

    async fn create_organizational_unit(&self, parent_id: &str, name: &str) -> ApiResult<OrganizationalUnit> {
        let mut state = self.begin("CreateOrganizationalUnit")?;
        let org = require_org(&state, "CreateOrganizationalUnit")?;
        check_finalizing(&mut state, "CreateOrganizationalUnit")?;
        if !parent_exists(&state, parent_id) {
            return Err(ApiError::not_found(
                "CreateOrganizationalUnit",
                "ParentNotFoundException",
                format!("parent {} not found", parent_id),
            ));
        }
        if state
            .ous
            .values()
            .any(|(ou, parent)| parent == parent_id && ou.name == name)
        {
            return Err(ApiError::service(
                "CreateOrganizationalUnit",
                "DuplicateOrganizationalUnitException",
                format!("an OU named {} already exists", name),
            ));
        }
        let root_suffix = state
            .root
            .as_ref()
            .map(|r| r.id.trim_start_matches("r-").to_string())
            .unwrap_or_default();
        let ou_id = format!("ou-{}-{}", root_suffix, short_id());
        let ou = OrganizationalUnit {
            arn: format!(
                "arn:aws:organizations::{}:ou/{}/{}",
                MASTER_ACCOUNT_ID, org.id, ou_id
            ),
            id: ou_id.clone(),
            name: name.to_string(),
        };
        state.ous.insert(ou_id, (ou.clone(), parent_id.to_string()));
        Ok(ou)
    }

    async fn describe_organizational_unit(&self, ou_id: &str) -> ApiResult<OrganizationalUnit> {
        let state = self.begin("DescribeOrganizationalUnit")?;
        require_org(&state, "DescribeOrganizationalUnit")?;
        state.ous.get(ou_id).map(|(ou, _)| ou.clone()).ok_or_else(|| {
            ApiError::not_found(
                "DescribeOrganizationalUnit",
                "OrganizationalUnitNotFoundException",
                format!("organizational unit {} not found", ou_id),
            )
        })
    }

    async fn update_organizational_unit(&self, ou_id: &str, name: &str) -> ApiResult<OrganizationalUnit> {
        let mut state = self.begin("UpdateOrganizationalUnit")?;
        require_org(&state, "UpdateOrganizationalUnit")?;
        let (ou, _) = state.ous.get_mut(ou_id).ok_or_else(|| {
            ApiError::not_found(
                "UpdateOrganizationalUnit",
                "OrganizationalUnitNotFoundException",
                format!("organizational unit {} not found", ou_id),
            )
        })?;
        ou.name = name.to_string();
        Ok(ou.clone())
    }

    async fn delete_organizational_unit(&self, ou_id: &str) -> ApiResult<()> {
        let mut state = self.begin("DeleteOrganizationalUnit")?;
        require_org(&state, "DeleteOrganizationalUnit")?;
        if !state.ous.contains_key(ou_id) {
            return Err(ApiError::not_found(
                "DeleteOrganizationalUnit",
                "OrganizationalUnitNotFoundException",
                format!("organizational unit {} not found", ou_id),
            ));
        }
        let has_children = state.ous.values().any(|(_, parent)| parent == ou_id)
            || state
                .accounts
                .values()
                .any(|a| a.parent_id.as_deref() == Some(ou_id));
        if has_children {
            return Err(ApiError::service(
                "DeleteOrganizationalUnit",
                "OrganizationalUnitNotEmptyException",
                format!("organizational unit {} is not empty", ou_id),
            ));
        }
        state.ous.remove(ou_id);
        state.attachments.retain(|(_, target)| target != ou_id);
        Ok(())
    }

    async fn list_organizational_units_for_parent(&self, parent_id: &str) -> ApiResult<Vec<OrganizationalUnit>> {
        let state = self.begin("ListOrganizationalUnitsForParent")?;
        require_org(&state, "ListOrganizationalUnitsForParent")?;
        if !parent_exists(&state, parent_id) {
            return Err(ApiError::not_found(
                "ListOrganizationalUnitsForParent",
                "ParentNotFoundException",
                format!("parent {} not found", parent_id),
            ));
        }
        Ok(state
            .ous
            .values()
            .filter(|(_, parent)| parent == parent_id)
            .map(|(ou, _)| ou.clone())
            .collect())
    }

    async fn create_policy(&self, input: &PolicyInput) -> ApiResult<Policy> {
        let mut state = self.begin("CreatePolicy")?;
        let org = require_org(&state, "CreatePolicy")?;
        if serde_json::from_str::<serde_json::Value>(&input.content).is_err() {
            return Err(ApiError::service(
                "CreatePolicy",
                "MalformedPolicyDocumentException",
                "The provided policy document doesn't meet the requirements of the specified policy type.",
            ));
        }
        if !POLICY_TYPES.contains(&input.policy_type.as_str()) {
            return Err(ApiError::service(
                "CreatePolicy",
                "InvalidInputException",
                format!("invalid policy type {}", input.policy_type),
            ));
        }
        if state.policies.values().any(|p| p.name == input.name) {
            return Err(ApiError::service(
                "CreatePolicy",
                "DuplicatePolicyException",
                format!("a policy named {} already exists", input.name),
            ));
        }
        let policy_id = format!("p-{}", short_id());
        let policy = Policy {
            arn: format!(
                "arn:aws:organizations::{}:policy/{}/{}/{}",
                MASTER_ACCOUNT_ID,
                org.id,
                input.policy_type.to_lowercase(),
                policy_id
            ),
            id: policy_id.clone(),
            name: input.name.clone(),
            description: input.description.clone(),
            policy_type: input.policy_type.clone(),
            content: input.content.clone(),
        };
        state.policies.insert(policy_id, policy.clone());
        Ok(policy)
    }

    async fn describe_policy(&self, policy_id: &str) -> ApiResult<Policy> {
        let state = self.begin("DescribePolicy")?;
        require_org(&state, "DescribePolicy")?;
        state.policies.get(policy_id).cloned().ok_or_else(|| {
            ApiError::not_found(
                "DescribePolicy",
                "PolicyNotFoundException",
                format!("policy {} not found", policy_id),
            )
        })
    }

    async fn update_policy(&self, policy_id: &str, input: &PolicyInput) -> ApiResult<Policy> {
        let mut state = self.begin("UpdatePolicy")?;
        require_org(&state, "UpdatePolicy")?;
        if serde_json::from_str::<serde_json::Value>(&input.content).is_err() {
            return Err(ApiError::service(
                "UpdatePolicy",
                "MalformedPolicyDocumentException",
                "The provided policy document doesn't meet the requirements of the specified policy type.",
            ));
        }
        let policy = state.policies.get_mut(policy_id).ok_or_else(|| {
            ApiError::not_found(
                "UpdatePolicy",
                "PolicyNotFoundException",
                format!("policy {} not found", policy_id),
            )
        })?;
        policy.name = input.name.clone();
        policy.description = input.description.clone();
        policy.content = input.content.clone();
        Ok(policy.clone())
    }

    async fn delete_policy(&self, policy_id: &str) -> ApiResult<()> {
        let mut state = self.begin("DeletePolicy")?;
        require_org(&state, "DeletePolicy")?;
        if !state.policies.contains_key(policy_id) {
            return Err(ApiError::not_found(
                "DeletePolicy",
                "PolicyNotFoundException",
                format!("policy {} not found", policy_id),
            ));
        }
        if state.attachments.iter().any(|(p, _)| p == policy_id) {
            return Err(ApiError::service(
                "DeletePolicy",
                "PolicyInUseException",
                format!("policy {} is still attached", policy_id),
            ));
        }
        state.policies.remove(policy_id);
        Ok(())
    }

    async fn attach_policy(&self, policy_id: &str, target_id: &str) -> ApiResult<()> {
        let mut state = self.begin("AttachPolicy")?;
        require_org(&state, "AttachPolicy")?;
        if !state.policies.contains_key(policy_id) {
            return Err(ApiError::not_found(
                "AttachPolicy",
                "PolicyNotFoundException",
                format!("policy {} not found", policy_id),
            ));
        }
        if target_info(&state, target_id).is_none() {
            return Err(ApiError::not_found(
                "AttachPolicy",
                "TargetNotFoundException",
                format!("target {} not found", target_id),
            ));
        }
        if !state
            .attachments
            .insert((policy_id.to_string(), target_id.to_string()))
        {
            return Err(ApiError::service(
                "AttachPolicy",
                "DuplicatePolicyAttachmentException",
                format!("policy {} is already attached to {}", policy_id, target_id),
            ));
        }
        Ok(())
    }

    async fn detach_policy(&self, policy_id: &str, target_id: &str) -> ApiResult<()> {
        let mut state = self.begin("DetachPolicy")?;
        require_org(&state, "DetachPolicy")?;
        if !state
            .attachments
            .remove(&(policy_id.to_string(), target_id.to_string()))
        {
            return Err(ApiError::service(
                "DetachPolicy",
                "PolicyNotAttachedException",
                format!("policy {} is not attached to {}", policy_id, target_id),
            ));
        }
        Ok(())
    }

    async fn list_targets_for_policy(&self, policy_id: &str) -> ApiResult<Vec<PolicyTarget>> {
        let state = self.begin("ListTargetsForPolicy")?;
        require_org(&state, "ListTargetsForPolicy")?;
        if !state.policies.contains_key(policy_id) {
            return Err(ApiError::not_found(
                "ListTargetsForPolicy",
                "PolicyNotFoundException",
                format!("policy {} not found", policy_id),
            ));
        }
        Ok(state
            .attachments
            .iter()
            .filter(|(p, _)| p == policy_id)
            .filter_map(|(_, target_id)| {
                target_info(&state, target_id).map(|(arn, name, target_type)| PolicyTarget {
                    target_id: target_id.clone(),
                    arn,
                    name,
                    target_type,
                })
            })
            .collect())
    }
}

fn sink_not_found(operation: &'static str, identifier: &str) -> ApiError {
    ApiError::not_found(
        operation,
        "ResourceNotFoundException",
        format!("sink {} not found", identifier),
    )
}

fn link_not_found(operation: &'static str, identifier: &str) -> ApiError {
    ApiError::not_found(
        operation,
        "ResourceNotFoundException",
        format!("link {} not found", identifier),
    )
}

fn render_label(template: &str) -> String {
    template
        .replace("$AccountName", "member")
        .replace("$AccountEmailNoDomain", "member")
        .replace("$AccountEmail", "member@example.com")
}

fn require_resource_types(operation: &'static str, resource_types: &[String]) -> ApiResult<()> {
    if resource_types.is_empty() {
        return Err(ApiError::service(
            operation,
            "InvalidParameterException",
            "resource types must not be empty",
        ));
    }
    Ok(())
}

#[async_trait]
impl OamApi for MemoryBackend {
    async fn create_sink(&self, name: &str) -> ApiResult<Sink> {
        let mut state = self.begin("CreateSink")?;
        if state.sinks.values().any(|s| s.name == name) {
            return Err(ApiError::service(
                "CreateSink",
                "ConflictException",
                format!("a sink named {} already exists", name),
            ));
        }
        let sink_id = uuid::Uuid::new_v4().to_string();
        let sink = Sink {
            arn: format!("arn:aws:oam:{}:{}:sink/{}", REGION, MASTER_ACCOUNT_ID, sink_id),
            id: sink_id,
            name: name.to_string(),
        };
        state.sinks.insert(sink.arn.clone(), sink.clone());
        Ok(sink)
    }

    async fn get_sink(&self, identifier: &str) -> ApiResult<Sink> {
        let state = self.begin("GetSink")?;
        state
            .sinks
            .get(identifier)
            .cloned()
            .ok_or_else(|| sink_not_found("GetSink", identifier))
    }

    async fn delete_sink(&self, identifier: &str) -> ApiResult<()> {
        let mut state = self.begin("DeleteSink")?;
        if !state.sinks.contains_key(identifier) {
            return Err(sink_not_found("DeleteSink", identifier));
        }
        if state.links.values().any(|l| l.sink_arn == identifier) {
            return Err(ApiError::service(
                "DeleteSink",
                "ConflictException",
                format!("sink {} still has links", identifier),
            ));
        }
        state.sinks.remove(identifier);
        state.sink_policies.remove(identifier);
        Ok(())
    }

    async fn list_sinks(&self) -> ApiResult<Vec<Sink>> {
        let state = self.begin("ListSinks")?;
        Ok(state.sinks.values().cloned().collect())
    }

    async fn put_sink_policy(&self, sink_identifier: &str, policy: &str) -> ApiResult<SinkPolicy> {
        let mut state = self.begin("PutSinkPolicy")?;
        let sink = state
            .sinks
            .get(sink_identifier)
            .cloned()
            .ok_or_else(|| sink_not_found("PutSinkPolicy", sink_identifier))?;
        if serde_json::from_str::<serde_json::Value>(policy).is_err() {
            return Err(ApiError::service(
                "PutSinkPolicy",
                "InvalidParameterException",
                "policy is not valid JSON",
            ));
        }
        state
            .sink_policies
            .insert(sink.arn.clone(), policy.to_string());
        Ok(SinkPolicy {
            sink_arn: sink.arn,
            sink_id: sink.id,
            policy: policy.to_string(),
        })
    }

    async fn get_sink_policy(&self, sink_identifier: &str) -> ApiResult<SinkPolicy> {
        let state = self.begin("GetSinkPolicy")?;
        let sink = state
            .sinks
            .get(sink_identifier)
            .ok_or_else(|| sink_not_found("GetSinkPolicy", sink_identifier))?;
        let policy = state.sink_policies.get(&sink.arn).ok_or_else(|| {
            ApiError::not_found(
                "GetSinkPolicy",
                "ResourceNotFoundException",
                format!("sink {} has no policy", sink_identifier),
            )
        })?;
        Ok(SinkPolicy {
            sink_arn: sink.arn.clone(),
            sink_id: sink.id.clone(),
            policy: policy.clone(),
        })
    }

    async fn create_link(&self, label_template: &str, resource_types: &[String], sink_identifier: &str) -> ApiResult<Link> {
        let mut state = self.begin("CreateLink")?;
        require_resource_types("CreateLink", resource_types)?;
        let sink = state
            .sinks
            .get(sink_identifier)
            .cloned()
            .ok_or_else(|| sink_not_found("CreateLink", sink_identifier))?;
        if state.links.values().any(|l| l.sink_arn == sink.arn) {
            return Err(ApiError::service(
                "CreateLink",
                "ConflictException",
                format!("a link to sink {} already exists", sink.arn),
            ));
        }
        let link_id = uuid::Uuid::new_v4().to_string();
        let link = Link {
            arn: format!("arn:aws:oam:{}:{}:link/{}", REGION, MASTER_ACCOUNT_ID, link_id),
            id: link_id,
            label: render_label(label_template),
            label_template: label_template.to_string(),
            resource_types: resource_types.to_vec(),
            sink_arn: sink.arn,
        };
        state.links.insert(link.arn.clone(), link.clone());
        Ok(link)
    }

    async fn get_link(&self, identifier: &str) -> ApiResult<Link> {
        let state = self.begin("GetLink")?;
        state
            .links
            .get(identifier)
            .cloned()
            .ok_or_else(|| link_not_found("GetLink", identifier))
    }

    async fn update_link(&self, identifier: &str, resource_types: &[String]) -> ApiResult<Link> {
        let mut state = self.begin("UpdateLink")?;
        require_resource_types("UpdateLink", resource_types)?;
        let link = state
            .links
            .get_mut(identifier)
            .ok_or_else(|| link_not_found("UpdateLink", identifier))?;
        link.resource_types = resource_types.to_vec();
        Ok(link.clone())
    }

    async fn delete_link(&self, identifier: &str) -> ApiResult<()> {
        let mut state = self.begin("DeleteLink")?;
        state
            .links
            .remove(identifier)
            .map(|_| ())
            .ok_or_else(|| link_not_found("DeleteLink", identifier))
    }
}
