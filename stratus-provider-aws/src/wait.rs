//! Waiters and retries for eventually consistent Organizations calls

use std::future::Future;
use std::time::Duration;

use log::{debug, info};
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::retry::{StateChangeConf, retry_when};

use crate::api::{
    ACCOUNT_ACTIVE, ACCOUNT_PENDING_CLOSURE, ACCOUNT_SUSPENDED, ApiError, ApiResult,
    CREATE_ACCOUNT_FAILED, CREATE_ACCOUNT_IN_PROGRESS, CREATE_ACCOUNT_SUCCEEDED,
    CreateAccountStatus, OrganizationsApi, POLICY_TYPE_ENABLED, POLICY_TYPE_PENDING_DISABLE,
    POLICY_TYPE_PENDING_ENABLE, Root,
};
use crate::config::ProviderConfig;

fn state_change(
    pending: &[&str],
    target: &[&str],
    timeout: Duration,
    config: &ProviderConfig,
) -> StateChangeConf {
    let conf = StateChangeConf::new(pending.iter().copied(), target.iter().copied(), timeout);
    match config.poll_interval {
        Some(interval) => conf.with_poll_interval(interval),
        None => conf,
    }
}

/// Retry `op` while AWS reports that the organization is still being finalized
pub async fn retry_when_finalizing<T, F, Fut>(config: &ProviderConfig, op: F) -> ApiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    retry_when(
        config.timeouts.organization_finalization,
        config.retry_interval,
        op,
        ApiError::is_finalizing,
    )
    .await
}

/// Poll DescribeCreateAccountStatus until the request succeeds
///
/// A FAILED request is reported with its failure reason.
pub async fn wait_account_created(
    api: &dyn OrganizationsApi,
    request_id: &str,
    config: &ProviderConfig,
) -> ProviderResult<CreateAccountStatus> {
    let conf = state_change(
        &[CREATE_ACCOUNT_IN_PROGRESS],
        &[CREATE_ACCOUNT_SUCCEEDED],
        config.timeouts.account_create,
        config,
    );
    let status = conf
        .wait_for_state(|| async move {
            match api.describe_create_account_status(request_id).await {
                Ok(status) if status.state == CREATE_ACCOUNT_FAILED => {
                    Err(ProviderError::new(format!(
                        "creating account failed: {}",
                        status.failure_reason.as_deref().unwrap_or("unknown reason")
                    )))
                }
                Ok(status) => {
                    debug!("create account request {}: {}", request_id, status.state);
                    let state = status.state.clone();
                    Ok(Some((status, state)))
                }
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await?;

    status.ok_or_else(|| {
        ProviderError::not_found(format!("create account request {} not found", request_id))
    })
}

/// Poll DescribeAccount until a closed account is SUSPENDED or gone
pub async fn wait_account_closed(
    api: &dyn OrganizationsApi,
    account_id: &str,
    config: &ProviderConfig,
) -> ProviderResult<()> {
    let conf = state_change(
        &[ACCOUNT_ACTIVE, ACCOUNT_PENDING_CLOSURE],
        &[ACCOUNT_SUSPENDED],
        config.timeouts.account_close,
        config,
    );
    conf.wait_for_state(|| async move {
        match api.describe_account(account_id).await {
            Ok(account) => Ok(Some(((), account.status))),
            Err(e) if e.is_not_found() => Ok(Some(((), ACCOUNT_SUSPENDED.to_string()))),
            Err(e) => Err(e.into()),
        }
    })
    .await?;
    info!("account {} closed", account_id);
    Ok(())
}

/// The organization's only root
pub async fn default_root(api: &dyn OrganizationsApi) -> ApiResult<Root> {
    api.list_roots().await?.into_iter().next().ok_or_else(|| {
        ApiError::not_found("ListRoots", "RootNotFoundException", "organization has no root")
    })
}

async fn root_policy_type_status(
    api: &dyn OrganizationsApi,
    policy_type: &str,
) -> ProviderResult<Option<((), String)>> {
    let root = default_root(api).await?;
    Ok(root
        .policy_type_status(policy_type)
        .map(|status| ((), status.to_string())))
}

/// Poll ListRoots until `policy_type` is ENABLED on the root
pub async fn wait_policy_type_enabled(
    api: &dyn OrganizationsApi,
    policy_type: &str,
    config: &ProviderConfig,
) -> ProviderResult<()> {
    let conf = state_change(
        &[POLICY_TYPE_PENDING_ENABLE],
        &[POLICY_TYPE_ENABLED],
        config.timeouts.policy_type,
        config,
    );
    conf.wait_for_state(|| root_policy_type_status(api, policy_type))
        .await
        .map_err(|e| e.context(format!("enabling policy type {}", policy_type)))?;
    info!("policy type {} enabled", policy_type);
    Ok(())
}

/// Poll ListRoots until `policy_type` is no longer listed on the root
pub async fn wait_policy_type_disabled(
    api: &dyn OrganizationsApi,
    policy_type: &str,
    config: &ProviderConfig,
) -> ProviderResult<()> {
    let conf = state_change(
        &[POLICY_TYPE_PENDING_DISABLE, POLICY_TYPE_ENABLED],
        &[],
        config.timeouts.policy_type,
        config,
    );
    conf.wait_for_state(|| root_policy_type_status(api, policy_type))
        .await
        .map_err(|e| e.context(format!("disabling policy type {}", policy_type)))?;
    info!("policy type {} disabled", policy_type);
    Ok(())
}
