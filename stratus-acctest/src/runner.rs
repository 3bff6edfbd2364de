//! Step sequencer
//!
//! Runs each step in order against a fresh working state, then always
//! destroys whatever the steps left behind.

use std::sync::Arc;

use log::{info, warn};
use stratus_core::resource::{Resource, ResourceId};

use crate::backend::{InMemoryBackend, StateBackend};
use crate::check::CheckContext;
use crate::engine::Engine;
use crate::error::{AccResult, AccTestError};
use crate::flatten::{diff_flat, flatten_state};
use crate::testcase::{StepMode, TestCase, TestStep};

/// Acceptance tests only run when this variable is set
pub const ACC_ENV_VAR: &str = "TF_ACC";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Skipped(String),
}

pub fn acceptance_enabled() -> bool {
    std::env::var(ACC_ENV_VAR).is_ok_and(|v| !v.is_empty())
}

/// Run a test case and report how it went
pub async fn run(case: TestCase) -> AccResult<Outcome> {
    case.validate()?;

    if !case.is_unit_test && !acceptance_enabled() {
        return Ok(Outcome::Skipped(format!(
            "Acceptance tests skipped unless env '{}' set",
            ACC_ENV_VAR
        )));
    }

    if let Some(pre_check) = &case.pre_check {
        pre_check().map_err(AccTestError::PreCheck)?;
    }

    let backend = case
        .backend
        .clone()
        .unwrap_or_else(|| Arc::new(InMemoryBackend::new()) as Arc<dyn StateBackend>);
    let mut runner = Runner {
        engine: Engine::new(case.provider.clone(), backend),
        case: &case,
        last_config: Vec::new(),
    };

    let steps = runner.run_steps().await;
    let destroy = runner.destroy().await;
    match (steps, destroy) {
        (Ok(()), Ok(())) => Ok(Outcome::Passed),
        (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
        (Err(step), Err(destroy)) => Err(AccTestError::Multiple(vec![step, destroy])),
    }
}

/// Run a test case, panicking on failure
pub async fn test(case: TestCase) {
    match run(case).await {
        Ok(Outcome::Passed) => {}
        Ok(Outcome::Skipped(reason)) => warn!("{}", reason),
        Err(e) => panic!("{}", e),
    }
}

/// Run a test case regardless of `TF_ACC`
pub async fn unit_test(case: TestCase) {
    test(case.unit_test()).await
}

struct Runner<'a> {
    engine: Engine,
    case: &'a TestCase,
    /// Configuration used for the final destroy
    last_config: Vec<Resource>,
}

impl Runner<'_> {
    async fn run_steps(&mut self) -> AccResult<()> {
        let case = self.case;
        let total = case.steps.len();

        for (i, step) in case.steps.iter().enumerate() {
            let index = i + 1;
            let wrap = |source: AccTestError| AccTestError::Step {
                index,
                total,
                source: Box::new(source),
            };

            if let Some(pre_config) = &step.pre_config {
                pre_config();
            }
            if let Some(skip) = &step.skip_func
                && skip().map_err(|e| wrap(AccTestError::SkipFunc(e)))?
            {
                info!("Skipping step {}/{}", index, total);
                continue;
            }

            info!("Running step {}/{}", index, total);
            let result = match step.mode() {
                Some(StepMode::Config) => self.config_step(step).await,
                Some(StepMode::Import) => self.import_step(step).await,
                Some(StepMode::Refresh) => self.refresh_step(step).await,
                None => Err(AccTestError::Validation(format!(
                    "TestStep {}: config, import_state, or refresh_state must be set",
                    index
                ))),
            };
            let result = match (result, &case.error_check) {
                (Err(e), Some(error_check)) => error_check(e).map_or(Ok(()), Err),
                (result, _) => result,
            };

            match (&step.expect_error, result) {
                (Some(pattern), Err(e)) => {
                    let message = e.to_string();
                    if !pattern.is_match(&message) {
                        return Err(wrap(AccTestError::UnexpectedError {
                            pattern: pattern.as_str().to_string(),
                            error: message,
                        }));
                    }
                    info!("Step {}/{} failed as expected: {}", index, total, message);
                }
                (Some(pattern), Ok(())) => {
                    return Err(wrap(AccTestError::ExpectedError {
                        pattern: pattern.as_str().to_string(),
                    }));
                }
                (None, Err(e)) => return Err(wrap(e)),
                (None, Ok(())) => {}
            }
        }
        Ok(())
    }

    async fn config_step(&mut self, step: &TestStep) -> AccResult<()> {
        let config = step.config.clone().unwrap_or_default();
        self.last_config = config.clone();

        if step.destroy {
            self.engine.destroy(&config).await?;
            return self.run_check(step).await;
        }

        self.engine.taint(&step.taint).await?;
        if !step.plan_only {
            self.engine.apply(&config).await?;
            self.run_check(step).await?;
        }

        self.check_plans(step, &config).await?;

        if let Some(address) = &self.case.id_refresh_name {
            self.id_only_refresh(address).await?;
        }
        Ok(())
    }

    /// Both the plain and the refreshed plan must be empty; when a non-empty
    /// plan is expected, the refreshed one must not be
    async fn check_plans(&self, step: &TestStep, config: &[Resource]) -> AccResult<()> {
        let plan = self.engine.plan(config, false).await?;
        if !plan.is_empty() && !step.expect_non_empty_plan {
            return Err(AccTestError::NonEmptyPlan {
                message: "After applying this test step, the plan was not empty.",
                plan: plan.to_string(),
            });
        }

        let refreshed = self.engine.plan(config, true).await?;
        if !refreshed.is_empty() && !step.expect_non_empty_plan {
            return Err(AccTestError::NonEmptyPlan {
                message: "After applying this test step and refreshing, the plan was not empty.",
                plan: refreshed.to_string(),
            });
        }

        if step.expect_non_empty_plan && refreshed.is_empty() {
            return Err(AccTestError::EmptyPlan);
        }
        Ok(())
    }

    async fn run_check(&self, step: &TestStep) -> AccResult<()> {
        let Some(check) = &step.check else {
            return Ok(());
        };
        let state = self.engine.state().await?;
        let ctx = CheckContext {
            state: &state,
            provider: self.engine.provider(),
        };
        check.check(&ctx).await.map_err(AccTestError::Check)
    }

    /// Re-read a resource knowing only its identifier
    async fn id_only_refresh(&self, address: &str) -> AccResult<()> {
        let state = self.engine.state().await?;
        let Some(id) = ResourceId::parse_address(address) else {
            return Err(AccTestError::NotInState(address.to_string()));
        };
        let Some(entry) = state.find_resource(&id) else {
            return Ok(());
        };
        let Some(identifier) = entry.identifier.as_deref() else {
            return Ok(());
        };

        let fresh = self
            .engine
            .provider()
            .read(&id, Some(identifier))
            .await
            .map_err(AccTestError::provider("refresh"))?;
        if !fresh.exists {
            return Err(AccTestError::IdRefresh {
                address: address.to_string(),
                diffs: vec![format!("  {} no longer exists", identifier)],
            });
        }

        let ignore = &self.case.id_refresh_ignore;
        let diffs = diff_flat(&entry.flat_attributes(), &flatten_state(&fresh), |key| {
            ignore.iter().any(|prefix| key.starts_with(prefix.as_str()))
        });
        if diffs.is_empty() {
            Ok(())
        } else {
            Err(AccTestError::IdRefresh {
                address: address.to_string(),
                diffs,
            })
        }
    }

    async fn import_step(&mut self, step: &TestStep) -> AccResult<()> {
        let address = step.resource_name.as_deref().unwrap_or_default();
        let id = ResourceId::parse_address(address).ok_or_else(|| {
            AccTestError::Validation(format!("invalid resource address '{}'", address))
        })?;
        if let Some(config) = &step.config {
            self.last_config = config.clone();
        }

        let prior = self.engine.state().await?;
        let import_id = match (&step.import_state_id, &step.import_state_id_func) {
            (Some(import_id), _) => import_id.clone(),
            (None, Some(f)) => f(&prior).map_err(AccTestError::ImportId)?,
            (None, None) => prior
                .find_resource(&id)
                .and_then(|r| r.identifier.clone())
                .ok_or_else(|| AccTestError::NotInState(address.to_string()))?,
        };
        let import_id = format!(
            "{}{}",
            step.import_state_id_prefix.as_deref().unwrap_or_default(),
            import_id
        );

        let imported = self
            .engine
            .import(&id, &import_id, step.import_state_persist)
            .await?;

        if let Some(check) = &step.import_state_check {
            check(&imported).map_err(AccTestError::ImportCheck)?;
        }

        if step.import_state_verify {
            let existing = prior
                .find_resource(&id)
                .ok_or_else(|| AccTestError::NotInState(address.to_string()))?;
            let write_only: Vec<String> = self
                .engine
                .provider()
                .schema_for(&id.resource_type)
                .map(|s| s.write_only_attributes().map(String::from).collect())
                .unwrap_or_default();
            let ignore = &step.import_state_verify_ignore;

            let diffs = diff_flat(&flatten_state(&imported), &existing.flat_attributes(), |key| {
                key == "id"
                    || ignore.iter().any(|prefix| key.starts_with(prefix.as_str()))
                    || write_only.iter().any(|name| {
                        key == name.as_str()
                            || key
                                .strip_prefix(name.as_str())
                                .is_some_and(|rest| rest.starts_with('.'))
                    })
            });
            if !diffs.is_empty() {
                return Err(AccTestError::ImportVerify {
                    address: address.to_string(),
                    diffs,
                });
            }
        }
        Ok(())
    }

    async fn refresh_step(&mut self, step: &TestStep) -> AccResult<()> {
        if let Some(config) = &step.config {
            self.last_config = config.clone();
        }
        let config = self.last_config.clone();

        self.engine.refresh(&config).await?;
        self.run_check(step).await?;

        let plan = self.engine.plan(&config, false).await?;
        if !plan.is_empty() && !step.expect_non_empty_plan {
            return Err(AccTestError::NonEmptyPlan {
                message: "After refreshing state, the plan was not empty.",
                plan: plan.to_string(),
            });
        }
        Ok(())
    }

    async fn destroy(&self) -> AccResult<()> {
        let wrap = |e: AccTestError| AccTestError::Destroy(Box::new(e));
        let before = self.engine.state().await.map_err(wrap)?;

        info!("Destroying {} resources", before.managed_resources().count());
        self.engine.destroy(&self.last_config).await.map_err(wrap)?;
        if !self.case.prevent_post_destroy_refresh {
            self.engine.refresh(&self.last_config).await.map_err(wrap)?;
        }

        if let Some(check_destroy) = &self.case.check_destroy {
            let ctx = CheckContext {
                state: &before,
                provider: self.engine.provider(),
            };
            check_destroy
                .check(&ctx)
                .await
                .map_err(AccTestError::CheckDestroy)?;
        }
        Ok(())
    }
}
