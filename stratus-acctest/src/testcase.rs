//! Test case and step model

use std::sync::Arc;

use regex::Regex;
use stratus_core::provider::Provider;
use stratus_core::resource::{Resource, State};

use crate::backend::StateBackend;
use crate::check::BoxCheck;
use crate::error::AccTestError;
use crate::state::StateFile;

pub type PreCheckFn = Box<dyn Fn() -> Result<(), String> + Send + Sync>;
pub type ErrorCheckFn = Box<dyn Fn(AccTestError) -> Option<AccTestError> + Send + Sync>;
pub type SkipFn = Box<dyn Fn() -> Result<bool, String> + Send + Sync>;
pub type PreConfigFn = Box<dyn Fn() + Send + Sync>;
pub type ImportIdFn = Box<dyn Fn(&StateFile) -> Result<String, String> + Send + Sync>;
pub type ImportCheckFn = Box<dyn Fn(&State) -> Result<(), String> + Send + Sync>;

/// A sequence of steps run against one provider, followed by a destroy
pub struct TestCase {
    /// Unit tests run even when `TF_ACC` is unset
    pub is_unit_test: bool,
    pub pre_check: Option<PreCheckFn>,
    pub provider: Arc<dyn Provider>,
    /// Where the working state lives; in memory when unset
    pub backend: Option<Arc<dyn StateBackend>>,
    /// Called with the state as it was before the final destroy
    pub check_destroy: Option<BoxCheck>,
    /// May rewrite or swallow step errors before `expect_error` sees them
    pub error_check: Option<ErrorCheckFn>,
    pub steps: Vec<TestStep>,
    /// Address of a resource to re-read by identifier after each config step
    pub id_refresh_name: Option<String>,
    pub id_refresh_ignore: Vec<String>,
    pub prevent_post_destroy_refresh: bool,
}

impl TestCase {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            is_unit_test: false,
            pre_check: None,
            provider,
            backend: None,
            check_destroy: None,
            error_check: None,
            steps: Vec::new(),
            id_refresh_name: None,
            id_refresh_ignore: Vec::new(),
            prevent_post_destroy_refresh: false,
        }
    }

    pub fn step(mut self, step: TestStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_pre_check(
        mut self,
        f: impl Fn() -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.pre_check = Some(Box::new(f));
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn StateBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_check_destroy(mut self, check: BoxCheck) -> Self {
        self.check_destroy = Some(check);
        self
    }

    pub fn with_error_check(
        mut self,
        f: impl Fn(AccTestError) -> Option<AccTestError> + Send + Sync + 'static,
    ) -> Self {
        self.error_check = Some(Box::new(f));
        self
    }

    pub fn with_id_refresh(mut self, address: &str, ignore: &[&str]) -> Self {
        self.id_refresh_name = Some(address.to_string());
        self.id_refresh_ignore = ignore.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn unit_test(mut self) -> Self {
        self.is_unit_test = true;
        self
    }

    /// Reject cases the sequencer cannot run
    pub fn validate(&self) -> Result<(), AccTestError> {
        if self.steps.is_empty() {
            return Err(AccTestError::Validation(
                "TestCase missing steps".to_string(),
            ));
        }

        for (i, step) in self.steps.iter().enumerate() {
            let n = i + 1;
            let invalid = |msg: &str| AccTestError::Validation(format!("TestStep {}: {}", n, msg));

            if step.import_state && step.refresh_state {
                return Err(invalid("import_state and refresh_state cannot both be set"));
            }
            if step.mode().is_none() {
                return Err(invalid("config, import_state, or refresh_state must be set"));
            }
            if step.import_state && step.resource_name.is_none() {
                return Err(invalid("import_state requires resource_name"));
            }
            if step.refresh_state && i == 0 {
                return Err(invalid("refresh_state cannot be the first step"));
            }
        }
        Ok(())
    }
}

/// How a step is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    Config,
    Import,
    Refresh,
}

/// One step of a test case
#[derive(Default)]
pub struct TestStep {
    /// Address (`type.name`) the import and ID-refresh logic acts on
    pub resource_name: Option<String>,
    pub pre_config: Option<PreConfigFn>,
    /// Addresses to mark for replacement before applying
    pub taint: Vec<String>,
    pub config: Option<Vec<Resource>>,
    pub check: Option<BoxCheck>,
    /// Destroy the config instead of applying it
    pub destroy: bool,
    pub expect_non_empty_plan: bool,
    pub expect_error: Option<Regex>,
    pub plan_only: bool,
    pub skip_func: Option<SkipFn>,

    pub import_state: bool,
    pub import_state_id: Option<String>,
    pub import_state_id_prefix: Option<String>,
    pub import_state_id_func: Option<ImportIdFn>,
    pub import_state_check: Option<ImportCheckFn>,
    pub import_state_verify: bool,
    pub import_state_verify_ignore: Vec<String>,
    pub import_state_persist: bool,

    pub refresh_state: bool,
}

impl TestStep {
    /// Apply `config`
    pub fn config(config: Vec<Resource>) -> Self {
        Self {
            config: Some(config),
            ..Self::default()
        }
    }

    /// Import the resource at `address`
    pub fn import(address: &str) -> Self {
        Self {
            resource_name: Some(address.to_string()),
            import_state: true,
            ..Self::default()
        }
    }

    /// Refresh the working state
    pub fn refresh() -> Self {
        Self {
            refresh_state: true,
            ..Self::default()
        }
    }

    pub fn mode(&self) -> Option<StepMode> {
        if self.import_state {
            Some(StepMode::Import)
        } else if self.refresh_state {
            Some(StepMode::Refresh)
        } else if self.config.is_some() {
            Some(StepMode::Config)
        } else {
            None
        }
    }

    pub fn with_check(mut self, check: BoxCheck) -> Self {
        self.check = Some(check);
        self
    }

    pub fn expect_error(mut self, pattern: Regex) -> Self {
        self.expect_error = Some(pattern);
        self
    }

    pub fn expect_non_empty_plan(mut self) -> Self {
        self.expect_non_empty_plan = true;
        self
    }

    pub fn plan_only(mut self) -> Self {
        self.plan_only = true;
        self
    }

    pub fn destroy(mut self) -> Self {
        self.destroy = true;
        self
    }

    pub fn with_taint(mut self, addresses: &[&str]) -> Self {
        self.taint = addresses.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_pre_config(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.pre_config = Some(Box::new(f));
        self
    }

    pub fn with_skip(mut self, f: impl Fn() -> Result<bool, String> + Send + Sync + 'static) -> Self {
        self.skip_func = Some(Box::new(f));
        self
    }

    /// Resource the step refers to; also used by config steps
    pub fn with_resource_name(mut self, address: &str) -> Self {
        self.resource_name = Some(address.to_string());
        self
    }

    pub fn with_config(mut self, config: Vec<Resource>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_import_id(mut self, id: &str) -> Self {
        self.import_state_id = Some(id.to_string());
        self
    }

    pub fn with_import_id_prefix(mut self, prefix: &str) -> Self {
        self.import_state_id_prefix = Some(prefix.to_string());
        self
    }

    pub fn with_import_id_func(
        mut self,
        f: impl Fn(&StateFile) -> Result<String, String> + Send + Sync + 'static,
    ) -> Self {
        self.import_state_id_func = Some(Box::new(f));
        self
    }

    pub fn with_import_check(
        mut self,
        f: impl Fn(&State) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.import_state_check = Some(Box::new(f));
        self
    }

    /// Compare the imported attributes with the prior state
    pub fn verify(mut self, ignore: &[&str]) -> Self {
        self.import_state_verify = true;
        self.import_state_verify_ignore = ignore.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn persist(mut self) -> Self {
        self.import_state_persist = true;
        self
    }
}
