//! Stratus acceptance-test harness
//!
//! Drives a provider through a sequence of configuration, import and refresh
//! steps, checking the working state after each one and destroying whatever
//! is left at the end. Cases are skipped unless `TF_ACC` is set or they are
//! marked as unit tests.

pub mod backend;
pub mod check;
pub mod engine;
pub mod error;
pub mod flatten;
pub mod lock;
pub mod naming;
pub mod runner;
pub mod state;
pub mod testcase;

pub use check::{
    BoxCheck, CheckContext, StateCheck, check_fn, check_no_resource_attr, check_resource_attr,
    check_resource_attr_pair, check_resource_attr_set, check_resource_attr_with,
    check_resource_destroyed, check_resource_exists, compose, compose_aggregate, match_resource_attr,
};
pub use error::{AccResult, AccTestError, LockError};
pub use naming::{RESOURCE_PREFIX, pre_check_env, random_email, random_name};
pub use runner::{ACC_ENV_VAR, Outcome, run, test, unit_test};
pub use testcase::{StepMode, TestCase, TestStep};
