//! Stratus Core
//!
//! Resource model, provider abstraction and planning primitives shared by the
//! AWS provider and the acceptance-test harness

pub mod differ;
pub mod effect;
pub mod plan;
pub mod provider;
pub mod resource;
pub mod retry;
pub mod schema;
