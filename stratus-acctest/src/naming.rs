//! Helpers for naming test resources and guarding on the environment

/// Prefix for names of resources created by acceptance tests
pub const RESOURCE_PREFIX: &str = "tf-acc-test";

const RANDOM_SUFFIX_LEN: usize = 10;

fn random_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..RANDOM_SUFFIX_LEN].to_string()
}

/// `<prefix>-<10 hex characters>`
pub fn random_name(prefix: &str) -> String {
    format!("{}-{}", prefix, random_suffix())
}

/// Unique address on `domain`, for account emails
pub fn random_email(domain: &str) -> String {
    format!("{}-{}@{}", RESOURCE_PREFIX, random_suffix(), domain)
}

/// Fail unless every variable in `vars` is set and non-empty
pub fn pre_check_env(vars: &[&str]) -> Result<(), String> {
    let missing: Vec<&str> = vars
        .iter()
        .copied()
        .filter(|v| std::env::var(v).map_or(true, |value| value.is_empty()))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "environment variables must be set for acceptance tests: {}",
            missing.join(", ")
        ))
    }
}
