//! Assertions run against the working state after a step
//!
//! Attribute keys use the flattened form (`name`, `roots.#`,
//! `children.0.id`); `id` is the resource identifier.

use async_trait::async_trait;
use regex::Regex;
use stratus_core::provider::Provider;

use crate::flatten::FlatMap;
use crate::state::StateFile;

/// What a check can look at
pub struct CheckContext<'a> {
    pub state: &'a StateFile,
    pub provider: &'a dyn Provider,
}

impl CheckContext<'_> {
    /// Flattened attributes of the entry at `address`
    pub fn attributes(&self, address: &str) -> Result<FlatMap, String> {
        self.state
            .find_address(address)
            .map(|r| r.flat_attributes())
            .ok_or_else(|| format!("Not found: {} in state", address))
    }

    fn attribute(&self, address: &str, key: &str) -> Result<String, String> {
        self.attributes(address)?
            .remove(key)
            .ok_or_else(|| format!("{}: Attribute '{}' not found", address, key))
    }
}

#[async_trait]
pub trait StateCheck: Send + Sync {
    async fn check(&self, ctx: &CheckContext<'_>) -> Result<(), String>;
}

pub type BoxCheck = Box<dyn StateCheck>;

/// Check from a synchronous closure
pub fn check_fn<F>(f: F) -> BoxCheck
where
    F: Fn(&CheckContext<'_>) -> Result<(), String> + Send + Sync + 'static,
{
    Box::new(FnCheck(f))
}

struct FnCheck<F>(F);

#[async_trait]
impl<F> StateCheck for FnCheck<F>
where
    F: Fn(&CheckContext<'_>) -> Result<(), String> + Send + Sync,
{
    async fn check(&self, ctx: &CheckContext<'_>) -> Result<(), String> {
        (self.0)(ctx)
    }
}

/// Attribute equals `value`
///
/// Expecting `"0"` for a `.#` or `.%` count also accepts a missing key.
pub fn check_resource_attr(address: &str, key: &str, value: &str) -> BoxCheck {
    let (address, key, value) = (address.to_string(), key.to_string(), value.to_string());
    check_fn(move |ctx| {
        let attrs = ctx.attributes(&address)?;
        match attrs.get(&key) {
            Some(actual) if *actual == value => Ok(()),
            None if value == "0" && (key.ends_with(".#") || key.ends_with(".%")) => Ok(()),
            Some(actual) => Err(format!(
                "{}: Attribute '{}' expected {:?}, got {:?}",
                address, key, value, actual
            )),
            None => Err(format!(
                "{}: Attribute '{}' expected {:?}, not found",
                address, key, value
            )),
        }
    })
}

/// Attribute is present and non-empty
pub fn check_resource_attr_set(address: &str, key: &str) -> BoxCheck {
    let (address, key) = (address.to_string(), key.to_string());
    check_fn(move |ctx| match ctx.attributes(&address)?.get(&key) {
        Some(v) if !v.is_empty() => Ok(()),
        _ => Err(format!("{}: Attribute '{}' expected to be set", address, key)),
    })
}

/// Attribute is absent
pub fn check_no_resource_attr(address: &str, key: &str) -> BoxCheck {
    let (address, key) = (address.to_string(), key.to_string());
    check_fn(move |ctx| match ctx.attributes(&address)?.get(&key) {
        None => Ok(()),
        Some(v) if v == "0" && (key.ends_with(".#") || key.ends_with(".%")) => Ok(()),
        Some(v) => Err(format!(
            "{}: Attribute '{}' found when not expected: {:?}",
            address, key, v
        )),
    })
}

/// Attribute matches `pattern`
pub fn match_resource_attr(address: &str, key: &str, pattern: Regex) -> BoxCheck {
    let (address, key) = (address.to_string(), key.to_string());
    check_fn(move |ctx| {
        let actual = ctx.attribute(&address, &key)?;
        if pattern.is_match(&actual) {
            Ok(())
        } else {
            Err(format!(
                "{}: Attribute '{}' didn't match {:?}, got {:?}",
                address,
                key,
                pattern.as_str(),
                actual
            ))
        }
    })
}

/// Two attributes, possibly on different resources, are equal
///
/// Both unset counts as equal. A `.#` or `.%` count of `"0"` or `""` on both
/// sides counts as unset. Comparing an attribute with itself is an error.
pub fn check_resource_attr_pair(
    address_a: &str,
    key_a: &str,
    address_b: &str,
    key_b: &str,
) -> BoxCheck {
    let (address_a, key_a) = (address_a.to_string(), key_a.to_string());
    let (address_b, key_b) = (address_b.to_string(), key_b.to_string());
    check_fn(move |ctx| {
        if address_a == address_b && key_a == key_b {
            return Err(format!(
                "comparing self: resource {} attribute {}",
                address_a, key_a
            ));
        }
        let mut a = ctx.attributes(&address_a)?.remove(&key_a);
        let mut b = ctx.attributes(&address_b)?.remove(&key_b);

        if is_count_pair(&key_a, &key_b) {
            a = a.filter(|v| !is_zero_count(v));
            b = b.filter(|v| !is_zero_count(v));
        }

        match (a, b) {
            (None, None) => Ok(()),
            (None, Some(b)) => Err(format!(
                "{}: Attribute '{}' not set, but '{}' is set in {} as {:?}",
                address_a, key_a, key_b, address_b, b
            )),
            (Some(a), None) => Err(format!(
                "{}: Attribute '{}' is {:?}, but '{}' is not set in {}",
                address_a, key_a, a, key_b, address_b
            )),
            (Some(a), Some(b)) if a == b => Ok(()),
            (Some(a), Some(b)) => Err(format!(
                "{}: Attribute '{}' expected {:?}, got {:?} (from {}.{})",
                address_a, key_a, b, a, address_b, key_b
            )),
        }
    })
}

fn is_count_pair(key_a: &str, key_b: &str) -> bool {
    [".#", ".%"].iter().any(|suffix| {
        key_a.len() > 2 && key_b.len() > 2 && key_a.ends_with(suffix) && key_b.ends_with(suffix)
    })
}

fn is_zero_count(value: &str) -> bool {
    value.is_empty() || value == "0"
}

/// Attribute passes a custom test
pub fn check_resource_attr_with<F>(address: &str, key: &str, f: F) -> BoxCheck
where
    F: Fn(&str) -> Result<(), String> + Send + Sync + 'static,
{
    let (address, key) = (address.to_string(), key.to_string());
    check_fn(move |ctx| {
        let actual = ctx.attribute(&address, &key)?;
        f(&actual).map_err(|e| format!("{}: Attribute '{}': {}", address, key, e))
    })
}

/// The resource at `address` still exists remotely
pub fn check_resource_exists(address: &str) -> BoxCheck {
    Box::new(RemoteCheck {
        address: address.to_string(),
        expect_exists: true,
    })
}

/// The resource at `address` is gone remotely; meant for `check_destroy`
pub fn check_resource_destroyed(address: &str) -> BoxCheck {
    Box::new(RemoteCheck {
        address: address.to_string(),
        expect_exists: false,
    })
}

struct RemoteCheck {
    address: String,
    expect_exists: bool,
}

#[async_trait]
impl StateCheck for RemoteCheck {
    async fn check(&self, ctx: &CheckContext<'_>) -> Result<(), String> {
        let entry = ctx
            .state
            .find_address(&self.address)
            .ok_or_else(|| format!("Not found: {} in state", self.address))?;
        let identifier = entry
            .identifier
            .as_deref()
            .ok_or_else(|| format!("{}: no identifier is set", self.address))?;

        let state = ctx
            .provider
            .read(&entry.id(), Some(identifier))
            .await
            .map_err(|e| e.to_string())?;
        match (state.exists, self.expect_exists) {
            (true, false) => Err(format!("{} ({}) still exists", self.address, identifier)),
            (false, true) => Err(format!("{} ({}) does not exist", self.address, identifier)),
            _ => Ok(()),
        }
    }
}

/// Run checks in order, stopping at the first failure
pub fn compose(checks: Vec<BoxCheck>) -> BoxCheck {
    Box::new(Compose {
        checks,
        aggregate: false,
    })
}

/// Run every check and report all failures together
pub fn compose_aggregate(checks: Vec<BoxCheck>) -> BoxCheck {
    Box::new(Compose {
        checks,
        aggregate: true,
    })
}

struct Compose {
    checks: Vec<BoxCheck>,
    aggregate: bool,
}

#[async_trait]
impl StateCheck for Compose {
    async fn check(&self, ctx: &CheckContext<'_>) -> Result<(), String> {
        let mut failures = Vec::new();
        for (i, check) in self.checks.iter().enumerate() {
            if let Err(e) = check.check(ctx).await {
                let message = format!("Check {}/{} error: {}", i + 1, self.checks.len(), e);
                if !self.aggregate {
                    return Err(message);
                }
                failures.push(message);
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ResourceState;
    use serde_json::json;
    use std::sync::Arc;
    use stratus_provider_aws::AwsProvider;
    use stratus_provider_aws::api::memory::MemoryBackend;

    fn state() -> StateFile {
        let mut state = StateFile::new();
        state.upsert_resource(
            ResourceState::new("organizations_organizational_unit", "team")
                .with_identifier("ou-abcd-11111111")
                .with_attribute("name", json!("team"))
                .with_attribute("parent_id", json!("r-abcd"))
                .with_attribute("accounts", json!([])),
        );
        state.upsert_resource(
            ResourceState::new("organizations_organization", "org")
                .with_identifier("o-1234567890")
                .with_attribute("root_id", json!("r-abcd"))
                .with_attribute("roots", json!([{"id": "r-abcd", "name": "Root"}])),
        );
        state
    }

    async fn run(check: BoxCheck) -> Result<(), String> {
        let provider = AwsProvider::memory(Arc::new(MemoryBackend::new()));
        let state = state();
        let ctx = CheckContext {
            state: &state,
            provider: &provider,
        };
        check.check(&ctx).await
    }

    #[tokio::test]
    async fn attribute_values() {
        let ou = "organizations_organizational_unit.team";
        run(check_resource_attr(ou, "name", "team")).await.unwrap();
        run(check_resource_attr(ou, "id", "ou-abcd-11111111")).await.unwrap();
        run(check_resource_attr(ou, "accounts.#", "0")).await.unwrap();
        run(check_resource_attr(ou, "tags.%", "0")).await.unwrap();

        let err = run(check_resource_attr(ou, "name", "other")).await.unwrap_err();
        assert!(err.contains("expected \"other\", got \"team\""), "{}", err);

        let err = run(check_resource_attr("oam_sink.none", "name", "x"))
            .await
            .unwrap_err();
        assert_eq!(err, "Not found: oam_sink.none in state");
    }

    #[tokio::test]
    async fn presence_and_patterns() {
        let org = "organizations_organization.org";
        run(check_resource_attr_set(org, "roots.0.id")).await.unwrap();
        run(check_no_resource_attr(org, "arn")).await.unwrap();
        assert!(run(check_no_resource_attr(org, "root_id")).await.is_err());
        run(match_resource_attr(org, "id", Regex::new(r"^o-[a-z0-9]{10}$").unwrap()))
            .await
            .unwrap();
        run(check_resource_attr_with(org, "roots.#", |v| {
            (v == "1").then_some(()).ok_or_else(|| "one root expected".to_string())
        }))
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn pairs_across_resources() {
        run(check_resource_attr_pair(
            "organizations_organizational_unit.team",
            "parent_id",
            "organizations_organization.org",
            "root_id",
        ))
        .await
        .unwrap();

        let err = run(check_resource_attr_pair(
            "organizations_organizational_unit.team",
            "name",
            "organizations_organization.org",
            "root_id",
        ))
        .await
        .unwrap_err();
        assert!(err.contains("from organizations_organization.org.root_id"), "{}", err);
    }

    #[tokio::test]
    async fn pairs_treat_unset_and_empty_counts_alike() {
        let ou = "organizations_organizational_unit.team";
        let org = "organizations_organization.org";
        run(check_resource_attr_pair(ou, "tags.%", org, "tags.%"))
            .await
            .unwrap();
        run(check_resource_attr_pair(ou, "accounts.#", org, "accounts.#"))
            .await
            .unwrap();
        run(check_resource_attr_pair(ou, "arn", org, "arn"))
            .await
            .unwrap();

        let err = run(check_resource_attr_pair(org, "roots.#", ou, "accounts.#"))
            .await
            .unwrap_err();
        assert!(err.contains("is \"1\", but 'accounts.#' is not set"), "{}", err);

        let err = run(check_resource_attr_pair(org, "arn", ou, "name"))
            .await
            .unwrap_err();
        assert!(err.contains("'arn' not set, but 'name' is set"), "{}", err);
    }

    #[tokio::test]
    async fn pair_with_itself_is_an_error() {
        let ou = "organizations_organizational_unit.team";
        let err = run(check_resource_attr_pair(ou, "name", ou, "name"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            "comparing self: resource organizations_organizational_unit.team attribute name"
        );
    }

    #[tokio::test]
    async fn compose_stops_but_aggregate_collects() {
        let ou = "organizations_organizational_unit.team";
        let failing = || {
            vec![
                check_resource_attr(ou, "name", "a"),
                check_resource_attr(ou, "name", "b"),
            ]
        };

        let err = run(compose(failing())).await.unwrap_err();
        assert!(err.starts_with("Check 1/2 error"));
        assert!(!err.contains("Check 2/2"));

        let err = run(compose_aggregate(failing())).await.unwrap_err();
        assert!(err.contains("Check 1/2 error"));
        assert!(err.contains("Check 2/2 error"));
    }

    #[tokio::test]
    async fn exists_reads_through_the_provider() {
        let err = run(check_resource_exists("organizations_organizational_unit.team"))
            .await
            .unwrap_err();
        assert!(err.contains("does not exist"), "{}", err);

        run(check_resource_destroyed("organizations_organizational_unit.team"))
            .await
            .unwrap();
    }
}
