//! AWS Organizations schemas

use stratus_core::resource::Value;
use stratus_core::schema::types::string_list;
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema};

use super::types;

pub const ORGANIZATION: &str = "organizations_organization";
pub const ORGANIZATIONAL_UNIT: &str = "organizations_organizational_unit";
pub const ACCOUNT: &str = "organizations_account";
pub const POLICY: &str = "organizations_policy";
pub const POLICY_ATTACHMENT: &str = "organizations_policy_attachment";
pub const ORGANIZATIONAL_UNITS: &str = "organizations_organizational_units";

pub const DEFAULT_POLICY_TYPE: &str = "SERVICE_CONTROL_POLICY";

fn computed_string(name: &str) -> AttributeSchema {
    AttributeSchema::new(name, AttributeType::String).computed()
}

pub fn organization() -> ResourceSchema {
    ResourceSchema::new(ORGANIZATION)
        .with_description("The AWS organization of the calling account")
        .attribute(
            AttributeSchema::new("feature_set", types::feature_set())
                .force_new()
                .with_default(Value::string("ALL")),
        )
        .attribute(
            AttributeSchema::new("enabled_policy_types", types::policy_type_list())
                .unordered()
                .with_description("Policy types enabled on the root"),
        )
        .attribute(computed_string("arn"))
        .attribute(computed_string("master_account_id"))
        .attribute(computed_string("master_account_arn"))
        .attribute(computed_string("master_account_email"))
        .attribute(AttributeSchema::new("roots", string_list()).computed())
        .attribute(computed_string("root_id").with_description("ID of the first root"))
}

pub fn organizational_unit() -> ResourceSchema {
    ResourceSchema::new(ORGANIZATIONAL_UNIT)
        .attribute(AttributeSchema::new("name", types::organizational_unit_name()).required())
        .attribute(
            AttributeSchema::new("parent_id", AttributeType::String)
                .required()
                .force_new(),
        )
        .attribute(computed_string("arn"))
        .attribute(
            AttributeSchema::new("accounts", string_list())
                .computed()
                .unordered()
                .with_description("IDs of the accounts directly in this unit"),
        )
}

pub fn account() -> ResourceSchema {
    ResourceSchema::new(ACCOUNT)
        .attribute(
            AttributeSchema::new("name", types::account_name())
                .required()
                .force_new(),
        )
        .attribute(AttributeSchema::new("email", types::email()).required().force_new())
        .attribute(AttributeSchema::new("parent_id", AttributeType::String).optional_computed())
        .attribute(
            AttributeSchema::new("role_name", types::role_name())
                .force_new()
                .write_only(),
        )
        .attribute(
            AttributeSchema::new("iam_user_access_to_billing", types::iam_user_access_to_billing())
                .force_new()
                .write_only(),
        )
        .attribute(
            AttributeSchema::new("close_on_deletion", AttributeType::Bool)
                .write_only()
                .with_default(Value::Bool(false))
                .with_description("Close the account instead of removing it from the organization"),
        )
        .attribute(computed_string("arn"))
        .attribute(computed_string("status"))
        .attribute(computed_string("joined_method"))
        .attribute(computed_string("joined_timestamp"))
}

pub fn policy() -> ResourceSchema {
    ResourceSchema::new(POLICY)
        .attribute(AttributeSchema::new("name", AttributeType::String).required())
        .attribute(AttributeSchema::new("content", types::policy_document()).required())
        .attribute(AttributeSchema::new("description", AttributeType::String))
        .attribute(
            AttributeSchema::new("type", types::policy_type())
                .force_new()
                .with_default(Value::string(DEFAULT_POLICY_TYPE)),
        )
        .attribute(AttributeSchema::new("skip_destroy", AttributeType::Bool).write_only())
        .attribute(computed_string("arn"))
}

pub fn policy_attachment() -> ResourceSchema {
    ResourceSchema::new(POLICY_ATTACHMENT)
        .attribute(
            AttributeSchema::new("policy_id", AttributeType::String)
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("target_id", AttributeType::String)
                .required()
                .force_new(),
        )
        .attribute(AttributeSchema::new("skip_destroy", AttributeType::Bool).write_only())
}

/// Data source listing the organizational units under a parent
pub fn organizational_units() -> ResourceSchema {
    ResourceSchema::new(ORGANIZATIONAL_UNITS)
        .attribute(AttributeSchema::new("parent_id", AttributeType::String).required())
        .attribute(
            AttributeSchema::new(
                "children",
                AttributeType::List(Box::new(AttributeType::Map(Box::new(AttributeType::String)))),
            )
            .computed(),
        )
}

pub fn schemas() -> Vec<ResourceSchema> {
    vec![
        organization(),
        organizational_unit(),
        account(),
        policy(),
        policy_attachment(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn account_flags() {
        let schema = account();
        assert!(schema.is_force_new("email"));
        assert!(!schema.is_force_new("parent_id"));
        let mut write_only: Vec<&str> = schema.write_only_attributes().collect();
        write_only.sort();
        assert_eq!(
            write_only,
            vec!["close_on_deletion", "iam_user_access_to_billing", "role_name"]
        );
    }

    #[test]
    fn account_rejects_computed_status() {
        let mut attrs = HashMap::new();
        attrs.insert("name".to_string(), Value::string("dev"));
        attrs.insert("email".to_string(), Value::string("dev@example.com"));
        attrs.insert("status".to_string(), Value::string("ACTIVE"));
        assert!(account().validate(&attrs).is_err());

        attrs.remove("status");
        assert!(account().validate(&attrs).is_ok());
    }

    #[test]
    fn policy_type_defaults_to_scp() {
        let mut attrs = HashMap::new();
        policy().apply_defaults(&mut attrs);
        assert_eq!(attrs.get("type"), Some(&Value::string(DEFAULT_POLICY_TYPE)));
    }

    #[test]
    fn enabled_policy_types_are_unordered() {
        assert!(organization().is_unordered("enabled_policy_types"));
        assert!(organization().is_force_new("feature_set"));
    }
}
