//! AWS-specific attribute types

use stratus_core::schema::AttributeType;
use stratus_core::schema::types::validated_string;

use crate::validation::{
    OAM_RESOURCE_TYPES, POLICY_TYPES, validate_account_name, validate_email,
    validate_organizational_unit_name, validate_policy_document, validate_role_name,
    validate_sink_name,
};

fn enum_of(values: &[&str]) -> AttributeType {
    AttributeType::Enum(values.iter().map(|v| v.to_string()).collect())
}

pub fn email() -> AttributeType {
    validated_string("Email", validate_email)
}

pub fn account_name() -> AttributeType {
    validated_string("AccountName", validate_account_name)
}

pub fn organizational_unit_name() -> AttributeType {
    validated_string("OrganizationalUnitName", validate_organizational_unit_name)
}

pub fn role_name() -> AttributeType {
    validated_string("RoleName", validate_role_name)
}

pub fn sink_name() -> AttributeType {
    validated_string("SinkName", validate_sink_name)
}

/// IAM or service policy document (JSON object)
pub fn policy_document() -> AttributeType {
    validated_string("PolicyDocument", validate_policy_document)
}

/// Organizations feature set
/// - ALL: consolidated billing plus policies
/// - CONSOLIDATED_BILLING: billing only
pub fn feature_set() -> AttributeType {
    enum_of(&["ALL", "CONSOLIDATED_BILLING"])
}

pub fn policy_type() -> AttributeType {
    enum_of(POLICY_TYPES)
}

pub fn policy_type_list() -> AttributeType {
    AttributeType::List(Box::new(policy_type()))
}

pub fn iam_user_access_to_billing() -> AttributeType {
    enum_of(&["ALLOW", "DENY"])
}

pub fn oam_resource_type_list() -> AttributeType {
    AttributeType::List(Box::new(enum_of(OAM_RESOURCE_TYPES)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_core::resource::Value;

    #[test]
    fn policy_type_accepts_known_types() {
        let t = policy_type();
        for policy_type in POLICY_TYPES {
            assert!(t.validate(&Value::string(*policy_type)).is_ok());
        }
        assert!(t.validate(&Value::string("service_control_policy")).is_err());
    }

    #[test]
    fn policy_type_list_reports_bad_entry() {
        let t = policy_type_list();
        let value = Value::string_list(["TAG_POLICY", "NOT_A_POLICY"]);
        let err = t.validate(&value).unwrap_err().to_string();
        assert!(err.contains("index 1"), "{}", err);
    }

    #[test]
    fn oam_resource_types() {
        let t = oam_resource_type_list();
        assert!(
            t.validate(&Value::string_list(["AWS::Logs::LogGroup", "AWS::XRay::Trace"]))
                .is_ok()
        );
        assert!(t.validate(&Value::string_list(["AWS::S3::Bucket"])).is_err());
    }

    #[test]
    fn email_type_rejects_bool() {
        assert!(email().validate(&Value::Bool(true)).is_err());
        assert!(email().validate(&Value::string("dev@example.com")).is_ok());
    }

    #[test]
    fn billing_access_is_upper_case() {
        let t = iam_user_access_to_billing();
        assert!(t.validate(&Value::string("ALLOW")).is_ok());
        assert!(t.validate(&Value::string("allow")).is_err());
    }
}
