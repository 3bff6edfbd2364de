//! Attribute validators
//!
//! Each validator checks a single value and reports a human-readable message.
//! Schemas wrap them into custom attribute types (see `schemas::types`).

use std::sync::LazyLock;

use regex::Regex;
use stratus_core::resource::Value;
use stratus_core::schema::{validate_json_document, validate_length};

/// Policy types supported by AWS Organizations
pub const POLICY_TYPES: &[&str] = &[
    "SERVICE_CONTROL_POLICY",
    "RESOURCE_CONTROL_POLICY",
    "TAG_POLICY",
    "BACKUP_POLICY",
    "AISERVICES_OPT_OUT_POLICY",
    "CHATBOT_POLICY",
    "DECLARATIVE_POLICY_EC2",
];

/// Resource types an OAM link can share
pub const OAM_RESOURCE_TYPES: &[&str] = &[
    "AWS::CloudWatch::Metric",
    "AWS::Logs::LogGroup",
    "AWS::XRay::Trace",
    "AWS::ApplicationInsights::Application",
    "AWS::InternetMonitor::Monitor",
];

type Pattern = LazyLock<Result<Regex, regex::Error>>;

static EMAIL_PATTERN: Pattern = LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$"));
static ROLE_NAME_PATTERN: Pattern = LazyLock::new(|| Regex::new(r"^[\w+=,.@-]{1,64}$"));
static SINK_NAME_PATTERN: Pattern = LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_.-]{1,255}$"));

fn expect_string(value: &Value) -> Result<&str, String> {
    match value {
        Value::String(s) => Ok(s),
        _ => Err("Expected string".to_string()),
    }
}

fn matches(pattern: &Pattern, s: &str) -> Result<bool, String> {
    let re = LazyLock::force(pattern).as_ref().map_err(|e| e.to_string())?;
    Ok(re.is_match(s))
}

pub fn validate_email(value: &Value) -> Result<(), String> {
    let s = expect_string(value)?;
    validate_length(s, 6, 64).map_err(|e| format!("invalid email '{}': {}", s, e))?;
    if !matches(&EMAIL_PATTERN, s)? {
        return Err(format!("invalid email '{}': expected local@domain.tld", s));
    }
    Ok(())
}

pub fn validate_account_name(value: &Value) -> Result<(), String> {
    let s = expect_string(value)?;
    validate_length(s, 1, 50).map_err(|e| format!("invalid account name: {}", e))
}

pub fn validate_organizational_unit_name(value: &Value) -> Result<(), String> {
    let s = expect_string(value)?;
    validate_length(s, 1, 128).map_err(|e| format!("invalid organizational unit name: {}", e))
}

pub fn validate_role_name(value: &Value) -> Result<(), String> {
    let s = expect_string(value)?;
    if matches(&ROLE_NAME_PATTERN, s)? {
        Ok(())
    } else {
        Err(format!(
            "invalid role name '{}': must be 1-64 characters of letters, digits and +=,.@_-",
            s
        ))
    }
}

pub fn validate_sink_name(value: &Value) -> Result<(), String> {
    let s = expect_string(value)?;
    if matches(&SINK_NAME_PATTERN, s)? {
        Ok(())
    } else {
        Err(format!(
            "invalid sink name '{}': must be 1-255 characters of letters, digits and _.-",
            s
        ))
    }
}

pub fn validate_policy_document(value: &Value) -> Result<(), String> {
    validate_json_document(expect_string(value)?)
}

/// Split a policy attachment import ID (`target_id:policy_id`)
pub fn parse_policy_attachment_id(import_id: &str) -> Result<(String, String), String> {
    match import_id.split_once(':') {
        Some((target, policy)) if !target.is_empty() && !policy.is_empty() && !policy.contains(':') => {
            Ok((target.to_string(), policy.to_string()))
        }
        _ => Err(format!(
            "unexpected format for ID ({}), expected TARGET_ID:POLICY_ID",
            import_id
        )),
    }
}
