//! CloudWatch Observability Access Manager schemas

use stratus_core::schema::types::string_list;
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema};

use super::types;

pub const SINK: &str = "oam_sink";
pub const SINK_POLICY: &str = "oam_sink_policy";
pub const LINK: &str = "oam_link";
pub const SINKS: &str = "oam_sinks";

fn computed_string(name: &str) -> AttributeSchema {
    AttributeSchema::new(name, AttributeType::String).computed()
}

fn sink_identifier() -> AttributeSchema {
    AttributeSchema::new("sink_identifier", AttributeType::String)
        .required()
        .force_new()
}

pub fn sink() -> ResourceSchema {
    ResourceSchema::new(SINK)
        .attribute(AttributeSchema::new("name", types::sink_name()).required().force_new())
        .attribute(computed_string("arn"))
        .attribute(computed_string("sink_id"))
}

pub fn sink_policy() -> ResourceSchema {
    ResourceSchema::new(SINK_POLICY)
        .attribute(sink_identifier())
        .attribute(AttributeSchema::new("policy", types::policy_document()).required())
        .attribute(computed_string("arn"))
        .attribute(computed_string("sink_id"))
}

pub fn link() -> ResourceSchema {
    ResourceSchema::new(LINK)
        .attribute(
            AttributeSchema::new("label_template", AttributeType::String)
                .required()
                .force_new()
                .with_description("Label with $AccountName, $AccountEmail or $AccountEmailNoDomain"),
        )
        .attribute(
            AttributeSchema::new("resource_types", types::oam_resource_type_list())
                .required()
                .unordered(),
        )
        .attribute(sink_identifier())
        .attribute(computed_string("arn"))
        .attribute(computed_string("label"))
        .attribute(computed_string("link_id"))
        .attribute(computed_string("sink_arn"))
}

/// Data source: a single sink
pub fn sink_data_source() -> ResourceSchema {
    ResourceSchema::new(SINK)
        .attribute(AttributeSchema::new("sink_identifier", AttributeType::String).required())
        .attribute(computed_string("arn"))
        .attribute(computed_string("name"))
        .attribute(computed_string("sink_id"))
}

/// Data source: ARNs of every sink in the region
pub fn sinks_data_source() -> ResourceSchema {
    ResourceSchema::new(SINKS).attribute(AttributeSchema::new("arns", string_list()).computed())
}

pub fn schemas() -> Vec<ResourceSchema> {
    vec![sink(), sink_policy(), link()]
}
