//! AWS resource schema definitions

pub mod oam;
pub mod organizations;
pub mod types;

use stratus_core::schema::ResourceSchema;

/// Returns all resource schemas
pub fn all_schemas() -> Vec<ResourceSchema> {
    let mut schemas = Vec::new();
    schemas.extend(organizations::schemas());
    schemas.extend(oam::schemas());
    schemas
}

/// Returns all data source schemas
pub fn data_source_schemas() -> Vec<ResourceSchema> {
    vec![
        oam::sink_data_source(),
        oam::sinks_data_source(),
        organizations::organizational_units(),
    ]
}
