//! Built-in DTO configuration and registry compilation.

use crate::error::SyncError;
use crate::model::EntityType;
use eventsync_validate::{DtoConfig, Operation, SchemaRegistry};
use std::path::Path;

const DEFAULT_DTO: &str = include_str!("default_dto.json");

/// DTO configuration shipped with the engine.
pub fn default_config() -> Result<DtoConfig, SyncError> {
    DtoConfig::from_json_str(DEFAULT_DTO)
        .map_err(|e| SyncError::Configuration(format!("built-in DTO configuration: {e}")))
}

/// Loads the DTO configuration from `path`, or the built-in one.
pub fn load_config(path: Option<&Path>) -> Result<DtoConfig, SyncError> {
    match path {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading DTO configuration");
            DtoConfig::from_path(path).map_err(|e| SyncError::Configuration(e.to_string()))
        }
        None => default_config(),
    }
}

/// Compiles a configuration and checks it covers every entity type.
///
/// Every entity needs a create schema; every entity that is not
/// create-only also needs an update schema.
pub fn compile_registry(config: &DtoConfig) -> Result<SchemaRegistry, SyncError> {
    let registry =
        SchemaRegistry::compile(config).map_err(|e| SyncError::Configuration(e.to_string()))?;

    for entity in EntityType::ALL {
        registry
            .require(entity.as_str(), Operation::Create)
            .map_err(|e| SyncError::Configuration(e.to_string()))?;
        if !entity.is_create_only() {
            registry
                .require(entity.as_str(), Operation::Update)
                .map_err(|e| SyncError::Configuration(e.to_string()))?;
        }
    }

    Ok(registry)
}
