//! Target payload validation for eventsync.
//!
//! A DTO configuration lists, per target entity, the fields each operation
//! accepts and the rules those fields obey. It is compiled once into a
//! [`SchemaRegistry`]; every payload is then checked against the compiled
//! table and all violations are reported together.
//!
//! # Example
//!
//! ```rust
//! use eventsync_validate::{DtoConfig, Operation, SchemaRegistry};
//! use serde_json::json;
//!
//! let config = DtoConfig::from_json_str(r#"{
//!   "entities": {
//!     "room": {
//!       "create": { "required": ["name"] },
//!       "rules": { "name": { "type": "string", "minLength": 1 } }
//!     }
//!   }
//! }"#).unwrap();
//! let registry = SchemaRegistry::compile(&config).unwrap();
//!
//! let schema = registry.require("room", Operation::Create).unwrap();
//! let payload = json!({ "name": "" }).as_object().cloned().unwrap();
//! let err = schema.validate(&payload).unwrap_err();
//! assert_eq!(err.fields(), vec!["name"]);
//! ```

pub mod common;
pub mod config;
pub mod error;
pub mod schema;

pub use common::{Operation, ValidationError, Violation};
pub use config::{DtoConfig, EntityDto, FieldRule, FieldType, OperationFields};
pub use error::SchemaError;
pub use schema::{CompiledSchema, SchemaRegistry};
