use crate::decoder::{self, DecodeError};
use http::StatusCode;
use indexmap::IndexMap;
use row_store::config::StoreConfig;
use row_store::{EntityDescriptor, FieldSpec, FieldType, SchemaError};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use thiserror::Error;

const DEFAULT_RECEIVE_PATH: &str = "/receive";
const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Receive path must start with '/': {0}")]
    InvalidReceivePath(String),

    #[error("max_body_bytes cannot be 0")]
    InvalidBodyLimit,

    #[error("No entities configured")]
    NoEntities,

    #[error("Table map entry {identifier} references unknown entity {entity}")]
    UnknownMappedEntity { identifier: String, entity: String },

    #[error("Invalid allow list address: {0}")]
    InvalidAllowListEntry(String),

    #[error("Invalid default for {entity}.{field}: {source}")]
    InvalidDefault {
        entity: String,
        field: String,
        #[source]
        source: DecodeError,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// How outcomes of the receive endpoint map to HTTP status codes.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Each outcome carries its own status code.
    #[default]
    StatusCodes,
    /// Every outcome is reported with 200; only the message tells them apart.
    Legacy,
}

impl ResponseMode {
    /// Status actually sent for an outcome that would carry `status`.
    pub fn status(self, status: StatusCode) -> StatusCode {
        match self {
            ResponseMode::StatusCodes => status,
            ResponseMode::Legacy => StatusCode::OK,
        }
    }
}

/// Data receiver configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener for incoming batches
    pub listener: Listener,
    /// Admin listener for health and readiness probes
    pub admin_listener: Listener,
    /// Path of the receive endpoint
    #[serde(default = "default_receive_path")]
    pub receive_path: String,
    #[serde(default)]
    pub response_mode: ResponseMode,
    /// Request bodies larger than this are rejected before decoding
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default)]
    pub allow_list: AllowListConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Entity descriptors keyed by entity name
    pub entities: IndexMap<String, EntityConfig>,
    /// Maps wire identifiers to entity names.
    ///
    /// When absent, every entity is addressable by its own name.
    #[serde(default)]
    pub table_map: Option<HashMap<String, String>>,
}

fn default_receive_path() -> String {
    DEFAULT_RECEIVE_PATH.to_string()
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

impl Config {
    /// Validates the data receiver configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if !self.receive_path.starts_with('/') {
            return Err(ValidationError::InvalidReceivePath(
                self.receive_path.clone(),
            ));
        }

        if self.max_body_bytes == 0 {
            return Err(ValidationError::InvalidBodyLimit);
        }

        self.allow_list.parse()?;

        // Builds every descriptor and checks the table map against them
        crate::registry::EntityRegistry::from_config(self)?;

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    /// Validates the listener configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Peers allowed to submit batches.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct AllowListConfig {
    #[serde(default)]
    pub ips: Vec<String>,
    /// When false, unlisted peers are logged but still served.
    #[serde(default)]
    pub enforce: bool,
}

impl AllowListConfig {
    pub fn parse(&self) -> Result<Vec<IpAddr>, ValidationError> {
        self.ips
            .iter()
            .map(|ip| {
                ip.trim()
                    .parse::<IpAddr>()
                    .map_err(|_| ValidationError::InvalidAllowListEntry(ip.clone()))
            })
            .collect()
    }
}

/// Declared shape of one entity
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct EntityConfig {
    /// Ordered natural key fields
    pub key: Vec<String>,
    /// Fields in declaration order
    pub fields: IndexMap<String, FieldConfig>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct FieldConfig {
    #[serde(flatten)]
    pub field_type: FieldType,
    /// Defaults to false for key fields and true for everything else
    #[serde(default)]
    pub nullable: Option<bool>,
    /// Value used when a record omits the field, in wire form
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

impl EntityConfig {
    pub fn to_descriptor(&self, name: &str) -> Result<EntityDescriptor, ValidationError> {
        let mut fields = Vec::with_capacity(self.fields.len());

        for (field_name, field_config) in &self.fields {
            let is_key = self.key.contains(field_name);
            let mut spec = FieldSpec::new(field_name.clone(), field_config.field_type.clone());
            if !field_config.nullable.unwrap_or(!is_key) {
                spec = spec.required();
            }

            if let Some(raw_default) = &field_config.default {
                let default = decoder::coerce(&spec, raw_default).map_err(|source| {
                    ValidationError::InvalidDefault {
                        entity: name.to_string(),
                        field: field_name.clone(),
                        source,
                    }
                })?;
                if !default.is_null() {
                    spec = spec.with_default(default);
                }
            }

            fields.push(spec);
        }

        Ok(EntityDescriptor::new(name, fields, self.key.clone())?)
    }
}

impl FieldConfig {
    pub fn new(field_type: FieldType) -> Self {
        FieldConfig {
            field_type,
            nullable: None,
            default: None,
        }
    }
}
