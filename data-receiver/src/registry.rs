use crate::config::{Config, ValidationError};
use crate::errors::DataReceiverError;
use row_store::EntityDescriptor;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Resolves wire identifiers to entity descriptors.
///
/// Built once from configuration and shared read-only afterwards.
#[derive(Debug)]
pub struct EntityRegistry {
    identifiers: HashMap<String, Arc<EntityDescriptor>>,
    descriptors: Vec<Arc<EntityDescriptor>>,
}

impl EntityRegistry {
    /// Builds a registry over `descriptors`.
    ///
    /// Without a table map every descriptor is addressable by its own name.
    pub fn new(
        descriptors: Vec<EntityDescriptor>,
        table_map: Option<&HashMap<String, String>>,
    ) -> Result<Self, ValidationError> {
        if descriptors.is_empty() {
            return Err(ValidationError::NoEntities);
        }

        let descriptors: Vec<Arc<EntityDescriptor>> =
            descriptors.into_iter().map(Arc::new).collect();
        let by_name: HashMap<&str, &Arc<EntityDescriptor>> = descriptors
            .iter()
            .map(|descriptor| (descriptor.name(), descriptor))
            .collect();

        let identifiers = match table_map {
            None => by_name
                .iter()
                .map(|(name, descriptor)| (name.to_string(), Arc::clone(descriptor)))
                .collect(),
            Some(table_map) => {
                let mut identifiers = HashMap::with_capacity(table_map.len());
                for (identifier, entity) in table_map {
                    let Some(descriptor) = by_name.get(entity.as_str()) else {
                        return Err(ValidationError::UnknownMappedEntity {
                            identifier: identifier.clone(),
                            entity: entity.clone(),
                        });
                    };
                    identifiers.insert(identifier.clone(), Arc::clone(descriptor));
                }
                identifiers
            }
        };

        Ok(EntityRegistry {
            identifiers,
            descriptors,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ValidationError> {
        let descriptors = config
            .entities
            .iter()
            .map(|(name, entity)| entity.to_descriptor(name))
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(descriptors, config.table_map.as_ref())
    }

    /// Looks up the entity a wire identifier refers to.
    pub fn resolve(&self, identifier: &str) -> Result<Arc<EntityDescriptor>, DataReceiverError> {
        self.identifiers
            .get(identifier)
            .cloned()
            .ok_or_else(|| DataReceiverError::UnknownEntity(identifier.to_string()))
    }

    /// Every registered descriptor, in configuration order.
    pub fn descriptors(&self) -> &[Arc<EntityDescriptor>] {
        &self.descriptors
    }

    /// Identifier to entity name, sorted by identifier.
    pub fn routes(&self) -> BTreeMap<&str, &str> {
        self.identifiers
            .iter()
            .map(|(identifier, descriptor)| (identifier.as_str(), descriptor.name()))
            .collect()
    }
}
