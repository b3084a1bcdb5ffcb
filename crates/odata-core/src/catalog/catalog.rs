//! Relation graph inspector.
//!
//! The catalog is built once from a [`SchemaBundle`] and is read-only
//! afterwards. Entity types live in an arena addressed by [`EntityId`];
//! relation lookups are a single map read per type.

use super::{EntityDef, EntityId, RelationDef, RelationDescriptor, SchemaBundle};
use crate::error::{CatalogError, UnknownRelation};
use std::collections::HashMap;
use tracing::debug;

/// Registered entity types and their relations.
#[derive(Debug, Clone)]
pub struct Catalog {
    entities: Vec<EntityDef>,
    by_name: HashMap<String, EntityId>,
    /// Relations per entity, indexed by [`EntityId`].
    relations: Vec<HashMap<String, RelationDescriptor>>,
}

impl Catalog {
    /// Validate a schema bundle and build the catalog from it.
    pub fn from_bundle(bundle: SchemaBundle) -> Result<Self, CatalogError> {
        let mut by_name = HashMap::with_capacity(bundle.entities.len());
        for (index, entity) in bundle.entities.iter().enumerate() {
            if entity.get_identity_field().is_none() {
                return Err(CatalogError::MissingIdentityField {
                    entity: entity.name.clone(),
                    field: entity.identity_field.clone(),
                });
            }
            let id = EntityId(index as u32);
            if by_name.insert(entity.name.clone(), id).is_some() {
                return Err(CatalogError::DuplicateEntity(entity.name.clone()));
            }
        }

        let mut catalog = Self {
            relations: vec![HashMap::new(); bundle.entities.len()],
            entities: bundle.entities,
            by_name,
        };

        for relation in bundle.relations {
            catalog.register_relation(relation)?;
        }

        debug!(
            entities = catalog.entities.len(),
            relations = catalog.relations.iter().map(HashMap::len).sum::<usize>(),
            "catalog built"
        );
        Ok(catalog)
    }

    fn register_relation(&mut self, relation: RelationDef) -> Result<(), CatalogError> {
        let resolve = |name: &str| {
            self.by_name
                .get(name)
                .copied()
                .ok_or_else(|| CatalogError::UnknownEntity {
                    relation: relation.name.clone(),
                    entity: name.to_string(),
                })
        };
        let source = resolve(&relation.from_entity)?;
        let target = resolve(&relation.to_entity)?;

        let source_def = &self.entities[source.index()];
        let target_def = &self.entities[target.index()];

        if source_def.get_field(&relation.name).is_some() {
            return Err(CatalogError::RelationFieldConflict {
                entity: source_def.name.clone(),
                relation: relation.name.clone(),
            });
        }

        let missing_key = |entity: &EntityDef, field: &str| CatalogError::MissingKeyField {
            relation: relation.name.clone(),
            entity: entity.name.clone(),
            field: field.to_string(),
        };
        if let Some(local_key) = relation.kind.local_key() {
            if source_def.get_field(local_key).is_none() {
                return Err(missing_key(source_def, local_key));
            }
        }
        if let Some(remote_key) = relation.kind.remote_key() {
            if target_def.get_field(remote_key).is_none() {
                return Err(missing_key(target_def, remote_key));
            }
        }

        let descriptor = RelationDescriptor {
            name: relation.name.clone(),
            source,
            source_name: source_def.name.clone(),
            source_identity_field: source_def.identity_field.clone(),
            target,
            target_name: target_def.name.clone(),
            identity_field: target_def.identity_field.clone(),
            cardinality: relation.kind.cardinality(),
            ownership: relation.kind.ownership(),
            kind: relation.kind,
        };

        let slot = &mut self.relations[source.index()];
        if slot.contains_key(&descriptor.name) {
            return Err(CatalogError::DuplicateRelation {
                entity: descriptor.source_name,
                relation: descriptor.name,
            });
        }
        slot.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Look up an entity id by name.
    pub fn entity_id(&self, name: &str) -> Option<EntityId> {
        self.by_name.get(name).copied()
    }

    /// Get an entity definition by id.
    pub fn entity(&self, id: EntityId) -> Option<&EntityDef> {
        self.entities.get(id.index())
    }

    /// Get an entity definition by name.
    pub fn entity_by_name(&self, name: &str) -> Option<&EntityDef> {
        self.entity_id(name).and_then(|id| self.entity(id))
    }

    /// Iterate over all entities in registration order.
    pub fn entities(&self) -> impl Iterator<Item = (EntityId, &EntityDef)> {
        self.entities
            .iter()
            .enumerate()
            .map(|(index, def)| (EntityId(index as u32), def))
    }

    /// Describe a relation of an entity type.
    pub fn describe(
        &self,
        entity: EntityId,
        relation: &str,
    ) -> Result<&RelationDescriptor, UnknownRelation> {
        let Some(def) = self.entity(entity) else {
            return Err(UnknownRelation::new(entity.to_string(), relation, "unknown entity"));
        };

        if let Some(descriptor) = self.relations[entity.index()].get(relation) {
            return Ok(descriptor);
        }

        let detail = if def.get_field(relation).is_some() {
            format!("'{}' is a field, not a relation", relation)
        } else {
            "no such relation".to_string()
        };
        Err(UnknownRelation::new(&def.name, relation, detail))
    }

    /// Describe a relation, addressing the entity by name.
    pub fn describe_by_name(
        &self,
        entity: &str,
        relation: &str,
    ) -> Result<&RelationDescriptor, UnknownRelation> {
        let id = self
            .entity_id(entity)
            .ok_or_else(|| UnknownRelation::new(entity, relation, "unknown entity"))?;
        self.describe(id, relation)
    }

    /// All relations of an entity, sorted by name.
    pub fn relations_of(&self, entity: EntityId) -> Vec<&RelationDescriptor> {
        let mut relations: Vec<&RelationDescriptor> = self
            .relations
            .get(entity.index())
            .map(|slot| slot.values().collect())
            .unwrap_or_default();
        relations.sort_by(|a, b| a.name.cmp(&b.name));
        relations
    }
}
