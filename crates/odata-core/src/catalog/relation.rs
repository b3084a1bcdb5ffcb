//! Relation definitions between entities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Arena index of an entity type inside a [`Catalog`](super::Catalog).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct EntityId(pub(crate) u32);

impl EntityId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether a relation yields one related entity or many.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    Single,
    Collection,
}

/// Which side of the relation holds the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Ownership {
    /// The source entity holds a local foreign-key column.
    Forward,
    /// The key lives on the target entity or an association table.
    Reverse,
}

/// How a relation is stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationKind {
    /// Source holds `local_key` referencing the target identity.
    ManyToOne { local_key: String },
    /// Source holds a unique `local_key` referencing the target identity.
    OneToOne { local_key: String },
    /// Target holds a unique `remote_key` referencing the source identity.
    OneToOneReverse { remote_key: String },
    /// Target holds `remote_key` referencing the source identity.
    OneToMany { remote_key: String },
    /// Rows of the `through` table pair `source_key` (source identity) with
    /// `target_key` (target identity).
    ManyToMany {
        through: String,
        source_key: String,
        target_key: String,
    },
}

impl RelationKind {
    pub fn cardinality(&self) -> Cardinality {
        match self {
            RelationKind::ManyToOne { .. }
            | RelationKind::OneToOne { .. }
            | RelationKind::OneToOneReverse { .. } => Cardinality::Single,
            RelationKind::OneToMany { .. } | RelationKind::ManyToMany { .. } => {
                Cardinality::Collection
            }
        }
    }

    pub fn ownership(&self) -> Ownership {
        match self {
            RelationKind::ManyToOne { .. } | RelationKind::OneToOne { .. } => Ownership::Forward,
            _ => Ownership::Reverse,
        }
    }

    /// Foreign-key column on the source entity, for forward relations.
    pub fn local_key(&self) -> Option<&str> {
        match self {
            RelationKind::ManyToOne { local_key } | RelationKind::OneToOne { local_key } => {
                Some(local_key)
            }
            _ => None,
        }
    }

    /// Foreign-key column on the target entity, for reverse relations that
    /// do not go through an association table.
    pub fn remote_key(&self) -> Option<&str> {
        match self {
            RelationKind::OneToOneReverse { remote_key } | RelationKind::OneToMany { remote_key } => {
                Some(remote_key)
            }
            _ => None,
        }
    }
}

/// A relation definition between two entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDef {
    /// Relation name (unique per source entity).
    pub name: String,
    /// Source entity name.
    pub from_entity: String,
    /// Target entity name.
    pub to_entity: String,
    #[serde(flatten)]
    pub kind: RelationKind,
}

impl RelationDef {
    fn with_kind(
        name: impl Into<String>,
        from_entity: impl Into<String>,
        to_entity: impl Into<String>,
        kind: RelationKind,
    ) -> Self {
        Self {
            name: name.into(),
            from_entity: from_entity.into(),
            to_entity: to_entity.into(),
            kind,
        }
    }

    /// Create a many-to-one relation (e.g. `Post.author` via `author_id`).
    pub fn many_to_one(
        name: impl Into<String>,
        from_entity: impl Into<String>,
        local_key: impl Into<String>,
        to_entity: impl Into<String>,
    ) -> Self {
        let kind = RelationKind::ManyToOne {
            local_key: local_key.into(),
        };
        Self::with_kind(name, from_entity, to_entity, kind)
    }

    /// Create a one-to-one relation owned by the source.
    pub fn one_to_one(
        name: impl Into<String>,
        from_entity: impl Into<String>,
        local_key: impl Into<String>,
        to_entity: impl Into<String>,
    ) -> Self {
        let kind = RelationKind::OneToOne {
            local_key: local_key.into(),
        };
        Self::with_kind(name, from_entity, to_entity, kind)
    }

    /// Create the reverse side of a one-to-one relation.
    pub fn one_to_one_reverse(
        name: impl Into<String>,
        from_entity: impl Into<String>,
        to_entity: impl Into<String>,
        remote_key: impl Into<String>,
    ) -> Self {
        let kind = RelationKind::OneToOneReverse {
            remote_key: remote_key.into(),
        };
        Self::with_kind(name, from_entity, to_entity, kind)
    }

    /// Create a one-to-many relation (e.g. `Author.posts` via `Post.author_id`).
    pub fn one_to_many(
        name: impl Into<String>,
        from_entity: impl Into<String>,
        to_entity: impl Into<String>,
        remote_key: impl Into<String>,
    ) -> Self {
        let kind = RelationKind::OneToMany {
            remote_key: remote_key.into(),
        };
        Self::with_kind(name, from_entity, to_entity, kind)
    }

    /// Create a many-to-many relation through an association table.
    pub fn many_to_many(
        name: impl Into<String>,
        from_entity: impl Into<String>,
        to_entity: impl Into<String>,
        through: impl Into<String>,
        source_key: impl Into<String>,
        target_key: impl Into<String>,
    ) -> Self {
        let kind = RelationKind::ManyToMany {
            through: through.into(),
            source_key: source_key.into(),
            target_key: target_key.into(),
        };
        Self::with_kind(name, from_entity, to_entity, kind)
    }
}

/// Resolved metadata about one named relation, as answered by the
/// [`Catalog`](super::Catalog).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationDescriptor {
    pub name: String,
    pub source: EntityId,
    pub source_name: String,
    /// Identity field of the source type; reverse relations key on it.
    pub source_identity_field: String,
    pub target: EntityId,
    pub target_name: String,
    /// Identity field of the target type.
    pub identity_field: String,
    pub cardinality: Cardinality,
    pub ownership: Ownership,
    pub kind: RelationKind,
}

impl RelationDescriptor {
    /// Forward single-valued relations can be fetched with a join.
    pub fn is_join(&self) -> bool {
        self.ownership == Ownership::Forward && self.cardinality == Cardinality::Single
    }

    pub fn local_key(&self) -> Option<&str> {
        self.kind.local_key()
    }

    pub fn remote_key(&self) -> Option<&str> {
        self.kind.remote_key()
    }
}
