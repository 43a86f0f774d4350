//! Typed concept handles.
//!
//! One tagged variant covers the whole concept hierarchy; there are no
//! parallel local/remote type trees. A bare [`Concept`] is a local handle: an
//! identity plus kind, performing no I/O. Binding it to a transaction with
//! [`Concept::bind`] yields a [`BoundConcept`] through which all server
//! interaction flows.

use chrono::{DateTime, Utc};

use crate::transaction::Transaction;

pub mod codec;
pub mod remote;

pub use remote::{BoundConcept, ConceptManager};

/// An immutable, typed reference to a database concept.
#[derive(Debug, Clone, PartialEq)]
pub enum Concept {
    Entity { iid: String },
    Relation { iid: String },
    Attribute { iid: String, value: Value },
    EntityType { label: String },
    RelationType { label: String },
    AttributeType { label: String, value_kind: ValueKind },
    RoleType { label: String },
}

impl Concept {
    /// The concept's identity: an iid for things, a label for types.
    pub fn id(&self) -> &str {
        match self {
            Concept::Entity { iid }
            | Concept::Relation { iid }
            | Concept::Attribute { iid, .. } => iid,
            Concept::EntityType { label }
            | Concept::RelationType { label }
            | Concept::AttributeType { label, .. }
            | Concept::RoleType { label } => label,
        }
    }

    pub fn is_thing(&self) -> bool {
        matches!(
            self,
            Concept::Entity { .. } | Concept::Relation { .. } | Concept::Attribute { .. }
        )
    }

    pub fn is_type(&self) -> bool {
        !self.is_thing()
    }

    pub fn is_relation(&self) -> bool {
        matches!(self, Concept::Relation { .. })
    }

    pub fn is_attribute(&self) -> bool {
        matches!(self, Concept::Attribute { .. })
    }

    /// Bind this handle to a transaction for server interaction. The handle
    /// itself stays a pure value; only the bound wrapper can perform I/O.
    pub fn bind<'a>(&self, transaction: &'a Transaction) -> BoundConcept<'a> {
        BoundConcept::new(transaction, self.clone())
    }
}

/// An attribute's payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Long(i64),
    Double(f64),
    Text(String),
    DateTime(DateTime<Utc>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Long(_) => ValueKind::Long,
            Value::Double(_) => ValueKind::Double,
            Value::Text(_) => ValueKind::Text,
            Value::DateTime(_) => ValueKind::DateTime,
        }
    }
}

/// Discriminant determining how an attribute payload is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Boolean,
    Long,
    Double,
    Text,
    DateTime,
}
