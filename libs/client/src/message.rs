//! Logical wire message shapes for the transaction protocol.
//!
//! Concept kinds and value kinds travel as raw integer tags rather than serde
//! enums, so that an unrecognized tag is a decode-level protocol violation
//! instead of a deserialization failure.

use serde::{Deserialize, Serialize};

use crate::options::Options;

/// Wire tags for concept kinds.
pub mod kind {
    pub const ENTITY: u16 = 0;
    pub const RELATION: u16 = 1;
    pub const ATTRIBUTE: u16 = 2;
    pub const ENTITY_TYPE: u16 = 3;
    pub const RELATION_TYPE: u16 = 4;
    pub const ATTRIBUTE_TYPE: u16 = 5;
    pub const ROLE_TYPE: u16 = 6;
}

/// Wire tags for attribute value kinds.
pub mod value_kind {
    pub const BOOLEAN: u16 = 0;
    pub const LONG: u16 = 1;
    pub const DOUBLE: u16 = 2;
    pub const TEXT: u16 = 3;
    pub const DATETIME: u16 = 4;
}

/// A concept identity on the wire: id and kind only. Bound-handle transaction
/// context is never serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptRef {
    pub kind: u16,
    pub id: String,
}

/// A wire-encoded concept record.
///
/// `value_kind` and `value` are populated for attribute records; attribute
/// type records carry `value_kind` alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptRecord {
    pub kind: u16,
    pub id: String,
    pub value_kind: Option<u16>,
    pub value: Option<WireValue>,
}

/// Value payload forms. Date-time travels as integer epoch milliseconds, UTC
/// assumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireValue {
    Boolean(bool),
    Long(i64),
    Double(f64),
    Text(String),
    Millis(i64),
}

/// One tagged request. A request is streaming iff `streaming` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub correlation_id: u64,
    pub operation: Operation,
    pub streaming: Option<StreamHint>,
}

/// Batch-size hint carried by streaming requests. Continuations always ask
/// for a bounded batch, never "all remaining".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHint {
    pub batch_size: u32,
}

/// One tagged response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub correlation_id: u64,
    pub body: ResponseBody,
}

/// The four response variants: single-response, batch-response,
/// end-of-stream, error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseBody {
    Ok(Payload),
    Batch(Vec<ConceptRecord>),
    Done,
    Error(String),
}

/// Payload of a single (non-streaming) response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Unit,
    Bool(bool),
    Concept(ConceptRecord),
    OptionalConcept(Option<ConceptRecord>),
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Unit => PayloadKind::Unit,
            Payload::Bool(_) => PayloadKind::Bool,
            Payload::Concept(_) => PayloadKind::Concept,
            Payload::OptionalConcept(_) => PayloadKind::OptionalConcept,
        }
    }
}

/// Response-shape tag recorded against each pending call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Unit,
    Bool,
    Concept,
    OptionalConcept,
}

/// The operation set of the façade, with arguments embedded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operation {
    // Things
    ThingGetType { iid: String },
    ThingIsInferred { iid: String },
    ThingGetHas { iid: String, keys_only: bool, attribute_types: Vec<ConceptRef> },
    ThingGetPlays { iid: String },
    ThingGetRelations { iid: String, role_types: Vec<ConceptRef> },
    ThingSetHas { iid: String, attribute: ConceptRef },
    ThingUnsetHas { iid: String, attribute: ConceptRef },
    ThingDelete { iid: String },

    // Relations
    RelationAddPlayer { iid: String, role_type: ConceptRef, player: ConceptRef },
    RelationRemovePlayer { iid: String, role_type: ConceptRef, player: ConceptRef },
    RelationGetPlayers { iid: String, role_types: Vec<ConceptRef> },

    // Types
    TypeDelete { label: String },
    TypeSetLabel { label: String, new_label: String },
    TypeGetSupertype { label: String },
    TypeSetSupertype { label: String, supertype: ConceptRef },
    TypeGetSupertypes { label: String },
    TypeGetSubtypes { label: String },
    TypeGetInstances { label: String },
    EntityTypeCreate { label: String },
    RelationTypeCreate { label: String },
    AttributeTypePut { label: String, value: WireValue },
    AttributeTypeGet { label: String, value: WireValue },

    // Concept lookup
    GetThing { iid: String },
    GetType { label: String },
    PutEntityType { label: String },
    PutRelationType { label: String },
    PutAttributeType { label: String, value_kind: u16 },

    // Queries
    QueryDefine { query: String, options: Options },
    QueryUndefine { query: String, options: Options },
    QueryDelete { query: String, options: Options },
    QueryInsert { query: String, options: Options },

    /// Fetch the next batch of an open iteration. Reuses the iteration's
    /// correlation id.
    Continue,
}

impl Operation {
    /// Expected response shape for a unary call; `None` for streaming
    /// operations and `Continue`.
    pub fn expected_response(&self) -> Option<PayloadKind> {
        use Operation::*;
        match self {
            ThingGetType { .. }
            | TypeGetSupertype { .. }
            | EntityTypeCreate { .. }
            | RelationTypeCreate { .. }
            | AttributeTypePut { .. }
            | PutEntityType { .. }
            | PutRelationType { .. }
            | PutAttributeType { .. } => Some(PayloadKind::Concept),
            ThingIsInferred { .. } => Some(PayloadKind::Bool),
            ThingSetHas { .. }
            | ThingUnsetHas { .. }
            | ThingDelete { .. }
            | RelationAddPlayer { .. }
            | RelationRemovePlayer { .. }
            | TypeDelete { .. }
            | TypeSetLabel { .. }
            | TypeSetSupertype { .. }
            | QueryDefine { .. }
            | QueryUndefine { .. }
            | QueryDelete { .. } => Some(PayloadKind::Unit),
            AttributeTypeGet { .. } | GetThing { .. } | GetType { .. } => {
                Some(PayloadKind::OptionalConcept)
            }
            ThingGetHas { .. }
            | ThingGetPlays { .. }
            | ThingGetRelations { .. }
            | RelationGetPlayers { .. }
            | TypeGetSupertypes { .. }
            | TypeGetSubtypes { .. }
            | TypeGetInstances { .. }
            | QueryInsert { .. }
            | Continue => None,
        }
    }

    /// Whether this operation produces a paged result stream.
    pub fn is_streaming(&self) -> bool {
        use Operation::*;
        matches!(
            self,
            ThingGetHas { .. }
                | ThingGetPlays { .. }
                | ThingGetRelations { .. }
                | RelationGetPlayers { .. }
                | TypeGetSupertypes { .. }
                | TypeGetSubtypes { .. }
                | TypeGetInstances { .. }
                | QueryInsert { .. }
        )
    }
}
