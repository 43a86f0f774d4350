//! Pure conversions between wire records and typed concept handles.
//!
//! Decode functions are total over the set of tags the protocol declares; any
//! tag outside that set is a `ProtocolViolation`, never a silent coercion to
//! a generic handle.

use chrono::{TimeZone, Utc};

use crate::concept::{Concept, Value, ValueKind};
use crate::error::{Error, Result};
use crate::message::{kind, value_kind, ConceptRecord, ConceptRef, WireValue};

/// Decode a wire record into a typed handle.
pub fn decode_concept(record: ConceptRecord) -> Result<Concept> {
    match record.kind {
        kind::ENTITY => Ok(Concept::Entity { iid: record.id }),
        kind::RELATION => Ok(Concept::Relation { iid: record.id }),
        kind::ATTRIBUTE => {
            let tag = record.value_kind.ok_or_else(|| {
                Error::ProtocolViolation("attribute record missing value kind".to_string())
            })?;
            let wire = record.value.ok_or_else(|| {
                Error::ProtocolViolation("attribute record missing value".to_string())
            })?;
            Ok(Concept::Attribute {
                iid: record.id,
                value: decode_value(tag, wire)?,
            })
        }
        kind::ENTITY_TYPE => Ok(Concept::EntityType { label: record.id }),
        kind::RELATION_TYPE => Ok(Concept::RelationType { label: record.id }),
        kind::ATTRIBUTE_TYPE => {
            let tag = record.value_kind.ok_or_else(|| {
                Error::ProtocolViolation("attribute type record missing value kind".to_string())
            })?;
            Ok(Concept::AttributeType {
                label: record.id,
                value_kind: decode_value_kind(tag)?,
            })
        }
        kind::ROLE_TYPE => Ok(Concept::RoleType { label: record.id }),
        other => Err(Error::ProtocolViolation(format!(
            "unknown concept kind tag {other}"
        ))),
    }
}

/// Encode a typed handle into a wire record.
pub fn encode_concept(concept: &Concept) -> ConceptRecord {
    let (value_kind, value) = match concept {
        Concept::Attribute { value, .. } => (
            Some(encode_value_kind(value.kind())),
            Some(encode_value(value)),
        ),
        Concept::AttributeType { value_kind, .. } => (Some(encode_value_kind(*value_kind)), None),
        _ => (None, None),
    };
    ConceptRecord {
        kind: kind_tag(concept),
        id: concept.id().to_string(),
        value_kind,
        value,
    }
}

/// Encode a handle as a bare wire reference: id and kind only.
pub fn reference(concept: &Concept) -> ConceptRef {
    ConceptRef {
        kind: kind_tag(concept),
        id: concept.id().to_string(),
    }
}

fn kind_tag(concept: &Concept) -> u16 {
    match concept {
        Concept::Entity { .. } => kind::ENTITY,
        Concept::Relation { .. } => kind::RELATION,
        Concept::Attribute { .. } => kind::ATTRIBUTE,
        Concept::EntityType { .. } => kind::ENTITY_TYPE,
        Concept::RelationType { .. } => kind::RELATION_TYPE,
        Concept::AttributeType { .. } => kind::ATTRIBUTE_TYPE,
        Concept::RoleType { .. } => kind::ROLE_TYPE,
    }
}

pub fn decode_value_kind(tag: u16) -> Result<ValueKind> {
    match tag {
        value_kind::BOOLEAN => Ok(ValueKind::Boolean),
        value_kind::LONG => Ok(ValueKind::Long),
        value_kind::DOUBLE => Ok(ValueKind::Double),
        value_kind::TEXT => Ok(ValueKind::Text),
        value_kind::DATETIME => Ok(ValueKind::DateTime),
        other => Err(Error::ProtocolViolation(format!(
            "unknown value kind tag {other}"
        ))),
    }
}

pub fn encode_value_kind(kind: ValueKind) -> u16 {
    match kind {
        ValueKind::Boolean => value_kind::BOOLEAN,
        ValueKind::Long => value_kind::LONG,
        ValueKind::Double => value_kind::DOUBLE,
        ValueKind::Text => value_kind::TEXT,
        ValueKind::DateTime => value_kind::DATETIME,
    }
}

/// Decode a value payload against its declared kind tag. The payload form
/// must agree with the tag.
pub fn decode_value(tag: u16, wire: WireValue) -> Result<Value> {
    let kind = decode_value_kind(tag)?;
    match (kind, wire) {
        (ValueKind::Boolean, WireValue::Boolean(b)) => Ok(Value::Boolean(b)),
        (ValueKind::Long, WireValue::Long(v)) => Ok(Value::Long(v)),
        (ValueKind::Double, WireValue::Double(v)) => Ok(Value::Double(v)),
        (ValueKind::Text, WireValue::Text(s)) => Ok(Value::Text(s)),
        (ValueKind::DateTime, WireValue::Millis(ms)) => Utc
            .timestamp_millis_opt(ms)
            .single()
            .map(Value::DateTime)
            .ok_or_else(|| Error::ProtocolViolation(format!("datetime out of range: {ms}"))),
        (kind, wire) => Err(Error::ProtocolViolation(format!(
            "value payload {wire:?} does not match declared kind {kind:?}"
        ))),
    }
}

/// Encode a value payload. Date-time truncates to millisecond precision; any
/// finer precision does not survive the round trip.
pub fn encode_value(value: &Value) -> WireValue {
    match value {
        Value::Boolean(b) => WireValue::Boolean(*b),
        Value::Long(v) => WireValue::Long(*v),
        Value::Double(v) => WireValue::Double(*v),
        Value::Text(s) => WireValue::Text(s.clone()),
        Value::DateTime(dt) => WireValue::Millis(dt.timestamp_millis()),
    }
}
