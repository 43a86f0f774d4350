//! Bound concept handles and the concept manager.
//!
//! This layer is pure dispatch: it builds wire operations through the codec
//! and delegates to the transaction's `execute`/`stream`. Operations that a
//! handle's kind cannot support fail client-side with `InvalidHandle` before
//! anything is sent.

use crate::concept::codec::{self, decode_concept, encode_value, reference};
use crate::concept::{Concept, Value, ValueKind};
use crate::error::{Error, Result};
use crate::message::{ConceptRef, Operation, Payload};
use crate::stream::ItemStream;
use crate::transaction::Transaction;

/// A concept handle bound to a transaction.
pub struct BoundConcept<'a> {
    transaction: &'a Transaction,
    concept: Concept,
}

impl<'a> BoundConcept<'a> {
    pub(crate) fn new(transaction: &'a Transaction, concept: Concept) -> Self {
        Self {
            transaction,
            concept,
        }
    }

    pub fn concept(&self) -> &Concept {
        &self.concept
    }

    // Thing operations

    /// Fetch the type of this thing.
    pub async fn fetch_type(&self) -> Result<Concept> {
        let payload = self
            .transaction
            .execute(Operation::ThingGetType { iid: self.iid()? })
            .await?;
        self.single_concept(payload)
    }

    pub async fn is_inferred(&self) -> Result<bool> {
        let payload = self
            .transaction
            .execute(Operation::ThingIsInferred { iid: self.iid()? })
            .await?;
        match payload {
            Payload::Bool(inferred) => Ok(inferred),
            other => Err(Error::ProtocolViolation(format!(
                "expected boolean payload, got {:?}",
                other.kind()
            ))),
        }
    }

    /// Stream the attributes owned by this thing.
    pub async fn attributes(&self, keys_only: bool) -> Result<ItemStream<Concept>> {
        self.transaction
            .stream(
                Operation::ThingGetHas {
                    iid: self.iid()?,
                    keys_only,
                    attribute_types: Vec::new(),
                },
                decode_concept,
            )
            .await
    }

    /// Stream the attributes of the given attribute types owned by this
    /// thing.
    pub async fn attributes_of_types(
        &self,
        attribute_types: &[Concept],
    ) -> Result<ItemStream<Concept>> {
        self.transaction
            .stream(
                Operation::ThingGetHas {
                    iid: self.iid()?,
                    keys_only: false,
                    attribute_types: references_of(
                        attribute_types,
                        |c| matches!(c, Concept::AttributeType { .. }),
                        "attribute type",
                    )?,
                },
                decode_concept,
            )
            .await
    }

    /// Stream the role types this thing plays.
    pub async fn playing(&self) -> Result<ItemStream<Concept>> {
        self.transaction
            .stream(Operation::ThingGetPlays { iid: self.iid()? }, decode_concept)
            .await
    }

    /// Stream the relations this thing plays a role in.
    pub async fn relations(&self, role_types: &[Concept]) -> Result<ItemStream<Concept>> {
        self.transaction
            .stream(
                Operation::ThingGetRelations {
                    iid: self.iid()?,
                    role_types: role_type_references(role_types)?,
                },
                decode_concept,
            )
            .await
    }

    pub async fn set_has(&self, attribute: &Concept) -> Result<()> {
        let payload = self
            .transaction
            .execute(Operation::ThingSetHas {
                iid: self.iid()?,
                attribute: attribute_reference(attribute)?,
            })
            .await?;
        unit(payload)
    }

    pub async fn unset_has(&self, attribute: &Concept) -> Result<()> {
        let payload = self
            .transaction
            .execute(Operation::ThingUnsetHas {
                iid: self.iid()?,
                attribute: attribute_reference(attribute)?,
            })
            .await?;
        unit(payload)
    }

    /// Delete this thing.
    pub async fn delete(&self) -> Result<()> {
        let payload = self
            .transaction
            .execute(Operation::ThingDelete { iid: self.iid()? })
            .await?;
        unit(payload)
    }

    /// Whether this thing no longer exists on the server.
    pub async fn is_deleted(&self) -> Result<bool> {
        let iid = self.iid()?;
        let found = self.transaction.concepts().get_thing(&iid).await?;
        Ok(found.is_none())
    }

    // Relation operations

    pub async fn add_player(&self, role_type: &Concept, player: &Concept) -> Result<()> {
        let payload = self
            .transaction
            .execute(Operation::RelationAddPlayer {
                iid: self.relation_iid()?,
                role_type: role_type_reference(role_type)?,
                player: thing_reference(player)?,
            })
            .await?;
        unit(payload)
    }

    pub async fn remove_player(&self, role_type: &Concept, player: &Concept) -> Result<()> {
        let payload = self
            .transaction
            .execute(Operation::RelationRemovePlayer {
                iid: self.relation_iid()?,
                role_type: role_type_reference(role_type)?,
                player: thing_reference(player)?,
            })
            .await?;
        unit(payload)
    }

    /// Stream the things playing the given roles in this relation; all roles
    /// when empty.
    pub async fn players(&self, role_types: &[Concept]) -> Result<ItemStream<Concept>> {
        self.transaction
            .stream(
                Operation::RelationGetPlayers {
                    iid: self.relation_iid()?,
                    role_types: role_type_references(role_types)?,
                },
                decode_concept,
            )
            .await
    }

    // Type operations

    pub async fn supertype(&self) -> Result<Concept> {
        let payload = self
            .transaction
            .execute(Operation::TypeGetSupertype {
                label: self.label()?,
            })
            .await?;
        self.single_concept(payload)
    }

    pub async fn set_supertype(&self, supertype: &Concept) -> Result<()> {
        let payload = self
            .transaction
            .execute(Operation::TypeSetSupertype {
                label: self.label()?,
                supertype: type_reference(supertype)?,
            })
            .await?;
        unit(payload)
    }

    pub async fn supertypes(&self) -> Result<ItemStream<Concept>> {
        self.transaction
            .stream(
                Operation::TypeGetSupertypes {
                    label: self.label()?,
                },
                decode_concept,
            )
            .await
    }

    pub async fn subtypes(&self) -> Result<ItemStream<Concept>> {
        self.transaction
            .stream(
                Operation::TypeGetSubtypes {
                    label: self.label()?,
                },
                decode_concept,
            )
            .await
    }

    /// Stream the things that are direct or transitive instances of this
    /// type.
    pub async fn instances(&self) -> Result<ItemStream<Concept>> {
        self.transaction
            .stream(
                Operation::TypeGetInstances {
                    label: self.label()?,
                },
                decode_concept,
            )
            .await
    }

    pub async fn set_label(&self, new_label: &str) -> Result<()> {
        let payload = self
            .transaction
            .execute(Operation::TypeSetLabel {
                label: self.label()?,
                new_label: new_label.to_string(),
            })
            .await?;
        unit(payload)
    }

    /// Delete this type.
    pub async fn delete_type(&self) -> Result<()> {
        let payload = self
            .transaction
            .execute(Operation::TypeDelete {
                label: self.label()?,
            })
            .await?;
        unit(payload)
    }

    /// Create a new instance of this entity or relation type.
    pub async fn create_instance(&self) -> Result<Concept> {
        let operation = match &self.concept {
            Concept::EntityType { label } => Operation::EntityTypeCreate {
                label: label.clone(),
            },
            Concept::RelationType { label } => Operation::RelationTypeCreate {
                label: label.clone(),
            },
            other => {
                return Err(Error::InvalidHandle(format!(
                    "cannot create an instance of {other:?}"
                )))
            }
        };
        let payload = self.transaction.execute(operation).await?;
        self.single_concept(payload)
    }

    /// Put an attribute with the given value under this attribute type.
    pub async fn put_instance(&self, value: Value) -> Result<Concept> {
        let label = self.attribute_type_label(&value)?;
        let payload = self
            .transaction
            .execute(Operation::AttributeTypePut {
                label,
                value: encode_value(&value),
            })
            .await?;
        self.single_concept(payload)
    }

    /// Look up the attribute with the given value under this attribute type.
    pub async fn get_instance(&self, value: Value) -> Result<Option<Concept>> {
        let label = self.attribute_type_label(&value)?;
        let payload = self
            .transaction
            .execute(Operation::AttributeTypeGet {
                label,
                value: encode_value(&value),
            })
            .await?;
        self.optional_concept(payload)
    }

    // Guards

    fn iid(&self) -> Result<String> {
        if self.concept.is_thing() {
            Ok(self.concept.id().to_string())
        } else {
            Err(Error::InvalidHandle(format!(
                "{:?} is a type, not a thing",
                self.concept
            )))
        }
    }

    fn relation_iid(&self) -> Result<String> {
        match &self.concept {
            Concept::Relation { iid } => Ok(iid.clone()),
            other => Err(Error::InvalidHandle(format!(
                "role players belong to relations, not {other:?}"
            ))),
        }
    }

    fn label(&self) -> Result<String> {
        if self.concept.is_type() {
            Ok(self.concept.id().to_string())
        } else {
            Err(Error::InvalidHandle(format!(
                "{:?} is a thing, not a type",
                self.concept
            )))
        }
    }

    fn attribute_type_label(&self, value: &Value) -> Result<String> {
        match &self.concept {
            Concept::AttributeType { label, value_kind } => {
                if value.kind() == *value_kind {
                    Ok(label.clone())
                } else {
                    Err(Error::InvalidHandle(format!(
                        "attribute type {label} holds {value_kind:?} values, not {:?}",
                        value.kind()
                    )))
                }
            }
            other => Err(Error::InvalidHandle(format!(
                "{other:?} is not an attribute type"
            ))),
        }
    }

    // Payload extraction. A record that fails to decode poisons the
    // transaction; see the error taxonomy.

    fn single_concept(&self, payload: Payload) -> Result<Concept> {
        match payload {
            Payload::Concept(record) => self.decoded(record),
            other => Err(Error::ProtocolViolation(format!(
                "expected concept payload, got {:?}",
                other.kind()
            ))),
        }
    }

    fn optional_concept(&self, payload: Payload) -> Result<Option<Concept>> {
        match payload {
            Payload::OptionalConcept(Some(record)) => self.decoded(record).map(Some),
            Payload::OptionalConcept(None) => Ok(None),
            other => Err(Error::ProtocolViolation(format!(
                "expected optional concept payload, got {:?}",
                other.kind()
            ))),
        }
    }

    fn decoded(&self, record: crate::message::ConceptRecord) -> Result<Concept> {
        decode_concept(record).map_err(|e| {
            self.transaction.fail(e.clone());
            e
        })
    }
}

/// Typed concept lookup and creation on a transaction.
pub struct ConceptManager<'a> {
    transaction: &'a Transaction,
}

impl<'a> ConceptManager<'a> {
    pub(crate) fn new(transaction: &'a Transaction) -> Self {
        Self { transaction }
    }

    pub async fn get_thing(&self, iid: &str) -> Result<Option<Concept>> {
        let payload = self
            .transaction
            .execute(Operation::GetThing {
                iid: iid.to_string(),
            })
            .await?;
        self.optional_concept(payload)
    }

    pub async fn get_type(&self, label: &str) -> Result<Option<Concept>> {
        let payload = self
            .transaction
            .execute(Operation::GetType {
                label: label.to_string(),
            })
            .await?;
        self.optional_concept(payload)
    }

    pub async fn put_entity_type(&self, label: &str) -> Result<Concept> {
        let payload = self
            .transaction
            .execute(Operation::PutEntityType {
                label: label.to_string(),
            })
            .await?;
        self.single_concept(payload)
    }

    pub async fn put_relation_type(&self, label: &str) -> Result<Concept> {
        let payload = self
            .transaction
            .execute(Operation::PutRelationType {
                label: label.to_string(),
            })
            .await?;
        self.single_concept(payload)
    }

    pub async fn put_attribute_type(&self, label: &str, value_kind: ValueKind) -> Result<Concept> {
        let payload = self
            .transaction
            .execute(Operation::PutAttributeType {
                label: label.to_string(),
                value_kind: codec::encode_value_kind(value_kind),
            })
            .await?;
        self.single_concept(payload)
    }

    fn single_concept(&self, payload: Payload) -> Result<Concept> {
        match payload {
            Payload::Concept(record) => self.decoded(record),
            other => Err(Error::ProtocolViolation(format!(
                "expected concept payload, got {:?}",
                other.kind()
            ))),
        }
    }

    fn optional_concept(&self, payload: Payload) -> Result<Option<Concept>> {
        match payload {
            Payload::OptionalConcept(Some(record)) => self.decoded(record).map(Some),
            Payload::OptionalConcept(None) => Ok(None),
            other => Err(Error::ProtocolViolation(format!(
                "expected optional concept payload, got {:?}",
                other.kind()
            ))),
        }
    }

    fn decoded(&self, record: crate::message::ConceptRecord) -> Result<Concept> {
        decode_concept(record).map_err(|e| {
            self.transaction.fail(e.clone());
            e
        })
    }
}

fn unit(payload: Payload) -> Result<()> {
    match payload {
        Payload::Unit => Ok(()),
        other => Err(Error::ProtocolViolation(format!(
            "expected unit payload, got {:?}",
            other.kind()
        ))),
    }
}

fn attribute_reference(concept: &Concept) -> Result<ConceptRef> {
    if concept.is_attribute() {
        Ok(reference(concept))
    } else {
        Err(Error::InvalidHandle(format!(
            "{concept:?} is not an attribute"
        )))
    }
}

fn thing_reference(concept: &Concept) -> Result<ConceptRef> {
    if concept.is_thing() {
        Ok(reference(concept))
    } else {
        Err(Error::InvalidHandle(format!("{concept:?} is not a thing")))
    }
}

fn type_reference(concept: &Concept) -> Result<ConceptRef> {
    if concept.is_type() {
        Ok(reference(concept))
    } else {
        Err(Error::InvalidHandle(format!("{concept:?} is not a type")))
    }
}

fn role_type_reference(concept: &Concept) -> Result<ConceptRef> {
    match concept {
        Concept::RoleType { .. } => Ok(reference(concept)),
        other => Err(Error::InvalidHandle(format!(
            "{other:?} is not a role type"
        ))),
    }
}

fn role_type_references(concepts: &[Concept]) -> Result<Vec<ConceptRef>> {
    concepts.iter().map(role_type_reference).collect()
}

fn references_of(
    concepts: &[Concept],
    accepts: impl Fn(&Concept) -> bool,
    expected: &str,
) -> Result<Vec<ConceptRef>> {
    concepts
        .iter()
        .map(|c| {
            if accepts(c) {
                Ok(reference(c))
            } else {
                Err(Error::InvalidHandle(format!("{c:?} is not an {expected}")))
            }
        })
        .collect()
}
