use std::collections::BTreeSet;

use serde_json::Value;

use crate::{query, CollectionPath, Document, DocumentPath};

/// A condition on the store's state that has to hold for a batch to apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    Exists(DocumentPath),
    NotExists(DocumentPath),
    FieldEquals {
        path: DocumentPath,
        field: String,
        value: Value,
    },
    FieldIn {
        path: DocumentPath,
        field: String,
        values: Vec<Value>,
    },
}

impl Precondition {
    pub fn field_equals<F, V>(path: DocumentPath, field: F, value: V) -> Self
    where
        F: Into<String>,
        V: Into<Value>,
    {
        Precondition::FieldEquals {
            path,
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn field_in<F: Into<String>>(path: DocumentPath, field: F, values: Vec<Value>) -> Self {
        Precondition::FieldIn {
            path,
            field: field.into(),
            values,
        }
    }

    pub fn path(&self) -> &DocumentPath {
        match self {
            Precondition::Exists(path)
            | Precondition::NotExists(path)
            | Precondition::FieldEquals { path, .. }
            | Precondition::FieldIn { path, .. } => path,
        }
    }

    /// Checks the condition against the current body of the document, `None`
    /// meaning the document does not exist. Returns why it does not hold.
    pub fn check(&self, document: Option<&Document>) -> Result<(), String> {
        match (self, document) {
            (Precondition::Exists(_), Some(_)) => Ok(()),
            (Precondition::NotExists(_), None) => Ok(()),
            (Precondition::NotExists(_), Some(_)) => Err("document exists".to_owned()),
            (_, None) => Err("document does not exist".to_owned()),
            (Precondition::FieldEquals { field, value, .. }, Some(document)) => {
                match query::lookup(document, field) {
                    Some(current) if query::values_equal(current, value) => Ok(()),
                    Some(current) => Err(format!(
                        "field `{}` is {}, expected {}",
                        field, current, value
                    )),
                    None => Err(format!("field `{}` is missing, expected {}", field, value)),
                }
            }
            (Precondition::FieldIn { field, values, .. }, Some(document)) => {
                match query::lookup(document, field) {
                    Some(current) if values.iter().any(|value| query::values_equal(current, value)) => {
                        Ok(())
                    }
                    current => Err(format!(
                        "field `{}` is {}, expected one of {}",
                        field,
                        current.cloned().unwrap_or(Value::Null),
                        Value::Array(values.clone())
                    )),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Fails if the document already exists.
    Create { path: DocumentPath, data: Document },
    /// Creates or replaces.
    Set { path: DocumentPath, data: Document },
    /// Shallow merge, fails if the document does not exist. `null` values are
    /// stored as `null`.
    Update { path: DocumentPath, patch: Document },
    /// Fails if the document does not exist.
    Delete { path: DocumentPath },
}

impl WriteOp {
    pub fn path(&self) -> &DocumentPath {
        match self {
            WriteOp::Create { path, .. }
            | WriteOp::Set { path, .. }
            | WriteOp::Update { path, .. }
            | WriteOp::Delete { path } => path,
        }
    }
}

/// Writes that are applied all together or not at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    preconditions: Vec<Precondition>,
    writes: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, precondition: Precondition) -> Self {
        self.preconditions.push(precondition);
        self
    }

    pub fn create(mut self, path: DocumentPath, data: Document) -> Self {
        self.writes.push(WriteOp::Create { path, data });
        self
    }

    pub fn set(mut self, path: DocumentPath, data: Document) -> Self {
        self.writes.push(WriteOp::Set { path, data });
        self
    }

    pub fn update(mut self, path: DocumentPath, patch: Document) -> Self {
        self.writes.push(WriteOp::Update { path, patch });
        self
    }

    pub fn delete(mut self, path: DocumentPath) -> Self {
        self.writes.push(WriteOp::Delete { path });
        self
    }

    pub fn preconditions(&self) -> &[Precondition] {
        &self.preconditions
    }

    pub fn writes(&self) -> &[WriteOp] {
        &self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Every document the batch reads or writes.
    pub fn touched_documents(&self) -> BTreeSet<DocumentPath> {
        self.preconditions
            .iter()
            .map(Precondition::path)
            .chain(self.writes.iter().map(WriteOp::path))
            .cloned()
            .collect()
    }

    pub fn written_collections(&self) -> BTreeSet<CollectionPath> {
        self.writes
            .iter()
            .map(|write| write.path().collection.clone())
            .collect()
    }
}
