use std::collections::BTreeMap;
use std::fmt;

use crate::bail;
use crate::error::{ErrorKind, OracleResult};

/// A change message read from a topic of the message bus.
///
/// Both payloads are opaque until decoded. An absent value marks a deleted row (a tombstone); an
/// absent key marks a row of a table without primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Topic the message was read from.
    pub topic: String,
    /// Partition the message was read from.
    pub partition: i32,
    /// Offset of the message within its partition.
    pub offset: i64,
    /// Position of the message among all messages collected from its topic, starting at 0.
    pub index: u64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
}

impl Message {
    /// Creates a message as delivered by the bus, before it has been assigned an arrival index.
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        key: Option<Vec<u8>>,
        value: Option<Vec<u8>>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            index: 0,
            key,
            value,
        }
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Returns `true` if the message marks a deleted row.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// A typed value of a decoded field.
///
/// [`FieldValue::Union`] is only produced by the JSON decoder, which keeps the branch tag of the
/// union encoding. Avro values come out already resolved to their branch.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bytes(Vec<u8>),
    String(String),
    Array(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
    Record(DecodedRecord),
    Union {
        branch: String,
        value: Box<FieldValue>,
    },
}

impl FieldValue {
    /// Returns the value inside any number of nested unions.
    pub fn unwrap_union(&self) -> &FieldValue {
        match self {
            FieldValue::Union { value, .. } => value.unwrap_union(),
            other => other,
        }
    }

    /// Returns the name of the value's type, as used in assertion messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Boolean(_) => "boolean",
            FieldValue::Int(_) => "int",
            FieldValue::Long(_) => "long",
            FieldValue::Float(_) => "float",
            FieldValue::Double(_) => "double",
            FieldValue::Bytes(_) => "bytes",
            FieldValue::String(_) => "string",
            FieldValue::Array(_) => "array",
            FieldValue::Map(_) => "map",
            FieldValue::Record(_) => "record",
            FieldValue::Union { .. } => "union",
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str("null"),
            FieldValue::Boolean(value) => write!(f, "{value}"),
            FieldValue::Int(value) => write!(f, "{value}"),
            FieldValue::Long(value) => write!(f, "{value}"),
            FieldValue::Float(value) => write!(f, "{value}"),
            FieldValue::Double(value) => write!(f, "{value}"),
            FieldValue::Bytes(value) => write!(f, "{value:?}"),
            FieldValue::String(value) => write!(f, "{value:?}"),
            FieldValue::Array(values) => {
                f.write_str("[")?;
                for (index, value) in values.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
            FieldValue::Map(entries) => write_entries(f, entries),
            FieldValue::Record(record) => write!(f, "{record}"),
            FieldValue::Union { branch, value } => write!(f, "{{{branch:?}: {value}}}"),
        }
    }
}

/// A decoded key or value payload: a mapping from field names to typed values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedRecord {
    fields: BTreeMap<String, FieldValue>,
}

impl DecodedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field, replacing any previous value with the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    /// Adds a field and returns the record.
    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.insert(name, value);
        self
    }

    /// Returns the raw value of a field, without unwrapping unions.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the value of a field with unions unwrapped.
    pub fn fetch(&self, name: &str) -> OracleResult<&FieldValue> {
        match self.fields.get(name) {
            Some(value) => Ok(value.unwrap_union()),
            None => bail!(
                ErrorKind::AssertionFailure,
                "Decoded record is missing a field",
                format!("field '{name}' not found in {self}")
            ),
        }
    }

    /// Returns the value of an `int` or `long` field.
    pub fn fetch_int(&self, name: &str) -> OracleResult<i64> {
        match self.fetch(name)? {
            FieldValue::Int(value) => Ok(i64::from(*value)),
            FieldValue::Long(value) => Ok(*value),
            other => bail!(
                ErrorKind::AssertionFailure,
                "Decoded field has an unexpected type",
                format!("field '{name}' is {} ({other}), expected an integer", other.type_name())
            ),
        }
    }

    /// Returns the value of a `string` field.
    pub fn fetch_string(&self, name: &str) -> OracleResult<&str> {
        match self.fetch(name)? {
            FieldValue::String(value) => Ok(value),
            other => bail!(
                ErrorKind::AssertionFailure,
                "Decoded field has an unexpected type",
                format!("field '{name}' is {} ({other}), expected a string", other.type_name())
            ),
        }
    }
}

impl FromIterator<(String, FieldValue)> for DecodedRecord {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for DecodedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_entries(f, &self.fields)
    }
}

fn write_entries(
    f: &mut fmt::Formatter<'_>,
    entries: &BTreeMap<String, FieldValue>,
) -> fmt::Result {
    f.write_str("{")?;
    for (index, (name, value)) in entries.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{name}: {value}")?;
    }
    f.write_str("}")
}
