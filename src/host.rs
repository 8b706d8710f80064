// Collaborator interfaces the host application provides to the engine.
//
// The engine never owns records or relationships. It reads field values and
// relationship state through these traits and asks the host to perform every
// write. All host failures surface as `HostError` and are handed back to the
// caller's save transaction untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Field holding a record's natural key.
pub const NATURAL_KEY_FIELD: &str = "idno";

/// Field holding a record's primary key.
pub const PRIMARY_KEY_FIELD: &str = "id";

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Name of a host table (model type), e.g. `ca_objects`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName(String);

impl TableName {
    pub fn new(name: impl Into<String>) -> Self {
        TableName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TableName {
    fn from(s: &str) -> Self {
        TableName(s.to_string())
    }
}

impl From<String> for TableName {
    fn from(s: String) -> Self {
        TableName(s)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Primary key of a record within its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host-assigned identifier of a relationship edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationshipId(pub u64);

impl fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A record addressed by table and primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    pub table: TableName,
    pub id: RecordId,
}

impl RecordRef {
    pub fn new(table: impl Into<TableName>, id: u64) -> Self {
        RecordRef {
            table: table.into(),
            id: RecordId(id),
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.table, self.id)
    }
}

// ============================================================================
// FIELD VALUES
// ============================================================================

/// One stored value of a record field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Null,
}

impl FieldValue {
    /// String form the match types compare against.
    pub fn as_match_text(&self) -> String {
        match self {
            FieldValue::String(s) => s.clone(),
            FieldValue::Integer(i) => i.to_string(),
            FieldValue::Float(f) => f.to_string(),
            FieldValue::Boolean(b) => b.to_string(),
            FieldValue::Null => String::new(),
        }
    }

    /// Converts a scalar JSON value. Arrays and objects have no field form.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(FieldValue::String(s.clone())),
            Value::Bool(b) => Some(FieldValue::Boolean(*b)),
            Value::Null => Some(FieldValue::Null),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(FieldValue::Integer(i)),
                None => n.as_f64().map(FieldValue::Float),
            },
            Value::Array(_) | Value::Object(_) => None,
        }
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Integer(i)
    }
}

impl From<f64> for FieldValue {
    fn from(f: f64) -> Self {
        FieldValue::Float(f)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Boolean(b)
    }
}

// ============================================================================
// RELATED RECORDS AND RELATIONSHIPS
// ============================================================================

/// How a rule names its related record.
///
/// Integers are primary keys, strings are natural keys (`idno`) and maps are
/// field filters passed to the host as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelatedRecordSpec {
    Id(u64),
    Idno(String),
    Filter(Map<String, Value>),
}

impl RelatedRecordSpec {
    /// Reads the `related_record` configuration value.
    pub fn from_config(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_u64().map(RelatedRecordSpec::Id),
            Value::String(s) => Some(RelatedRecordSpec::Idno(s.clone())),
            Value::Object(map) => Some(RelatedRecordSpec::Filter(map.clone())),
            _ => None,
        }
    }

    /// Field filter identifying the related record in a relationship lookup.
    pub fn to_filter(&self) -> Map<String, Value> {
        match self {
            RelatedRecordSpec::Id(id) => {
                let mut filter = Map::new();
                filter.insert(PRIMARY_KEY_FIELD.to_string(), Value::from(*id));
                filter
            }
            RelatedRecordSpec::Idno(idno) => {
                let mut filter = Map::new();
                filter.insert(NATURAL_KEY_FIELD.to_string(), Value::from(idno.as_str()));
                filter
            }
            RelatedRecordSpec::Filter(map) => map.clone(),
        }
    }
}

impl fmt::Display for RelatedRecordSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelatedRecordSpec::Id(id) => write!(f, "id {}", id),
            RelatedRecordSpec::Idno(idno) => write!(f, "idno \"{}\"", idno),
            RelatedRecordSpec::Filter(map) => write!(f, "filter {}", Value::Object(map.clone())),
        }
    }
}

/// A related record the host found, with the labels notifications use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRecord {
    pub record: RecordRef,
    /// Human-readable name of the record's type, e.g. "collection".
    pub type_name: String,
    /// Display label of the record.
    pub display_name: String,
}

/// One existing relationship returned by `RelationshipApi::related_items`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedItem {
    pub relationship_id: RelationshipId,
    pub related: RecordRef,
    pub relationship_type: String,
}

/// Restrictions for a related-items lookup.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RelatedItemsQuery {
    /// Only relationships of these types. Empty means any type.
    pub relationship_types: Vec<String>,
    /// Field filter the related record must satisfy.
    pub filter: Map<String, Value>,
}

/// Severity attached to a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

// ============================================================================
// ERRORS
// ============================================================================

/// Failures reported by host collaborators.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Record store error: {0}")]
    RecordStore(String),

    #[error("Relationship error: {0}")]
    Relationship(String),

    #[error("Notification error: {0}")]
    Notification(String),
}

// ============================================================================
// COLLABORATOR TRAITS
// ============================================================================

/// Read access to records and their field values.
pub trait RecordStore: Send + Sync {
    /// Finds the record of `table` named by `spec`, or `None` if there is none.
    fn resolve(
        &self,
        table: &TableName,
        spec: &RelatedRecordSpec,
    ) -> Result<Option<ResolvedRecord>, HostError>;

    /// Returns every stored instance of `field` on `record`. A repeatable
    /// field yields one inner vector per instance.
    fn field_values(
        &self,
        record: &RecordRef,
        field: &str,
    ) -> Result<Vec<Vec<FieldValue>>, HostError>;
}

/// Relationship reads and writes on behalf of a source record.
pub trait RelationshipApi: Send + Sync {
    fn add_relationship(
        &self,
        source: &RecordRef,
        target: &RecordRef,
        relationship_type: &str,
    ) -> Result<RelationshipId, HostError>;

    fn remove_relationship(
        &self,
        source: &RecordRef,
        related_table: &TableName,
        relationship_id: RelationshipId,
    ) -> Result<(), HostError>;

    /// Existing relationships from `source` into `related_table` that satisfy
    /// `query`, in the host's own order.
    fn related_items(
        &self,
        source: &RecordRef,
        related_table: &TableName,
        query: &RelatedItemsQuery,
    ) -> Result<Vec<RelatedItem>, HostError>;
}

/// Receives user-facing messages about changes the engine made.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, message: &str, severity: Severity) -> Result<(), HostError>;
}

/// Host collaborators needed for one evaluation.
#[derive(Clone, Copy)]
pub struct HostContext<'a> {
    pub store: &'a dyn RecordStore,
    pub relationships: &'a dyn RelationshipApi,
}

impl<'a> HostContext<'a> {
    pub fn new(store: &'a dyn RecordStore, relationships: &'a dyn RelationshipApi) -> Self {
        HostContext {
            store,
            relationships,
        }
    }
}

// ============================================================================
// RECORD CHANGE DESCRIPTOR
// ============================================================================

/// Kind of model the saved record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Ordinary record carrying labels and attributes.
    Bundlable,
    /// A relationship record. Never processed.
    Relationship,
    /// Anything else the host saves.
    Other,
}

/// What the host hands to the lifecycle hooks after a save.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordChange {
    pub record: RecordRef,
    pub kind: RecordKind,
}

impl RecordChange {
    pub fn new(record: RecordRef, kind: RecordKind) -> Self {
        RecordChange { record, kind }
    }

    /// Shorthand for a saved bundlable record.
    pub fn bundlable(table: impl Into<TableName>, id: u64) -> Self {
        RecordChange::new(RecordRef::new(table, id), RecordKind::Bundlable)
    }

    /// Only bundlable records are processed. Relationship records are
    /// excluded so relationships of relationships are never generated.
    pub fn is_relevant(&self) -> bool {
        self.kind == RecordKind::Bundlable
    }
}
