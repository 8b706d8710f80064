// In-memory host for tests, demos and embedding without a database.
//
// Records live in a sorted map keyed by table and id. Relationships are kept
// in insertion order, which is the order `related_items` returns them in.
// Clones share state, so one clone can serve as record store, relationship
// API and notification sink at the same time.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use log::warn;

use crate::host::{
    FieldValue, HostError, NotificationSink, RecordId, RecordRef, RecordStore, RelatedItem,
    RelatedItemsQuery, RelatedRecordSpec, RelationshipApi, RelationshipId, ResolvedRecord,
    Severity, TableName, NATURAL_KEY_FIELD, PRIMARY_KEY_FIELD,
};

#[derive(Debug, Clone, Default)]
struct StoredRecord {
    type_name: String,
    display_name: String,
    fields: HashMap<String, Vec<Vec<FieldValue>>>,
}

impl StoredRecord {
    fn first_value(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)?.iter().flatten().next()
    }
}

#[derive(Debug, Clone)]
struct StoredRelationship {
    id: RelationshipId,
    source: RecordRef,
    target: RecordRef,
    relationship_type: String,
}

/// Counts of relationship calls made against the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostCalls {
    pub adds: usize,
    pub removes: usize,
    pub related_item_lookups: usize,
}

#[derive(Debug, Default)]
struct Inner {
    records: RwLock<BTreeMap<(TableName, RecordId), StoredRecord>>,
    relationships: Mutex<Vec<StoredRelationship>>,
    next_relationship_id: Mutex<u64>,
    calls: Mutex<HostCalls>,
    notifications: Mutex<Vec<(String, Severity)>>,
    fail_writes: AtomicBool,
}

/// Host collaborators backed by process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHost {
    inner: Arc<Inner>,
}

impl InMemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a record. Replacing keeps no field values.
    pub fn insert_record(&self, record: RecordRef, type_name: &str, display_name: &str) {
        self.inner.records.write().insert(
            (record.table, record.id),
            StoredRecord {
                type_name: type_name.to_string(),
                display_name: display_name.to_string(),
                fields: HashMap::new(),
            },
        );
    }

    /// Sets every stored instance of `field`. Unknown records are ignored.
    pub fn set_field_instances(&self, record: &RecordRef, field: &str, instances: Vec<Vec<FieldValue>>) {
        let key = (record.table.clone(), record.id);
        match self.inner.records.write().get_mut(&key) {
            Some(stored) => {
                stored.fields.insert(field.to_string(), instances);
            }
            None => warn!("Ignoring values for unknown record {}", record),
        }
    }

    /// Sets `field` with one value per instance.
    pub fn set_values(&self, record: &RecordRef, field: &str, values: Vec<FieldValue>) {
        self.set_field_instances(record, field, values.into_iter().map(|v| vec![v]).collect());
    }

    /// Creates a relationship directly, bypassing call counting.
    pub fn relate(&self, source: &RecordRef, target: &RecordRef, relationship_type: &str) -> RelationshipId {
        self.store_relationship(source, target, relationship_type)
    }

    /// Ids of relationships of one type between two records.
    pub fn relationships_between(
        &self,
        source: &RecordRef,
        target: &RecordRef,
        relationship_type: &str,
    ) -> Vec<RelationshipId> {
        self.inner
            .relationships
            .lock()
            .iter()
            .filter(|r| &r.source == source && &r.target == target && r.relationship_type == relationship_type)
            .map(|r| r.id)
            .collect()
    }

    pub fn calls(&self) -> HostCalls {
        *self.inner.calls.lock()
    }

    /// Notifications received, oldest first.
    pub fn notifications(&self) -> Vec<(String, Severity)> {
        self.inner.notifications.lock().clone()
    }

    /// Makes relationship writes fail with `HostError::Relationship`.
    pub fn fail_relationship_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn store_relationship(&self, source: &RecordRef, target: &RecordRef, relationship_type: &str) -> RelationshipId {
        let id = {
            let mut next = self.inner.next_relationship_id.lock();
            *next += 1;
            RelationshipId(*next)
        };
        self.inner.relationships.lock().push(StoredRelationship {
            id,
            source: source.clone(),
            target: target.clone(),
            relationship_type: relationship_type.to_string(),
        });
        id
    }

    fn check_writable(&self) -> Result<(), HostError> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(HostError::Relationship("relationship writes are disabled".into()));
        }
        Ok(())
    }
}

/// Whether a record satisfies every entry of a field filter. `id` compares
/// the primary key. Other keys compare the field's first value as text.
fn matches_filter(id: RecordId, record: &StoredRecord, filter: &Map<String, Value>) -> bool {
    filter.iter().all(|(key, expected)| {
        if key == PRIMARY_KEY_FIELD {
            return expected.as_u64() == Some(id.0);
        }
        let expected = match expected {
            Value::String(s) => s.clone(),
            other => match FieldValue::from_json(other) {
                Some(value) => value.as_match_text(),
                None => return false,
            },
        };
        record
            .first_value(key)
            .map_or(false, |value| value.as_match_text() == expected)
    })
}

impl RecordStore for InMemoryHost {
    fn resolve(&self, table: &TableName, spec: &RelatedRecordSpec) -> Result<Option<ResolvedRecord>, HostError> {
        let records = self.inner.records.read();
        let found = match spec {
            RelatedRecordSpec::Id(id) => records.get_key_value(&(table.clone(), RecordId(*id))),
            RelatedRecordSpec::Idno(idno) => records.iter().find(|((t, _), record)| {
                t == table
                    && record
                        .first_value(NATURAL_KEY_FIELD)
                        .map_or(false, |value| value.as_match_text() == *idno)
            }),
            RelatedRecordSpec::Filter(filter) => records
                .iter()
                .find(|((t, id), record)| t == table && matches_filter(*id, record, filter)),
        };

        Ok(found.map(|((t, id), record)| ResolvedRecord {
            record: RecordRef {
                table: t.clone(),
                id: *id,
            },
            type_name: record.type_name.clone(),
            display_name: record.display_name.clone(),
        }))
    }

    fn field_values(&self, record: &RecordRef, field: &str) -> Result<Vec<Vec<FieldValue>>, HostError> {
        let records = self.inner.records.read();
        let stored = records
            .get(&(record.table.clone(), record.id))
            .ok_or_else(|| HostError::RecordStore(format!("unknown record {}", record)))?;
        Ok(stored.fields.get(field).cloned().unwrap_or_default())
    }
}

impl RelationshipApi for InMemoryHost {
    fn add_relationship(
        &self,
        source: &RecordRef,
        target: &RecordRef,
        relationship_type: &str,
    ) -> Result<RelationshipId, HostError> {
        self.inner.calls.lock().adds += 1;
        self.check_writable()?;
        Ok(self.store_relationship(source, target, relationship_type))
    }

    fn remove_relationship(
        &self,
        source: &RecordRef,
        related_table: &TableName,
        relationship_id: RelationshipId,
    ) -> Result<(), HostError> {
        self.inner.calls.lock().removes += 1;
        self.check_writable()?;

        let mut relationships = self.inner.relationships.lock();
        let position = relationships
            .iter()
            .position(|r| r.id == relationship_id && &r.source == source && &r.target.table == related_table)
            .ok_or_else(|| {
                HostError::Relationship(format!(
                    "no relationship {} from {} into {}",
                    relationship_id, source, related_table
                ))
            })?;
        relationships.remove(position);
        Ok(())
    }

    fn related_items(
        &self,
        source: &RecordRef,
        related_table: &TableName,
        query: &RelatedItemsQuery,
    ) -> Result<Vec<RelatedItem>, HostError> {
        self.inner.calls.lock().related_item_lookups += 1;

        let records = self.inner.records.read();
        let relationships = self.inner.relationships.lock();
        let items = relationships
            .iter()
            .filter(|r| &r.source == source && &r.target.table == related_table)
            .filter(|r| {
                query.relationship_types.is_empty() || query.relationship_types.contains(&r.relationship_type)
            })
            .filter(|r| {
                records
                    .get(&(r.target.table.clone(), r.target.id))
                    .map_or(false, |target| matches_filter(r.target.id, target, &query.filter))
            })
            .map(|r| RelatedItem {
                relationship_id: r.id,
                related: r.target.clone(),
                relationship_type: r.relationship_type.clone(),
            })
            .collect();
        Ok(items)
    }
}

impl NotificationSink for InMemoryHost {
    fn notify(&self, message: &str, severity: Severity) -> Result<(), HostError> {
        self.inner.notifications.lock().push((message.to_string(), severity));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn host() -> (InMemoryHost, RecordRef) {
        let host = InMemoryHost::new();
        let collection = RecordRef::new("ca_collections", 3);
        host.insert_record(collection.clone(), "collection", "Pacific");
        host.set_values(&collection, "idno", vec!["PAC".into()]);
        host.set_values(&collection, "status", vec![FieldValue::Integer(2)]);
        (host, collection)
    }

    #[test]
    fn test_resolve_by_id_idno_and_filter() {
        let (host, collection) = host();
        let table = TableName::from("ca_collections");

        let by_id = host.resolve(&table, &RelatedRecordSpec::Id(3)).unwrap().unwrap();
        assert_eq!(by_id.record, collection);
        assert_eq!(by_id.display_name, "Pacific");

        let by_idno = host.resolve(&table, &RelatedRecordSpec::Idno("PAC".into())).unwrap();
        assert_eq!(by_idno.map(|r| r.record), Some(collection.clone()));

        let filter = json!({"idno": "PAC", "status": 2}).as_object().unwrap().clone();
        let by_filter = host.resolve(&table, &RelatedRecordSpec::Filter(filter)).unwrap();
        assert_eq!(by_filter.map(|r| r.record), Some(collection));

        assert!(host.resolve(&table, &RelatedRecordSpec::Idno("ATL".into())).unwrap().is_none());
        assert!(host
            .resolve(&TableName::from("ca_places"), &RelatedRecordSpec::Id(3))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_related_items_filters_by_type_and_record() {
        let (host, collection) = host();
        let object = RecordRef::new("ca_objects", 1);
        host.insert_record(object.clone(), "object", "Shell");
        let part_of = host.relate(&object, &collection, "part_of");
        host.relate(&object, &collection, "donated_by");

        let query = RelatedItemsQuery {
            relationship_types: vec!["part_of".into()],
            filter: RelatedRecordSpec::Idno("PAC".into()).to_filter(),
        };
        let items = host
            .related_items(&object, &TableName::from("ca_collections"), &query)
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].relationship_id, part_of);

        let any_type = host
            .related_items(&object, &TableName::from("ca_collections"), &RelatedItemsQuery::default())
            .unwrap();
        assert_eq!(any_type.len(), 2);
        assert_eq!(host.calls().related_item_lookups, 2);
    }

    #[test]
    fn test_add_and_remove_are_counted() {
        let (host, collection) = host();
        let object = RecordRef::new("ca_objects", 1);
        let table = TableName::from("ca_collections");

        let id = host.add_relationship(&object, &collection, "part_of").unwrap();
        assert_eq!(host.relationships_between(&object, &collection, "part_of"), vec![id]);
        host.remove_relationship(&object, &table, id).unwrap();
        assert!(host.relationships_between(&object, &collection, "part_of").is_empty());
        assert!(host.remove_relationship(&object, &table, id).is_err());

        assert_eq!(
            host.calls(),
            HostCalls {
                adds: 1,
                removes: 2,
                related_item_lookups: 0
            }
        );
    }

    #[test]
    fn test_failing_writes() {
        let (host, collection) = host();
        host.fail_relationship_writes(true);
        let object = RecordRef::new("ca_objects", 1);
        assert!(matches!(
            host.add_relationship(&object, &collection, "part_of"),
            Err(HostError::Relationship(_))
        ));
        assert!(host.relationships_between(&object, &collection, "part_of").is_empty());
    }

    #[test]
    fn test_unknown_record_values_are_an_error() {
        let host = InMemoryHost::new();
        let missing = RecordRef::new("ca_objects", 404);
        assert!(matches!(
            host.field_values(&missing, "country"),
            Err(HostError::RecordStore(_))
        ));
    }

    #[test]
    fn test_clones_share_notifications() {
        let host = InMemoryHost::new();
        let sink = host.clone();
        sink.notify("hello", Severity::Info).unwrap();
        assert_eq!(host.notifications(), vec![("hello".to_string(), Severity::Info)]);
    }
}
