// Field value extraction for trigger evaluation.

use crate::host::{FieldValue, HostError, RecordRef, RecordStore};

/// Reads the values of a record field as one flat sequence.
///
/// A repeatable field comes back from the store as one group per stored
/// instance; the groups are concatenated in storage order and duplicates are
/// kept. A field without values yields an empty sequence.
#[derive(Clone, Copy)]
pub struct ValueExtractor<'a> {
    store: &'a dyn RecordStore,
}

impl<'a> ValueExtractor<'a> {
    pub fn new(store: &'a dyn RecordStore) -> Self {
        ValueExtractor { store }
    }

    pub fn values(&self, record: &RecordRef, field: &str) -> Result<Vec<FieldValue>, HostError> {
        let instances = self.store.field_values(record, field)?;
        Ok(instances.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_host::InMemoryHost;

    #[test]
    fn test_flattens_instances_in_order() {
        let host = InMemoryHost::new();
        let object = RecordRef::new("ca_objects", 1);
        host.insert_record(object.clone(), "object", "Specimen");
        host.set_field_instances(
            &object,
            "country",
            vec![
                vec!["Australia".into(), "Fiji".into()],
                vec![],
                vec!["Australia".into()],
            ],
        );

        let values = ValueExtractor::new(&host).values(&object, "country").unwrap();
        assert_eq!(
            values,
            vec![
                FieldValue::from("Australia"),
                FieldValue::from("Fiji"),
                FieldValue::from("Australia")
            ]
        );
    }

    #[test]
    fn test_missing_field_is_empty() {
        let host = InMemoryHost::new();
        let object = RecordRef::new("ca_objects", 1);
        host.insert_record(object.clone(), "object", "Specimen");
        let values = ValueExtractor::new(&host).values(&object, "country").unwrap();
        assert!(values.is_empty());
    }
}
