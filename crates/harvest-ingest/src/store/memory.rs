use super::{InsertOutcome, RecordStore, StoreResult};
use async_trait::async_trait;
use harvest_common::identity::IdentityKey;
use harvest_common::types::{Record, RecordKind, ValidRecord};
use std::collections::HashMap;
use std::sync::Mutex;

/// In-process store with the same insert semantics as the SQL tables
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<(RecordKind, IdentityKey), ValidRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, kind: RecordKind, key: &IdentityKey) -> Option<ValidRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(kind, key.clone()))
            .cloned()
    }
}

fn legal_stage(record: &ValidRecord) -> Option<&str> {
    match &record.record {
        Record::Legal(legal) => legal.stage.as_deref(),
        Record::News(_) => None,
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert(&self, record: &ValidRecord) -> StoreResult<InsertOutcome> {
        let kind = record.record.kind();
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());

        match records.get_mut(&(kind, record.key.clone())) {
            None => {
                records.insert((kind, record.key.clone()), record.clone());
                Ok(InsertOutcome::Inserted)
            },
            Some(existing)
                if kind == RecordKind::Legal && legal_stage(&*existing) != legal_stage(record) =>
            {
                if let (Record::Legal(old), Record::Legal(new)) = (&mut existing.record, &record.record) {
                    old.stage = new.stage.clone();
                    old.parsed_at = new.parsed_at;
                    old.title = new.title.clone();
                }
                existing.parsed_at = record.parsed_at;
                Ok(InsertOutcome::Updated)
            },
            Some(_) => Ok(InsertOutcome::Duplicate),
        }
    }
}
