use chrono::{DateTime, Local};
use serde::Serialize;
use uuid::Uuid;

/// One failed validation cycle and whether a later regeneration fixed it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub id: Uuid,
    pub error_text: String,
    pub original_response: String,
    pub is_resolved: bool,
    pub created_at: DateTime<Local>,
}

/// Session-scoped log of error records, in creation order.
#[derive(Debug, Default, Clone)]
pub struct ErrorLog {
    records: Vec<ErrorRecord>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, error_text: impl Into<String>, original_response: impl Into<String>) -> Uuid {
        let record = ErrorRecord {
            id: Uuid::new_v4(),
            error_text: error_text.into(),
            original_response: original_response.into(),
            is_resolved: false,
            created_at: Local::now(),
        };
        let id = record.id;
        self.records.push(record);
        id
    }

    pub fn get(&self, id: Uuid) -> Option<&ErrorRecord> {
        self.records.iter().find(|record| record.id == id)
    }

    /// Sets the resolution flag. Returns false for an unknown id.
    pub fn set_resolved(&mut self, id: Uuid, resolved: bool) -> bool {
        match self.records.iter_mut().find(|record| record.id == id) {
            Some(record) => {
                record.is_resolved = resolved;
                true
            }
            None => false,
        }
    }

    pub fn records(&self) -> &[ErrorRecord] {
        &self.records
    }

    pub fn resolved(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.records.iter().filter(|record| record.is_resolved)
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.records.iter().filter(|record| !record.is_resolved)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_records_start_unresolved() {
        let mut log = ErrorLog::new();
        let id = log.create("Command: X=\nError: Unknown command X", "```\nX=\n```");
        let record = log.get(id).unwrap();
        assert!(!record.is_resolved);
        assert_eq!(record.original_response, "```\nX=\n```");
        assert_eq!(log.unresolved().count(), 1);
        assert_eq!(log.resolved().count(), 0);
    }

    #[test]
    fn test_resolution_filters() {
        let mut log = ErrorLog::new();
        let first = log.create("a", "r1");
        let _second = log.create("b", "r2");
        assert!(log.set_resolved(first, true));
        assert_eq!(log.resolved().map(|r| r.error_text.as_str()).collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(log.unresolved().map(|r| r.error_text.as_str()).collect::<Vec<_>>(), vec!["b"]);
        assert!(!log.set_resolved(Uuid::new_v4(), true));
    }

    #[test]
    fn test_ids_are_unique() {
        let mut log = ErrorLog::new();
        let a = log.create("a", "r");
        let b = log.create("a", "r");
        assert_ne!(a, b);
        assert_eq!(log.len(), 2);
    }
}
