//! Header page: index-name to root-page-id bookkeeping.

use keystone_common::page::PageId;
use parking_lot::Mutex;

/// The header page persists one `(index_name, root_page_id)` record per
/// index. The record is created when an index installs its first root and
/// updated on every later root change.
#[derive(Default)]
pub struct HeaderPage {
    records: Mutex<Vec<(String, PageId)>>,
}

impl HeaderPage {
    /// Creates an empty header page.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a record for `name`. Returns false if one already exists.
    pub fn insert_record(&self, name: &str, root_page_id: PageId) -> bool {
        let mut records = self.records.lock();
        if records.iter().any(|(n, _)| n == name) {
            return false;
        }
        records.push((name.to_string(), root_page_id));
        true
    }

    /// Updates the record for `name`. Returns false if none exists.
    pub fn update_record(&self, name: &str, root_page_id: PageId) -> bool {
        let mut records = self.records.lock();
        match records.iter_mut().find(|(n, _)| n == name) {
            Some(record) => {
                record.1 = root_page_id;
                true
            }
            None => false,
        }
    }

    /// Deletes the record for `name`. Returns false if none exists.
    pub fn delete_record(&self, name: &str) -> bool {
        let mut records = self.records.lock();
        match records.iter().position(|(n, _)| n == name) {
            Some(index) => {
                records.remove(index);
                true
            }
            None => false,
        }
    }

    /// Returns the root page id recorded for `name`.
    pub fn get_record(&self, name: &str) -> Option<PageId> {
        self.records
            .lock()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, root)| *root)
    }

    /// Returns the number of records.
    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let header = HeaderPage::new();

        assert!(header.insert_record("orders_pk", PageId(3)));
        assert_eq!(header.get_record("orders_pk"), Some(PageId(3)));
        assert_eq!(header.get_record("missing"), None);
        assert_eq!(header.record_count(), 1);
    }

    #[test]
    fn test_insert_duplicate_rejected() {
        let header = HeaderPage::new();

        assert!(header.insert_record("idx", PageId(1)));
        assert!(!header.insert_record("idx", PageId(2)));
        assert_eq!(header.get_record("idx"), Some(PageId(1)));
    }

    #[test]
    fn test_update_record() {
        let header = HeaderPage::new();

        assert!(!header.update_record("idx", PageId(5)));
        header.insert_record("idx", PageId(1));
        assert!(header.update_record("idx", PageId(5)));
        assert_eq!(header.get_record("idx"), Some(PageId(5)));
    }

    #[test]
    fn test_delete_record() {
        let header = HeaderPage::new();

        header.insert_record("idx", PageId(1));
        assert!(header.delete_record("idx"));
        assert!(!header.delete_record("idx"));
        assert_eq!(header.get_record("idx"), None);
    }

    #[test]
    fn test_invalid_root_is_representable() {
        let header = HeaderPage::new();

        header.insert_record("idx", PageId(4));
        header.update_record("idx", PageId::INVALID);
        assert_eq!(header.get_record("idx"), Some(PageId::INVALID));
    }
}
