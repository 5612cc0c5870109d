//! Bounded, de-duplicated, newest-first event list.

use std::collections::{HashSet, VecDeque};

use serde_json::Value;

use super::record::LiveRecord;
use crate::errors::MalformedEventError;

/// Result of offering one record to a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Prepended; `evicted` tail items were dropped to stay within capacity.
    Inserted { evicted: usize },
    /// The id was already present; the list is unchanged.
    Duplicate,
}

/// Newest-first list of at most `capacity` records with unique ids.
///
/// Order is arrival order, not event time. Overflow always evicts from the
/// tail.
#[derive(Debug, Clone)]
pub struct BoundedEventList<T: LiveRecord> {
    items: VecDeque<T>,
    ids: HashSet<T::Id>,
    capacity: usize,
}

impl<T: LiveRecord> BoundedEventList<T> {
    /// Empty list. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Seeds the list from a snapshot that is already newest-first.
    ///
    /// Keeps the head of the snapshot up to `capacity`; a repeated id keeps
    /// its first (newest) occurrence.
    pub fn initialize(snapshot: impl IntoIterator<Item = T>, capacity: usize) -> Self {
        let mut list = Self::new(capacity);
        for item in snapshot {
            if list.items.len() == list.capacity {
                break;
            }
            if list.ids.insert(item.id().clone()) {
                list.items.push_back(item);
            }
        }
        list
    }

    /// Offers a validated record: duplicate ids are ignored, new ids are
    /// prepended and the tail is trimmed back to capacity.
    pub fn merge(&mut self, item: T) -> MergeOutcome {
        if self.ids.contains(item.id()) {
            return MergeOutcome::Duplicate;
        }
        self.ids.insert(item.id().clone());
        self.items.push_front(item);

        let mut evicted = 0;
        while self.items.len() > self.capacity {
            if let Some(dropped) = self.items.pop_back() {
                self.ids.remove(dropped.id());
                evicted += 1;
            }
        }
        MergeOutcome::Inserted { evicted }
    }

    /// Validates a raw payload and merges it. A malformed payload leaves the
    /// list untouched and comes back as the error value.
    pub fn ingest(&mut self, payload: &Value) -> Result<MergeOutcome, MalformedEventError> {
        let record = T::from_payload(payload)?;
        Ok(self.merge(record))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &T::Id) -> bool {
        self.ids.contains(id)
    }

    pub fn newest(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    /// Frees the items; the capacity is kept.
    pub fn clear(&mut self) {
        self.items.clear();
        self.ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::live::Payload;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: String,
    }

    impl LiveRecord for Row {
        type Id = String;

        fn id(&self) -> &String {
            &self.id
        }

        fn from_payload(payload: &Value) -> Result<Self, MalformedEventError> {
            let p = Payload::new(payload)?;
            Ok(Row { id: p.id("id")? })
        }
    }

    fn row(id: u32) -> Row {
        Row { id: id.to_string() }
    }

    fn ids(list: &BoundedEventList<Row>) -> Vec<String> {
        list.iter().map(|r| r.id.clone()).collect()
    }

    #[test]
    fn test_initialize_within_capacity() {
        let list = BoundedEventList::initialize(vec![row(1), row(2), row(3)], 5);
        assert_eq!(ids(&list), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_initialize_truncates_tail() {
        let list = BoundedEventList::initialize((1..=10).map(row), 4);
        assert_eq!(ids(&list), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn test_initialize_empty_snapshot() {
        let list: BoundedEventList<Row> = BoundedEventList::initialize(Vec::new(), 5);
        assert!(list.is_empty());
        assert_eq!(list.capacity(), 5);
    }

    #[test]
    fn test_merge_prepends_new_id() {
        let mut list = BoundedEventList::initialize(vec![row(1), row(2), row(3)], 5);
        assert_eq!(list.merge(row(4)), MergeOutcome::Inserted { evicted: 0 });
        assert_eq!(ids(&list), vec!["4", "1", "2", "3"]);
    }

    #[test]
    fn test_merge_duplicate_is_noop() {
        let mut list = BoundedEventList::initialize(vec![row(4), row(1), row(2), row(3)], 5);
        assert_eq!(list.merge(row(2)), MergeOutcome::Duplicate);
        assert_eq!(ids(&list), vec!["4", "1", "2", "3"]);
    }

    #[test]
    fn test_merge_evicts_oldest_when_full() {
        let mut list = BoundedEventList::initialize(vec![row(1), row(2), row(3)], 3);
        assert_eq!(list.merge(row(4)), MergeOutcome::Inserted { evicted: 1 });
        assert_eq!(list.merge(row(5)), MergeOutcome::Inserted { evicted: 1 });
        assert_eq!(ids(&list), vec!["5", "4", "1"]);
        assert!(!list.contains(&"3".to_string()));

        // An evicted id is new again.
        assert_eq!(list.merge(row(3)), MergeOutcome::Inserted { evicted: 1 });
        assert_eq!(ids(&list), vec!["3", "5", "4"]);
    }

    #[test]
    fn test_ingest_rejects_missing_id() {
        let mut list = BoundedEventList::<Row>::new(5);
        let err = list.ingest(&json!({ "name": "no id" })).unwrap_err();
        assert!(matches!(err, MalformedEventError::MissingId { .. }));
        assert!(list.is_empty());
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let mut list = BoundedEventList::new(0);
        list.merge(row(1));
        list.merge(row(2));
        assert_eq!(ids(&list), vec!["2"]);
    }
}
