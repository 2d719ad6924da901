use std::collections::HashSet;

use crate::types::ConversationEntry;

/// Result of one [`ConversationLog::merge`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Entries that were new to the log, in batch order.
    pub inserted: Vec<ConversationEntry>,
    /// Number of entries dropped because their id was already present.
    pub duplicates: usize,
}

impl MergeOutcome {
    /// Whether the merge changed the log.
    pub fn changed(&self) -> bool {
        !self.inserted.is_empty()
    }
}

/// Ordered, deduplicated store of conversation entries.
///
/// Entries are kept sorted by timestamp ascending. Entries without a
/// timestamp sit after every timestamped entry, in arrival order. Entries
/// sharing a timestamp also keep arrival order.
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    entries: Vec<ConversationEntry>,
    ids: HashSet<String>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current entries in display order.
    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Merge a batch of fetched or pushed entries.
    ///
    /// Re-delivering an entry whose id is already present (from an earlier
    /// merge or earlier in the same batch) is a no-op.
    pub fn merge<I>(&mut self, batch: I) -> MergeOutcome
    where
        I: IntoIterator<Item = ConversationEntry>,
    {
        let mut outcome = MergeOutcome::default();
        for entry in batch {
            if !self.ids.insert(entry.id.clone()) {
                outcome.duplicates += 1;
                continue;
            }
            self.entries.push(entry.clone());
            outcome.inserted.push(entry);
        }

        if outcome.changed() {
            // Stable sort keeps arrival order among equal keys and among untimed tails.
            self.entries
                .sort_by(|a, b| match (a.timestamp, b.timestamp) {
                    (Some(a), Some(b)) => a.cmp(&b),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                });
        }

        outcome
    }

    /// Merge a single entry.
    pub fn append_one(&mut self, entry: ConversationEntry) -> MergeOutcome {
        self.merge(std::iter::once(entry))
    }

    /// Owned copy of the current entries.
    pub fn snapshot(&self) -> Vec<ConversationEntry> {
        self.entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::types::EntryKind;

    fn at(secs: i64) -> Option<DateTime<Utc>> {
        Some(Utc.timestamp_opt(1_731_000_000 + secs, 0).single().expect("valid timestamp"))
    }

    fn entry(id: &str, timestamp: Option<DateTime<Utc>>) -> ConversationEntry {
        ConversationEntry {
            id: id.to_owned(),
            client_id: "dc-123".to_owned(),
            timestamp,
            kind: EntryKind::FromOperator,
            text: format!("text for {id}"),
            operator_id: None,
            ticket_id: None,
        }
    }

    fn ids(log: &ConversationLog) -> Vec<&str> {
        log.entries().iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let mut log = ConversationLog::new();
        let outcome = log.merge(Vec::new());
        assert!(!outcome.changed());
        assert_eq!(outcome.duplicates, 0);
        assert!(log.is_empty());
    }

    #[test]
    fn sorts_out_of_order_batch_by_timestamp() {
        let mut log = ConversationLog::new();
        log.merge(vec![entry("m3", at(30)), entry("m1", at(10)), entry("m2", at(20))]);
        assert_eq!(ids(&log), vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn untimed_entries_trail_in_arrival_order() {
        let mut log = ConversationLog::new();
        log.merge(vec![entry("legacy-a", None), entry("m2", at(20))]);
        log.merge(vec![entry("legacy-b", None), entry("m1", at(10))]);
        assert_eq!(ids(&log), vec!["m1", "m2", "legacy-a", "legacy-b"]);
    }

    #[test]
    fn equal_timestamps_keep_arrival_order() {
        let mut log = ConversationLog::new();
        log.append_one(entry("b", at(5)));
        log.append_one(entry("a", at(5)));
        assert_eq!(ids(&log), vec!["b", "a"]);
    }

    #[test]
    fn duplicate_ids_are_ignored_in_any_arrival_order() {
        let history = vec![entry("m1", at(10)), entry("m2", at(20))];
        let live = entry("m2", at(20));

        let mut bootstrap_first = ConversationLog::new();
        bootstrap_first.merge(history.clone());
        let outcome = bootstrap_first.append_one(live.clone());
        assert!(!outcome.changed());
        assert_eq!(outcome.duplicates, 1);

        let mut live_first = ConversationLog::new();
        live_first.append_one(live);
        let outcome = live_first.merge(history);
        assert_eq!(outcome.inserted.len(), 1);
        assert_eq!(outcome.inserted[0].id, "m1");

        assert_eq!(ids(&bootstrap_first), vec!["m1", "m2"]);
        assert_eq!(ids(&live_first), vec!["m1", "m2"]);
    }

    #[test]
    fn duplicates_inside_one_batch_collapse() {
        let mut log = ConversationLog::new();
        let outcome = log.merge(vec![entry("m1", at(1)), entry("m1", at(1))]);
        assert_eq!(outcome.inserted.len(), 1);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(log.len(), 1);
        assert!(log.contains("m1"));
    }

    #[test]
    fn timestamped_prefix_stays_sorted_across_many_merges() {
        let mut log = ConversationLog::new();
        for (i, secs) in [50, 10, 40, 20, 30, 0, 60].into_iter().enumerate() {
            log.append_one(entry(&format!("e{i}"), at(secs)));
        }
        log.append_one(entry("untimed", None));

        let stamps: Vec<_> = log
            .entries()
            .iter()
            .filter_map(|e| e.timestamp)
            .collect();
        assert!(stamps.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(log.entries().last().map(|e| e.id.as_str()), Some("untimed"));
    }
}
