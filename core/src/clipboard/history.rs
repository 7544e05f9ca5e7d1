//! Bounded clipboard history, newest first

use std::collections::VecDeque;

use uuid::Uuid;

use super::ClipboardEntry;

#[derive(Debug)]
pub struct History {
    entries: VecDeque<ClipboardEntry>,
    limit: usize,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    /// Add an entry. Returns `false` (and changes nothing) if an entry with
    /// the same id is already present.
    pub fn push(&mut self, entry: ClipboardEntry) -> bool {
        if self.contains(entry.id) {
            return false;
        }
        self.entries.push_front(entry);
        self.entries.truncate(self.limit);
        true
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub fn get(&self, id: Uuid) -> Option<&ClipboardEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn remove(&mut self, id: Uuid) -> Option<ClipboardEntry> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        self.entries.remove(index)
    }

    pub fn entries(&self) -> Vec<ClipboardEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Change the bound, dropping the oldest entries if needed. Returns the
    /// ids that were dropped.
    pub fn set_limit(&mut self, limit: usize) -> Vec<Uuid> {
        self.limit = limit.max(1);
        let dropped = self
            .entries
            .iter()
            .skip(self.limit)
            .map(|e| e.id)
            .collect();
        self.entries.truncate(self.limit);
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::PreparedContent;

    fn entry(text: &str) -> ClipboardEntry {
        ClipboardEntry::local(&PreparedContent::text(text), "dev", "host")
    }

    #[test]
    fn test_duplicate_id_is_kept_once() {
        let mut history = History::new(10);
        let e = entry("a");

        assert!(history.push(e.clone()));
        assert!(!history.push(e.clone()));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_bounded_newest_first() {
        let mut history = History::new(2);
        let a = entry("a");
        let b = entry("b");
        let c = entry("c");
        history.push(a.clone());
        history.push(b.clone());
        history.push(c.clone());

        let texts: Vec<_> = history.entries().into_iter().filter_map(|e| e.text).collect();
        assert_eq!(texts, vec!["c", "b"]);
        assert!(!history.contains(a.id));
    }

    #[test]
    fn test_remove_and_shrink() {
        let mut history = History::new(5);
        let entries: Vec<_> = (0..4).map(|i| entry(&i.to_string())).collect();
        for e in &entries {
            history.push(e.clone());
        }

        assert_eq!(history.remove(entries[1].id), Some(entries[1].clone()));
        assert!(history.remove(entries[1].id).is_none());

        let dropped = history.set_limit(1);
        assert_eq!(dropped, vec![entries[2].id, entries[0].id]);
        assert_eq!(history.entries(), vec![entries[3].clone()]);
    }
}
