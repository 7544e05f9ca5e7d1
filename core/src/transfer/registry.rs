//! Bookkeeping for offered files and downloads in flight

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::PathBuf;

use uuid::Uuid;

use crate::{Error, Result};

/// Local files announced in clipboard entries, by entry id.
/// Bounded like the history so old offers expire with their entries.
#[derive(Debug)]
pub struct OfferedFiles {
    offers: VecDeque<(Uuid, Vec<PathBuf>)>,
    limit: usize,
}

impl OfferedFiles {
    pub fn new(limit: usize) -> Self {
        Self {
            offers: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    pub fn offer(&mut self, entry_id: Uuid, paths: Vec<PathBuf>) {
        self.offers.retain(|(id, _)| *id != entry_id);
        self.offers.push_front((entry_id, paths));
        self.offers.truncate(self.limit);
    }

    pub fn paths(&self, entry_id: Uuid) -> Option<&[PathBuf]> {
        self.offers
            .iter()
            .find(|(id, _)| *id == entry_id)
            .map(|(_, paths)| paths.as_slice())
    }

    pub fn path(&self, entry_id: Uuid, file_index: usize) -> Option<&PathBuf> {
        self.paths(entry_id)?.get(file_index)
    }

    pub fn remove(&mut self, entry_id: Uuid) {
        self.offers.retain(|(id, _)| *id != entry_id);
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit.max(1);
        self.offers.truncate(self.limit);
    }
}

#[derive(Debug, Default)]
struct EntryDownloads {
    expected: usize,
    done: BTreeMap<usize, PathBuf>,
    apply_to_clipboard: bool,
}

/// Downloads in flight and files already received
#[derive(Debug, Default)]
pub struct Downloads {
    active: HashSet<(Uuid, usize)>,
    entries: HashMap<Uuid, EntryDownloads>,
}

impl Downloads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `(entry_id, file_index)`. Fails if it is already downloading.
    pub fn begin(&mut self, entry_id: Uuid, file_index: usize) -> Result<()> {
        if !self.active.insert((entry_id, file_index)) {
            return Err(Error::InvalidState(format!(
                "file {} of {} is already downloading",
                file_index, entry_id
            )));
        }
        Ok(())
    }

    pub fn is_active(&self, entry_id: Uuid, file_index: usize) -> bool {
        self.active.contains(&(entry_id, file_index))
    }

    /// Remember how many files the entry has and whether the complete set
    /// should land on the clipboard.
    pub fn expect(&mut self, entry_id: Uuid, files: usize, apply_to_clipboard: bool) {
        let slot = self.entries.entry(entry_id).or_default();
        slot.expected = files;
        slot.apply_to_clipboard |= apply_to_clipboard;
    }

    /// A download ended. On success, returns the full path list once every
    /// file of an entry marked for the clipboard has arrived.
    pub fn finish(
        &mut self,
        entry_id: Uuid,
        file_index: usize,
        path: Option<PathBuf>,
    ) -> Option<Vec<PathBuf>> {
        self.active.remove(&(entry_id, file_index));
        let path = path?;

        let slot = self.entries.entry(entry_id).or_default();
        slot.done.insert(file_index, path);

        if slot.apply_to_clipboard && slot.expected > 0 && slot.done.len() == slot.expected {
            slot.apply_to_clipboard = false;
            Some(slot.done.values().cloned().collect())
        } else {
            None
        }
    }

    /// All received files of an entry, if every one has arrived
    pub fn received(&self, entry_id: Uuid) -> Option<Vec<PathBuf>> {
        let slot = self.entries.get(&entry_id)?;
        (slot.expected > 0 && slot.done.len() == slot.expected)
            .then(|| slot.done.values().cloned().collect())
    }

    pub fn forget(&mut self, entry_id: Uuid) {
        self.entries.remove(&entry_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offers_are_bounded() {
        let mut offers = OfferedFiles::new(2);
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            offers.offer(*id, vec![PathBuf::from(id.to_string())]);
        }

        assert!(offers.paths(ids[0]).is_none());
        assert_eq!(offers.path(ids[2], 0), Some(&PathBuf::from(ids[2].to_string())));
        assert!(offers.path(ids[2], 1).is_none());
    }

    #[test]
    fn test_duplicate_download_rejected() {
        let mut downloads = Downloads::new();
        let id = Uuid::new_v4();

        downloads.begin(id, 0).unwrap();
        assert!(matches!(downloads.begin(id, 0), Err(Error::InvalidState(_))));
        downloads.begin(id, 1).unwrap();

        downloads.finish(id, 0, None);
        downloads.begin(id, 0).unwrap();
    }

    #[test]
    fn test_complete_set_released_once() {
        let mut downloads = Downloads::new();
        let id = Uuid::new_v4();
        downloads.expect(id, 2, true);
        downloads.begin(id, 0).unwrap();
        downloads.begin(id, 1).unwrap();

        assert_eq!(downloads.finish(id, 1, Some("b".into())), None);
        assert_eq!(downloads.received(id), None);
        assert_eq!(
            downloads.finish(id, 0, Some("a".into())),
            Some(vec![PathBuf::from("a"), PathBuf::from("b")])
        );
        assert_eq!(downloads.received(id), Some(vec![PathBuf::from("a"), PathBuf::from("b")]));

        // a later manual re-download does not write the clipboard again
        downloads.begin(id, 0).unwrap();
        assert_eq!(downloads.finish(id, 0, Some("a".into())), None);
    }
}
