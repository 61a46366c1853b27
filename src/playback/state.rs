use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::media::MediaItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Initializing,
    WaitingForMedia,
    Active,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackStateChange {
    pub from: PlaybackState,
    pub to: PlaybackState,
}

/// Top-level lifecycle. `Shutdown` is terminal.
#[derive(Debug)]
pub struct PlaybackSM {
    state: PlaybackState,
}

impl Default for PlaybackSM {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackSM {
    pub fn new() -> Self {
        Self {
            state: PlaybackState::Initializing,
        }
    }

    pub fn current(&self) -> PlaybackState {
        self.state
    }

    /// Moves between waiting and playing as the list fills or empties.
    pub fn on_media_count(&mut self, count: usize) -> Option<PlaybackStateChange> {
        if self.state == PlaybackState::Shutdown {
            return None;
        }
        if count == 0 {
            self.goto(PlaybackState::WaitingForMedia)
        } else {
            self.goto(PlaybackState::Active)
        }
    }

    pub fn on_shutdown(&mut self) -> Option<PlaybackStateChange> {
        self.goto(PlaybackState::Shutdown)
    }

    fn goto(&mut self, to: PlaybackState) -> Option<PlaybackStateChange> {
        if self.state == to {
            return None;
        }
        let change = PlaybackStateChange {
            from: self.state,
            to,
        };
        self.state = to;
        Some(change)
    }
}

/// What a rescan did to the list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListUpdate {
    /// The item under the cursor survived, unchanged on disk.
    pub kept_current: bool,
    /// Paths listed before and after whose file content changed in between.
    pub changed: HashSet<PathBuf>,
}

/// The ordered media list with a wrap-around cursor.
#[derive(Debug, Default)]
pub struct Playlist {
    items: Vec<Arc<MediaItem>>,
    index: usize,
}

impl Playlist {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> Option<Arc<MediaItem>> {
        self.items.get(self.index).cloned()
    }

    /// Moves to the next item, wrapping at the end.
    pub fn advance(&mut self) -> Option<Arc<MediaItem>> {
        if self.items.is_empty() {
            return None;
        }
        self.index = (self.index + 1) % self.items.len();
        self.current()
    }

    /// Swaps in a fresh scan.
    ///
    /// Items whose file is unchanged keep their memoised metadata; a file rewritten
    /// under the same name gets the fresh item and is reported in `changed`.
    pub fn replace(&mut self, items: Vec<MediaItem>) -> ListUpdate {
        let current = self.current();
        let previous: Vec<Arc<MediaItem>> = std::mem::take(&mut self.items);
        let mut changed = HashSet::new();
        self.items = items
            .into_iter()
            .map(|item| match previous.iter().find(|old| old.path() == item.path()) {
                Some(old) if old.is_same_content(&item) => Arc::clone(old),
                Some(_) => {
                    changed.insert(item.path().to_path_buf());
                    Arc::new(item)
                }
                None => Arc::new(item),
            })
            .collect();
        let position = current
            .as_ref()
            .and_then(|item| self.position(item.path()));
        let kept_current = match position {
            Some(idx) => {
                self.index = idx;
                current.is_some_and(|item| !changed.contains(item.path()))
            }
            None => {
                self.index = 0;
                false
            }
        };
        ListUpdate {
            kept_current,
            changed,
        }
    }

    fn position(&self, path: &Path) -> Option<usize> {
        self.items.iter().position(|item| item.path() == path)
    }

    pub fn paths(&self) -> HashSet<PathBuf> {
        self.items
            .iter()
            .map(|item| item.path().to_path_buf())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    use crate::media::FileStamp;

    fn stamp(len: u64) -> Option<FileStamp> {
        Some(FileStamp {
            len,
            modified: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)),
        })
    }

    fn items(names: &[&str]) -> Vec<MediaItem> {
        names
            .iter()
            .map(|n| MediaItem::with_stamp(format!("/m/{n}"), stamp(100)))
            .collect()
    }

    #[test]
    fn lifecycle_transitions() {
        let mut sm = PlaybackSM::new();
        assert_eq!(sm.current(), PlaybackState::Initializing);
        let ch = sm.on_media_count(0).unwrap();
        assert_eq!(ch.to, PlaybackState::WaitingForMedia);
        assert!(sm.on_media_count(0).is_none());
        assert_eq!(sm.on_media_count(3).unwrap().to, PlaybackState::Active);
        sm.on_shutdown().unwrap();
        assert!(sm.on_media_count(3).is_none());
        assert_eq!(sm.current(), PlaybackState::Shutdown);
    }

    #[test]
    fn advance_wraps() {
        let mut list = Playlist::default();
        assert!(list.advance().is_none());
        list.replace(items(&["a.jpg", "b.jpg"]));
        assert_eq!(list.current().unwrap().path(), Path::new("/m/a.jpg"));
        assert_eq!(list.advance().unwrap().path(), Path::new("/m/b.jpg"));
        assert_eq!(list.advance().unwrap().path(), Path::new("/m/a.jpg"));
    }

    #[test]
    fn rescan_follows_the_current_item() {
        let mut list = Playlist::default();
        list.replace(items(&["a.jpg", "b.jpg", "c.jpg"]));
        list.advance();
        let before = list.current().unwrap();
        let update = list.replace(items(&["0.jpg", "b.jpg", "c.jpg"]));
        assert!(update.kept_current);
        assert!(update.changed.is_empty());
        assert_eq!(list.index(), 1);
        assert!(Arc::ptr_eq(&before, &list.current().unwrap()));

        assert!(!list.replace(items(&["x.jpg"])).kept_current);
        assert_eq!(list.index(), 0);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn rewritten_file_gets_a_fresh_item() {
        let mut list = Playlist::default();
        list.replace(items(&["a.jpg", "b.jpg"]));
        let old_a = list.current().unwrap();
        list.advance();
        let old_b = list.current().unwrap();

        let mut next = items(&["a.jpg"]);
        next.push(MediaItem::with_stamp("/m/b.jpg", stamp(250)));
        let update = list.replace(next);

        assert!(!update.kept_current, "the current item changed on disk");
        assert_eq!(list.index(), 1, "the cursor still follows the path");
        assert_eq!(update.changed, HashSet::from([PathBuf::from("/m/b.jpg")]));
        assert!(!Arc::ptr_eq(&old_b, &list.current().unwrap()));
        list.advance();
        assert!(Arc::ptr_eq(&old_a, &list.current().unwrap()));
    }

    #[test]
    fn unknown_stamps_are_never_reused() {
        let mut list = Playlist::default();
        list.replace(vec![MediaItem::with_stamp("/m/a.jpg", None)]);
        let before = list.current().unwrap();
        let update = list.replace(vec![MediaItem::with_stamp("/m/a.jpg", None)]);
        assert!(!Arc::ptr_eq(&before, &list.current().unwrap()));
        assert!(update.changed.contains(Path::new("/m/a.jpg")));
    }
}
