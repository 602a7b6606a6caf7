use serde::{Deserialize, Serialize};

use crate::model::Ms;

/// One identity's place in a room's wait list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaitEntry {
    pub name: String,
    /// Unix ms when the entry was appended.
    pub time: Ms,
}

impl WaitEntry {
    pub fn new(name: impl Into<String>, time: Ms) -> Self {
        Self {
            name: name.into(),
            time,
        }
    }

    /// Time spent waiting as of `now`; never negative, never overflows.
    pub fn waited(&self, now: Ms) -> Ms {
        now.saturating_sub(self.time).max(0)
    }
}

/// Ordered, deduplicated queue of waiters for one room.
///
/// Entries are only ever appended at the tail, so arrival order is also
/// ascending `time` order. Persisted as a single JSON blob:
/// `[{"name": "...", "time": <ms>}, ...]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitList {
    entries: Vec<WaitEntry>,
}

impl WaitList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from entries, rejecting duplicate names and negative or out-of-order times.
    pub fn from_entries(entries: Vec<WaitEntry>) -> Result<Self, WaitListError> {
        for (i, entry) in entries.iter().enumerate() {
            if entry.time < 0 {
                return Err(WaitListError::NegativeTime {
                    name: entry.name.clone(),
                    time: entry.time,
                });
            }
            if entries[..i].iter().any(|e| e.name == entry.name) {
                return Err(WaitListError::DuplicateName(entry.name.clone()));
            }
            if let Some(prev) = i.checked_sub(1).map(|p| &entries[p])
                && entry.time < prev.time
            {
                return Err(WaitListError::OutOfOrder {
                    name: entry.name.clone(),
                    time: entry.time,
                    previous: prev.time,
                });
            }
        }
        Ok(Self { entries })
    }

    /// Parse the persisted blob. Malformed content fails loudly.
    pub fn from_blob(blob: &str) -> Result<Self, WaitListError> {
        if blob.trim().is_empty() {
            return Ok(Self::new());
        }
        let entries: Vec<WaitEntry> =
            serde_json::from_str(blob).map_err(|e| WaitListError::Malformed(e.to_string()))?;
        Self::from_entries(entries)
    }

    pub fn to_blob(&self) -> Result<String, WaitListError> {
        serde_json::to_string(&self.entries).map_err(|e| WaitListError::Malformed(e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[WaitEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, WaitEntry> {
        self.entries.iter()
    }

    pub fn head(&self) -> Option<&WaitEntry> {
        self.entries.first()
    }

    pub fn find(&self, name: &str) -> Option<&WaitEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Add to the tail. Callers check `contains` first; a duplicate is a bug.
    pub fn append(&mut self, entry: WaitEntry) {
        debug_assert!(
            !self.contains(&entry.name),
            "duplicate wait list entry for {}",
            entry.name
        );
        debug_assert!(
            self.entries.last().is_none_or(|tail| tail.time <= entry.time),
            "wait list append out of time order"
        );
        self.entries.push(entry);
    }

    /// Append `name` stamped with `now`, clamped so it never sorts before the
    /// current tail. Returns the stamp used.
    pub fn enqueue(&mut self, name: &str, now: Ms) -> Ms {
        let time = self.entries.last().map_or(now, |tail| tail.time.max(now));
        self.append(WaitEntry::new(name, time));
        time
    }

    /// Remove every entry matching `pred`. Returns how many were removed.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&WaitEntry) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !pred(e));
        before - self.entries.len()
    }

    /// Remove `name` if present. Absence is not an error.
    pub fn remove(&mut self, name: &str) -> bool {
        self.remove_where(|e| e.name == name) > 0
    }

    /// Copy of this list without any entry for `name`.
    pub fn filter_out_name(&self, name: &str) -> WaitList {
        let mut out = self.clone();
        out.remove(name);
        out
    }

    // ── Derived views ────────────────────────────────────────

    /// Number of people ahead of `name`, or `None` if not waiting.
    pub fn ahead_of(&self, name: &str) -> Option<usize> {
        self.index_of(name)
    }

    pub fn is_next(&self, name: &str) -> bool {
        self.ahead_of(name) == Some(0)
    }

    /// How long the first waiter has been waiting.
    pub fn longest_wait(&self, now: Ms) -> Option<Ms> {
        self.head().map(|e| e.waited(now))
    }
}

impl<'a> IntoIterator for &'a WaitList {
    type Item = &'a WaitEntry;
    type IntoIter = std::slice::Iter<'a, WaitEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitListError {
    Malformed(String),
    DuplicateName(String),
    OutOfOrder { name: String, time: Ms, previous: Ms },
    NegativeTime { name: String, time: Ms },
}

impl std::fmt::Display for WaitListError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitListError::Malformed(e) => write!(f, "malformed wait list: {e}"),
            WaitListError::DuplicateName(name) => {
                write!(f, "wait list has duplicate entry for {name}")
            }
            WaitListError::OutOfOrder {
                name,
                time,
                previous,
            } => write!(
                f,
                "wait list out of order: {name} at {time} follows entry at {previous}"
            ),
            WaitListError::NegativeTime { name, time } => {
                write!(f, "wait list entry for {name} has negative time {time}")
            }
        }
    }
}

impl std::error::Error for WaitListError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(names: &[(&str, Ms)]) -> WaitList {
        let mut wl = WaitList::new();
        for (name, time) in names {
            wl.append(WaitEntry::new(*name, *time));
        }
        wl
    }

    #[test]
    fn append_keeps_arrival_order() {
        let wl = list(&[("bob", 10), ("carol", 20), ("dave", 20)]);
        let names: Vec<_> = wl.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["bob", "carol", "dave"]);
        assert_eq!(wl.head().unwrap().name, "bob");
    }

    #[test]
    fn enqueue_clamps_to_tail_time() {
        let mut wl = list(&[("bob", 1_000)]);
        // Wall clock stepped backwards
        let stamped = wl.enqueue("carol", 900);
        assert_eq!(stamped, 1_000);
        assert_eq!(wl.find("carol").unwrap().time, 1_000);

        let stamped = wl.enqueue("dave", 2_000);
        assert_eq!(stamped, 2_000);
    }

    #[test]
    fn remove_absent_is_noop() {
        let mut wl = list(&[("bob", 1)]);
        assert!(!wl.remove("zed"));
        assert_eq!(wl.len(), 1);
        assert!(wl.remove("bob"));
        assert!(wl.is_empty());
    }

    #[test]
    fn remove_where_counts_removed() {
        let mut wl = list(&[("bob", 1), ("bea", 2), ("carol", 3)]);
        let removed = wl.remove_where(|e| e.name.starts_with('b'));
        assert_eq!(removed, 2);
        assert_eq!(wl.index_of("carol"), Some(0));
    }

    #[test]
    fn filter_out_name_leaves_source_untouched() {
        let wl = list(&[("bob", 1), ("carol", 2)]);
        let filtered = wl.filter_out_name("bob");
        assert_eq!(filtered.len(), 1);
        assert!(!filtered.contains("bob"));
        assert!(wl.contains("bob"));
    }

    #[test]
    fn position_views() {
        let wl = list(&[("bob", 1_000), ("carol", 1_500), ("dave", 2_000)]);
        assert_eq!(wl.ahead_of("bob"), Some(0));
        assert_eq!(wl.ahead_of("dave"), Some(2));
        assert_eq!(wl.ahead_of("erin"), None);
        assert!(wl.is_next("bob"));
        assert!(!wl.is_next("carol"));
        assert_eq!(wl.longest_wait(5_000), Some(4_000));
        assert_eq!(WaitList::new().longest_wait(5_000), None);
    }

    #[test]
    fn blob_parses_typed_times() {
        let blob = r#"[{"name":"bob","time":1000},{"name":"carol","time":2000}]"#;
        let wl = WaitList::from_blob(blob).unwrap();
        assert_eq!(wl.entries()[1], WaitEntry::new("carol", 2000));
        assert_eq!(wl.to_blob().unwrap(), blob);
    }

    #[test]
    fn blob_empty_is_empty_list() {
        assert!(WaitList::from_blob("").unwrap().is_empty());
        assert!(WaitList::from_blob("[]").unwrap().is_empty());
    }

    #[test]
    fn blob_rejects_string_time() {
        let blob = r#"[{"name":"bob","time":"2024-01-01T00:00:00Z"}]"#;
        assert!(matches!(
            WaitList::from_blob(blob),
            Err(WaitListError::Malformed(_))
        ));
    }

    #[test]
    fn blob_rejects_unknown_field() {
        let blob = r#"[{"name":"bob","time":1,"priority":5}]"#;
        assert!(matches!(
            WaitList::from_blob(blob),
            Err(WaitListError::Malformed(_))
        ));
    }

    #[test]
    fn blob_rejects_duplicates() {
        let blob = r#"[{"name":"bob","time":1},{"name":"bob","time":2}]"#;
        assert_eq!(
            WaitList::from_blob(blob),
            Err(WaitListError::DuplicateName("bob".into()))
        );
    }

    #[test]
    fn blob_rejects_out_of_order() {
        let blob = r#"[{"name":"bob","time":5},{"name":"carol","time":2}]"#;
        assert!(matches!(
            WaitList::from_blob(blob),
            Err(WaitListError::OutOfOrder { previous: 5, .. })
        ));
    }

    #[test]
    fn blob_rejects_negative_time() {
        let blob = r#"[{"name":"bob","time":-9223372036854775808}]"#;
        assert!(matches!(
            WaitList::from_blob(blob),
            Err(WaitListError::NegativeTime { .. })
        ));
    }

    #[test]
    fn wait_durations_saturate() {
        let mut wl = WaitList::new();
        wl.append(WaitEntry::new("bob", 0));
        assert_eq!(wl.longest_wait(Ms::MIN), Some(0));
        assert_eq!(wl.longest_wait(Ms::MAX), Some(Ms::MAX));

        let far_past = WaitEntry::new("carol", Ms::MIN);
        assert_eq!(far_past.waited(1_700_000_000_000), Ms::MAX);
        assert_eq!(WaitEntry::new("dave", 500).waited(100), 0);
    }
}
