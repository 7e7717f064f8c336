use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::{DateTime, Duration, Utc};
use log::warn;
use serde::Serialize;

use crate::models::CapturedFragment;
use crate::settings::ContextConfig;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub fragments: usize,
    pub chars: usize,
    pub evicted: u64,
    pub refused: u64,
}

struct Window {
    fragments: VecDeque<CapturedFragment>,
    total_chars: usize,
    /// Timestamp of the newest fragment ever evicted. Nothing older may
    /// re-enter, so the window stays a contiguous suffix in time.
    evicted_through: Option<DateTime<Utc>>,
    evicted: u64,
    refused: u64,
}

impl Window {
    fn pop_oldest(&mut self) {
        if let Some(old) = self.fragments.pop_front() {
            self.total_chars -= old.char_len();
            self.evicted += 1;
            self.evicted_through = Some(
                self.evicted_through
                    .map_or(old.timestamp(), |mark| mark.max(old.timestamp())),
            );
        }
    }

    fn evict_older_than(&mut self, cutoff: DateTime<Utc>) {
        while self
            .fragments
            .front()
            .is_some_and(|f| f.timestamp() < cutoff)
        {
            self.pop_oldest();
        }
    }

    fn evict_over(&mut self, max_fragments: usize, max_chars: usize) {
        while self.fragments.len() > max_fragments || self.total_chars > max_chars {
            self.pop_oldest();
        }
    }
}

/// The rolling in-memory window of recent sanitized fragments.
///
/// Cloning gives another handle to the same window. Every operation takes
/// one short lock, so a snapshot never sees a half-applied insert or
/// eviction.
#[derive(Clone)]
pub struct ContextStore {
    inner: Arc<Mutex<Window>>,
    max_age: Duration,
    max_fragments: usize,
    max_chars: usize,
}

impl ContextStore {
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Window {
                fragments: VecDeque::new(),
                total_chars: 0,
                evicted_through: None,
                evicted: 0,
                refused: 0,
            })),
            max_age: config.max_age(),
            max_fragments: config.max_fragments,
            max_chars: config.max_chars,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Add a fragment. Returns `false` when it was refused: flagged
    /// sensitive, blank, already older than the window allows, or older
    /// than something already evicted.
    pub fn insert(&self, mut fragment: CapturedFragment) -> bool {
        if fragment.is_sensitive() {
            warn!(
                "refusing sensitive {} fragment; redaction must happen before insert",
                fragment.source().as_str()
            );
            self.lock().refused += 1;
            return false;
        }
        if fragment.text().trim().is_empty() {
            return false;
        }
        fragment.truncate_chars(self.max_chars);

        let mut window = self.lock();

        let newest = window
            .fragments
            .back()
            .map(|f| f.timestamp().max(fragment.timestamp()))
            .unwrap_or_else(|| fragment.timestamp());
        let behind_eviction = window
            .evicted_through
            .is_some_and(|mark| fragment.timestamp() < mark);
        if behind_eviction || fragment.timestamp() < newest - self.max_age {
            window.refused += 1;
            return false;
        }

        // Samplers race, so a fragment can arrive slightly late. It goes
        // after every entry with an equal or earlier timestamp.
        let position = window
            .fragments
            .iter()
            .rposition(|f| f.timestamp() <= fragment.timestamp())
            .map_or(0, |i| i + 1);

        window.total_chars += fragment.char_len();
        window.fragments.insert(position, fragment);

        window.evict_older_than(newest - self.max_age);
        window.evict_over(self.max_fragments, self.max_chars);
        true
    }

    /// Copy of the window as of now, oldest first.
    pub fn snapshot(&self) -> Vec<CapturedFragment> {
        self.snapshot_at(Utc::now())
    }

    /// Copy of the window as of `now`, oldest first. Entries older than the
    /// age bound at `now` are evicted first.
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> Vec<CapturedFragment> {
        let mut window = self.lock();
        window.evict_older_than(now - self.max_age);
        window.fragments.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything. Used on shutdown.
    pub fn clear(&self) {
        let mut window = self.lock();
        let dropped = window.fragments.len() as u64;
        if let Some(last) = window.fragments.back().map(|f| f.timestamp()) {
            window.evicted_through = Some(window.evicted_through.map_or(last, |mark| mark.max(last)));
        }
        window.fragments.clear();
        window.total_chars = 0;
        window.evicted += dropped;
    }

    pub fn stats(&self) -> StoreStats {
        let window = self.lock();
        StoreStats {
            fragments: window.fragments.len(),
            chars: window.total_chars,
            evicted: window.evicted,
            refused: window.refused,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FragmentSource;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn config(max_age_secs: u64, max_fragments: usize, max_chars: usize) -> ContextConfig {
        ContextConfig {
            max_age_secs,
            max_fragments,
            max_chars,
        }
    }

    fn screen(text: &str, secs: i64) -> CapturedFragment {
        CapturedFragment::sanitized(FragmentSource::Screen, text, t0() + Duration::seconds(secs))
    }

    fn keys(text: &str, secs: i64) -> CapturedFragment {
        CapturedFragment::sanitized(FragmentSource::Keystroke, text, t0() + Duration::seconds(secs))
    }

    fn texts(fragments: &[CapturedFragment]) -> Vec<&str> {
        fragments.iter().map(|f| f.text()).collect()
    }

    #[test]
    fn snapshot_is_oldest_first() {
        let store = ContextStore::new(&config(60, 10, 1_000));
        store.insert(screen("a", 1));
        store.insert(keys("b", 2));
        store.insert(screen("c", 3));

        let snapshot = store.snapshot_at(t0() + Duration::seconds(4));
        assert_eq!(texts(&snapshot), vec!["a", "b", "c"]);
    }

    #[test]
    fn late_fragment_is_placed_by_timestamp() {
        let store = ContextStore::new(&config(60, 10, 1_000));
        store.insert(screen("a", 1));
        store.insert(screen("c", 3));
        store.insert(keys("b", 2));

        let snapshot = store.snapshot_at(t0() + Duration::seconds(4));
        assert_eq!(texts(&snapshot), vec!["a", "b", "c"]);
    }

    #[test]
    fn equal_timestamps_keep_insertion_order() {
        let store = ContextStore::new(&config(60, 10, 1_000));
        store.insert(screen("first", 1));
        store.insert(keys("second", 1));
        store.insert(screen("third", 1));

        let snapshot = store.snapshot_at(t0() + Duration::seconds(1));
        assert_eq!(texts(&snapshot), vec!["first", "second", "third"]);
    }

    #[test]
    fn snapshot_evicts_expired_entries() {
        let store = ContextStore::new(&config(10, 10, 1_000));
        store.insert(screen("old", 0));
        store.insert(screen("new", 8));

        let snapshot = store.snapshot_at(t0() + Duration::seconds(15));
        assert_eq!(texts(&snapshot), vec!["new"]);
        assert_eq!(store.stats().evicted, 1);
    }

    #[test]
    fn insert_evicts_by_age_relative_to_newest() {
        let store = ContextStore::new(&config(10, 10, 1_000));
        store.insert(screen("old", 0));
        store.insert(screen("new", 30));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn fragment_older_than_window_is_refused() {
        let store = ContextStore::new(&config(10, 10, 1_000));
        store.insert(screen("new", 30));
        assert!(!store.insert(keys("stale", 5)));
        assert_eq!(store.stats().refused, 1);
    }

    #[test]
    fn fragment_count_bound_drops_oldest() {
        let store = ContextStore::new(&config(60, 2, 1_000));
        store.insert(screen("a", 1));
        store.insert(screen("b", 2));
        store.insert(screen("c", 3));

        assert_eq!(texts(&store.snapshot_at(t0() + Duration::seconds(3))), vec!["b", "c"]);
    }

    #[test]
    fn char_bound_drops_oldest() {
        let store = ContextStore::new(&config(60, 10, 10));
        store.insert(screen("aaaa", 1));
        store.insert(screen("bbbb", 2));
        store.insert(screen("cccc", 3));

        assert_eq!(texts(&store.snapshot_at(t0() + Duration::seconds(3))), vec!["bbbb", "cccc"]);
        assert_eq!(store.stats().chars, 8);
    }

    #[test]
    fn late_fragment_behind_evicted_one_is_refused() {
        let store = ContextStore::new(&config(60, 10, 10));
        store.insert(screen("aaaaaaaa", 2));
        store.insert(screen("bbbbbbbb", 3));
        assert_eq!(store.stats().evicted, 1);

        assert!(!store.insert(keys("c", 1)));
        assert_eq!(texts(&store.snapshot_at(t0() + Duration::seconds(3))), vec!["bbbbbbbb"]);
        assert_eq!(store.stats().refused, 1);

        assert!(store.insert(keys("d", 2)));
        assert_eq!(
            texts(&store.snapshot_at(t0() + Duration::seconds(3))),
            vec!["d", "bbbbbbbb"]
        );
    }

    #[test]
    fn oversized_fragment_is_truncated() {
        let store = ContextStore::new(&config(60, 10, 5));
        store.insert(screen("abcdefgh", 1));
        assert_eq!(texts(&store.snapshot_at(t0() + Duration::seconds(1))), vec!["abcde"]);
    }

    #[test]
    fn sensitive_and_blank_fragments_are_refused() {
        let store = ContextStore::new(&config(60, 10, 1_000));
        let secret = CapturedFragment::flagged_sensitive(FragmentSource::Keystroke, "hunter2", t0());
        assert!(!store.insert(secret));
        assert!(!store.insert(keys("   ", 1)));
        assert!(store.is_empty());
    }

    #[test]
    fn clear_empties_window() {
        let store = ContextStore::new(&config(60, 10, 1_000));
        store.insert(screen("a", 1));
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.stats().chars, 0);
    }

    #[test]
    fn concurrent_writers_lose_nothing() {
        let store = ContextStore::new(&config(600, 10_000, 1_000_000));
        std::thread::scope(|scope| {
            for writer in 0..4 {
                let store = store.clone();
                scope.spawn(move || {
                    for i in 0..250 {
                        let source = if writer % 2 == 0 {
                            FragmentSource::Screen
                        } else {
                            FragmentSource::Keystroke
                        };
                        let text = format!("writer-{writer}-item-{i}");
                        let at = t0() + Duration::milliseconds(i);
                        store.insert(CapturedFragment::sanitized(source, text, at));
                    }
                });
            }
        });

        let snapshot = store.snapshot_at(t0() + Duration::seconds(1));
        assert_eq!(snapshot.len(), 1_000);
        assert!(snapshot
            .windows(2)
            .all(|pair| pair[0].timestamp() <= pair[1].timestamp()));
        assert!(snapshot
            .iter()
            .all(|f| f.text().starts_with("writer-") && f.text().contains("-item-")));
    }
}
