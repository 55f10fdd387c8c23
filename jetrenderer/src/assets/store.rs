use rustc_hash::{FxHashMap, FxHashSet};

/// Keyed asset storage behind an all-or-nothing readiness gate.
///
/// A store accepts one batch of ids. Reads return `None` until that batch has
/// settled, whatever the outcome of the individual loads. Entries merged with
/// [`AssetStore::add`] are readable right away unless a batch is in flight.
/// Once torn down the store refuses every write, so loads that complete late
/// are discarded.
#[derive(Debug)]
pub struct AssetStore<T> {
    label: &'static str,
    entries: FxHashMap<String, T>,
    batch_submitted: bool,
    pending: bool,
    alive: bool,
}

impl<T> AssetStore<T> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: FxHashMap::default(),
            batch_submitted: false,
            pending: false,
            alive: true,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.alive && !self.pending && (self.batch_submitted || !self.entries.is_empty())
    }

    pub fn is_loading(&self) -> bool {
        self.pending
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Starts the batch. Returns the ids that should actually be loaded, or
    /// `None` when a batch was already submitted or the store is torn down.
    pub fn begin_batch(&mut self, ids: &[String]) -> Option<Vec<String>> {
        if !self.alive {
            log::error!("{}: cannot load into a destroyed cache", self.label);
            return None;
        }
        if self.batch_submitted {
            log::error!(
                "{}: a load batch was already submitted, ignoring {} more",
                self.label,
                ids.len()
            );
            return None;
        }

        let mut seen = FxHashSet::default();
        let accepted = ids
            .iter()
            .filter(|id| {
                if self.entries.contains_key(id.as_str()) || !seen.insert(id.as_str()) {
                    log::error!("{}: `{id}` is already loaded or queued", self.label);
                    return false;
                }
                true
            })
            .cloned()
            .collect();

        self.batch_submitted = true;
        self.pending = true;
        Some(accepted)
    }

    /// Stores the result of one load. Refused after teardown or for ids that
    /// are already present; the value is handed back in that case.
    pub fn insert(&mut self, id: String, value: T) -> Result<(), T> {
        if !self.alive {
            log::debug!("{}: dropping late load of `{id}`", self.label);
            return Err(value);
        }
        if self.entries.contains_key(&id) {
            log::error!("{}: `{id}` is already loaded", self.label);
            return Err(value);
        }
        self.entries.insert(id, value);
        Ok(())
    }

    /// Marks the batch settled.
    pub fn finish_batch(&mut self) {
        if self.alive {
            self.pending = false;
            log::debug!("{}: ready with {} entries", self.label, self.entries.len());
        }
    }

    /// Merges an entry outside of the batch. A store with no batch in flight
    /// becomes ready; a loading store stays gated until its batch settles.
    pub fn add(&mut self, id: String, value: T) -> Result<(), T> {
        self.insert(id, value)
    }

    /// Gated lookup. `None` before readiness is the normal "not yet" answer.
    pub fn get(&self, id: &str) -> Option<&T> {
        if !self.is_ready() {
            log::debug!("{}: `{id}` requested before loading finished", self.label);
            return None;
        }

        let entry = self.entries.get(id);
        if entry.is_none() {
            log::error!("{}: `{id}` not found", self.label);
        }
        entry
    }

    /// Marks the store dead and hands back everything it held.
    pub fn teardown(&mut self) -> Vec<(String, T)> {
        self.alive = false;
        self.pending = false;
        self.entries.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn reads_are_gated_until_batch_settles() {
        let mut store = AssetStore::new("test");
        let accepted = store.begin_batch(&ids(&["a", "b"])).unwrap();
        assert_eq!(accepted, ids(&["a", "b"]));

        store.insert("a".into(), 1).unwrap();
        assert_eq!(store.get("a"), None);
        assert_eq!(store.get("a"), None);
        assert!(store.is_loading());

        store.finish_batch();
        assert!(store.is_ready());
        assert_eq!(store.get("a"), Some(&1));
        assert_eq!(store.get("b"), None);
    }

    #[test]
    fn second_batch_is_rejected() {
        let mut store: AssetStore<u32> = AssetStore::new("test");
        assert!(store.begin_batch(&ids(&["a"])).is_some());
        assert!(store.begin_batch(&ids(&["b"])).is_none());
        store.finish_batch();
        assert!(store.begin_batch(&ids(&["c"])).is_none());
    }

    #[test]
    fn repeated_and_present_ids_are_dropped_from_batch() {
        let mut store = AssetStore::new("test");
        store.insert("a".into(), 0).unwrap();
        let accepted = store.begin_batch(&ids(&["a", "b", "b", "c"])).unwrap();
        assert_eq!(accepted, ids(&["b", "c"]));
    }

    #[test]
    fn add_merges_and_rejects_duplicates() {
        let mut store = AssetStore::new("test");
        store.begin_batch(&ids(&["a"])).unwrap();
        store.add("extra".into(), 7).unwrap();
        assert!(!store.is_ready());
        assert_eq!(store.add("extra".into(), 8), Err(8));

        store.finish_batch();
        assert_eq!(store.get("extra"), Some(&7));
    }

    #[test]
    fn add_on_idle_store_opens_the_gate() {
        let mut store = AssetStore::new("test");
        store.add("quad".into(), 1).unwrap();
        assert!(store.is_ready());
        assert_eq!(store.get("quad"), Some(&1));
    }

    #[test]
    fn batch_is_still_accepted_after_add() {
        let mut store = AssetStore::new("test");
        store.add("quad".into(), 1).unwrap();
        assert!(store.begin_batch(&ids(&["a"])).is_some());
        assert!(!store.is_ready());
        store.finish_batch();
        assert_eq!(store.get("quad"), Some(&1));
    }

    #[test]
    fn late_writes_after_teardown_are_refused() {
        let mut store = AssetStore::new("test");
        store.begin_batch(&ids(&["a", "b"])).unwrap();
        store.insert("a".into(), 1).unwrap();

        let released = store.teardown();
        assert_eq!(released, vec![("a".to_string(), 1)]);

        assert_eq!(store.insert("b".into(), 2), Err(2));
        store.finish_batch();
        assert!(!store.is_ready());
        assert!(store.is_empty());
        assert!(store.begin_batch(&ids(&["c"])).is_none());
    }

    #[test]
    fn lookups_after_ready_return_the_same_entry() {
        let mut store = AssetStore::new("test");
        store.begin_batch(&ids(&["a"])).unwrap();
        store.insert("a".into(), String::from("payload")).unwrap();
        store.finish_batch();

        let first = store.get("a").unwrap() as *const String;
        let second = store.get("a").unwrap() as *const String;
        assert_eq!(first, second);
    }
}
