//! In-memory versioned entry store
//!
//! [`MemoryRegistry`] implements the [`Registry`]/[`Snapshot`] traits with a
//! linear version history (`v1`, `v2`, …). Every committed snapshot and
//! every version re-application records the full entry set, so
//! `apply_version` can restore any historical state.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use governor_registry::{
    ApplyOutcome, Entry, EntryId, Error, Registry, Result, Snapshot, VersionId, VersionInfo,
};

type EntryMap = BTreeMap<String, Entry>;

struct RecordedVersion {
    id: VersionId,
    timestamp: i64,
    entries: EntryMap,
}

struct Inner {
    entries: EntryMap,
    history: Vec<RecordedVersion>,
    counter: u64,
}

impl Inner {
    fn record(&mut self, entries: EntryMap) -> VersionId {
        self.counter += 1;
        let id = VersionId::new(format!("v{}", self.counter));
        self.history.push(RecordedVersion {
            id: id.clone(),
            timestamp: chrono::Utc::now().timestamp(),
            entries: entries.clone(),
        });
        self.entries = entries;
        id
    }
}

/// In-memory [`Registry`] implementation for tests.
#[derive(Clone)]
pub struct MemoryRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryRegistry {
    /// Empty registry at version `v0`.
    pub fn new() -> Self {
        let initial = RecordedVersion {
            id: VersionId::new("v0"),
            timestamp: chrono::Utc::now().timestamp(),
            entries: EntryMap::new(),
        };
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: EntryMap::new(),
                history: vec![initial],
                counter: 0,
            })),
        }
    }

    /// Registry seeded with entries, recorded as version `v1`.
    pub fn with_entries(entries: impl IntoIterator<Item = Entry>) -> Self {
        let registry = Self::new();
        {
            let mut inner = registry.inner.lock().expect("registry lock poisoned");
            let map: EntryMap = entries
                .into_iter()
                .map(|e| (e.id.to_string(), e))
                .collect();
            inner.record(map);
        }
        registry
    }

    /// Number of entries currently stored.
    pub fn entry_count(&self) -> usize {
        self.inner.lock().expect("registry lock poisoned").entries.len()
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry for MemoryRegistry {
    fn current_version(&self) -> Result<VersionId> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        Ok(inner
            .history
            .last()
            .map(|v| v.id.clone())
            .unwrap_or_else(|| VersionId::new("v0")))
    }

    fn snapshot(&self) -> Result<Box<dyn Snapshot>> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        Ok(Box::new(MemorySnapshot {
            working: inner.entries.clone(),
            original: inner.entries.clone(),
            owner: Arc::clone(&self.inner),
        }))
    }

    fn history(&self) -> Result<Vec<VersionInfo>> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        Ok(inner
            .history
            .iter()
            .map(|v| VersionInfo {
                id: v.id.clone(),
                timestamp: v.timestamp,
                message: None,
            })
            .collect())
    }

    fn apply_version(&self, version: &VersionId) -> Result<ApplyOutcome> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let restored = inner
            .history
            .iter()
            .find(|v| &v.id == version)
            .map(|v| v.entries.clone())
            .ok_or_else(|| Error::VersionNotFound {
                id: version.to_string(),
            })?;

        if restored == inner.entries {
            return Ok(ApplyOutcome::NoChanges);
        }
        let new_version = inner.record(restored);
        Ok(ApplyOutcome::Applied {
            version: new_version,
        })
    }
}

struct MemorySnapshot {
    working: EntryMap,
    original: EntryMap,
    owner: Arc<Mutex<Inner>>,
}

impl Snapshot for MemorySnapshot {
    fn entries(&self) -> Vec<Entry> {
        self.working.values().cloned().collect()
    }

    fn find(&self, id: &EntryId) -> Option<Entry> {
        self.working.get(&id.to_string()).cloned()
    }

    fn create(&mut self, entry: Entry) -> Result<()> {
        let key = entry.id.to_string();
        if self.working.contains_key(&key) {
            return Err(Error::EntryExists { id: key });
        }
        self.working.insert(key, entry);
        Ok(())
    }

    fn update(&mut self, entry: Entry) -> Result<()> {
        let key = entry.id.to_string();
        if !self.working.contains_key(&key) {
            return Err(Error::EntryNotFound { id: key });
        }
        self.working.insert(key, entry);
        Ok(())
    }

    fn delete(&mut self, id: &EntryId) -> Result<()> {
        let key = id.to_string();
        if self.working.remove(&key).is_none() {
            return Err(Error::EntryNotFound { id: key });
        }
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<ApplyOutcome> {
        if self.working == self.original {
            return Ok(ApplyOutcome::NoChanges);
        }
        let mut inner = self.owner.lock().expect("registry lock poisoned");
        let version = inner.record(self.working);
        Ok(ApplyOutcome::Applied { version })
    }
}
