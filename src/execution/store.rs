//! Order state store - one JSON file per lifecycle entry
//!
//! Layout: `<dir>/<bridge_id>.json`. Writes go to `<bridge_id>.json.tmp`,
//! are fsynced, then renamed over the final name, so a crash leaves either
//! the previous record or the new one. The in-memory mirror answers every
//! query after `init()`.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::state_machine::{OrderLifecycleEntry, OrderState};
use crate::core::{Error, Result, Symbol};

const RECORD_EXT: &str = ".json";
const TMP_EXT: &str = ".json.tmp";

pub struct OrderStateStore {
    dir: PathBuf,
    cache: RwLock<HashMap<String, OrderLifecycleEntry>>,
}

impl OrderStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load every record from disk into the mirror.
    ///
    /// Unreadable records are skipped with a warning and leftover temp files
    /// from interrupted writes are removed. Returns the number loaded.
    pub async fn init(&self) -> Result<usize> {
        fs::create_dir_all(&self.dir).await?;

        let mut loaded = HashMap::new();
        let mut dir = fs::read_dir(&self.dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if name.ends_with(TMP_EXT) {
                debug!(file = name, "removing interrupted write");
                if let Err(e) = fs::remove_file(&path).await {
                    warn!(file = name, error = %e, "failed to remove temp file");
                }
                continue;
            }
            let Some(stem) = name.strip_suffix(RECORD_EXT) else {
                continue;
            };

            match read_record(&path).await {
                Ok(entry) if entry.bridge_id() == stem => {
                    loaded.insert(stem.to_string(), entry);
                }
                Ok(entry) => {
                    warn!(file = name, bridge_id = entry.bridge_id(), "record name mismatch, skipping");
                }
                Err(e) => {
                    warn!(file = name, error = %e, "corrupt order record, skipping");
                }
            }
        }

        let count = loaded.len();
        *self.cache.write() = loaded;
        info!(dir = %self.dir.display(), count, "📂 order store loaded");
        Ok(count)
    }

    /// Durably persist an entry, then update the mirror.
    pub async fn save(&self, entry: &OrderLifecycleEntry) -> Result<()> {
        let id = entry.bridge_id();
        validate_bridge_id(id)?;

        let bytes = serde_json::to_vec_pretty(entry)?;
        let tmp = self.dir.join(format!("{id}{TMP_EXT}"));
        let path = self.record_path(id);

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, &path).await?;

        self.cache.write().insert(id.to_string(), entry.clone());
        debug!(bridge_id = id, state = %entry.state(), "order record saved");
        Ok(())
    }

    /// Cache first, then disk.
    pub async fn get(&self, bridge_id: &str) -> Result<Option<OrderLifecycleEntry>> {
        validate_bridge_id(bridge_id)?;
        if let Some(entry) = self.cache.read().get(bridge_id) {
            return Ok(Some(entry.clone()));
        }

        match read_record(&self.record_path(bridge_id)).await {
            Ok(entry) => {
                self.cache.write().insert(bridge_id.to_string(), entry.clone());
                Ok(Some(entry))
            }
            Err(Error::Storage(e)) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// All entries, oldest first.
    pub fn get_all(&self) -> Vec<OrderLifecycleEntry> {
        self.select(|_| true)
    }

    pub fn get_by_state(&self, state: OrderState) -> Vec<OrderLifecycleEntry> {
        self.select(|e| e.state() == state)
    }

    pub fn get_by_symbol(&self, symbol: &Symbol) -> Vec<OrderLifecycleEntry> {
        self.select(|e| e.symbol() == symbol)
    }

    /// Entries created within `[start, end]`.
    pub fn get_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<OrderLifecycleEntry> {
        self.select(|e| e.created_at() >= start && e.created_at() <= end)
    }

    pub fn get_state_counts(&self) -> BTreeMap<OrderState, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.cache.read().values() {
            *counts.entry(entry.state()).or_insert(0) += 1;
        }
        counts
    }

    pub fn contains(&self, bridge_id: &str) -> bool {
        self.cache.read().contains_key(bridge_id)
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }

    /// Remove terminal entries whose last update is older than `days`.
    pub async fn cleanup_old_entries(&self, days: u32) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let expired: Vec<String> = self
            .cache
            .read()
            .values()
            .filter(|e| e.is_terminal() && e.updated_at() < cutoff)
            .map(|e| e.bridge_id().to_string())
            .collect();

        let mut removed = 0;
        for id in expired {
            match fs::remove_file(self.record_path(&id)).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(bridge_id = %id, error = %e, "failed to remove expired record");
                    continue;
                }
            }
            self.cache.write().remove(&id);
            removed += 1;
        }

        if removed > 0 {
            info!(removed, days, "🧹 expired order records removed");
        }
        Ok(removed)
    }

    fn record_path(&self, bridge_id: &str) -> PathBuf {
        self.dir.join(format!("{bridge_id}{RECORD_EXT}"))
    }

    fn select<F>(&self, pred: F) -> Vec<OrderLifecycleEntry>
    where
        F: Fn(&OrderLifecycleEntry) -> bool,
    {
        let mut out: Vec<_> = self.cache.read().values().filter(|e| pred(e)).cloned().collect();
        out.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.bridge_id().cmp(b.bridge_id()))
        });
        out
    }
}

async fn read_record(path: &Path) -> Result<OrderLifecycleEntry> {
    let bytes = fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Bridge ids become file names, so only `[A-Za-z0-9_-]` is accepted.
pub(crate) fn validate_bridge_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidState(format!("invalid bridge id '{id}'")))
    }
}
