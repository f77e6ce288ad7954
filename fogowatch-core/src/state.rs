//! State store
//!
//! Everything the monitor remembers between cycles and across restarts lives
//! in one [`IncidentState`] aggregate. [`StateStore`] owns the file it is
//! persisted to.
//!
//! ## On-disk document
//!
//! ```json
//! {
//!   "by":         { "serta": ["2025050012"] },
//!   "seen":       { "serta": { "2025050012": "2025-08-14T16:05:00Z" } },
//!   "status":     { "2025050012": "Em Curso" },
//!   "first":      { "2025050012": "2025-08-14T15:40:00Z" },
//!   "concluded":  { },
//!   "means":      { "2025050012": { "man": 12, "terrain": 4, "aerial": 1, "aquatic": 0 } },
//!   "extra_text": { "2025050012": "EN2 cortada" },
//!   "last_hourly": "2025-08-14 17",
//!   "last_daily":  "2025-08-14"
//! }
//! ```
//!
//! Area sections are keyed by canonical area key, the rest by incident ID.
//! Timestamps are RFC 3339 in UTC. Loading is lenient: a missing or
//! unreadable file is an empty state, and malformed entries are skipped.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::normalize::AreaSet;
use crate::types::ResourceCounts;

// ============================================
// In-memory state
// ============================================

/// Cross-cycle memory of announced incidents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncidentState {
    /// Canonical area key -> IDs already announced
    pub active_ids: BTreeMap<String, BTreeSet<String>>,
    /// Canonical area key -> ID -> last cycle the ID was observed
    pub last_seen: BTreeMap<String, BTreeMap<String, DateTime<Utc>>>,
    /// ID -> last non-empty status
    pub last_status: BTreeMap<String, String>,
    /// ID -> first cycle the ID was observed
    pub first_seen: BTreeMap<String, DateTime<Utc>>,
    /// ID -> cycle the ID was seen concluded
    pub concluded_at: BTreeMap<String, DateTime<Utc>>,
    /// ID -> resources at the previous observation
    pub last_resources: BTreeMap<String, ResourceCounts>,
    /// ID -> trimmed annotation at the previous observation
    pub last_annotation: BTreeMap<String, String>,
    /// Hourly summary window last sent ("YYYY-MM-DD HH")
    pub last_hourly_mark: Option<String>,
    /// Daily summary window last sent ("YYYY-MM-DD")
    pub last_daily_mark: Option<String>,
}

impl IncidentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` is already known under `area`.
    pub fn is_active(&self, area: &str, id: &str) -> bool {
        self.active_ids
            .get(area)
            .is_some_and(|ids| ids.contains(id))
    }

    /// File `id` under `area`, removing it from any other area.
    ///
    /// Returns `true` if the ID was not already under `area`.
    pub fn insert_active(&mut self, area: &str, id: &str) -> bool {
        for (other, ids) in self.active_ids.iter_mut() {
            if other != area {
                ids.remove(id);
            }
        }
        for (other, seen) in self.last_seen.iter_mut() {
            if other != area {
                seen.remove(id);
            }
        }
        self.active_ids.retain(|_, ids| !ids.is_empty());
        self.last_seen.retain(|_, seen| !seen.is_empty());

        self.active_ids
            .entry(area.to_string())
            .or_default()
            .insert(id.to_string())
    }

    /// Record that `id` was observed under `area` at `now`.
    pub fn touch(&mut self, area: &str, id: &str, now: DateTime<Utc>) {
        self.last_seen
            .entry(area.to_string())
            .or_default()
            .insert(id.to_string(), now);
    }

    /// Total number of known IDs across all areas.
    pub fn active_count(&self) -> usize {
        self.active_ids.values().map(BTreeSet::len).sum()
    }

    /// Fold every area key onto its canonical form.
    ///
    /// Legacy typos are corrected, then aliases of wanted areas are mapped to
    /// their canonical key. Entries landing on the same key are merged; for
    /// `last_seen` the most recent timestamp wins. Must run once after load,
    /// before the first cycle compares against current data.
    pub fn canonicalize(&mut self, areas: &AreaSet) {
        let mut active: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (key, ids) in std::mem::take(&mut self.active_ids) {
            let canonical = areas.canonicalize_key(&key);
            if canonical.is_empty() {
                continue;
            }
            if canonical != key {
                tracing::info!(from = %key, to = %canonical, "Merged state area key");
            }
            active.entry(canonical).or_default().extend(ids);
        }
        active.retain(|_, ids| !ids.is_empty());
        self.active_ids = active;

        let mut seen: BTreeMap<String, BTreeMap<String, DateTime<Utc>>> = BTreeMap::new();
        for (key, entries) in std::mem::take(&mut self.last_seen) {
            let canonical = areas.canonicalize_key(&key);
            if canonical.is_empty() {
                continue;
            }
            let merged = seen.entry(canonical).or_default();
            for (id, ts) in entries {
                merged
                    .entry(id)
                    .and_modify(|existing| {
                        if ts > *existing {
                            *existing = ts;
                        }
                    })
                    .or_insert(ts);
            }
        }
        seen.retain(|_, entries| !entries.is_empty());
        self.last_seen = seen;
    }

    /// Forget incidents not observed within `ttl` of `now`.
    ///
    /// Removes each ID whose `last_seen` is missing or older than the cutoff
    /// from `active_ids` and `last_seen`. Per-ID history (status, first-seen
    /// and concluded timestamps, snapshots) is kept so a returning incident
    /// still reports its time to conclusion. A non-positive `ttl`, or one
    /// reaching before the earliest representable time, disables pruning.
    /// Returns the number of IDs removed from `active_ids`.
    pub fn prune(&mut self, ttl: Duration, now: DateTime<Utc>) -> usize {
        if ttl <= Duration::zero() {
            return 0;
        }
        let Some(cutoff) = now.checked_sub_signed(ttl) else {
            return 0;
        };
        let mut pruned = 0;

        for (area, ids) in self.active_ids.iter_mut() {
            let seen = self.last_seen.get_mut(area);
            let stale: Vec<String> = ids
                .iter()
                .filter(|id| {
                    seen.as_ref()
                        .and_then(|s| s.get(id.as_str()))
                        .map_or(true, |ts| *ts < cutoff)
                })
                .cloned()
                .collect();
            if let Some(seen) = seen {
                for id in &stale {
                    seen.remove(id);
                }
            }
            for id in stale {
                tracing::debug!(area = %area, incident_id = %id, "Pruned stale incident");
                ids.remove(&id);
                pruned += 1;
            }
        }

        for seen in self.last_seen.values_mut() {
            seen.retain(|_, ts| *ts >= cutoff);
        }
        self.active_ids.retain(|_, ids| !ids.is_empty());
        self.last_seen.retain(|_, seen| !seen.is_empty());

        pruned
    }

    /// Serialize to the on-disk document.
    pub fn to_json(&self) -> Result<String> {
        let doc = StateDocument::from(self);
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    /// Parse the on-disk document, skipping malformed entries.
    ///
    /// Fails only if `content` is not a JSON object.
    pub fn from_json(content: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(content)?;
        let root = value
            .as_object()
            .ok_or_else(|| Error::State("state document is not a JSON object".to_string()))?;

        let mut state = IncidentState::new();

        for (area, ids) in section(root, "by") {
            let ids: BTreeSet<String> = ids
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .filter(|id| !id.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            if !ids.is_empty() {
                state.active_ids.insert(area.clone(), ids);
            }
        }

        for (area, entries) in section(root, "seen") {
            let entries: BTreeMap<String, DateTime<Utc>> = entries
                .as_object()
                .map(|m| {
                    m.iter()
                        .filter_map(|(id, ts)| Some((id.clone(), parse_ts(ts)?)))
                        .collect()
                })
                .unwrap_or_default();
            if !entries.is_empty() {
                state.last_seen.insert(area.clone(), entries);
            }
        }

        for (id, status) in section(root, "status") {
            if let Some(s) = status.as_str().filter(|s| !s.trim().is_empty()) {
                state.last_status.insert(id.clone(), s.to_string());
            }
        }
        for (id, ts) in section(root, "first") {
            if let Some(ts) = parse_ts(ts) {
                state.first_seen.insert(id.clone(), ts);
            }
        }
        for (id, ts) in section(root, "concluded") {
            if let Some(ts) = parse_ts(ts) {
                state.concluded_at.insert(id.clone(), ts);
            }
        }
        for (id, counts) in section(root, "means") {
            if let Ok(counts) = serde_json::from_value::<ResourceCounts>(counts.clone()) {
                state.last_resources.insert(id.clone(), counts);
            }
        }
        for (id, text) in section(root, "extra_text") {
            if let Some(text) = text.as_str() {
                state.last_annotation.insert(id.clone(), text.trim().to_string());
            }
        }

        state.last_hourly_mark = mark(root, "last_hourly");
        state.last_daily_mark = mark(root, "last_daily");

        Ok(state)
    }
}

fn section<'a>(root: &'a Map<String, Value>, name: &str) -> impl Iterator<Item = (&'a String, &'a Value)> {
    root.get(name)
        .and_then(Value::as_object)
        .into_iter()
        .flat_map(|m| m.iter())
}

fn mark(root: &Map<String, Value>, name: &str) -> Option<String> {
    root.get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_ts(value: &Value) -> Option<DateTime<Utc>> {
    let s = value.as_str()?;
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ============================================
// On-disk document
// ============================================

#[derive(Serialize)]
struct StateDocument {
    by: BTreeMap<String, Vec<String>>,
    seen: BTreeMap<String, BTreeMap<String, String>>,
    status: BTreeMap<String, String>,
    first: BTreeMap<String, String>,
    concluded: BTreeMap<String, String>,
    means: BTreeMap<String, ResourceCounts>,
    extra_text: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_hourly: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_daily: Option<String>,
}

impl From<&IncidentState> for StateDocument {
    fn from(state: &IncidentState) -> Self {
        let timestamps = |m: &BTreeMap<String, DateTime<Utc>>| -> BTreeMap<String, String> {
            m.iter().map(|(id, ts)| (id.clone(), format_ts(ts))).collect()
        };

        Self {
            by: state
                .active_ids
                .iter()
                .filter(|(_, ids)| !ids.is_empty())
                .map(|(area, ids)| (area.clone(), ids.iter().cloned().collect()))
                .collect(),
            seen: state
                .last_seen
                .iter()
                .filter(|(_, entries)| !entries.is_empty())
                .map(|(area, entries)| (area.clone(), timestamps(entries)))
                .collect(),
            status: state
                .last_status
                .iter()
                .filter(|(id, s)| !id.trim().is_empty() && !s.trim().is_empty())
                .map(|(id, s)| (id.clone(), s.clone()))
                .collect(),
            first: timestamps(&state.first_seen),
            concluded: timestamps(&state.concluded_at),
            means: state.last_resources.clone(),
            extra_text: state.last_annotation.clone(),
            last_hourly: state.last_hourly_mark.clone(),
            last_daily: state.last_daily_mark.clone(),
        }
    }
}

// ============================================
// Persistence
// ============================================

/// Owns the state file. Single writer; no locking.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    /// Serialized content of the last successful load or save
    last_written: Option<String>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_written: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load state, falling back to an empty state on any failure.
    pub fn load(&mut self) -> IncidentState {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No state file, starting empty");
                return IncidentState::new();
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read state file, starting empty");
                return IncidentState::new();
            }
        };

        match IncidentState::from_json(&content) {
            Ok(state) => {
                tracing::info!(
                    path = %self.path.display(),
                    areas = state.active_ids.len(),
                    incidents = state.active_count(),
                    "Loaded state"
                );
                self.last_written = state.to_json().ok();
                state
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Malformed state file, starting empty");
                IncidentState::new()
            }
        }
    }

    /// Persist `state` if it differs from what was last loaded or written.
    ///
    /// Writes a sibling temporary file and renames it over the target.
    /// Returns `Ok(false)` when nothing needed writing.
    pub fn save(&mut self, state: &IncidentState) -> Result<bool> {
        let content = state.to_json()?;
        if self.last_written.as_deref() == Some(content.as_str()) {
            return Ok(false);
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::State(format!("failed to create state directory {:?}: {}", parent, e))
            })?;
        }

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        std::fs::write(&tmp_path, &content)
            .map_err(|e| Error::State(format!("failed to write {:?}: {}", tmp_path, e)))?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            Error::State(format!("failed to replace {:?}: {}", self.path, e))
        })?;

        tracing::debug!(path = %self.path.display(), bytes = content.len(), "Saved state");
        self.last_written = Some(content);
        Ok(true)
    }
}
