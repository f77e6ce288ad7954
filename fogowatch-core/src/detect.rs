//! Change detection
//!
//! Compares the filtered records of one cycle against [`IncidentState`] and
//! produces the lifecycle events to announce. The state is updated in place,
//! so after [`ChangeDetector::detect`] returns it already reflects this cycle.
//!
//! Per record, in order:
//!
//! 1. Skip records without an ID
//! 2. Resolve the canonical area key
//! 3. Mark the ID as seen now
//! 4. New incident if the ID is not filed under the area yet
//! 5. Status transition if the status changed, or on the first observation
//! 6. Resource changes (known incidents with a prior snapshot only)
//! 7. Annotation change (same guard as 6)
//! 8. Replace the resource and annotation snapshots
//!
//! Events keep record encounter order, and within a record the order above.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, NaiveDateTime, Timelike, Utc};

use crate::config::SummaryConfig;
use crate::format::format_duration;
use crate::normalize::{normalize, AreaSet};
use crate::state::IncidentState;
use crate::types::{is_concluded, IncidentRecord, ResourceKind, StatusPhase};

/// Sample IDs kept per area for aggregated announcements.
pub const SAMPLE_IDS_PER_AREA: usize = 5;

/// Entries per dimension in the hourly summary.
pub const HOURLY_TOP: usize = 6;

/// Entries per dimension in the daily summary.
pub const DAILY_TOP: usize = 10;

// ============================================
// Events
// ============================================

/// The incident an event is about.
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentRef {
    pub incident_id: String,
    /// Canonical area key
    pub area_key: String,
    /// Area name for messages
    pub area_display: String,
    /// Record as observed this cycle
    pub record: IncidentRecord,
}

/// Which periodic summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryWindow {
    Hourly,
    Daily,
}

/// Counts of currently active incidents, most frequent first.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub window: SummaryWindow,
    /// "17:00" for hourly, "2025-08-14" for daily
    pub label: String,
    pub active: usize,
    pub by_area: Vec<(String, usize)>,
    pub by_nature: Vec<(String, usize)>,
    pub by_status: Vec<(String, usize)>,
}

/// Something worth announcing.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    NewIncident(IncidentRef),
    StatusTransition {
        incident: IncidentRef,
        /// Stored status before this cycle, if any
        previous: Option<String>,
        current: String,
        /// Went from concluded/surveillance back to dispatch/active
        reactivated: bool,
        /// Time from first observation to conclusion, when concluding
        time_to_conclusion: Option<Duration>,
    },
    ResourceChange {
        incident: IncidentRef,
        kind: ResourceKind,
        previous: u32,
        current: u32,
    },
    AnnotationChange {
        incident: IncidentRef,
        previous: String,
        current: String,
    },
    HourlySummary(Summary),
    DailySummary(Summary),
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::NewIncident(_) => "new_incident",
            Event::StatusTransition { .. } => "status_transition",
            Event::ResourceChange { .. } => "resource_change",
            Event::AnnotationChange { .. } => "annotation_change",
            Event::HourlySummary(_) => "hourly_summary",
            Event::DailySummary(_) => "daily_summary",
        }
    }

    /// Incident this event is about; `None` for summaries.
    pub fn incident(&self) -> Option<&IncidentRef> {
        match self {
            Event::NewIncident(incident)
            | Event::StatusTransition { incident, .. }
            | Event::ResourceChange { incident, .. }
            | Event::AnnotationChange { incident, .. } => Some(incident),
            Event::HourlySummary(_) | Event::DailySummary(_) => None,
        }
    }
}

/// New incidents of one area in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIncidentTally {
    pub area_display: String,
    pub count: usize,
    /// First few IDs, in encounter order
    pub sample_ids: Vec<String>,
}

/// Result of one detection pass.
#[derive(Debug, Clone, Default)]
pub struct DetectOutcome {
    pub events: Vec<Event>,
    /// Canonical area key -> new incidents this cycle
    pub new_by_area: BTreeMap<String, NewIncidentTally>,
    /// (incident ID, time from first observation to conclusion)
    pub conclusions: Vec<(String, Duration)>,
    /// Records skipped for lacking an ID or a usable area
    pub skipped: usize,
}

impl DetectOutcome {
    pub fn new_incident_count(&self) -> usize {
        self.new_by_area.values().map(|t| t.count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

// ============================================
// Detector
// ============================================

/// Stateless rules over a caller-owned [`IncidentState`].
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    areas: AreaSet,
    summary: SummaryConfig,
}

impl ChangeDetector {
    pub fn new(areas: AreaSet, summary: SummaryConfig) -> Self {
        Self { areas, summary }
    }

    pub fn areas(&self) -> &AreaSet {
        &self.areas
    }

    /// Canonical key and display name for a record's area.
    fn resolve_area(&self, record: &IncidentRecord) -> Option<(String, String)> {
        let raw = record.area_name.as_deref()?;
        let normalized = normalize(raw);
        let key = self
            .areas
            .resolve(&normalized)
            .map(str::to_string)
            .unwrap_or(normalized);
        if key.is_empty() {
            return None;
        }
        let display = self
            .areas
            .display_name(&key)
            .unwrap_or_else(|| record.area_or(&key))
            .to_string();
        Some((key, display))
    }

    /// Compute this cycle's incident events, updating `state` in place.
    pub fn detect(
        &self,
        records: &[IncidentRecord],
        state: &mut IncidentState,
        now: DateTime<Utc>,
    ) -> DetectOutcome {
        let mut outcome = DetectOutcome::default();

        for record in records {
            let Some(id) = record.id.as_deref().map(str::trim).filter(|id| !id.is_empty())
            else {
                outcome.skipped += 1;
                continue;
            };
            let Some((area_key, area_display)) = self.resolve_area(record) else {
                tracing::debug!(incident_id = %id, "Skipping record without a usable area");
                outcome.skipped += 1;
                continue;
            };

            let incident = IncidentRef {
                incident_id: id.to_string(),
                area_key: area_key.clone(),
                area_display: area_display.clone(),
                record: record.clone(),
            };

            // Steps 3-4
            let is_new = !state.is_active(&area_key, id);
            if is_new {
                state.insert_active(&area_key, id);
            }
            state.touch(&area_key, id, now);
            if is_new {
                state.first_seen.entry(id.to_string()).or_insert(now);
                let tally = outcome
                    .new_by_area
                    .entry(area_key.clone())
                    .or_insert_with(|| NewIncidentTally {
                        area_display: area_display.clone(),
                        count: 0,
                        sample_ids: Vec::new(),
                    });
                tally.count += 1;
                if tally.sample_ids.len() < SAMPLE_IDS_PER_AREA {
                    tally.sample_ids.push(id.to_string());
                }
                tracing::info!(incident_id = %id, area = %area_key, "New incident");
                outcome.events.push(Event::NewIncident(incident.clone()));
            }

            // Step 5
            let current = record.status_text();
            let previous = state.last_status.get(id).cloned();
            if !current.is_empty() && (is_new || previous.as_deref() != Some(current)) {
                let previous_phase = StatusPhase::classify(previous.as_deref().unwrap_or(""));
                let reactivated =
                    previous_phase.is_winding_down() && record.phase().is_engaged();

                let mut time_to_conclusion = None;
                if is_concluded(current) {
                    state.concluded_at.insert(id.to_string(), now);
                    if let Some(first) = state.first_seen.get(id).filter(|t0| **t0 < now) {
                        let elapsed = now - *first;
                        tracing::info!(
                            incident_id = %id,
                            elapsed = %format_duration(elapsed),
                            elapsed_secs = elapsed.num_seconds(),
                            "Incident concluded"
                        );
                        outcome.conclusions.push((id.to_string(), elapsed));
                        time_to_conclusion = Some(elapsed);
                    }
                }

                tracing::info!(
                    incident_id = %id,
                    from = previous.as_deref().unwrap_or(""),
                    to = %current,
                    reactivated,
                    "Status transition"
                );
                state.last_status.insert(id.to_string(), current.to_string());
                outcome.events.push(Event::StatusTransition {
                    incident: incident.clone(),
                    previous,
                    current: current.to_string(),
                    reactivated,
                    time_to_conclusion,
                });
            }

            // Steps 6-7
            if !is_new {
                if let Some(before) = state.last_resources.get(id) {
                    for (kind, previous, current) in record.resources.changes_since(before) {
                        outcome.events.push(Event::ResourceChange {
                            incident: incident.clone(),
                            kind,
                            previous,
                            current,
                        });
                    }
                }
                let annotation = record.annotation_text();
                if let Some(before) = state.last_annotation.get(id) {
                    if before != annotation {
                        outcome.events.push(Event::AnnotationChange {
                            incident: incident.clone(),
                            previous: before.clone(),
                            current: annotation.to_string(),
                        });
                    }
                }
            }

            // Step 8
            state
                .last_resources
                .insert(id.to_string(), record.resources);
            state
                .last_annotation
                .insert(id.to_string(), record.annotation_text().to_string());
        }

        outcome
    }

    /// Periodic summaries due at local wall-clock time `local`.
    ///
    /// The hourly summary fires on the first cycle of each hour, the daily one
    /// on the first cycle of the configured hour. Marks are stored in `state`
    /// so a restart inside the same window does not repeat a summary.
    pub fn periodic_summaries(
        &self,
        records: &[IncidentRecord],
        state: &mut IncidentState,
        local: NaiveDateTime,
    ) -> Vec<Event> {
        let mut events = Vec::new();

        if self.summary.hourly {
            let mark = local.format("%Y-%m-%d %H").to_string();
            if state.last_hourly_mark.as_deref() != Some(mark.as_str()) {
                let label = local.format("%H:00").to_string();
                events.push(Event::HourlySummary(self.summarize(
                    records,
                    SummaryWindow::Hourly,
                    label,
                    HOURLY_TOP,
                )));
                state.last_hourly_mark = Some(mark);
            }
        }

        if self.summary.daily && local.hour() == self.summary.daily_hour {
            let mark = local.format("%Y-%m-%d").to_string();
            if state.last_daily_mark.as_deref() != Some(mark.as_str()) {
                events.push(Event::DailySummary(self.summarize(
                    records,
                    SummaryWindow::Daily,
                    mark.clone(),
                    DAILY_TOP,
                )));
                state.last_daily_mark = Some(mark);
            }
        }

        events
    }

    fn summarize(
        &self,
        records: &[IncidentRecord],
        window: SummaryWindow,
        label: String,
        top: usize,
    ) -> Summary {
        let mut by_area: HashMap<String, usize> = HashMap::new();
        let mut by_nature: HashMap<String, usize> = HashMap::new();
        let mut by_status: HashMap<String, usize> = HashMap::new();

        for record in records {
            let area = self
                .resolve_area(record)
                .map(|(_, display)| display)
                .unwrap_or_else(|| "?".to_string());
            *by_area.entry(area).or_default() += 1;
            *by_nature
                .entry(label_or_unknown(record.nature.as_deref()))
                .or_default() += 1;
            *by_status
                .entry(label_or_unknown(record.status.as_deref()))
                .or_default() += 1;
        }

        Summary {
            window,
            label,
            active: records.len(),
            by_area: top_counts(by_area, top),
            by_nature: top_counts(by_nature, top),
            by_status: top_counts(by_status, top),
        }
    }
}

fn label_or_unknown(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => "?".to_string(),
    }
}

/// Highest counts first, ties by name.
fn top_counts(counts: HashMap<String, usize>, top: usize) -> Vec<(String, usize)> {
    let mut entries: Vec<(String, usize)> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(top);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceCounts;
    use chrono::{NaiveDate, TimeZone};

    fn detector() -> ChangeDetector {
        ChangeDetector::new(
            AreaSet::new(["Sertã", "Proença-a-Nova", "Oleiros"]),
            SummaryConfig::default(),
        )
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 14, hour, minute, 0).unwrap()
    }

    fn local(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 8, 14)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn record(id: &str, area: &str, status: &str, man: u32) -> IncidentRecord {
        IncidentRecord {
            id: Some(id.to_string()),
            area_name: Some(area.to_string()),
            status: Some(status.to_string()),
            resources: ResourceCounts {
                ground_personnel: man,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn kinds(outcome: &DetectOutcome) -> Vec<&'static str> {
        outcome.events.iter().map(Event::kind).collect()
    }

    #[test]
    fn test_new_incident_forces_status_announcement() {
        let d = detector();
        let mut state = IncidentState::new();

        let outcome = d.detect(&[record("A", "Sertã", "Despacho", 3)], &mut state, at(10, 0));

        assert_eq!(kinds(&outcome), vec!["new_incident", "status_transition"]);
        match &outcome.events[1] {
            Event::StatusTransition {
                previous, current, ..
            } => {
                assert_eq!(previous, &None);
                assert_eq!(current, "Despacho");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(state.is_active("serta", "A"));
        assert_eq!(state.first_seen["A"], at(10, 0));
        assert_eq!(outcome.new_incident_count(), 1);
    }

    #[test]
    fn test_no_resource_or_annotation_events_on_creation_cycle() {
        let d = detector();
        let mut state = IncidentState::new();
        let mut r = record("A", "Sertã", "Em Curso", 40);
        r.annotation = Some("EN2 cortada".to_string());

        let outcome = d.detect(&[r], &mut state, at(10, 0));

        assert_eq!(kinds(&outcome), vec!["new_incident", "status_transition"]);
        assert_eq!(state.last_resources["A"].ground_personnel, 40);
        assert_eq!(state.last_annotation["A"], "EN2 cortada");
    }

    #[test]
    fn test_unchanged_record_produces_no_events() {
        let d = detector();
        let mut state = IncidentState::new();
        let r = record("A", "Sertã", "Despacho", 0);

        d.detect(&[r.clone()], &mut state, at(10, 0));
        let outcome = d.detect(&[r], &mut state, at(10, 1));

        assert!(outcome.is_empty());
        assert_eq!(state.last_seen["serta"]["A"], at(10, 1));
    }

    #[test]
    fn test_status_and_resource_changes_on_known_incident() {
        let d = detector();
        let mut state = IncidentState::new();
        d.detect(&[record("A", "Sertã", "Despacho", 0)], &mut state, at(10, 0));

        let outcome = d.detect(&[record("A", "Sertã", "Em Curso", 5)], &mut state, at(10, 5));

        assert_eq!(kinds(&outcome), vec!["status_transition", "resource_change"]);
        match &outcome.events[1] {
            Event::ResourceChange {
                kind,
                previous,
                current,
                ..
            } => {
                assert_eq!(*kind, ResourceKind::GroundPersonnel);
                assert_eq!((*previous, *current), (0, 5));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_annotation_change_including_cleared_text() {
        let d = detector();
        let mut state = IncidentState::new();
        let mut r = record("A", "Sertã", "Em Curso", 0);
        d.detect(&[r.clone()], &mut state, at(10, 0));

        r.annotation = Some("  EN2 cortada ".to_string());
        let outcome = d.detect(&[r.clone()], &mut state, at(10, 5));
        assert_eq!(kinds(&outcome), vec!["annotation_change"]);

        r.annotation = None;
        let outcome = d.detect(&[r], &mut state, at(10, 10));
        match &outcome.events[..] {
            [Event::AnnotationChange {
                previous, current, ..
            }] => {
                assert_eq!(previous, "EN2 cortada");
                assert_eq!(current, "");
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn test_missing_snapshot_seeds_silently() {
        let d = detector();
        let mut state = IncidentState::new();
        state.insert_active("serta", "A");
        state
            .last_status
            .insert("A".to_string(), "Em Curso".to_string());

        let mut r = record("A", "Sertã", "Em Curso", 12);
        r.annotation = Some("reaberta".to_string());
        let outcome = d.detect(&[r], &mut state, at(10, 0));

        assert!(outcome.is_empty());
        assert_eq!(state.last_resources["A"].ground_personnel, 12);
    }

    #[test]
    fn test_empty_status_never_overwrites() {
        let d = detector();
        let mut state = IncidentState::new();
        d.detect(&[record("A", "Sertã", "Em Curso", 0)], &mut state, at(10, 0));

        let outcome = d.detect(&[record("A", "Sertã", "  ", 0)], &mut state, at(10, 5));
        assert!(outcome.is_empty());
        assert_eq!(state.last_status["A"], "Em Curso");

        let mut fresh = record("B", "Sertã", "", 0);
        fresh.status = None;
        let outcome = d.detect(&[fresh], &mut state, at(10, 6));
        assert_eq!(kinds(&outcome), vec!["new_incident"]);
    }

    #[test]
    fn test_conclusion_records_elapsed_time() {
        let d = detector();
        let mut state = IncidentState::new();
        d.detect(&[record("A", "Sertã", "Em Curso", 0)], &mut state, at(10, 0));

        let outcome = d.detect(&[record("A", "Sertã", "Conclusão", 0)], &mut state, at(12, 30));

        assert_eq!(state.concluded_at["A"], at(12, 30));
        assert_eq!(
            outcome.conclusions,
            vec![("A".to_string(), Duration::minutes(150))]
        );
        match &outcome.events[0] {
            Event::StatusTransition {
                time_to_conclusion, ..
            } => assert_eq!(*time_to_conclusion, Some(Duration::minutes(150))),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_conclusion_without_earlier_first_seen_has_no_elapsed() {
        let d = detector();
        let mut state = IncidentState::new();

        let outcome = d.detect(&[record("A", "Sertã", "Conclusão", 0)], &mut state, at(10, 0));

        assert_eq!(state.concluded_at["A"], at(10, 0));
        assert!(outcome.conclusions.is_empty());
    }

    #[test]
    fn test_reactivation_is_flagged() {
        let d = detector();
        let mut state = IncidentState::new();
        d.detect(&[record("A", "Sertã", "Vigilância", 0)], &mut state, at(10, 0));

        let outcome = d.detect(&[record("A", "Sertã", "Em Curso", 0)], &mut state, at(11, 0));
        match &outcome.events[0] {
            Event::StatusTransition { reactivated, .. } => assert!(*reactivated),
            other => panic!("unexpected event {other:?}"),
        }

        let outcome = d.detect(&[record("A", "Sertã", "Em Resolução", 0)], &mut state, at(12, 0));
        match &outcome.events[0] {
            Event::StatusTransition { reactivated, .. } => assert!(!*reactivated),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_records_without_id_are_skipped() {
        let d = detector();
        let mut state = IncidentState::new();
        let mut anonymous = record("", "Sertã", "Despacho", 0);
        anonymous.id = None;

        let outcome = d.detect(
            &[anonymous, record("  ", "Sertã", "Despacho", 0)],
            &mut state,
            at(10, 0),
        );

        assert!(outcome.is_empty());
        assert_eq!(outcome.skipped, 2);
        assert!(state.active_ids.is_empty());
    }

    #[test]
    fn test_alias_spelling_resolves_to_canonical_area() {
        let d = detector();
        let mut state = IncidentState::new();

        let outcome = d.detect(
            &[record("A", "Proenca Nova", "Despacho", 0)],
            &mut state,
            at(10, 0),
        );

        assert!(state.is_active("proencaanova", "A"));
        match &outcome.events[0] {
            Event::NewIncident(incident) => {
                assert_eq!(incident.area_key, "proencaanova");
                assert_eq!(incident.area_display, "Proença-a-Nova");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_new_incident_tallies_cap_samples() {
        let d = detector();
        let mut state = IncidentState::new();
        let records: Vec<IncidentRecord> = (0..7)
            .map(|i| record(&format!("S{i}"), "Sertã", "Despacho", 0))
            .chain(std::iter::once(record("O1", "Oleiros", "Despacho", 0)))
            .collect();

        let outcome = d.detect(&records, &mut state, at(10, 0));

        assert_eq!(outcome.new_incident_count(), 8);
        let serta = &outcome.new_by_area["serta"];
        assert_eq!(serta.count, 7);
        assert_eq!(serta.sample_ids, vec!["S0", "S1", "S2", "S3", "S4"]);
        assert_eq!(outcome.new_by_area["oleiros"].count, 1);
    }

    #[test]
    fn test_hourly_summary_fires_once_per_hour() {
        let d = detector();
        let mut state = IncidentState::new();
        let records = vec![
            record("A", "Sertã", "Em Curso", 0),
            record("B", "Sertã", "Despacho", 0),
            record("C", "Oleiros", "Em Curso", 0),
        ];

        let events = d.periodic_summaries(&records, &mut state, local(17, 0));
        match &events[..] {
            [Event::HourlySummary(summary)] => {
                assert_eq!(summary.label, "17:00");
                assert_eq!(summary.active, 3);
                assert_eq!(summary.by_area[0], ("Sertã".to_string(), 2));
                assert_eq!(summary.by_status[0], ("Em Curso".to_string(), 2));
                assert_eq!(summary.by_nature, vec![("?".to_string(), 3)]);
            }
            other => panic!("unexpected events {other:?}"),
        }
        assert_eq!(state.last_hourly_mark.as_deref(), Some("2025-08-14 17"));

        assert!(d.periodic_summaries(&records, &mut state, local(17, 30)).is_empty());
        assert_eq!(d.periodic_summaries(&records, &mut state, local(18, 0)).len(), 1);
    }

    #[test]
    fn test_daily_summary_only_at_configured_hour() {
        let d = ChangeDetector::new(
            AreaSet::new(["Sertã"]),
            SummaryConfig {
                hourly: false,
                daily: true,
                daily_hour: 8,
            },
        );
        let mut state = IncidentState::new();

        assert!(d.periodic_summaries(&[], &mut state, local(7, 59)).is_empty());
        let events = d.periodic_summaries(&[], &mut state, local(8, 2));
        match &events[..] {
            [Event::DailySummary(summary)] => {
                assert_eq!(summary.label, "2025-08-14");
                assert_eq!(summary.active, 0);
            }
            other => panic!("unexpected events {other:?}"),
        }
        assert!(d.periodic_summaries(&[], &mut state, local(8, 30)).is_empty());
    }

    #[test]
    fn test_top_counts_orders_and_truncates() {
        let counts = HashMap::from([
            ("b".to_string(), 2),
            ("a".to_string(), 2),
            ("c".to_string(), 5),
            ("d".to_string(), 1),
        ]);
        assert_eq!(
            top_counts(counts, 3),
            vec![
                ("c".to_string(), 5),
                ("a".to_string(), 2),
                ("b".to_string(), 2)
            ]
        );
    }
}
