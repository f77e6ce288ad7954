//! One monitoring cycle
//!
//! [`Monitor`] owns every collaborator of a cycle and the in-memory
//! [`IncidentState`]. A cycle runs fetch, filter, detect, render, dispatch and
//! persist strictly in that order. The state is fully updated before the first
//! notification goes out, and the file is written after dispatch, so a crash
//! in between replays the cycle from the previous snapshot (at-least-once).

use chrono::{DateTime, Duration, Local, NaiveDateTime, Timelike, Utc};

use crate::config::Config;
use crate::detect::ChangeDetector;
use crate::error::Result;
use crate::feed::IncidentFeed;
use crate::filter::{FilterPipeline, FilterStats};
use crate::normalize::AreaSet;
use crate::notify::{Notification, Notifier, Renderer};
use crate::state::{IncidentState, StateStore};

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Records returned by the feed
    pub fetched: usize,
    /// Records that passed every filter
    pub kept: usize,
    pub filter: FilterStats,
    /// Detector and summary events
    pub events: usize,
    pub new_incidents: usize,
    /// Incidents that reached a concluded status
    pub concluded: usize,
    /// Records the detector could not attribute
    pub skipped: usize,
    /// Notifications delivered
    pub notified: usize,
    /// Notifications that failed to deliver
    pub failed: usize,
    /// IDs dropped by retention pruning
    pub pruned: usize,
    /// Whether the state file was rewritten
    pub saved: bool,
}

/// Cycle driver.
pub struct Monitor<F, N> {
    feed: F,
    notifier: N,
    pipeline: FilterPipeline,
    detector: ChangeDetector,
    renderer: Renderer,
    store: StateStore,
    state: IncidentState,
    ttl: Duration,
}

impl<F: IncidentFeed, N: Notifier> Monitor<F, N> {
    /// Build a monitor and load its state.
    ///
    /// Loading fails soft; the loaded state is canonicalized against the
    /// wanted areas before the first comparison.
    pub fn new(config: &Config, feed: F, notifier: N, mut store: StateStore) -> Result<Self> {
        let areas = AreaSet::new(&config.areas.wanted);
        let pipeline =
            FilterPipeline::from_config(&areas, &config.filters, config.radius.as_ref());
        let renderer = Renderer::from_config(&config.notify)?;

        let mut state = store.load();
        state.canonicalize(&areas);
        tracing::info!(
            path = %store.path().display(),
            areas = areas.len(),
            active = state.active_count(),
            "State loaded"
        );

        let ttl = config.state.ttl()?;

        Ok(Self {
            feed,
            notifier,
            pipeline,
            detector: ChangeDetector::new(areas, config.summary.clone()),
            renderer,
            store,
            state,
            ttl,
        })
    }

    pub fn state(&self) -> &IncidentState {
        &self.state
    }

    pub fn areas(&self) -> &AreaSet {
        self.detector.areas()
    }

    pub fn feed(&self) -> &F {
        &self.feed
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Run one cycle at `now`, using the local clock for summary windows.
    pub fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport> {
        let local = now.with_timezone(&Local).naive_local();
        self.run_cycle_at(now, local)
    }

    /// Run one cycle with an explicit local wall-clock time.
    ///
    /// Only a feed failure is returned as an error, and it leaves the state
    /// untouched. Delivery and save failures are logged.
    pub fn run_cycle_at(&mut self, now: DateTime<Utc>, local: NaiveDateTime) -> Result<CycleReport> {
        let records = self.feed.fetch()?;
        let mut report = CycleReport {
            fetched: records.len(),
            ..Default::default()
        };

        let (kept, stats) = self.pipeline.apply(records);
        report.kept = kept.len();
        report.filter = stats;

        let outcome = self.detector.detect(&kept, &mut self.state, now);
        let summaries = self
            .detector
            .periodic_summaries(&kept, &mut self.state, local);
        report.new_incidents = outcome.new_incident_count();
        report.skipped = outcome.skipped;
        report.events = outcome.events.len() + summaries.len();
        report.concluded = outcome.conclusions.len();

        report.pruned = self.state.prune(self.ttl, now);

        let mut events = outcome.events;
        events.extend(summaries);
        let notifications =
            self.renderer
                .render(&events, &outcome.new_by_area, report.kept, local.hour());

        for notification in &notifications {
            if self.deliver(notification) {
                report.notified += 1;
            } else {
                report.failed += 1;
            }
        }

        report.saved = match self.store.save(&self.state) {
            Ok(saved) => saved,
            Err(e) => {
                tracing::error!(error = %e, "Failed to save state, keeping in-memory state");
                false
            }
        };

        tracing::info!(
            fetched = report.fetched,
            kept = report.kept,
            dropped_area = report.filter.dropped_area,
            events = report.events,
            new_incidents = report.new_incidents,
            concluded = report.concluded,
            notified = report.notified,
            failed = report.failed,
            pruned = report.pruned,
            saved = report.saved,
            "Cycle complete"
        );

        Ok(report)
    }

    fn deliver(&mut self, notification: &Notification) -> bool {
        match self.notifier.send(notification) {
            Ok(()) => {
                tracing::debug!(
                    transport = self.notifier.name(),
                    title = %notification.title,
                    priority = notification.priority,
                    "Notification sent"
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    transport = self.notifier.name(),
                    title = %notification.title,
                    error = %e,
                    "Failed to send notification"
                );
                false
            }
        }
    }

    /// Send the start-up test message.
    pub fn send_test_notification(&mut self) -> Result<()> {
        let names: Vec<&str> = self.areas().areas().map(|a| a.display.as_str()).collect();
        let message = Notification::test_message(&names);
        self.notifier.send(&message)?;
        tracing::info!(transport = self.notifier.name(), "Test notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::types::IncidentRecord;
    use chrono::TimeZone;
    use tempfile::TempDir;

    struct StaticFeed(Option<Vec<IncidentRecord>>);

    impl IncidentFeed for StaticFeed {
        fn fetch(&mut self) -> Result<Vec<IncidentRecord>> {
            self.0
                .clone()
                .ok_or_else(|| Error::Feed("upstream unavailable".to_string()))
        }

        fn describe(&self) -> String {
            "static".to_string()
        }
    }

    #[derive(Default)]
    struct Recorder {
        sent: Vec<Notification>,
        fail: bool,
    }

    impl Notifier for Recorder {
        fn send(&mut self, notification: &Notification) -> Result<()> {
            if self.fail {
                return Err(Error::Notify("offline".to_string()));
            }
            self.sent.push(notification.clone());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    fn record(id: &str, area: &str, status: &str) -> IncidentRecord {
        IncidentRecord {
            id: Some(id.to_string()),
            area_name: Some(area.to_string()),
            status: Some(status.to_string()),
            nature: Some("Mato".to_string()),
            ..Default::default()
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.summary.hourly = false;
        config.summary.daily = false;
        config
    }

    fn noon() -> (DateTime<Utc>, NaiveDateTime) {
        let now = Utc.with_ymd_and_hms(2025, 8, 14, 12, 0, 0).unwrap();
        (now, now.naive_utc())
    }

    #[test]
    fn test_out_of_range_ttl_is_rejected() {
        let dir = TempDir::new().unwrap();
        for ttl_hours in [1e13, f64::INFINITY, f64::NAN] {
            let mut config = config();
            config.state.ttl_hours = ttl_hours;
            let store = StateStore::new(dir.path().join("state.json"));
            let result = Monitor::new(&config, StaticFeed(None), Recorder::default(), store);
            assert!(matches!(result, Err(Error::Config(_))));
        }
    }

    #[test]
    fn test_longest_ttl_cycle_keeps_incidents() {
        let dir = TempDir::new().unwrap();
        let mut config = config();
        config.state.ttl_hours = crate::config::MAX_TTL_HOURS;
        let store = StateStore::new(dir.path().join("state.json"));
        let feed = StaticFeed(Some(vec![record("A", "Sertã", "Despacho")]));
        let mut monitor = Monitor::new(&config, feed, Recorder::default(), store).unwrap();
        let (now, local) = noon();

        let report = monitor.run_cycle_at(now, local).unwrap();

        assert_eq!(report.pruned, 0);
        assert!(monitor.state().is_active("serta", "A"));
    }

    #[test]
    fn test_cycle_announces_and_persists() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let feed = StaticFeed(Some(vec![
            record("A", "Sertã", "Despacho"),
            record("B", "Lisboa", "Despacho"),
        ]));
        let mut monitor = Monitor::new(&config(), feed, Recorder::default(), store).unwrap();
        let (now, local) = noon();

        let report = monitor.run_cycle_at(now, local).unwrap();

        assert_eq!(report.fetched, 2);
        assert_eq!(report.kept, 1);
        assert_eq!(report.new_incidents, 1);
        assert_eq!(report.concluded, 0);
        assert_eq!(report.events, 2);
        assert_eq!(report.notified, 2);
        assert!(report.saved);
        assert!(monitor.state().is_active("serta", "A"));
        assert!(dir.path().join("state.json").exists());

        let again = monitor.run_cycle_at(now + Duration::seconds(30), local).unwrap();
        assert_eq!(again.events, 0);
        assert_eq!(again.notified, 0);
    }

    #[test]
    fn test_feed_failure_leaves_state_untouched() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let mut monitor =
            Monitor::new(&config(), StaticFeed(None), Recorder::default(), store).unwrap();
        let (now, local) = noon();

        assert!(matches!(monitor.run_cycle_at(now, local), Err(Error::Feed(_))));
        assert_eq!(monitor.state().active_count(), 0);
        assert!(!dir.path().join("state.json").exists());
    }

    #[test]
    fn test_delivery_failure_does_not_block_persist() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let feed = StaticFeed(Some(vec![record("A", "Oleiros", "Em Curso")]));
        let notifier = Recorder {
            fail: true,
            ..Default::default()
        };
        let mut monitor = Monitor::new(&config(), feed, notifier, store).unwrap();
        let (now, local) = noon();

        let report = monitor.run_cycle_at(now, local).unwrap();

        assert_eq!(report.notified, 0);
        assert_eq!(report.failed, 2);
        assert!(report.saved);
    }

    #[test]
    fn test_hourly_summary_fires_once_per_hour() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let mut config = config();
        config.summary.hourly = true;
        let feed = StaticFeed(Some(vec![record("A", "Sertã", "Em Curso")]));
        let mut monitor = Monitor::new(&config, feed, Recorder::default(), store).unwrap();
        let (now, local) = noon();

        monitor.run_cycle_at(now, local).unwrap();
        monitor
            .run_cycle_at(now + Duration::minutes(10), local + Duration::minutes(10))
            .unwrap();

        let summaries: Vec<_> = monitor
            .notifier()
            .sent
            .iter()
            .filter(|n| n.title.starts_with("Sumário horário"))
            .collect();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].title, "Sumário horário (12:00)");
    }

    #[test]
    fn test_test_notification_names_area_count() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let mut monitor =
            Monitor::new(&config(), StaticFeed(Some(vec![])), Recorder::default(), store).unwrap();

        monitor.send_test_notification().unwrap();

        let sent = &monitor.notifier().sent;
        assert_eq!(sent.len(), 1);
        let expected = format!("{} concelho(s)", monitor.areas().len());
        assert!(sent[0].body.contains(&expected));
    }
}
