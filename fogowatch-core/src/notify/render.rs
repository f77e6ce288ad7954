//! Event to notification rendering.
//!
//! Messages are in Portuguese, matching the feed. Priorities follow ntfy
//! (1 = min, 3 = default, 5 = max):
//!
//! | Event | Priority |
//! |-------|----------|
//! | New incident | configured base |
//! | Status: em curso / em resolução | 4 |
//! | Status: despacho | 3 |
//! | Status: vigilância / conclusão | 2 |
//! | Reactivation | at least 4 |
//! | Resource / annotation change, summaries | 3 |
//!
//! Resource thresholds can only raise priority. Quiet hours cap it at 3.

use crate::config::{NotifyConfig, QuietHours};
use crate::detect::{Event, IncidentRef, NewIncidentTally, Summary, SummaryWindow};
use crate::error::Result;
use crate::format::{format_duration, pretty_time};
use crate::normalize::fold;
use crate::types::{IncidentRecord, ResourceKind, StatusPhase};

use super::{Notification, NotificationAction};

const DEFAULT_PRIORITY: u8 = 3;
const MAPS_SEARCH_URL: &str = "https://www.google.com/maps/search/?api=1&query=";
const INCIDENT_PAGE_URL: &str = "https://fogos.pt/fogo/";

/// Resource counts at which a notification is tagged and raised; 0 disables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceThresholds {
    pub personnel: u32,
    pub ground_vehicles: u32,
    pub aircraft: u32,
    pub water_vehicles: u32,
}

impl ResourceThresholds {
    pub fn from_config(config: &NotifyConfig) -> Self {
        Self {
            personnel: config.min_personnel,
            ground_vehicles: config.min_ground_vehicles,
            aircraft: config.min_aircraft,
            water_vehicles: config.min_water_vehicles,
        }
    }

    fn get(&self, kind: ResourceKind) -> u32 {
        match kind {
            ResourceKind::GroundPersonnel => self.personnel,
            ResourceKind::GroundVehicles => self.ground_vehicles,
            ResourceKind::Aircraft => self.aircraft,
            ResourceKind::WaterVehicles => self.water_vehicles,
        }
    }
}

/// Tag and priority floor for a resource kind that reached its threshold.
fn threshold_tag(kind: ResourceKind) -> (&'static str, u8) {
    match kind {
        ResourceKind::GroundPersonnel => ("man", 4),
        ResourceKind::GroundVehicles => ("terrain", 3),
        ResourceKind::Aircraft => ("aerial", 4),
        ResourceKind::WaterVehicles => ("aquatic", 3),
    }
}

/// Tags suggested by annotation keywords.
pub fn annotation_tags(annotation: &str) -> Vec<&'static str> {
    let text = fold(annotation);
    let mut tags = Vec::new();
    if text.contains("reabert") {
        tags.push("white_check_mark");
    }
    if ["cortad", "encerrad", "fechad", "corte"]
        .iter()
        .any(|k| text.contains(k))
    {
        tags.push("no_entry");
    }
    tags
}

/// Map link for a record: its coordinates, else the area name.
pub fn maps_url(record: &IncidentRecord, area_display: &str) -> Option<String> {
    if let Some(at) = record.coordinates {
        return Some(format!("{}{:.6},{:.6}", MAPS_SEARCH_URL, at.lat, at.lon));
    }
    let area = area_display.trim();
    if area.is_empty() {
        return None;
    }
    Some(format!(
        "{}{}",
        MAPS_SEARCH_URL,
        urlencoding::encode(&format!("{}, Portugal", area))
    ))
}

pub fn incident_url(incident_id: &str) -> String {
    format!("{}{}", INCIDENT_PAGE_URL, urlencoding::encode(incident_id))
}

fn resource_line(record: &IncidentRecord) -> String {
    let parts: Vec<String> = ResourceKind::ALL
        .iter()
        .map(|k| format!("{}={}", k.short_label(), record.resources.get(*k)))
        .collect();
    format!("Meios: {}", parts.join(", "))
}

fn count_list(counts: &[(String, usize)], separator: &str) -> String {
    if counts.is_empty() {
        return "(n/a)".to_string();
    }
    counts
        .iter()
        .map(|(name, n)| format!("{}: {}", name, n))
        .collect::<Vec<_>>()
        .join(separator)
}

/// Turns detector output into notifications.
#[derive(Debug, Clone)]
pub struct Renderer {
    base_tags: Vec<String>,
    base_priority: u8,
    summary_threshold: usize,
    quiet_hours: Option<QuietHours>,
    thresholds: ResourceThresholds,
}

impl Renderer {
    pub fn from_config(config: &NotifyConfig) -> Result<Self> {
        let quiet_hours = config
            .quiet_hours
            .as_deref()
            .filter(|w| !w.trim().is_empty())
            .map(QuietHours::parse)
            .transpose()?;
        Ok(Self {
            base_tags: config.tags.clone(),
            base_priority: config.priority.clamp(1, 5),
            summary_threshold: config.summary_threshold,
            quiet_hours,
            thresholds: ResourceThresholds::from_config(config),
        })
    }

    fn notification(&self, title: String, body: String, priority: u8) -> Notification {
        let mut n = Notification {
            title,
            body,
            priority,
            ..Default::default()
        };
        for tag in &self.base_tags {
            n.add_tag(tag);
        }
        n
    }

    /// Resource-threshold and annotation-keyword enrichment.
    fn enrich(&self, n: &mut Notification, record: &IncidentRecord) {
        for kind in ResourceKind::ALL {
            let threshold = self.thresholds.get(kind);
            if threshold > 0 && record.resources.get(kind) >= threshold {
                let (tag, floor) = threshold_tag(kind);
                n.add_tag(tag);
                n.raise_priority(floor);
            }
        }
        for tag in annotation_tags(record.annotation_text()) {
            n.add_tag(tag);
        }
    }

    fn link(&self, n: &mut Notification, incident: &IncidentRef) {
        n.click = maps_url(&incident.record, &incident.area_display);
        if let Some(map) = &n.click {
            n.actions.push(NotificationAction {
                label: "Abrir Mapa".to_string(),
                url: map.clone(),
            });
        }
        n.actions.push(NotificationAction {
            label: "Abrir Fogos".to_string(),
            url: incident_url(&incident.incident_id),
        });
    }

    fn apply_quiet_hours(&self, n: &mut Notification, local_hour: u32) {
        if self.quiet_hours.is_some_and(|q| q.contains(local_hour)) {
            n.priority = n.priority.min(DEFAULT_PRIORITY);
            n.add_tag("zzz");
        }
    }

    /// Render one cycle's events.
    ///
    /// New incidents collapse into a single message when their count reaches
    /// the configured threshold; every other event is rendered on its own.
    /// Consecutive resource changes of one incident share a message.
    /// `active_total` is the number of incidents that passed the filters.
    pub fn render(
        &self,
        events: &[Event],
        new_by_area: &std::collections::BTreeMap<String, NewIncidentTally>,
        active_total: usize,
        local_hour: u32,
    ) -> Vec<Notification> {
        let new_count = events
            .iter()
            .filter(|e| matches!(e, Event::NewIncident(_)))
            .count();
        let aggregate = self.summary_threshold > 0 && new_count >= self.summary_threshold;

        let mut out = Vec::new();
        if aggregate {
            out.push(self.render_aggregate(new_count, new_by_area, active_total));
        }

        let mut i = 0;
        while i < events.len() {
            match &events[i] {
                Event::NewIncident(incident) => {
                    if !aggregate {
                        out.push(self.render_new(incident, active_total));
                    }
                }
                Event::StatusTransition {
                    incident,
                    previous,
                    current,
                    reactivated,
                    time_to_conclusion,
                } => out.push(self.render_status(
                    incident,
                    previous.as_deref(),
                    current,
                    *reactivated,
                    *time_to_conclusion,
                )),
                Event::ResourceChange { incident, .. } => {
                    let start = i;
                    while i + 1 < events.len()
                        && matches!(&events[i + 1], Event::ResourceChange { incident: next, .. }
                            if next.incident_id == incident.incident_id)
                    {
                        i += 1;
                    }
                    out.push(self.render_resources(incident, &events[start..=i]));
                }
                Event::AnnotationChange {
                    incident,
                    previous,
                    current,
                } => out.push(self.render_annotation(incident, previous, current)),
                Event::HourlySummary(summary) | Event::DailySummary(summary) => {
                    out.push(self.render_summary(summary))
                }
            }
            i += 1;
        }

        for n in &mut out {
            self.apply_quiet_hours(n, local_hour);
        }
        out
    }

    fn render_aggregate(
        &self,
        new_count: usize,
        new_by_area: &std::collections::BTreeMap<String, NewIncidentTally>,
        active_total: usize,
    ) -> Notification {
        let mut lines: Vec<String> = new_by_area
            .values()
            .map(|tally| {
                if tally.sample_ids.is_empty() {
                    format!("{}: {}", tally.area_display, tally.count)
                } else {
                    format!(
                        "{}: {} ({})",
                        tally.area_display,
                        tally.count,
                        tally.sample_ids.join(", ")
                    )
                }
            })
            .collect();
        lines.sort();

        let body = format!(
            "{}\nTotal ativo no alvo: {}",
            lines.join("\n"),
            active_total
        );
        self.notification(
            format!("Novos incidentes ({})", new_count),
            body,
            self.base_priority,
        )
    }

    fn render_new(&self, incident: &IncidentRef, active_total: usize) -> Notification {
        let record = &incident.record;
        let nature = record.nature.as_deref().unwrap_or("?");

        let mut title = format!("Novo em {} - {}", incident.area_display, nature);
        if let Some(created) = record.created_at {
            title.push_str(&format!(" ({})", pretty_time(created)));
        }

        let mut body = format!(
            "ID: {}\nMunicípio: {}\nEstado: {}\n{}",
            incident.incident_id,
            incident.area_display,
            record.status_text(),
            resource_line(record)
        );
        if !record.annotation_text().is_empty() {
            body.push_str(&format!("\nExtra: {}", record.annotation_text()));
        }
        body.push_str(&format!("\nTotal ativo no alvo: {}", active_total));
        body.push_str(&format!("\nFogos: {}", incident_url(&incident.incident_id)));

        let mut n = self.notification(title, body, self.base_priority);
        self.enrich(&mut n, record);
        self.link(&mut n, incident);
        n
    }

    fn render_status(
        &self,
        incident: &IncidentRef,
        previous: Option<&str>,
        current: &str,
        reactivated: bool,
        time_to_conclusion: Option<chrono::Duration>,
    ) -> Notification {
        let record = &incident.record;
        let from = previous.filter(|p| !p.trim().is_empty()).unwrap_or("Novo");

        let mut title = format!("{} → {} - {}", from, current, incident.area_display);
        if reactivated {
            title = format!("Reativado: {}", title);
        }

        let mut body = format!("ID: {}\n{}", incident.incident_id, resource_line(record));
        if !record.annotation_text().is_empty() {
            body.push_str(&format!("\nExtra: {}", record.annotation_text()));
        }
        if let Some(elapsed) = time_to_conclusion {
            body.push_str(&format!("\nDuração: {}", format_duration(elapsed)));
        }
        if let Some(updated) = record.updated_at {
            body.push_str(&format!("\nAtualizado: {}", pretty_time(updated)));
        }
        body.push_str(&format!("\nFogos: {}", incident_url(&incident.incident_id)));

        let phase = StatusPhase::classify(current);
        let priority = match phase {
            StatusPhase::Active => 4,
            StatusPhase::Dispatch => 3,
            StatusPhase::Surveillance | StatusPhase::Concluded => 2,
            StatusPhase::Other => self.base_priority,
        };

        let mut n = self.notification(title, body, priority);
        self.enrich(&mut n, record);
        if reactivated {
            n.add_tag("repeat");
            n.raise_priority(4);
        }
        if phase == StatusPhase::Concluded {
            n.add_tag("white_check_mark");
        }
        self.link(&mut n, incident);
        n
    }

    fn render_resources(&self, incident: &IncidentRef, changes: &[Event]) -> Notification {
        let mut body = format!("ID: {}", incident.incident_id);
        for change in changes {
            if let Event::ResourceChange {
                kind,
                previous,
                current,
                ..
            } = change
            {
                body.push_str(&format!(
                    "\n{}: {} → {}",
                    kind.short_label(),
                    previous,
                    current
                ));
            }
        }
        body.push_str(&format!("\nFogos: {}", incident_url(&incident.incident_id)));

        let mut n = self.notification(
            format!("Meios atualizados - {}", incident.area_display),
            body,
            DEFAULT_PRIORITY,
        );
        self.enrich(&mut n, &incident.record);
        self.link(&mut n, incident);
        n
    }

    fn render_annotation(&self, incident: &IncidentRef, previous: &str, current: &str) -> Notification {
        let shown = |s: &str| {
            if s.is_empty() {
                "(vazio)".to_string()
            } else {
                s.to_string()
            }
        };
        let body = format!(
            "ID: {}\nAntes: {}\nAgora: {}\nFogos: {}",
            incident.incident_id,
            shown(previous),
            shown(current),
            incident_url(&incident.incident_id)
        );

        let mut n = self.notification(
            format!("Nota atualizada - {}", incident.area_display),
            body,
            DEFAULT_PRIORITY,
        );
        for tag in annotation_tags(current) {
            n.add_tag(tag);
        }
        self.link(&mut n, incident);
        n
    }

    fn render_summary(&self, summary: &Summary) -> Notification {
        let (title, tag, separator) = match summary.window {
            SummaryWindow::Hourly => (format!("Sumário horário ({})", summary.label), "bar_chart", ", "),
            SummaryWindow::Daily => (format!("Sumário diário ({})", summary.label), "calendar", "; "),
        };
        let body = format!(
            "Ativos: {}\nConcelhos: {}\nNatureza: {}\nEstados: {}",
            summary.active,
            count_list(&summary.by_area, separator),
            count_list(&summary.by_nature, separator),
            count_list(&summary.by_status, separator),
        );
        let mut n = self.notification(title, body, DEFAULT_PRIORITY);
        n.add_tag(tag);
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Coordinates, ResourceCounts};
    use std::collections::BTreeMap;

    fn renderer(config: NotifyConfig) -> Renderer {
        Renderer::from_config(&config).unwrap()
    }

    fn incident(id: &str, area: &str) -> IncidentRef {
        IncidentRef {
            incident_id: id.to_string(),
            area_key: crate::normalize::normalize(area),
            area_display: area.to_string(),
            record: IncidentRecord {
                id: Some(id.to_string()),
                area_name: Some(area.to_string()),
                nature: Some("Mato".to_string()),
                status: Some("Despacho".to_string()),
                ..Default::default()
            },
        }
    }

    fn tally(area: &str, ids: &[&str]) -> NewIncidentTally {
        NewIncidentTally {
            area_display: area.to_string(),
            count: ids.len(),
            sample_ids: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn transition(id: &str, previous: Option<&str>, current: &str, reactivated: bool) -> Event {
        let mut incident = incident(id, "Sertã");
        incident.record.status = Some(current.to_string());
        Event::StatusTransition {
            incident,
            previous: previous.map(str::to_string),
            current: current.to_string(),
            reactivated,
            time_to_conclusion: None,
        }
    }

    #[test]
    fn test_new_incident_message() {
        let r = renderer(NotifyConfig::default());
        let mut inc = incident("2025050012", "Sertã");
        inc.record.coordinates = Some(Coordinates {
            lat: 39.8,
            lon: -8.1,
        });

        let out = r.render(&[Event::NewIncident(inc)], &BTreeMap::new(), 3, 12);

        assert_eq!(out.len(), 1);
        let n = &out[0];
        assert_eq!(n.title, "Novo em Sertã - Mato");
        assert!(n.body.contains("ID: 2025050012"));
        assert!(n.body.contains("Meios: man=0, ter=0, air=0, aq=0"));
        assert!(n.body.contains("Total ativo no alvo: 3"));
        assert_eq!(n.priority, 5);
        assert_eq!(n.tags, vec!["fire", "rotating_light"]);
        assert_eq!(
            n.click.as_deref(),
            Some("https://www.google.com/maps/search/?api=1&query=39.800000,-8.100000")
        );
        assert_eq!(n.actions.len(), 2);
        assert_eq!(n.actions[1].url, "https://fogos.pt/fogo/2025050012");
    }

    #[test]
    fn test_aggregation_collapses_new_incidents_only() {
        let r = renderer(NotifyConfig {
            summary_threshold: 2,
            ..Default::default()
        });
        let events = vec![
            Event::NewIncident(incident("A", "Sertã")),
            transition("A", None, "Despacho", false),
            Event::NewIncident(incident("B", "Oleiros")),
            transition("B", None, "Despacho", false),
        ];
        let by_area = BTreeMap::from([
            ("serta".to_string(), tally("Sertã", &["A"])),
            ("oleiros".to_string(), tally("Oleiros", &["B"])),
        ]);

        let out = r.render(&events, &by_area, 9, 12);

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].title, "Novos incidentes (2)");
        assert_eq!(
            out[0].body,
            "Oleiros: 1 (B)\nSertã: 1 (A)\nTotal ativo no alvo: 9"
        );
        assert!(out[1].title.starts_with("Novo → Despacho"));
        assert!(out[2].title.starts_with("Novo → Despacho"));
    }

    #[test]
    fn test_below_threshold_renders_individually() {
        let r = renderer(NotifyConfig {
            summary_threshold: 5,
            ..Default::default()
        });
        let events = vec![
            Event::NewIncident(incident("A", "Sertã")),
            Event::NewIncident(incident("B", "Sertã")),
        ];
        let out = r.render(&events, &BTreeMap::new(), 2, 12);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|n| n.title.starts_with("Novo em Sertã")));
    }

    #[test]
    fn test_status_priorities_and_tags() {
        let r = renderer(NotifyConfig::default());
        let out = r.render(
            &[
                transition("A", Some("Despacho"), "Em Curso", false),
                transition("B", None, "Despacho", false),
                transition("C", Some("Em Curso"), "Conclusão", false),
                transition("D", Some("Vigilância"), "Em Curso", true),
            ],
            &BTreeMap::new(),
            4,
            12,
        );

        assert_eq!(out[0].priority, 4);
        assert_eq!(out[0].title, "Despacho → Em Curso - Sertã");
        assert_eq!(out[1].priority, 3);
        assert_eq!(out[2].priority, 2);
        assert!(out[2].tags.contains(&"white_check_mark".to_string()));
        assert!(out[3].title.starts_with("Reativado: Vigilância → Em Curso"));
        assert!(out[3].tags.contains(&"repeat".to_string()));
        assert_eq!(out[3].priority, 4);
    }

    #[test]
    fn test_resource_thresholds_raise_priority() {
        let r = renderer(NotifyConfig {
            min_aircraft: 2,
            min_personnel: 100,
            ..Default::default()
        });
        let mut event = transition("A", Some("Em Curso"), "Vigilância", false);
        if let Event::StatusTransition { incident, .. } = &mut event {
            incident.record.resources = ResourceCounts {
                ground_personnel: 40,
                aircraft: 3,
                ..Default::default()
            };
        }

        let out = r.render(&[event], &BTreeMap::new(), 1, 12);

        assert!(out[0].tags.contains(&"aerial".to_string()));
        assert!(!out[0].tags.contains(&"man".to_string()));
        assert_eq!(out[0].priority, 4);
    }

    #[test]
    fn test_resource_changes_of_one_incident_share_a_message() {
        let r = renderer(NotifyConfig::default());
        let inc = incident("A", "Sertã");
        let events = vec![
            Event::ResourceChange {
                incident: inc.clone(),
                kind: ResourceKind::GroundPersonnel,
                previous: 0,
                current: 5,
            },
            Event::ResourceChange {
                incident: inc,
                kind: ResourceKind::Aircraft,
                previous: 0,
                current: 1,
            },
            Event::ResourceChange {
                incident: incident("B", "Sertã"),
                kind: ResourceKind::Aircraft,
                previous: 2,
                current: 0,
            },
        ];

        let out = r.render(&events, &BTreeMap::new(), 2, 12);

        assert_eq!(out.len(), 2);
        assert!(out[0].body.contains("man: 0 → 5\nair: 0 → 1"));
        assert!(out[1].body.contains("ID: B\nair: 2 → 0"));
    }

    #[test]
    fn test_annotation_message_and_keyword_tags() {
        let r = renderer(NotifyConfig::default());
        let out = r.render(
            &[Event::AnnotationChange {
                incident: incident("A", "Sertã"),
                previous: "EN2 cortada".to_string(),
                current: "".to_string(),
            }],
            &BTreeMap::new(),
            1,
            12,
        );
        assert!(out[0].body.contains("Antes: EN2 cortada\nAgora: (vazio)"));

        assert_eq!(annotation_tags("Estrada REABERTA"), vec!["white_check_mark"]);
        assert_eq!(annotation_tags("EN238 encerrada ao trânsito"), vec!["no_entry"]);
        assert!(annotation_tags("sem novidades").is_empty());
    }

    #[test]
    fn test_quiet_hours_cap_priority() {
        let r = renderer(NotifyConfig {
            quiet_hours: Some("23-7".to_string()),
            ..Default::default()
        });
        let events = [Event::NewIncident(incident("A", "Sertã"))];

        let night = r.render(&events, &BTreeMap::new(), 1, 2);
        assert_eq!(night[0].priority, 3);
        assert!(night[0].tags.contains(&"zzz".to_string()));

        let day = r.render(&events, &BTreeMap::new(), 1, 14);
        assert_eq!(day[0].priority, 5);
        assert!(!day[0].tags.contains(&"zzz".to_string()));
    }

    #[test]
    fn test_summary_message() {
        let r = renderer(NotifyConfig::default());
        let summary = Summary {
            window: SummaryWindow::Daily,
            label: "2025-08-14".to_string(),
            active: 3,
            by_area: vec![("Sertã".to_string(), 2), ("Oleiros".to_string(), 1)],
            by_nature: vec![],
            by_status: vec![("Em Curso".to_string(), 3)],
        };
        let out = r.render(&[Event::DailySummary(summary)], &BTreeMap::new(), 3, 8);

        assert_eq!(out[0].title, "Sumário diário (2025-08-14)");
        assert_eq!(
            out[0].body,
            "Ativos: 3\nConcelhos: Sertã: 2; Oleiros: 1\nNatureza: (n/a)\nEstados: Em Curso: 3"
        );
        assert!(out[0].tags.contains(&"calendar".to_string()));
        assert!(out[0].click.is_none());
    }

    #[test]
    fn test_maps_url_falls_back_to_area_name() {
        let record = IncidentRecord::default();
        assert_eq!(
            maps_url(&record, "Vila de Rei").as_deref(),
            Some("https://www.google.com/maps/search/?api=1&query=Vila%20de%20Rei%2C%20Portugal")
        );
        assert_eq!(maps_url(&record, " "), None);
    }
}
