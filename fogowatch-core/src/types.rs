//! Core domain types for fogowatch
//!
//! These types are the normalized shape of one upstream incident. The feed
//! adapter produces them from whatever JSON shape the API returned this
//! cycle; nothing past the adapter ever sees raw attribute maps.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Incident** | One upstream-reported occurrence (usually a wildfire), keyed by an upstream ID |
//! | **Area** | The municipality (concelho) an incident is reported in |
//! | **Area key** | Canonical, accent-free key for an area (see [`crate::normalize`]) |
//! | **Resources** | Counts of responding assets: personnel, ground vehicles, aircraft, water vehicles |
//! | **Annotation** | Free-text note the upstream attaches to an incident (road closures, etc.) |
//! | **Cycle** | One fetch, filter, detect, notify, persist pass |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::normalize::fold;

// ============================================
// Resources
// ============================================

/// Kind of responding asset counted per incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    GroundPersonnel,
    GroundVehicles,
    Aircraft,
    WaterVehicles,
}

impl ResourceKind {
    /// Every kind, in display order.
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::GroundPersonnel,
        ResourceKind::GroundVehicles,
        ResourceKind::Aircraft,
        ResourceKind::WaterVehicles,
    ];

    /// Attribute name in the upstream feed
    pub fn feed_key(&self) -> &'static str {
        match self {
            ResourceKind::GroundPersonnel => "man",
            ResourceKind::GroundVehicles => "terrain",
            ResourceKind::Aircraft => "aerial",
            ResourceKind::WaterVehicles => "meios_aquaticos",
        }
    }

    /// Short label used in messages and tags
    pub fn short_label(&self) -> &'static str {
        match self {
            ResourceKind::GroundPersonnel => "man",
            ResourceKind::GroundVehicles => "ter",
            ResourceKind::Aircraft => "air",
            ResourceKind::WaterVehicles => "aq",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::GroundPersonnel => "ground_personnel",
            ResourceKind::GroundVehicles => "ground_vehicles",
            ResourceKind::Aircraft => "aircraft",
            ResourceKind::WaterVehicles => "water_vehicles",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of responding assets for one incident.
///
/// Absent upstream attributes are zero. Serialized with the upstream
/// attribute names so the state file reads like the feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCounts {
    #[serde(rename = "man", default)]
    pub ground_personnel: u32,
    #[serde(rename = "terrain", default)]
    pub ground_vehicles: u32,
    #[serde(rename = "aerial", default)]
    pub aircraft: u32,
    #[serde(rename = "aquatic", default)]
    pub water_vehicles: u32,
}

impl ResourceCounts {
    pub fn get(&self, kind: ResourceKind) -> u32 {
        match kind {
            ResourceKind::GroundPersonnel => self.ground_personnel,
            ResourceKind::GroundVehicles => self.ground_vehicles,
            ResourceKind::Aircraft => self.aircraft,
            ResourceKind::WaterVehicles => self.water_vehicles,
        }
    }

    pub fn set(&mut self, kind: ResourceKind, value: u32) {
        match kind {
            ResourceKind::GroundPersonnel => self.ground_personnel = value,
            ResourceKind::GroundVehicles => self.ground_vehicles = value,
            ResourceKind::Aircraft => self.aircraft = value,
            ResourceKind::WaterVehicles => self.water_vehicles = value,
        }
    }

    /// Kinds whose count differs from `previous`, as `(kind, previous, current)`.
    pub fn changes_since(&self, previous: &ResourceCounts) -> Vec<(ResourceKind, u32, u32)> {
        ResourceKind::ALL
            .iter()
            .filter(|k| previous.get(**k) != self.get(**k))
            .map(|k| (*k, previous.get(*k), self.get(*k)))
            .collect()
    }
}

// ============================================
// Status
// ============================================

/// Coarse lifecycle phase derived from the free-text status.
///
/// Status vocabularies drift ("Em Curso", "em curso", "Em Resolução",
/// "Conclusão"), so classification is substring-based on the folded text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPhase {
    Dispatch,
    Active,
    Surveillance,
    Concluded,
    Other,
}

impl StatusPhase {
    pub fn classify(status: &str) -> StatusPhase {
        let s = fold(status);
        if s.contains("conclus") {
            StatusPhase::Concluded
        } else if s.contains("vigil") {
            StatusPhase::Surveillance
        } else if s.contains("despacho") {
            StatusPhase::Dispatch
        } else if s.contains("curso") || s.contains("resolucao") {
            StatusPhase::Active
        } else {
            StatusPhase::Other
        }
    }

    /// Concluded or under surveillance: the incident is winding down.
    pub fn is_winding_down(&self) -> bool {
        matches!(self, StatusPhase::Concluded | StatusPhase::Surveillance)
    }

    /// Dispatch or active: crews are (being) engaged.
    pub fn is_engaged(&self) -> bool {
        matches!(self, StatusPhase::Dispatch | StatusPhase::Active)
    }
}

/// Whether a status string marks the incident as concluded.
pub fn is_concluded(status: &str) -> bool {
    StatusPhase::classify(status) == StatusPhase::Concluded
}

// ============================================
// Incident
// ============================================

/// Geographic point (WGS84 degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// One incident as reported by the feed in the current cycle.
///
/// Every upstream attribute is optional; a record without an `id` is kept
/// through filtering and skipped by the change detector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncidentRecord {
    /// Upstream-assigned identifier
    pub id: Option<String>,
    /// Municipality name as reported
    pub area_name: Option<String>,
    pub district: Option<String>,
    pub region: Option<String>,
    pub sub_region: Option<String>,
    pub parish: Option<String>,
    /// Free-text nature ("Mato", "Povoamento Florestal", ...)
    pub nature: Option<String>,
    pub nature_code: Option<String>,
    /// Free-text status ("Despacho", "Em Curso", "Conclusão", ...)
    pub status: Option<String>,
    pub status_code: Option<i64>,
    pub resources: ResourceCounts,
    /// Free-text note, may change without a status change
    pub annotation: Option<String>,
    pub coordinates: Option<Coordinates>,
    /// When the incident was opened upstream
    pub created_at: Option<DateTime<Utc>>,
    /// When the upstream last updated the incident
    pub updated_at: Option<DateTime<Utc>>,
}

impl IncidentRecord {
    /// Status text, empty when absent.
    pub fn status_text(&self) -> &str {
        self.status.as_deref().map(str::trim).unwrap_or("")
    }

    /// Trimmed annotation text, empty when absent.
    pub fn annotation_text(&self) -> &str {
        self.annotation.as_deref().map(str::trim).unwrap_or("")
    }

    /// Area as reported, falling back to `fallback` when absent or blank.
    pub fn area_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        match self.area_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => fallback,
        }
    }

    pub fn phase(&self) -> StatusPhase {
        StatusPhase::classify(self.status_text())
    }
}
