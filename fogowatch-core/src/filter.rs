//! Filter pipeline
//!
//! Decides which fetched records the change detector sees. Stages run in a
//! fixed order and a record must pass every one:
//!
//! 1. Area membership (normalized area must be a wanted key or alias)
//! 2. Administrative allow-lists (district, region, sub-region, parish)
//! 3. Nature and status rules
//! 4. Radius around a center point
//!
//! The pipeline is pure: it never touches state and only logs at debug level.

use std::collections::HashSet;

use crate::config::{FilterConfig, RadiusConfig};
use crate::normalize::{fold, normalize, AreaSet};
use crate::types::{Coordinates, IncidentRecord};

/// Great-circle distance in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let lat1_r = lat1.to_radians();
    let lat2_r = lat2.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1_r.cos() * lat2_r.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_KM * c
}

// ============================================
// Stage configuration
// ============================================

/// Folded set of accepted values; empty means "no constraint".
fn folded_set(values: &[String]) -> HashSet<String> {
    values
        .iter()
        .map(|v| fold(v))
        .filter(|v| !v.is_empty())
        .collect()
}

fn folded_list(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| fold(v))
        .filter(|v| !v.is_empty())
        .collect()
}

/// Exact-match allow-lists over administrative units.
#[derive(Debug, Clone, Default)]
pub struct AdminFilters {
    districts: HashSet<String>,
    regions: HashSet<String>,
    sub_regions: HashSet<String>,
    parishes: HashSet<String>,
}

impl AdminFilters {
    pub fn from_config(config: &FilterConfig) -> Self {
        Self {
            districts: folded_set(&config.districts),
            regions: folded_set(&config.regions),
            sub_regions: folded_set(&config.sub_regions),
            parishes: folded_set(&config.parishes),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.districts.is_empty()
            && self.regions.is_empty()
            && self.sub_regions.is_empty()
            && self.parishes.is_empty()
    }

    pub fn accepts(&self, record: &IncidentRecord) -> bool {
        allowed(&self.districts, record.district.as_deref())
            && allowed(&self.regions, record.region.as_deref())
            && allowed(&self.sub_regions, record.sub_region.as_deref())
            && allowed(&self.parishes, record.parish.as_deref())
    }
}

fn allowed(set: &HashSet<String>, value: Option<&str>) -> bool {
    set.is_empty() || set.contains(&fold(value.unwrap_or("")))
}

/// Include/exclude rules over nature and status.
///
/// Status and nature text rules match on substrings of the folded value.
#[derive(Debug, Clone, Default)]
pub struct NatureStatusFilters {
    exclude_status_codes: HashSet<i64>,
    include_nature_codes: HashSet<String>,
    exclude_nature_codes: HashSet<String>,
    include_status: Vec<String>,
    exclude_status: Vec<String>,
    include_nature: Vec<String>,
}

impl NatureStatusFilters {
    pub fn from_config(config: &FilterConfig) -> Self {
        Self {
            exclude_status_codes: config.exclude_status_codes.iter().copied().collect(),
            include_nature_codes: folded_set(&config.include_nature_codes),
            exclude_nature_codes: folded_set(&config.exclude_nature_codes),
            include_status: folded_list(&config.include_status),
            exclude_status: folded_list(&config.exclude_status),
            include_nature: folded_list(&config.include_nature),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.exclude_status_codes.is_empty()
            && self.include_nature_codes.is_empty()
            && self.exclude_nature_codes.is_empty()
            && self.include_status.is_empty()
            && self.exclude_status.is_empty()
            && self.include_nature.is_empty()
    }

    pub fn accepts(&self, record: &IncidentRecord) -> bool {
        if let Some(code) = record.status_code {
            if self.exclude_status_codes.contains(&code) {
                return false;
            }
        }

        let nature_code = fold(record.nature_code.as_deref().unwrap_or(""));
        if !self.include_nature_codes.is_empty() && !self.include_nature_codes.contains(&nature_code)
        {
            return false;
        }
        if self.exclude_nature_codes.contains(&nature_code) {
            return false;
        }

        let status = fold(record.status_text());
        if !self.include_status.is_empty()
            && !self.include_status.iter().any(|s| status.contains(s.as_str()))
        {
            return false;
        }
        if self.exclude_status.iter().any(|s| status.contains(s.as_str())) {
            return false;
        }

        if self.include_nature.is_empty() {
            return true;
        }
        let nature = fold(record.nature.as_deref().unwrap_or(""));
        self.include_nature
            .iter()
            .any(|want| nature == *want || nature_code == *want || nature.contains(want.as_str()))
    }
}

/// Keep only records within `km` of `center`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadiusFilter {
    pub center: Coordinates,
    pub km: f64,
}

impl RadiusFilter {
    /// Active filter from configuration; `None` when absent or `km <= 0`.
    pub fn from_config(config: Option<&RadiusConfig>) -> Option<Self> {
        let config = config?;
        (config.km.is_finite() && config.km > 0.0).then_some(Self {
            center: Coordinates {
                lat: config.center_lat,
                lon: config.center_lon,
            },
            km: config.km,
        })
    }

    /// Records without coordinates are rejected.
    pub fn accepts(&self, record: &IncidentRecord) -> bool {
        record.coordinates.is_some_and(|at| {
            haversine_km(self.center.lat, self.center.lon, at.lat, at.lon) <= self.km
        })
    }
}

// ============================================
// Pipeline
// ============================================

/// Per-stage drop counters for one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FilterStats {
    pub input: usize,
    pub dropped_area: usize,
    pub dropped_admin: usize,
    pub dropped_nature_status: usize,
    pub dropped_radius: usize,
    pub kept: usize,
}

/// The four filter stages, built once from configuration.
#[derive(Debug, Clone)]
pub struct FilterPipeline {
    wanted: HashSet<String>,
    admin: AdminFilters,
    nature_status: NatureStatusFilters,
    radius: Option<RadiusFilter>,
}

impl FilterPipeline {
    pub fn new(
        areas: &AreaSet,
        admin: AdminFilters,
        nature_status: NatureStatusFilters,
        radius: Option<RadiusFilter>,
    ) -> Self {
        Self {
            wanted: areas.all_keys().map(str::to_string).collect(),
            admin,
            nature_status,
            radius,
        }
    }

    pub fn from_config(
        areas: &AreaSet,
        filters: &FilterConfig,
        radius: Option<&RadiusConfig>,
    ) -> Self {
        Self::new(
            areas,
            AdminFilters::from_config(filters),
            NatureStatusFilters::from_config(filters),
            RadiusFilter::from_config(radius),
        )
    }

    /// Area stage: the record's normalized area is wanted (directly or via alias).
    fn in_wanted_area(&self, record: &IncidentRecord) -> bool {
        match record.area_name.as_deref() {
            Some(name) => {
                let key = normalize(name);
                !key.is_empty() && self.wanted.contains(&key)
            }
            None => false,
        }
    }

    /// Run every stage over `records`, keeping encounter order.
    pub fn apply(&self, records: Vec<IncidentRecord>) -> (Vec<IncidentRecord>, FilterStats) {
        let mut stats = FilterStats {
            input: records.len(),
            ..Default::default()
        };

        let kept: Vec<IncidentRecord> = records
            .into_iter()
            .filter(|record| {
                if !self.in_wanted_area(record) {
                    stats.dropped_area += 1;
                    false
                } else if !self.admin.accepts(record) {
                    stats.dropped_admin += 1;
                    false
                } else if !self.nature_status.accepts(record) {
                    stats.dropped_nature_status += 1;
                    false
                } else if self.radius.is_some_and(|r| !r.accepts(record)) {
                    stats.dropped_radius += 1;
                    false
                } else {
                    true
                }
            })
            .collect();

        stats.kept = kept.len();
        tracing::debug!(
            input = stats.input,
            kept = stats.kept,
            dropped_area = stats.dropped_area,
            dropped_admin = stats.dropped_admin,
            dropped_nature_status = stats.dropped_nature_status,
            dropped_radius = stats.dropped_radius,
            "Filtered records"
        );

        (kept, stats)
    }
}
