//! Normalized coverage measurement.
//!
//! A [`CoverageModel`] is produced fresh by an analyzer on every measurement
//! and is never mutated afterwards. The next measurement replaces it whole.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Coverage of a single source unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitCoverage {
    /// Project-relative path of the unit
    pub unit_id: String,

    /// Line coverage percentage in `[0, 100]`
    pub coverage: f64,

    /// Lines known to be uncovered. May be empty even when coverage < 100
    /// if the tool does not report line detail.
    pub uncovered_lines: BTreeSet<u32>,
}

impl UnitCoverage {
    pub fn new(
        unit_id: impl Into<String>,
        coverage: f64,
        uncovered_lines: impl IntoIterator<Item = u32>,
    ) -> Self {
        Self {
            unit_id: unit_id.into(),
            coverage: clamp_percentage(coverage),
            uncovered_lines: uncovered_lines.into_iter().collect(),
        }
    }

    /// Build from raw line counts. A unit with nothing to cover counts as
    /// fully covered.
    pub fn from_counts(
        unit_id: impl Into<String>,
        covered: u64,
        total: u64,
        uncovered_lines: impl IntoIterator<Item = u32>,
    ) -> Self {
        let coverage = if total == 0 {
            100.0
        } else {
            percentage(covered, total)
        };
        Self::new(unit_id, coverage, uncovered_lines)
    }

    pub fn is_fully_covered(&self) -> bool {
        self.coverage >= 100.0
    }
}

/// One coverage measurement of the whole project.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CoverageModel {
    total_coverage: f64,
    units: Vec<UnitCoverage>,
}

impl CoverageModel {
    /// Units keep the order given; that order is the prioritizer's tie-break.
    pub fn new(total_coverage: f64, units: Vec<UnitCoverage>) -> Self {
        Self {
            total_coverage: clamp_percentage(total_coverage),
            units,
        }
    }

    pub const fn total_coverage(&self) -> f64 {
        self.total_coverage
    }

    pub fn units(&self) -> &[UnitCoverage] {
        &self.units
    }

    pub fn unit(&self, unit_id: &str) -> Option<&UnitCoverage> {
        self.units.iter().find(|u| u.unit_id == unit_id)
    }

    pub fn unit_coverage(&self, unit_id: &str) -> Option<f64> {
        self.unit(unit_id).map(|u| u.coverage)
    }

    pub fn uncovered_lines(&self, unit_id: &str) -> Option<&BTreeSet<u32>> {
        self.unit(unit_id).map(|u| &u.uncovered_lines)
    }

    /// Units with any coverage gap, in model order.
    pub fn units_below_full(&self) -> impl Iterator<Item = &UnitCoverage> {
        self.units.iter().filter(|u| !u.is_fully_covered())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// `covered / total` as a percentage; zero when there is nothing to measure.
#[allow(clippy::cast_precision_loss)]
pub fn percentage(covered: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    clamp_percentage(covered as f64 / total as f64 * 100.0)
}

fn clamp_percentage(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}
