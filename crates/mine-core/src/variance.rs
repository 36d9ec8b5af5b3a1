//! Planned-versus-actual tracking for pit phases, stockpiles, ore samples and
//! plant demand.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Lifecycle of a pit phase derived from its removal progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Planned,
    Active,
    Completed,
}

/// Planned and removed tonnage for one mining phase or pushback.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseSchedule {
    pub name: String,
    pub planned_start: Option<NaiveDate>,
    pub planned_end: Option<NaiveDate>,
    pub planned_tonnage: f64,
    pub ore_tonnage: f64,
    pub waste_tonnage: f64,
}

impl PhaseSchedule {
    /// Ore plus waste actually moved.
    pub fn removed_tonnage(&self) -> f64 {
        self.ore_tonnage + self.waste_tonnage
    }

    /// Removal progress in percent, capped at 100 and rounded to 0.1.
    pub fn progress_percent(&self) -> f64 {
        if self.planned_tonnage <= 0.0 {
            return 0.0;
        }
        let pct = (self.removed_tonnage() / self.planned_tonnage * 100.0).min(100.0);
        (pct * 10.0).round() / 10.0
    }

    pub fn status(&self) -> PhaseStatus {
        let p = self.progress_percent();
        if p <= 0.0 {
            PhaseStatus::Planned
        } else if p < 100.0 {
            PhaseStatus::Active
        } else {
            PhaseStatus::Completed
        }
    }

    /// Removed minus planned: positive is overbreak, negative underbreak.
    pub fn variance(&self) -> f64 {
        self.removed_tonnage() - self.planned_tonnage
    }

    pub fn variance_percent(&self) -> Option<f64> {
        if self.planned_tonnage == 0.0 {
            None
        } else {
            Some(self.variance() / self.planned_tonnage * 100.0)
        }
    }

    /// Progress the plan expects by `as_of`, assuming linear removal between
    /// the planned start and end dates.
    pub fn expected_progress_percent(&self, as_of: NaiveDate) -> Option<f64> {
        let (start, end) = (self.planned_start?, self.planned_end?);
        if end <= start {
            return None;
        }
        let total = (end - start).num_days() as f64;
        let elapsed = (as_of - start).num_days() as f64;
        Some((elapsed / total * 100.0).clamp(0.0, 100.0))
    }
}

/// Totals across all phases of a pit.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub total_planned: f64,
    pub total_ore: f64,
    pub total_waste: f64,
    pub total_removed: f64,
    pub total_variance: f64,
    pub active_phases: usize,
    pub completed_phases: usize,
}

pub fn phase_summary(phases: &[PhaseSchedule]) -> PhaseSummary {
    let mut s = PhaseSummary::default();
    for p in phases {
        s.total_planned += p.planned_tonnage;
        s.total_ore += p.ore_tonnage;
        s.total_waste += p.waste_tonnage;
        match p.status() {
            PhaseStatus::Active => s.active_phases += 1,
            PhaseStatus::Completed => s.completed_phases += 1,
            PhaseStatus::Planned => {}
        }
    }
    s.total_removed = s.total_ore + s.total_waste;
    s.total_variance = s.total_removed - s.total_planned;
    s
}

/// Total mined production against total plant demand.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductionVsDemand {
    pub total_production: f64,
    pub total_demand: f64,
}

impl ProductionVsDemand {
    /// Sum production record tonnages and plant demand requirements.
    pub fn from_records<P, D>(production: P, demand: D) -> Self
    where
        P: IntoIterator<Item = f64>,
        D: IntoIterator<Item = f64>,
    {
        Self {
            total_production: production.into_iter().sum(),
            total_demand: demand.into_iter().sum(),
        }
    }

    /// Production minus demand; negative means the plant was short of feed.
    pub fn surplus(&self) -> f64 {
        self.total_production - self.total_demand
    }

    pub fn coverage_percent(&self) -> Option<f64> {
        if self.total_demand > 0.0 {
            Some(self.total_production / self.total_demand * 100.0)
        } else {
            None
        }
    }
}

/// Surveyed versus projected tonnage for a named stockpile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StockpileForecast {
    pub name: String,
    pub current_tonnage: f64,
    pub projected_tonnage: f64,
    pub grade: Option<f64>,
}

impl StockpileForecast {
    pub fn variance(&self) -> f64 {
        self.current_tonnage - self.projected_tonnage
    }

    /// Zero when nothing was projected.
    pub fn variance_percent(&self) -> f64 {
        if self.projected_tonnage == 0.0 {
            0.0
        } else {
            self.variance() / self.projected_tonnage * 100.0
        }
    }
}

/// Expected versus sampled grade and tonnage for a phase.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GradeTonnageVariance {
    pub expected_grade: f64,
    pub actual_grade: f64,
    pub variance_grade: f64,
    pub expected_tonnage: f64,
    pub actual_tonnage: f64,
    pub variance_tonnage: f64,
}

impl GradeTonnageVariance {
    /// Build from ore samples given as `(tonnage, grade)` pairs.
    pub fn from_samples<I>(expected_grade: f64, expected_tonnage: f64, samples: I) -> Self
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let (mut tonnage, mut metal) = (0.0, 0.0);
        for (t, g) in samples {
            tonnage += t;
            metal += t * g;
        }
        let actual_grade = if tonnage > 0.0 { metal / tonnage } else { 0.0 };
        Self {
            expected_grade,
            actual_grade,
            variance_grade: actual_grade - expected_grade,
            expected_tonnage,
            actual_tonnage: tonnage,
            variance_tonnage: tonnage - expected_tonnage,
        }
    }
}
