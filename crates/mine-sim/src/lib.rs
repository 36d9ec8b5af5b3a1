#![deny(warnings)]

//! Period-by-period plant feed simulation.
//!
//! Each period ranks the freshly mined ore bands together with the carried
//! stockpile by grade, fills plant capacity greedily, sends the leftovers to a
//! new blended stockpile and prices the outcome. Periods form a strict
//! sequential fold over the stockpile state.

use mine_core::{
    validate_period_material, validate_scenario, validate_settings, validate_stockpile,
    FinancialSettings, GradeBand, Parcel, PeriodMaterial, PeriodReport, ScenarioContext,
    StockpileState, ValidationError,
};
use mine_econ::{
    compute_period_financials, irr_for_reports, CashFlowLedger, EconError, IrrRequest, IrrResult,
    PeriodInputs,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error, PartialEq)]
pub enum SimError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Econ(#[from] EconError),
    /// Periods must arrive in consecutive increasing order.
    #[error("expected period {expected}, got {found}")]
    OutOfSequence { expected: u32, found: u32 },
    /// The run already simulated the last representable period index.
    #[error("no period can follow {last}, got {found}")]
    SequenceExhausted { last: u32, found: u32 },
    #[error("cannot fingerprint scenario: {0}")]
    Fingerprint(String),
}

/// Where a plant feed candidate comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedSource {
    Band(GradeBand),
    Stockpile,
}

/// Tonnage drawn into the plant from one source.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedDraw {
    pub source: FeedSource,
    pub tonnage: f64,
    pub grade: f64,
}

/// Result of filling the plant for one period.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub processed_mass: f64,
    pub processed_metal: f64,
    /// Replaces the carried-in stockpile.
    pub stockpile: StockpileState,
    /// High + medium + low tonnage mined this period.
    pub fresh_ore_mined: f64,
    /// Plant feed in the order it was drawn.
    pub feed: Vec<FeedDraw>,
}

/// Validate inputs, then allocate one period.
pub fn allocate(
    period: &PeriodMaterial,
    carried: StockpileState,
    plant_capacity: f64,
) -> Result<Allocation, SimError> {
    validate_period_material(period)?;
    validate_stockpile(&carried)?;
    if !plant_capacity.is_finite() {
        return Err(ValidationError::NonFinite("plant_capacity").into());
    }
    Ok(fill_plant(period, carried, plant_capacity))
}

/// Greedy highest-grade-first fill of plant capacity.
///
/// Candidates are sorted by grade with a stable sort, so equal grades keep
/// the order High, Medium, Low, Stockpile. Whatever is not drawn, including
/// partial batches, is blended into the next stockpile.
fn fill_plant(period: &PeriodMaterial, carried: StockpileState, plant_capacity: f64) -> Allocation {
    let mut candidates: Vec<FeedDraw> = period
        .bands
        .batches()
        .filter(|b| b.tonnage > 0.0)
        .map(|b| FeedDraw {
            source: FeedSource::Band(b.grade_band),
            tonnage: b.tonnage,
            grade: b.grade,
        })
        .collect();
    if carried.tonnage > 0.0 {
        candidates.push(FeedDraw {
            source: FeedSource::Stockpile,
            tonnage: carried.tonnage,
            grade: carried.grade(),
        });
    }
    candidates.sort_by(|a, b| b.grade.total_cmp(&a.grade));

    let mut remaining = plant_capacity.max(0.0);
    let mut processed_mass = 0.0;
    let mut processed_metal = 0.0;
    let mut feed = Vec::with_capacity(candidates.len());
    let mut leftovers = Vec::with_capacity(candidates.len());
    for c in candidates {
        let taken = c.tonnage.min(remaining);
        if taken > 0.0 {
            processed_mass += taken;
            processed_metal += taken * c.grade;
            remaining -= taken;
            feed.push(FeedDraw { tonnage: taken, ..c });
        }
        let left = c.tonnage - taken;
        if left > 0.0 {
            leftovers.push(Parcel {
                tonnage: left,
                grade: c.grade,
            });
        }
    }

    Allocation {
        processed_mass,
        processed_metal,
        stockpile: carried.blend(leftovers),
        fresh_ore_mined: period.fresh_ore_tonnage(),
        feed,
    }
}

/// Full output of one simulation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub periods: Vec<PeriodReport>,
    /// Cumulative cash flow after each period.
    pub cumulative_series: Vec<Decimal>,
    pub cumulative_cash_flow: Decimal,
    /// Terminal stockpile inventory.
    pub final_stockpile: StockpileState,
    pub total_processed: f64,
    pub total_revenue: Decimal,
}

impl SimulationReport {
    /// IRR estimate over this run's cash flows.
    pub fn irr(&self, request: &IrrRequest) -> Result<IrrResult, EconError> {
        irr_for_reports(&self.periods, request)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Sequence {
    Start,
    Next(u32),
    Exhausted,
}

/// Incremental simulation that enforces period sequencing.
#[derive(Clone, Debug)]
pub struct SimulationRun {
    settings: FinancialSettings,
    stockpile: StockpileState,
    sequence: Sequence,
    ledger: CashFlowLedger,
    total_processed: f64,
    total_revenue: Decimal,
}

impl SimulationRun {
    pub fn new(settings: FinancialSettings) -> Result<Self, SimError> {
        validate_settings(&settings)?;
        if settings.plant_capacity <= 0.0 {
            warn!(
                capacity = settings.plant_capacity,
                "plant capacity is not positive; all ore goes to stockpile"
            );
        }
        Ok(Self {
            settings,
            stockpile: StockpileState::empty(),
            sequence: Sequence::Start,
            ledger: CashFlowLedger::new(),
            total_processed: 0.0,
            total_revenue: Decimal::ZERO,
        })
    }

    /// Stockpile carried into the next period.
    pub fn stockpile(&self) -> StockpileState {
        self.stockpile
    }

    pub fn cumulative_cash_flow(&self) -> Decimal {
        self.ledger.cumulative_cash_flow()
    }

    /// Simulate the next period. The first call fixes the starting index;
    /// every later call must supply exactly the following index.
    pub fn advance(&mut self, period: &PeriodMaterial) -> Result<&PeriodReport, SimError> {
        match self.sequence {
            Sequence::Start => {}
            Sequence::Next(expected) if period.period != expected => {
                return Err(SimError::OutOfSequence {
                    expected,
                    found: period.period,
                });
            }
            Sequence::Next(_) => {}
            Sequence::Exhausted => {
                return Err(SimError::SequenceExhausted {
                    last: u32::MAX,
                    found: period.period,
                });
            }
        }
        validate_period_material(period)?;
        let alloc = fill_plant(period, self.stockpile, self.settings.plant_capacity);
        let report = compute_period_financials(
            &PeriodInputs {
                period: period.period,
                processed_mass: alloc.processed_mass,
                processed_metal: alloc.processed_metal,
                fresh_ore_mined: alloc.fresh_ore_mined,
                waste_tonnage: period.waste_tonnage,
                stockpile: alloc.stockpile,
            },
            &self.settings,
        )?;
        debug!(
            period = period.period,
            processed = alloc.processed_mass,
            stockpiled = alloc.stockpile.tonnage,
            "period allocated"
        );
        let total_revenue = self
            .total_revenue
            .checked_add(report.revenue)
            .ok_or(EconError::Overflow("total_revenue"))?;
        self.ledger.push(report)?;
        self.total_revenue = total_revenue;
        self.stockpile = alloc.stockpile;
        self.total_processed += alloc.processed_mass;
        self.sequence = period
            .period
            .checked_add(1)
            .map_or(Sequence::Exhausted, Sequence::Next);
        let rows = self.ledger.rows();
        Ok(&rows[rows.len() - 1])
    }

    pub fn finish(self) -> SimulationReport {
        let cumulative_series = self.ledger.cumulative_series().to_vec();
        let cumulative_cash_flow = self.ledger.cumulative_cash_flow();
        SimulationReport {
            periods: self.ledger.into_rows(),
            cumulative_series,
            cumulative_cash_flow,
            final_stockpile: self.stockpile,
            total_processed: self.total_processed,
            total_revenue: self.total_revenue,
        }
    }
}

/// Simulate every period of a ledger in order.
///
/// All inputs are validated before the first period is computed, so a bad
/// record never produces a partial report.
pub fn run_simulation(
    ledger: &[PeriodMaterial],
    settings: &FinancialSettings,
) -> Result<SimulationReport, SimError> {
    for p in ledger {
        validate_period_material(p)?;
    }
    let mut run = SimulationRun::new(settings.clone())?;
    for p in ledger {
        run.advance(p)?;
    }
    let report = run.finish();
    info!(
        periods = report.periods.len(),
        cumulative = %report.cumulative_cash_flow,
        terminal_stockpile = report.final_stockpile.tonnage,
        "simulation complete"
    );
    Ok(report)
}

/// Validate a scenario and simulate the ledger with its settings.
pub fn run_scenario(
    ctx: &ScenarioContext,
    ledger: &[PeriodMaterial],
) -> Result<SimulationReport, SimError> {
    validate_scenario(ctx)?;
    run_simulation(ledger, &ctx.settings)
}

/// Hash of the inputs that determine a run's output.
pub fn fingerprint(settings: &FinancialSettings, ledger: &[PeriodMaterial]) -> Result<u64, SimError> {
    let bytes = serde_json::to_vec(&(settings, ledger))
        .map_err(|e| SimError::Fingerprint(e.to_string()))?;
    Ok(xxhash_rust::xxh3::xxh3_64(&bytes))
}

/// Memoized simulation results keyed by scenario id and input fingerprint.
///
/// Not synchronized: callers sharing one cache across threads must wrap it
/// in a lock, which also serializes settings updates against runs.
#[derive(Debug, Default)]
pub struct ReportCache {
    entries: HashMap<(String, u64), Arc<SimulationReport>>,
}

impl ReportCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached report for these inputs, running the simulation on a miss.
    pub fn get_or_run(
        &mut self,
        ctx: &ScenarioContext,
        ledger: &[PeriodMaterial],
    ) -> Result<Arc<SimulationReport>, SimError> {
        let key = (ctx.scenario_id.clone(), fingerprint(&ctx.settings, ledger)?);
        if let Some(hit) = self.entries.get(&key) {
            debug!(scenario = %ctx.scenario_id, "report cache hit");
            return Ok(Arc::clone(hit));
        }
        let report = Arc::new(run_scenario(ctx, ledger)?);
        self.entries.insert(key, Arc::clone(&report));
        Ok(report)
    }

    /// Drop every cached report for a scenario.
    pub fn invalidate(&mut self, scenario_id: &str) {
        self.entries.retain(|(id, _), _| id != scenario_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
