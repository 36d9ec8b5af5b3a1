#![deny(warnings)]

//! Economic models: period cash flows and return estimates for a mine plan.
//!
//! This module provides validated utilities for:
//! - Revenue and cost of one simulated period
//! - An append-only cash-flow ledger with a running cumulative total
//! - A single-terminal-value IRR approximation

use mine_core::{FinancialSettings, PeriodReport, StockpileState};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// IRR reported when the investment is never recovered.
pub const TOTAL_LOSS_IRR_PERCENT: f64 = -100.0;

/// Errors produced by economic helpers.
#[derive(Debug, Error, PartialEq)]
pub enum EconError {
    /// Compounding over zero periods is undefined.
    #[error("period count must be > 0")]
    InvalidPeriod,
    /// Initial investment must be strictly positive.
    #[error("initial investment must be > 0")]
    InvalidInvestment,
    /// Numeric conversion between float and decimal failed.
    #[error("non-finite numeric conversion for {0}")]
    NonFinite(&'static str),
    /// A money amount left the representable decimal range.
    #[error("decimal overflow computing {0}")]
    Overflow(&'static str),
}

fn to_decimal(name: &'static str, v: f64) -> Result<Decimal, EconError> {
    Decimal::from_f64(v).ok_or(EconError::NonFinite(name))
}

/// Physical outcome of one period, as produced by plant allocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeriodInputs {
    pub period: u32,
    pub processed_mass: f64,
    pub processed_metal: f64,
    pub fresh_ore_mined: f64,
    pub waste_tonnage: f64,
    /// Stockpile left at the end of the period.
    pub stockpile: StockpileState,
}

fn mul(name: &'static str, a: Decimal, b: Decimal) -> Result<Decimal, EconError> {
    a.checked_mul(b).ok_or(EconError::Overflow(name))
}

fn add(name: &'static str, a: Decimal, b: Decimal) -> Result<Decimal, EconError> {
    a.checked_add(b).ok_or(EconError::Overflow(name))
}

/// Value of contained metal after recovery.
fn recovered_value(
    name: &'static str,
    metal: Decimal,
    settings: &FinancialSettings,
) -> Result<Decimal, EconError> {
    mul(name, mul(name, metal, settings.recovery_rate)?, settings.gold_price)
}

/// Price one period.
///
/// Mining cost applies to everything newly excavated (fresh ore plus waste)
/// whether or not it reaches the plant. Material reclaimed from the stockpile
/// only incurs processing cost. Zero tonnage yields an all-zero row.
///
/// Example:
/// 50 t at 5 g/t processed, 200 t waste, recovery 0.9, price 60, mining 4/t,
/// processing 36/t gives revenue 13 500, cost 2 800 and net 10 700.
pub fn compute_period_financials(
    inputs: &PeriodInputs,
    settings: &FinancialSettings,
) -> Result<PeriodReport, EconError> {
    let metal = to_decimal("processed_metal", inputs.processed_metal)?;
    let processed = to_decimal("processed_mass", inputs.processed_mass)?;
    let moved = to_decimal(
        "total_moved",
        inputs.fresh_ore_mined + inputs.waste_tonnage,
    )?;
    let pile_metal = to_decimal("stockpile_metal", inputs.stockpile.metal_content)?;

    let revenue = recovered_value("revenue", metal, settings)?;
    let mining_cost = mul("mining_cost", moved, settings.base_mining_cost)?;
    let processing_cost = mul("processing_cost", processed, settings.processing_cost)?;
    let total_cost = add("total_cost", mining_cost, processing_cost)?;
    let net_cash_flow = revenue
        .checked_sub(total_cost)
        .ok_or(EconError::Overflow("net_cash_flow"))?;
    let stockpile_value = recovered_value("stockpile_value", pile_metal, settings)?;
    let grade = if inputs.processed_mass > 0.0 {
        inputs.processed_metal / inputs.processed_mass
    } else {
        0.0
    };

    Ok(PeriodReport {
        period: inputs.period,
        ore_mined: inputs.fresh_ore_mined,
        waste: inputs.waste_tonnage,
        processed: inputs.processed_mass,
        stockpiled: inputs.stockpile.tonnage,
        grade,
        revenue,
        mining_cost,
        processing_cost,
        total_cost,
        net_cash_flow,
        stockpile_value,
        stockpile_grade: inputs.stockpile.grade(),
    })
}

/// Ordered report rows with a running cumulative cash flow.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CashFlowLedger {
    rows: Vec<PeriodReport>,
    cumulative: Vec<Decimal>,
}

impl CashFlowLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row and return the cumulative cash flow including it.
    ///
    /// On overflow the ledger is left unchanged.
    pub fn push(&mut self, report: PeriodReport) -> Result<Decimal, EconError> {
        let total = add("cumulative_cash_flow", self.cumulative_cash_flow(), report.net_cash_flow)?;
        debug!(period = report.period, net = %report.net_cash_flow, cumulative = %total, "period booked");
        self.rows.push(report);
        self.cumulative.push(total);
        Ok(total)
    }

    pub fn rows(&self) -> &[PeriodReport] {
        &self.rows
    }

    /// Cumulative cash flow after each row.
    pub fn cumulative_series(&self) -> &[Decimal] {
        &self.cumulative
    }

    /// Cumulative cash flow after the last row; zero when empty.
    pub fn cumulative_cash_flow(&self) -> Decimal {
        self.cumulative.last().copied().unwrap_or(Decimal::ZERO)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<PeriodReport> {
        self.rows
    }
}

/// Sum of net cash flows, optionally marking the final stockpile to market.
pub fn terminal_cash_flow(
    reports: &[PeriodReport],
    include_stockpile: bool,
) -> Result<Decimal, EconError> {
    let net = reports
        .iter()
        .try_fold(Decimal::ZERO, |acc, r| add("terminal_cash_flow", acc, r.net_cash_flow))?;
    match reports.last() {
        Some(last) if include_stockpile => add("terminal_cash_flow", net, last.stockpile_value),
        _ => Ok(net),
    }
}

/// Parameters for an IRR estimate over a simulated plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IrrRequest {
    pub initial_investment: Decimal,
    /// Defaults to the number of simulated periods.
    #[serde(default)]
    pub period_count: Option<u32>,
    #[serde(default)]
    pub include_stockpile: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IrrResult {
    pub irr_percent: f64,
    /// Terminal cash flow the estimate was based on.
    pub total_return: Decimal,
    pub initial_investment: Decimal,
    pub period_count: u32,
}

/// Compounding-return approximation of IRR from one terminal value.
///
/// irr = (terminal / investment)^(1/n) − 1, in percent. The timing and sign of
/// intermediate cash flows are ignored. A non-positive terminal value always
/// yields the total-loss sentinel of −100 %.
///
/// Example:
/// let r = estimate_irr(Decimal::new(1000, 0), Decimal::new(1210, 0), 2).unwrap();
/// assert!((r.irr_percent - 10.0).abs() < 1e-9);
pub fn estimate_irr(
    initial_investment: Decimal,
    terminal_cash_flow: Decimal,
    period_count: u32,
) -> Result<IrrResult, EconError> {
    let result = |irr_percent| IrrResult {
        irr_percent,
        total_return: terminal_cash_flow,
        initial_investment,
        period_count,
    };
    if terminal_cash_flow <= Decimal::ZERO {
        return Ok(result(TOTAL_LOSS_IRR_PERCENT));
    }
    if period_count == 0 {
        return Err(EconError::InvalidPeriod);
    }
    if initial_investment <= Decimal::ZERO {
        return Err(EconError::InvalidInvestment);
    }
    let ratio = (terminal_cash_flow / initial_investment)
        .to_f64()
        .ok_or(EconError::NonFinite("return ratio"))?;
    let irr = (ratio.powf(1.0 / period_count as f64) - 1.0) * 100.0;
    if !irr.is_finite() {
        return Err(EconError::NonFinite("irr"));
    }
    Ok(result(irr))
}

/// Estimate IRR for a sequence of period reports.
pub fn irr_for_reports(
    reports: &[PeriodReport],
    request: &IrrRequest,
) -> Result<IrrResult, EconError> {
    let periods = match request.period_count {
        Some(n) => n,
        None => u32::try_from(reports.len()).map_err(|_| EconError::InvalidPeriod)?,
    };
    let terminal = terminal_cash_flow(reports, request.include_stockpile)?;
    estimate_irr(request.initial_investment, terminal, periods)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn settings() -> FinancialSettings {
        FinancialSettings {
            plant_capacity: 50.0,
            gold_price: Decimal::new(60, 0),
            recovery_rate: Decimal::new(9, 1),
            base_mining_cost: Decimal::new(4, 0),
            processing_cost: Decimal::new(36, 0),
        }
    }

    fn inputs(period: u32) -> PeriodInputs {
        PeriodInputs {
            period,
            processed_mass: 50.0,
            processed_metal: 250.0,
            fresh_ore_mined: 50.0,
            waste_tonnage: 200.0,
            stockpile: StockpileState::empty(),
        }
    }

    fn report_with_net(period: u32, net: Decimal) -> PeriodReport {
        let mut r = compute_period_financials(
            &PeriodInputs {
                period,
                processed_mass: 0.0,
                processed_metal: 0.0,
                fresh_ore_mined: 0.0,
                waste_tonnage: 0.0,
                stockpile: StockpileState::empty(),
            },
            &settings(),
        )
        .unwrap();
        r.net_cash_flow = net;
        r
    }

    #[test]
    fn single_period_cash_flow() {
        let r = compute_period_financials(&inputs(1), &settings()).unwrap();
        assert_eq!(r.revenue, Decimal::new(13_500, 0));
        assert_eq!(r.mining_cost, Decimal::new(1_000, 0));
        assert_eq!(r.processing_cost, Decimal::new(1_800, 0));
        assert_eq!(r.total_cost, Decimal::new(2_800, 0));
        assert_eq!(r.net_cash_flow, Decimal::new(10_700, 0));
        assert_eq!(r.grade, 5.0);
        assert_eq!(r.stockpile_value, Decimal::ZERO);
        assert_eq!(r.stockpiled, 0.0);
    }

    #[test]
    fn stockpile_is_marked_to_market() {
        let mut i = inputs(1);
        i.stockpile = StockpileState {
            tonnage: 50.0,
            metal_content: 100.0,
        };
        let r = compute_period_financials(&i, &settings()).unwrap();
        assert_eq!(r.stockpile_value, Decimal::new(5_400, 0));
        assert_eq!(r.stockpile_grade, 2.0);
        assert_eq!(r.net_cash_flow, Decimal::new(10_700, 0));
    }

    #[test]
    fn idle_period_is_all_zero() {
        let r = report_with_net(4, Decimal::ZERO);
        assert_eq!(r.revenue, Decimal::ZERO);
        assert_eq!(r.total_cost, Decimal::ZERO);
        assert_eq!(r.grade, 0.0);
    }

    #[test]
    fn non_finite_quantity_is_rejected() {
        let mut i = inputs(1);
        i.processed_metal = f64::NAN;
        assert_eq!(
            compute_period_financials(&i, &settings()),
            Err(EconError::NonFinite("processed_metal"))
        );
    }

    #[test]
    fn ledger_tracks_cumulative() {
        let mut l = CashFlowLedger::new();
        assert_eq!(l.cumulative_cash_flow(), Decimal::ZERO);
        assert_eq!(l.push(report_with_net(1, Decimal::new(-500, 0))), Ok(Decimal::new(-500, 0)));
        assert_eq!(l.push(report_with_net(2, Decimal::new(700, 0))), Ok(Decimal::new(200, 0)));
        assert_eq!(l.cumulative_series(), &[Decimal::new(-500, 0), Decimal::new(200, 0)]);
        assert_eq!(l.len(), 2);
    }

    #[test]
    fn irr_compounds_terminal_value() {
        let r = estimate_irr(Decimal::new(1000, 0), Decimal::new(1210, 0), 2).unwrap();
        assert!((r.irr_percent - 10.0).abs() < 1e-9);
        assert_eq!(r.total_return, Decimal::new(1210, 0));
        assert_eq!(r.period_count, 2);
    }

    #[test]
    fn irr_configuration_errors() {
        assert_eq!(
            estimate_irr(Decimal::new(1000, 0), Decimal::new(1210, 0), 0),
            Err(EconError::InvalidPeriod)
        );
        assert_eq!(
            estimate_irr(Decimal::ZERO, Decimal::new(1210, 0), 3),
            Err(EconError::InvalidInvestment)
        );
    }

    #[test]
    fn terminal_value_optionally_includes_stockpile() {
        let mut last = report_with_net(2, Decimal::new(300, 0));
        last.stockpile_value = Decimal::new(1_000, 0);
        let reports = vec![report_with_net(1, Decimal::new(-100, 0)), last];
        assert_eq!(terminal_cash_flow(&reports, false), Ok(Decimal::new(200, 0)));
        assert_eq!(terminal_cash_flow(&reports, true), Ok(Decimal::new(1_200, 0)));
        assert_eq!(terminal_cash_flow(&[], true), Ok(Decimal::ZERO));
    }

    #[test]
    fn huge_revenue_is_an_overflow_error() {
        let mut s = settings();
        s.gold_price = Decimal::new(1_000_000_000, 0);
        s.recovery_rate = Decimal::ONE;
        let mut i = inputs(1);
        i.processed_metal = 1e20;
        assert_eq!(
            compute_period_financials(&i, &s),
            Err(EconError::Overflow("revenue"))
        );
    }

    #[test]
    fn ledger_rejects_overflowing_total() {
        let mut l = CashFlowLedger::new();
        l.push(report_with_net(1, Decimal::MAX)).unwrap();
        assert_eq!(
            l.push(report_with_net(2, Decimal::ONE)),
            Err(EconError::Overflow("cumulative_cash_flow"))
        );
        assert_eq!(l.len(), 1);
        assert_eq!(l.cumulative_cash_flow(), Decimal::MAX);
        assert_eq!(
            terminal_cash_flow(&[report_with_net(1, Decimal::MAX), report_with_net(2, Decimal::ONE)], false),
            Err(EconError::Overflow("terminal_cash_flow"))
        );
    }

    #[test]
    fn irr_period_count_defaults_to_reports() {
        let reports = vec![
            report_with_net(1, Decimal::new(600, 0)),
            report_with_net(2, Decimal::new(610, 0)),
        ];
        let req = IrrRequest {
            initial_investment: Decimal::new(1000, 0),
            period_count: None,
            include_stockpile: false,
        };
        let r = irr_for_reports(&reports, &req).unwrap();
        assert_eq!(r.period_count, 2);
        assert!((r.irr_percent - 10.0).abs() < 1e-9);
        let empty = irr_for_reports(&[], &req).unwrap();
        assert_eq!(empty.irr_percent, TOTAL_LOSS_IRR_PERCENT);
    }

    proptest! {
        #[test]
        fn negative_terminal_is_total_loss(inv in -1_000_000i64..1_000_000, n in 0u32..100) {
            let r = estimate_irr(Decimal::new(inv, 0), Decimal::new(-500, 0), n).unwrap();
            prop_assert_eq!(r.irr_percent, TOTAL_LOSS_IRR_PERCENT);
        }

        #[test]
        fn cumulative_is_prefix_sum(nets in proptest::collection::vec(-1_000_000i64..1_000_000, 0..50)) {
            let mut l = CashFlowLedger::new();
            let mut expected = Decimal::ZERO;
            for (i, cents) in nets.iter().enumerate() {
                expected += Decimal::new(*cents, 2);
                let got = l.push(report_with_net(i as u32 + 1, Decimal::new(*cents, 2))).unwrap();
                prop_assert_eq!(got, expected);
            }
            let sum: Decimal = l.rows().iter().map(|r| r.net_cash_flow).sum();
            prop_assert_eq!(l.cumulative_cash_flow(), sum);
        }
    }
}
