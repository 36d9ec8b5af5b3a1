#![deny(warnings)]

//! Headless CLI: simulate plant feed and cash flow for a mine schedule.

use anyhow::{bail, Context, Result};
use mine_core::{FinancialSettings, GradeThresholds, PeriodReport, ScenarioContext};
use mine_econ::{IrrRequest, IrrResult};
use mine_ledger::{build_ledger_bounded, read_schedule, ColumnMapping, DEFAULT_MAX_PERIOD_SPAN};
use mine_sim::{run_scenario, SimulationReport};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct Args {
    schedule: Option<PathBuf>,
    scenario: Option<PathBuf>,
    mapping: Option<PathBuf>,
    investment: Option<Decimal>,
    periods: Option<u32>,
    include_stockpile: bool,
    json: bool,
    export: Option<PathBuf>,
    max_span: Option<u32>,
}

fn parse_args<I: IntoIterator<Item = String>>(argv: I) -> Result<Args> {
    let mut args = Args::default();
    let mut it = argv.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--schedule" => args.schedule = it.next().map(PathBuf::from),
            "--scenario" => args.scenario = it.next().map(PathBuf::from),
            "--mapping" => args.mapping = it.next().map(PathBuf::from),
            "--export" => args.export = it.next().map(PathBuf::from),
            "--investment" => {
                let raw = it.next().unwrap_or_default();
                args.investment = Some(
                    raw.parse::<Decimal>()
                        .with_context(|| format!("invalid --investment '{raw}'"))?,
                );
            }
            "--periods" => {
                let raw = it.next().unwrap_or_default();
                args.periods = Some(
                    raw.parse::<u32>()
                        .with_context(|| format!("invalid --periods '{raw}'"))?,
                );
            }
            "--max-span" => {
                let raw = it.next().unwrap_or_default();
                args.max_span = Some(
                    raw.parse::<u32>()
                        .with_context(|| format!("invalid --max-span '{raw}'"))?,
                );
            }
            "--include-stockpile" => args.include_stockpile = true,
            "--json" => args.json = true,
            other => bail!("unknown argument '{other}'"),
        }
    }
    if args.investment.is_none() && (args.periods.is_some() || args.include_stockpile) {
        bail!("--periods and --include-stockpile only apply to IRR; pass --investment too");
    }
    Ok(args)
}

fn load_scenario(path: Option<&Path>) -> Result<ScenarioContext> {
    let Some(path) = path else {
        return Ok(ScenarioContext {
            scenario_id: "default".to_string(),
            settings: FinancialSettings::default(),
            thresholds: GradeThresholds::default(),
        });
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading scenario {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing scenario {}", path.display()))
}

fn load_mapping(path: Option<&Path>) -> Result<ColumnMapping> {
    match path {
        None => Ok(ColumnMapping::default()),
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading column mapping {}", path.display()))?;
            Ok(ColumnMapping::from_yaml_str(&text)?)
        }
    }
}

fn export_csv(path: &Path, report: &SimulationReport) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    wtr.write_record([
        "period",
        "ore_mined",
        "waste",
        "processed",
        "stockpiled",
        "grade",
        "revenue",
        "mining_cost",
        "processing_cost",
        "total_cost",
        "net_cash_flow",
        "cumulative_cash_flow",
        "stockpile_value",
        "stockpile_grade",
    ])?;
    for (r, cum) in report.periods.iter().zip(&report.cumulative_series) {
        wtr.write_record([
            r.period.to_string(),
            r.ore_mined.to_string(),
            r.waste.to_string(),
            r.processed.to_string(),
            r.stockpiled.to_string(),
            r.grade.to_string(),
            r.revenue.round_dp(2).to_string(),
            r.mining_cost.round_dp(2).to_string(),
            r.processing_cost.round_dp(2).to_string(),
            r.total_cost.round_dp(2).to_string(),
            r.net_cash_flow.round_dp(2).to_string(),
            cum.round_dp(2).to_string(),
            r.stockpile_value.round_dp(2).to_string(),
            r.stockpile_grade.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

fn print_row(r: &PeriodReport, cumulative: Decimal) {
    println!(
        "{:>6} {:>12.0} {:>12.0} {:>12.0} {:>12.0} {:>6.2} {:>14} {:>14} {:>14} {:>14}",
        r.period,
        r.ore_mined,
        r.waste,
        r.processed,
        r.stockpiled,
        r.grade,
        r.revenue.round_dp(0),
        r.total_cost.round_dp(0),
        r.net_cash_flow.round_dp(0),
        cumulative.round_dp(0),
    );
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    scenario_id: &'a str,
    report: &'a SimulationReport,
    irr: Option<&'a IrrResult>,
}

fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    info!(?args, "starting mine-report");

    let Some(schedule_path) = args.schedule.as_deref() else {
        bail!("--schedule <file.csv> is required");
    };
    let ctx = load_scenario(args.scenario.as_deref())?;
    let mapping = load_mapping(args.mapping.as_deref())?;

    let file = fs::File::open(schedule_path)
        .with_context(|| format!("opening schedule {}", schedule_path.display()))?;
    let rows = read_schedule(file, &mapping)?;
    let ledger = build_ledger_bounded(
        &rows,
        &ctx.thresholds,
        args.max_span.unwrap_or(DEFAULT_MAX_PERIOD_SPAN),
    )?;
    let report = run_scenario(&ctx, &ledger)?;

    let irr = match args.investment {
        Some(initial_investment) => Some(report.irr(&IrrRequest {
            initial_investment,
            period_count: args.periods,
            include_stockpile: args.include_stockpile,
        })?),
        None => None,
    };

    if let Some(path) = args.export.as_deref() {
        export_csv(path, &report)?;
        info!(path = %path.display(), "report exported");
    }

    if args.json {
        let out = JsonOutput {
            scenario_id: &ctx.scenario_id,
            report: &report,
            irr: irr.as_ref(),
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!(
        "{:>6} {:>12} {:>12} {:>12} {:>12} {:>6} {:>14} {:>14} {:>14} {:>14}",
        "period", "ore", "waste", "processed", "stockpile", "grade", "revenue", "cost", "net", "cumulative"
    );
    for (r, cum) in report.periods.iter().zip(&report.cumulative_series) {
        print_row(r, *cum);
    }
    println!(
        "Scenario {} | periods: {} | processed: {:.0} t | revenue: {} | cumulative: {} | stockpile: {:.0} t @ {:.2} g/t",
        ctx.scenario_id,
        report.periods.len(),
        report.total_processed,
        report.total_revenue.round_dp(2),
        report.cumulative_cash_flow.round_dp(2),
        report.final_stockpile.tonnage,
        report.final_stockpile.grade(),
    );
    if let Some(irr) = irr {
        println!(
            "IRR {:.2}% over {} periods | return: {} | investment: {}",
            irr.irr_percent,
            irr.period_count,
            irr.total_return.round_dp(2),
            irr.initial_investment
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn irr_flags_require_investment() {
        assert!(parse_args(argv(&["--schedule", "s.csv", "--periods", "4"])).is_err());
        assert!(parse_args(argv(&["--schedule", "s.csv", "--include-stockpile"])).is_err());
        let args = parse_args(argv(&[
            "--schedule",
            "s.csv",
            "--investment",
            "1000",
            "--periods",
            "4",
            "--include-stockpile",
        ]))
        .unwrap();
        assert_eq!(args.investment, Some(Decimal::new(1000, 0)));
        assert_eq!(args.periods, Some(4));
        assert!(args.include_stockpile);
    }

    #[test]
    fn max_span_is_parsed() {
        let args = parse_args(argv(&["--max-span", "120"])).unwrap();
        assert_eq!(args.max_span, Some(120));
        assert!(parse_args(argv(&["--max-span", "lots"])).is_err());
    }
}
