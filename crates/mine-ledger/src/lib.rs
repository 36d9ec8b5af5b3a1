#![deny(warnings)]

//! Material ledger: turns raw schedule rows into dense, per-period ore band totals.
//!
//! Rows arrive either already parsed or as CSV resolved through an explicit
//! [`ColumnMapping`]. Classification into grade bands is driven by
//! [`GradeThresholds`] so cut-offs stay a scenario setting.

use mine_core::{
    validate_quantity, validate_thresholds, GradeBand, GradeThresholds, OreBands, PeriodMaterial,
    ValidationError,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use thiserror::Error;
use tracing::{debug, info};

/// Column mapping schema version understood by this crate.
pub const MAPPING_VERSION: u32 = 1;

/// Largest number of periods (first through last, gaps included) a ledger may span.
pub const DEFAULT_MAX_PERIOD_SPAN: u32 = 10_000;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("no column named '{header}' for field '{field}'")]
    UnmappedColumn { field: &'static str, header: String },
    #[error("unsupported column mapping version {0}")]
    UnsupportedMappingVersion(u32),
    #[error("invalid column mapping: {0}")]
    InvalidMapping(String),
    #[error("line {line}: cannot parse {field} from '{value}'")]
    Parse {
        line: u64,
        field: &'static str,
        value: String,
    },
    #[error("csv error: {0}")]
    Csv(String),
    /// Guards the dense gap fill against a mistyped period index.
    #[error("periods {first}..={last} span more than {max} periods")]
    PeriodSpanTooLarge { first: u32, last: u32, max: u32 },
}

impl From<csv::Error> for LedgerError {
    fn from(e: csv::Error) -> Self {
        LedgerError::Csv(e.to_string())
    }
}

/// One line of an uploaded mine schedule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub period: u32,
    pub material_label: String,
    pub tonnage: f64,
    pub grade: f64,
}

/// Map a material label and grade to a band.
///
/// Any label containing "waste" (case-insensitive) is waste whatever its
/// grade; everything else is classified by grade alone.
pub fn classify(label: &str, grade: f64, thresholds: &GradeThresholds) -> GradeBand {
    if label.to_ascii_lowercase().contains("waste") {
        GradeBand::Waste
    } else {
        thresholds.band_for_grade(grade)
    }
}

/// Header names for each schedule field, versioned so stored mappings can evolve.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    pub version: u32,
    pub period: String,
    pub material: String,
    pub tonnage: String,
    pub grade: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            version: MAPPING_VERSION,
            period: "period".to_string(),
            material: "material".to_string(),
            tonnage: "tonnage".to_string(),
            grade: "grade".to_string(),
        }
    }
}

/// Column indices resolved against a concrete header row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedColumns {
    pub period: usize,
    pub material: usize,
    pub tonnage: usize,
    pub grade: usize,
}

impl ColumnMapping {
    pub fn from_yaml_str(text: &str) -> Result<Self, LedgerError> {
        let m: ColumnMapping =
            serde_yaml::from_str(text).map_err(|e| LedgerError::InvalidMapping(e.to_string()))?;
        m.check_version()?;
        Ok(m)
    }

    fn check_version(&self) -> Result<(), LedgerError> {
        if self.version != MAPPING_VERSION {
            return Err(LedgerError::UnsupportedMappingVersion(self.version));
        }
        Ok(())
    }

    /// Find each mapped header (trimmed, case-insensitive) in `headers`.
    pub fn resolve(&self, headers: &csv::StringRecord) -> Result<ResolvedColumns, LedgerError> {
        self.check_version()?;
        let find = |field: &'static str, name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name.trim()))
                .ok_or_else(|| LedgerError::UnmappedColumn {
                    field,
                    header: name.to_string(),
                })
        };
        Ok(ResolvedColumns {
            period: find("period", &self.period)?,
            material: find("material", &self.material)?,
            tonnage: find("tonnage", &self.tonnage)?,
            grade: find("grade", &self.grade)?,
        })
    }
}

fn field<'a>(record: &'a csv::StringRecord, idx: usize) -> &'a str {
    record.get(idx).map(str::trim).unwrap_or("")
}

fn parse_f64(line: u64, name: &'static str, raw: &str) -> Result<f64, LedgerError> {
    raw.parse::<f64>().map_err(|_| LedgerError::Parse {
        line,
        field: name,
        value: raw.to_string(),
    })
}

/// Read schedule rows from CSV with a header row.
///
/// Waste rows may leave the grade cell blank; every other blank or malformed
/// numeric cell is an error.
pub fn read_schedule<R: Read>(
    reader: R,
    mapping: &ColumnMapping,
) -> Result<Vec<ScheduleRow>, LedgerError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let cols = mapping.resolve(rdr.headers()?)?;
    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let period_raw = field(&record, cols.period);
        let period = period_raw.parse::<u32>().map_err(|_| LedgerError::Parse {
            line,
            field: "period",
            value: period_raw.to_string(),
        })?;
        let label = field(&record, cols.material).to_string();
        let tonnage = parse_f64(line, "tonnage", field(&record, cols.tonnage))?;
        let grade_raw = field(&record, cols.grade);
        let grade = if grade_raw.is_empty() && label.to_ascii_lowercase().contains("waste") {
            0.0
        } else {
            parse_f64(line, "grade", grade_raw)?
        };
        rows.push(ScheduleRow {
            period,
            material_label: label,
            tonnage,
            grade,
        });
    }
    debug!(rows = rows.len(), "read schedule");
    Ok(rows)
}

#[derive(Default)]
struct PeriodAccum {
    waste: f64,
    // (tonnage, metal) per ore band
    low: (f64, f64),
    medium: (f64, f64),
    high: (f64, f64),
}

impl PeriodAccum {
    fn add(&mut self, band: GradeBand, tonnage: f64, grade: f64) {
        let slot = match band {
            GradeBand::Waste => {
                self.waste += tonnage;
                return;
            }
            GradeBand::Low => &mut self.low,
            GradeBand::Medium => &mut self.medium,
            GradeBand::High => &mut self.high,
        };
        slot.0 += tonnage;
        slot.1 += tonnage * grade;
    }

    fn finish(self, period: u32) -> PeriodMaterial {
        let totals = |(t, m): (f64, f64)| mine_core::BandTotals {
            tonnage: t,
            grade: if t > 0.0 { m / t } else { 0.0 },
        };
        PeriodMaterial {
            period,
            waste_tonnage: self.waste,
            bands: OreBands {
                low: totals(self.low),
                medium: totals(self.medium),
                high: totals(self.high),
            },
        }
    }
}

/// Group rows into one record per period, filling gaps with empty periods.
///
/// Every row is validated before any grouping happens. The ledger may span at
/// most [`DEFAULT_MAX_PERIOD_SPAN`] periods.
pub fn build_ledger(
    rows: &[ScheduleRow],
    thresholds: &GradeThresholds,
) -> Result<Vec<PeriodMaterial>, LedgerError> {
    build_ledger_bounded(rows, thresholds, DEFAULT_MAX_PERIOD_SPAN)
}

/// [`build_ledger`] with an explicit limit on the number of periods spanned.
pub fn build_ledger_bounded(
    rows: &[ScheduleRow],
    thresholds: &GradeThresholds,
    max_span: u32,
) -> Result<Vec<PeriodMaterial>, LedgerError> {
    validate_thresholds(thresholds)?;
    for r in rows {
        validate_quantity(r.period, r.tonnage, r.grade)?;
    }
    let mut by_period: BTreeMap<u32, PeriodAccum> = BTreeMap::new();
    for r in rows {
        let band = classify(&r.material_label, r.grade, thresholds);
        by_period
            .entry(r.period)
            .or_default()
            .add(band, r.tonnage, r.grade);
    }
    let (first, last) = match (by_period.keys().next(), by_period.keys().next_back()) {
        (Some(&f), Some(&l)) => (f, l),
        _ => return Ok(Vec::new()),
    };
    if u64::from(last - first) + 1 > u64::from(max_span) {
        return Err(LedgerError::PeriodSpanTooLarge {
            first,
            last,
            max: max_span,
        });
    }
    let ledger: Vec<PeriodMaterial> = (first..=last)
        .map(|p| match by_period.remove(&p) {
            Some(acc) => acc.finish(p),
            None => PeriodMaterial::empty(p),
        })
        .collect();
    info!(
        rows = rows.len(),
        periods = ledger.len(),
        first,
        last,
        "built material ledger"
    );
    Ok(ledger)
}
