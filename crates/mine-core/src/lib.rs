#![deny(warnings)]

//! Core domain models and invariants for mine production reporting.
//!
//! This crate defines the serializable types shared by the ledger, the
//! allocation engine and the financial calculator, plus validation helpers
//! that reject physically meaningless inputs before any period is simulated.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod variance;

/// Grade-band classification of mined material.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradeBand {
    /// Material with no economic metal content; never processed.
    Waste,
    /// Ore below the medium threshold.
    Low,
    /// Ore between the medium and high thresholds.
    Medium,
    /// Ore at or above the high threshold.
    High,
}

impl GradeBand {
    /// Ore bands in plant feed priority order.
    pub const ORE: [GradeBand; 3] = [GradeBand::High, GradeBand::Medium, GradeBand::Low];
}

/// Cut-off grades (g/t) separating the ore bands.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GradeThresholds {
    /// Lowest grade classified as medium.
    pub medium_min: f64,
    /// Lowest grade classified as high.
    pub high_min: f64,
}

impl Default for GradeThresholds {
    fn default() -> Self {
        Self {
            medium_min: 1.5,
            high_min: 3.5,
        }
    }
}

impl GradeThresholds {
    /// Classify an ore grade. Waste is decided by label, never by grade.
    pub fn band_for_grade(&self, grade: f64) -> GradeBand {
        if grade >= self.high_min {
            GradeBand::High
        } else if grade >= self.medium_min {
            GradeBand::Medium
        } else {
            GradeBand::Low
        }
    }
}

/// A quantity of material with a uniform grade.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaterialBatch {
    pub grade_band: GradeBand,
    /// Mass in tonnes (>= 0).
    pub tonnage: f64,
    /// Gold grade in g/t (>= 0, always 0 for waste).
    pub grade: f64,
}

/// Tonnage and tonnage-weighted grade for one ore band in one period.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BandTotals {
    pub tonnage: f64,
    pub grade: f64,
}

impl BandTotals {
    /// Contained metal (tonnes × g/t).
    pub fn metal(&self) -> f64 {
        self.tonnage * self.grade
    }
}

/// Per-band totals for the three ore bands of a period.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OreBands {
    pub low: BandTotals,
    pub medium: BandTotals,
    pub high: BandTotals,
}

impl OreBands {
    /// Totals for an ore band; waste has none.
    pub fn get(&self, band: GradeBand) -> Option<&BandTotals> {
        match band {
            GradeBand::Waste => None,
            GradeBand::Low => Some(&self.low),
            GradeBand::Medium => Some(&self.medium),
            GradeBand::High => Some(&self.high),
        }
    }

    pub fn get_mut(&mut self, band: GradeBand) -> Option<&mut BandTotals> {
        match band {
            GradeBand::Waste => None,
            GradeBand::Low => Some(&mut self.low),
            GradeBand::Medium => Some(&mut self.medium),
            GradeBand::High => Some(&mut self.high),
        }
    }

    /// Ore tonnage across all bands.
    pub fn total_tonnage(&self) -> f64 {
        self.low.tonnage + self.medium.tonnage + self.high.tonnage
    }

    /// Ore bands as batches, in priority order High, Medium, Low.
    pub fn batches(&self) -> impl Iterator<Item = MaterialBatch> + '_ {
        GradeBand::ORE.into_iter().filter_map(move |band| {
            self.get(band).map(|t| MaterialBatch {
                grade_band: band,
                tonnage: t.tonnage,
                grade: t.grade,
            })
        })
    }
}

/// Normalized material movement for one schedule period.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodMaterial {
    pub period: u32,
    pub waste_tonnage: f64,
    pub bands: OreBands,
}

impl PeriodMaterial {
    /// A period in which nothing was scheduled.
    pub fn empty(period: u32) -> Self {
        Self {
            period,
            ..Self::default()
        }
    }

    /// Freshly mined ore tonnage (excludes waste).
    pub fn fresh_ore_tonnage(&self) -> f64 {
        self.bands.total_tonnage()
    }
}

/// Tonnage and grade of a leftover handed to the stockpile.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parcel {
    pub tonnage: f64,
    pub grade: f64,
}

/// Carried-forward ore inventory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StockpileState {
    /// Mass in tonnes.
    pub tonnage: f64,
    /// Accumulated tonnage × grade.
    pub metal_content: f64,
}

impl StockpileState {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Blended grade of the pile; 0 for an empty pile.
    pub fn grade(&self) -> f64 {
        if self.tonnage > 0.0 {
            self.metal_content / self.tonnage
        } else {
            0.0
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tonnage <= 0.0
    }

    /// Replace this pile with one built from the period's leftovers.
    ///
    /// The old state is consumed: anything still in it must have been offered
    /// to the plant as a candidate and come back through `remainders`.
    pub fn blend<I>(self, remainders: I) -> StockpileState
    where
        I: IntoIterator<Item = Parcel>,
    {
        let mut next = StockpileState::empty();
        for p in remainders {
            if p.tonnage > 0.0 {
                next.tonnage += p.tonnage;
                next.metal_content += p.tonnage * p.grade.max(0.0);
            }
        }
        if next.tonnage <= 0.0 {
            return StockpileState::empty();
        }
        next
    }
}

/// Financial parameters for one scenario.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FinancialSettings {
    /// Plant throughput per period in tonnes. Non-positive means nothing is processed.
    pub plant_capacity: f64,
    /// Price per gram of recovered gold.
    pub gold_price: Decimal,
    /// Fraction of contained metal recovered, in [0,1].
    pub recovery_rate: Decimal,
    /// Cost per tonne moved (ore + waste).
    pub base_mining_cost: Decimal,
    /// Cost per tonne processed.
    pub processing_cost: Decimal,
}

impl Default for FinancialSettings {
    fn default() -> Self {
        Self {
            plant_capacity: 23_400.0,
            gold_price: Decimal::new(60, 0),
            recovery_rate: Decimal::new(9, 1),
            base_mining_cost: Decimal::new(4, 0),
            processing_cost: Decimal::new(36, 0),
        }
    }
}

/// Everything one simulation run needs besides the ledger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioContext {
    pub scenario_id: String,
    pub settings: FinancialSettings,
    #[serde(default)]
    pub thresholds: GradeThresholds,
}

/// Outcome of one simulated period.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeriodReport {
    pub period: u32,
    /// Fresh ore tonnage mined this period.
    pub ore_mined: f64,
    /// Waste tonnage mined this period.
    pub waste: f64,
    /// Tonnage fed to the plant.
    pub processed: f64,
    /// Tonnage left on the stockpile at period end.
    pub stockpiled: f64,
    /// Average grade of plant feed (g/t).
    pub grade: f64,
    pub revenue: Decimal,
    pub mining_cost: Decimal,
    pub processing_cost: Decimal,
    pub total_cost: Decimal,
    pub net_cash_flow: Decimal,
    /// Mark-to-market value of the stockpile, not realized cash.
    pub stockpile_value: Decimal,
    pub stockpile_grade: f64,
}

impl PeriodReport {
    /// Waste tonnes per ore tonne; `None` when no ore was mined.
    pub fn stripping_ratio(&self) -> Option<f64> {
        if self.ore_mined > 0.0 {
            Some(self.waste / self.ore_mined)
        } else {
            None
        }
    }
}

/// Validation errors for domain invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Tonnage must be non-negative.
    #[error("negative tonnage {tonnage} in period {period}")]
    NegativeTonnage { period: u32, tonnage: f64 },
    /// Grade must be non-negative.
    #[error("negative grade {grade} in period {period}")]
    NegativeGrade { period: u32, grade: f64 },
    /// Numeric field must be finite.
    #[error("non-finite value for {0}")]
    NonFinite(&'static str),
    /// Recovery must be within [0, 1].
    #[error("recovery rate must be within [0,1]")]
    InvalidRecovery,
    /// Price or cost must be non-negative.
    #[error("negative monetary value for {0}")]
    NegativeMoney(&'static str),
    /// Thresholds must be non-negative and ordered medium <= high.
    #[error("grade thresholds must satisfy 0 <= medium_min <= high_min")]
    InvalidThresholds,
    /// Scenario must be identifiable for caching.
    #[error("scenario id must not be empty")]
    EmptyScenarioId,
    #[error("negative stockpile metal content {0}")]
    NegativeMetal(f64),
    /// An empty stockpile cannot hold metal.
    #[error("stockpile holds {0} metal but no tonnage")]
    MetalWithoutTonnage(f64),
}

/// Validate a single tonnage/grade pair observed in `period`.
pub fn validate_quantity(period: u32, tonnage: f64, grade: f64) -> Result<(), ValidationError> {
    if !tonnage.is_finite() {
        return Err(ValidationError::NonFinite("tonnage"));
    }
    if !grade.is_finite() {
        return Err(ValidationError::NonFinite("grade"));
    }
    if tonnage < 0.0 {
        return Err(ValidationError::NegativeTonnage { period, tonnage });
    }
    if grade < 0.0 {
        return Err(ValidationError::NegativeGrade { period, grade });
    }
    Ok(())
}

/// Validate a normalized period record.
pub fn validate_period_material(p: &PeriodMaterial) -> Result<(), ValidationError> {
    validate_quantity(p.period, p.waste_tonnage, 0.0)?;
    for b in p.bands.batches() {
        validate_quantity(p.period, b.tonnage, b.grade)?;
    }
    Ok(())
}

/// Validate a stockpile state handed in from outside the engine.
pub fn validate_stockpile(s: &StockpileState) -> Result<(), ValidationError> {
    if !(s.tonnage.is_finite() && s.metal_content.is_finite()) {
        return Err(ValidationError::NonFinite("stockpile"));
    }
    if s.tonnage < 0.0 {
        return Err(ValidationError::NegativeTonnage {
            period: 0,
            tonnage: s.tonnage,
        });
    }
    if s.metal_content < 0.0 {
        return Err(ValidationError::NegativeMetal(s.metal_content));
    }
    if s.tonnage == 0.0 && s.metal_content > 0.0 {
        return Err(ValidationError::MetalWithoutTonnage(s.metal_content));
    }
    Ok(())
}

/// Validate financial settings. A non-positive plant capacity is accepted.
pub fn validate_settings(s: &FinancialSettings) -> Result<(), ValidationError> {
    if !s.plant_capacity.is_finite() {
        return Err(ValidationError::NonFinite("plant_capacity"));
    }
    if s.recovery_rate < Decimal::ZERO || s.recovery_rate > Decimal::ONE {
        return Err(ValidationError::InvalidRecovery);
    }
    if s.gold_price < Decimal::ZERO {
        return Err(ValidationError::NegativeMoney("gold_price"));
    }
    if s.base_mining_cost < Decimal::ZERO {
        return Err(ValidationError::NegativeMoney("base_mining_cost"));
    }
    if s.processing_cost < Decimal::ZERO {
        return Err(ValidationError::NegativeMoney("processing_cost"));
    }
    Ok(())
}

pub fn validate_thresholds(t: &GradeThresholds) -> Result<(), ValidationError> {
    if !(t.medium_min.is_finite() && t.high_min.is_finite()) {
        return Err(ValidationError::NonFinite("thresholds"));
    }
    if t.medium_min < 0.0 || t.medium_min > t.high_min {
        return Err(ValidationError::InvalidThresholds);
    }
    Ok(())
}

/// Validate a scenario, including its settings and thresholds.
pub fn validate_scenario(c: &ScenarioContext) -> Result<(), ValidationError> {
    if c.scenario_id.trim().is_empty() {
        return Err(ValidationError::EmptyScenarioId);
    }
    validate_settings(&c.settings)?;
    validate_thresholds(&c.thresholds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn parcel(tonnage: f64, grade: f64) -> Parcel {
        Parcel { tonnage, grade }
    }

    #[test]
    fn thresholds_classify_boundaries() {
        let t = GradeThresholds::default();
        assert_eq!(t.band_for_grade(0.0), GradeBand::Low);
        assert_eq!(t.band_for_grade(1.49), GradeBand::Low);
        assert_eq!(t.band_for_grade(1.5), GradeBand::Medium);
        assert_eq!(t.band_for_grade(3.49), GradeBand::Medium);
        assert_eq!(t.band_for_grade(3.5), GradeBand::High);
    }

    #[test]
    fn blend_weights_grade_by_tonnage() {
        let s = StockpileState::empty().blend([parcel(100.0, 2.0), parcel(300.0, 4.0)]);
        assert_eq!(s.tonnage, 400.0);
        assert_eq!(s.metal_content, 1400.0);
        assert!((s.grade() - 3.5).abs() < 1e-12);
    }

    #[test]
    fn blend_discards_previous_state() {
        let old = StockpileState {
            tonnage: 50.0,
            metal_content: 100.0,
        };
        assert_eq!(old.blend(std::iter::empty()), StockpileState::empty());
    }

    #[test]
    fn empty_pile_has_zero_grade() {
        let s = StockpileState::empty().blend([parcel(0.0, 7.0)]);
        assert!(s.is_empty());
        assert_eq!(s.metal_content, 0.0);
        assert_eq!(s.grade(), 0.0);
    }

    #[test]
    fn ore_batches_follow_priority_order() {
        let bands = OreBands {
            low: BandTotals { tonnage: 1.0, grade: 1.0 },
            medium: BandTotals { tonnage: 2.0, grade: 2.0 },
            high: BandTotals { tonnage: 3.0, grade: 4.0 },
        };
        let order: Vec<GradeBand> = bands.batches().map(|b| b.grade_band).collect();
        assert_eq!(order, GradeBand::ORE.to_vec());
        assert_eq!(bands.total_tonnage(), 6.0);
    }

    #[test]
    fn settings_validation() {
        let mut s = FinancialSettings::default();
        assert!(validate_settings(&s).is_ok());
        s.plant_capacity = 0.0;
        assert!(validate_settings(&s).is_ok());
        s.plant_capacity = -10.0;
        assert!(validate_settings(&s).is_ok());
        s.plant_capacity = f64::NAN;
        assert_eq!(
            validate_settings(&s),
            Err(ValidationError::NonFinite("plant_capacity"))
        );
        s.plant_capacity = 100.0;
        s.recovery_rate = Decimal::new(11, 1);
        assert_eq!(validate_settings(&s), Err(ValidationError::InvalidRecovery));
        s.recovery_rate = Decimal::ONE;
        s.processing_cost = Decimal::new(-1, 0);
        assert_eq!(
            validate_settings(&s),
            Err(ValidationError::NegativeMoney("processing_cost"))
        );
    }

    #[test]
    fn quantity_validation_rejects_negatives() {
        assert_eq!(
            validate_quantity(3, -1.0, 1.0),
            Err(ValidationError::NegativeTonnage {
                period: 3,
                tonnage: -1.0
            })
        );
        assert_eq!(
            validate_quantity(3, 1.0, -0.5),
            Err(ValidationError::NegativeGrade {
                period: 3,
                grade: -0.5
            })
        );
        assert!(validate_quantity(3, f64::INFINITY, 1.0).is_err());
        assert!(validate_quantity(3, 0.0, 0.0).is_ok());
    }

    #[test]
    fn stockpile_validation_keeps_metal_with_tonnage() {
        let pile = |tonnage, metal_content| StockpileState {
            tonnage,
            metal_content,
        };
        assert_eq!(
            validate_stockpile(&pile(10.0, -2.0)),
            Err(ValidationError::NegativeMetal(-2.0))
        );
        assert_eq!(
            validate_stockpile(&pile(0.0, 5.0)),
            Err(ValidationError::MetalWithoutTonnage(5.0))
        );
        assert!(validate_stockpile(&StockpileState::empty()).is_ok());
        assert!(validate_stockpile(&pile(10.0, 20.0)).is_ok());
    }

    #[test]
    fn scenario_yaml_roundtrip_with_default_thresholds() {
        let text = r#"
scenario_id: base-case
settings:
  plant_capacity: 23400
  gold_price: "60"
  recovery_rate: "0.9"
  base_mining_cost: "4"
  processing_cost: "36"
"#;
        let ctx: ScenarioContext = serde_yaml::from_str(text).unwrap();
        validate_scenario(&ctx).unwrap();
        assert_eq!(ctx.thresholds, GradeThresholds::default());
        assert_eq!(ctx.settings.recovery_rate, Decimal::new(9, 1));
        let json = serde_json::to_string(&ctx).unwrap();
        let back: ScenarioContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ctx);
    }

    #[test]
    fn base_case_scenario_asset_is_valid() {
        let path = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../../assets/scenarios/base-case.yaml");
        let text = std::fs::read_to_string(path).unwrap();
        let ctx: ScenarioContext = serde_yaml::from_str(&text).unwrap();
        validate_scenario(&ctx).unwrap();
        assert_eq!(ctx.scenario_id, "base-case");
        assert_eq!(ctx.settings, FinancialSettings::default());
    }

    #[test]
    fn scenario_requires_ordered_thresholds() {
        let ctx = ScenarioContext {
            scenario_id: "x".into(),
            settings: FinancialSettings::default(),
            thresholds: GradeThresholds {
                medium_min: 4.0,
                high_min: 2.0,
            },
        };
        assert_eq!(
            validate_scenario(&ctx),
            Err(ValidationError::InvalidThresholds)
        );
    }

    #[test]
    fn stripping_ratio_needs_ore() {
        let mut r = PeriodReport {
            period: 1,
            ore_mined: 50.0,
            waste: 200.0,
            processed: 50.0,
            stockpiled: 0.0,
            grade: 5.0,
            revenue: Decimal::ZERO,
            mining_cost: Decimal::ZERO,
            processing_cost: Decimal::ZERO,
            total_cost: Decimal::ZERO,
            net_cash_flow: Decimal::ZERO,
            stockpile_value: Decimal::ZERO,
            stockpile_grade: 0.0,
        };
        assert_eq!(r.stripping_ratio(), Some(4.0));
        r.ore_mined = 0.0;
        assert_eq!(r.stripping_ratio(), None);
    }

    proptest! {
        #[test]
        fn blend_of_two_matches_weighted_average(t1 in 0.1f64..1e6, g1 in 0.0f64..20.0,
                                                 t2 in 0.1f64..1e6, g2 in 0.0f64..20.0) {
            let s = StockpileState::empty().blend([parcel(t1, g1), parcel(t2, g2)]);
            let expected = (t1 * g1 + t2 * g2) / (t1 + t2);
            prop_assert!((s.grade() - expected).abs() <= 1e-9 * expected.max(1.0));
            prop_assert!((s.tonnage - (t1 + t2)).abs() <= 1e-9 * (t1 + t2));
        }

        #[test]
        fn blend_is_never_negative(parts in proptest::collection::vec((0.0f64..1e5, 0.0f64..30.0), 0..8)) {
            let s = StockpileState::empty().blend(parts.iter().map(|&(t, g)| parcel(t, g)));
            prop_assert!(s.tonnage >= 0.0);
            prop_assert!(s.metal_content >= 0.0);
            if s.tonnage == 0.0 {
                prop_assert_eq!(s.metal_content, 0.0);
            }
        }
    }
}
