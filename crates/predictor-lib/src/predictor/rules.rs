//! Rule-based label override
//!
//! The training labels were generated from a weighted academic score. The
//! same score is recomputed here and may lift a model prediction to a better
//! band. It never lowers one.

use crate::models::{Label, PredictionResult, StudentRecord};

pub const GOOD_THRESHOLD: f32 = 75.0;
pub const AVERAGE_THRESHOLD: f32 = 55.0;

/// Minimum confidence reported for an overridden prediction
pub const RULE_CONFIDENCE_FLOOR: f32 = 0.85;

pub const RULES_SUFFIX: &str = " + Rules";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleScore {
    pub avg_percentage: f32,
    pub last_percentage: f32,
    pub avg_attendance: f32,
    pub score: f32,
    pub band: Label,
}

pub fn band_for(score: f32) -> Label {
    if score >= GOOD_THRESHOLD {
        Label::Good
    } else if score >= AVERAGE_THRESHOLD {
        Label::Average
    } else {
        Label::NeedsAttention
    }
}

/// Score a record over the periods it actually supplies
pub fn rule_score(record: &StudentRecord) -> RuleScore {
    let periods = record.periods();
    let n = periods.len() as f32;
    let avg_percentage = periods.iter().map(|p| p.percentage()).sum::<f32>() / n;
    let avg_attendance = periods.iter().map(|p| p.attendance_pct()).sum::<f32>() / n;
    let last_percentage = record.latest_period().percentage();

    let score = 0.55 * avg_percentage
        + 0.25 * last_percentage
        + 0.20 * avg_attendance
        + 0.5 * (f32::from(record.age()) - 20.0);

    RuleScore {
        avg_percentage,
        last_percentage,
        avg_attendance,
        score,
        band: band_for(score),
    }
}

/// Lift `result` to the rule band when that band is strictly better
pub fn apply_override(record: &StudentRecord, mut result: PredictionResult) -> PredictionResult {
    let rules = rule_score(record);
    if rules.band > result.label {
        result.label = rules.band;
        result.confidence = result.confidence.max(RULE_CONFIDENCE_FLOOR);
        result.model_used.push_str(RULES_SUFFIX);
        result.rule_augmented = true;
    }
    result
}
