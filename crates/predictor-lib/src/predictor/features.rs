//! Feature vectorization for ML inference
//!
//! Turns student records into the fixed-order numeric vectors the models were
//! trained on. Period records may cover only some of the eight periods; the
//! gaps are filled from neighbouring periods so the model sees the student's
//! last known state rather than zeros.

use crate::models::{FeatureVector, LegacyStudentRecord, StudentInput, StudentRecord, MAX_PERIODS};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;

/// Width of the period-based schema: age plus three values per period
pub const PERIOD_FEATURE_COUNT: usize = 1 + 3 * MAX_PERIODS as usize;

/// Width of the legacy four-scalar schema
pub const LEGACY_FEATURE_COUNT: usize = 4;

static PERIOD_FEATURES: Lazy<Vec<String>> = Lazy::new(|| {
    let mut names = Vec::with_capacity(PERIOD_FEATURE_COUNT);
    names.push("age".to_string());
    for period in 1..=MAX_PERIODS {
        names.push(format!("period{}_internal", period));
        names.push(format!("period{}_external", period));
        names.push(format!("period{}_attendance", period));
    }
    names
});

static LEGACY_FEATURES: Lazy<Vec<String>> = Lazy::new(|| {
    ["age", "internal_marks", "previous_marks", "attendance"]
        .iter()
        .map(|s| s.to_string())
        .collect()
});

/// Feature schemas a model can be trained against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSchema {
    Periods,
    Legacy,
}

impl FeatureSchema {
    pub fn names(&self) -> &'static [String] {
        match self {
            FeatureSchema::Periods => &PERIOD_FEATURES,
            FeatureSchema::Legacy => &LEGACY_FEATURES,
        }
    }

    /// Schema whose width matches a trained model, if any
    pub fn for_width(width: usize) -> Option<Self> {
        match width {
            PERIOD_FEATURE_COUNT => Some(FeatureSchema::Periods),
            LEGACY_FEATURE_COUNT => Some(FeatureSchema::Legacy),
            _ => None,
        }
    }
}

/// Vectorize a period record.
///
/// Periods before the earliest supplied one reuse its values; every other
/// missing period carries forward the most recent supplied period. Scores are
/// truncated to whole marks, attendance is kept as is.
pub fn vectorize(record: &StudentRecord) -> FeatureVector {
    let by_period: BTreeMap<u8, _> = record
        .periods()
        .iter()
        .map(|p| (p.period_index(), p))
        .collect();

    let mut values = Vec::with_capacity(PERIOD_FEATURE_COUNT);
    values.push(record.age() as f32);

    let mut carried = by_period.values().next().copied();
    for period in 1..=MAX_PERIODS {
        if let Some(p) = by_period.get(&period) {
            carried = Some(*p);
        }
        let (internal, external, attendance) = carried
            .map(|p| {
                (
                    p.internal_score().trunc(),
                    p.external_score().trunc(),
                    p.attendance_pct(),
                )
            })
            .unwrap_or((0.0, 0.0, 0.0));
        values.push(internal);
        values.push(external);
        values.push(attendance);
    }

    FeatureVector::new(PERIOD_FEATURES.clone(), values)
}

/// Vectorize the legacy four-scalar record
pub fn vectorize_legacy(record: &LegacyStudentRecord) -> FeatureVector {
    FeatureVector::new(
        LEGACY_FEATURES.clone(),
        vec![
            record.age() as f32,
            record.internal_marks(),
            record.previous_marks(),
            record.attendance(),
        ],
    )
}

pub fn vectorize_input(input: &StudentInput) -> FeatureVector {
    match input {
        StudentInput::Periods(record) => vectorize(record),
        StudentInput::Legacy(record) => vectorize_legacy(record),
    }
}
