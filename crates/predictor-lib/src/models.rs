//! Core data models for the predictor

use crate::error::PredictError;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum internal assessment score per period
pub const INTERNAL_MAX: f32 = 300.0;

/// Maximum external (university) exam score per period
pub const EXTERNAL_MAX: f32 = 300.0;

/// Maximum combined score per period
pub const TOTAL_MAX: f32 = 600.0;

/// Number of reporting periods the period-based models are trained on
pub const MAX_PERIODS: u8 = 8;

pub const MIN_AGE: u8 = 15;
pub const MAX_AGE: u8 = 30;

/// Upper bound for the legacy percentage-style marks
pub const LEGACY_MARKS_MAX: f32 = 100.0;

/// Validation failures for student records
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("period index {0} is outside 1..=8")]
    PeriodIndex(u8),
    #[error("{field} = {value} is outside [0, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f32,
        max: f32,
    },
    #[error("internal + external score {0} exceeds 600")]
    TotalExceeded(f32),
    #[error("age {0} is outside 15..=30")]
    Age(u8),
    #[error("expected between 1 and 8 periods, got {0}")]
    PeriodCount(usize),
    #[error("period {0} supplied more than once")]
    DuplicatePeriod(u8),
}

fn check_range(field: &'static str, value: f32, max: f32) -> Result<(), RecordError> {
    if (0.0..=max).contains(&value) {
        Ok(())
    } else {
        Err(RecordError::OutOfRange { field, value, max })
    }
}

fn check_age(age: u8) -> Result<(), RecordError> {
    if (MIN_AGE..=MAX_AGE).contains(&age) {
        Ok(())
    } else {
        Err(RecordError::Age(age))
    }
}

/// One reporting period (semester) of a student's record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPeriod", into = "RawPeriod")]
pub struct AcademicPeriodRecord {
    period_index: u8,
    internal_score: f32,
    external_score: f32,
    attendance_pct: f32,
}

impl AcademicPeriodRecord {
    pub fn new(
        period_index: u8,
        internal_score: f32,
        external_score: f32,
        attendance_pct: f32,
    ) -> Result<Self, RecordError> {
        if !(1..=MAX_PERIODS).contains(&period_index) {
            return Err(RecordError::PeriodIndex(period_index));
        }
        check_range("internal_score", internal_score, INTERNAL_MAX)?;
        check_range("external_score", external_score, EXTERNAL_MAX)?;
        check_range("attendance_pct", attendance_pct, 100.0)?;
        let total = internal_score + external_score;
        if total > TOTAL_MAX {
            return Err(RecordError::TotalExceeded(total));
        }
        Ok(Self {
            period_index,
            internal_score,
            external_score,
            attendance_pct,
        })
    }

    pub fn period_index(&self) -> u8 {
        self.period_index
    }

    pub fn internal_score(&self) -> f32 {
        self.internal_score
    }

    pub fn external_score(&self) -> f32 {
        self.external_score
    }

    pub fn attendance_pct(&self) -> f32 {
        self.attendance_pct
    }

    /// Combined score as a percentage of [`TOTAL_MAX`]
    pub fn percentage(&self) -> f32 {
        (self.internal_score + self.external_score) / TOTAL_MAX * 100.0
    }
}

#[derive(Serialize, Deserialize)]
struct RawPeriod {
    #[serde(alias = "semester")]
    period_index: u8,
    #[serde(alias = "internal_marks")]
    internal_score: f32,
    #[serde(alias = "university_marks")]
    external_score: f32,
    #[serde(alias = "attendance")]
    attendance_pct: f32,
}

impl TryFrom<RawPeriod> for AcademicPeriodRecord {
    type Error = RecordError;

    fn try_from(raw: RawPeriod) -> Result<Self, Self::Error> {
        Self::new(
            raw.period_index,
            raw.internal_score,
            raw.external_score,
            raw.attendance_pct,
        )
    }
}

impl From<AcademicPeriodRecord> for RawPeriod {
    fn from(p: AcademicPeriodRecord) -> Self {
        Self {
            period_index: p.period_index,
            internal_score: p.internal_score,
            external_score: p.external_score,
            attendance_pct: p.attendance_pct,
        }
    }
}

/// A student with between one and eight reporting periods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStudent", into = "RawStudent")]
pub struct StudentRecord {
    name: String,
    age: u8,
    department: String,
    periods: Vec<AcademicPeriodRecord>,
}

impl StudentRecord {
    pub fn new(
        name: impl Into<String>,
        age: u8,
        department: impl Into<String>,
        periods: Vec<AcademicPeriodRecord>,
    ) -> Result<Self, RecordError> {
        check_age(age)?;
        if periods.is_empty() || periods.len() > MAX_PERIODS as usize {
            return Err(RecordError::PeriodCount(periods.len()));
        }
        let mut seen = HashSet::with_capacity(periods.len());
        for p in &periods {
            if !seen.insert(p.period_index()) {
                return Err(RecordError::DuplicatePeriod(p.period_index()));
            }
        }
        Ok(Self {
            name: name.into(),
            age,
            department: department.into(),
            periods,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn age(&self) -> u8 {
        self.age
    }

    pub fn department(&self) -> &str {
        &self.department
    }

    /// Periods in the order they were supplied
    pub fn periods(&self) -> &[AcademicPeriodRecord] {
        &self.periods
    }

    /// The supplied period with the highest index
    pub fn latest_period(&self) -> &AcademicPeriodRecord {
        self.periods
            .iter()
            .max_by_key(|p| p.period_index())
            .unwrap_or(&self.periods[0])
    }
}

#[derive(Serialize, Deserialize)]
struct RawStudent {
    #[serde(default)]
    name: String,
    age: u8,
    #[serde(default)]
    department: String,
    #[serde(alias = "semesters")]
    periods: Vec<AcademicPeriodRecord>,
}

impl TryFrom<RawStudent> for StudentRecord {
    type Error = RecordError;

    fn try_from(raw: RawStudent) -> Result<Self, Self::Error> {
        Self::new(raw.name, raw.age, raw.department, raw.periods)
    }
}

impl From<StudentRecord> for RawStudent {
    fn from(s: StudentRecord) -> Self {
        Self {
            name: s.name,
            age: s.age,
            department: s.department,
            periods: s.periods,
        }
    }
}

/// The four-scalar student record used by the legacy models
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawLegacy", into = "RawLegacy")]
pub struct LegacyStudentRecord {
    age: u8,
    internal_marks: f32,
    previous_marks: f32,
    attendance: f32,
}

impl LegacyStudentRecord {
    pub fn new(
        age: u8,
        internal_marks: f32,
        previous_marks: f32,
        attendance: f32,
    ) -> Result<Self, RecordError> {
        check_age(age)?;
        check_range("internal_marks", internal_marks, LEGACY_MARKS_MAX)?;
        check_range("previous_marks", previous_marks, LEGACY_MARKS_MAX)?;
        check_range("attendance", attendance, 100.0)?;
        Ok(Self {
            age,
            internal_marks,
            previous_marks,
            attendance,
        })
    }

    pub fn age(&self) -> u8 {
        self.age
    }

    pub fn internal_marks(&self) -> f32 {
        self.internal_marks
    }

    pub fn previous_marks(&self) -> f32 {
        self.previous_marks
    }

    pub fn attendance(&self) -> f32 {
        self.attendance
    }
}

#[derive(Serialize, Deserialize)]
struct RawLegacy {
    age: u8,
    internal_marks: f32,
    previous_marks: f32,
    attendance: f32,
}

impl TryFrom<RawLegacy> for LegacyStudentRecord {
    type Error = RecordError;

    fn try_from(raw: RawLegacy) -> Result<Self, Self::Error> {
        Self::new(raw.age, raw.internal_marks, raw.previous_marks, raw.attendance)
    }
}

impl From<LegacyStudentRecord> for RawLegacy {
    fn from(r: LegacyStudentRecord) -> Self {
        Self {
            age: r.age,
            internal_marks: r.internal_marks,
            previous_marks: r.previous_marks,
            attendance: r.attendance,
        }
    }
}

/// Any record the core knows how to vectorize
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StudentInput {
    Periods(StudentRecord),
    Legacy(LegacyStudentRecord),
}

impl From<StudentRecord> for StudentInput {
    fn from(record: StudentRecord) -> Self {
        StudentInput::Periods(record)
    }
}

impl From<LegacyStudentRecord> for StudentInput {
    fn from(record: LegacyStudentRecord) -> Self {
        StudentInput::Legacy(record)
    }
}

// Picks the variant by shape so that validation errors of the chosen variant
// reach the caller instead of serde's generic untagged-enum message.
impl<'de> Deserialize<'de> for StudentInput {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let has_periods = value.get("periods").is_some() || value.get("semesters").is_some();
        if has_periods {
            StudentRecord::deserialize(value)
                .map(StudentInput::Periods)
                .map_err(D::Error::custom)
        } else {
            LegacyStudentRecord::deserialize(value)
                .map(StudentInput::Legacy)
                .map_err(D::Error::custom)
        }
    }
}

/// Model backend selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Backend {
    /// Tree ensemble ("ml")
    #[default]
    #[serde(rename = "ml")]
    Tree,
    /// Feed-forward neural network ("dl")
    #[serde(rename = "dl")]
    Neural,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Backend::Tree, Backend::Neural];

    pub fn selector(&self) -> &'static str {
        match self {
            Backend::Tree => "ml",
            Backend::Neural => "dl",
        }
    }

    /// Name shown to end users as `model_used`
    pub fn display_name(&self) -> &'static str {
        match self {
            Backend::Tree => "Random Forest",
            Backend::Neural => "Neural Network",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.selector())
    }
}

impl FromStr for Backend {
    type Err = PredictError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ml" => Ok(Backend::Tree),
            "dl" => Ok(Backend::Neural),
            other => Err(PredictError::UnsupportedBackend(other.to_string())),
        }
    }
}

/// Performance band, ordered from worst to best
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Label {
    #[serde(rename = "Needs Attention")]
    NeedsAttention,
    Average,
    Good,
}

impl Label {
    pub const ALL: [Label; 3] = [Label::NeedsAttention, Label::Average, Label::Good];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::NeedsAttention => "Needs Attention",
            Label::Average => "Average",
            Label::Good => "Good",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Label::ALL
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown label {:?}", s))
    }
}

/// Fixed-order named numeric features fed to a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    names: Vec<String>,
    values: Vec<f32>,
}

impl FeatureVector {
    pub fn new(names: Vec<String>, values: Vec<f32>) -> Self {
        debug_assert_eq!(names.len(), values.len());
        Self { names, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }
}

/// How a set of contributions was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplanationMethod {
    /// Exact path-dependent attribution over the tree ensemble
    TreeShap,
    /// Sampled kernel attribution against the background set
    KernelShap,
    /// Attribution was unavailable; every contribution is zero
    Fallback,
}

/// One `(feature, raw value, contribution)` triple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    pub value: f32,
    pub contribution: f32,
}

/// Unified output of a single prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub label: Label,
    pub confidence: f32,
    pub model_used: String,
    /// Full class distribution, indexed like the label map
    pub probabilities: Vec<f32>,
    /// One entry per feature, in feature-vector order
    pub contributions: Vec<FeatureContribution>,
    pub explanation: ExplanationMethod,
    pub rule_augmented: bool,
}

impl PredictionResult {
    pub fn contribution(&self, feature: &str) -> Option<f32> {
        self.contributions
            .iter()
            .find(|c| c.feature == feature)
            .map(|c| c.contribution)
    }
}
