//! Prediction commands

use anyhow::Result;
use predictor_lib::{AcademicPeriodRecord, RecordError, StudentInput};
use tabled::Tabled;
use thiserror::Error;

use crate::client::{ApiClient, PredictionReport};
use crate::output::{
    color_confidence, color_label, format_confidence, format_contribution, print_info, print_json,
    print_success, print_table, print_warning, OutputFormat,
};

/// Failure to read a `P:INT:EXT:ATT` period argument
#[derive(Debug, Error)]
pub enum PeriodArgError {
    #[error("expected P:INT:EXT:ATT, got {0:?}")]
    Shape(String),
    #[error("{field} {value:?} is not a number")]
    Number { field: &'static str, value: String },
    #[error(transparent)]
    Invalid(#[from] RecordError),
}

/// Parse `P:INT:EXT:ATT`, e.g. `3:210:190:86`
pub fn parse_period(arg: &str) -> Result<AcademicPeriodRecord, PeriodArgError> {
    let parts: Vec<&str> = arg.split(':').map(str::trim).collect();
    let [index, internal, external, attendance] = parts.as_slice() else {
        return Err(PeriodArgError::Shape(arg.to_string()));
    };

    let index = index.parse::<u8>().map_err(|_| PeriodArgError::Number {
        field: "period",
        value: index.to_string(),
    })?;
    let score = |field: &'static str, value: &str| {
        value.parse::<f32>().map_err(|_| PeriodArgError::Number {
            field,
            value: value.to_string(),
        })
    };

    Ok(AcademicPeriodRecord::new(
        index,
        score("internal", internal)?,
        score("external", external)?,
        score("attendance", attendance)?,
    )?)
}

#[derive(Tabled)]
struct ContributionRow {
    #[tabled(rename = "Feature")]
    feature: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Contribution")]
    contribution: String,
}

/// Contributions ordered by magnitude, largest first
fn top_contributions(report: &PredictionReport, top: usize) -> Vec<ContributionRow> {
    let mut contributions: Vec<_> = report.feature_contributions.iter().collect();
    contributions.sort_by(|a, b| b.contribution.abs().total_cmp(&a.contribution.abs()));
    contributions
        .into_iter()
        .take(top)
        .map(|c| ContributionRow {
            feature: c.feature.clone(),
            value: format!("{:.1}", c.value),
            contribution: format_contribution(c.contribution),
        })
        .collect()
}

fn render(report: &PredictionReport, top: usize, format: OutputFormat) -> Result<()> {
    if let OutputFormat::Json = format {
        return print_json(report);
    }

    print_success(&format!(
        "{} ({} confidence) from {}",
        color_label(report.prediction),
        color_confidence(report.confidence),
        report.model_used
    ));
    if report.rule_augmented {
        print_info("Prediction raised by the academic score rules");
    }
    if let Some(reason) = &report.low_confidence_reason {
        print_warning(&format!("Low confidence: {}", reason));
    }

    let distribution: Vec<String> = report
        .probabilities
        .iter()
        .map(|p| format_confidence(*p))
        .collect();
    println!("Class probabilities: [{}]", distribution.join(", "));
    println!("Explanation: {:?}", report.explanation);

    print_table(&top_contributions(report, top));
    Ok(())
}

/// Send a validated record and render the server's answer
pub async fn predict(
    client: &ApiClient,
    input: StudentInput,
    model: &str,
    top: usize,
    format: OutputFormat,
) -> Result<()> {
    let report = client.predict(&input, model).await?;
    render(&report, top, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use predictor_lib::{ExplanationMethod, FeatureContribution, Label};

    #[test]
    fn test_parse_period() {
        let period = parse_period("3:210:190:86.5").unwrap();
        assert_eq!(period.period_index(), 3);
        assert_eq!(period.internal_score(), 210.0);
        assert_eq!(period.external_score(), 190.0);
        assert_eq!(period.attendance_pct(), 86.5);
    }

    #[test]
    fn test_parse_period_rejects_bad_shapes() {
        assert!(matches!(parse_period("3:210:190"), Err(PeriodArgError::Shape(_))));
        assert!(matches!(
            parse_period("x:210:190:80"),
            Err(PeriodArgError::Number { field: "period", .. })
        ));
        assert!(matches!(
            parse_period("1:abc:190:80"),
            Err(PeriodArgError::Number { field: "internal", .. })
        ));
    }

    #[test]
    fn test_parse_period_validates_ranges() {
        assert!(matches!(
            parse_period("9:100:100:80"),
            Err(PeriodArgError::Invalid(RecordError::PeriodIndex(9)))
        ));
        assert!(matches!(
            parse_period("1:100:100:120"),
            Err(PeriodArgError::Invalid(RecordError::OutOfRange { .. }))
        ));
    }

    #[test]
    fn test_top_contributions_orders_by_magnitude() {
        let contribution = |feature: &str, contribution: f32| FeatureContribution {
            feature: feature.to_string(),
            value: 1.0,
            contribution,
        };
        let report = PredictionReport {
            prediction: Label::Average,
            confidence: 0.5,
            model_used: "Neural Network".to_string(),
            feature_contributions: vec![
                contribution("age", 0.01),
                contribution("period1_internal", -0.2),
                contribution("period1_external", 0.1),
            ],
            probabilities: vec![0.3, 0.5, 0.2],
            explanation: ExplanationMethod::KernelShap,
            rule_augmented: false,
            low_confidence_reason: Some("Record sits close to a band boundary".to_string()),
            timestamp: chrono::Utc::now(),
        };

        let rows = top_contributions(&report, 2);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].feature, "period1_internal");
        assert_eq!(rows[0].contribution, "-0.2000");
        assert_eq!(rows[1].feature, "period1_external");
    }
}
