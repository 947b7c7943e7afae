//! Small hand-built artifacts shared by the predictor tests
//!
//! The forest splits on period 1 internal marks, period 1 attendance and
//! period 8 internal marks (thresholds in scaled space, 150 marks and 75%
//! attendance). The dense network scores overall marks and attendance.

use super::artifacts::{
    load_artifacts, ArtifactSet, BACKGROUND_FILE, DENSE_FILE, FOREST_FILE, LABEL_MAP_FILE,
    SCALER_FILE,
};
use crate::models::{AcademicPeriodRecord, Backend, StudentRecord, MAX_PERIODS};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

pub const N_FEATURES: usize = 25;

fn internal(period: usize) -> usize {
    1 + 3 * (period - 1)
}

fn external(period: usize) -> usize {
    2 + 3 * (period - 1)
}

fn attendance(period: usize) -> usize {
    3 + 3 * (period - 1)
}

pub fn scaler_json() -> Value {
    let mut mean = vec![22.0];
    let mut scale = vec![4.0];
    for _ in 0..MAX_PERIODS {
        mean.extend([190.0, 185.0, 78.0]);
        scale.extend([60.0, 65.0, 12.0]);
    }
    json!({ "mean": mean, "scale": scale })
}

pub fn label_map_json() -> Value {
    json!({"0": "Needs Attention", "1": "Average", "2": "Good"})
}

pub fn forest_json() -> Value {
    json!({
        "n_features": N_FEATURES,
        "n_classes": 3,
        "trees": [
            {"nodes": [
                {"kind": "split", "feature": internal(1), "threshold": -0.6667, "left": 1, "right": 2, "cover": 30.0},
                {"kind": "leaf", "value": [8.0, 2.0, 0.0], "cover": 10.0},
                {"kind": "split", "feature": attendance(1), "threshold": -0.25, "left": 3, "right": 4, "cover": 20.0},
                {"kind": "leaf", "value": [1.0, 6.0, 3.0], "cover": 10.0},
                {"kind": "leaf", "value": [0.0, 2.0, 8.0], "cover": 10.0}
            ]},
            {"nodes": [
                {"kind": "split", "feature": internal(8), "threshold": -0.6667, "left": 1, "right": 2, "cover": 30.0},
                {"kind": "leaf", "value": [6.0, 3.0, 1.0], "cover": 12.0},
                {"kind": "leaf", "value": [1.0, 3.0, 6.0], "cover": 18.0}
            ]}
        ]
    })
}

/// 25 -> 4 (relu) -> 3 (softmax)
pub fn dense_json() -> Value {
    let mut hidden = vec![vec![0.0f32; 4]; N_FEATURES];
    for period in 1..=MAX_PERIODS as usize {
        for marks in [internal(period), external(period)] {
            hidden[marks][0] = 0.1;
            hidden[marks][1] = -0.1;
        }
        hidden[attendance(period)][2] = 0.1;
        hidden[attendance(period)][3] = -0.1;
    }
    json!({
        "layers": [
            {"weights": hidden, "bias": [0.0, 0.0, 0.0, 0.0], "activation": "relu"},
            {
                "weights": [[0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]],
                "bias": [0.0, 0.5, 0.0],
                "activation": "softmax"
            }
        ]
    })
}

pub fn background_json() -> Value {
    let rows: Vec<Vec<f32>> = (0..8)
        .map(|k| vec![-1.5 + 0.4 * k as f32; N_FEATURES])
        .collect();
    json!(rows)
}

pub fn write_json(dir: &Path, name: &str, value: &Value) {
    fs::write(dir.join(name), serde_json::to_vec_pretty(value).unwrap()).unwrap();
}

/// Write a complete artifact set for both backends
pub fn write_models_dir(dir: &Path) {
    write_json(dir, FOREST_FILE, &forest_json());
    write_json(dir, DENSE_FILE, &dense_json());
    write_json(dir, SCALER_FILE, &scaler_json());
    write_json(dir, LABEL_MAP_FILE, &label_map_json());
    write_json(dir, BACKGROUND_FILE, &background_json());
}

pub fn artifact_set(backend: Backend) -> ArtifactSet {
    let dir = TempDir::new().unwrap();
    write_models_dir(dir.path());
    load_artifacts(dir.path(), backend).unwrap()
}

fn single_period(age: u8, internal: f32, external: f32, attendance: f32) -> StudentRecord {
    let period = AcademicPeriodRecord::new(1, internal, external, attendance).unwrap();
    StudentRecord::new("fixture", age, "CSE", vec![period]).unwrap()
}

/// Predicted Good with confidence 0.7
pub fn strong_student() -> StudentRecord {
    single_period(18, 250.0, 230.0, 90.0)
}

/// Predicted Needs Attention with confidence 0.7, and the rules agree
pub fn weak_student() -> StudentRecord {
    single_period(20, 100.0, 100.0, 60.0)
}

/// Predicted Needs Attention by the forest, Good by the rules
pub fn rule_boosted_student() -> StudentRecord {
    single_period(18, 140.0, 300.0, 95.0)
}
