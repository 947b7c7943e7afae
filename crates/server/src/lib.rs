//! HTTP surface of the student performance predictor

pub mod api;
pub mod config;
