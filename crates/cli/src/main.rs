//! Student Performance Analyzer CLI
//!
//! Sends student records to the prediction server and renders the
//! predicted band together with its feature attributions.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{health, predict};
use predictor_lib::{AcademicPeriodRecord, LegacyStudentRecord, StudentInput, StudentRecord};

/// Student Performance Analyzer CLI
#[derive(Parser)]
#[command(name = "spa")]
#[command(author, version, about = "CLI for the Student Performance Analyzer", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via SPA_API_URL env var)
    #[arg(long, env = "SPA_API_URL")]
    pub api_url: Option<String>,

    /// Output format [default: table]
    #[arg(long, short, value_enum)]
    pub format: Option<output::OutputFormat>,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Predict the performance band of a student from per-period scores
    Predict {
        /// Student name
        #[arg(long, default_value = "")]
        name: String,

        /// Age in years (15-30)
        #[arg(long)]
        age: u8,

        /// Department
        #[arg(long, default_value = "")]
        department: String,

        /// Period scores as P:INT:EXT:ATT, repeatable (e.g. --period 1:210:190:86)
        #[arg(long = "period", required = true, value_parser = predict::parse_period)]
        periods: Vec<AcademicPeriodRecord>,

        /// Model backend: ml (tree ensemble) or dl (neural network)
        #[arg(long)]
        model: Option<String>,

        /// Number of contributions to show
        #[arg(long, default_value_t = 10)]
        top: usize,
    },

    /// Predict from the four-value legacy record
    PredictLegacy {
        /// Age in years (15-30)
        #[arg(long)]
        age: u8,

        /// Internal marks (0-100)
        #[arg(long)]
        internal: f32,

        /// Previous marks (0-100)
        #[arg(long)]
        previous: f32,

        /// Attendance percentage (0-100)
        #[arg(long)]
        attendance: f32,

        /// Model backend: ml (tree ensemble) or dl (neural network)
        #[arg(long)]
        model: Option<String>,

        /// Number of contributions to show
        #[arg(long, default_value_t = 10)]
        top: usize,
    },

    /// Show server health
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = config::Config::load()?;

    let api_url = settings.api_url(cli.api_url.as_deref());
    let format = settings.format(cli.format);

    // Initialize client
    let client = client::ApiClient::new(&api_url)?;
    if cli.verbose {
        output::print_info(&format!("Using API at {}", client.base_url()));
    }

    // Execute command
    let outcome = match cli.command {
        Commands::Predict {
            name,
            age,
            department,
            periods,
            model,
            top,
        } => match StudentRecord::new(name, age, department, periods) {
            Ok(record) => {
                let model = settings.model(model);
                predict::predict(&client, StudentInput::from(record), &model, top, format).await
            }
            Err(e) => Err(e.into()),
        },
        Commands::PredictLegacy {
            age,
            internal,
            previous,
            attendance,
            model,
            top,
        } => match LegacyStudentRecord::new(age, internal, previous, attendance) {
            Ok(record) => {
                let model = settings.model(model);
                predict::predict(&client, StudentInput::from(record), &model, top, format).await
            }
            Err(e) => Err(e.into()),
        },
        Commands::Health => health::show_health(&client, format).await,
    };

    if let Err(e) = outcome {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}
