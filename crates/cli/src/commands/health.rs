//! Server health command

use anyhow::Result;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{color_status, print_error, print_json, print_success, print_table, OutputFormat};

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Show server and per-component health; fails when the server is unhealthy
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health = client.health().await?;

    match format {
        OutputFormat::Json => print_json(&health)?,
        OutputFormat::Table => {
            let mut rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, component)| ComponentRow {
                    name: name.clone(),
                    status: color_status(component.status),
                    message: component.message.clone().unwrap_or_default(),
                })
                .collect();
            rows.sort_by(|a, b| a.name.cmp(&b.name));

            if health.status.is_operational() {
                print_success(&format!("Server is {}", color_status(health.status)));
            } else {
                print_error(&format!("Server is {}", color_status(health.status)));
            }
            print_table(&rows);
        }
    }

    if !health.status.is_operational() {
        anyhow::bail!("server reported unhealthy");
    }
    Ok(())
}
