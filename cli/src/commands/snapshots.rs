use super::{open_repository, repository_location};
use crate::Context;
use anyhow::{anyhow, Result};
use clap::Args;
use snapvault_backends::RetryConfig;
use snapvault_core::snapshot::{Header, Snapshot};
use tracing::warn;

#[derive(Args)]
pub struct SnapshotsCommand {
    #[arg(help = "Only list snapshots whose identifier starts with this prefix")]
    prefix: Option<String>,

    #[arg(long, help = "Output format (table, json)")]
    format: Option<String>,

    #[arg(long, help = "Filter by hostname")]
    hostname: Option<String>,

    #[arg(long, help = "Filter by tag")]
    tag: Vec<String>,

    #[arg(long, help = "Show latest N snapshots")]
    latest: Option<usize>,
}

impl SnapshotsCommand {
    pub async fn run(&self, ctx: &Context) -> Result<()> {
        let location = repository_location(ctx, None)?;
        let repo = open_repository(ctx, &location, ctx.password.as_deref(), RetryConfig::quick()).await?;

        let ids = repo.locate_snapshots(self.prefix.as_deref().unwrap_or("")).await;
        let mut headers: Vec<Header> = Vec::new();
        for id in ids {
            match Snapshot::load(repo.clone(), &id).await {
                Ok(snapshot) => headers.push(snapshot.header().clone()),
                Err(e) => warn!("Failed to load snapshot {}: {}", id.short_string(), e),
            }
        }

        if let Some(hostname) = &self.hostname {
            headers.retain(|h| h.context.hostname == *hostname);
        }
        if !self.tag.is_empty() {
            headers.retain(|h| h.tags.iter().any(|tag| self.tag.contains(tag)));
        }
        headers.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(latest) = self.latest {
            headers.truncate(latest);
        }

        match self.format.as_deref().unwrap_or("table") {
            "table" => {
                if headers.is_empty() {
                    println!("No snapshots found");
                    return Ok(());
                }
                println!(
                    "{:<12} {:<20} {:<15} {:>8} {:>10} {:<20} {}",
                    "ID", "Date", "Host", "Files", "Size", "Tags", "Path"
                );
                println!("{:-<100}", "");
                for header in &headers {
                    let (files, size, directory) = header
                        .sources
                        .first()
                        .map(|s| (s.summary.files, s.summary.size, s.importer.directory.as_str()))
                        .unwrap_or((0, 0, ""));
                    println!(
                        "{:<12} {:<20} {:<15} {:>8} {:>10} {:<20} {}",
                        header.short_id(),
                        header.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        header.context.hostname,
                        files,
                        format_size(size),
                        header.tags.join(","),
                        directory
                    );
                }
            }
            "json" => println!("{}", serde_json::to_string_pretty(&headers)?),
            other => return Err(anyhow!("Unsupported format: {}", other)),
        }
        Ok(())
    }
}

fn format_size(size: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", size)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
