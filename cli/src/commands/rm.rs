use super::{open_repository, repository_location};
use crate::Context;
use anyhow::{anyhow, Result};
use clap::Args;
use snapvault_backends::RetryConfig;

#[derive(Args)]
pub struct RmCommand {
    #[arg(required = true, help = "Snapshot identifiers or unambiguous prefixes")]
    snapshots: Vec<String>,
}

impl RmCommand {
    pub async fn run(&self, ctx: &Context) -> Result<()> {
        let location = repository_location(ctx, None)?;
        let repo = open_repository(ctx, &location, ctx.password.as_deref(), RetryConfig::quick()).await?;

        let mut targets = Vec::new();
        for prefix in &self.snapshots {
            let matches = repo.locate_snapshots(prefix).await;
            match matches.as_slice() {
                [id] => targets.push(*id),
                [] => return Err(anyhow!("No snapshot matches {}", prefix)),
                _ => return Err(anyhow!("{} matches {} snapshots", prefix, matches.len())),
            }
        }

        for id in targets {
            repo.delete_snapshot(&id).await?;
            println!("Removed snapshot {}", id.short_string());
        }
        Ok(())
    }
}
