use super::{open_repository, repository_location};
use crate::Context;
use anyhow::{anyhow, Result};
use clap::Args;
use snapvault_backends::RetryConfig;
use snapvault_core::sync::{Direction, SyncEngine};

#[derive(Args)]
pub struct SyncCommand {
    #[arg(help = "Direction: to, from or both")]
    direction: Direction,

    #[arg(help = "Peer repository location")]
    peer: String,

    #[arg(long, help = "Only synchronize snapshots whose identifier starts with this prefix")]
    snapshot: Option<String>,

    #[arg(long, env = "SNAPVAULT_PEER_PASSWORD", hide_env_values = true, help = "Peer repository password")]
    peer_password: Option<String>,
}

impl SyncCommand {
    pub async fn run(&self, ctx: &Context) -> Result<()> {
        let location = repository_location(ctx, None)?;
        let local = open_repository(ctx, &location, ctx.password.as_deref(), RetryConfig::persistent()).await?;
        let peer = open_repository(ctx, &self.peer, self.peer_password.as_deref(), RetryConfig::persistent()).await?;

        let engine = SyncEngine::new(local, peer, ctx.logger.clone());
        let report = engine.run(self.direction, self.snapshot.as_deref()).await?;

        if matches!(self.direction, Direction::To | Direction::Both) {
            println!(
                "to {}: {} synchronized, {} failed, {} skipped",
                self.peer, report.to_peer.synced, report.to_peer.failed, report.to_peer.skipped
            );
        }
        if matches!(self.direction, Direction::From | Direction::Both) {
            println!(
                "from {}: {} synchronized, {} failed, {} skipped",
                self.peer, report.from_peer.synced, report.from_peer.failed, report.from_peer.skipped
            );
        }

        if !report.is_success() {
            return Err(anyhow!("some snapshots failed to synchronize"));
        }
        Ok(())
    }
}
