use super::{open_repository, repository_location};
use crate::Context;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use snapvault_backends::RetryConfig;
use snapvault_core::snapshot::{Builder, Importer};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Args)]
pub struct BackupCommand {
    #[arg(help = "Directory to back up")]
    path: PathBuf,

    #[arg(long, help = "Backup tags")]
    tag: Vec<String>,

    #[arg(long, help = "Snapshot name")]
    name: Option<String>,

    #[arg(long, help = "Snapshot category")]
    category: Option<String>,

    #[arg(long, help = "Skip paths starting with this prefix")]
    exclude: Vec<PathBuf>,

    #[arg(long, help = "Dry run - don't actually backup")]
    dry_run: bool,
}

impl BackupCommand {
    pub async fn run(&self, ctx: &Context) -> Result<()> {
        if !self.path.exists() {
            return Err(anyhow!("Path does not exist: {}", self.path.display()));
        }
        let root = self.path.canonicalize()?;

        let files = self.scan(&root);
        let total_size: u64 = files.iter().map(|(_, m)| m.len()).sum();
        if self.dry_run {
            println!(
                "Dry run completed - would backup {} entries ({:.2} MB)",
                files.len(),
                total_size as f64 / 1024.0 / 1024.0
            );
            return Ok(());
        }

        let location = repository_location(ctx, None)?;
        let repo = open_repository(ctx, &location, ctx.password.as_deref(), RetryConfig::default()).await?;

        let importer = Importer {
            kind: "fs".to_string(),
            origin: snapvault_core::snapshot::Context::current().hostname,
            directory: root.to_string_lossy().to_string(),
        };
        let mut builder = Builder::new(repo.clone(), importer).await?;
        let header = builder.header_mut();
        header.tags = self.tag.clone();
        if let Some(name) = &self.name {
            header.name = name.clone();
        }
        if let Some(category) = &self.category {
            header.category = category.clone();
        }

        info!("Starting backup of {}", root.display());
        let pb = ProgressBar::new(total_size);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{bar:40.cyan/blue} {bytes:>10}/{total_bytes:10} {msg}")
                .map_err(|e| anyhow!("invalid progress template: {}", e))?,
        );

        for (path, metadata) in &files {
            let name = path.to_string_lossy();
            pb.set_message(name.to_string());
            let modified = metadata.modified().ok().map(DateTime::<Utc>::from);

            if metadata.is_dir() {
                builder.add_directory(&name, mode(metadata), modified).await?;
            } else if metadata.file_type().is_symlink() {
                match fs::read_link(path).await {
                    Ok(target) => builder.add_symlink(&name, &target.to_string_lossy()).await?,
                    Err(e) => builder.add_error(&name, &e.to_string()).await?,
                }
            } else if metadata.is_file() {
                match fs::read(path).await {
                    Ok(data) => {
                        builder.add_file(&name, &data, mode(metadata), modified).await?;
                        debug!("Stored {}", name);
                    }
                    Err(e) => {
                        warn!("Failed to read {}: {}", name, e);
                        builder.add_error(&name, &e.to_string()).await?;
                    }
                }
                pb.inc(metadata.len());
            }
        }

        let summary = builder.summary();
        let id = builder.commit().await?;
        pb.finish_with_message("done");

        println!("Snapshot {} saved", id.short_string());
        println!(
            "Files: {}  Directories: {}  Errors: {}  Size: {:.2} MB",
            summary.files,
            summary.directories,
            summary.errors,
            summary.size as f64 / 1024.0 / 1024.0
        );
        Ok(())
    }

    fn scan(&self, root: &Path) -> Vec<(PathBuf, Metadata)> {
        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if self.exclude.iter().any(|prefix| entry.path().starts_with(prefix)) {
                continue;
            }
            match entry.metadata() {
                Ok(metadata) => files.push((entry.path().to_path_buf(), metadata)),
                Err(e) => warn!("Failed to stat {}: {}", entry.path().display(), e),
            }
        }
        files
    }
}

#[cfg(unix)]
fn mode(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn mode(metadata: &Metadata) -> u32 {
    if metadata.permissions().readonly() { 0o444 } else { 0o644 }
}
