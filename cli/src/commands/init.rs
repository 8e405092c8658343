use super::{prompt_password, repository_location};
use crate::Context;
use anyhow::{anyhow, Result};
use clap::Args;
use snapvault_backends::{open_location, RetryConfig};
use snapvault_core::config::{CompressionConfig, KdfParams};
use snapvault_core::{crypto, Configuration, Repository};

#[derive(Args)]
pub struct InitCommand {
    #[arg(help = "Repository location (path, fs://path or memory://name)")]
    location: Option<String>,

    #[arg(long, help = "Store data unencrypted")]
    no_encryption: bool,

    #[arg(long, help = "Store data uncompressed")]
    no_compression: bool,

    #[arg(long, help = "Maximum packfile size in bytes")]
    packfile_max_size: Option<u64>,
}

impl InitCommand {
    pub async fn run(&self, ctx: &Context) -> Result<()> {
        let location = repository_location(ctx, self.location.as_ref())?;

        let mut configuration = Configuration::new();
        if self.no_compression {
            configuration = configuration.with_compression(None);
        } else {
            configuration = configuration.with_compression(Some(CompressionConfig::default()));
        }
        if let Some(size) = self.packfile_max_size {
            configuration = configuration.with_packfile_max_size(size);
        }
        if !self.no_encryption {
            let password = match &ctx.password {
                Some(password) => password.clone(),
                None => {
                    let first = prompt_password("Enter repository password: ")?;
                    let second = prompt_password("Confirm repository password: ")?;
                    if first != second {
                        return Err(anyhow!("Passwords do not match"));
                    }
                    first
                }
            };
            if password.is_empty() {
                return Err(anyhow!("Password required (use --no-encryption for a plaintext repository)"));
            }
            let (encryption, _) = crypto::new_encryption_config(&password, KdfParams::default())?;
            configuration = configuration.with_encryption(Some(encryption));
        }

        let repository_id = configuration.repository_id;
        let backend = open_location(&location, RetryConfig::quick())?;
        Repository::create(backend.clone(), configuration, ctx.logger.clone()).await?;

        println!(
            "Initialized {} repository {} at {}",
            if self.no_encryption { "plaintext" } else { "encrypted" },
            repository_id,
            backend.location()
        );
        Ok(())
    }
}
