use std::path::Path;

use anyhow::Context;
use qbank::{Config, FsStorage, Storage, storage::path_resolver::config_file};
use tracing::instrument;

#[derive(Debug, clap::Parser)]
pub struct Init {
    /// Default image quality for exports (0-100)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    image_quality: Option<u8>,

    /// Source locator recorded in export metadata (defaults to the bank root)
    #[arg(long)]
    repository: Option<String>,
}

impl Init {
    #[instrument(level = "debug", skip(self))]
    pub fn run(self, root: &Path) -> anyhow::Result<()> {
        let path = config_file(root);
        if path.exists() {
            anyhow::bail!(
                "Question bank already initialized (found existing {})",
                path.display()
            );
        }

        let mut config = Config::default();
        if let Some(quality) = self.image_quality {
            config.set_image_quality(quality);
        }
        config.set_repository(self.repository);

        let text = config.to_toml().map_err(|e| anyhow::anyhow!(e))?;
        FsStorage
            .write(&path, text.as_bytes())
            .with_context(|| format!("Failed to create {}", path.display()))?;

        println!("Initialized question bank in {}", root.display());
        println!("  Created: .qbank/config.toml");
        Ok(())
    }
}
