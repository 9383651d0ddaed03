use serde::{Deserialize, Serialize};

/// Configuration for a question bank.
///
/// Read from `.qbank/config.toml` below the bank root. Every field has a
/// default, so a missing file is equivalent to an empty one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Versions", into = "Versions")]
pub struct Config {
    /// Image quality (0-100) used by exports when the caller does not supply
    /// one.
    image_quality: u8,

    /// Width of the bounding box exported images are shrunk to fit.
    max_image_width: u32,

    /// Height of the bounding box exported images are shrunk to fit.
    max_image_height: u32,

    /// How deep the intake walk descends below `unprocessed/`.
    max_walk_depth: usize,

    /// Source locator written into export metadata.
    ///
    /// When unset the bank root is used.
    repository: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image_quality: default_image_quality(),
            max_image_width: default_max_image_width(),
            max_image_height: default_max_image_height(),
            max_walk_depth: default_max_walk_depth(),
            repository: None,
        }
    }
}

impl Config {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML content is invalid.
    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("Failed to parse config file: {e}"))
    }

    /// Serializes the configuration to TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized.
    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| format!("Failed to serialize config: {e}"))
    }

    /// Default export image quality, clamped to 0-100.
    #[must_use]
    pub fn image_quality(&self) -> u8 {
        self.image_quality.min(100)
    }

    /// Bounding box `(width, height)` for exported images.
    #[must_use]
    pub const fn max_image_size(&self) -> (u32, u32) {
        (self.max_image_width, self.max_image_height)
    }

    /// Maximum depth of the intake directory walk.
    #[must_use]
    pub const fn max_walk_depth(&self) -> usize {
        self.max_walk_depth
    }

    /// Source locator for export metadata, if configured.
    #[must_use]
    pub fn repository(&self) -> Option<&str> {
        self.repository.as_deref()
    }

    /// Sets the source locator.
    pub fn set_repository(&mut self, repository: Option<String>) {
        self.repository = repository;
    }

    /// Sets the default export image quality.
    pub const fn set_image_quality(&mut self, quality: u8) {
        self.image_quality = quality;
    }
}

const fn default_image_quality() -> u8 {
    80
}

const fn default_max_image_width() -> u32 {
    1920
}

const fn default_max_image_height() -> u32 {
    1080
}

const fn default_max_walk_depth() -> usize {
    32
}

/// The serialized versions of the configuration.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "_version")]
enum Versions {
    #[serde(rename = "1")]
    V1 {
        #[serde(default = "default_image_quality")]
        image_quality: u8,

        #[serde(default = "default_max_image_width")]
        max_image_width: u32,

        #[serde(default = "default_max_image_height")]
        max_image_height: u32,

        #[serde(default = "default_max_walk_depth")]
        max_walk_depth: usize,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        repository: Option<String>,
    },
}

impl From<Versions> for Config {
    fn from(versions: Versions) -> Self {
        match versions {
            Versions::V1 {
                image_quality,
                max_image_width,
                max_image_height,
                max_walk_depth,
                repository,
            } => Self {
                image_quality,
                max_image_width,
                max_image_height,
                max_walk_depth,
                repository,
            },
        }
    }
}

impl From<Config> for Versions {
    fn from(config: Config) -> Self {
        Self::V1 {
            image_quality: config.image_quality,
            max_image_width: config.max_image_width,
            max_image_height: config.max_image_height,
            max_walk_depth: config.max_walk_depth,
            repository: config.repository,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reads_all_fields() {
        let config = Config::parse(
            "_version = \"1\"\nimage_quality = 55\nmax_image_width = 800\nmax_image_height = 600\nmax_walk_depth = 4\nrepository = \"https://example.org/bank\"\n",
        )
        .unwrap();

        assert_eq!(config.image_quality(), 55);
        assert_eq!(config.max_image_size(), (800, 600));
        assert_eq!(config.max_walk_depth(), 4);
        assert_eq!(config.repository(), Some("https://example.org/bank"));
    }

    #[test]
    fn parse_invalid_toml_returns_error() {
        let error = Config::parse("_version = \"1\"\nimage_quality = \"high\"\n").unwrap_err();
        assert!(error.starts_with("Failed to parse config file:"));
    }

    #[test]
    fn empty_file_returns_default() {
        let actual = Config::parse(r#"_version = "1""#).unwrap();
        assert_eq!(actual, Config::default());
    }

    #[test]
    fn quality_is_clamped() {
        let config = Config::parse("_version = \"1\"\nimage_quality = 250\n").unwrap();
        assert_eq!(config.image_quality(), 100);
    }

    #[test]
    fn round_trips_through_toml() {
        let mut config = Config::default();
        config.set_repository(Some("local".to_string()));
        config.set_image_quality(42);
        let text = config.to_toml().unwrap();
        assert_eq!(Config::parse(&text).unwrap(), config);
    }
}
