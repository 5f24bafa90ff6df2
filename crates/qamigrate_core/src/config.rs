use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::error::MigrateError;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_USER_AGENT: &str = "qamigrate/0.2";
pub const DEFAULT_CONFIG_PATH: &str = ".qamigrate/config.toml";
pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_MIN_TAG_COUNT: u64 = 1;
pub const DEFAULT_POPULAR_VIEWS: u64 = 100;
pub const DEFAULT_API_INTERVAL_SECS: f64 = 1.0;
pub const DEFAULT_IMAGE_FOLDER: &str = "discussion_images_temp";
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 95.0;
pub const DEFAULT_REDIRECT_LOG: &str = "so2ghd.log";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct MigrateConfig {
    #[serde(default)]
    pub github: GithubSection,
    #[serde(default)]
    pub migration: MigrationSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct GithubSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    /// Branch that receives re-hosted images.
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct MigrationSection {
    pub min_tag_count: Option<u64>,
    pub popular_views: Option<u64>,
    #[serde(default)]
    pub ignore_tags: Vec<String>,
    pub api_interval_secs: Option<f64>,
    pub image_folder: Option<PathBuf>,
    pub similarity_threshold: Option<f64>,
    pub redirect_log: Option<PathBuf>,
}

impl MigrationSection {
    pub fn min_tag_count(&self) -> u64 {
        self.min_tag_count.unwrap_or(DEFAULT_MIN_TAG_COUNT)
    }

    pub fn popular_views(&self) -> u64 {
        self.popular_views.unwrap_or(DEFAULT_POPULAR_VIEWS)
    }

    pub fn api_interval_secs(&self) -> f64 {
        self.api_interval_secs.unwrap_or(DEFAULT_API_INTERVAL_SECS)
    }

    pub fn image_folder(&self) -> PathBuf {
        self.image_folder
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE_FOLDER))
    }

    pub fn similarity_threshold(&self) -> f64 {
        self.similarity_threshold
            .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD)
    }

    pub fn redirect_log(&self) -> PathBuf {
        self.redirect_log
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_REDIRECT_LOG))
    }
}

/// Overrides taken from the command line; `None` leaves the file value in place.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub min_tag_count: Option<u64>,
    pub popular_views: Option<u64>,
    pub ignore_tags: Option<Vec<String>>,
    pub api_interval_secs: Option<f64>,
    pub image_folder: Option<PathBuf>,
    pub similarity_threshold: Option<f64>,
    pub redirect_log: Option<PathBuf>,
}

impl MigrateConfig {
    pub fn branch(&self) -> &str {
        self.github.branch.as_deref().unwrap_or(DEFAULT_BRANCH)
    }

    pub fn apply(&mut self, overrides: ConfigOverrides) {
        let migration = &mut self.migration;
        if overrides.min_tag_count.is_some() {
            migration.min_tag_count = overrides.min_tag_count;
        }
        if overrides.popular_views.is_some() {
            migration.popular_views = overrides.popular_views;
        }
        if let Some(tags) = overrides.ignore_tags {
            migration.ignore_tags = tags;
        }
        if overrides.api_interval_secs.is_some() {
            migration.api_interval_secs = overrides.api_interval_secs;
        }
        if overrides.image_folder.is_some() {
            migration.image_folder = overrides.image_folder;
        }
        if overrides.similarity_threshold.is_some() {
            migration.similarity_threshold = overrides.similarity_threshold;
        }
        if overrides.redirect_log.is_some() {
            migration.redirect_log = overrides.redirect_log;
        }
    }

    /// Reject out-of-range values before any remote call is made.
    pub fn validate(&self) -> Result<()> {
        let interval = self.migration.api_interval_secs();
        if !interval.is_finite() || interval < 0.0 {
            bail!(MigrateError::configuration(format!(
                "api interval must be a finite number of seconds >= 0, got {interval}"
            )));
        }
        let similarity = self.migration.similarity_threshold();
        if !(0.0..=100.0).contains(&similarity) {
            bail!(MigrateError::configuration(format!(
                "similarity threshold must be between 0 and 100, got {similarity}"
            )));
        }
        if self.branch().trim().is_empty() {
            bail!(MigrateError::configuration("asset branch cannot be empty"));
        }
        Ok(())
    }
}

/// Load and parse a MigrateConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<MigrateConfig> {
    if !config_path.exists() {
        return Ok(MigrateConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: MigrateConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// A target repository given as `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoIdent {
    pub owner: String,
    pub name: String,
}

impl RepoIdent {
    pub fn parse(value: &str) -> Result<Self> {
        let parts = value.trim().split('/').collect::<Vec<_>>();
        match parts.as_slice() {
            [owner, name] if !owner.trim().is_empty() && !name.trim().is_empty() => Ok(Self {
                owner: owner.trim().to_string(),
                name: name.trim().to_string(),
            }),
            _ => bail!(MigrateError::configuration(format!(
                "repository must be in format 'owner/name', got {value:?}"
            ))),
        }
    }
}

impl std::fmt::Display for RepoIdent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use tempfile::tempdir;

    use super::{ConfigOverrides, MigrateConfig, RepoIdent, load_config};
    use crate::error::MigrateError;

    fn is_configuration_error(error: &anyhow::Error) -> bool {
        matches!(
            error.downcast_ref::<MigrateError>(),
            Some(MigrateError::Configuration(_))
        )
    }

    #[test]
    fn missing_file_yields_defaults() {
        let temp = tempdir().expect("tempdir");
        let config = load_config(&temp.path().join("absent.toml")).expect("load");
        assert_eq!(config, MigrateConfig::default());
        assert_eq!(config.migration.min_tag_count(), 1);
        assert_eq!(config.migration.similarity_threshold(), 95.0);
        assert_eq!(config.branch(), "main");
    }

    #[test]
    fn parses_sections_and_cli_overrides_win() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            r#"
[github]
branch = "assets"

[migration]
min_tag_count = 3
ignore_tags = ["deprecated"]
api_interval_secs = 0.5
image_folder = "cache/images"
"#,
        )
        .expect("write config");

        let mut config = load_config(&path).expect("load");
        assert_eq!(config.branch(), "assets");
        assert_eq!(config.migration.ignore_tags, vec!["deprecated".to_string()]);
        assert_eq!(config.migration.image_folder(), PathBuf::from("cache/images"));

        config.apply(ConfigOverrides {
            min_tag_count: Some(5),
            ..ConfigOverrides::default()
        });
        assert_eq!(config.migration.min_tag_count(), 5);
        assert_eq!(config.migration.api_interval_secs(), 0.5);
        config.validate().expect("valid");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[migration\nmin_tag_count = ").expect("write config");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn out_of_range_values_are_configuration_errors() {
        let mut config = MigrateConfig::default();
        config.migration.similarity_threshold = Some(120.0);
        assert!(is_configuration_error(&config.validate().expect_err("must fail")));

        let mut config = MigrateConfig::default();
        config.migration.api_interval_secs = Some(f64::NAN);
        assert!(is_configuration_error(&config.validate().expect_err("must fail")));

        let mut config = MigrateConfig::default();
        config.migration.api_interval_secs = Some(-1.0);
        assert!(is_configuration_error(&config.validate().expect_err("must fail")));
    }

    #[test]
    fn repository_identifier_needs_owner_and_name() {
        let repo = RepoIdent::parse("bcgov/developer-experience").expect("parse");
        assert_eq!(repo.owner, "bcgov");
        assert_eq!(repo.to_string(), "bcgov/developer-experience");

        for bad in ["bcgov", "bcgov/", "/repo", "a/b/c", ""] {
            let error = RepoIdent::parse(bad).expect_err("must fail");
            assert!(is_configuration_error(&error), "{bad}");
        }
    }
}
