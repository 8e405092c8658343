use anyhow::{Context as _, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "snapvault.toml";

/// Settings read from `snapvault.toml`. Flags and environment variables win.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Repository used when neither `--repo` nor `SNAPVAULT_REPO` is given
    pub repository: Option<String>,
    /// Root of the per-repository state caches
    pub cache_dir: Option<PathBuf>,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            repository: None,
            cache_dir: None,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Reads `explicit` if given, else the platform config file if it exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match project_dirs() {
                Some(dirs) => dirs.config_dir().join(CONFIG_FILE),
                None => return Ok(Self::default()),
            },
        };
        if explicit.is_none() && !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Directory holding the cached state fragments of one repository.
    pub fn state_cache_dir(&self, repository_id: &uuid::Uuid) -> Option<PathBuf> {
        let root = match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => project_dirs()?.cache_dir().to_path_buf(),
        };
        Some(root.join(repository_id.to_string()).join("states"))
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "snapvault")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial() {
        let settings = Settings::parse("repository = \"/srv/backups\"\n").unwrap();
        assert_eq!(settings.repository.as_deref(), Some("/srv/backups"));
        assert_eq!(settings.log_level, "info");
        assert!(settings.cache_dir.is_none());
    }

    #[test]
    fn test_state_cache_dir() {
        let settings = Settings::parse("cache_dir = \"/var/cache/snapvault\"").unwrap();
        let id = uuid::Uuid::nil();
        assert_eq!(
            settings.state_cache_dir(&id).unwrap(),
            PathBuf::from("/var/cache/snapvault")
                .join(id.to_string())
                .join("states")
        );
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        assert!(Settings::load(Some(Path::new("/nonexistent/snapvault.toml"))).is_err());
    }
}
