// src/repository/config.rs

//! Repository configuration
//!
//! The list of repositories lives in a JSON file of the form
//! `{ "repos": [ { "name": ..., "url": ..., ... } ] }`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default location of the repository list
pub const DEFAULT_SOURCES_PATH: &str = "/etc/zenit/sources.list";

/// The only metadata format Zenit reads
pub const RPM_MD: &str = "rpm-md";

fn default_description() -> String {
    String::new()
}

/// A configured package repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub repo_type: String,
    pub enabled: bool,
    /// Higher priority repositories are preferred
    pub priority: i32,
    pub gpgcheck: bool,
    #[serde(default)]
    pub mirrorlist: Option<String>,
    /// URL (or `file://` path) of the repository's public signing key
    #[serde(default)]
    pub gpgkey: Option<String>,
    #[serde(default = "default_description")]
    pub description: String,
}

impl Repository {
    /// Create an enabled rpm-md repository with default settings
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            repo_type: RPM_MD.to_string(),
            enabled: true,
            priority: 100,
            gpgcheck: true,
            mirrorlist: None,
            gpgkey: None,
            description: String::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::ConfigError("Repository with empty name".to_string()));
        }
        if self.name.contains(['/', '\\']) || self.name.starts_with('.') {
            return Err(Error::ConfigError(format!(
                "Invalid repository name '{}'",
                self.name
            )));
        }
        if self.url.trim().is_empty() {
            return Err(Error::ConfigError(format!(
                "Repository '{}' has an empty url",
                self.name
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SourcesFile {
    repos: Vec<Repository>,
}

/// The repository list and the file it was loaded from
#[derive(Debug)]
pub struct SourcesList {
    path: PathBuf,
    repos: Vec<Repository>,
}

impl SourcesList {
    /// Load the repository list
    ///
    /// A missing file is an empty list; a malformed one is a `ConfigError`.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Repository list {} not found, starting empty", path.display());
            return Ok(Self {
                path: path.to_path_buf(),
                repos: Vec::new(),
            });
        }

        let content = fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json(path, &content)
    }

    fn from_json(path: &Path, content: &str) -> Result<Self> {
        let file: SourcesFile = serde_json::from_str(content)
            .map_err(|e| Error::ConfigError(format!("Invalid {}: {}", path.display(), e)))?;

        let mut seen = HashSet::new();
        for repo in &file.repos {
            repo.validate()?;
            if !seen.insert(repo.name.as_str()) {
                return Err(Error::ConfigError(format!(
                    "Duplicate repository '{}' in {}",
                    repo.name,
                    path.display()
                )));
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            repos: file.repos,
        })
    }

    /// Write the list back atomically
    pub fn save(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)
            .map_err(|e| Error::IoError(format!("Failed to create {}: {}", dir.display(), e)))?;

        let data = SourcesFile {
            repos: self.repos.clone(),
        };
        let json = serde_json::to_string_pretty(&data)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize repositories: {}", e)))?;

        let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
        temp.write_all(json.as_bytes())?;
        temp.write_all(b"\n")?;
        temp.persist(&self.path).map_err(|e| {
            Error::IoError(format!("Failed to write {}: {}", self.path.display(), e))
        })?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn repos(&self) -> &[Repository] {
        &self.repos
    }

    pub fn enabled(&self) -> impl Iterator<Item = &Repository> {
        self.repos.iter().filter(|r| r.enabled)
    }

    pub fn get(&self, name: &str) -> Option<&Repository> {
        self.repos.iter().find(|r| r.name == name)
    }

    /// Add a repository and save
    pub fn add(&mut self, repo: Repository) -> Result<()> {
        repo.validate()?;
        if self.get(&repo.name).is_some() {
            return Err(Error::AlreadyExists(format!(
                "Repository '{}' already exists",
                repo.name
            )));
        }
        info!("Added repository: {} ({})", repo.name, repo.url);
        self.repos.push(repo);
        self.save()
    }

    /// Remove a repository and save
    pub fn remove(&mut self, name: &str) -> Result<Repository> {
        let index = self
            .repos
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| Error::NotFoundError(format!("Repository '{}' not found", name)))?;
        let removed = self.repos.remove(index);
        self.save()?;
        info!("Removed repository: {}", name);
        Ok(removed)
    }

    /// Enable or disable a repository and save
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        let repo = self
            .repos
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| Error::NotFoundError(format!("Repository '{}' not found", name)))?;
        repo.enabled = enabled;
        self.save()?;

        info!(
            "Repository '{}' {}",
            name,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sources_in(dir: &TempDir) -> SourcesList {
        SourcesList::load(&dir.path().join("sources.list")).unwrap()
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let sources = sources_in(&dir);
        assert!(sources.repos().is_empty());
    }

    #[test]
    fn test_add_and_reload() {
        let dir = TempDir::new().unwrap();
        let mut sources = sources_in(&dir);
        sources
            .add(Repository::new("oss", "https://example.com/oss/").with_priority(50))
            .unwrap();

        let reloaded = sources_in(&dir);
        let repo = reloaded.get("oss").unwrap();
        assert_eq!(repo.priority, 50);
        assert_eq!(repo.repo_type, RPM_MD);
        assert!(repo.gpgcheck);
    }

    #[test]
    fn test_add_duplicate_repository() {
        let dir = TempDir::new().unwrap();
        let mut sources = sources_in(&dir);
        sources.add(Repository::new("oss", "https://a/")).unwrap();
        let result = sources.add(Repository::new("oss", "https://b/"));
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_remove_enable_disable_missing() {
        let dir = TempDir::new().unwrap();
        let mut sources = sources_in(&dir);
        assert!(matches!(sources.remove("nope"), Err(Error::NotFoundError(_))));
        assert!(matches!(sources.set_enabled("nope", true), Err(Error::NotFoundError(_))));
    }

    #[test]
    fn test_enable_disable_repository() {
        let dir = TempDir::new().unwrap();
        let mut sources = sources_in(&dir);
        sources.add(Repository::new("oss", "https://a/")).unwrap();

        sources.set_enabled("oss", false).unwrap();
        assert_eq!(sources_in(&dir).enabled().count(), 0);

        sources.set_enabled("oss", true).unwrap();
        assert_eq!(sources_in(&dir).enabled().count(), 1);
    }

    #[test]
    fn test_optional_fields_default() {
        let json = r#"{"repos": [{"name": "oss", "url": "https://a/", "type": "rpm-md",
            "enabled": true, "priority": 10, "gpgcheck": false}]}"#;
        let sources = SourcesList::from_json(Path::new("sources.list"), json).unwrap();
        let repo = sources.get("oss").unwrap();
        assert_eq!(repo.mirrorlist, None);
        assert_eq!(repo.description, "");
    }

    #[test]
    fn test_malformed_configuration() {
        let missing_field = r#"{"repos": [{"name": "oss", "url": "https://a/"}]}"#;
        assert!(matches!(
            SourcesList::from_json(Path::new("s"), missing_field),
            Err(Error::ConfigError(_))
        ));

        let duplicate = r#"{"repos": [
            {"name": "a", "url": "u", "type": "rpm-md", "enabled": true, "priority": 1, "gpgcheck": true},
            {"name": "a", "url": "v", "type": "rpm-md", "enabled": true, "priority": 1, "gpgcheck": true}]}"#;
        assert!(matches!(
            SourcesList::from_json(Path::new("s"), duplicate),
            Err(Error::ConfigError(_))
        ));

        assert!(matches!(
            SourcesList::from_json(Path::new("s"), "not json"),
            Err(Error::ConfigError(_))
        ));
    }
}
