use serde::{Deserialize, Serialize};
use crate::core::{RepoError, Result};
use crate::entity::check_identifier;

/// Environment variable read by [`RegistryConfig::from_env`].
///
/// Format: comma-separated entries, each either `url` or `name=url`.
pub const CONNECTIONS_ENV: &str = "REPOFLOW_CONNECTIONS";

pub const MEMORY_SCHEME: &str = "memory://";

/// Settings of one backing connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Registry name; defaults to the positional index.
    #[serde(default)]
    pub name: Option<String>,

    /// Connection URL, e.g. `memory://primary`.
    pub url: String,
}

impl ConnectionConfig {
    pub fn new(url: &str) -> Self {
        Self {
            name: None,
            url: url.to_string(),
        }
    }

    /// Set the registry name
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Parse a single `name=url` or `url` entry
    pub fn from_url(entry: &str) -> Result<Self> {
        let entry = entry.trim();
        let config = match entry.split_once('=') {
            Some((name, url)) => Self::new(url.trim()).name(name.trim()),
            None => Self::new(entry),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn scheme(&self) -> Option<&str> {
        self.url.split_once("://").map(|(scheme, _)| scheme)
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(RepoError::Configuration("Connection URL cannot be empty".into()));
        }

        if self.scheme().is_none() {
            return Err(RepoError::Configuration(format!(
                "Connection URL '{}' has no scheme",
                self.url
            )));
        }

        if let Some(name) = &self.name {
            check_identifier(name)?;
        }

        Ok(())
    }
}

/// Settings for a whole [`ConnectionRegistry`](super::ConnectionRegistry).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

impl RegistryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection(mut self, config: ConnectionConfig) -> Self {
        self.connections.push(config);
        self
    }

    /// Parse `{"connections": [{"name": "main", "url": "memory://main"}]}`
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RepoError::Configuration(format!("Invalid registry config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        let raw = std::env::var(CONNECTIONS_ENV).unwrap_or_default();
        Self::parse_list(&raw)
    }

    /// Parse the comma-separated form used by [`CONNECTIONS_ENV`]
    pub fn parse_list(raw: &str) -> Result<Self> {
        let connections = raw
            .split(',')
            .filter(|entry| !entry.trim().is_empty())
            .map(ConnectionConfig::from_url)
            .collect::<Result<Vec<_>>>()?;

        let config = Self { connections };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connections.is_empty() {
            return Err(RepoError::Configuration("No usable connection settings".into()));
        }
        for connection in &self.connections {
            connection.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_url_with_name() {
        let config = ConnectionConfig::from_url(" audit = memory://audit ").unwrap();
        assert_eq!(config.name.as_deref(), Some("audit"));
        assert_eq!(config.url, "memory://audit");
        assert_eq!(config.scheme(), Some("memory"));
    }

    #[test]
    fn test_invalid_url() {
        assert!(ConnectionConfig::from_url("no-scheme").is_err());
        assert!(ConnectionConfig::from_url("bad name=memory://x").is_err());
    }

    #[test]
    fn test_parse_list() {
        let config = RegistryConfig::parse_list("memory://a, replica=memory://b").unwrap();
        assert_eq!(config.connections.len(), 2);
        assert_eq!(config.connections[0].name, None);
        assert_eq!(config.connections[1].name.as_deref(), Some("replica"));
    }

    #[test]
    fn test_empty_settings_are_a_configuration_error() {
        let err = RegistryConfig::parse_list(" , ").unwrap_err();
        assert_eq!(err, RepoError::Configuration("No usable connection settings".into()));
    }

    #[test]
    fn test_from_json() {
        let config = RegistryConfig::from_json(
            r#"{"connections": [{"url": "memory://main"}, {"name": "backup", "url": "memory://backup"}]}"#,
        )
        .unwrap();
        assert_eq!(config.connections[1].name.as_deref(), Some("backup"));
        assert!(RegistryConfig::from_json("{}").is_err());
    }

    #[test]
    fn test_from_env() {
        // SAFETY: no other test touches this variable
        unsafe { std::env::set_var(CONNECTIONS_ENV, "main=memory://main,memory://replica") };
        let config = RegistryConfig::from_env();
        unsafe { std::env::remove_var(CONNECTIONS_ENV) };

        let config = config.unwrap();
        assert_eq!(config.connections.len(), 2);
        assert_eq!(config.connections[0].name.as_deref(), Some("main"));
        assert_eq!(config.connections[0].url, "memory://main");
        assert_eq!(config.connections[1].name, None);
        assert_eq!(config.connections[1].url, "memory://replica");

        let err = RegistryConfig::from_env().unwrap_err();
        assert!(matches!(err, RepoError::Configuration(_)));
    }
}
