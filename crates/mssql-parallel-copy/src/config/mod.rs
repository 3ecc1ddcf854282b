//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::core::TableName;
use crate::error::Result;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config = Self::parse_yaml(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file without validating it, for callers that apply
    /// overrides before validation.
    pub fn load_unvalidated<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_yaml(&content)
    }

    fn parse_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Configured tables, parsed into schema-qualified names.
    pub fn table_names(&self) -> Result<Vec<TableName>> {
        self.copy.tables.iter().map(|t| TableName::parse(t)).collect()
    }
}

impl ConnectionConfig {
    /// Build a connection from an ADO.NET connection string.
    pub fn from_ado(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: Some(connection_string.into()),
            ..Default::default()
        }
    }

    /// Short description for logs: `host:port/database`, never credentials.
    pub fn describe(&self) -> String {
        match &self.connection_string {
            Some(ado) => ado
                .split(';')
                .filter_map(|part| {
                    let (key, value) = part.split_once('=')?;
                    let key = key.trim().to_lowercase();
                    matches!(
                        key.as_str(),
                        "server" | "data source" | "database" | "initial catalog"
                    )
                    .then(|| value.trim().to_string())
                })
                .collect::<Vec<_>>()
                .join("/"),
            None => format!("{}:{}/{}", self.host, self.port, self.database),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML: &str = r#"
source:
  host: src.example.com
  database: tpch
  user: loader
  password: secret
destination:
  connection_string: "Server=tcp:dst.example.com,1433;Database=tpch;User Id=sa;Password=pw;TrustServerCertificate=true"
copy:
  tables:
    - dbo.ORDERS
    - LINEITEM
  workers: 12
"#;

    #[test]
    fn test_from_yaml_applies_defaults() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.source.port, 1433);
        assert_eq!(config.copy.workers, 12);
        assert_eq!(config.copy.logical_partitions, 7);
        assert_eq!(config.copy.row_surrogate, DEFAULT_ROW_SURROGATE);
        assert_eq!(config.copy.monitor_interval_secs, 5);
        assert!(config.copy.table_lock);
        assert!(config.copy.bulk_timeout().is_none());
    }

    #[test]
    fn test_table_names_default_to_dbo() {
        let config = Config::from_yaml(YAML).unwrap();
        let names: Vec<String> = config
            .table_names()
            .unwrap()
            .iter()
            .map(|t| t.to_string())
            .collect();
        assert_eq!(names, vec!["dbo.ORDERS", "dbo.LINEITEM"]);
    }

    #[test]
    fn test_unvalidated_load_accepts_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"copy:\n  workers: 3\n").unwrap();

        let config = Config::load_unvalidated(file.path()).unwrap();
        assert_eq!(config.copy.workers, 3);
        assert!(config.validate().is_err());
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(Config::from_yaml("copy: [").is_err());
    }

    #[test]
    fn test_describe_hides_credentials() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.source.describe(), "src.example.com:1433/tpch");
        let dst = config.destination.describe();
        assert_eq!(dst, "tcp:dst.example.com,1433/tpch");
        assert!(!dst.contains("pw"));
    }
}
