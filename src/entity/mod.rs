//! Entity metadata consumed by the builder chain and the processors.

use lazy_static::lazy_static;
use regex::Regex;
use crate::core::{RepoError, Result};

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier pattern");
}

pub const DEFAULT_DELETED_AT_COLUMN: &str = "deleted_at";
pub const DEFAULT_VERSION_COLUMN: &str = "version";
pub const DEFAULT_MAIN_COLUMN: &str = "is_main";

/// Row-versioning configuration of a version-controlled entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioning {
    pub version_column: String,
    pub main_column: String,
    /// Properties whose modification creates a new version row.
    pub triggers: Vec<String>,
}

impl Versioning {
    pub fn new(triggers: &[&str]) -> Self {
        Self {
            version_column: DEFAULT_VERSION_COLUMN.to_string(),
            main_column: DEFAULT_MAIN_COLUMN.to_string(),
            triggers: triggers.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn columns(mut self, version_column: &str, main_column: &str) -> Self {
        self.version_column = version_column.to_string();
        self.main_column = main_column.to_string();
        self
    }

    pub fn is_trigger(&self, property: &str) -> bool {
        self.triggers.iter().any(|t| t == property)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntitySchema {
    table: String,
    primary_key: Vec<String>,
    unique: Vec<String>,
    soft_delete: Option<String>,
    tenant: Option<String>,
    versioning: Option<Versioning>,
}

impl EntitySchema {
    pub fn new(table: &str, primary_key: &[&str]) -> Self {
        Self {
            table: table.to_string(),
            primary_key: primary_key.iter().map(|c| c.to_string()).collect(),
            unique: Vec::new(),
            soft_delete: None,
            tenant: None,
            versioning: None,
        }
    }

    /// Columns that must be unique among active rows.
    pub fn unique(mut self, columns: &[&str]) -> Self {
        self.unique = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn soft_delete(self) -> Self {
        self.soft_delete_column(DEFAULT_DELETED_AT_COLUMN)
    }

    pub fn soft_delete_column(mut self, column: &str) -> Self {
        self.soft_delete = Some(column.to_string());
        self
    }

    pub fn tenant(mut self, column: &str) -> Self {
        self.tenant = Some(column.to_string());
        self
    }

    pub fn versioned(mut self, versioning: Versioning) -> Self {
        self.versioning = Some(versioning);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn unique_columns(&self) -> &[String] {
        &self.unique
    }

    pub fn deleted_at_column(&self) -> Option<&str> {
        self.soft_delete.as_deref()
    }

    pub fn tenant_column(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    pub fn versioning(&self) -> Option<&Versioning> {
        self.versioning.as_ref()
    }

    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_key.iter().any(|c| c == column)
    }

    pub fn validate(&self) -> Result<()> {
        check_identifier(&self.table)?;

        if self.primary_key.is_empty() {
            return Err(RepoError::Configuration(format!(
                "Entity '{}' must declare a primary key",
                self.table
            )));
        }

        let mut columns: Vec<&str> = Vec::new();
        columns.extend(self.primary_key.iter().map(String::as_str));
        columns.extend(self.unique.iter().map(String::as_str));
        columns.extend(self.soft_delete.as_deref());
        columns.extend(self.tenant.as_deref());
        if let Some(versioning) = &self.versioning {
            columns.push(&versioning.version_column);
            columns.push(&versioning.main_column);
            columns.extend(versioning.triggers.iter().map(String::as_str));
        }
        for column in &columns {
            check_identifier(column)?;
        }

        for (idx, column) in self.primary_key.iter().enumerate() {
            if self.primary_key[..idx].contains(column) {
                return Err(RepoError::Configuration(format!(
                    "Column '{}' appears twice in the primary key of '{}'",
                    column, self.table
                )));
            }
        }

        if let Some(versioning) = &self.versioning
            && versioning.version_column == versioning.main_column
        {
            return Err(RepoError::Configuration(
                "Version and main-row columns must differ".into(),
            ));
        }

        Ok(())
    }
}

pub(crate) fn check_identifier(name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(RepoError::Configuration(format!("Invalid identifier '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_schema_is_valid() {
        let schema = EntitySchema::new("documents", &["id"])
            .unique(&["slug"])
            .soft_delete()
            .tenant("tenant_id")
            .versioned(Versioning::new(&["title", "body"]));

        assert!(schema.validate().is_ok());
        assert_eq!(schema.deleted_at_column(), Some("deleted_at"));
        assert!(schema.versioning().unwrap().is_trigger("title"));
        assert!(!schema.versioning().unwrap().is_trigger("slug"));
    }

    #[test]
    fn test_missing_primary_key() {
        let err = EntitySchema::new("documents", &[]).validate().unwrap_err();
        assert!(matches!(err, RepoError::Configuration(_)));
    }

    #[test]
    fn test_rejects_bad_identifiers() {
        assert!(EntitySchema::new("docs; DROP", &["id"]).validate().is_err());
        assert!(EntitySchema::new("docs", &["id"]).tenant("1tenant").validate().is_err());
    }

    #[test]
    fn test_rejects_repeated_key_column() {
        assert!(EntitySchema::new("docs", &["id", "id"]).validate().is_err());
    }
}
