use serde::{Deserialize, Serialize};
use crate::core::Value;
use crate::engine::SortType;
use crate::executor::Target;
use crate::session::AtomicSession;

/// Per-call options shared by every repository operation.
#[derive(Debug, Clone, Default)]
pub struct OperationOptions {
    /// Run inside this transaction instead of autocommit.
    pub atomic_session: Option<AtomicSession>,
    pub tenant_id: Option<Value>,
    /// Passed through to the engine.
    pub relations: Vec<String>,
    /// Column projection for reads; empty selects every column.
    pub fields: Vec<String>,
    pub sort_by: Option<String>,
    pub sort_type: SortType,
    /// Re-read the row after `create`.
    pub refetch: bool,
    pub include_deleted: bool,
    /// Specific version of a versioned entity; the main row otherwise.
    pub version: Option<i64>,
}

impl OperationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(mut self, session: AtomicSession) -> Self {
        self.atomic_session = Some(session);
        self
    }

    pub fn tenant(mut self, tenant_id: impl Into<Value>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn relations(mut self, relations: &[&str]) -> Self {
        self.relations = relations.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn fields(mut self, fields: &[&str]) -> Self {
        self.fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn sort_by(mut self, column: &str, sort_type: SortType) -> Self {
        self.sort_by = Some(column.to_string());
        self.sort_type = sort_type;
        self
    }

    pub fn refetch(mut self, refetch: bool) -> Self {
        self.refetch = refetch;
        self
    }

    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }

    /// Copy of these options bound to `session`.
    pub(crate) fn in_session(&self, session: AtomicSession) -> Self {
        Self {
            atomic_session: Some(session),
            ..self.clone()
        }
    }

    /// The session if one is set, `default` otherwise.
    pub(crate) fn target(&self, default: Target<'static>) -> Target<'_> {
        match &self.atomic_session {
            Some(session) => Target::Session(session),
            None => default,
        }
    }
}

/// One-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: usize,
    pub size: usize,
}

impl PageRequest {
    pub fn new(page: usize, size: usize) -> Self {
        Self { page, size }
    }

    pub fn offset(&self) -> usize {
        self.page.max(1).saturating_sub(1).saturating_mul(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, size: 50 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<M> {
    pub items: Vec<M>,
    pub page: usize,
    pub size: usize,
    pub total: u64,
}

impl<M> Page<M> {
    pub fn pages(&self) -> u64 {
        if self.size == 0 {
            return 0;
        }
        self.total.div_ceil(self.size as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_offset() {
        assert_eq!(PageRequest::new(1, 20).offset(), 0);
        assert_eq!(PageRequest::new(3, 20).offset(), 40);
        assert_eq!(PageRequest::new(0, 20).offset(), 0);
    }

    #[test]
    fn test_page_count() {
        let page: Page<u8> = Page { items: vec![], page: 1, size: 20, total: 41 };
        assert_eq!(page.pages(), 3);
    }

    #[test]
    fn test_target_defaults_without_session() {
        let options = OperationOptions::new().tenant("acme").version(2);
        assert!(matches!(options.target(Target::All), Target::All));
        assert_eq!(options.tenant_id, Some(Value::from("acme")));
    }
}
