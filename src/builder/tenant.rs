use crate::core::{RepoError, Result, Value};
use crate::engine::{Predicate, Query};
use super::{BuildContext, QueryBuilder};

/// Scopes every query to one tenant.
#[derive(Debug, Clone)]
pub struct TenantBuilder {
    column: String,
}

impl TenantBuilder {
    pub fn new(column: &str) -> Self {
        Self {
            column: column.to_string(),
        }
    }

    /// The tenant id from the options, else from the written record.
    fn tenant(&self, ctx: &BuildContext<'_>) -> Result<Value> {
        if let Some(tenant) = &ctx.options.tenant_id {
            return Ok(tenant.clone());
        }
        ctx.record
            .and_then(|record| record.get(&self.column))
            .filter(|value| !value.is_null())
            .cloned()
            .ok_or_else(|| {
                RepoError::Validation(format!(
                    "Tenant id is required for '{}'",
                    ctx.schema.table()
                ))
            })
    }

    fn scoped(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        Ok(acc.and_where(Predicate::eq(self.column.as_str(), self.tenant(ctx)?)))
    }
}

impl QueryBuilder for TenantBuilder {
    fn name(&self) -> &'static str {
        "tenant"
    }

    fn count_all(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        self.scoped(acc, ctx)
    }

    fn hard_delete(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        self.scoped(acc, ctx)
    }

    fn exists(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        self.scoped(acc, ctx)
    }

    fn find_by_key(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        self.scoped(acc, ctx)
    }

    fn page(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        self.scoped(acc, ctx)
    }

    fn patch(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        Ok(self.scoped(acc, ctx)?.without_column(&self.column))
    }

    fn recover_options(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        self.scoped(acc, ctx)
    }

    fn update(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        Ok(self.scoped(acc, ctx)?.without_column(&self.column))
    }

    fn duplicates(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        self.scoped(acc, ctx)
    }
}
