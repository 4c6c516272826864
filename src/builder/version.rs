use crate::core::Result;
use crate::engine::{Predicate, Query};
use crate::entity::Versioning;
use super::{BuildContext, QueryBuilder};

/// Restricts reads to the main row, or to the version named in the options,
/// and writes to the main row.
#[derive(Debug, Clone)]
pub struct VersionBuilder {
    version_column: String,
    main_column: String,
}

impl VersionBuilder {
    pub fn new(versioning: &Versioning) -> Self {
        Self {
            version_column: versioning.version_column.clone(),
            main_column: versioning.main_column.clone(),
        }
    }

    fn main(&self) -> Predicate {
        Predicate::eq(self.main_column.as_str(), true)
    }

    fn requested(&self, ctx: &BuildContext<'_>) -> Option<Predicate> {
        ctx.options
            .version
            .map(|version| Predicate::eq(self.version_column.as_str(), version))
    }

    fn read_scope(&self, acc: Query, ctx: &BuildContext<'_>) -> Query {
        acc.and_where(self.requested(ctx).unwrap_or_else(|| self.main()))
    }

    fn write_scope(&self, acc: Query, ctx: &BuildContext<'_>) -> Query {
        let acc = acc.and_where(self.main());
        match self.requested(ctx) {
            Some(version) => acc.and_where(version),
            None => acc,
        }
    }
}

impl QueryBuilder for VersionBuilder {
    fn name(&self) -> &'static str {
        "version"
    }

    fn count_all(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        Ok(self.read_scope(acc, ctx))
    }

    fn hard_delete(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        Ok(self.write_scope(acc, ctx))
    }

    fn exists(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        Ok(self.read_scope(acc, ctx))
    }

    fn find_by_key(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        Ok(self.read_scope(acc, ctx))
    }

    fn page(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        Ok(self.read_scope(acc, ctx))
    }

    fn patch(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        Ok(self
            .write_scope(acc, ctx)
            .without_column(&self.version_column)
            .without_column(&self.main_column))
    }

    fn recover_options(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        Ok(self.read_scope(acc, ctx))
    }

    fn update(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        Ok(self
            .write_scope(acc, ctx)
            .without_column(&self.version_column)
            .without_column(&self.main_column))
    }

    fn duplicates(&self, acc: Query, _ctx: &BuildContext<'_>) -> Result<Query> {
        Ok(acc.and_where(self.main()))
    }

    fn demote(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        Ok(self.write_scope(acc, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Operation;
    use crate::core::{Key, Record, Value};
    use crate::engine::Action;
    use crate::entity::EntitySchema;
    use crate::processor::OperationOptions;

    fn builder() -> VersionBuilder {
        VersionBuilder::new(&Versioning::new(&["title"]))
    }

    #[test]
    fn test_reads_default_to_main_row() {
        let schema = EntitySchema::new("pages", &["id"]);
        let options = OperationOptions::new();
        let ctx = BuildContext::new(&schema, &options);

        let query = builder().apply(Operation::CountAll, ctx.fresh().count(), &ctx).unwrap();
        assert_eq!(query.to_string(), "SELECT COUNT(*) FROM pages WHERE is_main = true");
    }

    #[test]
    fn test_writes_stay_on_main_row() {
        let schema = EntitySchema::new("pages", &["id"]);
        let options = OperationOptions::new().version(2);
        let key = Key::from(1_i64);
        let ctx = BuildContext::new(&schema, &options).with_key(&key);

        let query = builder().apply(Operation::HardDelete, ctx.fresh().delete(), &ctx).unwrap();
        assert!(query.has_filter(&Predicate::eq("is_main", true)));
        assert!(query.has_filter(&Predicate::eq("version", 2)));
    }

    #[test]
    fn test_update_never_rewrites_version_columns() {
        let schema = EntitySchema::new("pages", &["id"]);
        let options = OperationOptions::new();
        let mut record = Record::new();
        record.insert("version".into(), Value::Integer(9));
        record.insert("is_main".into(), Value::Boolean(false));
        record.insert("slug".into(), Value::from("home"));
        let ctx = BuildContext::new(&schema, &options).with_record(&record);

        let query = builder()
            .apply(Operation::Update, ctx.fresh().update(record.clone()), &ctx)
            .unwrap();
        match query.action() {
            Action::Update(set) => assert_eq!(set.keys().collect::<Vec<_>>(), vec!["slug"]),
            other => panic!("expected an update, got {:?}", other),
        }
    }

    #[test]
    fn test_patch_cannot_clear_main_flag() {
        let schema = EntitySchema::new("pages", &["id"]);
        let options = OperationOptions::new();
        let key = Key::from(1_i64);
        let mut record = Record::new();
        record.insert("is_main".into(), Value::Boolean(false));
        record.insert("slug".into(), Value::from("home"));
        let ctx = BuildContext::new(&schema, &options).with_key(&key).with_record(&record);

        let patch = builder()
            .apply(Operation::Patch, ctx.fresh().update(record.clone()), &ctx)
            .unwrap();
        match patch.action() {
            Action::Update(set) => assert_eq!(set.keys().collect::<Vec<_>>(), vec!["slug"]),
            other => panic!("expected an update, got {:?}", other),
        }

        let demote = builder()
            .apply(Operation::Demote, ctx.fresh().update(record.clone()), &ctx)
            .unwrap();
        assert!(demote.has_filter(&Predicate::eq("is_main", true)));
        match demote.action() {
            Action::Update(set) => assert_eq!(set.get("is_main"), Some(&Value::Boolean(false))),
            other => panic!("expected an update, got {:?}", other),
        }
    }
}
