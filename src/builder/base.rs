use crate::core::{Record, Result};
use crate::engine::{Predicate, Query, SortType};
use super::{BuildContext, QueryBuilder};

/// Primary-key lookups, soft-delete filtering, unique-key collisions and
/// paging. Always the first link of the chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaseBuilder;

impl BaseBuilder {
    /// Hides soft-deleted rows unless the caller asked for them.
    fn active(acc: Query, ctx: &BuildContext<'_>) -> Query {
        match ctx.schema.deleted_at_column() {
            Some(column) if !ctx.options.include_deleted => acc.and_where(Predicate::is_null(column)),
            _ => acc,
        }
    }

    fn projected(acc: Query, ctx: &BuildContext<'_>) -> Query {
        acc.fields(&ctx.options.fields)
            .relations(&ctx.options.relations)
    }

    /// The changes of a patch/update minus the primary-key columns.
    fn changes(ctx: &BuildContext<'_>) -> Result<Record> {
        let mut changes = ctx.record()?.clone();
        changes.retain(|column, _| !ctx.schema.is_primary_key(column));
        Ok(changes)
    }
}

/// OR over the unique columns of `record`: a NULL value becomes an IS NULL
/// test and a missing column is skipped. Empty when nothing can collide.
pub(crate) fn unique_predicate(columns: &[String], record: &Record) -> Predicate {
    let predicates = columns
        .iter()
        .filter_map(|column| match record.get(column) {
            Some(value) if value.is_null() => Some(Predicate::is_null(column.as_str())),
            Some(value) => Some(Predicate::eq(column.as_str(), value.clone())),
            None => None,
        })
        .collect();
    Predicate::any(predicates)
}

impl QueryBuilder for BaseBuilder {
    fn name(&self) -> &'static str {
        "base"
    }

    fn count_all(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        Ok(Self::active(acc.count(), ctx))
    }

    fn hard_delete(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        Ok(acc.delete().and_where(ctx.key_predicate()?))
    }

    fn exists(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        Ok(Self::active(acc.count().and_where(ctx.key_predicate()?), ctx))
    }

    fn find_by_key(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        let acc = Self::active(acc.select().and_where(ctx.key_predicate()?), ctx);
        Ok(Self::projected(acc, ctx).limit(1))
    }

    fn page(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        let mut acc = Self::projected(Self::active(acc.select(), ctx), ctx);

        acc = match &ctx.options.sort_by {
            Some(column) => acc.order_by(column.as_str(), ctx.options.sort_type),
            None => ctx
                .schema
                .primary_key()
                .iter()
                .fold(acc, |acc, column| acc.order_by(column.as_str(), SortType::Asc)),
        };

        if let Some(page) = ctx.page {
            acc = acc.offset(page.offset()).limit(page.size);
        }
        Ok(acc)
    }

    fn patch(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        let changes = Self::changes(ctx)?;
        Ok(Self::active(acc.update(changes).and_where(ctx.key_predicate()?), ctx))
    }

    fn recover_options(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        Ok(acc.select().and_where(ctx.key_predicate()?).limit(1))
    }

    fn update(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        let changes = Self::changes(ctx)?;
        Ok(Self::active(acc.update(changes).and_where(ctx.key_predicate()?), ctx))
    }

    fn duplicates(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        let record = ctx.record()?;
        let mut acc = acc
            .select()
            .and_where(unique_predicate(ctx.schema.unique_columns(), record))
            .and_where(Predicate::not(ctx.key_predicate()?));
        if let Some(column) = ctx.schema.deleted_at_column() {
            acc = acc.and_where(Predicate::is_null(column));
        }
        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Operation;
    use crate::core::{Key, Value};
    use crate::entity::EntitySchema;
    use crate::processor::{OperationOptions, PageRequest};

    fn accounts() -> EntitySchema {
        EntitySchema::new("accounts", &["id"])
            .unique(&["email", "handle"])
            .soft_delete()
    }

    fn build(operation: Operation, ctx: &BuildContext<'_>) -> Query {
        BaseBuilder.apply(operation, ctx.fresh(), ctx).unwrap()
    }

    #[test]
    fn test_find_excludes_deleted_unless_asked() {
        let schema = accounts();
        let key = Key::from(5_i64);

        let options = OperationOptions::new();
        let query = build(Operation::FindByKey, &BuildContext::new(&schema, &options).with_key(&key));
        assert!(query.has_filter(&Predicate::is_null("deleted_at")));

        let options = OperationOptions::new().include_deleted();
        let query = build(Operation::FindByKey, &BuildContext::new(&schema, &options).with_key(&key));
        assert!(!query.has_filter(&Predicate::is_null("deleted_at")));
    }

    #[test]
    fn test_reads_carry_requested_fields_and_relations() {
        let schema = accounts();
        let key = Key::from(5_i64);
        let options = OperationOptions::new().relations(&["owner"]);
        let options = OperationOptions {
            fields: vec!["email".to_string()],
            ..options
        };
        let query = build(Operation::FindByKey, &BuildContext::new(&schema, &options).with_key(&key));

        assert_eq!(query.relation_list(), ["owner".to_string()]);
        assert_eq!(query.field_list(), ["email".to_string()]);
    }

    #[test]
    fn test_hard_delete_ignores_delete_state() {
        let schema = accounts();
        let key = Key::from(5_i64);
        let options = OperationOptions::new();
        let query = build(Operation::HardDelete, &BuildContext::new(&schema, &options).with_key(&key));

        assert_eq!(query.to_string(), "DELETE FROM accounts WHERE id = 5");
    }

    #[test]
    fn test_patch_never_rewrites_the_key() {
        let schema = accounts();
        let key = Key::from(5_i64);
        let mut changes = Record::new();
        changes.insert("id".into(), Value::Integer(5));
        changes.insert("email".into(), Value::from("a@b.c"));
        let options = OperationOptions::new();

        let ctx = BuildContext::new(&schema, &options)
            .with_key(&key)
            .with_record(&changes);
        let query = build(Operation::Patch, &ctx);

        match query.action() {
            crate::engine::Action::Update(set) => {
                assert!(!set.contains_key("id"));
                assert_eq!(set.get("email"), Some(&Value::from("a@b.c")));
            }
            other => panic!("expected an update, got {:?}", other),
        }
    }

    #[test]
    fn test_unique_predicate_null_and_undefined() {
        let columns = vec!["email".to_string(), "handle".to_string(), "phone".to_string()];
        let mut record = Record::new();
        record.insert("email".into(), Value::from("a@b.c"));
        record.insert("handle".into(), Value::Null);

        let predicate = unique_predicate(&columns, &record);
        assert_eq!(
            predicate,
            Predicate::Or(vec![
                Predicate::eq("email", "a@b.c"),
                Predicate::is_null("handle"),
            ])
        );
        assert_eq!(unique_predicate(&columns, &Record::new()), Predicate::Or(vec![]));
    }

    #[test]
    fn test_duplicates_excludes_the_row_itself() {
        let schema = accounts();
        let key = Key::from(5_i64);
        let mut row = Record::new();
        row.insert("id".into(), Value::Integer(5));
        row.insert("email".into(), Value::from("a@b.c"));
        let options = OperationOptions::new().include_deleted();

        let ctx = BuildContext::new(&schema, &options)
            .with_key(&key)
            .with_record(&row);
        let query = build(Operation::Duplicates, &ctx);

        assert!(query.has_filter(&Predicate::not(Predicate::eq("id", 5))));
        assert!(query.has_filter(&Predicate::is_null("deleted_at")));
        assert!(query.has_filter(&Predicate::eq("email", "a@b.c")));
    }

    #[test]
    fn test_page_sorts_and_slices() {
        let schema = accounts();
        let options = OperationOptions::new().sort_by("email", SortType::Desc);
        let request = PageRequest::new(3, 20);
        let query = build(Operation::Page, &BuildContext::new(&schema, &options).with_page(&request));

        assert_eq!(query.sort()[0].column, "email");
        assert_eq!(query.sort()[0].direction, SortType::Desc);
        assert_eq!(query.offset_value(), Some(40));
        assert_eq!(query.limit_value(), Some(20));
    }

    #[test]
    fn test_page_defaults_to_key_order() {
        let schema = accounts();
        let options = OperationOptions::new();
        let query = build(Operation::Page, &BuildContext::new(&schema, &options));
        assert_eq!(query.sort()[0].column, "id");
        assert_eq!(query.sort()[0].direction, SortType::Asc);
    }
}
