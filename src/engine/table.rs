use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use im::OrdMap;
use crate::core::{Record, RepoError, Result, TableSchema, Value};
use super::QueryOutput;
use super::query::{Action, Predicate, Query, SortType};
use super::transaction::Change;

static NULL: Value = Value::Null;

/// All tables of one engine. Cloning is O(1), which is what makes a
/// transaction's private working copy cheap.
pub type Tables = im::HashMap<String, Table>;

#[derive(Debug, Clone)]
pub struct Table {
    schema: Arc<TableSchema>,
    rows: OrdMap<u64, Record>,
    next_row_id: u64,
}

impl Table {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema: Arc::new(schema),
            rows: OrdMap::new(),
            next_row_id: 0,
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn insert(&mut self, record: Record) -> Result<(u64, Record)> {
        let row = self.schema.normalize(record)?;
        self.check_primary_key(&row, None)?;

        let id = self.next_row_id;
        self.next_row_id += 1;
        self.rows.insert(id, row.clone());
        Ok((id, row))
    }

    pub fn update(&mut self, id: u64, record: Record) -> Result<Record> {
        let row = self.schema.normalize(record)?;
        self.check_primary_key(&row, Some(id))?;
        self.rows.insert(id, row.clone());
        Ok(row)
    }

    pub fn delete(&mut self, id: u64) -> bool {
        self.rows.remove(&id).is_some()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.rows.contains_key(&id)
    }

    fn check_primary_key(&self, row: &Record, ignore_id: Option<u64>) -> Result<()> {
        let key_columns = self.schema.primary_key();
        if key_columns.is_empty() {
            return Ok(());
        }

        let same_key = |other: &Record| {
            key_columns
                .iter()
                .all(|column| row.get(*column) == other.get(*column))
        };

        let duplicate = self
            .rows
            .iter()
            .any(|(id, other)| Some(*id) != ignore_id && same_key(other));

        if duplicate {
            let values: Vec<String> = key_columns
                .iter()
                .map(|column| row.get(*column).unwrap_or(&NULL).to_literal())
                .collect();
            return Err(RepoError::ConstraintViolation(format!(
                "Duplicate primary key ({}) in table '{}'",
                values.join(", "),
                self.schema.name()
            )));
        }
        Ok(())
    }
}

fn table<'a>(tables: &'a Tables, name: &str) -> Result<&'a Table> {
    tables
        .get(name)
        .ok_or_else(|| RepoError::TableNotFound(name.to_string()))
}

fn exists_in(tables: &Tables, query: &Query) -> bool {
    let Some(table) = tables.get(query.table_name()) else {
        return false;
    };
    table
        .rows
        .values()
        .any(|row| query.matches(row, &|sub| exists_in(tables, sub)))
}

fn matching_ids(tables: &Tables, table: &Table, query: &Query) -> Vec<u64> {
    table
        .rows
        .iter()
        .filter(|(_, row)| query.matches(row, &|sub| exists_in(tables, sub)))
        .map(|(id, _)| *id)
        .collect()
}

/// Evaluates a read-only statement.
pub(crate) fn read(tables: &Tables, query: &Query) -> Result<QueryOutput> {
    let source = table(tables, query.table_name())?;
    let ids = matching_ids(tables, source, query);

    match query.action() {
        Action::Count => Ok(QueryOutput::Count(ids.len() as u64)),
        Action::Select => {
            let mut rows: Vec<&Record> = ids.iter().filter_map(|id| source.rows.get(id)).collect();
            if !query.sort().is_empty() {
                rows.sort_by(|a, b| {
                    for sort in query.sort() {
                        let left = a.get(&sort.column).unwrap_or(&NULL);
                        let right = b.get(&sort.column).unwrap_or(&NULL);
                        let ordering = match sort.direction {
                            SortType::Asc => left.sort_cmp(right),
                            SortType::Desc => right.sort_cmp(left),
                        };
                        if ordering != Ordering::Equal {
                            return ordering;
                        }
                    }
                    Ordering::Equal
                });
            }

            let offset = query.offset_value().unwrap_or(0);
            let limit = query.limit_value().unwrap_or(usize::MAX);
            let fields = query.field_list();

            let rows = rows
                .into_iter()
                .skip(offset)
                .take(limit)
                .map(|row| {
                    if fields.is_empty() {
                        row.clone()
                    } else {
                        row.iter()
                            .filter(|(column, _)| fields.contains(*column))
                            .map(|(column, value)| (column.clone(), value.clone()))
                            .collect()
                    }
                })
                .collect();
            Ok(QueryOutput::Rows(rows))
        }
        _ => Err(RepoError::Execution(format!(
            "Statement is not read-only: {}",
            query
        ))),
    }
}

/// Applies one statement to `tables`, returning its output and the changes it
/// made. The statement is all-or-nothing: on error `tables` is untouched.
pub(crate) fn write(tables: &mut Tables, query: &Query) -> Result<(QueryOutput, Vec<Change>)> {
    let name = query.table_name().to_string();
    let mut target = table(tables, &name)?.clone();
    let mut changes = Vec::new();

    let output = match query.action() {
        Action::Select | Action::Count => return Ok((read(tables, query)?, changes)),
        Action::Insert(record) => {
            let (row_id, row) = target.insert(record.clone())?;
            changes.push(Change::InsertRow { table: name.clone(), row_id, row });
            QueryOutput::Affected(1)
        }
        Action::Update(set) => {
            let ids = matching_ids(tables, &target, query);
            let guards: Vec<Query> = query
                .filters()
                .iter()
                .filter_map(|predicate| match predicate {
                    Predicate::NotExists(sub) => Some((**sub).clone()),
                    _ => None,
                })
                .collect();
            for id in &ids {
                let mut merged = target.rows.get(id).cloned().unwrap_or_default();
                merged.extend(set.iter().map(|(column, value)| (column.clone(), value.clone())));
                let row = target.update(*id, merged)?;
                changes.push(Change::UpdateRow {
                    table: name.clone(),
                    row_id: *id,
                    row,
                    guards: guards.clone(),
                });
            }
            QueryOutput::Affected(ids.len() as u64)
        }
        Action::Delete => {
            let ids = matching_ids(tables, &target, query);
            for id in &ids {
                target.delete(*id);
                changes.push(Change::DeleteRow { table: name.clone(), row_id: *id });
            }
            QueryOutput::Affected(ids.len() as u64)
        }
    };

    tables.insert(name, target);
    Ok((output, changes))
}

/// Re-applies a transaction's change log on top of the committed tables.
///
/// Rows inserted by the transaction get fresh ids here, so later changes that
/// reference the working-copy id are translated through `inserted`. An update
/// whose guard now finds a row fails the whole replay.
pub(crate) fn replay(tables: &mut Tables, changes: &[Change]) -> Result<()> {
    let mut inserted: HashMap<(&str, u64), u64> = HashMap::new();

    for change in changes {
        let name = change.table_name();
        if let Change::UpdateRow { guards, .. } = change
            && let Some(guard) = guards.iter().find(|guard| exists_in(tables, guard))
        {
            return Err(RepoError::ConstraintViolation(format!(
                "Conditional update on '{}' no longer holds at commit: {}",
                name, guard
            )));
        }
        let target = tables
            .get_mut(name)
            .ok_or_else(|| RepoError::TableNotFound(name.to_string()))?;

        match change {
            Change::InsertRow { row_id, row, .. } => {
                let (committed_id, _) = target.insert(row.clone())?;
                inserted.insert((name, *row_id), committed_id);
            }
            Change::UpdateRow { row_id, row, .. } => {
                let id = inserted.get(&(name, *row_id)).copied().unwrap_or(*row_id);
                // a row deleted by a concurrent commit stays deleted
                if target.contains(id) {
                    target.update(id, row.clone())?;
                }
            }
            Change::DeleteRow { row_id, .. } => {
                let id = inserted.get(&(name, *row_id)).copied().unwrap_or(*row_id);
                target.delete(id);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType};
    use crate::engine::Predicate;

    fn tables() -> Tables {
        let schema = TableSchema::new(
            "items",
            vec![
                Column::new("id", DataType::Integer).primary_key(),
                Column::new("label", DataType::Text).not_null(),
            ],
        );
        let mut tables = Tables::new();
        tables.insert("items".to_string(), Table::new(schema));
        tables
    }

    fn item(id: i64, label: &str) -> Record {
        let mut record = Record::new();
        record.insert("id".into(), Value::Integer(id));
        record.insert("label".into(), Value::from(label));
        record
    }

    #[test]
    fn test_insert_rejects_duplicate_primary_key() {
        let mut tables = tables();
        write(&mut tables, &Query::table("items").insert(item(1, "a"))).unwrap();
        let err = write(&mut tables, &Query::table("items").insert(item(1, "b"))).unwrap_err();
        assert!(matches!(err, RepoError::ConstraintViolation(_)));
    }

    #[test]
    fn test_failed_update_leaves_table_untouched() {
        let mut tables = tables();
        write(&mut tables, &Query::table("items").insert(item(1, "a"))).unwrap();
        write(&mut tables, &Query::table("items").insert(item(2, "b"))).unwrap();

        let mut set = Record::new();
        set.insert("label".into(), Value::Null);
        assert!(write(&mut tables, &Query::table("items").update(set)).is_err());

        let rows = read(&tables, &Query::table("items")).unwrap().into_rows().unwrap();
        assert!(rows.iter().all(|row| !row["label"].is_null()));
    }

    #[test]
    fn test_select_sorts_and_pages() {
        let mut tables = tables();
        for (id, label) in [(1, "c"), (2, "a"), (3, "b")] {
            write(&mut tables, &Query::table("items").insert(item(id, label))).unwrap();
        }

        let query = Query::table("items").order_by("label", SortType::Desc).offset(1).limit(1);
        let rows = read(&tables, &query).unwrap().into_rows().unwrap();
        assert_eq!(rows, vec![item(3, "b")]);
    }

    #[test]
    fn test_replay_translates_inserted_row_ids() {
        let committed = tables();
        let mut working = committed.clone();

        let (_, mut changes) = write(&mut working, &Query::table("items").insert(item(7, "x"))).unwrap();
        let mut set = Record::new();
        set.insert("label".into(), Value::from("y"));
        let (_, more) = write(
            &mut working,
            &Query::table("items").update(set).and_where(Predicate::eq("id", 7)),
        )
        .unwrap();
        changes.extend(more);

        let mut target = committed.clone();
        replay(&mut target, &changes).unwrap();
        let rows = read(&target, &Query::table("items")).unwrap().into_rows().unwrap();
        assert_eq!(rows, vec![item(7, "y")]);
    }

    #[test]
    fn test_replay_rechecks_update_guards() {
        let mut committed = tables();
        write(&mut committed, &Query::table("items").insert(item(1, "a"))).unwrap();

        let mut working = committed.clone();
        let mut set = Record::new();
        set.insert("label".into(), Value::from("b"));
        let taken = Query::table("items").and_where(Predicate::eq("label", "b"));
        let guarded = Query::table("items")
            .update(set)
            .and_where(Predicate::eq("id", 1))
            .and_where(Predicate::NotExists(Box::new(taken)));
        let (output, changes) = write(&mut working, &guarded).unwrap();
        assert_eq!(output.affected().unwrap(), 1);

        write(&mut committed, &Query::table("items").insert(item(2, "b"))).unwrap();
        let before = committed.clone();
        let err = replay(&mut committed, &changes).unwrap_err();
        assert!(matches!(err, RepoError::ConstraintViolation(_)));

        let rows = read(&committed, &Query::table("items")).unwrap().into_rows().unwrap();
        let unchanged = read(&before, &Query::table("items")).unwrap().into_rows().unwrap();
        assert_eq!(rows, unchanged);
        assert_eq!(rows[0], item(1, "a"));
    }
}
