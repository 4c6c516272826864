use std::fmt;
use serde::{Deserialize, Serialize};
use crate::core::{Record, Value};

/// What a query does once its rows are selected.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Select,
    Count,
    Insert(Record),
    /// Columns to overwrite on every matching row.
    Update(Record),
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortType {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub column: String,
    pub direction: SortType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(String, Value),
    IsNull(String),
    Not(Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    /// True when the sub-query selects no row. Evaluated against the same
    /// transaction state as the outer statement.
    NotExists(Box<Query>),
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(column.into(), value.into())
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::IsNull(column.into())
    }

    pub fn not(predicate: Predicate) -> Self {
        Self::Not(Box::new(predicate))
    }

    /// Conjunction that collapses to its only member.
    pub fn all(mut predicates: Vec<Predicate>) -> Self {
        if predicates.len() == 1 {
            predicates.remove(0)
        } else {
            Self::And(predicates)
        }
    }

    /// Disjunction that collapses to its only member.
    pub fn any(mut predicates: Vec<Predicate>) -> Self {
        if predicates.len() == 1 {
            predicates.remove(0)
        } else {
            Self::Or(predicates)
        }
    }

    /// Evaluates the predicate; `exists` answers sub-queries.
    pub fn matches(&self, record: &Record, exists: &dyn Fn(&Query) -> bool) -> bool {
        match self {
            Self::Eq(column, expected) => match record.get(column) {
                Some(actual) if !actual.is_null() && !expected.is_null() => actual == expected,
                _ => false,
            },
            Self::IsNull(column) => record.get(column).is_none_or(Value::is_null),
            Self::Not(inner) => !inner.matches(record, exists),
            Self::And(all) => all.iter().all(|p| p.matches(record, exists)),
            Self::Or(any) => any.iter().any(|p| p.matches(record, exists)),
            Self::NotExists(query) => !exists(query),
        }
    }

    /// True if `needle` occurs anywhere inside this predicate tree.
    pub fn contains(&self, needle: &Predicate) -> bool {
        if self == needle {
            return true;
        }
        match self {
            Self::Not(inner) => inner.contains(needle),
            Self::And(list) | Self::Or(list) => list.iter().any(|p| p.contains(needle)),
            Self::NotExists(query) => query.filters().iter().any(|p| p.contains(needle)),
            _ => false,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq(column, value) => write!(f, "{} = {}", column, value.to_literal()),
            Self::IsNull(column) => write!(f, "{} IS NULL", column),
            Self::Not(inner) => write!(f, "NOT ({})", inner),
            Self::And(list) => write_joined(f, list, " AND "),
            Self::Or(list) => write_joined(f, list, " OR "),
            Self::NotExists(query) => write!(f, "NOT EXISTS ({})", query),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, list: &[Predicate], separator: &str) -> fmt::Result {
    if list.is_empty() {
        return write!(f, "{}", if separator == " AND " { "TRUE" } else { "FALSE" });
    }
    let parts: Vec<String> = list.iter().map(|p| p.to_string()).collect();
    write!(f, "({})", parts.join(separator))
}

/// Query accumulator handed through the builder chain.
///
/// Filters can only be appended, so a builder cannot drop a constraint that an
/// earlier builder in the chain added.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    table: String,
    action: Action,
    filters: Vec<Predicate>,
    sort: Vec<Sort>,
    limit: Option<usize>,
    offset: Option<usize>,
    fields: Vec<String>,
    relations: Vec<String>,
}

impl Query {
    /// A pristine `SELECT *` against `table`.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            action: Action::Select,
            filters: Vec::new(),
            sort: Vec::new(),
            limit: None,
            offset: None,
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn select(mut self) -> Self {
        self.action = Action::Select;
        self
    }

    pub fn count(mut self) -> Self {
        self.action = Action::Count;
        self
    }

    pub fn insert(mut self, record: Record) -> Self {
        self.action = Action::Insert(record);
        self
    }

    pub fn update(mut self, changes: Record) -> Self {
        self.action = Action::Update(changes);
        self
    }

    pub fn delete(mut self) -> Self {
        self.action = Action::Delete;
        self
    }

    pub fn and_where(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: SortType) -> Self {
        self.sort.push(Sort {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn fields(mut self, fields: &[String]) -> Self {
        self.fields = fields.to_vec();
        self
    }

    pub fn relations(mut self, relations: &[String]) -> Self {
        self.relations = relations.to_vec();
        self
    }

    /// Removes a column from the pending UPDATE / INSERT payload.
    pub fn without_column(mut self, column: &str) -> Self {
        if let Action::Update(changes) | Action::Insert(changes) = &mut self.action {
            changes.remove(column);
        }
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn filters(&self) -> &[Predicate] {
        &self.filters
    }

    pub fn sort(&self) -> &[Sort] {
        &self.sort
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<usize> {
        self.offset
    }

    pub fn field_list(&self) -> &[String] {
        &self.fields
    }

    pub fn relation_list(&self) -> &[String] {
        &self.relations
    }

    pub fn has_filter(&self, needle: &Predicate) -> bool {
        self.filters.iter().any(|p| p.contains(needle))
    }

    pub fn matches(&self, record: &Record, exists: &dyn Fn(&Query) -> bool) -> bool {
        self.filters.iter().all(|p| p.matches(record, exists))
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.action {
            Action::Select => {
                let columns = if self.fields.is_empty() {
                    "*".to_string()
                } else {
                    self.fields.join(", ")
                };
                write!(f, "SELECT {} FROM {}", columns, self.table)?;
            }
            Action::Count => write!(f, "SELECT COUNT(*) FROM {}", self.table)?,
            Action::Insert(record) => {
                let columns: Vec<&str> = record.keys().map(String::as_str).collect();
                let values: Vec<String> = record.values().map(Value::to_literal).collect();
                return write!(
                    f,
                    "INSERT INTO {} ({}) VALUES ({})",
                    self.table,
                    columns.join(", "),
                    values.join(", ")
                );
            }
            Action::Update(changes) => {
                let sets: Vec<String> = changes
                    .iter()
                    .map(|(column, value)| format!("{} = {}", column, value.to_literal()))
                    .collect();
                write!(f, "UPDATE {} SET {}", self.table, sets.join(", "))?;
            }
            Action::Delete => write!(f, "DELETE FROM {}", self.table)?,
        }

        if !self.filters.is_empty() {
            let parts: Vec<String> = self.filters.iter().map(|p| p.to_string()).collect();
            write!(f, " WHERE {}", parts.join(" AND "))?;
        }
        if !self.sort.is_empty() {
            let parts: Vec<String> = self
                .sort
                .iter()
                .map(|s| match s.direction {
                    SortType::Asc => format!("{} ASC", s.column),
                    SortType::Desc => format!("{} DESC", s.column),
                })
                .collect();
            write!(f, " ORDER BY {}", parts.join(", "))?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {}", limit)?;
        }
        if let Some(offset) = self.offset {
            write!(f, " OFFSET {}", offset)?;
        }
        Ok(())
    }
}
