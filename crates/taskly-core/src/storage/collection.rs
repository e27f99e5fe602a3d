//! Typed collections over the local store
//!
//! A `Collection<T>` maps one entity type onto its table. Each query borrows
//! the shared connection for its own duration only, so collections are cheap
//! to create and never keep a stale connection across `close`.

use std::marker::PhantomData;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, ErrorCode, Row};

use super::error::{StorageError, StorageResult};
use super::local::LocalStore;

/// Mapping between an entity and its table row
pub trait LocalRecord: Sized {
    /// Table name
    const TABLE: &'static str;
    /// Column names; the first must be `id`
    const COLUMNS: &'static [&'static str];
    /// ORDER BY clause for unsorted queries
    const ORDER_BY: &'static str;

    /// Values in `COLUMNS` order
    fn to_values(&self) -> Vec<Value>;
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// Row predicate for collection queries
///
/// Column names come from code, never from user input.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq(&'static str, Value),
    IsNull(&'static str),
    Lt(&'static str, Value),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: &'static str, value: impl Into<Value>) -> Self {
        Filter::Eq(column, value.into())
    }

    /// Rows without an owner
    pub fn unclaimed() -> Self {
        Filter::IsNull("user_id")
    }

    /// Rows owned by `user_id` plus unclaimed rows
    ///
    /// With no user only unclaimed rows are visible.
    pub fn visible_to(user_id: Option<&str>) -> Self {
        match user_id {
            Some(user) => Filter::Or(vec![
                Filter::eq("user_id", user.to_string()),
                Filter::unclaimed(),
            ]),
            None => Filter::unclaimed(),
        }
    }

    pub fn needs_sync() -> Self {
        Filter::eq("needs_sync", true)
    }

    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut list), f) => {
                list.push(f);
                Filter::And(list)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }

    fn to_sql(&self, params: &mut Vec<Value>) -> String {
        match self {
            Filter::All => "1 = 1".to_string(),
            Filter::Eq(column, value) => {
                params.push(value.clone());
                format!("{column} = ?{}", params.len())
            }
            Filter::IsNull(column) => format!("{column} IS NULL"),
            Filter::Lt(column, value) => {
                params.push(value.clone());
                format!("{column} < ?{}", params.len())
            }
            Filter::And(parts) => join(parts, " AND ", params),
            Filter::Or(parts) => join(parts, " OR ", params),
        }
    }
}

fn join(parts: &[Filter], separator: &str, params: &mut Vec<Value>) -> String {
    if parts.is_empty() {
        return "1 = 1".to_string();
    }
    let clauses: Vec<String> = parts
        .iter()
        .map(|p| format!("({})", p.to_sql(params)))
        .collect();
    clauses.join(separator)
}

/// Typed handle onto one table
pub struct Collection<'a, T> {
    store: &'a LocalStore,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T: LocalRecord> Collection<'a, T> {
    pub(crate) fn new(store: &'a LocalStore) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }

    /// Insert a new row; a duplicate id is rejected
    pub fn insert(&self, record: &T) -> StorageResult<()> {
        let values = record.to_values();
        let id = id_of(&values);
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            T::TABLE,
            T::COLUMNS.join(", "),
            placeholders(T::COLUMNS.len())
        );

        self.store.with_connection(|conn| {
            match conn.execute(&sql, params_from_iter(values)) {
                Ok(_) => Ok(()),
                Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                    Err(StorageError::DuplicateId {
                        collection: T::TABLE,
                        id,
                    })
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Overwrite an existing row; returns false if no row has this id
    pub fn update(&self, record: &T) -> StorageResult<bool> {
        let values = record.to_values();
        let assignments: Vec<String> = T::COLUMNS
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, column)| format!("{column} = ?{}", i + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?1",
            T::TABLE,
            assignments.join(", ")
        );

        self.store.with_connection(|conn| {
            let changed = conn.execute(&sql, params_from_iter(values))?;
            Ok(changed > 0)
        })
    }

    /// Insert or replace by id
    pub fn upsert(&self, record: &T) -> StorageResult<()> {
        self.upsert_many(std::slice::from_ref(record)).map(|_| ())
    }

    /// Insert or replace many rows in one transaction
    pub fn upsert_many(&self, records: &[T]) -> StorageResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            T::TABLE,
            T::COLUMNS.join(", "),
            placeholders(T::COLUMNS.len())
        );

        self.store.with_connection(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(&sql)?;
                for record in records {
                    stmt.execute(params_from_iter(record.to_values()))?;
                }
            }
            tx.commit()?;
            Ok(records.len())
        })
    }

    pub fn find_by_id(&self, id: &str) -> StorageResult<Option<T>> {
        let mut rows = self.find(&Filter::eq("id", id.to_string()))?;
        Ok(rows.pop())
    }

    pub fn exists(&self, id: &str) -> StorageResult<bool> {
        Ok(self.count(&Filter::eq("id", id.to_string()))? > 0)
    }

    /// Rows matching `filter`, in the table's default order
    pub fn find(&self, filter: &Filter) -> StorageResult<Vec<T>> {
        let mut params = Vec::new();
        let clause = filter.to_sql(&mut params);
        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {}",
            T::COLUMNS.join(", "),
            T::TABLE,
            clause,
            T::ORDER_BY
        );

        self.store.with_connection(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(params), |row| T::from_row(row))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn find_all(&self) -> StorageResult<Vec<T>> {
        self.find(&Filter::All)
    }

    pub fn count(&self, filter: &Filter) -> StorageResult<usize> {
        let mut params = Vec::new();
        let clause = filter.to_sql(&mut params);
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", T::TABLE, clause);

        self.store.with_connection(|conn| {
            let count: i64 = conn.query_row(&sql, params_from_iter(params), |row| row.get(0))?;
            Ok(count.max(0) as usize)
        })
    }

    /// Delete by id; returns whether a row was removed
    pub fn delete(&self, id: &str) -> StorageResult<bool> {
        Ok(self.delete_many(&Filter::eq("id", id.to_string()))? > 0)
    }

    pub fn delete_many(&self, filter: &Filter) -> StorageResult<usize> {
        let mut params = Vec::new();
        let clause = filter.to_sql(&mut params);
        let sql = format!("DELETE FROM {} WHERE {}", T::TABLE, clause);

        self.store
            .with_connection(|conn| Ok(conn.execute(&sql, params_from_iter(params))?))
    }
}

fn placeholders(n: usize) -> String {
    (1..=n)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn id_of(values: &[Value]) -> String {
    match values.first() {
        Some(Value::Text(id)) => id.clone(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Project, Task, TaskStatus};

    fn task(title: &str, user: Option<&str>) -> Task {
        let mut t = Task::new(title);
        t.user_id = user.map(str::to_string);
        t
    }

    #[test]
    fn test_insert_and_find_by_id() {
        let store = LocalStore::in_memory();
        let tasks = store.collection::<Task>();

        let t = task("Buy milk", None);
        tasks.insert(&t).unwrap();

        assert_eq!(tasks.find_by_id(&t.id).unwrap(), Some(t.clone()));
        assert!(tasks.exists(&t.id).unwrap());
        assert!(tasks.find_by_id("missing").unwrap().is_none());
    }

    #[test]
    fn test_insert_duplicate_id_rejected() {
        let store = LocalStore::in_memory();
        let tasks = store.collection::<Task>();

        let t = task("once", None);
        tasks.insert(&t).unwrap();
        let err = tasks.insert(&t).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateId { .. }));
        assert_eq!(tasks.count(&Filter::All).unwrap(), 1);
    }

    #[test]
    fn test_update_requires_existing_row() {
        let store = LocalStore::in_memory();
        let tasks = store.collection::<Task>();

        let mut t = task("draft", None);
        assert!(!tasks.update(&t).unwrap());

        tasks.insert(&t).unwrap();
        t.title = "final".into();
        t.status = TaskStatus::InProgress;
        assert!(tasks.update(&t).unwrap());
        assert_eq!(tasks.find_by_id(&t.id).unwrap().unwrap().title, "final");
    }

    #[test]
    fn test_visible_to_filter() {
        let store = LocalStore::in_memory();
        let tasks = store.collection::<Task>();

        tasks
            .upsert_many(&[
                task("mine", Some("u1")),
                task("theirs", Some("u2")),
                task("unclaimed", None),
            ])
            .unwrap();

        let mut titles: Vec<String> = tasks
            .find(&Filter::visible_to(Some("u1")))
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        titles.sort();
        assert_eq!(titles, vec!["mine", "unclaimed"]);

        let anonymous = tasks.find(&Filter::visible_to(None)).unwrap();
        assert_eq!(anonymous.len(), 1);
        assert_eq!(anonymous[0].title, "unclaimed");
    }

    #[test]
    fn test_combined_filters_and_delete_many() {
        let store = LocalStore::in_memory();
        let tasks = store.collection::<Task>();

        let mut pending = task("pending", Some("u1"));
        pending.needs_synchronization = true;
        let in_project = task("in project", Some("u1")).in_project("p1");
        tasks.upsert_many(&[pending.clone(), in_project]).unwrap();

        let flagged = tasks.find(&Filter::needs_sync()).unwrap();
        assert_eq!(flagged, vec![pending]);

        let filter = Filter::visible_to(Some("u1")).and(Filter::eq("project_id", "p1".to_string()));
        assert_eq!(tasks.delete_many(&filter).unwrap(), 1);
        assert_eq!(tasks.count(&Filter::All).unwrap(), 1);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = LocalStore::in_memory();
        let projects = store.collection::<Project>();

        let p = Project::new("Home");
        projects.insert(&p).unwrap();
        assert!(projects.delete(&p.id).unwrap());
        assert!(!projects.delete(&p.id).unwrap());
    }

    #[test]
    fn test_filter_and_flattens() {
        let f = Filter::All.and(Filter::unclaimed());
        assert_eq!(f, Filter::unclaimed());

        let f = Filter::unclaimed()
            .and(Filter::needs_sync())
            .and(Filter::eq("status", "New".to_string()));
        assert!(matches!(f, Filter::And(ref parts) if parts.len() == 3));
    }
}
