//! Row mappings for the synchronized entities

use std::str::FromStr;

use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::Row;

use super::collection::LocalRecord;
use crate::models::{Notification, Project, ReminderSettings, Task};

/// UTC milliseconds, the on-disk timestamp representation
pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.trunc_subsecs(3).timestamp_millis()
}

fn time_value(at: DateTime<Utc>) -> Value {
    Value::Integer(to_millis(at))
}

fn opt_time_value(at: Option<DateTime<Utc>>) -> Value {
    at.map(time_value).unwrap_or(Value::Null)
}

fn opt_text(value: &Option<String>) -> Value {
    value.clone().map(Value::Text).unwrap_or(Value::Null)
}

fn millis_to_time(idx: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}

fn get_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    millis_to_time(idx, row.get(idx)?)
}

fn get_opt_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<i64>>(idx)?
        .map(|millis| millis_to_time(idx, millis))
        .transpose()
}

fn get_enum<E>(row: &Row<'_>, idx: usize) -> rusqlite::Result<E>
where
    E: FromStr,
    E::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn reminders_values(r: &ReminderSettings) -> [Value; 3] {
    [r.day.into(), r.hour.into(), r.minute.into()]
}

fn get_reminders(row: &Row<'_>, first: usize) -> rusqlite::Result<ReminderSettings> {
    Ok(ReminderSettings {
        day: row.get(first)?,
        hour: row.get(first + 1)?,
        minute: row.get(first + 2)?,
    })
}

impl LocalRecord for Task {
    const TABLE: &'static str = "tasks";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "title",
        "description",
        "created_at",
        "due_date",
        "completed_at",
        "priority",
        "status",
        "project_id",
        "user_id",
        "needs_sync",
        "day_reminder",
        "hour_reminder",
        "minute_reminder",
    ];
    const ORDER_BY: &'static str = "created_at DESC, id";

    fn to_values(&self) -> Vec<Value> {
        let mut values = vec![
            Value::Text(self.id.clone()),
            Value::Text(self.title.clone()),
            opt_text(&self.description),
            time_value(self.created_at),
            opt_time_value(self.due_date),
            opt_time_value(self.completed_at),
            Value::Text(self.priority.as_str().to_string()),
            Value::Text(self.status.as_str().to_string()),
            opt_text(&self.project_id),
            opt_text(&self.user_id),
            self.needs_synchronization.into(),
        ];
        values.extend(reminders_values(&self.reminders));
        values
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            created_at: get_time(row, 3)?,
            due_date: get_opt_time(row, 4)?,
            completed_at: get_opt_time(row, 5)?,
            priority: get_enum(row, 6)?,
            status: get_enum(row, 7)?,
            project_id: row.get(8)?,
            user_id: row.get(9)?,
            needs_synchronization: row.get(10)?,
            reminders: get_reminders(row, 11)?,
        })
    }
}

impl LocalRecord for Project {
    const TABLE: &'static str = "projects";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "name",
        "description",
        "created_at",
        "due_date",
        "color",
        "user_id",
        "needs_sync",
        "day_reminder",
        "hour_reminder",
        "minute_reminder",
    ];
    const ORDER_BY: &'static str = "created_at DESC, id";

    fn to_values(&self) -> Vec<Value> {
        let mut values = vec![
            Value::Text(self.id.clone()),
            Value::Text(self.name.clone()),
            opt_text(&self.description),
            time_value(self.created_at),
            opt_time_value(self.due_date),
            opt_text(&self.color),
            opt_text(&self.user_id),
            self.needs_synchronization.into(),
        ];
        values.extend(reminders_values(&self.reminders));
        values
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            created_at: get_time(row, 3)?,
            due_date: get_opt_time(row, 4)?,
            color: row.get(5)?,
            user_id: row.get(6)?,
            needs_synchronization: row.get(7)?,
            reminders: get_reminders(row, 8)?,
        })
    }
}

impl LocalRecord for Notification {
    const TABLE: &'static str = "notifications";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "message",
        "title",
        "timestamp",
        "type",
        "category",
        "entity_id",
        "project_id",
        "user_id",
        "needs_sync",
    ];
    const ORDER_BY: &'static str = "timestamp DESC, id";

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.id.clone()),
            Value::Text(self.message.clone()),
            opt_text(&self.title),
            time_value(self.timestamp),
            Value::Text(self.kind.as_str().to_string()),
            Value::Text(self.category.as_str().to_string()),
            opt_text(&self.entity_id),
            opt_text(&self.project_id),
            opt_text(&self.user_id),
            self.needs_synchronization.into(),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            message: row.get(1)?,
            title: row.get(2)?,
            timestamp: get_time(row, 3)?,
            kind: get_enum(row, 4)?,
            category: get_enum(row, 5)?,
            entity_id: row.get(6)?,
            project_id: row.get(7)?,
            user_id: row.get(8)?,
            needs_synchronization: row.get(9)?,
        })
    }
}
