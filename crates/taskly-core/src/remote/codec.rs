//! Entity <-> remote document conversion
//!
//! Enums are written as their string projection and timestamps as RFC 3339
//! UTC with millisecond precision. Decoding also accepts the legacy integer
//! enum encoding (variant index).

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde_json::Value;

use super::document::{Document, DocumentPath, RemoteEntity};
use super::error::{RemoteError, RemoteResult};
use crate::models::{Notification, Project, ReminderSettings, StringEnum, Task};

pub(crate) fn encode_time(at: DateTime<Utc>) -> Value {
    Value::String(at.trunc_subsecs(3).to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn encode_opt_time(at: Option<DateTime<Utc>>) -> Value {
    at.map(encode_time).unwrap_or(Value::Null)
}

fn encode_opt_str(value: &Option<String>) -> Value {
    value.clone().map(Value::String).unwrap_or(Value::Null)
}

/// Typed field access with path context for errors
pub(crate) struct Fields<'a> {
    path: &'a DocumentPath,
    doc: &'a Document,
}

impl<'a> Fields<'a> {
    pub(crate) fn new(path: &'a DocumentPath, doc: &'a Document) -> Self {
        Self { path, doc }
    }

    fn error(&self, key: &str, details: &str) -> RemoteError {
        RemoteError::Decode {
            path: self.path.to_string(),
            details: format!("field '{key}': {details}"),
        }
    }

    pub(crate) fn str(&self, key: &str) -> RemoteResult<String> {
        self.opt_str(key)?
            .ok_or_else(|| self.error(key, "missing"))
    }

    /// Empty strings decode as absent
    pub(crate) fn opt_str(&self, key: &str) -> RemoteResult<Option<String>> {
        match self.doc.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(self.error(key, "expected a string")),
        }
    }

    pub(crate) fn bool_or(&self, key: &str, default: bool) -> bool {
        self.doc.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub(crate) fn time(&self, key: &str) -> RemoteResult<DateTime<Utc>> {
        self.opt_time(key)?
            .ok_or_else(|| self.error(key, "missing"))
    }

    pub(crate) fn opt_time(&self, key: &str) -> RemoteResult<Option<DateTime<Utc>>> {
        match self.doc.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(|t| Some(t.with_timezone(&Utc).trunc_subsecs(3)))
                .map_err(|e| self.error(key, &e.to_string())),
            Some(_) => Err(self.error(key, "expected an RFC 3339 timestamp")),
        }
    }

    pub(crate) fn enumeration<E: StringEnum>(&self, key: &str) -> RemoteResult<E> {
        match self.doc.get(key) {
            Some(Value::String(s)) => s.parse().map_err(|e: crate::models::ParseEnumError| {
                self.error(key, &e.to_string())
            }),
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|i| E::variants().get(i as usize).copied())
                .ok_or_else(|| self.error(key, "enum index out of range")),
            _ => Err(self.error(key, "missing")),
        }
    }

    fn reminders(&self) -> ReminderSettings {
        ReminderSettings {
            day: self.bool_or("DayReminder", true),
            hour: self.bool_or("HourReminder", true),
            minute: self.bool_or("MinuteReminder", true),
        }
    }
}

fn insert_reminders(doc: &mut Document, reminders: &ReminderSettings) {
    doc.insert("DayReminder".into(), reminders.day.into());
    doc.insert("HourReminder".into(), reminders.hour.into());
    doc.insert("MinuteReminder".into(), reminders.minute.into());
}

/// Id stored in the body, falling back to the path
fn document_id(fields: &Fields<'_>, path: &DocumentPath) -> RemoteResult<String> {
    Ok(fields
        .opt_str("Id")?
        .unwrap_or_else(|| path.id().to_string()))
}

impl RemoteEntity for Task {
    const COLLECTION: &'static str = "tasks";
    const USER_COLLECTION: &'static str = "userTasks";

    fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("Id".into(), self.id.clone().into());
        doc.insert("Title".into(), self.title.clone().into());
        doc.insert("Description".into(), encode_opt_str(&self.description));
        doc.insert("CreatedAt".into(), encode_time(self.created_at));
        doc.insert("DueDate".into(), encode_opt_time(self.due_date));
        doc.insert("CompletedAt".into(), encode_opt_time(self.completed_at));
        doc.insert("Priority".into(), self.priority.as_str().into());
        doc.insert("Status".into(), self.status.as_str().into());
        doc.insert("ProjectId".into(), encode_opt_str(&self.project_id));
        doc.insert("UserId".into(), encode_opt_str(&self.user_id));
        doc.insert(
            "NeedsSynchronization".into(),
            self.needs_synchronization.into(),
        );
        insert_reminders(&mut doc, &self.reminders);
        doc
    }

    fn from_document(path: &DocumentPath, doc: &Document) -> RemoteResult<Self> {
        let f = Fields::new(path, doc);
        Ok(Self {
            id: document_id(&f, path)?,
            title: f.str("Title")?,
            description: f.opt_str("Description")?,
            created_at: f.time("CreatedAt")?,
            due_date: f.opt_time("DueDate")?,
            completed_at: f.opt_time("CompletedAt")?,
            priority: f.enumeration("Priority")?,
            status: f.enumeration("Status")?,
            project_id: f.opt_str("ProjectId")?,
            user_id: f.opt_str("UserId")?,
            needs_synchronization: f.bool_or("NeedsSynchronization", false),
            reminders: f.reminders(),
        })
    }
}

impl RemoteEntity for Project {
    const COLLECTION: &'static str = "projects";
    const USER_COLLECTION: &'static str = "userProjects";

    fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("Id".into(), self.id.clone().into());
        doc.insert("Name".into(), self.name.clone().into());
        doc.insert("Description".into(), encode_opt_str(&self.description));
        doc.insert("CreatedAt".into(), encode_time(self.created_at));
        doc.insert("DueDate".into(), encode_opt_time(self.due_date));
        doc.insert("Color".into(), encode_opt_str(&self.color));
        doc.insert("UserId".into(), encode_opt_str(&self.user_id));
        doc.insert(
            "NeedsSynchronization".into(),
            self.needs_synchronization.into(),
        );
        insert_reminders(&mut doc, &self.reminders);
        doc
    }

    fn from_document(path: &DocumentPath, doc: &Document) -> RemoteResult<Self> {
        let f = Fields::new(path, doc);
        Ok(Self {
            id: document_id(&f, path)?,
            name: f.str("Name")?,
            description: f.opt_str("Description")?,
            created_at: f.time("CreatedAt")?,
            due_date: f.opt_time("DueDate")?,
            color: f.opt_str("Color")?,
            user_id: f.opt_str("UserId")?,
            needs_synchronization: f.bool_or("NeedsSynchronization", false),
            reminders: f.reminders(),
        })
    }
}

impl RemoteEntity for Notification {
    const COLLECTION: &'static str = "notifications";
    const USER_COLLECTION: &'static str = "userNotifications";

    fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("Id".into(), self.id.clone().into());
        doc.insert("Message".into(), self.message.clone().into());
        doc.insert("Title".into(), encode_opt_str(&self.title));
        doc.insert("Timestamp".into(), encode_time(self.timestamp));
        doc.insert("Type".into(), self.kind.as_str().into());
        doc.insert("Category".into(), self.category.as_str().into());
        doc.insert("EntityId".into(), encode_opt_str(&self.entity_id));
        doc.insert("ProjectId".into(), encode_opt_str(&self.project_id));
        doc.insert("UserId".into(), encode_opt_str(&self.user_id));
        doc.insert(
            "NeedsSynchronization".into(),
            self.needs_synchronization.into(),
        );
        doc
    }

    fn from_document(path: &DocumentPath, doc: &Document) -> RemoteResult<Self> {
        let f = Fields::new(path, doc);
        Ok(Self {
            id: document_id(&f, path)?,
            message: f.opt_str("Message")?.unwrap_or_default(),
            title: f.opt_str("Title")?,
            timestamp: f.time("Timestamp")?,
            kind: f.enumeration("Type")?,
            category: f.enumeration("Category")?,
            entity_id: f.opt_str("EntityId")?,
            project_id: f.opt_str("ProjectId")?,
            user_id: f.opt_str("UserId")?,
            needs_synchronization: f.bool_or("NeedsSynchronization", false),
        })
    }
}
