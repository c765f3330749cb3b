//! Closed catalog of importable tables and their columns.
//!
//! Every table the importer can touch is a [`Table`] variant. Column
//! metadata, keys and owner/client columns live in a static [`TableSchema`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::CoreError;

pub const ID_COLUMN: &str = "id";
pub const OWNER_COLUMN: &str = "user_id";
pub const CLIENT_ID_COLUMN: &str = "client_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn col(name: &'static str, kind: ColumnKind) -> ColumnDef {
    ColumnDef { name, kind }
}

#[derive(Debug)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: &'static [ColumnDef],
    pub primary_key: &'static [&'static str],
    pub owner_column: Option<&'static str>,
    pub client_id_column: Option<&'static str>,
    /// One row per owner whose identifier is the owner's identifier.
    pub owner_singleton: bool,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&'static ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Identity is a tuple of columns; there is no single identifier to map.
    pub fn is_composite(&self) -> bool {
        self.primary_key.len() > 1
    }

    /// Existing rows can be looked up by owner and client identifier.
    pub fn supports_client_lookup(&self) -> bool {
        self.owner_column.is_some() && self.client_id_column.is_some()
    }

    pub fn timestamp_columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns
            .iter()
            .filter(|c| c.kind == ColumnKind::Timestamp)
            .map(|c| c.name)
    }
}

use ColumnKind::{Boolean, Integer, Json, Text, Timestamp};

const USER_SETTINGS_COLUMNS: &[ColumnDef] = &[
    col("id", Text),
    col("general", Json),
    col("language_model", Json),
    col("tts", Json),
    col("created_at", Timestamp),
    col("updated_at", Timestamp),
];

const PLUGINS_COLUMNS: &[ColumnDef] = &[
    col("id", Text),
    col("identifier", Text),
    col("manifest", Json),
    col("settings", Json),
    col("custom_params", Json),
    col("user_id", Text),
    col("client_id", Text),
    col("created_at", Timestamp),
    col("updated_at", Timestamp),
];

const AGENTS_COLUMNS: &[ColumnDef] = &[
    col("id", Text),
    col("slug", Text),
    col("title", Text),
    col("description", Text),
    col("avatar", Text),
    col("system_role", Text),
    col("model", Text),
    col("provider", Text),
    col("tags", Json),
    col("chat_config", Json),
    col("user_id", Text),
    col("client_id", Text),
    col("created_at", Timestamp),
    col("updated_at", Timestamp),
    col("accessed_at", Timestamp),
];

const SESSION_GROUPS_COLUMNS: &[ColumnDef] = &[
    col("id", Text),
    col("name", Text),
    col("sort", Integer),
    col("user_id", Text),
    col("client_id", Text),
    col("created_at", Timestamp),
    col("updated_at", Timestamp),
];

const SESSIONS_COLUMNS: &[ColumnDef] = &[
    col("id", Text),
    col("slug", Text),
    col("title", Text),
    col("description", Text),
    col("avatar", Text),
    col("type", Text),
    col("group_id", Text),
    col("pinned", Boolean),
    col("user_id", Text),
    col("client_id", Text),
    col("created_at", Timestamp),
    col("updated_at", Timestamp),
    col("accessed_at", Timestamp),
];

const AGENTS_TO_SESSIONS_COLUMNS: &[ColumnDef] = &[
    col("agent_id", Text),
    col("session_id", Text),
    col("user_id", Text),
];

const FILES_COLUMNS: &[ColumnDef] = &[
    col("id", Text),
    col("name", Text),
    col("file_type", Text),
    col("size", Integer),
    col("url", Text),
    col("file_hash", Text),
    col("metadata", Json),
    col("user_id", Text),
    col("client_id", Text),
    col("created_at", Timestamp),
    col("updated_at", Timestamp),
    col("accessed_at", Timestamp),
];

const TOPICS_COLUMNS: &[ColumnDef] = &[
    col("id", Text),
    col("title", Text),
    col("favorite", Boolean),
    col("session_id", Text),
    col("history_summary", Text),
    col("metadata", Json),
    col("user_id", Text),
    col("client_id", Text),
    col("created_at", Timestamp),
    col("updated_at", Timestamp),
    col("accessed_at", Timestamp),
];

const THREADS_COLUMNS: &[ColumnDef] = &[
    col("id", Text),
    col("title", Text),
    col("type", Text),
    col("status", Text),
    col("topic_id", Text),
    col("parent_thread_id", Text),
    col("user_id", Text),
    col("client_id", Text),
    col("last_active_at", Timestamp),
    col("created_at", Timestamp),
    col("updated_at", Timestamp),
];

const MESSAGES_COLUMNS: &[ColumnDef] = &[
    col("id", Text),
    col("role", Text),
    col("content", Text),
    col("reasoning", Json),
    col("model", Text),
    col("provider", Text),
    col("favorite", Boolean),
    col("error", Json),
    col("tools", Json),
    col("trace_id", Text),
    col("session_id", Text),
    col("topic_id", Text),
    col("thread_id", Text),
    col("agent_id", Text),
    col("parent_id", Text),
    col("quota_id", Text),
    col("user_id", Text),
    col("client_id", Text),
    col("created_at", Timestamp),
    col("updated_at", Timestamp),
    col("accessed_at", Timestamp),
];

const MESSAGES_FILES_COLUMNS: &[ColumnDef] = &[
    col("file_id", Text),
    col("message_id", Text),
    col("user_id", Text),
];

const fn owned(
    name: &'static str,
    columns: &'static [ColumnDef],
    primary_key: &'static [&'static str],
    client_id: bool,
) -> TableSchema {
    TableSchema {
        name,
        columns,
        primary_key,
        owner_column: Some(OWNER_COLUMN),
        client_id_column: if client_id { Some(CLIENT_ID_COLUMN) } else { None },
        owner_singleton: false,
    }
}

static USER_SETTINGS: TableSchema = TableSchema {
    name: "user_settings",
    columns: USER_SETTINGS_COLUMNS,
    primary_key: &["id"],
    owner_column: None,
    client_id_column: None,
    owner_singleton: true,
};
static PLUGINS: TableSchema = owned("plugins", PLUGINS_COLUMNS, &["id"], true);
static AGENTS: TableSchema = owned("agents", AGENTS_COLUMNS, &["id"], true);
static SESSION_GROUPS: TableSchema =
    owned("session_groups", SESSION_GROUPS_COLUMNS, &["id"], true);
static SESSIONS: TableSchema = owned("sessions", SESSIONS_COLUMNS, &["id"], true);
static AGENTS_TO_SESSIONS: TableSchema = owned(
    "agents_to_sessions",
    AGENTS_TO_SESSIONS_COLUMNS,
    &["agent_id", "session_id"],
    false,
);
static FILES: TableSchema = owned("files", FILES_COLUMNS, &["id"], true);
static TOPICS: TableSchema = owned("topics", TOPICS_COLUMNS, &["id"], true);
static THREADS: TableSchema = owned("threads", THREADS_COLUMNS, &["id"], true);
static MESSAGES: TableSchema = owned("messages", MESSAGES_COLUMNS, &["id"], true);
static MESSAGES_FILES: TableSchema = owned(
    "messages_files",
    MESSAGES_FILES_COLUMNS,
    &["file_id", "message_id"],
    false,
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    UserSettings,
    Plugins,
    Agents,
    SessionGroups,
    Sessions,
    AgentsToSessions,
    Files,
    Topics,
    Threads,
    Messages,
    MessagesFiles,
}

impl Table {
    pub const ALL: [Table; 11] = [
        Table::UserSettings,
        Table::Plugins,
        Table::Agents,
        Table::SessionGroups,
        Table::Sessions,
        Table::AgentsToSessions,
        Table::Files,
        Table::Topics,
        Table::Threads,
        Table::Messages,
        Table::MessagesFiles,
    ];

    pub fn schema(&self) -> &'static TableSchema {
        match self {
            Table::UserSettings => &USER_SETTINGS,
            Table::Plugins => &PLUGINS,
            Table::Agents => &AGENTS,
            Table::SessionGroups => &SESSION_GROUPS,
            Table::Sessions => &SESSIONS,
            Table::AgentsToSessions => &AGENTS_TO_SESSIONS,
            Table::Files => &FILES,
            Table::Topics => &TOPICS,
            Table::Threads => &THREADS,
            Table::Messages => &MESSAGES,
            Table::MessagesFiles => &MESSAGES_FILES,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.schema().name
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::UnknownTable(s.to_string()))
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_parse() {
        for table in Table::ALL {
            assert_eq!(Table::parse(table.as_str()).unwrap(), table);
        }
        assert!(matches!(Table::parse("nope"), Err(CoreError::UnknownTable(_))));
    }

    #[test]
    fn serde_name_matches_schema_name() {
        for table in Table::ALL {
            let json = serde_json::to_string(&table).unwrap();
            assert_eq!(json, format!("\"{}\"", table.as_str()));
        }
    }

    #[test]
    fn primary_key_and_lookup_columns_exist() {
        for table in Table::ALL {
            let schema = table.schema();
            for pk in schema.primary_key {
                assert!(schema.has_column(pk), "{table}: missing pk column {pk}");
            }
            if let Some(owner) = schema.owner_column {
                assert!(schema.has_column(owner));
            }
            if let Some(client) = schema.client_id_column {
                assert!(schema.has_column(client));
            }
        }
    }

    #[test]
    fn composite_tables_have_no_client_lookup() {
        assert!(Table::AgentsToSessions.schema().is_composite());
        assert!(Table::MessagesFiles.schema().is_composite());
        assert!(!Table::AgentsToSessions.schema().supports_client_lookup());
        assert!(!Table::Messages.schema().is_composite());
        assert!(Table::Messages.schema().supports_client_lookup());
        assert!(!Table::UserSettings.schema().supports_client_lookup());
    }

    #[test]
    fn timestamp_columns_follow_kind() {
        let ts: Vec<_> = Table::Threads.schema().timestamp_columns().collect();
        assert_eq!(ts, vec!["last_active_at", "created_at", "updated_at"]);
    }
}
