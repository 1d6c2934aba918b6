//! Shell automation models: history, aliases, scripts and triggers.

use serde::{Deserialize, Serialize};

use super::ensure;
use crate::codec::{ColumnCodec, SqlValue};
use crate::error::DbResult;
use crate::mapper::{surrogate, Entity, RowReader};
use crate::schema::Table;

/// An executed command. Never modified after insert; removed only by
/// retention pruning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellHistory {
    pub id: i64,

    /// Command as executed
    pub command: String,

    /// Language of the natural-language input, when the command was translated
    pub original_language: Option<String>,

    pub translated_command: Option<String>,
    pub result: String,
    pub success: bool,
    pub timestamp: i64,
}

impl Entity for ShellHistory {
    const TABLE: Table = Table::ShellHistory;
    const ENTITY: &'static str = "shell history entry";

    fn key(&self) -> SqlValue {
        surrogate(self.id)
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            surrogate(self.id),
            self.command.encode(),
            self.original_language.encode(),
            self.translated_command.encode(),
            self.result.encode(),
            self.success.encode(),
            self.timestamp.encode(),
        ]
    }

    fn from_row(row: &RowReader<'_>) -> DbResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            command: row.get("command")?,
            original_language: row.get("original_language")?,
            translated_command: row.get("translated_command")?,
            result: row.get("result")?,
            success: row.get("success")?,
            timestamp: row.get("timestamp")?,
        })
    }
}

/// Shortcut name expanding to a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellAlias {
    pub alias: String,
    pub target: String,
    pub description: Option<String>,
    pub created_at: i64,
}

impl Entity for ShellAlias {
    const TABLE: Table = Table::ShellAliases;
    const ENTITY: &'static str = "shell alias";

    fn key(&self) -> SqlValue {
        self.alias.encode()
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.alias.encode(),
            self.target.encode(),
            self.description.encode(),
            self.created_at.encode(),
        ]
    }

    fn from_row(row: &RowReader<'_>) -> DbResult<Self> {
        Ok(Self {
            alias: row.get("alias")?,
            target: row.get("target")?,
            description: row.get("description")?,
            created_at: row.get("created_at")?,
        })
    }

    fn validate(&self) -> DbResult<()> {
        ensure::<Self>(!self.alias.trim().is_empty(), "alias must not be blank")
    }
}

/// Stored script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellScript {
    pub id: i64,
    pub name: String,
    pub content: String,
    pub description: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,

    /// Never decreases
    pub execution_count: i32,

    pub last_executed: Option<i64>,
}

impl Entity for ShellScript {
    const TABLE: Table = Table::ShellScripts;
    const ENTITY: &'static str = "shell script";

    fn key(&self) -> SqlValue {
        surrogate(self.id)
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            surrogate(self.id),
            self.name.encode(),
            self.content.encode(),
            self.description.encode(),
            self.created_at.encode(),
            self.updated_at.encode(),
            self.execution_count.encode(),
            self.last_executed.encode(),
        ]
    }

    fn from_row(row: &RowReader<'_>) -> DbResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            content: row.get("content")?,
            description: row.get("description")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            execution_count: row.get("execution_count")?,
            last_executed: row.get("last_executed")?,
        })
    }

    fn validate(&self) -> DbResult<()> {
        ensure::<Self>(
            self.execution_count >= 0,
            "execution count must be non-negative",
        )
    }
}

/// Automation rule that runs a script when an event fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellTrigger {
    pub id: i64,
    pub name: String,

    /// Event name such as `ON_BOOT` or `ON_HEADPHONES_PLUGGED`
    pub trigger_type: String,

    pub script_id: i64,

    /// Disabled triggers are never evaluated
    pub enabled: bool,

    /// Extra matching conditions, stored as JSON
    pub conditions: Option<serde_json::Value>,
}

impl Entity for ShellTrigger {
    const TABLE: Table = Table::ShellTriggers;
    const ENTITY: &'static str = "shell trigger";

    fn key(&self) -> SqlValue {
        surrogate(self.id)
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            surrogate(self.id),
            self.name.encode(),
            self.trigger_type.encode(),
            self.script_id.encode(),
            self.enabled.encode(),
            self.conditions.encode(),
        ]
    }

    fn from_row(row: &RowReader<'_>) -> DbResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            trigger_type: row.get("trigger_type")?,
            script_id: row.get("script_id")?,
            enabled: row.get("enabled")?,
            conditions: row.get("conditions")?,
        })
    }
}
