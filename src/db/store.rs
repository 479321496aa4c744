use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use super::{open_database, open_memory_database, DatabaseError};
use crate::models::{DecisionRecord, DecisionSummary, NewDecision, ReflectionUpdate};
use crate::pipeline::orchestrator::{DecisionStore, StoreError};

const DECISION_COLUMNS: &str = "id, created_at, updated_at, title, context, constraints, options, \
     structured_decision, bias_report, outcome_simulation, reflection_insight, \
     actual_outcome, actual_outcome_date, execution_log";

/// SQLite-backed decision store.
///
/// Stage outputs and the execution log are stored as JSON text columns;
/// timestamps as fixed-width RFC 3339 strings so lexicographic order matches
/// chronological order.
pub struct SqliteDecisionStore {
    conn: Mutex<Connection>,
}

impl SqliteDecisionStore {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self {
            conn: Mutex::new(open_database(path)?),
        })
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self {
            conn: Mutex::new(open_memory_database()?),
        })
    }

    fn insert_decision(&self, decision: &NewDecision) -> Result<DecisionRecord, DatabaseError> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let record = DecisionRecord {
            id,
            created_at: now,
            updated_at: now,
            title: decision.input.title.clone(),
            context: decision.input.context.clone(),
            constraints: decision.input.constraints.clone(),
            options: decision.input.options.clone(),
            structured_decision: decision.structured_decision.clone(),
            bias_report: decision.bias_report.clone(),
            outcome_simulation: decision.outcome_simulation.clone(),
            reflection_insight: None,
            actual_outcome: None,
            actual_outcome_date: None,
            execution_log: decision.execution_log.clone(),
        };

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO decisions (id, created_at, updated_at, title, context, constraints, options, \
             structured_decision, bias_report, outcome_simulation, execution_log) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.id.to_string(),
                encode_timestamp(&record.created_at),
                encode_timestamp(&record.updated_at),
                record.title,
                record.context,
                encode_json("constraints", &record.constraints)?,
                encode_json("options", &record.options)?,
                encode_json("structured_decision", &record.structured_decision)?,
                encode_json("bias_report", &record.bias_report)?,
                encode_json("outcome_simulation", &record.outcome_simulation)?,
                encode_json("execution_log", &record.execution_log)?,
            ],
        )?;

        Ok(record)
    }

    fn get_decision(&self, id: &Uuid) -> Result<Option<DecisionRecord>, DatabaseError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {DECISION_COLUMNS} FROM decisions WHERE id = ?1"),
                params![id.to_string()],
                RawDecisionRow::from_row,
            )
            .optional()?;

        raw.map(RawDecisionRow::into_record).transpose()
    }

    fn apply_reflection(
        &self,
        id: &Uuid,
        update: &ReflectionUpdate,
    ) -> Result<DecisionRecord, DatabaseError> {
        {
            let conn = self.lock()?;
            let affected = conn.execute(
                "UPDATE decisions SET reflection_insight = ?1, actual_outcome = ?2, \
                 actual_outcome_date = ?3, execution_log = ?4, updated_at = ?5 WHERE id = ?6",
                params![
                    encode_json("reflection_insight", &update.reflection_insight)?,
                    update.actual_outcome,
                    encode_timestamp(&update.actual_outcome_date),
                    encode_json("execution_log", &update.execution_log)?,
                    encode_timestamp(&Utc::now()),
                    id.to_string(),
                ],
            )?;
            if affected == 0 {
                return Err(DatabaseError::NotFound(*id));
            }
        }

        self.get_decision(id)?.ok_or(DatabaseError::NotFound(*id))
    }

    fn list_decisions(&self) -> Result<Vec<DecisionSummary>, DatabaseError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, created_at, reflection_insight IS NOT NULL \
             FROM decisions ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, bool>(3)?,
            ))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let (id, title, created_at, has_reflection) = row?;
            summaries.push(DecisionSummary {
                id: parse_uuid(&id)?,
                title,
                created_at: parse_timestamp("created_at", &created_at)?,
                has_reflection,
            });
        }
        Ok(summaries)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::Corrupt {
            column: "connection".to_string(),
            reason: "lock poisoned".to_string(),
        })
    }
}

impl DecisionStore for SqliteDecisionStore {
    fn save(&self, decision: &NewDecision) -> Result<DecisionRecord, StoreError> {
        self.insert_decision(decision)
            .map_err(|e| StoreError(e.to_string()))
    }

    fn find_by_id(&self, id: &Uuid) -> Result<Option<DecisionRecord>, StoreError> {
        self.get_decision(id).map_err(|e| StoreError(e.to_string()))
    }

    fn update_reflection(
        &self,
        id: &Uuid,
        update: &ReflectionUpdate,
    ) -> Result<DecisionRecord, StoreError> {
        self.apply_reflection(id, update)
            .map_err(|e| StoreError(e.to_string()))
    }

    fn list(&self) -> Result<Vec<DecisionSummary>, StoreError> {
        self.list_decisions()
            .map_err(|e| StoreError(e.to_string()))
    }
}

/// Raw column values, converted outside the rusqlite closure so JSON and
/// timestamp errors map to `DatabaseError` instead of panicking.
struct RawDecisionRow {
    id: String,
    created_at: String,
    updated_at: String,
    title: String,
    context: String,
    constraints: String,
    options: String,
    structured_decision: String,
    bias_report: String,
    outcome_simulation: String,
    reflection_insight: Option<String>,
    actual_outcome: Option<String>,
    actual_outcome_date: Option<String>,
    execution_log: String,
}

impl RawDecisionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            created_at: row.get(1)?,
            updated_at: row.get(2)?,
            title: row.get(3)?,
            context: row.get(4)?,
            constraints: row.get(5)?,
            options: row.get(6)?,
            structured_decision: row.get(7)?,
            bias_report: row.get(8)?,
            outcome_simulation: row.get(9)?,
            reflection_insight: row.get(10)?,
            actual_outcome: row.get(11)?,
            actual_outcome_date: row.get(12)?,
            execution_log: row.get(13)?,
        })
    }

    fn into_record(self) -> Result<DecisionRecord, DatabaseError> {
        Ok(DecisionRecord {
            id: parse_uuid(&self.id)?,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
            title: self.title,
            context: self.context,
            constraints: decode_json("constraints", &self.constraints)?,
            options: decode_json("options", &self.options)?,
            structured_decision: decode_json("structured_decision", &self.structured_decision)?,
            bias_report: decode_json("bias_report", &self.bias_report)?,
            outcome_simulation: decode_json("outcome_simulation", &self.outcome_simulation)?,
            reflection_insight: self
                .reflection_insight
                .as_deref()
                .map(|raw| decode_json("reflection_insight", raw))
                .transpose()?,
            actual_outcome: self.actual_outcome,
            actual_outcome_date: self
                .actual_outcome_date
                .as_deref()
                .map(|raw| parse_timestamp("actual_outcome_date", raw))
                .transpose()?,
            execution_log: decode_json("execution_log", &self.execution_log)?,
        })
    }
}

fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Corrupt {
            column: column.to_string(),
            reason: e.to_string(),
        })
}

fn parse_uuid(raw: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(raw).map_err(|e| DatabaseError::Corrupt {
        column: "id".to_string(),
        reason: e.to_string(),
    })
}

fn encode_json<T: Serialize>(column: &str, value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Corrupt {
        column: column.to_string(),
        reason: e.to_string(),
    })
}

fn decode_json<T: DeserializeOwned>(column: &str, raw: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(raw).map_err(|e| DatabaseError::Corrupt {
        column: column.to_string(),
        reason: e.to_string(),
    })
}
