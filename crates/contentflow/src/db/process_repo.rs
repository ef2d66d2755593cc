//! Process repository: one row per submitted document in the `processes` table.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::{Database, DatabaseError};

/// Lifecycle status of a process record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStatus {
    Processing,
    /// The named step currently owns the document.
    Step(String),
    Retrying,
    Completed,
    Failed,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ProcessStatus::Processing => "processing",
            ProcessStatus::Step(step) => step,
            ProcessStatus::Retrying => "retrying",
            ProcessStatus::Completed => "completed",
            ProcessStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "processing" => ProcessStatus::Processing,
            "retrying" => ProcessStatus::Retrying,
            "completed" => ProcessStatus::Completed,
            "failed" => ProcessStatus::Failed,
            step => ProcessStatus::Step(step.to_string()),
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw process row. JSON columns are kept as text.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessRecord {
    pub process_id: String,
    pub processed_file_name: Option<String>,
    pub processed_file_mime_type: Option<String>,
    pub status: String,
    pub imported_time: String,
    pub last_modified_time: String,
    pub last_modified_by: Option<String>,
    pub processed_time: Option<String>,
    pub entity_score: Option<f64>,
    pub schema_score: Option<f64>,
    pub min_extracted_entity_score: Option<f64>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub result: Option<String>,
    pub confidence: Option<String>,
    pub process_output: Option<String>,
    pub error: Option<String>,
}

impl ProcessRecord {
    /// A fresh `processing` record for a just-submitted document.
    pub fn new(process_id: &str, file_name: Option<&str>, mime_type: Option<&str>) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            process_id: process_id.to_string(),
            processed_file_name: file_name.map(str::to_string),
            processed_file_mime_type: mime_type.map(str::to_string),
            status: ProcessStatus::Processing.to_string(),
            imported_time: now.clone(),
            last_modified_time: now,
            last_modified_by: None,
            processed_time: None,
            entity_score: None,
            schema_score: None,
            min_extracted_entity_score: None,
            prompt_tokens: None,
            completion_tokens: None,
            result: None,
            confidence: None,
            process_output: None,
            error: None,
        }
    }

    pub fn status(&self) -> ProcessStatus {
        ProcessStatus::parse(&self.status)
    }

    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            process_id: row.get("process_id")?,
            processed_file_name: row.get("processed_file_name")?,
            processed_file_mime_type: row.get("processed_file_mime_type")?,
            status: row.get("status")?,
            imported_time: row.get("imported_time")?,
            last_modified_time: row.get("last_modified_time")?,
            last_modified_by: row.get("last_modified_by")?,
            processed_time: row.get("processed_time")?,
            entity_score: row.get("entity_score")?,
            schema_score: row.get("schema_score")?,
            min_extracted_entity_score: row.get("min_extracted_entity_score")?,
            prompt_tokens: row.get("prompt_tokens")?,
            completion_tokens: row.get("completion_tokens")?,
            result: row.get("result")?,
            confidence: row.get("confidence")?,
            process_output: row.get("process_output")?,
            error: row.get("error")?,
        })
    }
}

/// Final scores and outputs written by the save step.
#[derive(Debug, Clone, Default)]
pub struct ProcessResultUpdate {
    pub processed_time: Option<String>,
    pub entity_score: f64,
    pub schema_score: f64,
    pub min_extracted_entity_score: f64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub result: Option<String>,
    pub confidence: Option<String>,
    pub process_output: Option<String>,
}

/// Query filter parameters for process listing.
#[derive(Debug, Default, Clone)]
pub struct ProcessFilter {
    pub status: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new process row.
pub fn insert(db: &Database, record: &ProcessRecord) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO processes (process_id, processed_file_name, processed_file_mime_type,
             status, imported_time, last_modified_time, last_modified_by, processed_time,
             entity_score, schema_score, min_extracted_entity_score, prompt_tokens,
             completion_tokens, result, confidence, process_output, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                record.process_id,
                record.processed_file_name,
                record.processed_file_mime_type,
                record.status,
                record.imported_time,
                record.last_modified_time,
                record.last_modified_by,
                record.processed_time,
                record.entity_score,
                record.schema_score,
                record.min_extracted_entity_score,
                record.prompt_tokens,
                record.completion_tokens,
                record.result,
                record.confidence,
                record.process_output,
                record.error,
            ],
        )?;
        Ok(())
    })
}

/// Sets the status of a process, creating a bare record if none exists yet.
/// A previous error is cleared unless `error` is given.
pub fn upsert_status(
    db: &Database,
    process_id: &str,
    status: &ProcessStatus,
    modified_by: Option<&str>,
    error: Option<&str>,
) -> Result<(), DatabaseError> {
    let now = Utc::now().to_rfc3339();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO processes (process_id, status, imported_time, last_modified_time,
             last_modified_by, error)
             VALUES (?1, ?2, ?3, ?3, ?4, ?5)
             ON CONFLICT(process_id) DO UPDATE SET
               status = excluded.status,
               last_modified_time = excluded.last_modified_time,
               last_modified_by = excluded.last_modified_by,
               error = excluded.error",
            params![process_id, status.as_str(), now, modified_by, error],
        )?;
        Ok(())
    })
}

/// Stores the final scores and outputs. Returns `false` when the process is unknown.
pub fn save_result(
    db: &Database,
    process_id: &str,
    update: &ProcessResultUpdate,
) -> Result<bool, DatabaseError> {
    let now = Utc::now().to_rfc3339();
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE processes SET processed_time = ?2, entity_score = ?3, schema_score = ?4,
             min_extracted_entity_score = ?5, prompt_tokens = ?6, completion_tokens = ?7,
             result = ?8, confidence = ?9, process_output = ?10, last_modified_time = ?11
             WHERE process_id = ?1",
            params![
                process_id,
                update.processed_time,
                update.entity_score,
                update.schema_score,
                update.min_extracted_entity_score,
                update.prompt_tokens,
                update.completion_tokens,
                update.result,
                update.confidence,
                update.process_output,
                now,
            ],
        )?;
        Ok(changed > 0)
    })
}

/// Replaces only the stored step outputs. Returns `false` when the process is unknown.
pub fn set_process_output(
    db: &Database,
    process_id: &str,
    process_output: &str,
) -> Result<bool, DatabaseError> {
    let now = Utc::now().to_rfc3339();
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE processes SET process_output = ?2, last_modified_time = ?3 WHERE process_id = ?1",
            params![process_id, process_output, now],
        )?;
        Ok(changed > 0)
    })
}

/// Finds a process by its ID.
pub fn find_by_id(db: &Database, process_id: &str) -> Result<Option<ProcessRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let record = conn
            .query_row(
                "SELECT * FROM processes WHERE process_id = ?1",
                params![process_id],
                ProcessRecord::from_row,
            )
            .optional()?;
        Ok(record)
    })
}

/// Queries processes newest first, returning (rows, total_count).
pub fn query(
    db: &Database,
    filter: &ProcessFilter,
) -> Result<(Vec<ProcessRecord>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let where_clause = match filter.status {
            Some(ref status) => {
                param_values.push(Box::new(status.clone()));
                "WHERE status = ?1".to_string()
            }
            None => String::new(),
        };

        let count_sql = format!("SELECT COUNT(*) FROM processes {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM processes {} ORDER BY imported_time DESC, process_id LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<ProcessRecord> = stmt
            .query_map(params_ref.as_slice(), ProcessRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Counts processes with the given status.
pub fn count_by_status(db: &Database, status: &ProcessStatus) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM processes WHERE status = ?1",
            params![status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
