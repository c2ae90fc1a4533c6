//! DuckDB implementation of the engine seam.
//!
//! One root connection is opened at startup; worker sessions are cheap
//! clones of it (`try_clone`) sharing the same database, so each worker has
//! exclusive use of its own physical handle. Interrupts go through DuckDB's
//! interrupt handle, which is safe to fire from any thread while the owning
//! worker is inside a query.

use std::path::Path;
use std::sync::Arc;

use arrow::ipc::writer::StreamWriter;
use arrow::json::ArrayWriter;
use arrow::record_batch::RecordBatch;
use duckdb::{Connection, InterruptHandle};
use log::debug;
use parking_lot::Mutex;

use crate::engine::{EngineSession, InterruptToken, QueryEngine};
use crate::error::{GatewayError, Result};

/// Engine handle backed by an embedded DuckDB database.
pub struct DuckDbEngine {
    root: Mutex<Connection>,
}

impl DuckDbEngine {
    /// Open (or create) the database file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(engine_err)?;
        debug!("DuckDB connection opened at {}", path.as_ref().display());
        Ok(Self {
            root: Mutex::new(conn),
        })
    }

    /// Open a transient in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(engine_err)?;
        Ok(Self {
            root: Mutex::new(conn),
        })
    }
}

impl QueryEngine for DuckDbEngine {
    fn open_session(&self) -> Result<Box<dyn EngineSession>> {
        let conn = self.root.lock().try_clone().map_err(engine_err)?;
        Ok(Box::new(DuckDbSession { conn }))
    }
}

struct DuckDbSession {
    conn: Connection,
}

impl EngineSession for DuckDbSession {
    fn interrupt_token(&self) -> Arc<dyn InterruptToken> {
        Arc::new(DuckDbInterrupt {
            handle: self.conn.interrupt_handle(),
        })
    }

    fn execute(&mut self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql).map_err(exec_err)
    }

    fn query_json(&mut self, sql: &str) -> Result<Vec<u8>> {
        let batches = self.collect_batches(sql)?.1;
        let mut writer = ArrayWriter::new(Vec::new());
        let refs: Vec<&RecordBatch> = batches.iter().collect();
        writer.write_batches(&refs).map_err(exec_err)?;
        writer.finish().map_err(exec_err)?;
        let bytes = writer.into_inner();
        if bytes.is_empty() {
            // No rows written at all; keep the payload a valid document.
            return Ok(b"[]".to_vec());
        }
        Ok(bytes)
    }

    fn query_arrow(&mut self, sql: &str) -> Result<Vec<u8>> {
        let (schema, batches) = self.collect_batches(sql)?;
        let mut writer = StreamWriter::try_new(Vec::new(), &schema).map_err(exec_err)?;
        for batch in &batches {
            writer.write(batch).map_err(exec_err)?;
        }
        writer.finish().map_err(exec_err)?;
        writer.into_inner().map_err(exec_err)
    }
}

impl DuckDbSession {
    fn collect_batches(&mut self, sql: &str) -> Result<(arrow::datatypes::Schema, Vec<RecordBatch>)> {
        let mut stmt = self.conn.prepare(sql).map_err(exec_err)?;
        let arrow = stmt.query_arrow([]).map_err(exec_err)?;
        let schema = arrow.get_schema();
        let batches: Vec<RecordBatch> = arrow.collect();
        debug!(
            "query produced {} batch(es), {} row(s)",
            batches.len(),
            batches.iter().map(RecordBatch::num_rows).sum::<usize>()
        );
        Ok(((*schema).clone(), batches))
    }
}

struct DuckDbInterrupt {
    handle: Arc<InterruptHandle>,
}

impl InterruptToken for DuckDbInterrupt {
    fn interrupt(&self) {
        self.handle.interrupt();
    }
}

fn engine_err(err: duckdb::Error) -> GatewayError {
    GatewayError::Engine(err.to_string())
}

fn exec_err<E: std::fmt::Display>(err: E) -> GatewayError {
    GatewayError::Execution(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::ipc::reader::StreamReader;

    #[test]
    fn test_execute_and_query_json() {
        let engine = DuckDbEngine::open_in_memory().unwrap();
        let mut session = engine.open_session().unwrap();

        session
            .execute("create table t (id integer, name varchar)")
            .unwrap();
        session
            .execute("insert into t values (1, 'a'), (2, 'b')")
            .unwrap();

        let bytes = session.query_json("select * from t order by id").unwrap();
        let rows: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(rows[0]["id"], 1);
        assert_eq!(rows[1]["name"], "b");
    }

    #[test]
    fn test_query_json_empty_result() {
        let engine = DuckDbEngine::open_in_memory().unwrap();
        let mut session = engine.open_session().unwrap();
        session.execute("create table t (id integer)").unwrap();

        let bytes = session.query_json("select * from t").unwrap();
        let rows: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(rows, serde_json::json!([]));
    }

    #[test]
    fn test_query_arrow_round_trips() {
        let engine = DuckDbEngine::open_in_memory().unwrap();
        let mut session = engine.open_session().unwrap();

        let bytes = session.query_arrow("select 1 as one").unwrap();
        let reader = StreamReader::try_new(std::io::Cursor::new(bytes), None).unwrap();
        let batches: Vec<RecordBatch> = reader.map(|b| b.unwrap()).collect();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].num_rows(), 1);
        assert_eq!(batches[0].schema().field(0).name(), "one");
    }

    #[test]
    fn test_sql_error_is_execution_error() {
        let engine = DuckDbEngine::open_in_memory().unwrap();
        let mut session = engine.open_session().unwrap();
        let err = session.query_json("selct 1").unwrap_err();
        assert!(matches!(err, GatewayError::Execution(_)));
    }

    #[test]
    fn test_sessions_share_one_database() {
        let engine = DuckDbEngine::open_in_memory().unwrap();
        let mut a = engine.open_session().unwrap();
        let mut b = engine.open_session().unwrap();

        a.execute("create table shared (x integer)").unwrap();
        a.execute("insert into shared values (7)").unwrap();

        let bytes = b.query_json("select x from shared").unwrap();
        let rows: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(rows[0]["x"], 7);
    }
}
