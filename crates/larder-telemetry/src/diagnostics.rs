//! The local diagnostic log.
//!
//! [`SqliteDiagnosticLayer`] persists warn+ tracing events to SQLite.
//! Events carrying a `queue` field (every failed telemetry flush does) get
//! that queue in its own column, so undelivered batches can be listed with
//! [`SqliteDiagnosticSink::flush_failures`].

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use larder_core::QueueKind;
use parking_lot::Mutex;
use rusqlite::types::ToSql;
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const SCHEMA: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    CREATE TABLE IF NOT EXISTS diagnostics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        recorded_at TEXT NOT NULL,
        level TEXT NOT NULL,
        target TEXT NOT NULL,
        message TEXT NOT NULL,
        session_id TEXT,
        user_id TEXT,
        queue TEXT,
        fields TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_diagnostics_level ON diagnostics(level);
    CREATE INDEX IF NOT EXISTS idx_diagnostics_session ON diagnostics(session_id);
    CREATE INDEX IF NOT EXISTS idx_diagnostics_queue ON diagnostics(queue);
    CREATE INDEX IF NOT EXISTS idx_diagnostics_recorded_at ON diagnostics(recorded_at);
";

const COLUMNS: &str = "id, recorded_at, level, target, message, session_id, user_id, queue, fields";

/// A persisted diagnostic entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub id: i64,
    pub recorded_at: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    /// Telemetry queue the entry is about, if any.
    pub queue: Option<QueueKind>,
    /// Remaining event fields as a JSON object.
    pub fields: Option<String>,
}

impl DiagnosticRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let queue: Option<String> = row.get(7)?;
        Ok(Self {
            id: row.get(0)?,
            recorded_at: row.get(1)?,
            level: row.get(2)?,
            target: row.get(3)?,
            message: row.get(4)?,
            session_id: row.get(5)?,
            user_id: row.get(6)?,
            queue: queue.as_deref().and_then(parse_queue),
            fields: row.get(8)?,
        })
    }

    fn field(&self, name: &str) -> Option<Value> {
        let fields: Map<String, Value> = serde_json::from_str(self.fields.as_deref()?).ok()?;
        fields.get(name).cloned()
    }
}

/// Filters for [`SqliteDiagnosticSink::query`]. Unset filters match all.
#[derive(Clone, Debug, Default)]
pub struct DiagnosticQuery {
    pub level: Option<String>,
    /// Substring match on the event target.
    pub target: Option<String>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub queue: Option<QueueKind>,
    /// RFC 3339 lower bound, inclusive.
    pub since: Option<String>,
    /// Defaults to 100.
    pub limit: Option<u32>,
}

/// One failed telemetry flush, as recorded in the diagnostic log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlushFailure {
    pub recorded_at: String,
    pub queue: QueueKind,
    pub session_id: Option<String>,
    /// Events in the batch that was re-queued.
    pub batch_len: u64,
    pub error_kind: Option<String>,
    pub error: Option<String>,
}

pub struct SqliteDiagnosticSink {
    conn: Mutex<Connection>,
}

impl SqliteDiagnosticSink {
    /// Open or create the database, creating parent directories as needed.
    pub fn open(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        Self::init(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn record(&self, entry: &PendingEntry) {
        let conn = self.conn.lock();
        // A diagnostic write that fails has nowhere left to be reported.
        let _ = conn.execute(
            "INSERT INTO diagnostics
                 (recorded_at, level, target, message, session_id, user_id, queue, fields)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                entry.recorded_at,
                entry.level,
                entry.target,
                entry.message,
                entry.session_id,
                entry.user_id,
                entry.queue,
                entry.fields,
            ],
        );
    }

    /// Most recent first.
    pub fn query(&self, q: &DiagnosticQuery) -> Result<Vec<DiagnosticRecord>, rusqlite::Error> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(level) = &q.level {
            clauses.push("level = ?");
            params.push(Box::new(level.clone()));
        }
        if let Some(target) = &q.target {
            clauses.push("target LIKE ?");
            params.push(Box::new(format!("%{target}%")));
        }
        if let Some(session_id) = &q.session_id {
            clauses.push("session_id = ?");
            params.push(Box::new(session_id.clone()));
        }
        if let Some(user_id) = &q.user_id {
            clauses.push("user_id = ?");
            params.push(Box::new(user_id.clone()));
        }
        if let Some(queue) = q.queue {
            clauses.push("queue = ?");
            params.push(Box::new(queue.as_str()));
        }
        if let Some(since) = &q.since {
            clauses.push("recorded_at >= ?");
            params.push(Box::new(since.clone()));
        }

        let mut sql = format!("SELECT {COLUMNS} FROM diagnostics");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY id DESC LIMIT {}", q.limit.unwrap_or(100)));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
            DiagnosticRecord::from_row,
        )?;
        rows.collect()
    }

    /// Failed flushes recorded for `session_id` (or every session), most
    /// recent first.
    pub fn flush_failures(
        &self,
        session_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<FlushFailure>, rusqlite::Error> {
        let records = self.query(&DiagnosticQuery {
            level: Some("WARN".into()),
            session_id: session_id.map(str::to_string),
            limit: Some(limit),
            ..Default::default()
        })?;

        Ok(records
            .into_iter()
            .filter_map(|record| {
                let queue = record.queue?;
                Some(FlushFailure {
                    queue,
                    batch_len: record.field("count").and_then(|v| v.as_u64()).unwrap_or(0),
                    error_kind: record.field("error_kind").and_then(string_value),
                    error: record.field("error").and_then(string_value),
                    recorded_at: record.recorded_at,
                    session_id: record.session_id,
                })
            })
            .collect())
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM diagnostics", [], |row| row.get(0))
    }
}

fn parse_queue(raw: &str) -> Option<QueueKind> {
    match raw {
        "errors" => Some(QueueKind::Errors),
        "metrics" => Some(QueueKind::Metrics),
        _ => None,
    }
}

fn string_value(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        _ => None,
    }
}

struct PendingEntry {
    recorded_at: String,
    level: String,
    target: String,
    message: String,
    session_id: Option<String>,
    user_id: Option<String>,
    queue: Option<String>,
    fields: Option<String>,
}

/// tracing Layer writing warn+ events to a [`SqliteDiagnosticSink`].
pub struct SqliteDiagnosticLayer {
    sink: Arc<SqliteDiagnosticSink>,
}

impl SqliteDiagnosticLayer {
    pub fn new(sink: Arc<SqliteDiagnosticSink>) -> Self {
        Self { sink }
    }
}

/// Session and user ids recorded on a span, inherited by events inside it.
#[derive(Default)]
struct SpanContext {
    session_id: Option<String>,
    user_id: Option<String>,
}

#[derive(Default)]
struct EntryVisitor {
    message: Option<String>,
    context: SpanContext,
    queue: Option<String>,
    fields: Map<String, Value>,
}

impl EntryVisitor {
    fn put(&mut self, field: &Field, value: Value) {
        let slot = match field.name() {
            "message" => &mut self.message,
            "session_id" => &mut self.context.session_id,
            "user_id" => &mut self.context.user_id,
            "queue" => &mut self.queue,
            name => {
                self.fields.insert(name.to_string(), value);
                return;
            }
        };
        *slot = Some(match value {
            Value::String(s) => s,
            other => other.to_string(),
        });
    }
}

impl Visit for EntryVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{value:?}");
        let rendered = if field.name() == "message" {
            rendered
        } else {
            rendered.trim_matches('"').to_string()
        };
        self.put(field, Value::String(rendered));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.put(field, Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value.into());
    }
}

impl<S> Layer<S> for SqliteDiagnosticLayer
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = EntryVisitor::default();
        attrs.record(&mut visitor);
        let context = visitor.context;
        if context.session_id.is_none() && context.user_id.is_none() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(context);
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut visitor = EntryVisitor::default();
        event.record(&mut visitor);

        // Innermost span wins for ids the event did not carry itself.
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                let extensions = span.extensions();
                let Some(inherited) = extensions.get::<SpanContext>() else {
                    continue;
                };
                let own = &mut visitor.context;
                if own.session_id.is_none() {
                    own.session_id.clone_from(&inherited.session_id);
                }
                if own.user_id.is_none() {
                    own.user_id.clone_from(&inherited.user_id);
                }
            }
        }

        let fields = if visitor.fields.is_empty() {
            None
        } else {
            serde_json::to_string(&visitor.fields).ok()
        };

        self.sink.record(&PendingEntry {
            recorded_at: Utc::now().to_rfc3339(),
            level: level.to_string(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            session_id: visitor.context.session_id,
            user_id: visitor.context.user_id,
            queue: visitor.queue,
            fields,
        });
    }
}
