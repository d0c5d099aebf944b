//! Static engine: answers statements from canned fixtures.
//!
//! Statements are matched after whitespace normalization and with any
//! trailing semicolon removed. Fixtures can simulate latency, engine errors
//! and validation failures, which makes this engine the backbone of the
//! gateway tests and the CLI's offline mode.
//!
//! Fixture file format:
//!
//! ```json
//! {
//!   "engine": "warehouse",
//!   "queries": [
//!     {"sql": "SELECT 1 AS one", "rows": [{"one": 1}], "bytes_scanned": 8, "cost_usd": "0.0001"},
//!     {"sql": "SELECT slow()", "delay_ms": 60000},
//!     {"sql": "SELEC 1", "invalid": "syntax error at or near \"SELEC\""}
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlgate_storage::Row;

use super::{DispatchError, QueryEngine, QueryOutput, ValidationOutcome};

/// One canned statement and how the engine answers it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StaticQuery {
    pub sql: String,
    pub rows: Vec<Row>,
    pub bytes_scanned: u64,
    pub cost_usd: Decimal,
    /// Simulated execution latency.
    pub delay_ms: u64,
    /// Execution fails with this engine message.
    pub error: Option<String>,
    /// Validation rejects the statement with this message.
    pub invalid: Option<String>,
}

impl StaticQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Self::default()
        }
    }

    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.rows = rows;
        self
    }

    pub fn with_metrics(mut self, bytes_scanned: u64, cost_usd: Decimal) -> Self {
        self.bytes_scanned = bytes_scanned;
        self.cost_usd = cost_usd;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    pub fn with_invalid(mut self, message: impl Into<String>) -> Self {
        self.invalid = Some(message.into());
        self
    }
}

/// The JSON document a static engine is loaded from.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticFixture {
    pub engine: String,
    #[serde(default)]
    pub queries: Vec<StaticQuery>,
}

/// Engine that serves fixture results keyed by normalized SQL.
pub struct StaticEngine {
    engine_id: String,
    queries: HashMap<String, StaticQuery>,
}

impl StaticEngine {
    /// An engine with no fixtures: every statement is unknown.
    pub fn new(engine_id: &str) -> Self {
        StaticEngine {
            engine_id: engine_id.to_string(),
            queries: HashMap::new(),
        }
    }

    pub fn from_fixture(fixture: StaticFixture) -> Self {
        fixture
            .queries
            .into_iter()
            .fold(StaticEngine::new(&fixture.engine), |engine, q| {
                engine.with_query(q)
            })
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::from_fixture(serde_json::from_str(json)?))
    }

    pub fn with_query(mut self, query: StaticQuery) -> Self {
        self.queries.insert(normalize_sql(&query.sql), query);
        self
    }

    fn lookup(&self, sql: &str) -> Option<&StaticQuery> {
        self.queries.get(&normalize_sql(sql))
    }

    fn engine_error(&self, message: impl Into<String>) -> DispatchError {
        DispatchError::Engine {
            engine: self.engine_id.clone(),
            message: message.into(),
        }
    }
}

/// Collapse whitespace runs and drop a trailing semicolon.
fn normalize_sql(sql: &str) -> String {
    let joined = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    joined.trim_end_matches(';').trim_end().to_string()
}

#[async_trait]
impl QueryEngine for StaticEngine {
    async fn validate(&self, sql: &str) -> Result<ValidationOutcome, DispatchError> {
        let outcome = match self.lookup(sql) {
            Some(StaticQuery {
                invalid: Some(message),
                ..
            }) => ValidationOutcome::invalid(message.clone(), 0.0),
            Some(_) => ValidationOutcome::valid(0.0),
            None => ValidationOutcome::invalid("unknown statement", 0.0),
        };
        Ok(outcome)
    }

    async fn execute(&self, sql: &str, max_rows: u64) -> Result<QueryOutput, DispatchError> {
        let started = Instant::now();
        let query = self
            .lookup(sql)
            .ok_or_else(|| self.engine_error("no fixture registered for statement"))?;

        if query.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(query.delay_ms)).await;
        }
        if let Some(message) = &query.invalid {
            return Err(self.engine_error(message.clone()));
        }
        if let Some(message) = &query.error {
            return Err(self.engine_error(message.clone()));
        }

        let rows = query
            .rows
            .iter()
            .take(usize::try_from(max_rows).unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(QueryOutput {
            rows,
            bytes_scanned: query.bytes_scanned,
            cost_usd: query.cost_usd,
            execution_seconds: started.elapsed().as_secs_f64(),
        })
    }

    fn engine_id(&self) -> &str {
        &self.engine_id
    }
}
