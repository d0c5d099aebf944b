//! Query dispatch: handing rendered SQL to an external engine.
//!
//! Two levels of abstraction:
//! - [`QueryDispatcher`]: what the gateway calls: validate or execute SQL on
//!   a named engine, with a deadline and a row cap
//! - [`QueryEngine`]: one connector for one engine
//!
//! [`EngineRegistry`] bridges the two: it routes each call to the engine
//! registered under the requested name and enforces the deadline, turning an
//! elapsed deadline into [`DispatchError::Timeout`].

pub mod static_engine;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlgate_storage::Row;

// ──────────────────────────────────────────────
// Outcomes and errors
// ──────────────────────────────────────────────

/// Result of a validate-only call.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub error_message: Option<String>,
    pub validation_seconds: f64,
}

impl ValidationOutcome {
    pub fn valid(validation_seconds: f64) -> Self {
        Self {
            valid: true,
            error_message: None,
            validation_seconds,
        }
    }

    pub fn invalid(message: impl Into<String>, validation_seconds: f64) -> Self {
        Self {
            valid: false,
            error_message: Some(message.into()),
            validation_seconds,
        }
    }
}

/// Fully buffered result of an execution.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutput {
    pub rows: Vec<Row>,
    pub bytes_scanned: u64,
    pub cost_usd: Decimal,
    pub execution_seconds: f64,
}

/// Errors that can occur when dispatching to an engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The engine did not finish within the deadline.
    #[error("query exceeded the {timeout_seconds}s deadline")]
    Timeout { timeout_seconds: u64 },

    /// No engine is registered under this name.
    #[error("unknown engine '{engine}'")]
    UnknownEngine { engine: String },

    /// The engine reported a failure.
    #[error("engine '{engine}' failed: {message}")]
    Engine { engine: String, message: String },
}

// ──────────────────────────────────────────────
// Traits
// ──────────────────────────────────────────────

/// What the gateway dispatches through.
#[async_trait]
pub trait QueryDispatcher: Send + Sync {
    /// Syntax/semantic check only. No rows are fetched.
    async fn validate(&self, sql: &str, engine: &str) -> Result<ValidationOutcome, DispatchError>;

    /// Run `sql` on `engine`, returning at most `max_rows` rows or
    /// `DispatchError::Timeout` once `timeout_seconds` elapse.
    async fn execute(
        &self,
        sql: &str,
        engine: &str,
        timeout_seconds: u64,
        max_rows: u64,
    ) -> Result<QueryOutput, DispatchError>;
}

/// A connector for one query engine.
///
/// Implementations handle engine-specific details (client libraries, auth,
/// result decoding). Deadlines are enforced by the registry around these
/// calls, so an engine need not track time itself.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn validate(&self, sql: &str) -> Result<ValidationOutcome, DispatchError>;

    async fn execute(&self, sql: &str, max_rows: u64) -> Result<QueryOutput, DispatchError>;

    /// Returns this engine's name (e.g. "warehouse", "lake").
    fn engine_id(&self) -> &str;
}

// ──────────────────────────────────────────────
// EngineRegistry
// ──────────────────────────────────────────────

/// Registry that maps engine names to connectors.
pub struct EngineRegistry {
    engines: HashMap<String, Box<dyn QueryEngine>>,
}

impl EngineRegistry {
    /// Create an empty registry (no engines registered).
    pub fn empty() -> Self {
        EngineRegistry {
            engines: HashMap::new(),
        }
    }

    /// Register an engine under its own `engine_id`.
    pub fn register(&mut self, engine: Box<dyn QueryEngine>) {
        self.engines.insert(engine.engine_id().to_string(), engine);
    }

    pub fn engine_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.engines.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }

    fn engine(&self, engine: &str) -> Result<&dyn QueryEngine, DispatchError> {
        self.engines
            .get(engine)
            .map(|e| e.as_ref())
            .ok_or_else(|| DispatchError::UnknownEngine {
                engine: engine.to_string(),
            })
    }
}

#[async_trait]
impl QueryDispatcher for EngineRegistry {
    async fn validate(&self, sql: &str, engine: &str) -> Result<ValidationOutcome, DispatchError> {
        let started = Instant::now();
        let mut outcome = self.engine(engine)?.validate(sql).await?;
        if outcome.validation_seconds <= 0.0 {
            outcome.validation_seconds = started.elapsed().as_secs_f64();
        }
        Ok(outcome)
    }

    async fn execute(
        &self,
        sql: &str,
        engine: &str,
        timeout_seconds: u64,
        max_rows: u64,
    ) -> Result<QueryOutput, DispatchError> {
        let connector = self.engine(engine)?;
        let deadline = Duration::from_secs(timeout_seconds);
        match tokio::time::timeout(deadline, connector.execute(sql, max_rows)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout { timeout_seconds }),
        }
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
