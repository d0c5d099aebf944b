//! Ad-hoc SQL execution gateway.
//!
//! Accepts a SQL template plus named parameters, renders it, admits the
//! request under per-user quota, dispatches it to a query engine under a
//! deadline, and records the outcome as an expiring execution record.
//!
//! The collaborators are traits so deployments can plug in their own:
//! - [`dispatch::QueryDispatcher`] (reference: [`dispatch::EngineRegistry`])
//! - [`policy::PolicyGate`] (reference: [`policy::QuotaPolicyGate`])
//! - [`sqlgate_storage::ExecutionStore`]
//! - [`id::IdGenerator`] (reference: [`id::UlidGenerator`])

pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod id;
pub mod policy;
pub mod render;

pub use config::{ConfigError, GatewayConfig, Settings};
pub use error::ExecutionError;
pub use gateway::{ExecutionGateway, ExecutionRequest, ExecutionResult};
pub use render::{params_from_json, placeholders, render, ParamValue, RenderError};
