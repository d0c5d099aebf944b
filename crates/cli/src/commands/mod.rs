pub(crate) mod execute;
pub(crate) mod render;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sqlgate_gateway::dispatch::static_engine::StaticEngine;
use sqlgate_gateway::dispatch::EngineRegistry;
use sqlgate_gateway::{params_from_json, ParamValue, Settings};

/// Parse `--params` into typed parameter values. Absent means no parameters.
pub(crate) fn parse_params(params: Option<&str>) -> Result<BTreeMap<String, ParamValue>, String> {
    let Some(raw) = params else {
        return Ok(BTreeMap::new());
    };
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| format!("error: invalid JSON in --params: {}", e))?;
    params_from_json(&value).map_err(|e| format!("error: {}", e))
}

/// Load settings from `--config` (defaults when absent) and apply
/// `SQLGATE_*` environment overrides.
pub(crate) fn load_settings(config: Option<&Path>) -> Result<Settings, String> {
    let mut settings = match config {
        Some(path) => Settings::from_file(path).map_err(|e| format!("error: {}", e))?,
        None => Settings::default(),
    };
    settings.gateway = settings
        .gateway
        .with_env_overrides()
        .map_err(|e| format!("error: {}", e))?;
    settings
        .gateway
        .validate()
        .map_err(|e| format!("error: {}", e))?;
    Ok(settings)
}

/// Build an engine registry from fixture files, one engine per file.
pub(crate) fn load_engines(fixtures: &[PathBuf]) -> Result<EngineRegistry, String> {
    let mut registry = EngineRegistry::empty();
    for path in fixtures {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("error reading fixture file '{}': {}", path.display(), e))?;
        let engine = StaticEngine::from_json_str(&contents)
            .map_err(|e| format!("error parsing fixture file '{}': {}", path.display(), e))?;
        tracing::debug!(path = %path.display(), "loaded engine fixture");
        registry.register(Box::new(engine));
    }
    Ok(registry)
}
