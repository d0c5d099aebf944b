use std::sync::Arc;

use sqlgate_gateway::policy::QuotaPolicyGate;
use sqlgate_gateway::{ExecutionGateway, ExecutionRequest, ExecutionResult};
use sqlgate_storage::MemoryExecutionStore;

use crate::commands::{load_engines, load_settings, parse_params};
use crate::{print_json, report_error, OutputFormat, QueryArgs};

/// `sqlgate validate` (dry run) and `sqlgate run` (real execution).
pub(crate) fn cmd_execute(
    args: &QueryArgs,
    dry_run: bool,
    download_format: Option<String>,
    output: OutputFormat,
    quiet: bool,
) -> i32 {
    let prepared = parse_params(args.params.as_deref()).and_then(|parameters| {
        let settings = load_settings(args.config.as_deref())?;
        let engines = load_engines(&args.fixtures)?;
        Ok((parameters, settings, engines))
    });
    let (parameters, settings, engines) = match prepared {
        Ok(p) => p,
        Err(msg) => {
            report_error(&msg, output, quiet);
            return 1;
        }
    };

    let gateway = ExecutionGateway::new(
        settings.gateway,
        Arc::new(engines),
        Arc::new(MemoryExecutionStore::new()),
        Arc::new(QuotaPolicyGate::from_config(settings.quota)),
    );

    let mut request =
        ExecutionRequest::new(&args.user, &args.sql, &args.engine).with_parameters(parameters);
    if dry_run {
        request = request.dry_run();
    }
    if let Some(format) = download_format {
        request = request.with_download_format(format);
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            report_error(&format!("error: cannot start runtime: {}", e), output, quiet);
            return 1;
        }
    };

    match rt.block_on(gateway.execute(request)) {
        Ok(result) => {
            if !quiet {
                print_result(&result, output);
            }
            0
        }
        Err(e) => {
            report_error(&format!("error: {}", e), output, quiet);
            1
        }
    }
}

fn print_result(result: &ExecutionResult, output: OutputFormat) {
    match output {
        OutputFormat::Json => print_json(result),
        OutputFormat::Text => {
            if let Some(query_id) = &result.query_id {
                println!("query_id: {}", query_id);
            }
            println!("status: {}", result.status);
            println!("sql: {}", result.rendered_sql);
            if let Some(seconds) = result.validation_seconds {
                println!("validated in {:.3}s", seconds);
                return;
            }
            println!(
                "rows: {}, bytes scanned: {}, cost: ${}, duration: {:.3}s",
                result.rows_returned, result.bytes_scanned, result.cost_usd, result.duration_seconds
            );
            for row in &result.rows {
                println!(
                    "{}",
                    serde_json::to_string(row).unwrap_or_else(|e| format!("<{}>", e))
                );
            }
        }
    }
}
