use crate::commands::parse_params;
use crate::{print_json, report_error, OutputFormat};

/// `sqlgate render`: substitute parameters locally and print the SQL.
pub(crate) fn cmd_render(sql: &str, params: Option<&str>, output: OutputFormat, quiet: bool) -> i32 {
    let parameters = match parse_params(params) {
        Ok(p) => p,
        Err(msg) => {
            report_error(&msg, output, quiet);
            return 1;
        }
    };

    let rendered = match sqlgate_gateway::render(sql, &parameters) {
        Ok(r) => r,
        Err(e) => {
            report_error(&format!("error: {}", e), output, quiet);
            return 1;
        }
    };

    if quiet {
        return 0;
    }
    let unbound: Vec<String> = sqlgate_gateway::placeholders(sql)
        .into_iter()
        .filter(|name| !parameters.contains_key(name))
        .collect();
    match output {
        OutputFormat::Json => print_json(&serde_json::json!({
            "rendered_sql": rendered,
            "placeholders": sqlgate_gateway::placeholders(sql),
            "unbound": unbound,
        })),
        OutputFormat::Text => {
            println!("{}", rendered);
            if !unbound.is_empty() {
                eprintln!("warning: unbound placeholders: {}", unbound.join(", "));
            }
        }
    }
    0
}
