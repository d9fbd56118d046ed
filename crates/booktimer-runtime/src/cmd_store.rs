//! Store and settings administration: export, import, site flags,
//! settings, resets, state dumps and raw calls.

use std::path::Path;

use serde_json::{Value, json};

use crate::client::rpc_call;

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_json_arg(raw: &str, what: &str) -> anyhow::Result<Value> {
    serde_json::from_str(raw).map_err(|e| anyhow::anyhow!("{what} is not valid JSON: {e}"))
}

/// Entry point for `booktimer export`.
pub async fn cmd_export(socket_path: &str, output: Option<&Path>) -> anyhow::Result<()> {
    let result = rpc_call(socket_path, "export-store", Value::Null).await?;
    let text = serde_json::to_string_pretty(&result["snapshot"])?;
    match output {
        Some(path) => {
            tokio::fs::write(path, text).await?;
            println!("exported to {}", path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}

/// Entry point for `booktimer import`.
pub async fn cmd_import(socket_path: &str, input: &Path) -> anyhow::Result<()> {
    let text = tokio::fs::read_to_string(input)
        .await
        .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", input.display()))?;
    let snapshot = parse_json_arg(&text, "import file")?;
    rpc_call(socket_path, "import-store", json!({ "snapshot": snapshot })).await?;
    println!("imported {}", input.display());
    Ok(())
}

/// Entry point for `booktimer sites`.
pub async fn cmd_sites(socket_path: &str) -> anyhow::Result<()> {
    let flags = rpc_call(socket_path, "get-site-enable", Value::Null).await?;
    println!("{}", format_site_flags(&flags));
    Ok(())
}

pub(crate) fn format_site_flags(flags: &Value) -> String {
    let Some(map) = flags.as_object() else {
        return String::new();
    };
    map.iter()
        .map(|(domain, enabled)| {
            let state = if enabled.as_bool().unwrap_or(true) { "on" } else { "off" };
            format!("{domain:<14}{state}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Entry point for `booktimer site-enable`.
pub async fn cmd_site_enable(socket_path: &str, domain: &str, enabled: bool) -> anyhow::Result<()> {
    rpc_call(
        socket_path,
        "set-site-enable",
        json!({ "domain": domain, "enabled": enabled }),
    )
    .await?;
    println!("{domain}: {}", if enabled { "on" } else { "off" });
    Ok(())
}

/// Entry point for `booktimer settings`.
pub async fn cmd_settings(socket_path: &str, patch: Option<&str>) -> anyhow::Result<()> {
    let result = match patch {
        Some(raw) => {
            let settings = parse_json_arg(raw, "--set")?;
            rpc_call(socket_path, "set-settings", json!({ "settings": settings })).await?
        }
        None => rpc_call(socket_path, "get-settings", Value::Null).await?,
    };
    print_json(&result["settings"])
}

/// Entry point for `booktimer reset-today` and `booktimer reset-all`.
pub async fn cmd_reset(socket_path: &str, all: bool) -> anyhow::Result<()> {
    let method = if all { "reset-all" } else { "reset-today" };
    rpc_call(socket_path, method, Value::Null).await?;
    println!("{method}: done");
    Ok(())
}

/// Entry point for `booktimer dump`.
pub async fn cmd_dump(socket_path: &str) -> anyhow::Result<()> {
    print_json(&rpc_call(socket_path, "dump-state", Value::Null).await?)
}

/// Entry point for `booktimer call`.
pub async fn cmd_call(socket_path: &str, method: &str, params: Option<&str>) -> anyhow::Result<()> {
    let params = match params {
        Some(raw) => parse_json_arg(raw, "params")?,
        None => Value::Null,
    };
    print_json(&rpc_call(socket_path, method, params).await?)
}
