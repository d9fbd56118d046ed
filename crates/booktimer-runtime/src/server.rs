//! UDS JSON-RPC server: minimal hand-rolled implementation.
//! Newline-delimited JSON; a connection may carry many requests, and a
//! `subscribe` request turns it into a live-update stream.

use std::sync::Arc;

use booktimer_core::{TabId, WindowId};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::broadcast::error::RecvError;

use crate::engine::{Engine, EngineError};
use crate::tab_source::TabInfo;

/// Run the UDS JSON-RPC server.
pub async fn run_server(socket_path: &str, engine: Arc<Engine>) -> anyhow::Result<()> {
    // Create socket directory with mode 0700
    let socket_dir = std::path::Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;

    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    // Check for stale socket
    if std::path::Path::new(socket_path).exists() {
        if tokio::net::UnixStream::connect(socket_path).await.is_err() {
            std::fs::remove_file(socket_path)?;
            tracing::info!("removed stale socket at {socket_path}");
        } else {
            anyhow::bail!("another daemon is already running at {socket_path}");
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!("UDS server listening on {socket_path}");

    loop {
        let (stream, _) = listener.accept().await?;
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, engine).await {
                tracing::debug!("connection error: {e}");
            }
        });
    }
}

async fn handle_connection(stream: tokio::net::UnixStream, engine: Arc<Engine>) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(line.trim()) {
            Ok(request) => request,
            Err(e) => {
                let err = RpcError::Parse(e.to_string());
                write_line(&mut writer, &error_response(&Value::Null, &err)).await?;
                continue;
            }
        };
        let method = request["method"].as_str().unwrap_or("");
        let id = request["id"].clone();

        if method == "subscribe" {
            write_line(&mut writer, &ok_response(&id, json!({"ok": true}))).await?;
            return stream_live(&engine, &mut writer).await;
        }

        let response = match dispatch(&engine, method, request["params"].clone()) {
            Ok(result) => ok_response(&id, result),
            Err(err) => {
                tracing::debug!(method, "rpc error: {err}");
                error_response(&id, &err)
            }
        };
        write_line(&mut writer, &response).await?;
    }
}

/// Forward every live push until the viewer goes away.
async fn stream_live(engine: &Engine, writer: &mut OwnedWriteHalf) -> anyhow::Result<()> {
    let mut rx = engine.subscribe();
    let first = json!({"type": "live-update", "payload": engine.stats()});
    write_line(writer, &first).await?;
    loop {
        match rx.recv().await {
            Ok(stats) => {
                write_line(writer, &json!({"type": "live-update", "payload": stats})).await?;
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "live subscriber lagged");
            }
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}

async fn write_line(writer: &mut OwnedWriteHalf, message: &Value) -> anyhow::Result<()> {
    let mut resp = serde_json::to_string(message)?;
    resp.push('\n');
    writer.write_all(resp.as_bytes()).await?;
    Ok(())
}

fn ok_response(id: &Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    })
}

fn error_response(id: &Value, err: &RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {"code": err.code(), "message": err.to_string()},
        "id": id,
    })
}

// ─── Dispatch ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub(crate) enum RpcError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("method not found")]
    MethodNotFound,

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RpcError {
    pub(crate) fn code(&self) -> i64 {
        match self {
            Self::Parse(_) => -32700,
            Self::MethodNotFound => -32601,
            Self::InvalidParams(_) => -32602,
            Self::Internal(_) => -32603,
        }
    }
}

impl From<EngineError> for RpcError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidParams(msg) => Self::InvalidParams(msg),
            EngineError::Settings(e) => Self::InvalidParams(e.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TabUpdatedParams {
    tab_id: TabId,
    #[serde(default)]
    window_id: Option<WindowId>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NavigationParams {
    tab_id: TabId,
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TabParams {
    tab_id: TabId,
    #[serde(default)]
    window_id: Option<WindowId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotParams {
    tabs: Vec<TabInfo>,
    #[serde(default)]
    focused_tab_id: Option<TabId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatParams {
    tab_id: TabId,
    #[serde(default)]
    visibility_state: String,
    #[serde(default)]
    last_interaction: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScrollParams {
    tab_id: TabId,
    #[serde(default)]
    ts: Option<f64>,
    #[serde(default)]
    ev_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImportParams {
    snapshot: Value,
}

#[derive(Debug, Deserialize)]
struct SiteEnableParams {
    domain: String,
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct SettingsParams {
    settings: Value,
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params).map_err(|e| RpcError::InvalidParams(e.to_string()))
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::Internal(e.to_string()))
}

fn ok() -> Value {
    json!({"ok": true})
}

/// Route one request to the engine. `subscribe` is handled by the
/// connection loop since it takes over the connection.
pub(crate) fn dispatch(engine: &Engine, method: &str, params: Value) -> Result<Value, RpcError> {
    match method {
        "tab-updated" => {
            let p: TabUpdatedParams = parse(params)?;
            engine.tab_updated(p.tab_id, p.window_id, p.url, p.title);
            Ok(ok())
        }
        "navigation" => {
            let p: NavigationParams = parse(params)?;
            engine.navigation(p.tab_id, p.url);
            Ok(ok())
        }
        "tab-activated" => {
            let p: TabParams = parse(params)?;
            engine.tab_activated(p.tab_id, p.window_id);
            Ok(ok())
        }
        "tab-removed" => {
            let p: TabParams = parse(params)?;
            engine.tab_removed(p.tab_id);
            Ok(ok())
        }
        "tabs-snapshot" => {
            let p: SnapshotParams = parse(params)?;
            engine.tabs_snapshot(p.tabs, p.focused_tab_id);
            Ok(ok())
        }
        "heartbeat" => {
            let p: HeartbeatParams = parse(params)?;
            engine.heartbeat(p.tab_id, &p.visibility_state, p.last_interaction);
            Ok(ok())
        }
        "scroll-activity" => {
            let p: ScrollParams = parse(params)?;
            engine.scroll_activity(p.tab_id, p.ts, p.ev_type);
            Ok(ok())
        }
        "get-stats" => to_value(engine.stats()),
        "export-store" => Ok(json!({"ok": true, "snapshot": engine.export_store()})),
        "import-store" => {
            let p: ImportParams = parse(params)?;
            engine.import_store(&p.snapshot)?;
            Ok(ok())
        }
        "get-site-enable" => Ok(engine.site_enable()),
        "set-site-enable" => {
            let p: SiteEnableParams = parse(params)?;
            engine.set_site_enable(&p.domain, p.enabled)?;
            Ok(ok())
        }
        "get-settings" => Ok(json!({"ok": true, "settings": to_value(engine.settings())?})),
        "set-settings" => {
            let p: SettingsParams = parse(params)?;
            let settings = engine.set_settings(&p.settings)?;
            Ok(json!({"ok": true, "settings": to_value(settings)?}))
        }
        "reset-today" => {
            engine.reset_today();
            Ok(ok())
        }
        "reset-all" => {
            engine.reset_all();
            Ok(ok())
        }
        "dump-state" => to_value(engine.dump_state()),
        _ => Err(RpcError::MethodNotFound),
    }
}
