//! UDS JSON-RPC client for CLI subcommands, plus the text formatting the
//! stats views share.

use std::fmt::Write as _;

use booktimer_core::{CommitRecord, LedgerStats};
use chrono::{DateTime, Local};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::OwnedReadHalf;

async fn connect(socket_path: &str) -> anyhow::Result<UnixStream> {
    UnixStream::connect(socket_path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot connect to daemon at {socket_path}: {e}"))
}

fn request_line(method: &str, params: Value) -> anyhow::Result<String> {
    let request = serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1,
    });
    let mut req = serde_json::to_string(&request)?;
    req.push('\n');
    Ok(req)
}

fn into_result(line: &str) -> anyhow::Result<Value> {
    if line.trim().is_empty() {
        anyhow::bail!("daemon closed the connection without a response");
    }
    let response: Value = serde_json::from_str(line.trim())?;

    if let Some(error) = response.get("error") {
        anyhow::bail!("RPC error: {error}");
    }

    Ok(response["result"].clone())
}

pub(crate) async fn rpc_call(socket_path: &str, method: &str, params: Value) -> anyhow::Result<Value> {
    let stream = connect(socket_path).await?;
    let (reader, mut writer) = stream.into_split();

    writer.write_all(request_line(method, params)?.as_bytes()).await?;
    writer.shutdown().await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    into_result(&line)
}

/// Live-update stream opened by `subscribe`.
pub(crate) struct LiveUpdates {
    lines: Lines<BufReader<OwnedReadHalf>>,
    // Held so the daemon does not see EOF on our side.
    _writer: tokio::net::unix::OwnedWriteHalf,
}

impl LiveUpdates {
    /// Next pushed stats; `None` once the daemon closes the stream.
    pub(crate) async fn next(&mut self) -> anyhow::Result<Option<LedgerStats>> {
        while let Some(line) = self.lines.next_line().await? {
            let message: Value = serde_json::from_str(line.trim())?;
            if message["type"] != "live-update" {
                tracing::debug!("ignoring message: {message}");
                continue;
            }
            return Ok(Some(serde_json::from_value(message["payload"].clone())?));
        }
        Ok(None)
    }
}

pub(crate) async fn subscribe(socket_path: &str) -> anyhow::Result<LiveUpdates> {
    let stream = connect(socket_path).await?;
    let (reader, mut writer) = stream.into_split();
    writer
        .write_all(request_line("subscribe", Value::Null)?.as_bytes())
        .await?;

    let mut lines = BufReader::new(reader).lines();
    let ack = lines.next_line().await?.unwrap_or_default();
    into_result(&ack)?;

    Ok(LiveUpdates {
        lines,
        _writer: writer,
    })
}

// ─── Formatting ───────────────────────────────────────────────────

/// `1h 02m 03s`, `2m 03s` or `3s`.
pub(crate) fn format_duration_ms(ms: u64) -> String {
    let secs = ms / 1000;
    let (h, m, s) = (secs / 3600, (secs / 60) % 60, secs % 60);
    if h > 0 {
        format!("{h}h {m:02}m {s:02}s")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

fn format_record(record: &CommitRecord) -> String {
    let at = DateTime::from_timestamp_millis(record.ts)
        .map(|ts| ts.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string());
    let site = record.site.map_or("-", |s| s.domain());
    let mut name = record.work_title.clone();
    if !record.episode_title.is_empty() && record.episode_title != record.work_title {
        name = format!("{name} / {}", record.episode_title);
    }
    format!(
        "  {at}  {:>10}  {site:<12} {name}",
        format_duration_ms(record.ms)
    )
}

/// Multi-line summary for `booktimer stats` and `booktimer watch`.
pub(crate) fn format_stats(stats: &LedgerStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "today    {}", format_duration_ms(stats.daily));
    let _ = writeln!(out, "total    {}", format_duration_ms(stats.total));
    if stats.inflight_ms > 0 {
        let _ = writeln!(out, "reading  {} (not yet saved)", format_duration_ms(stats.inflight_ms));
    }
    if stats.recent.is_empty() {
        out.push_str("\n(nothing read today)");
    } else {
        out.push_str("\nrecent:");
        for record in &stats.recent {
            out.push('\n');
            out.push_str(&format_record(record));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use booktimer_core::Site;

    fn record(ms: u64, work: &str, episode: &str) -> CommitRecord {
        CommitRecord {
            site: Some(Site::Kakuyomu),
            work_title: work.into(),
            episode_title: episode.into(),
            author: String::new(),
            session_id: "s-1".into(),
            url: String::new(),
            ms,
            ts: 1_772_334_000_000,
            site_id: None,
        }
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration_ms(0), "0s");
        assert_eq!(format_duration_ms(3_999), "3s");
        assert_eq!(format_duration_ms(123_000), "2m 03s");
        assert_eq!(format_duration_ms(3_723_000), "1h 02m 03s");
    }

    #[test]
    fn stats_without_records() {
        let out = format_stats(&LedgerStats::default());
        assert!(out.starts_with("today    0s\ntotal    0s\n"));
        assert!(out.ends_with("(nothing read today)"));
        assert!(!out.contains("reading"));
    }

    #[test]
    fn stats_lists_recent_records() {
        let stats = LedgerStats {
            total: 600_000,
            daily: 60_000,
            inflight_ms: 5_000,
            recent: vec![record(60_000, "星の旅", "第1話 出会い"), record(4_000, "短編", "短編")],
        };
        let out = format_stats(&stats);
        assert!(out.contains("reading  5s (not yet saved)"));
        assert!(out.contains("kakuyomu.jp"));
        assert!(out.contains("星の旅 / 第1話 出会い"));
        // Short stories repeat the work title as the episode.
        assert!(out.contains("短編") && !out.contains("短編 / 短編"));
    }

    #[test]
    fn error_responses_become_errors() {
        let err = into_result(r#"{"jsonrpc":"2.0","error":{"code":-32601,"message":"method not found"},"id":1}"#)
            .expect_err("error response");
        assert!(err.to_string().contains("method not found"));
        assert!(into_result("").is_err());
        let ok = into_result(r#"{"jsonrpc":"2.0","result":{"ok":true},"id":1}"#).expect("ok");
        assert_eq!(ok["ok"], true);
    }
}
