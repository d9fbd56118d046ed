//! `booktimer stats` and `booktimer watch`.

use booktimer_core::LedgerStats;
use serde_json::Value;

use crate::client::{format_stats, rpc_call, subscribe};

/// Entry point for `booktimer stats`.
pub async fn cmd_stats(socket_path: &str, json: bool) -> anyhow::Result<()> {
    let result = rpc_call(socket_path, "get-stats", Value::Null).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    let stats: LedgerStats = serde_json::from_value(result)?;
    println!("{}", format_stats(&stats));
    Ok(())
}

/// Entry point for `booktimer watch`: redraw on every live push.
pub async fn cmd_watch(socket_path: &str) -> anyhow::Result<()> {
    let mut updates = subscribe(socket_path).await?;

    loop {
        tokio::select! {
            next = updates.next() => {
                let Some(stats) = next? else {
                    println!("daemon closed the stream");
                    break;
                };
                // Clear screen + cursor home
                print!("\x1b[2J\x1b[H");
                println!("{}", format_stats(&stats));
                println!("\nbooktimer watch (Ctrl-C to quit)");
            }
            _ = tokio::signal::ctrl_c() => { break; }
        }
    }

    Ok(())
}
