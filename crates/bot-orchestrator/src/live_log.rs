use chrono::Local;
use hedge_bot_core::{keys, put, CoordinationStore};

/// Logs `message` and publishes it as the shared live log line.
///
/// Only the latest line is kept in the store; the full history lives in the
/// tracing output. A failed store write is logged and otherwise ignored.
pub async fn live_log(store: &dyn CoordinationStore, message: impl AsRef<str>) {
    let message = message.as_ref();
    tracing::info!("{}", message);

    let line = format!("[{}] {}", Local::now().format("%H:%M:%S"), message);
    if let Err(e) = put(store, keys::LIVE_LOG, &line).await {
        tracing::warn!("Failed to publish live log line: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hedge_bot_core::{get_or, MemoryStore};

    #[tokio::test]
    async fn test_live_log_keeps_latest_line_with_timestamp() {
        let store = MemoryStore::new();

        live_log(&store, "first").await;
        live_log(&store, "[USDJPY] Window ready").await;

        let line: String = get_or(&store, keys::LIVE_LOG, String::new()).await.unwrap();
        assert!(line.starts_with('['));
        assert!(line.ends_with("] [USDJPY] Window ready"));
        // "[HH:MM:SS] " prefix
        assert_eq!(line.find(']'), Some(9));
    }
}
