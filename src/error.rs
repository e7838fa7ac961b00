use thiserror::Error;

use crate::model::bot::BotStatus;

/// Binance error codes meaning the request timestamp fell outside recvWindow
/// or ahead of the server clock.
const TIMESTAMP_REJECTION_CODES: [i64; 2] = [-1021, -1022];

#[derive(Error, Debug)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid bot config: {0}")]
    InvalidConfig(String),

    #[error("binance API error (code {code}): {msg}")]
    BinanceApi { code: i64, msg: String },

    #[error("bot not found: {0}")]
    BotNotFound(String),

    #[error("illegal bot transition {from} -> {to}")]
    InvalidTransition { from: BotStatus, to: BotStatus },

    #[error("bot {bot_id} still owns {trade_count} trade(s)")]
    BotHasTrades { bot_id: String, trade_count: u64 },

    #[error("bot {0} is running; stop it first")]
    BotRunning(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn is_timestamp_rejection(&self) -> bool {
        match self {
            AppError::BinanceApi { code, msg } => {
                TIMESTAMP_REJECTION_CODES.contains(code)
                    || msg.to_ascii_lowercase().contains("recvwindow")
            }
            _ => false,
        }
    }
}

/// True when `err` (or anything it wraps) is an exchange timestamp rejection.
pub fn is_timestamp_rejection(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<AppError>())
        .any(AppError::is_timestamp_rejection)
}

/// Network-level failures worth one retry: timestamp rejections, timeouts and
/// connection errors. Exchange business errors are not transient.
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(app) = cause.downcast_ref::<AppError>() {
            return app.is_timestamp_rejection()
                || matches!(app, AppError::Timeout(_))
                || matches!(app, AppError::Http(e) if e.is_timeout() || e.is_connect());
        }
        cause
            .downcast_ref::<reqwest::Error>()
            .is_some_and(|e| e.is_timeout() || e.is_connect())
    })
}
