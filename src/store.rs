//! SQLite persistence for bots and their trades.
//!
//! The store is the source of truth for bot status: the executor re-reads it
//! before every order, and every transition is written here before it is
//! reported to callers.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::model::bot::{Bot, BotConfig, BotStatus};
use crate::model::order::OrderSide;
use crate::model::trade::{Trade, TradeStatus};

/// What happens to a bot's trades when the bot is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletePolicy {
    /// Refuse to delete a bot that still owns trades.
    #[default]
    Reject,
    /// Delete the trades together with the bot.
    Cascade,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS bots (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    config_json TEXT NOT NULL,
    total_trades INTEGER NOT NULL DEFAULT 0,
    total_profit REAL NOT NULL DEFAULT 0,
    win_rate REAL NOT NULL DEFAULT 0,
    last_error TEXT,
    last_run_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS trades (
    id TEXT PRIMARY KEY,
    bot_id TEXT NOT NULL REFERENCES bots(id) ON DELETE RESTRICT,
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    quantity REAL NOT NULL,
    entry_price REAL NOT NULL,
    stop_loss REAL,
    take_profit REAL,
    status TEXT NOT NULL,
    open_time TEXT NOT NULL,
    exit_price REAL,
    close_time TEXT,
    profit REAL
);

CREATE INDEX IF NOT EXISTS idx_trades_bot ON trades(bot_id, open_time);
"#;

const BOT_COLUMNS: &str = "id, name, status, config_json, total_trades, total_profit, win_rate, \
     last_error, last_run_at, created_at, updated_at";

const TRADE_COLUMNS: &str = "id, bot_id, symbol, side, quantity, entry_price, stop_loss, \
     take_profit, status, open_time, exit_price, close_time, profit";

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AppError::Corrupt(format!("timestamp '{}': {}", s, e)))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>, AppError> {
    s.as_deref().map(parse_ts).transpose()
}

struct BotRow {
    id: String,
    name: String,
    status: String,
    config_json: String,
    total_trades: i64,
    total_profit: f64,
    win_rate: f64,
    last_error: Option<String>,
    last_run_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl BotRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            status: row.get(2)?,
            config_json: row.get(3)?,
            total_trades: row.get(4)?,
            total_profit: row.get(5)?,
            win_rate: row.get(6)?,
            last_error: row.get(7)?,
            last_run_at: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_bot(self) -> Result<Bot, AppError> {
        let status = BotStatus::parse(&self.status).ok_or_else(|| {
            AppError::Corrupt(format!("bot {} has unknown status '{}'", self.id, self.status))
        })?;
        let config: BotConfig = serde_json::from_str(&self.config_json)?;
        Ok(Bot {
            status,
            config,
            total_trades: self.total_trades.max(0) as u64,
            total_profit: self.total_profit,
            win_rate: self.win_rate,
            last_error: self.last_error,
            last_run_at: parse_opt_ts(self.last_run_at)?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            id: self.id,
            name: self.name,
        })
    }
}

struct TradeRow {
    id: String,
    bot_id: String,
    symbol: String,
    side: String,
    quantity: f64,
    entry_price: f64,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
    status: String,
    open_time: String,
    exit_price: Option<f64>,
    close_time: Option<String>,
    profit: Option<f64>,
}

impl TradeRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            bot_id: row.get(1)?,
            symbol: row.get(2)?,
            side: row.get(3)?,
            quantity: row.get(4)?,
            entry_price: row.get(5)?,
            stop_loss: row.get(6)?,
            take_profit: row.get(7)?,
            status: row.get(8)?,
            open_time: row.get(9)?,
            exit_price: row.get(10)?,
            close_time: row.get(11)?,
            profit: row.get(12)?,
        })
    }

    fn into_trade(self) -> Result<Trade, AppError> {
        let side = OrderSide::from_db_str(&self.side)
            .ok_or_else(|| AppError::Corrupt(format!("trade {} side '{}'", self.id, self.side)))?;
        let status = TradeStatus::parse(&self.status).ok_or_else(|| {
            AppError::Corrupt(format!("trade {} status '{}'", self.id, self.status))
        })?;
        Ok(Trade {
            side,
            status,
            quantity: self.quantity,
            entry_price: self.entry_price,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            open_time: parse_ts(&self.open_time)?,
            exit_price: self.exit_price,
            close_time: parse_opt_ts(self.close_time)?,
            profit: self.profit,
            id: self.id,
            bot_id: self.bot_id,
            symbol: self.symbol,
        })
    }
}

pub struct BotStore {
    conn: Mutex<Connection>,
}

impl BotStore {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AppError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_bot(&self, bot: &Bot) -> Result<(), AppError> {
        let config_json = serde_json::to_string(&bot.config)?;
        self.conn().execute(
            &format!(
                "INSERT INTO bots ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                BOT_COLUMNS
            ),
            params![
                bot.id,
                bot.name,
                bot.status.as_str(),
                config_json,
                bot.total_trades as i64,
                bot.total_profit,
                bot.win_rate,
                bot.last_error,
                bot.last_run_at.as_ref().map(ts),
                ts(&bot.created_at),
                ts(&bot.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_bot(&self, id: &str) -> Result<Option<Bot>, AppError> {
        let row = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM bots WHERE id = ?1", BOT_COLUMNS),
                params![id],
                BotRow::from_row,
            )
            .optional()?;
        row.map(BotRow::into_bot).transpose()
    }

    /// Like [`get_bot`](Self::get_bot) but a missing bot is an error.
    pub fn require_bot(&self, id: &str) -> Result<Bot, AppError> {
        self.get_bot(id)?
            .ok_or_else(|| AppError::BotNotFound(id.to_string()))
    }

    pub fn list_bots(&self) -> Result<Vec<Bot>, AppError> {
        self.query_bots(
            &format!("SELECT {} FROM bots ORDER BY created_at, id", BOT_COLUMNS),
            None,
        )
    }

    pub fn list_by_status(&self, status: BotStatus) -> Result<Vec<Bot>, AppError> {
        self.query_bots(
            &format!(
                "SELECT {} FROM bots WHERE status = ?1 ORDER BY created_at, id",
                BOT_COLUMNS
            ),
            Some(status.as_str()),
        )
    }

    fn query_bots(&self, sql: &str, arg: Option<&str>) -> Result<Vec<Bot>, AppError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = match arg {
            Some(a) => stmt
                .query_map(params![a], BotRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
            None => stmt
                .query_map([], BotRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
        };
        rows.into_iter().map(BotRow::into_bot).collect()
    }

    /// Overwrite every mutable column of an existing bot.
    pub fn update_bot(&self, bot: &Bot) -> Result<(), AppError> {
        let config_json = serde_json::to_string(&bot.config)?;
        let changed = self.conn().execute(
            "UPDATE bots SET name = ?2, status = ?3, config_json = ?4, total_trades = ?5, \
             total_profit = ?6, win_rate = ?7, last_error = ?8, last_run_at = ?9, updated_at = ?10 \
             WHERE id = ?1",
            params![
                bot.id,
                bot.name,
                bot.status.as_str(),
                config_json,
                bot.total_trades as i64,
                bot.total_profit,
                bot.win_rate,
                bot.last_error,
                bot.last_run_at.as_ref().map(ts),
                ts(&bot.updated_at),
            ],
        )?;
        if changed == 0 {
            return Err(AppError::BotNotFound(bot.id.clone()));
        }
        Ok(())
    }

    /// Delete a bot under `policy`, atomically. Returns how many trades went
    /// with it.
    pub fn delete_bot(&self, id: &str, policy: DeletePolicy) -> Result<u64, AppError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let exists = tx
            .query_row("SELECT 1 FROM bots WHERE id = ?1", params![id], |_| Ok(()))
            .optional()?
            .is_some();
        if !exists {
            return Err(AppError::BotNotFound(id.to_string()));
        }

        let trade_count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM trades WHERE bot_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        let removed = match policy {
            DeletePolicy::Reject if trade_count > 0 => {
                return Err(AppError::BotHasTrades {
                    bot_id: id.to_string(),
                    trade_count: trade_count as u64,
                });
            }
            DeletePolicy::Reject => 0,
            DeletePolicy::Cascade => tx.execute("DELETE FROM trades WHERE bot_id = ?1", params![id])?,
        };

        tx.execute("DELETE FROM bots WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(removed as u64)
    }

    pub fn insert_trade(&self, trade: &Trade) -> Result<(), AppError> {
        self.conn().execute(
            &format!(
                "INSERT INTO trades ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                TRADE_COLUMNS
            ),
            params![
                trade.id,
                trade.bot_id,
                trade.symbol,
                trade.side.as_db_str(),
                trade.quantity,
                trade.entry_price,
                trade.stop_loss,
                trade.take_profit,
                trade.status.as_str(),
                ts(&trade.open_time),
                trade.exit_price,
                trade.close_time.as_ref().map(ts),
                trade.profit,
            ],
        )?;
        Ok(())
    }

    /// Persist the exit side of a trade.
    pub fn close_trade(&self, trade: &Trade) -> Result<(), AppError> {
        let changed = self.conn().execute(
            "UPDATE trades SET status = ?2, exit_price = ?3, close_time = ?4, profit = ?5 \
             WHERE id = ?1",
            params![
                trade.id,
                trade.status.as_str(),
                trade.exit_price,
                trade.close_time.as_ref().map(ts),
                trade.profit,
            ],
        )?;
        if changed == 0 {
            return Err(AppError::Corrupt(format!("trade {} does not exist", trade.id)));
        }
        Ok(())
    }

    pub fn open_trade_for_bot(&self, bot_id: &str) -> Result<Option<Trade>, AppError> {
        let row = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {} FROM trades WHERE bot_id = ?1 AND status = 'open' \
                     ORDER BY open_time DESC LIMIT 1",
                    TRADE_COLUMNS
                ),
                params![bot_id],
                TradeRow::from_row,
            )
            .optional()?;
        row.map(TradeRow::into_trade).transpose()
    }

    /// Oldest first.
    pub fn trades_for_bot(&self, bot_id: &str) -> Result<Vec<Trade>, AppError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM trades WHERE bot_id = ?1 ORDER BY open_time, id",
            TRADE_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![bot_id], TradeRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(TradeRow::into_trade).collect()
    }
}
