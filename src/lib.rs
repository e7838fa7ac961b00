pub mod api;
pub mod backtest;
pub mod bot_manager;
pub mod config;
pub mod error;
pub mod exchange;
pub mod indicator;
pub mod stats;
pub mod store;
pub mod strategy;
pub mod time_sync;

pub mod binance {
    pub mod rest;
    pub mod types;
}

pub mod model {
    pub mod bot;
    pub mod candle;
    pub mod order;
    pub mod signal;
    pub mod trade;
}
