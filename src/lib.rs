pub mod breakout;
pub mod config;
pub mod error;
pub mod feed;
pub mod market_hours;
pub mod model;
pub mod monitor;
pub mod service;
pub mod session_registry;
pub mod signal_emitter;
pub mod store;
pub mod tick_validator;
