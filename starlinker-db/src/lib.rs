//! SQLite-backed persistence for Starlinker: signals, alerts, digests,
//! error log, and the single-row settings blob.

pub mod config;
pub mod error;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod schema;
pub mod settings;
pub mod signal_store;

pub use config::{parse_weekly_schedule, StarlinkerConfig, THEME_SLUGS};
pub use error::{FieldError, StoreError};
pub use pool::{get_pool, ConnectionPool};
pub use settings::SettingsRepository;
pub use signal_store::{HealthSnapshot, NormalizedSignal, SignalStore};

pub use diesel::{Connection, SqliteConnection};
