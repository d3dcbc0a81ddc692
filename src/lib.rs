// ABOUTME: Library module for sqlite-db-transfer
// ABOUTME: Exports the transfer engine, loader, saver, and database handle

pub mod config;
pub mod database;
pub mod dump;
pub mod transfer;

pub use config::{load_connect_options, ConnectOptions, CONFIG_ENV_VAR};
pub use database::{Cursor, Database, IsolationLevel, Location, MEMORY_DESIGNATOR};
pub use dump::Dump;
pub use transfer::{load, store, transfer, transfer_between, Endpoint, Handle};
