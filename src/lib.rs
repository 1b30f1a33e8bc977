pub mod auth;
pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod jobs;
pub mod models;
pub mod notifications;
pub mod routes;
pub mod schema;
pub mod state;
pub mod statistics;
pub mod tickets;
pub mod utils;
pub mod workers;

pub use workers::{default_handlers, Worker};
