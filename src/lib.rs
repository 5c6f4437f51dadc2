pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod schema;
pub mod services;
pub mod state;
pub mod storage;
pub mod views;

pub use config::Config;
pub use error::{AppError, AppResult};
