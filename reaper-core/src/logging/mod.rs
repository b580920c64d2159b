mod database;
mod layer;

pub use database::{install_database_logger, make_database_logger_layer};
