pub mod client_db;
pub mod database;
pub mod models;

pub use client_db::ClientDatabase;

use std::fs;
use std::path::Path;

/// Ensure the directory holding `database_path` exists
pub fn ensure_data_dir(database_path: &str) -> std::io::Result<()> {
    match Path::new(database_path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}
