use rusqlite::Connection;

use crate::config::Config;
use crate::db;
use crate::error::Result;
use crate::file_store::{self, FileStore};

/// Everything a parse run talks to, built once at startup.
pub struct Context {
    pub config: Config,
    pub conn: Connection,
    pub store: Box<dyn FileStore>,
}

impl Context {
    pub fn open(config: Config) -> Result<Self> {
        let conn = db::connect(&config.db_path)?;
        db::init_schema(&conn)?;
        let store = file_store::from_config(&config.file_store);
        Ok(Self::with_parts(config, conn, store))
    }

    pub fn with_parts(config: Config, conn: Connection, store: Box<dyn FileStore>) -> Self {
        Self { config, conn, store }
    }
}
