use serde::Deserialize;

use crate::error::Result;
use crate::storage::StorageType;

#[derive(Debug, PartialEq, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn to_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
        }
    }
}

#[derive(Debug, PartialEq, Deserialize)]
pub struct Config {
    pub log_level: LogLevel,
    pub storage_type: StorageType,
    /// Backing file path for the file backed disk manager.
    pub data_dir: String,
    /// Number of frames in the buffer pool.
    pub pool_size: usize,
    /// The K in LRU-K.
    pub replacer_k: usize,
    /// Max entries per page table bucket.
    pub bucket_size: usize,
}

impl Config {
    pub fn new(file: &str) -> Result<Config> {
        let mut cfg = config::Config::builder()
            .set_default("storage_type", "memory")?
            .set_default("log_level", "debug")?
            .set_default("data_dir", "data")?
            .set_default("pool_size", 64)?
            .set_default("replacer_k", 2)?
            .set_default("bucket_size", 32)?;
        if !file.is_empty() {
            cfg = cfg.add_source(config::File::with_name(file))
        }
        cfg = cfg.add_source(config::Environment::with_prefix("PAGEPOOL"));
        Ok(cfg.build()?.try_deserialize()?)
    }
}
