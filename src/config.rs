use std::path::PathBuf;

const DEFAULT_CATALOG_PATH: &str = "data/tests.json";
const DEFAULT_DB_PATH: &str = "db.sqlite";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub catalog_path: PathBuf,
    pub db_path: String,
}

impl Config {
    /// Reads the environment after `.env` has been loaded.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // `Bot::from_env` panics without a token, so check it up front
        if lookup("TELOXIDE_TOKEN").map_or(true, |token| token.is_empty()) {
            return Err(ConfigError::Missing("TELOXIDE_TOKEN"));
        }
        let catalog_path = lookup("QUIZ_CATALOG_PATH")
            .filter(|path| !path.is_empty())
            .unwrap_or_else(|| DEFAULT_CATALOG_PATH.to_string());
        let db_path = lookup("QUIZ_DB_PATH")
            .filter(|path| !path.is_empty())
            .unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        Ok(Self {
            catalog_path: PathBuf::from(catalog_path),
            db_path,
        })
    }
}
