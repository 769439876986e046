use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use log::warn;
use serde::Deserialize;
use serde_json::Value;

use crate::quiz::{Question, Test, TestType, ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("test {0:?} was not found")]
    NotFound(String),
    #[error("failed to read the catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse the catalog: {0}")]
    Json(#[from] serde_json::Error),
}

/// Source of tests that can be taken. Only published tests are offered.
pub trait TestCatalog {
    fn published_tests(&self) -> Vec<Arc<Test>>;

    fn find(&self, id: &str) -> Result<Arc<Test>, CatalogError> {
        self.published_tests()
            .into_iter()
            .find(|test| test.id() == id)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }

    /// `None` means every type.
    fn published_by_type(&self, test_type: Option<TestType>) -> Vec<Arc<Test>> {
        self.published_tests()
            .into_iter()
            .filter(|test| test_type.map_or(true, |t| test.test_type() == t))
            .collect()
    }
}

/// One row of the `tests` table as exported to JSON.
#[derive(Debug, Clone, Deserialize)]
struct TestRow {
    id: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    questions: Vec<QuestionRow>,
    #[serde(default)]
    time_limit: Option<i64>,
    #[serde(default)]
    is_published: bool,
    #[serde(default)]
    test_type: TestType,
}

#[derive(Debug, Clone, Deserialize)]
struct QuestionRow {
    question: String,
    options: Vec<String>,
    correct: i64,
}

impl TestRow {
    fn into_test(self) -> Result<Test, ValidationError> {
        let questions = self
            .questions
            .into_iter()
            .map(|row| {
                // A negative index can never be valid, push it out of range
                let correct = usize::try_from(row.correct).unwrap_or(usize::MAX);
                Question::new(row.question, row.options, correct)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let time_limit_minutes = self.time_limit.and_then(|m| u32::try_from(m).ok());
        Test::new(
            self.id,
            self.title,
            self.description,
            time_limit_minutes,
            self.test_type,
            questions,
        )
    }
}

/// Catalog loaded once from a JSON array of test rows.
pub struct JsonCatalog {
    published: Vec<Arc<Test>>,
}

impl JsonCatalog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Rows that don't parse or fail validation are skipped with a warning,
    /// so one broken test doesn't take the whole catalog down.
    pub fn from_reader(reader: impl Read) -> Result<Self, CatalogError> {
        let rows: Vec<Value> = serde_json::from_reader(reader)?;
        let published = rows
            .into_iter()
            .enumerate()
            .filter_map(|(index, row)| match serde_json::from_value::<TestRow>(row) {
                Ok(row) => Some(row),
                Err(err) => {
                    warn!("Skipping catalog row {}: {}", index, err);
                    None
                }
            })
            .filter(|row| row.is_published)
            .filter_map(|row| {
                let id = row.id.clone();
                match row.into_test() {
                    Ok(test) => Some(Arc::new(test)),
                    Err(err) => {
                        warn!("Skipping test {:?}: {}", id, err);
                        None
                    }
                }
            })
            .collect();
        Ok(Self { published })
    }

    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        Self::from_reader(json.as_bytes())
    }
}

impl TestCatalog for JsonCatalog {
    fn published_tests(&self) -> Vec<Arc<Test>> {
        self.published.clone()
    }
}
