pub mod attempt;
pub mod catalog;
pub mod review;
pub mod score;
pub mod session;
pub mod shuffle;
pub mod timer;

use std::fmt;

/// A single-choice question with exactly one correct option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    text: String,
    options: Vec<String>,
    correct_option: usize,
}

impl Question {
    pub fn new(
        text: String,
        options: Vec<String>,
        correct_option: usize,
    ) -> Result<Self, ValidationError> {
        if options.len() < 2 {
            return Err(ValidationError::TooFewOptions(text));
        }
        if correct_option >= options.len() {
            return Err(ValidationError::CorrectOptionOutOfRange {
                text,
                index: correct_option,
                len: options.len(),
            });
        }
        Ok(Self {
            text,
            options,
            correct_option,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn correct_option(&self) -> usize {
        self.correct_option
    }

    pub fn is_correct(&self, option: usize) -> bool {
        option == self.correct_option
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    #[default]
    Theory,
    Practice,
}

impl TestType {
    pub fn label(&self) -> &'static str {
        match self {
            TestType::Theory => "Теория",
            TestType::Practice => "Практика",
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A test as published by the catalog. Always holds at least one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Test {
    id: String,
    title: String,
    description: Option<String>,
    time_limit_minutes: Option<u32>,
    test_type: TestType,
    questions: Vec<Question>,
}

impl Test {
    pub fn new(
        id: String,
        title: String,
        description: Option<String>,
        time_limit_minutes: Option<u32>,
        test_type: TestType,
        questions: Vec<Question>,
    ) -> Result<Self, ValidationError> {
        if questions.is_empty() {
            return Err(ValidationError::NoQuestions(id));
        }
        Ok(Self {
            id,
            title,
            description: description.filter(|d| !d.trim().is_empty()),
            // A zero limit means "untimed"
            time_limit_minutes: time_limit_minutes.filter(|m| *m > 0),
            test_type,
            questions,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn time_limit_minutes(&self) -> Option<u32> {
        self.time_limit_minutes
    }

    pub fn test_type(&self) -> TestType {
        self.test_type
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("question {0:?} has fewer than two options")]
    TooFewOptions(String),
    #[error("question {text:?} marks option {index} as correct but has only {len} options")]
    CorrectOptionOutOfRange {
        text: String,
        index: usize,
        len: usize,
    },
    #[error("test {0:?} has no questions")]
    NoQuestions(String),
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::sync::Arc;

    use super::*;

    pub fn question(text: &str, correct_option: usize) -> Question {
        Question::new(
            text.to_string(),
            vec!["A".to_string(), "B".to_string(), "C".to_string()],
            correct_option,
        )
        .unwrap()
    }

    /// Questions named "Q0".."Qn" whose correct options cycle through 0, 1, 2.
    pub fn questions(amount: usize) -> Vec<Question> {
        (0..amount)
            .map(|i| question(&format!("Q{}", i), i % 3))
            .collect()
    }

    pub fn test(amount: usize, time_limit_minutes: Option<u32>) -> Arc<Test> {
        Arc::new(
            Test::new(
                "sets-basics".to_string(),
                "Основы теории множеств".to_string(),
                None,
                time_limit_minutes,
                TestType::Theory,
                questions(amount),
            )
            .unwrap(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_needs_two_options() {
        let err = Question::new("Q".to_string(), vec!["only".to_string()], 0).unwrap_err();
        assert_eq!(err, ValidationError::TooFewOptions("Q".to_string()));
    }

    #[test]
    fn question_rejects_correct_option_past_the_end() {
        let err = Question::new(
            "Q".to_string(),
            vec!["a".to_string(), "b".to_string()],
            2,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::CorrectOptionOutOfRange { index: 2, len: 2, .. }
        ));
    }

    #[test]
    fn test_requires_questions_and_normalizes_zero_limit() {
        let err = Test::new(
            "t".to_string(),
            "T".to_string(),
            None,
            None,
            TestType::Practice,
            vec![],
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::NoQuestions("t".to_string()));

        let test = Test::new(
            "t".to_string(),
            "T".to_string(),
            Some("   ".to_string()),
            Some(0),
            TestType::Practice,
            fixtures::questions(1),
        )
        .unwrap();
        assert_eq!(test.time_limit_minutes(), None);
        assert_eq!(test.description(), None);
    }
}
