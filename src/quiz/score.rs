use std::collections::BTreeMap;

use crate::quiz::Question;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Score {
    pub correct_count: usize,
    pub total_count: usize,
    pub percentage: u32,
    /// Whether each position was answered correctly, in question order.
    pub breakdown: Vec<bool>,
}

/// Scores a finished attempt. Unanswered positions count as wrong.
pub fn score(question_order: &[Question], answers: &BTreeMap<usize, usize>) -> Score {
    let breakdown: Vec<bool> = question_order
        .iter()
        .enumerate()
        .map(|(position, question)| {
            answers
                .get(&position)
                .map_or(false, |option| question.is_correct(*option))
        })
        .collect();

    let correct_count = breakdown.iter().filter(|correct| **correct).count();
    let total_count = question_order.len();

    Score {
        correct_count,
        total_count,
        percentage: percentage(correct_count, total_count),
        breakdown,
    }
}

/// `correct / total * 100`, rounded half up, in integer arithmetic.
fn percentage(correct: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((correct * 200 + total) / (total * 2)) as u32
}
