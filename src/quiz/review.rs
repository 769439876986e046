use std::collections::BTreeMap;

use teloxide::utils::html;

use crate::quiz::score::Score;
use crate::quiz::Question;

/// Telegram rejects messages longer than this.
const MESSAGE_LIMIT: usize = 4096;

/// Longest question or option text shown in a review, before escaping.
/// Escaping can grow it up to six times, which still leaves a line under
/// `MESSAGE_LIMIT`.
const TEXT_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Correct,
    Wrong,
    Unanswered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewOption {
    pub text: String,
    pub is_correct: bool,
    pub is_selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewItem {
    pub text: String,
    pub options: Vec<ReviewOption>,
    pub outcome: Outcome,
}

/// Everything the result screen shows about a finished attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Review {
    pub title: String,
    pub score: Score,
    pub items: Vec<ReviewItem>,
}

impl Review {
    pub fn build(
        title: &str,
        question_order: &[Question],
        answers: &BTreeMap<usize, usize>,
        score: Score,
    ) -> Self {
        let items = question_order
            .iter()
            .enumerate()
            .map(|(position, question)| {
                let selected = answers.get(&position).copied();
                let outcome = match selected {
                    None => Outcome::Unanswered,
                    Some(option) if question.is_correct(option) => Outcome::Correct,
                    Some(_) => Outcome::Wrong,
                };
                let options = question
                    .options()
                    .iter()
                    .enumerate()
                    .map(|(index, text)| ReviewOption {
                        text: text.clone(),
                        is_correct: question.is_correct(index),
                        is_selected: selected == Some(index),
                    })
                    .collect();
                ReviewItem {
                    text: question.text().to_string(),
                    options,
                    outcome,
                }
            })
            .collect();

        Self {
            title: title.to_string(),
            score,
            items,
        }
    }

    pub fn summary_html(&self) -> String {
        format!(
            "<b>Тест завершен!</b>\n{}\n\n<b>{}%</b>\nПравильных ответов: {} из {}",
            html::escape(&clamp(&self.title)),
            self.score.percentage,
            self.score.correct_count,
            self.score.total_count
        )
    }

    /// The summary followed by the per-question review, packed into as few
    /// messages as fit under Telegram's length limit. A question too long for
    /// one message is sent line by line.
    pub fn to_html_messages(&self) -> Vec<String> {
        let mut packer = Packer::default();
        packer.push(&self.summary_html(), "");
        packer.flush();
        for (position, item) in self.items.iter().enumerate() {
            let block = render_item(position, item);
            if block.chars().count() <= MESSAGE_LIMIT {
                packer.push(&block, "\n\n");
            } else {
                packer.flush();
                for line in block.lines() {
                    packer.push(line, "\n");
                }
                packer.flush();
            }
        }
        packer.finish()
    }
}

#[derive(Default)]
struct Packer {
    messages: Vec<String>,
    current: String,
}

impl Packer {
    fn push(&mut self, piece: &str, separator: &str) {
        let needed =
            self.current.chars().count() + separator.chars().count() + piece.chars().count();
        if !self.current.is_empty() && needed > MESSAGE_LIMIT {
            self.flush();
        }
        if !self.current.is_empty() {
            self.current.push_str(separator);
        }
        self.current.push_str(piece);
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            self.messages.push(std::mem::take(&mut self.current));
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.messages
    }
}

fn clamp(text: &str) -> String {
    if text.chars().count() <= TEXT_LIMIT {
        return text.to_string();
    }
    let mut clamped: String = text.chars().take(TEXT_LIMIT - 1).collect();
    clamped.push('…');
    clamped
}

fn render_item(position: usize, item: &ReviewItem) -> String {
    let mark = match item.outcome {
        Outcome::Correct => "✅",
        Outcome::Wrong | Outcome::Unanswered => "❌",
    };
    let mut block = format!(
        "{} <b>{}. {}</b>",
        mark,
        position + 1,
        html::escape(&clamp(&item.text))
    );
    if item.outcome == Outcome::Unanswered {
        block.push_str("\n<i>Нет ответа</i>");
    }
    for option in &item.options {
        let text = html::escape(&clamp(&option.text));
        let line = match (option.is_correct, option.is_selected) {
            (true, true) => format!("🟢 <b>{}</b> (ваш ответ)", text),
            (true, false) => format!("🟢 <b>{}</b> (правильный ответ)", text),
            (false, true) => format!("🔴 <s>{}</s> (ваш ответ)", text),
            (false, false) => format!("⚪ {}", text),
        };
        block.push('\n');
        block.push_str(&line);
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::fixtures;
    use crate::quiz::score::score;

    fn review(answers: BTreeMap<usize, usize>) -> Review {
        // Correct options are [0, 1, 2]
        let questions = fixtures::questions(3);
        let score = score(&questions, &answers);
        Review::build("Множества <&>", &questions, &answers, score)
    }

    #[test]
    fn classifies_each_question() {
        let review = review(BTreeMap::from([(0, 0), (1, 2)]));
        let outcomes: Vec<Outcome> = review.items.iter().map(|i| i.outcome).collect();
        assert_eq!(
            outcomes,
            vec![Outcome::Correct, Outcome::Wrong, Outcome::Unanswered]
        );
    }

    #[test]
    fn marks_correct_and_selected_options() {
        let review = review(BTreeMap::from([(1, 2)]));
        let wrong = &review.items[1];
        assert!(wrong.options[1].is_correct);
        assert!(!wrong.options[1].is_selected);
        assert!(wrong.options[2].is_selected);
        assert!(!wrong.options[2].is_correct);

        let unanswered = &review.items[2];
        assert!(unanswered.options.iter().all(|o| !o.is_selected));
        assert!(unanswered.options[2].is_correct);
    }

    #[test]
    fn html_distinguishes_wrong_answer_from_correct_one() {
        let review = review(BTreeMap::from([(0, 0), (1, 2)]));
        let messages = review.to_html_messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("<b>33%</b>"));
        assert!(messages[0].contains("Множества &lt;&amp;&gt;"));

        let body = &messages[1];
        assert!(body.contains("🟢 <b>A</b> (ваш ответ)"));
        assert!(body.contains("🟢 <b>B</b> (правильный ответ)"));
        assert!(body.contains("🔴 <s>C</s> (ваш ответ)"));
        // The unanswered question only shows its correct option
        let unanswered = body.split("\n\n").nth(2).unwrap();
        assert!(unanswered.contains("Нет ответа"));
        assert!(!unanswered.contains("ваш ответ"));
    }

    #[test]
    fn summary_reports_count_and_percentage() {
        let review = review(BTreeMap::from([(0, 0), (1, 1)]));
        let summary = review.summary_html();
        assert!(summary.contains("<b>67%</b>"));
        assert!(summary.contains("Правильных ответов: 2 из 3"));
    }

    #[test]
    fn long_reviews_are_split_under_the_limit() {
        let long_text = "x".repeat(1500);
        let questions: Vec<Question> = (0..10)
            .map(|_| {
                Question::new(long_text.clone(), vec!["a".to_string(), "b".to_string()], 0)
                    .unwrap()
            })
            .collect();
        let answers = BTreeMap::new();
        let score = score(&questions, &answers);
        let messages = Review::build("T", &questions, &answers, score).to_html_messages();

        assert!(messages.len() > 2);
        assert!(messages.iter().all(|m| m.chars().count() <= MESSAGE_LIMIT));
    }

    #[test]
    fn oversized_question_is_clamped_and_split_by_line() {
        let options = vec!["<".repeat(3000), "&".repeat(3000), "b".to_string()];
        let questions = vec![Question::new("&".repeat(10_000), options, 2).unwrap()];
        let answers = BTreeMap::from([(0, 0)]);
        let score = score(&questions, &answers);
        let messages = Review::build("T", &questions, &answers, score).to_html_messages();

        assert!(messages.len() > 2);
        for message in &messages {
            assert!(message.chars().count() <= MESSAGE_LIMIT);
            assert_eq!(message.matches("<b>").count(), message.matches("</b>").count());
            assert_eq!(message.matches("<s>").count(), message.matches("</s>").count());
        }
        let body = messages[1..].join("\n");
        assert!(body.contains("…</b>"));
        assert!(body.contains("🟢 <b>b</b> (правильный ответ)"));
        assert!(body.contains("🔴 <s>"));
    }

    #[test]
    fn short_texts_are_left_alone() {
        assert_eq!(clamp("A ∪ B"), "A ∪ B");
        let long = "x".repeat(TEXT_LIMIT + 1);
        let clamped = clamp(&long);
        assert_eq!(clamped.chars().count(), TEXT_LIMIT);
        assert!(clamped.ends_with('…'));
    }
}
