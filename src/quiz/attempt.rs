use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info};
use rand::Rng;

use crate::quiz::review::Review;
use crate::quiz::score::{self, Score};
use crate::quiz::shuffle::shuffle;
use crate::quiz::timer::{Countdown, Tick};
use crate::quiz::{Question, Test};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    InProgress,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttemptError {
    #[error("the attempt is already finished")]
    NotInProgress,
    #[error("the attempt is still in progress")]
    NotFinished,
    #[error("question {0} has no answer yet")]
    Unanswered(usize),
    #[error("already at the first question")]
    AtFirstQuestion,
    #[error("already at the last question")]
    AtLastQuestion,
    #[error("position {position} is not the current question ({current})")]
    NotCurrentPosition { position: usize, current: usize },
    #[error("option {option} is out of range, the question has {len} options")]
    OptionOutOfRange { option: usize, len: usize },
}

/// One run through a test. The question order is shuffled once here and
/// never recomputed; starting over builds a new attempt.
#[derive(Debug, Clone)]
pub struct Attempt {
    test: Arc<Test>,
    question_order: Vec<Question>,
    answers: BTreeMap<usize, usize>,
    current_position: usize,
    countdown: Option<Countdown>,
    phase: Phase,
}

impl Attempt {
    pub fn start<R: Rng + ?Sized>(test: Arc<Test>, rng: &mut R) -> Self {
        let question_order = shuffle(test.questions(), rng);
        let countdown = test.time_limit_minutes().map(Countdown::from_minutes);
        info!(
            "Starting attempt on test {:?} ({} questions, time limit: {:?} min)",
            test.id(),
            question_order.len(),
            test.time_limit_minutes()
        );
        Self {
            test,
            question_order,
            answers: BTreeMap::new(),
            current_position: 0,
            countdown,
            phase: Phase::InProgress,
        }
    }

    pub fn test(&self) -> &Arc<Test> {
        &self.test
    }

    pub fn question_order(&self) -> &[Question] {
        &self.question_order
    }

    pub fn answers(&self) -> &BTreeMap<usize, usize> {
        &self.answers
    }

    pub fn len(&self) -> usize {
        self.question_order.len()
    }

    pub fn current_position(&self) -> usize {
        self.current_position
    }

    pub fn current_question(&self) -> &Question {
        &self.question_order[self.current_position]
    }

    pub fn is_last_question(&self) -> bool {
        self.current_position + 1 == self.question_order.len()
    }

    /// The stored answer for a position, used to pre-select it on revisit.
    pub fn selected_at(&self, position: usize) -> Option<usize> {
        self.answers.get(&position).copied()
    }

    pub fn remaining_seconds(&self) -> Option<u32> {
        self.countdown.map(|c| c.remaining_seconds())
    }

    pub fn countdown(&self) -> Option<&Countdown> {
        self.countdown.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    pub fn select_answer(&mut self, position: usize, option: usize) -> Result<(), AttemptError> {
        self.ensure_in_progress()?;
        if position != self.current_position {
            return Err(self.reject(AttemptError::NotCurrentPosition {
                position,
                current: self.current_position,
            }));
        }
        let len = self.question_order[position].options().len();
        if option >= len {
            return Err(self.reject(AttemptError::OptionOutOfRange { option, len }));
        }
        self.answers.insert(position, option);
        Ok(())
    }

    pub fn go_next(&mut self) -> Result<(), AttemptError> {
        self.ensure_in_progress()?;
        if self.is_last_question() {
            return Err(self.reject(AttemptError::AtLastQuestion));
        }
        if !self.answers.contains_key(&self.current_position) {
            return Err(self.reject(AttemptError::Unanswered(self.current_position)));
        }
        self.current_position += 1;
        Ok(())
    }

    pub fn go_previous(&mut self) -> Result<(), AttemptError> {
        self.ensure_in_progress()?;
        if self.current_position == 0 {
            return Err(self.reject(AttemptError::AtFirstQuestion));
        }
        self.current_position -= 1;
        Ok(())
    }

    /// Moves to `Finished`. Returns `false` if the attempt was already finished.
    pub fn finish(&mut self) -> bool {
        if self.is_finished() {
            debug!("Ignoring finish on already finished attempt {:?}", self.test.id());
            return false;
        }
        self.phase = Phase::Finished;
        info!(
            "Finished attempt on test {:?}: {} of {} answered",
            self.test.id(),
            self.answers.len(),
            self.question_order.len()
        );
        true
    }

    /// One second of wall-clock time. Returns `None` for untimed or finished
    /// attempts; the finished state is frozen.
    pub fn tick(&mut self) -> Option<Tick> {
        if self.is_finished() {
            return None;
        }
        let tick = self.countdown.as_mut()?.tick();
        if tick == Tick::Expired {
            info!("Time is up on test {:?}", self.test.id());
            self.finish();
        }
        Some(tick)
    }

    pub fn score(&self) -> Result<Score, AttemptError> {
        if !self.is_finished() {
            return Err(AttemptError::NotFinished);
        }
        Ok(score::score(&self.question_order, &self.answers))
    }

    pub fn review(&self) -> Result<Review, AttemptError> {
        let score = self.score()?;
        Ok(Review::build(
            self.test.title(),
            &self.question_order,
            &self.answers,
            score,
        ))
    }

    fn ensure_in_progress(&self) -> Result<(), AttemptError> {
        if self.is_finished() {
            return Err(self.reject(AttemptError::NotInProgress));
        }
        Ok(())
    }

    fn reject(&self, err: AttemptError) -> AttemptError {
        debug!("Rejected operation on test {:?}: {}", self.test.id(), err);
        err
    }
}
