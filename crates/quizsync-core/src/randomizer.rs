//! Per-attempt question selection and answer shuffling.
//!
//! Each attempt samples a subset of the bank without replacement and
//! reorders every question's choices, rewriting `correct_index` so grading
//! keeps comparing indices. Any `Rng` works; no cryptographic strength is
//! needed.

use std::time::Duration;

use rand::seq::{index, SliceRandom};
use rand::Rng;

use crate::bank::validate_questions;
use crate::error::QuizError;
use crate::model::Question;

/// Select `count` questions from `bank` and shuffle each one's choices.
///
/// When `count >= bank.len()` the whole bank is returned in random order.
pub fn select_and_shuffle<R: Rng + ?Sized>(
    bank: &[Question],
    count: usize,
    rng: &mut R,
) -> Result<Vec<Question>, QuizError> {
    validate_questions(bank)?;
    if count == 0 {
        return Err(QuizError::EmptySelection);
    }

    let amount = count.min(bank.len());
    let mut picked: Vec<&Question> = index::sample(rng, bank.len(), amount)
        .into_iter()
        .map(|i| &bank[i])
        .collect();
    picked.shuffle(rng);

    picked
        .into_iter()
        .map(|q| shuffle_choices(q, rng))
        .collect()
}

/// Return a copy of `question` with its choices in a new random order.
pub fn shuffle_choices<R: Rng + ?Sized>(
    question: &Question,
    rng: &mut R,
) -> Result<Question, QuizError> {
    let mut order: Vec<usize> = (0..question.choices.len()).collect();
    order.shuffle(rng);

    let correct_index = order
        .iter()
        .position(|&original| original == question.correct_index)
        .ok_or_else(|| QuizError::MalformedQuestion {
            id: question.id.clone(),
            reason: "correct index out of range".into(),
        })?;

    Ok(Question {
        choices: order
            .iter()
            .map(|&original| question.choices[original].clone())
            .collect(),
        correct_index,
        ..question.clone()
    })
}

/// Prepares quiz attempts, pausing briefly so loading states stay visible.
#[derive(Debug, Clone)]
pub struct QuizRandomizer {
    loading_delay: Duration,
}

impl Default for QuizRandomizer {
    fn default() -> Self {
        Self {
            loading_delay: Duration::from_millis(500),
        }
    }
}

impl QuizRandomizer {
    pub fn new(loading_delay: Duration) -> Self {
        Self { loading_delay }
    }

    /// Produce a fresh attempt. Every call shuffles independently, so this
    /// also serves the "try again" flow.
    pub async fn prepare(&self, bank: &[Question], count: usize) -> Result<Vec<Question>, QuizError> {
        // Fail fast: a broken bank should not wait out the delay.
        validate_questions(bank)?;
        if !self.loading_delay.is_zero() {
            tokio::time::sleep(self.loading_delay).await;
        }
        select_and_shuffle(bank, count, &mut rand::thread_rng())
    }
}
