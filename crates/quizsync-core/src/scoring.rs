//! Attempt scoring with the high-stakes penalty.

use serde::{Deserialize, Serialize};

use crate::model::{Answers, Question};

/// Points and penalties applied when grading an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringPolicy {
    /// Points per correct answer.
    #[serde(default = "default_points_per_correct")]
    pub points_per_correct: i64,
    /// Users whose current score exceeds this play in high-stakes mode.
    #[serde(default = "default_high_stakes_threshold")]
    pub high_stakes_threshold: i64,
    /// Points subtracted per wrong answer in high-stakes mode.
    #[serde(default = "default_penalty_per_wrong")]
    pub penalty_per_wrong: i64,
}

fn default_points_per_correct() -> i64 {
    10
}
fn default_high_stakes_threshold() -> i64 {
    1000
}
fn default_penalty_per_wrong() -> i64 {
    15
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            points_per_correct: default_points_per_correct(),
            high_stakes_threshold: default_high_stakes_threshold(),
            penalty_per_wrong: default_penalty_per_wrong(),
        }
    }
}

/// Result of grading one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreCard {
    pub correct: u32,
    /// Wrong or unanswered questions.
    pub wrong: u32,
    pub raw: i64,
    pub penalty: i64,
    /// `raw - penalty`. Not clamped at zero.
    pub score: i64,
    pub high_stakes: bool,
}

impl ScoringPolicy {
    /// Whether a user with `current_score` plays in high-stakes mode.
    pub fn is_high_stakes(&self, current_score: Option<i64>) -> bool {
        current_score.is_some_and(|s| s > self.high_stakes_threshold)
    }

    /// Grade `answers` against `questions`.
    ///
    /// An unanswered question counts as wrong.
    pub fn score(
        &self,
        questions: &[Question],
        answers: &Answers,
        current_score: Option<i64>,
    ) -> ScoreCard {
        let correct = questions
            .iter()
            .filter(|q| answers.get(&q.id).is_some_and(|&choice| q.is_correct(choice)))
            .count() as u32;
        let wrong = questions.len() as u32 - correct;

        let high_stakes = self.is_high_stakes(current_score);
        let raw = i64::from(correct) * self.points_per_correct;
        let penalty = if high_stakes {
            i64::from(wrong) * self.penalty_per_wrong
        } else {
            0
        };

        ScoreCard {
            correct,
            wrong,
            raw,
            penalty,
            score: raw - penalty,
            high_stakes,
        }
    }
}
