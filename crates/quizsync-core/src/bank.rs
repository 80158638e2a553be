//! Quiz bank loading and validation.
//!
//! Loads quiz documents from JSON files and checks that every question can
//! be graded before an attempt is allowed to start.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::QuizError;
use crate::model::Question;

/// A named collection of questions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizBank {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub questions: Vec<Question>,
}

/// Parse a single JSON file into a `QuizBank`.
pub fn parse_bank(path: &Path) -> Result<QuizBank> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read quiz bank: {}", path.display()))?;

    parse_bank_str(&content, path)
}

/// Parse a JSON string into a `QuizBank` and validate it.
pub fn parse_bank_str(content: &str, source_path: &Path) -> Result<QuizBank> {
    let bank: QuizBank = serde_json::from_str(content)
        .with_context(|| format!("failed to parse quiz bank: {}", source_path.display()))?;

    validate_questions(&bank.questions)
        .with_context(|| format!("invalid quiz bank: {}", source_path.display()))?;

    Ok(bank)
}

/// Load every `.json` quiz bank in a directory, skipping unreadable files.
pub fn load_bank_directory(dir: &Path) -> Result<Vec<QuizBank>> {
    let mut banks = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            match parse_bank(&path) {
                Ok(bank) => banks.push(bank),
                Err(e) => tracing::warn!("skipping {}: {e:#}", path.display()),
            }
        }
    }

    Ok(banks)
}

/// Check that a question set is non-empty and every question is gradable.
pub fn validate_questions(questions: &[Question]) -> Result<(), QuizError> {
    if questions.is_empty() {
        return Err(QuizError::EmptyBank);
    }

    let mut seen = HashSet::new();
    for q in questions {
        validate_question(q)?;
        if !seen.insert(q.id.as_str()) {
            return Err(QuizError::DuplicateQuestion(q.id.clone()));
        }
    }
    Ok(())
}

fn validate_question(q: &Question) -> Result<(), QuizError> {
    let malformed = |reason: &str| QuizError::MalformedQuestion {
        id: q.id.clone(),
        reason: reason.to_string(),
    };

    if q.id.trim().is_empty() {
        return Err(malformed("missing id"));
    }
    if q.prompt.trim().is_empty() {
        return Err(malformed("prompt is empty"));
    }
    if q.choices.len() < 2 {
        return Err(malformed("needs at least two choices"));
    }
    if q.correct_index >= q.choices.len() {
        return Err(malformed(&format!(
            "correct index {} out of range for {} choices",
            q.correct_index,
            q.choices.len()
        )));
    }
    Ok(())
}
