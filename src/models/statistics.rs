// src/models/statistics.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-user aggregate derived from quiz-result events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub user_id: String,
    pub total_questions: u64,
    pub correct_answers: u64,
    pub wrong_answers: u64,

    /// Percentage with two decimals. Always recomputed from the counts.
    pub accuracy: f64,

    /// Cumulative study time in seconds.
    #[serde(default)]
    pub study_time: u64,

    #[serde(default)]
    pub last_study_date: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Statistics {
    /// Zeroed record returned for users who have not answered anything yet.
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            total_questions: 0,
            correct_answers: 0,
            wrong_answers: 0,
            accuracy: 0.0,
            study_time: 0,
            last_study_date: None,
            last_updated: None,
        }
    }

    pub fn recompute_accuracy(&mut self) {
        self.accuracy = accuracy(self.correct_answers, self.total_questions);
    }

    /// Counts agree with each other and accuracy agrees with the counts.
    pub fn is_consistent(&self) -> bool {
        self.correct_answers.checked_add(self.wrong_answers) == Some(self.total_questions)
            && self.accuracy == accuracy(self.correct_answers, self.total_questions)
    }
}

/// `correct / total * 100` rounded to two decimals, or 0 when nothing was answered.
pub fn accuracy(correct: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let percent = correct as f64 / total as f64 * 100.0;
    (percent * 100.0).round() / 100.0
}
