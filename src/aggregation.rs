// src/aggregation.rs

//! Derived aggregates: per-user statistics from quiz results, and groupings
//! of the question bank.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{
    event::{Event, QuizOutcome},
    problem::Problem,
    statistics::{Statistics, accuracy},
};

/// Label used when a quiz result names a question that is no longer in the bank.
pub const UNKNOWN_LAYER: &str = "unknown";

/// Folds one quiz result into `current`.
///
/// Not idempotent: applying the same outcome twice counts it twice.
pub fn record_quiz_result(mut current: Statistics, outcome: &QuizOutcome, at: DateTime<Utc>) -> Statistics {
    current.total_questions = current.total_questions.saturating_add(1);
    if outcome.is_correct {
        current.correct_answers = current.correct_answers.saturating_add(1);
    } else {
        current.wrong_answers = current.wrong_answers.saturating_add(1);
    }
    current.recompute_accuracy();
    if let Some(seconds) = outcome.study_time {
        current.study_time = current.study_time.saturating_add(seconds);
    }
    current.last_study_date = Some(at);
    current
}

/// Question counts by label, plus the rounds present in the bank.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProblemGroups {
    pub by_exam_title: BTreeMap<String, usize>,
    pub by_class: BTreeMap<String, usize>,
    pub by_layer: BTreeMap<String, usize>,
    pub rounds: BTreeSet<u32>,
}

pub fn problem_groups<'a>(problems: impl IntoIterator<Item = &'a Problem>) -> ProblemGroups {
    let mut groups = ProblemGroups::default();
    for problem in problems {
        *groups.by_exam_title.entry(problem.exam_title.clone()).or_default() += 1;
        *groups.by_class.entry(problem.subject_class.clone()).or_default() += 1;
        *groups.by_layer.entry(problem.layer1.clone()).or_default() += 1;
        groups.rounds.insert(problem.round);
    }
    groups
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryStats {
    pub attempts: u64,
    pub correct: u64,
    pub accuracy: f64,
}

/// Per-topic results for one user, from their quiz-result events joined with
/// the questions they answered.
pub fn category_breakdown<'a>(
    events: impl IntoIterator<Item = &'a Event>,
    problems: &HashMap<&str, &Problem>,
) -> BTreeMap<String, CategoryStats> {
    let mut tallies: BTreeMap<String, (u64, u64)> = BTreeMap::new();
    for event in events {
        if !event.kind.is_quiz_result() {
            continue;
        }
        let Ok(outcome) = QuizOutcome::from_payload(&event.payload) else {
            tracing::debug!("Skipping quiz result {} without a correctness flag", event.id);
            continue;
        };
        let layer = outcome
            .qcode
            .as_deref()
            .and_then(|code| problems.get(code))
            .map(|p| p.layer1.clone())
            .filter(|layer| !layer.is_empty())
            .unwrap_or_else(|| UNKNOWN_LAYER.to_string());

        let tally = tallies.entry(layer).or_default();
        tally.0 += 1;
        if outcome.is_correct {
            tally.1 += 1;
        }
    }

    tallies
        .into_iter()
        .map(|(layer, (attempts, correct))| {
            (
                layer,
                CategoryStats {
                    attempts,
                    correct,
                    accuracy: accuracy(correct, attempts),
                },
            )
        })
        .collect()
}
