use serde::Serialize;
use std::collections::BTreeMap;

use crate::api::{BlankAnswer, FillBlankResult};
use crate::exercise::ExerciseError;
use crate::models::Question;

// Answers typed into a fill-in-the-blank exercise, graded as one unit by the
// server.
#[derive(Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct FillBlankAttempt {
    pub answers: BTreeMap<String, String>,
    pub submitting: bool,
    pub result: Option<FillBlankResult>,
    pub error: Option<String>,
}

// A pass only counts when every question was answered correctly; the
// server's `passed` flag alone is not enough.
pub fn passed_all(result: &FillBlankResult) -> bool {
    result.passed && result.total_questions > 0 && result.correct_answers >= result.total_questions
}

impl FillBlankAttempt {
    pub fn set_answer(
        &mut self,
        questions: &[Question],
        question_id: &str,
        answer: &str,
    ) -> Result<(), ExerciseError> {
        if self.submitting {
            return Err(ExerciseError::GradingInFlight);
        }
        if !questions.iter().any(|q| q.id == question_id) {
            return Err(ExerciseError::UnknownQuestion(question_id.to_string()));
        }
        self.answers.insert(question_id.to_string(), answer.trim().to_string());
        Ok(())
    }

    pub fn submission(&mut self, questions: &[Question]) -> Result<Vec<BlankAnswer>, ExerciseError> {
        if self.submitting {
            return Err(ExerciseError::GradingInFlight);
        }
        if questions.is_empty() {
            return Err(ExerciseError::NothingToSubmit);
        }
        let mut out = Vec::with_capacity(questions.len());
        for q in questions {
            match self.answers.get(&q.id) {
                Some(a) if !a.is_empty() => out.push(BlankAnswer {
                    question_id: q.id.clone(),
                    answer: a.clone(),
                }),
                _ => return Err(ExerciseError::NotAnswered),
            }
        }
        self.submitting = true;
        self.error = None;
        Ok(out)
    }

    // Records the aggregate and reports whether it clears the exercise.
    pub fn apply(&mut self, result: FillBlankResult) -> bool {
        self.submitting = false;
        self.result = Some(result);
        passed_all(&result)
    }

    pub fn failed(&mut self, error: String) {
        self.submitting = false;
        self.error = Some(error);
    }

    pub fn cleared(&self) -> bool {
        self.result.as_ref().map(passed_all).unwrap_or(false)
    }
}
