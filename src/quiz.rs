use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

use crate::exercise::ExerciseError;
use crate::models::Question;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Grade {
    Correct,
    Incorrect,
    // The question was authored without any correct option.
    Ungradable,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecordedAnswer {
    pub option_id: String,
    pub grade: Grade,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreCard {
    pub correct: usize,
    pub total: usize,
    pub percent: f32,
}

// Cursor over the questions of the quiz being worked on.
#[derive(Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttempt {
    pub current: usize,
}

// Grades a choice against the option flags already in the content tree.
pub fn grade(question: &Question, option_id: &str) -> Result<Grade, ExerciseError> {
    let chosen = question
        .options
        .iter()
        .find(|o| o.id == option_id)
        .ok_or_else(|| ExerciseError::UnknownOption(option_id.to_string()))?;

    match question.options.iter().filter(|o| o.correct).count() {
        0 => {
            warn!(question_id = %question.id, "question has no correct option");
            Ok(Grade::Ungradable)
        }
        n => {
            if n > 1 {
                warn!(question_id = %question.id, correct_options = n, "question has several correct options");
            }
            Ok(if chosen.correct { Grade::Correct } else { Grade::Incorrect })
        }
    }
}

// Score once every question has an answer, `None` before that.
pub fn score(questions: &[Question], answers: &HashMap<String, RecordedAnswer>) -> Option<ScoreCard> {
    let mut correct = 0;
    for q in questions {
        match answers.get(&q.id) {
            Some(a) if a.grade == Grade::Correct => correct += 1,
            Some(_) => {}
            None => return None,
        }
    }
    let total = questions.len();
    let percent = if total == 0 { 100.0 } else { correct as f32 * 100.0 / total as f32 };
    Some(ScoreCard { correct, total, percent })
}

pub fn all_answered(questions: &[Question], answers: &HashMap<String, RecordedAnswer>) -> bool {
    questions.iter().all(|q| answers.contains_key(&q.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuestionOption;

    fn question(flags: &[bool]) -> Question {
        Question {
            id: "q".into(),
            content: "¿Cómo estás?".into(),
            hint: None,
            options: flags
                .iter()
                .enumerate()
                .map(|(i, c)| QuestionOption { id: format!("o{}", i), content: format!("opt {}", i), correct: *c })
                .collect(),
            answer_explanation: Some("Bien is the usual reply".into()),
        }
    }

    #[test]
    fn test_grade_uses_option_flag() {
        let q = question(&[false, true, false]);
        assert_eq!(grade(&q, "o1").unwrap(), Grade::Correct);
        assert_eq!(grade(&q, "o2").unwrap(), Grade::Incorrect);
        assert_eq!(grade(&q, "o9"), Err(ExerciseError::UnknownOption("o9".into())));
    }

    #[test]
    fn test_no_correct_option_is_ungradable() {
        let q = question(&[false, false]);
        assert_eq!(grade(&q, "o0").unwrap(), Grade::Ungradable);
    }

    #[test]
    fn test_score_waits_for_every_answer() {
        let mut a = question(&[true, false]);
        a.id = "a".into();
        let mut b = question(&[true, false]);
        b.id = "b".into();
        let qs = vec![a, b];

        let mut answers = HashMap::new();
        answers.insert("a".to_string(), RecordedAnswer { option_id: "o0".into(), grade: Grade::Correct });
        assert_eq!(score(&qs, &answers), None);

        answers.insert("b".to_string(), RecordedAnswer { option_id: "o1".into(), grade: Grade::Incorrect });
        let card = score(&qs, &answers).unwrap();
        assert_eq!((card.correct, card.total), (1, 2));
        assert_eq!(card.percent, 50.0);
    }
}
