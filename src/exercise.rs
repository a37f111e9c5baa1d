use serde::Serialize;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, info};

use crate::api::{BlankAnswer, FillBlankResult, SpeechGrade};
use crate::fill_blank::{self, FillBlankAttempt};
use crate::media::SpeechFault;
use crate::models::{Exercise, ExerciseKind, SpeechTask};
use crate::quiz::{self, Grade, QuizAttempt, RecordedAnswer, ScoreCard};
use crate::speech::{SpeechAttempt, SpeechVerdict};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExerciseError {
    #[error("question {0} already has an answer")]
    AlreadyAnswered(String),
    #[error("question {0} is not part of this exercise")]
    UnknownQuestion(String),
    #[error("option {0} is not part of this question")]
    UnknownOption(String),
    #[error("answer every question before moving on")]
    NotAnswered,
    #[error("this exercise has not been passed yet")]
    NotPassed,
    #[error("the current exercise is not a {0} exercise")]
    WrongKind(&'static str),
    #[error("nothing was captured to submit")]
    NothingToSubmit,
    #[error("a result is already being graded")]
    GradingInFlight,
    #[error("speech capture is still running")]
    StillCapturing,
    #[error("{0}")]
    Blocked(SpeechFault),
    #[error("all exercises of this lesson are done")]
    SetComplete,
}

#[derive(Serialize, Debug, Clone)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Attempt {
    Quiz(QuizAttempt),
    FillInBlank(FillBlankAttempt),
    Speech(SpeechAttempt),
}

impl Attempt {
    fn for_exercise(exercise: &Exercise) -> Attempt {
        match &exercise.kind {
            ExerciseKind::Quiz { .. } => Attempt::Quiz(QuizAttempt::default()),
            ExerciseKind::FillInBlank { .. } => Attempt::FillInBlank(FillBlankAttempt::default()),
            ExerciseKind::Listening(_)
            | ExerciseKind::Speaking(_)
            | ExerciseKind::Recognition(_)
            | ExerciseKind::Pronunciation(_) => Attempt::Speech(SpeechAttempt::default()),
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Advance {
    Next { index: usize },
    SetComplete,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum QuizStep {
    Question { index: usize },
    Exercise(Advance),
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizFeedback {
    pub question_id: String,
    pub grade: Grade,
    pub explanation: Option<String>,
    // Present once the last open question of the quiz got its answer.
    pub score: Option<ScoreCard>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FillBlankOutcome {
    pub result: FillBlankResult,
    pub cleared: bool,
    pub advance: Option<Advance>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeechOutcome {
    pub verdict: SpeechVerdict,
    pub advance: Option<Advance>,
}

// Serializable snapshot for the shell.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EngineView {
    pub lesson_id: String,
    pub exercise_id: Option<String>,
    pub index: usize,
    pub total: usize,
    pub complete: bool,
    pub attempt: Option<Attempt>,
    pub answers: HashMap<String, RecordedAnswer>,
}

pub struct ExerciseEngine {
    lesson_id: String,
    exercises: Vec<Exercise>,
    index: usize,
    attempt: Attempt,
    // quiz answers for the whole set, write-once per question
    answers: HashMap<String, RecordedAnswer>,
    cleared: HashSet<String>,
    complete: bool,
}

impl ExerciseEngine {
    pub fn new(lesson_id: &str, exercises: Vec<Exercise>) -> Option<Self> {
        // a question set without questions could never be passed
        let exercises: Vec<Exercise> = exercises
            .into_iter()
            .filter(|e| match &e.kind {
                ExerciseKind::Quiz { questions } | ExerciseKind::FillInBlank { questions } => !questions.is_empty(),
                _ => true,
            })
            .collect();
        let attempt = Attempt::for_exercise(exercises.first()?);
        Some(Self {
            lesson_id: lesson_id.to_string(),
            exercises,
            index: 0,
            attempt,
            answers: HashMap::new(),
            cleared: HashSet::new(),
            complete: false,
        })
    }

    pub fn lesson_id(&self) -> &str {
        &self.lesson_id
    }

    pub fn current(&self) -> Option<&Exercise> {
        if self.complete {
            None
        } else {
            self.exercises.get(self.index)
        }
    }

    pub fn attempt(&self) -> &Attempt {
        &self.attempt
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn answer(&self, question_id: &str) -> Option<&RecordedAnswer> {
        self.answers.get(question_id)
    }

    pub fn view(&self) -> EngineView {
        EngineView {
            lesson_id: self.lesson_id.clone(),
            exercise_id: self.current().map(|e| e.id.clone()),
            index: self.index,
            total: self.exercises.len(),
            complete: self.complete,
            attempt: (!self.complete).then(|| self.attempt.clone()),
            answers: self.answers.clone(),
        }
    }

    // Whether the current exercise allows moving on.
    pub fn is_answered(&self) -> bool {
        let Some(exercise) = self.current() else {
            return false;
        };
        match (&exercise.kind, &self.attempt) {
            (ExerciseKind::Quiz { questions }, Attempt::Quiz(_)) => quiz::all_answered(questions, &self.answers),
            (ExerciseKind::FillInBlank { .. }, Attempt::FillInBlank(a)) => a.cleared(),
            (_, Attempt::Speech(a)) => a.cleared(),
            _ => false,
        }
    }

    // Moves past the current exercise once it is answered or passed.
    pub fn advance(&mut self) -> Result<Advance, ExerciseError> {
        let Some(exercise) = self.current() else {
            return Err(ExerciseError::SetComplete);
        };
        if !self.is_answered() {
            return Err(match exercise.kind {
                ExerciseKind::Quiz { .. } => ExerciseError::NotAnswered,
                _ => ExerciseError::NotPassed,
            });
        }
        let id = exercise.id.clone();
        self.cleared.insert(id);

        if self.index + 1 < self.exercises.len() {
            self.index += 1;
            self.attempt = Attempt::for_exercise(&self.exercises[self.index]);
            debug!(lesson_id = %self.lesson_id, index = self.index, "next exercise");
            return Ok(Advance::Next { index: self.index });
        }

        let every_question_answered = self
            .exercises
            .iter()
            .filter(|e| matches!(e.kind, ExerciseKind::Quiz { .. }))
            .all(|e| quiz::all_answered(e.kind.questions(), &self.answers));
        let every_exercise_cleared = self.exercises.iter().all(|e| self.cleared.contains(&e.id));
        if !every_question_answered || !every_exercise_cleared {
            return Err(ExerciseError::NotAnswered);
        }
        self.complete = true;
        info!(lesson_id = %self.lesson_id, exercises = self.exercises.len(), "exercise set complete");
        Ok(Advance::SetComplete)
    }

    // ------------- quiz -------------

    pub fn select_option(
        &mut self,
        question_id: &str,
        option_id: &str,
    ) -> Result<QuizFeedback, ExerciseError> {
        let exercise = match self.exercises.get(self.index) {
            Some(e) if !self.complete => e,
            _ => return Err(ExerciseError::SetComplete),
        };
        let (ExerciseKind::Quiz { questions }, Attempt::Quiz(state)) = (&exercise.kind, &mut self.attempt) else {
            return Err(ExerciseError::WrongKind("quiz"));
        };
        let pos = questions
            .iter()
            .position(|q| q.id == question_id)
            .ok_or_else(|| ExerciseError::UnknownQuestion(question_id.to_string()))?;
        if self.answers.contains_key(question_id) {
            return Err(ExerciseError::AlreadyAnswered(question_id.to_string()));
        }

        let question = &questions[pos];
        let grade = quiz::grade(question, option_id)?;
        self.answers.insert(
            question_id.to_string(),
            RecordedAnswer { option_id: option_id.to_string(), grade },
        );
        state.current = pos;

        Ok(QuizFeedback {
            question_id: question_id.to_string(),
            grade,
            explanation: question.answer_explanation.clone(),
            score: quiz::score(questions, &self.answers),
        })
    }

    pub fn next_question(&mut self) -> Result<QuizStep, ExerciseError> {
        let (len, pos, answered) = self.quiz_cursor()?;
        if !answered {
            return Err(ExerciseError::NotAnswered);
        }
        if pos + 1 < len {
            if let Attempt::Quiz(state) = &mut self.attempt {
                state.current = pos + 1;
            }
            return Ok(QuizStep::Question { index: pos + 1 });
        }
        self.advance().map(QuizStep::Exercise)
    }

    pub fn previous_question(&mut self) -> Result<QuizStep, ExerciseError> {
        let (_, pos, _) = self.quiz_cursor()?;
        let index = pos.saturating_sub(1);
        if let Attempt::Quiz(state) = &mut self.attempt {
            state.current = index;
        }
        Ok(QuizStep::Question { index })
    }

    fn quiz_cursor(&self) -> Result<(usize, usize, bool), ExerciseError> {
        let exercise = self.current().ok_or(ExerciseError::SetComplete)?;
        let (ExerciseKind::Quiz { questions }, Attempt::Quiz(state)) = (&exercise.kind, &self.attempt) else {
            return Err(ExerciseError::WrongKind("quiz"));
        };
        let answered = questions
            .get(state.current)
            .map(|q| self.answers.contains_key(&q.id))
            .unwrap_or(true);
        Ok((questions.len(), state.current, answered))
    }

    // ------------- fill in the blank -------------

    pub fn set_blank_answer(&mut self, question_id: &str, answer: &str) -> Result<(), ExerciseError> {
        let exercise = match self.exercises.get(self.index) {
            Some(e) if !self.complete => e,
            _ => return Err(ExerciseError::SetComplete),
        };
        match (&exercise.kind, &mut self.attempt) {
            (ExerciseKind::FillInBlank { questions }, Attempt::FillInBlank(a)) => {
                a.set_answer(questions, question_id, answer)
            }
            _ => Err(ExerciseError::WrongKind("fill-in-the-blank")),
        }
    }

    pub fn fill_blank_submission(&mut self) -> Result<(String, Vec<BlankAnswer>), ExerciseError> {
        let exercise = match self.exercises.get(self.index) {
            Some(e) if !self.complete => e,
            _ => return Err(ExerciseError::SetComplete),
        };
        match (&exercise.kind, &mut self.attempt) {
            (ExerciseKind::FillInBlank { questions }, Attempt::FillInBlank(a)) => {
                Ok((exercise.id.clone(), a.submission(questions)?))
            }
            _ => Err(ExerciseError::WrongKind("fill-in-the-blank")),
        }
    }

    // Applies a grading result; `None` when the learner already moved on.
    pub fn apply_fill_blank(&mut self, exercise_id: &str, result: FillBlankResult) -> Option<FillBlankOutcome> {
        if self.current().map(|e| e.id.as_str()) != Some(exercise_id) {
            debug!(exercise_id, "dropping fill-in-the-blank result for inactive exercise");
            return None;
        }
        let Attempt::FillInBlank(a) = &mut self.attempt else {
            return None;
        };
        let cleared = a.apply(result);
        let advance = if cleared { self.advance().ok() } else { None };
        Some(FillBlankOutcome { result, cleared, advance })
    }

    pub fn fill_blank_failed(&mut self, exercise_id: &str, error: String) -> bool {
        if self.current().map(|e| e.id.as_str()) != Some(exercise_id) {
            return false;
        }
        match &mut self.attempt {
            Attempt::FillInBlank(a) => {
                a.failed(error);
                true
            }
            _ => false,
        }
    }

    // ------------- speech -------------

    pub fn speech_task(&self) -> Result<(&Exercise, &SpeechTask), ExerciseError> {
        let exercise = self.current().ok_or(ExerciseError::SetComplete)?;
        match exercise.kind.speech() {
            Some((_, task)) => Ok((exercise, task)),
            None => Err(ExerciseError::WrongKind("speech")),
        }
    }

    pub fn speech(&self) -> Option<&SpeechAttempt> {
        match &self.attempt {
            Attempt::Speech(a) if !self.complete => Some(a),
            _ => None,
        }
    }

    pub fn speech_mut(&mut self) -> Result<&mut SpeechAttempt, ExerciseError> {
        if self.complete {
            return Err(ExerciseError::SetComplete);
        }
        match &mut self.attempt {
            Attempt::Speech(a) => Ok(a),
            _ => Err(ExerciseError::WrongKind("speech")),
        }
    }

    // Applies a grading result for the given capture generation.
    pub fn apply_speech_grade(
        &mut self,
        exercise_id: &str,
        generation: u64,
        grade: &SpeechGrade,
    ) -> Option<SpeechOutcome> {
        if self.current().map(|e| e.id.as_str()) != Some(exercise_id) {
            debug!(exercise_id, "dropping speech grade for inactive exercise");
            return None;
        }
        let verdict = self.speech_mut().ok()?.apply_grade(generation, grade)?;
        let advance = if verdict.passed { self.advance().ok() } else { None };
        Some(SpeechOutcome { verdict, advance })
    }

    pub fn speech_grading_failed(&mut self, exercise_id: &str, generation: u64, error: String) -> bool {
        if self.current().map(|e| e.id.as_str()) != Some(exercise_id) {
            return false;
        }
        match self.speech_mut() {
            Ok(a) => a.grading_failed(generation, error),
            Err(_) => false,
        }
    }
}
