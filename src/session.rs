use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ApiError, CompletionAck, FillBlankResult, LearningApi, SpeechGrade};
use crate::completion::{CompletionState, CompletionTracker, DwellFired, Trigger};
use crate::exercise::{Advance, EngineView, ExerciseEngine, ExerciseError, QuizFeedback, QuizStep};
use crate::media::{CaptureError, CaptureEvent, MediaKit, PlaybackError, SpeechFault};
use crate::models::{Course, LessonRef, ResourceIcon, VideoSource};
use crate::navigation::{NavError, Navigator, Tab};
use crate::quiz::Grade;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub dwell: Duration,
    pub speech_rate: f32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            dwell: Duration::from_secs(10),
            speech_rate: 0.9,
        }
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("course could not be loaded: {0}")]
    Fetch(#[source] ApiError),
    #[error(transparent)]
    Navigation(#[from] NavError),
    #[error(transparent)]
    Exercise(#[from] ExerciseError),
    #[error(transparent)]
    Speech(#[from] SpeechFault),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Playback(#[from] PlaybackError),
    #[error("open the exercises tab of a lesson first")]
    NoExercises,
}

// Completions of asynchronous work started by the session.
#[derive(Debug)]
pub enum SessionEvent {
    DwellElapsed(DwellFired),
    CompletionSynced {
        lesson_id: String,
        result: Result<CompletionAck, ApiError>,
    },
    CourseRefreshed {
        seq: u64,
        result: Result<Course, ApiError>,
    },
    Capture {
        exercise_id: String,
        generation: u64,
        event: CaptureEvent,
    },
    SpeechGraded {
        exercise_id: String,
        generation: u64,
        result: Result<SpeechGrade, ApiError>,
    },
    FillBlankGraded {
        exercise_id: String,
        result: Result<FillBlankResult, ApiError>,
    },
}

// Receiving side of the session's event channel.
pub struct SessionEvents(mpsc::UnboundedReceiver<SessionEvent>);

impl SessionEvents {
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.0.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.0.try_recv().ok()
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    Passed,
    Failed,
}

// Result shown in a modal after any graded exercise.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModalResult {
    pub exercise_id: String,
    pub verdict: Verdict,
    pub score: Option<f32>,
    pub feedback: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Notice {
    ExerciseResult(ModalResult),
    LessonCompleted { lesson_id: String, progress: f64 },
    ExerciseSetCompleted { lesson_id: String },
    CourseFinished,
    GradingFailed { exercise_id: String, error: String },
}

// ------------- view -------------

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub course_id: String,
    pub title: String,
    pub progress: f64,
    pub completed_lessons: u32,
    pub total_lessons: usize,
    pub tab: Tab,
    pub active: Option<LessonRef>,
    pub next_lesson: Option<LessonRef>,
    pub modules: Vec<ModuleView>,
    pub lesson: Option<LessonView>,
    pub exercises: Option<EngineView>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ModuleView {
    pub id: String,
    pub title: String,
    pub duration: u32,
    pub expanded: bool,
    pub lessons: Vec<LessonSummary>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LessonSummary {
    pub id: String,
    pub title: String,
    pub completed: bool,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LessonView {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub video: Option<VideoSource>,
    pub resources: Vec<ResourceView>,
    pub exercise_count: usize,
    pub tabs: Vec<Tab>,
    pub completion: CompletionState,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ResourceView {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub file_url: String,
    pub icon: ResourceIcon,
}

struct CaptureTask {
    exercise_id: String,
    generation: u64,
    token: CancellationToken,
}

pub struct LearningSession {
    course_id: String,
    api: Arc<dyn LearningApi>,
    media: MediaKit,
    settings: SessionSettings,
    tree: Course,
    nav: Navigator,
    tracker: CompletionTracker,
    engine: Option<ExerciseEngine>,
    capture: Option<CaptureTask>,
    events: mpsc::UnboundedSender<SessionEvent>,
    notices: Vec<Notice>,
    // refreshes issued / newest one applied
    refreshes: u64,
    applied_refresh: u64,
}

impl LearningSession {
    // a failed fetch is fatal; callers retry by opening again
    pub async fn open(
        course_id: &str,
        api: Arc<dyn LearningApi>,
        media: MediaKit,
        settings: SessionSettings,
    ) -> Result<(Self, SessionEvents), SessionError> {
        let tree = api
            .fetch_course_for_learning(course_id)
            .await
            .map_err(SessionError::Fetch)?
            .normalize();
        let (tx, rx) = mpsc::unbounded_channel();

        let nav = Navigator::start(&tree);
        let mut tracker = CompletionTracker::new(settings.dwell);
        tracker.seed(&tree);
        info!(course_id, lessons = tree.total_lessons(), active = ?nav.active(), "learning session opened");

        let mut session = Self {
            course_id: course_id.to_string(),
            api,
            media,
            settings,
            tree,
            nav,
            tracker,
            engine: None,
            capture: None,
            events: tx,
            notices: Vec::new(),
            refreshes: 0,
            applied_refresh: 0,
        };
        session.arm_dwell_if_viewing();
        Ok((session, SessionEvents(rx)))
    }

    pub fn course(&self) -> &Course {
        &self.tree
    }

    pub fn navigator(&self) -> &Navigator {
        &self.nav
    }

    pub fn completion_state(&self, lesson_id: &str) -> CompletionState {
        self.tracker.state(lesson_id)
    }

    pub fn engine(&self) -> Option<&ExerciseEngine> {
        self.engine.as_ref()
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    // ------------- navigation -------------

    pub fn select_lesson(&mut self, lesson_id: &str, module_id: &str) -> Result<(), SessionError> {
        let previous = self.nav.active().map(|a| a.lesson_id.clone());
        let target = self.nav.select_lesson(&self.tree, lesson_id, module_id)?;

        self.tracker.cancel_dwell();
        self.abandon_capture();
        if previous.as_deref() != Some(target.lesson_id.as_str()) {
            self.engine = None;
        }

        // selecting on the video tab is itself a completion signal
        self.request(&target.lesson_id, Trigger::Explicit);
        self.arm_dwell_if_viewing();
        Ok(())
    }

    pub fn toggle_module(&mut self, module_id: &str) -> bool {
        self.nav.toggle_module(module_id)
    }

    pub fn set_tab(&mut self, tab: Tab) -> Result<(), SessionError> {
        self.nav.set_tab(&self.tree, tab)?;
        self.tracker.cancel_dwell();
        if tab != Tab::Exercises {
            self.abandon_capture();
        }
        match tab {
            Tab::Video => self.arm_dwell_if_viewing(),
            Tab::Exercises => self.open_exercises(),
            Tab::Resources | Tab::Discussion => {}
        }
        Ok(())
    }

    pub fn next_lesson(&self) -> Option<LessonRef> {
        self.nav.next_lesson(&self.tree)
    }

    pub fn previous_lesson(&self) -> Option<LessonRef> {
        self.nav.previous_lesson(&self.tree)
    }

    // Selects the following lesson; `None` at the end of the course.
    pub fn go_to_next_lesson(&mut self) -> Result<Option<LessonRef>, SessionError> {
        let Some(next) = self.next_lesson() else {
            return Ok(None);
        };
        self.select_lesson(&next.lesson_id, &next.module_id)?;
        Ok(Some(next))
    }

    pub fn go_to_previous_lesson(&mut self) -> Result<Option<LessonRef>, SessionError> {
        let Some(prev) = self.previous_lesson() else {
            return Ok(None);
        };
        self.select_lesson(&prev.lesson_id, &prev.module_id)?;
        Ok(Some(prev))
    }

    // ------------- completion -------------

    // Asks the server to mark a lesson completed. Returns whether a request
    // was actually sent.
    pub fn request_completion(&mut self, lesson_id: &str) -> bool {
        self.request(lesson_id, Trigger::Explicit)
    }

    fn request(&mut self, lesson_id: &str, trigger: Trigger) -> bool {
        if !self.tracker.begin(&self.tree, lesson_id, trigger) {
            return false;
        }
        let api = self.api.clone();
        let tx = self.events.clone();
        let course_id = self.course_id.clone();
        let lesson_id = lesson_id.to_string();
        tokio::spawn(async move {
            let result = api.mark_lesson_completed(&lesson_id, &course_id).await;
            let _ = tx.send(SessionEvent::CompletionSynced { lesson_id, result });
        });
        true
    }

    fn arm_dwell_if_viewing(&mut self) {
        if self.nav.tab() != Tab::Video {
            return;
        }
        let Some(active) = self.nav.active() else {
            return;
        };
        let lesson_id = active.lesson_id.clone();
        if self.tree.lesson(&lesson_id).map(|l| l.completed).unwrap_or(true) {
            return;
        }
        let tx = self.events.clone();
        self.tracker.arm_dwell(&lesson_id, move |fired| {
            let _ = tx.send(SessionEvent::DwellElapsed(fired));
        });
    }

    fn refresh_course(&mut self) {
        self.refreshes += 1;
        let seq = self.refreshes;
        let api = self.api.clone();
        let tx = self.events.clone();
        let course_id = self.course_id.clone();
        tokio::spawn(async move {
            let result = api.fetch_course_for_learning(&course_id).await;
            let _ = tx.send(SessionEvent::CourseRefreshed { seq, result });
        });
    }

    // ------------- events -------------

    pub fn apply(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::DwellElapsed(fired) => {
                if !self.tracker.take_dwell(&fired) {
                    debug!(lesson_id = %fired.lesson_id, "stale dwell timer");
                    return;
                }
                let viewing = self.nav.tab() == Tab::Video
                    && self.nav.active().map(|a| a.lesson_id.as_str()) == Some(fired.lesson_id.as_str());
                if viewing {
                    self.request(&fired.lesson_id, Trigger::Dwell);
                }
            }
            SessionEvent::CompletionSynced { lesson_id, result } => match result {
                Ok(ack) => {
                    if self.tracker.resolve_success(&mut self.tree, &lesson_id, &ack) {
                        self.notices.push(Notice::LessonCompleted {
                            lesson_id: lesson_id.clone(),
                            progress: self.tree.progress_percent(),
                        });
                    }
                    if self.tracker.dwell_lesson() == Some(lesson_id.as_str()) {
                        self.tracker.cancel_dwell();
                    }
                    self.refresh_course();
                }
                Err(e) => self.tracker.resolve_failure(&lesson_id, e.to_string()),
            },
            SessionEvent::CourseRefreshed { seq, result } => match result {
                // a snapshot older than one already applied would roll progress back
                Ok(_) if seq <= self.applied_refresh => {
                    debug!(seq, applied = self.applied_refresh, "stale course refresh dropped");
                }
                Ok(fresh) => {
                    self.applied_refresh = seq;
                    let fresh = fresh.normalize();
                    self.tracker.reconcile(&mut self.tree, &fresh);
                }
                Err(e) => warn!(course_id = %self.course_id, error = %e, "course refresh failed"),
            },
            SessionEvent::Capture { exercise_id, generation, event } => {
                self.apply_capture(&exercise_id, generation, event);
            }
            SessionEvent::SpeechGraded { exercise_id, generation, result } => {
                self.apply_speech_grade(&exercise_id, generation, result);
            }
            SessionEvent::FillBlankGraded { exercise_id, result } => {
                self.apply_fill_blank(&exercise_id, result);
            }
        }
    }

    // Applies every event that is ready without waiting.
    pub fn pump(&mut self, events: &mut SessionEvents) -> usize {
        let mut n = 0;
        while let Some(ev) = events.try_recv() {
            self.apply(ev);
            n += 1;
        }
        n
    }

    // ------------- exercises -------------

    fn open_exercises(&mut self) {
        let Some(active) = self.nav.active() else {
            return;
        };
        if self.engine.as_ref().map(|e| e.lesson_id()) == Some(active.lesson_id.as_str()) {
            return;
        }
        let exercises = self
            .tree
            .lesson(&active.lesson_id)
            .map(|l| l.exercises.clone())
            .unwrap_or_default();
        self.engine = ExerciseEngine::new(&active.lesson_id, exercises);
    }

    fn engine_mut(&mut self) -> Result<&mut ExerciseEngine, SessionError> {
        if self.nav.tab() != Tab::Exercises {
            return Err(SessionError::NoExercises);
        }
        self.engine.as_mut().ok_or(SessionError::NoExercises)
    }

    pub fn select_option(&mut self, question_id: &str, option_id: &str) -> Result<QuizFeedback, SessionError> {
        let engine = self.engine_mut()?;
        let exercise_id = engine.current().map(|e| e.id.clone()).unwrap_or_default();
        let feedback = engine.select_option(question_id, option_id)?;

        match feedback.grade {
            Grade::Correct => self.media.cue(true),
            Grade::Incorrect => self.media.cue(false),
            Grade::Ungradable => {}
        }
        if let Some(card) = feedback.score {
            self.notices.push(Notice::ExerciseResult(ModalResult {
                exercise_id,
                verdict: if card.correct == card.total { Verdict::Passed } else { Verdict::Failed },
                score: Some(card.percent),
                feedback: format!("{} of {} answers correct", card.correct, card.total),
            }));
        }
        Ok(feedback)
    }

    pub fn next_question(&mut self) -> Result<QuizStep, SessionError> {
        let step = self.engine_mut()?.next_question()?;
        if let QuizStep::Exercise(advance) = step {
            self.after_advance(advance);
        }
        Ok(step)
    }

    pub fn previous_question(&mut self) -> Result<QuizStep, SessionError> {
        Ok(self.engine_mut()?.previous_question()?)
    }

    // Moves to the next exercise once the current one is answered or passed.
    pub fn next_exercise(&mut self) -> Result<Advance, SessionError> {
        let advance = self.engine_mut()?.advance()?;
        self.after_advance(advance);
        Ok(advance)
    }

    pub fn set_blank_answer(&mut self, question_id: &str, answer: &str) -> Result<(), SessionError> {
        Ok(self.engine_mut()?.set_blank_answer(question_id, answer)?)
    }

    pub fn submit_fill_blank(&mut self) -> Result<(), SessionError> {
        let (exercise_id, answers) = self.engine_mut()?.fill_blank_submission()?;
        let api = self.api.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let result = api.submit_fill_in_blank_answers(&exercise_id, &answers).await;
            let _ = tx.send(SessionEvent::FillBlankGraded { exercise_id, result });
        });
        Ok(())
    }

    fn apply_fill_blank(&mut self, exercise_id: &str, result: Result<FillBlankResult, ApiError>) {
        let Some(engine) = self.engine.as_mut() else {
            debug!(exercise_id, "fill-in-the-blank result without open exercises");
            return;
        };
        match result {
            Ok(result) => {
                let Some(outcome) = engine.apply_fill_blank(exercise_id, result) else {
                    return;
                };
                self.media.cue(outcome.cleared);
                let score = if result.total_questions == 0 {
                    0.0
                } else {
                    result.correct_answers as f32 * 100.0 / result.total_questions as f32
                };
                self.notices.push(Notice::ExerciseResult(ModalResult {
                    exercise_id: exercise_id.to_string(),
                    verdict: if outcome.cleared { Verdict::Passed } else { Verdict::Failed },
                    score: Some(score),
                    feedback: format!(
                        "{} of {} blanks correct",
                        result.correct_answers, result.total_questions
                    ),
                }));
                if let Some(advance) = outcome.advance {
                    self.after_advance(advance);
                }
            }
            Err(e) => {
                warn!(exercise_id, error = %e, "fill-in-the-blank grading failed");
                if engine.fill_blank_failed(exercise_id, e.to_string()) {
                    self.notices.push(Notice::GradingFailed {
                        exercise_id: exercise_id.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    // ------------- speech -------------

    pub async fn start_capture(&mut self) -> Result<(), SessionError> {
        let (exercise_id, language) = {
            let engine = self.engine_mut()?;
            let (exercise, task) = engine.speech_task()?;
            (exercise.id.clone(), task.language.clone())
        };

        if let Err(fault) = self.media.check_speech().await {
            warn!(exercise_id = %exercise_id, %fault, "speech exercise unavailable");
            self.engine_mut()?.speech_mut()?.block(fault);
            return Err(fault.into());
        }
        // a denial relayed mid-capture lifts once the checks pass again
        self.engine_mut()?.speech_mut()?.unblock();

        let generation = self.engine_mut()?.speech_mut()?.begin_capture(Instant::now())?;
        if let Some(old) = self.capture.take() {
            old.token.cancel();
        }
        let mut stream = match self.media.capture.start(&language).await {
            Ok(rx) => rx,
            Err(e) => {
                let attempt = self.engine_mut()?.speech_mut()?;
                attempt.apply_capture(generation, CaptureEvent::Error { error: e.clone() }, Instant::now());
                return Err(e.into());
            }
        };

        let token = CancellationToken::new();
        let child = token.clone();
        let tx = self.events.clone();
        let id = exercise_id.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    next = stream.recv() => {
                        let event = next.unwrap_or(CaptureEvent::End);
                        let end = matches!(event, CaptureEvent::End | CaptureEvent::Error { .. });
                        let sent = tx.send(SessionEvent::Capture {
                            exercise_id: id.clone(),
                            generation,
                            event,
                        });
                        if end || sent.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        debug!(exercise_id = %exercise_id, generation, %language, "speech capture started");
        self.capture = Some(CaptureTask { exercise_id, generation, token });
        Ok(())
    }

    pub async fn stop_capture(&mut self) -> Result<(), SessionError> {
        let attempt = self.engine_mut()?.speech_mut()?;
        if !attempt.is_capturing() {
            return Ok(());
        }
        attempt.end_capture(Instant::now());
        // the stream stays open for a trailing final result
        self.media.capture.stop().await;
        Ok(())
    }

    // Clears transcript and result and drops any running capture.
    pub fn reset_speech(&mut self) -> Result<(), SessionError> {
        self.abandon_capture();
        self.engine_mut()?.speech_mut()?.reset();
        Ok(())
    }

    pub fn submit_speech(&mut self) -> Result<(), SessionError> {
        let engine = self.engine_mut()?;
        let exercise_id = engine.speech_task()?.0.id.clone();
        let attempt = engine.speech_mut()?;
        let generation = attempt.generation();
        let submission = attempt.submission()?;

        let api = self.api.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let result = api.submit_speech_result(&exercise_id, &submission).await;
            let _ = tx.send(SessionEvent::SpeechGraded { exercise_id, generation, result });
        });
        Ok(())
    }

    // Plays the recorded target, or synthesizes it when there is none.
    pub async fn play_target(&mut self) -> Result<(), SessionError> {
        let (audio, text, language) = {
            let (_, task) = self.engine_mut()?.speech_task()?;
            (task.target_audio_url.clone(), task.target_text.clone(), task.language.clone())
        };
        let played = match audio {
            Some(url) => self.media.playback.play_recording(&url).await,
            None => self.media.playback.speak(&text, &language, self.settings.speech_rate).await,
        };
        if let Err(e) = &played {
            warn!(error = %e, "target playback failed");
        }
        Ok(played?)
    }

    fn apply_capture(&mut self, exercise_id: &str, generation: u64, event: CaptureEvent) {
        let current = matches!(&self.capture, Some(c) if c.exercise_id == exercise_id && c.generation == generation);
        if !current {
            debug!(exercise_id, generation, "stale capture event");
            return;
        }
        let finished = matches!(event, CaptureEvent::End | CaptureEvent::Error { .. });
        let Some(attempt) = self.engine.as_mut().and_then(|e| e.speech_mut().ok()) else {
            return;
        };
        attempt.apply_capture(generation, event, Instant::now());
        if finished {
            self.capture = None;
        }
    }

    fn apply_speech_grade(&mut self, exercise_id: &str, generation: u64, result: Result<SpeechGrade, ApiError>) {
        let Some(engine) = self.engine.as_mut() else {
            debug!(exercise_id, "speech grade without open exercises");
            return;
        };
        match result {
            Ok(grade) => {
                let Some(outcome) = engine.apply_speech_grade(exercise_id, generation, &grade) else {
                    return;
                };
                let v = &outcome.verdict;
                info!(exercise_id, accuracy = v.accuracy, passed = v.passed, overridden = v.overridden, "speech graded");
                self.media.cue(v.passed);
                self.notices.push(Notice::ExerciseResult(ModalResult {
                    exercise_id: exercise_id.to_string(),
                    verdict: if v.passed { Verdict::Passed } else { Verdict::Failed },
                    score: Some(v.accuracy),
                    feedback: v.feedback.clone(),
                }));
                if let Some(advance) = outcome.advance {
                    self.after_advance(advance);
                }
            }
            Err(e) => {
                warn!(exercise_id, error = %e, "speech grading failed");
                if engine.speech_grading_failed(exercise_id, generation, e.to_string()) {
                    self.notices.push(Notice::GradingFailed {
                        exercise_id: exercise_id.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    fn after_advance(&mut self, advance: Advance) {
        if advance != Advance::SetComplete {
            return;
        }
        let Some(lesson_id) = self.engine.as_ref().map(|e| e.lesson_id().to_string()) else {
            return;
        };
        self.notices.push(Notice::ExerciseSetCompleted { lesson_id });
        match self.next_lesson() {
            Some(next) => {
                if let Err(e) = self.select_lesson(&next.lesson_id, &next.module_id) {
                    warn!(error = %e, "auto-advance failed");
                }
            }
            None => self.notices.push(Notice::CourseFinished),
        }
    }

    // Cancels the recognition stream forwarder and stops the device.
    fn abandon_capture(&mut self) {
        let Some(task) = self.capture.take() else {
            return;
        };
        task.token.cancel();
        if let Some(attempt) = self.engine.as_mut().and_then(|e| e.speech_mut().ok()) {
            attempt.abandon();
        }
        let capture = self.media.capture.clone();
        tokio::spawn(async move {
            capture.stop().await;
        });
        debug!(exercise_id = %task.exercise_id, generation = task.generation, "speech capture abandoned");
    }

    // ------------- view -------------

    pub fn view(&self) -> SessionView {
        let active = self.nav.active().cloned();
        let lesson = active
            .as_ref()
            .and_then(|a| self.tree.lesson(&a.lesson_id))
            .map(|l| LessonView {
                id: l.id.clone(),
                title: l.title.clone(),
                description: l.description.clone(),
                video: l.video(),
                resources: l
                    .resources
                    .iter()
                    .map(|r| ResourceView {
                        id: r.id.clone(),
                        title: r.title.clone(),
                        description: r.description.clone(),
                        file_url: r.file_url.clone(),
                        icon: r.icon(),
                    })
                    .collect(),
                exercise_count: l.exercises.len(),
                tabs: Tab::ALL.into_iter().filter(|t| t.enabled_for(l)).collect(),
                completion: self.tracker.state(&l.id),
            });
        let completed_lessons = self
            .tree
            .enrollment
            .as_ref()
            .map(|e| e.completed_lessons)
            .unwrap_or(self.tree.completed_count() as u32);

        SessionView {
            course_id: self.course_id.clone(),
            title: self.tree.title.clone(),
            progress: self.tree.progress_percent(),
            completed_lessons,
            total_lessons: self.tree.total_lessons(),
            tab: self.nav.tab(),
            next_lesson: self.next_lesson(),
            modules: self
                .tree
                .modules
                .iter()
                .map(|m| ModuleView {
                    id: m.id.clone(),
                    title: m.title.clone(),
                    duration: m.duration,
                    expanded: self.nav.is_expanded(&m.id),
                    lessons: m
                        .lessons
                        .iter()
                        .map(|l| LessonSummary {
                            id: l.id.clone(),
                            title: l.title.clone(),
                            completed: l.completed,
                        })
                        .collect(),
                })
                .collect(),
            active,
            lesson,
            exercises: self.engine.as_ref().map(ExerciseEngine::view),
        }
    }
}

impl Drop for LearningSession {
    fn drop(&mut self) {
        if let Some(task) = self.capture.take() {
            task.token.cancel();
        }
    }
}
