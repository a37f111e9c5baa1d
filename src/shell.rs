// The browser owns microphone and speakers: capture events are relayed in,
// playback and cues go out as queued directives.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::LearningApi;
use crate::exercise::{Advance, QuizFeedback, QuizStep};
use crate::media::{AudioCue, CaptureError, CaptureEvent, MediaKit, PlaybackError, SpeechCapture, SpeechPlayback};
use crate::models::LessonRef;
use crate::navigation::Tab;
use crate::session::{LearningSession, Notice, SessionError, SessionEvents, SessionSettings, SessionView};

const CAPTURE_BUFFER: usize = 64;
const COMMAND_BUFFER: usize = 32;

#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Microphone {
    #[default]
    Granted,
    Denied,
    Missing,
}

// What the browser reported it can do.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Capabilities {
    pub recognition: bool,
    pub synthesis: bool,
    pub microphone: Microphone,
}

// Work the browser has to carry out on the session's behalf.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Directive {
    StartCapture { language: String },
    StopCapture,
    Speak { text: String, language: String, rate: f32 },
    PlayRecording { url: String },
    Cue { correct: bool },
}

pub struct RelayMedia {
    caps: Capabilities,
    directives: Mutex<Vec<Directive>>,
    stream: Mutex<Option<mpsc::Sender<CaptureEvent>>>,
}

impl RelayMedia {
    pub fn new(caps: Capabilities) -> Arc<Self> {
        Arc::new(Self {
            caps,
            directives: Mutex::new(Vec::new()),
            stream: Mutex::new(None),
        })
    }

    pub fn kit(self: &Arc<Self>) -> MediaKit {
        MediaKit::new(self.clone(), self.clone(), self.clone())
    }

    pub fn drain(&self) -> Vec<Directive> {
        std::mem::take(&mut *self.directives.lock().unwrap_or_else(PoisonError::into_inner))
    }

    // Feeds one browser recognition event into the open stream. Returns
    // false when no stream is open.
    pub fn relay(&self, event: CaptureEvent) -> bool {
        let mut stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        let last = matches!(event, CaptureEvent::End | CaptureEvent::Error { .. });
        let Some(tx) = stream.as_ref() else {
            debug!(?event, "capture event without open stream");
            return false;
        };
        let sent = tx.try_send(event).is_ok();
        if last || !sent {
            *stream = None;
        }
        sent
    }

    fn push(&self, directive: Directive) {
        self.directives
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(directive);
    }
}

#[async_trait]
impl SpeechCapture for RelayMedia {
    fn is_supported(&self) -> bool {
        self.caps.recognition
    }

    async fn ensure_microphone(&self) -> Result<(), CaptureError> {
        match self.caps.microphone {
            Microphone::Granted => Ok(()),
            Microphone::Denied => Err(CaptureError::CaptureDenied),
            Microphone::Missing => Err(CaptureError::CaptureUnavailable),
        }
    }

    async fn start(&self, language: &str) -> Result<mpsc::Receiver<CaptureEvent>, CaptureError> {
        let (tx, rx) = mpsc::channel(CAPTURE_BUFFER);
        *self.stream.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        self.push(Directive::StartCapture { language: language.to_string() });
        Ok(rx)
    }

    async fn stop(&self) {
        // the browser still delivers the trailing final result and end
        self.push(Directive::StopCapture);
    }
}

#[async_trait]
impl SpeechPlayback for RelayMedia {
    fn is_supported(&self) -> bool {
        self.caps.synthesis
    }

    async fn speak(&self, text: &str, language: &str, rate: f32) -> Result<(), PlaybackError> {
        if !self.caps.synthesis {
            return Err(PlaybackError::Unsupported);
        }
        self.push(Directive::Speak {
            text: text.to_string(),
            language: language.to_string(),
            rate,
        });
        Ok(())
    }

    async fn play_recording(&self, url: &str) -> Result<(), PlaybackError> {
        self.push(Directive::PlayRecording { url: url.to_string() });
        Ok(())
    }
}

impl AudioCue for RelayMedia {
    fn play(&self, correct: bool) -> Result<(), PlaybackError> {
        self.push(Directive::Cue { correct });
        Ok(())
    }
}

// ------------- actor -------------

#[derive(Debug)]
pub enum Action {
    View,
    SelectLesson { lesson_id: String, module_id: String },
    NextLesson,
    PreviousLesson,
    ToggleModule(String),
    SetTab(Tab),
    AnswerQuestion { question_id: String, option_id: String },
    NextQuestion,
    PreviousQuestion,
    NextExercise,
    SetBlankAnswer { question_id: String, answer: String },
    SubmitFillBlank,
    StartCapture,
    StopCapture,
    ResetSpeech,
    SubmitSpeech,
    PlayTarget,
    Capture(CaptureEvent),
}

// Immediate result of an action, next to the refreshed view.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Outcome {
    Quiz(QuizFeedback),
    Step { step: QuizStep },
    Exercise { advance: Advance },
    Lesson { lesson: Option<LessonRef> },
    Module { expanded: bool },
    Relayed { accepted: bool },
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub view: SessionView,
    pub outcome: Option<Outcome>,
    pub notices: Vec<Notice>,
    pub directives: Vec<Directive>,
}

struct Command {
    action: Action,
    reply: oneshot::Sender<Result<Snapshot, SessionError>>,
}

#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
}

impl SessionHandle {
    // Runs an action on the session's task. `None` once the session is gone.
    pub async fn send(&self, action: Action) -> Option<Result<Snapshot, SessionError>> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command { action, reply }).await.ok()?;
        rx.await.ok()
    }
}

pub fn spawn(session: LearningSession, events: SessionEvents, media: Arc<RelayMedia>) -> SessionHandle {
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    tokio::spawn(run(session, events, rx, media));
    SessionHandle { commands: tx }
}

async fn run(
    mut session: LearningSession,
    mut events: SessionEvents,
    mut commands: mpsc::Receiver<Command>,
    media: Arc<RelayMedia>,
) {
    loop {
        tokio::select! {
            cmd = commands.recv() => {
                let Some(Command { action, reply }) = cmd else { break };
                let relayed = matches!(action, Action::Capture(_));
                let result = perform(&mut session, &media, action).await;
                if relayed {
                    // let the forwarder hand the event over before answering
                    tokio::task::yield_now().await;
                }
                session.pump(&mut events);
                let _ = reply.send(result.map(|outcome| snapshot(&mut session, &media, outcome)));
            }
            Some(ev) = events.recv() => session.apply(ev),
        }
    }
    info!(course_id = %session.view().course_id, "learning session closed");
}

async fn perform(
    session: &mut LearningSession,
    media: &RelayMedia,
    action: Action,
) -> Result<Option<Outcome>, SessionError> {
    let outcome = match action {
        Action::View => None,
        Action::SelectLesson { lesson_id, module_id } => {
            session.select_lesson(&lesson_id, &module_id)?;
            None
        }
        Action::NextLesson => Some(Outcome::Lesson { lesson: session.go_to_next_lesson()? }),
        Action::PreviousLesson => Some(Outcome::Lesson { lesson: session.go_to_previous_lesson()? }),
        Action::ToggleModule(id) => Some(Outcome::Module { expanded: session.toggle_module(&id) }),
        Action::SetTab(tab) => {
            session.set_tab(tab)?;
            None
        }
        Action::AnswerQuestion { question_id, option_id } => {
            Some(Outcome::Quiz(session.select_option(&question_id, &option_id)?))
        }
        Action::NextQuestion => Some(Outcome::Step { step: session.next_question()? }),
        Action::PreviousQuestion => Some(Outcome::Step { step: session.previous_question()? }),
        Action::NextExercise => Some(Outcome::Exercise { advance: session.next_exercise()? }),
        Action::SetBlankAnswer { question_id, answer } => {
            session.set_blank_answer(&question_id, &answer)?;
            None
        }
        Action::SubmitFillBlank => {
            session.submit_fill_blank()?;
            None
        }
        Action::StartCapture => {
            session.start_capture().await?;
            None
        }
        Action::StopCapture => {
            session.stop_capture().await?;
            None
        }
        Action::ResetSpeech => {
            session.reset_speech()?;
            None
        }
        Action::SubmitSpeech => {
            session.submit_speech()?;
            None
        }
        Action::PlayTarget => {
            session.play_target().await?;
            None
        }
        Action::Capture(event) => Some(Outcome::Relayed { accepted: media.relay(event) }),
    };
    Ok(outcome)
}

fn snapshot(session: &mut LearningSession, media: &RelayMedia, outcome: Option<Outcome>) -> Snapshot {
    Snapshot {
        view: session.view(),
        outcome,
        notices: session.drain_notices(),
        directives: media.drain(),
    }
}

// ------------- registry -------------

// Builds the backend client for a session, given the learner's bearer token.
pub type ApiFactory = Arc<dyn Fn(Option<String>) -> Arc<dyn LearningApi> + Send + Sync>;

struct Entry {
    handle: SessionHandle,
    last_seen: Instant,
}

#[derive(Clone)]
pub struct AppState {
    sessions: Arc<RwLock<HashMap<Uuid, Entry>>>,
    api: ApiFactory,
    settings: SessionSettings,
}

impl AppState {
    pub fn new(api: ApiFactory, settings: SessionSettings) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            api,
            settings,
        }
    }

    // Loads the course and starts the session task.
    pub async fn open(
        &self,
        course_id: &str,
        caps: Capabilities,
        token: Option<String>,
    ) -> Result<(Uuid, Snapshot), SessionError> {
        let media = RelayMedia::new(caps);
        let api = (self.api)(token);
        let (mut session, events) =
            LearningSession::open(course_id, api, media.kit(), self.settings.clone()).await?;
        let first = snapshot(&mut session, &media, None);

        let id = Uuid::new_v4();
        let handle = spawn(session, events, media);
        self.sessions.write().await.insert(id, Entry { handle, last_seen: Instant::now() });
        info!(session_id = %id, course_id, "session registered");
        Ok((id, first))
    }

    // Looks a session up and counts the lookup as activity.
    pub async fn get(&self, id: &Uuid) -> Option<SessionHandle> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(id)?;
        entry.last_seen = Instant::now();
        Some(entry.handle.clone())
    }

    // Dropping the last handle ends the session task.
    pub async fn close(&self, id: &Uuid) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    // Closes every session untouched for at least `max_idle`.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, entry| {
            let idle = now.duration_since(entry.last_seen);
            if idle < max_idle {
                return true;
            }
            info!(session_id = %id, idle_secs = idle.as_secs(), "idle session closed");
            false
        });
        before - sessions.len()
    }

    // Sweeps idle sessions every `every` until the runtime shuts down.
    pub fn spawn_sweeper(&self, every: Duration, max_idle: Duration) -> JoinHandle<()> {
        let state = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let evicted = state.evict_idle(max_idle).await;
                if evicted > 0 {
                    debug!(evicted, "session sweep");
                }
            }
        })
    }
}
