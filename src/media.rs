use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

// One item of a recognition stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CaptureEvent {
    Interim { transcript: String, #[serde(default)] confidence: f32 },
    Final { transcript: String, #[serde(default)] confidence: f32 },
    Error { error: CaptureError },
    End,
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", content = "message", rename_all = "kebab-case")]
pub enum CaptureError {
    #[error("no speech was detected")]
    NoSpeech,
    #[error("microphone access was denied")]
    CaptureDenied,
    #[error("no microphone is available")]
    CaptureUnavailable,
    #[error("speech capture failed: {0}")]
    Other(String),
}

// Blocking conditions for speech exercises. Each one carries the message
// shown to the learner.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SpeechFault {
    #[error("This browser does not support speech recognition. Try a recent Chrome or Edge.")]
    Unsupported,
    #[error("Microphone access was denied. Allow it in the browser settings and try again.")]
    PermissionDenied,
    #[error("No microphone was found. Connect one and try again.")]
    DeviceNotFound,
}

impl SpeechFault {
    // Capture errors that make the exercise unusable, as opposed to ones the
    // learner can simply retry.
    pub fn from_capture(err: &CaptureError) -> Option<SpeechFault> {
        match err {
            CaptureError::CaptureDenied => Some(SpeechFault::PermissionDenied),
            CaptureError::CaptureUnavailable => Some(SpeechFault::DeviceNotFound),
            CaptureError::NoSpeech | CaptureError::Other(_) => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("playback is not supported")]
    Unsupported,
    #[error("playback failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait SpeechCapture: Send + Sync {
    fn is_supported(&self) -> bool;

    // Resolves once microphone access is granted.
    async fn ensure_microphone(&self) -> Result<(), CaptureError>;

    // Opens a continuous recognition stream emitting interim and final results.
    async fn start(&self, language: &str) -> Result<mpsc::Receiver<CaptureEvent>, CaptureError>;

    async fn stop(&self);
}

#[async_trait]
pub trait SpeechPlayback: Send + Sync {
    fn is_supported(&self) -> bool;

    async fn speak(&self, text: &str, language: &str, rate: f32) -> Result<(), PlaybackError>;

    async fn play_recording(&self, url: &str) -> Result<(), PlaybackError>;
}

pub trait AudioCue: Send + Sync {
    fn play(&self, correct: bool) -> Result<(), PlaybackError>;
}

#[derive(Clone)]
pub struct MediaKit {
    pub capture: Arc<dyn SpeechCapture>,
    pub playback: Arc<dyn SpeechPlayback>,
    pub cues: Arc<dyn AudioCue>,
}

impl MediaKit {
    pub fn new(
        capture: Arc<dyn SpeechCapture>,
        playback: Arc<dyn SpeechPlayback>,
        cues: Arc<dyn AudioCue>,
    ) -> Self {
        Self { capture, playback, cues }
    }

    pub fn cue(&self, correct: bool) {
        if let Err(e) = self.cues.play(correct) {
            warn!(error = %e, correct, "audio cue dropped");
        }
    }

    // Preconditions for any speech exercise.
    pub async fn check_speech(&self) -> Result<(), SpeechFault> {
        if !self.capture.is_supported() || !self.playback.is_supported() {
            return Err(SpeechFault::Unsupported);
        }
        match self.capture.ensure_microphone().await {
            Ok(()) => Ok(()),
            Err(CaptureError::CaptureDenied) => Err(SpeechFault::PermissionDenied),
            Err(CaptureError::CaptureUnavailable) => Err(SpeechFault::DeviceNotFound),
            Err(other) => {
                warn!(error = %other, "microphone check failed");
                Err(SpeechFault::DeviceNotFound)
            }
        }
    }
}
