use serde::Serialize;
use tokio::time::Instant;

use crate::api::{SpeechGrade, SpeechSubmission};
use crate::exercise::ExerciseError;
use crate::media::{CaptureEvent, SpeechFault};

// Top of the accuracy scale reported by the grader.
pub const MAX_ACCURACY: f32 = 100.0;

const SUCCESS_FEEDBACK: &str = "Excellent! Your pronunciation matches the target.";
const RETRY_FEEDBACK: &str = "Not quite there yet. Listen to the target again and retry.";

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "phase", content = "fault", rename_all = "camelCase")]
pub enum SpeechPhase {
    Idle,
    Capturing,
    Captured,
    Grading,
    Graded,
    Blocked(SpeechFault),
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpeechVerdict {
    pub passed: bool,
    pub accuracy: f32,
    pub feedback: String,
    // Set when a perfect score overrode a failing verdict from the grader.
    pub overridden: bool,
}

// Each capture or reset starts a new generation; older results are ignored.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SpeechAttempt {
    pub phase: SpeechPhase,
    pub live_transcript: String,
    pub transcript: Option<String>,
    pub confidence: Option<f32>,
    pub accuracy: Option<f32>,
    pub passed: Option<bool>,
    pub feedback: Option<String>,
    pub attempts: u32,
    pub elapsed_seconds: f64,
    pub error: Option<String>,
    #[serde(skip)]
    started_at: Option<Instant>,
    #[serde(skip)]
    generation: u64,
}

impl Default for SpeechAttempt {
    fn default() -> Self {
        Self {
            phase: SpeechPhase::Idle,
            live_transcript: String::new(),
            transcript: None,
            confidence: None,
            accuracy: None,
            passed: None,
            feedback: None,
            attempts: 0,
            elapsed_seconds: 0.0,
            error: None,
            started_at: None,
            generation: 0,
        }
    }
}

impl SpeechAttempt {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_capturing(&self) -> bool {
        self.phase == SpeechPhase::Capturing
    }

    pub fn cleared(&self) -> bool {
        self.phase == SpeechPhase::Graded && self.passed == Some(true)
    }

    pub fn block(&mut self, fault: SpeechFault) {
        self.clear();
        self.generation += 1;
        self.phase = SpeechPhase::Blocked(fault);
        self.error = Some(fault.to_string());
    }

    // Lifts a block once the precondition check passes again.
    pub fn unblock(&mut self) -> bool {
        if !matches!(self.phase, SpeechPhase::Blocked(_)) {
            return false;
        }
        self.phase = SpeechPhase::Idle;
        self.error = None;
        true
    }

    pub fn begin_capture(&mut self, now: Instant) -> Result<u64, ExerciseError> {
        match self.phase {
            SpeechPhase::Blocked(f) => return Err(ExerciseError::Blocked(f)),
            SpeechPhase::Grading => return Err(ExerciseError::GradingInFlight),
            SpeechPhase::Capturing => return Err(ExerciseError::StillCapturing),
            SpeechPhase::Idle | SpeechPhase::Captured | SpeechPhase::Graded => {}
        }
        self.clear();
        self.generation += 1;
        self.phase = SpeechPhase::Capturing;
        self.started_at = Some(now);
        Ok(self.generation)
    }

    // Applies one recognition event. Returns false when it was stale.
    pub fn apply_capture(&mut self, generation: u64, event: CaptureEvent, now: Instant) -> bool {
        if generation != self.generation {
            return false;
        }
        let capturing = self.phase == SpeechPhase::Capturing;
        let after_stop = matches!(self.phase, SpeechPhase::Idle | SpeechPhase::Captured);
        if !capturing && !after_stop {
            return false;
        }

        match event {
            CaptureEvent::Interim { transcript, .. } => {
                if !capturing {
                    return false;
                }
                self.live_transcript = transcript;
            }
            CaptureEvent::Final { transcript, confidence } => {
                let text = transcript.trim().to_string();
                self.live_transcript = text.clone();
                if !text.is_empty() {
                    self.transcript = Some(text);
                    self.confidence = Some(confidence);
                    if after_stop {
                        self.phase = SpeechPhase::Captured;
                    }
                }
            }
            CaptureEvent::Error { error } => {
                if !capturing {
                    return false;
                }
                match SpeechFault::from_capture(&error) {
                    Some(fault) => self.block(fault),
                    None => {
                        self.clear();
                        self.phase = SpeechPhase::Idle;
                        self.error = Some(error.to_string());
                    }
                }
            }
            CaptureEvent::End => {
                if !capturing {
                    return false;
                }
                self.finish(now);
            }
        }
        true
    }

    // Learner pressed stop. Late final results of this generation still apply.
    pub fn end_capture(&mut self, now: Instant) {
        if self.is_capturing() {
            self.finish(now);
        }
    }

    // Drops the running capture without keeping anything it produced.
    pub fn abandon(&mut self) {
        if self.is_capturing() {
            self.clear();
            self.generation += 1;
            self.phase = SpeechPhase::Idle;
        }
    }

    pub fn submission(&mut self) -> Result<SpeechSubmission, ExerciseError> {
        match self.phase {
            SpeechPhase::Blocked(f) => return Err(ExerciseError::Blocked(f)),
            SpeechPhase::Grading => return Err(ExerciseError::GradingInFlight),
            SpeechPhase::Capturing => return Err(ExerciseError::StillCapturing),
            SpeechPhase::Idle | SpeechPhase::Graded => return Err(ExerciseError::NothingToSubmit),
            SpeechPhase::Captured => {}
        }
        let text = self
            .transcript
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(ExerciseError::NothingToSubmit)?;
        self.phase = SpeechPhase::Grading;
        self.error = None;
        Ok(SpeechSubmission {
            recognized_text: text,
            confidence_score: self.confidence.unwrap_or(0.0),
            elapsed_seconds: self.elapsed_seconds.round() as u32,
        })
    }

    // Applies the grader's answer, with a perfect accuracy always counting as
    // a pass.
    pub fn apply_grade(&mut self, generation: u64, grade: &SpeechGrade) -> Option<SpeechVerdict> {
        if generation != self.generation || self.phase != SpeechPhase::Grading {
            return None;
        }
        let overridden = !grade.is_passed && grade.accuracy_score >= MAX_ACCURACY;
        let passed = grade.is_passed || overridden;
        let feedback = if overridden {
            SUCCESS_FEEDBACK.to_string()
        } else {
            grade
                .pronunciation_feedback
                .clone()
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| {
                    let fallback = if passed { SUCCESS_FEEDBACK } else { RETRY_FEEDBACK };
                    fallback.to_string()
                })
        };

        self.phase = SpeechPhase::Graded;
        self.accuracy = Some(grade.accuracy_score);
        self.confidence = Some(grade.confidence_score);
        self.passed = Some(passed);
        self.feedback = Some(feedback.clone());
        self.attempts = grade.attempt_number.max(self.attempts + 1);

        Some(SpeechVerdict { passed, accuracy: grade.accuracy_score, feedback, overridden })
    }

    // Grading request failed; the capture stays available for resubmission.
    pub fn grading_failed(&mut self, generation: u64, error: String) -> bool {
        if generation != self.generation || self.phase != SpeechPhase::Grading {
            return false;
        }
        self.phase = SpeechPhase::Captured;
        self.error = Some(error);
        true
    }

    pub fn reset(&mut self) {
        self.clear();
        self.generation += 1;
        match self.phase {
            SpeechPhase::Blocked(fault) => self.error = Some(fault.to_string()),
            _ => self.phase = SpeechPhase::Idle,
        }
    }

    fn finish(&mut self, now: Instant) {
        if let Some(start) = self.started_at.take() {
            self.elapsed_seconds = now.duration_since(start).as_secs_f64();
        }
        self.phase = if self.transcript.is_some() {
            SpeechPhase::Captured
        } else {
            SpeechPhase::Idle
        };
    }

    fn clear(&mut self) {
        self.live_transcript.clear();
        self.transcript = None;
        self.confidence = None;
        self.accuracy = None;
        self.passed = None;
        self.feedback = None;
        self.elapsed_seconds = 0.0;
        self.error = None;
        self.started_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::CaptureError;
    use std::time::Duration;

    fn final_event(text: &str) -> CaptureEvent {
        CaptureEvent::Final { transcript: text.into(), confidence: 0.82 }
    }

    fn grade(accuracy: f32, is_passed: bool) -> SpeechGrade {
        SpeechGrade {
            accuracy_score: accuracy,
            confidence_score: 0.82,
            is_passed,
            pronunciation_feedback: Some("Work on the rolled r".into()),
            attempt_number: 1,
        }
    }

    fn captured(attempt: &mut SpeechAttempt) -> u64 {
        let t0 = Instant::now();
        let g = attempt.begin_capture(t0).unwrap();
        attempt.apply_capture(g, CaptureEvent::Interim { transcript: "ho".into(), confidence: 0.1 }, t0);
        attempt.apply_capture(g, final_event("hola"), t0);
        attempt.apply_capture(g, CaptureEvent::End, t0 + Duration::from_secs(3));
        g
    }

    #[tokio::test]
    async fn test_only_final_segment_is_submitted() {
        let mut a = SpeechAttempt::default();
        captured(&mut a);
        assert_eq!(a.phase, SpeechPhase::Captured);
        let sub = a.submission().unwrap();
        assert_eq!(sub.recognized_text, "hola");
        assert_eq!(sub.elapsed_seconds, 3);
        assert_eq!(a.phase, SpeechPhase::Grading);
        assert_eq!(a.submission(), Err(ExerciseError::GradingInFlight));
    }

    #[tokio::test]
    async fn test_perfect_accuracy_overrides_failed_verdict() {
        let mut a = SpeechAttempt::default();
        let g = captured(&mut a);
        a.submission().unwrap();
        let v = a.apply_grade(g, &grade(100.0, false)).unwrap();
        assert!(v.passed);
        assert!(v.overridden);
        assert_eq!(v.feedback, SUCCESS_FEEDBACK);
        assert!(a.cleared());
    }

    #[tokio::test]
    async fn test_failed_verdict_keeps_server_feedback() {
        let mut a = SpeechAttempt::default();
        let g = captured(&mut a);
        a.submission().unwrap();
        let v = a.apply_grade(g, &grade(62.5, false)).unwrap();
        assert!(!v.passed);
        assert_eq!(v.feedback, "Work on the rolled r");
        assert_eq!(a.attempts, 1);
        assert!(!a.cleared());
    }

    #[tokio::test]
    async fn test_reset_discards_in_flight_grade() {
        let mut a = SpeechAttempt::default();
        let g = captured(&mut a);
        a.submission().unwrap();
        a.reset();
        a.reset();
        assert_eq!(a.phase, SpeechPhase::Idle);
        assert!(a.apply_grade(g, &grade(90.0, true)).is_none());
        assert!(a.transcript.is_none());
    }

    #[tokio::test]
    async fn test_no_speech_is_recoverable_but_denial_blocks() {
        let mut a = SpeechAttempt::default();
        let g = a.begin_capture(Instant::now()).unwrap();
        a.apply_capture(g, CaptureEvent::Error { error: CaptureError::NoSpeech }, Instant::now());
        assert_eq!(a.phase, SpeechPhase::Idle);
        assert!(a.error.is_some());

        let g = a.begin_capture(Instant::now()).unwrap();
        a.apply_capture(g, CaptureEvent::Error { error: CaptureError::CaptureDenied }, Instant::now());
        assert_eq!(a.phase, SpeechPhase::Blocked(SpeechFault::PermissionDenied));
        assert_eq!(
            a.begin_capture(Instant::now()),
            Err(ExerciseError::Blocked(SpeechFault::PermissionDenied))
        );
        a.reset();
        assert!(matches!(a.phase, SpeechPhase::Blocked(_)));

        assert!(a.unblock());
        assert!(!a.unblock());
        assert_eq!(a.phase, SpeechPhase::Idle);
        assert_eq!(a.error, None);
        assert!(a.begin_capture(Instant::now()).unwrap() > g);
        assert_eq!(a.phase, SpeechPhase::Capturing);
    }

    #[tokio::test]
    async fn test_late_final_after_stop_is_kept_and_stale_events_ignored() {
        let mut a = SpeechAttempt::default();
        let g = a.begin_capture(Instant::now()).unwrap();
        a.end_capture(Instant::now());
        assert_eq!(a.phase, SpeechPhase::Idle);
        assert!(a.apply_capture(g, final_event("buenos días"), Instant::now()));
        assert_eq!(a.phase, SpeechPhase::Captured);
        assert!(!a.apply_capture(g - 1, final_event("stale"), Instant::now()));
        assert_eq!(a.transcript.as_deref(), Some("buenos días"));
    }
}
