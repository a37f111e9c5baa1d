// Only writer of completion flags in the tree; one request in flight per lesson.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::CompletionAck;
use crate::models::Course;

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum CompletionState {
    NotStarted,
    Pending,
    Completed,
    // Last request failed; the next trigger retries.
    Failed { attempts: u32, error: String },
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Trigger {
    Explicit,
    Dwell,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DwellFired {
    pub lesson_id: String,
    pub arm_id: u64,
}

struct ArmedDwell {
    lesson_id: String,
    arm_id: u64,
    token: CancellationToken,
}

pub struct CompletionTracker {
    states: HashMap<String, CompletionState>,
    dwell_after: Duration,
    dwell: Option<ArmedDwell>,
    arms: u64,
}

impl CompletionTracker {
    pub fn new(dwell_after: Duration) -> Self {
        Self {
            states: HashMap::new(),
            dwell_after,
            dwell: None,
            arms: 0,
        }
    }

    // Lessons the server already reports as completed never get a request.
    pub fn seed(&mut self, course: &Course) {
        for (_, lesson) in course.lesson_refs() {
            if lesson.completed {
                self.states.insert(lesson.id.clone(), CompletionState::Completed);
            }
        }
    }

    pub fn state(&self, lesson_id: &str) -> CompletionState {
        self.states
            .get(lesson_id)
            .cloned()
            .unwrap_or(CompletionState::NotStarted)
    }

    // Completion could not be synced yet.
    pub fn is_unsynced(&self, lesson_id: &str) -> bool {
        matches!(self.states.get(lesson_id), Some(CompletionState::Failed { .. }))
    }

    // Moves the lesson to pending. Returns true when the caller must send the
    // request; false for completed, pending or unknown lessons.
    pub fn begin(&mut self, course: &Course, lesson_id: &str, trigger: Trigger) -> bool {
        let Some(lesson) = course.lesson(lesson_id) else {
            return false;
        };
        if lesson.completed {
            self.states.insert(lesson_id.to_string(), CompletionState::Completed);
            return false;
        }
        match self.state(lesson_id) {
            CompletionState::Pending | CompletionState::Completed => {
                debug!(lesson_id, ?trigger, "completion already handled");
                false
            }
            CompletionState::NotStarted | CompletionState::Failed { .. } => {
                info!(lesson_id, ?trigger, "requesting lesson completion");
                self.states.insert(lesson_id.to_string(), CompletionState::Pending);
                true
            }
        }
    }

    // Applies a server acknowledgement to the tree.
    pub fn resolve_success(&mut self, course: &mut Course, lesson_id: &str, ack: &CompletionAck) -> bool {
        if self.state(lesson_id) != CompletionState::Pending {
            debug!(lesson_id, "completion ack without pending request");
        }
        self.states.insert(lesson_id.to_string(), CompletionState::Completed);
        let applied = course.mark_completed(lesson_id, ack.completed_at.unwrap_or_else(Utc::now));
        if let Some(e) = course.enrollment.as_mut() {
            if let Some(p) = ack.progress {
                e.progress = p;
            }
            if let Some(n) = ack.completed_lessons {
                e.completed_lessons = n;
            }
        }
        info!(lesson_id, applied, progress = course.progress_percent(), "lesson completed");
        applied
    }

    pub fn resolve_failure(&mut self, lesson_id: &str, error: String) {
        let attempts = match self.states.get(lesson_id) {
            Some(CompletionState::Failed { attempts, .. }) => attempts + 1,
            _ => 1,
        };
        warn!(lesson_id, attempts, error = %error, "lesson completion not synced");
        self.states
            .insert(lesson_id.to_string(), CompletionState::Failed { attempts, error });
    }

    // Folds a refetched snapshot into the tree.
    pub fn reconcile(&mut self, course: &mut Course, fresh: &Course) {
        course.reconcile(fresh);
        self.seed(course);
    }

    // ------------- dwell timer -------------

    // replaces any running timer; `on_fire` runs on the timer task
    pub fn arm_dwell<F>(&mut self, lesson_id: &str, on_fire: F)
    where
        F: FnOnce(DwellFired) + Send + 'static,
    {
        self.cancel_dwell();
        self.arms += 1;
        let token = CancellationToken::new();
        let fired = DwellFired {
            lesson_id: lesson_id.to_string(),
            arm_id: self.arms,
        };
        let child = token.clone();
        let after = self.dwell_after;
        tokio::spawn(async move {
            tokio::select! {
                _ = child.cancelled() => {}
                _ = tokio::time::sleep(after) => on_fire(fired),
            }
        });
        debug!(lesson_id, arm_id = self.arms, secs = after.as_secs_f64(), "dwell timer armed");
        self.dwell = Some(ArmedDwell {
            lesson_id: lesson_id.to_string(),
            arm_id: self.arms,
            token,
        });
    }

    pub fn cancel_dwell(&mut self) {
        if let Some(d) = self.dwell.take() {
            d.token.cancel();
            debug!(lesson_id = %d.lesson_id, arm_id = d.arm_id, "dwell timer canceled");
        }
    }

    pub fn dwell_lesson(&self) -> Option<&str> {
        self.dwell.as_ref().map(|d| d.lesson_id.as_str())
    }

    // Consumes a fired timer. False when it was canceled or replaced meanwhile.
    pub fn take_dwell(&mut self, fired: &DwellFired) -> bool {
        match &self.dwell {
            Some(d) if d.arm_id == fired.arm_id && d.lesson_id == fired.lesson_id => {
                self.dwell = None;
                true
            }
            _ => false,
        }
    }
}

impl Drop for CompletionTracker {
    fn drop(&mut self) {
        self.cancel_dwell();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn course() -> Course {
        serde_json::from_value::<Course>(json!({
            "id": "c1",
            "title": "Course",
            "modules": [{ "id": "m1", "title": "M", "position": 1, "lessons": [
                { "id": "l1", "title": "one" },
                { "id": "l2", "title": "two", "completed": true }
            ]}],
            "enrollment": { "id": "e", "progress": 50.0, "completedLessons": 1 }
        }))
        .unwrap()
    }

    #[test]
    fn test_single_request_per_lesson() {
        let mut c = course();
        let mut t = CompletionTracker::new(Duration::from_secs(10));
        t.seed(&c);

        assert!(t.begin(&c, "l1", Trigger::Explicit));
        assert!(!t.begin(&c, "l1", Trigger::Dwell));
        assert_eq!(t.state("l1"), CompletionState::Pending);

        let ack = CompletionAck { progress: Some(100.0), ..Default::default() };
        assert!(t.resolve_success(&mut c, "l1", &ack));
        assert!(!t.begin(&c, "l1", Trigger::Explicit));
        assert_eq!(c.enrollment.as_ref().unwrap().completed_lessons, 2);
        assert_eq!(c.progress_percent(), 100.0);
    }

    #[test]
    fn test_already_completed_is_noop() {
        let c = course();
        let mut t = CompletionTracker::new(Duration::from_secs(10));
        t.seed(&c);
        assert!(!t.begin(&c, "l2", Trigger::Explicit));
        assert!(!t.begin(&c, "missing", Trigger::Explicit));
        assert_eq!(t.state("l2"), CompletionState::Completed);
    }

    #[test]
    fn test_failure_allows_retry_and_keeps_flag() {
        let c = course();
        let mut t = CompletionTracker::new(Duration::from_secs(10));
        assert!(t.begin(&c, "l1", Trigger::Explicit));
        t.resolve_failure("l1", "503".into());
        assert!(t.is_unsynced("l1"));
        assert!(!c.lesson("l1").unwrap().completed);

        assert!(t.begin(&c, "l1", Trigger::Dwell));
        t.resolve_failure("l1", "503".into());
        assert_eq!(
            t.state("l1"),
            CompletionState::Failed { attempts: 2, error: "503".into() }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dwell_fires_after_delay() {
        let mut t = CompletionTracker::new(Duration::from_secs(10));
        let (tx, mut rx) = mpsc::unbounded_channel();
        t.arm_dwell("l1", move |f| {
            let _ = tx.send(f);
        });

        let fired = tokio::time::timeout(Duration::from_secs(11), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fired.lesson_id, "l1");
        assert!(t.take_dwell(&fired));
        assert!(!t.take_dwell(&fired));
    }

    #[tokio::test(start_paused = true)]
    async fn test_canceled_dwell_never_fires() {
        let mut t = CompletionTracker::new(Duration::from_secs(10));
        let (tx, mut rx) = mpsc::unbounded_channel::<DwellFired>();
        let keep = tx.clone();
        t.arm_dwell("l1", move |f| {
            let _ = tx.send(f);
        });
        tokio::time::advance(Duration::from_secs(4)).await;
        t.cancel_dwell();

        let waited = tokio::time::timeout(Duration::from_secs(30), rx.recv()).await;
        assert!(waited.is_err());
        drop(keep);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearming_supersedes_previous_timer() {
        let mut t = CompletionTracker::new(Duration::from_secs(10));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tx2 = tx.clone();
        t.arm_dwell("l1", move |f| {
            let _ = tx.send(f);
        });
        t.arm_dwell("l2", move |f| {
            let _ = tx2.send(f);
        });
        assert_eq!(t.dwell_lesson(), Some("l2"));

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.lesson_id, "l2");
        assert!(t.take_dwell(&fired));
    }
}
