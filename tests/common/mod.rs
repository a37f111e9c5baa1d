#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use learnpath_runtime::api::{
    ApiError, BlankAnswer, CompletionAck, FillBlankResult, LearningApi, SpeechGrade, SpeechSubmission,
};
use learnpath_runtime::models::Course;
use learnpath_runtime::session::{LearningSession, SessionEvents, SessionSettings};
use learnpath_runtime::shell::{Capabilities, Microphone, RelayMedia};

// In-memory backend. Completion is tracked server side and reflected in
// later fetches, the way the real service behaves.
pub struct FakeApi {
    course: Value,
    done: Mutex<HashSet<String>>,
    pub fetches: AtomicUsize,
    pub completions: Mutex<Vec<String>>,
    pub speech_submissions: Mutex<Vec<SpeechSubmission>>,
    pub fail_fetch: AtomicBool,
    pub fail_completion: AtomicBool,
    // (fetch number, delay after the snapshot is taken)
    slow_fetch: Mutex<Option<(usize, Duration)>>,
    speech_grades: Mutex<VecDeque<SpeechGrade>>,
    blank_results: Mutex<VecDeque<FillBlankResult>>,
}

impl FakeApi {
    pub fn new(course: Value) -> Arc<Self> {
        let done = lesson_ids(&course)
            .into_iter()
            .filter(|(_, completed)| *completed)
            .map(|(id, _)| id)
            .collect();
        Arc::new(Self {
            course,
            done: Mutex::new(done),
            fetches: AtomicUsize::new(0),
            completions: Mutex::new(Vec::new()),
            speech_submissions: Mutex::new(Vec::new()),
            fail_fetch: AtomicBool::new(false),
            fail_completion: AtomicBool::new(false),
            slow_fetch: Mutex::new(None),
            speech_grades: Mutex::new(VecDeque::new()),
            blank_results: Mutex::new(VecDeque::new()),
        })
    }

    // Holds back the `nth` fetch (1-based) for `delay` after reading state.
    pub fn delay_fetch(&self, nth: usize, delay: Duration) {
        *self.slow_fetch.lock().unwrap() = Some((nth, delay));
    }

    pub fn queue_speech_grade(&self, grade: SpeechGrade) {
        self.speech_grades.lock().unwrap().push_back(grade);
    }

    pub fn queue_blank_result(&self, result: FillBlankResult) {
        self.blank_results.lock().unwrap().push_back(result);
    }

    pub fn completions(&self) -> Vec<String> {
        self.completions.lock().unwrap().clone()
    }

    fn progress(&self) -> (f64, u32) {
        let total = lesson_ids(&self.course).len();
        let done = self.done.lock().unwrap().len();
        let progress = if total == 0 { 0.0 } else { done as f64 * 100.0 / total as f64 };
        (progress, done as u32)
    }
}

fn lesson_ids(course: &Value) -> Vec<(String, bool)> {
    course["modules"]
        .as_array()
        .into_iter()
        .flatten()
        .flat_map(|m| m["lessons"].as_array().into_iter().flatten())
        .map(|l| {
            let id = l["id"].as_str().unwrap_or_default().to_string();
            (id, l["completed"].as_bool().unwrap_or(false))
        })
        .collect()
}

#[async_trait]
impl LearningApi for FakeApi {
    async fn fetch_course_for_learning(&self, course_id: &str) -> Result<Course, ApiError> {
        let nth = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(ApiError::Status { status: 503, body: "unavailable".into() });
        }
        assert!(self.course["id"] == course_id);

        let done = self.done.lock().unwrap().clone();
        let (progress, completed) = self.progress();
        let mut snapshot = self.course.clone();
        if let Some(modules) = snapshot["modules"].as_array_mut() {
            for lesson in modules.iter_mut().flat_map(|m| m["lessons"].as_array_mut().into_iter().flatten()) {
                let id = lesson["id"].as_str().unwrap_or_default().to_string();
                lesson["completed"] = json!(done.contains(&id));
            }
        }
        if snapshot["enrollment"].is_object() {
            snapshot["enrollment"]["progress"] = json!(progress);
            snapshot["enrollment"]["completedLessons"] = json!(completed);
        }
        let delay = match *self.slow_fetch.lock().unwrap() {
            Some((n, delay)) if n == nth => Some(delay),
            _ => None,
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        serde_json::from_value(snapshot).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn mark_lesson_completed(&self, lesson_id: &str, _course_id: &str) -> Result<CompletionAck, ApiError> {
        self.completions.lock().unwrap().push(lesson_id.to_string());
        if self.fail_completion.load(Ordering::SeqCst) {
            return Err(ApiError::Status { status: 503, body: "try later".into() });
        }
        self.done.lock().unwrap().insert(lesson_id.to_string());
        let (progress, completed) = self.progress();
        Ok(CompletionAck {
            progress: Some(progress),
            completed_lessons: Some(completed),
            completed_at: None,
        })
    }

    async fn submit_speech_result(
        &self,
        _exercise_id: &str,
        submission: &SpeechSubmission,
    ) -> Result<SpeechGrade, ApiError> {
        self.speech_submissions.lock().unwrap().push(submission.clone());
        self.speech_grades
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(ApiError::Status { status: 500, body: "grader down".into() })
    }

    async fn submit_fill_in_blank_answers(
        &self,
        _exercise_id: &str,
        _answers: &[BlankAnswer],
    ) -> Result<FillBlankResult, ApiError> {
        self.blank_results
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(ApiError::Status { status: 500, body: "grader down".into() })
    }
}

pub fn full_media() -> Arc<RelayMedia> {
    RelayMedia::new(Capabilities {
        recognition: true,
        synthesis: true,
        microphone: Microphone::Granted,
    })
}

pub async fn open(api: &Arc<FakeApi>, media: &Arc<RelayMedia>) -> (LearningSession, SessionEvents) {
    let course_id = api.course["id"].as_str().unwrap().to_string();
    LearningSession::open(&course_id, api.clone(), media.kit(), SessionSettings::default())
        .await
        .unwrap()
}

// Applies events until nothing arrives for a short while.
pub async fn settle(session: &mut LearningSession, events: &mut SessionEvents) {
    while let Ok(Some(ev)) = tokio::time::timeout(Duration::from_millis(50), events.recv()).await {
        session.apply(ev);
    }
}

pub fn lesson(id: &str) -> Value {
    json!({ "id": id, "title": format!("Lesson {}", id), "videoUrl": "https://youtu.be/abc123" })
}

pub fn course(modules: Value) -> Value {
    json!({
        "id": "course-1",
        "title": "Spanish for travellers",
        "modules": modules,
        "enrollment": { "id": "enr-1", "progress": 0.0, "completedLessons": 0 }
    })
}
