use async_trait::async_trait;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::models::Course;

// Remote learning endpoints the session depends on.
#[async_trait]
pub trait LearningApi: Send + Sync {
    async fn fetch_course_for_learning(&self, course_id: &str) -> Result<Course, ApiError>;

    // Expected to be idempotent server side.
    async fn mark_lesson_completed(
        &self,
        lesson_id: &str,
        course_id: &str,
    ) -> Result<CompletionAck, ApiError>;

    async fn submit_speech_result(
        &self,
        exercise_id: &str,
        submission: &SpeechSubmission,
    ) -> Result<SpeechGrade, ApiError>;

    async fn submit_fill_in_blank_answers(
        &self,
        exercise_id: &str,
        answers: &[BlankAnswer],
    ) -> Result<FillBlankResult, ApiError>;
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected response body: {0}")]
    Decode(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionAck {
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub completed_lessons: Option<u32>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpeechSubmission {
    pub recognized_text: String,
    pub confidence_score: f32,
    pub elapsed_seconds: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpeechGrade {
    pub accuracy_score: f32,
    #[serde(default)]
    pub confidence_score: f32,
    pub is_passed: bool,
    #[serde(default)]
    pub pronunciation_feedback: Option<String>,
    #[serde(default)]
    pub attempt_number: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlankAnswer {
    pub question_id: String,
    pub answer: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FillBlankResult {
    pub passed: bool,
    pub correct_answers: u32,
    pub total_questions: u32,
}

// ------------- HTTP implementation -------------

const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

// Some deployments wrap every payload in `{ "data": ... }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Body<T> {
    Wrapped { data: T },
    Bare(T),
}

#[derive(Clone)]
pub struct HttpLearningApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpLearningApi {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    // Same connection pool, different learner credentials.
    pub fn with_token(&self, token: Option<String>) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: token.or_else(|| self.token.clone()),
        }
    }

    fn url(&self, segments: &[&str]) -> String {
        let mut url = self.base_url.clone();
        for s in segments {
            url.push('/');
            url.extend(utf8_percent_encode(s, SEGMENT));
        }
        url
    }

    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T, ApiError> {
        let req = match &self.token {
            Some(t) => req.bearer_auth(t),
            None => req,
        };
        let res = req.send().await?;
        let status = res.status();
        let bytes = res.bytes().await?;
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        // 204 and friends
        let payload: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
            b"{}"
        } else {
            &bytes[..]
        };
        match serde_json::from_slice::<Body<T>>(payload) {
            Ok(Body::Wrapped { data }) | Ok(Body::Bare(data)) => Ok(data),
            Err(e) => {
                debug!(error = %e, len = bytes.len(), "could not decode response");
                Err(ApiError::Decode(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl LearningApi for HttpLearningApi {
    async fn fetch_course_for_learning(&self, course_id: &str) -> Result<Course, ApiError> {
        let url = self.url(&["courses", course_id, "learning"]);
        self.send(self.client.get(url)).await
    }

    async fn mark_lesson_completed(
        &self,
        lesson_id: &str,
        course_id: &str,
    ) -> Result<CompletionAck, ApiError> {
        let url = self.url(&["lessons", lesson_id, "complete"]);
        let body = serde_json::json!({ "courseId": course_id });
        self.send(self.client.post(url).json(&body)).await
    }

    async fn submit_speech_result(
        &self,
        exercise_id: &str,
        submission: &SpeechSubmission,
    ) -> Result<SpeechGrade, ApiError> {
        let url = self.url(&["exercises", exercise_id, "speech-result"]);
        self.send(self.client.post(url).json(submission)).await
    }

    async fn submit_fill_in_blank_answers(
        &self,
        exercise_id: &str,
        answers: &[BlankAnswer],
    ) -> Result<FillBlankResult, ApiError> {
        let url = self.url(&["exercises", exercise_id, "fill-in-blank"]);
        let body = serde_json::json!({ "answers": answers });
        self.send(self.client.post(url).json(&body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Path,
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/api", addr)
    }

    fn client(base: &str) -> HttpLearningApi {
        HttpLearningApi::new(base, Some("tok".into()), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_course_unwraps_data_envelope_and_sends_token() {
        let app = Router::new().route(
            "/api/courses/:id/learning",
            get(|Path(id): Path<String>, headers: HeaderMap| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                Json(json!({ "data": { "id": id, "title": auth, "modules": null } }))
            }),
        );
        let api = client(&serve(app).await);
        let course = api.fetch_course_for_learning("c 1").await.unwrap();
        assert_eq!(course.id, "c 1");
        assert_eq!(course.title, "Bearer tok");
        assert!(course.modules.is_empty());
    }

    #[tokio::test]
    async fn test_mark_completed_posts_course_id() {
        let app = Router::new().route(
            "/api/lessons/:id/complete",
            post(|Path(id): Path<String>, Json(body): Json<Value>| async move {
                assert_eq!(id, "l1");
                assert_eq!(body["courseId"], "c1");
                Json(json!({ "progress": 50.0, "completedLessons": 1 }))
            }),
        );
        let api = client(&serve(app).await);
        let ack = api.mark_lesson_completed("l1", "c1").await.unwrap();
        assert_eq!(ack.progress, Some(50.0));
        assert_eq!(ack.completed_lessons, Some(1));
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let app = Router::new().route(
            "/api/exercises/:id/speech-result",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "grader down") }),
        );
        let api = client(&serve(app).await);
        let sub = SpeechSubmission {
            recognized_text: "hola".into(),
            confidence_score: 0.8,
            elapsed_seconds: 3,
        };
        match api.submit_speech_result("e1", &sub).await {
            Err(ApiError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "grader down");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fill_in_blank_round_trip() {
        let app = Router::new().route(
            "/api/exercises/:id/fill-in-blank",
            post(|Json(body): Json<Value>| async move {
                let n = body["answers"].as_array().map(|a| a.len()).unwrap_or(0) as u32;
                Json(json!({ "passed": true, "correctAnswers": n, "totalQuestions": n }))
            }),
        );
        let api = client(&serve(app).await);
        let answers = vec![
            BlankAnswer { question_id: "q1".into(), answer: "soy".into() },
            BlankAnswer { question_id: "q2".into(), answer: "eres".into() },
        ];
        let res = api.submit_fill_in_blank_answers("e2", &answers).await.unwrap();
        assert_eq!(res, FillBlankResult { passed: true, correct_answers: 2, total_questions: 2 });
    }
}
