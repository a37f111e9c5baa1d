use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::exercise::ExerciseError;
use crate::media::CaptureEvent;
use crate::navigation::{NavError, Tab};
use crate::session::SessionError;
use crate::shell::{Action, AppState, Capabilities, Snapshot};

type Reply = Result<Json<Snapshot>, (StatusCode, String)>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions", post(open_session))
        .route("/api/sessions/:id", get(view_session).delete(close_session))
        // navigation
        .route("/api/sessions/:id/lessons/select", post(select_lesson))
        .route("/api/sessions/:id/lessons/next", post(next_lesson))
        .route("/api/sessions/:id/lessons/previous", post(previous_lesson))
        .route("/api/sessions/:id/modules/:module_id/toggle", post(toggle_module))
        .route("/api/sessions/:id/tab", post(set_tab))
        // exercises
        .route("/api/sessions/:id/exercises/next", post(next_exercise))
        .route("/api/sessions/:id/quiz/answer", post(answer_question))
        .route("/api/sessions/:id/quiz/next", post(next_question))
        .route("/api/sessions/:id/quiz/previous", post(previous_question))
        .route("/api/sessions/:id/fill-blank/answer", post(set_blank_answer))
        .route("/api/sessions/:id/fill-blank/submit", post(submit_fill_blank))
        // speech
        .route("/api/sessions/:id/speech/start", post(start_capture))
        .route("/api/sessions/:id/speech/stop", post(stop_capture))
        .route("/api/sessions/:id/speech/reset", post(reset_speech))
        .route("/api/sessions/:id/speech/submit", post(submit_speech))
        .route("/api/sessions/:id/speech/play-target", post(play_target))
        .route("/api/sessions/:id/speech/events", post(relay_capture))
        .with_state(state)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenReq {
    course_id: String,
    #[serde(default)]
    capabilities: Capabilities,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OpenResp {
    session_id: Uuid,
    #[serde(flatten)]
    snapshot: Snapshot,
}

async fn open_session(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    Json(req): Json<OpenReq>,
) -> Result<(StatusCode, Json<OpenResp>), (StatusCode, String)> {
    if req.course_id.trim().is_empty() {
        return Err(e400("courseId is required"));
    }
    let token = bearer.map(|TypedHeader(auth)| auth.token().to_string());
    let (session_id, snapshot) = state
        .open(&req.course_id, req.capabilities, token)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(OpenResp { session_id, snapshot })))
}

async fn view_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> Reply {
    dispatch(&state, id, Action::View).await
}

async fn close_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> StatusCode {
    if state.close(&id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectReq {
    lesson_id: String,
    module_id: String,
}

async fn select_lesson(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SelectReq>,
) -> Reply {
    let action = Action::SelectLesson { lesson_id: req.lesson_id, module_id: req.module_id };
    dispatch(&state, id, action).await
}

async fn next_lesson(State(state): State<AppState>, Path(id): Path<Uuid>) -> Reply {
    dispatch(&state, id, Action::NextLesson).await
}

async fn previous_lesson(State(state): State<AppState>, Path(id): Path<Uuid>) -> Reply {
    dispatch(&state, id, Action::PreviousLesson).await
}

async fn toggle_module(
    State(state): State<AppState>,
    Path((id, module_id)): Path<(Uuid, String)>,
) -> Reply {
    dispatch(&state, id, Action::ToggleModule(module_id)).await
}

#[derive(Deserialize)]
struct TabReq {
    tab: Tab,
}

async fn set_tab(State(state): State<AppState>, Path(id): Path<Uuid>, Json(req): Json<TabReq>) -> Reply {
    dispatch(&state, id, Action::SetTab(req.tab)).await
}

async fn next_exercise(State(state): State<AppState>, Path(id): Path<Uuid>) -> Reply {
    dispatch(&state, id, Action::NextExercise).await
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnswerReq {
    question_id: String,
    option_id: String,
}

async fn answer_question(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AnswerReq>,
) -> Reply {
    let action = Action::AnswerQuestion { question_id: req.question_id, option_id: req.option_id };
    dispatch(&state, id, action).await
}

async fn next_question(State(state): State<AppState>, Path(id): Path<Uuid>) -> Reply {
    dispatch(&state, id, Action::NextQuestion).await
}

async fn previous_question(State(state): State<AppState>, Path(id): Path<Uuid>) -> Reply {
    dispatch(&state, id, Action::PreviousQuestion).await
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlankReq {
    question_id: String,
    answer: String,
}

async fn set_blank_answer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<BlankReq>,
) -> Reply {
    let action = Action::SetBlankAnswer { question_id: req.question_id, answer: req.answer };
    dispatch(&state, id, action).await
}

async fn submit_fill_blank(State(state): State<AppState>, Path(id): Path<Uuid>) -> Reply {
    dispatch(&state, id, Action::SubmitFillBlank).await
}

async fn start_capture(State(state): State<AppState>, Path(id): Path<Uuid>) -> Reply {
    dispatch(&state, id, Action::StartCapture).await
}

async fn stop_capture(State(state): State<AppState>, Path(id): Path<Uuid>) -> Reply {
    dispatch(&state, id, Action::StopCapture).await
}

async fn reset_speech(State(state): State<AppState>, Path(id): Path<Uuid>) -> Reply {
    dispatch(&state, id, Action::ResetSpeech).await
}

async fn submit_speech(State(state): State<AppState>, Path(id): Path<Uuid>) -> Reply {
    dispatch(&state, id, Action::SubmitSpeech).await
}

async fn play_target(State(state): State<AppState>, Path(id): Path<Uuid>) -> Reply {
    dispatch(&state, id, Action::PlayTarget).await
}

async fn relay_capture(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(event): Json<CaptureEvent>,
) -> Reply {
    dispatch(&state, id, Action::Capture(event)).await
}

async fn dispatch(state: &AppState, id: Uuid, action: Action) -> Reply {
    let handle = state.get(&id).await.ok_or_else(|| e404(id))?;
    match handle.send(action).await {
        Some(result) => result.map(Json).map_err(reject),
        None => Err(e404(id)),
    }
}

fn reject(e: SessionError) -> (StatusCode, String) {
    let status = match &e {
        SessionError::Fetch(_) => StatusCode::BAD_GATEWAY,
        SessionError::Navigation(NavError::UnknownLesson(_)) => StatusCode::NOT_FOUND,
        SessionError::Navigation(_) | SessionError::NoExercises => StatusCode::CONFLICT,
        SessionError::Exercise(ExerciseError::UnknownQuestion(_) | ExerciseError::UnknownOption(_)) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        SessionError::Exercise(_) => StatusCode::CONFLICT,
        SessionError::Speech(_) | SessionError::Capture(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SessionError::Playback(_) => return e500(e),
    };
    tracing::debug!(error = %e, %status, "request rejected");
    (status, e.to_string())
}

fn e400<T: Into<String>>(msg: T) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, msg.into())
}

fn e404(id: Uuid) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, format!("session {} not found", id))
}

fn e500<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    tracing::error!(error=%e, "internal error");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
