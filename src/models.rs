use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull};

// Course as served by the learning endpoint. Only completion flags change in place.
#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub modules: Vec<Module>,
    #[serde(default)]
    pub enrollment: Option<Enrollment>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: String,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub completed_lessons: u32,
    #[serde(default)]
    pub last_accessed_lesson_id: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub id: String,
    pub title: String,
    pub position: u32,
    // minutes; derived from the lessons, see Course::normalize
    #[serde(default)]
    pub duration: u32,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub lessons: Vec<Lesson>,
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub duration: u32,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub exercises: Vec<Exercise>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub file_url: String,
    #[serde(default)]
    pub file_type: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Exercise {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub kind: ExerciseKind,
}

// Exercise payload, discriminated by the backend's `type` field.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExerciseKind {
    Quiz {
        #[serde(default)]
        questions: Vec<Question>,
    },
    #[serde(rename = "FILL_IN_THE_BLANK")]
    FillInBlank {
        #[serde(default)]
        questions: Vec<Question>,
    },
    Listening(SpeechTask),
    Speaking(SpeechTask),
    Recognition(SpeechTask),
    Pronunciation(SpeechTask),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SpeechVariant {
    Listening,
    Speaking,
    Recognition,
    Pronunciation,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SpeechTask {
    pub target_text: String,
    #[serde(default)]
    pub target_audio_url: Option<String>,
    #[serde(default)]
    pub difficulty_level: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_minimum_accuracy")]
    pub minimum_accuracy_score: f32,
}

fn default_language() -> String {
    "en-US".into()
}

fn default_minimum_accuracy() -> f32 {
    70.0
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub hint: Option<String>,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub answer_explanation: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOption {
    pub id: String,
    pub content: String,
    #[serde(default, alias = "isCorrect")]
    pub correct: bool,
}

// Position of a lesson inside the tree.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct LessonRef {
    pub module_id: String,
    pub lesson_id: String,
}

impl Course {
    // Orders modules by position and recomputes module durations.
    pub fn normalize(mut self) -> Self {
        self.modules.sort_by_key(|m| m.position);
        for m in &mut self.modules {
            m.duration = m.lessons.iter().map(|l| l.duration).sum();
        }
        self
    }

    pub fn module(&self, module_id: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.id == module_id)
    }

    pub fn lesson(&self, lesson_id: &str) -> Option<&Lesson> {
        self.lesson_refs()
            .find(|(_, l)| l.id == lesson_id)
            .map(|(_, l)| l)
    }

    pub fn locate(&self, lesson_id: &str) -> Option<LessonRef> {
        self.lesson_refs()
            .find(|(_, l)| l.id == lesson_id)
            .map(|(m, l)| LessonRef {
                module_id: m.id.clone(),
                lesson_id: l.id.clone(),
            })
    }

    // Every lesson in document order, paired with its module.
    pub fn lesson_refs(&self) -> impl Iterator<Item = (&Module, &Lesson)> {
        self.modules
            .iter()
            .flat_map(|m| m.lessons.iter().map(move |l| (m, l)))
    }

    pub fn first_lesson(&self) -> Option<LessonRef> {
        self.lesson_refs().next().map(|(m, l)| LessonRef {
            module_id: m.id.clone(),
            lesson_id: l.id.clone(),
        })
    }

    pub fn total_lessons(&self) -> usize {
        self.lesson_refs().count()
    }

    pub fn completed_count(&self) -> usize {
        self.lesson_refs().filter(|(_, l)| l.completed).count()
    }

    pub fn total_duration(&self) -> u32 {
        self.modules.iter().map(|m| m.duration).sum()
    }

    // Server-reported progress when enrolled, otherwise derived from the flags.
    pub fn progress_percent(&self) -> f64 {
        match &self.enrollment {
            Some(e) => e.progress,
            None => {
                let total = self.total_lessons();
                if total == 0 {
                    0.0
                } else {
                    self.completed_count() as f64 * 100.0 / total as f64
                }
            }
        }
    }

    // Flags a lesson completed. Returns false when the lesson is unknown or
    // already completed, leaving the tree untouched.
    pub(crate) fn mark_completed(&mut self, lesson_id: &str, at: DateTime<Utc>) -> bool {
        let Some(lesson) = self
            .modules
            .iter_mut()
            .flat_map(|m| m.lessons.iter_mut())
            .find(|l| l.id == lesson_id)
        else {
            return false;
        };
        if lesson.completed {
            return false;
        }
        lesson.completed = true;
        lesson.completed_at = Some(at);
        if let Some(e) = self.enrollment.as_mut() {
            e.completed_lessons += 1;
        }
        true
    }

    // Pulls enrollment figures and newly completed flags from a refetched
    // snapshot. Structure is never replaced and flags never go back to false.
    pub(crate) fn reconcile(&mut self, fresh: &Course) {
        if let (Some(mine), Some(theirs)) = (self.enrollment.as_mut(), fresh.enrollment.as_ref()) {
            mine.progress = theirs.progress;
            mine.completed_lessons = theirs.completed_lessons;
            mine.completed_at = theirs.completed_at;
        }
        for lesson in self.modules.iter_mut().flat_map(|m| m.lessons.iter_mut()) {
            if lesson.completed {
                continue;
            }
            if let Some(remote) = fresh.lesson(&lesson.id) {
                if remote.completed {
                    lesson.completed = true;
                    lesson.completed_at = remote.completed_at;
                }
            }
        }
        // a lagging server count never drops below the flags we hold
        let local = self.completed_count() as u32;
        if let Some(mine) = self.enrollment.as_mut() {
            mine.completed_lessons = mine.completed_lessons.max(local);
        }
    }
}

impl Lesson {
    pub fn video(&self) -> Option<VideoSource> {
        self.video_url.as_deref().map(VideoSource::classify)
    }
}

impl ExerciseKind {
    pub fn questions(&self) -> &[Question] {
        match self {
            ExerciseKind::Quiz { questions } | ExerciseKind::FillInBlank { questions } => questions,
            ExerciseKind::Listening(_)
            | ExerciseKind::Speaking(_)
            | ExerciseKind::Recognition(_)
            | ExerciseKind::Pronunciation(_) => &[],
        }
    }

    pub fn speech(&self) -> Option<(SpeechVariant, &SpeechTask)> {
        match self {
            ExerciseKind::Listening(t) => Some((SpeechVariant::Listening, t)),
            ExerciseKind::Speaking(t) => Some((SpeechVariant::Speaking, t)),
            ExerciseKind::Recognition(t) => Some((SpeechVariant::Recognition, t)),
            ExerciseKind::Pronunciation(t) => Some((SpeechVariant::Pronunciation, t)),
            ExerciseKind::Quiz { .. } | ExerciseKind::FillInBlank { .. } => None,
        }
    }
}

// ------------- content surfaces -------------

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum VideoSource {
    Youtube { embed_url: String },
    Vimeo { embed_url: String },
    File { url: String },
    Link { url: String },
}

const MEDIA_EXTENSIONS: &[&str] = &["mp4", "webm", "ogg", "ogv", "mov", "m4v", "m3u8"];

impl VideoSource {
    pub fn classify(url: &str) -> VideoSource {
        let trimmed = url.trim();
        let without_scheme = trimmed
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_start_matches("www.")
            .trim_start_matches("m.");
        let (host, rest) = without_scheme
            .split_once('/')
            .unwrap_or((without_scheme, ""));

        match host {
            "youtube.com" | "youtube-nocookie.com" => {
                if let Some(id) = youtube_id(rest) {
                    return VideoSource::Youtube {
                        embed_url: format!("https://www.youtube.com/embed/{}", id),
                    };
                }
            }
            "youtu.be" => {
                let id = strip_query(rest);
                if !id.is_empty() {
                    return VideoSource::Youtube {
                        embed_url: format!("https://www.youtube.com/embed/{}", id),
                    };
                }
            }
            "vimeo.com" | "player.vimeo.com" => {
                let id = strip_query(rest)
                    .split('/')
                    .filter(|s| !s.is_empty())
                    .last()
                    .unwrap_or_default();
                if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
                    return VideoSource::Vimeo {
                        embed_url: format!("https://player.vimeo.com/video/{}", id),
                    };
                }
            }
            _ => {}
        }

        let path = strip_query(rest);
        let is_media = path
            .rsplit_once('.')
            .map(|(_, ext)| MEDIA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_media {
            VideoSource::File { url: trimmed.to_string() }
        } else {
            VideoSource::Link { url: trimmed.to_string() }
        }
    }
}

fn strip_query(s: &str) -> &str {
    s.split(['?', '#']).next().unwrap_or_default()
}

fn youtube_id(rest: &str) -> Option<String> {
    if let Some(q) = rest.strip_prefix("watch?") {
        return q
            .split('&')
            .find_map(|kv| kv.strip_prefix("v="))
            .filter(|id| !id.is_empty())
            .map(str::to_string);
    }
    for prefix in ["embed/", "shorts/", "live/"] {
        if let Some(id) = rest.strip_prefix(prefix) {
            let id = strip_query(id);
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }
    }
    None
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResourceIcon {
    Pdf,
    Document,
    Spreadsheet,
    Presentation,
    Archive,
    Audio,
    Video,
    Image,
    Other,
}

impl Resource {
    pub fn icon(&self) -> ResourceIcon {
        let tag = self.file_type.to_ascii_lowercase();
        let tag = tag.rsplit(['/', '.']).next().unwrap_or_default();
        match tag {
            "pdf" => ResourceIcon::Pdf,
            "doc" | "docx" | "txt" | "rtf" | "odt" | "msword" | "md" => ResourceIcon::Document,
            "xls" | "xlsx" | "csv" | "ods" => ResourceIcon::Spreadsheet,
            "ppt" | "pptx" | "odp" | "key" => ResourceIcon::Presentation,
            "zip" | "rar" | "7z" | "tar" | "gz" => ResourceIcon::Archive,
            "mp3" | "wav" | "m4a" | "aac" | "flac" | "audio" => ResourceIcon::Audio,
            "mp4" | "webm" | "mov" | "mkv" | "video" => ResourceIcon::Video,
            "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" | "image" => ResourceIcon::Image,
            _ => ResourceIcon::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Course {
        serde_json::from_value(json!({
            "id": "c1",
            "title": "Spanish A1",
            "modules": [
                { "id": "m2", "title": "Two", "position": 2, "lessons": [
                    { "id": "l3", "title": "L3", "duration": 7 }
                ]},
                { "id": "m1", "title": "One", "position": 1, "lessons": [
                    { "id": "l1", "title": "L1", "duration": 5, "completed": true },
                    { "id": "l2", "title": "L2", "duration": 4, "exercises": null }
                ]}
            ],
            "enrollment": { "id": "e1", "progress": 33.3, "completedLessons": 1 }
        }))
        .unwrap()
    }

    #[test]
    fn test_normalize_orders_modules_and_sums_durations() {
        let course = sample().normalize();
        assert_eq!(course.modules[0].id, "m1");
        assert_eq!(course.modules[0].duration, 9);
        assert_eq!(course.total_duration(), 16);
        let order: Vec<_> = course.lesson_refs().map(|(_, l)| l.id.as_str()).collect();
        assert_eq!(order, ["l1", "l2", "l3"]);
    }

    #[test]
    fn test_exercise_kinds_decode_from_type_tag() {
        let ex: Exercise = serde_json::from_value(json!({
            "id": "e1",
            "title": "Say it",
            "type": "PRONUNCIATION",
            "targetText": "hola",
            "minimumAccuracyScore": 80
        }))
        .unwrap();
        let (variant, task) = ex.kind.speech().unwrap();
        assert_eq!(variant, SpeechVariant::Pronunciation);
        assert_eq!(task.target_text, "hola");
        assert_eq!(task.language, "en-US");

        let ex: Exercise = serde_json::from_value(json!({
            "id": "e2",
            "title": "Blanks",
            "type": "FILL_IN_THE_BLANK",
            "questions": [{ "id": "q1", "content": "Yo ___ Ana" }]
        }))
        .unwrap();
        assert!(matches!(ex.kind, ExerciseKind::FillInBlank { .. }));
        assert_eq!(ex.kind.questions().len(), 1);
    }

    #[test]
    fn test_mark_completed_is_flag_only_and_once() {
        let mut course = sample().normalize();
        assert!(!course.mark_completed("l1", Utc::now()));
        assert!(course.mark_completed("l2", Utc::now()));
        assert!(!course.mark_completed("l2", Utc::now()));
        assert!(!course.mark_completed("nope", Utc::now()));
        assert_eq!(course.enrollment.as_ref().unwrap().completed_lessons, 2);
        assert!(course.lesson("l2").unwrap().completed_at.is_some());
    }

    #[test]
    fn test_reconcile_never_unsets_completion() {
        let mut course = sample().normalize();
        let mut fresh = course.clone();
        fresh.modules[0].lessons[0].completed = false;
        fresh.modules[1].lessons[0].completed = true;
        fresh.enrollment.as_mut().unwrap().progress = 66.6;

        course.reconcile(&fresh);
        assert!(course.lesson("l1").unwrap().completed);
        assert!(course.lesson("l3").unwrap().completed);
        assert_eq!(course.progress_percent(), 66.6);
        assert_eq!(course.enrollment.as_ref().unwrap().completed_lessons, 2);
    }

    #[test]
    fn test_video_source_classification() {
        assert_eq!(
            VideoSource::classify("https://www.youtube.com/watch?v=abc123&t=4"),
            VideoSource::Youtube { embed_url: "https://www.youtube.com/embed/abc123".into() }
        );
        assert_eq!(
            VideoSource::classify("https://youtu.be/xyz?si=1"),
            VideoSource::Youtube { embed_url: "https://www.youtube.com/embed/xyz".into() }
        );
        assert_eq!(
            VideoSource::classify("https://vimeo.com/76979871"),
            VideoSource::Vimeo { embed_url: "https://player.vimeo.com/video/76979871".into() }
        );
        assert!(matches!(
            VideoSource::classify("https://cdn.example.com/v/intro.MP4?sig=1"),
            VideoSource::File { .. }
        ));
        assert!(matches!(
            VideoSource::classify("https://example.com/watch/me"),
            VideoSource::Link { .. }
        ));
    }

    #[test]
    fn test_resource_icon_from_file_type() {
        let mut r = Resource {
            id: "r".into(),
            title: "Notes".into(),
            description: None,
            file_url: "https://x/notes.pdf".into(),
            file_type: "application/pdf".into(),
        };
        assert_eq!(r.icon(), ResourceIcon::Pdf);
        r.file_type = "XLSX".into();
        assert_eq!(r.icon(), ResourceIcon::Spreadsheet);
        r.file_type = "".into();
        assert_eq!(r.icon(), ResourceIcon::Other);
    }
}
