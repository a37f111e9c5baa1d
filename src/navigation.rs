use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::models::{Course, Lesson, LessonRef};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tab {
    #[default]
    Video,
    Resources,
    Exercises,
    Discussion,
}

impl Tab {
    pub const ALL: [Tab; 4] = [Tab::Video, Tab::Resources, Tab::Exercises, Tab::Discussion];

    pub fn enabled_for(self, lesson: &Lesson) -> bool {
        match self {
            Tab::Video | Tab::Discussion => true,
            Tab::Resources => !lesson.resources.is_empty(),
            Tab::Exercises => !lesson.exercises.is_empty(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NavError {
    #[error("lesson {0} not found")]
    UnknownLesson(String),
    #[error("lesson {lesson_id} is not part of module {module_id}")]
    ModuleMismatch { lesson_id: String, module_id: String },
    #[error("the {0:?} tab has nothing to show for this lesson")]
    TabDisabled(Tab),
    #[error("no lesson is active")]
    NoActiveLesson,
}

// Selection state: expanded modules, active lesson, active tab.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Navigator {
    expanded: BTreeSet<String>,
    active: Option<LessonRef>,
    tab: Tab,
}

impl Navigator {
    // Resumes at the last accessed lesson when it still exists, otherwise
    // the first lesson. Every module starts expanded.
    pub fn start(course: &Course) -> Self {
        let resumed = course
            .enrollment
            .as_ref()
            .and_then(|e| e.last_accessed_lesson_id.as_deref())
            .and_then(|id| course.locate(id));
        Self {
            expanded: course.modules.iter().map(|m| m.id.clone()).collect(),
            active: resumed.or_else(|| course.first_lesson()),
            tab: Tab::Video,
        }
    }

    pub fn active(&self) -> Option<&LessonRef> {
        self.active.as_ref()
    }

    pub fn tab(&self) -> Tab {
        self.tab
    }

    pub fn is_expanded(&self, module_id: &str) -> bool {
        self.expanded.contains(module_id)
    }

    pub fn expanded(&self) -> impl Iterator<Item = &str> {
        self.expanded.iter().map(String::as_str)
    }

    // Makes the lesson active on the video tab. The owning module is expanded.
    pub fn select_lesson(
        &mut self,
        course: &Course,
        lesson_id: &str,
        module_id: &str,
    ) -> Result<LessonRef, NavError> {
        let found = course
            .locate(lesson_id)
            .ok_or_else(|| NavError::UnknownLesson(lesson_id.to_string()))?;
        if found.module_id != module_id {
            return Err(NavError::ModuleMismatch {
                lesson_id: lesson_id.to_string(),
                module_id: module_id.to_string(),
            });
        }
        self.expanded.insert(found.module_id.clone());
        self.active = Some(found.clone());
        self.tab = Tab::Video;
        Ok(found)
    }

    // Returns the new expanded state.
    pub fn toggle_module(&mut self, module_id: &str) -> bool {
        if self.expanded.remove(module_id) {
            false
        } else {
            self.expanded.insert(module_id.to_string());
            true
        }
    }

    pub fn set_tab(&mut self, course: &Course, tab: Tab) -> Result<(), NavError> {
        let lesson = self
            .active
            .as_ref()
            .and_then(|a| course.lesson(&a.lesson_id))
            .ok_or(NavError::NoActiveLesson)?;
        if !tab.enabled_for(lesson) {
            return Err(NavError::TabDisabled(tab));
        }
        self.tab = tab;
        Ok(())
    }

    pub fn next_lesson(&self, course: &Course) -> Option<LessonRef> {
        let active = self.active.as_ref()?;
        let mut refs = course.lesson_refs();
        refs.position(|(_, l)| l.id == active.lesson_id)?;
        refs.next().map(|(m, l)| LessonRef {
            module_id: m.id.clone(),
            lesson_id: l.id.clone(),
        })
    }

    pub fn previous_lesson(&self, course: &Course) -> Option<LessonRef> {
        let active = self.active.as_ref()?;
        let mut prev = None;
        for (m, l) in course.lesson_refs() {
            if l.id == active.lesson_id {
                return prev;
            }
            prev = Some(LessonRef {
                module_id: m.id.clone(),
                lesson_id: l.id.clone(),
            });
        }
        None
    }
}
