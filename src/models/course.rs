// src/models/course.rs
//! Course data model and request payloads.

use serde::{Deserialize, Serialize};

/// Entity kind holding course records.
pub const COURSES: &str = "courses";

/// Property listing the ids of enrolled students; never returned by course routes.
pub const ENROLLED_FIELD: &str = "enrolled";

/// Property holding the id of the teaching instructor.
pub const INSTRUCTOR_FIELD: &str = "instructor_id";

/// Course number as sent by clients: either a JSON integer or a numeric string.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum CourseNumber {
    Int(i64),
    Text(String),
}

impl CourseNumber {
    pub fn to_i64(&self) -> Option<i64> {
        match self {
            CourseNumber::Int(n) => Some(*n),
            CourseNumber::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Request payload for `POST /courses`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateCourseRequest {
    pub subject: String,
    pub number: CourseNumber,
    pub title: String,
    pub term: String,
    pub instructor_id: i64,
}

/// Request payload for `PATCH /courses/{id}/students`.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct EnrollmentUpdate {
    pub add: Vec<i64>,
    pub remove: Vec<i64>,
}

/// Query parameters for `GET /courses`.
#[derive(Deserialize, Debug, Clone)]
pub struct CoursePage {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    3
}
