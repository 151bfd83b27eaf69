// Entity types. Each entity lives in its own collection and refers to others
// only by numeric business id; nothing in the store enforces those references.

use crate::token::{self, ConcurrencyToken, Versioned};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub const STUDENTS: &str = "students";
pub const INSTRUCTORS: &str = "instructors";
pub const DEPARTMENTS: &str = "departments";
pub const COURSES: &str = "courses";
pub const ENROLLMENTS: &str = "enrollments";

/// Every collection, in boot-scan order.
pub const COLLECTIONS: [&str; 5] = [STUDENTS, INSTRUCTORS, DEPARTMENTS, COURSES, ENROLLMENTS];

/// A document type stored in its own collection, keyed by a numeric business id.
pub trait Entity: Serialize + DeserializeOwned + Clone + fmt::Debug {
    const COLLECTION: &'static str;

    fn id(&self) -> i64;

    /// Called by the store on every insert and every applied modification.
    fn stamp_version(&mut self) {}
}

// ── Student ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub student_id: i64,
    pub last_name: String,
    pub first_mid_name: String,
    pub enrollment_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_token: Option<ConcurrencyToken>,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_mid_name, self.last_name)
    }
}

// ── Instructor ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instructor {
    pub instructor_id: i64,
    pub last_name: String,
    pub first_mid_name: String,
    pub hire_date: NaiveDate,
    #[serde(default)]
    pub office_location: Option<String>,
    /// Mirror of `Course::instructor_ids`; maintained by the synchronizer.
    #[serde(default)]
    pub course_ids: BTreeSet<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_token: Option<ConcurrencyToken>,
}

impl Instructor {
    /// Display name, as copied into `Department::administrator_name`.
    pub fn full_name(&self) -> String {
        format!("{}, {}", self.last_name, self.first_mid_name)
    }
}

// ── Department ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Department {
    pub department_id: i64,
    pub name: String,
    pub budget: f64,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub instructor_id: Option<i64>,
    /// Denormalized `Instructor::full_name` of `instructor_id`.
    #[serde(default)]
    pub administrator_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_token: Option<ConcurrencyToken>,
}

// ── Course ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub course_id: i64,
    pub title: String,
    pub credits: i32,
    pub department_id: i64,
    /// Authoritative side of the course/instructor membership.
    #[serde(default)]
    pub instructor_ids: BTreeSet<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_token: Option<ConcurrencyToken>,
}

// ── Enrollment ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl std::str::FromStr for Grade {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Grade::A),
            "B" => Ok(Grade::B),
            "C" => Ok(Grade::C),
            "D" => Ok(Grade::D),
            "F" => Ok(Grade::F),
            other => Err(format!("Unknown grade '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub enrollment_id: i64,
    pub course_id: i64,
    pub student_id: i64,
    #[serde(default)]
    pub grade: Option<Grade>,
}

// ── Entity / Versioned impls ────────────────────────────────────────

macro_rules! versioned_entity {
    ($ty:ty, $collection:expr, $id:ident) => {
        impl Entity for $ty {
            const COLLECTION: &'static str = $collection;

            fn id(&self) -> i64 {
                self.$id
            }

            fn stamp_version(&mut self) {
                token::rotate(self);
            }
        }

        impl Versioned for $ty {
            fn concurrency_token(&self) -> Option<&ConcurrencyToken> {
                self.concurrency_token.as_ref()
            }

            fn set_concurrency_token(&mut self, token: ConcurrencyToken) {
                self.concurrency_token = Some(token);
            }
        }
    };
}

versioned_entity!(Student, STUDENTS, student_id);
versioned_entity!(Instructor, INSTRUCTORS, instructor_id);
versioned_entity!(Department, DEPARTMENTS, department_id);
versioned_entity!(Course, COURSES, course_id);

impl Entity for Enrollment {
    const COLLECTION: &'static str = ENROLLMENTS;

    fn id(&self) -> i64 {
        self.enrollment_id
    }
}

// ── Inputs ──────────────────────────────────────────────────────────
// Caller-supplied field values for create and update. Ids that are
// allocated, mirrored or denormalized are never part of an input.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentInput {
    pub last_name: String,
    pub first_mid_name: String,
    pub enrollment_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructorInput {
    pub last_name: String,
    pub first_mid_name: String,
    pub hire_date: NaiveDate,
    #[serde(default)]
    pub office_location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartmentInput {
    pub name: String,
    pub budget: f64,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub instructor_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseInput {
    pub course_id: i64,
    pub title: String,
    pub credits: i32,
    pub department_id: i64,
    #[serde(default)]
    pub instructor_ids: BTreeSet<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentInput {
    pub student_id: i64,
    pub course_id: i64,
    #[serde(default)]
    pub grade: Option<Grade>,
}
