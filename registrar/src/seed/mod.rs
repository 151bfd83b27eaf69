// Sample university data for demos and manual testing.

use crate::error::{RegistrarError, Result};
use crate::model::{
    CourseInput, DepartmentInput, EnrollmentInput, Grade, InstructorInput, Student, StudentInput,
};
use crate::service::Registrar;
use chrono::NaiveDate;
use serde::Serialize;

/// Number of records each collection received.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedSummary {
    pub departments: usize,
    pub instructors: usize,
    pub courses: usize,
    pub students: usize,
    pub enrollments: usize,
}

// (name, budget)
const DEPARTMENTS: [(&str, f64); 4] = [
    ("English", 350_000.0),
    ("Mathematics", 100_000.0),
    ("Engineering", 350_000.0),
    ("Economics", 100_000.0),
];

// (last, first, hired, office)
const INSTRUCTORS: [(&str, &str, &str, Option<&str>); 5] = [
    ("Abercrombie", "Kim", "1995-03-11", Some("Smith 17")),
    ("Fakhouri", "Fadi", "2002-07-06", Some("Gowan 27")),
    ("Harui", "Roger", "1998-07-01", Some("Thompson 304")),
    ("Kapoor", "Candace", "2001-01-15", None),
    ("Zheng", "Roger", "2004-02-12", None),
];

// (course id, title, credits, department index, instructor index)
const COURSES: [(i64, &str, i32, usize, usize); 7] = [
    (1050, "Chemistry", 3, 2, 0),
    (4022, "Microeconomics", 3, 3, 1),
    (4041, "Macroeconomics", 3, 3, 1),
    (1045, "Calculus", 4, 1, 2),
    (3141, "Trigonometry", 4, 1, 2),
    (2021, "Composition", 3, 0, 3),
    (2042, "Literature", 4, 0, 3),
];

// (last, first, enrolled)
const STUDENTS: [(&str, &str, &str); 8] = [
    ("Alexander", "Carson", "2016-09-01"),
    ("Alonso", "Meredith", "2018-09-01"),
    ("Anand", "Arturo", "2019-09-01"),
    ("Barzdukas", "Gytis", "2018-09-01"),
    ("Li", "Yan", "2018-09-01"),
    ("Justice", "Peggy", "2017-09-01"),
    ("Norman", "Laura", "2019-09-01"),
    ("Olivetto", "Nino", "2011-09-01"),
];

// (student index, course id, grade)
const ENROLLMENTS: [(usize, i64, Option<Grade>); 11] = [
    (0, 1050, Some(Grade::A)),
    (0, 4022, Some(Grade::C)),
    (0, 4041, Some(Grade::B)),
    (1, 1045, Some(Grade::B)),
    (1, 3141, Some(Grade::B)),
    (1, 2021, Some(Grade::B)),
    (2, 1050, None),
    (3, 1050, None),
    (4, 2021, Some(Grade::B)),
    (5, 2042, None),
    (6, 1045, Some(Grade::A)),
];

const DEPARTMENTS_START: &str = "2007-09-01";

fn date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| RegistrarError::Other(format!("Bad seed date '{s}': {e}")))
}

fn id_at(ids: &[i64], index: usize) -> Result<i64> {
    ids.get(index)
        .copied()
        .ok_or_else(|| RegistrarError::Other(format!("Seed data refers to missing row {index}")))
}

/// Populate an empty store with the sample data set. A store that already
/// has students is left alone and an empty summary is returned.
pub fn seed_sample_data(registrar: &Registrar) -> Result<SeedSummary> {
    if !registrar.store().collection::<Student>().list()?.is_empty() {
        log::info!("Store already has students; skipping seed");
        return Ok(SeedSummary::default());
    }

    let mut departments = Vec::new();
    for (name, budget) in DEPARTMENTS {
        let doc = registrar.create_department(DepartmentInput {
            name: name.to_string(),
            budget,
            start_date: date(DEPARTMENTS_START)?,
            instructor_id: None,
        })?;
        departments.push(doc.data.department_id);
    }

    let mut instructors = Vec::new();
    for (last, first, hired, office) in INSTRUCTORS {
        let doc = registrar.create_instructor(InstructorInput {
            last_name: last.to_string(),
            first_mid_name: first.to_string(),
            hire_date: date(hired)?,
            office_location: office.map(str::to_string),
        })?;
        instructors.push(doc.data.instructor_id);
    }

    for (course_id, title, credits, department, instructor) in COURSES {
        registrar.create_course(CourseInput {
            course_id,
            title: title.to_string(),
            credits,
            department_id: id_at(&departments, department)?,
            instructor_ids: [id_at(&instructors, instructor)?].into(),
        })?;
    }

    let mut students = Vec::new();
    for (last, first, enrolled) in STUDENTS {
        let doc = registrar.create_student(StudentInput {
            last_name: last.to_string(),
            first_mid_name: first.to_string(),
            enrollment_date: date(enrolled)?,
        })?;
        students.push(doc.data.student_id);
    }

    for (student, course_id, grade) in ENROLLMENTS {
        registrar.create_enrollment(EnrollmentInput {
            student_id: id_at(&students, student)?,
            course_id,
            grade,
        })?;
    }

    let summary = SeedSummary {
        departments: departments.len(),
        instructors: instructors.len(),
        courses: COURSES.len(),
        students: students.len(),
        enrollments: ENROLLMENTS.len(),
    };
    log::info!("Seeded sample data: {summary:?}");
    Ok(summary)
}
