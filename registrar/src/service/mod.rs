//! The operations request handlers call. Each one composes the allocator,
//! token checks, synchronizer and cascade engine over a single [`Store`].

use crate::cascade::{CascadeEngine, DeleteOutcome};
use crate::document::Document;
use crate::error::{RegistrarError, Result};
use crate::model::{
    self, Course, CourseInput, Department, DepartmentInput, Enrollment, EnrollmentInput, Entity,
    Grade, Instructor, InstructorInput, Student, StudentInput,
};
use crate::sequence::{Sequence, SequenceAllocator};
use crate::store::Store;
use crate::sync::{DriftReport, Synchronizer};
use crate::token::{self, ConcurrencyToken};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;

pub struct Registrar {
    store: Store,
}

impl Registrar {
    /// Open the data directory at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Registrar::new(Store::open(path)?))
    }

    pub fn new(store: Store) -> Self {
        Registrar { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn sequences(&self) -> SequenceAllocator<'_> {
        SequenceAllocator::new(&self.store)
    }

    pub fn synchronizer(&self) -> Synchronizer<'_> {
        Synchronizer::new(&self.store)
    }

    pub fn cascade(&self) -> CascadeEngine<'_> {
        CascadeEngine::new(&self.store)
    }

    fn require<T: Entity>(&self, id: i64) -> Result<()> {
        if self.store.collection::<T>().exists(id)? {
            Ok(())
        } else {
            Err(RegistrarError::not_found(T::COLLECTION, id))
        }
    }

    // ── Students ────────────────────────────────────────────────────

    pub fn create_student(&self, input: StudentInput) -> Result<Document<Student>> {
        let student_id = self.sequences().next(Sequence::Student)?;
        self.store.collection::<Student>().insert(Student {
            student_id,
            last_name: input.last_name,
            first_mid_name: input.first_mid_name,
            enrollment_date: input.enrollment_date,
            concurrency_token: None,
        })
    }

    pub fn update_student(
        &self,
        id: i64,
        input: StudentInput,
        token: Option<&ConcurrencyToken>,
    ) -> Result<Document<Student>> {
        let modified = self.store.collection::<Student>().modify(id, |s| {
            token::ensure_current(s, token, model::STUDENTS, id)?;
            s.last_name = input.last_name;
            s.first_mid_name = input.first_mid_name;
            s.enrollment_date = input.enrollment_date;
            Ok(true)
        })?;
        Ok(modified.document)
    }

    pub fn get_student(&self, id: i64) -> Result<Document<Student>> {
        self.store.collection::<Student>().get(id)
    }

    pub fn list_students(&self) -> Result<Vec<Document<Student>>> {
        self.store.collection::<Student>().list()
    }

    pub fn delete_student(&self, id: i64) -> Result<DeleteOutcome> {
        self.cascade().delete_student(id)
    }

    // ── Instructors ─────────────────────────────────────────────────

    pub fn create_instructor(&self, input: InstructorInput) -> Result<Document<Instructor>> {
        let instructor_id = self.sequences().next(Sequence::Instructor)?;
        self.store.collection::<Instructor>().insert(Instructor {
            instructor_id,
            last_name: input.last_name,
            first_mid_name: input.first_mid_name,
            hire_date: input.hire_date,
            office_location: input.office_location,
            course_ids: BTreeSet::new(),
            concurrency_token: None,
        })
    }

    /// Update an instructor's own fields. Course membership is owned by
    /// courses and is never changed here.
    pub fn update_instructor(
        &self,
        id: i64,
        input: InstructorInput,
        token: Option<&ConcurrencyToken>,
    ) -> Result<Document<Instructor>> {
        let modified = self.store.collection::<Instructor>().modify(id, |i| {
            // Already holding these values means an earlier call got this far;
            // skip the write (and the token check) so the retry can finish.
            if i.last_name == input.last_name
                && i.first_mid_name == input.first_mid_name
                && i.hire_date == input.hire_date
                && i.office_location == input.office_location
            {
                return Ok(false);
            }
            token::ensure_current(i, token, model::INSTRUCTORS, id)?;
            i.last_name = input.last_name;
            i.first_mid_name = input.first_mid_name;
            i.hire_date = input.hire_date;
            i.office_location = input.office_location;
            Ok(true)
        })?;
        if let Err(e) = self.synchronizer().refresh_administrator_name(id) {
            return Err(if modified.written {
                after_first_write("update_instructor", e)
            } else {
                e
            });
        }
        Ok(modified.document)
    }

    pub fn get_instructor(&self, id: i64) -> Result<Document<Instructor>> {
        self.store.collection::<Instructor>().get(id)
    }

    pub fn list_instructors(&self) -> Result<Vec<Document<Instructor>>> {
        self.store.collection::<Instructor>().list()
    }

    pub fn delete_instructor(&self, id: i64) -> Result<DeleteOutcome> {
        self.cascade().delete_instructor(id)
    }

    // ── Departments ─────────────────────────────────────────────────

    pub fn create_department(&self, input: DepartmentInput) -> Result<Document<Department>> {
        // Resolve before allocating so an unknown administrator burns no id
        let administrator_name = self.synchronizer().administrator_for(input.instructor_id)?;
        let department_id = self.sequences().next(Sequence::Department)?;
        self.store.collection::<Department>().insert(Department {
            department_id,
            name: input.name,
            budget: input.budget,
            start_date: input.start_date,
            instructor_id: input.instructor_id,
            administrator_name,
            concurrency_token: None,
        })
    }

    /// Token-checked department update. A stale token yields `Conflict` and
    /// leaves the stored record untouched.
    pub fn update_department(
        &self,
        id: i64,
        input: DepartmentInput,
        token: Option<&ConcurrencyToken>,
    ) -> Result<Document<Department>> {
        let administrator_name = self.synchronizer().administrator_for(input.instructor_id)?;
        let modified = self.store.collection::<Department>().modify(id, |d| {
            token::ensure_current(d, token, model::DEPARTMENTS, id)?;
            d.name = input.name;
            d.budget = input.budget;
            d.start_date = input.start_date;
            d.instructor_id = input.instructor_id;
            d.administrator_name = administrator_name;
            Ok(true)
        })?;
        Ok(modified.document)
    }

    pub fn get_department(&self, id: i64) -> Result<Document<Department>> {
        self.store.collection::<Department>().get(id)
    }

    pub fn list_departments(&self) -> Result<Vec<Document<Department>>> {
        self.store.collection::<Department>().list()
    }

    pub fn delete_department(&self, id: i64) -> Result<DeleteOutcome> {
        self.cascade().delete_department(id)
    }

    // ── Courses ─────────────────────────────────────────────────────

    /// Create a course under its caller-chosen id, then assign instructors.
    ///
    /// A course inserted by an earlier call whose instructor assignment
    /// failed (same fields, no instructors yet) is picked up again rather
    /// than reported as `AlreadyExists`, so the create can be retried.
    pub fn create_course(&self, input: CourseInput) -> Result<Document<Course>> {
        let courses = self.store.collection::<Course>();
        let course_id = input.course_id;

        let inserted = match courses.find(course_id)? {
            Some(existing) if is_unfinished_create(&existing.data, &input) => {
                log::info!("Resuming instructor assignment for course {course_id}");
                false
            }
            Some(_) => {
                return Err(RegistrarError::AlreadyExists {
                    collection: model::COURSES.to_string(),
                    id: course_id.to_string(),
                });
            }
            None => {
                self.require::<Department>(input.department_id)?;
                courses.insert(Course {
                    course_id,
                    title: input.title,
                    credits: input.credits,
                    department_id: input.department_id,
                    instructor_ids: BTreeSet::new(),
                    concurrency_token: None,
                })?;
                true
            }
        };

        if let Err(e) = self
            .synchronizer()
            .set_course_instructors(course_id, &input.instructor_ids)
        {
            return Err(if inserted {
                after_first_write("create_course", e)
            } else {
                e
            });
        }
        courses.get(course_id)
    }

    /// Update a course. `id` is the addressed course and must match the id in
    /// the body; course ids cannot be changed.
    ///
    /// The course's own fields are written together with its instructor list
    /// after every instructor mirror, so a failed call leaves the token valid
    /// and can be repeated as is.
    pub fn update_course(
        &self,
        id: i64,
        input: CourseInput,
        token: Option<&ConcurrencyToken>,
    ) -> Result<Document<Course>> {
        if input.course_id != id {
            return Err(RegistrarError::Validation(format!(
                "Course id in body ({}) does not match addressed course ({id})",
                input.course_id
            )));
        }
        self.require::<Department>(input.department_id)?;

        let courses = self.store.collection::<Course>();
        // Reject a stale token before any instructor is touched
        token::ensure_current(&courses.get(id)?.data, token, model::COURSES, id)?;

        self.synchronizer()
            .apply_course(id, &input.instructor_ids, |c| {
                token::ensure_current(c, token, model::COURSES, id)?;
                c.title = input.title;
                c.credits = input.credits;
                c.department_id = input.department_id;
                Ok(true)
            })?;
        courses.get(id)
    }

    pub fn get_course(&self, id: i64) -> Result<Document<Course>> {
        self.store.collection::<Course>().get(id)
    }

    pub fn list_courses(&self) -> Result<Vec<Document<Course>>> {
        self.store.collection::<Course>().list()
    }

    pub fn delete_course(&self, id: i64) -> Result<DeleteOutcome> {
        self.cascade().delete_course(id)
    }

    // ── Enrollments ─────────────────────────────────────────────────

    pub fn create_enrollment(&self, input: EnrollmentInput) -> Result<Document<Enrollment>> {
        if self.store.config().validate_enrollment_refs {
            self.require::<Student>(input.student_id)?;
            self.require::<Course>(input.course_id)?;
        }
        let enrollment_id = self.sequences().next(Sequence::Enrollment)?;
        self.store.collection::<Enrollment>().insert(Enrollment {
            enrollment_id,
            course_id: input.course_id,
            student_id: input.student_id,
            grade: input.grade,
        })
    }

    pub fn set_grade(&self, id: i64, grade: Option<Grade>) -> Result<Document<Enrollment>> {
        let modified = self.store.collection::<Enrollment>().modify(id, |e| {
            if e.grade == grade {
                return Ok(false);
            }
            e.grade = grade;
            Ok(true)
        })?;
        Ok(modified.document)
    }

    pub fn get_enrollment(&self, id: i64) -> Result<Document<Enrollment>> {
        self.store.collection::<Enrollment>().get(id)
    }

    pub fn list_enrollments(&self) -> Result<Vec<Document<Enrollment>>> {
        self.store.collection::<Enrollment>().list()
    }

    pub fn delete_enrollment(&self, id: i64) -> Result<DeleteOutcome> {
        self.cascade().delete_enrollment(id)
    }

    // ── Dynamic (untyped) API for the CLI ───────────────────────────

    pub fn get_dynamic(&self, collection: &str, id: i64) -> Result<serde_json::Value> {
        match collection {
            model::STUDENTS => to_json(&self.get_student(id)?),
            model::INSTRUCTORS => to_json(&self.get_instructor(id)?),
            model::DEPARTMENTS => to_json(&self.get_department(id)?),
            model::COURSES => to_json(&self.get_course(id)?),
            model::ENROLLMENTS => to_json(&self.get_enrollment(id)?),
            other => Err(unknown_collection(other)),
        }
    }

    pub fn list_dynamic(&self, collection: &str) -> Result<serde_json::Value> {
        match collection {
            model::STUDENTS => to_json(&self.list_students()?),
            model::INSTRUCTORS => to_json(&self.list_instructors()?),
            model::DEPARTMENTS => to_json(&self.list_departments()?),
            model::COURSES => to_json(&self.list_courses()?),
            model::ENROLLMENTS => to_json(&self.list_enrollments()?),
            other => Err(unknown_collection(other)),
        }
    }

    /// Create from a JSON body shaped like the collection's input type.
    pub fn insert_dynamic(
        &self,
        collection: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value> {
        match collection {
            model::STUDENTS => to_json(&self.create_student(from_json(body)?)?),
            model::INSTRUCTORS => to_json(&self.create_instructor(from_json(body)?)?),
            model::DEPARTMENTS => to_json(&self.create_department(from_json(body)?)?),
            model::COURSES => to_json(&self.create_course(from_json(body)?)?),
            model::ENROLLMENTS => to_json(&self.create_enrollment(from_json(body)?)?),
            other => Err(unknown_collection(other)),
        }
    }

    /// Update from a JSON body. Enrollments accept `{ "grade": ... }` only.
    pub fn update_dynamic(
        &self,
        collection: &str,
        id: i64,
        body: serde_json::Value,
        token: Option<&ConcurrencyToken>,
    ) -> Result<serde_json::Value> {
        match collection {
            model::STUDENTS => to_json(&self.update_student(id, from_json(body)?, token)?),
            model::INSTRUCTORS => to_json(&self.update_instructor(id, from_json(body)?, token)?),
            model::DEPARTMENTS => to_json(&self.update_department(id, from_json(body)?, token)?),
            model::COURSES => to_json(&self.update_course(id, from_json(body)?, token)?),
            model::ENROLLMENTS => {
                #[derive(serde::Deserialize)]
                struct GradeBody {
                    #[serde(default)]
                    grade: Option<Grade>,
                }
                let GradeBody { grade } = from_json(body)?;
                to_json(&self.set_grade(id, grade)?)
            }
            other => Err(unknown_collection(other)),
        }
    }

    pub fn delete_dynamic(&self, collection: &str, id: i64) -> Result<DeleteOutcome> {
        match collection {
            model::STUDENTS => self.delete_student(id),
            model::INSTRUCTORS => self.delete_instructor(id),
            model::DEPARTMENTS => self.delete_department(id),
            model::COURSES => self.delete_course(id),
            model::ENROLLMENTS => self.delete_enrollment(id),
            other => Err(unknown_collection(other)),
        }
    }

    /// Check mirrored data, repairing it when `repair` is set.
    pub fn reconcile(&self, repair: bool) -> Result<DriftReport> {
        self.synchronizer().reconcile(repair)
    }

    pub fn status(&self) -> Result<serde_json::Value> {
        self.store.status()
    }
}

fn is_unfinished_create(existing: &Course, input: &CourseInput) -> bool {
    existing.title == input.title
        && existing.credits == input.credits
        && existing.department_id == input.department_id
        && existing.instructor_ids.is_empty()
        && !input.instructor_ids.is_empty()
}

/// A follow-up step failed after the operation's own document was written.
fn after_first_write(operation: &str, source: RegistrarError) -> RegistrarError {
    let (applied, attempted, source) = match source {
        RegistrarError::PartialSync {
            applied,
            attempted,
            source,
        } => (applied + 1, attempted + 1, source),
        other => (1, 2, Box::new(other)),
    };
    log::error!(
        "{operation}: failed after {applied} of {attempted} writes; retry the same call: {source}"
    );
    RegistrarError::PartialSync {
        applied,
        attempted,
        source,
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

fn from_json<T: DeserializeOwned>(body: serde_json::Value) -> Result<T> {
    serde_json::from_value(body).map_err(|e| RegistrarError::Validation(e.to_string()))
}

fn unknown_collection(name: &str) -> RegistrarError {
    RegistrarError::Validation(format!(
        "Unknown collection '{name}' (expected one of: {})",
        model::COLLECTIONS.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn setup_registrar() -> (TempDir, Registrar) {
        let tmp = TempDir::new().unwrap();
        let registrar = Registrar::open(tmp.path()).unwrap();
        (tmp, registrar)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn instructor_input(last: &str, first: &str) -> InstructorInput {
        InstructorInput {
            last_name: last.into(),
            first_mid_name: first.into(),
            hire_date: date(1995, 3, 11),
            office_location: None,
        }
    }

    fn department_input(name: &str, admin: Option<i64>) -> DepartmentInput {
        DepartmentInput {
            name: name.into(),
            budget: 350000.0,
            start_date: date(2007, 9, 1),
            instructor_id: admin,
        }
    }

    fn course_input(id: i64, department_id: i64, instructors: &[i64]) -> CourseInput {
        CourseInput {
            course_id: id,
            title: "Chemistry".into(),
            credits: 3,
            department_id,
            instructor_ids: instructors.iter().copied().collect(),
        }
    }

    fn student_input(last: &str) -> StudentInput {
        StudentInput {
            last_name: last.into(),
            first_mid_name: "Carson".into(),
            enrollment_date: date(2016, 9, 1),
        }
    }

    #[test]
    fn test_end_to_end_course_lifecycle() {
        let (_tmp, reg) = setup_registrar();
        let i1 = reg.create_instructor(instructor_input("Abercrombie", "Kim")).unwrap();
        let i2 = reg.create_instructor(instructor_input("Fakhouri", "Fadi")).unwrap();
        assert_eq!((i1.data.instructor_id, i2.data.instructor_id), (1, 2));

        let dept = reg.create_department(department_input("Engineering", None)).unwrap();
        let course = reg
            .create_course(course_input(1050, dept.data.department_id, &[1, 2]))
            .unwrap();
        assert_eq!(course.data.instructor_ids, BTreeSet::from([1, 2]));
        assert!(reg.get_instructor(1).unwrap().data.course_ids.contains(&1050));
        assert!(reg.get_instructor(2).unwrap().data.course_ids.contains(&1050));

        reg.delete_instructor(1).unwrap();
        assert_eq!(reg.get_course(1050).unwrap().data.instructor_ids, BTreeSet::from([2]));
        assert!(matches!(
            reg.get_instructor(1),
            Err(RegistrarError::NotFound { .. })
        ));

        let student = reg.create_student(student_input("Alexander")).unwrap();
        reg.create_enrollment(EnrollmentInput {
            student_id: student.data.student_id,
            course_id: 1050,
            grade: None,
        })
        .unwrap();
        assert!(matches!(
            reg.delete_course(1050),
            Err(RegistrarError::HasDependents { .. })
        ));
        assert!(reg.reconcile(false).unwrap().is_consistent());
    }

    #[test]
    fn test_department_token_rejection() {
        let (_tmp, reg) = setup_registrar();
        let created = reg.create_department(department_input("English", None)).unwrap();
        let t1 = created.data.concurrency_token.clone().unwrap();
        let t0 = token::issue_token();

        let err = reg
            .update_department(1, department_input("Renamed", None), Some(&t0))
            .unwrap_err();
        assert!(matches!(err, RegistrarError::Conflict { .. }));
        assert_eq!(reg.get_department(1).unwrap().data, created.data);

        let updated = reg
            .update_department(1, department_input("Renamed", None), Some(&t1))
            .unwrap();
        let t2 = updated.data.concurrency_token.clone().unwrap();
        assert_ne!(t2, t1);
        assert_eq!(updated.data.name, "Renamed");

        // T1 is now stale
        assert!(reg
            .update_department(1, department_input("Again", None), Some(&t1))
            .is_err());
        // No token means force write
        reg.update_department(1, department_input("Forced", None), None)
            .unwrap();
    }

    #[test]
    fn test_tokens_cover_every_mutable_entity() {
        let (_tmp, reg) = setup_registrar();
        let student = reg.create_student(student_input("Alonso")).unwrap();
        let stale = token::issue_token();
        assert!(matches!(
            reg.update_student(1, student_input("Anand"), Some(&stale)),
            Err(RegistrarError::Conflict { .. })
        ));
        let updated = reg
            .update_student(1, student_input("Anand"), student.data.concurrency_token.as_ref())
            .unwrap();
        assert_eq!(updated.data.last_name, "Anand");

        let instructor = reg.create_instructor(instructor_input("Harui", "Roger")).unwrap();
        let before = instructor.data.concurrency_token.clone().unwrap();
        let dept = reg.create_department(department_input("Math", None)).unwrap();
        reg.create_course(course_input(1045, dept.data.department_id, &[1]))
            .unwrap();
        // The mirror write rotated the instructor's token
        let after = reg.get_instructor(1).unwrap().data.concurrency_token.unwrap();
        assert_ne!(before, after);
        assert!(matches!(
            reg.update_instructor(1, instructor_input("Harui", "R."), Some(&before)),
            Err(RegistrarError::Conflict { .. })
        ));
    }

    #[test]
    fn test_department_administrator_name_follows_instructor() {
        let (_tmp, reg) = setup_registrar();
        reg.create_instructor(instructor_input("Kapoor", "Candace")).unwrap();
        let dept = reg.create_department(department_input("Economics", Some(1))).unwrap();
        assert_eq!(dept.data.administrator_name.as_deref(), Some("Kapoor, Candace"));

        reg.update_instructor(1, instructor_input("Kapoor-Lee", "Candace"), None)
            .unwrap();
        assert_eq!(
            reg.get_department(1).unwrap().data.administrator_name.as_deref(),
            Some("Kapoor-Lee, Candace")
        );

        // Unknown administrator is rejected before any id is used
        assert!(matches!(
            reg.create_department(department_input("Physics", Some(99))),
            Err(RegistrarError::NotFound { .. })
        ));
        assert_eq!(reg.sequences().current("department").unwrap(), Some(1));

        // Switching administrator re-resolves the name; clearing it clears the name
        reg.create_instructor(instructor_input("Zheng", "Roger")).unwrap();
        let switched = reg
            .update_department(1, department_input("Economics", Some(2)), None)
            .unwrap();
        assert_eq!(switched.data.instructor_id, Some(2));
        assert_eq!(switched.data.administrator_name.as_deref(), Some("Zheng, Roger"));

        let cleared = reg
            .update_department(1, department_input("Economics", None), None)
            .unwrap();
        assert_eq!(cleared.data.instructor_id, None);
        assert_eq!(cleared.data.administrator_name, None);
        assert!(reg.reconcile(false).unwrap().is_consistent());

        // An unknown administrator leaves the department as it was
        assert!(matches!(
            reg.update_department(1, department_input("Economics", Some(99)), None),
            Err(RegistrarError::NotFound { .. })
        ));
        assert_eq!(reg.get_department(1).unwrap().data, cleared.data);
    }

    /// Replace a stored document with unparsable YAML, returning its path and
    /// the original text.
    fn break_document(tmp: &TempDir, collection: &str, key: &str) -> (PathBuf, String) {
        let path = tmp.path().join(collection).join(format!("{key}.yaml"));
        let intact = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, "not: [valid").unwrap();
        (path, intact)
    }

    #[test]
    fn test_create_course_retry_after_failed_assignment() {
        let (tmp, reg) = setup_registrar();
        reg.create_department(department_input("Engineering", None)).unwrap();
        let instructor = reg.create_instructor(instructor_input("Abercrombie", "Kim")).unwrap();
        let (path, intact) = break_document(&tmp, "instructors", &instructor.key);

        let err = reg.create_course(course_input(1050, 1, &[1])).unwrap_err();
        assert!(matches!(err, RegistrarError::PartialSync { applied: 1, .. }));
        assert!(reg.get_course(1050).unwrap().data.instructor_ids.is_empty());

        std::fs::write(&path, intact).unwrap();
        let course = reg.create_course(course_input(1050, 1, &[1])).unwrap();
        assert_eq!(course.data.instructor_ids, BTreeSet::from([1]));
        assert_eq!(reg.get_instructor(1).unwrap().data.course_ids, BTreeSet::from([1050]));
        assert!(reg.reconcile(false).unwrap().is_consistent());

        // Once assigned, the id is taken for good
        assert!(matches!(
            reg.create_course(course_input(1050, 1, &[1])),
            Err(RegistrarError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_update_course_retry_with_same_token() {
        let (tmp, reg) = setup_registrar();
        reg.create_department(department_input("Engineering", None)).unwrap();
        reg.create_instructor(instructor_input("Abercrombie", "Kim")).unwrap();
        let second = reg.create_instructor(instructor_input("Fakhouri", "Fadi")).unwrap();
        let created = reg.create_course(course_input(1050, 1, &[1])).unwrap();
        let token = created.data.concurrency_token.clone().unwrap();

        let mut input = course_input(1050, 1, &[2]);
        input.title = "Organic Chemistry".into();

        let (path, intact) = break_document(&tmp, "instructors", &second.key);
        let err = reg
            .update_course(1050, input.clone(), Some(&token))
            .unwrap_err();
        assert!(matches!(err, RegistrarError::PartialSync { applied: 1, .. }));
        assert_eq!(reg.get_course(1050).unwrap().data, created.data);

        std::fs::write(&path, intact).unwrap();
        let updated = reg.update_course(1050, input, Some(&token)).unwrap();
        assert_eq!(updated.data.title, "Organic Chemistry");
        assert_eq!(updated.data.instructor_ids, BTreeSet::from([2]));
        assert_ne!(updated.data.concurrency_token, Some(token.clone()));
        assert!(reg.reconcile(false).unwrap().is_consistent());

        // The old token is spent now
        assert!(matches!(
            reg.update_course(1050, course_input(1050, 1, &[]), Some(&token)),
            Err(RegistrarError::Conflict { .. })
        ));
    }

    #[test]
    fn test_update_instructor_retry_refreshes_department() {
        let (tmp, reg) = setup_registrar();
        let created = reg.create_instructor(instructor_input("Kapoor", "Candace")).unwrap();
        let token = created.data.concurrency_token.clone().unwrap();
        let dept = reg.create_department(department_input("Economics", Some(1))).unwrap();

        let (path, intact) = break_document(&tmp, "departments", &dept.key);
        let renamed = instructor_input("Kapoor-Lee", "Candace");
        let err = reg
            .update_instructor(1, renamed.clone(), Some(&token))
            .unwrap_err();
        assert!(matches!(err, RegistrarError::PartialSync { applied: 1, .. }));
        assert_eq!(reg.get_instructor(1).unwrap().data.last_name, "Kapoor-Lee");

        std::fs::write(&path, intact).unwrap();
        reg.update_instructor(1, renamed, Some(&token)).unwrap();
        assert_eq!(
            reg.get_department(1).unwrap().data.administrator_name.as_deref(),
            Some("Kapoor-Lee, Candace")
        );
        assert!(reg.reconcile(false).unwrap().is_consistent());
    }

    #[test]
    fn test_course_create_and_update_rules() {
        let (_tmp, reg) = setup_registrar();
        reg.create_department(department_input("Engineering", None)).unwrap();
        reg.create_instructor(instructor_input("Abercrombie", "Kim")).unwrap();
        reg.create_instructor(instructor_input("Zheng", "Roger")).unwrap();

        let course = reg.create_course(course_input(1050, 1, &[1])).unwrap();
        assert!(matches!(
            reg.create_course(course_input(1050, 1, &[])),
            Err(RegistrarError::AlreadyExists { .. })
        ));
        assert!(matches!(
            reg.create_course(course_input(2000, 42, &[])),
            Err(RegistrarError::NotFound { .. })
        ));
        assert!(matches!(
            reg.update_course(1050, course_input(1051, 1, &[]), None),
            Err(RegistrarError::Validation(_))
        ));

        let token = reg.get_course(1050).unwrap().data.concurrency_token;
        assert!(token.is_some());
        let updated = reg
            .update_course(1050, course_input(1050, 1, &[2]), token.as_ref())
            .unwrap();
        assert_eq!(updated.data.instructor_ids, BTreeSet::from([2]));
        assert!(reg.get_instructor(1).unwrap().data.course_ids.is_empty());
        assert_eq!(reg.get_instructor(2).unwrap().data.course_ids, BTreeSet::from([1050]));
        assert_ne!(updated.data.concurrency_token, course.data.concurrency_token);
    }

    #[test]
    fn test_enrollment_references_validated() {
        let (_tmp, reg) = setup_registrar();
        let err = reg
            .create_enrollment(EnrollmentInput { student_id: 1, course_id: 1050, grade: None })
            .unwrap_err();
        assert!(matches!(err, RegistrarError::NotFound { .. }));
        // Nothing allocated for the rejected enrollment
        assert_eq!(reg.sequences().current("enrollment").unwrap(), None);
    }

    #[test]
    fn test_enrollment_validation_can_be_disabled() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig { validate_enrollment_refs: false, ..StoreConfig::default() };
        let reg = Registrar::new(Store::open_with_config(tmp.path(), config).unwrap());
        let enrollment = reg
            .create_enrollment(EnrollmentInput { student_id: 7, course_id: 9, grade: None })
            .unwrap();
        assert_eq!(enrollment.data.enrollment_id, 1);

        let graded = reg.set_grade(1, Some(Grade::A)).unwrap();
        assert_eq!(graded.data.grade, Some(Grade::A));
    }

    #[test]
    fn test_dynamic_access() {
        let (_tmp, reg) = setup_registrar();
        let created = reg
            .insert_dynamic(
                "students",
                serde_json::json!({
                    "last_name": "Norman",
                    "first_mid_name": "Laura",
                    "enrollment_date": "2019-09-01"
                }),
            )
            .unwrap();
        assert_eq!(created["data"]["student_id"], 1);

        let fetched = reg.get_dynamic("students", 1).unwrap();
        assert_eq!(fetched["data"]["last_name"], "Norman");
        assert_eq!(reg.list_dynamic("students").unwrap().as_array().unwrap().len(), 1);

        assert!(matches!(
            reg.insert_dynamic("students", serde_json::json!({ "last_name": 3 })),
            Err(RegistrarError::Validation(_))
        ));
        assert!(matches!(
            reg.get_dynamic("professors", 1),
            Err(RegistrarError::Validation(_))
        ));

        let outcome = reg.delete_dynamic("students", 1).unwrap();
        assert_eq!(outcome.collection, "students");
        assert!(reg.list_dynamic("students").unwrap().as_array().unwrap().is_empty());
    }
}
