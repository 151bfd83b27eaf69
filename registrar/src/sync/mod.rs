//! Course/instructor mirror maintenance and the department administrator copy.
//!
//! `Course::instructor_ids` is authoritative; `Instructor::course_ids` and
//! `Department::administrator_name` are derived. Every operation here is a
//! sequence of independent single-document writes in ascending id order.
//! Each operation recomputes the full target state and diffs it against what
//! is stored, so re-running one after a partial failure converges.

use crate::error::{RegistrarError, Result};
use crate::model::{Course, Department, Instructor};
use crate::store::{Modified, Store};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// What `set_course_instructors` did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    /// Instructors that now teach the course and did not before.
    pub added: Vec<i64>,
    /// Instructors that no longer teach the course.
    pub removed: Vec<i64>,
    /// Requested ids with no matching instructor; dropped.
    pub unknown: Vec<i64>,
    /// Documents actually rewritten.
    pub writes: usize,
}

/// What `remove_instructor_everywhere` did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DetachOutcome {
    pub courses: Vec<i64>,
    pub departments: Vec<i64>,
    pub writes: usize,
}

/// One inconsistency between authoritative and derived data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Drift {
    /// A course lists an instructor that does not exist.
    DanglingInstructor { course_id: i64, instructor_id: i64 },
    /// A course lists an instructor whose `course_ids` lacks the course.
    MissingMirror { course_id: i64, instructor_id: i64 },
    /// An instructor lists a course that is gone or does not list them back.
    StaleMirror { instructor_id: i64, course_id: i64 },
    /// A department's administrator does not exist.
    DanglingAdministrator { department_id: i64, instructor_id: i64 },
    /// A department's administrator name disagrees with the instructor record.
    StaleAdministratorName {
        department_id: i64,
        expected: Option<String>,
        found: Option<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    pub issues: Vec<Drift>,
    /// Documents rewritten by a repairing run.
    pub repaired: usize,
}

impl DriftReport {
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Counts the writes of one multi-document operation so that a failure
/// part-way through can be reported as partial.
struct Progress<'s> {
    operation: &'s str,
    attempted: usize,
    applied: usize,
}

impl<'s> Progress<'s> {
    fn new(operation: &'s str, attempted: usize) -> Self {
        Progress { operation, attempted, applied: 0 }
    }

    fn record<T>(&mut self, result: Result<Modified<T>>) -> Result<Modified<T>> {
        match result {
            Ok(modified) => {
                if modified.written {
                    self.applied += 1;
                }
                Ok(modified)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn fail(&self, source: RegistrarError) -> RegistrarError {
        if self.applied == 0 {
            return source;
        }
        log::error!(
            "{}: failed after {} of {} writes; mirrored data needs reconciliation: {}",
            self.operation,
            self.applied,
            self.attempted,
            source
        );
        RegistrarError::PartialSync {
            applied: self.applied,
            attempted: self.attempted,
            source: Box::new(source),
        }
    }
}

pub struct Synchronizer<'a> {
    store: &'a Store,
}

impl<'a> Synchronizer<'a> {
    pub fn new(store: &'a Store) -> Self {
        Synchronizer { store }
    }

    /// Make `desired` the instructor set of a course and mirror it onto the
    /// instructors. Unknown instructor ids are dropped.
    pub fn set_course_instructors(
        &self,
        course_id: i64,
        desired: &BTreeSet<i64>,
    ) -> Result<SyncOutcome> {
        self.apply_course(course_id, desired, |_| Ok(false))
    }

    /// `set_course_instructors`, with `update` also applied to the course in
    /// the same final write.
    ///
    /// Instructor mirrors are written first and the course last, so if any
    /// mirror write fails the course (and its concurrency token) is untouched
    /// and the identical call can simply be repeated.
    pub fn apply_course<F>(
        &self,
        course_id: i64,
        desired: &BTreeSet<i64>,
        update: F,
    ) -> Result<SyncOutcome>
    where
        F: FnOnce(&mut Course) -> Result<bool>,
    {
        let courses = self.store.collection::<Course>();
        let instructors = self.store.collection::<Instructor>();

        let course = courses.get(course_id)?;

        let mut target = BTreeSet::new();
        let mut unknown = Vec::new();
        for &id in desired {
            if instructors.exists(id)? {
                target.insert(id);
            } else {
                unknown.push(id);
            }
        }
        if !unknown.is_empty() {
            log::warn!("Course {course_id}: ignoring unknown instructor id(s) {unknown:?}");
        }

        // Instructors currently mirroring this course, whatever the course says.
        let holders: BTreeSet<i64> = instructors
            .ids_containing("course_ids", course_id)?
            .into_iter()
            .collect();
        let current: BTreeSet<i64> = course.data.instructor_ids.union(&holders).copied().collect();

        let detach: Vec<i64> = holders.difference(&target).copied().collect();
        let attach: Vec<i64> = target.difference(&holders).copied().collect();

        let mut progress = Progress::new("set_course_instructors", detach.len() + attach.len() + 1);

        for &id in &detach {
            progress.record(instructors.modify(id, |i| Ok(i.course_ids.remove(&course_id))))?;
        }
        for &id in &attach {
            progress.record(instructors.modify(id, |i| Ok(i.course_ids.insert(course_id))))?;
        }
        progress.record(courses.modify(course_id, |c| {
            let mut changed = update(c)?;
            if c.instructor_ids != target {
                c.instructor_ids = target.clone();
                changed = true;
            }
            Ok(changed)
        }))?;

        Ok(SyncOutcome {
            added: target.difference(&current).copied().collect(),
            removed: current.difference(&target).copied().collect(),
            unknown,
            writes: progress.applied,
        })
    }

    /// Strip an instructor from every course and department that refers to it.
    /// Safe to call for an instructor that no longer exists.
    pub fn remove_instructor_everywhere(&self, instructor_id: i64) -> Result<DetachOutcome> {
        let courses = self.store.collection::<Course>();
        let departments = self.store.collection::<Department>();

        // Ids come from the index so an unreadable referrer fails its write
        // instead of being passed over.
        let course_ids = courses.ids_containing("instructor_ids", instructor_id)?;
        let department_ids = departments.ids_where("instructor_id", instructor_id)?;

        let mut progress = Progress::new(
            "remove_instructor_everywhere",
            course_ids.len() + department_ids.len(),
        );

        for &id in &course_ids {
            progress.record(courses.modify(id, |c| Ok(c.instructor_ids.remove(&instructor_id))))?;
        }
        for &id in &department_ids {
            progress.record(departments.modify(id, |d| {
                if d.instructor_id != Some(instructor_id) {
                    return Ok(false);
                }
                d.instructor_id = None;
                d.administrator_name = None;
                Ok(true)
            }))?;
        }

        Ok(DetachOutcome {
            courses: course_ids,
            departments: department_ids,
            writes: progress.applied,
        })
    }

    /// Display name to store alongside a department's administrator reference.
    pub fn administrator_for(&self, instructor_id: Option<i64>) -> Result<Option<String>> {
        match instructor_id {
            Some(id) => {
                let instructor = self.store.collection::<Instructor>().get(id)?;
                Ok(Some(instructor.data.full_name()))
            }
            None => Ok(None),
        }
    }

    /// Rewrite the administrator name on every department run by this
    /// instructor. Returns the number of departments rewritten.
    pub fn refresh_administrator_name(&self, instructor_id: i64) -> Result<usize> {
        let name = self
            .store
            .collection::<Instructor>()
            .get(instructor_id)?
            .data
            .full_name();
        let departments = self.store.collection::<Department>();
        let administered = departments.ids_where("instructor_id", instructor_id)?;

        let mut progress = Progress::new("refresh_administrator_name", administered.len());
        for &id in &administered {
            progress.record(departments.modify(id, |d| {
                if d.instructor_id != Some(instructor_id)
                    || d.administrator_name.as_deref() == Some(name.as_str())
                {
                    return Ok(false);
                }
                d.administrator_name = Some(name.clone());
                Ok(true)
            }))?;
        }
        Ok(progress.applied)
    }

    /// Compare derived data against its source and report every mismatch.
    /// With `repair`, rewrite the derived side so the store is consistent.
    pub fn reconcile(&self, repair: bool) -> Result<DriftReport> {
        let courses = self.store.collection::<Course>();
        let instructors = self.store.collection::<Instructor>();
        let departments = self.store.collection::<Department>();

        let course_map: BTreeMap<i64, Course> = courses
            .list()?
            .into_iter()
            .map(|d| (d.data.course_id, d.data))
            .collect();
        let instructor_map: BTreeMap<i64, Instructor> = instructors
            .list()?
            .into_iter()
            .map(|d| (d.data.instructor_id, d.data))
            .collect();
        let department_list: Vec<Department> =
            departments.list()?.into_iter().map(|d| d.data).collect();

        let mut issues = Vec::new();

        // Course side: every listed instructor exists and mirrors the course.
        let mut dangling: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
        for (&course_id, course) in &course_map {
            for &instructor_id in &course.instructor_ids {
                match instructor_map.get(&instructor_id) {
                    None => {
                        issues.push(Drift::DanglingInstructor { course_id, instructor_id });
                        dangling.entry(course_id).or_default().insert(instructor_id);
                    }
                    Some(i) if !i.course_ids.contains(&course_id) => {
                        issues.push(Drift::MissingMirror { course_id, instructor_id });
                    }
                    Some(_) => {}
                }
            }
        }

        // Instructor side: the mirror is exactly the courses listing them.
        let mut expected_mirrors: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
        for (&instructor_id, instructor) in &instructor_map {
            let expected: BTreeSet<i64> = course_map
                .iter()
                .filter(|(_, c)| c.instructor_ids.contains(&instructor_id))
                .map(|(&id, _)| id)
                .collect();
            for &course_id in instructor.course_ids.difference(&expected) {
                issues.push(Drift::StaleMirror { instructor_id, course_id });
            }
            if instructor.course_ids != expected {
                expected_mirrors.insert(instructor_id, expected);
            }
        }

        // Department side: administrator exists and its name is current.
        let mut department_fixes: BTreeMap<i64, (Option<i64>, Option<String>)> = BTreeMap::new();
        for department in &department_list {
            let department_id = department.department_id;
            let expected_name = match department.instructor_id {
                Some(instructor_id) => match instructor_map.get(&instructor_id) {
                    Some(i) => Some(i.full_name()),
                    None => {
                        issues.push(Drift::DanglingAdministrator { department_id, instructor_id });
                        department_fixes.insert(department_id, (None, None));
                        continue;
                    }
                },
                None => None,
            };
            if department.administrator_name != expected_name {
                issues.push(Drift::StaleAdministratorName {
                    department_id,
                    expected: expected_name.clone(),
                    found: department.administrator_name.clone(),
                });
                department_fixes.insert(department_id, (department.instructor_id, expected_name));
            }
        }

        if !repair || issues.is_empty() {
            return Ok(DriftReport { issues, repaired: 0 });
        }

        let mut progress = Progress::new(
            "reconcile",
            dangling.len() + expected_mirrors.len() + department_fixes.len(),
        );

        for (&course_id, gone) in &dangling {
            progress.record(courses.modify(course_id, |c| {
                let before = c.instructor_ids.len();
                c.instructor_ids.retain(|id| !gone.contains(id));
                Ok(c.instructor_ids.len() != before)
            }))?;
        }
        for (&instructor_id, expected) in &expected_mirrors {
            progress.record(instructors.modify(instructor_id, |i| {
                if i.course_ids == *expected {
                    return Ok(false);
                }
                i.course_ids = expected.clone();
                Ok(true)
            }))?;
        }
        for (&department_id, (instructor_id, name)) in &department_fixes {
            progress.record(departments.modify(department_id, |d| {
                if d.instructor_id == *instructor_id && d.administrator_name == *name {
                    return Ok(false);
                }
                d.instructor_id = *instructor_id;
                d.administrator_name = name.clone();
                Ok(true)
            }))?;
        }

        log::info!(
            "Reconcile repaired {} document(s) for {} issue(s)",
            progress.applied,
            issues.len()
        );
        Ok(DriftReport { issues, repaired: progress.applied })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Store) {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path()).unwrap();
        (tmp, store)
    }

    fn add_instructor(store: &Store, id: i64, last: &str) {
        store
            .collection::<Instructor>()
            .insert(Instructor {
                instructor_id: id,
                last_name: last.into(),
                first_mid_name: "Pat".into(),
                hire_date: NaiveDate::from_ymd_opt(2001, 1, 15).unwrap(),
                office_location: None,
                course_ids: BTreeSet::new(),
                concurrency_token: None,
            })
            .unwrap();
    }

    fn add_course(store: &Store, id: i64) {
        store
            .collection::<Course>()
            .insert(Course {
                course_id: id,
                title: format!("Course {id}"),
                credits: 3,
                department_id: 1,
                instructor_ids: BTreeSet::new(),
                concurrency_token: None,
            })
            .unwrap();
    }

    fn add_department(store: &Store, id: i64, admin: Option<i64>, name: Option<&str>) {
        store
            .collection::<Department>()
            .insert(Department {
                department_id: id,
                name: format!("Dept {id}"),
                budget: 1000.0,
                start_date: NaiveDate::from_ymd_opt(2007, 9, 1).unwrap(),
                instructor_id: admin,
                administrator_name: name.map(str::to_string),
                concurrency_token: None,
            })
            .unwrap();
    }

    fn set(ids: &[i64]) -> BTreeSet<i64> {
        ids.iter().copied().collect()
    }

    fn course_ids_of(store: &Store, instructor_id: i64) -> BTreeSet<i64> {
        store.collection::<Instructor>().get(instructor_id).unwrap().data.course_ids
    }

    fn instructor_ids_of(store: &Store, course_id: i64) -> BTreeSet<i64> {
        store.collection::<Course>().get(course_id).unwrap().data.instructor_ids
    }

    #[test]
    fn test_assign_mirrors_both_sides() {
        let (_tmp, store) = setup();
        add_instructor(&store, 5, "Fakhouri");
        add_instructor(&store, 7, "Harui");
        add_course(&store, 4022);

        let sync = Synchronizer::new(&store);
        let outcome = sync.set_course_instructors(4022, &set(&[5, 7])).unwrap();

        assert_eq!(outcome.added, vec![5, 7]);
        assert!(outcome.removed.is_empty());
        assert_eq!(outcome.writes, 3);
        assert_eq!(instructor_ids_of(&store, 4022), set(&[5, 7]));
        assert_eq!(course_ids_of(&store, 5), set(&[4022]));
        assert_eq!(course_ids_of(&store, 7), set(&[4022]));
        assert!(sync.reconcile(false).unwrap().is_consistent());
    }

    #[test]
    fn test_second_identical_call_is_a_no_op() {
        let (_tmp, store) = setup();
        add_instructor(&store, 5, "Fakhouri");
        add_instructor(&store, 7, "Harui");
        add_course(&store, 4022);
        let sync = Synchronizer::new(&store);

        sync.set_course_instructors(4022, &set(&[5, 7])).unwrap();
        let snapshot_course = store.collection::<Course>().get(4022).unwrap().data;
        let snapshot_5 = store.collection::<Instructor>().get(5).unwrap().data;

        let again = sync.set_course_instructors(4022, &set(&[5, 7])).unwrap();
        assert_eq!(again.writes, 0);
        assert!(again.added.is_empty() && again.removed.is_empty());
        // Nothing rewritten, so even the tokens are unchanged
        assert_eq!(store.collection::<Course>().get(4022).unwrap().data, snapshot_course);
        assert_eq!(store.collection::<Instructor>().get(5).unwrap().data, snapshot_5);
    }

    #[test]
    fn test_reassign_detaches_removed_instructors() {
        let (_tmp, store) = setup();
        for (id, name) in [(1, "Abercrombie"), (2, "Fakhouri"), (3, "Harui")] {
            add_instructor(&store, id, name);
        }
        add_course(&store, 1050);
        add_course(&store, 4041);
        let sync = Synchronizer::new(&store);

        sync.set_course_instructors(1050, &set(&[1, 2])).unwrap();
        sync.set_course_instructors(4041, &set(&[2])).unwrap();
        let outcome = sync.set_course_instructors(1050, &set(&[2, 3])).unwrap();

        assert_eq!(outcome.added, vec![3]);
        assert_eq!(outcome.removed, vec![1]);
        assert_eq!(course_ids_of(&store, 1), set(&[]));
        assert_eq!(course_ids_of(&store, 2), set(&[1050, 4041]));
        assert_eq!(course_ids_of(&store, 3), set(&[1050]));
        assert!(sync.reconcile(false).unwrap().is_consistent());
    }

    #[test]
    fn test_unknown_instructors_dropped() {
        let (_tmp, store) = setup();
        add_instructor(&store, 1, "Abercrombie");
        add_course(&store, 1050);

        let outcome = Synchronizer::new(&store)
            .set_course_instructors(1050, &set(&[1, 99]))
            .unwrap();
        assert_eq!(outcome.unknown, vec![99]);
        assert_eq!(instructor_ids_of(&store, 1050), set(&[1]));
    }

    #[test]
    fn test_missing_course_is_not_found() {
        let (_tmp, store) = setup();
        let err = Synchronizer::new(&store)
            .set_course_instructors(1, &set(&[]))
            .unwrap_err();
        assert!(matches!(err, RegistrarError::NotFound { .. }));
    }

    #[test]
    fn test_partial_failure_then_retry_converges() {
        let (tmp, store) = setup();
        add_instructor(&store, 1, "Abercrombie");
        add_instructor(&store, 2, "Fakhouri");
        add_course(&store, 1050);

        // Corrupt instructor 2 so the second write fails
        let key = store.collection::<Instructor>().get(2).unwrap().key;
        let path = tmp.path().join("instructors").join(format!("{key}.yaml"));
        let intact = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, "not: [valid").unwrap();

        let sync = Synchronizer::new(&store);
        let err = sync.set_course_instructors(1050, &set(&[1, 2])).unwrap_err();
        match err {
            RegistrarError::PartialSync { applied, attempted, .. } => {
                assert_eq!(applied, 1);
                assert_eq!(attempted, 3);
            }
            other => panic!("expected PartialSync, got {other:?}"),
        }
        // The first write persisted, the course itself was not updated
        assert_eq!(course_ids_of(&store, 1), set(&[1050]));
        assert_eq!(instructor_ids_of(&store, 1050), set(&[]));
        assert!(!sync.reconcile(false).unwrap().is_consistent());

        std::fs::write(&path, intact).unwrap();
        let outcome = sync.set_course_instructors(1050, &set(&[1, 2])).unwrap();
        assert_eq!(outcome.writes, 2);
        assert_eq!(instructor_ids_of(&store, 1050), set(&[1, 2]));
        assert!(sync.reconcile(false).unwrap().is_consistent());
    }

    #[test]
    fn test_unreadable_course_fails_instructor_removal() {
        let (tmp, store) = setup();
        add_instructor(&store, 1, "Abercrombie");
        add_course(&store, 1050);
        add_course(&store, 4022);
        let sync = Synchronizer::new(&store);
        sync.set_course_instructors(1050, &set(&[1])).unwrap();
        sync.set_course_instructors(4022, &set(&[1])).unwrap();

        let key = store.collection::<Course>().get(4022).unwrap().key;
        let path = tmp.path().join("courses").join(format!("{key}.yaml"));
        let intact = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, "not: [valid").unwrap();

        let err = sync.remove_instructor_everywhere(1).unwrap_err();
        assert!(matches!(
            err,
            RegistrarError::PartialSync { applied: 1, attempted: 2, .. }
        ));

        std::fs::write(&path, intact).unwrap();
        let outcome = sync.remove_instructor_everywhere(1).unwrap();
        assert_eq!(outcome.courses, vec![4022]);
        assert_eq!(instructor_ids_of(&store, 4022), set(&[]));
    }

    #[test]
    fn test_apply_course_keeps_token_until_mirrors_succeed() {
        let (tmp, store) = setup();
        add_instructor(&store, 1, "Abercrombie");
        add_instructor(&store, 2, "Fakhouri");
        add_course(&store, 1050);
        let sync = Synchronizer::new(&store);
        sync.set_course_instructors(1050, &set(&[1])).unwrap();
        let before = store.collection::<Course>().get(1050).unwrap().data;

        let key = store.collection::<Instructor>().get(2).unwrap().key;
        let path = tmp.path().join("instructors").join(format!("{key}.yaml"));
        let intact = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, "not: [valid").unwrap();

        let rename = |c: &mut Course| -> Result<bool> {
            c.title = "Organic Chemistry".into();
            Ok(true)
        };
        let err = sync.apply_course(1050, &set(&[2]), rename).unwrap_err();
        assert!(matches!(err, RegistrarError::PartialSync { applied: 1, .. }));
        // The course itself was not written
        assert_eq!(store.collection::<Course>().get(1050).unwrap().data, before);

        std::fs::write(&path, intact).unwrap();
        let outcome = sync.apply_course(1050, &set(&[2]), rename).unwrap();
        assert_eq!(outcome.writes, 2);
        let after = store.collection::<Course>().get(1050).unwrap().data;
        assert_eq!(after.title, "Organic Chemistry");
        assert_eq!(after.instructor_ids, set(&[2]));
        assert!(sync.reconcile(false).unwrap().is_consistent());
    }

    #[test]
    fn test_remove_instructor_everywhere() {
        let (_tmp, store) = setup();
        add_instructor(&store, 1, "Abercrombie");
        add_instructor(&store, 2, "Fakhouri");
        add_course(&store, 1050);
        add_course(&store, 4022);
        add_department(&store, 3, Some(1), Some("Abercrombie, Pat"));
        add_department(&store, 4, Some(2), Some("Fakhouri, Pat"));
        let sync = Synchronizer::new(&store);
        sync.set_course_instructors(1050, &set(&[1, 2])).unwrap();
        sync.set_course_instructors(4022, &set(&[1])).unwrap();

        let outcome = sync.remove_instructor_everywhere(1).unwrap();
        assert_eq!(outcome.courses, vec![1050, 4022]);
        assert_eq!(outcome.departments, vec![3]);
        assert_eq!(outcome.writes, 3);

        assert_eq!(instructor_ids_of(&store, 1050), set(&[2]));
        assert_eq!(instructor_ids_of(&store, 4022), set(&[]));
        let dept = store.collection::<Department>().get(3).unwrap().data;
        assert_eq!(dept.instructor_id, None);
        assert_eq!(dept.administrator_name, None);
        let untouched = store.collection::<Department>().get(4).unwrap().data;
        assert_eq!(untouched.instructor_id, Some(2));

        // Idempotent
        assert_eq!(sync.remove_instructor_everywhere(1).unwrap().writes, 0);
    }

    #[test]
    fn test_refresh_administrator_name() {
        let (_tmp, store) = setup();
        add_instructor(&store, 1, "Abercrombie");
        add_department(&store, 3, Some(1), Some("Abercrombie, Pat"));
        add_department(&store, 4, None, None);

        store
            .collection::<Instructor>()
            .modify(1, |i| {
                i.last_name = "Abercrombie-Smith".into();
                Ok(true)
            })
            .unwrap();

        let sync = Synchronizer::new(&store);
        assert_eq!(sync.refresh_administrator_name(1).unwrap(), 1);
        assert_eq!(
            store.collection::<Department>().get(3).unwrap().data.administrator_name,
            Some("Abercrombie-Smith, Pat".to_string())
        );
        assert_eq!(sync.refresh_administrator_name(1).unwrap(), 0);
        assert_eq!(
            sync.administrator_for(Some(1)).unwrap(),
            Some("Abercrombie-Smith, Pat".to_string())
        );
        assert_eq!(sync.administrator_for(None).unwrap(), None);
        assert!(sync.administrator_for(Some(42)).is_err());
    }

    #[test]
    fn test_reconcile_detects_and_repairs_drift() {
        let (_tmp, store) = setup();
        add_instructor(&store, 1, "Abercrombie");
        add_instructor(&store, 2, "Fakhouri");
        add_course(&store, 1050);
        add_course(&store, 4022);
        add_department(&store, 3, Some(1), Some("Somebody Else"));
        add_department(&store, 4, Some(77), Some("Ghost"));

        // Hand-made drift: course lists 1 and a ghost, instructor 2 claims 4022
        store
            .collection::<Course>()
            .modify(1050, |c| {
                c.instructor_ids = set(&[1, 99]);
                Ok(true)
            })
            .unwrap();
        store
            .collection::<Instructor>()
            .modify(2, |i| {
                i.course_ids = set(&[4022]);
                Ok(true)
            })
            .unwrap();

        let sync = Synchronizer::new(&store);
        let report = sync.reconcile(false).unwrap();
        assert_eq!(
            report.issues,
            vec![
                Drift::MissingMirror { course_id: 1050, instructor_id: 1 },
                Drift::DanglingInstructor { course_id: 1050, instructor_id: 99 },
                Drift::StaleMirror { instructor_id: 2, course_id: 4022 },
                Drift::StaleAdministratorName {
                    department_id: 3,
                    expected: Some("Abercrombie, Pat".into()),
                    found: Some("Somebody Else".into()),
                },
                Drift::DanglingAdministrator { department_id: 4, instructor_id: 77 },
            ]
        );
        assert_eq!(report.repaired, 0);

        let repaired = sync.reconcile(true).unwrap();
        assert_eq!(repaired.issues.len(), 5);
        assert_eq!(repaired.repaired, 5);

        assert!(sync.reconcile(false).unwrap().is_consistent());
        assert_eq!(instructor_ids_of(&store, 1050), set(&[1]));
        assert_eq!(course_ids_of(&store, 1), set(&[1050]));
        assert_eq!(course_ids_of(&store, 2), set(&[]));
        let ghost = store.collection::<Department>().get(4).unwrap().data;
        assert_eq!((ghost.instructor_id, ghost.administrator_name), (None, None));
    }
}
