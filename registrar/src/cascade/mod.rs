//! Delete-time guards and cascades.
//!
//! Guards run before anything is written; a blocked delete leaves the store
//! untouched. The check and the delete are separate steps, so a dependent
//! created in between is not seen. `reconcile` reports what that leaves behind.

use crate::error::{RegistrarError, Result};
use crate::model::{Course, Department, Enrollment, Entity, Instructor, Student};
use crate::store::Store;
use crate::sync::Synchronizer;
use serde::Serialize;
use std::collections::BTreeSet;

/// What an allowed delete did besides removing the record itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub collection: &'static str,
    pub id: i64,
    /// Dependent documents rewritten or removed before the delete.
    pub cascaded: usize,
}

pub struct CascadeEngine<'a> {
    store: &'a Store,
}

impl<'a> CascadeEngine<'a> {
    pub fn new(store: &'a Store) -> Self {
        CascadeEngine { store }
    }

    fn sync(&self) -> Synchronizer<'a> {
        Synchronizer::new(self.store)
    }

    // ── Guards ──────────────────────────────────────────────────────

    /// False if any course belongs to the department.
    pub fn can_delete_department(&self, id: i64) -> Result<bool> {
        Ok(self.course_count(id)? == 0)
    }

    /// False if any enrollment refers to the course.
    pub fn can_delete_course(&self, id: i64) -> Result<bool> {
        Ok(self.enrollment_count(id)? == 0)
    }

    fn course_count(&self, department_id: i64) -> Result<usize> {
        self.store
            .collection::<Course>()
            .count_where("department_id", department_id)
    }

    fn enrollment_count(&self, course_id: i64) -> Result<usize> {
        self.store
            .collection::<Enrollment>()
            .count_where("course_id", course_id)
    }

    fn require<T: Entity>(&self, id: i64) -> Result<()> {
        if self.store.collection::<T>().exists(id)? {
            Ok(())
        } else {
            Err(RegistrarError::not_found(T::COLLECTION, id))
        }
    }

    // ── Deletes ─────────────────────────────────────────────────────

    /// Always permitted. Strips the instructor from every course and
    /// department first.
    pub fn delete_instructor(&self, id: i64) -> Result<DeleteOutcome> {
        self.require::<Instructor>(id)?;
        let detached = self.sync().remove_instructor_everywhere(id)?;
        finish::<Instructor>(self.store, id, detached.writes)
    }

    /// Blocked while enrollments exist; otherwise detaches every instructor.
    pub fn delete_course(&self, id: i64) -> Result<DeleteOutcome> {
        self.require::<Course>(id)?;
        let dependents = self.enrollment_count(id)?;
        if dependents > 0 {
            return Err(blocked::<Course, Enrollment>(id, dependents));
        }
        let detached = self.sync().set_course_instructors(id, &BTreeSet::new())?;
        finish::<Course>(self.store, id, detached.writes)
    }

    /// Blocked while courses belong to the department.
    pub fn delete_department(&self, id: i64) -> Result<DeleteOutcome> {
        self.require::<Department>(id)?;
        let dependents = self.course_count(id)?;
        if dependents > 0 {
            return Err(blocked::<Department, Course>(id, dependents));
        }
        finish::<Department>(self.store, id, 0)
    }

    /// Removes the student's enrollments, then the student.
    pub fn delete_student(&self, id: i64) -> Result<DeleteOutcome> {
        self.require::<Student>(id)?;
        let enrollments = self.store.collection::<Enrollment>();
        let mut removed = 0;
        // Deleting only needs the index row, so unreadable files are removed too
        for enrollment_id in enrollments.ids_where("student_id", id)? {
            match enrollments.delete(enrollment_id) {
                Ok(()) => removed += 1,
                // Already gone is fine; a retry may be finishing an earlier run
                Err(RegistrarError::NotFound { .. }) => {}
                Err(e) => return Err(partial(removed, e)),
            }
        }
        finish::<Student>(self.store, id, removed)
    }

    pub fn delete_enrollment(&self, id: i64) -> Result<DeleteOutcome> {
        self.require::<Enrollment>(id)?;
        finish::<Enrollment>(self.store, id, 0)
    }
}

fn finish<T: Entity>(store: &Store, id: i64, cascaded: usize) -> Result<DeleteOutcome> {
    store
        .collection::<T>()
        .delete(id)
        .map_err(|e| partial(cascaded, e))?;
    log::info!(
        "Deleted {}/{} ({} dependent write(s))",
        T::COLLECTION,
        id,
        cascaded
    );
    Ok(DeleteOutcome { collection: T::COLLECTION, id, cascaded })
}

fn partial(applied: usize, source: RegistrarError) -> RegistrarError {
    if applied == 0 {
        return source;
    }
    log::error!("Delete failed after {applied} dependent write(s): {source}");
    RegistrarError::PartialSync {
        applied,
        attempted: applied + 1,
        source: Box::new(source),
    }
}

fn blocked<T: Entity, D: Entity>(id: i64, dependents: usize) -> RegistrarError {
    log::info!(
        "Refusing to delete {}/{}: {} dependent(s) in {}",
        T::COLLECTION,
        id,
        dependents,
        D::COLLECTION
    );
    RegistrarError::HasDependents {
        collection: T::COLLECTION.to_string(),
        id: id.to_string(),
        dependent_collection: D::COLLECTION.to_string(),
        dependents,
    }
}
