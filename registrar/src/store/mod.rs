use crate::config::StoreConfig;
use crate::document::{self, Document, DOCUMENT_EXTENSION};
use crate::error::{RegistrarError, Result};
use crate::model::{self, Course, Department, Enrollment, Entity, Instructor, Student};
use crate::system_db::{compute_directory_hash, SystemDb};
use chrono::Utc;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The embedded document store.
///
/// Opens a data directory, maintains the `_system.db` index and hands out
/// typed collection handles. Every write touches exactly one document and is
/// serialized against other handles on the same directory by an immediate
/// SQLite transaction; nothing here spans documents.
pub struct Store {
    root: PathBuf,
    config: StoreConfig,
    db: SystemDb,
}

impl Store {
    /// Open a store at the given data directory, reading `registrar.yaml` if present.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(RegistrarError::Config(format!(
                "Data directory does not exist: {}",
                root.display()
            )));
        }
        let config = StoreConfig::load(&root)?;
        Self::open_with_config(root, config)
    }

    /// Open a store with an explicit config (ignores any `registrar.yaml`).
    pub fn open_with_config(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(RegistrarError::Config(format!(
                "Data directory does not exist: {}",
                root.display()
            )));
        }

        let db = SystemDb::open(
            &root.join("_system.db"),
            Duration::from_millis(config.busy_timeout_ms),
        )?;

        let store = Store { root, config, db };
        store.boot()?;
        Ok(store)
    }

    /// Boot lifecycle: re-index any collection whose directory changed since
    /// the last recorded hash.
    fn boot(&self) -> Result<()> {
        for name in model::COLLECTIONS {
            std::fs::create_dir_all(self.root.join(name))?;
            let stored_hash = self.db.get_directory_hash(name)?;
            let current_hash = self.compute_collection_hash(name)?;
            if stored_hash.as_deref() != Some(current_hash.as_str()) {
                self.scan_by_name(name)?;
            }
        }
        Ok(())
    }

    /// Force re-indexing from disk, optionally for a single collection.
    pub fn rebuild(&self, collection: Option<&str>) -> Result<()> {
        match collection {
            Some(name) => self.scan_by_name(name).map(|_| ()),
            None => {
                for name in model::COLLECTIONS {
                    self.scan_by_name(name)?;
                }
                Ok(())
            }
        }
    }

    fn scan_by_name(&self, name: &str) -> Result<usize> {
        match name {
            model::STUDENTS => self.scan_collection::<Student>(),
            model::INSTRUCTORS => self.scan_collection::<Instructor>(),
            model::DEPARTMENTS => self.scan_collection::<Department>(),
            model::COURSES => self.scan_collection::<Course>(),
            model::ENROLLMENTS => self.scan_collection::<Enrollment>(),
            other => Err(RegistrarError::Other(format!(
                "Collection '{other}' does not exist"
            ))),
        }
    }

    /// Scan a single collection: read all files, replace its index rows.
    fn scan_collection<T: Entity>(&self) -> Result<usize> {
        let name = T::COLLECTION;
        self.write_txn(|| {
            self.db.delete_collection_documents(name)?;

            let mut indexed = 0;
            for file_path in self.collection_files(name)? {
                let doc: Document<T> = match document::read_document(&file_path) {
                    Ok(doc) => doc,
                    Err(e) => {
                        log::warn!("Skipping unreadable document {}: {}", file_path.display(), e);
                        continue;
                    }
                };
                let id = doc.data.id();
                if let Some(existing) = self.db.get_document(name, id)? {
                    log::warn!(
                        "Duplicate {name} id {id} in {} and {}; keeping the later file",
                        existing.path,
                        doc.key
                    );
                }
                let rel_path = relative_path(name, &doc.key);
                self.db
                    .upsert_document(name, &doc.key, id, &rel_path, &serde_json::to_value(&doc.data)?)?;
                indexed += 1;
            }

            let hash = self.compute_collection_hash(name)?;
            self.db.set_directory_hash(name, &hash)?;
            log::info!("Indexed {indexed} document(s) in '{name}'");
            Ok(indexed)
        })
    }

    fn collection_files(&self, name: &str) -> Result<Vec<PathBuf>> {
        let pattern = format!(
            "{}/*.{}",
            self.root.join(name).display(),
            DOCUMENT_EXTENSION
        );
        let files = glob::glob(&pattern)
            .map_err(|e| RegistrarError::Other(format!("Glob error: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(files)
    }

    /// Compute the current directory hash for a collection
    fn compute_collection_hash(&self, name: &str) -> Result<String> {
        let mut entries = Vec::new();
        for file_path in self.collection_files(name)? {
            let mtime = std::fs::metadata(&file_path)?
                .modified()?
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            entries.push((
                file_path
                    .file_name()
                    .unwrap_or_default()
                    .to_string_lossy()
                    .to_string(),
                mtime,
            ));
        }
        Ok(compute_directory_hash(&entries))
    }

    /// Run `f` inside an immediate transaction; roll back if it fails.
    pub(crate) fn write_txn<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        self.db.begin_immediate()?;
        let outcome = f().and_then(|value| self.db.commit().map(|_| value));
        if outcome.is_err() {
            if let Err(rb) = self.db.rollback() {
                log::warn!("Rollback failed: {rb}");
            }
        }
        outcome
    }

    /// Called inside the write transaction after any document write.
    fn post_write(&self, collection_name: &str) -> Result<()> {
        let hash = self.compute_collection_hash(collection_name)?;
        self.db.set_directory_hash(collection_name, &hash)?;
        Ok(())
    }

    /// Get a typed collection handle.
    pub fn collection<T: Entity>(&self) -> Collection<'_, T> {
        Collection {
            store: self,
            _entity: PhantomData,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn db(&self) -> &SystemDb {
        &self.db
    }

    /// Collection sizes and counter values.
    pub fn status(&self) -> Result<serde_json::Value> {
        let mut collections = serde_json::Map::new();
        for name in model::COLLECTIONS {
            collections.insert(
                name.to_string(),
                serde_json::json!({ "count": self.db.count_documents(name)? }),
            );
        }

        let mut counters = serde_json::Map::new();
        for (name, value) in self.db.list_counters()? {
            counters.insert(name, serde_json::Value::from(value));
        }

        Ok(serde_json::json!({
            "root": self.root.display().to_string(),
            "collections": collections,
            "counters": counters,
        }))
    }
}

fn relative_path(collection: &str, key: &str) -> String {
    format!("{collection}/{key}.{DOCUMENT_EXTENSION}")
}

/// Result of [`Collection::modify`].
#[derive(Debug, Clone)]
pub struct Modified<T> {
    pub document: Document<T>,
    /// False when the mutation reported no change and nothing was written.
    pub written: bool,
}

/// A typed handle to one collection within a store.
pub struct Collection<'a, T> {
    store: &'a Store,
    _entity: PhantomData<T>,
}

impl<'a, T: Entity> Collection<'a, T> {
    pub fn name(&self) -> &'static str {
        T::COLLECTION
    }

    fn load(&self, path: &str) -> Result<Document<T>> {
        document::read_document(&self.store.root.join(path))
    }

    /// Get a document by business id, or `None` if absent.
    pub fn find(&self, id: i64) -> Result<Option<Document<T>>> {
        match self.store.db.get_document(T::COLLECTION, id)? {
            Some(record) => self.load(&record.path).map(Some),
            None => Ok(None),
        }
    }

    /// Get a document by business id.
    pub fn get(&self, id: i64) -> Result<Document<T>> {
        self.find(id)?
            .ok_or_else(|| RegistrarError::not_found(T::COLLECTION, id))
    }

    pub fn exists(&self, id: i64) -> Result<bool> {
        Ok(self.store.db.get_document(T::COLLECTION, id)?.is_some())
    }

    /// All documents, ascending business id.
    pub fn list(&self) -> Result<Vec<Document<T>>> {
        let records = self.store.db.list_documents(T::COLLECTION)?;
        self.load_all(records.iter().map(|r| r.path.as_str()))
    }

    /// Documents whose integer `field` equals `value`, ascending business id.
    pub fn find_where(&self, field: &str, value: i64) -> Result<Vec<Document<T>>> {
        let records = self.store.db.find_by_field(T::COLLECTION, field, value)?;
        self.load_all(records.iter().map(|r| r.path.as_str()))
    }

    /// Documents whose integer-set `field` contains `value`, ascending business id.
    pub fn find_containing(&self, field: &str, value: i64) -> Result<Vec<Document<T>>> {
        let records = self.store.db.find_containing(T::COLLECTION, field, value)?;
        self.load_all(records.iter().map(|r| r.path.as_str()))
    }

    pub fn count_where(&self, field: &str, value: i64) -> Result<usize> {
        self.store.db.count_by_field(T::COLLECTION, field, value)
    }

    /// Business ids of `find_where` matches, read from the index only.
    ///
    /// Unlike the document-returning queries this never skips an entry whose
    /// file is unreadable, so callers that must touch every referrer see them all.
    pub fn ids_where(&self, field: &str, value: i64) -> Result<Vec<i64>> {
        let records = self.store.db.find_by_field(T::COLLECTION, field, value)?;
        Ok(records.into_iter().map(|r| r.business_id).collect())
    }

    /// Business ids of `find_containing` matches, read from the index only.
    pub fn ids_containing(&self, field: &str, value: i64) -> Result<Vec<i64>> {
        let records = self.store.db.find_containing(T::COLLECTION, field, value)?;
        Ok(records.into_iter().map(|r| r.business_id).collect())
    }

    fn load_all<'p>(&self, paths: impl Iterator<Item = &'p str>) -> Result<Vec<Document<T>>> {
        let mut docs = Vec::new();
        for path in paths {
            match self.load(path) {
                Ok(doc) => docs.push(doc),
                Err(e) => {
                    log::warn!("Failed to read document {path}: {e}");
                }
            }
        }
        Ok(docs)
    }

    /// Insert a new document. Fails with `AlreadyExists` if the business id is taken.
    pub fn insert(&self, mut data: T) -> Result<Document<T>> {
        let id = data.id();
        self.store.write_txn(|| {
            if self.store.db.get_document(T::COLLECTION, id)?.is_some() {
                return Err(RegistrarError::AlreadyExists {
                    collection: T::COLLECTION.to_string(),
                    id: id.to_string(),
                });
            }

            data.stamp_version();
            let doc = Document::new(data);
            let rel_path = relative_path(T::COLLECTION, &doc.key);
            document::write_document(&self.store.root.join(&rel_path), &doc)?;
            self.store.db.upsert_document(
                T::COLLECTION,
                &doc.key,
                id,
                &rel_path,
                &serde_json::to_value(&doc.data)?,
            )?;
            self.store.post_write(T::COLLECTION)?;

            log::debug!("Inserted {}/{}", T::COLLECTION, id);
            Ok(doc)
        })
    }

    /// Atomic read-modify-write of one document.
    ///
    /// `mutate` sees the current data and returns whether it changed anything.
    /// An error from `mutate` aborts without writing; an unchanged document is
    /// not rewritten and keeps its concurrency token.
    pub fn modify<F>(&self, id: i64, mutate: F) -> Result<Modified<T>>
    where
        F: FnOnce(&mut T) -> Result<bool>,
    {
        self.store.write_txn(|| {
            let record = self
                .store
                .db
                .get_document(T::COLLECTION, id)?
                .ok_or_else(|| RegistrarError::not_found(T::COLLECTION, id))?;
            let mut doc = self.load(&record.path)?;

            if !mutate(&mut doc.data)? {
                return Ok(Modified { document: doc, written: false });
            }
            if doc.data.id() != id {
                return Err(RegistrarError::Validation(format!(
                    "{}/{} cannot change its id to {}",
                    T::COLLECTION,
                    id,
                    doc.data.id()
                )));
            }

            doc.data.stamp_version();
            doc.modified_at = Utc::now();
            document::write_document(&self.store.root.join(&record.path), &doc)?;
            self.store.db.upsert_document(
                T::COLLECTION,
                &doc.key,
                id,
                &record.path,
                &serde_json::to_value(&doc.data)?,
            )?;
            self.store.post_write(T::COLLECTION)?;

            log::debug!("Modified {}/{}", T::COLLECTION, id);
            Ok(Modified { document: doc, written: true })
        })
    }

    /// Delete a document by business id. No reference checks happen here.
    pub fn delete(&self, id: i64) -> Result<()> {
        self.store.write_txn(|| {
            let record = self
                .store
                .db
                .get_document(T::COLLECTION, id)?
                .ok_or_else(|| RegistrarError::not_found(T::COLLECTION, id))?;

            document::delete_document(&self.store.root.join(&record.path))?;
            self.store.db.delete_document(T::COLLECTION, id)?;
            self.store.post_write(T::COLLECTION)?;

            log::debug!("Deleted {}/{}", T::COLLECTION, id);
            Ok(())
        })
    }
}
