//! A question bank rooted in a directory
//!
//! The [`Store`] is the single entry point for reading and mutating a bank.
//! It re-reads the backend on every call; the only state it keeps is the
//! configuration and a table of per-subject locks that serialise writers.

use std::{
    collections::{BTreeSet, HashMap},
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::{
    domain::{Config, ImageSlot, Question, QuestionData, Segment, Subject, SubjectData, Topic},
    export::{Bundle, EncodedImage, export, mime_for_name},
    storage::{
        Listing, StoreError,
        backend::Storage,
        document::{encode_question, encode_subject, find_image},
        loader::{self, is_image_name, read_question, read_question_document},
        migrator::{TopicRemap, cascade},
        path_resolver::{
            QUESTION_FILE, config_file, question_dir, question_file, questions_dir,
            resolve_relative, subject_file, unprocessed_dir,
        },
    },
};

/// A question bank stored below `root` in a [`Storage`] backend.
pub struct Store<S> {
    root: PathBuf,
    storage: S,
    config: Config,
    locks: Mutex<HashMap<Segment, Arc<Mutex<()>>>>,
}

/// The outcome of a successful subject save.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SavedSubject {
    /// Ids of the questions whose topic references were rewritten.
    pub rewritten: Vec<String>,
}

impl<S: Storage> Store<S> {
    /// Open the bank rooted at `root`.
    ///
    /// The configuration is read from `.qbank/config.toml`; if it is missing
    /// or cannot be parsed, defaults are used.
    pub fn open(storage: S, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let config = load_config(&storage, &root);
        Self {
            root,
            storage,
            config,
            locks: Mutex::default(),
        }
    }

    /// Root directory of the bank.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The loaded configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The storage backend.
    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    fn subject_lock(&self, code: &Segment) -> Arc<Mutex<()>> {
        self.locks.lock().entry(code.clone()).or_default().clone()
    }

    /// Load every subject, with its questions and intake images.
    ///
    /// # Errors
    ///
    /// Fails only if the root cannot be listed.
    pub fn list_subjects(&self) -> Result<Listing<Subject>, StoreError> {
        loader::list_subjects(&self.storage, &self.root, self.config.max_walk_depth())
    }

    /// Load a single subject.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the subject has no `subject.json`,
    /// [`StoreError::Corrupt`] if the document is malformed.
    pub fn load_subject(&self, code: &str) -> Result<(Subject, Vec<loader::Skipped>), StoreError> {
        let code = Segment::try_from(code)?;
        let data = loader::read_subject(&self.storage, &self.root, &code)?;
        let questions = loader::list_questions(&self.storage, &questions_dir(&self.root, &code));
        let unprocessed_images = loader::walk_unprocessed_images(
            &self.storage,
            &unprocessed_dir(&self.root, &code),
            self.config.max_walk_depth(),
        );
        let subject = Subject {
            code: code.to_string(),
            data,
            questions: questions.items,
            unprocessed_images,
        };
        Ok((subject, questions.skipped))
    }

    /// Read a subject's document without loading its questions.
    ///
    /// # Errors
    ///
    /// As [`Store::load_subject`].
    pub fn read_subject(&self, code: &str) -> Result<SubjectData, StoreError> {
        loader::read_subject(&self.storage, &self.root, &Segment::try_from(code)?)
    }

    /// Load the questions of a subject. A subject without questions yields an
    /// empty listing.
    ///
    /// # Errors
    ///
    /// Fails only if the subject code is not a valid path segment.
    pub fn list_questions(&self, code: &str) -> Result<Listing<Question>, StoreError> {
        let code = Segment::try_from(code)?;
        Ok(loader::list_questions(
            &self.storage,
            &questions_dir(&self.root, &code),
        ))
    }

    /// Load a single question.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the question has no `question.json`.
    pub fn load_question(&self, code: &str, id: &str) -> Result<Question, StoreError> {
        let code = Segment::try_from(code)?;
        let id = Segment::try_from(id)?;
        let dir = question_dir(&self.root, &code, &id);
        read_question(&self.storage, &dir, &id)?
            .ok_or_else(|| StoreError::NotFound(question_file(&self.root, &code, &id)))
    }

    /// Create or replace a question document.
    ///
    /// The document is written as given, except that an image slot the
    /// payload leaves empty keeps the asset already stored next to it: the
    /// previous reference if that file still exists, otherwise a file named
    /// by the slot's convention. The question directory is created if needed.
    ///
    /// # Errors
    ///
    /// Fails if either name is invalid or the document cannot be written.
    #[tracing::instrument(level = "debug", skip(self, data))]
    pub fn save_question(&self, code: &str, id: &str, data: &QuestionData) -> Result<(), StoreError> {
        let code = Segment::try_from(code)?;
        let id = Segment::try_from(id)?;
        let lock = self.subject_lock(&code);
        let _guard = lock.lock();

        let dir = question_dir(&self.root, &code, &id);
        self.storage
            .create_dir(&dir)
            .map_err(|e| StoreError::io(&dir, e))?;

        let mut data = data.clone();
        self.keep_image_refs(&dir, &mut data)?;

        let path = dir.join(QUESTION_FILE);
        self.storage
            .write(&path, &encode_question(&data))
            .map_err(|e| StoreError::io(&path, e))?;

        tracing::info!("Saved question {code}/{id}");
        Ok(())
    }

    fn keep_image_refs(&self, dir: &Path, data: &mut QuestionData) -> Result<(), StoreError> {
        let empty = [ImageSlot::Image, ImageSlot::QuizImage]
            .into_iter()
            .filter(|slot| data.image_ref(*slot).is_none())
            .collect::<Vec<_>>();
        if empty.is_empty() {
            return Ok(());
        }

        let siblings: Vec<String> = self
            .storage
            .list(dir)
            .map_err(|e| StoreError::io(dir, e))?
            .into_iter()
            .filter(|entry| !entry.is_dir && entry.name != QUESTION_FILE)
            .map(|entry| entry.name)
            .collect();
        let persisted = match read_question_document(&self.storage, dir) {
            Ok(document) => document.map(|(question, _)| question),
            Err(e) => {
                tracing::debug!("Ignoring previous document in {}: {e}", dir.display());
                None
            }
        };

        for slot in empty {
            let previous = persisted
                .as_ref()
                .and_then(|question| question.image_ref(slot))
                .filter(|name| siblings.iter().any(|sibling| sibling.as_str() == *name))
                .map(ToString::to_string);
            let kept = previous.or_else(|| find_image(&siblings, slot));
            if let Some(name) = &kept {
                tracing::debug!("Keeping {name} in {}", dir.display());
            }
            data.set_image_ref(slot, kept);
        }
        Ok(())
    }

    /// Remove a question directory and everything in it.
    ///
    /// Deleting a question that does not exist succeeds.
    ///
    /// # Errors
    ///
    /// Fails if either name is invalid or the directory cannot be removed.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn delete_question(&self, code: &str, id: &str) -> Result<(), StoreError> {
        let code = Segment::try_from(code)?;
        let id = Segment::try_from(id)?;
        let lock = self.subject_lock(&code);
        let _guard = lock.lock();

        let dir = question_dir(&self.root, &code, &id);
        match self.storage.delete(&dir) {
            Ok(()) => {
                tracing::info!("Deleted question {code}/{id}");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("Question {code}/{id} already absent");
                Ok(())
            }
            Err(e) => Err(StoreError::io(&dir, e)),
        }
    }

    /// Create or replace a subject document, cascading topic id changes into
    /// its questions.
    ///
    /// Topics are matched against `original_topics` when given, otherwise
    /// against the currently persisted document. If any question cannot be
    /// rewritten the subject document is left untouched, so the save can
    /// simply be retried.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Validation`] for empty or duplicate topic ids, or
    ///   ambiguous topic names. Nothing is written in that case.
    /// - [`StoreError::Cascade`] if some questions could not be rewritten.
    /// - [`StoreError::Io`] if a directory or the subject document cannot be
    ///   written.
    #[tracing::instrument(level = "debug", skip(self, data, original_topics))]
    pub fn save_subject(
        &self,
        code: &str,
        data: &SubjectData,
        original_topics: Option<&[Topic]>,
    ) -> Result<SavedSubject, StoreError> {
        let code = Segment::try_from(code)?;
        validate_topics(&data.topics)?;

        let lock = self.subject_lock(&code);
        let _guard = lock.lock();
        self.save_subject_locked(&code, data, original_topics)
    }

    /// [`Store::save_subject`] for a caller already holding the subject lock.
    fn save_subject_locked(
        &self,
        code: &Segment,
        data: &SubjectData,
        original_topics: Option<&[Topic]>,
    ) -> Result<SavedSubject, StoreError> {
        let persisted;
        let prior: &[Topic] = match original_topics {
            Some(topics) => topics,
            None => {
                persisted = self.persisted_topics(code);
                &persisted
            }
        };
        let remap = TopicRemap::plan(prior, &data.topics)
            .map_err(|e| StoreError::Validation(e.to_string()))?;
        for (old, new) in remap.iter() {
            tracing::debug!("Topic id {old} of {code} becomes {new}");
        }

        let questions = questions_dir(&self.root, code);
        self.storage
            .create_dir(&questions)
            .map_err(|e| StoreError::io(&questions, e))?;

        let report = cascade(&self.storage, &questions, &remap).inspect_err(|e| {
            for (path, error) in e.failures() {
                tracing::warn!("Cannot rewrite {}: {error}", path.display());
            }
        })?;

        let path = subject_file(&self.root, code);
        self.storage
            .write(&path, &encode_subject(data))
            .map_err(|e| StoreError::io(&path, e))?;

        tracing::info!(
            "Saved subject {code} ({} question(s) rewritten)",
            report.rewritten.len()
        );
        Ok(SavedSubject {
            rewritten: report.rewritten,
        })
    }

    fn persisted_topics(&self, code: &Segment) -> Vec<Topic> {
        match loader::read_subject(&self.storage, &self.root, code) {
            Ok(subject) => subject.topics,
            Err(StoreError::NotFound(_)) => Vec::new(),
            Err(e) => {
                tracing::warn!("Cannot read prior topics of {code}: {e}");
                Vec::new()
            }
        }
    }

    /// Give a topic a fresh id and rewrite every question referencing it.
    ///
    /// Returns the new id.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the subject or topic does not exist, and any
    /// error of [`Store::save_subject`].
    pub fn regenerate_topic_id(&self, code: &str, topic_id: &str) -> Result<String, StoreError> {
        let code = Segment::try_from(code)?;
        let lock = self.subject_lock(&code);
        let _guard = lock.lock();

        let mut data = loader::read_subject(&self.storage, &self.root, &code)?;
        let prior = data.topics.clone();

        let new_id = Uuid::new_v4().to_string();
        let topic = data
            .topics
            .iter_mut()
            .find(|topic| topic.id == topic_id)
            .ok_or_else(|| StoreError::NotFound(subject_file(&self.root, &code).join(topic_id)))?;
        topic.id.clone_from(&new_id);

        self.save_subject_locked(&code, &data, Some(&prior))?;
        tracing::info!("Regenerated topic {topic_id} of {code} as {new_id}");
        Ok(new_id)
    }

    /// Store an uploaded image for one of a question's slots.
    ///
    /// The asset is saved as `image.<ext>` or `quizImage.<ext>`, replacing any
    /// previous asset of that slot. If the question document exists its
    /// reference is updated. Returns the stored filename.
    ///
    /// # Errors
    ///
    /// [`StoreError::Validation`] if `filename` is not an image, otherwise
    /// any I/O error.
    #[tracing::instrument(level = "debug", skip(self, bytes))]
    pub fn save_image(
        &self,
        code: &str,
        id: &str,
        slot: ImageSlot,
        filename: &str,
        bytes: &[u8],
    ) -> Result<String, StoreError> {
        let code = Segment::try_from(code)?;
        let id = Segment::try_from(id)?;
        if !is_image_name(filename) {
            return Err(StoreError::Validation(format!(
                "{filename} is not a supported image"
            )));
        }
        let extension = Path::new(filename)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let stored = format!("{}.{extension}", slot.file_stem());

        let lock = self.subject_lock(&code);
        let _guard = lock.lock();

        let dir = question_dir(&self.root, &code, &id);
        self.storage
            .create_dir(&dir)
            .map_err(|e| StoreError::io(&dir, e))?;

        let previous = self.storage.list(&dir).map_err(|e| StoreError::io(&dir, e))?;
        for entry in previous {
            let same_slot = Path::new(&entry.name)
                .file_stem()
                .is_some_and(|stem| stem == slot.file_stem());
            if !entry.is_dir && same_slot && entry.name != stored {
                let path = dir.join(&entry.name);
                self.storage
                    .delete(&path)
                    .map_err(|e| StoreError::io(&path, e))?;
            }
        }

        let path = dir.join(&stored);
        self.storage
            .write(&path, bytes)
            .map_err(|e| StoreError::io(&path, e))?;

        if let Some((mut question, _)) = read_question_document(&self.storage, &dir)? {
            if question.image_ref(slot) != Some(stored.as_str()) {
                question.set_image_ref(slot, Some(stored.clone()));
                let path = dir.join(QUESTION_FILE);
                self.storage
                    .write(&path, &encode_question(&question))
                    .map_err(|e| StoreError::io(&path, e))?;
            }
        }

        tracing::info!("Stored {stored} for question {code}/{id}");
        Ok(stored)
    }

    /// Read an image by its path relative to the root.
    ///
    /// # Errors
    ///
    /// [`StoreError::Validation`] if the path escapes the root or is not an
    /// image, [`StoreError::NotFound`] if it does not exist.
    pub fn read_image(&self, relative: &Path) -> Result<EncodedImage, StoreError> {
        let path = resolve_relative(&self.root, relative)?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !is_image_name(&name) {
            return Err(StoreError::Validation(format!(
                "{} is not a supported image",
                relative.display()
            )));
        }
        let bytes = self
            .storage
            .read(&path)
            .map_err(|e| StoreError::io(&path, e))?;
        Ok(EncodedImage {
            bytes,
            mime: mime_for_name(&name),
        })
    }

    /// Delete a single file by its path relative to the root.
    ///
    /// # Errors
    ///
    /// [`StoreError::Validation`] if the path escapes the root or names a
    /// directory, [`StoreError::NotFound`] if it does not exist.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn delete_file(&self, relative: &Path) -> Result<(), StoreError> {
        let path = resolve_relative(&self.root, relative)?;
        if self.storage.list(&path).is_ok() {
            return Err(StoreError::Validation(format!(
                "{} is a directory",
                relative.display()
            )));
        }

        let subject = relative
            .components()
            .next()
            .and_then(|c| Segment::try_from(c.as_os_str().to_string_lossy().as_ref()).ok());
        let lock = subject.map(|code| self.subject_lock(&code));
        let _guard = lock.as_ref().map(|lock| lock.lock());

        self.storage
            .delete(&path)
            .map_err(|e| StoreError::io(&path, e))?;
        tracing::info!("Deleted {}", relative.display());
        Ok(())
    }

    /// Build a self-contained export bundle with images re-encoded at
    /// `quality` (the configured default when `None`).
    ///
    /// # Errors
    ///
    /// Fails only if the root cannot be listed.
    pub fn export(&self, quality: Option<u8>) -> Result<Bundle, StoreError> {
        let quality = quality.map_or(self.config.image_quality(), |q| q.min(100));
        export(&self.storage, &self.root, &self.config, quality)
    }

}

fn load_config<S: Storage>(storage: &S, root: &Path) -> Config {
    let path = config_file(root);
    let bytes = match storage.read(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!("Using default configuration ({}: {e})", path.display());
            return Config::default();
        }
    };
    match Config::parse(&String::from_utf8_lossy(&bytes)) {
        Ok(config) => config,
        Err(e) => {
            tracing::debug!("Using default configuration: {e}");
            Config::default()
        }
    }
}

fn validate_topics(topics: &[Topic]) -> Result<(), StoreError> {
    let mut seen = BTreeSet::new();
    for topic in topics {
        if topic.id.trim().is_empty() {
            return Err(StoreError::Validation(format!(
                "topic '{}' has an empty id",
                topic.name
            )));
        }
        if !seen.insert(topic.id.as_str()) {
            return Err(StoreError::Validation(format!(
                "duplicate topic id {}",
                topic.id
            )));
        }
    }
    Ok(())
}
