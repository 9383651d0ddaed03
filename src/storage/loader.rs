//! Aggregation of the directory tree into subjects and questions.
//!
//! Listings favour availability over completeness: an entry that cannot be
//! loaded is logged, recorded as [`Skipped`] and left out, and the listing
//! carries on with its siblings.

use std::{
    io,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use rayon::iter::{IntoParallelIterator, ParallelIterator};
use regex::Regex;

use crate::{
    domain::{Question, QuestionData, Segment, Subject, SubjectData},
    storage::{
        StoreError,
        backend::{Storage, to_slash_path},
        document::{decode_question, decode_subject},
        path_resolver::{QUESTION_FILE, questions_dir, subject_file, unprocessed_dir},
    },
};

static IMAGE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.(png|jpg|jpeg|gif|webp)$").expect("static regex must compile")
});

/// Whether a filename carries one of the recognised image extensions.
#[must_use]
pub fn is_image_name(name: &str) -> bool {
    IMAGE_NAME.is_match(name)
}

/// An entry left out of a listing, and why.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Skipped {
    /// Path of the entry (directory or document) that was skipped.
    pub path: PathBuf,
    /// Human-readable reason.
    pub reason: String,
}

impl Skipped {
    pub(crate) fn warn(path: PathBuf, error: &StoreError) -> Self {
        tracing::warn!("Skipping {}: {error}", path.display());
        Self {
            path,
            reason: error.to_string(),
        }
    }
}

/// The result of a listing: everything that loaded, plus what did not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing<T> {
    /// Entries that loaded successfully, ordered by directory name.
    pub items: Vec<T>,
    /// Entries that were left out.
    pub skipped: Vec<Skipped>,
}

impl<T> Default for Listing<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

impl<T> Listing<T> {
    fn from_results(results: Vec<Result<(T, Vec<Skipped>), Skipped>>) -> Self {
        let mut listing = Self::default();
        for result in results {
            match result {
                Ok((item, skipped)) => {
                    listing.items.push(item);
                    listing.skipped.extend(skipped);
                }
                Err(skipped) => listing.skipped.push(skipped),
            }
        }
        listing
    }
}

/// Names of the non-hidden subdirectories of `dir`, in name order.
///
/// Names that cannot be used as a [`Segment`] are ignored.
///
/// # Errors
///
/// Fails if `dir` cannot be listed.
pub fn child_dirs<S: Storage>(storage: &S, dir: &Path) -> io::Result<Vec<Segment>> {
    Ok(storage
        .list(dir)?
        .into_iter()
        .filter(|entry| entry.is_dir)
        .filter_map(|entry| Segment::new(entry.name).ok())
        .filter(|segment| !segment.is_hidden())
        .collect())
}

/// Load every subject below `root`, with its questions and intake images.
///
/// # Errors
///
/// Only fails if `root` itself cannot be listed. Individual subjects that
/// cannot be loaded are skipped.
#[tracing::instrument(level = "debug", skip(storage))]
pub fn list_subjects<S: Storage>(
    storage: &S,
    root: &Path,
    max_walk_depth: usize,
) -> Result<Listing<Subject>, StoreError> {
    let codes = child_dirs(storage, root).map_err(|e| StoreError::io(root, e))?;

    let results = codes
        .into_par_iter()
        .map(|code| -> Result<(Subject, Vec<Skipped>), Skipped> {
            let data = read_subject(storage, root, &code)
                .map_err(|e| Skipped::warn(subject_file(root, &code), &e))?;
            let questions = list_questions(storage, &questions_dir(root, &code));
            let unprocessed_images =
                walk_unprocessed_images(storage, &unprocessed_dir(root, &code), max_walk_depth);
            let subject = Subject {
                code: code.to_string(),
                data,
                questions: questions.items,
                unprocessed_images,
            };
            Ok((subject, questions.skipped))
        })
        .collect();

    Ok(Listing::from_results(results))
}

/// Read and decode a subject's `subject.json`.
///
/// # Errors
///
/// [`StoreError::NotFound`] if the document is missing,
/// [`StoreError::Corrupt`] if it is malformed, [`StoreError::Io`] otherwise.
pub fn read_subject<S: Storage>(
    storage: &S,
    root: &Path,
    code: &Segment,
) -> Result<SubjectData, StoreError> {
    let path = subject_file(root, code);
    let bytes = storage.read(&path).map_err(|e| StoreError::io(&path, e))?;
    decode_subject(&bytes)
        .map(|(subject, _)| subject)
        .map_err(|source| StoreError::Corrupt { path, source })
}

/// Load every question below `questions_dir`.
///
/// A missing directory yields an empty listing. Directories without a
/// `question.json` are not questions yet and are passed over silently.
#[tracing::instrument(level = "debug", skip(storage))]
pub fn list_questions<S: Storage>(storage: &S, questions_dir: &Path) -> Listing<Question> {
    let ids = match child_dirs(storage, questions_dir) {
        Ok(ids) => ids,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Listing::default(),
        Err(e) => {
            let skipped = Skipped::warn(
                questions_dir.to_path_buf(),
                &StoreError::io(questions_dir, e),
            );
            return Listing {
                items: Vec::new(),
                skipped: vec![skipped],
            };
        }
    };

    let results = ids
        .into_par_iter()
        .filter_map(|id| {
            let dir = questions_dir.join(&id);
            match read_question(storage, &dir, &id) {
                Ok(Some(question)) => Some(Ok((question, Vec::new()))),
                Ok(None) => None,
                Err(e) => Some(Err(Skipped::warn(dir, &e))),
            }
        })
        .collect();

    Listing::from_results(results)
}

/// Read one question directory.
///
/// Returns `Ok(None)` when the directory has no `question.json`.
///
/// # Errors
///
/// [`StoreError::Corrupt`] if the document is malformed, [`StoreError::Io`]
/// if the directory or document cannot be read.
pub fn read_question<S: Storage>(
    storage: &S,
    dir: &Path,
    id: &Segment,
) -> Result<Option<Question>, StoreError> {
    let Some((data, siblings)) = read_question_document(storage, dir)? else {
        return Ok(None);
    };
    let images = siblings
        .into_iter()
        .filter(|name| is_image_name(name))
        .collect();
    Ok(Some(Question {
        id: id.to_string(),
        data,
        images,
    }))
}

/// Read and decode a question's document, together with the names of the
/// other files in its directory.
///
/// # Errors
///
/// As [`read_question`].
pub(crate) fn read_question_document<S: Storage>(
    storage: &S,
    dir: &Path,
) -> Result<Option<(QuestionData, Vec<String>)>, StoreError> {
    let entries = match storage.list(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(dir, e)),
    };

    let path = dir.join(QUESTION_FILE);
    let bytes = match storage.read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(&path, e)),
    };

    let siblings: Vec<String> = entries
        .into_iter()
        .filter(|entry| !entry.is_dir && entry.name != QUESTION_FILE)
        .map(|entry| entry.name)
        .collect();

    let (data, _) =
        decode_question(&bytes, &siblings).map_err(|source| StoreError::Corrupt { path, source })?;
    Ok(Some((data, siblings)))
}

/// Every image below `dir`, as forward-slash paths relative to `dir`.
///
/// A missing directory yields nothing.
pub fn walk_unprocessed_images<S: Storage>(
    storage: &S,
    dir: &Path,
    max_depth: usize,
) -> Vec<String> {
    match storage.walk(dir, max_depth) {
        Ok(files) => files
            .iter()
            .map(|path| to_slash_path(path))
            .filter(|path| is_image_name(path))
            .collect(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            tracing::warn!("Failed to walk {}: {e}", dir.display());
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::storage::{
        backend::{FsStorage, MemoryStorage},
        document::encode_question,
    };

    fn question(text: &str) -> Vec<u8> {
        encode_question(&QuestionData {
            text: text.to_string(),
            topics: vec!["t1".to_string()],
            ..QuestionData::default()
        })
    }

    fn subject_json(name: &str) -> Vec<u8> {
        format!(r#"{{"name": "{name}", "topics": [{{"id": "t1", "name": "Sets"}}]}}"#).into_bytes()
    }

    #[test]
    fn well_formed_questions_are_listed_and_malformed_skipped() {
        let storage = MemoryStorage::new();
        let dir = Path::new("/bank/MATH/questions");
        for i in 0..3 {
            storage
                .write(&dir.join(format!("good{i}/question.json")), &question("ok"))
                .unwrap();
        }
        for i in 0..2 {
            storage
                .write(&dir.join(format!("bad{i}/question.json")), b"{ not json")
                .unwrap();
        }

        let listing = list_questions(&storage, dir);

        let ids: Vec<_> = listing.items.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, ["good0", "good1", "good2"]);
        assert_eq!(listing.skipped.len(), 2);
        assert!(listing.skipped[0].path.ends_with("bad0"));
    }

    #[test]
    fn directory_without_document_is_not_a_question() {
        let storage = MemoryStorage::new();
        let dir = Path::new("/bank/MATH/questions");
        storage.create_dir(&dir.join("half-created")).unwrap();
        storage
            .write(&dir.join("half-created/image.png"), b"png")
            .unwrap();

        let listing = list_questions(&storage, dir);

        assert!(listing.items.is_empty());
        assert!(listing.skipped.is_empty());
    }

    #[test]
    fn missing_questions_directory_is_empty() {
        let storage = MemoryStorage::new();
        let listing = list_questions(&storage, Path::new("/bank/MATH/questions"));
        assert_eq!(listing, Listing::default());
    }

    #[test]
    fn sibling_images_are_attached_without_reading_them() {
        let storage = MemoryStorage::new();
        let dir = Path::new("/bank/MATH/questions/q1");
        storage.write(&dir.join("question.json"), &question("q")).unwrap();
        storage.write(&dir.join("image.PNG"), b"a").unwrap();
        storage.write(&dir.join("quizImage.webp"), b"b").unwrap();
        storage.write(&dir.join("notes.txt"), b"c").unwrap();

        let listing = list_questions(&storage, Path::new("/bank/MATH/questions"));

        assert_eq!(listing.items[0].images, ["image.PNG", "quizImage.webp"]);
    }

    #[test]
    fn unprocessed_walk_is_recursive_and_relative() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("unprocessed");
        FsStorage.write(&dir.join("a.png"), b"").unwrap();
        FsStorage.write(&dir.join("week1/b.JPG"), b"").unwrap();
        FsStorage.write(&dir.join("week1/deep/c.gif"), b"").unwrap();
        FsStorage.write(&dir.join("week1/readme.md"), b"").unwrap();

        let images = walk_unprocessed_images(&FsStorage, &dir, 32);

        assert_eq!(images, ["a.png", "week1/b.JPG", "week1/deep/c.gif"]);
        assert!(walk_unprocessed_images(&FsStorage, &tmp.path().join("missing"), 32).is_empty());
    }

    #[test]
    fn one_bad_subject_does_not_abort_listing() {
        let storage = MemoryStorage::new();
        let root = Path::new("/bank");
        storage
            .write(&root.join("ALG/subject.json"), &subject_json("Algebra"))
            .unwrap();
        storage
            .write(&root.join("ALG/questions/q1/question.json"), &question("x"))
            .unwrap();
        storage
            .write(&root.join("ALG/unprocessed/scan.png"), b"")
            .unwrap();
        storage
            .write(&root.join("BROKEN/subject.json"), b"{")
            .unwrap();
        storage.create_dir(&root.join("EMPTY")).unwrap();
        storage.create_dir(&root.join(".qbank")).unwrap();
        storage.write(&root.join("notes.txt"), b"").unwrap();

        let listing = list_subjects(&storage, root, 32).unwrap();

        assert_eq!(listing.items.len(), 1);
        let subject = &listing.items[0];
        assert_eq!(subject.code, "ALG");
        assert_eq!(subject.data.name, "Algebra");
        assert_eq!(subject.questions.len(), 1);
        assert_eq!(subject.unprocessed_images, ["scan.png"]);

        let skipped: Vec<_> = listing
            .skipped
            .iter()
            .map(|s| to_slash_path(s.path.strip_prefix(root).unwrap()))
            .collect();
        assert_eq!(skipped, ["BROKEN/subject.json", "EMPTY/subject.json"]);
    }

    #[test]
    fn unreadable_root_is_an_error() {
        let storage = MemoryStorage::new();
        let result = list_subjects(&storage, Path::new("/nowhere"), 32);
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}
