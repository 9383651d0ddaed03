//! Path construction for the question bank layout
//!
//! ```text
//! <root>/<subject>/subject.json
//! <root>/<subject>/questions/<question>/question.json
//! <root>/<subject>/questions/<question>/image.<ext>
//! <root>/<subject>/unprocessed/**/*.<ext>
//! ```
//!
//! Nothing here touches the filesystem. Every caller-supplied name goes
//! through a [`Segment`] first, which is what keeps the store inside its root.

use std::path::{Component, Path, PathBuf};

use crate::domain::{PathError, Segment};

/// Document describing a subject.
pub const SUBJECT_FILE: &str = "subject.json";
/// Document describing a question.
pub const QUESTION_FILE: &str = "question.json";
/// Directory holding one subdirectory per question.
pub const QUESTIONS_DIR: &str = "questions";
/// Directory holding intake images not yet promoted to questions.
pub const UNPROCESSED_DIR: &str = "unprocessed";
/// Directory holding bank metadata; never treated as a subject.
pub const METADATA_DIR: &str = ".qbank";
/// Configuration file inside [`METADATA_DIR`].
pub const CONFIG_FILE: &str = "config.toml";

/// Directory of a subject.
#[must_use]
pub fn subject_dir(root: &Path, subject: &Segment) -> PathBuf {
    root.join(subject)
}

/// `subject.json` of a subject.
#[must_use]
pub fn subject_file(root: &Path, subject: &Segment) -> PathBuf {
    subject_dir(root, subject).join(SUBJECT_FILE)
}

/// Directory containing a subject's question directories.
#[must_use]
pub fn questions_dir(root: &Path, subject: &Segment) -> PathBuf {
    subject_dir(root, subject).join(QUESTIONS_DIR)
}

/// Intake directory of a subject.
#[must_use]
pub fn unprocessed_dir(root: &Path, subject: &Segment) -> PathBuf {
    subject_dir(root, subject).join(UNPROCESSED_DIR)
}

/// Directory of a single question.
#[must_use]
pub fn question_dir(root: &Path, subject: &Segment, question: &Segment) -> PathBuf {
    questions_dir(root, subject).join(question)
}

/// `question.json` of a question.
#[must_use]
pub fn question_file(root: &Path, subject: &Segment, question: &Segment) -> PathBuf {
    question_dir(root, subject, question).join(QUESTION_FILE)
}

/// The bank configuration file.
#[must_use]
pub fn config_file(root: &Path) -> PathBuf {
    root.join(METADATA_DIR).join(CONFIG_FILE)
}

/// Resolve an operator-supplied path relative to the root.
///
/// Only plain components (and `.`) are allowed, so the result always lies
/// below `root`.
///
/// # Errors
///
/// Returns [`PathError::Escapes`] for absolute paths, drive prefixes, `..`
/// components, or a path naming the root itself.
pub fn resolve_relative(root: &Path, relative: &Path) -> Result<PathBuf, PathError> {
    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(PathError::Escapes(relative.to_path_buf()));
            }
        }
    }
    if depth == 0 {
        return Err(PathError::Escapes(relative.to_path_buf()));
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn document_paths_follow_layout() {
        let root = PathBuf::from("/bank");
        let subject = Segment::try_from("MATH").unwrap();
        let question = Segment::try_from("q-17").unwrap();

        assert_eq!(subject_file(&root, &subject), root.join("MATH/subject.json"));
        assert_eq!(
            question_file(&root, &subject, &question),
            root.join("MATH/questions/q-17/question.json")
        );
        assert_eq!(
            unprocessed_dir(&root, &subject),
            root.join("MATH/unprocessed")
        );
        assert_eq!(config_file(&root), root.join(".qbank/config.toml"));
    }

    #[test]
    fn question_directories_nest_under_their_subject() {
        let root = PathBuf::from("/bank");
        let subject = Segment::try_from("MATH").unwrap();
        let question = Segment::try_from("q-17").unwrap();

        assert_eq!(subject_dir(&root, &subject), root.join("MATH"));
        assert_eq!(
            question_dir(&root, &subject, &question),
            root.join("MATH/questions/q-17")
        );
    }

    #[test]
    fn relative_paths_stay_below_root() {
        let root = PathBuf::from("/bank");
        let path = resolve_relative(&root, Path::new("MATH/unprocessed/./week1/scan.png")).unwrap();
        assert_eq!(path, root.join("MATH/unprocessed/week1/scan.png"));
    }

    #[test_case("../secret.txt"; "parent")]
    #[test_case("MATH/../../secret.txt"; "nested parent")]
    #[test_case("/etc/passwd"; "absolute")]
    #[test_case("."; "root itself")]
    #[test_case(""; "empty")]
    fn relative_paths_cannot_escape(relative: &str) {
        let root = PathBuf::from("/bank");
        assert_eq!(
            resolve_relative(&root, Path::new(relative)),
            Err(PathError::Escapes(PathBuf::from(relative)))
        );
    }
}
