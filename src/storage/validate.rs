//! Structural checks over a whole bank.
//!
//! Validation never modifies anything. Loading is lenient and silently
//! migrates legacy documents; this module reports what loading would paper
//! over.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::{Path, PathBuf},
};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    domain::Segment,
    storage::{
        StoreError,
        backend::Storage,
        document::{Schema, VERSION_KEY, decode_question, decode_subject},
        loader::child_dirs,
        path_resolver::{QUESTION_FILE, SUBJECT_FILE, questions_dir, subject_dir},
    },
};

const QUESTION_KEYS: &[&str] = &[
    VERSION_KEY,
    "question",
    "questionType",
    "originalText",
    "topics",
    "answers",
    "image",
    "quizImage",
];

/// Keys the legacy migration understands in addition to [`QUESTION_KEYS`].
const LEGACY_QUESTION_KEYS: &[&str] = &["question_type", "original_text", "topic", "quizPhoto"];

const ANSWER_KEYS: &[&str] = &["text", "isCorrect", "is_correct"];

const REQUIRED_QUESTION_KEYS: &[(&str, &[&str])] = &[
    ("question", &["question"]),
    ("questionType", &["questionType", "question_type"]),
    ("topics", &["topics", "topic"]),
    ("answers", &["answers"]),
];

/// A single structural problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Issue {
    /// A subject directory has no `subject.json`.
    MissingSubjectDocument {
        /// The subject directory.
        subject: String,
    },
    /// A question directory has no `question.json`.
    MissingQuestionDocument {
        /// The subject directory.
        subject: String,
        /// The question directory.
        question: String,
    },
    /// A document is not valid JSON, or not a valid document.
    Malformed {
        /// The offending document.
        path: PathBuf,
        /// The parser error.
        message: String,
    },
    /// A question, or one of its answers, contains keys outside the schema.
    UnknownKeys {
        /// The offending document.
        path: PathBuf,
        /// Index of the answer, if the keys belong to an answer.
        answer: Option<usize>,
        /// The unexpected keys.
        keys: Vec<String>,
    },
    /// A question lacks keys every question must have.
    MissingKeys {
        /// The offending document.
        path: PathBuf,
        /// The missing keys.
        keys: Vec<String>,
    },
    /// A document still uses the unversioned schema.
    LegacySchema {
        /// The document.
        path: PathBuf,
    },
    /// A question references topic ids its subject does not define.
    DanglingTopics {
        /// The subject directory.
        subject: String,
        /// The question directory.
        question: String,
        /// The undefined ids.
        topics: Vec<String>,
    },
    /// The same question id is used in several subjects.
    DuplicateQuestionId {
        /// The question id.
        question: String,
        /// Every subject it occurs in.
        subjects: Vec<String>,
    },
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSubjectDocument { subject } => {
                write!(f, "subject {subject} is missing {SUBJECT_FILE}")
            }
            Self::MissingQuestionDocument { subject, question } => {
                write!(f, "question {question} in {subject} is missing {QUESTION_FILE}")
            }
            Self::Malformed { path, message } => {
                write!(f, "{} is malformed: {message}", path.display())
            }
            Self::UnknownKeys {
                path,
                answer: None,
                keys,
            } => write!(f, "{} contains unknown keys: {}", path.display(), keys.join(", ")),
            Self::UnknownKeys {
                path,
                answer: Some(index),
                keys,
            } => write!(
                f,
                "answer {index} in {} contains unknown keys: {}",
                path.display(),
                keys.join(", ")
            ),
            Self::MissingKeys { path, keys } => write!(
                f,
                "{} is missing required keys: {}",
                path.display(),
                keys.join(", ")
            ),
            Self::LegacySchema { path } => {
                write!(f, "{} uses the unversioned schema", path.display())
            }
            Self::DanglingTopics {
                subject,
                question,
                topics,
            } => write!(
                f,
                "question {question} in {subject} references undefined topics: {}",
                topics.join(", ")
            ),
            Self::DuplicateQuestionId { question, subjects } => write!(
                f,
                "question id {question} is used in several subjects: {}",
                subjects.join(", ")
            ),
        }
    }
}

/// Check every subject and question below `root`.
///
/// Issues are returned in directory order, followed by duplicate ids.
///
/// # Errors
///
/// Fails only if `root` cannot be listed.
#[tracing::instrument(level = "debug", skip(storage))]
pub fn validate<S: Storage>(storage: &S, root: &Path) -> Result<Vec<Issue>, StoreError> {
    let subjects = child_dirs(storage, root).map_err(|e| StoreError::io(root, e))?;

    let mut issues = Vec::new();
    let mut occurrences: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for subject in subjects {
        let topics = check_subject(storage, root, &subject, &mut issues);

        let dir = questions_dir(root, &subject);
        let Ok(questions) = child_dirs(storage, &dir) else {
            continue;
        };
        for question in questions {
            occurrences
                .entry(question.to_string())
                .or_default()
                .push(subject.to_string());
            check_question(
                storage,
                &dir.join(&question),
                &subject,
                &question,
                topics.as_ref(),
                &mut issues,
            );
        }
    }

    for (question, subjects) in occurrences {
        if subjects.len() > 1 {
            issues.push(Issue::DuplicateQuestionId { question, subjects });
        }
    }

    tracing::debug!("Validation found {} issue(s)", issues.len());
    Ok(issues)
}

/// Returns the ids of the subject's topics, if the document could be read.
fn check_subject<S: Storage>(
    storage: &S,
    root: &Path,
    subject: &Segment,
    issues: &mut Vec<Issue>,
) -> Option<BTreeSet<String>> {
    let path = subject_dir(root, subject).join(SUBJECT_FILE);
    let Ok(bytes) = storage.read(&path) else {
        issues.push(Issue::MissingSubjectDocument {
            subject: subject.to_string(),
        });
        return None;
    };
    match decode_subject(&bytes) {
        Ok((data, schema)) => {
            if schema == Schema::Legacy {
                issues.push(Issue::LegacySchema { path });
            }
            Some(data.topics.into_iter().map(|topic| topic.id).collect())
        }
        Err(e) => {
            issues.push(Issue::Malformed {
                path,
                message: e.to_string(),
            });
            None
        }
    }
}

fn check_question<S: Storage>(
    storage: &S,
    dir: &Path,
    subject: &Segment,
    question: &Segment,
    topics: Option<&BTreeSet<String>>,
    issues: &mut Vec<Issue>,
) {
    let path = dir.join(QUESTION_FILE);
    let Ok(bytes) = storage.read(&path) else {
        issues.push(Issue::MissingQuestionDocument {
            subject: subject.to_string(),
            question: question.to_string(),
        });
        return;
    };

    let value: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(e) => {
            issues.push(Issue::Malformed {
                path,
                message: e.to_string(),
            });
            return;
        }
    };
    let Some(object) = value.as_object() else {
        issues.push(Issue::Malformed {
            path,
            message: "expected a JSON object".to_string(),
        });
        return;
    };

    check_keys(&path, object, issues);

    match decode_question(&bytes, &[]) {
        Ok((data, schema)) => {
            if schema == Schema::Legacy {
                issues.push(Issue::LegacySchema { path });
            }
            if let Some(topics) = topics {
                let dangling: Vec<String> = data
                    .topics
                    .into_iter()
                    .filter(|id| !topics.contains(id))
                    .collect();
                if !dangling.is_empty() {
                    issues.push(Issue::DanglingTopics {
                        subject: subject.to_string(),
                        question: question.to_string(),
                        topics: dangling,
                    });
                }
            }
        }
        Err(e) => issues.push(Issue::Malformed {
            path,
            message: e.to_string(),
        }),
    }
}

fn check_keys(path: &Path, object: &Map<String, Value>, issues: &mut Vec<Issue>) {
    let unknown = unknown_keys(object, |key| {
        QUESTION_KEYS.contains(&key) || LEGACY_QUESTION_KEYS.contains(&key)
    });
    if !unknown.is_empty() {
        issues.push(Issue::UnknownKeys {
            path: path.to_path_buf(),
            answer: None,
            keys: unknown,
        });
    }

    let missing: Vec<String> = REQUIRED_QUESTION_KEYS
        .iter()
        .filter(|(_, accepted)| !accepted.iter().any(|key| object.contains_key(*key)))
        .map(|(key, _)| (*key).to_string())
        .collect();
    if !missing.is_empty() {
        issues.push(Issue::MissingKeys {
            path: path.to_path_buf(),
            keys: missing,
        });
    }

    let answers = object.get("answers").and_then(Value::as_array);
    for (index, answer) in answers.into_iter().flatten().enumerate() {
        let Some(answer) = answer.as_object() else {
            continue;
        };
        let unknown = unknown_keys(answer, |key| ANSWER_KEYS.contains(&key));
        if !unknown.is_empty() {
            issues.push(Issue::UnknownKeys {
                path: path.to_path_buf(),
                answer: Some(index),
                keys: unknown,
            });
        }
    }
}

fn unknown_keys(object: &Map<String, Value>, known: impl Fn(&str) -> bool) -> Vec<String> {
    object
        .keys()
        .filter(|key| !known(key))
        .cloned()
        .collect()
}
