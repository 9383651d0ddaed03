//! Propagation of topic id changes into the questions that reference them.
//!
//! Topics are matched across a save by exact name. When a name survives the
//! save but its id changed, every question of the subject that references the
//! old id is rewritten to reference the new one. Questions that reference
//! none of the old ids are left byte-for-byte untouched.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt, io,
    path::{Path, PathBuf},
};

use nonempty::NonEmpty;
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::{
    domain::Topic,
    storage::{
        backend::Storage,
        document::encode_question,
        loader::{Skipped, child_dirs, read_question_document},
        path_resolver::QUESTION_FILE,
    },
};

/// A set of `old id -> new id` substitutions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicRemap(BTreeMap<String, String>);

impl TopicRemap {
    /// Work out which topic ids changed between `prior` and `new`.
    ///
    /// A prior topic is matched to the new topic with the identical
    /// (case-sensitive) name. Names that only appear on one side are additions
    /// or deletions and produce no remapping.
    ///
    /// # Errors
    ///
    /// Returns [`AmbiguousTopicNames`] when a name whose ids changed is shared
    /// by more than one topic in either list, since there is then no way to
    /// tell which old id became which new one.
    pub fn plan(prior: &[Topic], new: &[Topic]) -> Result<Self, AmbiguousTopicNames> {
        let prior_ids = ids_by_name(prior);
        let new_ids = ids_by_name(new);

        let mut remap = BTreeMap::new();
        let mut ambiguous = Vec::new();

        for (name, old) in &prior_ids {
            let Some(current) = new_ids.get(name) else {
                continue;
            };
            if old.iter().collect::<BTreeSet<_>>() == current.iter().collect::<BTreeSet<_>>() {
                continue;
            }
            match (old.as_slice(), current.as_slice()) {
                ([old], [current]) => {
                    remap.insert((*old).to_string(), (*current).to_string());
                }
                _ => ambiguous.push((*name).to_string()),
            }
        }

        if ambiguous.is_empty() {
            Ok(Self(remap))
        } else {
            Err(AmbiguousTopicNames(ambiguous))
        }
    }

    /// Whether nothing needs to be rewritten.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The replacement for `old_id`, if it changed.
    #[must_use]
    pub fn get(&self, old_id: &str) -> Option<&str> {
        self.0.get(old_id).map(String::as_str)
    }

    /// The substitutions, ordered by old id.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(old, new)| (old.as_str(), new.as_str()))
    }
}

impl FromIterator<(String, String)> for TopicRemap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn ids_by_name(topics: &[Topic]) -> BTreeMap<&str, Vec<&str>> {
    let mut map: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for topic in topics {
        map.entry(topic.name.as_str())
            .or_default()
            .push(topic.id.as_str());
    }
    map
}

/// Topic names that cannot be matched unambiguously across a save.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("ambiguous topic names (shared by several topics): {}", .0.join(", "))]
pub struct AmbiguousTopicNames(pub Vec<String>);

/// What a cascade did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CascadeReport {
    /// Ids of the questions whose documents were rewritten, in order.
    pub rewritten: Vec<String>,
    /// Questions that could not be read and were left alone.
    pub skipped: Vec<Skipped>,
}

enum Outcome {
    Untouched,
    Rewritten(String),
    Skipped(Skipped),
    Failed(PathBuf, io::Error),
}

/// Apply `remap` to every question below `questions_dir`.
///
/// Directories without a `question.json` are passed over; malformed documents
/// are skipped with a warning, never repaired. Only documents in which at
/// least one id was substituted are written back.
///
/// # Errors
///
/// Returns a [`CascadeError`] listing every document that could not be
/// written. This method does *not* fail fast: all other documents are still
/// processed.
#[tracing::instrument(level = "debug", skip(storage))]
pub fn cascade<S: Storage>(
    storage: &S,
    questions_dir: &Path,
    remap: &TopicRemap,
) -> Result<CascadeReport, CascadeError> {
    if remap.is_empty() {
        return Ok(CascadeReport::default());
    }

    let ids = match child_dirs(storage, questions_dir) {
        Ok(ids) => ids,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!("Cannot list {}: {e}", questions_dir.display());
            }
            return Ok(CascadeReport::default());
        }
    };

    let outcomes: Vec<Outcome> = ids
        .into_par_iter()
        .map(|id| {
            let dir = questions_dir.join(&id);
            let mut question = match read_question_document(storage, &dir) {
                Ok(Some((question, _))) => question,
                Ok(None) => return Outcome::Untouched,
                Err(e) => return Outcome::Skipped(Skipped::warn(dir, &e)),
            };

            if !question.remap_topics(|old| remap.get(old)) {
                return Outcome::Untouched;
            }

            let path = dir.join(QUESTION_FILE);
            match storage.write(&path, &encode_question(&question)) {
                Ok(()) => {
                    tracing::debug!("Rewrote topics of question {id}");
                    Outcome::Rewritten(id.to_string())
                }
                Err(e) => Outcome::Failed(path, e),
            }
        })
        .collect();

    let mut report = CascadeReport::default();
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            Outcome::Untouched => {}
            Outcome::Rewritten(id) => report.rewritten.push(id),
            Outcome::Skipped(skipped) => report.skipped.push(skipped),
            Outcome::Failed(path, e) => failures.push((path, e)),
        }
    }

    NonEmpty::from_vec(failures).map_or(Ok(report), |failures| Err(CascadeError { failures }))
}

/// Question documents that could not be rewritten during a cascade.
#[derive(Debug, thiserror::Error)]
pub struct CascadeError {
    failures: NonEmpty<(PathBuf, io::Error)>,
}

impl CascadeError {
    /// The documents that failed, with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&Path, &io::Error)> {
        self.failures.iter().map(|(path, e)| (path.as_path(), e))
    }
}

impl fmt::Display for CascadeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MAX_DISPLAY: usize = 5;

        write!(f, "failed to update topic references: ")?;

        let total = self.failures.len();

        let displayed_paths: Vec<String> = self
            .failures
            .iter()
            .take(MAX_DISPLAY)
            .map(|(p, _e)| p.display().to_string())
            .collect();

        let msg = displayed_paths.join(", ");

        if total <= MAX_DISPLAY {
            write!(f, "{msg}")
        } else {
            write!(f, "{msg}... (and {} more)", total - MAX_DISPLAY)
        }
    }
}
