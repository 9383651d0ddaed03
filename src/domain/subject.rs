use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::Question;

/// A named category within a subject.
///
/// The `id` is opaque and independent of the `name`. Questions reference
/// topics by id only, so an id must stay stable unless it is deliberately
/// regenerated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    /// Opaque, stable identifier referenced by questions.
    pub id: String,
    /// Human-readable name.
    pub name: String,
}

impl Topic {
    /// Create a topic with a freshly generated id.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
        }
    }
}

/// The persisted content of a subject (`subject.json`).
///
/// The subject code is not part of the document; the directory name is
/// authoritative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectData {
    /// Display name of the subject.
    pub name: String,
    /// Ordered topic catalog.
    #[serde(default)]
    pub topics: Vec<Topic>,
    /// Optional free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional primary accent colour used by quiz front-ends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_color: Option<String>,
    /// Optional secondary accent colour used by quiz front-ends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_color: Option<String>,
}

impl SubjectData {
    /// Look up a topic by id.
    #[must_use]
    pub fn topic(&self, id: &str) -> Option<&Topic> {
        self.topics.iter().find(|topic| topic.id == id)
    }
}

/// A fully aggregated subject, as returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    /// Directory name of the subject.
    pub code: String,
    /// Persisted subject document.
    #[serde(flatten)]
    pub data: SubjectData,
    /// Questions that could be loaded, ordered by id.
    pub questions: Vec<Question>,
    /// Intake images not yet promoted to questions, as forward-slash paths
    /// relative to the subject's `unprocessed` directory.
    pub unprocessed_images: Vec<String>,
}
