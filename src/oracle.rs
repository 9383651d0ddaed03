//! Drafting questions from intake images.
//!
//! The extraction itself (a vision model or a human) lives outside this
//! crate behind [`ExtractionOracle`]. The oracle is treated as unreliable:
//! it is consulted once per draft, its failures are surfaced unchanged, and
//! its output is checked against the subject's topic catalog.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    domain::{Answer, Extra, QuestionData, QuestionType, Topic},
    export::EncodedImage,
    storage::{Storage, Store, StoreError, path_resolver::UNPROCESSED_DIR},
};

/// What the oracle is asked to transcribe.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionRequest<'a> {
    /// The intake image.
    pub image: &'a EncodedImage,
    /// Topics the draft may be assigned to.
    pub topics: &'a [Topic],
    /// Extra instructions from the operator; may be empty.
    pub prompt: &'a str,
}

/// A structured question proposed by the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDraft {
    /// Kind of question.
    #[serde(default)]
    pub question_type: QuestionType,
    /// Cleaned-up question text.
    pub question: String,
    /// Proposed topic ids.
    #[serde(default)]
    pub topics: Vec<String>,
    /// Proposed answers.
    #[serde(default)]
    pub answers: Vec<Answer>,
    /// Verbatim transcription.
    #[serde(default)]
    pub original_text: Option<String>,
}

impl From<QuestionDraft> for QuestionData {
    fn from(draft: QuestionDraft) -> Self {
        Self {
            question_type: draft.question_type,
            text: draft.question,
            original_text: draft.original_text,
            topics: draft.topics,
            answers: draft.answers,
            image: None,
            quiz_image: None,
            extra: Extra::new(),
        }
    }
}

/// Errors from drafting a question.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// The oracle could not produce a draft.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// The subject or image could not be read.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Turns an image into a question draft.
pub trait ExtractionOracle {
    /// Transcribe `request.image` into a draft.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::Extraction`] if no draft could be produced.
    fn extract(&self, request: &ExtractionRequest<'_>) -> Result<QuestionDraft, OracleError>;
}

/// Ask `oracle` to draft a question from one of a subject's intake images.
///
/// `image` is relative to the subject's `unprocessed` directory. Topic ids the
/// subject does not define are dropped from the draft.
///
/// # Errors
///
/// Fails if the subject or image cannot be read, or if the oracle fails. The
/// oracle is not retried.
#[tracing::instrument(level = "debug", skip(store, oracle, prompt))]
pub fn draft_question<S, O>(
    store: &Store<S>,
    oracle: &O,
    subject: &str,
    image: &Path,
    prompt: &str,
) -> Result<QuestionDraft, OracleError>
where
    S: Storage,
    O: ExtractionOracle + ?Sized,
{
    let data = store.read_subject(subject)?;
    let image = store.read_image(&Path::new(subject).join(UNPROCESSED_DIR).join(image))?;

    let mut draft = oracle
        .extract(&ExtractionRequest {
            image: &image,
            topics: &data.topics,
            prompt,
        })
        .inspect_err(|e| tracing::warn!("Oracle failed: {e}"))?;

    draft.topics.retain(|id| {
        let known = data.topic(id).is_some();
        if !known {
            tracing::debug!("Dropping unknown topic {id} from draft");
        }
        known
    });
    Ok(draft)
}
