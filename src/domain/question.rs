use std::fmt;

use borsh::BorshSerialize;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields of a document that are not part of the typed schema. They are
/// carried through reads and writes unchanged.
pub type Extra = Map<String, Value>;

/// The kind of exam item.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, BorshSerialize,
)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    /// Pick one or more answers from a list.
    #[default]
    Multichoice,
    /// Free-form answer.
    Open,
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Multichoice => f.write_str("multichoice"),
            Self::Open => f.write_str("open"),
        }
    }
}

/// One answer option of a multichoice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    /// Answer text.
    pub text: String,
    /// Whether this option is correct.
    pub is_correct: bool,
    /// Any other fields of the answer, such as an explanation.
    #[serde(flatten)]
    #[borsh(serialize_with = "borsh_json")]
    pub extra: Extra,
}

impl Answer {
    /// An answer option with no extra fields.
    #[must_use]
    pub fn new(text: impl Into<String>, is_correct: bool) -> Self {
        Self {
            text: text.into(),
            is_correct,
            extra: Extra::new(),
        }
    }
}

fn borsh_json<W: borsh::io::Write>(extra: &Extra, writer: &mut W) -> Result<(), borsh::io::Error> {
    let json = serde_json::to_string(extra).map_err(borsh::io::Error::other)?;
    BorshSerialize::serialize(&json, writer)
}

/// Which of a question's two image attachments is meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImageSlot {
    /// The scan or photo the question was transcribed from.
    Image,
    /// The illustration shown alongside the question in a quiz.
    QuizImage,
}

impl ImageSlot {
    /// File stem used when storing an uploaded asset for this slot.
    #[must_use]
    pub const fn file_stem(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::QuizImage => "quizImage",
        }
    }
}

/// The persisted content of a question (`question.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionData {
    /// Kind of question.
    #[serde(default)]
    pub question_type: QuestionType,
    /// Question text (may contain LaTeX).
    #[serde(rename = "question")]
    pub text: String,
    /// Verbatim text as transcribed from the source, if kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
    /// Ids of the topics this question belongs to.
    #[serde(default)]
    pub topics: Vec<String>,
    /// Answer options; only meaningful for multichoice questions.
    #[serde(default)]
    pub answers: Vec<Answer>,
    /// Filename of the sibling source image, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Filename of the sibling quiz illustration, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiz_image: Option<String>,
    /// Any other fields of the document.
    #[serde(flatten)]
    pub extra: Extra,
}

impl QuestionData {
    /// The stored reference for the given image slot.
    #[must_use]
    pub fn image_ref(&self, slot: ImageSlot) -> Option<&str> {
        match slot {
            ImageSlot::Image => self.image.as_deref(),
            ImageSlot::QuizImage => self.quiz_image.as_deref(),
        }
    }

    /// Replace the stored reference for the given image slot.
    pub fn set_image_ref(&mut self, slot: ImageSlot, filename: Option<String>) {
        match slot {
            ImageSlot::Image => self.image = filename,
            ImageSlot::QuizImage => self.quiz_image = filename,
        }
    }

    /// Substitute topic ids according to `remap`.
    ///
    /// Each stored id is looked up once, so remappings never chain. Duplicates
    /// produced by the substitution are dropped, keeping the first occurrence.
    /// Returns `true` if at least one id was substituted.
    pub fn remap_topics<'a>(&mut self, remap: impl Fn(&str) -> Option<&'a str>) -> bool {
        let mut changed = false;
        let mut topics: Vec<String> = Vec::with_capacity(self.topics.len());
        for id in &self.topics {
            let id = match remap(id.as_str()) {
                Some(new_id) => {
                    changed = true;
                    new_id.to_string()
                }
                None => id.clone(),
            };
            if !topics.contains(&id) {
                topics.push(id);
            }
        }
        if changed {
            self.topics = topics;
        }
        changed
    }
}

/// A question as returned by a listing: the document plus the identity and
/// attachments derived from its directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Directory name of the question.
    pub id: String,
    /// Persisted question document.
    #[serde(flatten)]
    pub data: QuestionData,
    /// Image filenames present in the question directory. Bytes are not read.
    pub images: Vec<String>,
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn with_topics(topics: &[&str]) -> QuestionData {
        QuestionData {
            text: "What is 2 + 2?".to_string(),
            topics: topics.iter().map(ToString::to_string).collect(),
            ..QuestionData::default()
        }
    }

    fn lookup<'a>(map: &'a HashMap<&str, &str>) -> impl Fn(&str) -> Option<&'a str> {
        move |id| map.get(id).copied()
    }

    #[test]
    fn remap_substitutes_known_ids() {
        let map = HashMap::from([("t1", "t2")]);
        let mut question = with_topics(&["t1", "t9"]);
        assert!(question.remap_topics(lookup(&map)));
        assert_eq!(question.topics, ["t2", "t9"]);
    }

    #[test]
    fn remap_reports_no_change() {
        let map = HashMap::from([("t1", "t2")]);
        let mut question = with_topics(&["t3"]);
        assert!(!question.remap_topics(lookup(&map)));
        assert_eq!(question.topics, ["t3"]);
    }

    #[test]
    fn remap_does_not_chain() {
        let map = HashMap::from([("t1", "t2"), ("t2", "t3")]);
        let mut question = with_topics(&["t1", "t2"]);
        assert!(question.remap_topics(lookup(&map)));
        assert_eq!(question.topics, ["t2", "t3"]);
    }

    #[test]
    fn remap_collapses_duplicates() {
        let map = HashMap::from([("t1", "t2")]);
        let mut question = with_topics(&["t1", "t2"]);
        assert!(question.remap_topics(lookup(&map)));
        assert_eq!(question.topics, ["t2"]);
    }

    #[test]
    fn request_payload_uses_camel_case() {
        let data: QuestionData = serde_json::from_str(
            r#"{"questionType":"open","question":"Define a group.","topics":["alg"]}"#,
        )
        .unwrap();
        assert_eq!(data.question_type, QuestionType::Open);
        assert_eq!(data.text, "Define a group.");
        assert!(data.answers.is_empty());
        assert!(data.extra.is_empty());
    }

    #[test]
    fn fields_outside_the_schema_are_kept() {
        let data: QuestionData = serde_json::from_str(
            r#"{"question":"2+2?","difficulty":3,"answers":[{"text":"4","isCorrect":true,"explanation":"because"}]}"#,
        )
        .unwrap();
        assert_eq!(data.extra["difficulty"], 3);
        assert_eq!(data.answers[0].extra["explanation"], "because");

        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["difficulty"], 3);
        assert_eq!(json["answers"][0]["explanation"], "because");
    }

    #[test]
    fn answer_fingerprint_covers_extra_fields() {
        let plain = Answer::new("4", true);
        let mut explained = plain.clone();
        explained
            .extra
            .insert("explanation".to_string(), Value::from("because"));
        assert_ne!(
            borsh::to_vec(&plain).unwrap(),
            borsh::to_vec(&explained).unwrap()
        );
    }
}
