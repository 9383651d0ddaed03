//! JSON serialization of subject and question documents.
//!
//! Documents written by this crate carry a `_version` tag. Documents without
//! one predate versioning; they are migrated to the current shape when read
//! and written back in the current shape the next time they are saved.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, ser::PrettyFormatter};

use crate::domain::{Answer, Extra, ImageSlot, QuestionData, QuestionType, SubjectData, Topic};

/// Field holding the schema version of a document.
pub const VERSION_KEY: &str = "_version";

static IMAGE_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^image\.(png|jpg|jpeg|gif|webp)$").expect("static regex must compile")
});

static QUIZ_IMAGE_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(quizImage|quizPhoto)\.(png|jpg|jpeg|gif|webp)$")
        .expect("static regex must compile")
});

/// Which schema a document was stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    /// Untagged document migrated on read.
    Legacy,
    /// Version 1 of the tagged schema.
    V1,
}

/// Decode a `question.json` document.
///
/// `siblings` are the names of the other files in the question directory;
/// they are only consulted to resolve image references of legacy documents.
///
/// # Errors
///
/// Returns an error if the bytes are not JSON, or do not match the schema
/// they claim (or, for legacy documents, the legacy shape).
pub fn decode_question(
    bytes: &[u8],
    siblings: &[String],
) -> Result<(QuestionData, Schema), serde_json::Error> {
    match decode::<QuestionVersion, LegacyQuestion>(bytes)? {
        Decoded::Versioned(version) => Ok((version.into(), Schema::V1)),
        Decoded::Legacy(legacy) => Ok((legacy.migrate(siblings), Schema::Legacy)),
    }
}

/// Decode a `subject.json` document.
///
/// # Errors
///
/// Returns an error if the bytes are not JSON or do not match the schema.
pub fn decode_subject(bytes: &[u8]) -> Result<(SubjectData, Schema), serde_json::Error> {
    match decode::<SubjectVersion, LegacySubject>(bytes)? {
        Decoded::Versioned(version) => Ok((version.into(), Schema::V1)),
        Decoded::Legacy(legacy) => Ok((legacy.into(), Schema::Legacy)),
    }
}

/// Encode a question in the current schema.
#[must_use]
pub fn encode_question(question: &QuestionData) -> Vec<u8> {
    encode(&QuestionVersion::from(question.clone()))
}

/// Encode a subject in the current schema.
#[must_use]
pub fn encode_subject(subject: &SubjectData) -> Vec<u8> {
    encode(&SubjectVersion::from(subject.clone()))
}

enum Decoded<V, L> {
    Versioned(V),
    Legacy(L),
}

fn decode<V, L>(bytes: &[u8]) -> Result<Decoded<V, L>, serde_json::Error>
where
    V: DeserializeOwned,
    L: DeserializeOwned,
{
    let value: Value = serde_json::from_slice(bytes)?;
    let is_versioned = value
        .as_object()
        .is_some_and(|object| object.contains_key(VERSION_KEY));
    if is_versioned {
        serde_json::from_value(value).map(Decoded::Versioned)
    } else {
        serde_json::from_value(value).map(Decoded::Legacy)
    }
}

fn encode<T: Serialize>(document: &T) -> Vec<u8> {
    let mut buffer = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    document
        .serialize(&mut serializer)
        .expect("documents contain only string keys and cannot fail to serialize");
    buffer
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "_version")]
enum QuestionVersion {
    #[serde(rename = "1")]
    V1(QuestionV1),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuestionV1 {
    question_type: QuestionType,
    question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    original_text: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    answers: Vec<Answer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    quiz_image: Option<String>,
    #[serde(flatten)]
    extra: Extra,
}

impl From<QuestionVersion> for QuestionData {
    fn from(version: QuestionVersion) -> Self {
        match version {
            QuestionVersion::V1(v1) => Self {
                question_type: v1.question_type,
                text: v1.question,
                original_text: v1.original_text,
                topics: v1.topics,
                answers: v1.answers,
                image: v1.image,
                quiz_image: v1.quiz_image,
                extra: v1.extra,
            },
        }
    }
}

impl From<QuestionData> for QuestionVersion {
    fn from(data: QuestionData) -> Self {
        let QuestionData {
            question_type,
            text,
            original_text,
            topics,
            answers,
            image,
            quiz_image,
            mut extra,
        } = data;
        // the tag is written by the enum
        extra.remove(VERSION_KEY);
        Self::V1(QuestionV1 {
            question_type,
            question: text,
            original_text,
            topics,
            answers,
            image,
            quiz_image,
            extra,
        })
    }
}

/// A question document written before documents were versioned.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyQuestion {
    #[serde(default, alias = "question_type")]
    question_type: Option<String>,
    question: String,
    #[serde(default, alias = "original_text")]
    original_text: Option<String>,
    #[serde(default)]
    topics: Option<OneOrMany>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    answers: Vec<LegacyAnswer>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default, alias = "quizPhoto")]
    quiz_image: Option<String>,
    #[serde(flatten)]
    extra: Extra,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyAnswer {
    text: String,
    #[serde(default, alias = "is_correct")]
    is_correct: bool,
    #[serde(flatten)]
    extra: Extra,
}

impl LegacyQuestion {
    fn migrate(self, siblings: &[String]) -> QuestionData {
        let question_type = match self.question_type.as_deref() {
            Some("open") => QuestionType::Open,
            Some("multichoice" | "truefalse") | None => QuestionType::Multichoice,
            Some(other) => {
                tracing::debug!("Unknown legacy question type '{other}', assuming multichoice");
                QuestionType::Multichoice
            }
        };

        let mut topics = match self.topics {
            Some(OneOrMany::One(topic)) => vec![topic],
            Some(OneOrMany::Many(topics)) => topics,
            None => Vec::new(),
        };
        if let Some(topic) = self.topic.filter(|topic| !topic.is_empty()) {
            if !topics.contains(&topic) {
                topics.push(topic);
            }
        }

        let image = self
            .image
            .or_else(|| find_image(siblings, ImageSlot::Image));
        let quiz_image = self
            .quiz_image
            .or_else(|| find_image(siblings, ImageSlot::QuizImage));

        QuestionData {
            question_type,
            text: self.question,
            original_text: self.original_text,
            topics,
            answers: self
                .answers
                .into_iter()
                .map(|answer| Answer {
                    text: answer.text,
                    is_correct: answer.is_correct,
                    extra: answer.extra,
                })
                .collect(),
            image,
            quiz_image,
            extra: self.extra,
        }
    }
}

/// The file among `siblings` that fills `slot` by naming convention:
/// `image.<ext>` for the source image, `quizImage.<ext>` or `quizPhoto.<ext>`
/// for the quiz illustration (case-insensitive).
#[must_use]
pub fn find_image(siblings: &[String], slot: ImageSlot) -> Option<String> {
    let pattern: &Regex = match slot {
        ImageSlot::Image => &IMAGE_FILE,
        ImageSlot::QuizImage => &QUIZ_IMAGE_FILE,
    };
    siblings.iter().find(|name| pattern.is_match(name)).cloned()
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "_version", rename_all_fields = "camelCase")]
enum SubjectVersion {
    #[serde(rename = "1")]
    V1 {
        name: String,
        #[serde(default)]
        topics: Vec<Topic>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        primary_color: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secondary_color: Option<String>,
    },
}

impl From<SubjectVersion> for SubjectData {
    fn from(version: SubjectVersion) -> Self {
        match version {
            SubjectVersion::V1 {
                name,
                topics,
                description,
                primary_color,
                secondary_color,
            } => Self {
                name,
                topics,
                description,
                primary_color,
                secondary_color,
            },
        }
    }
}

impl From<SubjectData> for SubjectVersion {
    fn from(data: SubjectData) -> Self {
        let SubjectData {
            name,
            topics,
            description,
            primary_color,
            secondary_color,
        } = data;
        Self::V1 {
            name,
            topics,
            description,
            primary_color,
            secondary_color,
        }
    }
}

/// A subject document written before documents were versioned.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacySubject {
    name: String,
    #[serde(default)]
    topics: Vec<Topic>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    primary_color: Option<String>,
    #[serde(default)]
    secondary_color: Option<String>,
}

impl From<LegacySubject> for SubjectData {
    fn from(legacy: LegacySubject) -> Self {
        Self {
            name: legacy.name,
            topics: legacy.topics,
            description: legacy.description,
            primary_color: legacy.primary_color,
            secondary_color: legacy.secondary_color,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> QuestionData {
        QuestionData {
            question_type: QuestionType::Multichoice,
            text: "Which of these are primes?".to_string(),
            original_text: Some("Which of these are primes ?".to_string()),
            topics: vec!["t1".to_string()],
            answers: vec![Answer::new("2", true), Answer::new("4", false)],
            image: Some("image.png".to_string()),
            quiz_image: None,
            extra: Extra::new(),
        }
    }

    #[test]
    fn current_schema_is_tagged_and_indented() {
        let bytes = encode_question(&sample());
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("{\n    \"_version\": \"1\",\n    \"questionType\": \"multichoice\""));
        assert!(!text.contains("quizImage"));
    }

    #[test]
    fn current_schema_decodes_to_same_data() {
        let (decoded, schema) = decode_question(&encode_question(&sample()), &[]).unwrap();
        assert_eq!(schema, Schema::V1);
        assert_eq!(decoded, sample());
    }

    #[test]
    fn legacy_question_is_migrated() {
        let legacy = br#"{
            "question_type": "truefalse",
            "question": "Is 1 prime?",
            "original_text": "Is 1 prime",
            "topic": "t2",
            "topics": "t1",
            "answers": [{"text": "yes", "is_correct": false}],
            "comment": "kept as it is"
        }"#;
        let siblings = vec!["IMAGE.JPG".to_string(), "quizPhoto.png".to_string()];

        let (question, schema) = decode_question(legacy, &siblings).unwrap();

        assert_eq!(schema, Schema::Legacy);
        assert_eq!(question.question_type, QuestionType::Multichoice);
        assert_eq!(question.original_text.as_deref(), Some("Is 1 prime"));
        assert_eq!(question.topics, ["t1", "t2"]);
        assert!(!question.answers[0].is_correct);
        assert_eq!(question.image.as_deref(), Some("IMAGE.JPG"));
        assert_eq!(question.quiz_image.as_deref(), Some("quizPhoto.png"));
        assert_eq!(question.extra["comment"], "kept as it is");
        assert!(!question.extra.contains_key("question_type"));
        assert!(!question.extra.contains_key("topic"));
    }

    #[test]
    fn extra_fields_survive_a_rewrite() {
        let stored = br#"{
            "_version": "1",
            "questionType": "multichoice",
            "question": "Pick the prime",
            "topics": ["t1"],
            "answers": [{"text": "2", "isCorrect": true, "explanation": "only even prime", "order": 1}],
            "source": "exam 2019"
        }"#;

        let (question, schema) = decode_question(stored, &[]).unwrap();
        assert_eq!(schema, Schema::V1);
        assert!(!question.extra.contains_key(VERSION_KEY));

        let rewritten: Value = serde_json::from_slice(&encode_question(&question)).unwrap();
        let original: Value = serde_json::from_slice(stored).unwrap();
        assert_eq!(rewritten, original);
    }

    #[test]
    fn stray_version_key_is_not_written_twice() {
        let mut question = sample();
        question
            .extra
            .insert(VERSION_KEY.to_string(), Value::from("0"));
        let text = String::from_utf8(encode_question(&question)).unwrap();
        assert_eq!(text.matches(VERSION_KEY).count(), 1);
        assert!(decode_question(text.as_bytes(), &[]).is_ok());
    }

    #[test]
    fn images_are_found_by_slot_convention() {
        let siblings = ["notes.txt", "QuizPhoto.JPEG", "image.webp"].map(String::from);
        assert_eq!(
            find_image(&siblings, ImageSlot::Image).as_deref(),
            Some("image.webp")
        );
        assert_eq!(
            find_image(&siblings, ImageSlot::QuizImage).as_deref(),
            Some("QuizPhoto.JPEG")
        );
        assert_eq!(find_image(&siblings[..1], ImageSlot::Image), None);
    }

    #[test]
    fn legacy_question_without_type_defaults_to_multichoice() {
        let (question, _) =
            decode_question(br#"{"question": "2+2?", "topics": ["t1"]}"#, &[]).unwrap();
        assert_eq!(question.question_type, QuestionType::Multichoice);
        assert!(question.image.is_none());
    }

    #[test]
    fn versioned_document_must_match_its_schema() {
        let result = decode_question(br#"{"_version": "1", "question": "no type"}"#, &[]);
        assert!(result.is_err());
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(decode_question(b"{\"question\": ", &[]).is_err());
        assert!(decode_subject(b"not json").is_err());
    }

    #[test]
    fn subject_round_trips_and_accepts_legacy() {
        let subject = SubjectData {
            name: "Linear Algebra".to_string(),
            topics: vec![Topic {
                id: "t1".to_string(),
                name: "Matrices".to_string(),
            }],
            primary_color: Some("#336699".to_string()),
            ..SubjectData::default()
        };
        let (decoded, schema) = decode_subject(&encode_subject(&subject)).unwrap();
        assert_eq!(schema, Schema::V1);
        assert_eq!(decoded, subject);

        let (legacy, schema) = decode_subject(
            br##"{"name": "Linear Algebra", "primaryColor": "#336699", "topics": [{"id": "t1", "name": "Matrices"}]}"##,
        )
        .unwrap();
        assert_eq!(schema, Schema::Legacy);
        assert_eq!(legacy, subject);
    }
}
