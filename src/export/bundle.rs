use std::{collections::BTreeMap, path::Path};

use borsh::BorshSerialize;
use chrono::{DateTime, Utc};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{
    domain::{Answer, Config, ImageSlot, Question, QuestionType, Subject},
    export::pipeline::ImagePipeline,
    storage::{Storage, StoreError, document::find_image, loader, path_resolver::QUESTIONS_DIR},
};

/// Version of the bundle format.
pub const FORMAT_VERSION: &str = "1.2.0";
/// Version of the question syntax used inside the bundle.
pub const SYNTAX_VERSION: &str = "1.0.0";

/// A self-contained export of the whole bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bundle {
    /// Provenance of the export.
    pub metadata: Metadata,
    /// Every subject that could be loaded, ordered by code.
    pub subjects: Vec<ExportedSubject>,
}

/// Provenance of an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Bundle format version.
    pub version: String,
    /// Question syntax version.
    pub syntax: String,
    /// When the bundle was assembled.
    pub generated_at: DateTime<Utc>,
    /// SHA-256 fingerprint of the exported subjects.
    pub hash: String,
    /// Where the bank came from.
    pub repository: String,
}

/// A subject inside a [`Bundle`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, BorshSerialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedSubject {
    /// Subject code.
    pub id: String,
    /// Display name.
    pub title: String,
    /// Topic names by id.
    pub topic_map: BTreeMap<String, String>,
    /// Questions, ordered by id.
    pub questions: Vec<ExportedQuestion>,
}

/// A question inside a [`Bundle`], with its images embedded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, BorshSerialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedQuestion {
    /// Question id.
    pub id: String,
    /// Kind of question.
    pub question_type: QuestionType,
    /// Ids of the topics the question belongs to.
    pub topics: Vec<String>,
    /// Question text.
    pub question: String,
    /// Source text; the question text if none was kept.
    pub original_text: String,
    /// Source image as a data URI, or empty.
    pub image: String,
    /// Quiz illustration as a data URI, or empty.
    pub quiz_photo: String,
    /// Answer options.
    pub answers: Vec<Answer>,
}

impl Bundle {
    /// Compute the content fingerprint of a list of exported subjects.
    ///
    /// # Panics
    ///
    /// Panics if borsh serialization fails (which should never happen for this
    /// data structure).
    #[must_use]
    pub fn fingerprint(subjects: &[ExportedSubject]) -> String {
        let encoded = borsh::to_vec(subjects).expect("this should never fail");
        let hash = Sha256::digest(encoded);
        format!("{hash:x}")
    }
}

/// Assemble a [`Bundle`] from every subject below `root`.
///
/// Subjects and questions that cannot be loaded are left out with a warning.
/// Images are re-encoded at `quality`; images that cannot be re-encoded are
/// embedded as they are, and missing images become empty strings.
///
/// # Errors
///
/// Fails only if `root` cannot be listed.
#[tracing::instrument(level = "debug", skip(storage, config))]
pub fn export<S: Storage>(
    storage: &S,
    root: &Path,
    config: &Config,
    quality: u8,
) -> Result<Bundle, StoreError> {
    let listing = loader::list_subjects(storage, root, config.max_walk_depth())?;
    let pipeline = ImagePipeline::from_config(config);

    let subjects: Vec<ExportedSubject> = listing
        .items
        .into_par_iter()
        .map(|subject| export_subject(storage, root, &pipeline, quality, subject))
        .collect();

    let metadata = Metadata {
        version: FORMAT_VERSION.to_string(),
        syntax: SYNTAX_VERSION.to_string(),
        generated_at: Utc::now(),
        hash: Bundle::fingerprint(&subjects),
        repository: config
            .repository()
            .map_or_else(|| root.display().to_string(), ToString::to_string),
    };

    tracing::info!(
        "Exported {} subject(s), {} skipped",
        subjects.len(),
        listing.skipped.len()
    );
    Ok(Bundle { metadata, subjects })
}

fn export_subject<S: Storage>(
    storage: &S,
    root: &Path,
    pipeline: &ImagePipeline,
    quality: u8,
    subject: Subject,
) -> ExportedSubject {
    let topic_map = subject
        .data
        .topics
        .into_iter()
        .map(|topic| (topic.id, topic.name))
        .collect();
    let questions_dir = root.join(&subject.code).join(QUESTIONS_DIR);

    let questions = subject
        .questions
        .into_par_iter()
        .map(|question| {
            let dir = questions_dir.join(&question.id);
            export_question(storage, &dir, pipeline, quality, question)
        })
        .collect();

    ExportedSubject {
        id: subject.code,
        title: subject.data.name,
        topic_map,
        questions,
    }
}

fn export_question<S: Storage>(
    storage: &S,
    dir: &Path,
    pipeline: &ImagePipeline,
    quality: u8,
    question: Question,
) -> ExportedQuestion {
    // documents written without a reference still own the conventional file
    let embed = |slot| {
        question
            .data
            .image_ref(slot)
            .map(ToString::to_string)
            .or_else(|| find_image(&question.images, slot))
            .map(|name| embed_image(storage, dir, pipeline, quality, &name))
            .unwrap_or_default()
    };
    let image = embed(ImageSlot::Image);
    let quiz_photo = embed(ImageSlot::QuizImage);

    let data = question.data;
    ExportedQuestion {
        id: question.id,
        question_type: data.question_type,
        topics: data.topics,
        original_text: data
            .original_text
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| data.text.clone()),
        question: data.text,
        image,
        quiz_photo,
        answers: data.answers,
    }
}

fn embed_image<S: Storage>(
    storage: &S,
    dir: &Path,
    pipeline: &ImagePipeline,
    quality: u8,
    name: &str,
) -> String {
    // references must name a sibling file
    if name.contains(['/', '\\']) || name == ".." {
        tracing::warn!("Ignoring image reference {name} in {}", dir.display());
        return String::new();
    }
    match storage.read(&dir.join(name)) {
        Ok(bytes) => pipeline.compress(&bytes, name, quality).to_data_uri(),
        Err(e) => {
            tracing::debug!("Image {name} in {} unavailable: {e}", dir.display());
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, Rgb, RgbImage};

    use super::*;
    use crate::{
        domain::{QuestionData, SubjectData, Topic},
        storage::{
            MemoryStorage,
            document::{encode_question, encode_subject},
        },
    };

    const ROOT: &str = "/bank";

    fn jpeg() -> Vec<u8> {
        let image = RgbImage::from_pixel(8, 8, Rgb([200, 10, 10]));
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Jpeg).unwrap();
        buffer.into_inner()
    }

    fn bank() -> MemoryStorage {
        let storage = MemoryStorage::new();
        let root = Path::new(ROOT);
        for (code, name) in [("PHYS", "Physics"), ("ALG", "Algebra")] {
            let subject = SubjectData {
                name: name.to_string(),
                topics: vec![
                    Topic {
                        id: "t2".to_string(),
                        name: "Second".to_string(),
                    },
                    Topic {
                        id: "t1".to_string(),
                        name: "First".to_string(),
                    },
                ],
                ..SubjectData::default()
            };
            storage
                .write(&root.join(code).join("subject.json"), &encode_subject(&subject))
                .unwrap();
        }
        storage
            .write(
                &root.join("ALG/questions/q1/question.json"),
                &encode_question(&QuestionData {
                    text: "What is a ring?".to_string(),
                    topics: vec!["t1".to_string()],
                    image: Some("image.jpg".to_string()),
                    quiz_image: Some("quizImage.png".to_string()),
                    ..QuestionData::default()
                }),
            )
            .unwrap();
        storage
            .write(&root.join("ALG/questions/q1/image.jpg"), &jpeg())
            .unwrap();
        storage
            .write(&root.join("ALG/questions/q2/question.json"), b"not json")
            .unwrap();
        storage
            .write(&root.join("BROKEN/subject.json"), b"[")
            .unwrap();
        storage
    }

    #[test]
    fn exports_loadable_subjects_in_order_with_defaults() {
        let storage = bank();

        let bundle = export(&storage, Path::new(ROOT), &Config::default(), 80).unwrap();

        let ids: Vec<_> = bundle.subjects.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["ALG", "PHYS"]);

        let algebra = &bundle.subjects[0];
        assert_eq!(algebra.title, "Algebra");
        assert_eq!(
            algebra.topic_map.keys().collect::<Vec<_>>(),
            ["t1", "t2"]
        );
        assert_eq!(algebra.questions.len(), 1);

        let question = &algebra.questions[0];
        assert_eq!(question.question_type, QuestionType::Multichoice);
        assert_eq!(question.original_text, "What is a ring?");
        assert!(question.image.starts_with("data:image/jpeg;base64,"));
        assert_eq!(question.quiz_photo, "");

        assert_eq!(bundle.metadata.version, "1.2.0");
        assert_eq!(bundle.metadata.syntax, "1.0.0");
        assert_eq!(bundle.metadata.repository, ROOT);
    }

    #[test]
    fn export_is_deterministic_apart_from_timestamp() {
        let storage = bank();
        let config = Config::default();

        let first = export(&storage, Path::new(ROOT), &config, 80).unwrap();
        let second = export(&storage, Path::new(ROOT), &config, 80).unwrap();

        assert_eq!(first.subjects, second.subjects);
        assert_eq!(first.metadata.hash, second.metadata.hash);
        assert_eq!(first.metadata.hash.len(), 64);
    }

    #[test]
    fn hash_tracks_content() {
        let storage = bank();
        let config = Config::default();
        let before = export(&storage, Path::new(ROOT), &config, 80).unwrap();

        storage
            .write(
                Path::new("/bank/PHYS/questions/q9/question.json"),
                &encode_question(&QuestionData {
                    text: "F = ?".to_string(),
                    ..QuestionData::default()
                }),
            )
            .unwrap();
        let after = export(&storage, Path::new(ROOT), &config, 80).unwrap();

        assert_ne!(before.metadata.hash, after.metadata.hash);
    }

    #[test]
    fn undecodable_image_is_embedded_verbatim() {
        let storage = bank();
        storage
            .write(Path::new("/bank/ALG/questions/q1/quizImage.png"), b"corrupt")
            .unwrap();

        let bundle = export(&storage, Path::new(ROOT), &Config::default(), 80).unwrap();

        assert_eq!(
            bundle.subjects[0].questions[0].quiz_photo,
            "data:image/png;base64,Y29ycnVwdA=="
        );
    }

    #[test]
    fn unreferenced_conventional_images_are_embedded() {
        let storage = bank();
        let dir = Path::new("/bank/PHYS/questions/q5");
        storage
            .write(
                &dir.join("question.json"),
                &encode_question(&QuestionData {
                    text: "Sketch the field lines.".to_string(),
                    original_text: Some(String::new()),
                    ..QuestionData::default()
                }),
            )
            .unwrap();
        storage.write(&dir.join("image.JPG"), &jpeg()).unwrap();
        storage.write(&dir.join("quizPhoto.png"), b"corrupt").unwrap();

        let bundle = export(&storage, Path::new(ROOT), &Config::default(), 80).unwrap();

        let question = &bundle.subjects[1].questions[0];
        assert!(question.image.starts_with("data:image/jpeg;base64,"));
        assert_eq!(question.quiz_photo, "data:image/png;base64,Y29ycnVwdA==");
        assert_eq!(question.original_text, "Sketch the field lines.");
    }

    #[test]
    fn answer_details_are_exported() {
        let storage = bank();
        let mut answer = Answer::new("A ring with division", true);
        answer.extra.insert(
            "explanation".to_string(),
            serde_json::Value::from("every non-zero element is a unit"),
        );
        storage
            .write(
                Path::new("/bank/PHYS/questions/q6/question.json"),
                &encode_question(&QuestionData {
                    text: "What is a field?".to_string(),
                    answers: vec![answer],
                    ..QuestionData::default()
                }),
            )
            .unwrap();

        let bundle = export(&storage, Path::new(ROOT), &Config::default(), 80).unwrap();
        let json = serde_json::to_value(&bundle.subjects[1]).unwrap();

        assert_eq!(
            json["questions"][0]["answers"][0]["explanation"],
            "every non-zero element is a unit"
        );
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let storage = bank();
        let mut config = Config::default();
        config.set_repository(Some("https://example.org/bank".to_string()));

        let bundle = export(&storage, Path::new(ROOT), &config, 80).unwrap();
        let json = serde_json::to_value(&bundle).unwrap();

        assert_eq!(json["metadata"]["repository"], "https://example.org/bank");
        assert!(json["metadata"]["generatedAt"].is_string());
        assert_eq!(json["subjects"][0]["topicMap"]["t1"], "First");
        assert_eq!(
            json["subjects"][0]["questions"][0]["questionType"],
            "multichoice"
        );
        assert!(json["subjects"][0]["questions"][0]["quizPhoto"].is_string());
    }
}
