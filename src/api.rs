//! Administrative actions as JSON requests and responses.
//!
//! A request is a JSON object tagged by `action`:
//!
//! ```json
//! { "action": "deleteQuestion", "folderPath": "/bank",
//!   "data": { "subjectCode": "MATH", "questionId": "q1" } }
//! ```
//!
//! Every request produces a [`Response`], either `{"success": true, ...}` or
//! `{"error": "...", "kind": "..."}`. Requests that cannot be decoded are
//! rejected as validation errors before anything is read or written.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::Arc,
};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    domain::{ImageSlot, QuestionData, Subject, SubjectData, Topic},
    export::Bundle,
    storage::{ErrorKind, FsStorage, Skipped, Storage, Store, StoreError},
};

/// A request together with the bank it addresses.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Root of the bank; the caller's default when absent.
    #[serde(default)]
    pub folder_path: Option<PathBuf>,
    /// The action to perform.
    #[serde(flatten)]
    pub request: Request,
}

/// An administrative action.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(
    tag = "action",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Request {
    /// Load every subject with its questions.
    LoadSubjects,
    /// Create or replace a question.
    SaveQuestion {
        /// What to save.
        data: SaveQuestion,
    },
    /// Delete a question.
    DeleteQuestion {
        /// Which question.
        data: QuestionRef,
    },
    /// Create or replace a subject, cascading topic id changes.
    SaveSubject {
        /// What to save.
        data: SaveSubject,
    },
    /// Build an export bundle.
    ExportQuestions {
        /// Image quality (0-100); the configured default when absent.
        #[serde(default)]
        image_quality: Option<u8>,
    },
    /// Delete a file, relative to the bank root.
    DeleteFile {
        /// Path of the file.
        file_path: PathBuf,
    },
    /// Read an image, relative to the bank root.
    ReadImage {
        /// Path of the image.
        path: PathBuf,
    },
    /// Store an image for a question.
    UploadImage {
        /// What to store.
        data: UploadImage,
    },
}

/// Identifies a question.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRef {
    /// Subject code.
    pub subject_code: String,
    /// Question id.
    pub question_id: String,
}

/// Payload of [`Request::SaveQuestion`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveQuestion {
    /// Subject code.
    pub subject_code: String,
    /// Question id.
    pub question_id: String,
    /// The question document.
    pub question_data: QuestionData,
}

/// Payload of [`Request::SaveSubject`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSubject {
    /// Subject code.
    pub subject_code: String,
    /// The subject document.
    pub subject_data: SubjectData,
    /// Topics as they were before the edit.
    #[serde(default)]
    pub original_topics: Option<Vec<Topic>>,
}

/// Payload of [`Request::UploadImage`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadImage {
    /// Subject code.
    pub subject_code: String,
    /// Question id.
    pub question_id: String,
    /// Which slot the image fills.
    #[serde(default = "default_slot")]
    pub image_type: ImageSlot,
    /// Original filename; only its extension is kept.
    pub filename: String,
    /// Base64-encoded image bytes.
    pub content: String,
}

const fn default_slot() -> ImageSlot {
    ImageSlot::Image
}

/// The answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    /// The action succeeded.
    Success {
        /// Always `true`.
        success: bool,
        /// Action-specific result.
        #[serde(flatten)]
        payload: Option<Payload>,
    },
    /// The action failed.
    Failure {
        /// Human-readable message.
        error: String,
        /// Error category.
        kind: ErrorKind,
    },
}

/// Action-specific result of a successful [`Response`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum Payload {
    /// Result of [`Request::LoadSubjects`].
    Subjects {
        /// Subjects that loaded.
        subjects: Vec<Subject>,
        /// Entries that were left out.
        skipped: Vec<Skipped>,
    },
    /// Result of [`Request::SaveSubject`].
    SavedSubject {
        /// Questions whose topic references were rewritten.
        rewritten_questions: Vec<String>,
    },
    /// Result of [`Request::ExportQuestions`].
    Export(Bundle),
    /// Result of [`Request::ReadImage`].
    Image {
        /// The image as a `data:` URI.
        data_uri: String,
    },
    /// Result of [`Request::UploadImage`].
    Uploaded {
        /// Name the image was stored under.
        filename: String,
    },
}

impl Response {
    const fn ok(payload: Option<Payload>) -> Self {
        Self::Success {
            success: true,
            payload,
        }
    }

    /// Whether the action succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl From<StoreError> for Response {
    fn from(error: StoreError) -> Self {
        Self::Failure {
            kind: error.kind(),
            error: error.to_string(),
        }
    }
}

impl From<Result<Option<Payload>, StoreError>> for Response {
    fn from(result: Result<Option<Payload>, StoreError>) -> Self {
        result.map_or_else(Self::from, Self::ok)
    }
}

/// A long-lived request handler.
///
/// Stores are opened on first use and kept, one per bank root, so requests
/// addressing the same bank share its per-subject locks.
pub struct Service<S> {
    default_root: PathBuf,
    storage: S,
    stores: Mutex<HashMap<PathBuf, Arc<Store<S>>>>,
}

impl Service<FsStorage> {
    /// A service over the local filesystem, addressing `default_root` unless
    /// a request names another bank.
    #[must_use]
    pub fn new(default_root: impl Into<PathBuf>) -> Self {
        Self::with_storage(FsStorage, default_root)
    }
}

impl<S: Storage + Clone> Service<S> {
    /// A service over `storage`; every bank it opens shares that backend.
    #[must_use]
    pub fn with_storage(storage: S, default_root: impl Into<PathBuf>) -> Self {
        Self {
            default_root: default_root.into(),
            storage,
            stores: Mutex::default(),
        }
    }

    /// The store for `root`, or for the default root.
    pub fn store(&self, root: Option<PathBuf>) -> Arc<Store<S>> {
        let root = root.unwrap_or_else(|| self.default_root.clone());
        self.stores
            .lock()
            .entry(root)
            .or_insert_with_key(|root| {
                tracing::debug!("Opening bank at {}", root.display());
                Arc::new(Store::open(self.storage.clone(), root.clone()))
            })
            .clone()
    }

    /// Decode a request from JSON and run it against the bank it names.
    #[must_use]
    pub fn handle(&self, body: &[u8]) -> Response {
        let envelope: Envelope = match serde_json::from_slice(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!("Rejected request: {e}");
                return StoreError::Validation(e.to_string()).into();
            }
        };
        let store = self.store(envelope.folder_path);
        dispatch(&*store, envelope.request)
    }
}

/// Run a request against a store.
#[tracing::instrument(level = "debug", skip_all)]
pub fn dispatch<S: Storage>(store: &Store<S>, request: Request) -> Response {
    let result = match request {
        Request::LoadSubjects => store.list_subjects().map(|listing| {
            Some(Payload::Subjects {
                subjects: listing.items,
                skipped: listing.skipped,
            })
        }),
        Request::SaveQuestion { data } => store
            .save_question(&data.subject_code, &data.question_id, &data.question_data)
            .map(|()| None),
        Request::DeleteQuestion { data } => store
            .delete_question(&data.subject_code, &data.question_id)
            .map(|()| None),
        Request::SaveSubject { data } => store
            .save_subject(
                &data.subject_code,
                &data.subject_data,
                data.original_topics.as_deref(),
            )
            .map(|saved| {
                Some(Payload::SavedSubject {
                    rewritten_questions: saved.rewritten,
                })
            }),
        Request::ExportQuestions { image_quality } => {
            store.export(image_quality).map(|bundle| Some(Payload::Export(bundle)))
        }
        Request::DeleteFile { file_path } => store.delete_file(&file_path).map(|()| None),
        Request::ReadImage { path } => store.read_image(&path).map(|image| {
            Some(Payload::Image {
                data_uri: image.to_data_uri(),
            })
        }),
        Request::UploadImage { data } => upload(store, &data),
    };
    if let Err(e) = &result {
        tracing::warn!("Request failed: {e}");
    }
    result.into()
}

fn upload<S: Storage>(store: &Store<S>, data: &UploadImage) -> Result<Option<Payload>, StoreError> {
    let bytes = STANDARD
        .decode(data.content.as_bytes())
        .map_err(|e| StoreError::Validation(format!("image content is not base64: {e}")))?;
    let filename = store.save_image(
        &data.subject_code,
        &data.question_id,
        data.image_type,
        &data.filename,
        &bytes,
    )?;
    Ok(Some(Payload::Uploaded { filename }))
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use tempfile::TempDir;

    use super::*;
    use crate::storage::MemoryStorage;

    fn store() -> Store<MemoryStorage> {
        Store::open(MemoryStorage::new(), "/bank")
    }

    fn run(store: &Store<MemoryStorage>, request: Value) -> Value {
        let request: Request = serde_json::from_value(request).unwrap();
        serde_json::to_value(dispatch(store, request)).unwrap()
    }

    #[test]
    fn save_subject_then_question_then_load() {
        let store = store();

        let saved = run(
            &store,
            json!({
                "action": "saveSubject",
                "data": {
                    "subjectCode": "MATH",
                    "subjectData": {"name": "Mathematics", "topics": [{"id": "t1", "name": "Sets"}]}
                }
            }),
        );
        assert_eq!(saved, json!({"success": true, "rewrittenQuestions": []}));

        let saved = run(
            &store,
            json!({
                "action": "saveQuestion",
                "data": {
                    "subjectCode": "MATH",
                    "questionId": "q1",
                    "questionData": {
                        "questionType": "open",
                        "question": "Define a set.",
                        "topics": ["t1"]
                    }
                }
            }),
        );
        assert_eq!(saved, json!({"success": true}));

        let loaded = run(&store, json!({"action": "loadSubjects"}));
        assert_eq!(loaded["success"], true);
        assert_eq!(loaded["subjects"][0]["code"], "MATH");
        assert_eq!(loaded["subjects"][0]["questions"][0]["id"], "q1");
        assert_eq!(loaded["subjects"][0]["questions"][0]["questionType"], "open");
        assert_eq!(loaded["skipped"], json!([]));
    }

    #[test]
    fn missing_required_fields_are_validation_errors() {
        let response = Service::new("/nonexistent").handle(
            br#"{"action": "saveQuestion", "data": {"subjectCode": "MATH"}}"#,
        );
        let json = serde_json::to_value(response).unwrap();
        assert_eq!(json["kind"], "validation");
        assert!(json["error"].as_str().unwrap().contains("questionId"));
    }

    #[test]
    fn unknown_actions_are_validation_errors() {
        let response = Service::new("/nonexistent").handle(br#"{"action": "format"}"#);
        assert!(!response.is_success());
    }

    #[test]
    fn traversal_is_a_validation_error() {
        let store = store();
        let response = run(
            &store,
            json!({"action": "deleteFile", "filePath": "../../etc/passwd"}),
        );
        assert_eq!(response["kind"], "validation");
    }

    #[test]
    fn ambiguous_topics_are_reported() {
        let store = store();
        let response = run(
            &store,
            json!({
                "action": "saveSubject",
                "data": {
                    "subjectCode": "MATH",
                    "subjectData": {"name": "M", "topics": [{"id": "t3", "name": "Sets"}]},
                    "originalTopics": [{"id": "t1", "name": "Sets"}, {"id": "t2", "name": "Sets"}]
                }
            }),
        );
        assert_eq!(response["kind"], "validation");
        assert!(response["error"].as_str().unwrap().contains("Sets"));
    }

    #[test]
    fn missing_image_is_not_found() {
        let store = store();
        let response = run(
            &store,
            json!({"action": "readImage", "path": "MATH/questions/q1/image.png"}),
        );
        assert_eq!(response["kind"], "notFound");
    }

    #[test]
    fn upload_then_read_image() {
        let store = store();
        let uploaded = run(
            &store,
            json!({
                "action": "uploadImage",
                "data": {
                    "subjectCode": "MATH",
                    "questionId": "q1",
                    "imageType": "quizImage",
                    "filename": "photo.GIF",
                    "content": STANDARD.encode(b"GIF89a")
                }
            }),
        );
        assert_eq!(uploaded, json!({"success": true, "filename": "quizImage.gif"}));

        let image = run(
            &store,
            json!({"action": "readImage", "path": "MATH/questions/q1/quizImage.gif"}),
        );
        assert_eq!(
            image,
            json!({"success": true, "dataUri": format!("data:image/gif;base64,{}", STANDARD.encode(b"GIF89a"))})
        );
    }

    #[test]
    fn export_returns_bundle_fields() {
        let tmp = TempDir::new().unwrap();
        let body = json!({
            "action": "exportQuestions",
            "folderPath": tmp.path(),
            "imageQuality": 50
        });

        let response = Service::new("/unused").handle(body.to_string().as_bytes());
        let json = serde_json::to_value(response).unwrap();

        assert_eq!(json["success"], true);
        assert_eq!(json["metadata"]["version"], "1.2.0");
        assert_eq!(json["subjects"], json!([]));
    }

    #[test]
    fn requests_for_one_bank_share_a_store() {
        let tmp = TempDir::new().unwrap();
        let service = Service::new(tmp.path());

        let default = service.store(None);
        let named = service.store(Some(tmp.path().to_path_buf()));
        let other = service.store(Some(tmp.path().join("other")));

        assert!(Arc::ptr_eq(&default, &named));
        assert!(!Arc::ptr_eq(&default, &other));
    }

    #[test]
    fn concurrent_requests_serialise_on_the_subject_lock() {
        let tmp = TempDir::new().unwrap();
        let service = Service::new(tmp.path());
        let save = |topics: serde_json::Value| {
            json!({
                "action": "saveSubject",
                "data": {
                    "subjectCode": "MATH",
                    "subjectData": {"name": "Mathematics", "topics": topics}
                }
            })
            .to_string()
        };
        assert!(service.handle(save(json!([{"id": "t1", "name": "Sets"}])).as_bytes()).is_success());
        let question = json!({
            "action": "saveQuestion",
            "data": {
                "subjectCode": "MATH",
                "questionId": "q1",
                "questionData": {"questionType": "open", "question": "Define a set.", "topics": ["t1"]}
            }
        });
        assert!(service.handle(question.to_string().as_bytes()).is_success());

        std::thread::scope(|scope| {
            for i in 0..4 {
                let service = &service;
                let body = save(json!([{"id": format!("t{}", i + 2), "name": "Sets"}]));
                scope.spawn(move || assert!(service.handle(body.as_bytes()).is_success()));
            }
        });

        let store = service.store(None);
        let (subject, _) = store.load_subject("MATH").unwrap();
        let topics = &subject.questions[0].data.topics;
        assert_eq!(topics.len(), 1);
        assert_eq!(subject.data.topics[0].id, topics[0]);
    }
}
