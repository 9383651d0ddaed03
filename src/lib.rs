//! File-backed question banks
//!
//! A question bank is a directory tree of JSON documents: one directory per
//! subject, one directory per question, with images stored next to the
//! question that uses them. This crate loads and mutates that tree, keeps the
//! topic references of questions consistent when topic ids change, and
//! assembles self-contained export bundles.

pub mod api;
pub mod domain;
pub use domain::{
    Answer, Config, Extra, ImageSlot, PathError, Question, QuestionData, QuestionType, Segment,
    Subject, SubjectData, Topic,
};

pub mod export;
pub use export::{Bundle, ImagePipeline};

pub mod oracle;

/// Persistence of subjects and questions.
pub mod storage;
pub use storage::{ErrorKind, FsStorage, Listing, MemoryStorage, Storage, Store, StoreError};
