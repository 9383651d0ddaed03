//! Domain models for the question bank.
//!
//! Subjects own an ordered topic catalog and a set of questions. Questions
//! refer to topics by id only; the store keeps those references consistent.

mod config;
pub use config::Config;

mod question;
pub use question::{Answer, Extra, ImageSlot, Question, QuestionData, QuestionType};

mod segment;
pub use segment::{PathError, Segment};

mod subject;
pub use subject::{Subject, SubjectData, Topic};
