//! Persistence of the question bank.
//!
//! The bank is a directory tree of JSON documents. Everything in this module
//! is written against the [`Storage`] port, so the same algorithms run on the
//! local filesystem ([`FsStorage`]) and in memory ([`MemoryStorage`]).

pub mod backend;
pub mod document;
mod error;
pub mod loader;
pub mod migrator;
pub mod path_resolver;
mod store;
pub mod validate;

pub use backend::{DirEntry, FsStorage, MemoryStorage, Storage};
pub use error::{ErrorKind, StoreError};
pub use loader::{Listing, Skipped};
pub use migrator::{AmbiguousTopicNames, CascadeError, CascadeReport, TopicRemap};
pub use store::{SavedSubject, Store};
pub use validate::{Issue, validate};
