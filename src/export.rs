//! Self-contained export bundles.
//!
//! An export flattens the bank into a single JSON document, with every image
//! embedded as a size-reduced `data:` URI.

mod bundle;
mod pipeline;

pub use bundle::{
    Bundle, ExportedQuestion, ExportedSubject, FORMAT_VERSION, Metadata, SYNTAX_VERSION, export,
};
pub use pipeline::{EncodedImage, ImagePipeline, mime_for_name};
