mod extraction_schema;

pub use extraction_schema::{ExtractionSchema, PropertySchema};
