pub mod classifier;
pub mod config;
pub mod db;
pub mod error;
pub mod extractor;
pub mod record;
pub mod site;
pub mod stats;
pub mod validator;

pub use classifier::{classify, Classification, PageCategory, PageSignals};
pub use error::{ErrorKind, ExtractError};
pub use extractor::{ExtractionResult, Extractor, ExtractorConfig};
pub use record::{calculate_accuracy, is_field_populated, ExtractedRecord, FieldValue};
pub use site::SiteType;
pub use validator::{apply_validation_penalties, ValidationResult};
