//! SQL handling - lexing, safety validation, key-component extraction and intent classification

pub mod classifier;
pub mod lexer;
pub mod components;
pub mod validator;

pub use classifier::{FormatHint, QueryClassifier, QueryType};
pub use components::KeyComponents;
pub use validator::{validate, SqlValidator, ValidationResult};
