//! Utilities module - text helpers and question sanitization

pub mod input;
pub mod text_utils;

// Re-export commonly used utilities
pub use input::sanitize_question;
pub use text_utils::TextUtils;
