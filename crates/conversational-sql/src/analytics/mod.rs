//! Analytics module - presentation and statistics of query results

pub mod formatter;
pub mod insights;

pub use formatter::ResultFormatter;
pub use insights::{Insights, InsightsGenerator};
