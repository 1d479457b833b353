//! Normalization of the validator's free-text report.

pub mod grammar;
pub mod parser;

pub use grammar::{GrammarVariant, IssueLine, ReportGrammar, ReportLine, SummaryBanner};
pub use parser::{ParsedReport, ReportParser};
