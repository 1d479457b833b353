//! Line grammar for the validator's human-oriented report.
//!
//! The engine's text layout is advisory: different builds print the same
//! information with slightly different spacing, casing and pluralisation.
//! Each [`GrammarVariant`] pins the layout of one family of builds.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::core::types::{Location, Severity};

/// Family of engine builds whose report layout the grammar accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrammarVariant {
    /// Exact layout of early CLI builds:
    /// `Error @ Patient.name (line 3, col10): message`.
    Classic,
    /// Current builds and the drift observed across them: ` : ` separators,
    /// any casing, singular counts, free-form paths.
    #[default]
    Tolerant,
}

/// Counts announced by the banner that precedes the issue listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryBanner {
    pub errors: u64,
    pub warnings: u64,
    pub notes: u64,
}

/// An issue line split into its raw parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssueLine<'a> {
    pub severity: Severity,
    pub path: &'a str,
    /// The parenthesised location clause, if the line had one.
    pub location: Option<&'a str>,
    pub message: &'a str,
}

/// Classification of a single report line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportLine<'a> {
    Banner(SummaryBanner),
    Issue(IssueLine<'a>),
    AllOk,
    Noise,
}

struct Patterns {
    banner: Regex,
    issue: Regex,
    all_ok: Regex,
    location: Regex,
}

impl Patterns {
    fn compile(banner: &str, issue: &str, all_ok: &str, location: &str) -> Self {
        let compile = |source: &str| Regex::new(source).expect("report grammar pattern");
        Self {
            banner: compile(banner),
            issue: compile(issue),
            all_ok: compile(all_ok),
            location: compile(location),
        }
    }
}

static CLASSIC: LazyLock<Patterns> = LazyLock::new(|| {
    Patterns::compile(
        r"([\d,]+) errors, ([\d,]+) warnings, ([\d,]+) notes",
        r"(?P<severity>Warning|Error|Note|Information|Fatal) @ (?P<path>[\w\[\]\(\)]+(?:\.[\w\[\]\(\)]+)*|\?\?|\(document\)|/f:\S*)\s(?P<location>\(line \d+, col\d+\))?: (?P<message>.*)",
        r"Information: All OK",
        r"\(line (\d+), col(\d+)\)",
    )
});

static TOLERANT: LazyLock<Patterns> = LazyLock::new(|| {
    Patterns::compile(
        r"(?i)([\d,]+)\s+errors?,\s*([\d,]+)\s+warnings?,\s*([\d,]+)\s+notes?",
        r"(?i)\b(?P<severity>Warning|Error|Note|Information|Fatal)\s*@\s*(?P<path>\(document\)|\?\?|\S+?)\s*(?P<location>\(line[^)]*\))?\s*:(?:\s+|$)(?P<message>.*)",
        r"(?i)information:\s*all\s+ok",
        r"(?i)\(line\s*(\d+)\s*,\s*col(?:umn)?\s*(\d+)\s*\)",
    )
});

/// Stateless matcher for one line of report text.
#[derive(Clone, Copy)]
pub struct ReportGrammar {
    variant: GrammarVariant,
    patterns: &'static Patterns,
}

impl ReportGrammar {
    pub fn new(variant: GrammarVariant) -> Self {
        let patterns = match variant {
            GrammarVariant::Classic => &*CLASSIC,
            GrammarVariant::Tolerant => &*TOLERANT,
        };
        Self { variant, patterns }
    }

    pub fn variant(&self) -> GrammarVariant {
        self.variant
    }

    /// Classify a line. Banner wins over issue, issue wins over all-clear.
    pub fn classify<'a>(&self, line: &'a str) -> ReportLine<'a> {
        if let Some(banner) = self.match_banner(line) {
            return ReportLine::Banner(banner);
        }
        if let Some(issue) = self.match_issue(line) {
            return ReportLine::Issue(issue);
        }
        if self.patterns.all_ok.is_match(line) {
            return ReportLine::AllOk;
        }
        ReportLine::Noise
    }

    pub fn match_banner(&self, line: &str) -> Option<SummaryBanner> {
        let caps = self.patterns.banner.captures(line)?;
        Some(SummaryBanner {
            errors: parse_count(&caps[1]),
            warnings: parse_count(&caps[2]),
            notes: parse_count(&caps[3]),
        })
    }

    pub fn match_issue<'a>(&self, line: &'a str) -> Option<IssueLine<'a>> {
        let caps = self.patterns.issue.captures(line)?;
        let severity = caps.name("severity")?.as_str().parse().ok()?;
        Some(IssueLine {
            severity,
            path: caps.name("path")?.as_str(),
            location: caps.name("location").map(|m| m.as_str()),
            message: caps.name("message").map_or("", |m| m.as_str().trim_end()),
        })
    }

    /// Split a location clause into line and column. Anything that does not
    /// decompose cleanly, including numbers that overflow, is `Unknown`.
    pub fn decompose_location(&self, clause: &str) -> Location {
        let Some(caps) = self.patterns.location.captures(clause) else {
            return Location::Unknown;
        };
        match (caps[1].parse::<u32>(), caps[2].parse::<u32>()) {
            (Ok(line), Ok(column)) => Location::At { line, column },
            _ => Location::Unknown,
        }
    }
}

impl Default for ReportGrammar {
    fn default() -> Self {
        Self::new(GrammarVariant::default())
    }
}

impl std::fmt::Debug for ReportGrammar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportGrammar")
            .field("variant", &self.variant)
            .finish_non_exhaustive()
    }
}

fn parse_count(digits: &str) -> u64 {
    digits.replace(',', "").parse().unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn both() -> [ReportGrammar; 2] {
        [
            ReportGrammar::new(GrammarVariant::Classic),
            ReportGrammar::new(GrammarVariant::Tolerant),
        ]
    }

    #[test]
    fn test_banner_with_grouped_counts() {
        for grammar in both() {
            let line = "*FAILURE*: 1,204 errors, 3 warnings, 0 notes";
            assert_eq!(
                grammar.classify(line),
                ReportLine::Banner(SummaryBanner {
                    errors: 1204,
                    warnings: 3,
                    notes: 0
                })
            );
        }
    }

    #[test]
    fn test_banner_wins_over_issue() {
        let grammar = ReportGrammar::default();
        let line = "Error @ ?? : 1 errors, 0 warnings, 0 notes";
        assert!(matches!(grammar.classify(line), ReportLine::Banner(_)));
    }

    #[test]
    fn test_issue_line_with_location() {
        for grammar in both() {
            let issue = grammar
                .match_issue("Error @ Patient.name (line 3, col10): msg")
                .unwrap();
            assert_eq!(issue.severity, Severity::Error);
            assert_eq!(issue.path, "Patient.name");
            assert_eq!(issue.location, Some("(line 3, col10)"));
            assert_eq!(issue.message, "msg");
        }
    }

    #[test]
    fn test_issue_line_without_location() {
        for grammar in both() {
            let issue = grammar.match_issue("  Warning @ ?? : Best practice").unwrap();
            assert_eq!(issue.path, "??");
            assert_eq!(issue.location, None);
            assert_eq!(issue.message, "Best practice");
        }
    }

    #[test]
    fn test_document_and_xml_paths() {
        for grammar in both() {
            let issue = grammar
                .match_issue("Information @ (document) : Validated against profile")
                .unwrap();
            assert_eq!(issue.path, "(document)");

            let issue = grammar
                .match_issue("Error @ /f:Patient/f:gender (line 4, col5): Unknown code")
                .unwrap();
            assert_eq!(issue.path, "/f:Patient/f:gender");
            assert_eq!(issue.message, "Unknown code");
        }
    }

    #[test]
    fn test_bracketed_and_function_paths() {
        for grammar in both() {
            let issue = grammar
                .match_issue(
                    "Error @ Bundle.entry[1].resource.ofType(Patient).name[0] (line 22, col8): Missing family",
                )
                .unwrap();
            assert_eq!(
                issue.path,
                "Bundle.entry[1].resource.ofType(Patient).name[0]"
            );
        }
    }

    #[test]
    fn test_current_build_spacing_only_tolerant() {
        let line = "  Error @ Patient.gender (line 5, col12) : Invalid code";
        let classic = ReportGrammar::new(GrammarVariant::Classic);
        let tolerant = ReportGrammar::new(GrammarVariant::Tolerant);

        assert_eq!(classic.match_issue(line), None);
        let issue = tolerant.match_issue(line).unwrap();
        assert_eq!(issue.path, "Patient.gender");
        assert_eq!(issue.location, Some("(line 5, col12)"));
        assert_eq!(issue.message, "Invalid code");
    }

    #[test]
    fn test_tolerant_accepts_case_drift() {
        let grammar = ReportGrammar::new(GrammarVariant::Tolerant);
        let issue = grammar
            .match_issue("ERROR @ Observation.status (Line 2, Col 4) : bad")
            .unwrap();
        assert_eq!(issue.severity, Severity::Error);
        assert_eq!(
            grammar.decompose_location(issue.location.unwrap()),
            Location::at(2, 4)
        );
        assert!(grammar.match_banner("1 error, 1 warning, 1 note").is_some());
    }

    #[test]
    fn test_colon_inside_path_is_not_a_separator() {
        let grammar = ReportGrammar::new(GrammarVariant::Tolerant);
        let issue = grammar
            .match_issue("Warning @ Patient.extension('http://example.org/ext') : Unknown extension")
            .unwrap();
        assert_eq!(issue.path, "Patient.extension('http://example.org/ext')");
        assert_eq!(issue.message, "Unknown extension");
    }

    #[test]
    fn test_all_ok_with_leading_tags() {
        for grammar in both() {
            assert_eq!(grammar.classify("Information: All OK"), ReportLine::AllOk);
            assert_eq!(grammar.classify("  [main] Information: All OK"), ReportLine::AllOk);
        }
    }

    #[test]
    fn test_noise() {
        for grammar in both() {
            assert_eq!(grammar.classify("  Load FHIR v4.0.1 from hl7.fhir.r4.core#4.0.1"), ReportLine::Noise);
            assert_eq!(grammar.classify(""), ReportLine::Noise);
        }
    }

    #[test]
    fn test_location_decomposition_failure_is_unknown() {
        let grammar = ReportGrammar::default();
        assert_eq!(grammar.decompose_location("(line 3, col10)"), Location::at(3, 10));
        assert_eq!(
            grammar.decompose_location("(line 99999999999, col1)"),
            Location::Unknown
        );
        assert_eq!(grammar.decompose_location("(line ?, col?)"), Location::Unknown);
    }
}
