use serde::{Deserialize, Serialize};

use super::grammar::{GrammarVariant, ReportGrammar, ReportLine, SummaryBanner};
use crate::core::config::ReportConfig;
use crate::core::types::{Issue, Location, ValidationReport};

/// Parsed report together with the banner counts, when a banner was seen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedReport {
    pub summary: Option<SummaryBanner>,
    pub report: ValidationReport,
}

/// Turns captured validator output into an ordered list of issues.
///
/// Parsing is a pure function of the input text and never fails: lines the
/// grammar does not recognise are dropped, and the worst case is an empty
/// report.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportParser {
    grammar: ReportGrammar,
    require_banner: bool,
}

impl ReportParser {
    pub fn new(grammar: ReportGrammar) -> Self {
        Self {
            grammar,
            require_banner: false,
        }
    }

    pub fn from_config(config: &ReportConfig) -> Self {
        Self::new(ReportGrammar::new(config.variant)).with_require_banner(config.require_banner)
    }

    pub fn for_variant(variant: GrammarVariant) -> Self {
        Self::new(ReportGrammar::new(variant))
    }

    /// When set, output without a summary banner yields an empty report
    /// instead of being scanned in full.
    pub fn with_require_banner(mut self, require_banner: bool) -> Self {
        self.require_banner = require_banner;
        self
    }

    pub fn parse(&self, raw: &str) -> ValidationReport {
        self.parse_detailed(raw).report
    }

    pub fn parse_detailed(&self, raw: &str) -> ParsedReport {
        let lines: Vec<&str> = raw
            .split('\n')
            .map(|line| line.trim_end_matches('\r'))
            .collect();

        let banner = lines
            .iter()
            .enumerate()
            .find_map(|(index, line)| self.grammar.match_banner(line).map(|b| (index, b)));

        let (start, summary) = match banner {
            Some((index, summary)) => (index + 1, Some(summary)),
            None if self.require_banner => {
                return ParsedReport::default();
            }
            None => (0, None),
        };

        let mut report = ValidationReport::new();
        for line in &lines[start..] {
            match self.grammar.classify(line) {
                ReportLine::Issue(issue) => {
                    let location = issue
                        .location
                        .map_or(Location::Unknown, |clause| {
                            self.grammar.decompose_location(clause)
                        });
                    report.push(Issue::new(issue.severity, issue.path, location, issue.message));
                }
                ReportLine::AllOk => report.push(Issue::all_ok()),
                ReportLine::Banner(_) | ReportLine::Noise => {}
            }
        }

        ParsedReport { summary, report }
    }
}
