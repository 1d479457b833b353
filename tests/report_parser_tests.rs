mod common;

use common::*;
use octofhir_ig_gateway::*;
use proptest::prelude::*;

/// Output of an early CLI build, which printed no spaces before the colon.
const CLASSIC_BUILD_OUTPUT: &str = "\
Loading
  .. FHIR Version 4.0.1
  .. load IG from hl7.fhir.us.mdi#current
Validating
Success...validating /tmp/Bundle2022-01-12T101500.json: 1 errors, 2 warnings, 0 notes
Error @ Bundle.entry[0].resource.ofType(Composition).section[0] (line 40, col10): Section.code: minimum required = 1, but only found 0
Warning @ Bundle.entry[2].resource (line 77, col8): Unable to resolve the profile reference
Warning @ ?? : Best Practice Recommendation: In general, all observations should have a performer
";

#[test]
fn test_single_error_sample() {
    let report = ReportParser::default().parse(SINGLE_ERROR_OUTPUT);
    assert_eq!(
        report.issues(),
        &[Issue::new(
            Severity::Error,
            "Patient.gender",
            Location::at(5, 12),
            "Invalid code"
        )]
    );
}

#[test]
fn test_classic_build_output_with_both_variants() {
    for variant in [GrammarVariant::Classic, GrammarVariant::Tolerant] {
        let parsed = ReportParser::for_variant(variant).parse_detailed(CLASSIC_BUILD_OUTPUT);
        assert_eq!(
            parsed.summary,
            Some(SummaryBanner {
                errors: 1,
                warnings: 2,
                notes: 0
            })
        );
        let issues = parsed.report.issues();
        assert_eq!(issues.len(), 3, "variant {variant:?}");
        assert_eq!(
            issues[0].path,
            "Bundle.entry[0].resource.ofType(Composition).section[0]"
        );
        assert_eq!(issues[0].location, Location::at(40, 10));
        assert_eq!(issues[2].path, "??");
        assert_eq!(issues[2].location, Location::Unknown);
    }
}

#[test]
fn test_current_build_output() {
    let parsed = ReportParser::default().parse_detailed(CURRENT_BUILD_OUTPUT);
    let summary = parsed.summary.unwrap();
    assert_eq!((summary.errors, summary.warnings, summary.notes), (2, 1, 0));

    let report = parsed.report;
    assert_eq!(report.len(), 3);
    assert_eq!(report.count(Severity::Error), 2);
    assert_eq!(report.issues()[0].location, Location::at(5, 12));
    assert_eq!(
        report.issues()[1].message,
        "Patient.name: minimum required = 1, but only found 0"
    );
    assert_eq!(report.issues()[2].location, Location::Unknown);
    assert!(report.issues()[2].message.starts_with("Constraint failed: dom-6"));
}

#[test]
fn test_classic_grammar_misses_current_build_spacing() {
    let report = ReportParser::for_variant(GrammarVariant::Classic).parse(CURRENT_BUILD_OUTPUT);
    // Only the location-free line happens to fit the old layout.
    assert_eq!(report.len(), 1);
    assert_eq!(report.issues()[0].severity, Severity::Warning);
}

#[test]
fn test_all_ok_run() {
    let raw = "\
Validating
Done. Times: Loading: 00:10.950, validation: 00:00.301.
Success: 0 errors, 0 warnings, 1 notes
  Information: All OK
";
    let report = ReportParser::default().parse(raw);
    assert_eq!(report.len(), 1);
    assert_eq!(report.issues()[0].severity, Severity::Information);
    assert_eq!(report.issues()[0].message, "ALL OK");
    assert_eq!(report.issues()[0].path, "");
}

#[test]
fn test_windows_line_endings() {
    let raw = SINGLE_ERROR_OUTPUT.replace('\n', "\r\n");
    let report = ReportParser::default().parse(&raw);
    assert_eq!(report.issues()[0].message, "Invalid code");
}

proptest! {
    #[test]
    fn parse_is_pure(raw in "\\PC{0,400}") {
        let parser = ReportParser::default();
        prop_assert_eq!(parser.parse(&raw), parser.parse(&raw));
    }

    #[test]
    fn parse_never_panics_on_line_soup(
        lines in prop::collection::vec(
            prop_oneof![
                Just("1 errors, 0 warnings, 0 notes".to_string()),
                Just("Information: All OK".to_string()),
                "(Error|Warning|Fatal|Note) @ [A-Za-z.\\[\\]0-9?]{0,20} (\\(line [0-9]{1,12}, col[0-9]{1,12}\\))? ?: .{0,30}",
                "\\PC{0,60}",
            ],
            0..30,
        )
    ) {
        let raw = lines.join("\n");
        for variant in [GrammarVariant::Classic, GrammarVariant::Tolerant] {
            let report = ReportParser::for_variant(variant).parse(&raw);
            prop_assert!(report.len() <= lines.len());
        }
    }

    #[test]
    fn known_locations_round_trip(line in 1u32..100_000, col in 1u32..10_000) {
        let raw = format!("Error @ Patient.name (line {line}, col{col}): msg");
        let report = ReportParser::default().parse(&raw);
        prop_assert_eq!(report.issues()[0].location, Location::at(line, col));
    }
}
