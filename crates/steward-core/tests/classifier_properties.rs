//! End-to-end properties of the decision pipeline.

use steward_core::{
    analyze, assemble_verdict, check_sections, classify, evaluate, CiStatus, FileChange,
    MergeMode, PolicyConfig, PrSnapshot, RiskLevel, RiskThresholds, SectionSpec,
};

const FULL_BODY: &str = "## Intent\nFix login.\n\n## Approach\nRefactor.\n\n## Risk/Impact\nLow.\n\n## Test Plan\ncargo test\n\n## Docs/Notes\nNone.\n";

const BODY_WITHOUT_TEST_PLAN: &str =
    "## Intent\nFix login.\n\n## Approach\nRefactor.\n\n## Risk/Impact\nLow.\n\n## Docs/Notes\nNone.\n";

fn files(items: &[(&str, i64, i64)]) -> Vec<FileChange> {
    items
        .iter()
        .map(|(p, a, d)| FileChange::new(*p, *a, *d))
        .collect()
}

// ---- Scenarios ----

#[test]
fn empty_change_is_l0_and_eligible_when_everything_else_holds() {
    let policy = PolicyConfig::default();
    let snap = PrSnapshot::new(1)
        .with_body(FULL_BODY)
        .with_ci(CiStatus::passing());
    let v = evaluate(&snap, &policy);
    assert_eq!(v.risk_level, RiskLevel::L0);
    assert!(v.missing_sections.is_empty());
    assert!(v.auto_merge_eligible);
    assert_eq!(v.label_to_apply, "risk-L0");
}

#[test]
fn workflow_change_escalates_to_l3_and_is_never_eligible() {
    let policy = PolicyConfig::default();
    let snap = PrSnapshot::new(2)
        .with_body(FULL_BODY)
        .with_file("src/core.go", 40, 0)
        .with_file(".github/workflows/ci.yml", 2, 0)
        .with_ci(CiStatus::passing());
    let v = evaluate(&snap, &policy);
    assert_eq!(v.risk_level, RiskLevel::L3);
    assert!(!v.auto_merge_eligible);
    assert!(v
        .reasons
        .iter()
        .any(|r| r.contains(".github/workflows/**")));
}

#[test]
fn l3_cannot_be_configured_for_auto_merge() {
    assert!(PolicyConfig::from_yaml_str("auto_merge_levels: [L0, L1, L2, L3]\n").is_err());
}

#[test]
fn missing_test_plan_keeps_l1_but_blocks_merge() {
    let policy = PolicyConfig::default();
    let snap = PrSnapshot::new(3)
        .with_body(BODY_WITHOUT_TEST_PLAN)
        .with_file("src/a.ts", 20, 0)
        .with_file("src/b.ts", 20, 0)
        .with_file("src/c.ts", 10, 10)
        .with_ci(CiStatus::passing());
    let v = evaluate(&snap, &policy);
    assert_eq!(v.risk_level, RiskLevel::L1);
    assert_eq!(v.missing_sections, vec!["Test Plan"]);
    assert!(!v.auto_merge_eligible);
}

// ---- Monotonicity ----

#[test]
fn adding_a_protected_file_never_lowers_risk() {
    let policy = PolicyConfig::default();
    let bases: Vec<Vec<FileChange>> = vec![
        Vec::new(),
        files(&[("README.md", 3, 0)]),
        files(&[("src/lib.rs", 30, 2)]),
        files(&[("src/big.rs", 700, 0)]),
    ];
    for base in bases {
        let sections = check_sections(Some(FULL_BODY), &policy.required_sections);
        let before = classify(&analyze(&base, &[], &policy), &sections, &policy.thresholds);

        for protected in ["Dockerfile", "db/migrations/001.sql", "src/auth/token.rs"] {
            let mut more = base.clone();
            more.push(FileChange::new(protected, 1, 0));
            let after = classify(&analyze(&more, &[], &policy), &sections, &policy.thresholds);
            assert!(
                after.risk_level >= before.risk_level,
                "{protected}: {:?} < {:?}",
                after.risk_level,
                before.risk_level
            );
            assert!(after.risk_level >= RiskLevel::L2);
        }
    }
}

#[test]
fn growing_a_change_never_lowers_risk() {
    let policy = PolicyConfig::default();
    let sections = check_sections(Some(FULL_BODY), &policy.required_sections);
    let mut previous = RiskLevel::L0;
    for lines in [0i64, 10, 80, 81, 300, 500, 501, 5000] {
        let cs = analyze(&files(&[("src/lib.rs", lines, 0)]), &[], &policy);
        let level = classify(&cs, &sections, &policy.thresholds).risk_level;
        assert!(level >= previous, "{lines} lines: {level} < {previous}");
        previous = level;
    }
}

// ---- Idempotence and purity ----

#[test]
fn repeated_evaluation_is_identical() {
    let policy = PolicyConfig::from_yaml_str("reviewer_rules: [\"src/**=alice,bob\"]\n").unwrap();
    let snap = PrSnapshot::new(7)
        .with_body("## Intent\nx\n")
        .with_file("src/a.rs", 5, 5)
        .with_file("Dockerfile", 1, 0)
        .with_labels(&["enhancement"]);
    let first = evaluate(&snap, &policy);
    for _ in 0..5 {
        assert_eq!(evaluate(&snap, &policy), first);
    }
}

// ---- Section order invariance ----

#[test]
fn section_order_in_body_does_not_matter() {
    let policy = PolicyConfig::default();
    let reordered = "## Docs/Notes\nn\n## Test Plan\nt\n## Intent\ni\n## Risk/Impact\nr\n## Approach\na\n";
    let a = check_sections(Some(FULL_BODY), &policy.required_sections);
    let b = check_sections(Some(reordered), &policy.required_sections);
    assert_eq!(a, b);
    assert!(b.is_complete());

    let partial_a = "## Intent\ni\n## Approach\na\n";
    let partial_b = "## Approach\na\n## Intent\ni\n";
    assert_eq!(
        check_sections(Some(partial_a), &policy.required_sections),
        check_sections(Some(partial_b), &policy.required_sections)
    );
}

#[test]
fn missing_sections_follow_configured_order() {
    let required: Vec<SectionSpec> = ["Zeta", "Alpha", "Mu"]
        .iter()
        .map(|s| SectionSpec::from_name(s))
        .collect();
    let result = check_sections(Some("## Alpha\nx\n"), &required);
    assert_eq!(result.missing_sections, vec!["Zeta", "Mu"]);
}

// ---- Reviewer accumulation ----

#[test]
fn reviewers_accumulate_across_rules_without_duplicates() {
    let policy = PolicyConfig::from_yaml_str(
        "reviewer_rules:\n  - \"src/api/**=alice,bob\"\n  - \"**/*.ts=bob,carol\"\n  - \"infra/**=ops\"\n",
    )
    .unwrap();
    let snap = PrSnapshot::new(8).with_file("src/api/handler.ts", 3, 1);
    let v = evaluate(&snap, &policy);
    assert_eq!(v.reviewers, vec!["alice", "bob", "carol"]);
}

// ---- Auto-merge gating ----

#[test]
fn eligibility_requires_every_condition() {
    let policy = PolicyConfig::default();
    let recommend = PolicyConfig::from_yaml_str("merge_mode: recommend_only\n").unwrap();
    assert_eq!(recommend.merge_mode, MergeMode::RecommendOnly);

    let cs = analyze(&files(&[("src/a.rs", 10, 0)]), &[], &policy);
    let complete = check_sections(Some(FULL_BODY), &policy.required_sections);
    let incomplete = check_sections(Some("## Intent\nx\n"), &policy.required_sections);

    for (p, sections, ci, expected) in [
        (&policy, &complete, true, true),
        (&policy, &complete, false, false),
        (&policy, &incomplete, true, false),
        (&recommend, &complete, true, false),
    ] {
        let v = assemble_verdict(1, &cs, sections, p, ci);
        assert_eq!(v.auto_merge_eligible, expected);
    }

    let l2 = analyze(&files(&[("src/a.rs", 200, 0)]), &[], &policy);
    let v = assemble_verdict(1, &l2, &complete, &policy, true);
    assert_eq!(v.risk_level, RiskLevel::L2);
    assert!(!v.auto_merge_eligible);
}

#[test]
fn custom_thresholds_change_the_baseline() {
    let policy = PolicyConfig::from_yaml_str(
        "small_change_max_lines: 10\nlarge_change_lines: 100\nlarge_change_files: 8\n",
    )
    .unwrap();
    assert_eq!(
        policy.thresholds,
        RiskThresholds {
            small_change_max_files: 5,
            small_change_max_lines: 10,
            large_change_lines: 100,
            large_change_files: 8,
        }
    );
    let cs = analyze(&files(&[("src/a.rs", 20, 0)]), &[], &policy);
    let sections = check_sections(Some(FULL_BODY), &policy.required_sections);
    assert_eq!(
        classify(&cs, &sections, &policy.thresholds).risk_level,
        RiskLevel::L2
    );
}
