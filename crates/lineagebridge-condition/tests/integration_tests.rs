//! Integration tests for condition parsing

use lineagebridge_condition::{dependencies_of, parse_condition, ConditionDependency, ConditionError};
use lineagebridge_core::DependencyKind;
use pretty_assertions::assert_eq;

fn dep(job: &str, kind: DependencyKind) -> ConditionDependency {
    ConditionDependency {
        job: job.to_string(),
        kind,
    }
}

#[test]
fn two_success_predicates_yield_two_edges() {
    let deps = dependencies_of("s(JOB_A)&s(JOB_B)").unwrap();
    assert_eq!(
        deps,
        vec![dep("JOB_A", DependencyKind::Success), dep("JOB_B", DependencyKind::Success)]
    );
}

#[test]
fn parsing_is_idempotent() {
    let text = "(s(LOAD_A) | f(LOAD_B)) & n(CLEANUP) & e(EXTRACT) != 0 & s(LOAD_A)";
    let first = dependencies_of(text).unwrap();
    let second = dependencies_of(text).unwrap();
    assert_eq!(first, second);
    assert_eq!(parse_condition(text).unwrap(), parse_condition(text).unwrap());
    assert_eq!(first.len(), 4);
}

#[test]
fn kinds_follow_predicate_keywords() {
    let deps = dependencies_of("success(A) and failure(B) or notrunning(C) & exitcode(D) & done(E) & t(F) & mystery(G)").unwrap();
    let kinds: Vec<DependencyKind> = deps.iter().map(|d| d.kind).collect();
    assert_eq!(
        kinds,
        vec![
            DependencyKind::Success,
            DependencyKind::Failure,
            DependencyKind::NotRunning,
            DependencyKind::ExitCode,
            DependencyKind::Unknown,
            DependencyKind::Unknown,
            DependencyKind::Unknown,
        ]
    );
}

#[test]
fn variable_tests_are_not_dependencies() {
    let deps = dependencies_of("s(A) & v(LOAD_FLAG) = \"Y\"").unwrap();
    assert_eq!(deps, vec![dep("A", DependencyKind::Success)]);
}

#[test]
fn same_job_with_different_kinds_is_kept_twice() {
    let deps = dependencies_of("s(A) | f(A) | s(A)").unwrap();
    assert_eq!(
        deps,
        vec![dep("A", DependencyKind::Success), dep("A", DependencyKind::Failure)]
    );
}

#[test]
fn cross_instance_names_are_preserved() {
    let cond = parse_condition("s(REMOTE_JOB^PRD)").unwrap();
    let predicates = cond.predicates();
    assert_eq!(predicates[0].job, "REMOTE_JOB^PRD");
    assert_eq!(predicates[0].instance(), Some("PRD"));
}

#[test]
fn malformed_conditions_yield_errors_not_edges() {
    assert!(matches!(dependencies_of("s(A) & & s(B)"), Err(ConditionError::Unexpected { .. })));
    assert!(matches!(dependencies_of("s(A"), Err(ConditionError::UnexpectedEnd { .. })));
    assert!(matches!(dependencies_of("{s(A)}"), Err(ConditionError::Lex(_))));
}
