//! Policy lifecycle integration tests
//!
//! Creation and validation, series mapping, readiness and the purge
//! behaviors of unmapping and policy deletion.

#[path = "testutils/mod.rs"]
mod testutils;

use std::collections::BTreeMap;

use bitempo::{CacheError, CachePolicy};
use testutils::{at, EngineFixture};

#[test]
fn invalid_policies_report_every_broken_field() {
    let f = EngineFixture::new();
    let err = f
        .engine
        .new_policy(CachePolicy::new(
            "broken",
            "not a moment",
            "(shifted now #:days -10)",
            "also not a moment",
            "not a cron rule",
            "0 1 * * *",
        ))
        .unwrap_err();
    let expected: BTreeMap<String, String> = [
        ("initial_revdate", "not a moment"),
        ("look_after", "also not a moment"),
        ("revdate_rule", "not a cron rule"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    assert_eq!(err, CacheError::InvalidPolicy { fields: expected });
}

#[test]
fn duplicate_policy_names_are_rejected() {
    let f = EngineFixture::new();
    f.engine
        .new_policy(EngineFixture::daily_policy("daily"))
        .unwrap();
    assert_eq!(
        f.engine.new_policy(EngineFixture::daily_policy("daily")),
        Err(CacheError::PolicyExists("daily".to_string()))
    );
}

#[test]
fn editing_a_missing_policy_is_an_error() {
    let f = EngineFixture::new();
    assert_eq!(
        f.engine.edit_policy(EngineFixture::daily_policy("ghost")),
        Err(CacheError::PolicyNotFound("ghost".to_string()))
    );
}

#[test]
fn only_formulas_can_be_mapped() {
    let f = EngineFixture::new();
    f.noon_revision("base", 1, 1, 1.0);
    f.engine
        .new_policy(EngineFixture::daily_policy("daily"))
        .unwrap();
    assert_eq!(
        f.engine.set_policy("daily", "base"),
        Err(CacheError::NotAFormula("base".to_string()))
    );
    assert_eq!(
        f.engine.set_policy("daily", "ghost"),
        Err(CacheError::NotAFormula("ghost".to_string()))
    );
}

#[test]
fn a_series_maps_to_at_most_one_policy() {
    let f = EngineFixture::new();
    f.noon_revision("base", 1, 1, 1.0);
    f.store
        .register_formula("double", "(* 2 (series \"base\"))")
        .unwrap();
    f.engine
        .new_policy(EngineFixture::daily_policy("daily"))
        .unwrap();
    f.engine
        .new_policy(EngineFixture::daily_policy("other"))
        .unwrap();
    f.engine.set_policy("daily", "double").unwrap();
    assert_eq!(
        f.engine.set_policy("other", "double"),
        Err(CacheError::AlreadyLinked {
            series: "double".to_string(),
            policy: "daily".to_string(),
        })
    );
}

#[test]
fn readiness_tracks_the_mapping_and_the_cache() {
    let f = EngineFixture::new();
    f.noon_revision("base", 1, 1, 1.0);
    f.noon_revision("base", 2, 2, 2.0);
    f.store
        .register_formula("double", "(* 2 (series \"base\"))")
        .unwrap();

    // unmapped: no readiness to speak of
    assert_eq!(f.engine.ready("double").unwrap(), None);

    f.policy_with(EngineFixture::daily_policy("daily"), "double");
    // mapped but nothing materialized yet
    assert_eq!(f.engine.ready("double").unwrap(), Some(false));

    f.engine.refresh_series("double", Some(at(2, 18))).unwrap();
    assert_eq!(f.engine.ready("double").unwrap(), Some(true));
}

#[test]
fn cacheable_formulas_lists_unmapped_candidates() {
    let f = EngineFixture::new();
    f.noon_revision("base", 1, 1, 1.0);
    f.store
        .register_formula("a", "(* 2 (series \"base\"))")
        .unwrap();
    f.store
        .register_formula("b", "(* 3 (series \"base\"))")
        .unwrap();
    f.policy_with(EngineFixture::daily_policy("daily"), "a");

    assert_eq!(
        f.engine.cacheable_formulas(false).unwrap(),
        vec!["a".to_string(), "b".to_string()]
    );
    assert_eq!(
        f.engine.cacheable_formulas(true).unwrap(),
        vec!["b".to_string()]
    );
}

#[test]
fn unmapping_purges_the_cache() {
    let f = EngineFixture::new();
    f.noon_revision("base", 1, 1, 1.0);
    f.noon_revision("base", 2, 2, 2.0);
    f.store
        .register_formula("double", "(* 2 (series \"base\"))")
        .unwrap();
    f.policy_with(EngineFixture::daily_policy("daily"), "double");
    f.engine.refresh_series("double", Some(at(2, 18))).unwrap();
    assert!(f.store.cache_exists("double"));

    f.engine.unset_policy("double").unwrap();
    assert!(!f.store.cache_exists("double"));
    assert_eq!(f.engine.ready("double").unwrap(), None);
    // the primary namespace is untouched
    assert!(f.store.exists("double"));
}

#[test]
fn deleting_a_policy_purges_every_linked_cache() {
    let f = EngineFixture::new();
    f.noon_revision("base", 1, 1, 1.0);
    f.noon_revision("base", 2, 2, 2.0);
    f.store
        .register_formula("a", "(* 2 (series \"base\"))")
        .unwrap();
    f.store
        .register_formula("b", "(* 3 (series \"base\"))")
        .unwrap();
    f.policy_with(EngineFixture::daily_policy("daily"), "a");
    f.engine.set_policy("daily", "b").unwrap();
    f.engine
        .refresh_policy("daily", true, Some(at(2, 18)))
        .unwrap();
    assert!(f.store.cache_exists("a"));
    assert!(f.store.cache_exists("b"));

    f.engine.delete_policy("daily").unwrap();
    assert!(!f.store.cache_exists("a"));
    assert!(!f.store.cache_exists("b"));
    assert_eq!(f.engine.ready("a").unwrap(), None);
    assert_eq!(
        f.engine.refresh_policy("daily", true, None),
        Err(CacheError::PolicyNotFound("daily".to_string()))
    );
}
