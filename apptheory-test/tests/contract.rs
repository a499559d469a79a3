use std::path::PathBuf;

use apptheory_test::{load_fixtures, run_fixture, run_fixture_dir};

fn fixtures_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

#[test]
fn fixtures_load_sorted_by_tier_then_id() {
    let fixtures = load_fixtures(&fixtures_root()).expect("fixtures load");
    assert!(fixtures.len() >= 10);

    // p-tiers load before m-tiers, ids ascending within a tier.
    let ids: Vec<&str> = fixtures.iter().map(|f| f.id.as_str()).collect();
    assert!(ids[0].starts_with("p0"));
    assert!(ids.last().unwrap().starts_with("m14"));
    let p0_ids: Vec<&&str> = ids.iter().filter(|id| id.starts_with("p0")).collect();
    let mut sorted_p0 = p0_ids.clone();
    sorted_p0.sort();
    assert_eq!(p0_ids, sorted_p0);
}

#[test]
fn loading_an_empty_directory_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = load_fixtures(dir.path()).unwrap_err();
    assert!(err.contains("no fixtures"));
}

#[tokio::test]
async fn every_fixture_replays_cleanly() {
    let passed = run_fixture_dir(&fixtures_root())
        .await
        .unwrap_or_else(|failures| panic!("fixture failures:\n{failures}"));
    assert!(passed >= 10);
}

#[tokio::test]
async fn fixtures_replay_individually() {
    let fixtures = load_fixtures(&fixtures_root()).expect("fixtures load");
    for fixture in &fixtures {
        if let Err(reason) = run_fixture(fixture).await {
            panic!("fixture {} failed: {reason}", fixture.id);
        }
    }
}
