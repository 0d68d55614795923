//! End-to-end exercise of one snapshot/plan/fetch cycle against a fresh
//! catalog, mirroring what `fetchqueue queue download` drives from the CLI.

use std::collections::HashMap;

use fetchqueue::daemon;
use fetchqueue::models::QueueType;
use fetchqueue::repository::CatalogRepository;
use tempfile::tempdir;

#[tokio::test]
async fn new_urls_flow_through_plan_and_fetch_without_a_network() {
    let catalog_dir = tempdir().unwrap();
    let repo = CatalogRepository::new(&catalog_dir.path().join("catalog.sqlite3")).unwrap();
    repo.create_app("acme").unwrap();

    for i in 0..3 {
        repo.add_url(
            "acme",
            &format!("https://example.invalid/page-{i}"),
            None,
            Some("reports"),
            &HashMap::new(),
            serde_json::json!({}),
            60,
        )
        .unwrap();
    }

    let parent = tempdir().unwrap();
    let queue_dir = parent.path().join("cycle-0");
    let output_root = tempdir().unwrap();

    let outcome = daemon::run_cycle(QueueType::Regular, &queue_dir, output_root.path(), 4, &repo)
        .await
        .unwrap();

    // example.invalid never resolves, so every transfer ends in a transport
    // error, but the cycle must still account for all three URLs and leave
    // no trace of its scratch directory.
    assert_eq!(outcome.total_lines, 3);
    assert_eq!(outcome.completed, 3);
    assert_eq!(outcome.stats.num_error_urls, 3);
    assert!(!queue_dir.exists());
}

#[tokio::test]
async fn a_url_with_no_collection_gets_the_default_one() {
    let catalog_dir = tempdir().unwrap();
    let repo = CatalogRepository::new(&catalog_dir.path().join("catalog.sqlite3")).unwrap();
    repo.create_app("acme").unwrap();
    repo.add_url(
        "acme",
        "https://example.invalid/solo",
        None,
        None,
        &HashMap::new(),
        serde_json::json!({}),
        60,
    )
    .unwrap();

    let snapshot = fetchqueue::snapshot::build(&repo).unwrap();
    assert_eq!(snapshot.rows.len(), 1);
    assert_eq!(snapshot.rows[0].collection_name, "default");
}
