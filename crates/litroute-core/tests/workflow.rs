//! End-to-end workflow scenarios against in-memory collaborators.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;

use common::*;
use litroute_core::memory::{MemoryLibrary, Op};
use litroute_core::{
    CheckpointStore, ClassificationOutcome, Destination, Error, ExternalError, ItemResult,
    LibraryItem, RetryPolicy, RunStatus, Source,
};
use tokio_util::sync::CancellationToken;

async fn run_to_end(h: &Harness, workflow: &str, treated_limit: usize) {
    let report = h
        .engine
        .start(id(workflow), params(treated_limit, false), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_untagged_item_goes_to_inbox_regardless_of_attachments() {
    let h = harness();
    add_item(&h.library, "NOTAG001", false, &[]);
    add_item(&h.library, "NOTAG002", false, &["a review"]);
    add_item(&h.library, "NOTAG003", false, &["copy", "copy"]);

    run_to_end(&h, "untagged", 10).await;

    assert_eq!(
        h.library.members(INBOX),
        vec!["NOTAG001", "NOTAG002", "NOTAG003"]
    );
    assert_eq!(h.classifier.calls(), 0);
}

#[tokio::test]
async fn test_supporting_information_goes_to_inbox() {
    let h = harness();
    add_item(&h.library, "SUPP0001", true, &["supporting information for"]);

    run_to_end(&h, "si", 10).await;

    assert_eq!(h.library.members(INBOX), vec!["SUPP0001"]);
    assert!(h.library.members(REVIEW).is_empty());
    let checkpoint = h.store.load(&id("si")).await.unwrap().unwrap();
    assert_eq!(
        checkpoint.log[0].outcome,
        Some(ClassificationOutcome::SupportingInformation)
    );
}

#[tokio::test]
async fn test_review_goes_to_review_holding() {
    let h = harness();
    add_item(&h.library, "REVW0001", true, &["a review of the field"]);

    run_to_end(&h, "review", 10).await;

    assert_eq!(h.library.members(REVIEW), vec!["REVW0001"]);
    assert!(h.library.members(SOURCE).is_empty());
}

#[tokio::test]
async fn test_three_duplicate_attachments_go_to_duplicates_holding() {
    let h = harness();
    add_item(&h.library, "DUPL0001", true, &["copy a", "copy b", "copy c"]);
    add_item(&h.library, "MULT0001", true, &["chapter 1", "chapter 2"]);

    run_to_end(&h, "dupes", 10).await;

    assert_eq!(h.library.members(DUPES), vec!["DUPL0001"]);
    assert_eq!(h.library.members(MULTI), vec!["MULT0001"]);
}

#[tokio::test]
async fn test_interrupted_after_fifty_resumes_with_remaining_fifty() {
    let cancel = CancellationToken::new();
    let h = harness_cancelling(50, cancel.clone());
    let keys = populate(&h.library, 100);

    let first = h
        .engine
        .start(id("hundred"), params(100, false), &cancel)
        .await
        .unwrap();
    assert_eq!(first.status, RunStatus::Suspended);
    assert_eq!(first.processed_total, 50);
    let done: Vec<String> = h
        .store
        .load(&id("hundred"))
        .await
        .unwrap()
        .unwrap()
        .log
        .iter()
        .map(|e| e.item_key.clone())
        .collect();
    assert_eq!(done, keys[..50]);

    let second = h
        .engine
        .resume(&id("hundred"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(second.processed_now, 50);

    let checkpoint = h.store.load(&id("hundred")).await.unwrap().unwrap();
    assert_eq!(checkpoint.log.len(), 100);
    let resumed: Vec<&str> = checkpoint.log[50..]
        .iter()
        .map(|e| e.item_key.as_str())
        .collect();
    assert_eq!(resumed, keys[50..]);
    assert!(h.library.members(SOURCE).is_empty());
    for (_, held) in placement(&h.library, &keys) {
        assert_eq!(held.len(), 1);
    }
}

#[tokio::test]
async fn test_every_routed_item_has_exactly_one_destination() {
    let h = harness();
    let keys = populate(&h.library, 18);

    run_to_end(&h, "exact", 100).await;

    let checkpoint = h.store.load(&id("exact")).await.unwrap().unwrap();
    for (key, held) in placement(&h.library, &keys) {
        let entry = checkpoint.log.iter().find(|e| e.item_key == key).unwrap();
        let ItemResult::Routed { collection, .. } = &entry.result else {
            panic!("{key} failed");
        };
        assert_eq!(held, vec![collection.clone()]);
    }
    let moves = h.library.writes();
    assert_eq!(moves.len(), keys.len());
}

#[tokio::test(start_paused = true)]
async fn test_transient_classifier_failure_is_retried_max_attempts_times() {
    let h = harness_with(
        Arc::new(MemoryLibrary::new()),
        settings(RetryPolicy::default(), None),
    );
    add_item(&h.library, "FLAKY001", true, &["an article"]);
    add_item(&h.library, "STEADY01", true, &["a review"]);
    h.classifier.fail(ExternalError::Unavailable("503".into()), 4);

    let report = h
        .engine
        .start(id("retry"), params(10, false), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.failed_total, 1);
    // The first call and three retries on the first item, one call for the second.
    assert_eq!(h.classifier.calls(), 5);

    let checkpoint = h.store.load(&id("retry")).await.unwrap().unwrap();
    assert!(matches!(checkpoint.log[0].result, ItemResult::Failed { .. }));
    assert_eq!(
        checkpoint.log[1].destination(),
        Some(Destination::ReviewHolding)
    );
    assert_eq!(h.library.members(SOURCE), vec!["FLAKY001"]);
}

#[tokio::test]
async fn test_unparseable_reply_falls_back_to_main_paper() {
    let h = harness();
    add_item(&h.library, "ODD00001", true, &["something unusual"]);

    run_to_end(&h, "fallback", 10).await;

    let checkpoint = h.store.load(&id("fallback")).await.unwrap().unwrap();
    assert_eq!(
        checkpoint.log[0].outcome,
        Some(ClassificationOutcome::MainPaper)
    );
    assert_eq!(h.library.members(INBOX), vec!["ODD00001"]);
}

#[tokio::test]
async fn test_skipped_items_do_not_count_and_are_not_logged() {
    let h = harness_with(
        Arc::new(MemoryLibrary::new()),
        settings(RetryPolicy::immediate(3), Some("routed")),
    );
    h.library.insert(LibraryItem {
        key: "NOTE0001".into(),
        item_type: "note".into(),
        collections: [SOURCE.to_string()].into(),
        ..LibraryItem::default()
    });
    add_item(&h.library, "DONE0001", true, &["a review"]);
    h.library.tag("DONE0001", "routed");
    add_item(&h.library, "TODO0001", false, &[]);
    add_item(&h.library, "TODO0002", true, &["an article"]);
    add_item(&h.library, "TODO0003", true, &["an article"]);

    let report = h
        .engine
        .start(id("skip"), params(2, false), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.processed_total, 2);
    assert_eq!(report.skipped_total, 2);
    let checkpoint = h.store.load(&id("skip")).await.unwrap().unwrap();
    let logged: Vec<&str> = checkpoint.log.iter().map(|e| e.item_key.as_str()).collect();
    assert_eq!(logged, vec!["TODO0001", "TODO0002"]);
    assert!(h.library.item("TODO0001").unwrap().has_tag("routed"));
    assert_eq!(h.library.members(SOURCE), vec!["NOTE0001", "DONE0001", "TODO0003"]);
}

#[tokio::test]
async fn test_library_fallback_after_source_exhausted() {
    let h = harness();
    add_item(&h.library, "COLL0001", false, &[]);
    h.library.insert(LibraryItem {
        key: "LOOSE001".into(),
        version: 1,
        item_type: "book".into(),
        ..LibraryItem::default()
    });

    let params = litroute_core::RunParams {
        sources: vec![Source::Collection(SOURCE.into()), Source::Library],
        ..params(10, false)
    };
    let report = h
        .engine
        .start(id("fallback"), params, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.processed_total, 2);
    assert_eq!(h.library.members(INBOX), vec!["COLL0001", "LOOSE001"]);
}

#[tokio::test]
async fn test_dry_run_is_separate_from_real_run() {
    let h = harness();
    let keys = populate(&h.library, 6);

    let dry = h
        .engine
        .start(id("trial"), params(10, true), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(dry.processed_total, 6);
    assert!(h.library.writes().is_empty());
    assert!(h.store.load(&id("trial")).await.unwrap().is_none());
    assert_eq!(h.library.members(SOURCE).len(), 6);

    let real = h
        .engine
        .start(id("trial"), params(10, false), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(real.processed_total, 6);
    assert_eq!(h.library.writes().len(), 6);

    let recorded = h.dry.load(&id("trial")).await.unwrap().unwrap();
    let committed = h.store.load(&id("trial")).await.unwrap().unwrap();
    for key in &keys {
        let planned = recorded.log.iter().find(|e| &e.item_key == key).unwrap();
        let done = committed.log.iter().find(|e| &e.item_key == key).unwrap();
        assert_eq!(planned.destination(), done.destination());
    }
}

#[tokio::test]
async fn test_checkpoint_outage_aborts_with_position_intact() {
    let h = harness();
    populate(&h.library, 10);
    h.store.fail_after_appends(4);

    let err = h
        .engine
        .start(id("outage"), params(100, false), &CancellationToken::new())
        .await
        .unwrap_err();
    let Error::RunAborted { checkpointed, .. } = err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(checkpointed, 4);
    let checkpoint = h.store.load(&id("outage")).await.unwrap().unwrap();
    assert_eq!(checkpoint.processed(), 4);

    // The fifth item was moved before its append failed.
    assert_eq!(
        checkpoint.pending.as_ref().map(|p| p.item_key.as_str()),
        Some("ITEM0004")
    );

    h.store.heal();
    let report = h
        .engine
        .resume(&id("outage"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.processed_total, 10);
    assert_eq!(report.processed_now, 6);
    assert!(h.library.members(SOURCE).is_empty());

    let checkpoint = h.store.load(&id("outage")).await.unwrap().unwrap();
    assert_eq!(checkpoint.log.len(), 10);
    assert_eq!(checkpoint.log[4].item_key, "ITEM0004");
    assert!(checkpoint.pending.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_item_delay_follows_routed_items_only() {
    let delay = std::time::Duration::from_millis(300);
    let h = harness_with(
        Arc::new(MemoryLibrary::new()),
        litroute_core::EngineSettings {
            item_delay: delay,
            ..settings(RetryPolicy::immediate(3), Some("routed"))
        },
    );
    add_item(&h.library, "ROUTED01", true, &["a review"]);
    add_item(&h.library, "ROUTED02", false, &[]);
    add_item(&h.library, "FAILED01", false, &[]);
    add_item(&h.library, "SKIPPED1", false, &[]);
    h.library.tag("SKIPPED1", "routed");
    h.library
        .fail(Op::GetItem, "FAILED01", ExternalError::NotFound("FAILED01".into()), 1);

    let started = tokio::time::Instant::now();
    let report = h
        .engine
        .start(id("paced"), params(10, false), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.processed_total, 3);
    assert_eq!(report.failed_total, 1);
    assert_eq!(report.skipped_total, 1);
    assert_eq!(started.elapsed(), delay * 2);
}

#[tokio::test]
async fn test_concurrent_workflows_use_their_own_checkpoints() {
    let h = harness();
    add_item(&h.library, "FIRST001", false, &[]);
    h.library.insert(LibraryItem {
        key: "OTHER001".into(),
        version: 1,
        item_type: "journalArticle".into(),
        collections: ["SOURCE02".to_string()].into(),
        ..LibraryItem::default()
    });

    // Register both workflows without processing anything.
    let stopped = CancellationToken::new();
    stopped.cancel();
    h.engine.start(id("one"), params(10, false), &stopped).await.unwrap();
    let second = litroute_core::RunParams {
        sources: vec![Source::Collection("SOURCE02".into())],
        ..params(10, false)
    };
    h.engine.start(id("two"), second, &stopped).await.unwrap();

    let mut results = h
        .engine
        .resume_all(vec![id("one"), id("two")], CancellationToken::new())
        .await;
    results.sort_by(|a, b| a.0.cmp(&b.0));

    assert_eq!(results.len(), 2);
    for (_, result) in &results {
        let report = result.as_ref().unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.processed_now, 1);
    }
    assert_eq!(h.library.members(INBOX), vec!["FIRST001", "OTHER001"]);
    assert_eq!(h.library.calls(Op::UpdateCollections), 2);
}
