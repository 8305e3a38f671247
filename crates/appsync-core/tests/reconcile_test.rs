// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end reconcile scenarios against simulated clusters.

mod common;

use std::time::Duration;

use appsync_core::appcontext;
use appsync_core::queue::EventQueue;
use appsync_core::{EventStatus, ResourceStatus, RsyncEvent, StateValue};
use common::*;

#[tokio::test]
async fn test_instantiate_two_apps_two_clusters() {
    let ctx = TestContext::new().await;
    seed(
        &ctx.store,
        "100",
        &[
            ("a1", "p+c1", "a1c1r1", "1"),
            ("a1", "p+c1", "a1c1r2", "1"),
            ("a2", "p+c1", "a2c1r3", "1"),
            ("a2", "p+c1", "a2c1r4", "1"),
            ("a2", "p+c2", "a2c2r3", "1"),
            ("a2", "p+c2", "a2c2r4", "1"),
        ],
    )
    .await;

    ctx.runtime.instantiate("100").await.unwrap();
    ctx.quiesce("100").await;

    assert_eq!(
        sorted(ctx.clusters.applied("p+c1")),
        vec!["a1c1r1", "a1c1r2", "a2c1r3", "a2c1r4"]
    );
    assert_eq!(sorted(ctx.clusters.applied("p+c2")), vec!["a2c2r3", "a2c2r4"]);
    assert_eq!(ctx.status("100").await, StateValue::Instantiated);

    // Resource order holds within each cluster.
    let c1 = ctx.clusters.applied("p+c1");
    let pos = |n: &str| c1.iter().position(|r| r == n).unwrap();
    assert!(pos("a1c1r1") < pos("a1c1r2"));
    assert!(pos("a2c1r3") < pos("a2c1r4"));

    // One status CR per (app, cluster), labelled with the AppContext id.
    assert_eq!(ctx.clusters.status_crs("p+c1"), vec!["100-a1", "100-a2"]);
    assert_eq!(ctx.clusters.status_crs("p+c2"), vec!["100-a2"]);

    let ac = ctx.runtime.app_context("100").await.unwrap();
    assert_eq!(
        ac.get_resource_status("a2", "p+c2", "a2c2r4").await.unwrap(),
        Some(ResourceStatus::Applied)
    );
    assert_eq!(ac.get_desired_state().await.unwrap(), StateValue::Instantiated);
    assert_eq!(ac.get_current_state().await.unwrap(), StateValue::Instantiated);
    assert!(!appcontext::list_active(ctx.store.as_ref()).await.unwrap().contains(&"100".to_string()));
}

async fn update_old_to_new(ctx: &TestContext) {
    seed(
        &ctx.store,
        "old",
        &[("a1", "p+c1", "a1c1r1", "1"), ("a1", "p+c1", "a1c1r2", "1")],
    )
    .await;
    seed(
        &ctx.store,
        "new",
        &[("a1", "p+c1", "a1c1r1", "2"), ("a1", "p+c1", "a1c1r3", "1")],
    )
    .await;

    ctx.runtime.instantiate("old").await.unwrap();
    ctx.quiesce("old").await;
    assert_eq!(ctx.clusters.applied("p+c1"), vec!["a1c1r1", "a1c1r2"]);

    ctx.runtime.update("old", "new").await.unwrap();
    ctx.quiesce("old").await;
    ctx.quiesce("new").await;
}

#[tokio::test]
async fn test_update_applies_only_differences() {
    let ctx = TestContext::new().await;
    update_old_to_new(&ctx).await;

    assert_eq!(ctx.clusters.deleted("p+c1"), vec!["a1c1r2"]);
    let applied = ctx.clusters.applied("p+c1");
    assert_eq!(sorted(applied[2..].to_vec()), vec!["a1c1r1", "a1c1r3"]);

    let r1 = String::from_utf8(ctx.clusters.live_content("p+c1", "a1c1r1").unwrap()).unwrap();
    assert!(r1.contains("\"2\"") || r1.contains("'2'"), "{r1}");
    assert_eq!(sorted(ctx.clusters.live("p+c1")), vec!["a1c1r1", "a1c1r3"]);

    assert_eq!(ctx.status("old").await, StateValue::Updated);
    assert_eq!(ctx.status("new").await, StateValue::Instantiated);
}

#[tokio::test]
async fn test_update_rollback_restores_original() {
    let ctx = TestContext::new().await;
    update_old_to_new(&ctx).await;

    ctx.runtime.update("new", "old").await.unwrap();
    ctx.quiesce("new").await;
    ctx.quiesce("old").await;

    assert_eq!(sorted(ctx.clusters.live("p+c1")), vec!["a1c1r1", "a1c1r2"]);
    let r1 = String::from_utf8(ctx.clusters.live_content("p+c1", "a1c1r1").unwrap()).unwrap();
    assert!(r1.contains("\"1\"") || r1.contains("'1'"), "{r1}");
    assert_eq!(ctx.status("new").await, StateValue::Updated);
    assert_eq!(ctx.status("old").await, StateValue::Instantiated);
}

#[tokio::test]
async fn test_update_with_unchanged_tree_touches_nothing() {
    let ctx = TestContext::new().await;
    seed(&ctx.store, "g1", &[("a1", "p+c1", "r1", "1")]).await;
    seed(&ctx.store, "g2", &[("a1", "p+c1", "r1", "1")]).await;

    ctx.runtime.instantiate("g1").await.unwrap();
    ctx.quiesce("g1").await;
    ctx.runtime.update("g1", "g2").await.unwrap();
    ctx.quiesce("g1").await;
    ctx.quiesce("g2").await;

    assert_eq!(ctx.clusters.applied("p+c1"), vec!["r1"]);
    assert!(ctx.clusters.deleted("p+c1").is_empty());
    assert_eq!(ctx.status("g2").await, StateValue::Instantiated);
}

#[tokio::test]
async fn test_stop_flag_refuses_terminate() {
    let ctx = TestContext::new().await;
    let rows: Vec<(String, String)> = (1..=6).map(|i| (format!("r{i}"), "1".to_string())).collect();
    let rows: Vec<Row<'_>> = rows
        .iter()
        .map(|(n, v)| ("a1", "p+c1", n.as_str(), v.as_str()))
        .collect();
    let ac = seed(&ctx.store, "200", &rows).await;
    ctx.clusters
        .set_apply_delay("p+c1", Duration::from_millis(40));

    ctx.runtime.instantiate("200").await.unwrap();
    ctx.until("first apply", |c| !c.applied("p+c1").is_empty())
        .await;

    ac.set_stop_flag(true).await.unwrap();
    ctx.runtime.terminate("200").await.unwrap();
    ctx.quiesce("200").await;

    assert_eq!(ctx.clusters.total_deleted(), 0);
    assert!(ctx.clusters.applied("p+c1").len() < 6);
    assert!(!appcontext::list_active(ctx.store.as_ref()).await.unwrap().contains(&"200".to_string()));
    let elements = EventQueue::new(&ac).elements().await.unwrap();
    assert_eq!(elements.len(), 2);
    assert!(elements.iter().all(|e| e.status == EventStatus::Error));
    assert!(!ctx.runtime.is_running("200").await);
}

#[tokio::test]
async fn test_terminate_interrupts_instantiate() {
    let ctx = TestContext::new().await;
    let rows: Vec<(String, String)> = (1..=6).map(|i| (format!("r{i}"), "1".to_string())).collect();
    let rows: Vec<Row<'_>> = rows
        .iter()
        .map(|(n, v)| ("a1", "p+c1", n.as_str(), v.as_str()))
        .collect();
    let ac = seed(&ctx.store, "300", &rows).await;
    ctx.clusters
        .set_apply_delay("p+c1", Duration::from_millis(40));

    ctx.runtime.instantiate("300").await.unwrap();
    ctx.until("two applies", |c| c.applied("p+c1").len() >= 2)
        .await;
    ctx.runtime.terminate("300").await.unwrap();
    ctx.quiesce("300").await;

    let applied = ctx.clusters.applied("p+c1");
    assert!(applied.len() < 6, "instantiate was not cancelled: {applied:?}");
    let deleted = ctx.clusters.deleted("p+c1");
    for r in &applied {
        assert!(deleted.contains(r), "{r} left behind");
    }
    assert!(ctx.clusters.live("p+c1").is_empty());
    assert!(ctx.clusters.status_crs("p+c1").is_empty());
    assert_eq!(ctx.status("300").await, StateValue::Terminated);

    let elements = EventQueue::new(&ac).elements().await.unwrap();
    assert_eq!(elements[0].event, RsyncEvent::Instantiate);
    assert_eq!(elements[0].status, EventStatus::Error);
    assert_eq!(elements[1].event, RsyncEvent::Terminate);
    assert_eq!(elements[1].status, EventStatus::Done);
    assert!(!ac.get_flags().await.unwrap().pending_terminate);
}

#[tokio::test]
async fn test_terminate_right_after_instantiate_always_terminates() {
    let ctx = TestContext::new().await;
    ctx.clusters
        .set_apply_delay("p+c1", Duration::from_millis(20));

    for i in 0..10 {
        let id = format!("31{i}");
        let ac = seed(
            &ctx.store,
            &id,
            &[("a1", "p+c1", "r1", "1"), ("a1", "p+c1", "r2", "1")],
        )
        .await;

        ctx.runtime.instantiate(&id).await.unwrap();
        ctx.runtime.terminate(&id).await.unwrap();
        ctx.quiesce(&id).await;

        assert_eq!(ctx.status(&id).await, StateValue::Terminated, "run {i}");
        let elements = EventQueue::new(&ac).elements().await.unwrap();
        let last = elements.last().unwrap();
        assert_eq!(last.event, RsyncEvent::Terminate, "run {i}");
        assert_eq!(last.status, EventStatus::Done, "run {i}: {elements:?}");
        assert!(!ac.get_flags().await.unwrap().pending_terminate);
    }
    assert!(ctx.clusters.live("p+c1").is_empty());
    assert!(ctx.clusters.status_crs("p+c1").is_empty());
}
