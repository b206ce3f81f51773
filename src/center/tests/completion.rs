use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::center::test_helpers::{
    EventCollector, FailingArtifactWriter, MockBehavior, create_test_center, make_descriptors,
    make_task, make_tasks, scripted_factory, test_config,
};
use crate::center::{ControlCenter, WorkerSlot};
use crate::tracker::TaskUpdate;
use crate::types::{
    Event, LinkOutcome, ScrapeResult, TaskId, TaskStatus, WorkerId, WorkerState,
};

// --- at-most-once completion ---

#[tokio::test]
async fn every_task_gets_exactly_one_completion_event() {
    let (center, _plan, _temp) = create_test_center(4, HashMap::new()).await;
    let collector = EventCollector::start(&center);
    let batch = "b_once".into();

    center
        .initialize_batch(&batch, &make_descriptors(8))
        .await;
    center.add_tasks(make_tasks(8, "b_once")).await.unwrap();

    center.start().await.unwrap();
    assert!(
        center.wait_for_completion(Some(Duration::from_secs(10))).await
    );

    let completions = collector.complete_link_events().await;
    assert_eq!(completions.len(), 8);

    let mut seen = std::collections::HashSet::new();
    for event in &completions {
        if let Event::CompleteLink { metadata, .. } = event {
            assert!(
                seen.insert(metadata.task_id.clone()),
                "task {} completed more than once",
                metadata.task_id
            );
        }
    }

    center.shutdown(true, Duration::from_secs(5)).await;
}

// --- duplicate completion handling ---

#[tokio::test]
async fn duplicate_completion_is_swallowed_and_resets_the_worker() {
    let (center, _plan, _temp) = create_test_center(1, HashMap::new()).await;
    let collector = EventCollector::start(&center);
    let worker_id = WorkerId(1);

    // Hand-build a worker slot mid-processing, without running the loop
    let task = make_task(1, "b_dup_completion");
    center.tracker.add(task.clone()).await;
    center
        .tracker
        .update_status(
            &task.task_id,
            TaskStatus::Processing,
            TaskUpdate {
                assigned_worker_id: Some(Some(worker_id)),
                started_at: Some(Utc::now()),
                ..TaskUpdate::default()
            },
        )
        .await;
    {
        let mut table = center.pool.assignment.lock().await;
        table.workers.insert(
            worker_id,
            WorkerSlot {
                id: worker_id,
                state: WorkerState::Processing,
                current_task: Some(task.clone()),
                started: true,
                handle: None,
                tasks_completed: 0,
                tasks_failed: 0,
                created_at: Utc::now(),
            },
        );
    }

    let result = ScrapeResult {
        success: true,
        url: task.url.clone(),
        link_id: task.link_id.clone(),
        batch_id: task.batch_id.clone(),
        content: Some("text".to_string()),
        word_count: 10,
        error: None,
        title: None,
        author: None,
        publish_date: None,
        language: None,
        source: None,
    };

    center
        .complete_and_reassign(worker_id, &task, result.clone())
        .await;
    // The failure path races in with its own completion for the same task
    center
        .complete_and_reassign(worker_id, &task, result)
        .await;

    let completions = collector.complete_link_events().await;
    assert_eq!(
        completions.len(),
        1,
        "duplicate completion must emit no second event"
    );

    let table = center.pool.assignment.lock().await;
    let slot = &table.workers[&worker_id];
    assert_eq!(slot.state, WorkerState::Idle);
    assert!(slot.current_task.is_none());
    assert_eq!(
        slot.tasks_completed, 1,
        "counters reflect the single real completion"
    );
}

#[tokio::test]
async fn monotonic_terminal_status_survives_duplicate_failure_report() {
    let (center, _plan, _temp) = create_test_center(1, HashMap::new()).await;
    let worker_id = WorkerId(1);

    let task = make_task(1, "b_monotonic");
    center.tracker.add(task.clone()).await;
    center
        .tracker
        .update_status(
            &task.task_id,
            TaskStatus::Processing,
            TaskUpdate::default(),
        )
        .await;
    {
        let mut table = center.pool.assignment.lock().await;
        table.workers.insert(
            worker_id,
            WorkerSlot {
                id: worker_id,
                state: WorkerState::Processing,
                current_task: Some(task.clone()),
                started: true,
                handle: None,
                tasks_completed: 0,
                tasks_failed: 0,
                created_at: Utc::now(),
            },
        );
    }

    let success = ScrapeResult {
        success: true,
        url: task.url.clone(),
        link_id: task.link_id.clone(),
        batch_id: task.batch_id.clone(),
        content: Some("text".to_string()),
        word_count: 10,
        error: None,
        title: None,
        author: None,
        publish_date: None,
        language: None,
        source: None,
    };
    center
        .complete_and_reassign(worker_id, &task, success)
        .await;

    let failure = ScrapeResult::failed(&task, "late failure");
    center
        .complete_and_reassign(worker_id, &task, failure)
        .await;

    let tracked = center.tracker.get(&task.task_id).await.unwrap();
    assert_eq!(
        tracked.status,
        TaskStatus::Completed,
        "terminal status must never change"
    );
}

// --- artifact-before-event and persistence failure ---

#[tokio::test]
async fn successful_completions_have_their_artifact_on_disk() {
    let (center, _plan, temp) = create_test_center(2, HashMap::new()).await;
    let collector = EventCollector::start(&center);
    let batch = "b_disk".into();

    center
        .initialize_batch(&batch, &make_descriptors(3))
        .await;
    center.add_tasks(make_tasks(3, "b_disk")).await.unwrap();

    center.start().await.unwrap();
    assert!(
        center.wait_for_completion(Some(Duration::from_secs(10))).await
    );

    for event in collector.complete_link_events().await {
        let Event::CompleteLink {
            link_id,
            status,
            metadata,
            ..
        } = event
        else {
            continue;
        };
        assert_eq!(status, LinkOutcome::Success);
        assert!(metadata.file_saved, "artifact should have been persisted");

        let path = temp
            .path()
            .join("results/run_b_disk")
            .join(format!("b_disk_AR_{link_id}_tsct.json"));
        let bytes = std::fs::read(&path)
            .unwrap_or_else(|e| panic!("artifact {} must be readable: {e}", path.display()));
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["success"], true);
    }

    center.shutdown(true, Duration::from_secs(5)).await;
}

#[tokio::test]
async fn persistence_failure_still_completes_with_file_saved_false() {
    let temp = tempfile::tempdir().unwrap();
    let config = test_config(temp.path(), 2);
    let plan = crate::center::test_helpers::MockPlan::new(HashMap::new());
    let writer = Arc::new(FailingArtifactWriter::new(&config.persistence, &["L2"]));
    let center = ControlCenter::with_artifact_writer(config, scripted_factory(plan), writer)
        .await
        .unwrap();
    let collector = EventCollector::start(&center);
    let batch = "b_diskfail".into();

    center
        .initialize_batch(&batch, &make_descriptors(3))
        .await;
    center
        .add_tasks(make_tasks(3, "b_diskfail"))
        .await
        .unwrap();

    center.start().await.unwrap();
    assert!(
        center.wait_for_completion(Some(Duration::from_secs(10))).await
    );

    let completions = collector.complete_link_events().await;
    assert_eq!(completions.len(), 3);
    for event in &completions {
        if let Event::CompleteLink {
            link_id,
            status,
            metadata,
            ..
        } = event
        {
            assert_eq!(
                *status,
                LinkOutcome::Success,
                "persistence failure must not fail the task"
            );
            if link_id.as_str() == "L2" {
                assert!(!metadata.file_saved, "L2's write was mocked to fail");
            } else {
                assert!(metadata.file_saved, "{link_id} should persist normally");
            }
        }
    }

    let confirmation = center
        .confirm_all_scraping_complete(&batch)
        .await
        .unwrap();
    assert!(
        confirmation.is_100_percent,
        "persistence failure must not block batch completion"
    );

    center.shutdown(true, Duration::from_secs(5)).await;
}

// --- failure results ---

#[tokio::test]
async fn failed_extraction_surfaces_error_in_completion_event() {
    let behaviors = HashMap::from([(
        "L1".to_string(),
        MockBehavior::failing("timeout"),
    )]);
    let (center, _plan, _temp) = create_test_center(1, behaviors).await;
    let collector = EventCollector::start(&center);

    center.add_task(make_task(1, "b_fail")).await.unwrap();
    center.start().await.unwrap();
    assert!(
        center.wait_for_completion(Some(Duration::from_secs(10))).await
    );

    let completions = collector.complete_link_events().await;
    assert_eq!(completions.len(), 1);
    let Event::CompleteLink {
        status,
        error,
        word_count,
        metadata,
        ..
    } = &completions[0]
    else {
        panic!("expected CompleteLink");
    };
    assert_eq!(*status, LinkOutcome::Failed);
    assert_eq!(error.as_deref(), Some("timeout"));
    assert_eq!(*word_count, 0);
    assert!(!metadata.file_saved, "failed tasks persist nothing");

    let tracked = center.tracker.get(&TaskId::new("task_1")).await.unwrap();
    assert_eq!(tracked.status, TaskStatus::Failed);
    assert_eq!(tracked.error.as_deref(), Some("timeout"));

    center.shutdown(true, Duration::from_secs(5)).await;
}
