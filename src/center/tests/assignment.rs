use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;

use crate::center::test_helpers::{
    EventCollector, create_test_center, make_descriptors, make_task, make_tasks,
};
use crate::tracker::TaskUpdate;
use crate::types::{Event, ScrapeResult, TaskId, TaskStatus, WorkerId};

// --- race-seeded queue ---

#[tokio::test]
async fn race_seeded_queue_discards_terminal_duplicates() {
    let (center, _plan, _temp) = create_test_center(2, HashMap::new()).await;
    let collector = EventCollector::start(&center);
    let batch = "b_race".into();

    center
        .initialize_batch(&batch, &make_descriptors(3))
        .await;
    center.add_tasks(make_tasks(3, "b_race")).await.unwrap();

    // Simulate a prior completion path having already finished task 1:
    // terminal in the tracker, completion published, yet the task is
    // re-added to the queue on top of its original entry
    let task1 = center.tracker.get(&TaskId::new("task_1")).await.unwrap();
    let result = ScrapeResult {
        success: true,
        url: task1.url.clone(),
        link_id: task1.link_id.clone(),
        batch_id: task1.batch_id.clone(),
        content: Some("done elsewhere".to_string()),
        word_count: 42,
        error: None,
        title: None,
        author: None,
        publish_date: None,
        language: None,
        source: None,
    };
    center
        .tracker
        .update_status(
            &task1.task_id,
            TaskStatus::Completed,
            TaskUpdate {
                completed_at: Some(Utc::now()),
                result: Some(result.clone()),
                ..TaskUpdate::default()
            },
        )
        .await;
    center
        .aggregator
        .record_terminal(&task1, &result, WorkerId(9), true, Some(Utc::now()))
        .await;
    center.queue.enqueue(task1.clone()).await;

    center.start().await.unwrap();
    assert!(
        center.wait_for_completion(Some(Duration::from_secs(10))).await,
        "pool should drain despite the seeded duplicates"
    );

    // Exactly one completion per distinct task, duplicates discarded
    let completions = collector.complete_link_events().await;
    assert_eq!(completions.len(), 3, "one complete_link per distinct task");

    let stats = center.statistics().await;
    assert!(
        stats.race_conditions_detected >= 1,
        "discarding the terminal ghost must bump the race counter, got {}",
        stats.race_conditions_detected
    );

    let confirmation = center
        .confirm_all_scraping_complete(&batch)
        .await
        .unwrap();
    assert!(confirmation.is_100_percent);
    assert!(confirmation.confirmed);

    center.shutdown(true, Duration::from_secs(5)).await;
}

// --- terminal tasks refused at intake ---

#[tokio::test]
async fn terminal_task_at_enqueue_is_tracked_but_never_produces_events() {
    let (center, _plan, _temp) = create_test_center(1, HashMap::new()).await;
    let collector = EventCollector::start(&center);

    let mut dead_task = make_task(1, "b_ghost");
    dead_task.status = TaskStatus::Failed;
    dead_task.error = Some("failed upstream".to_string());
    center.add_task(dead_task).await.unwrap();

    let live_task = make_task(2, "b_ghost");
    center.add_task(live_task).await.unwrap();

    center.start().await.unwrap();
    assert!(
        center.wait_for_completion(Some(Duration::from_secs(10))).await
    );

    // The refused task is in the tracker for reporting...
    let tracked = center.tracker.get(&TaskId::new("task_1")).await.unwrap();
    assert_eq!(tracked.status, TaskStatus::Failed);

    // ...but no event ever mentions its link
    let events = collector.snapshot().await;
    for event in &events {
        let link = match event {
            Event::StartLink { link_id, .. }
            | Event::Progress { link_id, .. }
            | Event::CompleteLink { link_id, .. } => Some(link_id.as_str()),
            _ => None,
        };
        assert_ne!(
            link,
            Some("L1"),
            "refused task must produce no ghost events, saw {event:?}"
        );
    }

    // The live task still went through
    assert_eq!(collector.complete_link_events().await.len(), 1);

    center.shutdown(true, Duration::from_secs(5)).await;
}

#[tokio::test]
async fn duplicate_task_id_is_not_enqueued_twice() {
    let (center, _plan, _temp) = create_test_center(1, HashMap::new()).await;
    let collector = EventCollector::start(&center);

    center.add_task(make_task(1, "b_dup")).await.unwrap();
    // Same id again - tracker keeps the first, queue must not grow
    center.add_task(make_task(1, "b_dup")).await.unwrap();
    assert_eq!(center.queue.size().await, 1);

    center.start().await.unwrap();
    assert!(
        center.wait_for_completion(Some(Duration::from_secs(10))).await
    );
    assert_eq!(collector.complete_link_events().await.len(), 1);

    center.shutdown(true, Duration::from_secs(5)).await;
}

// --- sweep backstop ---

#[tokio::test]
async fn sweep_clears_a_queue_packed_with_terminal_ghosts() {
    // Force the sweep path: the retry bound is smaller than the ghost count
    let temp = tempfile::tempdir().unwrap();
    let mut config = crate::center::test_helpers::test_config(temp.path(), 1);
    config.pool.assign_retry_limit = 3;
    let plan = crate::center::test_helpers::MockPlan::new(HashMap::new());
    let center = crate::center::ControlCenter::new(
        config,
        crate::center::test_helpers::scripted_factory(plan),
    )
    .await
    .unwrap();

    let collector = EventCollector::start(&center);

    // Eight ghosts: tracked as completed, yet sitting in the queue
    for i in 10..18 {
        let task = make_task(i, "b_sweep");
        center.tracker.add(task.clone()).await;
        center
            .tracker
            .update_status(&task.task_id, TaskStatus::Completed, TaskUpdate::default())
            .await;
        center.queue.enqueue(task).await;
    }
    // One real task buried behind them
    center.add_task(make_task(1, "b_sweep")).await.unwrap();

    center.start().await.unwrap();
    assert!(
        center.wait_for_completion(Some(Duration::from_secs(10))).await,
        "sweep must unstick the queue"
    );

    assert_eq!(
        collector.complete_link_events().await.len(),
        1,
        "only the live task completes"
    );
    assert!(center.queue.is_empty().await, "ghosts must be gone for good");

    let stats = center.statistics().await;
    assert!(stats.race_conditions_detected >= 3);

    center.shutdown(true, Duration::from_secs(5)).await;
}

// --- untracked tasks ---

#[tokio::test]
async fn untracked_queued_task_is_treated_as_pending() {
    let (center, _plan, _temp) = create_test_center(1, HashMap::new()).await;
    let collector = EventCollector::start(&center);

    // Straight into the queue, bypassing the tracker
    center.queue.enqueue(make_task(1, "b_untracked")).await;

    center.start().await.unwrap();
    assert!(
        center.wait_for_completion(Some(Duration::from_secs(10))).await
    );

    let tracked = center.tracker.get(&TaskId::new("task_1")).await.unwrap();
    assert_eq!(
        tracked.status,
        TaskStatus::Completed,
        "untracked work should be adopted and processed"
    );
    assert_eq!(collector.complete_link_events().await.len(), 1);

    center.shutdown(true, Duration::from_secs(5)).await;
}
