//! End-to-end sync flows against a scripted external API

mod helpers;

use helpers::*;
use rlstats_common::events::SyncEvent;
use rlstats_common::ReplayStatus;
use rlstats_sync::config::{RateLimitConfig, ReconciliationMode};
use rlstats_sync::db::{global_players, groups, players, replays, teams, uploaders};
use rlstats_sync::models::TeamColor;
use rlstats_sync::services::{ReplaySyncScheduler, ReprocessError, SyncOutcome};
use std::sync::Arc;

async fn upload(env: &TestEnv, external_id: &str, bytes: &[u8]) -> uuid::Uuid {
    env.transport.push_upload(upload_accepted(external_id));
    let outcome = env
        .state
        .uploader
        .upload(bytes.to_vec(), &format!("{}.replay", external_id))
        .await
        .expect("upload failed");
    outcome.replay.id
}

#[tokio::test]
async fn test_pending_then_ok_completes_with_teams() {
    let env = TestEnv::new().await;
    let mut events = env.event_bus.subscribe();

    let replay_id = upload(&env, "abc", b"replay-abc").await;
    let uploaded = replays::find_by_id(&env.pool, replay_id).await.unwrap().unwrap();
    assert_eq!(uploaded.status, ReplayStatus::Processing);
    assert!(uploaded.processed_at.is_none());
    assert!(uploaded.storage_path.is_some());

    env.transport.set_reply("abc", status_only("abc", "pending"));
    let summary = env.state.scheduler.run_cycle().await;
    assert_eq!(summary.checked, 1);
    assert_eq!(summary.pending, 1);

    let still_pending = replays::find_by_id(&env.pool, replay_id).await.unwrap().unwrap();
    assert_eq!(still_pending.status, ReplayStatus::Processing);
    assert!(still_pending.processed_at.is_none());

    env.transport.set_reply("abc", ok_response(&full_result("abc", 3, 1)));
    let summary = env.state.scheduler.run_cycle().await;
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.completed_with_diagnostics, 0);

    let replay = replays::find_by_id(&env.pool, replay_id).await.unwrap().unwrap();
    assert_eq!(replay.status, ReplayStatus::Completed);
    assert!(replay.processed_at.is_some());
    assert!(replay.processed_at_consistent());
    assert_eq!(replay.metadata.map_name.as_deref(), Some("DFH Stadium"));
    assert!(replay.sync_diagnostics.is_none());

    let blue = teams::find_team(&env.pool, replay.blue_team_id.unwrap()).await.unwrap().unwrap();
    let orange = teams::find_team(&env.pool, replay.orange_team_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(blue.color, TeamColor::Blue);
    assert_eq!(blue.goals, Some(3));
    assert_eq!(orange.goals, Some(1));

    assert_eq!(players::list_players_for_team(&env.pool, blue.id).await.unwrap().len(), 3);
    assert_eq!(players::list_players_for_team(&env.pool, orange.id).await.unwrap().len(), 3);
    assert_eq!(global_players::count_global_players(&env.pool).await.unwrap(), 6);
    assert!(replay.uploader_id.is_some());
    assert!(uploaders::find_by_steam_id(&env.pool, "76561198000000001").await.unwrap().is_some());
    assert_eq!(groups::list_groups_for_replay(&env.pool, replay_id).await.unwrap().len(), 1);

    let mut saw_completion = false;
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::ReplayStatusChanged { replay_id: id, old_status, new_status, .. } = event {
            assert_eq!(id, replay_id);
            assert_eq!(old_status, ReplayStatus::Processing);
            assert_eq!(new_status, ReplayStatus::Completed);
            saw_completion = true;
        }
    }
    assert!(saw_completion);

    // Terminal replays are no longer polled
    let calls = env.transport.get_calls();
    let summary = env.state.scheduler.run_cycle().await;
    assert_eq!(summary.checked, 0);
    assert_eq!(env.transport.get_calls(), calls);
}

#[tokio::test]
async fn test_duplicate_upload_resolves_to_same_replay() {
    let env = TestEnv::new().await;

    let first = upload(&env, "dup", b"same-bytes").await;

    let again = env
        .state
        .uploader
        .upload(b"same-bytes".to_vec(), "dup.replay")
        .await
        .unwrap();
    assert!(again.is_duplicate);
    assert_eq!(again.replay.id, first);
    assert_eq!(env.transport.upload_calls(), 1);

    // Different bytes the external API already knows under the same id
    env.transport.push_upload(upload_duplicate("dup"));
    let renamed = env
        .state
        .uploader
        .upload(b"re-encoded-bytes".to_vec(), "dup-copy.replay")
        .await
        .unwrap();
    assert!(renamed.is_duplicate);
    assert_eq!(renamed.replay.id, first);
    assert_eq!(replays::list_all_ids(&env.pool).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_empty_upload_is_rejected() {
    let env = TestEnv::new().await;
    let result = env.state.uploader.upload(Vec::new(), "empty.replay").await;
    assert!(result.is_err());
    assert_eq!(env.transport.upload_calls(), 0);
}

#[tokio::test]
async fn test_external_failure_marks_failed_without_teams() {
    let env = TestEnv::new().await;
    let replay_id = upload(&env, "bad", b"replay-bad").await;

    env.transport.set_reply("bad", status_only("bad", "failed"));
    let outcome = env.state.scheduler.sync_replay(replay_id).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Failed { .. }));

    let replay = replays::find_by_id(&env.pool, replay_id).await.unwrap().unwrap();
    assert_eq!(replay.status, ReplayStatus::Failed);
    assert!(replay.processed_at.is_some());
    assert!(replay.blue_team_id.is_none());
    assert_eq!(teams::count_teams(&env.pool).await.unwrap(), 0);
}

#[tokio::test]
async fn test_rate_limited_check_leaves_state_unchanged() {
    let config = RateLimitConfig {
        max_rate_limit_retries: Some(0),
        ..fast_rate_limit()
    };
    let env = TestEnv::with_config(ReconciliationMode::Lenient, config).await;
    let replay_id = upload(&env, "slow", b"replay-slow").await;

    env.transport.set_reply("slow", rate_limited());
    let outcome = env.state.scheduler.sync_replay(replay_id).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::RetryLater { .. }));

    let summary = env.state.scheduler.run_cycle().await;
    assert_eq!(summary.rate_limited, 1);
    assert!(!summary.is_total_failure());

    let replay = replays::find_by_id(&env.pool, replay_id).await.unwrap().unwrap();
    assert_eq!(replay.status, ReplayStatus::Processing);
    assert!(replay.processed_at.is_none());
    assert!(replay.sync_diagnostics.is_none());

    // Picked up normally once the API recovers
    env.transport.set_reply("slow", ok_response(&full_result("slow", 2, 2)));
    let outcome = env.state.scheduler.sync_replay(replay_id).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Completed);
}

#[tokio::test]
async fn test_missing_team_lenient_completes_with_diagnostics() {
    let env = TestEnv::with_mode(ReconciliationMode::Lenient).await;
    let replay_id = upload(&env, "half", b"replay-half").await;

    let mut document = full_result("half", 1, 0);
    document.as_object_mut().unwrap().remove("orange");
    env.transport.set_reply("half", ok_response(&document));

    let outcome = env.state.scheduler.sync_replay(replay_id).await.unwrap();
    let SyncOutcome::CompletedWithDiagnostics { diagnostics } = outcome else {
        panic!("expected diagnostics, got {:?}", outcome);
    };
    assert!(diagnostics.iter().any(|d| d.contains("orange")));

    let replay = replays::find_by_id(&env.pool, replay_id).await.unwrap().unwrap();
    assert_eq!(replay.status, ReplayStatus::Completed);
    assert!(replay.blue_team_id.is_some());
    assert!(replay.orange_team_id.is_none());
    assert!(replay.sync_diagnostics.is_some());
}

#[tokio::test]
async fn test_missing_team_strict_fails() {
    let env = TestEnv::with_mode(ReconciliationMode::Strict).await;
    let replay_id = upload(&env, "half", b"replay-half").await;

    let mut document = full_result("half", 1, 0);
    document.as_object_mut().unwrap().remove("orange");
    env.transport.set_reply("half", ok_response(&document));

    let outcome = env.state.scheduler.sync_replay(replay_id).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Failed { .. }));

    let replay = replays::find_by_id(&env.pool, replay_id).await.unwrap().unwrap();
    assert_eq!(replay.status, ReplayStatus::Failed);
    assert!(replay.processed_at.is_some());
    assert!(replay.orange_team_id.is_none());
}

#[tokio::test]
async fn test_reprocess_unwinds_and_resyncs() {
    let env = TestEnv::new().await;
    let replay_id = upload(&env, "again", b"replay-again").await;
    env.transport.set_reply("again", ok_response(&full_result("again", 3, 1)));
    env.state.scheduler.sync_replay(replay_id).await.unwrap();
    assert_eq!(players::count_players(&env.pool).await.unwrap(), 6);

    let report = env.state.reprocessor.reprocess_one(replay_id).await.unwrap();
    assert_eq!(report.previous_status, Some(ReplayStatus::Completed));
    assert_eq!(report.players_removed, 6);
    assert_eq!(report.teams_removed.len(), 2);
    assert!(report.teams_skipped.is_empty());

    let replay = replays::find_by_id(&env.pool, replay_id).await.unwrap().unwrap();
    assert_eq!(replay.status, ReplayStatus::Reprocessing);
    assert!(replay.processed_at.is_none());
    assert!(replay.blue_team_id.is_none());
    assert!(replay.orange_team_id.is_none());
    assert_eq!(teams::count_teams(&env.pool).await.unwrap(), 0);
    assert_eq!(players::count_players(&env.pool).await.unwrap(), 0);
    // Cross-game identities survive
    assert_eq!(global_players::count_global_players(&env.pool).await.unwrap(), 6);

    let summary = env.state.scheduler.run_cycle().await;
    assert_eq!(summary.completed, 1);

    let replay = replays::find_by_id(&env.pool, replay_id).await.unwrap().unwrap();
    assert_eq!(replay.status, ReplayStatus::Completed);
    assert_eq!(teams::count_teams(&env.pool).await.unwrap(), 2);
    assert_eq!(players::count_players(&env.pool).await.unwrap(), 6);
    assert_eq!(global_players::count_global_players(&env.pool).await.unwrap(), 6);
}

#[tokio::test]
async fn test_reprocess_refuses_replay_still_syncing() {
    let env = TestEnv::new().await;
    let replay_id = upload(&env, "busy", b"replay-busy").await;

    let result = env.state.reprocessor.reprocess_one(replay_id).await;
    assert!(matches!(result, Err(ReprocessError::NotTerminal { .. })));

    let missing = env.state.reprocessor.reprocess_one(uuid::Uuid::new_v4()).await;
    assert!(matches!(missing, Err(ReprocessError::NotFound(_))));
}

#[tokio::test]
async fn test_reprocess_keeps_team_referenced_elsewhere() {
    let env = TestEnv::new().await;
    let first = upload(&env, "one", b"replay-one").await;
    let second = upload(&env, "two", b"replay-two").await;
    env.transport.set_reply("one", ok_response(&full_result("one", 1, 0)));
    env.transport.set_reply("two", ok_response(&full_result("two", 0, 1)));
    env.state.scheduler.run_cycle().await;

    let first_replay = replays::find_by_id(&env.pool, first).await.unwrap().unwrap();
    let shared_team = first_replay.blue_team_id.unwrap();

    sqlx::query("UPDATE replays SET blue_team_id = ? WHERE id = ?")
        .bind(shared_team.to_string())
        .bind(second.to_string())
        .execute(&env.pool)
        .await
        .unwrap();

    let report = env.state.reprocessor.reprocess_one(first).await.unwrap();
    assert_eq!(report.teams_skipped, vec![shared_team]);
    assert!(teams::find_team(&env.pool, shared_team).await.unwrap().is_some());

    let replay = replays::find_by_id(&env.pool, first).await.unwrap().unwrap();
    assert_eq!(replay.status, ReplayStatus::Reprocessing);
}

#[tokio::test]
async fn test_reprocess_all_skips_in_flight_replays() {
    let env = TestEnv::new().await;
    let done = upload(&env, "done", b"replay-done").await;
    let _waiting = upload(&env, "waiting", b"replay-waiting").await;
    env.transport.set_reply("done", ok_response(&full_result("done", 1, 0)));
    env.state.scheduler.sync_replay(done).await.unwrap();

    let summary = env.state.reprocessor.reprocess_all().await;
    assert_eq!(summary.total, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);
    assert!(!summary.is_total_failure());

    assert_eq!(
        replays::count_by_status(&env.pool, ReplayStatus::Reprocessing).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_concurrent_schedulers_complete_replay_once() {
    let env = TestEnv::new().await;
    let replay_id = upload(&env, "race", b"replay-race").await;
    env.transport.set_reply("race", ok_response(&full_result("race", 2, 2)));

    // A second process sharing the store and the external API
    let other = ReplaySyncScheduler::new(
        env.pool.clone(),
        Arc::clone(&env.state.client),
        env.event_bus.clone(),
        ReconciliationMode::Lenient,
    );

    let (first, second) = tokio::join!(
        env.state.scheduler.sync_replay(replay_id),
        other.sync_replay(replay_id)
    );
    let outcomes = [first.unwrap(), second.unwrap()];

    let completed = outcomes
        .iter()
        .filter(|o| matches!(o, SyncOutcome::Completed))
        .count();
    let already_terminal = outcomes
        .iter()
        .filter(|o| matches!(o, SyncOutcome::AlreadyTerminal { status: ReplayStatus::Completed }))
        .count();
    assert_eq!(completed, 1, "outcomes: {:?}", outcomes);
    assert_eq!(already_terminal, 1, "outcomes: {:?}", outcomes);

    let replay = replays::find_by_id(&env.pool, replay_id).await.unwrap().unwrap();
    assert_eq!(replay.status, ReplayStatus::Completed);
    assert!(replay.processed_at_consistent());
    assert_eq!(teams::count_teams(&env.pool).await.unwrap(), 2);
    assert_eq!(players::count_players(&env.pool).await.unwrap(), 6);
}
