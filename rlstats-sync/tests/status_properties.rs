//! Property tests for replay status transitions as enforced by the store
//!
//! Random sequences of sync and reprocess writes are applied to one stored
//! replay. A write must succeed exactly when the status table allows the
//! edge, and `processed_at` must track terminal states after every step.

mod helpers;

use chrono::Utc;
use proptest::prelude::*;
use rlstats_common::{Error, ReplayStatus};
use rlstats_sync::db::replays::{self, Completion};
use rlstats_sync::models::{Replay, ReplayMetadata};

#[derive(Debug, Clone, Copy)]
enum Op {
    Complete,
    Fail,
    Reprocess,
}

impl Op {
    fn target(self) -> ReplayStatus {
        match self {
            Op::Complete => ReplayStatus::Completed,
            Op::Fail => ReplayStatus::Failed,
            Op::Reprocess => ReplayStatus::Reprocessing,
        }
    }
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Complete), Just(Op::Fail), Just(Op::Reprocess)]
}

async fn apply(pool: &sqlx::SqlitePool, id: uuid::Uuid, op: Op) -> rlstats_common::Result<()> {
    match op {
        Op::Complete => {
            let metadata = ReplayMetadata::default();
            let completion = Completion {
                metadata: &metadata,
                blue_team_id: None,
                orange_team_id: None,
                uploader_id: None,
                diagnostics: None,
                processed_at: Utc::now(),
            };
            replays::complete_replay(pool, id, &completion).await
        }
        Op::Fail => replays::mark_failed(pool, id, Utc::now(), Some("external failure")).await,
        Op::Reprocess => replays::begin_reprocess(pool, id).await,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn writes_follow_transition_table(ops in prop::collection::vec(op_strategy(), 1..12)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let (_dir, pool) = helpers::create_test_db().await;
            let replay = Replay::new("prop.replay", Some("prop".to_string()));
            replays::insert_replay(&pool, &replay).await.unwrap();

            let mut expected = ReplayStatus::Processing;
            for op in ops {
                let allowed = expected.can_transition_to(op.target());
                let result = apply(&pool, replay.id, op).await;

                match result {
                    Ok(()) => {
                        prop_assert!(allowed, "{:?} from {} should be refused", op, expected);
                        expected = op.target();
                    }
                    Err(Error::Conflict(_)) => {
                        prop_assert!(!allowed, "{:?} from {} should succeed", op, expected);
                    }
                    Err(e) => return Err(TestCaseError::fail(e.to_string())),
                }

                let stored = replays::find_by_id(&pool, replay.id).await.unwrap().unwrap();
                prop_assert_eq!(stored.status, expected);
                prop_assert!(stored.processed_at_consistent());
            }
            Ok(())
        })?;
    }
}
