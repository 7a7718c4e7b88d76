//! Property-based tests for existence prediction using proptest.
//!
//! Invariants tested:
//! - After any sequence of submissions, the predicted existence equals the
//!   real existence once the queue has run to completion
//! - Admitted jobs succeed; rejected jobs fail with an existence error

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use cast_core::{
    DirectoryResource, Error, Job, JobContext, JobOptions, JobStatus, ResourceKind, ResourceQueue,
    Result,
};
use proptest::prelude::*;
use serde_json::Value;

use common::{CreateResource, DataSerializer, DeleteResource, ModifyResource, TestKind, DATA_FILE};

/// Optimized proptest config: every case touches the filesystem.
fn prediction_config() -> ProptestConfig {
    ProptestConfig {
        cases: 48,
        max_shrink_iters: 128,
        ..ProptestConfig::default()
    }
}

/// A read-only job that accepts either existence.
struct Inspect;

#[async_trait]
impl Job for Inspect {
    type Kind = TestKind;

    fn resource_name(&self) -> &str {
        "subject"
    }

    fn options(&self) -> JobOptions {
        JobOptions::Neutral
    }

    async fn run(&self, resource: &DirectoryResource, _ctx: &JobContext) -> Result<Value> {
        Ok(Value::Bool(resource.root().is_dir()))
    }
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Create,
    Update,
    Delete,
    Inspect,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Create),
        Just(Op::Update),
        Just(Op::Delete),
        Just(Op::Inspect),
    ]
}

fn job_for(op: Op) -> Arc<dyn Job<Kind = TestKind>> {
    match op {
        Op::Create => Arc::new(CreateResource::new("subject")),
        Op::Update => Arc::new(ModifyResource::new("subject", "x")),
        Op::Delete => Arc::new(DeleteResource::new("subject")),
        Op::Inspect => Arc::new(Inspect),
    }
}

struct Outcome {
    predicted: bool,
    actual: bool,
    outcomes: Vec<std::result::Result<JobStatus, Error>>,
}

async fn run_sequence(initially_exists: bool, ops: Vec<Op>) -> Outcome {
    let temp = tempfile::tempdir().unwrap();
    if initially_exists {
        let root = temp.path().join("subject");
        tokio::fs::create_dir(&root).await.unwrap();
        tokio::fs::write(root.join(DATA_FILE), "").await.unwrap();
    }

    let kind = TestKind::new(temp.path());
    let queue = ResourceQueue::<TestKind>::new(
        "TestResource",
        kind.instantiate("subject"),
        Arc::new(DataSerializer),
    );

    let mut submitted = Vec::new();
    for op in ops {
        submitted.push(queue.submit(job_for(op)).await);
    }

    let predicted = queue.predict_existence().await;

    let mut outcomes = Vec::new();
    for submission in submitted {
        outcomes.push(match submission {
            Ok(handle) => Ok(handle.wait().await),
            Err(err) => Err(err),
        });
    }

    Outcome {
        predicted,
        actual: queue.exists().await,
        outcomes,
    }
}

proptest! {
    #![proptest_config(prediction_config())]

    #[test]
    fn prop_prediction_matches_existence_after_drain(
        initially_exists in any::<bool>(),
        ops in prop::collection::vec(op_strategy(), 0..10),
    ) {
        let outcome = tokio_test::block_on(run_sequence(initially_exists, ops));
        prop_assert_eq!(outcome.predicted, outcome.actual);
    }

    #[test]
    fn prop_admitted_jobs_succeed_and_rejections_are_existence_errors(
        initially_exists in any::<bool>(),
        ops in prop::collection::vec(op_strategy(), 1..10),
    ) {
        let outcome = tokio_test::block_on(run_sequence(initially_exists, ops));
        for submission in outcome.outcomes {
            match submission {
                Ok(status) => prop_assert!(
                    matches!(status, JobStatus::Succeeded(_)),
                    "admitted job ended {status}"
                ),
                Err(err) => prop_assert!(err.is_existence_error(), "unexpected rejection {err}"),
            }
        }
    }
}
