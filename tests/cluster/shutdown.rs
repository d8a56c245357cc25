use super::helpers::{run_cluster, run_cluster_ok};
use tessera::TesseraError;

#[tokio::test]
async fn five_nodes_exit_cleanly() {
    run_cluster_ok(5, 1, |ctx| {
        Box::pin(async move { ctx.global().barrier().await })
    })
    .await;
}

#[tokio::test]
async fn immediate_return_drains_the_bye_tree() {
    // No collective at all: the bye tree alone must terminate the job.
    run_cluster_ok(3, 2, |_ctx| Box::pin(async move { Ok(()) })).await;
}

#[tokio::test]
async fn user_error_propagates_from_its_node() {
    let results = run_cluster(2, 2, |ctx| {
        Box::pin(async move {
            ctx.global().barrier().await?;
            if ctx.my_id() == 3 {
                return Err(TesseraError::UserException {
                    thread: 3,
                    detail: "intentional failure".into(),
                });
            }
            Ok(())
        })
    })
    .await;

    // Thread 3 lives on node 1; the job still shuts down everywhere.
    assert!(results[0].is_ok(), "node 0: {:?}", results[0]);
    match &results[1] {
        Err(TesseraError::UserException { thread: 3, detail }) => {
            assert_eq!(detail, "intentional failure");
        }
        other => panic!("node 1: {other:?}"),
    }
}

#[tokio::test]
async fn uneven_thread_counts_terminate() {
    // Node 0 hosts 3 threads, nodes 1 and 2 host 3 more; termination must
    // not depend on a balanced layout.
    run_cluster_ok(3, 2, |ctx| {
        Box::pin(async move {
            let world = ctx.global();
            world.barrier().await?;
            world.barrier().await
        })
    })
    .await;
}
