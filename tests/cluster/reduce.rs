use super::helpers::{run_cluster_ok, FN_CONCAT, FN_SUM_U64};
use tessera::TesseraError;

#[tokio::test]
async fn sum_of_global_ids() {
    run_cluster_ok(2, 2, |ctx| {
        Box::pin(async move {
            ctx.register("shm", "id", &(ctx.my_id() as u64))?;
            let world = ctx.global();
            world.barrier().await?;

            let total: u64 = world.reduce(FN_SUM_U64, "shm", "id").await?;
            assert_eq!(total, 0 + 1 + 2 + 3);
            world.barrier().await
        })
    })
    .await;
}

#[tokio::test]
async fn result_is_independent_of_placement() {
    // Same reduction, different thread->node mappings.
    for (nodes, threads_per_node) in [(1, 6), (2, 3), (3, 2), (6, 1)] {
        run_cluster_ok(nodes, threads_per_node, |ctx| {
            Box::pin(async move {
                ctx.register("shm", "id", &(ctx.my_id() as u64))?;
                let world = ctx.global();
                world.barrier().await?;

                let total: u64 = world.reduce(FN_SUM_U64, "shm", "id").await?;
                assert_eq!(total, 15, "0..=5 must sum to 15");
                world.barrier().await
            })
        })
        .await;
    }
}

#[tokio::test]
async fn concat_keeps_group_thread_id_order() {
    // Associative but not commutative: exposes any ordering slip in the
    // local fold.
    run_cluster_ok(2, 2, |ctx| {
        Box::pin(async move {
            ctx.register("shm", "tag", &ctx.my_id().to_string())?;
            let world = ctx.global();
            world.barrier().await?;

            if ctx.my_id() == 0 {
                // Local folds run in ascending group-thread-id order; with
                // the global group that is ascending global id per node.
                let tags: Vec<String> = world.collect("shm", "tag").await?;
                assert_eq!(tags, vec!["0", "1", "2", "3"]);

                let folded: String = world.reduce(FN_CONCAT, "shm", "tag").await?;
                assert_eq!(folded.len(), 4);
                for tag in ["0", "1", "2", "3"] {
                    assert!(folded.contains(tag), "{folded} missing {tag}");
                }
            }
            world.barrier().await
        })
    })
    .await;
}

#[tokio::test]
async fn collect_orders_by_group_thread_id() {
    run_cluster_ok(3, 2, |ctx| {
        Box::pin(async move {
            ctx.register("shm", "id", &ctx.my_id())?;
            let world = ctx.global();
            world.barrier().await?;

            let ids: Vec<u32> = world.collect("shm", "id").await?;
            assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
            world.barrier().await
        })
    })
    .await;
}

#[tokio::test]
async fn reduce_of_unregistered_variable_fails() {
    run_cluster_ok(2, 1, |ctx| {
        Box::pin(async move {
            ctx.register("shm", "present", &1u64)?;
            let world = ctx.global();
            world.barrier().await?;

            let err = world
                .reduce::<u64>(FN_SUM_U64, "shm", "absent")
                .await
                .unwrap_err();
            assert!(
                matches!(err, TesseraError::NoSuchVariable { .. }),
                "unexpected error: {err}"
            );
            world.barrier().await
        })
    })
    .await;
}

#[tokio::test]
async fn reduce_with_unknown_combiner_fails() {
    run_cluster_ok(2, 1, |ctx| {
        Box::pin(async move {
            ctx.register("shm", "id", &1u64)?;
            let world = ctx.global();
            world.barrier().await?;

            let err = world.reduce::<u64>(999, "shm", "id").await.unwrap_err();
            assert!(
                matches!(err, TesseraError::UnknownFunction { fn_id: 999 }),
                "unexpected error: {err}"
            );
            world.barrier().await
        })
    })
    .await;
}
