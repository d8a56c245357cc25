use super::helpers::run_cluster_ok;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn two_nodes_two_threads() {
    // No barrier future may resolve before all four threads entered.
    let entered = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&entered);

    run_cluster_ok(2, 2, move |ctx| {
        let entered = Arc::clone(&observed);
        Box::pin(async move {
            entered.fetch_add(1, Ordering::SeqCst);
            ctx.global().barrier().await?;
            assert_eq!(entered.load(Ordering::SeqCst), 4);
            Ok(())
        })
    })
    .await;

    assert_eq!(entered.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn repeated_rounds() {
    run_cluster_ok(2, 2, |ctx| {
        Box::pin(async move {
            let world = ctx.global();
            for _ in 0..5 {
                world.barrier().await?;
            }
            Ok(())
        })
    })
    .await;
}

#[tokio::test]
async fn single_node() {
    run_cluster_ok(1, 4, |ctx| {
        Box::pin(async move { ctx.global().barrier().await })
    })
    .await;
}

#[tokio::test]
async fn three_nodes_uneven_tree() {
    run_cluster_ok(3, 1, |ctx| {
        Box::pin(async move {
            ctx.global().barrier().await?;
            ctx.global().barrier().await
        })
    })
    .await;
}
