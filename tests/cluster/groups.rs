use super::helpers::{run_cluster_ok, FN_SUM_U64};
use std::collections::HashSet;

#[tokio::test]
async fn ten_way_join_race_yields_dense_ids() {
    run_cluster_ok(2, 5, |ctx| {
        Box::pin(async move {
            let world = ctx.global();
            let group = ctx.join_group("G").await?;
            // Joins still in flight elsewhere; quiesce first.
            world.barrier().await?;

            assert_eq!(group.size(), 10);
            let mine = group.my_group_id()?;
            assert!(mine < 10);
            // The mapping must be inverse on every member.
            assert_eq!(group.global_id(mine)?, ctx.my_id());

            // Publish each group-thread-id and check they are a permutation
            // of 0..10 with an identical map everywhere.
            ctx.register("shm", "gtid", &mine)?;
            world.barrier().await?;

            let ids: Vec<u32> = world.collect("shm", "gtid").await?;
            let distinct: HashSet<u32> = ids.iter().copied().collect();
            assert_eq!(distinct, (0..10).collect::<HashSet<u32>>());
            world.barrier().await
        })
    })
    .await;
}

#[tokio::test]
async fn rejoining_returns_the_same_membership() {
    run_cluster_ok(2, 1, |ctx| {
        Box::pin(async move {
            let first = ctx.join_group("H").await?;
            let again = ctx.join_group("H").await?;
            assert_eq!(first.id(), again.id());
            assert_eq!(first.my_group_id()?, again.my_group_id()?);
            ctx.global().barrier().await
        })
    })
    .await;
}

#[tokio::test]
async fn subgroup_collectives_only_involve_members() {
    run_cluster_ok(2, 2, |ctx| {
        Box::pin(async move {
            ctx.register("shm", "id", &(ctx.my_id() as u64))?;
            let world = ctx.global();
            world.barrier().await?;

            if ctx.my_id() % 2 == 0 {
                let evens = ctx.join_group("evens").await?;
                evens.barrier().await?;
                assert_eq!(evens.size(), 2);

                let total: u64 = evens.reduce(FN_SUM_U64, "shm", "id").await?;
                assert_eq!(total, 0 + 2);

                evens.broadcast("shm", "id", &100u64).await?;
                evens.barrier().await?;
                assert_eq!(ctx.get_local::<u64>("shm", "id")?, 100);
            }
            world.barrier().await?;

            // Odd threads were never touched by the subgroup broadcast.
            if ctx.my_id() % 2 == 1 {
                assert_eq!(ctx.get_local::<u64>("shm", "id")?, ctx.my_id() as u64);
            }
            world.barrier().await
        })
    })
    .await;
}

#[tokio::test]
async fn distinct_names_are_distinct_groups() {
    run_cluster_ok(2, 1, |ctx| {
        Box::pin(async move {
            let a = ctx.join_group("A").await?;
            let b = ctx.join_group("B").await?;
            assert_ne!(a.id(), b.id());
            assert_ne!(a.id(), ctx.global().id());
            ctx.global().barrier().await?;
            assert_eq!(a.size(), 2);
            assert_eq!(b.size(), 2);
            ctx.global().barrier().await
        })
    })
    .await;
}

#[tokio::test]
async fn group_barrier_over_subset_of_nodes() {
    // Only node 1's threads join; the group tree spans the coordinator
    // (master of every group) plus node 1.
    run_cluster_ok(2, 2, |ctx| {
        Box::pin(async move {
            if ctx.my_id() >= 2 {
                let remote = ctx.join_group("remote-only").await?;
                remote.barrier().await?;
                remote.barrier().await?;
            }
            ctx.global().barrier().await
        })
    })
    .await;
}
