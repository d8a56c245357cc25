use super::helpers::run_cluster_ok;

#[tokio::test]
async fn value_visible_everywhere_after_barrier() {
    run_cluster_ok(2, 2, |ctx| {
        Box::pin(async move {
            ctx.register("shm", "x", &0i32)?;
            let world = ctx.global();
            world.barrier().await?;

            if ctx.my_id() == 0 {
                world.broadcast("shm", "x", &42i32).await?;
            }
            world.barrier().await?;

            assert_eq!(ctx.get_local::<i32>("shm", "x")?, 42);
            Ok(())
        })
    })
    .await;
}

#[tokio::test]
async fn concurrent_broadcasts_are_not_mixed() {
    // Two racing broadcasts: the coordinator serializes them, so every
    // thread must end up with the same winner.
    run_cluster_ok(2, 2, |ctx| {
        Box::pin(async move {
            ctx.register("shm", "x", &0i32)?;
            let world = ctx.global();
            world.barrier().await?;

            match ctx.my_id() {
                0 => world.broadcast("shm", "x", &42i32).await?,
                1 => world.broadcast("shm", "x", &7i32).await?,
                _ => {}
            }
            world.barrier().await?;

            let values: Vec<i32> = world.collect("shm", "x").await?;
            assert_eq!(values.len(), 4);
            assert!(values[0] == 42 || values[0] == 7, "got {}", values[0]);
            assert!(
                values.iter().all(|&v| v == values[0]),
                "mixed broadcast results: {values:?}"
            );
            Ok(())
        })
    })
    .await;
}

#[tokio::test]
async fn large_value_spans_many_chunks() {
    // Test config uses a 64-byte chunk size; this payload needs hundreds.
    run_cluster_ok(2, 1, |ctx| {
        Box::pin(async move {
            ctx.register("shm", "blob", &Vec::<u8>::new())?;
            let world = ctx.global();
            world.barrier().await?;

            let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
            if ctx.my_id() == 0 {
                world.broadcast("shm", "blob", &payload).await?;
            }
            world.barrier().await?;

            assert_eq!(ctx.get_local::<Vec<u8>>("shm", "blob")?, payload);
            Ok(())
        })
    })
    .await;
}

#[tokio::test]
async fn broadcast_wakes_monitors() {
    run_cluster_ok(2, 1, |ctx| {
        Box::pin(async move {
            ctx.register("shm", "flag", &0u8)?;
            let world = ctx.global();
            world.barrier().await?;

            if ctx.my_id() == 0 {
                world.broadcast("shm", "flag", &1u8).await?;
            }
            // Counted wait: no race with the broadcast landing first.
            ctx.wait_for("shm", "flag", 1).await?;
            assert_eq!(ctx.get_local::<u8>("shm", "flag")?, 1);
            world.barrier().await
        })
    })
    .await;
}
