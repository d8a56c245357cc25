use super::helpers::{run_cluster_ok, FN_SUM_U64, TASK_DOUBLE};
use tessera::TesseraError;

#[tokio::test]
async fn put_then_get_returns_the_put_value() {
    run_cluster_ok(2, 2, |ctx| {
        Box::pin(async move {
            if ctx.my_id() == 0 {
                ctx.register("shm", "y", &Vec::<i32>::new())?;
                ctx.put_local("shm", "y", &vec![1, 2, 3])?;
            }
            let world = ctx.global();
            world.barrier().await?;

            if ctx.my_id() == 3 {
                let y: Vec<i32> = ctx.get(0, "shm", "y").await?;
                assert_eq!(y, vec![1, 2, 3]);
            }
            world.barrier().await
        })
    })
    .await;
}

#[tokio::test]
async fn get_of_unregistered_variable_fails() {
    run_cluster_ok(2, 2, |ctx| {
        Box::pin(async move {
            if ctx.my_id() == 0 {
                ctx.register("shm", "y", &0u8)?;
            }
            let world = ctx.global();
            world.barrier().await?;

            if ctx.my_id() == 3 {
                let err = ctx.get::<u8>(0, "shm", "z").await.unwrap_err();
                assert!(
                    matches!(err, TesseraError::NoSuchVariable { .. }),
                    "unexpected error: {err}"
                );

                let err = ctx.get::<u8>(0, "other", "z").await.unwrap_err();
                assert!(
                    matches!(err, TesseraError::NoSuchStorage { .. }),
                    "unexpected error: {err}"
                );
            }
            world.barrier().await
        })
    })
    .await;
}

#[tokio::test]
async fn remote_put_overwrites() {
    run_cluster_ok(2, 1, |ctx| {
        Box::pin(async move {
            ctx.register("shm", "v", &0u32)?;
            let world = ctx.global();
            world.barrier().await?;

            if ctx.my_id() == 1 {
                ctx.put(0, "shm", "v", &99u32).await?;
            }
            world.barrier().await?;

            if ctx.my_id() == 0 {
                assert_eq!(ctx.get_local::<u32>("shm", "v")?, 99);
            }
            world.barrier().await
        })
    })
    .await;
}

#[tokio::test]
async fn accumulate_composes_contributions() {
    run_cluster_ok(2, 2, |ctx| {
        Box::pin(async move {
            if ctx.my_id() == 0 {
                ctx.register("shm", "sum", &100u64)?;
            }
            let world = ctx.global();
            world.barrier().await?;

            ctx.accumulate(0, "shm", "sum", FN_SUM_U64, &(ctx.my_id() as u64 + 1))
                .await?;
            world.barrier().await?;

            if ctx.my_id() == 0 {
                // 100 + 1 + 2 + 3 + 4, in whatever order the puts landed.
                assert_eq!(ctx.get_local::<u64>("shm", "sum")?, 110);
            }
            world.barrier().await
        })
    })
    .await;
}

#[tokio::test]
async fn async_at_runs_registered_task() {
    run_cluster_ok(2, 2, |ctx| {
        Box::pin(async move {
            let world = ctx.global();
            world.barrier().await?;

            if ctx.my_id() == 3 {
                let doubled: u64 = ctx.async_at(0, TASK_DOUBLE, &21u64).await?;
                assert_eq!(doubled, 42);

                let err = ctx.async_at::<u64, u64>(0, 999, &1u64).await.unwrap_err();
                assert!(
                    matches!(err, TesseraError::UnknownFunction { fn_id: 999 }),
                    "unexpected error: {err}"
                );
            }
            world.barrier().await
        })
    })
    .await;
}

#[tokio::test]
async fn remote_put_wakes_wait_for() {
    run_cluster_ok(2, 1, |ctx| {
        Box::pin(async move {
            ctx.register("shm", "flag", &0u8)?;
            let world = ctx.global();
            world.barrier().await?;

            match ctx.my_id() {
                0 => ctx.put(1, "shm", "flag", &1u8).await?,
                _ => {
                    ctx.wait_for("shm", "flag", 1).await?;
                    assert_eq!(ctx.get_local::<u8>("shm", "flag")?, 1);
                }
            }
            world.barrier().await
        })
    })
    .await;
}

#[tokio::test]
async fn get_of_unknown_thread_fails() {
    run_cluster_ok(1, 2, |ctx| {
        Box::pin(async move {
            let world = ctx.global();
            world.barrier().await?;

            let err = ctx.get::<u8>(77, "shm", "x").await.unwrap_err();
            assert!(
                matches!(err, TesseraError::UnknownThread { thread: 77 }),
                "unexpected error: {err}"
            );
            world.barrier().await
        })
    })
    .await;
}
