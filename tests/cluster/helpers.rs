use futures::future::BoxFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tessera::{EntryPoint, FnRegistry, NodeSpec, Result, Runtime, TesseraConfig, ThreadContext};

pub const FN_SUM_U64: u16 = 1;
pub const FN_CONCAT: u16 = 2;
pub const TASK_DOUBLE: u16 = 10;

/// Registry every test cluster ships: a sum, a non-commutative associative
/// combiner, and a task body.
pub fn test_registry() -> FnRegistry {
    let mut registry = FnRegistry::new();
    registry.register_combiner_typed::<u64, _>(FN_SUM_U64, |a, b| a + b);
    registry.register_combiner_typed::<String, _>(FN_CONCAT, |a, b| a + &b);
    registry.register_task_typed::<u64, u64, _>(TASK_DOUBLE, |x| x * 2);
    registry
}

pub fn test_config() -> TesseraConfig {
    TesseraConfig {
        // Small enough that modest values exercise the chunked codec.
        chunk_size: 64,
        shutdown_timeout: Duration::from_secs(5),
        ..TesseraConfig::default()
    }
}

/// Form a cluster of `nodes` in-process nodes with `threads_per_node`
/// logical threads each (global ids dense, node-major), run `entry` on
/// every thread, and return the per-node run results.
///
/// Panics if the job does not terminate within 30 seconds.
pub async fn run_cluster<F>(nodes: usize, threads_per_node: usize, entry: F) -> Vec<Result<()>>
where
    F: Fn(ThreadContext) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
{
    let entry: EntryPoint = Arc::new(entry);
    let total = (nodes * threads_per_node) as u32;
    let thread_ids = |node: usize| -> Vec<u32> {
        (0..threads_per_node)
            .map(|t| (node * threads_per_node + t) as u32)
            .collect()
    };

    let placeholder: SocketAddr = "127.0.0.1:1".parse().unwrap();
    let coordinator = Runtime::bind(
        NodeSpec {
            host: "127.0.0.1".into(),
            bind_port: 0,
            coordinator: placeholder,
            is_coordinator: true,
            total_threads: total,
            local_thread_ids: thread_ids(0),
        },
        test_config(),
        test_registry(),
        Arc::clone(&entry),
    )
    .await
    .expect("bind coordinator");

    let coordinator_addr: SocketAddr = format!("127.0.0.1:{}", coordinator.local_addr().port())
        .parse()
        .unwrap();

    let mut handles = vec![tokio::spawn(coordinator.run())];
    for node in 1..nodes {
        let worker = Runtime::bind(
            NodeSpec {
                host: "127.0.0.1".into(),
                bind_port: 0,
                coordinator: coordinator_addr,
                is_coordinator: false,
                total_threads: total,
                local_thread_ids: thread_ids(node),
            },
            test_config(),
            test_registry(),
            Arc::clone(&entry),
        )
        .await
        .expect("bind worker");
        handles.push(tokio::spawn(worker.run()));
    }

    let joined = tokio::time::timeout(Duration::from_secs(30), async {
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.expect("node task panicked"));
        }
        results
    })
    .await
    .expect("cluster did not terminate in time");

    joined
}

/// Like [`run_cluster`] but asserts every node exited cleanly.
pub async fn run_cluster_ok<F>(nodes: usize, threads_per_node: usize, entry: F)
where
    F: Fn(ThreadContext) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
{
    for (node, result) in run_cluster(nodes, threads_per_node, entry)
        .await
        .into_iter()
        .enumerate()
    {
        result.unwrap_or_else(|e| panic!("node {node} failed: {e}"));
    }
}
