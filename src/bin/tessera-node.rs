//! Standalone node launcher with a built-in smoke-test program: every
//! thread contributes its id to a global reduction, thread 0 checks the
//! total. Useful for verifying a deployment before wiring in real user
//! code.
//!
//! Usage:
//!   tessera-node coordinator <localPort> <node0Host> <node0Port> \
//!       <totalThreads> <threadIds> [propertiesFile]
//!   tessera-node worker ...same arguments...
//!
//! `threadIds` is a comma-separated list of this node's global thread ids.

use std::process::ExitCode;
use std::sync::Arc;
use tessera::{FnRegistry, NodeSpec, Runtime, TesseraConfig, TesseraError, ThreadContext};

const FN_SUM: u16 = 1;

fn usage() -> TesseraError {
    TesseraError::Config(
        "usage: tessera-node <coordinator|worker> <localPort> <node0Host> <node0Port> \
         <totalThreads> <threadIds> [propertiesFile]"
            .into(),
    )
}

fn parse_spec(args: &[String]) -> tessera::Result<(NodeSpec, TesseraConfig)> {
    if args.len() < 6 {
        return Err(usage());
    }
    let is_coordinator = match args[0].as_str() {
        "coordinator" => true,
        "worker" => false,
        _ => return Err(usage()),
    };
    let bind_port: u16 = args[1]
        .parse()
        .map_err(|_| TesseraError::Config(format!("bad local port: {}", args[1])))?;
    let coordinator = format!("{}:{}", args[2], args[3]);
    let coordinator: std::net::SocketAddr = match coordinator.parse() {
        Ok(addr) => addr,
        Err(_) => {
            use std::net::ToSocketAddrs;
            coordinator
                .to_socket_addrs()
                .ok()
                .and_then(|mut addrs| addrs.next())
                .ok_or_else(|| {
                    TesseraError::Config(format!("cannot resolve node 0: {coordinator}"))
                })?
        }
    };
    let total_threads: u32 = args[4]
        .parse()
        .map_err(|_| TesseraError::Config(format!("bad thread count: {}", args[4])))?;
    let local_thread_ids = args[5]
        .split(',')
        .map(|s| {
            s.trim()
                .parse()
                .map_err(|_| TesseraError::Config(format!("bad thread id: {s}")))
        })
        .collect::<tessera::Result<Vec<u32>>>()?;

    let config = match args.get(6) {
        Some(path) => {
            let blob = std::fs::read_to_string(path)?;
            TesseraConfig::from_properties(&blob)?
        }
        None => TesseraConfig::from_env(),
    };

    let host = hostname();
    Ok((
        NodeSpec {
            host,
            bind_port,
            coordinator,
            is_coordinator,
            total_threads,
            local_thread_ids,
        },
        config,
    ))
}

fn hostname() -> String {
    std::env::var("TESSERA_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn smoke_entry(ctx: ThreadContext) -> futures::future::BoxFuture<'static, tessera::Result<()>> {
    Box::pin(async move {
        let me = ctx.my_id();
        ctx.register("smoke", "id", &(me as u64))?;

        let world = ctx.global();
        world.barrier().await?;

        let total: u64 = world.reduce(FN_SUM, "smoke", "id").await?;
        let n = ctx.thread_count() as u64;
        let expected = n * (n - 1) / 2;
        if total != expected {
            return Err(TesseraError::UserException {
                thread: me,
                detail: format!("smoke reduce: got {total}, expected {expected}"),
            });
        }
        if me == 0 {
            tracing::info!(threads = n, total, "smoke test passed");
        }
        world.barrier().await
    })
}

async fn run() -> tessera::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (spec, config) = parse_spec(&args)?;

    let mut registry = FnRegistry::new();
    registry.register_combiner_typed::<u64, _>(FN_SUM, |a, b| a + b);

    let runtime = Runtime::bind(spec, config, registry, Arc::new(smoke_entry)).await?;
    tracing::info!(addr = %runtime.local_addr(), "node bound");
    runtime.run().await
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let outcome = tokio::runtime::Runtime::new()
        .expect("tokio runtime")
        .block_on(run());

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "node failed");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
