use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use arena::config::{CliArgs, Config};
use arena::database as db;
use arena::judge::JudgeService;
use arena::publisher::LeaderboardPublisher;
use arena::queue::JobQueue;
use arena::sandbox::{self, ExecutionLimits};
use arena::score::ScoreLedger;
use arena::web_server::build_server;
use arena::worker::worker;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let Config {
        server: server_config,
        sandbox: sandbox_config,
        judge: judge_config,
    } = cli.to_config().expect("Failed to load configuration");

    let n_workers = cli.threads.unwrap_or(judge_config.workers);
    if n_workers == 0 {
        panic!("The number of judge workers must not be 0");
    }

    let db_path = db::get_db_path(server_config.db_path.as_deref());
    if cli.flush_data {
        db::remove_db(&db_path);
    }
    let db_pool = Arc::new(
        db::init_db(&db_path)
            .await
            .expect("Failed to initialize database"),
    );

    let ledger = Arc::new(ScoreLedger::new());
    db::hydrate_ledger(&ledger, db_pool.clone())
        .await
        .expect("Failed to hydrate score ledger");

    let publisher = Arc::new(LeaderboardPublisher::new(ledger.clone()));
    let service = Arc::new(JudgeService::new(
        db_pool.clone(),
        ledger.clone(),
        publisher.clone(),
        ExecutionLimits::from_config(&sandbox_config),
    ));
    let job_queue = Arc::new(JobQueue::new());
    let max_queue_wait = Duration::from_millis(judge_config.max_queue_wait_ms);
    let shutdown_token = CancellationToken::new();

    // ======= PREPARATION END, EXECUTION START =======

    let mut workers = JoinSet::new();
    for i in 1..=n_workers {
        let runner = sandbox::create_sandbox_runner(i, &sandbox_config)
            .expect("Failed to create sandbox runner");
        workers.spawn(worker(
            i,
            service.clone(),
            Arc::from(runner),
            job_queue.clone(),
            max_queue_wait,
            shutdown_token.clone(),
        ));
    }

    let server = build_server(
        server_config,
        db_pool,
        job_queue,
        ledger,
        publisher,
    )
    .expect("Failed to build server");

    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    // ===== EXECUTION END, WAITING FOR SHUTDOWN ======

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
        Some(res_worker) = workers.join_next() => {
            log::error!("A worker terminated unexpectedly: {:?}", res_worker);
        }
    }

    // 1. Shutdown actix-web server gracefully
    server_handle.stop(true).await;

    // 2. Broadcast shutdown signal to workers
    shutdown_token.cancel();
    log::info!("Shutdown signal sent to workers, waiting for them to finish...");

    // 3. Wait until every worker terminates
    while let Some(res) = workers.join_next().await {
        if let Err(e) = res {
            if e.is_panic() {
                log::error!("Worker handle panicked: {:?}", e);
            } else {
                log::error!("Worker handle finished with error: {:?}", e);
            }
        }
    }

    log::info!("Shutdown complete");
    Ok(())
}
