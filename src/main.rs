use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use codejudge::config::{CliArgs, Config};
use codejudge::database as db;
use codejudge::judge::{Judge, JudgeSettings};
use codejudge::queue::GradeQueue;
use codejudge::web_server::{AppState, build_server};
use codejudge::worker::worker;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let n_threads = cli.threads;

    if n_threads == 0 {
        bail!("The number of grading workers must not be 0");
    }

    let Config {
        server: server_config,
        sandbox: sandbox_config,
        challenges,
    } = cli
        .to_config()
        .with_context(|| format!("Failed to load configuration from {}", cli.config_path))?;

    let db_path = db::get_db_path()?;
    if cli.flush_data {
        db::remove_db(&db_path);
    }

    let db_pool = db::init_db(&db_path)
        .await
        .context("Failed to initialize database")?;

    log::info!(
        "Loaded {} challenges, time limit {:?} per run",
        challenges.len(),
        std::time::Duration::from(sandbox_config.time_limit)
    );

    let judge = Arc::new(Judge::new(JudgeSettings::from(&sandbox_config)));
    let sandbox_config = Arc::new(sandbox_config);
    let grade_queue = Arc::new(GradeQueue::new());
    let shutdown_token = CancellationToken::new();

    // ======= PREPARATION END, EXECUTION START =======

    let mut workers = JoinSet::new();
    for i in 1..=n_threads {
        workers.spawn(worker(
            i,
            judge.clone(),
            sandbox_config.clone(),
            grade_queue.clone(),
            shutdown_token.clone(),
        ));
    }

    let server = build_server(
        server_config,
        AppState {
            challenges: Arc::new(challenges),
            sandbox: sandbox_config,
            db_pool: Arc::new(db_pool),
            queue: grade_queue,
        },
    )
    .context("Failed to build server")?;

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
        match res {
            Ok(Err(e)) => log::error!("Worker finished with error: {e:#}"),
            Err(e) if e.is_panic() => log::error!("Worker handle panicked: {:?}", e),
            Err(e) => log::error!("Worker handle finished with error: {:?}", e),
            Ok(Ok(())) => {}
        }
    }

    log::info!("Shutdown complete");
    Ok(())
}
