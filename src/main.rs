use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use agent_pulse::{
    spawn_poll_loop, Action, BatchPoller, Config, Manager, SessionDescriptor, SessionSource, Status,
};

/// Session list re-read from the config file every cycle
struct ConfigSessions {
    path: Option<PathBuf>,
    last: Vec<SessionDescriptor>,
}

#[async_trait]
impl SessionSource for ConfigSessions {
    async fn sessions(&mut self) -> Vec<SessionDescriptor> {
        if let Some(path) = &self.path {
            match Config::reload_from(path).await {
                Ok(config) => self.last = config.sessions,
                Err(e) => warn!("keeping previous session list: {:#}", e),
            }
        }
        self.last.clone()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    // Initialize logging; stdout is reserved for poll results
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    let manager = Manager::from_config(&config);
    if manager.check_availability().await.is_empty() {
        warn!("no enabled integration is available; every session will report missing");
    }

    let poller = BatchPoller::new(Arc::new(manager), config.workers)
        .with_task_timeout(config.task_timeout());
    let source = ConfigSessions {
        path: Config::default_path(),
        last: config.sessions.clone(),
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<Action>();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    info!(
        workers = config.workers,
        interval_ms = config.poll_interval_ms,
        sessions = config.sessions.len(),
        "starting poll loop"
    );
    let poll_loop = spawn_poll_loop(poller, source, config.poll_interval(), tx, shutdown_rx);

    loop {
        tokio::select! {
            action = rx.recv() => match action {
                Some(Action::PollCompleted(result)) => {
                    let ordered: BTreeMap<_, _> = result.iter().collect();
                    println!("{}", serde_json::to_string(&ordered)?);

                    let count = |status: Status| result.values().filter(|e| e.status == status).count();
                    info!(
                        active = count(Status::Active),
                        approval = count(Status::Approval),
                        ready = count(Status::Ready),
                        missing = count(Status::Missing),
                        "poll complete"
                    );
                }
                Some(Action::SessionsEvicted(ids)) => {
                    info!(sessions = ?ids, "stopped monitoring removed sessions");
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    poll_loop.await?;
    Ok(())
}
