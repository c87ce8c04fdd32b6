mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use pulse_core::{ActivityKind, MiningStore, UserId};
use pulse_logging::{LogConfig, PulseSubscriberBuilder, UserContextGuard};
use pulse_mining::{ActivityOutcome, MiningConfig, MiningEngine, MiningHandle};
use pulse_storage::{InMemoryMiningStore, RedbMiningStore, RedbStorageConfig};
use tracing::info;

use crate::cli::{Cli, Command, GlobalArgs};

// Thread-local user context stays valid across awaits on a current-thread runtime
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.global.pretty {
        LogConfig::development()
    } else {
        LogConfig::cli()
    };
    let _log_guard = PulseSubscriberBuilder::new()
        .with_config(log_config)
        .with_level(&cli.global.log_level)
        .init()?;

    let mut config = match &cli.global.config {
        Some(path) => MiningConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => MiningConfig::default(),
    };
    if let Command::Cleanup {
        threshold_hours: Some(hours),
    } = &cli.command
    {
        config = config.with_cleanup_threshold_hours(*hours);
    }

    let engine = MiningEngine::new(open_store(&cli.global)?, config)?;

    let result = run(&engine, cli.command).await;
    engine.shutdown().await;
    result
}

fn open_store(global: &GlobalArgs) -> anyhow::Result<Arc<dyn MiningStore>> {
    Ok(match &global.db {
        Some(path) => {
            let store = RedbMiningStore::open(RedbStorageConfig {
                db_path: path.clone(),
            })
            .with_context(|| format!("opening {}", path.display()))?;
            info!(path = %path.display(), "Using redb store");
            Arc::new(store)
        }
        None => Arc::new(InMemoryMiningStore::new()),
    })
}

async fn run(engine: &Arc<MiningEngine>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Simulate {
            user,
            activities,
            stop,
        } => {
            let handle = engine.handle_for(&user)?;
            let _ctx = UserContextGuard::new(handle.user());
            simulate(&handle, &activities, stop).await?;
            print_status(engine, handle.user()).await?;
        }

        Command::Status { user } => {
            let user = UserId::new(user)?;
            let _ctx = UserContextGuard::new(&user);
            print_status(engine, &user).await?;
        }

        Command::Cleanup { .. } => {
            let terminated = engine.cleanup_inactive_sessions().await;
            println!("Auto-terminated {} session(s)", terminated.len());
            for session in terminated {
                println!("  {} {} started {}", session.id, session.user_id, session.start_time);
            }
        }

        Command::ResetDay { user } => {
            let user = UserId::new(user)?;
            engine.reset_daily_counters(&user).await?;
            println!("Daily counters reset for {}", user);
        }
    }

    Ok(())
}

async fn simulate(
    handle: &MiningHandle,
    activities: &[(ActivityKind, u32)],
    stop: bool,
) -> anyhow::Result<()> {
    let health = handle.initialize().await?;
    if health.needs_recovery() {
        println!("Recovered a stale session");
    }

    if !handle.start_mining().await {
        anyhow::bail!("failed to start mining for {}", handle.user());
    }
    handle.check_mining_health().await?.ensure_recordable(handle.user())?;

    for &(kind, count) in activities {
        let mut credited = 0;
        let mut denied = 0;
        for _ in 0..count {
            match handle.record_activity(kind).await? {
                ActivityOutcome::Credited(reward) => {
                    credited += 1;
                    println!(
                        "{:<8} +{} points +{} tokens (x{:.2})",
                        kind, reward.points, reward.tokens, reward.multiplier
                    );
                }
                ActivityOutcome::LimitReached { .. } => denied += 1,
                ActivityOutcome::Inactive(health) => {
                    anyhow::bail!("mining became inactive: {:?}", health)
                }
            }
        }
        if denied > 0 {
            println!("{:<8} limit reached for this activity type ({} denied)", kind, denied);
        }
        info!(%kind, credited, denied, "Simulated activity batch");
    }

    if let Some(projection) = handle.session_projection().await? {
        println!(
            "Session {} running for {}s, projected {} tokens",
            projection.session.id,
            projection.elapsed.num_seconds(),
            projection.projected_tokens
        );
    }

    if stop && !handle.stop_mining().await {
        anyhow::bail!("failed to stop mining for {}", handle.user());
    }
    Ok(())
}

async fn print_status(engine: &Arc<MiningEngine>, user: &UserId) -> anyhow::Result<()> {
    let handle = engine.handle(user.clone());

    match engine.stats(user).await? {
        Some(stats) => println!("{}", serde_json::to_string_pretty(&stats)?),
        None => println!("No stats recorded for {}", user),
    }

    let health = handle.check_mining_health().await?;
    println!("active: {}, healthy: {}", health.active, health.healthy);

    println!("Remaining today:");
    for kind in ActivityKind::ALL {
        println!("  {:<8} {}", kind, handle.get_remaining_count(kind).await?);
    }

    println!("Achievements:");
    for progress in handle.achievements().await? {
        println!(
            "  {:<18} {}/{}{}",
            progress.achievement_id,
            progress.progress,
            progress.max_progress,
            if progress.completed { " (completed)" } else { "" }
        );
    }

    let sessions = engine.sessions(user).await?;
    println!("Sessions: {}", sessions.len());
    for session in sessions.iter().rev().take(5) {
        println!("  {} {} {}", session.id, session.status, session.start_time);
    }
    Ok(())
}
