use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use scoreflow_core::config::EngineConfig;
use scoreflow_core::impls::InMemoryFacts;
use scoreflow_core::ports::Facts;
use scoreflow_core::{EngineBuilder, EntityId, EntityKind, EntityRef, Reason};
use tracing::info;

#[derive(Parser)]
#[command(name = "scoreflow", version, about = "Score propagation engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an in-memory engine, complete a task and watch the cascade.
    Demo {
        /// Priority given to the completed task.
        #[arg(long, default_value_t = 20.0)]
        priority: f64,
    },
    /// Print the effective configuration as JSON.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = EngineConfig::from_env()?;

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Demo { priority } => demo(config, priority).await?,
    }
    Ok(())
}

/// T has two dependents D1 and D2, all three under project P.
/// Completing T rescores D1 and D2, then P once.
async fn demo(config: EngineConfig, priority: f64) -> anyhow::Result<()> {
    // (A) 入力と engine を用意
    let facts = Arc::new(InMemoryFacts::new());
    let engine = EngineBuilder::new()
        .config(config)
        .inputs(facts.clone())
        .build()?;

    // (B) 階層を登録（score は 0 で seed、再計算なし）
    let pillar = EntityRef::pillar(EntityId::from_u128(1));
    let area = EntityRef::area(EntityId::from_u128(2));
    let project = EntityRef::project(EntityId::from_u128(3));
    let t = EntityRef::task(EntityId::from_u128(10));
    let d1 = EntityRef::task(EntityId::from_u128(11));
    let d2 = EntityRef::task(EntityId::from_u128(12));

    engine.register_entity(pillar, None).await?;
    engine.register_entity(area, Some(pillar)).await?;
    engine.register_entity(project, Some(area)).await?;
    for task in [t, d1, d2] {
        engine.register_entity(task, Some(project)).await?;
    }
    facts.set(t, Facts::new().with("priority", 10.0));
    facts.set(d1, Facts::new().with("priority", 1.0));
    facts.set(d2, Facts::new().with("priority", 2.0));

    // (C) worker を起動して初期 score を揃える
    let handle = engine.start();
    engine.add_dependency(d1, t).await?;
    engine.add_dependency(d2, t).await?;
    engine.rescore_all().await?;
    engine.wait_idle(Duration::from_millis(20)).await;
    print_scores(&engine, &[t, d1, d2, project, area, pillar]).await?;

    // (D) T が完了した
    facts.set_fact(t, "priority", priority);
    let receipt = engine
        .notify_changed(EntityKind::Task, t.id, Reason::TaskCompleted)
        .await?;
    info!(cascade = %receipt.cascade_id, planned = receipt.planned, "task completed");
    engine.wait_idle(Duration::from_millis(20)).await;

    print_scores(&engine, &[t, d1, d2, project, area, pillar]).await?;
    for job in &receipt.jobs {
        if let Some(status) = engine.get_job_outcome(job.job_id).await {
            println!("{}", serde_json::to_string(&status)?);
        }
    }
    println!("{}", serde_json::to_string_pretty(&engine.status().await)?);

    handle.shutdown().await;
    Ok(())
}

async fn print_scores(
    engine: &scoreflow_core::Engine,
    entities: &[EntityRef],
) -> anyhow::Result<()> {
    for &entity in entities {
        let score = engine.score(entity).await?;
        println!("{entity} value={} version={}", score.value, score.version);
    }
    println!();
    Ok(())
}
