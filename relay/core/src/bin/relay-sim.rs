//! Relay Simulator
//!
//! Drives the orchestrator with scripted adapters and prints the resulting
//! metrics and resilience statistics as JSON.
//!
//! # Usage
//!
//! ```bash
//! relay-sim
//!
//! # With verbose logging
//! RUST_LOG=debug relay-sim
//!
//! # Vote on sentiment across adapters
//! RELAY_REQUIRE_CONSENSUS=true relay-sim
//! ```
//!
//! Configuration is read from `~/.config/model-relay/relay.toml` and
//! `RELAY_*` environment variables, as for any embedding of the relay.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tracing::{info, warn};

use relay_core::{
    load_config, AdapterError, AnalysisOptions, AnalysisType, BatchScheduler, BatchStats,
    ModelAdapter, Orchestrator, OrchestratorMetrics, PrivacyLevel, RelayError, RequestContext,
    ResilienceStats, ScriptedAdapter, SentimentLabel, WorkItem,
};

const NOTES: &[&str] = &[
    "Today I reflected on how the week went and felt grateful for the quiet mornings.",
    "Goal for the quarter: finish the draft and send it to two reviewers.",
    "Habit log: walked every day, skipped reading twice, slept before midnight.",
    "Shopping list and a reminder to call the dentist.",
];

#[derive(Serialize)]
struct Report {
    metrics: OrchestratorMetrics,
    resilience: ResilienceStats,
    batch: BatchStats,
}

fn adapters() -> Vec<Arc<ScriptedAdapter>> {
    let flaky_local = Arc::new(
        ScriptedAdapter::new("local-flaky", PrivacyLevel::Local)
            .with_sentiment(SentimentLabel::Positive, 0.8),
    );
    flaky_local.fail_times(2, &AdapterError::NetworkError("connection reset".into()));

    let slow_cloud = Arc::new(
        ScriptedAdapter::new("cloud-slow", PrivacyLevel::Cloud)
            .with_latency(Duration::from_millis(250))
            .with_cost(0.02)
            .with_sentiment(SentimentLabel::Positive, 0.7),
    );

    let healthy_cloud = Arc::new(
        ScriptedAdapter::new("cloud-healthy", PrivacyLevel::Cloud)
            .with_cost(0.01)
            .with_sentiment(SentimentLabel::Neutral, 0.6),
    );

    vec![flaky_local, slow_cloud, healthy_cloud]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("relay_sim=info".parse()?)
                .add_directive("relay_core=info".parse()?),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config().context("failed to load relay configuration")?;
    info!(source = %config.source(), "Configuration loaded");

    let batch_config = config.batch.clone();
    let cache_config = config.cache.memory.clone();
    let orchestrator = Arc::new(Orchestrator::new(config)?);

    for adapter in adapters() {
        orchestrator
            .register_adapter(adapter as Arc<dyn ModelAdapter>)
            .await?;
    }

    // Personal analyses, each twice; the second pass is served from cache
    let context = RequestContext::new();
    for pass in 0..2 {
        for note in NOTES {
            match orchestrator
                .analyze_personal_content(note, &AnalysisOptions::default(), &context)
                .await
            {
                Ok(analysis) => info!(
                    pass,
                    category = %analysis.category,
                    adapter = ?analysis.provenance.adapter,
                    retries = analysis.provenance.retries,
                    cache_hit = analysis.provenance.cache_hit,
                    "Analysis complete"
                ),
                Err(e) => warn!(pass, error = %e, "Analysis failed"),
            }
        }
    }

    // Sentiment, voting when consensus is configured
    for note in NOTES {
        match orchestrator.analyze_sentiment(note, &context).await {
            Ok(outcome) => info!(
                label = ?outcome.result.label,
                confidence = outcome.result.confidence,
                weak_consensus = outcome.consensus.as_ref().is_some_and(|c| c.weak),
                "Sentiment complete"
            ),
            Err(e) => warn!(error = %e, "Sentiment failed"),
        }
    }

    // Bulk run through the batch scheduler
    let scheduler = BatchScheduler::new(batch_config, cache_config);
    let items: Vec<WorkItem> = (0..24)
        .map(|i| WorkItem::new(format!("journal/{i:03}.md"), NOTES[i % NOTES.len()]))
        .collect();
    let run = scheduler
        .run(items, |batch| {
            let orchestrator = orchestrator.clone();
            async move {
                let options = AnalysisOptions::default().with_analysis_type(AnalysisType::Reflection);
                let mut analyzed = 0usize;
                for item in &batch {
                    orchestrator
                        .analyze_personal_content(&item.content, &options, &RequestContext::new())
                        .await?;
                    analyzed += 1;
                }
                Ok::<_, RelayError>(analyzed)
            }
        })
        .await;

    let report = Report {
        metrics: orchestrator.get_metrics(),
        resilience: orchestrator.get_resilience_stats(),
        batch: run.stats,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    orchestrator.dispose().await;
    Ok(())
}
