// comparison_main.rs
use adaptive_signal::config::AppConfig;
use adaptive_signal::engine::{synthetic_engine, EpisodeReport};
use adaptive_signal::errors::Result;
use adaptive_signal::flow_analyzer::DecisionStrategy;
use adaptive_signal::global_variables::DEFAULT_CONFIG_PATH;
use adaptive_signal::monitoring::{publish_history, TrafficMonitor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Baseline fixed cycle, reactive and proactive control over identical synthetic traffic.
async fn run() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = AppConfig::load_or_default(&path)?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_on_signal = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop_on_signal.store(true, Ordering::Relaxed);
        }
    });

    let alpha = match config.controller.strategy {
        DecisionStrategy::Proactive { alpha } => alpha,
        DecisionStrategy::Reactive => 0.5,
    };
    let runs = [
        ("baseline", DecisionStrategy::Reactive, true),
        ("reactive", DecisionStrategy::Reactive, false),
        ("proactive", DecisionStrategy::Proactive { alpha }, false),
    ];

    // History goes to AMQP once per finished run below, not streamed per step.
    let stream_output = config.output.without_amqp_stream();

    let mut reports: Vec<EpisodeReport> = Vec::new();
    for (label, strategy, fixed) in runs {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let solver = if fixed {
            config.simulation.baseline_solver()?
        } else {
            config.controller.solver.build()?
        };
        let controller = config.controller.build_controller_with(strategy, solver)?;
        let mut engine = synthetic_engine(&config, label, controller)?;
        engine.attach_output_sinks(&stream_output, Some(label));
        let report = engine.run(&stop);
        if config.output.amqp_enabled {
            match publish_history(
                report.history.clone(),
                config.output.amqp_url.clone(),
                config.output.amqp_queue.clone(),
            )
            .await
            {
                Ok(count) => log::info!("Published {} {} records", count, report.label),
                Err(e) => log::warn!("Could not publish {} history: {}", report.label, e),
            }
        }
        reports.push(report);
    }

    println!("=== Comparison Report ===");
    for report in &reports {
        println!("\n--- {} ---\n{}", report.label, report.summary);
    }
    if let Some((baseline, candidates)) = reports.split_first() {
        println!();
        for candidate in candidates {
            let comparison = TrafficMonitor::compare(&baseline.history, &candidate.history);
            println!("{:<10} {}", candidate.label, comparison);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::init();
    if let Err(e) = run().await {
        eprintln!("Comparison error: {}", e);
        std::process::exit(1);
    }
}
