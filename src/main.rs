use adaptive_signal::config::AppConfig;
use adaptive_signal::engine::synthetic_engine;
use adaptive_signal::errors::Result;
use adaptive_signal::global_variables::DEFAULT_CONFIG_PATH;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Duration;

async fn run() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = AppConfig::load_or_default(&path)?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_on_signal = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupt received; finishing the current step");
            stop_on_signal.store(true, Ordering::Relaxed);
        }
    });

    let controller = config.controller.build_controller()?;
    let mut engine = synthetic_engine(&config, "adaptive", controller)?;
    engine.attach_output_sinks(&config.output, None);

    let pacing = Duration::from_millis(config.simulation.pacing_ms);
    let report = engine.run_paced(&stop, pacing).await;

    println!("=== Final Report ({} steps, {:.0} s) ===", report.steps, report.elapsed_seconds);
    println!("{}", report.summary);
    println!(
        "Decisions: {}  Switches: {}  Fail-open: {}  Ties: {}  Preemptions: {}",
        report.stats.decisions,
        report.stats.switches,
        report.stats.fail_opens,
        report.stats.tie_breaks,
        report.stats.preemptions
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::init();
    println!("Starting adaptive signal controller...");
    if let Err(e) = run().await {
        eprintln!("Controller error: {}", e);
        std::process::exit(1);
    }
}
