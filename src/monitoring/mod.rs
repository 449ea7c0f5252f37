// monitoring/mod.rs
pub mod traffic_monitoring_system;

pub use traffic_monitoring_system::{
    load_history, publish_history, AmqpHistorySink, Comparison, CsvHistorySink, HistorySink,
    MonitorSummary, TrafficMonitor,
};
