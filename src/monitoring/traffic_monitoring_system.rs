use crate::data_structures::Approach;
use crate::errors::{ConfigError, SinkError};
use crate::shared_data::{population_variance, HistoryRecord};
use crate::simulation_engine::interface::{SensorReader, TrafficSensors};
use crate::simulation_engine::lanes::IntersectionLayout;

use amiquip::{Channel, Connection, Exchange, Publish, QueueDeclareOptions};
use serde::Serialize;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Somewhere history records go as they are produced.
pub trait HistorySink {
    fn name(&self) -> &str;

    fn record(&mut self, record: &HistoryRecord) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Appends records to a CSV file. Headers are written only when the file is new.
pub struct CsvHistorySink {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
}

impl CsvHistorySink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> Result<&mut csv::Writer<File>, SinkError> {
        if self.writer.is_none() {
            let file_exists = self.path.exists();
            let file = OpenOptions::new()
                .append(true)
                .create(true)
                .open(&self.path)?;
            let wtr = csv::WriterBuilder::new()
                .has_headers(!file_exists)
                .from_writer(file);
            self.writer = Some(wtr);
        }
        self.writer
            .as_mut()
            .ok_or_else(|| SinkError::Io(std::io::Error::other("history writer unavailable")))
    }
}

impl HistorySink for CsvHistorySink {
    fn name(&self) -> &str {
        "csv"
    }

    fn record(&mut self, record: &HistoryRecord) -> Result<(), SinkError> {
        self.writer()?.serialize(record)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        if let Some(wtr) = self.writer.as_mut() {
            wtr.flush()?;
        }
        Ok(())
    }
}

/// Reads back a history file written by [`CsvHistorySink`].
pub fn load_history<P: AsRef<Path>>(path: P) -> Result<Vec<HistoryRecord>, SinkError> {
    let file = File::open(path)?;
    let mut rdr = csv::Reader::from_reader(file);
    let mut records = Vec::new();
    for result in rdr.deserialize() {
        let record: HistoryRecord = result?;
        records.push(record);
    }
    Ok(records)
}

/// Publishes each record as JSON to an AMQP queue.
pub struct AmqpHistorySink {
    connection: Option<Connection>,
    channel: Channel,
    routing_key: String,
}

impl AmqpHistorySink {
    pub fn connect(url: &str, routing_key: &str) -> Result<Self, SinkError> {
        let mut connection = Connection::insecure_open(url)?;
        let channel = connection.open_channel(None)?;
        channel.queue_declare(routing_key, QueueDeclareOptions::default())?;
        log::info!("Publishing history to AMQP queue '{}'", routing_key);
        Ok(Self {
            connection: Some(connection),
            channel,
            routing_key: routing_key.to_string(),
        })
    }

    pub fn close(mut self) -> Result<(), SinkError> {
        if let Some(connection) = self.connection.take() {
            connection.close()?;
        }
        Ok(())
    }
}

impl HistorySink for AmqpHistorySink {
    fn name(&self) -> &str {
        "amqp"
    }

    fn record(&mut self, record: &HistoryRecord) -> Result<(), SinkError> {
        let payload = serde_json::to_vec(record)?;
        let exchange = Exchange::direct(&self.channel);
        exchange.publish(Publish::new(&payload, self.routing_key.as_str()))?;
        Ok(())
    }
}

/// Publishes a finished history from async code without blocking the runtime.
pub async fn publish_history(
    records: Vec<HistoryRecord>,
    url: String,
    routing_key: String,
) -> Result<usize, SinkError> {
    tokio::task::spawn_blocking(move || -> Result<usize, SinkError> {
        let mut sink = AmqpHistorySink::connect(&url, &routing_key)?;
        for record in &records {
            sink.record(record)?;
        }
        sink.close()?;
        Ok(records.len())
    })
    .await
    .map_err(|e| SinkError::Io(std::io::Error::other(e)))?
}

/// Per-approach figures over the sampled steps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApproachStats {
    pub approach: String,
    pub average_queue: f64,
    pub max_queue: u32,
    pub average_wait: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSummary {
    pub samples: usize,
    pub approaches: Vec<ApproachStats>,
    pub network: ApproachStats,
    pub total_emission: f64,
}

impl fmt::Display for MonitorSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<15} {:>10} {:>10} {:>12}",
            "Approach", "Avg queue", "Max queue", "Avg wait (s)"
        )?;
        for row in self.approaches.iter().chain(std::iter::once(&self.network)) {
            writeln!(
                f,
                "{:<15} {:>10.2} {:>10} {:>12.2}",
                row.approach, row.average_queue, row.max_queue, row.average_wait
            )?;
        }
        write!(
            f,
            "{} samples, total emission {:.1} g",
            self.samples, self.total_emission
        )
    }
}

/// Mean total queue of two runs and how much the candidate improves on the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Comparison {
    pub baseline_mean_queue: f64,
    pub candidate_mean_queue: f64,
    pub improvement_pct: f64,
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "baseline {:.2} vs candidate {:.2} vehicles queued ({:+.1}%)",
            self.baseline_mean_queue, self.candidate_mean_queue, self.improvement_pct
        )
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// Samples the intersection every `sampling_interval` steps into an append-only history.
#[derive(Debug, Clone)]
pub struct TrafficMonitor {
    sampling_interval: u64,
    history: Vec<HistoryRecord>,
    queue_samples: [Vec<u32>; 4],
    wait_samples: [Vec<f64>; 4],
}

impl TrafficMonitor {
    pub fn new(sampling_interval: u64) -> Result<Self, ConfigError> {
        if sampling_interval == 0 {
            return Err(ConfigError::invalid(
                "sampling_interval",
                0,
                "must be at least 1",
            ));
        }
        Ok(Self {
            sampling_interval,
            history: Vec::new(),
            queue_samples: Default::default(),
            wait_samples: Default::default(),
        })
    }

    pub fn sampling_interval(&self) -> u64 {
        self.sampling_interval
    }

    /// Takes a sample if `step` falls on the sampling interval and returns the new record.
    pub fn observe<S: TrafficSensors + ?Sized>(
        &mut self,
        sensors: &S,
        layout: &IntersectionLayout,
        step: u64,
        time_seconds: f64,
    ) -> Option<&HistoryRecord> {
        if step % self.sampling_interval != 0 {
            return None;
        }
        let reader = SensorReader::new(sensors);
        let mut queues = [0.0; 4];
        for approach in Approach::ALL {
            let i = approach.index();
            let queue = reader.queue_length(layout.lane(approach));
            queues[i] = queue as f64;
            self.queue_samples[i].push(queue);
            self.wait_samples[i].push(reader.waiting_time(layout.lane(approach)));
        }
        self.history.push(HistoryRecord {
            step,
            time_seconds,
            total_queue: queues.iter().sum::<f64>() as u32,
            queue_variance: population_variance(&queues),
            total_emission: reader.total_emission(layout),
        });
        self.history.last()
    }

    pub fn history(&self) -> &[HistoryRecord] {
        &self.history
    }

    pub fn mean_total_queue(&self) -> f64 {
        mean(self.history.iter().map(|r| r.total_queue as f64))
    }

    pub fn summary(&self) -> MonitorSummary {
        let approaches: Vec<ApproachStats> = Approach::ALL
            .iter()
            .map(|&approach| {
                let i = approach.index();
                ApproachStats {
                    approach: approach.to_string(),
                    average_queue: mean(self.queue_samples[i].iter().map(|&q| q as f64)),
                    max_queue: self.queue_samples[i].iter().copied().max().unwrap_or(0),
                    average_wait: mean(self.wait_samples[i].iter().copied()),
                }
            })
            .collect();
        // Pooled over every approach sample, not summed across approaches.
        let network = ApproachStats {
            approach: "NETWORK TOTAL".to_string(),
            average_queue: mean(self.queue_samples.iter().flatten().map(|&q| q as f64)),
            max_queue: self.queue_samples.iter().flatten().copied().max().unwrap_or(0),
            average_wait: mean(self.wait_samples.iter().flatten().copied()),
        };
        MonitorSummary {
            samples: self.history.len(),
            approaches,
            network,
            total_emission: self.history.iter().map(|r| r.total_emission).sum(),
        }
    }

    pub fn compare(baseline: &[HistoryRecord], candidate: &[HistoryRecord]) -> Comparison {
        let baseline_mean_queue = mean(baseline.iter().map(|r| r.total_queue as f64));
        let candidate_mean_queue = mean(candidate.iter().map(|r| r.total_queue as f64));
        let improvement_pct = if baseline_mean_queue > 0.0 {
            (baseline_mean_queue - candidate_mean_queue) / baseline_mean_queue * 100.0
        } else {
            0.0
        };
        Comparison {
            baseline_mean_queue,
            candidate_mean_queue,
            improvement_pct,
        }
    }
}
