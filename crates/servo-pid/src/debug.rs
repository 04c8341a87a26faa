// servo-pid: A fixed-period PID controller library for servo drive loops
// Copyright (c) 2025 Security Union LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use iggy::client::{Client, UserClient};
use iggy::clients::client::IggyClient;
use iggy::clients::producer::IggyProducer;
use iggy::error::IggyError;
use iggy::messages::send_messages::{Message, Partitioning};
use iggy::utils::duration::IggyDuration;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::str::FromStr;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

/// Configuration for PID controller debugging
#[derive(Debug, Clone)]
pub struct DebugConfig {
    /// URL of the iggy server
    pub iggy_url: String,
    /// Stream name for debugging data
    pub stream_name: String,
    /// Topic name for this controller's data
    pub topic_name: String,
    /// Unique ID for this controller instance
    pub controller_id: String,
    /// Optional sampling rate (in Hz) for debug data, converted to a tick
    /// interval with the controller's sample time
    pub sample_rate_hz: Option<f64>,
    /// Samples buffered between the controller and the sender thread.
    /// Samples arriving while the buffer is full are dropped.
    pub queue_capacity: usize,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            iggy_url: "127.0.0.1:8090".to_string(),
            stream_name: "servo_pid_debug".to_string(),
            topic_name: "controller_data".to_string(),
            controller_id: "pid_controller".to_string(),
            sample_rate_hz: None,
            queue_capacity: 1024,
        }
    }
}

/// One sampled controller step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerDebugData {
    /// Timestamp in milliseconds since UNIX epoch
    pub timestamp: u128,
    /// Controller ID
    pub controller_id: String,
    /// Controller tick the sample was taken on
    pub tick: u64,
    /// Error fed to the step
    pub error: f64,
    /// Output after saturation and ramping
    pub output: f64,
    /// Proportional term
    pub p_term: f64,
    /// Saturated integral
    pub i_term: f64,
    /// Derivative term
    pub d_term: f64,
}

// What crosses the queue; the controller id is attached by the sender thread.
#[derive(Debug, Clone, Copy, PartialEq)]
struct StepSample {
    timestamp: u128,
    tick: u64,
    error: f64,
    output: f64,
    p_term: f64,
    i_term: f64,
    d_term: f64,
}

impl StepSample {
    fn into_debug_data(self, controller_id: &str) -> ControllerDebugData {
        ControllerDebugData {
            timestamp: self.timestamp,
            controller_id: controller_id.to_string(),
            tick: self.tick,
            error: self.error,
            output: self.output,
            p_term: self.p_term,
            i_term: self.i_term,
            d_term: self.d_term,
        }
    }
}

/// Streams sampled controller steps to iggy from a background thread.
///
/// The cyclic side only does a non-blocking push of a fixed-size record into
/// a bounded queue; connecting, serializing and sending all happen on the
/// background thread. When that thread falls behind, samples are dropped
/// and counted instead of stalling the controller.
pub struct ControllerDebugger {
    tx: SyncSender<StepSample>,
    sample_every: u64,
    dropped: u64,
    disconnected: bool,
}

impl ControllerDebugger {
    /// Create a new controller debugger for a controller ticking every
    /// `sample_time` seconds
    pub fn new(config: DebugConfig, sample_time: f64) -> Self {
        let (tx, rx) = sync_channel(config.queue_capacity.max(1));
        let sample_every = sample_interval_ticks(config.sample_rate_hz, sample_time);

        thread::spawn(move || forward(config, rx));

        Self::from_sender(tx, sample_every)
    }

    fn from_sender(tx: SyncSender<StepSample>, sample_every: u64) -> Self {
        Self {
            tx,
            sample_every,
            dropped: 0,
            disconnected: false,
        }
    }

    /// Log the state of one controller step
    pub fn log_pid_state(
        &mut self,
        tick: u64,
        error: f64,
        p_term: f64,
        i_term: f64,
        d_term: f64,
        output: f64,
    ) {
        if self.disconnected || tick % self.sample_every != 0 {
            return;
        }

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();

        let sample = StepSample {
            timestamp,
            tick,
            error,
            output,
            p_term,
            i_term,
            d_term,
        };

        match self.tx.try_send(sample) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.dropped += 1,
            // The receiver only goes away if the forwarding thread died
            Err(TrySendError::Disconnected(_)) => self.disconnected = true,
        }
    }

    /// Samples discarded because the sender thread was behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

fn sample_interval_ticks(sample_rate_hz: Option<f64>, sample_time: f64) -> u64 {
    match sample_rate_hz {
        Some(hz) if hz.is_finite() && hz > 0.0 => {
            let ticks = (1.0 / (hz * sample_time)).round();
            if ticks >= 1.0 {
                ticks as u64
            } else {
                1
            }
        }
        _ => 1,
    }
}

fn forward(config: DebugConfig, rx: Receiver<StepSample>) {
    info!(
        "PID controller debugging started for '{}'",
        config.controller_id
    );

    let log_filename = format!("{}_debug.log", config.controller_id);
    let mut log_file = match OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_filename)
    {
        Ok(file) => {
            info!("debug data will be logged to {}", log_filename);
            Some(file)
        }
        Err(e) => {
            error!("error opening log file {}: {}", log_filename, e);
            None
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to create tokio runtime: {}", e);
            return;
        }
    };

    info!(
        "connecting to iggy at {} (stream: {}, topic: {})",
        config.iggy_url, config.stream_name, config.topic_name
    );
    let producer = match runtime.block_on(connect(&config)) {
        Ok(producer) => {
            info!("ready to send debug data to iggy");
            Some(producer)
        }
        Err(e) => {
            warn!("iggy unavailable ({}), falling back to file logging only", e);
            None
        }
    };

    while let Ok(sample) = rx.recv() {
        let debug_data = sample.into_debug_data(&config.controller_id);
        let payload = match serde_json::to_vec(&debug_data) {
            Ok(payload) => payload,
            Err(e) => {
                error!("failed to serialize debug data: {}", e);
                continue;
            }
        };

        if let Some(ref mut file) = log_file {
            append_to_log(file, &payload);
        }

        if let Some(ref producer) = producer {
            let message = Message::new(None, payload.into(), None);
            if let Err(e) = runtime.block_on(producer.send(vec![message])) {
                error!("failed to send message to iggy: {}", e);
            }
        }
    }
}

async fn connect(config: &DebugConfig) -> Result<IggyProducer, IggyError> {
    let connection_string = format!("iggy://iggy:iggy@{}", config.iggy_url);
    let client = IggyClient::from_connection_string(&connection_string)?;
    client.connect().await?;
    client.login_user("iggy", "iggy").await?;

    let mut builder = client
        .producer(&config.stream_name, &config.topic_name)?
        .batch_size(1000)
        .partitioning(Partitioning::balanced());
    if let Ok(send_interval) = IggyDuration::from_str("1ms") {
        builder = builder.send_interval(send_interval);
    }
    let mut producer = builder.build();
    producer.init().await?;

    Ok(producer)
}

fn append_to_log(file: &mut File, payload: &[u8]) {
    if let Err(e) = file.write_all(payload).and_then(|_| file.write_all(b"\n")) {
        error!("error writing to log file: {}", e);
    }
}
