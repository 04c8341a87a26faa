// servo-pid: A fixed-period PID controller library for servo drive loops
// Copyright (c) 2025 Security Union LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Closing a loop around one axis, one tick at a time.
//!
//! The real scheduler (a drive's cyclic task or a fieldbus sync timer) lives
//! outside this crate and calls [`ControlLoop::tick`] once per period.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::gains::{GainTuner, TunablePidController};
use crate::setpoint::SetpointSource;

/// Physical quantity exchanged with an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Quantity {
    Position,
    Velocity,
    Torque,
}

/// A single controlled motor or drive.
pub trait Axis {
    /// Sample the actual value of `quantity`.
    fn read(&self, quantity: Quantity) -> f64;

    /// Command a target value for `quantity`.
    fn write(&mut self, quantity: Quantity, value: f64);
}

impl<A: Axis + ?Sized> Axis for &mut A {
    fn read(&self, quantity: Quantity) -> f64 {
        (**self).read(quantity)
    }

    fn write(&mut self, quantity: Quantity, value: f64) {
        (**self).write(quantity, value)
    }
}

/// Which quantity closes the loop and which one receives the output.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LoopConfig {
    pub feedback: Quantity,
    pub command: Quantity,
}

impl Default for LoopConfig {
    // Velocity loop closed through a torque command
    fn default() -> Self {
        LoopConfig {
            feedback: Quantity::Velocity,
            command: Quantity::Torque,
        }
    }
}

/// Execution time of [`ControlLoop::tick`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleTiming {
    pub count: u64,
    pub last: Duration,
    pub max: Duration,
    pub total: Duration,
}

impl CycleTiming {
    pub fn record(&mut self, elapsed: Duration) {
        self.count += 1;
        self.last = elapsed;
        self.total += elapsed;
        if elapsed > self.max {
            self.max = elapsed;
        }
    }

    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total.as_nanos() / u128::from(self.count);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub setpoint: f64,
    pub feedback: f64,
    pub error: f64,
    pub command: f64,
}

/// A PID loop bound to an axis and a setpoint source.
#[derive(Debug)]
pub struct ControlLoop<A, S> {
    axis: A,
    setpoint: S,
    controller: TunablePidController,
    config: LoopConfig,
    timing: CycleTiming,
    ticks: u64,
}

impl<A: Axis, S: SetpointSource> ControlLoop<A, S> {
    pub fn new(axis: A, setpoint: S, controller: TunablePidController, config: LoopConfig) -> Self {
        ControlLoop {
            axis,
            setpoint,
            controller,
            config,
            timing: CycleTiming::default(),
            ticks: 0,
        }
    }

    /// Run one period: sample, step the controller, command the axis.
    pub fn tick(&mut self) -> TickReport {
        let started = Instant::now();

        let setpoint = self.setpoint.next_setpoint();
        let feedback = self.axis.read(self.config.feedback);
        let error = setpoint - feedback;
        let command = self.controller.step(error);
        self.axis.write(self.config.command, command);

        self.ticks += 1;
        self.timing.record(started.elapsed());

        TickReport {
            tick: self.ticks,
            setpoint,
            feedback,
            error,
            command,
        }
    }

    /// Run `ticks` periods back to back and return the last report.
    pub fn run_for(&mut self, ticks: u64) -> Option<TickReport> {
        let mut last = None;
        for _ in 0..ticks {
            last = Some(self.tick());
        }
        last
    }

    /// Tick once per sample period until `stop` is raised, returning the
    /// number of ticks run.
    ///
    /// Pacing uses `thread::sleep`, which is fine for simulations and demos
    /// but not a substitute for a real-time scheduler. A sample time too
    /// long to sleep for runs the ticks back to back.
    pub fn run_until(&mut self, stop: &AtomicBool) -> u64 {
        let sample_time = self.controller.controller().sample_time();
        let period = Duration::try_from_secs_f64(sample_time).ok();
        if period.is_none() {
            warn!(
                "sample time {} s cannot be slept for, running unpaced",
                sample_time
            );
        }

        let mut ran = 0;
        let mut next = Instant::now();

        while !stop.load(Ordering::Acquire) {
            self.tick();
            ran += 1;

            let Some(period) = period else {
                continue;
            };
            next = match next.checked_add(period) {
                Some(next) => next,
                None => Instant::now(),
            };
            let now = Instant::now();
            if next > now {
                thread::sleep(next - now);
            } else {
                // Overran; resynchronize instead of bursting to catch up
                next = now;
            }
        }

        debug!(
            "control loop stopped after {} ticks (max tick {:?})",
            ran,
            self.timing.max
        );
        ran
    }

    pub fn tuner(&self) -> GainTuner {
        self.controller.tuner()
    }

    pub fn controller(&self) -> &TunablePidController {
        &self.controller
    }

    pub fn axis(&self) -> &A {
        &self.axis
    }

    pub fn axis_mut(&mut self) -> &mut A {
        &mut self.axis
    }

    pub fn setpoint_source_mut(&mut self) -> &mut S {
        &mut self.setpoint
    }

    pub fn config(&self) -> LoopConfig {
        self.config
    }

    pub fn timing(&self) -> CycleTiming {
        self.timing
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn into_parts(self) -> (A, S, TunablePidController) {
        (self.axis, self.setpoint, self.controller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setpoint::{ConstantSetpoint, SineWave};
    use crate::ControllerConfig;
    use std::cell::RefCell;
    use std::sync::Arc;

    /// Records every access and reports a fixed feedback value.
    #[derive(Default)]
    struct RecordingAxis {
        feedback: f64,
        reads: RefCell<Vec<Quantity>>,
        writes: Vec<(Quantity, f64)>,
    }

    impl Axis for RecordingAxis {
        fn read(&self, quantity: Quantity) -> f64 {
            self.reads.borrow_mut().push(quantity);
            self.feedback
        }

        fn write(&mut self, quantity: Quantity, value: f64) {
            self.writes.push((quantity, value));
        }
    }

    fn p_controller(kp: f64) -> TunablePidController {
        TunablePidController::new(
            ControllerConfig::new()
                .with_kp(kp)
                .with_limit(100.0)
                .with_sample_time(0.001),
        )
        .unwrap()
    }

    #[test]
    fn test_tick_routes_feedback_and_command() {
        let axis = RecordingAxis {
            feedback: 4.0,
            ..Default::default()
        };
        let config = LoopConfig {
            feedback: Quantity::Position,
            command: Quantity::Velocity,
        };
        let mut control = ControlLoop::new(axis, ConstantSetpoint(10.0), p_controller(2.0), config);

        let report = control.tick();

        assert_eq!(report.tick, 1);
        assert_eq!(report.setpoint, 10.0);
        assert_eq!(report.feedback, 4.0);
        assert_eq!(report.error, 6.0);
        assert_eq!(report.command, 12.0);
        assert_eq!(*control.axis().reads.borrow(), vec![Quantity::Position]);
        assert_eq!(control.axis().writes, vec![(Quantity::Velocity, 12.0)]);
    }

    #[test]
    fn test_run_for_counts_ticks_and_timing() {
        let mut control = ControlLoop::new(
            RecordingAxis::default(),
            ConstantSetpoint(1.0),
            p_controller(1.0),
            LoopConfig::default(),
        );

        let last = control.run_for(25).unwrap();
        assert_eq!(last.tick, 25);
        assert_eq!(control.ticks(), 25);
        assert_eq!(control.timing().count, 25);
        assert!(control.timing().max >= control.timing().mean());
        assert_eq!(control.axis().writes.len(), 25);
        assert!(control.axis().writes.iter().all(|(q, _)| *q == Quantity::Torque));

        assert!(control.run_for(0).is_none());
    }

    #[test]
    fn test_retune_through_loop_tuner() {
        let mut control = ControlLoop::new(
            RecordingAxis::default(),
            ConstantSetpoint(3.0),
            p_controller(1.0),
            LoopConfig::default(),
        );
        assert_eq!(control.tick().command, 3.0);

        control.tuner().set_kp(2.0).unwrap();
        assert_eq!(control.tick().command, 6.0);
    }

    #[test]
    fn test_sine_setpoint_drives_position_loop() {
        let sine = SineWave::new(10_000.0, 1.0, 0.001).unwrap();
        let config = LoopConfig {
            feedback: Quantity::Position,
            command: Quantity::Velocity,
        };
        let mut control = ControlLoop::new(RecordingAxis::default(), sine, p_controller(1.0), config);

        let first = control.tick();
        let second = control.tick();
        assert_eq!(first.setpoint, 0.0);
        assert_eq!(second.setpoint, 62.0);
        assert_eq!(second.command, 62.0);
    }

    #[test]
    fn test_run_until_stops_on_flag() {
        let mut control = ControlLoop::new(
            RecordingAxis::default(),
            ConstantSetpoint(0.0),
            p_controller(1.0),
            LoopConfig::default(),
        );
        let stop = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&stop);
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            flag.store(true, Ordering::Release);
        });

        let ran = control.run_until(&stop);
        stopper.join().unwrap();

        assert!(ran > 0);
        assert_eq!(ran, control.ticks());
    }

    #[test]
    fn test_run_until_with_unsleepable_sample_time() {
        let controller = TunablePidController::new(
            ControllerConfig::new().with_kp(1.0).with_sample_time(1e300),
        )
        .unwrap();
        let axis = crate::sim::SimulatedAxis::new(1e300).unwrap();
        let mut control =
            ControlLoop::new(axis, ConstantSetpoint(0.0), controller, LoopConfig::default());

        let stop = Arc::new(AtomicBool::new(true));
        assert_eq!(control.run_until(&stop), 0);

        stop.store(false, Ordering::Release);
        let flag = Arc::clone(&stop);
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            flag.store(true, Ordering::Release);
        });

        let ran = control.run_until(&stop);
        stopper.join().unwrap();
        assert!(ran > 0);
        assert_eq!(control.axis().velocity(), 0.0);
    }

    #[test]
    fn test_mean_past_u32_ticks() {
        let count = 1u64 << 34;
        let timing = CycleTiming {
            count,
            last: Duration::from_nanos(10),
            max: Duration::from_nanos(10),
            total: Duration::from_nanos(count * 10),
        };
        assert_eq!(timing.mean(), Duration::from_nanos(10));
    }

    #[test]
    fn test_mean_of_empty_timing() {
        assert_eq!(CycleTiming::default().mean(), Duration::ZERO);

        let mut timing = CycleTiming::default();
        timing.record(Duration::from_micros(10));
        timing.record(Duration::from_micros(30));
        assert_eq!(timing.mean(), Duration::from_micros(20));
        assert_eq!(timing.max, Duration::from_micros(30));
        assert_eq!(timing.last, Duration::from_micros(30));
    }
}
