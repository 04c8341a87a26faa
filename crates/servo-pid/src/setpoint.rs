// servo-pid: A fixed-period PID controller library for servo drive loops
// Copyright (c) 2025 Security Union LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::PidError;

/// Produces the target value for a control loop, once per tick.
pub trait SetpointSource {
    fn next_setpoint(&mut self) -> f64;
}

/// A setpoint that never changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantSetpoint(pub f64);

impl SetpointSource for ConstantSetpoint {
    fn next_setpoint(&mut self) -> f64 {
        self.0
    }
}

/// A setpoint written asynchronously by another thread and read lock-free
/// by the cyclic task.
#[derive(Debug, Clone)]
pub struct SharedSetpoint {
    value: Arc<AtomicU64>,
}

impl SharedSetpoint {
    pub fn new(initial: f64) -> Self {
        SharedSetpoint {
            value: Arc::new(AtomicU64::new(initial.to_bits())),
        }
    }

    pub fn set(&self, value: f64) -> Result<(), PidError> {
        if !value.is_finite() {
            return Err(PidError::InvalidParameter(
                "setpoint must be a finite number",
            ));
        }
        self.value.store(value.to_bits(), Ordering::Release);
        Ok(())
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Acquire))
    }
}

impl SetpointSource for SharedSetpoint {
    fn next_setpoint(&mut self) -> f64 {
        self.get()
    }
}

/// Sine command generator for position loops.
///
/// Emits `floor(amplitude * sin(phase))` and then advances the phase by
/// `2π * frequency * Ts`, keeping it in `[0, 2π)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SineWave {
    amplitude: f64,
    phase_step: f64,
    phase: f64,
}

impl SineWave {
    pub fn new(amplitude: f64, frequency_hz: f64, sample_time: f64) -> Result<Self, PidError> {
        if !(sample_time.is_finite() && sample_time > 0.0) {
            return Err(PidError::InvalidConfiguration(
                "sample time must be a positive finite number",
            ));
        }
        if !(amplitude.is_finite() && frequency_hz.is_finite()) {
            return Err(PidError::InvalidConfiguration(
                "amplitude and frequency must be finite numbers",
            ));
        }
        Ok(SineWave {
            amplitude,
            phase_step: TAU * frequency_hz * sample_time,
            phase: 0.0,
        })
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }
}

impl SetpointSource for SineWave {
    fn next_setpoint(&mut self) -> f64 {
        let value = (self.amplitude * self.phase.sin()).floor();

        self.phase += self.phase_step;
        if self.phase >= TAU {
            self.phase -= TAU;
        } else if self.phase < 0.0 {
            self.phase += TAU;
        }

        value
    }
}

/// Zeroes setpoints whose magnitude is within `band` (inclusive).
///
/// Used to suppress noise around zero on analog-style command inputs.
#[derive(Debug, Clone)]
pub struct Deadband<S> {
    inner: S,
    band: f64,
}

impl<S: SetpointSource> Deadband<S> {
    pub fn new(inner: S, band: f64) -> Result<Self, PidError> {
        if !band.is_finite() {
            return Err(PidError::InvalidParameter(
                "deadband must be a finite number",
            ));
        }
        Ok(Deadband {
            inner,
            band: band.abs(),
        })
    }

    pub fn band(&self) -> f64 {
        self.band
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: SetpointSource> SetpointSource for Deadband<S> {
    fn next_setpoint(&mut self) -> f64 {
        let value = self.inner.next_setpoint();
        if value.abs() <= self.band {
            0.0
        } else {
            value
        }
    }
}
