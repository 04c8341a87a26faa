// servo-pid: A fixed-period PID controller library for servo drive loops
// Copyright (c) 2025 Security Union LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Online retuning of a controller owned by a cyclic task.
//!
//! The cyclic side never blocks: gains live in atomics that a supervisory
//! thread stores into and the controller loads from at the start of each
//! step.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::{ControllerConfig, ControllerStatistics, PidController, PidError};

/// A set of PID gains.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Gains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

/// Gains stored as `f64` bit patterns so each one is read and written as a
/// single atomic word.
#[derive(Debug)]
pub struct SharedGains {
    kp: AtomicU64,
    ki: AtomicU64,
    kd: AtomicU64,
}

impl SharedGains {
    fn new(gains: Gains) -> Self {
        SharedGains {
            kp: AtomicU64::new(gains.kp.to_bits()),
            ki: AtomicU64::new(gains.ki.to_bits()),
            kd: AtomicU64::new(gains.kd.to_bits()),
        }
    }

    pub fn load(&self) -> Gains {
        Gains {
            kp: f64::from_bits(self.kp.load(Ordering::Acquire)),
            ki: f64::from_bits(self.ki.load(Ordering::Acquire)),
            kd: f64::from_bits(self.kd.load(Ordering::Acquire)),
        }
    }

    fn store(slot: &AtomicU64, value: f64, name: &'static str) -> Result<(), PidError> {
        if !value.is_finite() {
            return Err(PidError::InvalidParameter(name));
        }
        slot.store(value.to_bits(), Ordering::Release);
        Ok(())
    }
}

/// Cloneable handle used by supervisory code to retune a
/// [`TunablePidController`] from any thread.
#[derive(Debug, Clone)]
pub struct GainTuner {
    shared: Arc<SharedGains>,
}

impl GainTuner {
    pub fn kp(&self) -> f64 {
        self.gains().kp
    }

    pub fn ki(&self) -> f64 {
        self.gains().ki
    }

    pub fn kd(&self) -> f64 {
        self.gains().kd
    }

    pub fn gains(&self) -> Gains {
        self.shared.load()
    }

    /// Set the proportional gain (Kp). Takes effect on the next step.
    pub fn set_kp(&self, kp: f64) -> Result<(), PidError> {
        SharedGains::store(&self.shared.kp, kp, "kp must be a finite number")
    }

    /// Set the integral gain (Ki). Takes effect on the next step.
    pub fn set_ki(&self, ki: f64) -> Result<(), PidError> {
        SharedGains::store(&self.shared.ki, ki, "ki must be a finite number")
    }

    /// Set the derivative gain (Kd). Takes effect on the next step.
    pub fn set_kd(&self, kd: f64) -> Result<(), PidError> {
        SharedGains::store(&self.shared.kd, kd, "kd must be a finite number")
    }

    /// Set all three gains, rejecting the whole set if any value is invalid.
    ///
    /// Each gain is published individually, so a concurrent step may observe
    /// a mix of old and new gains for one tick, never a torn value.
    pub fn set_gains(&self, gains: Gains) -> Result<(), PidError> {
        if !(gains.kp.is_finite() && gains.ki.is_finite() && gains.kd.is_finite()) {
            return Err(PidError::InvalidParameter("gains must be finite numbers"));
        }
        self.set_kp(gains.kp)?;
        self.set_ki(gains.ki)?;
        self.set_kd(gains.kd)
    }
}

/// A [`PidController`] whose gains can be retuned from another thread
/// without locks and without resetting its running state.
///
/// ```
/// use servo_pid::{ControllerConfig, TunablePidController};
///
/// let config = ControllerConfig::new()
///     .with_kp(0.08)
///     .with_ki(1.0)
///     .with_limit(1.0)
///     .with_sample_time(0.001);
/// let mut controller = TunablePidController::new(config).unwrap();
/// let tuner = controller.tuner();
///
/// std::thread::spawn(move || tuner.set_kp(0.1).unwrap()).join().unwrap();
///
/// controller.step(10.0);
/// assert_eq!(controller.kp(), 0.1);
/// ```
#[derive(Debug)]
pub struct TunablePidController {
    controller: PidController,
    shared: Arc<SharedGains>,
}

impl TunablePidController {
    pub fn new(config: ControllerConfig) -> Result<Self, PidError> {
        Ok(Self::from_controller(PidController::new(config)?))
    }

    /// Wrap an existing controller, seeding the shared gains with its own.
    pub fn from_controller(controller: PidController) -> Self {
        let shared = Arc::new(SharedGains::new(controller.gains()));
        TunablePidController { controller, shared }
    }

    /// Get a handle for retuning this controller.
    pub fn tuner(&self) -> GainTuner {
        GainTuner {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Load the latest gains and evaluate one tick.
    pub fn step(&mut self, error: f64) -> f64 {
        self.controller.apply_gains(self.shared.load());
        self.controller.step(error)
    }

    pub fn compute(&mut self, setpoint: f64, measured: f64) -> f64 {
        self.step(setpoint - measured)
    }

    /// Gains used by the most recent step.
    pub fn kp(&self) -> f64 {
        self.controller.kp()
    }

    pub fn ki(&self) -> f64 {
        self.controller.ki()
    }

    pub fn kd(&self) -> f64 {
        self.controller.kd()
    }

    pub fn reset(&mut self) {
        self.controller.reset();
    }

    pub fn controller(&self) -> &PidController {
        &self.controller
    }

    pub fn get_statistics(&self) -> ControllerStatistics {
        self.controller.get_statistics()
    }

    pub fn into_inner(self) -> PidController {
        let mut controller = self.controller;
        controller.apply_gains(self.shared.load());
        controller
    }
}
