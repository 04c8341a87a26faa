// servo-pid: A fixed-period PID controller library for servo drive loops
// Copyright (c) 2025 Security Union LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::cyclic::{Axis, Quantity};
use crate::PidError;

/// A deterministic single-axis plant for examples, tests and benchmarks.
///
/// Torque commands drive a first-order velocity model,
/// `dv/dt = torque_gain * torque - damping * v - load`, integrated once per
/// write with the configured sample time. Velocity and position commands are
/// tracked ideally.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedAxis {
    sample_time: f64,
    torque_gain: f64,
    damping: f64,
    load: f64,
    position: f64,
    velocity: f64,
    torque: f64,
}

impl SimulatedAxis {
    pub fn new(sample_time: f64) -> Result<Self, PidError> {
        if !(sample_time.is_finite() && sample_time > 0.0) {
            return Err(PidError::InvalidConfiguration(
                "sample time must be a positive finite number",
            ));
        }
        Ok(SimulatedAxis {
            sample_time,
            torque_gain: 2000.0,
            damping: 1.0,
            load: 0.0,
            position: 0.0,
            velocity: 0.0,
            torque: 0.0,
        })
    }

    /// Acceleration produced per unit of torque command.
    pub fn with_torque_gain(mut self, torque_gain: f64) -> Self {
        self.torque_gain = torque_gain;
        self
    }

    /// Viscous friction coefficient.
    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    pub fn with_velocity(mut self, velocity: f64) -> Self {
        self.velocity = velocity;
        self
    }

    /// Constant deceleration opposing the torque command.
    pub fn set_load(&mut self, load: f64) {
        self.load = load;
    }

    /// Instantly change the velocity, e.g. to model an impact.
    pub fn apply_disturbance(&mut self, delta_velocity: f64) {
        self.velocity += delta_velocity;
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    pub fn torque(&self) -> f64 {
        self.torque
    }
}

impl Axis for SimulatedAxis {
    fn read(&self, quantity: Quantity) -> f64 {
        match quantity {
            Quantity::Position => self.position,
            Quantity::Velocity => self.velocity,
            Quantity::Torque => self.torque,
        }
    }

    fn write(&mut self, quantity: Quantity, value: f64) {
        let dt = self.sample_time;
        match quantity {
            Quantity::Torque => {
                self.torque = value;
                let acceleration =
                    self.torque_gain * value - self.damping * self.velocity - self.load;
                self.velocity += acceleration * dt;
                self.position += self.velocity * dt;
            }
            Quantity::Velocity => {
                self.velocity = value;
                self.position += value * dt;
            }
            Quantity::Position => {
                self.velocity = (value - self.position) / dt;
                self.position = value;
            }
        }
    }
}
