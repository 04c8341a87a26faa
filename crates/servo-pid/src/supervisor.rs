// servo-pid: A fixed-period PID controller library for servo drive loops
// Copyright (c) 2025 Security Union LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Slow supervisory loop bridging a holding-register table to a running
//! controller.
//!
//! Each poll reads the table, forwards the target to the shared setpoint,
//! retunes Kp/Ki when the host changed them and reports whether the host
//! asked to terminate.
//!
//! A gain register counts as changed only when its raw value differs from
//! the live gain encoded with the same scale. Gains that do not fit a
//! register (too large, or finer than the scale) are therefore never
//! replaced by their rounded register image.

use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::gains::GainTuner;
use crate::registers::{RegisterBank, RegisterMap, RegisterSnapshot};
use crate::setpoint::SharedSetpoint;
use crate::PidError;

/// Result of one supervisory poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorStatus {
    Running,
    Terminate,
}

/// Error type for the supervisory loop.
#[derive(Debug)]
pub enum SupervisorError<E> {
    /// The register bank failed to read or write
    Bank(E),
    /// The register contents could not be applied
    Invalid(PidError),
}

impl<E: std::fmt::Display> std::fmt::Display for SupervisorError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SupervisorError::Bank(e) => write!(f, "Register bank error: {}", e),
            SupervisorError::Invalid(e) => write!(f, "Invalid register contents: {}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for SupervisorError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SupervisorError::Bank(e) => Some(e),
            SupervisorError::Invalid(e) => Some(e),
        }
    }
}

impl<E> From<PidError> for SupervisorError<E> {
    fn from(e: PidError) -> Self {
        SupervisorError::Invalid(e)
    }
}

/// Polls a [`RegisterBank`] and applies what the host wrote.
pub struct Supervisor<B> {
    bank: B,
    map: RegisterMap,
    tuner: GainTuner,
    setpoint: SharedSetpoint,
    table: Vec<i16>,
    polls: u64,
    retunes: u64,
}

impl<B: RegisterBank> Supervisor<B> {
    pub fn new(
        bank: B,
        map: RegisterMap,
        tuner: GainTuner,
        setpoint: SharedSetpoint,
    ) -> Result<Self, PidError> {
        map.validate()?;
        Ok(Supervisor {
            table: vec![0; map.span()],
            bank,
            map,
            tuner,
            setpoint,
            polls: 0,
            retunes: 0,
        })
    }

    /// Write the live Kp/Ki into their registers.
    ///
    /// Call this before the first poll so the host starts from the gains the
    /// controller is actually using rather than from zeroed registers.
    pub fn publish_gains(&mut self) -> Result<(), SupervisorError<B::Error>> {
        let gains = self.tuner.gains();
        let kp = self.map.encode_kp(gains.kp);
        let ki = self.map.encode_ki(gains.ki);

        self.bank
            .write_holding(self.map.kp, &[kp])
            .map_err(SupervisorError::Bank)?;
        self.bank
            .write_holding(self.map.ki, &[ki])
            .map_err(SupervisorError::Bank)?;

        debug!("published gains kp={} ki={} (raw {}, {})", gains.kp, gains.ki, kp, ki);
        Ok(())
    }

    /// Read the register table once and apply it.
    pub fn poll(&mut self) -> Result<SupervisorStatus, SupervisorError<B::Error>> {
        self.bank
            .read_holding(0, &mut self.table)
            .map_err(SupervisorError::Bank)?;
        let snapshot = self.map.decode(&self.table)?;
        self.polls += 1;

        self.setpoint.set(snapshot.target)?;
        self.apply_gains(&snapshot)?;

        if snapshot.terminate {
            info!("terminate requested after {} polls", self.polls);
            return Ok(SupervisorStatus::Terminate);
        }
        Ok(SupervisorStatus::Running)
    }

    fn apply_gains(&mut self, snapshot: &RegisterSnapshot) -> Result<(), PidError> {
        let live = self.tuner.gains();
        let kp_changed = snapshot.kp_raw != self.map.encode_kp(live.kp);
        let ki_changed = snapshot.ki_raw != self.map.encode_ki(live.ki);
        if !(kp_changed || ki_changed) {
            return Ok(());
        }

        if kp_changed {
            self.tuner.set_kp(snapshot.kp)?;
        }
        if ki_changed {
            self.tuner.set_ki(snapshot.ki)?;
        }
        self.retunes += 1;

        let gains = self.tuner.gains();
        info!(
            "retuned kp {} -> {}, ki {} -> {}",
            live.kp, gains.kp, live.ki, gains.ki
        );
        Ok(())
    }

    /// Publish the live gains, then poll every `period` until the host
    /// requests termination.
    pub fn run(&mut self, period: Duration) -> Result<(), SupervisorError<B::Error>> {
        self.publish_gains()?;
        loop {
            if self.poll()? == SupervisorStatus::Terminate {
                return Ok(());
            }
            thread::sleep(period);
        }
    }

    pub fn polls(&self) -> u64 {
        self.polls
    }

    pub fn retunes(&self) -> u64 {
        self.retunes
    }

    pub fn map(&self) -> &RegisterMap {
        &self.map
    }

    pub fn into_bank(self) -> B {
        self.bank
    }
}
