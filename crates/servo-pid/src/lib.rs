// servo-pid: A fixed-period PID controller library for servo drive loops
// Copyright (c) 2025 Security Union LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

pub mod cyclic;
pub mod gains;
pub mod registers;
pub mod setpoint;
pub mod sim;
pub mod supervisor;

#[cfg(feature = "debugging")]
mod debug;

#[cfg(feature = "debugging")]
pub use debug::{ControllerDebugData, ControllerDebugger, DebugConfig};

pub use cyclic::{Axis, ControlLoop, CycleTiming, LoopConfig, Quantity, TickReport};
pub use gains::{GainTuner, Gains, SharedGains, TunablePidController};
pub use registers::{MemoryRegisters, RegisterBank, RegisterMap, RegisterSnapshot};
pub use setpoint::{ConstantSetpoint, Deadband, SetpointSource, SharedSetpoint, SineWave};
pub use sim::SimulatedAxis;
pub use supervisor::{Supervisor, SupervisorError, SupervisorStatus};

/// Configuration for a PID controller.
///
/// Uses a builder pattern to configure the controller parameters. Nothing is
/// validated until the configuration is handed to [`PidController::new`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ControllerConfig {
    kp: f64,          // Proportional gain
    ki: f64,          // Integral gain
    kd: f64,          // Derivative gain
    output_ramp: f64, // Maximum output slew rate per second, 0 disables ramping
    limit: f64,       // Symmetric bound shared by the integral and the output
    sample_time: f64, // Fixed tick period in seconds
}

/// Error type for PID controller validation.
#[derive(Debug, Clone, PartialEq)]
pub enum PidError {
    /// Construction parameters that cannot describe a working controller
    InvalidConfiguration(&'static str),
    /// Invalid runtime parameter value (NaN, infinity, or out of allowed range)
    InvalidParameter(&'static str),
    /// A register table did not span every address of the register map
    RegisterTableTooShort { needed: usize, actual: usize },
    /// A register access fell outside the backing table
    RegisterOutOfRange { start: u16, count: usize, len: usize },
    /// Mutex was poisoned, indicating a panic in another thread
    MutexPoisoned,
}

impl std::fmt::Display for PidError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            PidError::InvalidConfiguration(reason) => {
                write!(f, "Invalid configuration: {}", reason)
            }
            PidError::InvalidParameter(param) => write!(f, "Invalid parameter: {}", param),
            PidError::RegisterTableTooShort { needed, actual } => write!(
                f,
                "Register table too short: needed {} registers, got {}",
                needed, actual
            ),
            PidError::RegisterOutOfRange { start, count, len } => write!(
                f,
                "Register access out of range: {} registers at {} in a table of {}",
                count, start, len
            ),
            PidError::MutexPoisoned => write!(f, "Mutex was poisoned"),
        }
    }
}

impl std::error::Error for PidError {}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            kp: 1.0,
            ki: 0.0,
            kd: 0.0,
            output_ramp: 0.0,
            limit: f64::INFINITY,
            sample_time: 0.001,
        }
    }
}

impl ControllerConfig {
    /// Create a new PID controller configuration with default values.
    ///
    /// The defaults describe a P-only controller with `Kp = 1`, no ramping,
    /// no saturation and a 1 ms tick.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the proportional gain (Kp).
    ///
    /// While typically positive, negative values are allowed for specialized
    /// control applications.
    pub fn with_kp(mut self, kp: f64) -> Self {
        self.kp = kp;
        self
    }

    /// Set the integral gain (Ki).
    pub fn with_ki(mut self, ki: f64) -> Self {
        self.ki = ki;
        self
    }

    /// Set the derivative gain (Kd).
    pub fn with_kd(mut self, kd: f64) -> Self {
        self.kd = kd;
        self
    }

    /// Set the maximum output slew rate, in output units per second.
    ///
    /// A value of `0.0` disables ramping.
    pub fn with_output_ramp(mut self, ramp: f64) -> Self {
        self.output_ramp = ramp;
        self
    }

    /// Set the saturation bound.
    ///
    /// The same bound clamps both the integral accumulator and the final
    /// output to `[-limit, +limit]`.
    pub fn with_limit(mut self, limit: f64) -> Self {
        self.limit = limit;
        self
    }

    /// Set the fixed sample period in seconds.
    ///
    /// This must match the rate of the cyclic task that calls
    /// [`PidController::step`], typically 0.25 ms to 1 ms.
    pub fn with_sample_time(mut self, sample_time: f64) -> Self {
        self.sample_time = sample_time;
        self
    }

    pub fn kp(&self) -> f64 {
        self.kp
    }

    pub fn ki(&self) -> f64 {
        self.ki
    }

    pub fn kd(&self) -> f64 {
        self.kd
    }

    pub fn output_ramp(&self) -> f64 {
        self.output_ramp
    }

    pub fn limit(&self) -> f64 {
        self.limit
    }

    pub fn sample_time(&self) -> f64 {
        self.sample_time
    }

    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PidError::InvalidConfiguration`] if the sample time is not a
    /// positive finite number, the limit or ramp is negative or NaN, or any
    /// gain is not finite.
    pub fn validate(&self) -> Result<(), PidError> {
        if !(self.sample_time.is_finite() && self.sample_time > 0.0) {
            return Err(PidError::InvalidConfiguration(
                "sample time must be a positive finite number",
            ));
        }
        if self.limit.is_nan() || self.limit < 0.0 {
            return Err(PidError::InvalidConfiguration(
                "limit must be zero or positive",
            ));
        }
        if self.output_ramp.is_nan() || self.output_ramp < 0.0 {
            return Err(PidError::InvalidConfiguration(
                "output ramp must be zero or positive",
            ));
        }
        if !(self.kp.is_finite() && self.ki.is_finite() && self.kd.is_finite()) {
            return Err(PidError::InvalidConfiguration(
                "gains must be finite numbers",
            ));
        }
        Ok(())
    }
}

/// Statistics about the controller's performance.
///
/// All times are measured in controller ticks converted to seconds with the
/// configured sample time, so they are reproducible and independent of the
/// wall clock.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerStatistics {
    pub ticks: u64,                // Number of evaluated steps
    pub average_error: f64,        // Average absolute error over time
    pub max_error: f64,            // Largest absolute error seen
    pub rise_time: Option<f64>,    // Time to first reach the settled band
    pub settling_time: Option<f64>, // Time since which the error stayed in the band
}

/// A fixed-period PID controller with trapezoidal integration, a shared
/// integral/output saturation bound and an optional output slew-rate limit.
///
/// Each call to [`step`](PidController::step) evaluates:
///
/// ```text
/// P = Kp * e
/// I = clamp(I_prev + Ki * Ts * (e + e_prev) / 2)
/// D = Kd * (e - e_prev) / Ts
/// u = ramp(clamp(P + I + D))
/// ```
///
/// where `clamp` saturates to `[-limit, +limit]` and `ramp` bounds the change
/// from the previous output to `output_ramp * Ts` when ramping is enabled.
///
/// The controller is meant to be owned by a single cyclic task. Use
/// [`TunablePidController`] when gains are retuned from another thread.
pub struct PidController {
    config: ControllerConfig, // Controller configuration
    error_prev: f64,          // Error of the previous step
    output_prev: f64,         // Output of the previous step
    integral_prev: f64,       // Saturated integral of the previous step

    // Statistics tracking
    ticks: u64,
    error_sum: f64,
    max_error: f64,
    rise_tick: Option<u64>,
    settle_tick: Option<u64>,
    settled_threshold: f64, // Absolute error threshold for considering "settled"

    // Debugging
    #[cfg(feature = "debugging")]
    debugger: Option<ControllerDebugger>,
}

impl std::fmt::Debug for PidController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PidController")
            .field("config", &self.config)
            .field("error_prev", &self.error_prev)
            .field("output_prev", &self.output_prev)
            .field("integral_prev", &self.integral_prev)
            .field("ticks", &self.ticks)
            .finish()
    }
}

impl PidController {
    /// Create a new PID controller with the given configuration.
    ///
    /// All running state starts at zero.
    ///
    /// # Errors
    ///
    /// Returns [`PidError::InvalidConfiguration`] when
    /// [`ControllerConfig::validate`] rejects the configuration.
    pub fn new(config: ControllerConfig) -> Result<Self, PidError> {
        config.validate()?;
        Ok(PidController {
            config,
            error_prev: 0.0,
            output_prev: 0.0,
            integral_prev: 0.0,
            ticks: 0,
            error_sum: 0.0,
            max_error: 0.0,
            rise_tick: None,
            settle_tick: None,
            settled_threshold: 0.05,
            #[cfg(feature = "debugging")]
            debugger: None,
        })
    }

    /// Evaluate one tick with the given error (target minus feedback) and
    /// return the bounded, rate-limited control output.
    ///
    /// Runs in constant time without allocating or locking.
    pub fn step(&mut self, error: f64) -> f64 {
        self.update_statistics(error);

        let limit = self.config.limit;
        let ts = self.config.sample_time;

        let p_term = self.config.kp * error;

        let integral = self.integral_prev + self.config.ki * ts * 0.5 * (error + self.error_prev);
        let integral = saturate(integral, limit);

        // Unfiltered difference; no low-pass on the derivative path
        let d_term = self.config.kd * (error - self.error_prev) / ts;

        let mut output = saturate(p_term + integral + d_term, limit);

        let ramp = self.config.output_ramp;
        if ramp > 0.0 {
            let rate = (output - self.output_prev) / ts;
            if rate > ramp {
                output = self.output_prev + ramp * ts;
            } else if rate < -ramp {
                output = self.output_prev - ramp * ts;
            }
        }

        self.integral_prev = integral;
        self.output_prev = output;
        self.error_prev = error;

        #[cfg(feature = "debugging")]
        if let Some(ref mut debugger) = self.debugger {
            debugger.log_pid_state(self.ticks, error, p_term, integral, d_term, output);
        }

        output
    }

    /// Compute the control output from a target and a measured value.
    ///
    /// Equivalent to `step(setpoint - measured)`.
    pub fn compute(&mut self, setpoint: f64, measured: f64) -> f64 {
        self.step(setpoint - measured)
    }

    /// Reset the running state and statistics. Gains are kept.
    pub fn reset(&mut self) {
        self.error_prev = 0.0;
        self.output_prev = 0.0;
        self.integral_prev = 0.0;
        self.ticks = 0;
        self.error_sum = 0.0;
        self.max_error = 0.0;
        self.rise_tick = None;
        self.settle_tick = None;
    }

    pub fn kp(&self) -> f64 {
        self.config.kp
    }

    /// Set the proportional gain (Kp) without touching the running state.
    ///
    /// # Returns
    ///
    /// Result indicating success or validation error
    ///
    /// # Notes
    ///
    /// While typically positive, negative values are allowed for specialized applications.
    pub fn set_kp(&mut self, kp: f64) -> Result<(), PidError> {
        if !kp.is_finite() {
            return Err(PidError::InvalidParameter("kp must be a finite number"));
        }
        self.config.kp = kp;
        Ok(())
    }

    pub fn ki(&self) -> f64 {
        self.config.ki
    }

    /// Set the integral gain (Ki) without touching the running state.
    ///
    /// The accumulated integral is kept as is, so a new Ki only affects the
    /// increments added from the next step on.
    pub fn set_ki(&mut self, ki: f64) -> Result<(), PidError> {
        if !ki.is_finite() {
            return Err(PidError::InvalidParameter("ki must be a finite number"));
        }
        self.config.ki = ki;
        Ok(())
    }

    pub fn kd(&self) -> f64 {
        self.config.kd
    }

    /// Set the derivative gain (Kd) without touching the running state.
    pub fn set_kd(&mut self, kd: f64) -> Result<(), PidError> {
        if !kd.is_finite() {
            return Err(PidError::InvalidParameter("kd must be a finite number"));
        }
        self.config.kd = kd;
        Ok(())
    }

    /// Current gains as a set.
    pub fn gains(&self) -> Gains {
        Gains {
            kp: self.config.kp,
            ki: self.config.ki,
            kd: self.config.kd,
        }
    }

    // Gains coming from `SharedGains` were validated when they were stored.
    pub(crate) fn apply_gains(&mut self, gains: Gains) {
        self.config.kp = gains.kp;
        self.config.ki = gains.ki;
        self.config.kd = gains.kd;
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn limit(&self) -> f64 {
        self.config.limit
    }

    pub fn output_ramp(&self) -> f64 {
        self.config.output_ramp
    }

    pub fn sample_time(&self) -> f64 {
        self.config.sample_time
    }

    /// Saturated integral committed by the last step.
    pub fn integral(&self) -> f64 {
        self.integral_prev
    }

    pub fn previous_error(&self) -> f64 {
        self.error_prev
    }

    pub fn previous_output(&self) -> f64 {
        self.output_prev
    }

    /// Get the controller statistics.
    pub fn get_statistics(&self) -> ControllerStatistics {
        let ts = self.config.sample_time;
        let avg_error = if self.ticks > 0 {
            self.error_sum / self.ticks as f64
        } else {
            0.0
        };

        ControllerStatistics {
            ticks: self.ticks,
            average_error: avg_error,
            max_error: self.max_error,
            rise_time: self.rise_tick.map(|tick| tick as f64 * ts),
            settling_time: self.settle_tick.map(|tick| tick as f64 * ts),
        }
    }

    /// Set the absolute error threshold for considering the loop "settled".
    pub fn set_settled_threshold(&mut self, threshold: f64) -> Result<(), PidError> {
        if !threshold.is_finite() {
            return Err(PidError::InvalidParameter(
                "settled threshold must be a finite number",
            ));
        }
        self.settled_threshold = threshold.abs();
        Ok(())
    }

    fn update_statistics(&mut self, error: f64) {
        self.ticks += 1;
        let magnitude = error.abs();
        if !magnitude.is_finite() {
            return;
        }

        self.error_sum += magnitude;
        if magnitude > self.max_error {
            self.max_error = magnitude;
        }

        let inside = magnitude <= self.settled_threshold;
        if inside && self.rise_tick.is_none() {
            self.rise_tick = Some(self.ticks);
        }

        // Leaving the band after settling restarts the settle clock
        if inside && self.settle_tick.is_none() {
            self.settle_tick = Some(self.ticks);
        } else if !inside {
            self.settle_tick = None;
        }
    }

    /// Attach a debugger that streams every sampled step to iggy.
    #[cfg(feature = "debugging")]
    pub fn with_debugging(mut self, debug_config: DebugConfig) -> Self {
        self.debugger = Some(ControllerDebugger::new(
            debug_config,
            self.config.sample_time,
        ));
        self
    }
}

/// Symmetric saturating clamp, `max(-limit, min(limit, value))`.
///
/// Uses IEEE `min`/`max`, so a NaN value saturates to `+limit` instead of
/// propagating into the running state.
#[inline]
fn saturate(value: f64, limit: f64) -> f64 {
    value.min(limit).max(-limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(kp: f64, ki: f64, kd: f64, ramp: f64, limit: f64, ts: f64) -> PidController {
        let config = ControllerConfig::new()
            .with_kp(kp)
            .with_ki(ki)
            .with_kd(kd)
            .with_output_ramp(ramp)
            .with_limit(limit)
            .with_sample_time(ts);
        PidController::new(config).expect("valid configuration")
    }

    #[test]
    fn test_proportional_only_has_no_memory() {
        let mut pid = controller(0.1, 0.0, 0.0, 0.0, 100.0, 0.001);

        assert_eq!(pid.step(50.0), 5.0);
        assert_eq!(pid.step(50.0), 5.0);
        assert_eq!(pid.integral(), 0.0);
        assert_eq!(pid.previous_error(), 50.0);
        assert_eq!(pid.previous_output(), 5.0);
    }

    #[test]
    fn test_zero_error_keeps_output_at_zero() {
        let mut pid = controller(3.0, 2.0, 0.5, 0.0, 10.0, 0.001);

        for _ in 0..1000 {
            assert_eq!(pid.step(0.0), 0.0);
        }
        assert_eq!(pid.integral(), 0.0);
    }

    #[test]
    fn test_zero_error_after_history_settles_without_integral() {
        let mut pid = controller(2.0, 0.0, 0.01, 0.0, 100.0, 0.001);

        for e in [3.0, -1.0, 4.0, 2.5] {
            pid.step(e);
        }

        // First zero tick still carries the derivative of the drop to zero
        let kick = pid.step(0.0);
        assert!(kick != 0.0);

        for _ in 0..100 {
            assert_eq!(pid.step(0.0), 0.0);
        }
    }

    #[test]
    fn test_constant_error_reaches_proportional_steady_state() {
        let mut pid = controller(1.5, 0.0, 0.02, 0.0, 1000.0, 0.001);
        let e = 4.0;

        // First tick includes the derivative kick from e_prev = 0
        let first = pid.step(e);
        assert_eq!(first, 1.5 * e + 0.02 * e / 0.001);

        for _ in 0..10 {
            assert_eq!(pid.step(e), 1.5 * e);
        }
    }

    #[test]
    fn test_trapezoidal_integral_matches_closed_form() {
        let mut pid = controller(0.0, 1.0, 0.0, 0.0, 100.0, 0.001);

        let mut output = 0.0;
        for e in [1.0, 1.0, 1.0] {
            output = pid.step(e);
        }

        // 0.001 * (0.5 * (1 + 0) + 0.5 * (1 + 1) + 0.5 * (1 + 1))
        let expected = 0.001 * (0.5 * (1.0 + 0.0) + 0.5 * (1.0 + 1.0) + 0.5 * (1.0 + 1.0));
        assert!((pid.integral() - expected).abs() < 1e-15);
        assert!((output - expected).abs() < 1e-15);
        assert!((expected - 0.0025).abs() < 1e-15);
    }

    #[test]
    fn test_integral_for_varying_errors() {
        let ts = 0.0005;
        let ki = 4.0;
        let mut pid = controller(0.0, ki, 0.0, 0.0, 100.0, ts);

        let errors = [2.0, -1.0, 0.5, 3.0, 3.0, -2.0];
        let mut expected = 0.0;
        let mut prev = 0.0;
        for e in errors {
            pid.step(e);
            expected += ki * ts * 0.5 * (e + prev);
            prev = e;
        }

        assert!((pid.integral() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_output_and_integral_never_exceed_limit() {
        let limit = 2.5;
        let mut pid = controller(10.0, 50.0, 0.1, 0.0, limit, 0.001);

        let errors = [1e9, 1e9, -1e9, 0.0, 1e9, -3.0, f64::MAX, -f64::MAX, 7.0];
        for e in errors.iter().cycle().take(200) {
            let output = pid.step(*e);
            assert!(output.abs() <= limit, "output {} exceeded limit", output);
            assert!(
                pid.integral().abs() <= limit,
                "integral {} exceeded limit",
                pid.integral()
            );
        }
    }

    #[test]
    fn test_nan_error_saturates_instead_of_propagating() {
        let limit = 1.0;
        let mut pid = controller(1.0, 1.0, 0.0, 0.0, limit, 0.001);

        let output = pid.step(f64::NAN);
        assert!(output.abs() <= limit);
        assert!(pid.integral().abs() <= limit);

        let output = pid.step(0.5);
        assert!(!output.is_nan());
        assert!(output.abs() <= limit);
    }

    #[test]
    fn test_integral_and_output_share_limit() {
        let limit = 1.0;
        let mut pid = controller(0.0, 1000.0, 0.0, 0.0, limit, 0.001);

        for _ in 0..100 {
            pid.step(10.0);
        }
        assert_eq!(pid.integral(), limit);
        assert_eq!(pid.previous_output(), limit);

        // Integral headroom is spent; proportional action cannot add on top
        pid.set_kp(5.0).unwrap();
        assert_eq!(pid.step(10.0), limit);
    }

    #[test]
    fn test_output_ramp_bounds_slew_per_tick() {
        let ramp = 1000.0;
        let ts = 0.001;
        let mut pid = controller(10.0, 0.0, 0.0, ramp, 100.0, ts);

        let mut previous = 0.0;
        for i in 0..150 {
            let output = pid.step(50.0);
            assert!(
                (output - previous).abs() <= ramp * ts + 1e-9,
                "tick {}: slew {} exceeds {}",
                i,
                output - previous,
                ramp * ts
            );
            previous = output;
        }

        // Ramp only limits the rate; the saturated target is eventually reached
        assert!((previous - 100.0).abs() < 1e-9);

        // And on the way down
        for _ in 0..10 {
            let output = pid.step(-50.0);
            assert!((output - previous).abs() <= ramp * ts + 1e-9);
            assert!(output < previous);
            previous = output;
        }
    }

    #[test]
    fn test_ramp_does_not_touch_small_changes() {
        let mut pid = controller(0.001, 0.0, 0.0, 1000.0, 100.0, 0.001);

        // 0.5 per tick is within the 1.0 per tick budget
        assert_eq!(pid.step(500.0), 0.5);
        assert_eq!(pid.step(1000.0), 1.0);
    }

    #[test]
    fn test_gain_round_trip_keeps_state() {
        let mut pid = controller(1.0, 2.0, 0.3, 0.0, 50.0, 0.001);
        pid.step(3.0);
        pid.step(4.0);

        let error_prev = pid.previous_error();
        let output_prev = pid.previous_output();
        let integral_prev = pid.integral();

        pid.set_kp(0.123456789).unwrap();
        pid.set_ki(9.87654321).unwrap();
        pid.set_kd(0.5).unwrap();

        assert_eq!(pid.kp(), 0.123456789);
        assert_eq!(pid.ki(), 9.87654321);
        assert_eq!(pid.kd(), 0.5);

        assert_eq!(pid.previous_error(), error_prev);
        assert_eq!(pid.previous_output(), output_prev);
        assert_eq!(pid.integral(), integral_prev);
    }

    #[test]
    fn test_parameter_validation() {
        let mut pid = controller(1.0, 0.0, 0.0, 0.0, 1.0, 0.001);

        assert!(pid.set_kp(-1.0).is_ok()); // Negative values allowed
        assert!(pid.set_kp(f64::NAN).is_err());
        assert!(pid.set_kp(f64::INFINITY).is_err());

        assert!(pid.set_ki(-0.5).is_ok());
        assert!(pid.set_ki(f64::NAN).is_err());
        assert!(pid.set_ki(f64::NEG_INFINITY).is_err());

        assert!(pid.set_kd(0.1).is_ok());
        assert!(pid.set_kd(f64::NAN).is_err());

        // Rejected values leave the previous gain in place
        assert_eq!(pid.kp(), -1.0);
        assert_eq!(pid.ki(), -0.5);
        assert_eq!(pid.kd(), 0.1);
    }

    #[test]
    fn test_construction_validation() {
        let invalid = [
            ControllerConfig::new().with_sample_time(0.0),
            ControllerConfig::new().with_sample_time(-0.001),
            ControllerConfig::new().with_sample_time(f64::NAN),
            ControllerConfig::new().with_sample_time(f64::INFINITY),
            ControllerConfig::new().with_limit(-1.0),
            ControllerConfig::new().with_limit(f64::NAN),
            ControllerConfig::new().with_output_ramp(-10.0),
            ControllerConfig::new().with_kp(f64::NAN),
            ControllerConfig::new().with_kd(f64::INFINITY),
        ];

        for config in invalid {
            match PidController::new(config.clone()) {
                Err(PidError::InvalidConfiguration(_)) => {}
                other => panic!("expected InvalidConfiguration for {:?}, got {:?}", config, other),
            }
        }

        // Zero limit and unbounded limit are both usable
        assert!(PidController::new(ControllerConfig::new().with_limit(0.0)).is_ok());
        assert!(PidController::new(ControllerConfig::new().with_limit(f64::INFINITY)).is_ok());
    }

    #[test]
    fn test_zero_limit_pins_output() {
        let mut pid = controller(5.0, 5.0, 5.0, 0.0, 0.0, 0.001);
        for e in [1.0, -100.0, 42.0] {
            assert_eq!(pid.step(e), 0.0);
        }
    }

    #[test]
    fn test_compute_uses_setpoint_minus_measured() {
        let mut pid = controller(-2.0, 0.0, 0.0, 0.0, 100.0, 0.001);

        // error = 0 - (-5) = 5, Kp = -2
        assert_eq!(pid.compute(0.0, -5.0), -10.0);
        assert_eq!(pid.compute(0.0, 5.0), 10.0);
    }

    #[test]
    fn test_reset_clears_state_but_keeps_gains() {
        let mut pid = controller(1.0, 10.0, 0.0, 0.0, 100.0, 0.001);
        for _ in 0..10 {
            pid.step(1.0);
        }
        assert!(pid.integral() > 0.0);

        pid.reset();

        assert_eq!(pid.integral(), 0.0);
        assert_eq!(pid.previous_error(), 0.0);
        assert_eq!(pid.previous_output(), 0.0);
        assert_eq!(pid.ki(), 10.0);
        assert_eq!(pid.get_statistics().ticks, 0);
    }

    #[test]
    fn test_statistics_are_tick_based() {
        let mut pid = controller(1.0, 0.0, 0.0, 0.0, 100.0, 0.01);
        pid.set_settled_threshold(0.1).unwrap();

        for e in [1.0, 0.5, 0.05, 0.2, 0.01, 0.0] {
            pid.step(e);
        }

        let stats = pid.get_statistics();
        assert_eq!(stats.ticks, 6);
        assert_eq!(stats.max_error, 1.0);
        assert!((stats.average_error - 1.76 / 6.0).abs() < 1e-12);
        // First entered the band on tick 3, left on tick 4, re-entered on tick 5
        assert!((stats.rise_time.unwrap() - 0.03).abs() < 1e-12);
        assert!((stats.settling_time.unwrap() - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_statistics_without_settling() {
        let mut pid = controller(1.0, 0.0, 0.0, 0.0, 100.0, 0.001);
        pid.step(10.0);

        let stats = pid.get_statistics();
        assert_eq!(stats.rise_time, None);
        assert_eq!(stats.settling_time, None);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_config_from_json() {
        let json = r#"{ "kp": 0.08, "ki": 1.0, "output_ramp": 1000.0, "limit": 1.0, "sample_time": 0.001 }"#;
        let config: ControllerConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.kp(), 0.08);
        assert_eq!(config.kd(), 0.0); // Missing fields fall back to defaults
        assert!(PidController::new(config).is_ok());
    }
}
