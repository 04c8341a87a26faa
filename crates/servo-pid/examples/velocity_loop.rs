use servo_pid::{
    ControlLoop, ControllerConfig, LoopConfig, SharedSetpoint, SimulatedAxis, TunablePidController,
};

/// This example closes a velocity loop around a simulated servo axis by
/// commanding torque, the way a drive's cyclic task would at 1 kHz.
///
/// Halfway through, a load is applied to the shaft and the integral term
/// takes over the holding torque.
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("Velocity Loop Simulation");
    println!("========================");
    println!("Target velocity: {:.1} rpm", TARGET_VELOCITY);
    println!("Sample time: {:.1} ms", SAMPLE_TIME * 1000.0);
    println!();

    let config = ControllerConfig::new()
        .with_kp(0.08) // Proportional gain
        .with_ki(1.0) // Integral gain
        .with_kd(0.0) // No derivative on a velocity loop
        .with_output_ramp(1000.0) // Current slew limit per second
        .with_limit(1.0) // Normalized current limit
        .with_sample_time(SAMPLE_TIME);

    let controller = match TunablePidController::new(config) {
        Ok(controller) => controller,
        Err(e) => {
            eprintln!("Invalid controller configuration: {}", e);
            return;
        }
    };

    let axis = match SimulatedAxis::new(SAMPLE_TIME) {
        Ok(axis) => axis,
        Err(e) => {
            eprintln!("Invalid axis configuration: {}", e);
            return;
        }
    };

    let setpoint = SharedSetpoint::new(TARGET_VELOCITY);
    let mut control = ControlLoop::new(axis, setpoint, controller, LoopConfig::default());

    println!("Tick  | Velocity(rpm) | Error(rpm) | Current");
    println!("------|---------------|------------|--------");

    for tick in 0..TICKS {
        if tick == TICKS / 2 {
            println!(">>> Load applied to the shaft");
            control.axis_mut().set_load(LOAD);
        }

        let report = control.tick();

        if tick % 100 == 0 {
            println!(
                "{:5} | {:13.3} | {:10.3} | {:7.4}",
                report.tick, report.feedback, report.error, report.command
            );
        }
    }

    let stats = control.controller().get_statistics();
    let timing = control.timing();

    println!("\nController Performance Statistics:");
    println!("----------------------------------");
    println!("Average error: {:.3} rpm", stats.average_error);
    println!("Max error: {:.3} rpm", stats.max_error);
    match stats.rise_time {
        Some(t) => println!("Rise time: {:.3} s", t),
        None => println!("Rise time: never reached the target"),
    }
    println!(
        "Integral (holding current): {:.4}",
        control.controller().controller().integral()
    );
    println!(
        "Tick execution: mean {:?}, max {:?}",
        timing.mean(),
        timing.max
    );
}

const TARGET_VELOCITY: f64 = 100.0;
const SAMPLE_TIME: f64 = 0.001; // 1 kHz cyclic task
const TICKS: u64 = 4000;
const LOAD: f64 = 50.0;
