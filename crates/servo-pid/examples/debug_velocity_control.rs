use servo_pid::{ControllerConfig, PidController, SimulatedAxis};
use servo_pid::{Axis, Quantity};

#[cfg(feature = "debugging")]
use servo_pid::DebugConfig;

/// This example runs the velocity loop with debugging enabled so every
/// sampled step is streamed to an iggy server (or a local JSON-lines file
/// if iggy is unreachable).
///
/// Run with `--features debugging`.
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("Velocity Loop Simulation with Debugging");
    println!("=======================================");

    let config = ControllerConfig::new()
        .with_kp(0.08)
        .with_ki(1.0)
        .with_output_ramp(1000.0)
        .with_limit(1.0)
        .with_sample_time(SAMPLE_TIME);

    let controller = PidController::new(config).expect("valid controller configuration");

    #[cfg(feature = "debugging")]
    let mut controller = {
        let debug_config = DebugConfig {
            iggy_url: "127.0.0.1:8090".to_string(),
            stream_name: "servo_pid_debug".to_string(),
            topic_name: "controller_data".to_string(),
            controller_id: "velocity_loop".to_string(),
            sample_rate_hz: Some(50.0), // Every 20th tick of the 1 kHz loop
            queue_capacity: 1024,
        };

        println!("Creating controller with debugging");
        controller.with_debugging(debug_config)
    };

    #[cfg(not(feature = "debugging"))]
    let mut controller = {
        println!("Built without the `debugging` feature; nothing will be streamed");
        controller
    };

    let mut axis = SimulatedAxis::new(SAMPLE_TIME).expect("valid sample time");

    for tick in 0..TICKS {
        // Step the target every second
        let target = if (tick / 1000) % 2 == 0 { 100.0 } else { -100.0 };

        let velocity = axis.read(Quantity::Velocity);
        let current = controller.compute(target, velocity);
        axis.write(Quantity::Torque, current);

        if tick % 250 == 0 {
            println!(
                "Tick {:5}: target {:7.1} rpm, velocity {:8.3} rpm, current {:+.4}",
                tick, target, velocity, current
            );
        }

        // Pace the simulation at roughly real time so the stream is readable
        std::thread::sleep(std::time::Duration::from_micros(1000));
    }

    let stats = controller.get_statistics();
    println!("\nAverage error: {:.3} rpm", stats.average_error);
    println!("Max error: {:.3} rpm", stats.max_error);
}

const SAMPLE_TIME: f64 = 0.001;
const TICKS: u64 = 5000;
