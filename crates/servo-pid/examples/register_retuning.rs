use servo_pid::{
    ControlLoop, ControllerConfig, LoopConfig, MemoryRegisters, RegisterMap, SharedSetpoint,
    SimulatedAxis, Supervisor, TunablePidController,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// This example runs the same three parties a drive controller has:
///
/// - A cyclic thread closing the velocity loop every millisecond
/// - A supervisory thread polling a holding-register table every 500 ms
/// - A host (here simulated) writing the target and gains into the registers
///
/// Register layout: 0 = terminate, 1 = target rpm, 2 = Kp x 1000, 3 = Ki x 1000.
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let controller = TunablePidController::new(
        ControllerConfig::new()
            .with_kp(0.08)
            .with_ki(1.0)
            .with_output_ramp(1000.0)
            .with_limit(1.0)
            .with_sample_time(SAMPLE_TIME),
    )
    .expect("valid controller configuration");
    let axis = SimulatedAxis::new(SAMPLE_TIME).expect("valid sample time");

    let registers = MemoryRegisters::new(4);
    let setpoint = SharedSetpoint::new(0.0);
    let mut control = ControlLoop::new(axis, setpoint.clone(), controller, LoopConfig::default());

    let mut supervisor = Supervisor::new(
        registers.clone(),
        RegisterMap::default(),
        control.tuner(),
        setpoint,
    )
    .expect("valid register map");

    let stop = Arc::new(AtomicBool::new(false));

    // Cyclic task
    let loop_stop = Arc::clone(&stop);
    let control_thread = thread::spawn(move || {
        control.run_until(&loop_stop);
        control
    });

    // Supervisory poll
    let supervisor_thread = thread::spawn(move || {
        if let Err(e) = supervisor.run(Duration::from_millis(500)) {
            eprintln!("Supervisor stopped: {}", e);
        }
        supervisor.retunes()
    });

    // Host
    let host = registers;
    let script: [(u64, u16, i16, &str); 5] = [
        (500, 1, 100, "target 100 rpm"),
        (2500, 1, 300, "target 300 rpm"),
        (4500, 2, 150, "Kp 0.150"),
        (5000, 1, -150, "target -150 rpm"),
        (7500, 0, 1, "terminate"),
    ];

    let mut elapsed_ms = 0;
    for (at_ms, address, value, what) in script {
        thread::sleep(Duration::from_millis(at_ms - elapsed_ms));
        elapsed_ms = at_ms;
        println!("HOST      | t={:5} ms | {}", at_ms, what);
        if let Err(e) = host.set(address, value) {
            eprintln!("Host write failed: {}", e);
        }
    }

    let retunes = supervisor_thread.join().expect("supervisor thread panicked");
    stop.store(true, Ordering::Release);
    let control = control_thread.join().expect("control thread panicked");

    println!("\nSimulation complete");
    println!("Retunes applied: {}", retunes);
    println!("Final velocity: {:.2} rpm", control.axis().velocity());
    println!("Final gains: Kp={} Ki={}", control.controller().kp(), control.controller().ki());
    println!("Ticks run: {}", control.ticks());
    println!("Worst tick: {:?}", control.timing().max);
}

const SAMPLE_TIME: f64 = 0.001;
