#![allow(dead_code)]

use kernel::{Kernel, ProcessId, ProcessState};
use kernel_sim::{SimConfig, SimMachine};
use log::LevelFilter;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub type TestKernel = &'static Kernel<SimMachine>;

pub fn boot() -> (Arc<SimMachine>, TestKernel) {
    boot_with(SimConfig::default())
}

pub fn boot_with(config: SimConfig) -> (Arc<SimMachine>, TestKernel) {
    kernel_sim::init_test_logging(LevelFilter::Debug);
    let machine = SimMachine::with_config(config);
    let kernel = Kernel::new(Arc::clone(&machine));
    (machine, kernel)
}

/// Spawns `name` from the test thread and waits for its exit code.
pub fn run(kernel: TestKernel, name: &str) -> i32 {
    let pid = kernel.spawn(name).unwrap();
    kernel.join(pid.as_i32()).unwrap()
}

pub fn state(kernel: TestKernel, pid: ProcessId) -> ProcessState {
    kernel.processes().snapshot(kernel.machine(), pid).state
}

pub fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

/// A flag user programs can block on.
#[derive(Clone, Default)]
pub struct Gate(Arc<AtomicBool>);

impl Gate {
    pub fn open(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn wait(&self) {
        wait_until("gate", || self.0.load(Ordering::Acquire));
    }
}
