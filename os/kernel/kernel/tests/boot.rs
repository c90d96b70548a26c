//! Kept in its own binary: `boot` installs the process-wide logger.

use kernel_sim::{Image, SimMachine};
use log::LevelFilter;
use std::sync::Arc;

#[test]
fn boot_logs_to_the_machine_console() {
    let machine = SimMachine::new();
    machine.install("hello", Image::new(|p| p.print("hello from user mode\n")));

    let kernel = kernel::init::boot(Arc::clone(&machine), LevelFilter::Info);
    let pid = kernel.spawn("hello").unwrap();
    assert_eq!(kernel.join(pid.as_i32()), Ok(21));

    let output = machine.console().output();
    assert!(output.contains("[INFO] kernel: kernel up: 32 process slots, 16 TLB entries\n"), "{output}");
    assert!(output.contains("hello from user mode\n"), "{output}");
    assert!(output.contains("] kernel::process::lifecycle: spawned process 0 (hello)"), "{output}");
    assert!(!output.contains("[DEBUG]"), "{output}");
}
