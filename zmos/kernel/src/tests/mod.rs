use crate::Kernel;

mod timer;

/// Fresh kernel with the callback task registered
fn kernel() -> Kernel {
    let kernel = Kernel::new();
    kernel.init();
    kernel
}

/// Dispatch until no task is ready; returns the number of dispatches.
fn run_until_idle(kernel: &Kernel) -> usize {
    let mut passes = 0;
    while kernel.schedule_once() {
        passes += 1;
    }
    passes
}
