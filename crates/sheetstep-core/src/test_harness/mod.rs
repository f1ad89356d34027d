//! Test harness
//!
//! An in-process kernel for tests and the `sheetstep` binary, reachable
//! either directly as a [`MessageChannel`](crate::channel::MessageChannel)
//! or through the wire protocol via [`spawn_loopback`].

pub mod loopback;
pub mod simulator;

pub use loopback::spawn_loopback;
pub use simulator::{SimulatedKernel, SimulatorStats};
