pub mod process;

pub use process::{exit, fork, Pid, ProcessState};
