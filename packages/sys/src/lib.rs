//! # p2shim-sys
//!
//! The small, synchronous parts of the guest's system interface.
//!
//! ## Surface
//!
//! ```text
//! streams/   stdin, stdout, stderr and the handlers behind them
//! time/      monotonic and wall clocks
//! random/    secure random bytes
//! env/       arguments, environment variables, working directory
//! proc/      exit
//! ```
//!
//! Nothing here suspends, with one exception: timer and stream pollables are
//! created through a [`Bridge`](p2shim_bridge::Bridge), and blocking on them
//! waits for the delegate.

pub mod env;
pub mod proc;
pub mod random;
pub mod streams;
pub mod time;

pub use env::Environment;
pub use proc::{exit, exit_with_code, GuestExit};
pub use random::{RandomError, RandomSource};
pub use streams::{
    CaptureSink, ConsoleSink, EmptyInput, InputHandler, InputStream, LogOutput, LogSink,
    OutputChannel, OutputHandler, OutputStream, Stdio, TracingSink,
};
pub use time::{MonotonicClock, WallClock};
