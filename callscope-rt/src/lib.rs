//! Runtime instrumentation library for function-level CPU profiling.
//!
//! Programs compiled with `-finstrument-functions` call
//! [`__cyg_profile_func_enter`](hooks::__cyg_profile_func_enter) and
//! [`__cyg_profile_func_exit`](hooks::__cyg_profile_func_exit) around every
//! non-excluded function. This crate maintains a per-thread call stack with
//! elapsed-time bookkeeping and a process-wide function → caller → counters
//! index, then writes a textual trace when the process terminates. The
//! `callscope` analyzer turns that trace into reports.
//!
//! Configuration is taken from the environment at startup, see
//! [`config::Config`]. Profiling through `longjmp`-style nonlocal jumps or
//! `_exit` is not supported: the former skips exit hooks (fatal in strict
//! mode), the latter skips the dump entirely.
//!
//! The hooks themselves must never be instrumented. That holds as long as
//! this crate is built normally (instrumentation flags only apply to the
//! profiled program's translation units).

// Raw pointers and C ABI are inherent to this crate: records are handed out
// as stable addresses from preallocated pools and the hooks are extern "C".
#![allow(unsafe_code)]

pub mod clock;
pub mod config;
pub mod dump;
pub mod hooks;
pub mod index;
pub mod pool;
pub mod proc_info;
pub mod profiler;
pub mod spin;
pub mod thread_state;

pub use config::Config;
pub use profiler::Profiler;
