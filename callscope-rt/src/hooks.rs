//! C-ABI entry points and process lifecycle wiring.
//!
//! The two `__cyg_profile_func_*` symbols are what
//! `-finstrument-functions` emits calls to. They are safe on any thread and
//! tolerate running before the host program's thread setup: thread state is
//! created lazily on the first hook of each thread, and torn down either by
//! the exit hook (top-level return) or by the thread-local destructor.
//!
//! A `.init_array` constructor builds the process-wide [`Profiler`] before
//! user code runs and registers the dump with `atexit`. `_exit` and
//! `longjmp` bypass these, which is documented as unsupported.

use std::ffi::c_void;
use std::sync::OnceLock;

use crate::config::Config;
use crate::profiler::Profiler;
use crate::thread_state::ThreadSlot;

static PROFILER: OnceLock<Profiler> = OnceLock::new();

fn profiler() -> &'static Profiler {
    PROFILER.get_or_init(|| Profiler::new(Config::from_env()))
}

/// Thread-local slot whose destructor runs the per-thread cleanup, the
/// equivalent of a pthread key destructor.
struct SlotGuard {
    slot: ThreadSlot,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(profiler) = PROFILER.get() {
            profiler.thread_cleanup(&self.slot);
        }
    }
}

thread_local! {
    static CURRENT: SlotGuard = const { SlotGuard { slot: ThreadSlot::new() } };
}

/// Entry hook, called at every instrumented function prologue.
#[no_mangle]
pub extern "C" fn __cyg_profile_func_enter(func: *mut c_void, call_site: *mut c_void) {
    let profiler = profiler();
    // try_with: hooks firing after thread-local teardown drop the event.
    let _ = CURRENT.try_with(|guard| {
        profiler.enter(&guard.slot, func as usize, call_site as usize);
    });
}

/// Exit hook, called at every instrumented function epilogue.
#[no_mangle]
pub extern "C" fn __cyg_profile_func_exit(func: *mut c_void, call_site: *mut c_void) {
    let profiler = profiler();
    let _ = CURRENT.try_with(|guard| {
        profiler.exit(&guard.slot, func as usize, call_site as usize);
    });
}

extern "C" fn dump_at_exit() {
    if let Some(profiler) = PROFILER.get() {
        profiler.run_at_exit();
    }
}

extern "C" fn profile_init() {
    let _ = profiler();
    // SAFETY: registering an exit handler has no preconditions.
    unsafe {
        libc::atexit(dump_at_exit);
    }
}

#[used]
#[link_section = ".init_array"]
static PROFILE_INIT: extern "C" fn() = profile_init;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hooks_tolerate_unbalanced_calls() {
        // An exit with no matching enter must not crash or corrupt state.
        __cyg_profile_func_exit(0x1234 as *mut c_void, 0x5678 as *mut c_void);
    }

    #[test]
    fn test_hook_round_trip_records_a_call() {
        use std::sync::atomic::Ordering;

        let func = 0xabc0 as *mut c_void;
        let site = 0xdef0 as *mut c_void;
        __cyg_profile_func_enter(func, site);
        __cyg_profile_func_exit(func, site);

        let f = profiler().index().lookup_func(0xabc0).unwrap();
        assert!(f.calls.load(Ordering::Relaxed) >= 1);
    }
}
