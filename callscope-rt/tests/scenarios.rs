//! End-to-end engine scenarios: drive the profiler through thread slots,
//! dump, and check the parsed output.

use callscope_common::{Line, RunInfo, ThreadLine, TraceLine};
use callscope_rt::config::Config;
use callscope_rt::dump::write_dump;
use callscope_rt::profiler::Profiler;
use callscope_rt::thread_state::ThreadSlot;

const MAIN: usize = 0x9000;
const F: usize = 0x1000;
const G: usize = 0x2000;
const H: usize = 0x3000;

fn profiler() -> Profiler {
    Profiler::new(Config { func_pool: 32, caller_pool: 32, stack_size: 16, ..Config::default() })
}

struct Dump {
    info: RunInfo,
    traces: Vec<TraceLine>,
    threads: Vec<ThreadLine>,
    errors: Vec<String>,
}

fn parse_dump(text: &str) -> Dump {
    let mut parsed = Dump {
        info: RunInfo::default(),
        traces: Vec::new(),
        threads: Vec::new(),
        errors: Vec::new(),
    };
    for line in text.lines() {
        match Line::parse(line) {
            Some(Line::Info { key, value }) => {
                assert!(parsed.info.apply(&key, value), "unknown INFO key {key}");
            }
            Some(Line::Trace(t)) => parsed.traces.push(t),
            Some(Line::Thread(t)) => parsed.threads.push(t),
            Some(Line::Error(e)) => parsed.errors.push(e),
            Some(Line::Cmd(_) | Line::Map(_)) | None => {}
        }
    }
    parsed
}

fn dump_text(p: &Profiler) -> String {
    let stats = p.collect_final();
    let mut buf = Vec::new();
    write_dump(p, stats.as_ref(), &mut buf).unwrap();
    String::from_utf8(buf).unwrap()
}

fn dump(p: &Profiler) -> Dump {
    parse_dump(&dump_text(p))
}

fn trace<'a>(d: &'a Dump, func: usize, caller: usize) -> &'a TraceLine {
    d.traces
        .iter()
        .find(|t| t.func == func as u64 && t.caller == caller as u64)
        .unwrap_or_else(|| panic!("no TRACE for 0x{func:x} <- 0x{caller:x}"))
}

fn thread<'a>(d: &'a Dump, func: usize) -> &'a ThreadLine {
    d.threads
        .iter()
        .find(|t| t.func == func as u64)
        .unwrap_or_else(|| panic!("no THREAD for 0x{func:x}"))
}

#[test]
fn test_single_threaded_no_nesting() {
    let p = profiler();
    let slot = ThreadSlot::new();
    for _ in 0..3 {
        p.enter(&slot, F, MAIN);
        p.exit(&slot, F, MAIN);
    }

    let d = dump(&p);
    assert!(d.errors.is_empty());
    assert_eq!(d.traces.len(), 1);
    assert_eq!(d.info.fpool_used, 1);
    assert_eq!(d.info.cpool_used, 1);
    assert_eq!(d.info.max_threads, 1);

    let t = trace(&d, F, MAIN);
    assert_eq!((t.calls, t.calling, t.unwind), (3, 0, 0));

    let th = thread(&d, F);
    assert_eq!((th.calls, th.funcs, th.depth, th.unwind), (3, 3, 1, 0));
}

#[test]
fn test_nested_calls() {
    let p = profiler();
    let slot = ThreadSlot::new();
    p.enter(&slot, F, MAIN);
    p.enter(&slot, G, F);
    p.exit(&slot, G, F);
    p.exit(&slot, F, MAIN);

    let d = dump(&p);
    let main_f = trace(&d, F, MAIN);
    assert_eq!((main_f.calls, main_f.calling), (1, 1));
    let f_g = trace(&d, G, F);
    assert_eq!((f_g.calls, f_g.calling), (1, 0));

    let th = thread(&d, F);
    assert_eq!((th.calls, th.funcs, th.depth), (1, 2, 2));
    // g never completed a top-level call and gets no THREAD line.
    assert!(d.threads.iter().all(|t| t.func != G as u64));
}

#[test]
fn test_two_threads_same_function() {
    use std::sync::Arc;

    let p = Arc::new(profiler());
    let workers: Vec<_> = (0..2)
        .map(|_| {
            let p = Arc::clone(&p);
            std::thread::spawn(move || {
                let slot = ThreadSlot::new();
                p.enter(&slot, H, MAIN);
                p.exit(&slot, H, MAIN);
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    let d = dump(&p);
    let th = thread(&d, H);
    assert_eq!(th.calls, 2);
    let t = trace(&d, H, MAIN);
    assert_eq!(t.calls, 2);
}

#[test]
fn test_pool_exhaustion_keeps_earlier_records() {
    let p = Profiler::new(Config { func_pool: 2, caller_pool: 32, ..Config::default() });
    let slot = ThreadSlot::new();
    for func in [F, G, H] {
        p.enter(&slot, func, MAIN);
        p.exit(&slot, func, MAIN);
    }

    let d = dump(&p);
    assert_eq!(d.errors, vec!["func pool exhausted".to_string()]);
    assert!(d.traces.iter().any(|t| t.func == F as u64));
    assert!(d.traces.iter().any(|t| t.func == G as u64));
    // The function entered after the failure left no trace.
    assert!(d.traces.iter().all(|t| t.func != H as u64));
}

#[test]
fn test_stack_depth_one_boundary() {
    let p = Profiler::new(Config { stack_size: 1, ..Config::default() });
    let slot = ThreadSlot::new();
    p.enter(&slot, F, MAIN);
    p.exit(&slot, F, MAIN);
    assert!(!p.flags().errored());

    // A nested entry exceeds the single configured level.
    p.enter(&slot, F, MAIN);
    p.enter(&slot, G, F);
    assert!(p.flags().stack_exhausted());

    let d = dump(&p);
    assert!(d.errors.contains(&"time stack exhausted".to_string()));
}

#[test]
fn test_abandoned_thread_is_unwound_at_shutdown() {
    let p = profiler();
    let slot = ThreadSlot::new();
    p.enter(&slot, F, MAIN);
    p.enter(&slot, G, F);
    // Neither exits nor thread cleanup ran; the dumper sweeps the table.
    let d = dump(&p);

    let th = thread(&d, F);
    assert_eq!((th.calls, th.unwind), (1, 2));
    let f_g = trace(&d, G, F);
    assert_eq!(f_g.unwind, 1);
}

#[test]
fn test_dump_round_trips_byte_identical() {
    let p = profiler();
    let slot = ThreadSlot::new();
    p.enter(&slot, F, MAIN);
    p.enter(&slot, G, F);
    p.exit(&slot, G, F);
    p.exit(&slot, F, MAIN);

    let text = dump_text(&p);

    // Re-serializing every parsed TRACE/THREAD/MAP line reproduces the
    // original bytes.
    for line in text.lines() {
        match Line::parse(line) {
            Some(Line::Trace(t)) => assert_eq!(t.to_string(), line),
            Some(Line::Thread(t)) => assert_eq!(t.to_string(), line),
            Some(Line::Map(m)) => assert_eq!(m.to_string(), line),
            _ => {}
        }
    }

    // Invariant: root completions never exceed total entries.
    let d = parse_dump(&text);
    let entries: u64 = d.traces.iter().filter(|t| t.func == F as u64).map(|t| t.calls).sum();
    let th = thread(&d, F);
    assert!(th.calls <= entries);
}
