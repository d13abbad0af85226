//! Call-tree report.
//!
//! The tree is caller-oriented: each printed function is followed, indented
//! two spaces per level, by the functions it was called from, reconstructed
//! from the recorded (function, caller) pairs. Roots are resolved functions
//! that appear as a caller in no trace. A chain ends at a caller with no
//! matching function record; that caller is still printed as a leaf so the
//! origin of the chain stays visible. Functions already on the current path
//! are not descended into again, so recursive call graphs terminate.

use std::io::Write;

use crate::analysis::join::NO_ID;
use crate::analysis::Dataset;
use crate::domain::AnalyzeError;
use crate::symbolization::basename;

/// Print the complete forest, or the tree under the first function whose
/// resolved name equals `target`.
pub fn call_tree(
    ds: &Dataset,
    target: Option<&str>,
    brief: bool,
    out: &mut impl Write,
) -> Result<(), AnalyzeError> {
    match target {
        None => {
            writeln!(out, "\nComplete function call tree:\n")?;
            for i in 0..ds.traces.len() {
                if i > 0 && ds.traces[i - 1].func == ds.traces[i].func {
                    continue;
                }
                if ds.traces[i].func_id == NO_ID {
                    continue;
                }
                if ds.search_caller(ds.traces[i].func_id).is_some() {
                    continue;
                }
                let mut path = Vec::new();
                walk(ds, i, 0, brief, &mut path, out)?;
            }
            Ok(())
        }
        Some(name) => {
            writeln!(out, "\nFunction call tree for {name}:\n")?;
            for (i, trace) in ds.traces.iter().enumerate() {
                if trace.func_sym.is_some_and(|s| ds.addrs[s].func == name) {
                    let mut path = Vec::new();
                    walk(ds, i, 0, brief, &mut path, out)?;
                    return Ok(());
                }
            }
            Err(AnalyzeError::FunctionNotFound(name.to_string()))
        }
    }
}

/// Print the function of `traces[idx]` and recurse into its callers.
fn walk(
    ds: &Dataset,
    idx: usize,
    level: usize,
    brief: bool,
    path: &mut Vec<i64>,
    out: &mut impl Write,
) -> Result<(), AnalyzeError> {
    let func_id = ds.traces[idx].func_id;
    let trace = &ds.traces[idx];
    writeln!(
        out,
        "{:indent$}{}",
        "",
        func_label(ds, trace.func_sym, trace.func_map, trace.func, brief),
        indent = level
    )?;

    path.push(func_id);
    let mut last_caller_id = NO_ID;
    let mut last_leaf: Option<String> = None;
    let mut i = idx;
    while i < ds.traces.len() && ds.traces[i].func_id == func_id {
        let trace = &ds.traces[i];
        // Several call sites inside one caller collapse to one branch.
        if last_caller_id != NO_ID && last_caller_id == trace.caller_id {
            i += 1;
            continue;
        }
        last_caller_id = trace.caller_id;

        if trace.caller_id == NO_ID {
            // No function record for this caller (e.g. the uninstrumented
            // entry point): print it as a leaf, collapsing repeats.
            let label = func_label(ds, trace.caller_sym, trace.caller_map, trace.caller, brief);
            if last_leaf.as_deref() != Some(label.as_str()) {
                writeln!(out, "{:indent$}{label}", "", indent = level + 2)?;
                last_leaf = Some(label);
            }
        } else if let Some(cidx) = ds.search_func(trace.caller_id) {
            if path.contains(&trace.caller_id) {
                // Recursion: show the caller once more, do not descend.
                let caller = &ds.traces[cidx];
                writeln!(
                    out,
                    "{:indent$}{}",
                    "",
                    func_label(ds, caller.func_sym, caller.func_map, caller.func, brief),
                    indent = level + 2
                )?;
            } else {
                walk(ds, cidx, level + 2, brief, path, out)?;
            }
        }
        i += 1;
    }
    path.pop();
    Ok(())
}

/// Tree node label: `name  (file:line)`, map+offset, or the raw address.
fn func_label(
    ds: &Dataset,
    sym: Option<usize>,
    map: Option<usize>,
    addr: u64,
    brief: bool,
) -> String {
    if let Some(sym) = sym {
        let info = &ds.addrs[sym];
        if info.line == 0 {
            format!("{}  ({})", info.func, info.file)
        } else {
            format!("{}  ({}:{})", info.func, info.file, info.line)
        }
    } else if let Some(map) = map {
        let map = &ds.maps[map];
        let name = if brief { basename(&map.path) } else { &map.path };
        format!("{}+0x{:x}", name, addr - map.start)
    } else {
        format!("0x{addr:x}")
    }
}
