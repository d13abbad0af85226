//! Address symbolization via an external resolver.
//!
//! The dump contains raw addresses plus the executable regions they came
//! from. Symbolization walks the sorted unique addresses and the sorted maps
//! in lockstep, spawns one `addr2line` subprocess per map file, feeds it
//! `addr − map.start` offsets and reads back `0xADDR: NAME at FILE:LINE`
//! responses. Addresses outside every map, and responses the resolver cannot
//! attribute (`??`), stay unresolved and are reported as raw addresses or
//! map offsets later.

pub mod resolver;

pub use resolver::AddrResolver;

use callscope_common::MapLine;

use crate::domain::{AddrInfo, AnalyzeError};
use crate::trace_data::TraceFile;

/// Resolve every unique `TRACE:` address that falls inside a mapped region.
///
/// With `basenames` set the resolver reports bare file names (`-s` mode) and
/// unresolved locations fall back to the map's base name instead of its full
/// path.
pub fn symbolize(tf: &TraceFile, basenames: bool) -> Result<Vec<AddrInfo>, AnalyzeError> {
    let mut maps: Vec<&MapLine> = tf.maps.iter().collect();
    maps.sort_by_key(|m| m.start);

    let mut addrs: Vec<u64> = Vec::with_capacity(tf.traces.len() * 2);
    for trace in &tf.traces {
        addrs.push(trace.func);
        addrs.push(trace.caller);
    }
    addrs.sort_unstable();
    addrs.dedup();

    let mut resolved = Vec::new();
    let mut resolver: Option<AddrResolver> = None;
    let (mut i, mut j) = (0, 0);
    while i < addrs.len() && j < maps.len() {
        let addr = addrs[i];
        let map = maps[j];
        if addr < map.start {
            i += 1;
            continue;
        }
        if addr >= map.end {
            // Map boundary: close the resolver for this object.
            resolver = None;
            j += 1;
            continue;
        }

        let child = match resolver.as_mut() {
            Some(child) => child,
            None => resolver.insert(AddrResolver::spawn(&map.path, basenames)?),
        };
        if let Some(response) = child.resolve(addr - map.start)? {
            let (file, line) = match response.location {
                Some((file, line)) => (file, line),
                // Known function, unknown location: charge it to the object.
                None => (
                    if basenames { basename(&map.path).to_string() } else { map.path.clone() },
                    0,
                ),
            };
            resolved.push(AddrInfo {
                addr: response.offset + map.start,
                func: response.func,
                file,
                line,
            });
        }
        i += 1;
    }

    Ok(resolved)
}

pub(crate) fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basename() {
        assert_eq!(basename("/usr/bin/demo"), "demo");
        assert_eq!(basename("demo"), "demo");
        assert_eq!(basename("/lib/x/libdemo.so.1"), "libdemo.so.1");
    }

    #[test]
    fn test_symbolize_without_maps_resolves_nothing() {
        let mut tf = TraceFile::default();
        tf.traces.push(callscope_common::TraceLine {
            func: 0x401000,
            caller: 0x402000,
            calls: 1,
            nsecs: 0,
            calling: 0,
            unwind: 0,
        });
        let resolved = symbolize(&tf, false).unwrap();
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_symbolize_skips_addresses_outside_all_maps() {
        let mut tf = TraceFile::default();
        tf.maps.push(MapLine { start: 0x10_0000, end: 0x20_0000, path: "/no/such/object".into() });
        tf.traces.push(callscope_common::TraceLine {
            func: 0x1000,
            caller: 0x2000,
            calls: 1,
            nsecs: 0,
            calling: 0,
            unwind: 0,
        });
        // Both addresses sort below the map; no resolver is ever spawned.
        let resolved = symbolize(&tf, false).unwrap();
        assert!(resolved.is_empty());
    }
}
