//! Process self-inspection: executable path, memory maps, peak RSS.

use std::fs;
use std::mem::MaybeUninit;

use callscope_common::MapLine;

/// Canonical absolute path of the running executable.
#[must_use]
pub fn exe_path() -> Option<String> {
    let path = fs::read_link("/proc/self/exe").ok()?;
    Some(path.to_string_lossy().into_owned())
}

/// Executable, file-backed regions of the current process.
///
/// Returns an empty list when the map file cannot be read; the dump simply
/// carries no `MAP:` lines in that case.
#[must_use]
pub fn executable_maps() -> Vec<MapLine> {
    fs::read_to_string("/proc/self/maps")
        .map(|maps| parse_maps(&maps))
        .unwrap_or_default()
}

/// Parse `/proc/<pid>/maps` content, keeping regions that are executable,
/// private and backed by a real file.
///
/// Line format: `start-end perms offset dev inode pathname`.
fn parse_maps(maps: &str) -> Vec<MapLine> {
    let mut regions = Vec::new();
    for line in maps.lines() {
        let mut parts = line.split_whitespace();
        let (Some(range), Some(perms)) = (parts.next(), parts.next()) else {
            continue;
        };
        // offset, dev, inode
        let (Some(_), Some(_), Some(_)) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        let Some(path) = parts.next() else {
            continue;
        };
        if perms != "r-xp" || !path.starts_with('/') {
            continue;
        }
        let Some((start, end)) = range.split_once('-') else {
            continue;
        };
        let (Ok(start), Ok(end)) =
            (u64::from_str_radix(start, 16), u64::from_str_radix(end, 16))
        else {
            continue;
        };
        regions.push(MapLine { start, end, path: path.to_string() });
    }
    regions
}

/// Peak resident set size in kbytes, from `getrusage`.
#[must_use]
pub fn max_rss_kb() -> Option<u64> {
    let mut usage = MaybeUninit::<libc::rusage>::uninit();
    // SAFETY: getrusage fills the struct on success; read only after the
    // return value check.
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    let usage = unsafe { usage.assume_init() };
    Some(usage.ru_maxrss as u64)
}
