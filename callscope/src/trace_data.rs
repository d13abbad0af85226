//! Loading the instrumentation dump into typed lists.
//!
//! Parsing is line-based: recognized prefixes populate the matching list,
//! malformed and unknown lines are skipped silently, `INFO:` keys update the
//! scalar set. Whether the result is complete enough to analyze is decided
//! later (at least one `TRACE:` line is required).

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use callscope_common::{Line, MapLine, RunInfo, ThreadLine, TraceLine};

/// All data read from one dump file.
#[derive(Debug, Default)]
pub struct TraceFile {
    pub cmd: Option<String>,
    pub info: RunInfo,
    pub maps: Vec<MapLine>,
    pub traces: Vec<TraceLine>,
    pub threads: Vec<ThreadLine>,
    /// Raw `ERROR:` payloads written by the runtime.
    pub errors: Vec<String>,
}

impl TraceFile {
    /// Read a dump file.
    ///
    /// `prefix` is the `-p` chroot prefix: it is prepended to every map path
    /// and to the command path, so symbol files can be opened from outside
    /// the environment the program ran in.
    pub fn load(path: &Path, prefix: Option<&str>) -> io::Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), prefix)
    }

    /// Parse dump lines from any reader.
    pub fn from_reader(reader: impl BufRead, prefix: Option<&str>) -> io::Result<Self> {
        let mut data = Self::default();
        for line in reader.lines() {
            let line = line?;
            match Line::parse(&line) {
                Some(Line::Cmd(cmd)) => data.cmd = Some(prefixed(prefix, &cmd)),
                Some(Line::Info { key, value }) => {
                    data.info.apply(&key, value);
                }
                Some(Line::Map(mut map)) => {
                    map.path = prefixed(prefix, &map.path);
                    data.maps.push(map);
                }
                Some(Line::Trace(trace)) => data.traces.push(trace),
                Some(Line::Thread(thread)) => data.threads.push(thread),
                Some(Line::Error(error)) => data.errors.push(error),
                None => {}
            }
        }
        Ok(data)
    }
}

fn prefixed(prefix: Option<&str>, path: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}/{path}"),
        None => path.to_string(),
    }
}
