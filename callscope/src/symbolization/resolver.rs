//! One `addr2line` subprocess per mapped object.
//!
//! The child is started in pretty mode (`-afpCe`, plus `s` for basenames),
//! offsets are written one per line and exactly one response line is read
//! back per offset.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::process::{Child, ChildStdout, Command, Stdio};

use log::debug;

use crate::domain::AnalyzeError;

const RESOLVER_COMMAND: &str = "addr2line";

/// A parsed resolver response for one offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The offset echoed by the resolver.
    pub offset: u64,
    pub func: String,
    /// `None` when the resolver printed `??:?`.
    pub location: Option<(String, u32)>,
}

pub struct AddrResolver {
    child: Child,
    /// Dropped first on teardown so the child sees EOF and exits.
    stdin: Option<BufWriter<std::process::ChildStdin>>,
    stdout: BufReader<ChildStdout>,
    object: String,
}

impl AddrResolver {
    /// Spawn the resolver for one object file.
    pub fn spawn(object: &str, basenames: bool) -> Result<Self, AnalyzeError> {
        let mut child = Command::new(RESOLVER_COMMAND)
            .arg(if basenames { "-asfpCe" } else { "-afpCe" })
            .arg(object)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| AnalyzeError::ResolverSpawn {
                command: RESOLVER_COMMAND.to_string(),
                object: object.to_string(),
                source,
            })?;
        debug!("spawned {RESOLVER_COMMAND} for {object}");

        // Both pipes were requested above; take() cannot fail.
        let stdin = child.stdin.take().ok_or_else(|| AnalyzeError::ResolverPipe {
            object: object.to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| AnalyzeError::ResolverPipe {
            object: object.to_string(),
        })?;

        Ok(Self {
            child,
            stdin: Some(BufWriter::new(stdin)),
            stdout: BufReader::new(stdout),
            object: object.to_string(),
        })
    }

    /// Resolve one offset within the object.
    ///
    /// Returns `Ok(None)` when the resolver does not know the function.
    pub fn resolve(&mut self, offset: u64) -> Result<Option<Response>, AnalyzeError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| AnalyzeError::ResolverPipe { object: self.object.clone() })?;
        writeln!(stdin, "0x{offset:x}")?;
        stdin.flush()?;

        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            return Err(AnalyzeError::ResolverPipe { object: self.object.clone() });
        }
        Ok(parse_response(&line))
    }
}

impl Drop for AddrResolver {
    fn drop(&mut self) {
        // Closing stdin lets the child exit; reap it so no zombies pile up
        // across map boundaries.
        self.stdin.take();
        let _ = self.child.wait();
    }
}

/// Parse a pretty-mode response: `0xOFFSET: NAME at FILE:LINE`.
///
/// `??` names, zero offsets and missing fields yield `None`; a `??:?`
/// location yields a response without location.
fn parse_response(line: &str) -> Option<Response> {
    let (addr_part, rest) = line.split_once(':')?;
    let offset = parse_hex(addr_part.trim())?;
    if offset == 0 {
        return None;
    }

    let mut tokens = rest.split_whitespace();
    let func = tokens.next()?;
    if func == "??" {
        return None;
    }
    // The "at" separator; its absence means a bare response we cannot use.
    tokens.next()?;
    let location = tokens.next()?;

    if location == "??:?" {
        return Some(Response { offset, func: func.to_string(), location: None });
    }

    let (file, line_part) = location.split_once(':')?;
    let line_no = leading_number(line_part);
    Some(Response {
        offset,
        func: func.to_string(),
        location: Some((file.to_string(), line_no)),
    })
}

fn parse_hex(token: &str) -> Option<u64> {
    let digits = token.strip_prefix("0x").unwrap_or(token);
    u64::from_str_radix(digits, 16).ok()
}

/// `atoi`-style leading-digits parse; `"12 (discriminator 3)"` → 12.
fn leading_number(s: &str) -> u32 {
    let digits: String = s.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_response() {
        let r = parse_response("0x0000000000001149: main at /src/demo.c:12\n").unwrap();
        assert_eq!(r.offset, 0x1149);
        assert_eq!(r.func, "main");
        assert_eq!(r.location, Some(("/src/demo.c".to_string(), 12)));
    }

    #[test]
    fn test_parse_unknown_function() {
        assert_eq!(parse_response("0x1149: ?? at ??:?\n"), None);
    }

    #[test]
    fn test_parse_unknown_location() {
        let r = parse_response("0x1149: helper at ??:?\n").unwrap();
        assert_eq!(r.location, None);
    }

    #[test]
    fn test_parse_discriminator_suffix() {
        let r = parse_response("0x1149: helper at /src/demo.c:7 (discriminator 2)\n").unwrap();
        assert_eq!(r.location, Some(("/src/demo.c".to_string(), 7)));
    }

    #[test]
    fn test_parse_rejects_zero_offset_and_garbage() {
        assert_eq!(parse_response("0x0: main at /src/demo.c:1\n"), None);
        assert_eq!(parse_response("not a response\n"), None);
        assert_eq!(parse_response("0x10: main\n"), None);
    }

    #[test]
    fn test_leading_number() {
        assert_eq!(leading_number("42"), 42);
        assert_eq!(leading_number("7 (discriminator 1)"), 7);
        assert_eq!(leading_number("?"), 0);
    }
}
