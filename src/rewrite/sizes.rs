//! STAT and LIST size accounting.
//!
//! Every message grows by the headers the proxy injects, so the sizes the
//! server reports are bumped by a fixed allowance per message before they
//! reach the client.

use std::sync::OnceLock;

use regex::bytes::Regex;

/// Bytes added to each reported message size for the injected headers.
pub const HEADER_SIZE_FUDGE_FACTOR: u64 = 512;

fn status_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?-u)^\+OK\s+(\d+)\s+(\d+)(.*)\r\n").expect("static regex"))
}

fn scan_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?-u)^(\d+)\s+(\d+)").expect("static regex"))
}

fn parse_number(digits: &[u8]) -> Option<u64> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// Splits on CRLF the way `str::split` would: `n` separators give `n + 1`
/// pieces, the last one possibly empty.
fn split_crlf(data: &[u8]) -> Vec<&[u8]> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + 1 < data.len() {
        if &data[i..i + 2] == b"\r\n" {
            pieces.push(&data[start..i]);
            i += 2;
            start = i;
        } else {
            i += 1;
        }
    }
    pieces.push(&data[start..]);
    pieces
}

/// `+OK <count> <size>[text]`: size grows by the allowance times the count.
/// Anything that does not parse is returned unchanged.
pub fn rewrite_stat(response: &[u8]) -> Vec<u8> {
    let Some(caps) = status_line().captures(response) else {
        return response.to_vec();
    };
    let adjusted = parse_number(&caps[1]).zip(parse_number(&caps[2])).and_then(|(count, size)| {
        HEADER_SIZE_FUDGE_FACTOR
            .checked_mul(count)
            .and_then(|extra| size.checked_add(extra))
            .map(|size| (count, size))
    });
    match adjusted {
        Some((count, size)) => {
            let mut out = format!("+OK {} {}", count, size).into_bytes();
            out.extend_from_slice(&caps[3]);
            out.extend_from_slice(b"\r\n");
            out
        }
        None => response.to_vec(),
    }
}

/// Scan listing: either a multiline list of `<num> <size>` lines after the
/// status line, or a single `+OK <num> <size>` answer. Only the size tokens
/// change; everything else is kept byte for byte.
pub fn rewrite_list(response: &[u8]) -> Vec<u8> {
    let lines = split_crlf(response);
    // More than one CRLF: a multiline listing.
    if lines.len() > 2 {
        let mut out = Vec::with_capacity(response.len() + 8 * lines.len());
        for (i, line) in lines.iter().enumerate() {
            if i > 0 {
                out.extend_from_slice(b"\r\n");
            }
            if i == 0 {
                out.extend_from_slice(line);
                continue;
            }
            match bump_size(line) {
                Some(rewritten) => out.extend_from_slice(&rewritten),
                None => out.extend_from_slice(line),
            }
        }
        out
    } else {
        let Some(caps) = status_line().captures(response) else {
            return response.to_vec();
        };
        let Some(size) = parse_number(&caps[2]).and_then(|s| s.checked_add(HEADER_SIZE_FUDGE_FACTOR)) else {
            return response.to_vec();
        };
        let mut out = b"+OK ".to_vec();
        out.extend_from_slice(&caps[1]);
        out.extend_from_slice(format!(" {}", size).as_bytes());
        out.extend_from_slice(&caps[3]);
        out.extend_from_slice(b"\r\n");
        out
    }
}

fn bump_size(line: &[u8]) -> Option<Vec<u8>> {
    let caps = scan_line().captures(line)?;
    let size_match = caps.get(2)?;
    let size = parse_number(size_match.as_bytes())?.checked_add(HEADER_SIZE_FUDGE_FACTOR)?;
    let mut out = line[..size_match.start()].to_vec();
    out.extend_from_slice(size.to_string().as_bytes());
    out.extend_from_slice(&line[size_match.end()..]);
    Some(out)
}
