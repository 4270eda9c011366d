use log::debug;

/// One header field. The value keeps its folding, normalized to CRLF, and
/// its raw bytes; nothing is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: String,
    pub value: Vec<u8>,
}

/// A line of the header block as it will be written back out.
#[derive(Debug, Clone, PartialEq, Eq)]
enum HeaderLine {
    Field(HeaderField),
    /// A Unix `From ` envelope line or anything else that is not a field.
    /// Kept byte for byte and never looked up.
    Raw(Vec<u8>),
}

/// A mail message split into parsed headers and an untouched body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    lines: Vec<HeaderLine>,
    body: Vec<u8>,
}

/// Finds the header/body boundary, tolerating LF-LF as well as CRLF-CRLF.
///
/// Returns the header block (up to, not including, the first `\n` of the
/// separator) and the body (everything after the separator).
pub fn split_headers(text: &[u8]) -> Option<(&[u8], &[u8])> {
    let mut i = 0;
    while let Some(offset) = text[i..].iter().position(|&b| b == b'\n') {
        let nl = i + offset;
        let rest = &text[nl + 1..];
        if rest.starts_with(b"\n") {
            return Some((&text[..nl], &text[nl + 2..]));
        }
        if rest.starts_with(b"\r\n") {
            return Some((&text[..nl], &text[nl + 3..]));
        }
        i = nl + 1;
    }
    None
}

fn is_field_name(name: &[u8]) -> bool {
    !name.is_empty() && name.iter().all(|&b| (33..=126).contains(&b) && b != b':')
}

fn parse_field(line: &[u8]) -> Option<HeaderField> {
    let colon = line.iter().position(|&b| b == b':')?;
    let (name, value) = (&line[..colon], &line[colon + 1..]);
    if !is_field_name(name) {
        return None;
    }
    let start = value
        .iter()
        .position(|&b| b != b' ' && b != b'\t')
        .unwrap_or(value.len());
    Some(HeaderField {
        name: String::from_utf8_lossy(name).into_owned(),
        value: value[start..].to_vec(),
    })
}

impl MailMessage {
    /// Lenient parse: lines that are not fields stay in the header block
    /// untouched instead of failing the message.
    pub fn parse(text: &[u8]) -> Self {
        let (block, body) = split_headers(text).unwrap_or((text, &[][..]));

        let mut lines: Vec<HeaderLine> = Vec::new();
        for raw in block.split(|&b| b == b'\n') {
            let line = raw.strip_suffix(b"\r").unwrap_or(raw);
            if line.is_empty() {
                continue;
            }

            if line.first().is_some_and(|&b| b == b' ' || b == b'\t') {
                match lines.last_mut() {
                    Some(HeaderLine::Field(last)) => {
                        last.value.extend_from_slice(b"\r\n");
                        last.value.extend_from_slice(line);
                    }
                    Some(HeaderLine::Raw(last)) => {
                        last.extend_from_slice(b"\r\n");
                        last.extend_from_slice(line);
                    }
                    None => lines.push(HeaderLine::Raw(line.to_vec())),
                }
                continue;
            }

            match parse_field(line) {
                Some(field) => lines.push(HeaderLine::Field(field)),
                None => {
                    debug!("Keeping non-field header line {:?}", String::from_utf8_lossy(line));
                    lines.push(HeaderLine::Raw(line.to_vec()));
                }
            }
        }

        Self {
            lines,
            body: body.to_vec(),
        }
    }

    /// The parsed fields, in order. Lines that are not fields are skipped.
    pub fn headers(&self) -> impl Iterator<Item = &HeaderField> {
        self.lines.iter().filter_map(|l| match l {
            HeaderLine::Field(field) => Some(field),
            HeaderLine::Raw(_) => None,
        })
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// First value of the named header, case-insensitive.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.headers()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_slice())
    }

    pub fn remove(&mut self, name: &str) {
        self.lines.retain(|l| match l {
            HeaderLine::Field(h) => !h.name.eq_ignore_ascii_case(name),
            HeaderLine::Raw(_) => true,
        });
    }

    pub fn push(&mut self, name: &str, value: impl Into<Vec<u8>>) {
        self.lines.push(HeaderLine::Field(HeaderField {
            name: name.to_string(),
            value: value.into(),
        }));
    }

    /// Header lines joined by CRLF, without a trailing separator. Fields
    /// are written as `Name: value`, other lines as they arrived.
    pub fn header_block(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                out.extend_from_slice(b"\r\n");
            }
            match line {
                HeaderLine::Field(h) => {
                    out.extend_from_slice(h.name.as_bytes());
                    out.extend_from_slice(b": ");
                    out.extend_from_slice(&h.value);
                }
                HeaderLine::Raw(raw) => out.extend_from_slice(raw),
            }
        }
        out
    }

    /// The whole message as stored in a cache.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.header_block();
        out.extend_from_slice(b"\r\n\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_crlf_or_bare_lf() {
        assert_eq!(
            split_headers(b"A: 1\r\nB: 2\r\n\r\nbody\r\n"),
            Some((&b"A: 1\r\nB: 2\r"[..], &b"body\r\n"[..]))
        );
        assert_eq!(split_headers(b"A: 1\n\nbody"), Some((&b"A: 1"[..], &b"body"[..])));
        assert_eq!(split_headers(b"A: 1\r\nB: 2\r\n"), None);
    }

    #[test]
    fn parses_folded_headers() {
        let msg = MailMessage::parse(
            b"Subject: a long\r\n\tsubject line\r\nFrom:bob@example.com\r\n\r\nHello\r\n",
        );
        assert_eq!(msg.headers().count(), 2);
        assert_eq!(msg.get("subject").unwrap(), b"a long\r\n\tsubject line");
        assert_eq!(msg.get("FROM").unwrap(), b"bob@example.com");
        assert_eq!(msg.body(), b"Hello\r\n");
        assert_eq!(
            msg.header_block(),
            b"Subject: a long\r\n\tsubject line\r\nFrom: bob@example.com"
        );
    }

    #[test]
    fn keeps_lines_that_are_not_fields() {
        let msg = MailMessage::parse(b"Subject: ok\r\nthis is not a header\r\n\r\nbody");
        assert_eq!(msg.headers().count(), 1);
        assert_eq!(msg.get("subject").unwrap(), b"ok");
        assert_eq!(msg.header_block(), b"Subject: ok\r\nthis is not a header");
        assert_eq!(msg.body(), b"body");
    }

    #[test]
    fn unix_from_line_is_kept_in_front() {
        let msg = MailMessage::parse(
            b"From alice@example.com Tue Oct 14 10:00:00 2026\r\nSubject: hi\r\n\r\nbody\r\n",
        );
        assert_eq!(msg.get("subject").unwrap(), b"hi");
        assert!(msg.get("from").is_none());
        assert_eq!(
            msg.header_block(),
            b"From alice@example.com Tue Oct 14 10:00:00 2026\r\nSubject: hi"
        );
    }

    #[test]
    fn space_before_colon_is_not_a_field() {
        let mut msg = MailMessage::parse(b"Subject : hi\r\n  more\r\nTo: bob\r\n\r\n");
        assert!(msg.get("subject").is_none());
        msg.remove("Subject ");
        assert_eq!(msg.header_block(), b"Subject : hi\r\n  more\r\nTo: bob");
    }

    #[test]
    fn leading_continuation_is_kept() {
        let msg = MailMessage::parse(b" stray\r\nA: b\r\n\r\n");
        assert_eq!(msg.header_block(), b" stray\r\nA: b");
    }

    #[test]
    fn push_and_remove() {
        let mut msg = MailMessage::parse(b"X-Spambayes-Classification: ham\r\nA: b\r\n\r\n");
        msg.remove("x-spambayes-classification");
        msg.push("X-Spambayes-Classification", "spam");
        assert_eq!(msg.to_bytes(), b"A: b\r\nX-Spambayes-Classification: spam\r\n\r\n");
    }
}
