//! Boundary patterns and the part body scanner.
//!
//! A part body ends at `\r\n--boundary` (or `\n--boundary` once the body is
//! known to use bare LF line ends). The scanner looks at a lookahead window
//! and decides how many leading bytes are certainly body, so that no byte
//! that might still belong to the delimiter is ever handed to the caller.

use crate::MultipartError;

/// Byte patterns derived from one boundary. Never mutated after construction.
#[derive(Debug, Clone)]
pub struct BoundaryPatterns {
    /// `\r\n--boundary`; the `--boundary` and LF forms are slices of it.
    nl_dash_boundary: Box<[u8]>,
    /// `--boundary--`
    dash_boundary_dash: Box<[u8]>,
}

impl BoundaryPatterns {
    pub fn new(boundary: &str) -> Result<Self, MultipartError> {
        if boundary.is_empty() {
            return Err(MultipartError::invalid_boundary("boundary must not be empty"));
        }

        Ok(Self {
            nl_dash_boundary: format!("\r\n--{boundary}").into_bytes().into_boxed_slice(),
            dash_boundary_dash: format!("--{boundary}--").into_bytes().into_boxed_slice(),
        })
    }

    /// `--boundary`, the part start line prefix.
    #[inline]
    pub fn dash_boundary(&self) -> &[u8] {
        &self.nl_dash_boundary[2..]
    }

    /// `--boundary--`, the final line prefix.
    #[inline]
    pub fn dash_boundary_dash(&self) -> &[u8] {
        &self.dash_boundary_dash
    }

    /// The pattern ending a part body, `\r\n--boundary` or `\n--boundary`.
    #[inline]
    pub fn new_line_dash_boundary(&self, lf_only: bool) -> &[u8] {
        if lf_only { &self.nl_dash_boundary[1..] } else { &self.nl_dash_boundary }
    }

    #[inline]
    pub fn new_line(&self, lf_only: bool) -> &'static [u8] {
        if lf_only { b"\n" } else { b"\r\n" }
    }
}

/// Outcome of [`scan_until_boundary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    /// The leading `n` bytes are body data, `n > 0`.
    Body(usize),
    /// Undecidable with this window, grow it and scan again.
    NeedMore,
    /// The window starts with the delimiter ending the part.
    Boundary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Follow {
    Mismatch,
    Undecided,
    Match,
}

/// Classifies what follows a delimiter candidate at the start of `buf`.
fn follow(buf: &[u8], prefix_len: usize, eof: bool) -> Follow {
    match buf.get(prefix_len) {
        None if eof => Follow::Match,
        None => Follow::Undecided,
        Some(b' ' | b'\t' | b'\r' | b'\n' | b'-') => Follow::Match,
        Some(_) => Follow::Mismatch,
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Decides how much of `buf` is part body.
///
/// `total` is the number of body bytes already returned for the current
/// part, `eof` tells whether `buf` is everything the source has left.
pub fn scan_until_boundary(buf: &[u8], patterns: &BoundaryPatterns, lf_only: bool, total: u64, eof: bool) -> Scan {
    let dash_boundary = patterns.dash_boundary();
    let nl_dash_boundary = patterns.new_line_dash_boundary(lf_only);

    if total == 0 {
        // the body may start right at a delimiter without a line break before it
        if buf.starts_with(dash_boundary) {
            return match follow(buf, dash_boundary.len(), eof) {
                Follow::Mismatch => Scan::Body(dash_boundary.len()),
                Follow::Undecided => Scan::NeedMore,
                Follow::Match => Scan::Boundary,
            };
        }
        if dash_boundary.starts_with(buf) {
            return Scan::NeedMore;
        }
    }

    if let Some(i) = find(buf, nl_dash_boundary) {
        return match follow(&buf[i..], nl_dash_boundary.len(), eof) {
            Follow::Mismatch => Scan::Body(i + nl_dash_boundary.len()),
            Follow::Undecided | Follow::Match if i > 0 => Scan::Body(i),
            Follow::Undecided => Scan::NeedMore,
            Follow::Match => Scan::Boundary,
        };
    }

    if nl_dash_boundary.starts_with(buf) {
        return Scan::NeedMore;
    }

    // a delimiter may begin in the last bytes of the window
    if let Some(j) = buf.iter().rposition(|b| *b == nl_dash_boundary[0])
        && nl_dash_boundary.starts_with(&buf[j..])
    {
        return Scan::Body(j);
    }

    Scan::Body(buf.len())
}
