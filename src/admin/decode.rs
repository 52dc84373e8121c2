//! Best-effort decoding of raw-socket HTTP responses.
//!
//! The raw-socket tool returns the response exactly as it came off the wire:
//! status line, headers and a body that may use chunked transfer-encoding.
//! Decoding never fails. Input that does not look like what we expect is
//! passed through unchanged so that at least the raw payload survives.

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CRLF: &[u8] = b"\r\n";

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

/// Return the bytes after the first blank line, or the input if there is none.
pub fn strip_headers(raw: &[u8]) -> &[u8] {
    match find(raw, HEADER_TERMINATOR, 0) {
        Some(idx) => &raw[idx + HEADER_TERMINATOR.len()..],
        None => raw,
    }
}

/// Parse the status code from a leading `HTTP/1.x NNN ...` line.
pub fn status_code(raw: &[u8]) -> Option<u16> {
    if !raw.starts_with(b"HTTP/") {
        return None;
    }
    let line_end = find(raw, CRLF, 0).unwrap_or(raw.len());
    let line = std::str::from_utf8(&raw[..line_end]).ok()?;
    line.split_whitespace().nth(1)?.parse().ok()
}

/// Reverse chunked transfer-encoding, or return `body` unchanged if it is
/// not valid chunked framing.
pub fn decode_chunked(body: &[u8]) -> Vec<u8> {
    try_decode_chunked(body).unwrap_or_else(|| body.to_vec())
}

fn try_decode_chunked(body: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(body.len());
    let mut pos = 0;

    loop {
        let line_end = find(body, CRLF, pos)?;
        let line = std::str::from_utf8(&body[pos..line_end]).ok()?;
        // Chunk extensions (";name=value") are ignored.
        let size_field = line.split(';').next()?.trim();
        if size_field.is_empty() {
            return None;
        }
        let size = usize::from_str_radix(size_field, 16).ok()?;
        pos = line_end + CRLF.len();

        if size == 0 {
            return Some(out);
        }

        let data_end = pos.checked_add(size)?;
        let crlf_end = data_end.checked_add(CRLF.len())?;
        if body.get(data_end..crlf_end)? != CRLF {
            return None;
        }
        out.extend_from_slice(&body[pos..data_end]);
        pos = crlf_end;
    }
}

/// Turn raw-socket output into a response body.
pub fn decode_raw_response(raw: &[u8]) -> Vec<u8> {
    if raw.is_empty() {
        return Vec::new();
    }
    match find(raw, HEADER_TERMINATOR, 0) {
        Some(_) => decode_chunked(strip_headers(raw)),
        None => raw.to_vec(),
    }
}
