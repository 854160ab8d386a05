//! Incremental decoder for `multipart/*` bodies as defined in
//! [RFC 2046 Section 5.1](https://tools.ietf.org/html/rfc2046#section-5.1).
//!
//! The decoder is fed from a [`BytesMut`] that the caller refills from the body stream
//! whenever [`MultipartDecoder::decode`] returns `Ok(None)`. Part content is emitted as it
//! arrives, so arbitrarily large parts never have to be buffered whole.

use crate::error::DispatchError;
use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;

const MAX_HEADER_BLOCK: usize = 8 * 1024;
const CRLF: &[u8] = b"\r\n";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PartHeaders {
    pub name: String,
    /// Present for file parts, possibly empty.
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PartItem {
    Headers(PartHeaders),
    Chunk(Bytes),
    PartEnd,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Skip everything before the first boundary
    Preamble,
    /// Read `\r\n` or the closing `--` after a boundary
    AfterBoundary,
    /// Read the part header block
    Headers,
    /// Read part content up to the next delimiter
    Body,
    End,
}

#[derive(Debug)]
pub(crate) struct MultipartDecoder {
    state: State,
    /// `--boundary`
    dash_boundary: Vec<u8>,
    /// `\r\n--boundary`
    delimiter: Vec<u8>,
}

impl MultipartDecoder {
    pub fn new(boundary: &str) -> Self {
        let dash_boundary = [b"--", boundary.as_bytes()].concat();
        let delimiter = [CRLF, &dash_boundary].concat();
        Self { state: State::Preamble, dash_boundary, delimiter }
    }

    pub fn is_finished(&self) -> bool {
        self.state == State::End
    }

    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<PartItem>, DispatchError> {
        loop {
            match self.state {
                State::Preamble => match find(src, &self.dash_boundary) {
                    Some(index) => {
                        src.advance(index + self.dash_boundary.len());
                        self.state = State::AfterBoundary;
                    }
                    None => {
                        keep_tail(src, self.dash_boundary.len() - 1);
                        return Ok(None);
                    }
                },

                State::AfterBoundary => {
                    let padding = src.iter().take_while(|b| **b == b' ' || **b == b'\t').count();
                    src.advance(padding);
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    if src.starts_with(b"--") {
                        src.clear();
                        self.state = State::End;
                        trace!("finished reading multipart body");
                        return Ok(Some(PartItem::Eof));
                    }
                    if !src.starts_with(CRLF) {
                        return Err(DispatchError::multipart("malformed boundary line"));
                    }
                    src.advance(CRLF.len());
                    self.state = State::Headers;
                }

                State::Headers => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    let block = if src.starts_with(CRLF) {
                        src.advance(CRLF.len());
                        Bytes::new()
                    } else {
                        let Some(index) = find(src, b"\r\n\r\n") else {
                            if src.len() > MAX_HEADER_BLOCK {
                                return Err(DispatchError::multipart("part header block too large"));
                            }
                            return Ok(None);
                        };
                        let block = src.split_to(index).freeze();
                        src.advance(4);
                        block
                    };
                    self.state = State::Body;
                    return parse_headers(&block).map(|headers| Some(PartItem::Headers(headers)));
                }

                State::Body => {
                    if let Some(index) = find(src, &self.delimiter) {
                        if index > 0 {
                            return Ok(Some(PartItem::Chunk(src.split_to(index).freeze())));
                        }
                        src.advance(self.delimiter.len());
                        self.state = State::AfterBoundary;
                        return Ok(Some(PartItem::PartEnd));
                    }

                    // the tail may hold the start of a delimiter split across reads
                    let safe = src.len().saturating_sub(self.delimiter.len() - 1);
                    if safe == 0 {
                        return Ok(None);
                    }
                    return Ok(Some(PartItem::Chunk(src.split_to(safe).freeze())));
                }

                State::End => return Ok(Some(PartItem::Eof)),
            }
        }
    }
}

fn keep_tail(src: &mut BytesMut, len: usize) {
    if src.len() > len {
        src.advance(src.len() - len);
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn parse_headers(block: &[u8]) -> Result<PartHeaders, DispatchError> {
    let block = std::str::from_utf8(block).map_err(|_| DispatchError::multipart("part headers are not valid utf-8"))?;

    let mut disposition = None;
    let mut content_type = None;
    for line in block.split("\r\n").filter(|line| !line.is_empty()) {
        let Some((name, value)) = line.split_once(':') else {
            return Err(DispatchError::multipart(format!("malformed part header '{line}'")));
        };
        let value = value.trim();
        if name.trim().eq_ignore_ascii_case("content-disposition") {
            disposition = Some(value);
        } else if name.trim().eq_ignore_ascii_case("content-type") {
            content_type = Some(value.to_string());
        }
    }

    let disposition = disposition.ok_or_else(|| DispatchError::multipart("part without content-disposition"))?;
    let mut name = None;
    let mut filename = None;
    for param in split_params(disposition).into_iter().skip(1) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        let value = unquote(value.trim());
        match key.trim().to_ascii_lowercase().as_str() {
            "name" => name = Some(value),
            "filename" => filename = Some(value),
            _ => {}
        }
    }

    let name = name.ok_or_else(|| DispatchError::multipart("part without a name"))?;
    Ok(PartHeaders { name, filename, content_type })
}

/// Splits `form-data; name="a;b"` on `;` outside of quoted strings.
fn split_params(value: &str) -> Vec<&str> {
    let mut params = vec![];
    let mut quoted = false;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                params.push(value[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    params.push(value[start..].trim());
    params
}

fn unquote(value: &str) -> String {
    match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "preamble\r\n\
        --XyZ\r\n\
        Content-Disposition: form-data; name=\"title\"\r\n\
        \r\n\
        hello\r\n\
        --XyZ\r\n\
        Content-Disposition: form-data; name=\"upload\"; filename=\"a;b.txt\"\r\n\
        Content-Type: text/plain\r\n\
        \r\n\
        line one\r\nline two\r\n\
        --XyZ--\r\n\
        epilogue";

    fn decode_all(decoder: &mut MultipartDecoder, input: &[u8], step: usize) -> Vec<PartItem> {
        let mut items = vec![];
        let mut buf = BytesMut::new();
        let mut chunks = input.chunks(step);
        loop {
            match decoder.decode(&mut buf).unwrap() {
                Some(PartItem::Eof) => {
                    items.push(PartItem::Eof);
                    return items;
                }
                Some(item) => items.push(item),
                None => buf.extend_from_slice(chunks.next().expect("input ended before eof")),
            }
        }
    }

    fn collapse(items: Vec<PartItem>) -> Vec<(PartHeaders, Vec<u8>)> {
        let mut parts = vec![];
        let mut current: Option<(PartHeaders, Vec<u8>)> = None;
        for item in items {
            match item {
                PartItem::Headers(headers) => current = Some((headers, vec![])),
                PartItem::Chunk(bytes) => current.as_mut().unwrap().1.extend_from_slice(&bytes),
                PartItem::PartEnd => parts.push(current.take().unwrap()),
                PartItem::Eof => {}
            }
        }
        parts
    }

    #[test]
    fn decodes_fields_and_files() {
        let mut decoder = MultipartDecoder::new("XyZ");
        let parts = collapse(decode_all(&mut decoder, BODY.as_bytes(), BODY.len()));
        assert!(decoder.is_finished());

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].0, PartHeaders { name: "title".into(), filename: None, content_type: None });
        assert_eq!(parts[0].1, b"hello");
        assert_eq!(parts[1].0.filename.as_deref(), Some("a;b.txt"));
        assert_eq!(parts[1].0.content_type.as_deref(), Some("text/plain"));
        assert_eq!(parts[1].1, b"line one\r\nline two");
    }

    #[test]
    fn delimiter_split_across_reads() {
        for step in [1, 2, 3, 7, 13] {
            let mut decoder = MultipartDecoder::new("XyZ");
            let parts = collapse(decode_all(&mut decoder, BODY.as_bytes(), step));
            assert_eq!(parts[0].1, b"hello", "step {step}");
            assert_eq!(parts[1].1, b"line one\r\nline two", "step {step}");
        }
    }

    #[test]
    fn empty_part_headers_are_rejected() {
        let mut decoder = MultipartDecoder::new("b");
        let mut buf = BytesMut::from(&b"--b\r\n\r\ndata\r\n--b--"[..]);
        assert!(decoder.decode(&mut buf).is_err());
    }

    #[test]
    fn malformed_boundary_line() {
        let mut decoder = MultipartDecoder::new("b");
        let mut buf = BytesMut::from(&b"--bxx\r\n"[..]);
        assert!(matches!(decoder.decode(&mut buf), Err(DispatchError::Multipart { .. })));
    }

    #[test]
    fn incomplete_body_needs_more_data() {
        let mut decoder = MultipartDecoder::new("b");
        let mut buf = BytesMut::from(&b"--b\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nvalue"[..]);
        assert!(matches!(decoder.decode(&mut buf).unwrap(), Some(PartItem::Headers(_))));
        // the last bytes could start a delimiter and are held back
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(PartItem::Chunk(Bytes::from_static(b"v"))));
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"alue");
        assert!(!decoder.is_finished());
    }

    #[test]
    fn quoted_parameters() {
        assert_eq!(split_params("form-data; name=\"a;b\"; x=1"), vec!["form-data", "name=\"a;b\"", "x=1"]);
        assert_eq!(unquote("\"say \\\"hi\\\"\""), "say \"hi\"");
        assert_eq!(unquote("plain"), "plain");
    }
}
