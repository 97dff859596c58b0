//! Minimal `multipart/form-data` reader for single-file uploads.
//!
//! `file_part` works on a body already in memory and borrows the part from it.
//! `MultipartReader` walks a body as it arrives and copies one part to a
//! writer, holding at most one read chunk plus a boundary's worth of bytes.

use std::io::{Read, Write};

use crate::error::{VisionError, VisionResult};

const MAX_PART_HEADER_BYTES: usize = 16 * 1024;

/// One uploaded file part.
#[derive(Debug, PartialEq, Eq)]
pub struct FilePart<'a> {
    pub filename: String,
    /// Part content type, lowercased, without parameters. Empty when absent.
    pub content_type: String,
    pub data: &'a [u8],
}

/// Extract the boundary from a `Content-Type: multipart/form-data; boundary=...` value.
pub fn boundary(content_type: &str) -> VisionResult<String> {
    let mut params = content_type.split(';');
    let media = params.next().unwrap_or_default().trim();
    if !media.eq_ignore_ascii_case("multipart/form-data") {
        return Err(VisionError::invalid_input(
            "request must be multipart/form-data",
        ));
    }
    params
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| unquote(value.trim()).to_string())
        .filter(|value| !value.is_empty() && value.len() <= 200)
        .ok_or_else(|| VisionError::invalid_input("multipart boundary missing"))
}

/// Find the part whose form field name is `field` and return it as a file.
pub fn file_part<'a>(body: &'a [u8], boundary: &str, field: &str) -> VisionResult<FilePart<'a>> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let separator = format!("\r\n--{}", boundary).into_bytes();

    let mut cursor = find(body, &delimiter, 0)
        .map(|at| at + delimiter.len())
        .ok_or_else(|| malformed("opening boundary not found"))?;

    loop {
        let rest = &body[cursor..];
        if rest.starts_with(b"--") {
            break;
        }
        if !rest.starts_with(b"\r\n") {
            return Err(malformed("boundary not followed by CRLF"));
        }
        let headers_start = cursor + 2;
        let headers_end = find(body, b"\r\n\r\n", headers_start)
            .ok_or_else(|| malformed("part headers not terminated"))?;
        let data_start = headers_end + 4;
        let data_end = find(body, &separator, data_start)
            .ok_or_else(|| malformed("closing boundary not found"))?;

        let headers = String::from_utf8_lossy(&body[headers_start..headers_end]);
        let part = PartHeaders::parse(&headers);
        if part.name.as_deref() == Some(field) {
            return Ok(FilePart {
                filename: part.filename.unwrap_or_default(),
                content_type: part.content_type.unwrap_or_default(),
                data: &body[data_start..data_end],
            });
        }
        cursor = data_end + separator.len();
    }

    Err(VisionError::invalid_input(format!(
        "multipart field '{}' missing",
        field
    )))
}

/// Headers of a part found by `MultipartReader`; its body is still unread.
#[derive(Debug, PartialEq, Eq)]
pub struct PartHead {
    pub filename: String,
    /// Lowercased, without parameters. Empty when absent.
    pub content_type: String,
}

/// Result of copying a part body.
#[derive(Debug, PartialEq, Eq)]
pub enum PartCopy {
    /// The whole body was written; the byte count.
    Complete(u64),
    /// The body passed the limit. Nothing past the limit was written.
    OverLimit,
}

pub struct MultipartReader<R> {
    inner: R,
    buf: Vec<u8>,
    scratch: Vec<u8>,
    delimiter: Vec<u8>,
    separator: Vec<u8>,
}

impl<R: Read> MultipartReader<R> {
    /// Reads from `inner` at most `chunk_bytes` at a time.
    pub fn new(inner: R, boundary: &str, chunk_bytes: usize) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            scratch: vec![0u8; chunk_bytes.max(1)],
            delimiter: format!("--{}", boundary).into_bytes(),
            separator: format!("\r\n--{}", boundary).into_bytes(),
        }
    }

    /// Advance to the part whose form field name is `field` and return its
    /// headers. Bodies of earlier parts are discarded as they stream past.
    pub fn find_part(&mut self, field: &str) -> VisionResult<PartHead> {
        let delimiter = self.delimiter.clone();
        let separator = self.separator.clone();
        self.copy_until(&delimiter, &mut std::io::sink(), u64::MAX, "opening boundary not found")?;

        loop {
            self.fill_to(2)?;
            if self.buf.starts_with(b"--") {
                break;
            }
            if !self.buf.starts_with(b"\r\n") {
                return Err(malformed("boundary not followed by CRLF"));
            }
            self.buf.drain(..2);

            let raw = self.read_part_headers()?;
            let part = PartHeaders::parse(&String::from_utf8_lossy(&raw));
            if part.name.as_deref() == Some(field) {
                return Ok(PartHead {
                    filename: part.filename.unwrap_or_default(),
                    content_type: part.content_type.unwrap_or_default(),
                });
            }
            self.copy_until(&separator, &mut std::io::sink(), u64::MAX, "closing boundary not found")?;
        }

        Err(VisionError::invalid_input(format!(
            "multipart field '{}' missing",
            field
        )))
    }

    /// Copy the body of the part returned by `find_part` into `sink`,
    /// stopping before more than `limit` bytes would be written.
    pub fn copy_part<W: Write>(&mut self, sink: &mut W, limit: u64) -> VisionResult<PartCopy> {
        let separator = self.separator.clone();
        self.copy_until(&separator, sink, limit, "closing boundary not found")
    }

    /// Write everything before `needle` to `sink` and consume the needle.
    /// The last `needle.len() - 1` buffered bytes are held back until more
    /// input shows whether they start a needle.
    fn copy_until<W: Write>(
        &mut self,
        needle: &[u8],
        sink: &mut W,
        limit: u64,
        missing: &str,
    ) -> VisionResult<PartCopy> {
        let mut written = 0u64;
        loop {
            let found = find(&self.buf, needle, 0);
            let ready = found.unwrap_or_else(|| self.buf.len().saturating_sub(needle.len() - 1));
            if ready > 0 {
                written += ready as u64;
                if written > limit {
                    return Ok(PartCopy::OverLimit);
                }
                sink.write_all(&self.buf[..ready])?;
                self.buf.drain(..ready);
            }
            if found.is_some() {
                self.buf.drain(..needle.len());
                return Ok(PartCopy::Complete(written));
            }
            if self.fill()? == 0 {
                return Err(malformed(missing));
            }
        }
    }

    fn read_part_headers(&mut self) -> VisionResult<Vec<u8>> {
        loop {
            if let Some(at) = find(&self.buf, b"\r\n\r\n", 0) {
                let raw = self.buf.drain(..at).collect();
                self.buf.drain(..4);
                return Ok(raw);
            }
            if self.buf.len() > MAX_PART_HEADER_BYTES {
                return Err(malformed("part headers too large"));
            }
            if self.fill()? == 0 {
                return Err(malformed("part headers not terminated"));
            }
        }
    }

    fn fill_to(&mut self, len: usize) -> VisionResult<()> {
        while self.buf.len() < len {
            if self.fill()? == 0 {
                return Err(malformed("body ended inside a boundary"));
            }
        }
        Ok(())
    }

    fn fill(&mut self) -> VisionResult<usize> {
        let n = self.inner.read(&mut self.scratch)?;
        self.buf.extend_from_slice(&self.scratch[..n]);
        Ok(n)
    }
}

#[derive(Default)]
struct PartHeaders {
    name: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,
}

impl PartHeaders {
    fn parse(raw: &str) -> Self {
        let mut out = Self::default();
        for line in raw.split("\r\n") {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            if key.eq_ignore_ascii_case("content-disposition") {
                for param in value.split(';').skip(1) {
                    if let Some((k, v)) = param.split_once('=') {
                        let v = unquote(v.trim()).to_string();
                        match k.trim().to_ascii_lowercase().as_str() {
                            "name" => out.name = Some(v),
                            "filename" => out.filename = Some(v),
                            _ => {}
                        }
                    }
                }
            } else if key.eq_ignore_ascii_case("content-type") {
                let media = value.split(';').next().unwrap_or_default();
                out.content_type = Some(media.trim().to_ascii_lowercase());
            }
        }
        out
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|at| at + from)
}

fn malformed(what: &str) -> VisionError {
    VisionError::invalid_input(format!("malformed multipart body: {}", what))
}
