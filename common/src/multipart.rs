//! Streaming extraction of the first part of a `multipart/form-data` body.
//!
//! The upload form carries exactly one file field; its payload is handed to
//! the sink as it arrives and never buffered whole.

use crate::error::UpdateError;

const MAX_HEADER_BYTES: usize = 8 * 1024;

pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let media_type = params.next()?.trim();
    if !media_type.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }

    params.find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Preamble,
    Headers,
    Body,
    Done,
}

#[derive(Debug)]
pub struct MultipartFilter {
    delimiter: Vec<u8>,
    stage: Stage,
    pending: Vec<u8>,
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

impl MultipartFilter {
    pub fn new(boundary: &str) -> Self {
        let mut delimiter = b"\r\n--".to_vec();
        delimiter.extend_from_slice(boundary.as_bytes());
        Self {
            delimiter,
            stage: Stage::Preamble,
            // The opening boundary is not preceded by CRLF on the wire.
            pending: b"\r\n".to_vec(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    pub fn feed<F>(&mut self, input: &[u8], mut sink: F) -> Result<(), UpdateError>
    where
        F: FnMut(&[u8]) -> Result<(), UpdateError>,
    {
        if self.stage == Stage::Done {
            return Ok(());
        }
        self.pending.extend_from_slice(input);

        loop {
            match self.stage {
                Stage::Preamble => match find(&self.pending, &self.delimiter) {
                    Some(at) => {
                        self.pending.drain(..at + self.delimiter.len());
                        self.stage = Stage::Headers;
                    }
                    None => {
                        if self.pending.len() > MAX_HEADER_BYTES {
                            return Err(UpdateError::Multipart("no opening boundary"));
                        }
                        return Ok(());
                    }
                },
                Stage::Headers => {
                    if self.pending.len() < 2 {
                        return Ok(());
                    }
                    if self.pending.starts_with(b"--") {
                        return Err(UpdateError::Multipart("upload has no parts"));
                    }
                    match find(&self.pending, b"\r\n\r\n") {
                        Some(at) => {
                            self.pending.drain(..at + 4);
                            self.stage = Stage::Body;
                        }
                        None => {
                            if self.pending.len() > MAX_HEADER_BYTES {
                                return Err(UpdateError::Multipart("part headers too large"));
                            }
                            return Ok(());
                        }
                    }
                }
                Stage::Body => {
                    if let Some(at) = find(&self.pending, &self.delimiter) {
                        if at > 0 {
                            sink(&self.pending[..at])?;
                        }
                        self.pending.clear();
                        self.stage = Stage::Done;
                        return Ok(());
                    }

                    // Hold back enough bytes to recognise a delimiter split
                    // across reads.
                    let keep = self.delimiter.len() - 1;
                    if self.pending.len() > keep {
                        let emit = self.pending.len() - keep;
                        sink(&self.pending[..emit])?;
                        self.pending.drain(..emit);
                    }
                    return Ok(());
                }
                Stage::Done => {
                    self.pending.clear();
                    return Ok(());
                }
            }
        }
    }

    pub fn finish(self) -> Result<(), UpdateError> {
        match self.stage {
            Stage::Done => Ok(()),
            Stage::Body => Err(UpdateError::Multipart("upload ended before closing boundary")),
            Stage::Preamble | Stage::Headers => Err(UpdateError::Multipart("upload has no file part")),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const BOUNDARY: &str = "----formBoundary7MA4YWxk";

    fn body(payload: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"update\"; filename=\"firmware.bin\"\r\n",
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(payload);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn extract(body: &[u8], chunk: usize) -> Result<Vec<u8>, UpdateError> {
        let mut filter = MultipartFilter::new(BOUNDARY);
        let mut out = Vec::new();
        for piece in body.chunks(chunk) {
            filter.feed(piece, |bytes| {
                out.extend_from_slice(bytes);
                Ok(())
            })?;
        }
        filter.finish()?;
        Ok(out)
    }

    #[test]
    fn extracts_payload_regardless_of_chunking() {
        let payload: Vec<u8> = (0..5_000_u32).map(|i| (i % 251) as u8).collect();
        let body = body(&payload);

        for chunk in [1, 7, 64, 4_096, body.len()] {
            assert_eq!(extract(&body, chunk).unwrap(), payload, "chunk size {chunk}");
        }
    }

    #[test]
    fn payload_resembling_a_delimiter_is_kept() {
        let payload = b"abc\r\n--not-the-boundary\r\n--";
        assert_eq!(extract(&body(payload), 3).unwrap(), payload.to_vec());
    }

    #[test]
    fn missing_closing_boundary_is_an_error() {
        let mut body = body(b"firmware");
        body.truncate(body.len() - BOUNDARY.len() - 8);

        assert_eq!(
            extract(&body, 16),
            Err(UpdateError::Multipart("upload ended before closing boundary"))
        );
    }

    #[test]
    fn body_without_parts_is_rejected() {
        let body = format!("--{BOUNDARY}--\r\n");
        assert_eq!(
            extract(body.as_bytes(), 5),
            Err(UpdateError::Multipart("upload has no parts"))
        );
    }

    #[test]
    fn parses_boundary_parameter() {
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=abc123").as_deref(),
            Some("abc123")
        );
        assert_eq!(
            boundary_from_content_type("Multipart/Form-Data; charset=utf-8; Boundary=\"q x\"")
                .as_deref(),
            Some("q x")
        );
        assert_eq!(boundary_from_content_type("application/octet-stream"), None);
        assert_eq!(boundary_from_content_type("multipart/form-data; boundary="), None);
    }
}
