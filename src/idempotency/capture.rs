use bytes::{Bytes, BytesMut};
use std::io;
use thiserror::Error;

/// Destination a handler writes its response into.
pub trait ResponseSink: Send {
    fn set_status(&mut self, status_code: u16);
    fn set_header(&mut self, name: &str, value: &str);
    fn write(&mut self, chunk: &[u8]) -> io::Result<()>;
}

/// Response recorded by a [`ResponseCapture`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedResponse {
    pub status_code: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("response body exceeded the capture limit of {limit} bytes")]
    Overflow { limit: usize },
}

/// Write-through sink that forwards every call to the wrapped sink and keeps
/// a copy of the status, content type and body.
///
/// Once the body grows past `limit` the copy is dropped and capture fails,
/// but forwarding continues untouched.
pub struct ResponseCapture<'a, S: ResponseSink + ?Sized> {
    inner: &'a mut S,
    status_code: Option<u16>,
    content_type: Option<String>,
    buffer: BytesMut,
    limit: usize,
    overflowed: bool,
}

impl<'a, S: ResponseSink + ?Sized> ResponseCapture<'a, S> {
    pub fn new(inner: &'a mut S, limit: usize) -> Self {
        Self {
            inner,
            status_code: None,
            content_type: None,
            buffer: BytesMut::new(),
            limit,
            overflowed: false,
        }
    }

    /// Status written so far; handlers that never set one answer 200.
    pub fn status_code(&self) -> u16 {
        self.status_code.unwrap_or(200)
    }

    pub fn is_overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn finish(self) -> Result<CapturedResponse, CaptureError> {
        if self.overflowed {
            return Err(CaptureError::Overflow { limit: self.limit });
        }
        Ok(CapturedResponse {
            status_code: self.status_code.unwrap_or(200),
            content_type: self.content_type,
            body: self.buffer.freeze(),
        })
    }
}

impl<S: ResponseSink + ?Sized> ResponseSink for ResponseCapture<'_, S> {
    fn set_status(&mut self, status_code: u16) {
        self.status_code = Some(status_code);
        self.inner.set_status(status_code);
    }

    fn set_header(&mut self, name: &str, value: &str) {
        if name.eq_ignore_ascii_case("content-type") {
            self.content_type = Some(value.to_string());
        }
        self.inner.set_header(name, value);
    }

    fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.inner.write(chunk)?;

        if !self.overflowed {
            if self.buffer.len() + chunk.len() > self.limit {
                tracing::warn!(
                    limit = self.limit,
                    "Response exceeded capture limit; it will not be cached"
                );
                self.overflowed = true;
                self.buffer = BytesMut::new();
            } else {
                self.buffer.extend_from_slice(chunk);
            }
        }
        Ok(())
    }
}

/// In-memory response destination.
#[derive(Debug, Clone, Default)]
pub struct BufferedResponse {
    status_code: Option<u16>,
    headers: Vec<(String, String)>,
    body: BytesMut,
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// True once anything has been written.
    pub fn is_started(&self) -> bool {
        self.status_code.is_some() || !self.headers.is_empty() || !self.body.is_empty()
    }

    pub fn into_parts(self) -> (u16, Vec<(String, String)>, Bytes) {
        (self.status_code.unwrap_or(200), self.headers, self.body.freeze())
    }
}

impl ResponseSink for BufferedResponse {
    fn set_status(&mut self, status_code: u16) {
        self.status_code = Some(status_code);
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.body.extend_from_slice(chunk);
        Ok(())
    }
}
