//! Response sink: where a rendered page goes.
//!
//! The renderer streams: headers first (length unknown), then body bytes in
//! document order.  Once an error response has been sent the sink is no
//! longer valid and nothing else should be written to it.

use std::io;

/// Ordered byte-stream writer with header control.
pub trait ResponseSink {
    /// Start the response.  `None` declares the body length unknown.
    fn write_headers(&mut self, status: u16, content_length: Option<u64>) -> io::Result<()>;

    fn write_header(&mut self, name: &str, value: &str) -> io::Result<()>;

    fn end_headers(&mut self) -> io::Result<()>;

    /// Write body bytes; may accept fewer than offered.
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// `false` once an error response was sent or the peer went away.
    fn is_valid(&self) -> bool;

    /// Send an error response and invalidate the sink.
    fn error(&mut self, status: u16, message: &str);

    /// Complete the response.
    fn finish(&mut self);

    /// Write all of `buf`, retrying short writes.
    fn write_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write_bytes(buf)? {
                0 => {
                    let kind = io::ErrorKind::WriteZero;
                    return Err(io::Error::new(kind, "response sink accepted no bytes"));
                }
                n => buf = &buf[n..],
            }
        }
        Ok(())
    }
}

/// Escape text for inclusion in an HTML body.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

// ── BufferSink ────────────────────────────────────────────────────────────────

/// In-memory sink recording everything a response would carry.
#[derive(Debug)]
pub struct BufferSink {
    status: Option<u16>,
    content_length: Option<u64>,
    headers: Vec<(String, String)>,
    headers_done: bool,
    body: Vec<u8>,
    valid: bool,
    finished: bool,
    error: Option<(u16, String)>,
    /// Body bytes accepted before writes start failing (simulated disconnect).
    write_limit: Option<usize>,
}

impl Default for BufferSink {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferSink {
    pub fn new() -> Self {
        BufferSink {
            status: None,
            content_length: None,
            headers: Vec::new(),
            headers_done: false,
            body: Vec::new(),
            valid: true,
            finished: false,
            error: None,
            write_limit: None,
        }
    }

    /// A sink whose peer disconnects after `limit` body bytes.
    pub fn with_write_limit(limit: usize) -> Self {
        BufferSink {
            write_limit: Some(limit),
            ..Self::new()
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers_done(&self) -> bool {
        self.headers_done
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The error response sent, if any.
    pub fn error_sent(&self) -> Option<(u16, &str)> {
        self.error.as_ref().map(|(s, m)| (*s, m.as_str()))
    }

    fn closed() -> io::Error {
        io::Error::new(io::ErrorKind::BrokenPipe, "response is no longer valid")
    }
}

impl ResponseSink for BufferSink {
    fn write_headers(&mut self, status: u16, content_length: Option<u64>) -> io::Result<()> {
        if !self.valid {
            return Err(Self::closed());
        }
        self.status = Some(status);
        self.content_length = content_length;
        Ok(())
    }

    fn write_header(&mut self, name: &str, value: &str) -> io::Result<()> {
        if !self.valid || self.headers_done {
            return Err(Self::closed());
        }
        self.headers.push((name.to_owned(), value.to_owned()));
        Ok(())
    }

    fn end_headers(&mut self) -> io::Result<()> {
        if !self.valid {
            return Err(Self::closed());
        }
        self.headers_done = true;
        Ok(())
    }

    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.valid {
            return Err(Self::closed());
        }
        let accept = match self.write_limit {
            Some(limit) => buf.len().min(limit.saturating_sub(self.body.len())),
            None => buf.len(),
        };
        if accept == 0 && !buf.is_empty() {
            self.valid = false;
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer disconnected"));
        }
        self.body.extend_from_slice(&buf[..accept]);
        Ok(accept)
    }

    fn is_valid(&self) -> bool {
        self.valid
    }

    fn error(&mut self, status: u16, message: &str) {
        if !self.valid {
            return;
        }
        let escaped = escape_html(message);
        if self.headers_done {
            // Too late for a status line; the message goes into the body.
            self.body.extend_from_slice(format!("<p>{escaped}</p>\n").as_bytes());
        } else {
            self.status = Some(status);
            self.headers.clear();
            self.headers_done = true;
            self.body = format!(
                "<html><head><title>Document Error: {status}</title></head>\r\n\
                 <body><h2>Access Error: {status}</h2>\r\n<p>{escaped}</p></body></html>\r\n"
            )
            .into_bytes();
        }
        self.error = Some((status, message.to_owned()));
        self.valid = false;
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
