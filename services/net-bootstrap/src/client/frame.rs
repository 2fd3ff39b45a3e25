//! STOMP 1.2 frame codec.
//!
//! A frame is `COMMAND\n` + `name:value\n` headers + `\n` + body + NUL.
//! Bodies with a `content-length` header are read by length, others up to the
//! first NUL. Blank lines between frames are heart-beats and are skipped.
//! Header escaping applies to every frame except CONNECT and CONNECTED.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::BootstrapError;

/// Largest body accepted from the service.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Frame {
    /// Create a frame with no headers and an empty body.
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Append a header.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Set the body, adding a matching `content-length` header.
    pub fn body(mut self, body: Vec<u8>) -> Self {
        let len = body.len().to_string();
        self.body = body;
        self.header("content-length", &len)
    }

    /// First value of a header. Repeated headers keep the first occurrence.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Serialize the frame to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(self.command.as_bytes());
        out.push(b'\n');
        let escaped = escapes_headers(&self.command);
        for (name, value) in &self.headers {
            if escaped {
                out.extend_from_slice(escape(name).as_bytes());
                out.push(b':');
                out.extend_from_slice(escape(value).as_bytes());
            } else {
                out.extend_from_slice(name.as_bytes());
                out.push(b':');
                out.extend_from_slice(value.as_bytes());
            }
            out.push(b'\n');
        }
        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);
        out
    }
}

/// Read one frame. Returns `None` on a clean EOF between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, BootstrapError>
where
    R: AsyncBufRead + Unpin,
{
    let command = loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.map_err(read_error)? == 0 {
            return Ok(None);
        }
        let line = strip_eol(&line);
        if !line.is_empty() {
            break line.to_string();
        }
    };

    let escaped = escapes_headers(&command);
    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.map_err(read_error)? == 0 {
            return Err(truncated("headers"));
        }
        let line = strip_eol(&line);
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(BootstrapError::Protocol(format!(
                "malformed STOMP header: {:?}",
                line
            )));
        };
        if escaped {
            headers.push((unescape(name)?, unescape(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let mut frame = Frame {
        command,
        headers,
        body: Vec::new(),
    };

    match frame.get("content-length") {
        Some(len) => {
            let len: usize = len.trim().parse().map_err(|_| {
                BootstrapError::Protocol(format!("invalid content-length: {:?}", len))
            })?;
            if len > MAX_BODY_BYTES {
                return Err(BootstrapError::Protocol(format!(
                    "frame body of {} bytes exceeds limit",
                    len
                )));
            }
            let mut body = vec![0u8; len];
            reader.read_exact(&mut body).await.map_err(read_error)?;
            let mut nul = [0u8; 1];
            reader.read_exact(&mut nul).await.map_err(read_error)?;
            if nul[0] != 0 {
                return Err(BootstrapError::Protocol(
                    "frame body not terminated by NUL".to_string(),
                ));
            }
            frame.body = body;
        }
        None => {
            let mut body = Vec::new();
            if reader.read_until(0, &mut body).await.map_err(read_error)? == 0 || body.last() != Some(&0) {
                return Err(truncated("body"));
            }
            body.pop();
            frame.body = body;
        }
    }

    Ok(Some(frame))
}

fn escapes_headers(command: &str) -> bool {
    !matches!(command, "CONNECT" | "CONNECTED")
}

/// Undecodable bytes are the peer's fault; anything else is the transport's.
fn read_error(e: io::Error) -> BootstrapError {
    match e.kind() {
        io::ErrorKind::InvalidData => {
            BootstrapError::Protocol(format!("undecodable STOMP frame: {}", e))
        }
        // A short body read is a truncated frame.
        io::ErrorKind::UnexpectedEof => truncated("body"),
        _ => BootstrapError::from(e),
    }
}

fn strip_eol(line: &str) -> &str {
    line.strip_suffix('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .unwrap_or(line)
}

fn truncated(part: &str) -> BootstrapError {
    BootstrapError::Protocol(format!("connection closed inside STOMP frame {}", part))
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(s: &str) -> Result<String, BootstrapError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(BootstrapError::Protocol(format!(
                    "invalid STOMP escape: \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}
