//! Tor Control Port client
//!
//! Communicates with the local Tor daemon via the control protocol.
//! A [`TorController`] is one connection; authentication order lives in
//! [`super::client::TorControlClient`].

use crate::error::{AuthError, ControlError, SignalError};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Complete reply to one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Status code of the final line
    pub code: u16,
    /// Text of every reply line, data block lines included, status prefix stripped
    pub lines: Vec<String>,
}

impl Reply {
    /// Value of a `key=value` line (GETINFO style)
    pub fn value(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| {
            line.strip_prefix(key)
                .and_then(|rest| rest.strip_prefix('='))
        })
    }
}

/// Position of a line inside a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineKind {
    /// `NNN-text`
    Mid,
    /// `NNN+text`, followed by a data block ending in `.`
    Data,
    /// `NNN text`
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReplyLine<'a> {
    pub code: u16,
    pub kind: LineKind,
    pub text: &'a str,
}

/// Parse a single reply line (without CRLF)
pub(crate) fn parse_reply_line(line: &str) -> Result<ReplyLine<'_>, ControlError> {
    if line.len() < 4 || !line.is_char_boundary(3) {
        return Err(ControlError::Malformed(line.to_string()));
    }
    let (code, rest) = line.split_at(3);
    if !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(ControlError::Malformed(line.to_string()));
    }
    let code: u16 = code
        .parse()
        .map_err(|_| ControlError::Malformed(line.to_string()))?;

    let kind = match rest.as_bytes()[0] {
        b'-' => LineKind::Mid,
        b'+' => LineKind::Data,
        b' ' => LineKind::End,
        _ => return Err(ControlError::Malformed(line.to_string())),
    };

    Ok(ReplyLine {
        code,
        kind,
        text: &rest[1..],
    })
}

/// Parsed PROTOCOLINFO reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolInfo {
    /// Offered auth methods, upper case (COOKIE, SAFECOOKIE, HASHEDPASSWORD, NULL)
    pub auth_methods: Vec<String>,
    pub cookie_file: Option<PathBuf>,
    pub tor_version: Option<String>,
}

impl ProtocolInfo {
    pub fn parse(reply: &Reply) -> Self {
        let mut info = ProtocolInfo::default();

        for line in &reply.lines {
            if let Some(rest) = line.strip_prefix("AUTH ") {
                if let Some(methods) = field(rest, "METHODS") {
                    info.auth_methods = methods
                        .split(',')
                        .filter(|m| !m.is_empty())
                        .map(|m| m.to_ascii_uppercase())
                        .collect();
                }
                info.cookie_file = field(rest, "COOKIEFILE").map(PathBuf::from);
            } else if let Some(rest) = line.strip_prefix("VERSION ") {
                info.tor_version = field(rest, "Tor");
            }
        }

        info
    }

    /// Method is offered, or Tor did not tell us anything
    pub fn allows(&self, method: &str) -> bool {
        self.auth_methods.is_empty() || self.auth_methods.iter().any(|m| m == method)
    }
}

/// Extract `KEY=value` or `KEY="quoted value"` from a space separated line
fn field(line: &str, key: &str) -> Option<String> {
    let start = line.find(&format!("{}=", key))? + key.len() + 1;
    let rest = &line[start..];

    if let Some(quoted) = rest.strip_prefix('"') {
        let mut value = String::new();
        let mut chars = quoted.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => value.push(chars.next()?),
                '"' => return Some(value),
                other => value.push(other),
            }
        }
        None
    } else {
        Some(rest.split_whitespace().next().unwrap_or("").to_string())
    }
}

/// Connection to Tor control port
pub struct TorController {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    timeout: Duration,
    authenticated: bool,
    last_signal_at: Option<SystemTime>,
}

impl TorController {
    /// Open a TCP connection to the control port (unauthenticated)
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self, AuthError> {
        debug!("Connecting to Tor control port: {}", addr);

        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(AuthError::Unreachable {
                    addr: addr.to_string(),
                    source,
                })
            },
            Err(_) => {
                return Err(AuthError::Unreachable {
                    addr: addr.to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "connect timed out",
                    ),
                })
            },
        };

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            timeout,
            authenticated: false,
            last_signal_at: None,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn last_signal_at(&self) -> Option<SystemTime> {
        self.last_signal_at
    }

    /// Send a command and read the complete reply
    ///
    /// A 4xx/5xx final line becomes [`ControlError::Status`].
    pub async fn command(&mut self, cmd: &str) -> Result<Reply, ControlError> {
        let verb = cmd.split_whitespace().next().unwrap_or("");
        // Never log credentials
        if verb == "AUTHENTICATE" {
            trace!("Sending Tor command: AUTHENTICATE <redacted>");
        } else {
            trace!("Sending Tor command: {}", cmd);
        }

        self.writer.write_all(cmd.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;

        self.read_reply().await
    }

    async fn read_line(&mut self) -> Result<String, ControlError> {
        let mut line = String::new();
        let bytes_read = tokio::time::timeout(self.timeout, self.reader.read_line(&mut line))
            .await
            .map_err(|_| ControlError::Timeout)??;

        if bytes_read == 0 {
            return Err(ControlError::Closed);
        }

        let trimmed = line.trim_end_matches(['\r', '\n']).to_string();
        trace!("Read line: {:?}", trimmed);
        Ok(trimmed)
    }

    async fn read_reply(&mut self) -> Result<Reply, ControlError> {
        let mut lines = Vec::new();

        loop {
            let line = self.read_line().await?;
            let parsed = parse_reply_line(&line)?;

            // Asynchronous events are never subscribed to; skip strays
            if parsed.code == 650 {
                continue;
            }

            match parsed.kind {
                LineKind::Mid => lines.push(parsed.text.to_string()),
                LineKind::Data => {
                    lines.push(parsed.text.to_string());
                    loop {
                        let data = self.read_line().await?;
                        if data == "." {
                            break;
                        }
                        // Leading dots are escaped by doubling
                        let data = data.strip_prefix('.').unwrap_or(&data);
                        lines.push(data.to_string());
                    }
                },
                LineKind::End => {
                    let code = parsed.code;
                    if code >= 400 {
                        return Err(ControlError::Status {
                            code,
                            message: parsed.text.to_string(),
                        });
                    }
                    lines.push(parsed.text.to_string());
                    return Ok(Reply { code, lines });
                },
            }
        }
    }

    /// Query supported auth methods and cookie location (allowed before authentication)
    pub async fn protocol_info(&mut self) -> Result<ProtocolInfo, ControlError> {
        let reply = self.command("PROTOCOLINFO 1").await?;
        Ok(ProtocolInfo::parse(&reply))
    }

    /// Authenticate with raw credential bytes (cookie contents or password), or none
    pub async fn authenticate(&mut self, credential: Option<&[u8]>) -> Result<(), ControlError> {
        let cmd = match credential {
            Some(bytes) => format!("AUTHENTICATE {}", data_encoding::HEXLOWER.encode(bytes)),
            None => "AUTHENTICATE".to_string(),
        };
        self.command(&cmd).await?;
        self.authenticated = true;
        Ok(())
    }

    /// Ask Tor to switch to clean circuits
    pub async fn signal_new_identity(&mut self) -> Result<(), SignalError> {
        self.command("SIGNAL NEWNYM").await?;
        self.last_signal_at = Some(SystemTime::now());
        debug!("NEWNYM acknowledged");
        Ok(())
    }

    /// Get information about the Tor daemon
    pub async fn get_info(&mut self, keyword: &str) -> Result<String, ControlError> {
        let reply = self.command(&format!("GETINFO {}", keyword)).await?;
        reply
            .value(keyword)
            .map(str::to_string)
            .ok_or_else(|| ControlError::Malformed(format!("GETINFO {} missing value", keyword)))
    }

    /// Whether Tor currently has a usable circuit
    pub async fn circuit_established(&mut self) -> Result<bool, ControlError> {
        Ok(self.get_info("status/circuit-established").await?.trim() == "1")
    }

    /// Bootstrap percentage (0-100)
    pub async fn bootstrap_progress(&mut self) -> Result<u8, ControlError> {
        let phase = self.get_info("status/bootstrap-phase").await?;
        field(&phase, "PROGRESS")
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| ControlError::Malformed(phase))
    }

    pub async fn version(&mut self) -> Result<String, ControlError> {
        self.get_info("version").await
    }

    /// Politely end the session; errors are irrelevant at this point
    pub async fn close(&mut self) {
        if let Err(e) = self.command("QUIT").await {
            trace!("QUIT failed: {}", e);
        }
        let _ = self.writer.shutdown().await;
        self.authenticated = false;
    }
}
