//! Integration tests for Tor control port communication
//!
//! Runs the real client against an in-process fake control port that
//! speaks enough of the protocol for authentication and NEWNYM.

use data_encoding::HEXLOWER;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tornet::config::TorConfig;
use tornet::error::{AuthError, SignalError};
use tornet::rotation::{ControlChannel, ControlSession};
use tornet::tor::TorControlClient;

/// Behaviour of the fake control port
#[derive(Clone)]
struct FakeTor {
    methods: &'static str,
    cookie_file: Option<PathBuf>,
    /// Credential accepted by AUTHENTICATE (raw bytes before hex encoding)
    secret: Vec<u8>,
    /// Never answer SIGNAL NEWNYM
    ignore_signal: bool,
    newnym_count: Arc<AtomicUsize>,
    connections: Arc<AtomicUsize>,
}

impl FakeTor {
    fn new(methods: &'static str, secret: &[u8]) -> Self {
        Self {
            methods,
            cookie_file: None,
            secret: secret.to_vec(),
            ignore_signal: false,
            newnym_count: Arc::new(AtomicUsize::new(0)),
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Start serving; returns the port
    async fn spawn(self) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                self.connections.fetch_add(1, Ordering::SeqCst);
                let fake = self.clone();
                tokio::spawn(async move { fake.serve(stream).await });
            }
        });

        port
    }

    async fn serve(self, stream: TcpStream) {
        let (read_half, mut writer) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let mut authenticated = false;

        while let Ok(Some(line)) = lines.next_line().await {
            let reply = match line.split_whitespace().collect::<Vec<_>>().as_slice() {
                ["PROTOCOLINFO", ..] => {
                    let cookie = self
                        .cookie_file
                        .as_ref()
                        .map(|p| format!(" COOKIEFILE=\"{}\"", p.display()))
                        .unwrap_or_default();
                    format!(
                        "250-PROTOCOLINFO 1\r\n250-AUTH METHODS={}{}\r\n250-VERSION Tor=\"0.4.8.9\"\r\n250 OK\r\n",
                        self.methods, cookie
                    )
                },
                ["AUTHENTICATE", credential] => {
                    if *credential == HEXLOWER.encode(&self.secret) {
                        authenticated = true;
                        "250 OK\r\n".to_string()
                    } else {
                        let _ = writer
                            .write_all(b"515 Authentication failed: Password did not match\r\n")
                            .await;
                        return;
                    }
                },
                ["AUTHENTICATE"] if self.methods.contains("NULL") => {
                    authenticated = true;
                    "250 OK\r\n".to_string()
                },
                _ if !authenticated => {
                    let _ = writer.write_all(b"514 Authentication required.\r\n").await;
                    return;
                },
                ["SIGNAL", "NEWNYM"] => {
                    if self.ignore_signal {
                        continue;
                    }
                    self.newnym_count.fetch_add(1, Ordering::SeqCst);
                    "250 OK\r\n".to_string()
                },
                ["GETINFO", "status/circuit-established"] => {
                    "250-status/circuit-established=1\r\n250 OK\r\n".to_string()
                },
                ["GETINFO", "status/bootstrap-phase"] => {
                    "250-status/bootstrap-phase=NOTICE BOOTSTRAP PROGRESS=100 TAG=done SUMMARY=\"Done\"\r\n250 OK\r\n"
                        .to_string()
                },
                ["GETINFO", "version"] => "250-version=0.4.8.9\r\n250 OK\r\n".to_string(),
                ["QUIT"] => {
                    let _ = writer.write_all(b"250 closing connection\r\n").await;
                    return;
                },
                _ => "510 Unrecognized command\r\n".to_string(),
            };

            if writer.write_all(reply.as_bytes()).await.is_err() {
                return;
            }
        }
    }
}

fn tor_config(port: u16) -> TorConfig {
    TorConfig {
        control_port: port,
        command_timeout_secs: 2,
        ..TorConfig::default()
    }
}

#[tokio::test]
async fn test_password_auth_and_newnym() {
    let fake = FakeTor::new("HASHEDPASSWORD", b"hunter2");
    let newnyms = Arc::clone(&fake.newnym_count);
    let port = fake.spawn().await;

    let mut client = TorControlClient::new(TorConfig {
        control_password: Some("hunter2".to_string()),
        ..tor_config(port)
    });

    let mut session = client.authenticate().await.unwrap();
    assert!(session.is_authenticated());

    ControlSession::signal_new_identity(&mut session).await.unwrap();
    ControlSession::signal_new_identity(&mut session).await.unwrap();
    assert!(session.last_signal_at().is_some());
    assert!(ControlSession::circuit_established(&mut session).await.unwrap());
    assert_eq!(newnyms.load(Ordering::SeqCst), 2);

    ControlSession::close(&mut session).await;
    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let port = FakeTor::new("HASHEDPASSWORD", b"correct").spawn().await;

    let client = TorControlClient::new(TorConfig {
        control_password: Some("wrong".to_string()),
        ..tor_config(port)
    });

    match client.connect().await {
        Err(AuthError::Rejected { method, message }) => {
            assert_eq!(method, "password");
            assert!(message.starts_with("515"));
        },
        other => panic!("expected rejection, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_cookie_auth_from_protocolinfo() {
    let cookie = [0x5a_u8; 32];
    let mut cookie_file = tempfile::NamedTempFile::new().unwrap();
    cookie_file.write_all(&cookie).unwrap();

    let mut fake = FakeTor::new("COOKIE,SAFECOOKIE", &cookie);
    fake.cookie_file = Some(cookie_file.path().to_path_buf());
    let port = fake.spawn().await;

    let client = TorControlClient::new(tor_config(port));
    let mut tor = client.connect().await.unwrap();

    assert_eq!(tor.version().await.unwrap(), "0.4.8.9");
    assert_eq!(tor.bootstrap_progress().await.unwrap(), 100);
    tor.close().await;
}

#[tokio::test]
async fn test_rejected_cookie_falls_through_to_password() {
    let mut stale_cookie = tempfile::NamedTempFile::new().unwrap();
    stale_cookie.write_all(&[0x00; 32]).unwrap();

    let mut fake = FakeTor::new("COOKIE,HASHEDPASSWORD", b"hunter2");
    fake.cookie_file = Some(stale_cookie.path().to_path_buf());
    let connections = Arc::clone(&fake.connections);
    let port = fake.spawn().await;

    let client = TorControlClient::new(TorConfig {
        control_password: Some("hunter2".to_string()),
        ..tor_config(port)
    });

    let mut tor = client.connect().await.unwrap();
    assert!(tor.circuit_established().await.unwrap());
    // Tor hangs up after a failed AUTHENTICATE, so the password needs a new connection
    assert_eq!(connections.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_null_auth_when_offered() {
    let port = FakeTor::new("NULL", b"").spawn().await;

    let client = TorControlClient::new(tor_config(port));
    assert!(client.connect().await.is_ok());
}

#[tokio::test]
async fn test_no_usable_method() {
    let port = FakeTor::new("HASHEDPASSWORD", b"secret").spawn().await;

    let client = TorControlClient::new(tor_config(port));
    assert!(matches!(
        client.connect().await,
        Err(AuthError::NoUsableMethod)
    ));
}

#[tokio::test]
async fn test_unreachable_control_port() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = TorControlClient::new(tor_config(port));
    assert!(matches!(
        client.connect().await,
        Err(AuthError::Unreachable { .. })
    ));
}

#[tokio::test]
async fn test_unacknowledged_signal_times_out() {
    let mut fake = FakeTor::new("NULL", b"");
    fake.ignore_signal = true;
    let port = fake.spawn().await;

    let client = TorControlClient::new(TorConfig {
        command_timeout_secs: 1,
        ..tor_config(port)
    });
    let mut tor = client.connect().await.unwrap();

    assert!(matches!(
        tor.signal_new_identity().await,
        Err(SignalError::Timeout)
    ));
}
