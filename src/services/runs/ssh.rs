use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use ssh2::{ExtendedData, Session};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::session::{ConnectionCloser, RemoteShell, ShellConnection};
use crate::error::SessionError;
use crate::machines::{Machine, MachineAuth};

const READ_BUFFER_BYTES: usize = 16 * 1024;

/// libssh2-backed transport. Blocking; the session layer runs it on the blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ssh2Shell;

struct Ssh2Connection {
    session: Session,
    tcp: TcpStream,
    fingerprint: Option<String>,
}

pub(super) fn fingerprint_sha256(key: &[u8]) -> String {
    let digest = Sha256::digest(key);
    let b64 = STANDARD_NO_PAD.encode(digest);
    format!("SHA256:{b64}")
}

fn resolve_socket_addrs(host: &str, port: u16) -> Result<Vec<SocketAddr>, SessionError> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|err| SessionError::Network(format!("Failed to resolve {host}:{port}: {err}")))?
        .collect();
    if addrs.is_empty() {
        return Err(SessionError::Network(format!(
            "Unable to resolve {host}:{port}"
        )));
    }
    Ok(addrs)
}

fn tcp_connect_any(addrs: &[SocketAddr], timeout: Duration) -> Result<TcpStream, SessionError> {
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(SessionError::Network(match last_err {
        Some(err) => format!("Failed to open TCP connection: {err}"),
        None => "Failed to open TCP connection".to_string(),
    }))
}

fn handshake_ssh(machine: &Machine, timeout: Duration) -> Result<(Session, TcpStream), SessionError> {
    let addrs = resolve_socket_addrs(&machine.host, machine.port)?;
    let tcp = tcp_connect_any(&addrs, timeout)?;
    tcp.set_read_timeout(Some(timeout)).ok();
    tcp.set_write_timeout(Some(timeout)).ok();
    let closer = tcp
        .try_clone()
        .map_err(|err| SessionError::Network(format!("Failed to clone TCP handle: {err}")))?;

    let mut session = Session::new()
        .map_err(|err| SessionError::Network(format!("Failed to create SSH session: {err}")))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(duration_millis(timeout));
    session
        .handshake()
        .map_err(|err| SessionError::Network(format!("SSH handshake failed: {err}")))?;
    Ok((session, closer))
}

fn authenticate(session: &Session, machine: &Machine) -> Result<(), SessionError> {
    let auth_error = |message: String| SessionError::Auth {
        host: machine.host.clone(),
        username: machine.username.clone(),
        message,
    };
    let result = match &machine.auth {
        MachineAuth::Password { password } => {
            if password.is_empty() {
                return Err(auth_error("password is empty".to_string()));
            }
            session.userauth_password(&machine.username, password)
        }
        MachineAuth::PrivateKeyPath { path, passphrase } => {
            session.userauth_pubkey_file(&machine.username, None, path, passphrase.as_deref())
        }
        MachineAuth::PrivateKey { pem, passphrase } => {
            let pem = pem.trim();
            if pem.is_empty() {
                return Err(auth_error("private key is empty".to_string()));
            }
            session.userauth_pubkey_memory(&machine.username, None, pem, passphrase.as_deref())
        }
    };
    result.map_err(|err| auth_error(err.to_string()))?;
    if !session.authenticated() {
        return Err(auth_error("server rejected credentials".to_string()));
    }
    Ok(())
}

fn network(what: &str, err: impl std::fmt::Display) -> SessionError {
    SessionError::Network(format!("{what}: {err}"))
}

fn duration_millis(timeout: Duration) -> u32 {
    timeout.as_millis().min(u128::from(u32::MAX)) as u32
}

impl RemoteShell for Ssh2Shell {
    fn connect(
        &self,
        machine: &Machine,
        timeout: Duration,
    ) -> Result<Box<dyn ShellConnection>, SessionError> {
        let (session, tcp) = handshake_ssh(machine, timeout)?;
        let fingerprint = session.host_key().map(|(key, _)| fingerprint_sha256(key));
        authenticate(&session, machine)?;
        // Commands are bounded by the session layer's timeout, not by socket reads.
        session.set_timeout(0);
        tcp.set_read_timeout(None).ok();
        Ok(Box::new(Ssh2Connection {
            session,
            tcp,
            fingerprint,
        }))
    }
}

impl ShellConnection for Ssh2Connection {
    fn exec(
        &mut self,
        command: &str,
        stdin: Option<&[u8]>,
        sink: &mut dyn FnMut(&[u8]),
    ) -> Result<i32, SessionError> {
        let mut channel = self
            .session
            .channel_session()
            .map_err(|err| network("Failed to open SSH channel", err))?;
        channel
            .handle_extended_data(ExtendedData::Merge)
            .map_err(|err| network("Failed to merge stderr", err))?;
        channel
            .exec(command)
            .map_err(|err| network("Failed to exec command", err))?;

        if let Some(payload) = stdin {
            channel
                .write_all(payload)
                .map_err(|err| network("Failed to stream stdin", err))?;
        }
        channel
            .send_eof()
            .map_err(|err| network("Failed to close stdin", err))?;

        let mut buf = vec![0u8; READ_BUFFER_BYTES];
        loop {
            match channel.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => sink(&buf[..n]),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(network("Failed to read command output", err)),
            }
        }
        channel.wait_close().ok();
        Ok(channel.exit_status().unwrap_or(-1))
    }

    fn closer(&self) -> ConnectionCloser {
        match self.tcp.try_clone() {
            Ok(tcp) => ConnectionCloser::new(move || {
                tcp.shutdown(Shutdown::Both).ok();
            }),
            Err(err) => {
                tracing::warn!(error = %err, "failed to clone TCP handle; close is a no-op");
                ConnectionCloser::new(|| {})
            }
        }
    }

    fn host_key_fingerprint(&self) -> Option<String> {
        self.fingerprint.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_uses_unpadded_base64_sha256() {
        let fingerprint = fingerprint_sha256(b"host-key");
        assert!(fingerprint.starts_with("SHA256:"));
        assert!(!fingerprint.ends_with('='));
        assert_eq!(fingerprint.len(), "SHA256:".len() + 43);
    }

    #[test]
    fn refused_port_is_a_network_error() {
        let listener = match std::net::TcpListener::bind("127.0.0.1:0") {
            Ok(listener) => listener,
            // Sandbox environments can block binding attempts.
            Err(_) => return,
        };
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let machine = crate::test_support::test_machine("m1", "127.0.0.1");
        let machine = Machine {
            port: addr.port(),
            ..machine
        };
        let err = Ssh2Shell
            .connect(&machine, Duration::from_secs(2))
            .err()
            .expect("connect should fail");
        assert!(matches!(err, SessionError::Network(_)));
    }
}
