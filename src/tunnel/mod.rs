//! SSH local port forwarding
//!
//! A [`Tunnel`] binds `127.0.0.1:0`, lets the OS pick the port, and relays
//! every accepted client to the database host through its own SSH
//! `direct-tcpip` channel. Tunnels belong to exactly one operation: the
//! [`ResolvedEndpoint`] returned by [`TunnelManager::resolve`] owns it, and
//! dropping that value (after success, after an error, or because the
//! awaiting future was cancelled) stops the accept loop, waits for relay
//! threads to finish and releases the port.
//!
//! `ssh2` is blocking, so the accept loop and each relay run on plain
//! threads and the open handshake runs under `spawn_blocking`.

use ssh2::Session;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::TunnelConfig;
use crate::engine::{Endpoint, TcpTarget};
use crate::error::{AskDbError, Result};
use crate::profile::{ConnectionParams, SshTarget};

const IDLE_SLEEP_MS: u64 = 5;
const ACCEPT_RETRY_SLEEP_MS: u64 = 20;
const BUFFER_SIZE: usize = 16 * 1024;

/// Opens a tunnel per operation for ssh profiles
#[derive(Debug, Clone)]
pub struct TunnelManager {
    connect_timeout: Duration,
}

impl TunnelManager {
    #[must_use]
    pub fn new(config: &TunnelConfig) -> Self {
        Self { connect_timeout: Duration::from_secs(config.connect_timeout_secs) }
    }

    /// Endpoint to hand to the engine for `params`
    ///
    /// For tcp profiles this is the stored target. For ssh profiles the SSH
    /// credentials are verified, a tunnel is opened and the endpoint points
    /// at `127.0.0.1:<assigned port>`; keep the returned value alive for as
    /// long as the endpoint is in use.
    pub async fn resolve(&self, params: &ConnectionParams) -> Result<ResolvedEndpoint> {
        let Some(ssh) = params.ssh.clone() else {
            return Ok(ResolvedEndpoint { endpoint: params.direct_endpoint(), tunnel: None });
        };

        let relay = SshRelay {
            ssh,
            remote_host: params.tcp.host.clone(),
            remote_port: params.tcp.port,
            connect_timeout: self.connect_timeout,
        };

        let tunnel = tokio::task::spawn_blocking(move || {
            relay.verify()?;
            Tunnel::open(Arc::new(relay))
        })
        .await
        .map_err(|e| AskDbError::connectivity(format!("SSH tunnel task failed: {e}")))??;

        let endpoint = Endpoint::new(
            params.target.clone(),
            TcpTarget::new("127.0.0.1", tunnel.local_port(), &params.tcp.user, &params.tcp.password),
        );

        Ok(ResolvedEndpoint { endpoint, tunnel: Some(tunnel) })
    }
}

impl Default for TunnelManager {
    fn default() -> Self {
        Self::new(&TunnelConfig::default())
    }
}

/// An engine endpoint plus the tunnel keeping it reachable
#[derive(Debug)]
pub struct ResolvedEndpoint {
    pub endpoint: Endpoint,
    tunnel: Option<Tunnel>,
}

impl ResolvedEndpoint {
    /// Local port of the tunnel, `None` for direct connections
    #[must_use]
    pub fn local_port(&self) -> Option<u16> {
        self.tunnel.as_ref().map(Tunnel::local_port)
    }
}

/// Something able to carry one client connection to the database host
pub(crate) trait Relay: Send + Sync + 'static {
    fn serve(&self, client: TcpStream, shutdown: &AtomicBool) -> Result<()>;
}

/// Running local forwarder; stopped on drop
pub struct Tunnel {
    local_port: u16,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel").field("local_port", &self.local_port).finish_non_exhaustive()
    }
}

impl Tunnel {
    pub(crate) fn open(relay: Arc<dyn Relay>) -> Result<Self> {
        let bind_error = |e: std::io::Error| {
            AskDbError::connectivity(format!("Failed to bind local tunnel port: {e}"))
        };

        let listener = TcpListener::bind("127.0.0.1:0").map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        let local_port = listener.local_addr().map_err(bind_error)?.port();

        let shutdown = Arc::new(AtomicBool::new(false));
        let signal = Arc::clone(&shutdown);

        let worker = thread::Builder::new()
            .name(format!("askdb-tunnel-{local_port}"))
            .spawn(move || accept_loop(listener, relay, signal))
            .map_err(|e| AskDbError::connectivity(format!("Failed to spawn tunnel worker: {e}")))?;

        info!(local_port, "ssh tunnel opened");
        Ok(Self { local_port, shutdown, worker: Some(worker) })
    }

    #[must_use]
    pub const fn local_port(&self) -> u16 {
        self.local_port
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(local_port = self.local_port, "tunnel worker panicked");
            }
        }
        info!(local_port = self.local_port, "ssh tunnel closed");
    }
}

fn accept_loop(listener: TcpListener, relay: Arc<dyn Relay>, shutdown: Arc<AtomicBool>) {
    let mut clients: Vec<JoinHandle<()>> = Vec::new();

    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "tunnel client accepted");
                let relay = Arc::clone(&relay);
                let signal = Arc::clone(&shutdown);
                let spawned = thread::Builder::new().name("askdb-tunnel-client".to_string()).spawn(
                    move || {
                        if let Err(e) = relay.serve(stream, &signal) {
                            warn!(error = %e, "tunnel client failed");
                        }
                    },
                );
                match spawned {
                    Ok(handle) => clients.push(handle),
                    Err(e) => warn!(error = %e, "could not spawn tunnel client thread"),
                }
                clients.retain(|handle| !handle.is_finished());
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(ACCEPT_RETRY_SLEEP_MS));
            }
            Err(e) => {
                warn!(error = %e, "tunnel listener failed");
                break;
            }
        }
    }

    // Release the port before draining clients
    drop(listener);
    shutdown.store(true, Ordering::SeqCst);
    for client in clients {
        let _ = client.join();
    }
}

/// Remote half of a relayed connection
trait Upstream: Read + Write {
    /// Signal that no more bytes will be written
    fn finish_writes(&mut self);
}

impl Upstream for ssh2::Channel {
    fn finish_writes(&mut self) {
        let _ = self.send_eof();
    }
}

impl Upstream for TcpStream {
    fn finish_writes(&mut self) {
        let _ = self.shutdown(Shutdown::Write);
    }
}

fn write_all_nonblocking(writer: &mut impl Write, mut data: &[u8], what: &str) -> Result<()> {
    while !data.is_empty() {
        match writer.write(data) {
            Ok(0) => return Err(AskDbError::connectivity(format!("{what} closed while writing"))),
            Ok(written) => data = &data[written..],
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(1));
            }
            Err(e) => return Err(AskDbError::connectivity(format!("{what} write error: {e}"))),
        }
    }
    Ok(())
}

/// Copy bytes both ways until both sides reach EOF or the tunnel stops
///
/// Both ends must already be in non-blocking mode.
fn pump(local: &mut TcpStream, remote: &mut impl Upstream, shutdown: &AtomicBool) -> Result<()> {
    let mut local_buf = [0u8; BUFFER_SIZE];
    let mut remote_buf = [0u8; BUFFER_SIZE];
    let mut local_eof = false;
    let mut remote_eof = false;
    let mut sent_eof = false;

    while !(local_eof && remote_eof) && !shutdown.load(Ordering::SeqCst) {
        let mut progressed = false;

        if !local_eof {
            match local.read(&mut local_buf) {
                Ok(0) => local_eof = true,
                Ok(n) => {
                    write_all_nonblocking(remote, &local_buf[..n], "remote channel")?;
                    progressed = true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(AskDbError::connectivity(format!("local read error: {e}"))),
            }
        }

        if local_eof && !sent_eof {
            remote.finish_writes();
            sent_eof = true;
        }

        if !remote_eof {
            match remote.read(&mut remote_buf) {
                Ok(0) => remote_eof = true,
                Ok(n) => {
                    write_all_nonblocking(local, &remote_buf[..n], "local stream")?;
                    progressed = true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(AskDbError::connectivity(format!("remote read error: {e}"))),
            }
        }

        if !progressed {
            thread::sleep(Duration::from_millis(IDLE_SLEEP_MS));
        }
    }

    let _ = local.shutdown(Shutdown::Both);
    Ok(())
}

/// libssh2 reads a zero timeout as "block forever", so clamp to 1ms
fn session_timeout_ms(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX).max(1)
}

/// Relay through an SSH server with password authentication
struct SshRelay {
    ssh: SshTarget,
    remote_host: String,
    remote_port: u16,
    connect_timeout: Duration,
}

impl SshRelay {
    fn ssh_error(&self, detail: impl std::fmt::Display) -> AskDbError {
        AskDbError::connectivity(format!(
            "SSH connection to {}:{} failed: {detail}",
            self.ssh.host, self.ssh.port
        ))
    }

    fn address(&self) -> Result<SocketAddr> {
        (self.ssh.host.as_str(), self.ssh.port)
            .to_socket_addrs()
            .map_err(|e| self.ssh_error(format!("could not resolve host: {e}")))?
            .next()
            .ok_or_else(|| self.ssh_error("host resolved to no address"))
    }

    fn establish_session(&self) -> Result<Session> {
        let stream = TcpStream::connect_timeout(&self.address()?, self.connect_timeout)
            .map_err(|e| self.ssh_error(e))?;
        let _ = stream.set_nodelay(true);

        let mut session = Session::new().map_err(|e| self.ssh_error(e))?;
        session.set_tcp_stream(stream);
        session.set_timeout(session_timeout_ms(self.connect_timeout));
        session.handshake().map_err(|e| self.ssh_error(format!("handshake failed: {e}")))?;
        session
            .userauth_password(&self.ssh.user, &self.ssh.password)
            .map_err(|e| self.ssh_error(format!("authentication failed: {e}")))?;

        if !session.authenticated() {
            return Err(self.ssh_error("authentication failed"));
        }
        Ok(session)
    }

    /// Check that the SSH server accepts the credentials
    fn verify(&self) -> Result<()> {
        let session = self.establish_session()?;
        let _ = session.disconnect(None, "verified", None);
        debug!(ssh_host = %self.ssh.host, "ssh credentials verified");
        Ok(())
    }
}

impl Relay for SshRelay {
    fn serve(&self, mut client: TcpStream, shutdown: &AtomicBool) -> Result<()> {
        let session = self.establish_session()?;
        let mut channel = session
            .channel_direct_tcpip(&self.remote_host, self.remote_port, None)
            .map_err(|e| {
                AskDbError::connectivity(format!(
                    "SSH forward to {}:{} failed: {e}",
                    self.remote_host, self.remote_port
                ))
            })?;

        session.set_blocking(false);
        client
            .set_nonblocking(true)
            .map_err(|e| AskDbError::connectivity(format!("local stream setup failed: {e}")))?;
        let _ = client.set_nodelay(true);

        let pumped = pump(&mut client, &mut channel, shutdown);

        // Teardown blocks; an unresponsive server must not hang the drop
        session.set_timeout(session_timeout_ms(self.connect_timeout));
        session.set_blocking(true);
        let _ = channel.close();
        let _ = session.disconnect(None, "tunnel closed", None);
        pumped
    }
}
