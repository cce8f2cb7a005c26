//! Process Lifecycle - emulator and debugger subprocesses
//!
//! The emulator runs in its own process group so the whole tree it spawns
//! (e.g. `make` → `qemu-system-arm`) can be signalled as a unit without
//! touching our own group. The debugger's stdout is pumped into a channel by a
//! reader thread so reads can be bounded by a timeout.

use super::protocol::Transport;
use super::session::ReadyPolicy;
use super::SessionError;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Emulator subprocess, leader of its own process group
pub struct Emulator {
    child: Child,
    program: String,
    reaped: bool,
}

impl Emulator {
    /// Launch `argv` in a new process group with stdio discarded
    pub fn spawn(argv: &[String]) -> Result<Self, SessionError> {
        let (program, args) = split_argv(argv, "emulator")?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|source| SessionError::Spawn {
            program: program.clone(),
            source,
        })?;

        log::info!("Started emulator '{}' (pid {})", argv.join(" "), child.id());
        Ok(Self {
            child,
            program: program.clone(),
            reaped: false,
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Exit status if the emulator has already terminated
    pub fn exit_status(&mut self) -> Option<ExitStatus> {
        if self.reaped {
            return None;
        }
        self.child.try_wait().ok().flatten()
    }

    /// SIGTERM the process group; escalate to SIGKILL once if it lingers.
    pub fn terminate(&mut self, grace: Duration) -> Result<(), SessionError> {
        if self.reaped {
            return Ok(());
        }
        log::info!("Stopping emulator '{}' (pid {})", self.program, self.pid());

        self.signal_group(false);
        if wait_with_deadline(&mut self.child, grace).is_some() {
            self.reaped = true;
            return Ok(());
        }

        log::warn!("Emulator ignored SIGTERM, killing process group {}", self.pid());
        self.signal_group(true);
        match wait_with_deadline(&mut self.child, grace) {
            Some(_) => {
                self.reaped = true;
                Ok(())
            }
            None => Err(SessionError::Teardown {
                what: "emulator",
                reason: format!("pid {} still alive after SIGKILL", self.pid()),
            }),
        }
    }

    #[cfg(unix)]
    fn signal_group(&mut self, kill: bool) {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let signal = if kill { Signal::SIGKILL } else { Signal::SIGTERM };
        match killpg(Pid::from_raw(self.pid() as i32), signal) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => log::warn!("killpg({}, {:?}) failed: {}", self.pid(), signal, e),
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&mut self, _kill: bool) {
        let _ = self.child.kill();
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        if let Err(e) = self.terminate(Duration::from_millis(500)) {
            log::error!("{}", e);
        }
    }
}

/// Debugger subprocess speaking MI on its stdin/stdout
pub struct ChildTransport {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Receiver<String>,
    closed: bool,
}

impl ChildTransport {
    /// Launch the debugger with piped stdio
    pub fn spawn(argv: &[String]) -> Result<Self, SessionError> {
        let (program, args) = split_argv(argv, "debugger")?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SessionError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().ok_or_else(|| SessionError::Spawn {
            program: program.clone(),
            source: io::Error::new(io::ErrorKind::BrokenPipe, "no stdout pipe"),
        })?;

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        if let Some(stderr) = child.stderr.take() {
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    log::debug!("[debugger stderr] {}", line);
                }
            });
        }

        log::info!("Started debugger '{}' (pid {})", argv.join(" "), child.id());
        Ok(Self {
            child,
            stdin,
            lines: rx,
            closed: false,
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

impl Transport for ChildTransport {
    fn send_line(&mut self, line: &str) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "debugger stdin closed"))?;
        stdin.write_all(line.as_bytes())?;
        stdin.write_all(b"\n")?;
        stdin.flush()
    }

    fn recv_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        match self.lines.recv_timeout(timeout) {
            Ok(line) => Ok(Some(line)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "debugger closed its output",
            )),
        }
    }

    /// Close stdin, give the debugger a moment to exit, then kill it
    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        drop(self.stdin.take());

        if wait_with_deadline(&mut self.child, Duration::from_secs(1)).is_none() {
            log::warn!("Debugger (pid {}) did not exit, killing it", self.pid());
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

impl Drop for ChildTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Poll `host:port` until it accepts a TCP connection.
///
/// Delays double from `policy.initial_delay` up to `policy.max_delay`; gives
/// up after `policy.timeout` in total, or as soon as the emulator exits.
pub fn wait_for_port(
    host: &str,
    port: u16,
    policy: &ReadyPolicy,
    emulator: &mut Emulator,
) -> Result<(), SessionError> {
    let address = format!("{}:{}", host, port);
    let deadline = Instant::now() + policy.timeout;
    let mut delay = policy.initial_delay;
    let mut attempts = 0;

    loop {
        attempts += 1;
        let last_error = match probe(&address) {
            Ok(()) => {
                log::info!("Debug port {} ready after {} attempts", address, attempts);
                return Ok(());
            }
            Err(e) => e.to_string(),
        };
        log::debug!("Attempt {}: {}", attempts, last_error);

        if let Some(status) = emulator.exit_status() {
            return Err(SessionError::EmulatorExited {
                status: status.to_string(),
            });
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(SessionError::PortTimeout {
                address,
                attempts,
                last_error,
            });
        }
        thread::sleep(delay.min(deadline - now));
        delay = (delay * 2).min(policy.max_delay);
    }
}

fn probe(address: &str) -> io::Result<()> {
    let mut last = io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses resolved");
    for addr in address.to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, Duration::from_millis(250)) {
            Ok(_) => return Ok(()),
            Err(e) => last = e,
        }
    }
    Err(last)
}

fn wait_with_deadline(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + grace;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) if Instant::now() < deadline => thread::sleep(POLL_INTERVAL),
            Ok(None) => return None,
            Err(e) => {
                log::warn!("wait on pid {} failed: {}", child.id(), e);
                return None;
            }
        }
    }
}

fn split_argv<'a>(
    argv: &'a [String],
    what: &str,
) -> Result<(&'a String, &'a [String]), SessionError> {
    argv.split_first()
        .ok_or_else(|| SessionError::InvalidInput(format!("empty {} command line", what)))
}
