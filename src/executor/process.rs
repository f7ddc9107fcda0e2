use std::fs;
use std::io::{self, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::path::Path;
use std::time::{Duration, Instant};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};
use wait_timeout::ChildExt;
use crate::executor::stream::EventBus;
use crate::executor::Strategy;
use crate::script::{ExecutionMode, InvalidReason, Script, ScriptError, ScriptResult};

// The waiter holds the child lock for one slice at a time, then lets `interrupt` in.
const WAIT_SLICE: Duration = Duration::from_millis(10);
const WAIT_GAP: Duration = Duration::from_millis(1);
const CHUNK_SIZE: usize = 8 * 1024;
// Background children can keep the pipes open long after the direct child exited.
const PIPE_DRAIN: Duration = Duration::from_millis(500);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pipe {
    Stdout,
    Stderr,
}

/// A launched child plus everything collected from it.
struct LiveProcess {
    id: u64,
    pid: u32,
    script: String,
    suppress_output: bool,
    child: Mutex<Child>,
    stdout: Mutex<Option<String>>,
    stderr: Mutex<Option<String>>,
    /// Set once the result is built; pipe threads still running drop what they read.
    detached: AtomicBool,
}

impl LiveProcess {
    fn receive(&self, pipe: Pipe, chunk: &str, events: &EventBus) {
        if self.detached.load(Ordering::Acquire) {
            return;
        }
        match pipe {
            Pipe::Stdout => events.publish(Ok(chunk.to_string())),
            Pipe::Stderr => events.publish(Err(ScriptError::execute_failed(&self.script, None, chunk))),
        }
        if self.suppress_output {
            return;
        }
        let buffer = match pipe {
            Pipe::Stdout => &self.stdout,
            Pipe::Stderr => &self.stderr,
        };
        lock(buffer).get_or_insert_with(String::new).push_str(chunk.trim());
    }

    /// SIGINT if the child has not been reaped yet.
    fn interrupt(&self) {
        let mut child = lock(&self.child);
        match child.try_wait() {
            Ok(None) => send_interrupt(&mut child),
            Ok(Some(_)) => {}
            Err(e) => debug!("cannot query pid {} before interrupt: {}", self.pid, e),
        }
    }

    fn wait(&self) -> io::Result<ExitStatus> {
        loop {
            if let Some(status) = lock(&self.child).wait_timeout(WAIT_SLICE)? {
                return Ok(status);
            }
            thread::sleep(WAIT_GAP);
        }
    }
}

#[cfg(unix)]
fn send_interrupt(child: &mut Child) {
    let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGINT) };
    if rc != 0 {
        warn!("failed to interrupt pid {}: {}", child.id(), io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn send_interrupt(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!("failed to interrupt pid {}: {}", child.id(), e);
    }
}

/// Removes a process from the live list when dropped.
struct Tracked<'a> {
    processes: &'a Mutex<Vec<Arc<LiveProcess>>>,
    id: u64,
}

impl Drop for Tracked<'_> {
    fn drop(&mut self) {
        lock(self.processes).retain(|p| p.id != self.id);
    }
}

/// Runs `Subprocess` scripts as direct children of this process.
pub struct ProcessStrategy {
    processes: Mutex<Vec<Arc<LiveProcess>>>,
    events: Arc<EventBus>,
    next_id: AtomicU64,
}

impl ProcessStrategy {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            processes: Mutex::new(Vec::new()),
            events,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn live_count(&self) -> usize {
        lock(&self.processes).len()
    }

    fn track(&self, process: Arc<LiveProcess>) -> Tracked<'_> {
        let id = process.id;
        lock(&self.processes).push(process);
        Tracked { processes: &self.processes, id }
    }

    fn spawn_reader<R>(&self, mut source: R, process: &Arc<LiveProcess>, pipe: Pipe, running: Sender<()>) -> JoinHandle<()>
    where
        R: Read + Send + 'static,
    {
        let process = Arc::clone(process);
        let events = Arc::clone(&self.events);
        thread::spawn(move || {
            let _running = running;
            let mut buf = [0u8; CHUNK_SIZE];
            loop {
                if process.detached.load(Ordering::Acquire) {
                    break;
                }
                match source.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => process.receive(pipe, &String::from_utf8_lossy(&buf[..n]), &events),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!("{:?} of pid {} closed: {}", pipe, process.pid, e);
                        break;
                    }
                }
            }
        })
    }
}

impl Strategy for ProcessStrategy {
    fn execute(&self, script: &Script) -> ScriptResult {
        let (suppress_output, environment, input_file) = match &script.mode {
            ExecutionMode::Subprocess { suppress_output, environment, input_file } => {
                (*suppress_output, environment, input_file)
            }
            _ => return Err(ScriptError::UnknownExecutionMode),
        };
        let path = validate(script)?;
        let rendered = script.shell();

        let mut command = Command::new(path);
        command.args(&script.arguments).stdout(Stdio::piped()).stderr(Stdio::piped());
        // Only replace the environment when asked; tools such as build systems need the inherited one.
        if let Some(env) = environment {
            command.env_clear().envs(env);
        }
        let input = input_file.as_deref().and_then(read_input);
        command.stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() });
        reset_interrupt_disposition(&mut command);

        let mut child = command
            .spawn()
            .map_err(|e| ScriptError::execute_failed(&rendered, None, format!("failed to launch: {}", e)))?;
        debug!("launched pid {}: {}", child.id(), rendered);

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let process = Arc::new(LiveProcess {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            pid: child.id(),
            script: rendered,
            suppress_output,
            child: Mutex::new(child),
            stdout: Mutex::new(None),
            stderr: Mutex::new(None),
            detached: AtomicBool::new(false),
        });
        let tracked = self.track(process.clone());

        // Every pipe thread holds a sender; the channel disconnects once all of them are done.
        let (running, drained) = bounded::<()>(0);
        let mut pipes = Vec::with_capacity(3);
        if let (Some(mut sink), Some(data)) = (stdin, input) {
            let pid = process.pid;
            let running = running.clone();
            pipes.push(thread::spawn(move || {
                let _running = running;
                if let Err(e) = sink.write_all(&data) {
                    debug!("stdin of pid {} closed early: {}", pid, e);
                }
            }));
        }
        if let Some(out) = stdout {
            pipes.push(self.spawn_reader(out, &process, Pipe::Stdout, running.clone()));
        }
        if let Some(err) = stderr {
            pipes.push(self.spawn_reader(err, &process, Pipe::Stderr, running.clone()));
        }
        drop(running);

        let status = process.wait();
        // Pipes normally hit EOF right after the child is gone.
        let finished = drain(&drained, Instant::now() + PIPE_DRAIN);
        process.detached.store(true, Ordering::Release);
        if finished {
            for handle in pipes {
                if handle.join().is_err() {
                    warn!("pipe thread of pid {} panicked", process.pid);
                }
            }
        } else {
            debug!("pipes of pid {} are still held open, detaching them", process.pid);
        }
        drop(tracked);

        let status = status
            .map_err(|e| ScriptError::execute_failed(&process.script, None, format!("failed to wait: {}", e)))?;
        result(&process, status)
    }

    fn interrupt(&self) {
        let live: Vec<Arc<LiveProcess>> = lock(&self.processes).clone();
        for process in live {
            debug!("interrupting pid {}", process.pid);
            process.interrupt();
        }
    }
}

/// Whether every pipe thread finished before `deadline`.
fn drain(drained: &Receiver<()>, deadline: Instant) -> bool {
    loop {
        match drained.recv_deadline(deadline) {
            Ok(()) => continue,
            Err(RecvTimeoutError::Disconnected) => return true,
            Err(RecvTimeoutError::Timeout) => return false,
        }
    }
}

fn validate(script: &Script) -> Result<&str, InvalidReason> {
    let path = script.checked_path()?;
    match fs::metadata(path) {
        Ok(meta) if !meta.is_dir() => {}
        _ => return Err(InvalidReason::PathNotExistOrIsDirectory(path.to_string())),
    }
    if !is_executable(Path::new(path)) {
        return Err(InvalidReason::PathPermissionDenied(path.to_string()));
    }
    Ok(path)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    match CString::new(path.as_os_str().as_bytes()) {
        Ok(c_path) => unsafe { libc::access(c_path.as_ptr(), libc::X_OK) == 0 },
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    true
}

// Children must honour SIGINT even when this process was started with it ignored.
#[cfg(unix)]
fn reset_interrupt_disposition(command: &mut Command) {
    use std::os::unix::process::CommandExt;

    unsafe {
        command.pre_exec(|| {
            libc::signal(libc::SIGINT, libc::SIG_DFL);
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn reset_interrupt_disposition(_command: &mut Command) {}

fn read_input(path: &Path) -> Option<Vec<u8>> {
    match fs::read(path) {
        Ok(data) if !data.is_empty() => Some(data),
        Ok(_) => None,
        Err(e) => {
            warn!("cannot read input file {}: {}", path.display(), e);
            None
        }
    }
}

fn termination(status: ExitStatus) -> (&'static str, i32) {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ("exited due to an uncaught signal", signal);
        }
    }
    match status.code() {
        Some(code) => ("exited normally", code),
        None => ("unknown reason", -1),
    }
}

fn result(process: &LiveProcess, status: ExitStatus) -> ScriptResult {
    if status.success() {
        return Ok(lock(&process.stdout).take());
    }
    let (reason, code) = termination(status);
    let stderr = lock(&process.stderr).take().unwrap_or_default();
    let message = format!(
        "process failed with termination reason: {}, code: {} which is non-zero and error output: {}",
        reason, code, stderr
    );
    Err(ScriptError::execute_failed(process.script.clone(), Some(code), message))
}
