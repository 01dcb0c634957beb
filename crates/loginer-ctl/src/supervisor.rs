use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use loginer_rewrite::{EngineEvent, EventKind};

use crate::errors::CtlError;
use crate::port_reaper;

/// Marker the interception engine prints once its listener is up.
pub const READY_MARKER: &str = "proxy listening at";

const OUTPUT_CHANNEL_CAPACITY: usize = 1024;
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Static description of one supervised component.
#[derive(Debug, Clone)]
pub struct SupervisorSpec {
    pub name: &'static str,
    pub executable: PathBuf,
    pub working_dir: PathBuf,
    pub args: Vec<String>,
    /// Port the component listens on, used for the kill fallback when the
    /// child does not exit within the grace period.
    pub port: Option<u16>,
    /// Reap the port after every stop, not just on a stuck child. Needed
    /// where the component detaches helpers that outlive it.
    pub always_reap_port: bool,
}

/// Output the reader task surfaces to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapturedOutput {
    /// The readiness marker appeared on the component's output.
    Ready,
    /// A structured plugin event line.
    Event(EngineEvent),
}

/// Supervises one external process: spawn, async output capture, and a
/// best-effort stop with port reaping as the last resort.
pub struct ProcessSupervisor {
    spec: SupervisorSpec,
    child: Option<Child>,
    running: Arc<AtomicBool>,
    output_rx: Option<mpsc::Receiver<CapturedOutput>>,
}

impl ProcessSupervisor {
    pub fn new(spec: SupervisorSpec) -> Self {
        Self {
            spec,
            child: None,
            running: Arc::new(AtomicBool::new(false)),
            output_rx: None,
        }
    }

    pub fn spec(&self) -> &SupervisorSpec {
        &self.spec
    }

    /// Spawns the component. A second start while the child is alive is a
    /// logged no-op.
    pub fn start(&mut self) -> Result<(), CtlError> {
        if self.is_running() {
            warn!(component = self.spec.name, "already running, start ignored");
            return Ok(());
        }

        if !self.spec.executable.is_file() {
            return Err(CtlError::ExecutableMissing {
                name: self.spec.name.to_string(),
                path: self.spec.executable.clone(),
            });
        }

        let mut child = Command::new(&self.spec.executable)
            .args(&self.spec.args)
            .current_dir(&self.spec.working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::SeqCst);

        let name = self.spec.name;
        tokio::spawn(async move {
            read_output(name, stdout, stderr, tx).await;
            running.store(false, Ordering::SeqCst);
        });

        info!(
            component = self.spec.name,
            executable = %self.spec.executable.display(),
            "component started"
        );
        self.child = Some(child);
        self.output_rx = Some(rx);
        Ok(())
    }

    /// Samples liveness without blocking. A child that exited since the
    /// last check flips the flag here.
    pub fn is_running(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(component = self.spec.name, %status, "component exited");
                self.running.store(false, Ordering::SeqCst);
                self.child = None;
                false
            }
            Ok(None) => true,
            Err(error) => {
                warn!(component = self.spec.name, %error, "liveness probe failed");
                false
            }
        }
    }

    /// Best-effort stop: terminate, wait out the grace period, then reap
    /// the port if the child is stuck. Never fails the caller.
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let Some(mut child) = self.child.take() else {
            return;
        };

        terminate(&mut child, self.spec.name);

        let mut stuck = false;
        match timeout(STOP_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                info!(component = self.spec.name, %status, "component stopped");
            }
            Ok(Err(error)) => {
                warn!(component = self.spec.name, %error, "wait failed after terminate");
                stuck = true;
            }
            Err(_) => {
                warn!(
                    component = self.spec.name,
                    "did not exit within grace period"
                );
                let _ = child.start_kill();
                stuck = true;
            }
        }

        self.reap_if_configured(stuck);
        self.output_rx = None;
    }

    fn reap_if_configured(&self, stuck: bool) {
        let Some(port) = self.spec.port else {
            return;
        };
        if stuck || self.spec.always_reap_port {
            port_reaper::release_port(port);
        }
    }

    /// Drains captured output until the deadline, returning everything seen
    /// so far. An empty result means the component produced nothing in time.
    pub async fn get_output(&mut self, wait: Duration) -> Vec<CapturedOutput> {
        let mut collected = Vec::new();
        let Some(rx) = self.output_rx.as_mut() else {
            return collected;
        };

        let deadline = Instant::now() + wait;
        loop {
            match rx.try_recv() {
                Ok(output) => {
                    collected.push(output);
                    continue;
                }
                Err(mpsc::error::TryRecvError::Disconnected) => return collected,
                Err(mpsc::error::TryRecvError::Empty) => {}
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return collected;
            }
            match timeout(remaining, rx.recv()).await {
                Ok(Some(output)) => collected.push(output),
                Ok(None) | Err(_) => return collected,
            }
        }
    }
}

fn terminate(child: &mut Child, name: &str) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) | Err(nix::errno::Errno::ESRCH) => return,
                Err(error) => {
                    warn!(component = name, %error, "SIGTERM failed, falling back to kill");
                }
            }
        }
    }

    if let Err(error) = child.start_kill() {
        error!(component = name, %error, "kill failed");
    }
}

/// Single reader task over both piped streams. One stream closing must not
/// spin the select loop, hence the per-stream done flags.
async fn read_output(
    name: &'static str,
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Option<tokio::process::ChildStderr>,
    tx: mpsc::Sender<CapturedOutput>,
) {
    let mut stdout_lines = stdout.map(|stream| BufReader::new(stream).lines());
    let mut stderr_lines = stderr.map(|stream| BufReader::new(stream).lines());
    let mut stdout_done = stdout_lines.is_none();
    let mut stderr_done = stderr_lines.is_none();

    while !(stdout_done && stderr_done) {
        tokio::select! {
            line = next_line(&mut stdout_lines), if !stdout_done => match line {
                Some(line) => handle_line(name, "stdout", &line, &tx).await,
                None => stdout_done = true,
            },
            line = next_line(&mut stderr_lines), if !stderr_done => match line {
                Some(line) => handle_line(name, "stderr", &line, &tx).await,
                None => stderr_done = true,
            },
        }
    }
    debug!(component = name, "output streams closed");
}

async fn next_line<R>(lines: &mut Option<tokio::io::Lines<BufReader<R>>>) -> Option<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    match lines {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => None,
    }
}

async fn handle_line(
    name: &'static str,
    stream: &'static str,
    line: &str,
    tx: &mpsc::Sender<CapturedOutput>,
) {
    if line.contains(READY_MARKER) {
        info!(component = name, "readiness marker observed");
        let _ = tx.send(CapturedOutput::Ready).await;
        return;
    }

    if let Some(event) = EngineEvent::parse_line(line) {
        match event.kind {
            EventKind::Error => error!(component = name, payload = %event.payload, "engine error"),
            EventKind::Info => info!(component = name, payload = %event.payload, "engine info"),
            EventKind::Request => {
                debug!(component = name, path = %event.payload, "governed request")
            }
            EventKind::CreateLoginQrcode | EventKind::Qrcode | EventKind::QrcodeLogin => {
                info!(component = name, kind = event.kind.tag(), "event captured")
            }
        }
        let _ = tx.send(CapturedOutput::Event(event)).await;
        return;
    }

    debug!(component = name, stream, line, "component output");
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use loginer_rewrite::EventKind;

    use super::{CapturedOutput, ProcessSupervisor, SupervisorSpec};
    use crate::errors::CtlError;

    fn spec_for(executable: &str, args: &[&str]) -> SupervisorSpec {
        SupervisorSpec {
            name: "test-component",
            executable: PathBuf::from(executable),
            working_dir: std::env::temp_dir(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            port: None,
            always_reap_port: false,
        }
    }

    #[tokio::test]
    async fn missing_executable_is_reported_with_its_path() {
        let mut supervisor =
            ProcessSupervisor::new(spec_for("/nonexistent/binary", &[]));
        match supervisor.start() {
            Err(CtlError::ExecutableMissing { name, path }) => {
                assert_eq!(name, "test-component");
                assert_eq!(path, PathBuf::from("/nonexistent/binary"));
            }
            other => panic!("expected ExecutableMissing, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn output_capture_sees_events_and_the_ready_marker() {
        let script = concat!(
            "echo '<INFO>pc config updated</INFO>'; ",
            "echo 'proxy listening at http://*:8443'; ",
            "echo 'plain noise line'",
        );
        let mut supervisor = ProcessSupervisor::new(spec_for("/bin/sh", &["-c", script]));
        supervisor.start().expect("start shell");

        let output = supervisor.get_output(Duration::from_secs(5)).await;
        let mut saw_ready = false;
        let mut saw_info = false;
        for entry in &output {
            match entry {
                CapturedOutput::Ready => saw_ready = true,
                CapturedOutput::Event(event) if event.kind == EventKind::Info => {
                    assert_eq!(event.payload, "pc config updated");
                    saw_info = true;
                }
                CapturedOutput::Event(_) => {}
            }
        }
        assert!(saw_ready, "ready marker not captured: {output:?}");
        assert!(saw_info, "info event not captured: {output:?}");

        supervisor.stop().await;
        assert!(!supervisor.is_running());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_terminates_a_long_running_child() {
        let mut supervisor =
            ProcessSupervisor::new(spec_for("/bin/sh", &["-c", "sleep 30"]));
        supervisor.start().expect("start shell");
        assert!(supervisor.is_running());

        supervisor.stop().await;
        assert!(!supervisor.is_running());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn double_start_is_a_no_op() {
        let mut supervisor =
            ProcessSupervisor::new(spec_for("/bin/sh", &["-c", "sleep 30"]));
        supervisor.start().expect("first start");
        supervisor.start().expect("second start is ignored");
        supervisor.stop().await;
    }
}
