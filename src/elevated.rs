use anyhow::{Context, Result};
use std::io::Read;
use std::process::{Child, ChildStderr, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

/// Bytes of stderr kept per command. The rest is read and discarded.
const STDERR_LIMIT: usize = 4096;

/// How long to wait for the stderr reader once the process has exited.
const STDERR_GRACE: Duration = Duration::from_millis(200);

/// How a spawned elevated command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub argv: Vec<String>,
    pub success: bool,
    pub code: Option<i32>,
    pub stderr: String,
}

impl Completion {
    pub fn describe_status(&self) -> String {
        match self.code {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".into(),
        }
    }
}

/// Launches privileged commands without waiting for them.
pub trait ElevatedRunner {
    /// Spawn `argv`. Only a failure to start is reported here.
    fn run(&mut self, argv: &[String]) -> Result<()>;

    /// Collect commands that finished since the last call. Never blocks.
    fn reap(&mut self) -> Vec<Completion>;
}

struct RunningCommand {
    argv: Vec<String>,
    child: Child,
    stderr: Option<Receiver<String>>,
}

/// Drain `pipe` on its own thread so a chatty child never blocks on a full
/// pipe. Only the first `STDERR_LIMIT` bytes are kept.
fn drain_stderr(mut pipe: ChildStderr) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut kept = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    let room = STDERR_LIMIT.saturating_sub(kept.len());
                    kept.extend_from_slice(&chunk[..n.min(room)]);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        let _ = tx.send(String::from_utf8_lossy(&kept).into_owned());
    });
    rx
}

/// Spawns real processes and keeps their handles until they exit.
#[derive(Default)]
pub struct ProcessRunner {
    running: Vec<RunningCommand>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.running.len()
    }
}

impl ElevatedRunner for ProcessRunner {
    fn run(&mut self, argv: &[String]) -> Result<()> {
        let (program, args) = argv.split_first().context("Empty command")?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn {}", argv.join(" ")))?;
        log::info!("Spawned `{}` (pid {})", argv.join(" "), child.id());
        let stderr = child.stderr.take().map(drain_stderr);
        self.running.push(RunningCommand { argv: argv.to_vec(), child, stderr });
        Ok(())
    }

    fn reap(&mut self) -> Vec<Completion> {
        let mut done = Vec::new();
        let mut i = 0;
        while i < self.running.len() {
            let status = match self.running[i].child.try_wait() {
                Ok(Some(status)) => status,
                Ok(None) => {
                    i += 1;
                    continue;
                }
                Err(e) => {
                    log::warn!("Failed to poll `{}`: {}", self.running[i].argv.join(" "), e);
                    i += 1;
                    continue;
                }
            };

            let finished = self.running.swap_remove(i);
            // A grandchild holding the pipe open must not stall the loop.
            let stderr = finished
                .stderr
                .and_then(|rx| rx.recv_timeout(STDERR_GRACE).ok())
                .unwrap_or_default();
            done.push(Completion {
                argv: finished.argv,
                success: status.success(),
                code: status.code(),
                stderr: stderr.trim().to_string(),
            });
        }
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn reap_until_done(runner: &mut ProcessRunner) -> Vec<Completion> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut all = Vec::new();
        while runner.pending() > 0 && Instant::now() < deadline {
            all.extend(runner.reap());
            std::thread::sleep(Duration::from_millis(10));
        }
        all
    }

    #[test]
    fn spawn_failure_is_reported() {
        let mut runner = ProcessRunner::new();
        assert!(runner.run(&["/nonexistent/pkexec".to_string()]).is_err());
        assert!(runner.run(&[]).is_err());
        assert_eq!(runner.pending(), 0);
    }

    #[test]
    fn reaps_failed_command_with_stderr() {
        let mut runner = ProcessRunner::new();
        let argv: Vec<String> = ["sh", "-c", "echo denied >&2; exit 126"].iter().map(|s| s.to_string()).collect();
        runner.run(&argv).unwrap();
        let done = reap_until_done(&mut runner);
        assert_eq!(done.len(), 1);
        assert!(!done[0].success);
        assert_eq!(done[0].code, Some(126));
        assert_eq!(done[0].stderr, "denied");
        assert_eq!(done[0].argv, argv);
        assert_eq!(done[0].describe_status(), "exit status 126");
    }

    #[test]
    fn reaps_successful_command() {
        let mut runner = ProcessRunner::new();
        runner.run(&["true".to_string()]).unwrap();
        let done = reap_until_done(&mut runner);
        assert_eq!(done.len(), 1);
        assert!(done[0].success);
        assert_eq!(runner.pending(), 0);
    }

    #[test]
    fn reaps_command_that_floods_stderr() {
        let mut runner = ProcessRunner::new();
        let argv: Vec<String> = ["sh", "-c", "head -c 200000 /dev/zero | tr '\\0' x >&2; exit 1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        runner.run(&argv).unwrap();
        let done = reap_until_done(&mut runner);
        assert_eq!(runner.pending(), 0, "failed command was never reaped");
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].code, Some(1));
        assert_eq!(done[0].stderr.len(), STDERR_LIMIT);
        assert!(done[0].stderr.chars().all(|c| c == 'x'));
    }
}
