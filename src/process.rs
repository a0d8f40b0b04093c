//! Bounded execution of collaborator commands.
use anyhow::{anyhow, Context, Result};
use std::io::{ErrorKind, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Split a configured command line and substitute `{name}` placeholders.
pub fn expand_command(command: &str, substitutions: &[(&str, &str)]) -> Result<Vec<String>> {
    let mut argv =
        shell_words::split(command).with_context(|| format!("parse command: {command}"))?;
    if argv.is_empty() {
        return Err(anyhow!("command is empty"));
    }
    for arg in &mut argv {
        for (name, value) in substitutions {
            let placeholder = format!("{{{name}}}");
            if arg.contains(&placeholder) {
                *arg = arg.replace(&placeholder, value);
            }
        }
    }
    Ok(argv)
}

/// Run `argv`, feeding `stdin`, and kill it once `timeout` elapses.
///
/// The child leads its own process group so a timeout also takes down any
/// descendants a wrapper script started. Pipes are drained on helper threads
/// so a chatty child cannot stall on a full pipe while we wait for it.
pub fn run_with_timeout(
    argv: &[String],
    stdin: Option<&[u8]>,
    timeout: Duration,
) -> Result<CommandOutput> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("command is empty"))?;
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    let mut child = command
        .spawn()
        .with_context(|| format!("spawn {program}"))?;

    let writer = feed_stdin(&mut child, stdin);
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let start = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait().with_context(|| format!("wait for {program}"))? {
            break status;
        }
        if start.elapsed() > timeout {
            kill_group(&mut child);
            let _ = child.wait();
            return Err(anyhow!("{program} timed out after {timeout:?}"));
        }
        thread::sleep(POLL_INTERVAL);
    };

    // A descendant that outlives the child can keep the pipes open.
    while !(stdout.is_finished() && stderr.is_finished()) {
        if start.elapsed() > timeout {
            kill_group(&mut child);
            return Err(anyhow!(
                "{program} timed out after {timeout:?}: a descendant kept its output open"
            ));
        }
        thread::sleep(POLL_INTERVAL);
    }

    if let Some(writer) = writer {
        match writer.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) if err.kind() == ErrorKind::BrokenPipe => {}
            Ok(Err(err)) => return Err(err).with_context(|| format!("write stdin of {program}")),
            Err(_) => return Err(anyhow!("stdin writer for {program} panicked")),
        }
    }
    let stdout = stdout
        .join()
        .map_err(|_| anyhow!("stdout reader for {program} panicked"))?;
    let stderr = stderr
        .join()
        .map_err(|_| anyhow!("stderr reader for {program} panicked"))?;

    tracing::debug!(
        program = %program,
        elapsed_ms = start.elapsed().as_millis() as u64,
        stdout_bytes = stdout.len(),
        "command complete"
    );

    Ok(CommandOutput {
        status,
        stdout,
        stderr,
    })
}

#[cfg(unix)]
fn kill_group(child: &mut Child) {
    let pgid = child.id() as libc::pid_t;
    // SAFETY: killpg only signals the group; a group that is already gone
    // reports ESRCH, which is fine here.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
    let _ = child.kill();
}

fn feed_stdin(
    child: &mut Child,
    stdin: Option<&[u8]>,
) -> Option<JoinHandle<std::io::Result<()>>> {
    let bytes = stdin?.to_vec();
    let mut pipe = child.stdin.take()?;
    Some(thread::spawn(move || pipe.write_all(&bytes)))
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}
