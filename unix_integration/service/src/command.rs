//! Running external tools. Every join and leave is, at the bottom, a handful of
//! processes spawned here.
//!
//! A child is run in its own process group with all three standard streams on pipes.
//! Output from stdout and stderr is interleaved into one buffer in the order it arrives.
//! The run only completes once the child is reaped *and* both output pipes are closed,
//! see [`CompletionTracker`]. A run that was cancelled or timed out stops waiting on the
//! pipes once the child is reaped.

use std::collections::BTreeMap;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use realmd_common::config::RealmdConfig;
use realmd_common::error::RealmError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::diagnostics::Invocation;

const READ_BUFFER: usize = 4096;

/// Tracks the two independent conditions that make up the end of a process: its output
/// pipes reaching EOF, and the child being reaped. Hands out the exit status once, when
/// the last of them arrives, regardless of their order.
#[derive(Debug)]
pub struct CompletionTracker {
    open_pipes: usize,
    status: Option<ExitStatus>,
    fired: bool,
}

impl CompletionTracker {
    pub fn new(open_pipes: usize) -> Self {
        CompletionTracker {
            open_pipes,
            status: None,
            fired: false,
        }
    }

    pub fn pipe_closed(&mut self) -> Option<ExitStatus> {
        self.open_pipes = self.open_pipes.saturating_sub(1);
        self.poll()
    }

    pub fn reaped(&mut self, status: ExitStatus) -> Option<ExitStatus> {
        if self.status.is_none() {
            self.status = Some(status);
        }
        self.poll()
    }

    pub fn is_complete(&self) -> bool {
        self.fired
    }

    fn poll(&mut self) -> Option<ExitStatus> {
        if self.fired || self.open_pipes > 0 {
            return None;
        }
        let status = self.status?;
        self.fired = true;
        Some(status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// How a run ended, before it is turned into a result.
enum Ended {
    Exited(ExitStatus),
    Cancelled,
    TimedOut,
}

async fn read_pipe<R: AsyncRead + Unpin>(
    pipe: &mut Option<R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match pipe {
        Some(p) => p.read(buf).await,
        None => std::future::pending().await,
    }
}

/// Hide the argument following a password flag when logging a command line.
fn safe_argv(argv: &[String]) -> String {
    let mut hide_next = false;
    argv.iter()
        .map(|a| {
            if hide_next {
                hide_next = false;
                return "********".to_string();
            }
            if a == "--password" || a == "-w" {
                hide_next = true;
            }
            a.clone()
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct CommandRunner {
    commands: BTreeMap<String, String>,
    timeout: Option<Duration>,
}

impl CommandRunner {
    pub fn new(config: &RealmdConfig) -> Self {
        CommandRunner {
            commands: config.commands.clone(),
            timeout: match config.command_timeout {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }

    /// Resolve a configured command name into an argument vector. A command missing from
    /// the table always fails when run and a blank one always succeeds, so a distro can
    /// switch a step off by configuring it empty.
    pub fn known_argv(&self, name: &str, extra: &[String]) -> Result<Vec<String>, RealmError> {
        let mut argv = match self.commands.get(name) {
            None => {
                warn!(%name, "no command configured");
                vec![
                    "/bin/false".to_string(),
                    "invalid-configured-command".to_string(),
                    name.to_string(),
                ]
            }
            Some(line) if line.trim().is_empty() => vec![
                "/bin/true".to_string(),
                "empty-configured-command".to_string(),
                name.to_string(),
            ],
            Some(line) => shell_words::split(line).map_err(|e| {
                error!(?e, %name, "unable to parse configured command");
                RealmError::Internal(format!(
                    "Couldn't parse the configured command: {}: {}",
                    name, e
                ))
            })?,
        };
        argv.extend(extra.iter().cloned());
        Ok(argv)
    }

    pub async fn run_known(
        &self,
        name: &str,
        extra: &[String],
        env: &[(&str, String)],
        input: Option<&[u8]>,
        inv: &Invocation,
    ) -> Result<CommandOutput, RealmError> {
        let argv = self.known_argv(name, extra)?;
        self.run(&argv, env, input, inv).await
    }

    #[instrument(level = "debug", skip_all, fields(cmd = argv.first().map(|s| s.as_str()).unwrap_or_default()))]
    pub async fn run(
        &self,
        argv: &[String],
        env: &[(&str, String)],
        input: Option<&[u8]>,
        inv: &Invocation,
    ) -> Result<CommandOutput, RealmError> {
        let Some((program, args)) = argv.split_first() else {
            return Err(RealmError::internal("Empty command line"));
        };

        // Don't start anything new once the caller has given up.
        inv.check_cancelled()?;
        inv.info(format!("Running: {}", safe_argv(argv)));

        let mut std_cmd = std::process::Command::new(program);
        std_cmd
            .args(args)
            .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        let mut child = Command::from(std_cmd).spawn().map_err(|e| {
            error!(?e, %program, "unable to spawn process");
            RealmError::Internal(format!("Couldn't run command: {}: {}", program, e))
        })?;

        // The child leads its process group, and the group outlives the child for as long
        // as anything it started is still running. `Child::id` is gone once reaped.
        let pgid = child.id();

        let stdin = child.stdin.take();
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        let writer = async move {
            if let Some(mut stdin) = stdin {
                if let Some(data) = input {
                    if let Err(e) = stdin.write_all(data).await {
                        // The child may exit without reading its input.
                        debug!(?e, "couldn't write process input");
                    }
                }
                // Dropping closes the pipe.
            }
        };

        let reader = async {
            let mut tracker = CompletionTracker::new(2);
            let mut output: Vec<u8> = Vec::new();
            let mut out_buf = [0u8; READ_BUFFER];
            let mut err_buf = [0u8; READ_BUFFER];
            let mut reaped: Option<ExitStatus> = None;
            let mut signalled = false;
            let mut ended: Option<Ended> = None;

            let deadline = async {
                match self.timeout {
                    Some(t) => tokio::time::sleep(t).await,
                    None => std::future::pending().await,
                }
            };
            tokio::pin!(deadline);

            let status = loop {
                tokio::select! {
                    r = read_pipe(&mut stdout, &mut out_buf) => match r {
                        Ok(0) | Err(_) => {
                            stdout = None;
                            if let Some(st) = tracker.pipe_closed() {
                                break Ok(st);
                            }
                        }
                        Ok(n) => output.extend_from_slice(&out_buf[..n]),
                    },
                    r = read_pipe(&mut stderr, &mut err_buf) => match r {
                        Ok(0) | Err(_) => {
                            stderr = None;
                            if let Some(st) = tracker.pipe_closed() {
                                break Ok(st);
                            }
                        }
                        Ok(n) => output.extend_from_slice(&err_buf[..n]),
                    },
                    st = child.wait(), if reaped.is_none() => {
                        match st {
                            Ok(st) => {
                                reaped = Some(st);
                                if let Some(st) = tracker.reaped(st) {
                                    break Ok(st);
                                }
                                // Stopped by us, don't wait on whatever holds the pipes.
                                if signalled {
                                    break Ok(st);
                                }
                            }
                            Err(e) => {
                                error!(?e, "unable to wait for process");
                                break Err(RealmError::Internal(format!(
                                    "Couldn't wait for command: {}: {}",
                                    program, e
                                )));
                            }
                        }
                    },
                    _ = inv.cancelled(), if !signalled => {
                        signalled = true;
                        ended = Some(Ended::Cancelled);
                        terminate(pgid);
                        if let Some(st) = reaped {
                            break Ok(st);
                        }
                    },
                    _ = &mut deadline, if !signalled => {
                        signalled = true;
                        ended = Some(Ended::TimedOut);
                        terminate(pgid);
                        if let Some(st) = reaped {
                            break Ok(st);
                        }
                    },
                }
            };

            let text = String::from_utf8_lossy(&output).into_owned();
            (status, ended, text)
        };

        let ((), (status, ended, text)) = tokio::join!(writer, reader);
        let status = status?;

        inv.output(&text);

        match ended.unwrap_or(Ended::Exited(status)) {
            Ended::Cancelled => Err(RealmError::cancelled()),
            Ended::TimedOut => Err(RealmError::Internal(format!(
                "The command timed out: {}",
                program
            ))),
            Ended::Exited(status) => match (status.code(), status.signal()) {
                (Some(code), _) => {
                    debug!(%code, "process exited");
                    Ok(CommandOutput { code, output: text })
                }
                (None, Some(sig)) => Err(RealmError::Internal(format!(
                    "Process was terminated with signal: {}",
                    sig
                ))),
                (None, None) => Err(RealmError::internal("Process ended in an unknown state")),
            },
        }
    }
}

/// Ask the child's process group to stop, which reaches anything the child started even
/// after the child itself has exited. Never escalates beyond SIGTERM.
fn terminate(pgid: Option<u32>) {
    let Some(pgid) = pgid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    debug!(%pgid, "sending SIGTERM to process group");
    if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGTERM) {
        // ESRCH: everything in the group has gone already.
        debug!(?e, %pgid, "unable to signal process group");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exited(code: i32) -> ExitStatus {
        ExitStatus::from_raw(code << 8)
    }

    #[test]
    fn test_completion_fires_once_in_any_order() {
        // Every interleaving of two pipe closures and the reap.
        let orders: [[u8; 3]; 3] = [[0, 0, 1], [0, 1, 0], [1, 0, 0]];
        for order in orders {
            let mut tracker = CompletionTracker::new(2);
            let mut fired = 0;
            for event in order {
                let res = match event {
                    0 => tracker.pipe_closed(),
                    _ => tracker.reaped(exited(3)),
                };
                if let Some(st) = res {
                    assert_eq!(st.code(), Some(3));
                    fired += 1;
                }
            }
            assert_eq!(fired, 1, "order {:?}", order);
            assert!(tracker.is_complete());
            // Late or duplicate events never fire again.
            assert!(tracker.pipe_closed().is_none());
            assert!(tracker.reaped(exited(0)).is_none());
        }
    }

    #[test]
    fn test_known_argv_fallbacks() {
        let mut config = RealmdConfig::new();
        config.commands.clear();
        config
            .commands
            .insert("blank".to_string(), "   ".to_string());
        config
            .commands
            .insert("quoted".to_string(), "/usr/bin/tool 'two words'".to_string());
        config
            .commands
            .insert("broken".to_string(), "/usr/bin/tool 'unterminated".to_string());
        let runner = CommandRunner::new(&config);

        assert_eq!(
            runner.known_argv("missing", &[]).expect("argv"),
            vec!["/bin/false", "invalid-configured-command", "missing"]
        );
        assert_eq!(
            runner.known_argv("blank", &[]).expect("argv"),
            vec!["/bin/true", "empty-configured-command", "blank"]
        );
        assert_eq!(
            runner
                .known_argv("quoted", &["extra".to_string()])
                .expect("argv"),
            vec!["/usr/bin/tool", "two words", "extra"]
        );
        assert!(matches!(
            runner.known_argv("broken", &[]),
            Err(RealmError::Internal(_))
        ));
    }

    #[test]
    fn test_safe_argv_hides_password() {
        let argv: Vec<String> = ["ipa-client-install", "--password", "hunter2", "--unattended"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let s = safe_argv(&argv);
        assert!(!s.contains("hunter2"));
        assert!(s.contains("--unattended"));
    }
}
