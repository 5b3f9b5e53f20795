//! SWI-Prolog backend: one `swipl` process per query.
//!
//! Each query gets a fresh interpreter that consults the rule file, runs
//!
//! ```prolog
//! forall(Goal, (write_canonical([V1, V2, ...]), nl))
//! ```
//!
//! and halts. The goal travels on the command line as pure ASCII: any other
//! character can only sit inside a quoted atom, where it is written as a
//! `\x<hex>\` escape, so the child's locale never changes the query.
//!
//! Solutions come back one per line in engine order and are read
//! with [`reader::read_solution`](crate::kb::reader::read_solution). Since no
//! interpreter is ever shared, concurrent queries cannot see each other's
//! bindings. The child is killed when the deadline passes or the request is
//! cancelled.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::compile::Query;
use crate::kb::reader::read_solution;
use crate::kb::{KbError, KbResult, KnowledgeBase};
use crate::normalize::RawSolution;
use crate::term::{hex_escape, quote};

/// Maximum stdout accepted from one query (1 MB).
const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Poll interval while waiting for the child.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Configuration for [`SwiplEngine`].
#[derive(Debug, Clone)]
pub struct SwiplConfig {
    /// `swipl` executable.
    pub executable: PathBuf,
    /// Prolog source consulted before every query.
    pub rule_file: PathBuf,
    /// Per-query deadline in seconds.
    pub timeout_secs: u64,
}

impl Default for SwiplConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("swipl"),
            rule_file: PathBuf::from("policy.pl"),
            timeout_secs: 10,
        }
    }
}

/// Knowledge base backed by a `swipl` subprocess per query.
#[derive(Debug, Clone)]
pub struct SwiplEngine {
    config: SwiplConfig,
}

impl SwiplEngine {
    /// Create the engine, checking that the rule file exists.
    pub fn new(config: SwiplConfig) -> KbResult<Self> {
        if !config.rule_file.is_file() {
            return Err(KbError::RuleFileMissing {
                path: config.rule_file.display().to_string(),
            });
        }
        tracing::info!(
            executable = %config.executable.display(),
            rule_file = %config.rule_file.display(),
            timeout_secs = config.timeout_secs,
            "SWI-Prolog backend ready"
        );
        Ok(Self { config })
    }

    /// The goal passed to `swipl -g`.
    pub fn driver_goal(query: &Query) -> String {
        let vars = query.output_vars.join(",");
        format!("forall({query}, (write_canonical([{vars}]), nl))")
    }

    fn load_goal(&self) -> String {
        format!(
            "load_files({}, [silent(true)])",
            quote(&self.config.rule_file.display().to_string())
        )
    }

    fn spawn(&self, query: &Query) -> KbResult<Child> {
        Command::new(&self.config.executable)
            .arg("-q")
            .arg("-f")
            .arg("none")
            .arg("-g")
            .arg(ascii_goal(&self.load_goal()))
            .arg("-g")
            .arg(ascii_goal(&Self::driver_goal(query)))
            .arg("-t")
            .arg("halt")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| KbError::Spawn {
                program: self.config.executable.display().to_string(),
                source,
            })
    }
}

impl KnowledgeBase for SwiplEngine {
    fn query(&self, query: &Query, cancel: &CancelToken) -> KbResult<Vec<RawSolution>> {
        let query_text = query.to_string();
        let mut child = self.spawn(query)?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + Duration::from_secs(self.config.timeout_secs);
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if cancel.is_cancelled() {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(KbError::Cancelled { query: query_text });
                    }
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        tracing::warn!(query = %query_text, "engine query timed out, killed");
                        return Err(KbError::Timeout {
                            query: query_text,
                            timeout_secs: self.config.timeout_secs,
                        });
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    let _ = child.kill();
                    return Err(KbError::Execution {
                        query: query_text,
                        message: format!("failed to wait on engine: {e}"),
                    });
                }
            }
        };

        let stdout = join_output(stdout);
        let stderr = join_output(stderr);

        if !status.success() {
            let message = String::from_utf8_lossy(&stderr).trim().to_string();
            return Err(KbError::Execution {
                query: query_text,
                message: if message.is_empty() {
                    format!("engine exited with {status}")
                } else {
                    message
                },
            });
        }
        if !stderr.is_empty() {
            tracing::debug!(
                query = %query_text,
                stderr = %String::from_utf8_lossy(&stderr),
                "engine warnings"
            );
        }
        if stdout.len() > MAX_OUTPUT_SIZE {
            return Err(KbError::Execution {
                query: query_text,
                message: format!("output exceeded {MAX_OUTPUT_SIZE} bytes"),
            });
        }

        let text = String::from_utf8_lossy(&stdout);
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| read_solution(line, &query.output_vars))
            .collect()
    }

    fn name(&self) -> &str {
        "swipl"
    }
}

/// Escape every non-ASCII character. Only valid for goal text in which such
/// characters appear inside quoted atoms, which is all [`Query`] renders.
fn ascii_goal(goal: &str) -> String {
    if goal.is_ascii() {
        return goal.to_string();
    }
    let mut out = String::with_capacity(goal.len() + 16);
    for c in goal.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            out.push_str(&hex_escape(c));
        }
    }
    out
}

/// Read a child pipe on a helper thread so a chatty child never blocks on a
/// full pipe while we poll. At most `MAX_OUTPUT_SIZE + 1` bytes are kept; the
/// rest is discarded, so a longer buffer means the limit was exceeded.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut p| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = (&mut p)
                .take(MAX_OUTPUT_SIZE as u64 + 1)
                .read_to_end(&mut buf);
            let _ = std::io::copy(&mut p, &mut std::io::sink());
            buf
        })
    })
}

fn join_output(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}
