//! A single PTY-backed subprocess and its captured output.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

use crate::error::{SessionError, SessionResult};

/// Maximum number of output lines retained in the ring buffer per session.
pub const MAX_BUFFER_LINES: usize = 4000;

/// Captured output for a session: a bounded ring of lines plus a monotonic
/// total-lines-ever-seen counter, which is what dispatch verification
/// samples (the ring itself is lossy once it wraps).
#[derive(Debug, Default)]
pub struct OutputBuffer {
    lines: VecDeque<String>,
    total_lines: u64,
}

impl OutputBuffer {
    fn push_line(&mut self, line: String) {
        if self.lines.len() >= MAX_BUFFER_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
        self.total_lines += 1;
    }

    /// The full buffered text, newline-joined.
    pub fn text(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    /// Total lines ever observed (monotonic, independent of ring eviction).
    pub fn total_line_count(&self) -> u64 {
        self.total_lines
    }

    /// The last `n` characters of buffered text, for bounded scans (auth URL
    /// extraction, stall-classification context).
    pub fn tail(&self, max_chars: usize) -> String {
        let text = self.text();
        if text.chars().count() <= max_chars {
            text
        } else {
            let start = text.char_indices().count().saturating_sub(max_chars);
            text.char_indices().nth(start).map(|(i, _)| text[i..].to_string()).unwrap_or(text)
        }
    }
}

/// A live PTY subprocess backing one agent instance.
pub struct PtySession {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    /// Captured output, shared with the background reader thread.
    pub buffer: Arc<Mutex<OutputBuffer>>,
    /// Timestamp of the most recently observed output, used to detect
    /// quiescence for the readiness wait.
    pub last_output_at: Arc<Mutex<Instant>>,
}

impl PtySession {
    /// Spawn `program` with `args` inside a fresh PTY, in `workdir`, with
    /// `env` injected on top of the subprocess's inherited environment.
    pub fn spawn(
        program: &str,
        args: &[String],
        workdir: &std::path::Path,
        env: &[(String, String)],
    ) -> SessionResult<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 50,
                cols: 200,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::PtyOpen(e.to_string()))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        cmd.cwd(workdir);
        for (k, v) in env {
            cmd.env(k, v);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::Spawn(e.to_string()))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::PtyOpen(e.to_string()))?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::PtyOpen(e.to_string()))?;

        let buffer = Arc::new(Mutex::new(OutputBuffer::default()));
        let last_output_at = Arc::new(Mutex::new(Instant::now()));

        let reader_buffer = buffer.clone();
        let reader_last_output_at = last_output_at.clone();
        std::thread::spawn(move || {
            let mut chunk = [0u8; 4096];
            let mut pending = String::new();
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        pending.push_str(&String::from_utf8_lossy(&chunk[..n]));
                        while let Some(idx) = pending.find('\n') {
                            let line = pending[..idx].trim_end_matches('\r').to_string();
                            pending.drain(..=idx);
                            reader_buffer.lock().unwrap().push_line(line);
                        }
                        *reader_last_output_at.lock().unwrap() = Instant::now();
                    }
                    Err(_) => break,
                }
            }
            if !pending.is_empty() {
                reader_buffer.lock().unwrap().push_line(pending);
            }
        });

        Ok(Self {
            master: pair.master,
            writer,
            child,
            buffer,
            last_output_at,
        })
    }

    /// Write raw text to the subprocess's stdin.
    pub fn write_text(&mut self, text: &str) -> SessionResult<()> {
        self.writer
            .write_all(text.as_bytes())
            .map_err(|e| SessionError::Write(String::new(), e.to_string()))
    }

    /// Synthesize a keypress. Only `enter` is meaningful over a raw PTY
    /// write; other named keys map to their common escape sequences.
    pub fn write_key(&mut self, keyname: &str) -> SessionResult<()> {
        let bytes: &[u8] = match keyname {
            "enter" => b"\r",
            "ctrl_c" => b"\x03",
            "escape" => b"\x1b",
            "tab" => b"\t",
            other => {
                return Err(SessionError::Write(
                    String::new(),
                    format!("unknown key: {other}"),
                ))
            }
        };
        self.writer
            .write_all(bytes)
            .map_err(|e| SessionError::Write(String::new(), e.to_string()))
    }

    /// Resize the PTY's view (no-op on failure — cosmetic only).
    pub fn resize(&self, rows: u16, cols: u16) {
        let _ = self.master.resize(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        });
    }

    /// Whether the subprocess has exited.
    pub fn has_exited(&mut self) -> Option<i32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code() as i32),
            _ => None,
        }
    }

    /// Request graceful termination.
    pub fn kill(&mut self) -> SessionResult<()> {
        self.child
            .kill()
            .map_err(|e| SessionError::Spawn(e.to_string()))
    }
}
