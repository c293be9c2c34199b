//! Child process plumbing.
//!
//! The engine consumes three byte streams: stdout and stderr pipes from a
//! plainly spawned child, or the fast path, a pseudoterminal that carries
//! everything the child writes with pipe-sized reads. A reader thread per
//! stream forwards chunks over a bounded channel; the single-threaded core
//! drains the channels once per frame. A disconnected channel is the
//! stream-gone signal.

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child as _, CommandBuilder, MasterPty, PtySize, SlavePty as _};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;

const CHANNEL_DEPTH: usize = 256;
const READ_CHUNK: usize = 64 * 1024;

enum ChildHandle {
    Std(Arc<Mutex<Child>>),
    Pty(Arc<Mutex<Box<dyn portable_pty::Child + Send + Sync>>>),
}

pub struct ChildIo {
    fast: Option<Receiver<Vec<u8>>>,
    stdout: Option<Receiver<Vec<u8>>>,
    stderr: Option<Receiver<Vec<u8>>>,
    handle: ChildHandle,
    // Kept alive for the lifetime of the child; dropping it closes the pty.
    _master: Option<Box<dyn MasterPty + Send>>,
}

fn spawn_reader(mut reader: Box<dyn Read + Send>) -> Receiver<Vec<u8>> {
    let (sender, receiver): (Sender<Vec<u8>>, Receiver<Vec<u8>>) = bounded(CHANNEL_DEPTH);
    std::thread::spawn(move || {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if sender.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    receiver
}

impl ChildIo {
    /// Spawn `program` with `args`. With `fast_pipe` the child runs on a
    /// pseudoterminal sized to the current grid; otherwise it gets plain
    /// stdout/stderr pipes.
    pub fn spawn(
        program: &str,
        args: &[&str],
        fast_pipe: bool,
        cols: u16,
        rows: u16,
    ) -> Result<Self> {
        if fast_pipe {
            let pty = native_pty_system();
            let pair = pty
                .openpty(PtySize { rows, cols, pixel_width: 0, pixel_height: 0 })
                .context("open pty")?;

            let mut cmd = CommandBuilder::new(program);
            cmd.args(args);
            cmd.env("TERM", "xterm-256color");

            let child = pair.slave.spawn_command(cmd).context("spawn on pty")?;
            let reader = pair.master.try_clone_reader().context("clone pty reader")?;

            Ok(Self {
                fast: Some(spawn_reader(reader)),
                stdout: None,
                stderr: None,
                handle: ChildHandle::Pty(Arc::new(Mutex::new(child))),
                _master: Some(pair.master),
            })
        } else {
            let mut child = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .with_context(|| format!("spawn {program:?}"))?;

            let stdout = child.stdout.take().map(|s| spawn_reader(Box::new(s)));
            let stderr = child.stderr.take().map(|s| spawn_reader(Box::new(s)));

            Ok(Self {
                fast: None,
                stdout,
                stderr,
                handle: ChildHandle::Std(Arc::new(Mutex::new(child))),
                _master: None,
            })
        }
    }

    /// Bytes queued on any stream without consuming them.
    pub fn peek_pending(&self) -> usize {
        [&self.fast, &self.stdout, &self.stderr]
            .into_iter()
            .flatten()
            .map(|receiver| receiver.len())
            .sum()
    }

    /// Drain every stream in producer order. Streams whose reader has ended
    /// are dropped; once all are gone the child's output is finished.
    pub fn drain_all(&mut self) -> Vec<Vec<u8>> {
        let mut chunks = Vec::new();
        for stream in [&mut self.fast, &mut self.stdout, &mut self.stderr] {
            let Some(receiver) = stream.as_ref() else { continue };
            loop {
                match receiver.try_recv() {
                    Ok(chunk) => chunks.push(chunk),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        *stream = None;
                        break;
                    }
                }
            }
        }
        chunks
    }

    pub fn all_gone(&self) -> bool {
        self.fast.is_none() && self.stdout.is_none() && self.stderr.is_none()
    }

    pub fn kill(&mut self) {
        match &self.handle {
            ChildHandle::Std(child) => {
                let mut child = child.lock();
                if let Err(error) = child.kill() {
                    log::warn!("kill child: {error}");
                }
                let _ = child.wait();
            }
            ChildHandle::Pty(child) => {
                let mut child = child.lock();
                if let Err(error) = child.kill() {
                    log::warn!("kill child: {error}");
                }
                let _ = child.wait();
            }
        }
        self.fast = None;
        self.stdout = None;
        self.stderr = None;
    }
}

impl Drop for ChildIo {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn collect_output(child: &mut ChildIo, deadline: Duration) -> Vec<u8> {
        let start = Instant::now();
        let mut bytes = Vec::new();
        while start.elapsed() < deadline {
            for chunk in child.drain_all() {
                bytes.extend_from_slice(&chunk);
            }
            if child.all_gone() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        bytes
    }

    #[test]
    fn legacy_pipes_deliver_stdout() {
        let mut child = ChildIo::spawn("echo", &["hello"], false, 80, 24).expect("spawn echo");
        let bytes = collect_output(&mut child, Duration::from_secs(5));
        assert!(bytes.starts_with(b"hello"));
        assert!(child.all_gone());
    }

    #[test]
    fn missing_program_errors_out() {
        assert!(ChildIo::spawn("definitely-not-a-real-binary", &[], false, 80, 24).is_err());
    }

    #[test]
    fn kill_closes_all_streams() {
        let mut child = ChildIo::spawn("sleep", &["30"], false, 80, 24).expect("spawn sleep");
        child.kill();
        assert!(child.all_gone());
    }
}
