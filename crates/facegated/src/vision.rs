//! Face detection and feature extraction through an external helper process.
//!
//! The helper wraps the vendor inference SDK. Each request is one JSON header
//! line followed by `len` bytes of raw 8-bit grayscale frame; each reply is
//! one JSON line:
//!
//! ```text
//! -> {"op":"detect","width":320,"height":240,"len":76800}
//! <- {"faces":[{"x":10,"y":12,"width":96,"height":96}]}
//! -> {"op":"eyes","width":320,"height":240,"len":76800,"face":{...}}
//! <- {"eyes":true}
//! -> {"op":"extract","width":320,"height":240,"len":76800,"face":{...}}
//! <- {"descriptor":[0.12,-0.03,...]}        or {"descriptor":null}
//! <- {"error":"..."}                        on helper-side failure
//! ```
//!
//! Pipe I/O runs on two background threads so a stalled helper costs the
//! control loop at most one reply timeout. Every failure degrades to "no
//! faces", "no eyes" or "no descriptor". A helper that exits, garbles a
//! reply or misses the timeout is killed and respawned on the next request.

use std::cell::RefCell;
use std::io::{self, BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::rc::Rc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use facegate_core::{Descriptor, FaceBox, FaceDetector, FaceFeatureProvider, Frame};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HelperError {
    #[error("failed to start vision helper {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("vision helper I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("vision helper closed its pipes")]
    Closed,
    #[error("vision helper did not reply within {0:?}")]
    Timeout(Duration),
    #[error("malformed vision helper reply: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error("vision helper reported: {0}")]
    Remote(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Detect,
    Eyes,
    Extract,
}

#[derive(Debug, Serialize)]
struct RequestHeader<'a> {
    op: Op,
    width: u32,
    height: u32,
    len: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    face: Option<&'a FaceBox>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Reply {
    #[serde(default)]
    pub faces: Option<Vec<FaceBox>>,
    #[serde(default)]
    pub eyes: Option<bool>,
    #[serde(default)]
    pub descriptor: Option<Vec<f32>>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Request/reply framing over a pair of byte pipes.
///
/// After a [`HelperError::Timeout`] a late reply may still arrive, so the
/// client must be discarded together with the helper.
pub struct HelperClient {
    requests: mpsc::Sender<Vec<u8>>,
    replies: mpsc::Receiver<io::Result<String>>,
    writer: JoinHandle<()>,
    timeout: Duration,
}

impl HelperClient {
    pub fn new<R, W>(reader: R, writer: W, timeout: Duration) -> io::Result<Self>
    where
        R: BufRead + Send + 'static,
        W: Write + Send + 'static,
    {
        let (request_tx, request_rx) = mpsc::channel::<Vec<u8>>();
        let (reply_tx, reply_rx) = mpsc::channel();

        let writer = thread::Builder::new()
            .name("vision-writer".into())
            .spawn(move || write_requests(writer, request_rx))?;
        thread::Builder::new()
            .name("vision-reader".into())
            .spawn(move || read_replies(reader, reply_tx))?;

        Ok(Self {
            requests: request_tx,
            replies: reply_rx,
            writer,
            timeout,
        })
    }

    pub fn call(&mut self, op: Op, frame: &Frame, face: Option<&FaceBox>) -> Result<Reply, HelperError> {
        let header = RequestHeader {
            op,
            width: frame.width,
            height: frame.height,
            len: frame.data.len(),
            face,
        };
        let mut message = serde_json::to_vec(&header)?;
        message.push(b'\n');
        message.extend_from_slice(&frame.data);
        self.requests.send(message).map_err(|_| HelperError::Closed)?;

        let line = match self.replies.recv_timeout(self.timeout) {
            Ok(line) => line?,
            Err(RecvTimeoutError::Timeout) => return Err(HelperError::Timeout(self.timeout)),
            Err(RecvTimeoutError::Disconnected) => return Err(HelperError::Closed),
        };
        let reply: Reply = serde_json::from_str(line.trim_end())?;
        match reply.error {
            Some(message) => Err(HelperError::Remote(message)),
            None => Ok(reply),
        }
    }

    /// Close the request pipe and wait until everything queued is written.
    #[cfg(test)]
    fn finish(self) {
        drop(self.requests);
        let _ = self.writer.join();
    }
}

fn write_requests<W: Write>(mut writer: W, requests: mpsc::Receiver<Vec<u8>>) {
    for message in requests {
        let result = writer.write_all(&message).and_then(|()| writer.flush());
        if let Err(e) = result {
            tracing::debug!(error = %e, "vision helper stdin closed");
            return;
        }
    }
}

fn read_replies<R: BufRead>(mut reader: R, replies: mpsc::Sender<io::Result<String>>) {
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => return,
            Ok(_) => {
                if replies.send(Ok(line)).is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = replies.send(Err(e));
                return;
            }
        }
    }
}

struct Running {
    child: Child,
    client: HelperClient,
}

/// The helper child process, spawned lazily and respawned after failures.
pub struct HelperProcess {
    command: String,
    args: Vec<String>,
    timeout: Duration,
    running: Option<Running>,
}

impl HelperProcess {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            timeout,
            running: None,
        }
    }

    /// Start the helper now so a missing executable fails at startup.
    pub fn start(&mut self) -> Result<(), HelperError> {
        self.ensure_running().map(|_| ())
    }

    fn ensure_running(&mut self) -> Result<&mut Running, HelperError> {
        if self.running.is_none() {
            let mut child = Command::new(&self.command)
                .args(&self.args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .spawn()
                .map_err(|source| HelperError::Spawn {
                    command: self.command.clone(),
                    source,
                })?;
            let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
                let _ = child.kill();
                let _ = child.wait();
                return Err(HelperError::Closed);
            };
            let client = match HelperClient::new(BufReader::new(stdout), stdin, self.timeout) {
                Ok(client) => client,
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(e.into());
                }
            };
            tracing::info!(command = %self.command, pid = child.id(), "vision helper started");
            self.running = Some(Running { child, client });
        }
        self.running.as_mut().ok_or(HelperError::Closed)
    }

    pub fn call(&mut self, op: Op, frame: &Frame, face: Option<&FaceBox>) -> Result<Reply, HelperError> {
        let result = self.ensure_running()?.client.call(op, frame, face);
        if let Err(
            HelperError::Io(_) | HelperError::Closed | HelperError::Timeout(_) | HelperError::Protocol(_),
        ) = &result
        {
            self.stop();
        }
        result
    }

    fn stop(&mut self) {
        if let Some(mut running) = self.running.take() {
            let _ = running.child.kill();
            let _ = running.child.wait();
            tracing::warn!(command = %self.command, "vision helper stopped");
        }
    }
}

impl Drop for HelperProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Shared handle; the daemon hands one clone to the detector slot and one
/// to the feature slot of [`facegate_core::Vision`].
#[derive(Clone)]
pub struct VisionHelper {
    process: Rc<RefCell<HelperProcess>>,
}

impl VisionHelper {
    pub fn new(process: HelperProcess) -> Self {
        Self {
            process: Rc::new(RefCell::new(process)),
        }
    }

    fn call(&self, op: Op, frame: &Frame, face: Option<&FaceBox>) -> Option<Reply> {
        match self.process.borrow_mut().call(op, frame, face) {
            Ok(reply) => Some(reply),
            Err(e) => {
                tracing::warn!(?op, error = %e, "vision helper request failed");
                None
            }
        }
    }
}

impl FaceDetector for VisionHelper {
    fn detect(&mut self, frame: &Frame) -> Vec<FaceBox> {
        self.call(Op::Detect, frame, None)
            .and_then(|reply| reply.faces)
            .unwrap_or_default()
    }

    fn eyes_visible(&mut self, frame: &Frame, face: &FaceBox) -> bool {
        self.call(Op::Eyes, frame, Some(face))
            .and_then(|reply| reply.eyes)
            .unwrap_or(false)
    }
}

impl FaceFeatureProvider for VisionHelper {
    fn extract(&mut self, frame: &Frame, face: &FaceBox) -> Option<Descriptor> {
        self.call(Op::Extract, frame, Some(face))
            .and_then(|reply| reply.descriptor)
            .filter(|values| !values.is_empty())
            .map(Descriptor::new)
    }
}
