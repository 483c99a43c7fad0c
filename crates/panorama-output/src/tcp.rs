//! Live stream over TCP.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use panorama_media::{encode_frame, Frame, CONTAINER_MAGIC};

use crate::connection::{is_retryable, ConnectionState, ReconnectPolicy};
use crate::error::OutputError;
use crate::{FrameWriter, OutputResult, WriterConfig, FRAME_CHANNEL_CAPACITY};

/// Time allowed for queued records to drain on close.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Counters {
    bytes_sent: AtomicU64,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    reconnects: AtomicU64,
}

/// Stream statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStatistics {
    pub bytes_sent: u64,
    pub frames_sent: u64,
    /// Frames discarded while the link was being re-established.
    pub frames_dropped: u64,
    pub reconnects: u64,
}

/// Streams frame records to `tcp://host:port`.
///
/// Every connection starts with the container magic followed by frame
/// records. A network task on a private tokio runtime owns the socket;
/// `write` hands encoded records to it over a bounded channel, so a slow
/// receiver applies back-pressure to the caller. A link lost to a
/// retryable error is re-established according to the [`ReconnectPolicy`],
/// and frames written meanwhile are dropped rather than queued behind the
/// reconnect. Once the link is given up every later `write` fails.
pub struct TcpStreamWriter {
    state: Arc<RwLock<ConnectionState>>,
    runtime: Option<Runtime>,
    task: Option<JoinHandle<OutputResult<()>>>,
    should_stop: Arc<AtomicBool>,
    sender: Option<Sender<Bytes>>,
    policy: ReconnectPolicy,
    counters: Arc<Counters>,
    config: Option<WriterConfig>,
    buf: BytesMut,
}

impl TcpStreamWriter {
    /// Create a closed writer with the default reconnect policy.
    pub fn new() -> Self {
        Self::with_policy(ReconnectPolicy::default())
    }

    /// Create a closed writer with a custom reconnect policy.
    pub fn with_policy(policy: ReconnectPolicy) -> Self {
        Self {
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            runtime: None,
            task: None,
            should_stop: Arc::new(AtomicBool::new(false)),
            sender: None,
            policy,
            counters: Arc::new(Counters::default()),
            config: None,
            buf: BytesMut::new(),
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.read().clone()
    }

    /// Get stream statistics.
    pub fn statistics(&self) -> StreamStatistics {
        StreamStatistics {
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            frames_sent: self.counters.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.counters.frames_dropped.load(Ordering::Relaxed),
            reconnects: self.counters.reconnects.load(Ordering::Relaxed),
        }
    }
}

impl Default for TcpStreamWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn socket_address(target: &str) -> OutputResult<String> {
    let parsed = Url::parse(target).map_err(|e| OutputError::InvalidTarget(e.to_string()))?;
    if parsed.scheme() != "tcp" {
        return Err(OutputError::InvalidTarget(format!(
            "{target}: expected tcp://host:port"
        )));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| OutputError::InvalidTarget("Missing host".to_string()))?;
    let port = parsed
        .port()
        .ok_or_else(|| OutputError::InvalidTarget("Missing port".to_string()))?;
    Ok(format!("{}:{}", host, port))
}

impl FrameWriter for TcpStreamWriter {
    #[instrument(name = "tcp_stream_open", skip(self, config), fields(target = %config.target))]
    fn open(&mut self, config: &WriterConfig) -> OutputResult<()> {
        if self.sender.is_some() {
            return Err(OutputError::AlreadyOpen);
        }
        let addr = socket_address(&config.target)?;

        info!(addr = %addr, "Connecting to stream receiver");
        set_state(&self.state, ConnectionState::Connecting);

        let runtime = Runtime::new()?;
        let stream = runtime.block_on(connect_with_retry(&addr, &self.policy, &self.state))?;
        set_state(&self.state, ConnectionState::Streaming);

        let (sender, receiver) = crossbeam_channel::bounded(FRAME_CHANNEL_CAPACITY);
        self.should_stop.store(false, Ordering::SeqCst);

        let task = runtime.spawn(run_stream_connection(
            addr,
            stream,
            receiver,
            Arc::clone(&self.state),
            Arc::clone(&self.should_stop),
            self.policy.clone(),
            Arc::clone(&self.counters),
        ));

        self.runtime = Some(runtime);
        self.task = Some(task);
        self.sender = Some(sender);
        self.config = Some(config.clone());
        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> OutputResult<()> {
        let (Some(sender), Some(config)) = (&self.sender, &self.config) else {
            return Err(OutputError::NotOpen);
        };
        if !config.accepts(frame)? {
            return Ok(());
        }
        match &*self.state.read() {
            ConnectionState::Failed { reason } => {
                return Err(OutputError::ConnectionFailed(reason.clone()));
            }
            state if state.is_transient() => {
                self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            _ => {}
        }

        encode_frame(frame, &mut self.buf)?;
        let record = self.buf.split().freeze();
        sender
            .send(record)
            .map_err(|_| OutputError::ChannelDisconnected)
    }

    #[instrument(name = "tcp_stream_close", skip(self))]
    fn close(&mut self) -> OutputResult<()> {
        // Dropping the sender lets the network task drain and exit.
        self.sender = None;
        self.config = None;

        let mut result = Ok(());
        if let (Some(runtime), Some(task)) = (self.runtime.as_ref(), self.task.take()) {
            let drained =
                runtime.block_on(async { tokio::time::timeout(DRAIN_TIMEOUT, task).await });
            result = match drained {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => Err(OutputError::ConnectionFailed(e.to_string())),
                Err(_) => {
                    warn!("Stream did not drain in time");
                    Ok(())
                }
            };
        }

        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(Duration::from_secs(1));
            info!("Disconnected from stream receiver");
        }
        set_state(&self.state, ConnectionState::Disconnected);
        result
    }

    fn is_open(&self) -> bool {
        self.sender.is_some()
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

impl Drop for TcpStreamWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("Stream close on drop: {}", e);
        }
    }
}

fn set_state(state: &RwLock<ConnectionState>, next: ConnectionState) {
    let mut current = state.write();
    if *current != next {
        debug!(from = %*current, to = %next, "Stream link state");
        *current = next;
    }
}

async fn connect_with_retry(
    addr: &str,
    policy: &ReconnectPolicy,
    state: &RwLock<ConnectionState>,
) -> OutputResult<TcpStream> {
    let mut attempt = 0u32;
    loop {
        let outcome = async {
            let mut stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            stream.write_all(CONTAINER_MAGIC).await?;
            Ok::<_, std::io::Error>(stream)
        }
        .await;

        match outcome {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                attempt += 1;
                warn!("Connection attempt {} failed: {}", attempt, e);

                if !policy.should_retry(attempt, &e) {
                    set_state(
                        state,
                        ConnectionState::Failed {
                            reason: format!("{e} (after {attempt} attempts)"),
                        },
                    );
                    return Err(if is_retryable(&e) {
                        OutputError::ReconnectExhausted(attempt)
                    } else {
                        OutputError::ConnectionFailed(e.to_string())
                    });
                }

                set_state(state, ConnectionState::Reconnecting { attempt });
                let delay = policy.delay_for_attempt(attempt);
                info!("Reconnecting in {:?}...", delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn run_stream_connection(
    addr: String,
    stream: TcpStream,
    receiver: Receiver<Bytes>,
    state: Arc<RwLock<ConnectionState>>,
    should_stop: Arc<AtomicBool>,
    policy: ReconnectPolicy,
    counters: Arc<Counters>,
) -> OutputResult<()> {
    let mut connection = Some(stream);

    loop {
        if should_stop.load(Ordering::SeqCst) {
            return Ok(());
        }

        let mut stream = match connection.take() {
            Some(stream) => stream,
            None => {
                counters.reconnects.fetch_add(1, Ordering::Relaxed);
                match connect_with_retry(&addr, &policy, &state).await {
                    Ok(stream) => {
                        set_state(&state, ConnectionState::Streaming);
                        stream
                    }
                    Err(e) => {
                        error!("Stream connection error: {}", e);
                        return Err(e);
                    }
                }
            }
        };

        // Send records until error, stop, or the writer is closed.
        loop {
            if should_stop.load(Ordering::SeqCst) {
                return Ok(());
            }

            match receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(record) => {
                    if let Err(e) = stream.write_all(&record).await {
                        warn!("Send error: {}", e);
                        if !is_retryable(&e) {
                            set_state(&state, ConnectionState::Failed { reason: e.to_string() });
                            return Err(e.into());
                        }
                        set_state(&state, ConnectionState::Reconnecting { attempt: 0 });
                        break;
                    }
                    counters
                        .bytes_sent
                        .fetch_add(record.len() as u64, Ordering::Relaxed);
                    counters.frames_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Record channel disconnected");
                    stream.shutdown().await.ok();
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{VideoTrack, RAW_CONTAINER};
    use panorama_ipc::{EncodePreset, FrameSize};
    use panorama_media::{read_frame, read_header, PixelFormat, Timestamped, VideoInfo};
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    fn config(target: String) -> WriterConfig {
        WriterConfig {
            target,
            container: RAW_CONTAINER.to_string(),
            video: Some(VideoTrack {
                frame_size: FrameSize::new(2, 2),
                frame_rate: 30,
                bitrate: 1_000_000,
                preset: EncodePreset::Veryfast,
            }),
            audio: None,
        }
    }

    fn frame(ts: i64) -> Frame {
        let info = VideoInfo::new(PixelFormat::Bgr24, FrameSize::new(2, 2));
        Frame::video(info, ts, Bytes::from(vec![1u8; 12]))
    }

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_streams_records_to_receiver() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let receiver = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).unwrap();
            received
        });

        let mut writer = TcpStreamWriter::with_policy(fast_policy());
        writer.open(&config(format!("tcp://127.0.0.1:{port}"))).unwrap();
        assert!(writer.state().is_streaming());
        for i in 0..3 {
            writer.write(&frame(i * 33_333)).unwrap();
        }
        writer.close().unwrap();
        assert_eq!(writer.statistics().frames_sent, 3);

        let received = receiver.join().unwrap();
        let mut reader = &received[..];
        read_header(&mut reader).unwrap();
        let stamps: Vec<i64> = std::iter::from_fn(|| read_frame(&mut reader).unwrap())
            .map(|f| f.timestamp_us())
            .collect();
        assert_eq!(stamps, vec![0, 33_333, 66_666]);
    }

    #[test]
    fn test_frames_dropped_while_reconnecting() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let receiver = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).unwrap();
            received
        });

        let mut writer = TcpStreamWriter::with_policy(fast_policy());
        writer.open(&config(format!("tcp://127.0.0.1:{port}"))).unwrap();
        set_state(&writer.state, ConnectionState::Reconnecting { attempt: 1 });
        writer.write(&frame(0)).unwrap();
        set_state(&writer.state, ConnectionState::Streaming);
        writer.write(&frame(33_333)).unwrap();
        writer.close().unwrap();

        let stats = writer.statistics();
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(stats.frames_sent, 1);

        let received = receiver.join().unwrap();
        let mut reader = &received[..];
        read_header(&mut reader).unwrap();
        let first = read_frame(&mut reader).unwrap().unwrap();
        assert_eq!(first.timestamp_us(), 33_333);
    }

    #[test]
    fn test_open_fails_when_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let mut writer = TcpStreamWriter::with_policy(fast_policy());
        let result = writer.open(&config(format!("tcp://127.0.0.1:{port}")));
        assert!(matches!(result, Err(OutputError::ReconnectExhausted(2))));
        assert!(writer.state().is_failed());
        assert!(!writer.is_open());
        assert!(matches!(writer.write(&frame(0)), Err(OutputError::NotOpen)));
    }

    #[test]
    fn test_rejects_bad_targets() {
        assert!(socket_address("tcp://127.0.0.1").is_err());
        assert!(socket_address("udp://127.0.0.1:9").is_err());
        assert_eq!(socket_address("tcp://localhost:9000").unwrap(), "localhost:9000");
    }
}
