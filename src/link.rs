//! ==============================================================================
//! link.rs - serial link to the microcontroller
//! ==============================================================================
//!
//! purpose:
//!     opens the device, turns incoming lines into samples for the session,
//!     and writes settings lines back out.
//!
//! retry policy:
//!     open failure, read error and end-of-stream are all handled the same
//!     way: log, tell the session the device is closed, wait a fixed delay,
//!     open again. no backoff growth, no attempt limit.
//!
//! relationships:
//!     - used by: main.rs (spawns `run` with a SerialLink)
//!     - feeds: session.rs (Event::DeviceOpened / OpenFailed / Sample / DeviceClosed)
//!     - uses: protocol.rs (line parsing)
//!
//! ==============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::protocol;
use crate::session::Event;

/// longest device line kept; anything longer is noise, not a reading
pub const MAX_LINE_BYTES: usize = 64;

/// something that can be opened into a byte stream to the device
pub trait Link: Send + Sync + 'static {
    type Port: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    fn describe(&self) -> String;
    fn open(&self) -> Result<Self::Port>;
}

/// real serial port via tokio-serial
pub struct SerialLink {
    port: String,
    baud_rate: u32,
}

impl SerialLink {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self { port: port.into(), baud_rate }
    }
}

impl Link for SerialLink {
    type Port = tokio_serial::SerialStream;

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.port, self.baud_rate)
    }

    fn open(&self) -> Result<Self::Port> {
        use tokio_serial::SerialPortBuilderExt;

        tokio_serial::new(&self.port, self.baud_rate)
            .open_native_async()
            .with_context(|| format!("failed to open serial port {}", self.port))
    }
}

/// why a read pass over an open device ended
#[derive(Debug, PartialEq, Eq)]
pub enum ReadEnd {
    /// device closed the stream
    Eof,
    /// nobody is listening for samples any more
    SessionGone,
}

/// keep the device open for as long as the session exists
pub async fn run<L: Link>(link: L, reopen_delay: Duration, events: mpsc::Sender<Event>) {
    let name = link.describe();
    let mut attempt: u32 = 0;

    loop {
        if events.is_closed() {
            break;
        }

        let port = match link.open() {
            Ok(port) => port,
            Err(e) => {
                attempt += 1;
                warn!(attempt, "serial open failed: {:#}; retrying in {:?}", e, reopen_delay);
                if events.send(Event::OpenFailed(format!("{:#}", e))).await.is_err() {
                    break;
                }
                tokio::time::sleep(reopen_delay).await;
                continue;
            }
        };
        attempt = 0;
        info!("serial port {} opened", name);

        let (reader, writer) = tokio::io::split(port);
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_lines(writer, line_rx));

        if events.send(Event::DeviceOpened(line_tx)).await.is_err() {
            writer_task.abort();
            break;
        }

        let outcome = read_samples(reader, &events).await;
        writer_task.abort();

        match outcome {
            Ok(ReadEnd::SessionGone) => break,
            Ok(ReadEnd::Eof) => warn!("serial port {} closed; reopening in {:?}", name, reopen_delay),
            Err(e) => warn!("serial port {} error: {}; reopening in {:?}", name, e, reopen_delay),
        }

        if events.send(Event::DeviceClosed).await.is_err() {
            break;
        }
        tokio::time::sleep(reopen_delay).await;
    }

    debug!("serial link task for {} stopped", name);
}

/// split the stream on newlines and forward every numeric line as a sample
///
/// lines longer than `MAX_LINE_BYTES` are dropped whole without buffering them.
pub async fn read_samples<R>(reader: R, events: &mpsc::Sender<Event>) -> std::io::Result<ReadEnd>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(MAX_LINE_BYTES);
    let mut overlong = false;

    loop {
        buf.clear();
        let n = (&mut reader)
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', &mut buf)
            .await?;
        if n == 0 {
            return Ok(ReadEnd::Eof);
        }

        let complete = buf.last() == Some(&b'\n');
        if !complete && n == MAX_LINE_BYTES {
            overlong = true;
            continue;
        }
        if overlong {
            overlong = false;
            debug!("ignoring line longer than {} bytes", MAX_LINE_BYTES);
            continue;
        }

        let line = String::from_utf8_lossy(&buf);
        match protocol::parse_sample_line(&line) {
            Some(value) => {
                if events.send(Event::Sample(value)).await.is_err() {
                    return Ok(ReadEnd::SessionGone);
                }
            }
            None => debug!(line = %line.trim(), "ignoring non-numeric line"),
        }
    }
}

/// drain outbound lines to the device; failures are logged and dropped
async fn write_lines<W>(mut writer: W, mut lines: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = lines.recv().await {
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            warn!("serial write failed, dropping {:?}: {}", line.trim_end(), e);
            continue;
        }
        if let Err(e) = writer.flush().await {
            warn!("serial flush failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::io::DuplexStream;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    /// hands out queued in-memory ports; errors once the queue is empty
    struct MockLink {
        ports: Mutex<VecDeque<DuplexStream>>,
    }

    impl MockLink {
        fn new(ports: Vec<DuplexStream>) -> Self {
            Self { ports: Mutex::new(ports.into()) }
        }
    }

    impl Link for MockLink {
        type Port = DuplexStream;

        fn describe(&self) -> String {
            "mock".to_string()
        }

        fn open(&self) -> Result<DuplexStream> {
            self.ports
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("no device attached"))
        }
    }

    async fn next_event(rx: &mut mpsc::Receiver<Event>) -> Event {
        timeout(WAIT, rx.recv()).await.expect("timed out").expect("channel closed")
    }

    #[tokio::test]
    async fn test_reader_skips_malformed_lines() {
        let (tx, mut rx) = mpsc::channel(16);
        let input: &[u8] = b"119.98\nbad\n\n120.02\r\nBoot v1.2\n";

        let end = read_samples(input, &tx).await.unwrap();
        assert_eq!(end, ReadEnd::Eof);
        drop(tx);

        let mut values = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                Event::Sample(v) => values.push(v),
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(values, vec![119.98, 120.02]);
    }

    #[tokio::test]
    async fn test_reader_tolerates_invalid_utf8() {
        let (tx, mut rx) = mpsc::channel(16);
        let input: &[u8] = b"\xff\xfe\n42.5\n";

        read_samples(input, &tx).await.unwrap();
        match rx.try_recv() {
            Ok(Event::Sample(v)) => assert_eq!(v, 42.5),
            other => panic!("unexpected {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reader_drops_overlong_lines() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut input = b"1.0\n".to_vec();
        input.extend(std::iter::repeat(b'x').take(10 * MAX_LINE_BYTES));
        input.extend_from_slice(b"\n");
        // a long run of digits would parse, but is still dropped
        input.extend(std::iter::repeat(b'7').take(MAX_LINE_BYTES + 1));
        input.extend_from_slice(b"\n2.0\n");

        read_samples(&input[..], &tx).await.unwrap();
        drop(tx);

        let mut values = Vec::new();
        while let Some(Event::Sample(v)) = rx.recv().await {
            values.push(v);
        }
        assert_eq!(values, vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_reader_stops_when_session_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let input: &[u8] = b"1.0\n2.0\n";
        assert_eq!(read_samples(input, &tx).await.unwrap(), ReadEnd::SessionGone);
    }

    #[tokio::test]
    async fn test_run_opens_reads_writes_and_reopens() {
        let (host_a, mut device_a) = tokio::io::duplex(256);
        let (host_b, _device_b) = tokio::io::duplex(256);
        let link = MockLink::new(vec![host_a, host_b]);
        let (tx, mut rx) = mpsc::channel(16);

        let task = tokio::spawn(run(link, Duration::from_millis(5), tx));

        let writer = match next_event(&mut rx).await {
            Event::DeviceOpened(writer) => writer,
            other => panic!("expected open, got {:?}", other),
        };

        writer.send("120,80,75,-1,-1\n".to_string()).unwrap();
        let mut received = vec![0u8; 16];
        timeout(WAIT, device_a.read_exact(&mut received)).await.unwrap().unwrap();
        assert_eq!(&received, b"120,80,75,-1,-1\n");

        device_a.write_all(b"1.5\nhello\n2.5\n").await.unwrap();
        drop(device_a);

        assert!(matches!(next_event(&mut rx).await, Event::Sample(v) if v == 1.5));
        assert!(matches!(next_event(&mut rx).await, Event::Sample(v) if v == 2.5));
        assert!(matches!(next_event(&mut rx).await, Event::DeviceClosed));
        assert!(matches!(next_event(&mut rx).await, Event::DeviceOpened(_)));

        drop(rx);
        task.abort();
    }

    #[tokio::test]
    async fn test_run_retries_until_device_appears() {
        let (tx, mut rx) = mpsc::channel(4);
        let link = MockLink::new(Vec::new());
        let task = tokio::spawn(run(link, Duration::from_millis(5), tx));

        for _ in 0..2 {
            match next_event(&mut rx).await {
                Event::OpenFailed(reason) => assert!(reason.contains("no device attached")),
                other => panic!("expected open failure, got {:?}", other),
            }
        }
        assert!(!task.is_finished());

        drop(rx);
        timeout(WAIT, task).await.expect("task should stop once the session is gone").unwrap();
    }
}
