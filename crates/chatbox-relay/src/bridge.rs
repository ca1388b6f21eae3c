use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use chatbox_core::config::{HANDOFF_CAPACITY, POLL_INTERVAL_MS, WORKER_JOIN_TIMEOUT_MS};

use crate::sink::DeliverySink;
use crate::stream::{SseParser, StreamEvent};
use crate::upstream::{ByteSource, UpstreamError};

/// How one relayed stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// A terminal event reached the downstream sink.
    Completed,
    /// Downstream went away mid-stream; the upstream read was aborted.
    Cancelled,
}

/// Client-facing text for a worker that died without a terminal event.
const WORKER_FAULT: &str = "Internal relay error";

/// How the delivery loop stopped, before the worker handle is resolved.
enum PumpEnd {
    /// A terminal event was forwarded to the sink.
    Terminal,
    /// A sink write failed; the worker has been cancelled.
    SinkFailed,
    /// The worker stopped (or its channel closed) without a terminal event.
    WorkerGone,
}

/// Bridges one blocking upstream read onto the async delivery path.
///
/// A dedicated worker opens the byte source, feeds every chunk into one
/// [`SseParser`], and pushes the produced events through a bounded FIFO
/// channel; [`deliver`](Self::deliver) drains that channel into a sink.
/// Each bridge serves exactly one stream and owns its parser, worker and
/// channel outright.
pub struct RelayBridge {
    rx: mpsc::Receiver<StreamEvent>,
    worker: JoinHandle<()>,
    cancel: CancellationToken,
}

impl RelayBridge {
    /// Spawn the worker over whatever byte source `open` yields.
    ///
    /// `open` runs on the worker thread, so blocking construction (the live
    /// HTTP request) happens off the async runtime; an `Err` from it becomes
    /// the stream's single `Error` event.
    pub fn spawn<F, S>(open: F) -> Self
    where
        F: FnOnce() -> Result<S, UpstreamError> + Send + 'static,
        S: ByteSource + 'static,
    {
        let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();

        let worker = tokio::task::spawn_blocking(move || run_worker(open, tx, worker_cancel));

        Self { rx, worker, cancel }
    }

    /// Forward events to `sink` in arrival order until the stream ends.
    ///
    /// Guarantees termination: when the worker stops without producing a
    /// terminal event, one is synthesized here. A clean worker exit (upstream
    /// EOF with nothing queued) gets the fallback `Done`; a worker that
    /// panicked mid-stream gets a generic `Error` instead. A failed sink
    /// write cancels the worker and suppresses all further output.
    pub async fn deliver<S>(mut self, sink: &mut S) -> RelayOutcome
    where
        S: DeliverySink + ?Sized,
    {
        let poll = Duration::from_millis(POLL_INTERVAL_MS);
        let mut deltas = 0usize;

        let end = loop {
            match tokio::time::timeout(poll, self.rx.recv()).await {
                Ok(Some(event)) => {
                    let terminal = event.is_terminal();
                    if matches!(event, StreamEvent::ContentDelta { .. }) {
                        deltas += 1;
                    }
                    if let Err(e) = forward(sink, event).await {
                        debug!(error = %e, "sink write failed, cancelling upstream");
                        self.cancel.cancel();
                        break PumpEnd::SinkFailed;
                    }
                    if terminal {
                        break PumpEnd::Terminal;
                    }
                }
                Ok(None) => {
                    // channel closed with no terminal event seen
                    break PumpEnd::WorkerGone;
                }
                Err(_) => {
                    if self.worker.is_finished() && self.rx.is_empty() {
                        break PumpEnd::WorkerGone;
                    }
                    // worker still running or events queued, keep polling
                }
            }
        };

        // Bounded wait for worker teardown; never stall delivery on it. The
        // join result also tells a clean exit apart from a mid-stream panic.
        let join = Duration::from_millis(WORKER_JOIN_TIMEOUT_MS);
        let faulted = match tokio::time::timeout(join, &mut self.worker).await {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                warn!(error = %e, "relay worker panicked");
                true
            }
            Err(_) => {
                warn!("relay worker still running after join timeout, detaching");
                false
            }
        };

        let outcome = match end {
            PumpEnd::Terminal => RelayOutcome::Completed,
            PumpEnd::SinkFailed => RelayOutcome::Cancelled,
            PumpEnd::WorkerGone => synthesize_terminal(faulted, sink).await,
        };

        debug!(deltas, outcome = ?outcome, "relay stream finished");
        outcome
    }
}

/// Produce the stream's terminal event when the worker never sent one: a
/// fallback `Done` after a clean exit, a generic `Error` after a panic.
async fn synthesize_terminal<S>(faulted: bool, sink: &mut S) -> RelayOutcome
where
    S: DeliverySink + ?Sized,
{
    let result = if faulted {
        sink.on_error(WORKER_FAULT).await
    } else {
        sink.on_done(None).await
    };
    match result {
        Ok(()) => RelayOutcome::Completed,
        Err(_) => RelayOutcome::Cancelled,
    }
}

async fn forward<S>(sink: &mut S, event: StreamEvent) -> Result<(), crate::sink::SinkError>
where
    S: DeliverySink + ?Sized,
{
    match event {
        StreamEvent::ContentDelta { text } => sink.on_delta(&text).await,
        StreamEvent::Done { finish_reason } => sink.on_done(finish_reason.as_deref()).await,
        StreamEvent::Error { message } => sink.on_error(&message).await,
    }
}

/// Worker body: read chunks, parse, push events. Runs to the first terminal
/// event, source EOF/failure, cancellation, or receiver drop.
fn run_worker<F, S>(open: F, tx: mpsc::Sender<StreamEvent>, cancel: CancellationToken)
where
    F: FnOnce() -> Result<S, UpstreamError>,
    S: ByteSource,
{
    let mut source = match open() {
        Ok(s) => s,
        Err(e) => {
            let _ = tx.blocking_send(StreamEvent::Error {
                message: e.to_string(),
            });
            return;
        }
    };

    let mut parser = SseParser::new();
    loop {
        if cancel.is_cancelled() {
            debug!("relay worker cancelled, dropping upstream connection");
            return;
        }
        match source.next_chunk() {
            Ok(Some(chunk)) => {
                for event in parser.feed(&chunk) {
                    let terminal = event.is_terminal();
                    if tx.blocking_send(event).is_err() {
                        return; // receiver dropped
                    }
                    if terminal {
                        return;
                    }
                }
            }
            Ok(None) => {
                // EOF without an explicit terminator
                if let Some(event) = parser.finalize() {
                    let _ = tx.blocking_send(event);
                }
                return;
            }
            Err(e) => {
                let _ = tx.blocking_send(StreamEvent::Error {
                    message: e.to_string(),
                });
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{SinkError, SinkState};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct RecordingSink {
        events: Vec<String>,
        state: SinkState,
        fail_after_deltas: Option<usize>,
        deltas_seen: usize,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                events: Vec::new(),
                state: SinkState::default(),
                fail_after_deltas: None,
                deltas_seen: 0,
            }
        }

        fn failing_after(deltas: usize) -> Self {
            Self {
                fail_after_deltas: Some(deltas),
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl DeliverySink for RecordingSink {
        async fn on_delta(&mut self, text: &str) -> Result<(), SinkError> {
            if let Some(n) = self.fail_after_deltas {
                if self.deltas_seen >= n {
                    self.state = SinkState::Closed;
                    return Err(SinkError::Closed);
                }
            }
            self.state.begin_write()?;
            self.deltas_seen += 1;
            self.events.push(format!("delta:{text}"));
            Ok(())
        }

        async fn on_done(&mut self, finish_reason: Option<&str>) -> Result<(), SinkError> {
            self.state.begin_terminal()?;
            self.events.push(format!("done:{finish_reason:?}"));
            Ok(())
        }

        async fn on_error(&mut self, message: &str) -> Result<(), SinkError> {
            self.state.begin_terminal()?;
            self.events.push(format!("error:{message}"));
            Ok(())
        }
    }

    struct ScriptedSource {
        chunks: VecDeque<Vec<u8>>,
        delay: Duration,
        reads: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(chunks: Vec<&[u8]>) -> Self {
            Self {
                chunks: chunks.into_iter().map(|c| c.to_vec()).collect(),
                delay: Duration::ZERO,
                reads: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl ByteSource for ScriptedSource {
        fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, UpstreamError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            Ok(self.chunks.pop_front())
        }
    }

    struct PanickySource;

    impl ByteSource for PanickySource {
        fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, UpstreamError> {
            panic!("worker blew up");
        }
    }

    #[tokio::test]
    async fn relays_deltas_and_done_across_odd_chunk_splits() {
        let source = ScriptedSource::new(vec![
            b"data: {\"choices\":[{\"de",
            b"lta\":{\"content\":\"Hi\"}}]}\n",
            b"data: [D",
            b"ONE]\n\n",
        ]);
        let bridge = RelayBridge::spawn(move || Ok(source));

        let mut sink = RecordingSink::new();
        let outcome = bridge.deliver(&mut sink).await;

        assert_eq!(outcome, RelayOutcome::Completed);
        assert_eq!(sink.events, vec!["delta:Hi", "done:None"]);
        assert!(sink.state.is_closed());
    }

    #[tokio::test]
    async fn open_failure_becomes_single_error_event() {
        let bridge = RelayBridge::spawn(|| -> Result<ScriptedSource, UpstreamError> {
            Err(UpstreamError::Status {
                status: 401,
                body: r#"{"error":"bad key"}"#.to_string(),
            })
        });

        let mut sink = RecordingSink::new();
        let outcome = bridge.deliver(&mut sink).await;

        assert_eq!(outcome, RelayOutcome::Completed);
        assert_eq!(sink.events, vec![r#"error:API error: {"error":"bad key"}"#]);
    }

    #[tokio::test]
    async fn source_read_failure_becomes_error_event() {
        struct FailingSource;
        impl ByteSource for FailingSource {
            fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, UpstreamError> {
                Err(UpstreamError::Timeout)
            }
        }

        let bridge = RelayBridge::spawn(|| Ok(FailingSource));
        let mut sink = RecordingSink::new();
        bridge.deliver(&mut sink).await;

        assert_eq!(sink.events, vec!["error:Request timeout"]);
    }

    #[tokio::test]
    async fn eof_without_terminator_yields_fallback_done() {
        let source = ScriptedSource::new(vec![
            b"data: {\"choices\":[{\"delta\":{\"content\":\"one\"}}]}\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"two\"}}]}\n",
        ]);
        let bridge = RelayBridge::spawn(move || Ok(source));

        let mut sink = RecordingSink::new();
        let outcome = bridge.deliver(&mut sink).await;

        assert_eq!(outcome, RelayOutcome::Completed);
        assert_eq!(sink.events, vec!["delta:one", "delta:two", "done:None"]);
    }

    #[tokio::test]
    async fn worker_panic_becomes_error_event() {
        let bridge = RelayBridge::spawn(|| Ok(PanickySource));
        let mut sink = RecordingSink::new();
        let outcome = bridge.deliver(&mut sink).await;

        assert_eq!(outcome, RelayOutcome::Completed);
        assert_eq!(sink.events, vec![format!("error:{WORKER_FAULT}")]);
        assert!(sink.state.is_closed());
    }

    #[tokio::test]
    async fn worker_panic_after_deltas_preserves_them() {
        struct TripwireSource {
            chunks: VecDeque<Vec<u8>>,
        }
        impl ByteSource for TripwireSource {
            fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, UpstreamError> {
                match self.chunks.pop_front() {
                    Some(chunk) => Ok(Some(chunk)),
                    None => panic!("worker blew up"),
                }
            }
        }

        let source = TripwireSource {
            chunks: VecDeque::from([
                b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n".to_vec(),
            ]),
        };
        let bridge = RelayBridge::spawn(move || Ok(source));

        let mut sink = RecordingSink::new();
        bridge.deliver(&mut sink).await;

        assert_eq!(
            sink.events,
            vec!["delta:Hi".to_string(), format!("error:{WORKER_FAULT}")]
        );
    }

    #[tokio::test]
    async fn sink_failure_cancels_worker_and_suppresses_writes() {
        let delta_line: &[u8] = b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n";
        let mut source = ScriptedSource::new(vec![delta_line; 50]);
        source.delay = Duration::from_millis(5);
        let reads = source.reads.clone();

        let bridge = RelayBridge::spawn(move || Ok(source));
        let mut sink = RecordingSink::failing_after(1);
        let outcome = bridge.deliver(&mut sink).await;

        assert_eq!(outcome, RelayOutcome::Cancelled);
        // only the first delta ever reached the sink
        assert_eq!(sink.events, vec!["delta:x"]);
        // the worker stopped reading well short of the script
        assert!(reads.load(Ordering::SeqCst) < 50);
    }

    #[tokio::test]
    async fn events_arrive_in_parser_order() {
        let source = ScriptedSource::new(vec![
            b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\
              data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\
              data: {\"choices\":[{\"delta\":{\"content\":\"c\"}}]}\n\
              data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n",
        ]);
        let bridge = RelayBridge::spawn(move || Ok(source));

        let mut sink = RecordingSink::new();
        bridge.deliver(&mut sink).await;

        assert_eq!(
            sink.events,
            vec!["delta:a", "delta:b", "delta:c", "done:Some(\"stop\")"]
        );
    }
}
