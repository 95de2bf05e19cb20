//! One connection, many in-flight requests.
//!
//! Every request borrows a stream id from a pool of 128, registers a pending
//! job keyed by that id, and hands its serialized frame to the writer task.
//! A single reader task consumes response frames in arrival order and
//! completes the job whose id the frame carries; arrival order is irrelevant.
//! A job is completed exactly once: by its response, by `fail_pending`, or by
//! the disconnect sweep.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::instrument;

use crate::codec::{CodecRegistry, Value};
use crate::constant::{Consistency, EventType, QueryFlags, STREAM_ID_POOL_SIZE};
use crate::error::{Error, Result};
use crate::protocol::frame::FrameDecoder;
use crate::protocol::request;
use crate::protocol::response::{self, Event, Output, Prepared, Response};

/// Per-request correlation tag; request ids are 0..=127, negative ids are
/// server-initiated.
pub type StreamId = i8;

type Completion = oneshot::Sender<Result<Response>>;

/// The eventual outcome of a begun request. Pass to [`Conn::end`].
pub struct QueryHandle {
    stream_id: StreamId,
    rx: oneshot::Receiver<Result<Response>>,
}

impl QueryHandle {
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }
}

/// StreamId -> pending job table plus the free-id pool. The one shared
/// mutable resource of a connection; every access holds the mutex.
struct PendingTable {
    free: Vec<StreamId>,
    jobs: Vec<Option<Completion>>,
    closed: bool,
}

impl PendingTable {
    fn new() -> Self {
        Self {
            // LIFO; reversed so allocation starts from id 0
            free: (0..STREAM_ID_POOL_SIZE).rev().map(|id| id as i8).collect(),
            jobs: (0..STREAM_ID_POOL_SIZE).map(|_| None).collect(),
            closed: false,
        }
    }

    fn allocate(&mut self, tx: Completion) -> Result<StreamId> {
        if self.closed {
            return Err(Error::ConnectionLost);
        }
        let id = self.free.pop().ok_or(Error::Exhausted)?;
        let slot = &mut self.jobs[id as usize];
        assert!(slot.is_none(), "stream id {id} double allocation");
        *slot = Some(tx);
        Ok(id)
    }

    /// Remove the job for an id and return its id to the free pool.
    /// An id is only reusable after this.
    fn remove(&mut self, id: StreamId) -> Option<Completion> {
        let sender = self.jobs.get_mut(id as usize)?.take()?;
        self.free.push(id);
        Some(sender)
    }

    /// Disconnect sweep: close the table and drain every pending job.
    fn close(&mut self) -> Vec<Completion> {
        self.closed = true;
        let mut senders = Vec::new();
        for (id, slot) in self.jobs.iter_mut().enumerate() {
            if let Some(tx) = slot.take() {
                self.free.push(id as StreamId);
                senders.push(tx);
            }
        }
        senders
    }
}

struct Shared {
    registry: Arc<CodecRegistry>,
    table: Mutex<PendingTable>,
    events: mpsc::UnboundedSender<Event>,
}

impl Shared {
    fn table(&self) -> MutexGuard<'_, PendingTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn complete(&self, stream_id: StreamId, outcome: Result<Response>) {
        match self.table().remove(stream_id) {
            // The receiver may be gone (abandoned handle); the id is
            // freed either way.
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => tracing::warn!(stream_id, "response for unknown stream id discarded"),
        }
    }

    fn fail_all(&self) {
        for tx in self.table().close() {
            let _ = tx.send(Err(Error::ConnectionLost));
        }
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn").finish_non_exhaustive()
    }
}

pub struct Conn {
    shared: Arc<Shared>,
    writer: mpsc::UnboundedSender<Vec<u8>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl Conn {
    /// Connect and perform the STARTUP handshake (async)
    pub async fn new<O: TryInto<crate::opts::Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        Self::new_with_registry(opts, Arc::new(CodecRegistry::with_defaults())).await
    }

    /// Connect with a caller-supplied codec registry (async)
    pub async fn new_with_registry<O: TryInto<crate::opts::Opts>>(
        opts: O,
        registry: Arc<CodecRegistry>,
    ) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts: crate::opts::Opts = opts.try_into()?;

        let host = opts
            .host
            .as_ref()
            .ok_or_else(|| Error::BadConfig("Missing host in connection options".to_string()))?;

        let stream = TcpStream::connect((host.as_str(), opts.port)).await?;
        stream.set_nodelay(opts.tcp_nodelay)?;

        Self::new_with_stream(stream, &opts, registry).await
    }

    /// Build a connection over an already-established stream (async)
    pub async fn new_with_stream(
        stream: TcpStream,
        opts: &crate::opts::Opts,
        registry: Arc<CodecRegistry>,
    ) -> Result<Self> {
        let (read_half, mut write_half) = stream.into_split();
        let mut framed = FramedRead::new(read_half, FrameDecoder::new());

        // STARTUP on stream 0, before any multiplexing
        let mut buf = Vec::new();
        request::write_startup(&mut buf, 0);
        write_half.write_all(&buf).await?;

        loop {
            let frame = framed.next().await.ok_or(Error::ConnectionLost)??;
            match response::parse(&frame, &registry)? {
                Response::Ready => break,
                Response::Authenticate(_) => {
                    let user = opts.user.as_deref().ok_or_else(|| {
                        Error::BadConfig(
                            "server requires authentication but no user is configured".to_string(),
                        )
                    })?;
                    let password = opts.password.as_deref().unwrap_or("");

                    let mut buf = Vec::new();
                    request::write_credentials(
                        &mut buf,
                        0,
                        &[("username", user), ("password", password)],
                    );
                    write_half.write_all(&buf).await?;
                }
                Response::Error(payload) => return Err(Error::Server(payload)),
                _ => {
                    return Err(Error::ProtocolViolation(
                        "unexpected response during startup".to_string(),
                    ));
                }
            }
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            registry,
            table: Mutex::new(PendingTable::new()),
            events: event_tx,
        });

        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_loop(write_half, write_rx, Arc::clone(&shared)));
        let reader_task = tokio::spawn(read_loop(framed, Arc::clone(&shared)));

        let conn = Self {
            shared,
            writer: write_tx,
            events: Mutex::new(Some(event_rx)),
            reader_task,
            writer_task,
        };

        if let Some(keyspace) = &opts.keyspace {
            conn.query(&format!("USE {keyspace}"), Consistency::One, false)
                .await?;
        }

        Ok(conn)
    }

    /// Get the codec registry shared with this connection
    pub fn registry(&self) -> &CodecRegistry {
        &self.shared.registry
    }

    /// Take the server-push event stream. Events arrive after `register`;
    /// the receiver can be taken once.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<Event>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Allocate a stream id, register the pending job, serialize with the
    /// allocated id and hand the frame to the writer. Does not wait for
    /// the response.
    fn begin_with<F>(&self, serialize: F) -> Result<QueryHandle>
    where
        F: FnOnce(&mut Vec<u8>, StreamId),
    {
        let (tx, rx) = oneshot::channel();
        let stream_id = self.shared.table().allocate(tx)?;

        let mut buf = Vec::new();
        serialize(&mut buf, stream_id);

        if self.writer.send(buf).is_err() {
            // Writer task is gone; roll the registration back.
            let _ = self.shared.table().remove(stream_id);
            return Err(Error::ConnectionLost);
        }

        Ok(QueryHandle { stream_id, rx })
    }

    /// Begin a QUERY request; completion is observed via [`Conn::end`]
    pub fn begin_query(
        &self,
        cql: &str,
        consistency: Consistency,
        tracing_enabled: bool,
    ) -> Result<QueryHandle> {
        let flags = query_flags(tracing_enabled);
        self.begin_with(|out, id| request::write_query(out, id, cql, consistency, flags))
    }

    /// Begin a PREPARE request
    pub fn begin_prepare(&self, cql: &str) -> Result<QueryHandle> {
        self.begin_with(|out, id| request::write_prepare(out, id, cql))
    }

    /// Begin an EXECUTE request. Parameters are encoded through the codec
    /// registry using the prepared statement's parameter metadata; `None`
    /// sends a null.
    pub fn begin_execute(
        &self,
        prepared: &Prepared,
        params: &[Option<Value>],
        consistency: Consistency,
        tracing_enabled: bool,
    ) -> Result<QueryHandle> {
        let columns = prepared.metadata.columns();
        if params.len() != columns.len() {
            return Err(Error::TypeMismatch {
                expected: "one parameter per prepared column",
                actual: format!("{} parameters for {} columns", params.len(), columns.len()),
            });
        }

        let mut encoded = Vec::with_capacity(params.len());
        for (param, col) in params.iter().zip(columns) {
            encoded.push(match param {
                Some(value) => Some(self.shared.registry.encode(&col.type_info, value)?),
                None => None,
            });
        }

        let flags = query_flags(tracing_enabled);
        self.begin_with(|out, id| {
            request::write_execute(out, id, &prepared.id, &encoded, consistency, flags)
        })
    }

    /// Begin a REGISTER request for server-push events
    pub fn begin_register(&self, events: &[EventType]) -> Result<QueryHandle> {
        self.begin_with(|out, id| request::write_register(out, id, events))
    }

    /// Begin an OPTIONS request
    pub fn begin_options(&self) -> Result<QueryHandle> {
        self.begin_with(|out, id| request::write_options(out, id))
    }

    /// Wait for the classified response of a begun request
    async fn end_response(&self, handle: QueryHandle) -> Result<Response> {
        match handle.rx.await {
            Ok(outcome) => outcome,
            // The completion sender was dropped without firing; only
            // possible if the reader task died mid-sweep.
            Err(_) => Err(Error::ConnectionLost),
        }
    }

    /// Wait for the outcome of a begun request and return the decoded
    /// output, or fail with the carried error
    pub async fn end(&self, handle: QueryHandle) -> Result<Output> {
        match self.end_response(handle).await? {
            Response::Result(output) => Ok(output),
            Response::Error(payload) => Err(Error::Server(payload)),
            _ => Err(Error::ProtocolViolation(
                "unexpected response variant for request".to_string(),
            )),
        }
    }

    /// Execute a CQL query (facade over begin/end)
    pub async fn query(
        &self,
        cql: &str,
        consistency: Consistency,
        tracing_enabled: bool,
    ) -> Result<Output> {
        let handle = self.begin_query(cql, consistency, tracing_enabled)?;
        self.end(handle).await
    }

    /// Prepare a statement (facade over begin/end)
    pub async fn prepare(&self, cql: &str) -> Result<Prepared> {
        let handle = self.begin_prepare(cql)?;
        match self.end(handle).await? {
            Output::Prepared(prepared) => Ok(prepared),
            _ => Err(Error::ProtocolViolation(
                "PREPARE did not return a prepared result".to_string(),
            )),
        }
    }

    /// Execute a prepared statement (facade over begin/end)
    pub async fn execute(
        &self,
        prepared: &Prepared,
        params: &[Option<Value>],
        consistency: Consistency,
        tracing_enabled: bool,
    ) -> Result<Output> {
        let handle = self.begin_execute(prepared, params, consistency, tracing_enabled)?;
        self.end(handle).await
    }

    /// Subscribe to server-push events; read them via [`Conn::take_events`]
    pub async fn register(&self, events: &[EventType]) -> Result<()> {
        let handle = self.begin_register(events)?;
        match self.end_response(handle).await? {
            Response::Ready => Ok(()),
            Response::Error(payload) => Err(Error::Server(payload)),
            _ => Err(Error::ProtocolViolation(
                "REGISTER did not return READY".to_string(),
            )),
        }
    }

    /// Ask the server which protocol options it supports
    pub async fn options(&self) -> Result<HashMap<String, Vec<String>>> {
        let handle = self.begin_options()?;
        match self.end_response(handle).await? {
            Response::Supported(options) => Ok(options),
            Response::Error(payload) => Err(Error::Server(payload)),
            _ => Err(Error::ProtocolViolation(
                "OPTIONS did not return SUPPORTED".to_string(),
            )),
        }
    }

    /// Fail one pending job now (timeout policy lives in the session
    /// layer). Completes the job with `Aborted` and frees its stream id;
    /// returns false if no job is pending on that id. The eventual
    /// response, if any, is discarded by the reader.
    pub fn fail_pending(&self, stream_id: StreamId) -> bool {
        match self.shared.table().remove(stream_id) {
            Some(tx) => {
                let _ = tx.send(Err(Error::Aborted));
                true
            }
            None => false,
        }
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

fn query_flags(tracing_enabled: bool) -> QueryFlags {
    if tracing_enabled {
        QueryFlags::TRACING
    } else {
        QueryFlags::empty()
    }
}

/// Single reader path: consumes response frames in arrival order and
/// dispatches each to its pending job. On transport failure every pending
/// job is failed exactly once.
#[instrument(skip_all)]
async fn read_loop(mut framed: FramedRead<OwnedReadHalf, FrameDecoder>, shared: Arc<Shared>) {
    loop {
        match framed.next().await {
            Some(Ok(frame)) => {
                let stream_id = frame.stream_id;
                if stream_id < 0 {
                    // Server-initiated; not correlated with any job.
                    match response::parse(&frame, &shared.registry) {
                        Ok(Response::Event(event)) => {
                            let _ = shared.events.send(event);
                        }
                        Ok(_) => {
                            tracing::warn!(stream_id, "non-event frame on server stream");
                        }
                        Err(err) => {
                            tracing::warn!(stream_id, "bad server-initiated frame: {err}");
                        }
                    }
                    continue;
                }

                // A parse failure is fatal to this frame's job only, not to
                // the connection.
                let outcome = response::parse(&frame, &shared.registry);
                shared.complete(stream_id, outcome);
            }
            Some(Err(err)) => {
                tracing::debug!("read failed: {err}");
                break;
            }
            None => {
                tracing::debug!("connection closed by server");
                break;
            }
        }
    }
    shared.fail_all();
}

/// Writer task: serialized frames in, transport writes out. A write failure
/// is a transport failure for the whole connection.
#[instrument(skip_all)]
async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut write_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    shared: Arc<Shared>,
) {
    while let Some(frame) = write_rx.recv().await {
        if let Err(err) = write_half.write_all(&frame).await {
            tracing::debug!("write failed: {err}");
            shared.fail_all();
            return;
        }
    }
}
