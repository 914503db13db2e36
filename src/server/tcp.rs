use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::registry::Registry;
use crate::core::stats::{ServerStats, ServerStatsSnapshot};
use crate::parallel::task::Task;
use crate::parallel::task_queue::TaskQueue;
use crate::server::frame::FrameCodec;
use crate::server::operator::{OperatorContext, OperatorSet};
use crate::server::protocol::{self, Request, Response};

/// Operators plus the state they run against; moved into every task
struct Executor {
    operators: OperatorSet,
    context: OperatorContext,
}

/// Stops a running server. Cloneable; any clone triggers shutdown.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// TCP front end. Each connection reads frames, runs each request as a
/// task on the shared queue and writes the response back in request order.
pub struct SnackServer {
    listener: TcpListener,
    executor: Arc<Executor>,
    queue: Arc<TaskQueue>,
    stats: Arc<ServerStats>,
    codec: FrameCodec,
    max_connections: usize,
    shutdown: Arc<watch::Sender<bool>>,
}

impl SnackServer {
    pub async fn bind(config: &Config, registry: Arc<Registry>) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(&config.bind_addr).await?;
        let queue = Arc::new(TaskQueue::new(config)?);
        let stats = Arc::new(ServerStats::new());

        let executor = Arc::new(Executor {
            operators: OperatorSet::standard(),
            context: OperatorContext {
                registry,
                lenient_decode: config.lenient_decode,
                server_stats: stats.clone(),
                queue_stats: queue.stats_handle(),
            },
        });
        let (shutdown, _) = watch::channel(false);

        info!(addr = %listener.local_addr()?, "listening");
        Ok(SnackServer {
            listener,
            executor,
            queue,
            stats,
            codec: FrameCodec::new(config.max_frame_len),
            max_connections: config.max_connections,
            shutdown: Arc::new(shutdown),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { tx: self.shutdown.clone() }
    }

    pub fn stats(&self) -> ServerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Accept until shut down, then drain open connections and stop the
    /// task queue.
    pub async fn run(self) -> Result<()> {
        let mut stop = self.shutdown.subscribe();
        let mut connections = JoinSet::new();

        loop {
            if *stop.borrow() {
                break;
            }
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.admit(&mut connections, stream, peer),
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            while connections.try_join_next().is_some() {}
        }

        info!(open = connections.len(), "shutting down");
        while connections.join_next().await.is_some() {}

        let queue = self.queue.clone();
        tokio::task::spawn_blocking(move || queue.shutdown())
            .await
            .map_err(|e| Error::internal(format!("queue shutdown: {}", e)))?;
        Ok(())
    }

    fn admit(&self, connections: &mut JoinSet<()>, stream: TcpStream, peer: SocketAddr) {
        let active = self.stats.connections_active.load(Ordering::Relaxed);
        if active >= self.max_connections as u64 {
            warn!(%peer, active, "connection limit reached, rejecting");
            return;
        }
        self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
        self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

        let connection = Connection {
            stream,
            executor: self.executor.clone(),
            queue: self.queue.clone(),
            stats: self.stats.clone(),
            codec: self.codec,
            stop: self.shutdown.subscribe(),
        };
        let span = info_span!("conn", id = %Uuid::new_v4(), %peer);
        let stats = self.stats.clone();
        connections.spawn(
            async move {
                debug!("connected");
                match connection.serve().await {
                    Ok(()) => debug!("closed"),
                    Err(e) => warn!(error = %e, "connection dropped"),
                }
                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
            }
            .instrument(span),
        );
    }
}

struct Connection {
    stream: TcpStream,
    executor: Arc<Executor>,
    queue: Arc<TaskQueue>,
    stats: Arc<ServerStats>,
    codec: FrameCodec,
    stop: watch::Receiver<bool>,
}

impl Connection {
    async fn serve(mut self) -> Result<()> {
        let _ = self.stream.set_nodelay(true);
        let mut inbound = BytesMut::with_capacity(4096);
        let mut outbound = BytesMut::with_capacity(4096);

        loop {
            while let Some(frame) = self.codec.decode(&mut inbound)? {
                // A frame that is not a request envelope ends the connection
                let request: Request = protocol::decode(&frame)?;
                let response = self.dispatch(request).await;
                self.reply(response, &mut outbound).await?;
            }

            if *self.stop.borrow() {
                return Ok(());
            }
            let read = tokio::select! {
                read = self.stream.read_buf(&mut inbound) => read?,
                _ = self.stop.changed() => return Ok(()),
            };
            if read == 0 {
                if inbound.is_empty() {
                    return Ok(());
                }
                return Err(Error::decode(format!("peer closed mid-frame ({} bytes buffered)", inbound.len())));
            }
            self.stats.bytes_received.fetch_add(read as u64, Ordering::Relaxed);
        }
    }

    /// Frame and send one response. A response over the frame limit is
    /// replaced by a `TooLarge` failure for the same request.
    async fn reply(&mut self, response: Response, outbound: &mut BytesMut) -> Result<()> {
        let (request_id, op) = (response.request_id, response.op);
        let mut ok = response.error.is_none();

        let bytes = protocol::encode(&response)?;
        if let Err(e) = self.codec.encode(&bytes, outbound) {
            if e.kind != ErrorKind::TooLarge {
                return Err(e);
            }
            warn!(request_id, ?op, bytes = bytes.len(), "response over frame limit");
            ok = false;
            outbound.clear();
            let refused = Response::from_outcome(request_id, op, Err(e));
            self.codec.encode(&protocol::encode(&refused)?, outbound)?;
        }
        self.stats.record_request(ok);

        self.stream.write_all(outbound).await?;
        self.stats.bytes_sent.fetch_add(outbound.len() as u64, Ordering::Relaxed);
        outbound.clear();
        Ok(())
    }

    /// Run one request on the task queue and wait for its outcome
    async fn dispatch(&self, request: Request) -> Response {
        let (request_id, op) = (request.request_id, request.op);
        debug!(request_id, ?op, "request");

        let executor = self.executor.clone();
        let task = Task::new(move || executor.operators.execute(&executor.context, &request));

        let outcome = match self.queue.submit(task) {
            Ok(handle) => handle.await,
            Err(e) => Err(e),
        };
        if let Err(e) = &outcome {
            debug!(request_id, error = %e, "request failed");
        }
        Response::from_outcome(request_id, op, outcome)
    }
}
