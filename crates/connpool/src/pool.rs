//! Serializing pool: one connection, one actor task, any number of callers.
//!
//! # Architecture
//!
//! ```text
//! caller ── run(ctx, work) ──► mailbox (mpsc) ──► actor task
//!   ▲                                               │ owns Option<Conn<S>>
//!   │                                               │ and the idle timer
//!   └──────────── oneshot reply (one slot) ◄────────┘
//! ```
//!
//! For every request the actor:
//! 1. skips it if the caller has already given up
//! 2. opens a connection through the factory if none is live
//! 3. drains bytes left in the inbound buffer by earlier exchanges
//! 4. clears deadlines and runs the work unit against the connection
//! 5. replies, then either closes the connection (fatal network error) or
//!    re-arms the idle timer and waits out the configured delay
//!
//! When the idle timer fires the connection is closed and the next request
//! opens a fresh one.
//!
//! Work units run one at a time: the actor waits for each to finish before
//! taking the next request. A slow work unit holds up every other caller, so
//! the pool gives exclusive access to the connection, not parallelism. A work
//! unit that panics costs only its connection; its caller gets
//! [`PoolError::Aborted`] and the next request opens a fresh one.

use std::fmt;
use std::future::Future;
use std::io;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::config::PoolConfig;
use crate::conn::Conn;
use crate::context::Context;
use crate::error::{PoolError, WorkError};
use crate::factory::ConnectionFactory;
use crate::logger::{Logger, NoopLogger, TracingLogger};

/// Requests that may queue for the actor before callers wait on the send.
const MAILBOX_CAPACITY: usize = 32;

/// Future returned by a work unit, borrowing the connection for `'c`.
pub type WorkFuture<'c, T> = Pin<Box<dyn Future<Output = Result<T, WorkError>> + Send + 'c>>;

type JobFuture<'c> = Pin<Box<dyn Future<Output = Disposition> + Send + 'c>>;

// ── Requests ─────────────────────────────────────────────────────────

/// What a finished work unit means for the connection.
enum Disposition {
    Reuse,
    Discard(String),
}

/// A request with its result type erased, so one mailbox carries them all.
trait Job<S>: Send {
    fn context(&self) -> &Context;

    /// The caller's context is done or the caller stopped listening.
    fn is_abandoned(&self) -> bool;

    /// Answer with a pool-level error without running the work.
    fn reject(self: Box<Self>, err: PoolError);

    /// Run the work, deliver its result, and classify the outcome.
    fn run<'c>(self: Box<Self>, conn: &'c mut Conn<S>) -> JobFuture<'c>;
}

struct Request<S, T, F> {
    ctx: Context,
    work: F,
    reply: oneshot::Sender<Result<T, PoolError>>,
    _stream: PhantomData<fn(&mut Conn<S>)>,
}

impl<S, T, F> Job<S> for Request<S, T, F>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: Send + 'static,
    F: for<'c> FnOnce(&'c mut Conn<S>) -> WorkFuture<'c, T> + Send + 'static,
{
    fn context(&self) -> &Context {
        &self.ctx
    }

    fn is_abandoned(&self) -> bool {
        self.ctx.is_done() || self.reply.is_closed()
    }

    fn reject(self: Box<Self>, err: PoolError) {
        let _ = self.reply.send(Err(err));
    }

    fn run<'c>(self: Box<Self>, conn: &'c mut Conn<S>) -> JobFuture<'c> {
        let Request { work, reply, .. } = *self;
        Box::pin(async move {
            let result = work(conn).await;
            let disposition = match &result {
                Err(err) if err.is_connection_fatal() => Disposition::Discard(err.to_string()),
                _ => Disposition::Reuse,
            };
            // The one-slot reply never blocks; a caller that left simply misses it.
            let _ = reply.send(result.map_err(PoolError::Work));
            disposition
        })
    }
}

enum Message<S> {
    Job(Box<dyn Job<S>>),
    Shutdown(oneshot::Sender<()>),
}

// ── Statistics ───────────────────────────────────────────────────────

/// Counters describing what the actor has done so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Requests that reached the connection stage (abandoned ones excluded).
    pub requests: u64,
    /// Connections successfully opened.
    pub opened: u64,
    /// Connections closed (fatal error, idle expiry, or shutdown).
    pub closed: u64,
    /// Factory calls that failed or timed out.
    pub failed_opens: u64,
    /// Leftover bytes discarded before work units ran.
    pub drained_bytes: u64,
}

impl PoolStats {
    /// Connections currently open (zero or one).
    pub fn live(&self) -> u64 {
        self.opened.saturating_sub(self.closed)
    }
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    opened: AtomicU64,
    closed: AtomicU64,
    failed_opens: AtomicU64,
    drained_bytes: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PoolStats {
        PoolStats {
            requests: self.requests.load(Ordering::Relaxed),
            opened: self.opened.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            failed_opens: self.failed_opens.load(Ordering::Relaxed),
            drained_bytes: self.drained_bytes.load(Ordering::Relaxed),
        }
    }
}

// ── Pool ─────────────────────────────────────────────────────────────

/// Shares one lazily opened connection among concurrent callers.
///
/// Cloning is cheap; clones share the same actor and connection. The actor
/// starts on the first [`run`](Pool::run) and stops after
/// [`shutdown`](Pool::shutdown) or once every handle is dropped.
pub struct Pool<S> {
    inner: Arc<Shared<S>>,
}

struct Shared<S> {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory<S>>,
    logger: Arc<dyn Logger>,
    counters: Arc<Counters>,
    mailbox: OnceLock<mpsc::Sender<Message<S>>>,
    closed: AtomicBool,
}

impl<S> Clone for Pool<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> Pool<S> {
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.counters.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl<S> Pool<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Create a pool that logs through `tracing`.
    pub fn new<F>(config: PoolConfig, factory: F) -> Self
    where
        F: ConnectionFactory<S>,
    {
        Self::with_logger(config, factory, Some(Arc::new(TracingLogger)))
    }

    /// Create a pool with a custom logger, or none at all.
    pub fn with_logger<F>(config: PoolConfig, factory: F, logger: Option<Arc<dyn Logger>>) -> Self
    where
        F: ConnectionFactory<S>,
    {
        let logger: Arc<dyn Logger> = match logger {
            Some(logger) => logger,
            None => Arc::new(NoopLogger),
        };
        Self {
            inner: Arc::new(Shared {
                config,
                factory: Arc::new(factory),
                logger,
                counters: Arc::new(Counters::default()),
                mailbox: OnceLock::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Run `work` with exclusive use of the pooled connection.
    ///
    /// Waits until the actor has run `work` or `ctx` ends, whichever comes
    /// first. If `ctx` ends first this returns [`PoolError::Cancelled`] right
    /// away, even though the actor may still go on to run `work`.
    ///
    /// ```ignore
    /// let reply = pool
    ///     .run(&ctx, |conn| Box::pin(async move {
    ///         conn.write(b"PING\r\n").await?;
    ///         Ok(conn.read_until(b'\n', deadline).await?)
    ///     }))
    ///     .await?;
    /// ```
    pub async fn run<T, F>(&self, ctx: &Context, work: F) -> Result<T, PoolError>
    where
        T: Send + 'static,
        F: for<'c> FnOnce(&'c mut Conn<S>) -> WorkFuture<'c, T> + Send + 'static,
    {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        if let Some(err) = ctx.err() {
            return Err(PoolError::Cancelled(err));
        }

        let mailbox = self.mailbox();
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = Request {
            ctx: ctx.clone(),
            work,
            reply: reply_tx,
            _stream: PhantomData,
        };

        tokio::select! {
            biased;
            err = ctx.done() => return Err(PoolError::Cancelled(err)),
            sent = mailbox.send(Message::Job(Box::new(request))) => {
                if sent.is_err() {
                    return Err(PoolError::Closed);
                }
            }
        }

        tokio::select! {
            biased;
            reply = reply_rx => match reply {
                Ok(result) => result,
                // Dropped unanswered: skipped as abandoned, refused at shutdown,
                // or the work unit panicked.
                Err(_) => Err(match ctx.err() {
                    Some(err) => PoolError::Cancelled(err),
                    None if self.is_closed() => PoolError::Closed,
                    None => PoolError::Aborted,
                }),
            },
            err = ctx.done() => Err(PoolError::Cancelled(err)),
        }
    }

    /// Close the connection, stop the actor, and refuse further work.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // A pool that never started gets a mailbox with no actor behind it,
        // so a `run` racing this call cannot start one.
        let mut parked = false;
        let mailbox = self.inner.mailbox.get_or_init(|| {
            parked = true;
            mpsc::channel(1).0
        });
        if parked {
            return;
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        if mailbox.send(Message::Shutdown(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
        self.inner.logger.info(format_args!("pool shut down"));
    }

    /// The actor's mailbox, starting the actor on first use.
    fn mailbox(&self) -> &mpsc::Sender<Message<S>> {
        self.inner.mailbox.get_or_init(|| {
            let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
            let actor = Actor {
                config: self.inner.config,
                factory: Arc::clone(&self.inner.factory),
                logger: Arc::clone(&self.inner.logger),
                counters: Arc::clone(&self.inner.counters),
                mailbox: rx,
                conn: None,
            };
            tokio::spawn(actor.run());
            self.inner.logger.info(format_args!(
                "started pool (ttl {:?}, delay {:?})",
                self.inner.config.ttl, self.inner.config.delay
            ));
            tx
        })
    }
}

impl<S> fmt::Debug for Pool<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field(
                "running",
                &self.inner.mailbox.get().is_some_and(|m| !m.is_closed()),
            )
            .field("closed", &self.is_closed())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

// ── Actor ────────────────────────────────────────────────────────────

/// Sole owner of the connection and the idle timer.
struct Actor<S> {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory<S>>,
    logger: Arc<dyn Logger>,
    counters: Arc<Counters>,
    mailbox: mpsc::Receiver<Message<S>>,
    conn: Option<Conn<S>>,
}

enum Event<S> {
    Message(Option<Message<S>>),
    IdleExpired,
}

/// How a request left the connection, which decides the timer's next state.
enum Served {
    /// Work ran and the connection stays open.
    Reused,
    /// Work failed fatally and the connection was closed.
    Discarded,
    /// Nothing ran: abandoned, factory failure, or drain failure.
    Skipped,
}

impl<S> Actor<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn run(mut self) {
        let idle = tokio::time::sleep(self.config.ttl);
        tokio::pin!(idle);
        let mut armed = false;

        loop {
            let event = tokio::select! {
                message = self.mailbox.recv() => Event::Message(message),
                () = &mut idle, if armed => Event::IdleExpired,
            };

            match event {
                Event::Message(Some(Message::Job(job))) => match self.serve(job).await {
                    Served::Reused => {
                        idle.as_mut().reset(Instant::now() + self.config.ttl);
                        armed = true;
                        if !self.config.delay.is_zero() {
                            tokio::time::sleep(self.config.delay).await;
                        }
                    }
                    Served::Discarded => armed = false,
                    Served::Skipped => {}
                },
                Event::Message(Some(Message::Shutdown(ack))) => {
                    self.close_current("pool shut down").await;
                    let _ = ack.send(());
                    break;
                }
                Event::Message(None) => {
                    self.close_current("pool dropped").await;
                    break;
                }
                Event::IdleExpired => {
                    armed = false;
                    self.close_current("idle for longer than ttl").await;
                }
            }
        }
    }

    async fn serve(&mut self, job: Box<dyn Job<S>>) -> Served {
        if job.is_abandoned() {
            self.logger
                .debug(format_args!("skipping request abandoned by its caller"));
            return Served::Skipped;
        }
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        let ctx = job.context().clone();
        let mut conn = match self.conn.take() {
            Some(conn) => {
                self.logger.debug(format_args!("reusing open connection"));
                conn
            }
            None => {
                self.logger.info(format_args!("opening new connection"));
                match self.open(&ctx).await {
                    Ok(conn) => {
                        self.counters.opened.fetch_add(1, Ordering::Relaxed);
                        self.logger.info(format_args!("opened new connection"));
                        conn
                    }
                    Err(err) => {
                        self.counters.failed_opens.fetch_add(1, Ordering::Relaxed);
                        let err = PoolError::Connect(err);
                        self.logger.warn(format_args!("{err}"));
                        job.reject(err);
                        return Served::Skipped;
                    }
                }
            }
        };

        let deadline = ctx
            .deadline()
            .unwrap_or_else(|| Instant::now() + self.config.ttl);
        match conn.drain_buffered(deadline).await {
            Ok(leftover) if !leftover.is_empty() => {
                self.counters
                    .drained_bytes
                    .fetch_add(leftover.len() as u64, Ordering::Relaxed);
                self.logger.debug(format_args!(
                    "read {} leftover bytes: 0x{}",
                    leftover.len(),
                    hex::encode(&leftover)
                ));
            }
            Ok(_) => {}
            Err(err) => {
                self.logger.warn(format_args!(
                    "failed to empty buffer after recovering 0x{}: {}",
                    hex::encode(&err.drained),
                    err.source
                ));
                self.conn = Some(conn);
                job.reject(PoolError::Drain(err));
                return Served::Skipped;
            }
        }

        conn.set_deadline(None);

        // Awaited right away, so work still runs one unit at a time.
        let worker = tokio::spawn(async move {
            let disposition = job.run(&mut conn).await;
            (conn, disposition)
        });

        match worker.await {
            Ok((conn, Disposition::Reuse)) => {
                self.conn = Some(conn);
                Served::Reused
            }
            Ok((conn, Disposition::Discard(reason))) => {
                self.logger.warn(format_args!(
                    "closing connection after non-temporary or timeout error: {reason}"
                ));
                self.close(conn).await;
                Served::Discarded
            }
            Err(err) => {
                // The connection was dropped with the task, mid-exchange.
                self.logger
                    .error(format_args!("work unit did not complete, connection dropped: {err}"));
                self.counters.closed.fetch_add(1, Ordering::Relaxed);
                Served::Discarded
            }
        }
    }

    /// Ask the factory for a stream, giving up after `ttl` or when `ctx` ends.
    async fn open(&mut self, ctx: &Context) -> io::Result<Conn<S>> {
        let ctx = ctx.child_with_timeout(self.config.ttl);
        let factory = Arc::clone(&self.factory);
        tokio::select! {
            result = factory.connect(&ctx) => result.map(Conn::new),
            err = ctx.done() => Err(err.into()),
        }
    }

    async fn close_current(&mut self, why: &str) {
        if let Some(conn) = self.conn.take() {
            self.logger.info(format_args!("closing connection: {why}"));
            self.close(conn).await;
        }
    }

    async fn close(&mut self, mut conn: Conn<S>) {
        conn.set_write_deadline(Some(Instant::now() + self.config.ttl));
        if let Err(err) = conn.close().await {
            self.logger
                .error(format_args!("unable to close connection: {err}"));
        }
        self.counters.closed.fetch_add(1, Ordering::Relaxed);
    }
}
