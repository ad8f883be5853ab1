use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flowersec_common::{Clock, StableReason, SystemClock};
use flowersec_token::{Keyset, ReplayCache, Role, VerifyParams};
use poem::get;
use poem::handler;
use poem::web::websocket::WebSocket;
use poem::web::Data;
use poem::{IntoResponse, Request, Response, Route};
use tokio::sync::{watch, Mutex as TokioMutex, RwLock};
use tokio::task::JoinHandle;

use crate::attach::{authorize, parse_attach};
use crate::channel::{check_matches_existing, close_channel, ChannelRegistry, EndpointHandle};
use crate::cleanup;
use crate::config::{ConfigError, TunnelConfig};
use crate::observer::{report_attach_failure, NoopObserver, TunnelObserver};
use crate::pump::{route_or_buffer, take_pairing_flush, RouteDecision};
use crate::socket::{SocketMessage, TunnelSocketRead, TunnelSocketWrite};
use crate::socket_poem;
use crate::write_queue::WriteQueue;
use crate::TunnelError;

#[derive(Debug, Clone, Copy)]
pub struct Stats {
    pub conn_count: usize,
    pub channel_count: usize,
}

/// `GET /ws`'s handler state: everything a connection's attach and
/// forwarding logic needs, shared behind `Arc`s so connections run
/// concurrently without contending on anything but the pieces that
/// must be shared (the channel registry, the replay cache, the
/// keyset).
pub struct TunnelServer {
    config: TunnelConfig,
    keyset: RwLock<Arc<Keyset>>,
    replay_cache: Arc<ReplayCache>,
    registry: Arc<ChannelRegistry>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn TunnelObserver>,
    next_conn_id: AtomicU64,
    cleanup_cancel: watch::Sender<bool>,
    cleanup_handle: TokioMutex<Option<JoinHandle<()>>>,
}

impl TunnelServer {
    pub async fn new(config: TunnelConfig) -> Result<Arc<Self>, ConfigError> {
        Self::with_clock_and_observer(config, Arc::new(SystemClock), Arc::new(NoopObserver)).await
    }

    pub async fn with_clock_and_observer(
        config: TunnelConfig,
        clock: Arc<dyn Clock>,
        observer: Arc<dyn TunnelObserver>,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let keyset = Keyset::load_from_file(&config.issuer_keys_file).await?;

        let registry = Arc::new(ChannelRegistry::new());
        let replay_cache = Arc::new(ReplayCache::new());
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let cleanup_handle = tokio::spawn(cleanup::run(
            registry.clone(),
            replay_cache.clone(),
            Arc::new(config.clone()),
            clock.clone(),
            observer.clone(),
            cancel_rx,
        ));

        Ok(Arc::new(Self {
            config,
            keyset: RwLock::new(Arc::new(keyset)),
            replay_cache,
            registry,
            clock,
            observer,
            next_conn_id: AtomicU64::new(1),
            cleanup_cancel: cancel_tx,
            cleanup_handle: TokioMutex::new(Some(cleanup_handle)),
        }))
    }

    /// Installs the attach endpoint and `/healthz` onto `route`.
    pub fn register(self: &Arc<Self>, route: Route) -> Route {
        route
            .at(&self.config.path, get(ws_handler).data(self.clone()))
            .at("/healthz", get(healthz))
    }

    /// Idempotently stops the cleanup loop. Safe to call more than
    /// once or concurrently.
    pub async fn close(&self) {
        let _ = self.cleanup_cancel.send(true);
        if let Some(handle) = self.cleanup_handle.lock().await.take() {
            let _ = handle.await;
        }
    }

    pub async fn reload_keys(&self) -> Result<(), flowersec_token::TokenError> {
        let keyset = Keyset::load_from_file(&self.config.issuer_keys_file).await?;
        *self.keyset.write().await = Arc::new(keyset);
        Ok(())
    }

    pub async fn stats(&self) -> Stats {
        Stats {
            conn_count: self.registry.conn_count(),
            channel_count: self.registry.channel_count().await,
        }
    }

    fn origin_permitted(&self, req: &Request) -> bool {
        let Some(origin) = req.header("origin") else {
            return self.config.allow_no_origin;
        };
        let (host, port) = split_host_port(origin);
        self.config
            .allowed_origins
            .iter()
            .any(|o| o.matches(origin, &host, port))
    }
}

fn split_host_port(origin: &str) -> (String, Option<u16>) {
    let without_scheme = origin.split("://").last().unwrap_or(origin);
    match without_scheme.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(p) => (host.to_string(), Some(p)),
            Err(_) => (without_scheme.to_string(), None),
        },
        None => (without_scheme.to_string(), None),
    }
}

#[handler]
async fn healthz() -> &'static str {
    "ok"
}

#[handler]
async fn ws_handler(
    ws: WebSocket,
    req: &Request,
    server: Data<&Arc<TunnelServer>>,
) -> Result<Response, poem::Error> {
    if !server.origin_permitted(req) {
        return Err(poem::Error::from_string(
            "origin not permitted",
            poem::http::StatusCode::FORBIDDEN,
        ));
    }
    let server = server.0.clone();
    Ok(ws
        .on_upgrade(move |socket| async move {
            let (read, write) = socket_poem::split(socket);
            handle_connection(server, Box::new(read), Box::new(write)).await;
        })
        .into_response())
}

/// Drives one accepted connection end-to-end: admission, attach,
/// pairing/replacement, then the forwarding read loop. The write pump
/// runs as a separate task, owning the write half, so a slow peer
/// cannot stall the read side.
async fn handle_connection(
    server: Arc<TunnelServer>,
    mut read: Box<dyn TunnelSocketRead>,
    mut write: Box<dyn TunnelSocketWrite + 'static>,
) {
    if server.registry.conn_count() >= server.config.max_conns {
        close_before_registration(&mut write, TunnelError::TooManyConnections).await;
        return;
    }
    server.registry.track_conn();
    let _untrack = scopeguard(|| server.registry.untrack_conn());

    let attach_bytes = match read_attach_message(read.as_mut(), server.config.max_attach_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            report_attach_failure(server.observer.as_ref(), &e);
            close_before_registration(&mut write, e).await;
            return;
        }
    };

    let parsed = match parse_attach(&attach_bytes, server.config.max_attach_bytes) {
        Ok(p) => p,
        Err(e) => {
            report_attach_failure(server.observer.as_ref(), &e);
            close_before_registration(&mut write, e).await;
            return;
        }
    };

    let now = server.clock.now_unix();
    let keyset = server.keyset.read().await.clone();
    let params = VerifyParams {
        now,
        audience: &server.config.tunnel_audience,
        issuer: &server.config.tunnel_issuer,
        clock_skew_secs: server.config.clock_skew.as_secs() as i64,
    };
    let payload = match authorize(&parsed, &keyset, &server.replay_cache, &params).await {
        Ok(p) => p,
        Err(e) => {
            report_attach_failure(server.observer.as_ref(), &e);
            close_before_registration(&mut write, e).await;
            return;
        }
    };

    let conn_id = server.next_conn_id.fetch_add(1, Ordering::SeqCst);
    let write_queue = Arc::new(WriteQueue::new(server.config.max_write_queue_bytes));

    let register_result = register_endpoint(
        &server.registry,
        &server.config,
        server.observer.as_ref(),
        &parsed.channel_id,
        parsed.role,
        conn_id,
        parsed.endpoint_instance_id.clone(),
        payload.init_exp,
        payload.idle_timeout_seconds as i64,
        write_queue.clone(),
        now,
    )
    .await;

    if let Err(e) = register_result {
        report_attach_failure(server.observer.as_ref(), &e);
        close_before_registration(&mut write, e).await;
        return;
    }
    server.observer.attach(true, "ok");

    let write_pump = tokio::spawn(run_write_pump(write, write_queue.clone()));

    run_read_pump(
        &server.registry,
        &server.config,
        server.observer.as_ref(),
        server.clock.as_ref(),
        read.as_mut(),
        &parsed.channel_id,
        parsed.role,
        conn_id,
    )
    .await;

    let _ = write_pump.await;
}

/// Handles `Single -> Paired` / same-role replacement / first attach,
/// flushing any pre-pairing buffers into the newly paired peer. Takes
/// the registry, config and observer directly rather than a whole
/// [`TunnelServer`] so it can be driven from tests without a live
/// keyset or WebSocket.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn register_endpoint(
    registry: &ChannelRegistry,
    config: &TunnelConfig,
    observer: &dyn TunnelObserver,
    channel_id: &str,
    role: Role,
    conn_id: u64,
    endpoint_instance_id: Vec<u8>,
    init_exp: i64,
    idle_timeout_seconds: i64,
    write_queue: Arc<WriteQueue>,
    now: i64,
) -> Result<(), TunnelError> {
    let existing = registry.get(channel_id).await;
    if existing.is_none() && registry.channel_count().await >= config.max_channels {
        return Err(TunnelError::TooManyChannels);
    }

    let state = registry
        .get_or_create(channel_id, init_exp, idle_timeout_seconds, now)
        .await;
    let mut guard = state.lock().await;

    check_matches_existing(&guard, init_exp, idle_timeout_seconds)?;

    let already_occupied = guard.slot(role).is_some();
    if already_occupied {
        let cooldown = config.replace_cooldown.as_secs() as i64;
        let window = config.replace_window.as_secs() as i64;
        let max_per_window = config.max_replaces_per_window;
        let allowed = guard
            .replace_limiter_mut(role)
            .allow(now, cooldown, window, max_per_window);
        observer.replace(allowed);
        if !allowed {
            return Err(TunnelError::ReplaceRateLimited);
        }
        // Both sides of the old pair are wiped before the new occupant
        // is registered, per the replacement invariant.
        let replace_code = config.replace_close_category.ws_close_code();
        for slot in &mut guard.conns {
            if let Some(old) = slot.take() {
                registry.release_pending(old.pending_bytes);
                old.write_queue.close_with_error(replace_code, "peer_closed").await;
            }
        }
        guard.saw_record = false;
        guard.flushing = false;
    }

    let handle = EndpointHandle::new(conn_id, endpoint_instance_id, write_queue);
    *guard.slot_mut(role) = Some(handle);
    guard.last_active = now;

    if guard.is_paired() {
        let first_seen = guard.first_seen;
        let (client_flush, server_flush) = take_pairing_flush(&mut guard, registry);
        let client_queue = guard.slot(Role::Client).as_ref().unwrap().write_queue.clone();
        let server_queue = guard.slot(Role::Server).as_ref().unwrap().write_queue.clone();
        // `flushing` stays true across the drop below: a read pump racing
        // this flush must keep buffering rather than forward straight to
        // the peer, or its frame could overtake one still sitting in
        // `client_flush`/`server_flush` below.
        drop(guard);

        if drain_pairing_flush(registry, channel_id, &client_queue, &server_queue, client_flush, server_flush)
            .await
            .is_err()
        {
            return Ok(());
        }

        // Re-acquire to clear the guard and catch anything a concurrent
        // read pump buffered during the drain above before observing it
        // cleared.
        let mut guard = state.lock().await;
        let (client_flush, server_flush) = take_pairing_flush(&mut guard, registry);
        guard.flushing = false;
        drop(guard);

        if drain_pairing_flush(registry, channel_id, &client_queue, &server_queue, client_flush, server_flush)
            .await
            .is_err()
        {
            return Ok(());
        }

        let latency = (now - first_seen).max(0) as u64;
        observer.pair_latency(Duration::from_secs(latency));
    }

    Ok(())
}

/// Enqueues a pairing flush's frames onto the two peer write queues
/// (server-buffered frames to the client, client-buffered frames to the
/// server), closing the channel with `write_error` on the first failed
/// enqueue.
async fn drain_pairing_flush(
    registry: &ChannelRegistry,
    channel_id: &str,
    client_queue: &Arc<WriteQueue>,
    server_queue: &Arc<WriteQueue>,
    client_flush: Vec<Vec<u8>>,
    server_flush: Vec<Vec<u8>>,
) -> Result<(), ()> {
    for frame in server_flush {
        if client_queue.enqueue(frame).await.is_err() {
            let code = TunnelError::WriteError.close_category().ws_close_code();
            close_channel(registry, channel_id, code, "write_error").await;
            return Err(());
        }
    }
    for frame in client_flush {
        if server_queue.enqueue(frame).await.is_err() {
            let code = TunnelError::WriteError.close_category().ws_close_code();
            close_channel(registry, channel_id, code, "write_error").await;
            return Err(());
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn run_read_pump(
    registry: &ChannelRegistry,
    config: &TunnelConfig,
    observer: &dyn TunnelObserver,
    clock: &dyn Clock,
    read: &mut dyn TunnelSocketRead,
    channel_id: &str,
    role: Role,
    conn_id: u64,
) {
    loop {
        let msg = match read.recv().await {
            Some(Ok(msg)) => msg,
            Some(Err(_)) | None => break,
        };
        let frame = match msg {
            SocketMessage::Binary(data) => data,
            SocketMessage::Text(_) => {
                let code = TunnelError::NonBinaryFrame.close_category().ws_close_code();
                close_channel(registry, channel_id, code, "non_binary_frame").await;
                break;
            }
        };
        if frame.len() > config.max_record_bytes {
            let code = TunnelError::RecordTooLarge.close_category().ws_close_code();
            close_channel(registry, channel_id, code, "record_too_large").await;
            break;
        }

        let Some(state) = registry.get(channel_id).await else {
            break;
        };
        let decision = {
            let mut guard = state.lock().await;
            guard.last_active = clock.now_unix();
            route_or_buffer(
                &mut guard,
                registry,
                role,
                conn_id,
                frame,
                config.max_record_bytes,
                config.max_pending_bytes,
                config.max_total_pending_bytes,
                observer,
            )
        };

        match decision {
            Ok(RouteDecision::Buffered) => {}
            Ok(RouteDecision::Forward { peer_queue, flush, frame }) => {
                let mut failed = false;
                for buffered in flush {
                    if peer_queue.enqueue(buffered).await.is_err() {
                        failed = true;
                        break;
                    }
                }
                if !failed && peer_queue.enqueue(frame).await.is_err() {
                    failed = true;
                }
                if failed {
                    let code = TunnelError::WriteError.close_category().ws_close_code();
                    close_channel(registry, channel_id, code, "write_error").await;
                    return;
                }
            }
            Err(e) => {
                let code = e.close_category().ws_close_code();
                close_channel(registry, channel_id, code, e.reason()).await;
                break;
            }
        }
    }
}

pub(crate) async fn run_write_pump(mut write: Box<dyn TunnelSocketWrite>, queue: Arc<WriteQueue>) {
    while let Some(frame) = queue.dequeue().await {
        if write.send_binary(frame).await.is_err() {
            let code = TunnelError::WriteError.close_category().ws_close_code();
            queue.close_with_error(code, "write_error").await;
            break;
        }
    }
    if let Some((code, reason)) = queue.close_info().await {
        write.send_close(code, reason).await;
    }
}

async fn read_attach_message(
    read: &mut dyn TunnelSocketRead,
    max_attach_bytes: usize,
) -> Result<Vec<u8>, TunnelError> {
    let deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(deadline);
    tokio::select! {
        msg = read.recv() => {
            match msg {
                Some(Ok(SocketMessage::Text(text))) => {
                    if text.len() > max_attach_bytes {
                        Err(TunnelError::AttachTooLarge)
                    } else {
                        Ok(text.into_bytes())
                    }
                }
                Some(Ok(SocketMessage::Binary(_))) => Err(TunnelError::ExpectedAttach),
                Some(Err(e)) => Err(TunnelError::Io(e)),
                None => Err(TunnelError::ExpectedAttach),
            }
        }
        _ = &mut deadline => Err(TunnelError::Timeout),
    }
}

async fn close_before_registration(write: &mut dyn TunnelSocketWrite, err: TunnelError) {
    let code = err.close_category().ws_close_code();
    write.send_close(code, err.reason().to_string()).await;
}

fn scopeguard(f: impl FnOnce()) -> impl Drop {
    struct Guard<F: FnOnce()>(Option<F>);
    impl<F: FnOnce()> Drop for Guard<F> {
        fn drop(&mut self) {
            if let Some(f) = self.0.take() {
                f();
            }
        }
    }
    Guard(Some(f))
}
