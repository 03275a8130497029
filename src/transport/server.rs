//! HTTP long-poll server
//!
//! Binds the well-known broker address, accepts connections and serves one
//! request per connection:
//! - `POST /publish/{topic}` and `GET /subscribe/{topic}` for the broadcast broker
//! - `POST /events[/{session}]` and `GET /wait` for the session queues
//! - `GET /` for a plain-text overview
//!
//! Each connection gets a child of the server's shutdown token. A client
//! that disconnects mid-wait drops the in-flight call, which releases its
//! slot or waiter; cancelling the shutdown token releases every call at once.

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::{Method, StatusCode};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::broker::{Activity, Broker, IdleWatchdog, SubscribeOutcome};
use crate::config::Settings;
use crate::session::{SessionManager, WaitOutcome};
use crate::transport::framing::{Request, Response, read_request};
use crate::transport::message::{PublishResponse, PushResponse};
use crate::utils::{Error, Result};

const REJECT_LINGER: Duration = Duration::from_secs(1);

/// Shared state handed to every connection.
#[derive(Debug)]
pub struct AppState {
    pub broker: Arc<Broker>,
    pub sessions: Arc<SessionManager>,
    pub settings: Settings,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let activity = Arc::new(Activity::new());
        let broker = Arc::new(Broker::new(settings.broker.clone(), Arc::clone(&activity)));
        let sessions = Arc::new(SessionManager::new(activity).with_drain_hook(Arc::new(
            |session: &str, events: &[Value]| {
                debug!(session, count = events.len(), "session observed new events");
            },
        )));
        Self {
            broker,
            sessions,
            settings,
        }
    }
}

pub struct Server {
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Server {
    /// Bind the configured address.
    ///
    /// An address already in use means another broker owns it, reported as
    /// [`Error::AlreadyRunning`].
    pub async fn bind(settings: Settings) -> Result<Self> {
        let addr = format!("{}:{}", settings.server.host, settings.server.port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                return Err(Error::AlreadyRunning { addr });
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            listener,
            state: Arc::new(AppState::new(settings)),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Cancelling this token stops the server and releases every waiting call.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run(self) -> Result<()> {
        let Server {
            listener,
            state,
            shutdown,
            tracker,
        } = self;
        info!("pollcast listening on http://{}", listener.local_addr()?);

        let broker_settings = &state.settings.broker;
        if let Some(idle_timeout) = broker_settings.idle_timeout() {
            let watchdog = IdleWatchdog::new(
                Arc::clone(state.broker.activity()),
                idle_timeout,
                broker_settings.idle_check_interval(),
            );
            tracker.spawn(watchdog.run(shutdown.clone()));
        }
        if let Some(ttl) = state.settings.queue.session_ttl() {
            tracker.spawn(sweep_sessions(
                Arc::clone(&state.sessions),
                ttl,
                state.settings.queue.sweep_interval(),
                shutdown.clone(),
            ));
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let state = Arc::clone(&state);
                        let cancel = shutdown.child_token();
                        tracker.spawn(async move {
                            if let Err(e) = handle_connection(stream, state, cancel).await {
                                debug!(%peer, error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "failed to accept connection"),
                },
            }
        }

        drop(listener);
        info!("shutting down, no longer accepting connections");
        tracker.close();
        let grace = broker_settings.shutdown_grace();
        if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "in-flight requests did not unwind within the grace period"
            );
        }
        Ok(())
    }
}

async fn sweep_sessions(
    sessions: Arc<SessionManager>,
    ttl: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                let evicted = sessions.evict_idle(ttl);
                if evicted > 0 {
                    debug!(evicted, "evicted idle session queues");
                }
            }
        }
    }
}

/// Resolves once the peer closes its side of the connection.
async fn client_gone<R: AsyncRead + Unpin>(reader: &mut R) {
    let mut scratch = [0u8; 64];
    loop {
        match reader.read(&mut scratch).await {
            Ok(0) | Err(_) => return,
            Ok(_) => continue,
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<AppState>,
    cancel: CancellationToken,
) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    let max_body = state.settings.broker.max_payload_bytes;
    let request = match read_request(&mut reader, max_body).await {
        Ok(Some(request)) => request,
        Ok(None) => return Ok(()),
        Err(e) if e.is_client_error() => {
            Response::from_error(&e).write_to(&mut writer).await?;
            writer.shutdown().await?;
            // consume the unread body so closing does not reset the connection
            let _ = tokio::time::timeout(REJECT_LINGER, client_gone(&mut reader)).await;
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    debug!(method = %request.method, path = %request.path, "request");

    let response = tokio::select! {
        response = route(&state, request, &cancel) => response,
        _ = client_gone(&mut reader) => {
            debug!("client disconnected before a response was ready");
            return Ok(());
        }
    };

    response.write_to(&mut writer).await?;
    Ok(())
}

pub async fn route(state: &AppState, request: Request, cancel: &CancellationToken) -> Response {
    let path = request.path.trim_start_matches('/');
    let (head, rest) = path.split_once('/').unwrap_or((path, ""));

    let allow = match head {
        "" | "subscribe" | "wait" => "GET, OPTIONS",
        "publish" | "events" => "POST, OPTIONS",
        _ => return Response::error(StatusCode::NOT_FOUND, "not found"),
    };
    if request.method == Method::OPTIONS {
        return Response::no_content().with_allow(allow);
    }

    match (head, &request.method) {
        ("", &Method::GET) => index(state),
        ("publish", &Method::POST) => publish(state, rest, &request.body).await,
        ("subscribe", &Method::GET) => {
            let favicon = request.query_param("favicon").map(str::to_string);
            subscribe(state, rest, favicon, cancel).await
        }
        ("events", &Method::POST) => push(state, rest, &request.body),
        ("wait", &Method::GET) => wait(state, &request, cancel).await,
        _ => Response::method_not_allowed(allow),
    }
}

async fn publish(state: &AppState, topic: &str, body: &[u8]) -> Response {
    match state.broker.publish(topic, body).await {
        Ok(delivered) => Response::json(StatusCode::OK, &PublishResponse { delivered }),
        Err(e) => Response::from_error(&e),
    }
}

async fn subscribe(
    state: &AppState,
    topic: &str,
    favicon: Option<String>,
    cancel: &CancellationToken,
) -> Response {
    match state.broker.subscribe(topic, favicon, cancel).await {
        Ok(SubscribeOutcome::Delivered(payload)) => Response::json(StatusCode::OK, &*payload),
        Ok(SubscribeOutcome::TimedOut | SubscribeOutcome::Cancelled) => Response::no_content(),
        Err(e) => Response::from_error(&e),
    }
}

fn session_or_default<'a>(state: &'a AppState, session: &'a str) -> &'a str {
    if session.is_empty() {
        &state.settings.queue.default_session
    } else {
        session
    }
}

fn push(state: &AppState, session: &str, body: &[u8]) -> Response {
    let session = session_or_default(state, session);
    let event: Value = match serde_json::from_slice(body) {
        Ok(event) => event,
        Err(e) => return Response::from_error(&Error::InvalidJson(e)),
    };
    match state.sessions.push(session, event) {
        Ok(pending) => Response::json(StatusCode::ACCEPTED, &PushResponse { pending }),
        Err(e) => Response::from_error(&e),
    }
}

async fn wait(state: &AppState, request: &Request, cancel: &CancellationToken) -> Response {
    let session = session_or_default(state, request.query_param("session").unwrap_or(""));
    // unparsable values fall back to the default window
    let requested = request
        .query_param("timeout")
        .and_then(|t| t.trim().parse::<u64>().ok());
    let timeout = state.settings.queue.clamp_wait(requested);

    match state.sessions.wait(session, timeout, cancel).await {
        Ok(WaitOutcome::Events(events)) => Response::json(StatusCode::OK, &events),
        Ok(WaitOutcome::NoContent | WaitOutcome::Cancelled) => Response::no_content(),
        Err(e) => Response::from_error(&e),
    }
}

fn index(state: &AppState) -> Response {
    let topics = state.broker.topic_summaries();
    let mut page = String::from("pollcast broker\n\n");
    let _ = writeln!(page, "topics: {}", topics.len());
    for topic in &topics {
        let _ = write!(
            page,
            "  {} ({} listening, since {})",
            topic.name, topic.listeners, topic.created_at
        );
        if let Some(favicon) = &topic.favicon {
            let _ = write!(page, " icon={favicon}");
        }
        page.push('\n');
    }
    let _ = writeln!(page, "\nsessions: {}", state.sessions.session_count());
    Response::text(StatusCode::OK, page)
}
