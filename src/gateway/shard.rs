// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Gateway websocket connection with heartbeats and reconnects

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use super::{intents, Action, CloseAction, Event, GatewayPayload, Session, GATEWAY_VERSION};
use crate::rest::RestClient;
use crate::{PanopticonError, Result};

/// Upper bound on TCP connect plus TLS and websocket handshakes
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disconnect {
    Shutdown,
    Reconnect,
    Reidentify,
}

/// Exponential reconnect delay, 1s doubling up to 60s
#[derive(Debug)]
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    const MAX: Duration = Duration::from_secs(60);

    pub fn new() -> Self {
        Self { attempt: 0 }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = Duration::from_secs(2u64.saturating_pow(self.attempt)).min(Self::MAX);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// A single gateway connection (shard 0 of 1)
pub struct Shard {
    rest: Arc<RestClient>,
    session: Session,
    gateway_url: Option<String>,
    connect_timeout: Duration,
    /// Events waiting for room in the archive queue, oldest first
    backlog: VecDeque<Event>,
}

impl Shard {
    pub fn new(rest: Arc<RestClient>, token: &str) -> Self {
        Self {
            rest,
            session: Session::new(token, intents::ARCHIVE),
            gateway_url: None,
            connect_timeout: CONNECT_TIMEOUT,
            backlog: VecDeque::new(),
        }
    }

    /// Run until shutdown or a fatal close, forwarding events to `events`
    ///
    /// The backoff only resets once a connection reaches READY or RESUMED.
    pub async fn run(
        mut self,
        events: mpsc::Sender<Event>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut backoff = Backoff::new();

        loop {
            if *shutdown.borrow() {
                self.flush(&events).await;
                return Ok(());
            }

            let delay = match self.connect_once(&events, &mut shutdown, &mut backoff).await {
                Ok(Disconnect::Shutdown) => {
                    self.flush(&events).await;
                    return Ok(());
                }
                Ok(Disconnect::Reconnect) => backoff.next_delay(),
                Ok(Disconnect::Reidentify) => {
                    let ms = rand::thread_rng().gen_range(1000..=5000);
                    Duration::from_millis(ms)
                }
                Err(e @ PanopticonError::FatalClose { .. }) | Err(e @ PanopticonError::Unauthorized(_)) => {
                    error!("Gateway stopped: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!("Gateway connection lost: {}", e);
                    delay
                }
            };

            info!("Reconnecting in {:?}", delay);
            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    self.flush(&events).await;
                    return Ok(());
                }
            }
        }
    }

    async fn url(&mut self) -> Result<String> {
        let base = match self.session.resume_url() {
            Some(url) => url.to_string(),
            None => match self.gateway_url {
                Some(ref url) => url.clone(),
                None => {
                    let url = self.rest.gateway_url().await?;
                    self.gateway_url = Some(url.clone());
                    url
                }
            },
        };
        Ok(format!("{}/?v={}&encoding=json", base.trim_end_matches('/'), GATEWAY_VERSION))
    }

    async fn connect_once(
        &mut self,
        events: &mpsc::Sender<Event>,
        shutdown: &mut watch::Receiver<bool>,
        backoff: &mut Backoff,
    ) -> Result<Disconnect> {
        let url = tokio::select! {
            url = self.url() => url?,
            _ = shutdown.changed() => return Ok(Disconnect::Shutdown),
        };
        info!("Connecting to gateway {}", url);

        let connect = time::timeout(self.connect_timeout, connect_async(url.as_str()));
        let (socket, _) = tokio::select! {
            connected = connect => match connected {
                Ok(connected) => connected?,
                Err(_) => {
                    return Err(PanopticonError::Gateway(format!(
                        "handshake timed out after {:?}",
                        self.connect_timeout
                    )))
                }
            },
            _ = shutdown.changed() => return Ok(Disconnect::Shutdown),
        };
        self.session.on_connect();
        let (mut sink, mut stream) = socket.split();
        let mut heartbeat: Option<Interval> = None;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Closing gateway connection");
                    let frame = CloseFrame { code: CloseCode::Normal, reason: "shutdown".into() };
                    let _ = sink.send(WsMessage::Close(Some(frame))).await;
                    return Ok(Disconnect::Shutdown);
                }
                _ = tick(&mut heartbeat) => {
                    match self.session.heartbeat() {
                        Some(beat) => {
                            debug!("Heartbeat (seq {:?})", self.session.seq());
                            sink.send(WsMessage::Text(beat.to_string())).await?;
                        }
                        None => {
                            warn!("Heartbeat not acknowledged, reconnecting");
                            return Ok(Disconnect::Reconnect);
                        }
                    }
                }
                permit = events.reserve(), if !self.backlog.is_empty() => {
                    let Ok(permit) = permit else {
                        return Ok(Disconnect::Shutdown);
                    };
                    if let Some(event) = self.backlog.pop_front() {
                        permit.send(event);
                    }
                    if self.backlog.is_empty() {
                        info!("Archive queue caught up");
                    }
                }
                frame = stream.next() => {
                    let frame = match frame {
                        Some(frame) => frame?,
                        None => return Err(PanopticonError::Gateway("connection closed".to_string())),
                    };

                    match frame {
                        WsMessage::Text(text) => {
                            let payload = match GatewayPayload::parse(&text) {
                                Ok(payload) => payload,
                                Err(e) => {
                                    warn!("Malformed gateway payload: {}", e);
                                    continue;
                                }
                            };
                            let actions = match self.session.handle(payload) {
                                Ok(actions) => actions,
                                Err(e) => {
                                    warn!("Dropping gateway payload: {}", e);
                                    continue;
                                }
                            };
                            for action in actions {
                                match action {
                                    Action::Send(value) => {
                                        sink.send(WsMessage::Text(value.to_string())).await?;
                                    }
                                    Action::StartHeartbeat(period) => {
                                        heartbeat = Some(heartbeat_interval(period));
                                    }
                                    Action::Dispatch(event) => {
                                        if matches!(event, Event::Ready(_) | Event::Resumed) {
                                            backoff.reset();
                                        }
                                        if !self.forward(events, event) {
                                            return Ok(Disconnect::Shutdown);
                                        }
                                    }
                                    Action::Reconnect => return Ok(Disconnect::Reconnect),
                                    Action::Reidentify => return Ok(Disconnect::Reidentify),
                                }
                            }
                        }
                        WsMessage::Close(frame) => {
                            let code = frame.as_ref().map(|f| u16::from(f.code));
                            let reason = frame.map(|f| f.reason.into_owned()).unwrap_or_default();
                            info!("Gateway closed: {:?} {}", code, reason);
                            return match self.session.on_close(code) {
                                CloseAction::Resume => Ok(Disconnect::Reconnect),
                                CloseAction::Reidentify => Ok(Disconnect::Reidentify),
                                CloseAction::Fatal => Err(PanopticonError::FatalClose {
                                    code: code.unwrap_or_default(),
                                    reason,
                                }),
                            };
                        }
                        // Pings are answered by tungstenite
                        _ => {}
                    }
                }
            }
        }
    }

    /// Queue an event without waiting; returns false once the archive is gone
    ///
    /// Overflow is held in the backlog and drained in order by the socket
    /// loop as the writer catches up.
    fn forward(&mut self, events: &mpsc::Sender<Event>, event: Event) -> bool {
        if !self.backlog.is_empty() {
            self.backlog.push_back(event);
            return true;
        }
        match events.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!("Archive queue full, holding events until it drains");
                self.backlog.push_back(event);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Hand over whatever is still held back before stopping
    async fn flush(&mut self, events: &mpsc::Sender<Event>) {
        if !self.backlog.is_empty() {
            info!("Handing {} held events to the archive", self.backlog.len());
        }
        while let Some(event) = self.backlog.pop_front() {
            if events.send(event).await.is_err() {
                self.backlog.clear();
                break;
            }
        }
    }
}

/// First beat is jittered within one period, as the gateway asks
fn heartbeat_interval(period: Duration) -> Interval {
    let jitter: f64 = rand::random();
    let mut interval = time::interval_at(Instant::now() + period.mul_f64(jitter), period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{accept_async, WebSocketStream};

    type Server = WebSocketStream<TcpStream>;

    fn shard(url: &str) -> Shard {
        let rest = RestClient::new("http://127.0.0.1:9", "tok", Duration::from_secs(1)).unwrap();
        let mut shard = Shard::new(Arc::new(rest), "tok");
        shard.gateway_url = Some(url.to_string());
        shard
    }

    /// Local gateway running `handler` on every connection
    async fn gateway<F, Fut>(handler: F) -> (String, Arc<AtomicUsize>)
    where
        F: Fn(Server) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();
        let handler = Arc::new(handler);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let handler = handler.clone();
                tokio::spawn(async move {
                    if let Ok(ws) = accept_async(stream).await {
                        handler(ws).await;
                    }
                });
            }
        });
        (url, connections)
    }

    /// Accepts TCP and never answers the handshake
    async fn silent_gateway() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        url
    }

    fn text(value: Value) -> WsMessage {
        WsMessage::Text(value.to_string())
    }

    fn hello(ms: u64) -> WsMessage {
        text(json!({ "op": 10, "d": { "heartbeat_interval": ms } }))
    }

    async fn next_json(ws: &mut Server) -> Option<Value> {
        while let Some(Ok(frame)) = ws.next().await {
            if let WsMessage::Text(text) = frame {
                return serde_json::from_str(&text).ok();
            }
        }
        None
    }

    async fn drain(ws: &mut Server) {
        while let Some(Ok(_)) = ws.next().await {}
    }

    async fn close_with(mut ws: Server, code: u16) {
        let frame = CloseFrame { code: CloseCode::from(code), reason: "".into() };
        let _ = ws.close(Some(frame)).await;
        drain(&mut ws).await;
    }

    /// Run the shard and signal shutdown after `after` unless it stops first
    async fn run_for(shard: Shard, events: mpsc::Sender<Event>, after: Duration) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let run = shard.run(events, shutdown_rx);
        tokio::pin!(run);
        tokio::select! {
            result = &mut run => return result,
            _ = time::sleep(after) => {}
        }
        shutdown_tx.send(true).unwrap();
        time::timeout(Duration::from_secs(5), run).await.expect("shard ignored shutdown")
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new();
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_tick_without_interval_never_fires() {
        let mut none: Option<Interval> = None;
        let fired = time::timeout(Duration::from_millis(20), tick(&mut none)).await;
        assert!(fired.is_err());
    }

    #[tokio::test]
    async fn test_heartbeat_interval_fires_within_period() {
        let mut interval = Some(heartbeat_interval(Duration::from_millis(30)));
        let fired = time::timeout(Duration::from_millis(500), tick(&mut interval)).await;
        assert!(fired.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_stalled_handshake() {
        let url = silent_gateway().await;
        let (tx, _rx) = mpsc::channel(8);

        let result = run_for(shard(&url), tx, Duration::from_millis(300)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_stalled_handshake_times_out() {
        let url = silent_gateway().await;
        let mut shard = shard(&url);
        shard.connect_timeout = Duration::from_millis(200);
        let (tx, _rx) = mpsc::channel(8);
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let result = time::timeout(
            Duration::from_secs(5),
            shard.connect_once(&tx, &mut shutdown_rx, &mut Backoff::new()),
        ).await.unwrap();
        assert!(matches!(result, Err(PanopticonError::Gateway(_))));
    }

    #[tokio::test]
    async fn test_close_before_ready_backs_off() {
        let (url, connections) = gateway(|ws| close_with(ws, 4000)).await;
        let (tx, _rx) = mpsc::channel(8);

        run_for(shard(&url), tx, Duration::from_millis(1500)).await.unwrap();

        // Connect at 0s, retry after 1s, next retry would be at 3s
        let count = connections.load(Ordering::SeqCst);
        assert!((1..=2).contains(&count), "{} connections", count);
    }

    #[tokio::test]
    async fn test_fatal_close_stops_shard() {
        let (url, connections) = gateway(|ws| close_with(ws, 4004)).await;
        let (tx, _rx) = mpsc::channel(8);

        let result = run_for(shard(&url), tx, Duration::from_secs(10)).await;
        assert!(matches!(result, Err(PanopticonError::FatalClose { code: 4004, .. })));
        assert_eq!(connections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unacknowledged_heartbeat_reconnects() {
        let (url, _) = gateway(|mut ws| async move {
            let _ = ws.send(hello(50)).await;
            drain(&mut ws).await;
        }).await;
        let mut shard = shard(&url);
        let (tx, _rx) = mpsc::channel(8);
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let result = time::timeout(
            Duration::from_secs(5),
            shard.connect_once(&tx, &mut shutdown_rx, &mut Backoff::new()),
        ).await.unwrap();
        assert_eq!(result.unwrap(), Disconnect::Reconnect);
    }

    #[tokio::test]
    async fn test_reconnect_resumes_on_resume_url() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let (resume_url, _) = gateway(move |mut ws| {
            let seen = seen_tx.clone();
            async move {
                let _ = ws.send(hello(45_000)).await;
                if let Some(login) = next_json(&mut ws).await {
                    let _ = seen.send(login);
                }
                drain(&mut ws).await;
            }
        }).await;

        let ready_url = resume_url.clone();
        let (url, _) = gateway(move |mut ws| {
            let resume_url = ready_url.clone();
            async move {
                let _ = ws.send(hello(45_000)).await;
                let _ = next_json(&mut ws).await;
                let _ = ws.send(text(json!({
                    "op": 0, "s": 1, "t": "READY",
                    "d": {
                        "user": { "id": "42", "username": "panopticon", "bot": true },
                        "session_id": "abc",
                        "resume_gateway_url": resume_url
                    }
                }))).await;
                let _ = ws.send(text(json!({ "op": 7, "d": null }))).await;
                drain(&mut ws).await;
            }
        }).await;

        let (tx, mut rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let run = shard(&url).run(tx, shutdown_rx);
        tokio::pin!(run);

        let login = tokio::select! {
            result = &mut run => panic!("shard stopped early: {:?}", result),
            login = time::timeout(Duration::from_secs(5), seen_rx.recv()) => login.unwrap().unwrap(),
        };
        shutdown_tx.send(true).unwrap();
        time::timeout(Duration::from_secs(5), run).await.unwrap().unwrap();

        assert_eq!(login["op"], 6);
        assert_eq!(login["d"]["session_id"], "abc");
        assert_eq!(login["d"]["seq"], 1);
        assert!(matches!(rx.try_recv(), Ok(Event::Ready(_))));
    }

    #[tokio::test]
    async fn test_full_queue_keeps_heartbeating() {
        let (beats_tx, mut beats_rx) = mpsc::unbounded_channel();
        let (url, _) = gateway(move |mut ws| {
            let beats = beats_tx.clone();
            async move {
                for id in 1..=5 {
                    let _ = ws.send(text(json!({
                        "op": 0, "s": id, "t": "MESSAGE_DELETE",
                        "d": { "id": id.to_string(), "channel_id": "9" }
                    }))).await;
                }
                let _ = ws.send(hello(50)).await;
                let _ = next_json(&mut ws).await;
                for _ in 0..2 {
                    let Some(beat) = next_json(&mut ws).await else { return };
                    let _ = beats.send(beat);
                    let _ = ws.send(text(json!({ "op": 11 }))).await;
                }
                drain(&mut ws).await;
            }
        }).await;

        let mut shard = shard(&url);
        let (tx, mut rx) = mpsc::channel(1);
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let mut backoff = Backoff::new();
        {
            let conn = shard.connect_once(&tx, &mut shutdown_rx, &mut backoff);
            tokio::pin!(conn);
            for _ in 0..2 {
                let beat = tokio::select! {
                    result = &mut conn => panic!("connection ended: {:?}", result),
                    beat = time::timeout(Duration::from_secs(5), beats_rx.recv()) => beat.unwrap().unwrap(),
                };
                assert_eq!(beat["op"], 1);
            }
        }
        assert_eq!(shard.backlog.len(), 4);

        // Held events come out in arrival order
        let collect = async {
            let mut ids = Vec::new();
            while ids.len() < 5 {
                match rx.recv().await {
                    Some(Event::MessageDelete(delete)) => ids.push(delete.id.0),
                    other => panic!("unexpected {:?}", other),
                }
            }
            ids
        };
        let ((), ids) = tokio::join!(shard.flush(&tx), collect);
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }
}
