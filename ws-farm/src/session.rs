// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! One WebSocket session: connect, authenticate, subscribe, read. The task
//! owns its socket and reconnects with capped backoff; on reopen the prior
//! subscription set is restored verbatim.

use crate::protocol::{
    auth_frame, decode_frame, subscribe_frame, unsubscribe_frame, FeedMessage,
};
use crate::FarmConfig;
use core_types::retry::RetryPolicy;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub enum SessionCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

#[derive(Debug)]
pub enum SessionEvent {
    Authenticated,
    Disconnected,
    ReconnectExhausted,
    Batch {
        messages: Vec<FeedMessage>,
        malformed: usize,
    },
}

#[derive(Clone)]
pub struct SessionHandle {
    pub commands: mpsc::Sender<SessionCommand>,
}

enum ConnectionExit {
    Shutdown,
    /// Connection dropped; true when the session had authenticated, which
    /// resets the backoff budget.
    Lost(bool),
}

pub fn spawn_session(
    id: usize,
    cfg: Arc<FarmConfig>,
    events: mpsc::Sender<(usize, SessionEvent)>,
    cancel: CancellationToken,
) -> SessionHandle {
    let (command_tx, command_rx) = mpsc::channel(64);
    tokio::spawn(session_task(id, cfg, command_rx, events, cancel));
    SessionHandle {
        commands: command_tx,
    }
}

async fn session_task(
    id: usize,
    cfg: Arc<FarmConfig>,
    mut commands: mpsc::Receiver<SessionCommand>,
    events: mpsc::Sender<(usize, SessionEvent)>,
    cancel: CancellationToken,
) {
    let backoff = RetryPolicy::websocket(cfg.max_reconnect_attempts, cfg.reconnect_interval_ms);
    // Channels this session should hold; survives reconnects.
    let mut subscribed: BTreeSet<String> = BTreeSet::new();
    let mut attempts = 0usize;
    loop {
        if cancel.is_cancelled() {
            return;
        }
        match run_connection(id, &cfg, &mut commands, &events, &mut subscribed, &cancel).await {
            Ok(ConnectionExit::Shutdown) => return,
            Ok(ConnectionExit::Lost(was_authenticated)) => {
                if was_authenticated {
                    attempts = 0;
                }
                if events.send((id, SessionEvent::Disconnected)).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                warn!("[session {id}] connection error: {err}");
                if events.send((id, SessionEvent::Disconnected)).await.is_err() {
                    return;
                }
            }
        }
        attempts += 1;
        if attempts > cfg.max_reconnect_attempts {
            warn!("[session {id}] reconnect budget exhausted");
            let _ = events.send((id, SessionEvent::ReconnectExhausted)).await;
            return;
        }
        let delay = backoff.delay_for(attempts - 1);
        debug!("[session {id}] reconnecting in {delay:?} (attempt {attempts})");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(delay) => {}
        }
    }
}

async fn run_connection(
    id: usize,
    cfg: &FarmConfig,
    commands: &mut mpsc::Receiver<SessionCommand>,
    events: &mpsc::Sender<(usize, SessionEvent)>,
    subscribed: &mut BTreeSet<String>,
    cancel: &CancellationToken,
) -> Result<ConnectionExit, crate::FarmError> {
    let (ws, _) = connect_async(cfg.ws_url.as_str()).await?;
    info!("[session {id}] connected to {}", cfg.ws_url);
    let (mut write, mut read) = ws.split();
    write.send(Message::Text(auth_frame(&cfg.api_key))).await?;

    // Authenticated once the grace window has elapsed; a negative status
    // frame inside it closes the session for a fresh attempt.
    let grace = sleep(Duration::from_millis(cfg.auth_grace_ms));
    tokio::pin!(grace);
    let mut authenticated = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(ConnectionExit::Shutdown);
            }
            _ = &mut grace, if !authenticated => {
                authenticated = true;
                info!("[session {id}] authenticated");
                if !subscribed.is_empty() {
                    let channels: Vec<String> = subscribed.iter().cloned().collect();
                    write.send(Message::Text(subscribe_frame(&channels))).await?;
                    debug!("[session {id}] restored {} channels", channels.len());
                }
                if events.send((id, SessionEvent::Authenticated)).await.is_err() {
                    return Ok(ConnectionExit::Shutdown);
                }
            }
            Some(command) = commands.recv() => {
                match command {
                    SessionCommand::Subscribe(channels) => {
                        let fresh: Vec<String> = channels
                            .into_iter()
                            .filter(|c| subscribed.insert(c.clone()))
                            .collect();
                        if !fresh.is_empty() {
                            write.send(Message::Text(subscribe_frame(&fresh))).await?;
                        }
                    }
                    SessionCommand::Unsubscribe(channels) => {
                        let stale: Vec<String> = channels
                            .into_iter()
                            .filter(|c| subscribed.remove(c))
                            .collect();
                        if !stale.is_empty() {
                            write.send(Message::Text(unsubscribe_frame(&stale))).await?;
                        }
                    }
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let (messages, malformed) = decode_frame(&text);
                        if auth_rejected(&messages) {
                            warn!("[session {id}] authentication rejected");
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(ConnectionExit::Lost(authenticated));
                        }
                        if !messages.is_empty() || malformed > 0 {
                            let event = SessionEvent::Batch { messages, malformed };
                            if events.send((id, event)).await.is_err() {
                                return Ok(ConnectionExit::Shutdown);
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        write.send(Message::Pong(payload)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("[session {id}] upstream closed");
                        return Ok(ConnectionExit::Lost(authenticated));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("[session {id}] read error: {err}");
                        return Ok(ConnectionExit::Lost(authenticated));
                    }
                }
            }
        }
    }
}

fn auth_rejected(messages: &[FeedMessage]) -> bool {
    messages.iter().any(|m| match m {
        FeedMessage::Status(status) => status.is_auth_failure(),
        _ => false,
    })
}
