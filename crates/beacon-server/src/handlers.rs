//! Connection handlers for the Beacon server.
//!
//! Each channel walks the lifecycle `Connecting -> Authenticated ->
//! Registered -> Closed`: the first frame must be a `connect` carrying a
//! session ticket, validated exactly once before any registry mutation;
//! registration inserts the channel into presence, joins the user's private
//! room, and broadcasts the online transition; any disconnect path runs the
//! same teardown, gated on winning the channel-identity tie-break so a
//! superseded channel cannot tear down a newer registration. A closed
//! channel never re-registers; a reconnect is a brand-new channel.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use beacon_core::rooms::private_room;
use beacon_core::{
    Channel, DeliveryTracker, FanoutError, FanoutRouter, MemoryStore, PresenceRegistry,
    RoomRegistry, SessionAuth, Storage, TicketRegistry, TypingTracker,
};
use beacon_protocol::{
    codec, ChatType, ClientFrame, ProtocolError, ServerFrame, UserSummary, Version,
    PROTOCOL_VERSION,
};
use bytes::BytesMut;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Shared server state.
pub struct AppState {
    /// Who is reachable right now.
    pub presence: Arc<PresenceRegistry>,
    /// Named room membership.
    pub rooms: Arc<RoomRegistry>,
    /// Typing indicators with auto-expiry.
    pub typing: Arc<TypingTracker>,
    /// Private/group event fanout.
    pub router: FanoutRouter,
    /// Delivery and read receipts.
    pub delivery: DeliveryTracker,
    /// Session ticket validation.
    pub auth: Arc<dyn SessionAuth>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state over the injected collaborators.
    #[must_use]
    pub fn new(config: Config, storage: Arc<dyn Storage>, auth: Arc<dyn SessionAuth>) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let rooms = Arc::new(RoomRegistry::with_limit(config.limits.max_rooms_per_user));
        let typing = Arc::new(TypingTracker::with_expiry(
            Arc::clone(&presence),
            Duration::from_millis(config.typing.expiry_ms),
        ));
        let router = FanoutRouter::new(Arc::clone(&presence), Arc::clone(&storage));
        let delivery = DeliveryTracker::new(
            Arc::clone(&presence),
            Arc::clone(&typing),
            Arc::clone(&storage),
        );

        Self {
            presence,
            rooms,
            typing,
            router,
            delivery,
            auth,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server over the given collaborators.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(
    config: Config,
    storage: Arc<dyn Storage>,
    auth: Arc<dyn SessionAuth>,
) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone(), storage, auth));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            warn!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Beacon server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Run the server with in-memory storage and ticket collaborators.
///
/// Deployments embed [`run_server`] with their own `Storage` and
/// `SessionAuth` implementations; this wiring is for local development.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server_in_memory(config: Config) -> Result<()> {
    run_server(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(TicketRegistry::new()),
    )
    .await
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.presence.online_count() >= state.config.limits.max_connections {
        warn!("Connection refused: at capacity");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
        .into_response()
}

/// Read WebSocket messages until one complete frame decodes.
///
/// Returns `None` on close, transport error, or an undecodable stream.
async fn read_frame(
    receiver: &mut SplitStream<WebSocket>,
    read_buffer: &mut BytesMut,
) -> Option<ClientFrame> {
    loop {
        match codec::decode_from::<ClientFrame>(read_buffer) {
            Ok(Some(frame)) => return Some(frame),
            Ok(None) => {}
            Err(_) => return None,
        }

        match receiver.next().await {
            Some(Ok(Message::Binary(data))) => read_buffer.extend_from_slice(&data),
            Some(Ok(Message::Text(text))) => read_buffer.extend_from_slice(text.as_bytes()),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
        }
    }
}

/// Handle a WebSocket connection through its whole lifecycle.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (mut sender, mut receiver) = socket.split();
    let mut read_buffer = BytesMut::with_capacity(4096);

    // Connecting -> Authenticated: the first frame must carry a valid
    // session ticket. Nothing is registered before this succeeds.
    let handshake_window = Duration::from_millis(state.config.handshake.timeout_ms);
    let connect = tokio::time::timeout(
        handshake_window,
        read_frame(&mut receiver, &mut read_buffer),
    )
    .await
    .ok()
    .flatten();

    let user = match authenticate_connect(&state, connect).await {
        Ok(user) => user,
        Err(refusal) => {
            let _ = send_frame(&mut sender, &refusal).await;
            metrics::record_error("auth");
            return;
        }
    };

    // Authenticated -> Registered: insert into presence (replacing any
    // superseded channel for this user), join the private room, announce.
    let (channel, mut outbound) = Channel::open(user);
    if let Some(superseded) = state.presence.register(Arc::clone(&channel)) {
        debug!(
            user = %channel.user_id(),
            old_channel = superseded.id(),
            new_channel = channel.id(),
            "Reconnect superseded a live channel"
        );
    }
    if let Err(err) = state
        .rooms
        .join(channel.user_id(), &private_room(channel.user_id()))
    {
        warn!(user = %channel.user_id(), error = %err, "Failed to join private room");
    }
    state
        .router
        .broadcast(channel.id(), &ServerFrame::user_online(channel.user_id(), true));
    metrics::set_online_users(state.presence.online_count());
    metrics::set_active_rooms(state.rooms.room_count());

    let connected = ServerFrame::connected(
        channel.id(),
        channel.user_id(),
        PROTOCOL_VERSION.major,
        state.config.heartbeat.interval_ms as u32,
    );
    if send_frame(&mut sender, &connected).await.is_err() {
        teardown_channel(&state, &channel);
        return;
    }

    debug!(user = %channel.user_id(), channel = channel.id(), "Channel registered");

    // Registered: pump outbound pushes and inbound events until the
    // connection goes away.
    loop {
        tokio::select! {
            biased;

            frame = outbound.recv() => {
                match frame {
                    Some(frame) => {
                        if send_frame(&mut sender, &frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        if data.len() > state.config.limits.max_message_size {
                            channel.push(ServerFrame::error("Frame too large"));
                            metrics::record_error("oversize");
                            continue;
                        }
                        metrics::record_message(data.len(), "inbound");
                        read_buffer.extend_from_slice(&data);
                        if !drain_frames(&mut read_buffer, &channel, &state).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        metrics::record_message(text.len(), "inbound");
                        read_buffer.extend_from_slice(text.as_bytes());
                        if !drain_frames(&mut read_buffer, &channel, &state).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Transport keep-alive; idleness is its concern
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(channel = channel.id(), "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(channel = channel.id(), error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(channel = channel.id(), "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Registered -> Closed
    teardown_channel(&state, &channel);
    debug!(user = %channel.user_id(), channel = channel.id(), "Channel closed");
}

/// Validate the opening frame of a channel.
///
/// Runs the ticket check exactly once, before any registry mutation. On
/// refusal, returns the `error` frame to send before closing; a missing,
/// non-`connect`, or timed-out first frame refuses the channel the same
/// way a bad ticket does.
async fn authenticate_connect(
    state: &AppState,
    connect: Option<ClientFrame>,
) -> Result<UserSummary, ServerFrame> {
    let Some(ClientFrame::Connect { version, ticket }) = connect else {
        return Err(ServerFrame::error("Authentication error"));
    };

    if !Version::new(version, 0).is_compatible_with(&PROTOCOL_VERSION) {
        return Err(ServerFrame::error("Unsupported protocol version"));
    }

    let Some(ticket) = ticket else {
        return Err(ServerFrame::error("Authentication error"));
    };

    state.auth.authenticate(&ticket).await.map_err(|err| {
        debug!("Handshake refused: {err}");
        ServerFrame::error("Authentication error")
    })
}

/// Decode and dispatch every complete frame buffered so far.
///
/// Returns `false` when the stream can no longer be trusted and the
/// connection should close.
async fn drain_frames(
    read_buffer: &mut BytesMut,
    channel: &Arc<Channel>,
    state: &Arc<AppState>,
) -> bool {
    loop {
        match codec::decode_from::<ClientFrame>(read_buffer) {
            Ok(Some(frame)) => {
                dispatch_frame(frame, channel, state).await;
            }
            Ok(None) => return true,
            Err(err) => {
                // The offending frame's bytes were already consumed, so the
                // stream stays aligned; an oversized length prefix cannot be
                // skipped and poisons the connection.
                warn!(channel = channel.id(), error = %err, "Malformed frame");
                metrics::record_error("protocol");
                channel.push(ServerFrame::error("Malformed frame"));
                if matches!(err, ProtocolError::FrameTooLarge(_)) {
                    return false;
                }
            }
        }
    }
}

/// Map one inbound event onto the engine.
///
/// Failures here are isolated to this channel: the offender gets an
/// `error` push and every other channel's state is untouched.
async fn dispatch_frame(frame: ClientFrame, channel: &Arc<Channel>, state: &Arc<AppState>) {
    match frame {
        ClientFrame::SendMessage {
            message_id,
            chat_type: ChatType::Private,
            recipient_id,
            ..
        } => {
            let Some(recipient_id) = recipient_id else {
                channel.push(ServerFrame::error("recipient_id required for private chat"));
                metrics::record_error("bad_request");
                return;
            };

            let delivered = state.router.route_private(
                &recipient_id,
                ServerFrame::NewMessage {
                    message_id: message_id.clone(),
                    sender: channel.user().clone(),
                },
            );
            metrics::record_fanout(usize::from(delivered));

            match state
                .delivery
                .on_message_sent(channel, &message_id, &recipient_id)
                .await
            {
                Ok(true) => metrics::record_receipt("delivered"),
                Ok(false) => {}
                Err(err) => {
                    // Degraded: receipt already went out, flag did not stick
                    warn!(message = %message_id, error = %err, "Delivery persisted degraded");
                    metrics::record_error("storage");
                }
            }
        }

        ClientFrame::SendMessage {
            message_id,
            chat_type: ChatType::Group,
            group_id,
            ..
        } => {
            let Some(group_id) = group_id else {
                channel.push(ServerFrame::error("group_id required for group chat"));
                metrics::record_error("bad_request");
                return;
            };

            let fanout = state
                .router
                .route_group(
                    channel.user_id(),
                    &group_id,
                    ServerFrame::NewGroupMessage {
                        message_id: message_id.clone(),
                        group_id: group_id.clone(),
                        sender: channel.user().clone(),
                    },
                )
                .await;

            match fanout {
                Ok(delivered_to) => {
                    metrics::record_fanout(delivered_to.len());
                    metrics::record_receipt("group_delivered");
                    channel.push(ServerFrame::GroupMessageDelivered {
                        message_id,
                        group_id,
                        delivered_to,
                    });
                }
                Err(err @ (FanoutError::GroupNotFound(_) | FanoutError::NotAMember { .. })) => {
                    channel.push(ServerFrame::error(err.to_string()));
                    metrics::record_error("fanout");
                }
                Err(FanoutError::Storage(err)) => {
                    warn!(group = %group_id, error = %err, "Group fanout degraded");
                    channel.push(ServerFrame::error("Group lookup failed"));
                    metrics::record_error("storage");
                }
            }
        }

        ClientFrame::MessageDelivered {
            message_id,
            sender_id,
        } => {
            if let Err(err) = state
                .delivery
                .on_delivery_ack(&message_id, &sender_id, channel.user_id())
                .await
            {
                warn!(message = %message_id, error = %err, "Delivery ack persisted degraded");
                metrics::record_error("storage");
            } else {
                metrics::record_receipt("delivered");
            }
        }

        ClientFrame::MessageRead {
            message_id,
            sender_id,
        } => {
            if state
                .delivery
                .on_message_read(&message_id, &sender_id, channel.user_id())
            {
                metrics::record_receipt("read");
            }
        }

        ClientFrame::Typing {
            recipient_id,
            is_typing,
        } => {
            metrics::record_typing_event();
            if is_typing {
                state.typing.start_typing(channel.user_id(), &recipient_id);
            } else {
                state.typing.stop_typing(channel.user_id(), &recipient_id);
            }
        }

        ClientFrame::JoinRoom { room_id } => {
            if let Err(err) = state.rooms.join(channel.user_id(), &room_id) {
                channel.push(ServerFrame::error(err.to_string()));
                metrics::record_error("room");
            }
            metrics::set_active_rooms(state.rooms.room_count());
        }

        ClientFrame::LeaveRoom { room_id } => {
            state.rooms.leave(channel.user_id(), &room_id);
            metrics::set_active_rooms(state.rooms.room_count());
        }

        ClientFrame::UpdateAvailability {
            is_available,
            reason,
            duration,
        } => {
            state.router.broadcast(
                channel.id(),
                &ServerFrame::UserAvailabilityUpdate {
                    user_id: channel.user_id().to_string(),
                    is_available,
                    reason,
                    duration,
                },
            );
        }

        ClientFrame::Ping { timestamp } => {
            channel.push(ServerFrame::Pong { timestamp });
        }

        ClientFrame::Connect { .. } => {
            debug!(channel = channel.id(), "Connect frame on registered channel ignored");
        }
    }
}

/// Tear down a closing channel.
///
/// Cleanup runs only if this channel still owns its user's presence entry;
/// a superseded channel closing late must not clear typing state, rooms,
/// or broadcast offline for a user who is online on a newer channel.
fn teardown_channel(state: &AppState, channel: &Arc<Channel>) -> bool {
    let won = state.presence.deregister(channel.user_id(), channel.id());
    if won {
        state.typing.clear_for_sender(channel.user_id());
        state.rooms.leave_all(channel.user_id());
        state.router.broadcast(
            channel.id(),
            &ServerFrame::user_online(channel.user_id(), false),
        );
    }
    metrics::set_online_users(state.presence.online_count());
    metrics::set_active_rooms(state.rooms.room_count());
    won
}

/// Send a frame to the WebSocket.
async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> Result<()> {
    let data = codec::encode(frame)?;
    metrics::record_message(data.len(), "outbound");
    sender.send(Message::Binary(data.to_vec())).await?;
    Ok(())
}
