async fn stream_session(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, HttpApiError> {
    let initial_message = {
        let mut inner = state.inner.lock().await;
        let api = require_session_mut(&mut inner, &session_id)?;
        StreamMessage::session_snapshot(&api.snapshot())
    };

    Ok(ws.on_upgrade(move |socket| stream_socket(socket, state, session_id, initial_message)))
}

/// What to do with one item from the server-wide stream channel.
#[derive(Debug)]
enum Relay {
    Send(StreamMessage),
    Skip,
    Close,
}

impl Relay {
    fn for_session(
        session_id: &str,
        received: Result<StreamMessage, broadcast::error::RecvError>,
    ) -> Self {
        match received {
            Ok(message) if message.session_id == session_id => Self::Send(message),
            Ok(_) => Self::Skip,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                Self::Send(StreamMessage::lagged(session_id, skipped))
            }
            Err(broadcast::error::RecvError::Closed) => Self::Close,
        }
    }
}

async fn stream_socket(
    mut socket: WebSocket,
    state: AppState,
    session_id: String,
    initial_message: StreamMessage,
) {
    let mut rx = state.stream_tx.subscribe();
    if send_stream_message(&mut socket, &initial_message).await.is_err() {
        return;
    }

    loop {
        let delivered = tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Ping(payload))) => socket.send(Message::Pong(payload)).await.is_ok(),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => false,
                Some(Ok(_)) => true,
            },
            received = rx.recv() => match Relay::for_session(&session_id, received) {
                Relay::Send(message) => send_stream_message(&mut socket, &message).await.is_ok(),
                Relay::Skip => true,
                Relay::Close => false,
            },
        };
        if !delivered {
            debug!(session_id = %session_id, "stream closed");
            break;
        }
    }
}

async fn send_stream_message(
    socket: &mut WebSocket,
    message: &StreamMessage,
) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(message).map_err(axum::Error::new)?;
    socket.send(Message::Text(payload.into())).await
}

#[derive(Debug, Clone, Serialize)]
struct StreamMessage {
    schema_version: String,
    #[serde(rename = "type")]
    message_type: String,
    session_id: String,
    payload: Value,
}

impl StreamMessage {
    fn new(message_type: &str, session_id: &str, payload: Value) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            message_type: message_type.to_string(),
            session_id: session_id.to_string(),
            payload,
        }
    }

    fn session_snapshot(snapshot: &SessionSnapshot) -> Self {
        Self::new("session.snapshot", &snapshot.session_id, json!(snapshot))
    }

    fn store_change(change: &StoreChange) -> Self {
        Self::new("store.change", &change.session_id, json!(change))
    }

    fn intent_result(result: &IntentResult) -> Self {
        Self::new("intent.result", &result.session_id, json!(result))
    }

    fn warning(session_id: &str, warning: String) -> Self {
        Self::new("warning", session_id, json!({ "message": warning }))
    }

    /// The subscriber fell behind the channel and `skipped` messages were dropped for it.
    fn lagged(session_id: &str, skipped: u64) -> Self {
        Self::new(
            "warning",
            session_id,
            json!({
                "message": format!("stream client lagged and skipped {skipped} message(s)"),
                "skipped": skipped,
            }),
        )
    }
}
