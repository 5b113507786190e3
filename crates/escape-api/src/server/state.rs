#[derive(Clone)]
struct AppState {
    inner: std::sync::Arc<Mutex<ServerInner>>,
    stream_tx: broadcast::Sender<StreamMessage>,
    store: SharedStore,
}

impl AppState {
    fn new(store: SharedStore) -> Self {
        let (stream_tx, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            inner: std::sync::Arc::new(Mutex::new(ServerInner::default())),
            stream_tx,
            store,
        }
    }
}

/// Sessions hosted by this process; the server drives every player and the clock.
#[derive(Debug, Default)]
struct ServerInner {
    sessions: BTreeMap<String, GameApi>,
    created_sessions: u64,
}

impl ServerInner {
    fn next_session_id(&mut self) -> String {
        self.created_sessions += 1;
        format!("session_{:06}", self.created_sessions)
    }

    fn tick(&mut self, elapsed_ms: u64) -> Vec<StreamMessage> {
        let mut messages = Vec::new();
        for (session_id, api) in &mut self.sessions {
            let merged = api.pump_notifications().unwrap_or_else(|err| {
                warn!(session_id, error = %err, "merge failed");
                0
            });
            let fired = api.advance(elapsed_ms);
            if merged + fired == 0 {
                continue;
            }
            messages.push(StreamMessage::session_snapshot(&api.snapshot()));
            if let Some(error) = api.last_store_error() {
                messages.push(StreamMessage::warning(session_id, error.to_string()));
            }
        }
        self.sessions.retain(|session_id, api| {
            if api.is_detached() {
                info!(session_id, "detached session dropped");
            }
            !api.is_detached()
        });
        messages
    }
}

fn require_session_mut<'a>(
    inner: &'a mut ServerInner,
    session_id: &str,
) -> Result<&'a mut GameApi, HttpApiError> {
    inner
        .sessions
        .get_mut(session_id)
        .ok_or_else(|| HttpApiError::session_not_found(session_id))
}

fn broadcast_messages(state: &AppState, messages: Vec<StreamMessage>) {
    for message in messages {
        let _ = state.stream_tx.send(message);
    }
}
