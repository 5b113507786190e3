#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    #[serde(default)]
    config: Option<SessionConfig>,
    players: Vec<SeatRequest>,
    #[serde(default)]
    bots: usize,
}

#[derive(Debug, Deserialize)]
struct SeatRequest {
    name: String,
    role: Role,
}

impl CreateSessionRequest {
    fn roster(&self) -> Result<Roster, RosterError> {
        let mut roster = Roster::new();
        for seat in &self.players {
            roster.join(&seat.name, seat.role)?;
        }
        for bot in 0..self.bots {
            roster.add_autonomous(&format!("BOT-{:02}", bot + 1))?;
        }
        Ok(roster)
    }
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    schema_version: String,
    session_id: String,
    snapshot: SessionSnapshot,
}

#[derive(Debug, Serialize)]
struct ListSessionsResponse {
    schema_version: String,
    hosted: Vec<String>,
    stored: Vec<String>,
}

#[derive(Debug, Serialize)]
struct DeleteSessionResponse {
    schema_version: String,
    session_id: String,
    result: IntentResult,
}

async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<ListSessionsResponse>, HttpApiError> {
    let hosted = {
        let inner = state.inner.lock().await;
        inner.sessions.keys().cloned().collect()
    };
    let stored = state
        .store
        .lock()
        .map_err(|_| HttpApiError::from_failure(ApiFailure::StoreLockPoisoned))?
        .list_sessions()
        .map_err(|err| HttpApiError::from_failure(err.into()))?;

    Ok(Json(ListSessionsResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        hosted,
        stored,
    }))
}

async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<SessionResponse>, HttpApiError> {
    let roster = request
        .roster()
        .map_err(|err| HttpApiError::invalid_intent("invalid roster", Some(err.to_string())))?;
    if roster.is_empty() {
        return Err(HttpApiError::invalid_intent(
            "a session needs at least one player",
            None,
        ));
    }

    let (response, messages) = {
        let mut inner = state.inner.lock().await;
        let mut config = request.config.clone().unwrap_or_default();
        if request.config.is_none() || config.session_id.trim().is_empty() {
            config.session_id = inner.next_session_id();
        }
        if inner.sessions.contains_key(&config.session_id) {
            return Err(HttpApiError::from_failure(ApiFailure::Persistence(
                PersistenceError::SessionExists(config.session_id),
            )));
        }

        let api = GameApi::host(state.store.clone(), config, roster, Authority::All)
            .map_err(HttpApiError::from_failure)?;
        let snapshot = api.snapshot();
        let session_id = api.session_id().to_string();
        inner.sessions.insert(session_id.clone(), api);
        info!(session_id, "session hosted");

        (
            SessionResponse {
                schema_version: SCHEMA_VERSION_V1.to_string(),
                session_id,
                snapshot: snapshot.clone(),
            },
            vec![StreamMessage::session_snapshot(&snapshot)],
        )
    };

    broadcast_messages(&state, messages);

    Ok(Json(response))
}

async fn get_snapshot(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<SessionResponse>, HttpApiError> {
    let mut inner = state.inner.lock().await;
    let api = require_session_mut(&mut inner, &session_id)?;
    Ok(Json(SessionResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        session_id: session_id.clone(),
        snapshot: api.snapshot(),
    }))
}

async fn submit_intent(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    Json(intent): Json<Intent>,
) -> Result<(StatusCode, Json<IntentResult>), HttpApiError> {
    if intent.session_id != session_id {
        return Err(HttpApiError::invalid_intent(
            "intent.session_id does not match the path",
            Some(format!(
                "path_session_id={session_id} intent_session_id={}",
                intent.session_id
            )),
        ));
    }

    let (result, messages) = {
        let mut inner = state.inner.lock().await;
        let api = require_session_mut(&mut inner, &session_id)?;
        let result = api.submit_intent(intent);
        let mut messages = vec![StreamMessage::intent_result(&result)];
        if result.accepted && !api.is_detached() {
            messages.push(StreamMessage::session_snapshot(&api.snapshot()));
        }
        if api.is_detached() {
            inner.sessions.remove(&session_id);
        }
        (result, messages)
    };

    broadcast_messages(&state, messages);

    let status = result
        .error
        .as_ref()
        .map_or(StatusCode::OK, |error| status_for(error.error_code));
    Ok((status, Json(result)))
}

async fn delete_session(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<DeleteSessionResponse>, HttpApiError> {
    let (result, messages) = {
        let mut inner = state.inner.lock().await;
        let api = require_session_mut(&mut inner, &session_id)?;
        let intent = Intent::new(
            format!("delete_{session_id}"),
            session_id.clone(),
            None,
            IntentPayload::DeleteAllData,
        );
        let result = api.submit_intent(intent);
        if !result.accepted {
            let error = result
                .error
                .clone()
                .unwrap_or_else(|| ApiError::new(ErrorCode::InternalError, "delete failed", None));
            return Err(HttpApiError {
                status: status_for(error.error_code),
                error,
            });
        }
        inner.sessions.remove(&session_id);
        (result.clone(), vec![StreamMessage::intent_result(&result)])
    };

    broadcast_messages(&state, messages);

    Ok(Json(DeleteSessionResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        session_id,
        result,
    }))
}
