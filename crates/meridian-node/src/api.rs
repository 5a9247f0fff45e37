//! HTTP API server for the Meridian node.
//!
//! Provides REST endpoints for node status, peer settlement configs, settlement
//! triggers, channel lifecycle and balances, received claim evidence, and the inbound
//! protocol-data endpoint peers deliver claims to.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use meridian_core::{ChainKind, Channel, Claim, CoreError, PeerSettlementConfig, SettlementRequiredEvent};
use meridian_settlement::{
    ChainError, PeerDirectory, ReceiveOutcome, ReceivedClaimRecord, SettlementError, SettlementReceipt,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::state::NodeState;
use crate::transport::{CONTENT_TYPE_HEADER, PROTOCOL_NAME_HEADER};

// --- Request / response types ---

#[derive(Serialize)]
pub struct RailStatus {
    pub chain: ChainKind,
    pub enabled: bool,
    pub owner_address: Option<String>,
    pub channel_count: usize,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub peer_count: usize,
    pub connected_peers: Vec<String>,
    pub rails: Vec<RailStatus>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRequest {
    pub peer_id: String,
    pub token_id: String,
    #[serde(with = "meridian_core::amount::as_string")]
    pub balance: u128,
}

#[derive(Deserialize)]
pub struct RailSwitchRequest {
    pub enabled: bool,
}

#[derive(Serialize)]
pub struct ChannelsResponse {
    pub channels: Vec<Channel>,
    pub count: usize,
}

#[derive(Serialize)]
pub struct ChannelActionResponse {
    pub chain: ChainKind,
    pub channel_id: String,
    pub action: &'static str,
    /// On-chain state after the action; absent once the channel is finalized.
    pub channel: Option<Channel>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenChannelBody {
    pub peer_id: String,
    #[serde(with = "meridian_core::amount::as_string")]
    pub amount: u128,
    #[serde(default)]
    pub settle_delay_secs: Option<u64>,
}

#[derive(Deserialize)]
pub struct DepositBody {
    #[serde(with = "meridian_core::amount::as_string")]
    pub amount: u128,
}

#[derive(Serialize)]
pub struct BalanceResponse {
    pub chain: ChainKind,
    pub address: String,
    #[serde(with = "meridian_core::amount::as_string")]
    pub balance: u128,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, kind: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            kind: kind.to_string(),
        }),
    )
}

fn status_for(e: &SettlementError) -> StatusCode {
    match e {
        SettlementError::UnknownPeer(_)
        | SettlementError::ChannelNotFound(_)
        | SettlementError::Chain(ChainError::ResourceNotFound(_)) => StatusCode::NOT_FOUND,
        SettlementError::IncompatibleSettlement { .. }
        | SettlementError::MissingPeerField { .. }
        | SettlementError::Core(_)
        | SettlementError::Chain(ChainError::TransactionFailed { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
        SettlementError::SettlementDisabled(_) | SettlementError::ChannelAlreadyOpen { .. } => StatusCode::CONFLICT,
        SettlementError::PeerNotConnected(_)
        | SettlementError::PeerConnectionInactive(_)
        | SettlementError::TransportFailed { .. }
        | SettlementError::Chain(_) => StatusCode::BAD_GATEWAY,
        SettlementError::AdapterNotFound(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<SettlementError> for ErrorResponse {
    fn from(e: SettlementError) -> Self {
        Self {
            error: e.to_string(),
            kind: e.kind().to_string(),
        }
    }
}

fn settlement_error(e: SettlementError) -> ApiError {
    (status_for(&e), Json(e.into()))
}

fn parse_chain(s: &str) -> Result<ChainKind, ApiError> {
    s.parse::<ChainKind>()
        .map_err(|e: CoreError| api_error(StatusCode::BAD_REQUEST, "invalid_input", e.to_string()))
}

// --- Handlers ---

async fn handle_status(State(state): State<Arc<NodeState>>) -> Json<StatusResponse> {
    let router = &state.router;
    let rails = ChainKind::ALL
        .into_iter()
        .map(|chain| {
            let adapter = router.adapter(chain).ok();
            RailStatus {
                chain,
                enabled: router.is_rail_enabled(chain),
                owner_address: adapter.as_ref().map(|a| a.owner_address()),
                channel_count: adapter.map(|a| a.cached_channels().len()).unwrap_or(0),
            }
        })
        .collect();

    let connected_peers: Vec<String> = state
        .directory
        .peer_ids()
        .into_iter()
        .filter(|id| state.directory.is_connected(id))
        .collect();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        peer_count: router.list_peers().len(),
        connected_peers,
        rails,
    })
}

async fn handle_settle(
    State(state): State<Arc<NodeState>>,
    Json(req): Json<SettlementRequest>,
) -> Result<Json<SettlementReceipt>, ApiError> {
    let event = SettlementRequiredEvent::new(req.peer_id, req.token_id, req.balance);
    state
        .router
        .handle_settlement_required(&event)
        .await
        .map(Json)
        .map_err(settlement_error)
}

async fn handle_list_peers(State(state): State<Arc<NodeState>>) -> Json<Vec<PeerSettlementConfig>> {
    Json(state.router.list_peers())
}

async fn handle_get_peer(
    State(state): State<Arc<NodeState>>,
    Path(peer_id): Path<String>,
) -> Result<Json<PeerSettlementConfig>, ApiError> {
    state
        .router
        .get_peer(&peer_id)
        .map(Json)
        .ok_or_else(|| settlement_error(SettlementError::UnknownPeer(peer_id)))
}

async fn handle_put_peer(
    State(state): State<Arc<NodeState>>,
    Path(peer_id): Path<String>,
    Json(config): Json<PeerSettlementConfig>,
) -> Result<Json<PeerSettlementConfig>, ApiError> {
    if config.peer_id != peer_id {
        return Err(api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_input",
            format!("peerId {} does not match path {}", config.peer_id, peer_id),
        ));
    }
    state.router.add_peer(config.clone());
    Ok(Json(config))
}

async fn handle_delete_peer(
    State(state): State<Arc<NodeState>>,
    Path(peer_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.router.remove_peer(&peer_id) {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(settlement_error(SettlementError::UnknownPeer(peer_id))),
    }
}

async fn handle_rail_switch(
    State(state): State<Arc<NodeState>>,
    Path(chain): Path<String>,
    Json(req): Json<RailSwitchRequest>,
) -> Result<Json<RailStatus>, ApiError> {
    let chain = parse_chain(&chain)?;
    state.router.set_rail_enabled(chain, req.enabled);
    let adapter = state.router.adapter(chain).ok();
    Ok(Json(RailStatus {
        chain,
        enabled: req.enabled,
        owner_address: adapter.as_ref().map(|a| a.owner_address()),
        channel_count: adapter.map(|a| a.cached_channels().len()).unwrap_or(0),
    }))
}

async fn handle_list_channels(State(state): State<Arc<NodeState>>) -> Json<ChannelsResponse> {
    let channels: Vec<Channel> = state
        .router
        .adapters()
        .iter()
        .flat_map(|a| a.cached_channels())
        .collect();
    let count = channels.len();
    Json(ChannelsResponse { channels, count })
}

async fn handle_get_channel(
    State(state): State<Arc<NodeState>>,
    Path((chain, channel_id)): Path<(String, String)>,
) -> Result<Json<Channel>, ApiError> {
    let chain = parse_chain(&chain)?;
    let adapter = state.router.adapter(chain).map_err(settlement_error)?;
    adapter
        .get_channel_state(&channel_id)
        .await
        .map_err(settlement_error)?
        .map(Json)
        .ok_or_else(|| settlement_error(SettlementError::ChannelNotFound(channel_id)))
}

/// Open a channel to a configured peer outside of any settlement.
async fn handle_open_channel(
    State(state): State<Arc<NodeState>>,
    Path(chain): Path<String>,
    Json(req): Json<OpenChannelBody>,
) -> Result<(StatusCode, Json<Channel>), ApiError> {
    let chain = parse_chain(&chain)?;
    let channel = state
        .router
        .open_channel_for_peer(&req.peer_id, chain, req.amount, req.settle_delay_secs)
        .await
        .map_err(settlement_error)?;
    Ok((StatusCode::CREATED, Json(channel)))
}

async fn handle_deposit(
    State(state): State<Arc<NodeState>>,
    Path((chain, channel_id)): Path<(String, String)>,
    Json(req): Json<DepositBody>,
) -> Result<Json<Channel>, ApiError> {
    let chain = parse_chain(&chain)?;
    let adapter = state.router.adapter(chain).map_err(settlement_error)?;
    adapter.deposit(&channel_id, req.amount).await.map_err(settlement_error)?;
    adapter
        .get_channel_state(&channel_id)
        .await
        .map_err(settlement_error)?
        .map(Json)
        .ok_or_else(|| settlement_error(SettlementError::ChannelNotFound(channel_id)))
}

async fn owner_balance(state: &NodeState, chain: ChainKind) -> Result<BalanceResponse, ApiError> {
    let adapter = state.router.adapter(chain).map_err(settlement_error)?;
    let balance = adapter.balance(None).await.map_err(settlement_error)?;
    Ok(BalanceResponse {
        chain,
        address: adapter.owner_address(),
        balance,
    })
}

async fn handle_balances(State(state): State<Arc<NodeState>>) -> Result<Json<Vec<BalanceResponse>>, ApiError> {
    let mut balances = Vec::new();
    for chain in ChainKind::ALL {
        if state.router.adapter(chain).is_ok() {
            balances.push(owner_balance(&state, chain).await?);
        }
    }
    Ok(Json(balances))
}

async fn handle_chain_balance(
    State(state): State<Arc<NodeState>>,
    Path(chain): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let chain = parse_chain(&chain)?;
    owner_balance(&state, chain).await.map(Json)
}

async fn channel_action(
    state: &NodeState,
    chain: &str,
    channel_id: String,
    action: &'static str,
) -> Result<Json<ChannelActionResponse>, ApiError> {
    let chain = parse_chain(chain)?;
    let adapter = state.router.adapter(chain).map_err(settlement_error)?;
    let result = match action {
        "close" => adapter.request_close(&channel_id).await,
        _ => adapter.finalize_close(&channel_id).await,
    };
    result.map_err(settlement_error)?;

    let channel = adapter
        .get_channel_state(&channel_id)
        .await
        .map_err(settlement_error)?;
    Ok(Json(ChannelActionResponse {
        chain,
        channel_id,
        action,
        channel,
    }))
}

async fn handle_close_channel(
    State(state): State<Arc<NodeState>>,
    Path((chain, channel_id)): Path<(String, String)>,
) -> Result<Json<ChannelActionResponse>, ApiError> {
    channel_action(&state, &chain, channel_id, "close").await
}

async fn handle_finalize_channel(
    State(state): State<Arc<NodeState>>,
    Path((chain, channel_id)): Path<(String, String)>,
) -> Result<Json<ChannelActionResponse>, ApiError> {
    channel_action(&state, &chain, channel_id, "finalize").await
}

async fn handle_received_claims(
    State(state): State<Arc<NodeState>>,
    Path((peer_id, chain, channel_id)): Path<(String, String, String)>,
) -> Result<Json<Vec<ReceivedClaimRecord>>, ApiError> {
    let chain = parse_chain(&chain)?;
    state
        .receiver
        .received_claims(&peer_id, chain, &channel_id)
        .map(Json)
        .map_err(|e| settlement_error(e.into()))
}

async fn handle_latest_claim(
    State(state): State<Arc<NodeState>>,
    Path((peer_id, chain, channel_id)): Path<(String, String, String)>,
) -> Result<Json<Claim>, ApiError> {
    let chain = parse_chain(&chain)?;
    state
        .receiver
        .get_latest_verified_claim(&peer_id, chain, &channel_id)
        .map(Json)
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                "claim_not_found",
                format!("no verified claim from {} on {} channel {}", peer_id, chain, channel_id),
            )
        })
}

/// Redeem the latest verified claim from a peer on-chain.
async fn handle_submit_latest_claim(
    State(state): State<Arc<NodeState>>,
    Path((peer_id, chain, channel_id)): Path<(String, String, String)>,
) -> Result<Json<Claim>, ApiError> {
    let Json(claim) = handle_latest_claim(State(state.clone()), Path((peer_id, chain, channel_id))).await?;
    let adapter = state.router.adapter(claim.chain()).map_err(settlement_error)?;
    adapter.submit_claim(&claim).await.map_err(settlement_error)?;
    Ok(Json(claim))
}

async fn handle_protocol_data(
    State(state): State<Arc<NodeState>>,
    Path(peer_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ReceiveOutcome>, ApiError> {
    let protocol = headers
        .get(PROTOCOL_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "invalid_input", "missing protocol name header"))?;
    let content_type = headers
        .get(CONTENT_TYPE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u8>().ok())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "invalid_input", "missing or invalid content type header"))?;

    state
        .receiver
        .handle_protocol_data(&peer_id, protocol, content_type, &body)
        .map(Json)
        .ok_or_else(|| {
            api_error(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "unsupported_protocol",
                format!("no handler for protocol {} content type {}", protocol, content_type),
            )
        })
}

// --- Server ---

pub fn build_router(state: Arc<NodeState>) -> Router {
    Router::new()
        .route("/api/v1/status", get(handle_status))
        .route("/api/v1/settlements", post(handle_settle))
        .route("/api/v1/peers", get(handle_list_peers))
        .route(
            "/api/v1/peers/{peer_id}",
            get(handle_get_peer).put(handle_put_peer).delete(handle_delete_peer),
        )
        .route("/api/v1/peers/{peer_id}/protocol-data", post(handle_protocol_data))
        .route("/api/v1/rails/{chain}", put(handle_rail_switch))
        .route("/api/v1/channels", get(handle_list_channels))
        .route("/api/v1/channels/{chain}", post(handle_open_channel))
        .route("/api/v1/channels/{chain}/{channel_id}/deposit", post(handle_deposit))
        .route("/api/v1/balances", get(handle_balances))
        .route("/api/v1/balances/{chain}", get(handle_chain_balance))
        .route("/api/v1/channels/{chain}/{channel_id}", get(handle_get_channel))
        .route("/api/v1/channels/{chain}/{channel_id}/close", post(handle_close_channel))
        .route("/api/v1/channels/{chain}/{channel_id}/finalize", post(handle_finalize_channel))
        .route("/api/v1/claims/{peer_id}/{chain}/{channel_id}", get(handle_received_claims))
        .route("/api/v1/claims/{peer_id}/{chain}/{channel_id}/latest", get(handle_latest_claim))
        .route("/api/v1/claims/{peer_id}/{chain}/{channel_id}/submit", post(handle_submit_latest_claim))
        .with_state(state)
}

pub async fn start_api_server(listen_addr: SocketAddr, state: Arc<NodeState>) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(%listen_addr, "HTTP API server started");
    axum::serve(listener, app).await?;
    Ok(())
}
