//! HTTP API for the SIBYL node
//!
//! Mutating routes take a body signed by its sender (see [`SignedBody`]).
//! Hashes, addresses and byte strings are hex encoded, amounts are decimal
//! strings.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sibyl_consensus::BlockSubmission;
use sibyl_core::{
    Address, Amount, BlockHeight, Hash, RecoverableSignature, SibylError, SibylResult, Timestamp,
    TxContext,
};
use sibyl_crypto::hashing::hash_multiple;
use sibyl_crypto::keys::KeyPair;
use sibyl_crypto::signing::{recover_signer, sign_hash};
use sibyl_state::ledger::Block;
use sibyl_state::registry::{Request, RequestKind, RequestStatus, RequestTerms, ResponseType, ResponseValue};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::runtime::{DeliveryOrder, NodeRuntime};

/// API state containing node runtime
pub type ApiState = Arc<NodeRuntime>;

/// API response wrapper
#[derive(Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl ToString) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

fn ok<T: Serialize>(status: StatusCode, data: T) -> ApiResult<T> {
    (status, Json(ApiResponse::ok(data)))
}

fn fail<T: Serialize>(status: StatusCode, error: impl ToString) -> ApiResult<T> {
    (status, Json(ApiResponse::err(error)))
}

/// Rejections are the caller's fault except for storage and internal errors
fn error_status(e: &SibylError) -> StatusCode {
    match e {
        SibylError::StorageError(_) | SibylError::Internal(_) | SibylError::Other(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        SibylError::RequestNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_REQUEST,
    }
}

/// Body of a mutating route, authenticated by its sender's signature
///
/// `signature` is the hex `r ‖ s ‖ v` of a personal-sign signature over
/// [`SignedBody::signing_hash`]: keccak of the route tag and the JSON body
/// with `signature` left empty. The recovered address must equal `sender`.
/// Replays are stopped by the routes themselves: request ids register once,
/// blocks must extend the current head and withdrawals sign the next
/// withdrawal nonce.
pub trait SignedBody: Serialize + Clone {
    const DOMAIN: &'static str;

    fn sender(&self) -> &str;
    fn signature(&self) -> &str;
    fn set_sender(&mut self, sender: Address);
    fn set_signature(&mut self, signature: String);

    fn signing_hash(&self) -> SibylResult<Hash> {
        let mut unsigned = self.clone();
        unsigned.set_signature(String::new());
        let json = serde_json::to_vec(&unsigned)?;
        Ok(hash_multiple(&[Self::DOMAIN.as_bytes(), &json]))
    }

    /// Make `keypair` the sender and sign the body
    fn signed(mut self, keypair: &KeyPair) -> SibylResult<Self> {
        self.set_sender(keypair.address());
        let signature = sign_hash(keypair, &self.signing_hash()?)?;
        self.set_signature(signature.to_hex());
        Ok(self)
    }

    /// Sender proven by the signature
    fn authenticate(&self) -> Result<Address, String> {
        let sender = parse_address(self.sender(), "sender")?;
        let signature = RecoverableSignature::from_hex(self.signature())
            .map_err(|_| "Missing or malformed signature".to_string())?;
        let digest = self.signing_hash().map_err(|e| e.to_string())?;
        match recover_signer(&digest, &signature) {
            Ok(recovered) if recovered == sender => Ok(sender),
            _ => Err(format!("Signature does not match sender {}", sender)),
        }
    }
}

macro_rules! signed_body {
    ($body:ty, $domain:literal) => {
        impl SignedBody for $body {
            const DOMAIN: &'static str = $domain;

            fn sender(&self) -> &str {
                &self.sender
            }

            fn signature(&self) -> &str {
                &self.signature
            }

            fn set_sender(&mut self, sender: Address) {
                self.sender = sender.to_hex();
            }

            fn set_signature(&mut self, signature: String) {
                self.signature = signature;
            }
        }
    };
}

signed_body!(SubmitRequestBody, "sibyl/request");
signed_body!(SubmitBlockBody, "sibyl/block");
signed_body!(WithdrawBody, "sibyl/withdraw");

/// Node status response
#[derive(Serialize, Deserialize)]
pub struct NodeStatusResponse {
    pub address: String,
    pub genesis_hash: String,
    pub height: u64,
    pub latest_block: String,
    pub diviners: usize,
    pub active_stake: String,
    pub pending_requests: usize,
    /// Nonce the next signed withdrawal must carry
    pub withdrawal_nonce: u64,
    pub state_digest: String,
}

#[derive(Serialize, Deserialize)]
pub struct BlockResponse {
    pub hash: String,
    pub previous: String,
    pub height: u64,
    pub request_ids: Vec<String>,
    pub response_data_hash: String,
    pub packed_responses: String,
    pub creator: String,
    pub signers: Vec<String>,
    pub created_at: u64,
}

impl BlockResponse {
    fn new(hash: Hash, block: &Block) -> Self {
        Self {
            hash: hash.to_hex(),
            previous: block.previous.to_hex(),
            height: block.height.0,
            request_ids: block.request_ids.iter().map(|id| id.to_hex()).collect(),
            response_data_hash: block.response_data_hash.to_hex(),
            packed_responses: hex::encode(&block.packed_responses),
            creator: block.creator.to_hex(),
            signers: block.signers.iter().map(|s| s.to_hex()).collect(),
            created_at: block.created_at.as_millis(),
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct RequestResponse {
    pub id: String,
    pub requester: String,
    pub kind: String,
    pub token_bounty: String,
    pub native_bounty: String,
    pub answered: bool,
    pub response: Option<String>,
    pub answered_at: Option<u64>,
    pub answered_in: Option<String>,
}

impl From<&Request> for RequestResponse {
    fn from(request: &Request) -> Self {
        let kind = match request.terms.kind {
            RequestKind::Answer { response_type: ResponseType::Bool } => "bool".to_string(),
            RequestKind::Answer { response_type: ResponseType::Uint } => "uint".to_string(),
            RequestKind::Withdrawal { beneficiary } => format!("withdrawal:{}", beneficiary.to_hex()),
        };
        Self {
            id: request.id.to_hex(),
            requester: request.terms.requester.to_hex(),
            kind,
            token_bounty: request.terms.token_bounty.0.to_string(),
            native_bounty: request.terms.native_bounty.0.to_string(),
            answered: request.status == RequestStatus::Answered,
            response: request.response.map(|r| match r {
                ResponseValue::Bool(b) => b.to_string(),
                ResponseValue::Uint(v) => v.to_string(),
            }),
            answered_at: request.answered_at.map(|h| h.0),
            answered_in: request.answered_in.map(|h| h.to_hex()),
        }
    }
}

/// Request submission
///
/// With a `beneficiary` the request is routed through the pay-on-delivery
/// book and `value` carries the native payment plus mining bounty.
#[derive(Clone, Serialize, Deserialize)]
pub struct SubmitRequestBody {
    pub sender: String,
    pub request_id: String,
    #[serde(default = "default_response_type")]
    pub response_type: ResponseType,
    pub token_bounty: String,
    #[serde(default)]
    pub native_bounty: Option<String>,
    #[serde(default)]
    pub min_deposit: Option<String>,
    #[serde(default)]
    pub beneficiary: Option<String>,
    #[serde(default)]
    pub token_payment: Option<String>,
    #[serde(default)]
    pub native_on_delivery: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub signature: String,
}

fn default_response_type() -> ResponseType {
    ResponseType::Bool
}

#[derive(Serialize, Deserialize)]
pub struct SubmitRequestResponse {
    pub request_id: String,
    pub delivery_index: Option<usize>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SubmitBlockBody {
    pub sender: String,
    pub previous: String,
    pub height: u64,
    pub request_ids: Vec<String>,
    pub response_data_hash: String,
    pub packed_responses: String,
    pub signers: Vec<String>,
    pub r: Vec<String>,
    pub s: Vec<String>,
    pub v: Vec<u8>,
    #[serde(default)]
    pub signature: String,
}

impl SubmitBlockBody {
    /// Hex body for a committee-signed submission; sign it with
    /// [`SignedBody::signed`] before posting
    pub fn from_submission(sender: &Address, submission: &BlockSubmission) -> Self {
        Self {
            sender: sender.to_hex(),
            previous: submission.previous.to_hex(),
            height: submission.height.0,
            request_ids: submission.request_ids.iter().map(|id| id.to_hex()).collect(),
            response_data_hash: submission.response_data_hash.to_hex(),
            packed_responses: hex::encode(&submission.packed_responses),
            signers: submission.signers.iter().map(|s| s.to_hex()).collect(),
            r: submission.r.iter().map(hex::encode).collect(),
            s: submission.s.iter().map(hex::encode).collect(),
            v: submission.v.clone(),
            signature: String::new(),
        }
    }

    pub fn to_submission(&self) -> Result<BlockSubmission, String> {
        let mut submission = BlockSubmission::new(
            parse_hash(&self.previous, "previous")?,
            BlockHeight(self.height),
            self.request_ids
                .iter()
                .map(|id| parse_hash(id, "request id"))
                .collect::<Result<_, _>>()?,
            parse_hash(&self.response_data_hash, "response data hash")?,
            hex::decode(self.packed_responses.trim_start_matches("0x"))
                .map_err(|_| "Invalid packed responses")?,
        );
        submission.signers = self
            .signers
            .iter()
            .map(|s| parse_address(s, "signer"))
            .collect::<Result<_, _>>()?;
        submission.r = self
            .r
            .iter()
            .map(|r| parse_hash(r, "r").map(|h| h.0))
            .collect::<Result<_, _>>()?;
        submission.s = self
            .s
            .iter()
            .map(|s| parse_hash(s, "s").map(|h| h.0))
            .collect::<Result<_, _>>()?;
        submission.v = self.v.clone();
        Ok(submission)
    }
}

#[derive(Serialize, Deserialize)]
pub struct SubmitBlockResponse {
    pub block_hash: String,
    pub height: u64,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct WithdrawBody {
    pub sender: String,
    pub token_bounty: String,
    #[serde(default)]
    pub mining_fee: Option<String>,
    /// Must equal the node's current withdrawal nonce
    pub nonce: u64,
    #[serde(default)]
    pub signature: String,
}

#[derive(Serialize, Deserialize)]
pub struct WithdrawResponse {
    pub request_id: String,
}

#[derive(Serialize, Deserialize)]
pub struct SupportingDataResponse {
    pub request_id: String,
    pub supporting_data: String,
}

/// Create API router
pub fn create_router(state: ApiState) -> Router {
    let router = Router::new()
        // Health
        .route("/health", get(health))
        .route("/status", get(status))
        // Blocks
        .route("/block", post(submit_block))
        .route("/block/latest", get(latest_block))
        .route("/block/:hash", get(get_block))
        // Requests
        .route("/request", post(submit_request))
        .route("/request/:id", get(get_request))
        .route("/request/:id/block", get(block_for_request))
        .route("/request/:id/supporting-data", get(supporting_data))
        .route("/withdraw", post(withdraw))
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http());

    if state.config().api.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router.layer(cors)
    } else {
        router
    }
}

/// Health check
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// Node status
async fn status(State(runtime): State<ApiState>) -> impl IntoResponse {
    let digest = match runtime.state_digest() {
        Ok(digest) => digest,
        Err(e) => return fail::<NodeStatusResponse>(StatusCode::INTERNAL_SERVER_ERROR, e),
    };
    let status = NodeStatusResponse {
        address: runtime.address().to_hex(),
        genesis_hash: runtime.genesis_hash().to_hex(),
        height: runtime.chain_height(),
        latest_block: runtime.latest_block().0.to_hex(),
        diviners: runtime.committee_size(),
        active_stake: runtime.total_active_stake().0.to_string(),
        pending_requests: runtime.pending_requests(),
        withdrawal_nonce: runtime.withdrawal_nonce(),
        state_digest: digest.to_hex(),
    };
    ok(StatusCode::OK, status)
}

async fn latest_block(State(runtime): State<ApiState>) -> impl IntoResponse {
    match runtime.latest_block() {
        (hash, Some(block)) => ok(StatusCode::OK, BlockResponse::new(hash, &block)),
        (_, None) => fail(StatusCode::NOT_FOUND, "No blocks yet"),
    }
}

async fn get_block(
    State(runtime): State<ApiState>,
    Path(hash): Path<String>,
) -> impl IntoResponse {
    let hash = match parse_hash(&hash, "block hash") {
        Ok(hash) => hash,
        Err(e) => return fail::<BlockResponse>(StatusCode::BAD_REQUEST, e),
    };
    match runtime.block(&hash) {
        Ok(Some(block)) => ok(StatusCode::OK, BlockResponse::new(hash, &block)),
        Ok(None) => fail(StatusCode::NOT_FOUND, "Block not found"),
        Err(e) => fail(error_status(&e), e),
    }
}

async fn get_request(
    State(runtime): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = match parse_hash(&id, "request id") {
        Ok(id) => id,
        Err(e) => return fail::<RequestResponse>(StatusCode::BAD_REQUEST, e),
    };
    match runtime.request(&id) {
        Some(request) => ok(StatusCode::OK, RequestResponse::from(&request)),
        None => fail(StatusCode::NOT_FOUND, SibylError::RequestNotFound(id)),
    }
}

/// Answering block, or the zero sentinel block for unanswered requests
async fn block_for_request(
    State(runtime): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = match parse_hash(&id, "request id") {
        Ok(id) => id,
        Err(e) => return fail::<BlockResponse>(StatusCode::BAD_REQUEST, e),
    };
    let block = runtime.block_for_request(&id);
    let hash = if block.is_empty() {
        Hash::ZERO
    } else {
        sibyl_core::Hashable::hash(&block)
    };
    ok(StatusCode::OK, BlockResponse::new(hash, &block))
}

async fn supporting_data(
    State(runtime): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = match parse_hash(&id, "request id") {
        Ok(id) => id,
        Err(e) => return fail::<SupportingDataResponse>(StatusCode::BAD_REQUEST, e),
    };
    let data = runtime.supporting_data_for_request(&id);
    ok(
        StatusCode::OK,
        SupportingDataResponse {
            request_id: id.to_hex(),
            supporting_data: data.to_hex(),
        },
    )
}

async fn submit_request(
    State(runtime): State<ApiState>,
    Json(body): Json<SubmitRequestBody>,
) -> impl IntoResponse {
    let sender = match body.authenticate() {
        Ok(sender) => sender,
        Err(e) => return fail::<SubmitRequestResponse>(StatusCode::UNAUTHORIZED, e),
    };
    let parsed = parse_request_body(sender, &body);
    let (ctx, id, submission) = match parsed {
        Ok(parsed) => parsed,
        Err(e) => return fail::<SubmitRequestResponse>(StatusCode::BAD_REQUEST, e),
    };

    let result = match submission {
        RequestSubmission::Direct(terms) => runtime.submit_request(&ctx, id, terms).map(|_| None),
        RequestSubmission::Delivery(order) => {
            runtime.submit_delivery_request(&ctx, order).map(Some)
        }
    };
    match result {
        Ok(delivery_index) => ok(
            StatusCode::ACCEPTED,
            SubmitRequestResponse {
                request_id: id.to_hex(),
                delivery_index,
            },
        ),
        Err(e) => fail(error_status(&e), e),
    }
}

async fn submit_block(
    State(runtime): State<ApiState>,
    Json(body): Json<SubmitBlockBody>,
) -> impl IntoResponse {
    let sender = match body.authenticate() {
        Ok(sender) => sender,
        Err(e) => return fail::<SubmitBlockResponse>(StatusCode::UNAUTHORIZED, e),
    };
    let submission = match body.to_submission() {
        Ok(submission) => submission,
        Err(e) => return fail::<SubmitBlockResponse>(StatusCode::BAD_REQUEST, e),
    };

    match runtime.submit_block(&TxContext::new(sender), &submission) {
        Ok(hash) => {
            info!("Block {} accepted via API", hash);
            ok(
                StatusCode::OK,
                SubmitBlockResponse {
                    block_hash: hash.to_hex(),
                    height: submission.height.0,
                },
            )
        }
        Err(e) => fail(error_status(&e), e),
    }
}

async fn withdraw(
    State(runtime): State<ApiState>,
    Json(body): Json<WithdrawBody>,
) -> impl IntoResponse {
    let sender = match body.authenticate() {
        Ok(sender) => sender,
        Err(e) => return fail::<WithdrawResponse>(StatusCode::UNAUTHORIZED, e),
    };
    let parsed = parse_amount(&body.token_bounty, "token bounty").and_then(|token_bounty| {
        let mining_fee = parse_optional_amount(&body.mining_fee, "mining fee")?;
        Ok((token_bounty, mining_fee))
    });
    let (token_bounty, mining_fee) = match parsed {
        Ok(parsed) => parsed,
        Err(e) => return fail::<WithdrawResponse>(StatusCode::BAD_REQUEST, e),
    };

    match runtime.withdraw(&TxContext::new(sender), body.nonce, token_bounty, mining_fee) {
        Ok(id) => ok(
            StatusCode::ACCEPTED,
            WithdrawResponse {
                request_id: id.to_hex(),
            },
        ),
        Err(e) => fail(error_status(&e), e),
    }
}

enum RequestSubmission {
    Direct(RequestTerms),
    Delivery(DeliveryOrder),
}

fn parse_request_body(
    sender: Address,
    body: &SubmitRequestBody,
) -> Result<(TxContext, Hash, RequestSubmission), String> {
    let id = parse_hash(&body.request_id, "request id")?;
    let token_bounty = parse_amount(&body.token_bounty, "token bounty")?;
    let ctx = TxContext::at(sender, Timestamp::now());

    let submission = match &body.beneficiary {
        Some(beneficiary) => RequestSubmission::Delivery(DeliveryOrder {
            request_id: id,
            response_type: body.response_type,
            token_payment: parse_optional_amount(&body.token_payment, "token payment")?,
            token_bounty,
            native_on_delivery: parse_optional_amount(&body.native_on_delivery, "native on delivery")?,
            beneficiary: parse_address(beneficiary, "beneficiary")?,
            value: parse_optional_amount(&body.value, "value")?,
        }),
        None => {
            let native_bounty = parse_optional_amount(&body.native_bounty, "native bounty")?;
            let min_deposit = parse_optional_amount(&body.min_deposit, "min deposit")?;
            RequestSubmission::Direct(
                RequestTerms::answer(sender, token_bounty, native_bounty)
                    .with_response_type(body.response_type)
                    .with_min_deposit(min_deposit),
            )
        }
    };
    Ok((ctx, id, submission))
}

fn parse_hash(s: &str, what: &str) -> Result<Hash, String> {
    Hash::from_hex(s).map_err(|_| format!("Invalid {}", what))
}

fn parse_address(s: &str, what: &str) -> Result<Address, String> {
    Address::from_hex(s).map_err(|_| format!("Invalid {}", what))
}

fn parse_amount(s: &str, what: &str) -> Result<Amount, String> {
    s.parse::<u128>()
        .map(Amount::new)
        .map_err(|_| format!("Invalid {}", what))
}

fn parse_optional_amount(s: &Option<String>, what: &str) -> Result<Amount, String> {
    match s {
        Some(s) => parse_amount(s, what),
        None => Ok(Amount::ZERO),
    }
}

/// Start API server
pub async fn start_api_server(runtime: Arc<NodeRuntime>, listen_addr: &str) -> anyhow::Result<()> {
    let router = create_router(runtime);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!("API server listening on {}", listen_addr);

    axum::serve(listener, router).await?;

    Ok(())
}
