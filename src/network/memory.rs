//! In-process custodial service
//!
//! Serves every route of the multisig API from memory. It authenticates
//! request tokens, rejects replayed PIN payloads and signs each response
//! with its own Ed25519 key, so a [`crate::client::Client`] can run its full
//! flow without a remote endpoint.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use ed25519_dalek::VerifyingKey;
use log::{debug, info};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use subtle::ConstantTimeEq;

use super::{codes, ApiError, ApiRequest, ApiResponse, Method, NetworkError, Transport};
use crate::auth::{
    decode_token, AuthError, Credential, Keystore, OauthKeystore, TokenKey, TokenVerifier,
};
use crate::crypto::{members_hash, sha256_array, Ed25519Key};
use crate::ledger::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
use crate::multisig::{
    normalize_amount, payload_hash, MemberSet, MultisigAction, MultisigError, MultisigRequest,
    MultisigState, MultisigUtxo, RawTransaction, TransactionHash, UtxoState,
};
use crate::pin::{decode_pin_token, open_pin, PIN_KEY_SIZE};


#[derive(Default)]
struct Account {
    verifier: Option<TokenVerifier>,
    pin_key: Option<[u8; PIN_KEY_SIZE]>,
    pin: Option<String>,
    last_iteration: Option<u64>,
}

struct Authorization {
    user_id: String,
    verifier: TokenVerifier,
}

#[derive(Deserialize)]
struct PinBody {
    pin: String,
}

#[derive(Deserialize)]
struct PinUpdateBody {
    #[serde(default)]
    old_pin: Option<String>,
    pin: String,
}

#[derive(Deserialize)]
struct CreateBody {
    action: MultisigAction,
    raw: String,
}

#[derive(Deserialize)]
struct RawBody {
    raw: String,
}

#[derive(Default)]
struct ServiceState {
    accounts: HashMap<String, Account>,
    access_tokens: HashMap<String, String>,
    authorizations: HashMap<String, Authorization>,
    /// Nonces of accepted tokens, with their expiry
    seen_nonces: HashMap<String, i64>,
    outputs: Vec<MultisigUtxo>,
    requests: HashMap<String, MultisigRequest>,
    /// Signers collected per raw transaction hash
    signatures: HashMap<String, Vec<String>>,
    clock: Option<DateTime<Utc>>,
    failures_pending: u32,
    broadcasts: usize,
}

/// A custodial service living in the current process
pub struct MemoryNetwork {
    state: Mutex<ServiceState>,
    server_key: Ed25519Key,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ServiceState::default()),
            server_key: Ed25519Key::generate(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServiceState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Key the service signs responses with
    pub fn server_public_key(&self) -> VerifyingKey {
        self.server_key.verifying_key()
    }

    /// Register the identity behind a keystore
    pub fn register_keystore(&self, keystore: &Keystore) -> Result<(), AuthError> {
        let credential = Credential::from_keystore(keystore)?;
        let pin_key = if keystore.pin_token.is_empty() {
            None
        } else {
            Some(
                decode_pin_token(&keystore.pin_token)
                    .map_err(|e| AuthError::InvalidKeyFormat(format!("pin token: {}", e)))?,
            )
        };

        let mut state = self.lock();
        let account = state
            .accounts
            .entry(keystore.client_id.clone())
            .or_default();
        account.verifier = credential.token_verifier();
        account.pin_key = pin_key;

        info!(
            "Registered {} identity {}",
            credential.scheme(),
            keystore.client_id
        );
        Ok(())
    }

    /// Issue an opaque bearer token acting for `user_id`
    pub fn issue_access_token(&self, user_id: &str) -> String {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let mut state = self.lock();
        state.accounts.entry(user_id.to_string()).or_default();
        state
            .access_tokens
            .insert(token.clone(), user_id.to_string());
        token
    }

    /// Authorize a new OAuth application to act for `user_id`
    pub fn authorize_oauth(&self, user_id: &str, scope: &str) -> OauthKeystore {
        let key = Ed25519Key::generate();
        let keystore = OauthKeystore {
            client_id: uuid::Uuid::new_v4().to_string(),
            authorization_id: uuid::Uuid::new_v4().to_string(),
            scope: scope.to_string(),
            private_key: key.to_compact(),
            server_public_key: self.server_key.public_key_compact(),
        };

        let mut state = self.lock();
        state.accounts.entry(user_id.to_string()).or_default();
        state.authorizations.insert(
            keystore.authorization_id.clone(),
            Authorization {
                user_id: user_id.to_string(),
                verifier: TokenVerifier::new(TokenKey::Ed25519(key.verifying_key())),
            },
        );
        keystore
    }

    /// Credit a new unspent output to a member set
    pub fn deposit(&self, members: &MemberSet, amount: Decimal) -> MultisigUtxo {
        let mut state = self.lock();
        let updated_at = state.tick();
        let seed = uuid::Uuid::new_v4();
        let utxo = MultisigUtxo {
            utxo_id: uuid::Uuid::new_v4().to_string(),
            transaction_hash: TransactionHash(sha256_array(seed.as_bytes())),
            output_index: 0,
            amount: normalize_amount(amount),
            members: members.members().to_vec(),
            threshold: members.threshold(),
            state: UtxoState::Unspent,
            signed_by: String::new(),
            signed_tx: String::new(),
            updated_at,
        };
        state.outputs.push(utxo.clone());
        info!(
            "Deposited {} to {} output {}",
            utxo.amount,
            members.description(),
            utxo.utxo_id
        );
        utxo
    }

    /// Snapshot of every output
    pub fn outputs(&self) -> Vec<MultisigUtxo> {
        self.lock().outputs.clone()
    }

    pub fn request(&self, request_id: &str) -> Option<MultisigRequest> {
        self.lock().requests.get(request_id).cloned()
    }

    /// Number of accepted broadcasts
    pub fn broadcast_count(&self) -> usize {
        self.lock().broadcasts
    }

    /// Fail the next `count` calls with a transient error
    pub fn fail_next(&self, count: u32) {
        self.lock().failures_pending = count;
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryNetwork {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, NetworkError> {
        let outcome = {
            let mut state = self.lock();
            if state.failures_pending > 0 {
                state.failures_pending -= 1;
                return Err(NetworkError::Transient("connection reset".to_string()));
            }
            state.handle(&request)
        };

        let (status, envelope) = match outcome {
            Ok(data) => (200, json!({ "data": data })),
            Err(error) => {
                debug!("{} {} failed: {}", request.method, request.path(), error);
                (error.status, json!({ "error": error }))
            }
        };
        let body =
            serde_json::to_vec(&envelope).map_err(|e| NetworkError::Unavailable(e.to_string()))?;

        let mut response = ApiResponse {
            status,
            request_id: request.request_id,
            body,
            signature: None,
        };
        let signature = self.server_key.sign(&response.canonical_bytes());
        response.signature = Some(URL_SAFE_NO_PAD.encode(signature));
        Ok(response)
    }
}

fn bad_request(description: impl Into<String>) -> ApiError {
    ApiError::new(400, codes::BAD_REQUEST, description)
}

fn unauthorized(description: impl Into<String>) -> ApiError {
    ApiError::new(401, codes::UNAUTHORIZED, description)
}

fn forbidden(description: impl Into<String>) -> ApiError {
    ApiError::new(403, codes::FORBIDDEN, description)
}

fn not_found(description: impl Into<String>) -> ApiError {
    ApiError::new(404, codes::NOT_FOUND, description)
}

fn invalid_state(description: impl Into<String>) -> ApiError {
    ApiError::new(400, codes::INVALID_STATE, description)
}

fn pin_incorrect() -> ApiError {
    ApiError::new(400, codes::PIN_INCORRECT, "PIN incorrect")
}

fn multisig_error(error: MultisigError) -> ApiError {
    match error {
        MultisigError::NotMember(_) => forbidden(error.to_string()),
        MultisigError::InvalidTransition { .. } | MultisigError::WrongAction(_) => {
            invalid_state(error.to_string())
        }
        other => bad_request(other.to_string()),
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn parse_body<T: DeserializeOwned>(request: &ApiRequest) -> Result<T, ApiError> {
    serde_json::from_slice(&request.body).map_err(|e| bad_request(format!("malformed body: {}", e)))
}

fn data<T: Serialize>(value: &T) -> Result<Value, ApiError> {
    serde_json::to_value(value).map_err(|e| ApiError::new(500, codes::INTERNAL, e.to_string()))
}

impl ServiceState {
    fn handle(&mut self, request: &ApiRequest) -> Result<Value, ApiError> {
        let user_id = self.authenticate(request)?;
        let path: Vec<&str> = request.path().trim_matches('/').split('/').collect();

        match (request.method, path.as_slice()) {
            (Method::Post, ["pin", "verify"]) => {
                let body: PinBody = parse_body(request)?;
                self.check_pin(&user_id, &body.pin)?;
                Ok(json!({}))
            }
            (Method::Post, ["pin", "update"]) => {
                let body: PinUpdateBody = parse_body(request)?;
                self.update_pin(&user_id, body)?;
                Ok(json!({}))
            }
            (Method::Post, ["multisigs", "requests"]) => {
                let body: CreateBody = parse_body(request)?;
                data(&self.create_request(&user_id, body.action, &body.raw)?)
            }
            (Method::Get, ["multisigs", "requests", id]) => {
                self.sync_request(id);
                let snapshot = self
                    .requests
                    .get(*id)
                    .ok_or_else(|| not_found("multisig request not found"))?;
                data(snapshot)
            }
            (Method::Post, ["multisigs", "requests", id, "sign"]) => {
                let body: PinBody = parse_body(request)?;
                data(&self.sign_request(&user_id, id, &body.pin)?)
            }
            (Method::Post, ["multisigs", "requests", id, "cancel"]) => {
                self.cancel_request(&user_id, id)?;
                Ok(json!({}))
            }
            (Method::Post, ["multisigs", "requests", id, "unlock"]) => {
                let body: PinBody = parse_body(request)?;
                data(&self.unlock_request(&user_id, id, &body.pin)?)
            }
            (Method::Get, ["multisigs", "outputs"]) => data(&self.read_outputs(&user_id, request)?),
            (Method::Post, ["transactions"]) => {
                let body: RawBody = parse_body(request)?;
                let hash = self.broadcast(&body.raw)?;
                Ok(json!({ "hash": hash }))
            }
            _ => Err(not_found(format!(
                "no route for {} {}",
                request.method,
                request.path()
            ))),
        }
    }

    /// Monotonic clock: every call returns a strictly later instant
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.clock {
            Some(last) if now <= last => last + ChronoDuration::microseconds(1),
            _ => now,
        };
        self.clock = Some(next);
        next
    }

    fn authenticate(&mut self, request: &ApiRequest) -> Result<String, ApiError> {
        let token = request
            .authorization
            .strip_prefix("Bearer ")
            .ok_or_else(|| unauthorized("missing bearer token"))?;

        if let Some(user_id) = self.access_tokens.get(token) {
            return Ok(user_id.clone());
        }

        let decoded = decode_token(token).map_err(|e| unauthorized(e.to_string()))?;
        let (user_id, verifier) = match &decoded.claims.aid {
            Some(aid) => {
                let authorization = self
                    .authorizations
                    .get(aid)
                    .ok_or_else(|| unauthorized("unknown authorization"))?;
                (
                    authorization.user_id.clone(),
                    authorization.verifier.clone(),
                )
            }
            None => {
                let verifier = self
                    .accounts
                    .get(&decoded.claims.uid)
                    .and_then(|account| account.verifier.clone())
                    .ok_or_else(|| unauthorized("unknown identity"))?;
                (decoded.claims.uid.clone(), verifier)
            }
        };

        let claims = verifier
            .verify_token(&request.canonical_bytes(), token)
            .map_err(|e| unauthorized(e.to_string()))?;
        // Expired tokens fail verification, so their nonces can go
        let now = Utc::now().timestamp();
        self.seen_nonces.retain(|_, exp| *exp >= now);
        if self.seen_nonces.contains_key(&claims.jti) {
            return Err(unauthorized("token nonce already used"));
        }
        self.seen_nonces.insert(claims.jti, claims.exp);

        Ok(user_id)
    }

    /// Decrypt a PIN payload, enforcing a strictly increasing iteration
    fn open_pin_payload(&mut self, user_id: &str, payload: &str) -> Result<String, ApiError> {
        let account = self
            .accounts
            .get_mut(user_id)
            .ok_or_else(|| unauthorized("unknown identity"))?;
        let key = account
            .pin_key
            .ok_or_else(|| bad_request("identity has no PIN session key"))?;
        let opened = open_pin(&key, payload).map_err(|_| pin_incorrect())?;

        if account
            .last_iteration
            .map_or(false, |last| opened.iteration <= last)
        {
            return Err(ApiError::new(403, codes::PIN_REPLAYED, "PIN iteration reused"));
        }
        account.last_iteration = Some(opened.iteration);
        Ok(opened.pin)
    }

    fn check_pin(&mut self, user_id: &str, payload: &str) -> Result<(), ApiError> {
        let pin = self.open_pin_payload(user_id, payload)?;
        let account = self
            .accounts
            .get(user_id)
            .ok_or_else(|| unauthorized("unknown identity"))?;
        match &account.pin {
            Some(current) if constant_time_eq(current, &pin) => Ok(()),
            Some(_) => Err(pin_incorrect()),
            None => Err(bad_request("PIN not set")),
        }
    }

    fn update_pin(&mut self, user_id: &str, body: PinUpdateBody) -> Result<(), ApiError> {
        let old = body
            .old_pin
            .as_deref()
            .map(|payload| self.open_pin_payload(user_id, payload))
            .transpose()?;
        let new = self.open_pin_payload(user_id, &body.pin)?;

        let account = self
            .accounts
            .get_mut(user_id)
            .ok_or_else(|| unauthorized("unknown identity"))?;
        match (&account.pin, old) {
            (None, _) => {}
            (Some(current), Some(old)) if constant_time_eq(current, &old) => {}
            _ => return Err(pin_incorrect()),
        }
        account.pin = Some(new);
        info!("PIN updated for {}", user_id);
        Ok(())
    }

    /// Positions of the outputs a raw transaction spends
    fn input_positions(&self, tx: &RawTransaction) -> Result<Vec<usize>, ApiError> {
        if tx.inputs.is_empty() {
            return Err(bad_request("transaction has no inputs"));
        }
        tx.inputs
            .iter()
            .map(|input| {
                self.outputs
                    .iter()
                    .position(|u| {
                        u.transaction_hash == input.hash && u.output_index == input.index
                    })
                    .ok_or_else(|| not_found(format!("unknown input {}:{}", input.hash, input.index)))
            })
            .collect()
    }

    /// Member set shared by every input of `tx`
    fn input_owners(&self, tx: &RawTransaction, raw: &str) -> Result<MemberSet, ApiError> {
        let mut owners: Option<MemberSet> = None;
        for position in self.input_positions(tx)? {
            let utxo = &self.outputs[position];
            match utxo.state {
                UtxoState::Spent => {
                    return Err(invalid_state(format!("output {} already spent", utxo.utxo_id)))
                }
                UtxoState::Signed if utxo.signed_tx != raw => {
                    return Err(invalid_state(format!(
                        "output {} is locked by another transaction",
                        utxo.utxo_id
                    )))
                }
                _ => {}
            }

            let set = utxo.member_set().map_err(multisig_error)?;
            match &owners {
                None => owners = Some(set),
                Some(current)
                    if current.threshold() == set.threshold()
                        && current.same_members(set.members()) => {}
                Some(_) => return Err(multisig_error(MultisigError::MixedInputs)),
            }
        }
        owners.ok_or_else(|| bad_request("transaction has no inputs"))
    }

    fn create_request(
        &mut self,
        user_id: &str,
        action: MultisigAction,
        raw: &str,
    ) -> Result<MultisigRequest, ApiError> {
        let tx = RawTransaction::from_payload(raw).map_err(multisig_error)?;
        let hash = payload_hash(raw).map_err(multisig_error)?;
        let owners = self.input_owners(&tx, raw)?;
        if !owners.contains(user_id) {
            return Err(forbidden(format!("{} is not a member", user_id)));
        }

        let mut request = MultisigRequest::new(
            uuid::Uuid::new_v4().to_string(),
            user_id.to_string(),
            action,
            raw.to_string(),
            hash.clone(),
            &owners,
        );
        if action == MultisigAction::Sign {
            for signer in self.signatures.get(&hash).cloned().unwrap_or_default() {
                request.add_signer(&signer).map_err(multisig_error)?;
            }
        }

        info!(
            "Created {} request {} for {} ({} signers)",
            action,
            request.request_id,
            owners.description(),
            request.signers.len()
        );
        self.requests
            .insert(request.request_id.clone(), request.clone());
        Ok(request)
    }

    /// Fold signatures collected through sibling requests into a pending one
    fn sync_request(&mut self, request_id: &str) {
        let Some(request) = self.requests.get_mut(request_id) else {
            return;
        };
        if request.state != MultisigState::Pending || request.action != MultisigAction::Sign {
            return;
        }
        if let Some(signers) = self.signatures.get(&request.transaction_hash) {
            for signer in signers {
                if request.add_signer(signer).is_err() {
                    break;
                }
            }
        }
    }

    fn sign_request(
        &mut self,
        user_id: &str,
        request_id: &str,
        pin: &str,
    ) -> Result<MultisigRequest, ApiError> {
        if !self.requests.contains_key(request_id) {
            return Err(not_found("multisig request not found"));
        }
        self.check_pin(user_id, pin)?;
        self.sync_request(request_id);

        let request = self
            .requests
            .get_mut(request_id)
            .ok_or_else(|| not_found("multisig request not found"))?;
        let was_pending = request.state == MultisigState::Pending;
        request.add_signer(user_id).map_err(multisig_error)?;
        let snapshot = request.clone();

        if was_pending {
            self.signatures
                .insert(snapshot.transaction_hash.clone(), snapshot.signers.clone());
            if snapshot.is_signed() {
                self.mark_signed(&snapshot.raw_transaction, user_id)?;
                info!(
                    "Request {} reached threshold {}",
                    snapshot.request_id, snapshot.threshold
                );
            }
        }
        Ok(snapshot)
    }

    fn mark_signed(&mut self, raw: &str, signed_by: &str) -> Result<(), ApiError> {
        let tx = RawTransaction::from_payload(raw).map_err(multisig_error)?;
        for position in self.input_positions(&tx)? {
            let now = self.tick();
            let utxo = &mut self.outputs[position];
            utxo.state = UtxoState::Signed;
            utxo.signed_by = signed_by.to_string();
            utxo.signed_tx = raw.to_string();
            utxo.updated_at = now;
        }
        Ok(())
    }

    fn cancel_request(&mut self, user_id: &str, request_id: &str) -> Result<(), ApiError> {
        let Some(request) = self.requests.get_mut(request_id) else {
            return Ok(());
        };
        if request.state != MultisigState::Pending {
            return Ok(());
        }
        if request.user_id != user_id {
            return Err(forbidden("only the creator may cancel a request"));
        }
        if request.cancel() {
            info!("Cancelled request {}", request_id);
        }
        Ok(())
    }

    fn unlock_request(
        &mut self,
        user_id: &str,
        request_id: &str,
        pin: &str,
    ) -> Result<MultisigRequest, ApiError> {
        let request = self
            .requests
            .get(request_id)
            .ok_or_else(|| not_found("multisig request not found"))?
            .clone();
        if !request.members.iter().any(|m| m == user_id) {
            return Err(forbidden(format!("{} is not a member", user_id)));
        }
        self.check_pin(user_id, pin)?;
        if request.state.is_final() {
            return Ok(request);
        }

        let tx = RawTransaction::from_payload(&request.raw_transaction).map_err(multisig_error)?;
        let positions = self.input_positions(&tx)?;
        if positions
            .iter()
            .any(|&p| self.outputs[p].state == UtxoState::Spent)
        {
            return Err(invalid_state("transaction already broadcast"));
        }

        for sibling in self
            .requests
            .values_mut()
            .filter(|r| r.transaction_hash == request.transaction_hash)
        {
            sibling.unlock().map_err(multisig_error)?;
        }
        self.signatures.remove(&request.transaction_hash);

        for position in positions {
            if self.outputs[position].state != UtxoState::Signed {
                continue;
            }
            let now = self.tick();
            let utxo = &mut self.outputs[position];
            utxo.state = UtxoState::Unspent;
            utxo.signed_by.clear();
            utxo.signed_tx.clear();
            utxo.updated_at = now;
        }

        info!("Unlocked transaction {}", request.transaction_hash);
        self.requests
            .get(request_id)
            .cloned()
            .ok_or_else(|| not_found("multisig request not found"))
    }

    fn read_outputs(
        &self,
        user_id: &str,
        request: &ApiRequest,
    ) -> Result<Vec<MultisigUtxo>, ApiError> {
        let mut members = None;
        let mut threshold = None;
        let mut offset: Option<DateTime<Utc>> = None;
        let mut limit = DEFAULT_PAGE_LIMIT;

        for (key, value) in request.query_pairs() {
            match key {
                "members" => members = Some(value.to_string()),
                "threshold" => {
                    threshold = Some(
                        value
                            .parse::<u8>()
                            .map_err(|_| bad_request("invalid threshold"))?,
                    )
                }
                "offset" if !value.is_empty() => {
                    let parsed = DateTime::parse_from_rfc3339(value)
                        .map_err(|_| bad_request("invalid offset"))?;
                    offset = Some(parsed.with_timezone(&Utc));
                }
                "limit" => {
                    limit = value
                        .parse::<usize>()
                        .map_err(|_| bad_request("invalid limit"))?
                }
                _ => {}
            }
        }

        let members = members.ok_or_else(|| bad_request("members is required"))?;
        let threshold = threshold.ok_or_else(|| bad_request("threshold is required"))?;
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);

        let mut page: Vec<MultisigUtxo> = self
            .outputs
            .iter()
            .filter(|u| u.threshold == threshold && members_hash(&u.members) == members)
            .filter(|u| u.members.iter().any(|m| m == user_id))
            .filter(|u| offset.map_or(true, |cursor| u.updated_at > cursor))
            .cloned()
            .collect();
        page.sort_by_key(|u| u.updated_at);
        page.truncate(limit);

        debug!(
            "Outputs page after {}: {} items",
            offset
                .map(|o| o.to_rfc3339_opts(SecondsFormat::Nanos, true))
                .unwrap_or_default(),
            page.len()
        );
        Ok(page)
    }

    fn broadcast(&mut self, raw: &str) -> Result<String, ApiError> {
        let tx = RawTransaction::from_payload(raw).map_err(multisig_error)?;
        let hash = payload_hash(raw).map_err(multisig_error)?;
        let positions = self.input_positions(&tx)?;

        let already_spent = positions.iter().all(|&p| {
            self.outputs[p].state == UtxoState::Spent && self.outputs[p].signed_tx == raw
        });
        if already_spent {
            return Ok(hash);
        }

        let fully_signed = positions.iter().all(|&p| {
            self.outputs[p].state == UtxoState::Signed && self.outputs[p].signed_tx == raw
        });
        if !fully_signed {
            return Err(invalid_state("transaction is not fully signed"));
        }

        for &position in &positions {
            let now = self.tick();
            let utxo = &mut self.outputs[position];
            utxo.state = UtxoState::Spent;
            utxo.updated_at = now;
        }

        let tx_hash: TransactionHash = hash.parse().map_err(multisig_error)?;
        for (index, output) in tx.outputs.iter().enumerate() {
            let updated_at = self.tick();
            self.outputs.push(MultisigUtxo {
                utxo_id: uuid::Uuid::new_v4().to_string(),
                transaction_hash: tx_hash,
                output_index: index as u32,
                amount: output.amount,
                members: output.receivers.clone(),
                threshold: output.threshold,
                state: UtxoState::Unspent,
                signed_by: String::new(),
                signed_tx: String::new(),
                updated_at,
            });
        }

        self.broadcasts += 1;
        info!("Broadcast transaction {}", hash);
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{KeyScheme, ServerVerifier, Signer, Verifier};

    fn request(credential: &Credential, method: Method, uri: &str, body: &[u8]) -> ApiRequest {
        let mut req = ApiRequest::new(method, uri, body.to_vec(), "req-1".to_string());
        let token = credential.sign(&req.canonical_bytes()).unwrap();
        req.authorization = token.bearer();
        req
    }

    fn error_of(response: &ApiResponse) -> ApiError {
        let value: Value = serde_json::from_slice(&response.body).unwrap();
        serde_json::from_value(value["error"].clone()).unwrap()
    }

    fn registered(network: &MemoryNetwork) -> Credential {
        let keystore = Keystore::generate(KeyScheme::Ed25519).unwrap();
        network.register_keystore(&keystore).unwrap();
        Credential::from_keystore(&keystore).unwrap()
    }

    #[tokio::test]
    async fn test_responses_are_signed() {
        let network = MemoryNetwork::new();
        let credential = registered(&network);

        let response = network
            .send(request(&credential, Method::Get, "/nowhere", b""))
            .await
            .unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.request_id, "req-1");

        let verifier = ServerVerifier::new(network.server_public_key());
        let signature = response.signature.clone().unwrap();
        assert!(verifier.verify(&response.canonical_bytes(), &signature).is_ok());

        let mut tampered = response.canonical_bytes();
        tampered.push(b' ');
        assert!(verifier.verify(&tampered, &signature).is_err());
    }

    #[tokio::test]
    async fn test_unknown_identity_rejected() {
        let network = MemoryNetwork::new();
        let stranger = Credential::from_keystore(&Keystore::generate(KeyScheme::Pem).unwrap()).unwrap();

        let response = network
            .send(request(&stranger, Method::Get, "/multisigs/requests/x", b""))
            .await
            .unwrap();
        assert_eq!(response.status, 401);

        let missing = ApiRequest::new(Method::Get, "/multisigs/requests/x", vec![], "r".to_string());
        let response = network.send(missing).await.unwrap();
        assert_eq!(error_of(&response).code, codes::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_token_replay_rejected() {
        let network = MemoryNetwork::new();
        let credential = registered(&network);

        let req = request(&credential, Method::Get, "/multisigs/requests/x", b"");
        let first = network.send(req.clone()).await.unwrap();
        assert_eq!(first.status, 404);

        let replay = network.send(req).await.unwrap();
        assert_eq!(replay.status, 401);
    }

    #[test]
    fn test_pin_comparison() {
        assert!(constant_time_eq("123456", "123456"));
        assert!(!constant_time_eq("123456", "123457"));
        assert!(!constant_time_eq("123456", "12345"));
    }

    #[tokio::test]
    async fn test_expired_nonces_are_pruned() {
        let network = MemoryNetwork::new();
        let credential = registered(&network);
        let stale = Utc::now().timestamp() - 60;
        network
            .lock()
            .seen_nonces
            .insert("stale-nonce".to_string(), stale);

        let response = network
            .send(request(&credential, Method::Get, "/multisigs/requests/x", b""))
            .await
            .unwrap();
        assert_eq!(response.status, 404);

        let state = network.lock();
        assert!(!state.seen_nonces.contains_key("stale-nonce"));
        assert_eq!(state.seen_nonces.len(), 1);
    }

    #[tokio::test]
    async fn test_token_bound_to_request_bytes() {
        let network = MemoryNetwork::new();
        let credential = registered(&network);

        let mut req = request(&credential, Method::Post, "/pin/verify", b"{\"pin\":\"a\"}");
        req.body = b"{\"pin\":\"b\"}".to_vec();
        let response = network.send(req).await.unwrap();
        assert_eq!(response.status, 401);
    }

    #[tokio::test]
    async fn test_access_token_authenticates() {
        let network = MemoryNetwork::new();
        let token = network.issue_access_token("user-1");
        let credential = Credential::from_access_token(token);

        let response = network
            .send(request(&credential, Method::Get, "/multisigs/requests/none", b""))
            .await
            .unwrap();
        // Authenticated, the request simply does not exist
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_injected_failures_are_transient() {
        let network = MemoryNetwork::new();
        let credential = registered(&network);
        network.fail_next(1);

        let result = network
            .send(request(&credential, Method::Get, "/nowhere", b""))
            .await;
        assert!(matches!(result, Err(NetworkError::Transient(_))));

        let result = network
            .send(request(&credential, Method::Get, "/nowhere", b""))
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_deposit_clock_is_strictly_increasing() {
        let network = MemoryNetwork::new();
        let members = MemberSet::new(vec!["a".to_string()], 1).unwrap();
        let first = network.deposit(&members, Decimal::ONE);
        let second = network.deposit(&members, Decimal::ONE);
        assert!(second.updated_at > first.updated_at);
        assert_eq!(network.outputs().len(), 2);
        assert_eq!(first.amount.to_string(), "1.00000000");
    }
}
