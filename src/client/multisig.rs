//! Multisig request calls

use log::{debug, info};
use serde::de::IgnoredAny;
use serde::Serialize;

use super::{Client, ClientError, PinPayload, RequestContext};
use crate::multisig::{MultisigAction, MultisigRequest, RawTransaction, SignProgress};

#[derive(Serialize)]
struct CreateRequest<'a> {
    action: MultisigAction,
    raw: &'a str,
}

impl Client {
    /// Open a request to sign or unlock a raw transaction
    pub async fn create_multisig(
        &self,
        ctx: &RequestContext<'_>,
        action: MultisigAction,
        raw: &str,
    ) -> Result<MultisigRequest, ClientError> {
        RawTransaction::from_payload(raw)?;
        let request: MultisigRequest = self
            .post(ctx, "/multisigs/requests", &CreateRequest { action, raw })
            .await?;
        debug!(
            "Created {} request {} with {} signers",
            action,
            request.request_id,
            request.signers.len()
        );
        Ok(request)
    }

    /// Fetch the service's current view of a request
    pub async fn read_multisig(
        &self,
        ctx: &RequestContext<'_>,
        request_id: &str,
    ) -> Result<MultisigRequest, ClientError> {
        self.get(ctx, &format!("/multisigs/requests/{}", request_id))
            .await
    }

    /// Add this identity's signature.
    ///
    /// A request left below its threshold is not an error; check
    /// [`MultisigRequest::progress`] on the returned snapshot.
    pub async fn sign_multisig(
        &self,
        ctx: &RequestContext<'_>,
        request_id: &str,
        pin: &str,
    ) -> Result<MultisigRequest, ClientError> {
        let payload = self.encrypt_pin(pin)?;
        let request: MultisigRequest = self
            .post(
                ctx,
                &format!("/multisigs/requests/{}/sign", request_id),
                &PinPayload { pin: payload },
            )
            .await?;

        match request.progress() {
            SignProgress::Complete => info!("Request {} is fully signed", request_id),
            SignProgress::ThresholdNotMet { have, need } => {
                debug!("Request {} has {}/{} signatures", request_id, have, need)
            }
        }
        Ok(request)
    }

    /// Cancel a pending request. Cancelling a finished or unknown request
    /// does nothing.
    pub async fn cancel_multisig(
        &self,
        ctx: &RequestContext<'_>,
        request_id: &str,
    ) -> Result<(), ClientError> {
        let _: IgnoredAny = self
            .post(
                ctx,
                &format!("/multisigs/requests/{}/cancel", request_id),
                &serde_json::json!({}),
            )
            .await?;
        Ok(())
    }

    /// Release collected signatures so the outputs can be spent again
    pub async fn unlock_multisig(
        &self,
        ctx: &RequestContext<'_>,
        request_id: &str,
        pin: &str,
    ) -> Result<MultisigRequest, ClientError> {
        let payload = self.encrypt_pin(pin)?;
        let request: MultisigRequest = self
            .post(
                ctx,
                &format!("/multisigs/requests/{}/unlock", request_id),
                &PinPayload { pin: payload },
            )
            .await?;
        info!("Request {} is {}", request_id, request.state);
        Ok(request)
    }
}
