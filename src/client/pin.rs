//! PIN calls

use log::info;
use serde::de::IgnoredAny;
use serde::Serialize;

use super::{Client, ClientError, PinPayload, RequestContext};
use crate::pin::{validate_pin_pattern, PinError};

#[derive(Serialize)]
struct PinUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    old_pin: Option<String>,
    pin: String,
}

impl Client {
    /// Encrypt a PIN with this identity's session key.
    ///
    /// The format is checked before the cipher is touched, so a malformed
    /// PIN never consumes an iteration.
    pub fn encrypt_pin(&self, pin: &str) -> Result<String, ClientError> {
        validate_pin_pattern(pin)?;
        let cipher = self.pin_cipher.as_ref().ok_or(PinError::MissingPinToken)?;
        Ok(cipher.encrypt(pin)?)
    }

    /// Ask the service to check a PIN
    pub async fn verify_pin(&self, ctx: &RequestContext<'_>, pin: &str) -> Result<(), ClientError> {
        let payload = self.encrypt_pin(pin)?;
        let _: IgnoredAny = self
            .post(ctx, "/pin/verify", &PinPayload { pin: payload })
            .await?;
        Ok(())
    }

    /// Set or change the PIN. `old_pin` may be omitted when none is set yet.
    pub async fn modify_pin(
        &self,
        ctx: &RequestContext<'_>,
        old_pin: Option<&str>,
        new_pin: &str,
    ) -> Result<(), ClientError> {
        let old_pin = old_pin.filter(|p| !p.is_empty());
        if let Some(old) = old_pin {
            validate_pin_pattern(old)?;
        }
        validate_pin_pattern(new_pin)?;

        let body = PinUpdate {
            old_pin: old_pin.map(|p| self.encrypt_pin(p)).transpose()?,
            pin: self.encrypt_pin(new_pin)?,
        };
        let _: IgnoredAny = self.post(ctx, "/pin/update", &body).await?;

        info!(
            "PIN updated for {}",
            self.identity_id().unwrap_or("access token")
        );
        Ok(())
    }
}
