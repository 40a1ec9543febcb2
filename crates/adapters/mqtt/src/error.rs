//! MQTT adapter error types.

use meshbridge_domain::error::BridgeError;

/// Errors specific to the MQTT adapter.
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    /// The rumqttc client refused a request (its queue is closed).
    #[error("MQTT client error")]
    Client(#[from] rumqttc::ClientError),

    /// The connection to the broker failed.
    #[error("MQTT connection error")]
    Connection(#[from] rumqttc::ConnectionError),

    /// An inbound payload is not valid JSON.
    #[error("failed to parse MQTT payload: {0}")]
    PayloadParse(#[source] serde_json::Error),

    /// A domain-level error (validation, not-found, etc.).
    #[error(transparent)]
    Domain(BridgeError),
}

impl MqttError {
    /// Convert into a [`BridgeError`] for propagation across port
    /// boundaries.
    #[must_use]
    pub fn into_domain(self) -> BridgeError {
        match self {
            Self::Domain(err) => err,
            other => BridgeError::internal(other),
        }
    }
}

impl From<MqttError> for BridgeError {
    fn from(err: MqttError) -> Self {
        err.into_domain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshbridge_domain::error::{InternalError, ValidationError};

    #[test]
    fn should_convert_domain_error_back_to_domain() {
        let mqtt_err = MqttError::Domain(ValidationError::DataNotObject.into());
        let back: BridgeError = mqtt_err.into();
        assert!(matches!(
            back,
            BridgeError::Validation(ValidationError::DataNotObject)
        ));
    }

    #[test]
    fn should_wrap_parse_error_as_internal() {
        let json_err = serde_json::from_str::<serde_json::Value>("{{bad").unwrap_err();
        let back: BridgeError = MqttError::PayloadParse(json_err).into();
        assert!(matches!(back, BridgeError::Internal(InternalError::Other(_))));
    }

    #[test]
    fn should_display_payload_parse_error_with_cause() {
        let json_err = serde_json::from_str::<serde_json::Value>("{{bad").unwrap_err();
        let err = MqttError::PayloadParse(json_err);
        assert!(err.to_string().starts_with("failed to parse MQTT payload: "));
    }
}
