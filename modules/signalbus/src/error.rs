use thiserror::Error;

use crate::codec::CodecError;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("event {0} already registered")]
    DuplicateEvent(String),

    #[error("notice {0} already registered")]
    DuplicateNotice(String),

    #[error("connection {connection} uses unknown driver {driver}")]
    UnknownDriver { connection: String, driver: String },

    #[error("connection {connection} uses unknown codec {codec}")]
    UnknownCodec { connection: String, codec: String },

    /// Nothing on the ring owns the requested name.
    #[error("no such connection for {0}")]
    NoRoute(String),

    #[error("no such connection {0}")]
    UnknownConnection(String),

    #[error("invalid config for {subject}: {message}")]
    InvalidConfig { subject: String, message: String },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transport(anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_display_verbatim() {
        let err = BusError::Transport(anyhow::anyhow!("socket closed"));
        assert_eq!(err.to_string(), "socket closed");
    }

    #[test]
    fn no_route_names_the_key() {
        let err = BusError::NoRoute("pay.finish".into());
        assert_eq!(err.to_string(), "no such connection for pay.finish");
    }

    #[test]
    fn invalid_config_names_its_subject() {
        let err = BusError::InvalidConfig {
            subject: "queue".into(),
            message: "weight 20000 exceeds 10000".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid config for queue: weight 20000 exceeds 10000"
        );
    }
}
