//! Shared pieces used by every pushsub crate: the error taxonomy and the
//! tracing setup.

pub mod error;
pub mod logging;

pub use error::{BrokerError, ClientId};

#[cfg(test)]
mod tests {
    use super::error::BrokerError;
    use super::logging;

    #[test]
    fn logging_init_accepts_levels() {
        // Should not panic
        logging::init("info");
        logging::init("debug");
        logging::init("warn");
    }

    #[test]
    fn peer_unreachable_is_told_apart_from_rejections() {
        assert!(BrokerError::PeerUnreachable("reset".into()).is_peer_unreachable());
        assert!(!BrokerError::UnregisteredClient("client-7".into()).is_peer_unreachable());
        assert!(!BrokerError::ServerStopped.is_peer_unreachable());
    }

    #[test]
    fn error_messages_name_the_client() {
        let err = BrokerError::UnregisteredClient("client-3".into());
        assert_eq!(err.to_string(), "client client-3 is not registered");
    }
}
