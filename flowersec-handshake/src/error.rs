use flowersec_common::StableReason;

#[derive(thiserror::Error, Debug)]
pub enum HandshakeError {
    #[error("handshake did not complete within the configured timeout")]
    Timeout,
    #[error("handshake failed: {0}")]
    HandshakeFailed(&'static str),
    #[error("peer authentication tag did not verify against the shared PSK")]
    AuthTagMismatch,
    #[error("client_timestamp is after the channel's init_exp")]
    TimestampAfterInitExp,
    #[error("client_timestamp is outside the permitted clock skew window")]
    TimestampSkew,
    #[error("suite is not in the channel's permitted suite set")]
    SuiteNotPermitted,
    #[error("malformed FSEH frame: {0}")]
    BadHandshakeFrame(&'static str),
    #[error(transparent)]
    Record(#[from] flowersec_record::RecordError),
    #[error("I/O error on the handshake carrier: {0}")]
    Io(#[from] std::io::Error),
}

impl StableReason for HandshakeError {
    fn reason(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::HandshakeFailed(_) => "handshake_failed",
            Self::AuthTagMismatch => "auth_tag_mismatch",
            Self::TimestampAfterInitExp => "timestamp_after_init_exp",
            Self::TimestampSkew => "timestamp_skew",
            Self::SuiteNotPermitted => "suite_not_permitted",
            Self::BadHandshakeFrame(_) => "bad_handshake_frame",
            Self::Record(_) => "record_error",
            Self::Io(_) => "io_error",
        }
    }
}
