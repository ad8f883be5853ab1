use flowersec_common::StableReason;

/// One of the four buckets the tunnel's WebSocket close codes collapse
/// into; the stable reason string (via [`StableReason`]) is what a
/// client actually keys its error handling on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCategory {
    ProtocolError,
    PolicyViolation,
    TryAgainLater,
    InternalServerError,
}

impl CloseCategory {
    /// RFC 6455 private-use range close codes, chosen once and never
    /// renumbered since clients hardcode them alongside the reason
    /// string.
    pub fn ws_close_code(self) -> u16 {
        match self {
            Self::ProtocolError => 4400,
            Self::PolicyViolation => 4403,
            Self::TryAgainLater => 4429,
            Self::InternalServerError => 4500,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TunnelError {
    #[error("attach message is not valid JSON or fails schema validation")]
    InvalidAttach,
    #[error("attach message exceeds MaxAttachBytes")]
    AttachTooLarge,
    #[error("expected a text attach frame")]
    ExpectedAttach,
    #[error("attach read deadline exceeded")]
    Timeout,
    #[error("token verification failed: {0}")]
    Token(#[from] flowersec_token::TokenError),
    #[error("token has already been used")]
    TokenReplay,
    #[error("token channel_id does not match the attach channel_id")]
    ChannelMismatch,
    #[error("token role does not match the attach role")]
    RoleMismatch,
    #[error("too many concurrent connections")]
    TooManyConnections,
    #[error("too many open channels")]
    TooManyChannels,
    #[error("replacement attach rejected by rate limiter")]
    ReplaceRateLimited,
    #[error("channel's recorded init_exp does not match this attach")]
    InitExpMismatch,
    #[error("channel's recorded idle_timeout does not match this attach")]
    IdleTimeoutMismatch,
    #[error("received a non-binary websocket message after attach")]
    NonBinaryFrame,
    #[error("frame exceeds MaxRecordBytes")]
    RecordTooLarge,
    #[error("pending-byte budget exceeded before pairing")]
    PendingOverflow,
    #[error("failed to write to peer's websocket")]
    WriteError,
    #[error("frame routed against a channel that no longer exists")]
    UnknownChannel,
    #[error("frame routed from a connection no longer registered as the channel's endpoint")]
    MissingSrc,
    #[error("channel expired before the init window elapsed")]
    InitExpired,
    #[error("channel torn down after exceeding its idle timeout")]
    IdleTimeout,
    #[error("peer closed its side of the channel")]
    PeerClosed,
    #[error("websocket I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl StableReason for TunnelError {
    fn reason(&self) -> &'static str {
        match self {
            Self::InvalidAttach => "invalid_attach",
            Self::AttachTooLarge => "attach_too_large",
            Self::ExpectedAttach => "expected_attach",
            Self::Timeout => "timeout",
            Self::Token(e) => e.reason(),
            Self::TokenReplay => "token_replay",
            Self::ChannelMismatch => "channel_mismatch",
            Self::RoleMismatch => "role_mismatch",
            Self::TooManyConnections => "too_many_connections",
            Self::TooManyChannels => "too_many_channels",
            Self::ReplaceRateLimited => "replace_rate_limited",
            Self::InitExpMismatch => "init_exp_mismatch",
            Self::IdleTimeoutMismatch => "idle_timeout_mismatch",
            Self::NonBinaryFrame => "non_binary_frame",
            Self::RecordTooLarge => "record_too_large",
            Self::PendingOverflow => "pending_overflow",
            Self::WriteError => "write_error",
            Self::UnknownChannel => "unknown_channel",
            Self::MissingSrc => "missing_src",
            Self::InitExpired => "init_expired",
            Self::IdleTimeout => "idle_timeout",
            Self::PeerClosed => "peer_closed",
            Self::Io(_) | Self::Internal(_) => "internal_server_err",
        }
    }
}

impl TunnelError {
    /// Which close-code bucket a given failure maps to, per the
    /// protocol_error / policy_violation / try_again_later /
    /// internal_server_err taxonomy.
    pub fn close_category(&self) -> CloseCategory {
        match self {
            Self::InvalidAttach
            | Self::AttachTooLarge
            | Self::ExpectedAttach
            | Self::NonBinaryFrame => CloseCategory::ProtocolError,
            Self::Token(_)
            | Self::TokenReplay
            | Self::ChannelMismatch
            | Self::RoleMismatch
            | Self::InitExpMismatch
            | Self::IdleTimeoutMismatch
            | Self::RecordTooLarge
            | Self::PendingOverflow
            | Self::UnknownChannel
            | Self::MissingSrc
            | Self::InitExpired
            | Self::IdleTimeout
            | Self::PeerClosed
            | Self::Timeout => CloseCategory::PolicyViolation,
            Self::TooManyConnections | Self::TooManyChannels | Self::ReplaceRateLimited => {
                CloseCategory::TryAgainLater
            }
            Self::WriteError | Self::Io(_) | Self::Internal(_) => {
                CloseCategory::InternalServerError
            }
        }
    }
}
