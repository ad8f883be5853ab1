use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A channel endpoint's role, as carried both in the attach token and
/// in the plaintext attach message itself; the tunnel rejects any
/// attach where the two disagree. Serialized on the wire in the token
/// payload as `role: u8`, not as a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Role {
    Client = 0,
    Server = 1,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Client),
            1 => Some(Self::Server),
            _ => None,
        }
    }
}

impl std::str::FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Self::Client),
            "server" => Ok(Self::Server),
            _ => Err(()),
        }
    }
}

impl Serialize for Role {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = u8::deserialize(deserializer)?;
        Role::from_u8(v).ok_or_else(|| serde::de::Error::custom("role must be 0 (client) or 1 (server)"))
    }
}

/// The claims carried by an attach token, exactly as signed. Field
/// order here is part of the wire contract: the signature covers the
/// canonical (declaration-order) JSON serialization of this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPayload {
    pub kid: String,
    pub aud: String,
    pub iss: String,
    pub channel_id: String,
    pub role: Role,
    pub token_id: String,
    pub init_exp: i64,
    pub idle_timeout_seconds: i32,
    pub iat: i64,
    pub exp: i64,
}
