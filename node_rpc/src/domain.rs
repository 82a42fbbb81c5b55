use {
    derive_more::{AsMut, AsRef, Display, From},
    rand::Rng,
    serde::{Deserialize, Serialize},
    std::{str::FromStr, sync::Arc},
};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DecodingError {
    #[error("Invalid encoding")]
    Encoding,

    #[error("Invalid data length")]
    Length,
}

/// Opaque per-connection subscription identifier, carried on the wire as a
/// hex string.
#[derive(Debug, Hash, Clone, PartialEq, Eq, Serialize, Deserialize, Display, From, AsRef)]
#[serde(transparent)]
#[as_ref(forward)]
#[from(forward)]
pub struct SubscriptionId(Arc<str>);

/// The raw form of a [`SubscriptionId`]: 128 bits of randomness, encoded as
/// lower-case hex on the wire. Uniqueness is enforced by generation.
#[derive(Debug, Default, Clone, Hash, PartialEq, Eq, AsRef, AsMut, Serialize, Deserialize)]
#[as_ref(forward)]
#[as_mut(forward)]
#[serde(transparent)]
pub struct DecodedSubscriptionId(pub [u8; 16]);

impl DecodedSubscriptionId {
    pub const LENGTH: usize = 16;

    pub fn generate() -> Self {
        Self(rand::thread_rng().gen::<[u8; Self::LENGTH]>())
    }
}

impl SubscriptionId {
    pub fn decode(&self) -> Result<DecodedSubscriptionId, DecodingError> {
        DecodedSubscriptionId::try_from(self.clone())
    }

    pub fn generate() -> Self {
        Self::from(DecodedSubscriptionId::generate())
    }
}

impl FromStr for DecodedSubscriptionId {
    type Err = DecodingError;

    fn from_str(val: &str) -> Result<Self, Self::Err> {
        let enc_len = val.len();
        if enc_len == 0 {
            return Err(DecodingError::Length);
        }

        let dec_len = data_encoding::HEXLOWER_PERMISSIVE
            .decode_len(enc_len)
            .map_err(|_| DecodingError::Length)?;

        if dec_len != Self::LENGTH {
            return Err(DecodingError::Length);
        }

        let mut data = Self::default();

        data_encoding::HEXLOWER_PERMISSIVE
            .decode_mut(val.as_bytes(), &mut data.0)
            .map_err(|_| DecodingError::Encoding)?;

        Ok(data)
    }
}

impl std::fmt::Display for DecodedSubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&data_encoding::HEXLOWER_PERMISSIVE.encode(&self.0))
    }
}

impl From<DecodedSubscriptionId> for SubscriptionId {
    fn from(val: DecodedSubscriptionId) -> Self {
        Self(val.to_string().into())
    }
}

impl TryFrom<SubscriptionId> for DecodedSubscriptionId {
    type Error = DecodingError;

    fn try_from(value: SubscriptionId) -> Result<Self, Self::Error> {
        value.as_ref().parse()
    }
}

/// The client-chosen request identifier, echoed back verbatim in the
/// response. Numbers, strings and an explicit null are valid; a missing or
/// structured id fails frame parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(serde_json::Number),
    String(String),
    Null,
}

impl From<u64> for RequestId {
    fn from(val: u64) -> Self {
        Self::Number(val.into())
    }
}

impl From<&str> for RequestId {
    fn from(val: &str) -> Self {
        Self::String(val.to_owned())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn subscription_id_round_trip() {
        let id = SubscriptionId::generate();
        let decoded = id.decode().unwrap();

        assert_eq!(id, SubscriptionId::from(decoded));
        assert_eq!(id.as_ref().len(), 2 * DecodedSubscriptionId::LENGTH);
    }

    #[test]
    fn subscription_id_decoding() {
        let id_str = "85089843cebc89ce5bbffd55377b2e65";
        let id_bin = id_str.parse::<DecodedSubscriptionId>().unwrap();

        assert_eq!(id_str, SubscriptionId::from(id_bin).as_ref());

        assert!(matches!(
            "85089843ce".parse::<DecodedSubscriptionId>(),
            Err(DecodingError::Length)
        ));

        assert!(matches!(
            "zz089843cebc89ce5bbffd55377b2e65".parse::<DecodedSubscriptionId>(),
            Err(DecodingError::Encoding)
        ));
    }

    #[test]
    fn subscription_ids_are_unique() {
        let a = SubscriptionId::generate();
        let b = SubscriptionId::generate();

        assert_ne!(a, b);
    }

    #[test]
    fn request_id_forms() {
        let id: RequestId = serde_json::from_str("12345").unwrap();
        assert_eq!(id, RequestId::Number(12345.into()));

        let id: RequestId = serde_json::from_str(r#""abc""#).unwrap();
        assert_eq!(id, RequestId::String("abc".into()));

        let id: RequestId = serde_json::from_str("null").unwrap();
        assert_eq!(id, RequestId::Null);
        assert_eq!(serde_json::to_string(&id).unwrap(), "null");

        assert!(serde_json::from_str::<RequestId>("[1]").is_err());
        assert!(serde_json::from_str::<RequestId>("{}").is_err());
    }
}
