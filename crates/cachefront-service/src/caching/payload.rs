use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// An encode/decode contract violation.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct PayloadError(pub String);

/// De/serialization of cached values.
///
/// Values are opaque bytes to the cache layer; this trait supplies the
/// encode/decode pair. Implementations must round-trip:
/// `decode(encode(v)) == v`.
pub trait Payload: Sized + Send + 'static {
    fn encode(&self) -> Result<Vec<u8>, PayloadError>;
    fn decode(bytes: Vec<u8>) -> Result<Self, PayloadError>;
}

impl Payload for Vec<u8> {
    fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        Ok(self.clone())
    }

    fn decode(bytes: Vec<u8>) -> Result<Self, PayloadError> {
        Ok(bytes)
    }
}

impl Payload for Bytes {
    fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        Ok(self.to_vec())
    }

    fn decode(bytes: Vec<u8>) -> Result<Self, PayloadError> {
        Ok(Bytes::from(bytes))
    }
}

impl Payload for String {
    fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        Ok(self.clone().into_bytes())
    }

    fn decode(bytes: Vec<u8>) -> Result<Self, PayloadError> {
        String::from_utf8(bytes).map_err(|err| PayloadError(err.to_string()))
    }
}

/// Wrapper caching any serde value as JSON bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T> Payload for Json<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        serde_json::to_vec(&self.0).map_err(|err| PayloadError(err.to_string()))
    }

    fn decode(bytes: Vec<u8>) -> Result<Self, PayloadError> {
        serde_json::from_slice(&bytes)
            .map(Json)
            .map_err(|err| PayloadError(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trips() {
        let value = b"hello".to_vec();
        assert_eq!(Vec::<u8>::decode(value.encode().unwrap()).unwrap(), value);

        let value = String::from("grüße");
        assert_eq!(String::decode(value.encode().unwrap()).unwrap(), value);

        let value = Json(vec![1u32, 2, 3]);
        assert_eq!(Json::<Vec<u32>>::decode(value.encode().unwrap()).unwrap(), value);
    }

    #[test]
    fn test_decode_failures() {
        assert!(String::decode(vec![0xff, 0xfe]).is_err());
        assert!(Json::<u32>::decode(b"not json".to_vec()).is_err());
    }
}
