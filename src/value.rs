use bytes::Bytes;
use prost::Message;

use crate::Result;

/// An opaque payload tagged with the backend version it was read at.
///
/// Versions start at 1 for a key's first write and grow by one per write;
/// version 0 is never attached to a value and stands for "absent".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    payload: Bytes,
    version: u64,
}

impl VersionedValue {
    pub fn new(
        payload: impl Into<Bytes>,
        version: u64,
    ) -> Self {
        Self {
            payload: payload.into(),
            version,
        }
    }

    /// Raw encoded payload
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Decodes the payload into a prost message.
    ///
    /// # Errors
    /// - [`crate::Error::Decode`] if the bytes are not a valid `M`
    pub fn unmarshal<M>(&self) -> Result<M>
    where
        M: Message + Default,
    {
        Ok(M::decode(self.payload.clone())?)
    }

    /// True when `self` should replace `other` as the latest observation.
    pub fn is_newer_than(
        &self,
        other: Option<&VersionedValue>,
    ) -> bool {
        other.map_or(true, |o| self.version > o.version)
    }
}

pub(crate) fn marshal<M: Message>(message: &M) -> Bytes {
    Bytes::from(message.encode_to_vec())
}
