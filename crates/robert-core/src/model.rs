//! Protocol value types: identifiers, EBIDs, country codes and tuples.

use std::fmt;

use robert_crypto::{base64_decode, base64_encode, CryptoError, BLOCK64_SIZE};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::RobertError;

/// Size of a client permanent identifier in bytes (40 bits).
pub const ID_A_SIZE: usize = 5;

/// Size of an EBID in bytes (64 bits).
pub const EBID_SIZE: usize = BLOCK64_SIZE;

/// Largest epoch id that fits in the 24-bit EBID field.
pub const MAX_EBID_EPOCH: i32 = (1 << 24) - 1;

/// Permanent opaque client identifier, known only server-side.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdA([u8; ID_A_SIZE]);

impl IdA {
    pub fn new(bytes: [u8; ID_A_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn random() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; ID_A_SIZE];
        getrandom::getrandom(&mut bytes).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
        Ok(Self(bytes))
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, RobertError> {
        let bytes: [u8; ID_A_SIZE] = bytes.try_into().map_err(|_| {
            RobertError::MalformedInput(format!(
                "idA should be {} bytes but has {}",
                ID_A_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; ID_A_SIZE] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        base64_encode(&self.0)
    }
}

impl fmt::Debug for IdA {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdA({})", self.to_base64())
    }
}

impl fmt::Display for IdA {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl Serialize for IdA {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for IdA {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = base64_decode(&s).map_err(serde::de::Error::custom)?;
        IdA::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Plaintext content of an EBID: a 24-bit epoch and the idA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BluetoothIdentifier {
    pub epoch_id: i32,
    pub id_a: IdA,
}

impl BluetoothIdentifier {
    pub fn new(epoch_id: i32, id_a: IdA) -> Self {
        Self { epoch_id, id_a }
    }

    /// Layout: `epoch (3 bytes, big-endian) ‖ idA (5 bytes)`.
    ///
    /// Only the low 24 bits of the epoch are kept.
    pub fn pack(&self) -> [u8; EBID_SIZE] {
        let epoch = (self.epoch_id as u32 & 0x00FF_FFFF).to_be_bytes();
        let mut block = [0u8; EBID_SIZE];
        block[..3].copy_from_slice(&epoch[1..]);
        block[3..].copy_from_slice(&self.id_a.0);
        block
    }

    pub fn unpack(block: &[u8; EBID_SIZE]) -> Self {
        let epoch_id = u32::from_be_bytes([0, block[0], block[1], block[2]]) as i32;
        let mut id_a = [0u8; ID_A_SIZE];
        id_a.copy_from_slice(&block[3..]);
        Self {
            epoch_id,
            id_a: IdA(id_a),
        }
    }
}

/// Encrypted Bluetooth IDentifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ebid([u8; EBID_SIZE]);

impl Ebid {
    pub fn new(bytes: [u8; EBID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Anything but exactly 8 bytes is a hard decode failure.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, RobertError> {
        let bytes: [u8; EBID_SIZE] = bytes
            .try_into()
            .map_err(|_| RobertError::MalformedEbid { len: bytes.len() })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; EBID_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Ebid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ebid({})", base64_encode(&self.0))
    }
}

impl Serialize for Ebid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64_encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Ebid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = base64_decode(&s).map_err(serde::de::Error::custom)?;
        Ebid::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Encrypted country code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ecc(pub u8);

impl Serialize for Ecc {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64_encode(&[self.0]))
    }
}

impl<'de> Deserialize<'de> for Ecc {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match base64_decode(&s).map_err(serde::de::Error::custom)?.as_slice() {
            [byte] => Ok(Ecc(*byte)),
            other => Err(serde::de::Error::custom(format!(
                "ECC should be 1 byte but has {}",
                other.len()
            ))),
        }
    }
}

/// Plaintext country code (ITU-T E.164 style, e.g. 33 for France).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CountryCode(pub u8);

/// Request purpose mixed into MACs as a one-byte salt.
///
/// The byte values are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestType {
    Hello = 1,
    Status = 2,
    Unregister = 3,
    DeleteHistory = 4,
}

impl RequestType {
    pub fn salt(self) -> u8 {
        self as u8
    }

    /// MAC length for this request type: hello MACs are truncated.
    pub fn mac_length(self) -> usize {
        match self {
            RequestType::Hello => 5,
            RequestType::Status | RequestType::Unregister | RequestType::DeleteHistory => 32,
        }
    }
}

impl TryFrom<u8> for RequestType {
    type Error = RobertError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(RequestType::Hello),
            2 => Ok(RequestType::Status),
            3 => Ok(RequestType::Unregister),
            4 => Ok(RequestType::DeleteHistory),
            other => Err(RobertError::MalformedInput(format!(
                "unknown request type {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TupleKey {
    pub ebid: Ebid,
    pub ecc: Ecc,
}

/// One epoch of broadcastable material.
///
/// JSON shape: `{"epochId":N,"key":{"ebid":"<base64>","ecc":"<base64>"}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralTuple {
    pub epoch_id: i32,
    pub key: TupleKey,
}

impl EphemeralTuple {
    pub fn new(epoch_id: i32, ebid: Ebid, ecc: Ecc) -> Self {
        Self {
            epoch_id,
            key: TupleKey { ebid, ecc },
        }
    }
}
