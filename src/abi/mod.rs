//! Contract interface descriptions and decoded event values.
//!
//! Interfaces are registered at runtime from JSON ABI descriptors, so events are
//! represented dynamically: a [`DecodedEvent`] carries its parameters as an
//! ordered list of named [`Value`]s instead of a generated struct per event.
//!
//! - [`decoder`]: method index and binary log decoding
//! - [`contracts`]: ABIs of the contracts this indexer understands
//!
//! ## Example
//!
//! ```
//! use pm_event_indexer::abi::{AbiEntry, decoder::Decoder};
//!
//! let abi: Vec<AbiEntry> = serde_json::from_str(r#"[
//!     {"type": "event", "name": "MarketFunding",
//!      "inputs": [{"name": "funding", "type": "uint256", "indexed": false}]}
//! ]"#).unwrap();
//!
//! let mut decoder = Decoder::new();
//! assert_eq!(decoder.register_abi(&abi), 1);
//! assert_eq!(abi[0].signature(), "MarketFunding(uint256)");
//! ```

pub mod contracts;
pub mod decoder;

use alloy::primitives::{keccak256, Address, Bytes, Selector, B256};
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{IndexerError, IndexerResult};

/// Kind of an ABI entry. Only events are decoded from logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbiKind {
    /// Callable function (the ABI default when `type` is omitted)
    #[default]
    Function,
    /// Emitted event
    Event,
    /// Constructor, fallback, receive, error, ...
    #[serde(other)]
    Other,
}

/// One parameter of an ABI entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiInput {
    /// Parameter name (may be empty)
    #[serde(default)]
    pub name: String,
    /// Solidity type, e.g. `uint256` or `address[]`
    #[serde(rename = "type")]
    pub ty: String,
    /// Whether the value is carried in a topic instead of the data payload
    #[serde(default)]
    pub indexed: bool,
}

/// A single entry of a JSON ABI descriptor. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiEntry {
    /// Function or event name; unnamed entries (constructor, fallback) are ignored
    #[serde(default)]
    pub name: Option<String>,
    /// Entry kind
    #[serde(rename = "type", default)]
    pub kind: AbiKind,
    /// Input parameters in declaration order
    #[serde(default)]
    pub inputs: Vec<AbiInput>,
}

impl AbiEntry {
    /// Canonical signature string: `name(type1,type2,...)`, no parameter names.
    #[must_use]
    pub fn signature(&self) -> String {
        let types: Vec<&str> = self.inputs.iter().map(|input| input.ty.as_str()).collect();
        format!("{}({})", self.name.as_deref().unwrap_or_default(), types.join(","))
    }

    /// Full keccak256 hash of the canonical signature (topic 0 of the event).
    #[must_use]
    pub fn topic(&self) -> B256 {
        keccak256(self.signature().as_bytes())
    }

    /// Signature hash truncated to 32 bits, the key of the method index.
    #[must_use]
    pub fn method_id(&self) -> Selector {
        Selector::from_slice(&self.topic()[..4])
    }
}

/// Parse a JSON ABI descriptor.
///
/// # Errors
///
/// Returns a decoding error if the JSON is not an array of ABI entries.
pub fn parse_abi(json: &str) -> IndexerResult<Vec<AbiEntry>> {
    serde_json::from_str(json)
        .map_err(|e| IndexerError::decoding("Failed to parse ABI descriptor", Some(Box::new(e))))
}

/// A decoded parameter value.
///
/// Integers of every width are widened to arbitrary precision; booleans are
/// represented as `0`/`1` and strings as their UTF-8 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "ValueRepr", try_from = "ValueRepr")]
pub enum Value {
    /// Signed arbitrary-precision integer
    Int(BigInt),
    /// 20-byte account or contract address
    Address(Address),
    /// Raw byte string (also fixed-width `bytesN`, right-truncated to N)
    Bytes(Bytes),
    /// Homogeneous list for array-typed parameters
    List(Vec<Value>),
}

impl Value {
    /// The integer, if this is an `Int`.
    #[must_use]
    pub const fn as_int(&self) -> Option<&BigInt> {
        match self {
            Self::Int(value) => Some(value),
            _ => None,
        }
    }

    /// The address, if this is an `Address`.
    #[must_use]
    pub const fn as_address(&self) -> Option<Address> {
        match self {
            Self::Address(address) => Some(*address),
            _ => None,
        }
    }

    /// The bytes, if this is `Bytes`.
    #[must_use]
    pub const fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// The elements, if this is a `List`.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(values) => Some(values),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Address(address) => write!(f, "{address:?}"),
            Self::Bytes(bytes) => write!(f, "{bytes}"),
            Self::List(values) => {
                write!(f, "[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<Address> for Value {
    fn from(address: Address) -> Self {
        Self::Address(address)
    }
}

impl From<BigInt> for Value {
    fn from(value: BigInt) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::Int(BigInt::from(value))
    }
}

/// Named parameter of a decoded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    /// Parameter name from the ABI
    pub name: String,
    /// Decoded value
    pub value: Value,
}

/// A raw log entry as delivered by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    /// Emitting contract
    pub address: Address,
    /// Topic 0 is the event signature hash, the rest are indexed parameters
    pub topics: Vec<B256>,
    /// ABI-encoded non-indexed parameters
    pub data: Bytes,
    /// Transaction that emitted the log
    pub transaction_hash: B256,
    /// Position of the log inside its block
    pub log_index: u64,
}

impl From<&alloy::rpc::types::Log> for RawLog {
    fn from(log: &alloy::rpc::types::Log) -> Self {
        Self {
            address: log.address(),
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
            transaction_hash: log.transaction_hash.unwrap_or_default(),
            log_index: log.log_index.unwrap_or_default(),
        }
    }
}

/// A log decoded against a registered event ABI. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedEvent {
    /// Emitting contract
    pub address: Address,
    /// Event name
    pub name: String,
    /// Parameters in ABI declaration order
    pub params: Vec<Param>,
    /// Transaction that emitted the log
    #[serde(default)]
    pub transaction_hash: B256,
    /// Position of the log inside its block
    #[serde(default)]
    pub log_index: u64,
}

impl DecodedEvent {
    /// Build an event from `(name, value)` pairs, with a zero log position.
    #[must_use]
    pub fn new<N: Into<String>>(
        address: Address,
        name: impl Into<String>,
        params: impl IntoIterator<Item = (N, Value)>,
    ) -> Self {
        Self {
            address,
            name: name.into(),
            params: params
                .into_iter()
                .map(|(name, value)| Param {
                    name: name.into(),
                    value,
                })
                .collect(),
            transaction_hash: B256::ZERO,
            log_index: 0,
        }
    }

    /// Attach the emitting transaction and log index.
    #[must_use]
    pub const fn at(mut self, transaction_hash: B256, log_index: u64) -> Self {
        self.transaction_hash = transaction_hash;
        self.log_index = log_index;
        self
    }

    /// Look up a parameter by name.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the parameter is absent.
    pub fn param(&self, name: &str) -> IndexerResult<&Value> {
        self.params
            .iter()
            .find(|param| param.name == name)
            .map(|param| &param.value)
            .ok_or_else(|| {
                IndexerError::validation(format!("{} has no parameter '{name}'", self.name))
            })
    }

    /// Integer parameter.
    ///
    /// # Errors
    ///
    /// Returns a validation error when absent or not an integer.
    pub fn int(&self, name: &str) -> IndexerResult<&BigInt> {
        self.param(name)?.as_int().ok_or_else(|| {
            IndexerError::validation(format!("{}.{name} is not an integer", self.name))
        })
    }

    /// Address parameter.
    ///
    /// # Errors
    ///
    /// Returns a validation error when absent or not an address.
    pub fn address_param(&self, name: &str) -> IndexerResult<Address> {
        self.param(name)?.as_address().ok_or_else(|| {
            IndexerError::validation(format!("{}.{name} is not an address", self.name))
        })
    }

    /// Integer parameter used as a small index (outcome index, outcome count).
    ///
    /// # Errors
    ///
    /// Returns a validation error when absent, negative or too large.
    pub fn index(&self, name: &str) -> IndexerResult<usize> {
        let value = self.int(name)?;
        usize::try_from(value).map_err(|_| {
            IndexerError::validation(format!("{}.{name} = {value} is not a valid index", self.name))
        })
    }

    /// JSON rendering used in logs: `{"address", "name", "params": [{"name", "value"}]}`.
    #[must_use]
    pub fn to_log_json(&self) -> String {
        let params: Vec<serde_json::Value> = self
            .params
            .iter()
            .map(|param| serde_json::json!({"name": param.name, "value": param.value.to_string()}))
            .collect();
        serde_json::json!({
            "address": format!("{:?}", self.address),
            "name": self.name,
            "params": params,
        })
        .to_string()
    }
}

/// Minimal block metadata attached to the events of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Block number
    pub number: u64,
    /// Unix timestamp in seconds
    pub timestamp: u64,
}

impl BlockInfo {
    /// Create block metadata.
    #[must_use]
    pub const fn new(number: u64, timestamp: u64) -> Self {
        Self { number, timestamp }
    }
}

/// Serialised form of [`Value`]: `{"type": "int", "value": "<decimal>"}`.
#[derive(Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
enum ValueRepr {
    Int(String),
    Address(Address),
    Bytes(Bytes),
    List(Vec<ValueRepr>),
}

impl From<Value> for ValueRepr {
    fn from(value: Value) -> Self {
        match value {
            Value::Int(value) => Self::Int(value.to_string()),
            Value::Address(address) => Self::Address(address),
            Value::Bytes(bytes) => Self::Bytes(bytes),
            Value::List(values) => Self::List(values.into_iter().map(Self::from).collect()),
        }
    }
}

impl TryFrom<ValueRepr> for Value {
    type Error = num_bigint::ParseBigIntError;

    fn try_from(repr: ValueRepr) -> Result<Self, Self::Error> {
        Ok(match repr {
            ValueRepr::Int(raw) => Self::Int(raw.parse()?),
            ValueRepr::Address(address) => Self::Address(address),
            ValueRepr::Bytes(bytes) => Self::Bytes(bytes),
            ValueRepr::List(values) => {
                Self::List(values.into_iter().map(Self::try_from).collect::<Result<_, _>>()?)
            }
        })
    }
}
