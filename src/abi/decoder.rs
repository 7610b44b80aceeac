//! Method index and binary log decoding.
//!
//! The decoder keeps a [`MethodIndex`] from the 4-byte truncated signature hash to
//! the ABI entry it was derived from. Registration is incremental and
//! deregistration only touches the entries passed in, so several contract
//! interfaces can share one decoder.

use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy::primitives::{Bytes, Selector, B256};
use num_bigint::{BigInt, Sign};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::{AbiEntry, AbiInput, AbiKind, DecodedEvent, Param, RawLog, Value};
use crate::error::{IndexerError, IndexerResult};

/// Truncated signature hash → ABI entry.
pub type MethodIndex = HashMap<Selector, AbiEntry>;

/// Decodes raw logs against every registered event ABI.
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    methods: MethodIndex,
}

impl Decoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every named entry, returning how many were added to the index.
    ///
    /// Entries without a name (constructor, fallback) are ignored. Registering an
    /// entry whose hash is already present replaces the previous entry.
    pub fn register_abi(&mut self, entries: &[AbiEntry]) -> usize {
        let mut count = 0;
        for entry in entries.iter().filter(|entry| entry.name.is_some()) {
            let method_id = entry.method_id();
            if let Some(previous) = self.methods.insert(method_id, entry.clone()) {
                if previous != *entry {
                    debug!(
                        signature = %entry.signature(),
                        replaced = %previous.signature(),
                        "Method id collision, keeping the newest entry"
                    );
                }
            }
            count += 1;
        }
        count
    }

    /// Remove the given entries from the index.
    ///
    /// Only hashes that still map to an identical entry are removed, so
    /// deregistering one interface never evicts an unrelated one.
    pub fn deregister_abi(&mut self, entries: &[AbiEntry]) {
        for entry in entries.iter().filter(|entry| entry.name.is_some()) {
            let method_id = entry.method_id();
            if self.methods.get(&method_id) == Some(entry) {
                self.methods.remove(&method_id);
            }
        }
    }

    /// Number of indexed entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether no entry is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Look up the event entry for a topic 0 hash.
    #[must_use]
    pub fn lookup(&self, topic0: &B256) -> Option<&AbiEntry> {
        let method_id = Selector::from_slice(&topic0[..4]);
        self.methods
            .get(&method_id)
            .filter(|entry| entry.kind == AbiKind::Event)
    }

    /// Decode every log, skipping unknown signatures and reporting decode errors.
    ///
    /// A malformed log never stops the batch.
    pub fn decode(&self, logs: &[RawLog]) -> Vec<DecodedEvent> {
        logs.iter()
            .filter_map(|log| match self.decode_log(log) {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        address = ?log.address,
                        tx = ?log.transaction_hash,
                        log_index = log.log_index,
                        error = %e,
                        "Skipping undecodable log"
                    );
                    None
                }
            })
            .collect()
    }

    /// Decode a single log.
    ///
    /// Returns `Ok(None)` when topic 0 is missing or not registered.
    ///
    /// # Errors
    ///
    /// Returns a decoding error when the topics or data do not match the
    /// registered layout.
    pub fn decode_log(&self, log: &RawLog) -> IndexerResult<Option<DecodedEvent>> {
        let Some(topic0) = log.topics.first() else {
            return Ok(None);
        };
        let Some(entry) = self.lookup(topic0) else {
            return Ok(None);
        };
        let name = entry.name.clone().unwrap_or_default();

        let (indexed, body): (Vec<&AbiInput>, Vec<&AbiInput>) =
            entry.inputs.iter().partition(|input| input.indexed);

        let topics = &log.topics[1..];
        if topics.len() != indexed.len() {
            return Err(IndexerError::decoding(
                format!(
                    "{name}: expected {} indexed topics, got {}",
                    indexed.len(),
                    topics.len()
                ),
                None,
            ));
        }

        let mut indexed_values = indexed
            .iter()
            .zip(topics)
            .map(|(input, topic)| decode_topic(input, topic))
            .collect::<IndexerResult<Vec<_>>>()?
            .into_iter();
        let mut body_values = decode_data(&name, &body, &log.data)?.into_iter();

        let mut params = Vec::with_capacity(entry.inputs.len());
        for input in &entry.inputs {
            let value = if input.indexed {
                indexed_values.next()
            } else {
                body_values.next()
            };
            let value = value.ok_or_else(|| {
                IndexerError::decoding(format!("{name}: missing value for {}", input.name), None)
            })?;
            params.push(Param {
                name: input.name.clone(),
                value,
            });
        }

        Ok(Some(DecodedEvent {
            address: log.address,
            name,
            params,
            transaction_hash: log.transaction_hash,
            log_index: log.log_index,
        }))
    }
}

fn parse_type(input: &AbiInput) -> IndexerResult<DynSolType> {
    DynSolType::parse(&input.ty).map_err(|e| {
        IndexerError::decoding(
            format!("unsupported ABI type '{}' for {}", input.ty, input.name),
            Some(Box::new(e)),
        )
    })
}

/// Indexed parameter: static types are decoded from the 32-byte word, dynamic
/// types only survive as their keccak hash.
fn decode_topic(input: &AbiInput, topic: &B256) -> IndexerResult<Value> {
    let ty = parse_type(input)?;
    if static_words(&ty).is_none() {
        return Ok(Value::Bytes(Bytes::copy_from_slice(topic.as_slice())));
    }
    let value = ty.abi_decode(topic.as_slice()).map_err(|e| {
        IndexerError::decoding(
            format!("invalid topic for {} ({})", input.name, input.ty),
            Some(Box::new(e)),
        )
    })?;
    Ok(to_value(value))
}

/// Non-indexed parameters, decoded sequentially from the data payload.
fn decode_data(name: &str, inputs: &[&AbiInput], data: &Bytes) -> IndexerResult<Vec<Value>> {
    let types = inputs
        .iter()
        .map(|input| parse_type(input))
        .collect::<IndexerResult<Vec<_>>>()?;

    let mut head_words = 0;
    let mut all_static = true;
    for ty in &types {
        if let Some(words) = static_words(ty) {
            head_words += words;
        } else {
            head_words += 1;
            all_static = false;
        }
    }
    let head_len = head_words * 32;
    let layout_matches = if all_static {
        data.len() == head_len
    } else {
        data.len() >= head_len && data.len() % 32 == 0
    };
    if !layout_matches {
        return Err(IndexerError::decoding(
            format!(
                "{name}: data length {} does not match the declared layout ({head_len} byte head)",
                data.len()
            ),
            None,
        ));
    }
    if types.is_empty() {
        return Ok(Vec::new());
    }

    let decoded = DynSolType::Tuple(types)
        .abi_decode_sequence(data)
        .map_err(|e| IndexerError::decoding(format!("{name}: invalid data"), Some(Box::new(e))))?;
    match decoded {
        DynSolValue::Tuple(values) => Ok(values.into_iter().map(to_value).collect()),
        other => Ok(vec![to_value(other)]),
    }
}

/// Head size in words of a static type, `None` for dynamic types.
fn static_words(ty: &DynSolType) -> Option<usize> {
    match ty {
        DynSolType::Bool
        | DynSolType::Int(_)
        | DynSolType::Uint(_)
        | DynSolType::FixedBytes(_)
        | DynSolType::Address
        | DynSolType::Function => Some(1),
        DynSolType::FixedArray(inner, len) => static_words(inner).map(|words| words * len),
        DynSolType::Tuple(members) => members.iter().map(static_words).sum(),
        _ => None,
    }
}

fn to_value(value: DynSolValue) -> Value {
    match value {
        DynSolValue::Address(address) => Value::Address(address),
        DynSolValue::Uint(uint, _) => {
            Value::Int(BigInt::from_bytes_be(Sign::Plus, &uint.to_be_bytes::<32>()))
        }
        DynSolValue::Int(int, _) => {
            Value::Int(BigInt::from_signed_bytes_be(&int.to_be_bytes::<32>()))
        }
        DynSolValue::Bool(flag) => Value::Int(BigInt::from(u8::from(flag))),
        DynSolValue::FixedBytes(word, size) => Value::Bytes(Bytes::copy_from_slice(&word[..size])),
        DynSolValue::Bytes(bytes) => Value::Bytes(bytes.into()),
        DynSolValue::String(text) => Value::Bytes(text.into_bytes().into()),
        DynSolValue::Array(values)
        | DynSolValue::FixedArray(values)
        | DynSolValue::Tuple(values) => Value::List(values.into_iter().map(to_value).collect()),
        other => Value::Bytes(other.abi_encode().into()),
    }
}
