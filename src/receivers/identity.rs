//! Identity rules: how to locate the entity an event touched.
//!
//! Both the apply and the rollback path resolve the same [`IdentityRule`]
//! against the decoded event, so the entity written by `save` is exactly the
//! entity `rollback` will look for.

use alloy::primitives::{Address, Bytes};
use num_bigint::BigInt;
use std::fmt;

use crate::abi::{BlockInfo, DecodedEvent, Value};
use crate::error::{IndexerError, IndexerResult};

/// Field name used by simple rules.
pub const PRIMARY_KEY: &str = "pk";

/// Fields of the log itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootField {
    /// Emitting contract
    Address,
    /// Emitting transaction
    TransactionHash,
    /// Position of the log in its block
    LogIndex,
}

/// Fields of the block the log was mined in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockField {
    /// Block number
    Number,
    /// Block timestamp
    Timestamp,
}

/// Where one component of an identity comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// A field of the log
    Root(RootField),
    /// A named event parameter
    Param(&'static str),
    /// A field of the block context
    Block(BlockField),
}

impl KeySource {
    fn resolve(self, event: &DecodedEvent, block: BlockInfo) -> IndexerResult<Value> {
        Ok(match self {
            Self::Root(RootField::Address) => Value::Address(event.address),
            Self::Root(RootField::TransactionHash) => {
                Value::Bytes(Bytes::copy_from_slice(event.transaction_hash.as_slice()))
            }
            Self::Root(RootField::LogIndex) => Value::from(event.log_index),
            Self::Param(name) => event.param(name)?.clone(),
            Self::Block(BlockField::Number) => Value::from(block.number),
            Self::Block(BlockField::Timestamp) => Value::from(block.timestamp),
        })
    }
}

/// How an event identifies the entity it affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityRule {
    /// One field identifies the entity directly
    Simple(KeySource),
    /// Entity field → event field; every component must resolve
    Composite(&'static [(&'static str, KeySource)]),
}

impl IdentityRule {
    /// Evaluate the rule.
    ///
    /// # Errors
    ///
    /// Returns a validation error if a referenced parameter is missing.
    pub fn resolve(&self, event: &DecodedEvent, block: BlockInfo) -> IndexerResult<EntityKey> {
        let fields = match self {
            Self::Simple(source) => vec![(PRIMARY_KEY, source.resolve(event, block)?)],
            Self::Composite(components) => components
                .iter()
                .map(|(field, source)| Ok((*field, source.resolve(event, block)?)))
                .collect::<IndexerResult<Vec<_>>>()?,
        };
        Ok(EntityKey { fields })
    }
}

/// A resolved identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityKey {
    fields: Vec<(&'static str, Value)>,
}

impl EntityKey {
    /// Component value by entity field name.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the rule has no such field.
    pub fn get(&self, field: &str) -> IndexerResult<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, value)| value)
            .ok_or_else(|| IndexerError::validation(format!("Identity has no field '{field}'")))
    }

    /// Address component.
    ///
    /// # Errors
    ///
    /// Returns a validation error if absent or not an address.
    pub fn address(&self, field: &str) -> IndexerResult<Address> {
        self.get(field)?
            .as_address()
            .ok_or_else(|| {
                IndexerError::validation(format!("Identity field '{field}' is not an address"))
            })
    }

    /// Integer component.
    ///
    /// # Errors
    ///
    /// Returns a validation error if absent or not an integer.
    pub fn int(&self, field: &str) -> IndexerResult<&BigInt> {
        self.get(field)?
            .as_int()
            .ok_or_else(|| {
                IndexerError::validation(format!("Identity field '{field}' is not an integer"))
            })
    }

    /// The address of a simple rule.
    ///
    /// # Errors
    ///
    /// Returns a validation error for composite keys or non-address values.
    pub fn primary_address(&self) -> IndexerResult<Address> {
        self.address(PRIMARY_KEY)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fields.as_slice() {
            [(PRIMARY_KEY, value)] => write!(f, "{value}"),
            fields => {
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{name}={value}")?;
                }
                Ok(())
            }
        }
    }
}
