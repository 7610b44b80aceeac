//! Watch registry: which contracts are indexed, and at which addresses.
//!
//! Each [`WatchEntry`] binds a [`ContractRole`] (selecting both the bundled ABI
//! and the receiver) to an [`AddressSource`]. Factories are watched at static,
//! configured addresses; the contracts they create are watched dynamically by
//! querying the entities already indexed. Dynamic lookups always run on the
//! tick's own database connection, so a market created earlier in the same
//! tick is visible to the trades that follow it.
//!
//! ## Configuration
//!
//! ```json
//! [
//!   {"name": "OracleFactory", "role": "centralized_oracle_factory",
//!    "addresses": ["0xb3289eaac0fe3ed15df177f925c6f8ceeb908b8f"]},
//!   {"name": "Markets", "role": "market", "addressesGetter": "markets",
//!    "publish": true, "publishUnder": "markets"}
//! ]
//! ```

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::abi::contracts::abi_for;
use crate::abi::decoder::Decoder;
use crate::abi::BlockInfo;
use crate::db::models::{address_key, parse_address, sql_int};
use crate::error::{IndexerError, IndexerResult};

/// Kind of contract a watch entry covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractRole {
    /// Creates centralized oracles
    CentralizedOracleFactory,
    /// Creates categorical and scalar events
    EventFactory,
    /// Creates standard markets
    StandardMarketFactory,
    /// A centralized oracle
    CentralizedOracle,
    /// A categorical or scalar event
    Event,
    /// An outcome token of an event
    OutcomeToken,
    /// A standard LMSR market
    Market,
    /// The tournament's play-money token
    TournamentToken,
    /// Tournament participant registry
    AddressRegistry,
}

impl ContractRole {
    /// Every role, factories first.
    pub const ALL: [Self; 9] = [
        Self::CentralizedOracleFactory,
        Self::EventFactory,
        Self::StandardMarketFactory,
        Self::CentralizedOracle,
        Self::Event,
        Self::OutcomeToken,
        Self::Market,
        Self::TournamentToken,
        Self::AddressRegistry,
    ];

    /// Configuration name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CentralizedOracleFactory => "centralized_oracle_factory",
            Self::EventFactory => "event_factory",
            Self::StandardMarketFactory => "standard_market_factory",
            Self::CentralizedOracle => "centralized_oracle",
            Self::Event => "event",
            Self::OutcomeToken => "outcome_token",
            Self::Market => "market",
            Self::TournamentToken => "tournament_token",
            Self::AddressRegistry => "address_registry",
        }
    }
}

impl fmt::Display for ContractRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContractRole {
    type Err = IndexerError;

    fn from_str(s: &str) -> IndexerResult<Self> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| IndexerError::config(format!("Unknown contract role '{s}'"), None))
    }
}

/// Already-indexed entities whose addresses are watched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DynamicSource {
    /// Every indexed centralized oracle
    CentralizedOracles,
    /// Every indexed event contract
    Events,
    /// Every indexed outcome token
    OutcomeTokens,
    /// Every indexed market
    Markets,
}

impl DynamicSource {
    /// Table holding the addresses.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::CentralizedOracles => "centralized_oracles",
            Self::Events => "event_contracts",
            Self::OutcomeTokens => "outcome_tokens",
            Self::Markets => "markets",
        }
    }
}

/// Where a watch entry gets its addresses from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressSource {
    /// Fixed at load time
    Static(BTreeSet<Address>),
    /// Queried from indexed entities on every check
    Dynamic(DynamicSource),
}

/// One watched contract family. Read-only during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEntry {
    /// Display name
    pub name: String,
    /// Selects the ABI and the receiver
    pub role: ContractRole,
    /// Address source
    pub source: AddressSource,
    /// Whether consumers should be notified of applied events
    pub publish: bool,
    /// Optional notification group
    pub publish_under: Option<String>,
}

/// Raw JSON shape of a watch entry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct WatchEntryConfig {
    name: String,
    role: ContractRole,
    #[serde(default)]
    addresses: Option<Vec<Address>>,
    #[serde(default)]
    addresses_getter: Option<DynamicSource>,
    #[serde(default)]
    publish: bool,
    #[serde(default)]
    publish_under: Option<String>,
}

impl TryFrom<WatchEntryConfig> for WatchEntry {
    type Error = IndexerError;

    fn try_from(raw: WatchEntryConfig) -> IndexerResult<Self> {
        let source = match (raw.addresses, raw.addresses_getter) {
            (Some(addresses), None) => AddressSource::Static(addresses.into_iter().collect()),
            (None, Some(getter)) => AddressSource::Dynamic(getter),
            _ => {
                return Err(IndexerError::config(
                    format!(
                        "Watch entry '{}' needs exactly one of 'addresses' or 'addressesGetter'",
                        raw.name
                    ),
                    None,
                ))
            }
        };
        Ok(Self {
            name: raw.name,
            role: raw.role,
            source,
            publish: raw.publish,
            publish_under: raw.publish_under,
        })
    }
}

/// The configured watch entries and a decoder loaded with their ABIs.
#[derive(Debug, Clone)]
pub struct WatchRegistry {
    entries: Vec<WatchEntry>,
    decoder: Decoder,
}

impl WatchRegistry {
    /// Build a registry, registering the ABI of every entry's role.
    ///
    /// # Errors
    ///
    /// Returns a decoding error if a bundled ABI is malformed.
    pub fn new(entries: Vec<WatchEntry>) -> IndexerResult<Self> {
        let mut decoder = Decoder::new();
        let mut roles: Vec<ContractRole> = entries.iter().map(|entry| entry.role).collect();
        roles.sort_unstable();
        roles.dedup();
        for role in roles {
            let registered = decoder.register_abi(&abi_for(role)?);
            debug!(%role, registered, "Registered contract ABI");
        }
        Ok(Self { entries, decoder })
    }

    /// Parse a JSON watch configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for malformed JSON or invalid entries.
    pub fn from_json(json: &str) -> IndexerResult<Self> {
        let raw: Vec<WatchEntryConfig> = serde_json::from_str(json).map_err(|e| {
            IndexerError::config("Failed to parse watch configuration", Some(Box::new(e)))
        })?;
        let entries = raw
            .into_iter()
            .map(WatchEntry::try_from)
            .collect::<IndexerResult<Vec<_>>>()?;
        Self::new(entries)
    }

    /// Load the watch configuration file.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> IndexerResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            IndexerError::config(
                format!("Failed to read watch configuration {}", path.display()),
                Some(Box::new(e)),
            )
        })?;
        let registry = Self::from_json(&json)?;
        info!(
            path = %path.display(),
            entries = registry.entries.len(),
            "Watch configuration loaded"
        );
        Ok(registry)
    }

    /// Configured entries in configuration order.
    #[must_use]
    pub fn entries(&self) -> &[WatchEntry] {
        &self.entries
    }

    /// Decoder holding the ABIs of every configured role.
    #[must_use]
    pub const fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// Every address `entry` watches as of `block`.
    ///
    /// # Errors
    ///
    /// Returns a database error if a dynamic query fails.
    pub async fn addresses_for(
        &self,
        entry: &WatchEntry,
        block: BlockInfo,
        conn: &mut SqliteConnection,
    ) -> IndexerResult<BTreeSet<Address>> {
        match &entry.source {
            AddressSource::Static(addresses) => Ok(addresses.clone()),
            AddressSource::Dynamic(source) => {
                let rows: Vec<(String,)> = sqlx::query_as(&format!(
                    "SELECT address FROM {} WHERE creation_block <= ? ORDER BY address",
                    source.table()
                ))
                .bind(sql_int(block.number))
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| {
                    IndexerError::database(
                        format!("Failed to resolve addresses for {}", entry.name),
                        Some(Box::new(e)),
                    )
                })?;
                rows.iter().map(|(raw,)| parse_address(raw)).collect()
            }
        }
    }

    /// Whether `entry` watches `address` as of `block`.
    ///
    /// # Errors
    ///
    /// Returns a database error if a dynamic membership query fails.
    pub async fn is_watched(
        &self,
        entry: &WatchEntry,
        address: Address,
        block: BlockInfo,
        conn: &mut SqliteConnection,
    ) -> IndexerResult<bool> {
        match &entry.source {
            AddressSource::Static(addresses) => Ok(addresses.contains(&address)),
            AddressSource::Dynamic(source) => {
                let (exists,): (bool,) = sqlx::query_as(&format!(
                    "SELECT EXISTS (SELECT 1 FROM {} WHERE address = ? AND creation_block <= ?)",
                    source.table()
                ))
                .bind(address_key(&address))
                .bind(sql_int(block.number))
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| {
                    IndexerError::database(
                        format!("Failed to check watch membership for {}", entry.name),
                        Some(Box::new(e)),
                    )
                })?;
                Ok(exists)
            }
        }
    }

    /// Entries watching `address`, in configuration order.
    ///
    /// # Errors
    ///
    /// Returns a database error if a dynamic membership query fails.
    pub async fn entries_watching(
        &self,
        address: Address,
        block: BlockInfo,
        conn: &mut SqliteConnection,
    ) -> IndexerResult<Vec<&WatchEntry>> {
        let mut matching = Vec::new();
        for entry in &self.entries {
            if self.is_watched(entry, address, block, conn).await? {
                matching.push(entry);
            }
        }
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_pool;
    use alloy::primitives::address;
    use std::io::Write;

    const CONFIG: &str = r#"[
        {"name": "OracleFactory", "role": "centralized_oracle_factory",
         "addresses": ["0x00000000000000000000000000000000000000f1"]},
        {"name": "Oracles", "role": "centralized_oracle", "addressesGetter": "centralized_oracles",
         "publish": true, "publishUnder": "oracles"}
    ]"#;

    #[test]
    fn test_role_round_trip() {
        for role in ContractRole::ALL {
            assert_eq!(role.as_str().parse::<ContractRole>().unwrap(), role);
        }
        assert!("exchange".parse::<ContractRole>().is_err());
    }

    #[test]
    fn test_parse_config() {
        let registry = WatchRegistry::from_json(CONFIG).unwrap();
        let entries = registry.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, ContractRole::CentralizedOracleFactory);
        assert!(matches!(&entries[0].source, AddressSource::Static(set) if set.len() == 1));
        assert!(!entries[0].publish);
        assert_eq!(entries[1].source, AddressSource::Dynamic(DynamicSource::CentralizedOracles));
        assert_eq!(entries[1].publish_under.as_deref(), Some("oracles"));
        assert!(!registry.decoder().is_empty());
    }

    #[test]
    fn test_entry_needs_exactly_one_source() {
        let both =
            r#"[{"name": "x", "role": "market", "addresses": [], "addressesGetter": "markets"}]"#;
        let neither = r#"[{"name": "x", "role": "market"}]"#;
        assert!(WatchRegistry::from_json(both).is_err());
        assert!(WatchRegistry::from_json(neither).is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();
        let registry = WatchRegistry::from_file(file.path()).unwrap();
        assert_eq!(registry.entries().len(), 2);

        assert!(WatchRegistry::from_file(Path::new("/nonexistent/watch.json")).is_err());
    }

    #[tokio::test]
    async fn test_dynamic_source_sees_uncommitted_rows() {
        let pool = create_memory_pool().await.unwrap();
        let registry = WatchRegistry::from_json(CONFIG).unwrap();
        let oracles = &registry.entries()[1];
        let oracle = address!("00000000000000000000000000000000000000a1");

        let mut tx = pool.begin().await.unwrap();
        let at = |number| BlockInfo::new(number, 0);
        assert!(!registry.is_watched(oracles, oracle, at(10), &mut tx).await.unwrap());

        sqlx::query(
            "INSERT INTO centralized_oracles
                (address, factory, creator, owner, ipfs_hash, creation_block, creation_timestamp)
             VALUES (?, '0x00', '0x00', '0x00', '0x', 10, 0)",
        )
        .bind(address_key(&oracle))
        .execute(&mut *tx)
        .await
        .unwrap();

        assert!(registry.is_watched(oracles, oracle, at(10), &mut tx).await.unwrap());
        assert!(!registry.is_watched(oracles, oracle, at(9), &mut tx).await.unwrap());
        let addresses = registry.addresses_for(oracles, at(11), &mut tx).await.unwrap();
        assert!(addresses.contains(&oracle));

        let watching = registry.entries_watching(oracle, at(10), &mut tx).await.unwrap();
        assert_eq!(watching.len(), 1);
        assert_eq!(watching[0].name, "Oracles");
    }
}
