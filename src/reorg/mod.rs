//! Chain reorganization detection.
//!
//! This module keeps the indexer consistent with the canonical chain by:
//! - Recording the hash of every applied block (the last `REORG_WINDOW` of them)
//! - Comparing the newest recorded hash with the node before each tick
//! - Binary searching the recorded window for the last common ancestor
//!
//! The undo itself lives in [`crate::rollback`].
//!
//! ## How It Works
//!
//! 1. **Block Hash Chain**: each applied block's hash is stored in `block_records`
//!    in the same transaction as its events
//! 2. **Tip Verification**: before fetching new blocks the newest record is
//!    checked against the node
//! 3. **Fork Point Detection**: on mismatch, binary search the window for the
//!    highest block whose hash still matches
//! 4. **Rewind and Reprocess**: ledgered events above the fork point are undone
//!    and the cursor rewinds, so the next tick re-indexes the new branch
//!
//! ## Reorg Frequency on Ethereum
//!
//! - 1-block reorgs: Several times per day
//! - 2-3 block reorgs: Multiple times per week
//! - Finalized blocks (2 epochs = ~12.8 min): Considered permanent

pub mod detector;

pub use detector::{BlockRecord, ReorgDetector};
