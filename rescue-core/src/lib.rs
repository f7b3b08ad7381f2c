#![crate_name = "lightning_rescue"]

//! Recovery of funds locked in time-locked Lightning commitment outputs.
//!
//! The pieces fit together bottom-up: [`keys`] walks the node's key tree,
//! [`shachain`] rebuilds the per-state revocation secrets, [`matcher`] and
//! [`search`] brute force the parameters of an on-chain output, and
//! [`tx::sweep`] builds and signs the spending transaction.
//! See [`recovery`] for the procedure-level entry points.

#![forbid(unsafe_code)]
#![allow(bare_trait_objects)]
#![warn(rustdoc::broken_intra_doc_links)]
#![warn(missing_docs)]

pub use bitcoin;
pub use lightning;

/// Various utilities
#[macro_use]
pub mod util;

/// Explicit network/secp context
pub mod context;
/// Key tree derivation
pub mod keys;
/// Script/output matching over relative timeouts
pub mod matcher;
/// Recovery procedures
pub mod recovery;
/// Outer brute-force search over key and chain indices
pub mod search;
/// Revocation chain reconstruction
pub mod shachain;
/// Script templates and sweep construction
pub mod tx;
/// Vanity node key generation
pub mod vanity;

pub use context::RecoveryContext;
pub use util::error::{RecoveryError, RecoveryErrorKind};
