//! # Reconciliation Core
//!
//! A double-entry bank reconciliation library: import bank statements,
//! match statement lines against internal financial records, record manual
//! adjustments, and drive a reconciliation session through a strict
//! completed/locked/reopened lifecycle with a full audit trail.
//!
//! ## Features
//!
//! - **Statement import**: CSV, OFX, and QIF parsing into a canonical line
//!   format with deterministic duplicate detection
//! - **Transaction matching**: confidence-scored auto-matching plus manual
//!   matches against payments, invoices, journal entries, and bill payments
//! - **Adjustments**: bank fees, interest, write-offs, and timing
//!   differences with sign-polarity enforcement and optional journal posting
//! - **Lifecycle**: variance-gated completion, locking, and reasoned
//!   reopening with compare-and-swap transitions
//! - **Reporting**: summary, variance-analysis, and audit-trail reports
//!   with JSON-canonical export to CSV and print formats
//! - **Storage abstraction**: database-agnostic design with trait-based
//!   storage and collaborator interfaces
//!
//! ## Quick Start
//!
//! ```rust
//! use reconciliation_core::{ReconciliationLifecycle, utils::memory_storage::MemoryStorage};
//!
//! // The engines are generic over storage - use MemoryStorage for tests
//! // and development, or implement ReconciliationStorage for a real store.
//! let storage = MemoryStorage::new();
//! let mut lifecycle = ReconciliationLifecycle::new(storage);
//! ```

pub mod adjustment;
pub mod lifecycle;
pub mod matching;
pub mod reporting;
pub mod statement;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use adjustment::*;
pub use lifecycle::*;
pub use matching::*;
pub use reporting::*;
pub use statement::*;
pub use traits::*;
pub use types::*;
