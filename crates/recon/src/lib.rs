//! `itcmatch-recon`: layered input-tax-credit reconciliation engine.
//!
//! Matches purchase-register invoices against GSTR-2B rows through eight
//! progressively looser layers. The engine receives pre-loaded records and
//! returns per-record dispositions, an audit log and statistics. The `load`
//! module is a thin CSV adapter for callers that start from files.

pub mod audit;
pub mod clubbing;
pub mod config;
pub mod engine;
pub mod error;
pub mod fuzzy;
pub mod index;
pub mod keys;
pub mod layers;
pub mod load;
pub mod model;
pub mod stats;
pub mod tolerance;

pub use config::ReconConfig;
pub use engine::{run, run_with_cancel, CancelToken};
pub use error::ReconError;
pub use model::{InvoiceRecord, MatchStatus, ReconInput, ReconResult, RemarkCode};
