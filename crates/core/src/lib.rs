//! `stockledger-core`: tenant-scoping building blocks.
//!
//! This crate contains **pure** primitives shared by every layer (no IO).

pub mod error;
pub mod id;
pub mod tenant;

pub use error::{DomainError, DomainResult};
pub use id::{LocationId, TenantId};
pub use tenant::{Role, TenantContext};
