//! Blob transports.
//!
//! The [`backend::BlobTransport`] trait abstracts over the object storage
//! service.  Implementations are the Azure Blob REST client and an
//! in-memory store; [`client::ClientCache`] memoizes the Azure client for
//! one configuration snapshot.

pub mod azure;
pub mod backend;
pub mod client;
pub mod memory;
