//! Blob storage backends.
//!
//! The [`backend::BlobStore`] trait abstracts over where image bytes
//! physically live.  Implementations include local disk, an in-memory map,
//! and the Firebase Storage REST API.

pub mod backend;
pub mod firebase;
pub mod local;
pub mod memory;
