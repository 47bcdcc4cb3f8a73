//! # Tessera Resolver
//!
//! Turns module specifiers into runnable, integrity-checked module code.
//!
//! - [`ManifestResolver`] maps specifiers to URLs through the plan manifest
//! - [`HedgedFetcher`] fetches with mirror fallback, retries and staggered hedging
//! - [`verify_integrity`] checks SRI digests
//! - [`Materializer`] wraps payloads as importable modules and inlines script imports

pub mod backoff;
pub mod config;
pub mod error;
pub mod fetch;
pub mod integrity;
pub mod materialize;
pub mod resolve;

pub use backoff::LinearBackoff;
pub use config::FetchConfig;
pub use error::{FetchError, IntegrityError, MaterializeError};
pub use fetch::{decode_data_uri, FetchedModule, HedgedFetcher, HttpFetcher, ModuleFetcher, StaticFetcher};
pub use integrity::{integrity_for, parse_integrity, verify_integrity, DigestAlgorithm, IntegrityDigest};
pub use materialize::{classify_content, to_data_uri, ContentKind, ImportResolver, MaterializedModule, Materializer};
pub use resolve::{ManifestResolver, ResolveUsage};
