//! Storecheck backends - drivers for the supported data-store families
//!
//! Each family implements [`storecheck_core::Adapter`] over its native
//! client and sits behind a cargo feature:
//!
//! | Feature         | Family          | Driver                         |
//! |-----------------|-----------------|--------------------------------|
//! | `clickhouse`    | ColumnStore     | HTTP interface via `reqwest`   |
//! | `tidb`          | RelationalStore | MySQL protocol via `sqlx`      |
//! | `tikv`          | RawKVStore      | `tikv-client` raw API          |
//! | `elasticsearch` | DocumentStore   | REST API via `reqwest`         |
//!
//! [`ConnectionEstablisher`] picks the driver for a
//! [`storecheck_core::BackendConfig`], loads its TLS material and hands back a
//! pinged session.

pub mod classify;
pub mod establish;
pub mod tls;

#[cfg(any(feature = "clickhouse", feature = "elasticsearch"))]
pub mod http;

#[cfg(feature = "clickhouse")]
pub mod clickhouse;
#[cfg(feature = "elasticsearch")]
pub mod elasticsearch;
#[cfg(feature = "tidb")]
pub mod tidb;
#[cfg(feature = "tikv")]
pub mod tikv;

pub use establish::{is_available, ConnectionEstablisher};
pub use tls::TlsMaterial;
