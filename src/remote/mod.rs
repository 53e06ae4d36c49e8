//! Remote music library API.
//!
//! The engine only ever talks to the [`MusicApi`] trait; the HTTP
//! implementation lives in [`client`] and tests substitute their own.

mod client;
mod models;

pub use client::{HttpMusicApi, RemoteSettings};
pub use models::*;
