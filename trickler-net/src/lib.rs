// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! HTTP-adjacent logic for the OTA pipeline (spec §4.5, §4.6, §6.3).
//!
//! The HTTP server, TCP stack, and DNS resolver themselves are out-of-scope
//! external collaborators (spec §1); this crate only holds the logic that
//! drives [`trickler_common::FirmwareManager`] through them, so it stays
//! `no_std`-constructible even though the `std` feature (host tooling, the
//! test TCP connector) pulls in `std`/`alloc`.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate alloc;

pub mod download_source;
pub mod upload_sink;

#[cfg(feature = "std")]
pub mod rest_api;

pub use download_source::{DownloadError, DownloadSource, DownloadState, TcpConnector};
pub use upload_sink::{UploadError, UploadSink};
