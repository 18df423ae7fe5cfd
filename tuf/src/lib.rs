// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `tuf` is a client implementation of [The Update Framework][spec], the trust engine that turns
//! a stream of untrusted, network-delivered metadata documents into a monotonically advancing,
//! cryptographically verified trusted metadata set, and then uses that set to authorize and
//! integrity-check downloaded target files.
//!
//! The crate is organized around the flow described in its own design notes:
//!
//! * [`metadata`] is the typed representation of the four TUF roles (and their shared envelope).
//! * [`crypto`] identifies keys and verifies (or, for [`builder`], produces) their signatures.
//! * [`trust`] is [`trust::TrustedMetadataSet`], the security kernel: the state machine that
//!   decides whether a freshly fetched document is admitted.
//! * [`delegation`] walks the DAG of delegated targets roles to locate a requested path.
//! * [`updater`] is [`updater::Updater`], the orchestrator that drives a [`updater::Fetcher`]
//!   through a full metadata refresh and exposes target lookup/download to callers.
//! * [`multi_repo`] is the TAP 4 multiple-repository consensus client, composing one `Updater`
//!   per configured repository under a path-mapping policy.
//! * [`builder`] produces a fully signed, internally consistent four-role metadata set from the
//!   producing side - useful for tests and for anyone standing up a new repository.
//!
//! This crate does not ship an HTTP transport, a CLI, or an on-disk cache layout; those are
//! reduced to the [`updater::Fetcher`] and [`updater::Cache`] trait boundaries so this crate's
//! surface stays the trust logic itself.
//!
//! # Testing
//!
//! Unit tests live alongside the modules they cover. Integration tests exercising the full
//! `Updater`/`MultiRepoClient` flow against in-memory `Fetcher`/`Cache` doubles live under
//! `tests/`; run them with `cargo test`.
//!
//! [spec]: https://theupdateframework.github.io/specification/latest/

#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc
)]

pub mod builder;
pub mod crypto;
pub mod delegation;
pub mod error;
pub mod metadata;
pub mod multi_repo;
pub mod trust;
pub mod updater;

pub use crate::error::{Error, Result};
