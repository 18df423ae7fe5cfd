// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The error taxonomy for this crate, and the [`Result`] alias built on it.

use crate::metadata::RoleType;
use chrono::{DateTime, Utc};
use snafu::Snafu;

/// The result type used throughout this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong while admitting metadata, resolving a delegation, or serving a
/// target download.
///
/// `RollbackAttack`, `SignatureVerificationFailed`, and `IntegrityFailure` are the variants a
/// caller should treat as security events rather than transient failures - see this crate's
/// top-level documentation for guidance on logging them distinctly.
// `pub`, not `pub(crate)`: a [`crate::updater::Fetcher`] or [`crate::updater::Cache`]
// implementation lives outside this crate and must be able to construct `Transport`/`NotFound`/
// `Timeout`/`OversizedTarget` itself to report what happened on the wire - the same reason
// `tough::transport::TransportError` makes its own selector `pub`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
#[non_exhaustive]
pub enum Error {
    /// The document could not be parsed as JSON at all.
    #[snafu(display("failed to parse {role} metadata as JSON: {source}"))]
    MalformedJson {
        role: RoleType,
        source: serde_json::Error,
    },

    /// The document parsed as JSON but violated a structural rule of the metadata model.
    #[snafu(display("malformed {role} metadata: {message}"))]
    MalformedMetadata { role: RoleType, message: String },

    /// `spec_version` on the document is not a major version this client understands.
    #[snafu(display(
        "unsupported spec_version {spec_version:?} for {role} metadata (wanted major version {wanted_major})"
    ))]
    UnsupportedSpecVersion {
        role: RoleType,
        spec_version: String,
        wanted_major: u32,
    },

    /// A key or signature named a `(keytype, scheme)` pair this client does not implement.
    #[snafu(display("unsupported key scheme: keytype={keytype:?} scheme={scheme:?}"))]
    UnsupportedScheme { keytype: String, scheme: String },

    /// At least one signature claiming to cover `role` failed cryptographic verification.
    #[snafu(display("signature verification failed for {role} metadata"))]
    SignatureVerificationFailed { role: RoleType },

    /// Fewer valid signatures were present than the role's threshold requires.
    #[snafu(display(
        "insufficient signatures on {role}: required {required}, got {got}"
    ))]
    InsufficientSignatures {
        role: RoleType,
        required: u64,
        got: u64,
    },

    /// `role`'s metadata has already expired as of `expired_at`.
    #[snafu(display("{role} metadata expired at {expired_at}"))]
    ExpiredMetadata {
        role: RoleType,
        expired_at: DateTime<Utc>,
    },

    /// A newly fetched document has the exact same version as the one already trusted.
    #[snafu(display("{role} metadata has the same version as the currently trusted copy ({version}); treating an unchanged download as a freshness failure"))]
    EqualVersionNumber { role: RoleType, version: u64 },

    /// A newly fetched document has a version number lower than the one already trusted.
    #[snafu(display(
        "rollback attack detected on {role}: trusted version {prev}, got version {got}"
    ))]
    RollbackAttack {
        role: RoleType,
        prev: u64,
        got: u64,
    },

    /// A metadata document exceeded its role's configured size ceiling before being parsed.
    #[snafu(display("{role} metadata exceeded the size limit of {limit} bytes"))]
    OversizedMetadata { role: RoleType, limit: u64 },

    /// A target download exceeded the length declared for it in the trusted `Targets` metadata.
    #[snafu(display("target {path:?} exceeded the expected length of {limit} bytes"))]
    OversizedTarget { path: String, limit: u64 },

    /// A downloaded target's length or digest did not match the trusted `TargetFile` entry.
    #[snafu(display("integrity failure for target {path:?}: {kind}"))]
    IntegrityFailure {
        path: String,
        kind: IntegrityFailureKind,
    },

    /// A [`crate::crypto::Signer`] failed to produce a signature over a role being built.
    #[snafu(display("failed to sign {role} metadata"))]
    SigningFailed { role: RoleType },

    /// A delegated role name was referenced that does not exist in its parent's delegations.
    #[snafu(display("unknown role {name:?} referenced as a delegation of {parent}"))]
    UnknownRole { name: String, parent: RoleType },

    /// The delegation resolver exceeded its configured depth or total-roles-visited bound.
    #[snafu(display("delegation resolution exceeded its configured limits while looking for {path:?}"))]
    DelegationLimitExceeded { path: String },

    /// Exactly one of `paths`/`path_hash_prefixes` is required on a delegated role; neither or
    /// both were present.
    #[snafu(display("delegated role {name:?} must set exactly one of paths/path_hash_prefixes"))]
    AmbiguousDelegationMatcher { name: String },

    /// Transport-layer failure surfaced by a [`crate::updater::Fetcher`] implementation.
    #[snafu(display("transport error fetching {url}: {source}"))]
    Transport {
        url: String,
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// The requested resource does not exist on the remote repository.
    #[snafu(display("not found: {url}"))]
    NotFound { url: String },

    /// A fetch did not complete before its caller-provided deadline.
    #[snafu(display("timed out fetching {url}"))]
    Timeout { url: String },

    /// An [`crate::updater::Updater`] method that requires a completed `refresh()` was called
    /// before one succeeded.
    #[snafu(display("refresh() has not yet completed successfully"))]
    NotInitialized,

    /// The repository builder was asked to sign a role without a signer whose key is trusted for
    /// that role.
    #[snafu(display("no signer was provided for role {role} (or delegation {delegation:?})"))]
    IncompleteSignerSet {
        role: RoleType,
        delegation: Option<String>,
    },

    /// Failed to canonically encode a value for hashing or signing.
    #[snafu(display("failed to canonically encode {what}: {source}"))]
    CanonicalEncode {
        what: String,
        source: serde_json::Error,
    },

    /// Failed to parse a PEM/PKCS8-encoded key.
    #[snafu(display("failed to parse key material: {message}"))]
    KeyParse { message: String },

    /// A verified target's bytes could not be written to the caller-requested `local_dest`.
    #[snafu(display("failed to write target to {}: {source}", path.display()))]
    LocalWrite {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
}

/// The specific kind of integrity mismatch reported by [`Error::IntegrityFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityFailureKind {
    /// The downloaded content's length did not match.
    Length,
    /// A declared digest did not match the downloaded content.
    Hash,
}

impl std::fmt::Display for IntegrityFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegrityFailureKind::Length => write!(f, "length mismatch"),
            IntegrityFailureKind::Hash => write!(f, "hash mismatch"),
        }
    }
}
