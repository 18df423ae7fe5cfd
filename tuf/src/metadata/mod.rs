// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The typed representation of TUF metadata documents: [`Root`], [`Timestamp`], [`Snapshot`],
//! [`Targets`], and the [`Key`]/[`Signed`] envelope types shared by all of them.
//!
//! Every role struct keeps an `_extra` bucket of unrecognized fields via `#[serde(flatten)]` so
//! that re-encoding a parsed document (to hash it, or to re-sign it in
//! [`crate::builder`]) reproduces byte-identical canonical output instead of silently dropping
//! fields a newer producer set.

mod de;

use crate::error::{self, Result};
use canonical_json::to_canonical_vec;
use chrono::{DateTime, Utc};
use globset::GlobBuilder;
use log::error as log_error;
use serde::{Deserialize, Serialize};
use serde_plain::{forward_display_to_serde, forward_from_str_to_serde};
use snafu::{OptionExt, ResultExt};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// The four top-level roles, plus the optional `mirrors` role recognized for forward-compatible
/// parsing (see the design notes on why this client implements no admission rule for it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoleType {
    Root,
    Timestamp,
    Snapshot,
    Targets,
    Mirrors,
}

impl RoleType {
    fn as_str(self) -> &'static str {
        match self {
            RoleType::Root => "root",
            RoleType::Timestamp => "timestamp",
            RoleType::Snapshot => "snapshot",
            RoleType::Targets => "targets",
            RoleType::Mirrors => "mirrors",
        }
    }
}

impl fmt::Display for RoleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RoleType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "root" => Ok(RoleType::Root),
            "timestamp" => Ok(RoleType::Timestamp),
            "snapshot" => Ok(RoleType::Snapshot),
            "targets" => Ok(RoleType::Targets),
            "mirrors" => Ok(RoleType::Mirrors),
            other => Err(format!("unrecognized role type {other:?}")),
        }
    }
}

forward_display_to_serde!(RoleType);
forward_from_str_to_serde!(RoleType);

/// A public key as it appears in `root.json`'s `keys` map or a delegation's `delegations.keys`.
///
/// `keytype`/`scheme` are kept as plain strings rather than a closed enum so that a document
/// naming a combination this client does not implement still parses; [`crate::crypto`] is where
/// the supported-combination check (and the resulting [`crate::error::Error::UnsupportedScheme`])
/// lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    pub keytype: String,
    pub scheme: String,
    pub keyval: KeyVal,
    #[serde(flatten)]
    pub _extra: HashMap<String, serde_json::Value>,
}

/// The `keyval` object of a [`Key`]. `public` is either hex (Ed25519) or PEM (RSA/ECDSA) text,
/// disambiguated by `keytype` at verification time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyVal {
    pub public: String,
    #[serde(flatten)]
    pub _extra: HashMap<String, serde_json::Value>,
}

impl Key {
    /// The key's `keyid`: the lowercase hex SHA-256 of the canonical JSON encoding of this key
    /// object.
    pub fn key_id(&self) -> Result<String> {
        let bytes = to_canonical_vec(self).context(error::CanonicalEncodeSnafu {
            what: "key".to_string(),
        })?;
        Ok(hex::encode(aws_lc_rs::digest::digest(
            &aws_lc_rs::digest::SHA256,
            &bytes,
        )))
    }
}

/// One `(keyid, sig)` pair attached to a signed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub keyid: String,
    pub sig: String,
}

/// The signing envelope common to every role: `{ signed: <role>, signatures: [...] }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signed<T> {
    pub signed: T,
    pub signatures: Vec<Signature>,
}

/// Implemented by every top-level/delegated role struct so generic code (signature collection,
/// the builder) can ask a document what kind of role it is and how it expires/versions.
pub trait Role {
    const TYPE: RoleType;
    fn version(&self) -> u64;
    fn expires(&self) -> DateTime<Utc>;
}

/// `{ keyids: [...], threshold: N }`, as it appears under `root.roles.<role>` and on a
/// [`DelegatedRole`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleKeys {
    pub keyids: Vec<String>,
    pub threshold: u64,
    #[serde(flatten)]
    pub _extra: HashMap<String, serde_json::Value>,
}

/// The `root` role: the trust anchor naming every key and threshold for the four top-level
/// roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Root {
    #[serde(rename = "_type")]
    pub _type: RoleType,
    pub spec_version: String,
    #[serde(deserialize_with = "de::deserialize_version")]
    pub version: u64,
    pub expires: DateTime<Utc>,
    #[serde(default)]
    pub consistent_snapshot: bool,
    pub keys: BTreeMap<String, Key>,
    pub roles: BTreeMap<String, RoleKeys>,
    #[serde(flatten)]
    pub _extra: HashMap<String, serde_json::Value>,
}

impl Role for Root {
    const TYPE: RoleType = RoleType::Root;
    fn version(&self) -> u64 {
        self.version
    }
    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }
}

impl Root {
    /// Looks up the keyids/threshold configured for `role`.
    pub fn role_keys(&self, role: RoleType) -> Result<&RoleKeys> {
        self.roles
            .get(role.as_str())
            .context(error::MalformedMetadataSnafu {
                role: RoleType::Root,
                message: format!("root.json has no role entry for {role}"),
            })
    }

    /// Verifies that `checked_against` (some role document) carries at least
    /// `role_keys(role).threshold` valid signatures from `self.keys`.
    pub fn verify_threshold(
        &self,
        role: RoleType,
        signed_bytes: &[u8],
        signatures: &[Signature],
    ) -> Result<()> {
        let role_keys = self.role_keys(role)?;
        verify_threshold_generic(&self.keys, role_keys, role, signed_bytes, signatures)
    }
}

/// Shared by [`Root::verify_threshold`] and [`Delegations`]'s analogous method: counts distinct
/// valid `(keyid, sig)` pairs against a keyid allowlist and compares to a threshold.
pub(crate) fn verify_threshold_generic(
    keys: &BTreeMap<String, Key>,
    role_keys: &RoleKeys,
    role: RoleType,
    signed_bytes: &[u8],
    signatures: &[Signature],
) -> Result<()> {
    use std::collections::HashSet;
    let mut valid_keyids = HashSet::new();
    // Distinct from simply not having enough signatures: at least one signature named a keyid
    // this role trusts but did not cryptographically verify against it, which is the signal a
    // caller should treat as a forgery/tampering attempt rather than an incompletely-signed role.
    let mut saw_invalid = false;
    for sig in signatures {
        if !role_keys.keyids.contains(&sig.keyid) {
            continue;
        }
        if valid_keyids.contains(&sig.keyid) {
            // A keyid counts once even if it signs more than once.
            continue;
        }
        let Some(key) = keys.get(&sig.keyid) else {
            continue;
        };
        if crate::crypto::verify(key, signed_bytes, &sig.sig).unwrap_or(false) {
            valid_keyids.insert(sig.keyid.clone());
        } else {
            saw_invalid = true;
        }
    }
    let got = valid_keyids.len() as u64;
    if got < role_keys.threshold {
        if saw_invalid {
            log_error!("signature verification failed for {role} metadata");
            return error::SignatureVerificationFailedSnafu { role }.fail();
        }
        return error::InsufficientSignaturesSnafu {
            role,
            required: role_keys.threshold,
            got,
        }
        .fail();
    }
    Ok(())
}

/// Per-file metadata as it appears in `timestamp.json`'s and `snapshot.json`'s `meta` maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    #[serde(deserialize_with = "de::deserialize_version")]
    pub version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashes: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub _extra: HashMap<String, serde_json::Value>,
}

/// The `timestamp` role: points at the current `snapshot.json` version/digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timestamp {
    #[serde(rename = "_type")]
    pub _type: RoleType,
    pub spec_version: String,
    #[serde(deserialize_with = "de::deserialize_version")]
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub meta: BTreeMap<String, FileMetadata>,
    #[serde(flatten)]
    pub _extra: HashMap<String, serde_json::Value>,
}

impl Role for Timestamp {
    const TYPE: RoleType = RoleType::Timestamp;
    fn version(&self) -> u64 {
        self.version
    }
    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }
}

impl Timestamp {
    pub fn snapshot_meta(&self) -> Result<&FileMetadata> {
        self.meta
            .get("snapshot.json")
            .context(error::MalformedMetadataSnafu {
                role: RoleType::Timestamp,
                message: "timestamp.json is missing the snapshot.json entry".to_string(),
            })
    }
}

/// The `snapshot` role: pins the version (and optionally length/hashes) of every other metadata
/// file in the repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "_type")]
    pub _type: RoleType,
    pub spec_version: String,
    #[serde(deserialize_with = "de::deserialize_version")]
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub meta: BTreeMap<String, FileMetadata>,
    #[serde(flatten)]
    pub _extra: HashMap<String, serde_json::Value>,
}

impl Role for Snapshot {
    const TYPE: RoleType = RoleType::Snapshot;
    fn version(&self) -> u64 {
        self.version
    }
    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }
}

/// One file entry in a `targets` role's `targets` map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetFile {
    pub length: u64,
    pub hashes: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Value>,
    #[serde(flatten)]
    pub _extra: HashMap<String, serde_json::Value>,
}

impl TargetFile {
    /// Equality used for multi-repository consensus grouping: `length` and `hashes`, ignoring
    /// `custom` and any other field.
    pub fn consensus_eq(&self, other: &TargetFile) -> bool {
        self.length == other.length && self.hashes == other.hashes
    }
}

/// A single entry in a `targets` role's `delegations.roles` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegatedRole {
    pub name: String,
    pub keyids: Vec<String>,
    pub threshold: u64,
    #[serde(default)]
    pub terminating: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_hash_prefixes: Option<Vec<String>>,
    #[serde(flatten)]
    pub _extra: HashMap<String, serde_json::Value>,
}

impl DelegatedRole {
    /// Evaluates whether this delegated role's `paths`/`path_hash_prefixes` matcher covers
    /// `path`, per the non-recursive `fnmatch`-style rule this crate implements for `*`/`?`.
    pub fn path_is_match(&self, path: &str) -> Result<bool> {
        match (&self.paths, &self.path_hash_prefixes) {
            (Some(patterns), None) => {
                for pattern in patterns {
                    let glob = GlobBuilder::new(pattern)
                        .literal_separator(true)
                        .build()
                        .map_err(|e| {
                            error::MalformedMetadataSnafu {
                                role: RoleType::Targets,
                                message: format!(
                                    "delegated role {:?} has an invalid path pattern {:?}: {e}",
                                    self.name, pattern
                                ),
                            }
                            .build()
                        })?;
                    if glob.compile_matcher().is_match(path) {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            (None, Some(prefixes)) => {
                let digest = aws_lc_rs::digest::digest(&aws_lc_rs::digest::SHA256, path.as_bytes());
                let hex_digest = hex::encode(digest);
                Ok(prefixes.iter().any(|p| hex_digest.starts_with(p)))
            }
            (None, None) => Ok(false),
            (Some(_), Some(_)) => error::AmbiguousDelegationMatcherSnafu {
                name: self.name.clone(),
            }
            .fail(),
        }
    }
}

/// The `delegations` object of a `targets` role: the keys usable by its delegated roles, and the
/// ordered list of delegated roles themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delegations {
    pub keys: BTreeMap<String, Key>,
    pub roles: Vec<DelegatedRole>,
    #[serde(flatten)]
    pub _extra: HashMap<String, serde_json::Value>,
}

impl Delegations {
    pub fn role(&self, name: &str) -> Option<&DelegatedRole> {
        self.roles.iter().find(|r| r.name == name)
    }

    /// Verifies `signatures` against this delegation set's keys for the named role.
    pub fn verify_threshold(
        &self,
        delegated: &DelegatedRole,
        signed_bytes: &[u8],
        signatures: &[Signature],
    ) -> Result<()> {
        let role_keys = RoleKeys {
            keyids: delegated.keyids.clone(),
            threshold: delegated.threshold,
            _extra: HashMap::new(),
        };
        verify_threshold_generic(
            &self.keys,
            &role_keys,
            RoleType::Targets,
            signed_bytes,
            signatures,
        )
    }
}

/// The `targets` role (top-level or delegated): the map of target paths to file metadata, plus
/// an optional set of delegated sub-roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Targets {
    #[serde(rename = "_type")]
    pub _type: RoleType,
    pub spec_version: String,
    #[serde(deserialize_with = "de::deserialize_version")]
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub targets: BTreeMap<String, TargetFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegations: Option<Delegations>,
    #[serde(flatten)]
    pub _extra: HashMap<String, serde_json::Value>,
}

impl Role for Targets {
    const TYPE: RoleType = RoleType::Targets;
    fn version(&self) -> u64 {
        self.version
    }
    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }
}

impl Targets {
    /// Looks up `path` in this role's own `targets` map only (no delegation traversal - see
    /// [`crate::delegation`] for the full resolver).
    pub fn find_target(&self, path: &str) -> Option<&TargetFile> {
        self.targets.get(path)
    }
}

/// Computes the canonical signed-bytes of a role's `signed` field, which is the preimage for
/// every signature over that role.
pub fn signed_bytes<T: Serialize>(role: &T) -> Result<Vec<u8>> {
    to_canonical_vec(role).context(error::CanonicalEncodeSnafu {
        what: "role".to_string(),
    })
}

