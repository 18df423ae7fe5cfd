// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Produces a fully signed, internally consistent four-role metadata set (plus any delegated
//! targets roles) from a set of target files and per-role signers.
//!
//! Signing order follows the dependency chain: Targets, then Snapshot (which pins Targets), then
//! Timestamp (which pins Snapshot), then Root last (it names every role's keys/thresholds, so it
//! has no forward dependency to satisfy).

use crate::crypto::Signer;
use crate::error::{self, Result};
use crate::metadata::{
    signed_bytes, Delegations, FileMetadata, RoleKeys, RoleType, Root, Signature, Signed, Snapshot,
    TargetFile, Targets, Timestamp,
};
use aws_lc_rs::digest::{digest, SHA256};
use aws_lc_rs::rand::SystemRandom;
use chrono::{Duration, Utc};
use snafu::ResultExt;
use std::collections::{BTreeMap, HashMap};

/// One role's signer(s) plus the derived keyids/threshold to embed in `root.json`.
#[derive(Default)]
struct RoleSigners {
    signers: Vec<Box<dyn Signer>>,
}

/// Accumulates target files and signers, then produces a signed [`SignedRepository`].
#[derive(Default)]
pub struct RepositoryBuilder {
    targets: BTreeMap<String, TargetFile>,
    root_signers: RoleSigners,
    timestamp_signers: RoleSigners,
    snapshot_signers: RoleSigners,
    targets_signers: RoleSigners,
    delegations: Option<Delegations>,
    delegated_signers: HashMap<String, RoleSigners>,
    delegated_targets: HashMap<String, BTreeMap<String, TargetFile>>,
    consistent_snapshot: bool,
    version: u64,
    expires_in: Duration,
}

impl RepositoryBuilder {
    pub fn new() -> Self {
        RepositoryBuilder {
            version: 1,
            expires_in: Duration::days(7),
            consistent_snapshot: true,
            ..Default::default()
        }
    }

    pub fn consistent_snapshot(mut self, enabled: bool) -> Self {
        self.consistent_snapshot = enabled;
        self
    }

    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn expires_in(mut self, duration: Duration) -> Self {
        self.expires_in = duration;
        self
    }

    pub fn add_target(mut self, path: impl Into<String>, bytes: &[u8]) -> Self {
        let hash = hex::encode(digest(&SHA256, bytes));
        let mut hashes = BTreeMap::new();
        hashes.insert("sha256".to_string(), hash);
        self.targets.insert(
            path.into(),
            TargetFile {
                length: bytes.len() as u64,
                hashes,
                custom: None,
                _extra: HashMap::new(),
            },
        );
        self
    }

    pub fn sign_root(mut self, signer: Box<dyn Signer>) -> Self {
        self.root_signers.signers.push(signer);
        self
    }

    pub fn sign_timestamp(mut self, signer: Box<dyn Signer>) -> Self {
        self.timestamp_signers.signers.push(signer);
        self
    }

    pub fn sign_snapshot(mut self, signer: Box<dyn Signer>) -> Self {
        self.snapshot_signers.signers.push(signer);
        self
    }

    pub fn sign_targets(mut self, signer: Box<dyn Signer>) -> Self {
        self.targets_signers.signers.push(signer);
        self
    }

    /// Adds a delegation from the top-level targets role to a new role named `name`, matching
    /// `paths`, signed by `signers`.
    pub fn delegate_role(
        mut self,
        name: impl Into<String>,
        paths: Vec<String>,
        threshold: u64,
        terminating: bool,
        signers: Vec<Box<dyn Signer>>,
    ) -> Self {
        let name = name.into();
        let mut keys = BTreeMap::new();
        let mut keyids = Vec::new();
        for signer in &signers {
            let key = signer.tuf_key();
            if let Ok(keyid) = key.key_id() {
                keyids.push(keyid.clone());
                keys.insert(keyid, key);
            }
        }

        let delegations = self.delegations.get_or_insert_with(|| Delegations {
            keys: BTreeMap::new(),
            roles: Vec::new(),
            _extra: HashMap::new(),
        });
        delegations.keys.extend(keys);
        delegations
            .roles
            .push(crate::metadata::DelegatedRole {
                name: name.clone(),
                keyids,
                threshold,
                terminating,
                paths: Some(paths),
                path_hash_prefixes: None,
                _extra: HashMap::new(),
            });
        self.delegated_signers.insert(name, RoleSigners { signers });
        self
    }

    /// Adds a target file to an already-delegated role (see [`Self::delegate_role`]), so the
    /// built repository has something for the delegation to actually resolve.
    pub fn add_delegated_target(
        mut self,
        role_name: impl Into<String>,
        path: impl Into<String>,
        bytes: &[u8],
    ) -> Self {
        let hash = hex::encode(digest(&SHA256, bytes));
        let mut hashes = BTreeMap::new();
        hashes.insert("sha256".to_string(), hash);
        self.delegated_targets
            .entry(role_name.into())
            .or_default()
            .insert(
                path.into(),
                TargetFile {
                    length: bytes.len() as u64,
                    hashes,
                    custom: None,
                    _extra: HashMap::new(),
                },
            );
        self
    }

    /// Builds all four top-level roles (plus any delegated targets roles) and signs each with
    /// its configured signer set. Fails with `IncompleteSignerSet` if any of the four mandatory
    /// roles has no signer.
    pub async fn build(self) -> Result<SignedRepository> {
        if self.root_signers.signers.is_empty() {
            return error::IncompleteSignerSetSnafu {
                role: RoleType::Root,
                delegation: None::<String>,
            }
            .fail();
        }
        if self.timestamp_signers.signers.is_empty() {
            return error::IncompleteSignerSetSnafu {
                role: RoleType::Timestamp,
                delegation: None::<String>,
            }
            .fail();
        }
        if self.snapshot_signers.signers.is_empty() {
            return error::IncompleteSignerSetSnafu {
                role: RoleType::Snapshot,
                delegation: None::<String>,
            }
            .fail();
        }
        if self.targets_signers.signers.is_empty() {
            return error::IncompleteSignerSetSnafu {
                role: RoleType::Targets,
                delegation: None::<String>,
            }
            .fail();
        }

        let rng = SystemRandom::new();
        let now = Utc::now();
        let expires = now + self.expires_in;

        // 1. Targets.
        let targets = Targets {
            _type: RoleType::Targets,
            spec_version: "1.0.0".to_string(),
            version: self.version,
            expires,
            targets: self.targets,
            delegations: self.delegations.clone(),
            _extra: HashMap::new(),
        };
        let signed_targets = sign_role(targets, &self.targets_signers, &rng).await?;

        let mut delegated_signed = HashMap::new();
        if let Some(delegations) = &self.delegations {
            for role in &delegations.roles {
                let Some(role_signers) = self.delegated_signers.get(&role.name) else {
                    continue;
                };
                let delegated_targets = Targets {
                    _type: RoleType::Targets,
                    spec_version: "1.0.0".to_string(),
                    version: self.version,
                    expires,
                    targets: self
                        .delegated_targets
                        .get(&role.name)
                        .cloned()
                        .unwrap_or_default(),
                    delegations: None,
                    _extra: HashMap::new(),
                };
                let signed = sign_role(delegated_targets, role_signers, &rng).await?;
                delegated_signed.insert(role.name.clone(), signed);
            }
        }

        // 2. Snapshot, pinning targets (and every delegated role) by version/length/hash.
        let mut meta = BTreeMap::new();
        meta.insert(
            "targets.json".to_string(),
            file_metadata_for(&signed_targets.bytes, signed_targets.signed.signed.version),
        );
        for (name, signed) in &delegated_signed {
            meta.insert(
                format!("{name}.json"),
                file_metadata_for(&signed.bytes, signed.signed.signed.version),
            );
        }
        let snapshot = Snapshot {
            _type: RoleType::Snapshot,
            spec_version: "1.0.0".to_string(),
            version: self.version,
            expires,
            meta,
            _extra: HashMap::new(),
        };
        let signed_snapshot = sign_role(snapshot, &self.snapshot_signers, &rng).await?;

        // 3. Timestamp, pinning snapshot.
        let mut timestamp_meta = BTreeMap::new();
        timestamp_meta.insert(
            "snapshot.json".to_string(),
            file_metadata_for(&signed_snapshot.bytes, signed_snapshot.signed.signed.version),
        );
        let timestamp = Timestamp {
            _type: RoleType::Timestamp,
            spec_version: "1.0.0".to_string(),
            version: self.version,
            expires,
            meta: timestamp_meta,
            _extra: HashMap::new(),
        };
        let signed_timestamp = sign_role(timestamp, &self.timestamp_signers, &rng).await?;

        // 4. Root, naming every role's keys/thresholds.
        let mut keys = BTreeMap::new();
        let mut roles = BTreeMap::new();
        for (role_name, role_signers) in [
            ("root", &self.root_signers),
            ("timestamp", &self.timestamp_signers),
            ("snapshot", &self.snapshot_signers),
            ("targets", &self.targets_signers),
        ] {
            let mut keyids = Vec::new();
            for signer in &role_signers.signers {
                let key = signer.tuf_key();
                if let Ok(keyid) = key.key_id() {
                    keyids.push(keyid.clone());
                    keys.insert(keyid, key);
                }
            }
            let threshold = keyids.len() as u64;
            roles.insert(
                role_name.to_string(),
                RoleKeys {
                    keyids,
                    threshold,
                    _extra: HashMap::new(),
                },
            );
        }
        let root = Root {
            _type: RoleType::Root,
            spec_version: "1.0.0".to_string(),
            version: self.version,
            expires,
            consistent_snapshot: self.consistent_snapshot,
            keys,
            roles,
            _extra: HashMap::new(),
        };
        let signed_root = sign_role(root, &self.root_signers, &rng).await?;

        Ok(SignedRepository {
            root: signed_root,
            timestamp: signed_timestamp,
            snapshot: signed_snapshot,
            targets: signed_targets,
            delegated: delegated_signed,
        })
    }
}

/// One signed role's parsed form alongside the exact bytes that were signed over - the same
/// "retain the buffer, don't re-encode later" shape [`crate::trust`] uses on the verifying side.
pub struct SignedRole<T> {
    pub signed: Signed<T>,
    pub bytes: Vec<u8>,
}

impl<T> SignedRole<T> {
    /// The exact bytes produced for this role: what a [`crate::updater::Fetcher`] should be made
    /// to return for the corresponding URL, and what a [`crate::updater::Cache`] should persist.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// The full output of [`RepositoryBuilder::build`]: the four top-level roles plus any delegated
/// targets roles, each already signed with its configured signer set.
pub struct SignedRepository {
    pub root: SignedRole<Root>,
    pub timestamp: SignedRole<Timestamp>,
    pub snapshot: SignedRole<Snapshot>,
    pub targets: SignedRole<Targets>,
    pub delegated: HashMap<String, SignedRole<Targets>>,
}

fn file_metadata_for(bytes: &[u8], version: u64) -> FileMetadata {
    let mut hashes = BTreeMap::new();
    hashes.insert("sha256".to_string(), hex::encode(digest(&SHA256, bytes)));
    FileMetadata {
        version,
        length: Some(bytes.len() as u64),
        hashes: Some(hashes),
        _extra: HashMap::new(),
    }
}

async fn sign_role<T>(
    role: T,
    signers: &RoleSigners,
    rng: &SystemRandom,
) -> Result<SignedRole<T>>
where
    T: crate::metadata::Role + serde::Serialize + Clone,
{
    let payload = signed_bytes(&role)?;
    let mut signatures = Vec::new();
    for signer in &signers.signers {
        let key = signer.tuf_key();
        let keyid = key.key_id()?;
        let sig = signer
            .sign(&payload, rng)
            .await
            .map_err(|_| error::SigningFailedSnafu { role: T::TYPE }.build())?;
        signatures.push(Signature {
            keyid,
            sig: hex::encode(sig),
        });
    }
    let signed = Signed {
        signed: role,
        signatures,
    };
    // The wire/cache representation is the full `{ signed, signatures }` envelope, not the
    // canonical encoding of `signed.signed` alone - that canonical form only ever exists to be
    // hashed or signed over, never to be the bytes a `Fetcher`/`Cache` hands back.
    let bytes = serde_json::to_vec(&signed).context(error::CanonicalEncodeSnafu {
        what: format!("{} envelope", T::TYPE),
    })?;
    Ok(SignedRole { signed, bytes })
}
