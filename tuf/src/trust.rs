// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `TrustedMetadataSet` state machine: the security kernel that decides whether a freshly
//! fetched document becomes part of what this client trusts.
//!
//! Modeled as a small sum type (`State`) rather than one struct full of `Option` fields, so that,
//! for example, asking for the trusted `Snapshot` before one has ever been admitted is a
//! compile-time impossibility for the inherent accessor, not a runtime `None` check scattered
//! across call sites.

use crate::error::{self, Result};
use crate::metadata::{signed_bytes, RoleType, Root, Signed, Snapshot, Targets, Timestamp};
use chrono::{DateTime, Utc};
use log::{debug, error as log_error, warn};
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::HashMap;

/// Per-role byte-size ceilings enforced before a fetched document is even parsed. Defaults match
/// widely deployed TUF repositories; override per-repository if yours legitimately needs more.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_root_size: u64,
    pub max_timestamp_size: u64,
    pub max_snapshot_size: u64,
    pub max_targets_size: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_root_size: 512 * 1024,
            max_timestamp_size: 16 * 1024,
            max_snapshot_size: 2 * 1024 * 1024,
            max_targets_size: 5 * 1024 * 1024,
        }
    }
}

impl Limits {
    pub(crate) fn for_role(&self, role: RoleType) -> u64 {
        match role {
            RoleType::Root => self.max_root_size,
            RoleType::Timestamp => self.max_timestamp_size,
            RoleType::Snapshot => self.max_snapshot_size,
            RoleType::Targets | RoleType::Mirrors => self.max_targets_size,
        }
    }

    pub(crate) fn check(&self, role: RoleType, bytes: &[u8]) -> Result<()> {
        let limit = self.for_role(role);
        ensure!(
            bytes.len() as u64 <= limit,
            error::OversizedMetadataSnafu { role, limit }
        );
        Ok(())
    }
}

struct RootState {
    signed: Signed<Root>,
    bytes: Vec<u8>,
    /// Set once `check_final_root` has confirmed the current root is unexpired. Cleared by
    /// `update_root`, since a newly admitted root has not had that check run yet.
    checked: bool,
}

struct Entry<T> {
    signed: Signed<T>,
    bytes: Vec<u8>,
}

/// The states a [`TrustedMetadataSet`] can be in, ordered by how much has been admitted so far.
enum State {
    RootOnly,
    WithTimestamp {
        timestamp: Entry<Timestamp>,
    },
    WithSnapshot {
        timestamp: Entry<Timestamp>,
        snapshot: Entry<Snapshot>,
    },
    Complete {
        timestamp: Entry<Timestamp>,
        snapshot: Entry<Snapshot>,
        targets: Entry<Targets>,
        delegated: HashMap<String, Entry<Targets>>,
    },
}

/// The verified, ratcheting view of one repository's metadata: implements transitions T1-T6.
pub struct TrustedMetadataSet {
    root: RootState,
    state: State,
    limits: Limits,
}

/// Returns the current UTC instant. Broken out so tests can substitute a fixed/advancing clock -
/// every `TrustedMetadataSet` method that cares about expiration takes one as a `&dyn Clock`
/// argument rather than the set storing one itself.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The default [`Clock`]: real wall-clock UTC time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl TrustedMetadataSet {
    /// Bootstraps trust from `root_bytes`, the out-of-band trust anchor. Does not check
    /// expiration - `check_final_root` must be called once the caller is ready to treat this
    /// root as final for the refresh (T2).
    pub fn new(root_bytes: Vec<u8>, limits: Limits) -> Result<Self> {
        limits.check(RoleType::Root, &root_bytes)?;
        let signed: Signed<Root> =
            serde_json::from_slice(&root_bytes).context(error::MalformedJsonSnafu {
                role: RoleType::Root,
            })?;
        validate_spec_version(&signed.signed.spec_version, RoleType::Root)?;
        validate_type(signed.signed._type, RoleType::Root)?;
        // The trust anchor is trusted to verify itself: every signature must come from its own
        // keys, at its own threshold.
        let bytes = signed_bytes(&signed.signed)?;
        signed
            .signed
            .verify_threshold(RoleType::Root, &bytes, &signed.signatures)?;
        Ok(TrustedMetadataSet {
            root: RootState {
                signed,
                bytes: root_bytes,
                checked: false,
            },
            state: State::RootOnly,
            limits,
        })
    }

    pub fn root(&self) -> &Root {
        &self.root.signed.signed
    }

    pub fn timestamp(&self) -> Option<&Timestamp> {
        match &self.state {
            State::RootOnly => None,
            State::WithTimestamp { timestamp, .. }
            | State::WithSnapshot { timestamp, .. }
            | State::Complete { timestamp, .. } => Some(&timestamp.signed.signed),
        }
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        match &self.state {
            State::WithSnapshot { snapshot, .. } | State::Complete { snapshot, .. } => {
                Some(&snapshot.signed.signed)
            }
            _ => None,
        }
    }

    pub fn targets(&self) -> Option<&Targets> {
        match &self.state {
            State::Complete { targets, .. } => Some(&targets.signed.signed),
            _ => None,
        }
    }

    pub fn delegated(&self, name: &str) -> Option<&Targets> {
        match &self.state {
            State::Complete { delegated, .. } => delegated.get(name).map(|e| &e.signed.signed),
            _ => None,
        }
    }

    /// T1: admits a candidate next root. The caller drives the version-by-version rotation walk;
    /// this only validates one step.
    pub fn update_root(&mut self, root_bytes: Vec<u8>) -> Result<()> {
        self.limits.check(RoleType::Root, &root_bytes)?;
        let signed: Signed<Root> =
            serde_json::from_slice(&root_bytes).context(error::MalformedJsonSnafu {
                role: RoleType::Root,
            })?;
        validate_spec_version(&signed.signed.spec_version, RoleType::Root)?;
        validate_type(signed.signed._type, RoleType::Root)?;
        let new_bytes = signed_bytes(&signed.signed)?;

        // Verified against the OLD root's keys/threshold ...
        self.root
            .signed
            .signed
            .verify_threshold(RoleType::Root, &new_bytes, &signed.signatures)?;
        // ... and against the NEW root's own keys/threshold.
        signed
            .signed
            .verify_threshold(RoleType::Root, &new_bytes, &signed.signatures)?;

        if signed.signed.version != self.root.signed.signed.version + 1 {
            log_error!(
                "root.json version {} is not a direct successor of trusted version {}",
                signed.signed.version,
                self.root.signed.signed.version
            );
            return error::RollbackAttackSnafu {
                role: RoleType::Root,
                prev: self.root.signed.signed.version,
                got: signed.signed.version,
            }
            .fail();
        }

        debug!(
            "admitted root.json version {} (was {})",
            signed.signed.version, self.root.signed.signed.version
        );
        self.root = RootState {
            signed,
            bytes: root_bytes,
            checked: false,
        };
        warn!("root rotated; clearing cached timestamp/snapshot/targets/delegated state");
        self.state = State::RootOnly;
        Ok(())
    }

    /// T2: confirms the currently trusted root has not expired. Must be called once after the
    /// root-rotation walk in `update_root` converges, before any of T3-T6 are attempted.
    pub fn check_final_root(&mut self, clock: &dyn Clock) -> Result<()> {
        let now = clock.now();
        if self.root.signed.signed.expires <= now {
            log_error!("root.json expired at {}", self.root.signed.signed.expires);
            return error::ExpiredMetadataSnafu {
                role: RoleType::Root,
                expired_at: self.root.signed.signed.expires,
            }
            .fail();
        }
        self.root.checked = true;
        Ok(())
    }

    fn require_final_root(&self) -> Result<()> {
        ensure!(self.root.checked, error::NotInitializedSnafu);
        Ok(())
    }

    /// T3.
    pub fn update_timestamp(&mut self, bytes: Vec<u8>, clock: &dyn Clock) -> Result<()> {
        self.require_final_root()?;
        self.limits.check(RoleType::Timestamp, &bytes)?;
        let signed: Signed<Timestamp> =
            serde_json::from_slice(&bytes).context(error::MalformedJsonSnafu {
                role: RoleType::Timestamp,
            })?;
        validate_spec_version(&signed.signed.spec_version, RoleType::Timestamp)?;
        validate_type(signed.signed._type, RoleType::Timestamp)?;
        let signed_payload = signed_bytes(&signed.signed)?;
        self.root
            .signed
            .signed
            .verify_threshold(RoleType::Timestamp, &signed_payload, &signed.signatures)?;

        if let Some(current) = self.timestamp() {
            ensure!(
                signed.signed.version != current.version,
                error::EqualVersionNumberSnafu {
                    role: RoleType::Timestamp,
                    version: current.version,
                }
            );
            if signed.signed.version <= current.version {
                log_error!(
                    "timestamp.json version {} did not advance past trusted version {}",
                    signed.signed.version,
                    current.version
                );
                return error::RollbackAttackSnafu {
                    role: RoleType::Timestamp,
                    prev: current.version,
                    got: signed.signed.version,
                }
                .fail();
            }
            let new_snapshot_meta = signed.signed.snapshot_meta()?;
            let current_snapshot_meta = current.snapshot_meta()?;
            if new_snapshot_meta.version < current_snapshot_meta.version {
                log_error!(
                    "new timestamp.json points at snapshot.json version {}, older than trusted version {}",
                    new_snapshot_meta.version,
                    current_snapshot_meta.version
                );
                return error::RollbackAttackSnafu {
                    role: RoleType::Snapshot,
                    prev: current_snapshot_meta.version,
                    got: new_snapshot_meta.version,
                }
                .fail();
            }
        }

        if signed.signed.expires <= clock.now() {
            log_error!("timestamp.json expired at {}", signed.signed.expires);
            return error::ExpiredMetadataSnafu {
                role: RoleType::Timestamp,
                expired_at: signed.signed.expires,
            }
            .fail();
        }

        debug!("admitted timestamp.json version {}", signed.signed.version);
        self.state = State::WithTimestamp {
            timestamp: Entry { signed, bytes },
        };
        Ok(())
    }

    /// T4.
    pub fn update_snapshot(&mut self, bytes: Vec<u8>, clock: &dyn Clock) -> Result<()> {
        let timestamp = match &self.state {
            State::RootOnly => return error::NotInitializedSnafu.fail(),
            State::WithTimestamp { timestamp }
            | State::WithSnapshot { timestamp, .. }
            | State::Complete { timestamp, .. } => timestamp,
        };

        self.limits.check(RoleType::Snapshot, &bytes)?;
        let signed: Signed<Snapshot> =
            serde_json::from_slice(&bytes).context(error::MalformedJsonSnafu {
                role: RoleType::Snapshot,
            })?;
        validate_spec_version(&signed.signed.spec_version, RoleType::Snapshot)?;
        validate_type(signed.signed._type, RoleType::Snapshot)?;
        let signed_payload = signed_bytes(&signed.signed)?;
        self.root
            .signed
            .signed
            .verify_threshold(RoleType::Snapshot, &signed_payload, &signed.signatures)?;

        let expected_meta = timestamp.signed.signed.snapshot_meta()?;
        if signed.signed.version != expected_meta.version {
            log_error!(
                "snapshot.json version {} does not match the version {} pinned by timestamp.json",
                signed.signed.version,
                expected_meta.version
            );
            return error::RollbackAttackSnafu {
                role: RoleType::Snapshot,
                prev: expected_meta.version,
                got: signed.signed.version,
            }
            .fail();
        }
        check_file_metadata(expected_meta, &bytes, RoleType::Snapshot)?;

        if let Some(current) = self.snapshot() {
            for (filename, current_meta) in &current.meta {
                if let Some(new_meta) = signed.signed.meta.get(filename) {
                    if new_meta.version < current_meta.version {
                        log_error!(
                            "new snapshot.json moves {filename} back to version {}, was {}",
                            new_meta.version,
                            current_meta.version
                        );
                        return error::RollbackAttackSnafu {
                            role: RoleType::Snapshot,
                            prev: current_meta.version,
                            got: new_meta.version,
                        }
                        .fail();
                    }
                }
            }
        }

        if signed.signed.expires <= clock.now() {
            log_error!("snapshot.json expired at {}", signed.signed.expires);
            return error::ExpiredMetadataSnafu {
                role: RoleType::Snapshot,
                expired_at: signed.signed.expires,
            }
            .fail();
        }

        debug!("admitted snapshot.json version {}", signed.signed.version);
        let timestamp = match std::mem::replace(&mut self.state, State::RootOnly) {
            State::WithTimestamp { timestamp }
            | State::WithSnapshot { timestamp, .. }
            | State::Complete { timestamp, .. } => timestamp,
            State::RootOnly => unreachable!("checked above"),
        };
        self.state = State::WithSnapshot {
            timestamp,
            snapshot: Entry { signed, bytes },
        };
        Ok(())
    }

    /// T5: the top-level `targets.json`.
    pub fn update_targets(&mut self, bytes: Vec<u8>, clock: &dyn Clock) -> Result<()> {
        let (timestamp, snapshot) = match &self.state {
            State::WithSnapshot { timestamp, snapshot } => (timestamp, snapshot),
            State::Complete {
                timestamp,
                snapshot,
                ..
            } => (timestamp, snapshot),
            _ => return error::NotInitializedSnafu.fail(),
        };
        let _ = timestamp;

        self.limits.check(RoleType::Targets, &bytes)?;
        let signed: Signed<Targets> =
            serde_json::from_slice(&bytes).context(error::MalformedJsonSnafu {
                role: RoleType::Targets,
            })?;
        validate_spec_version(&signed.signed.spec_version, RoleType::Targets)?;
        validate_type(signed.signed._type, RoleType::Targets)?;
        let signed_payload = signed_bytes(&signed.signed)?;
        self.root
            .signed
            .signed
            .verify_threshold(RoleType::Targets, &signed_payload, &signed.signatures)?;

        let expected_meta = snapshot
            .signed
            .signed
            .meta
            .get("targets.json")
            .context(error::MalformedMetadataSnafu {
                role: RoleType::Snapshot,
                message: "snapshot.json is missing the targets.json entry".to_string(),
            })?;
        if signed.signed.version != expected_meta.version {
            log_error!(
                "targets.json version {} does not match the version {} pinned by snapshot.json",
                signed.signed.version,
                expected_meta.version
            );
            return error::RollbackAttackSnafu {
                role: RoleType::Targets,
                prev: expected_meta.version,
                got: signed.signed.version,
            }
            .fail();
        }
        check_file_metadata(expected_meta, &bytes, RoleType::Targets)?;

        if signed.signed.expires <= clock.now() {
            log_error!("targets.json expired at {}", signed.signed.expires);
            return error::ExpiredMetadataSnafu {
                role: RoleType::Targets,
                expired_at: signed.signed.expires,
            }
            .fail();
        }

        debug!("admitted targets.json version {}", signed.signed.version);
        let (timestamp, snapshot) = match std::mem::replace(&mut self.state, State::RootOnly) {
            State::WithSnapshot { timestamp, snapshot } => (timestamp, snapshot),
            State::Complete {
                timestamp,
                snapshot,
                ..
            } => (timestamp, snapshot),
            _ => unreachable!("checked above"),
        };
        self.state = State::Complete {
            timestamp,
            snapshot,
            targets: Entry { signed, bytes },
            delegated: HashMap::new(),
        };
        Ok(())
    }

    /// T6: a delegated targets role named `name`, delegated to by `parent_name` (either the
    /// top-level targets role, or another already-admitted delegated role).
    pub fn update_delegated_targets(
        &mut self,
        name: &str,
        parent_name: &str,
        bytes: Vec<u8>,
        clock: &dyn Clock,
    ) -> Result<()> {
        // Resolved and cloned before taking `&mut self.state` below, the same way the resolver in
        // `delegation.rs` clones a parent's `Delegations` rather than holding a borrow of it
        // across an await/mutation - `parent_delegations` borrows all of `*self` immutably, which
        // would otherwise overlap the `&mut` destructure of `self.state`.
        let parent_delegations = self.parent_delegations(parent_name)?.clone();
        let delegated_role = parent_delegations
            .role(name)
            .context(error::UnknownRoleSnafu {
                name: name.to_string(),
                parent: RoleType::Targets,
            })?
            .clone();

        let (snapshot, targets, delegated) = match &mut self.state {
            State::Complete {
                snapshot,
                targets,
                delegated,
                ..
            } => (snapshot, targets, delegated),
            _ => return error::NotInitializedSnafu.fail(),
        };

        self.limits.check(RoleType::Targets, &bytes)?;
        let signed: Signed<Targets> =
            serde_json::from_slice(&bytes).context(error::MalformedJsonSnafu {
                role: RoleType::Targets,
            })?;
        validate_spec_version(&signed.signed.spec_version, RoleType::Targets)?;
        validate_type(signed.signed._type, RoleType::Targets)?;
        let signed_payload = signed_bytes(&signed.signed)?;
        parent_delegations.verify_threshold(&delegated_role, &signed_payload, &signed.signatures)?;

        let filename = format!("{name}.json");
        let expected_meta =
            snapshot
                .signed
                .signed
                .meta
                .get(&filename)
                .context(error::MalformedMetadataSnafu {
                    role: RoleType::Snapshot,
                    message: format!("snapshot.json is missing the {filename} entry"),
                })?;
        if signed.signed.version != expected_meta.version {
            log_error!(
                "delegated {filename} version {} does not match the version {} pinned by snapshot.json",
                signed.signed.version,
                expected_meta.version
            );
            return error::RollbackAttackSnafu {
                role: RoleType::Targets,
                prev: expected_meta.version,
                got: signed.signed.version,
            }
            .fail();
        }
        check_file_metadata(expected_meta, &bytes, RoleType::Targets)?;

        if signed.signed.expires <= clock.now() {
            log_error!("delegated {name}.json expired at {}", signed.signed.expires);
            return error::ExpiredMetadataSnafu {
                role: RoleType::Targets,
                expired_at: signed.signed.expires,
            }
            .fail();
        }

        let _ = targets;
        debug!(
            "admitted delegated targets role {name:?} (delegated by {parent_name:?}) version {}",
            signed.signed.version
        );
        delegated.insert(name.to_string(), Entry { signed, bytes });
        Ok(())
    }

    /// Looks up the `Delegations` object that should name `name`, from either the top-level
    /// targets role or an already-admitted delegated role.
    fn parent_delegations(
        &self,
        parent_name: &str,
    ) -> Result<&crate::metadata::Delegations> {
        let targets = if parent_name == "targets" {
            self.targets()
        } else {
            self.delegated(parent_name)
        };
        targets
            .and_then(|t| t.delegations.as_ref())
            .context(error::MalformedMetadataSnafu {
                role: RoleType::Targets,
                message: format!("{parent_name:?} has no delegations"),
            })
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }
}

/// Confirms a parsed document's `_type` field names the role this admission path expects; a
/// document of one role masquerading as another (e.g. a `snapshot.json` body served back under a
/// `timestamp.json` URL) is rejected before any signature is even checked.
fn validate_type(declared: RoleType, expected: RoleType) -> Result<()> {
    ensure!(
        declared == expected,
        error::MalformedMetadataSnafu {
            role: expected,
            message: format!("expected _type {expected:?} but document declared {declared:?}"),
        }
    );
    Ok(())
}

/// Parses `spec_version` as exactly three dot-separated, non-empty, all-numeric components
/// (`^\d+\.\d+\.\d+$`) and returns the major component. `"1"`, `"1.2"`, and `"1.x.y"` are all
/// rejected as malformed rather than silently truncated to their leading numeric prefix.
fn parse_spec_version(spec_version: &str) -> Option<u32> {
    let parts: Vec<&str> = spec_version.split('.').collect();
    if parts.len() != 3 {
        return None;
    }
    for component in &parts {
        if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
    }
    parts[0].parse::<u32>().ok()
}

fn validate_spec_version(spec_version: &str, role: RoleType) -> Result<()> {
    let major = parse_spec_version(spec_version);
    ensure!(
        major == Some(1),
        error::UnsupportedSpecVersionSnafu {
            role,
            spec_version: spec_version.to_string(),
            wanted_major: 1u32,
        }
    );
    Ok(())
}

fn check_file_metadata(
    expected: &crate::metadata::FileMetadata,
    bytes: &[u8],
    role: RoleType,
) -> Result<()> {
    if let Some(length) = expected.length {
        ensure!(
            bytes.len() as u64 == length,
            error::MalformedMetadataSnafu {
                role,
                message: format!(
                    "length mismatch against snapshot/timestamp pin: expected {length}, got {}",
                    bytes.len()
                ),
            }
        );
    }
    if let Some(hashes) = &expected.hashes {
        for (alg, expected_hex) in hashes {
            let actual_hex = match alg.as_str() {
                "sha256" => hex::encode(aws_lc_rs::digest::digest(&aws_lc_rs::digest::SHA256, bytes)),
                "sha512" => hex::encode(aws_lc_rs::digest::digest(&aws_lc_rs::digest::SHA512, bytes)),
                other => {
                    return error::MalformedMetadataSnafu {
                        role,
                        message: format!("unsupported digest algorithm {other:?} in pinned hash"),
                    }
                    .fail()
                }
            };
            ensure!(
                &actual_hex == expected_hex,
                error::MalformedMetadataSnafu {
                    role,
                    message: format!(
                        "{alg} mismatch against snapshot/timestamp pin: expected {expected_hex}, got {actual_hex}"
                    ),
                }
            );
        }
    }
    Ok(())
}
