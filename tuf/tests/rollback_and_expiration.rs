// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! S3: a second `refresh()` that serves an older `snapshot.json`/`timestamp.json` than the one
//! already trusted is rejected as a rollback (or same-version) attack. S4: metadata past its
//! `expires` is rejected.
//!
//! Unlike `bootstrap_and_refresh.rs`, this suite builds its fixture role-by-role instead of
//! through `RepositoryBuilder`, so the same signing keys can be reused across two successive
//! versions of a role - `RepositoryBuilder::build` only ever produces one version per call.

mod test_utils;

use aws_lc_rs::digest::{digest, SHA256};
use aws_lc_rs::rand::SystemRandom;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use test_utils::*;
use tuf::crypto::Signer;
use tuf::metadata::{
    signed_bytes, FileMetadata, RoleKeys, RoleType, Root, Signature, Signed, Snapshot, TargetFile,
    Targets, Timestamp,
};
use tuf::trust::{Limits, TrustedMetadataSet};
use tuf::updater::{Settings, Updater};
use url::Url;

/// One repository's worth of per-role signers, held onto so successive versions of a role can be
/// signed with the identical key the trusted root already recognizes.
struct Fixture {
    root: Box<dyn Signer>,
    timestamp: Box<dyn Signer>,
    snapshot: Box<dyn Signer>,
    targets: Box<dyn Signer>,
    rng: SystemRandom,
}

impl Fixture {
    fn new() -> Self {
        Fixture {
            root: new_ed25519_signer(),
            timestamp: new_ed25519_signer(),
            snapshot: new_ed25519_signer(),
            targets: new_ed25519_signer(),
            rng: SystemRandom::new(),
        }
    }

    async fn sign<T>(&self, signer: &dyn Signer, role: T) -> Signed<T>
    where
        T: serde::Serialize,
    {
        let payload = signed_bytes(&role).unwrap();
        let sig = signer.sign(&payload, &self.rng).await.unwrap();
        Signed {
            signed: role,
            signatures: vec![Signature {
                keyid: signer.tuf_key().key_id().unwrap(),
                sig: hex::encode(sig),
            }],
        }
    }

    fn role_keys_for(&self, signer: &dyn Signer) -> (String, RoleKeys) {
        let key = signer.tuf_key();
        let keyid = key.key_id().unwrap();
        (
            keyid.clone(),
            RoleKeys {
                keyids: vec![keyid],
                threshold: 1,
                _extra: HashMap::new(),
            },
        )
    }

    async fn root_bytes(&self, version: u64, expires: DateTime<Utc>) -> Vec<u8> {
        let mut keys = BTreeMap::new();
        let mut roles = BTreeMap::new();
        for (name, signer) in [
            ("root", &self.root),
            ("timestamp", &self.timestamp),
            ("snapshot", &self.snapshot),
            ("targets", &self.targets),
        ] {
            let (keyid, role_keys) = self.role_keys_for(signer.as_ref());
            keys.insert(keyid, signer.tuf_key());
            roles.insert(name.to_string(), role_keys);
        }
        let root = Root {
            _type: RoleType::Root,
            spec_version: "1.0.0".to_string(),
            version,
            expires,
            consistent_snapshot: false,
            keys,
            roles,
            _extra: HashMap::new(),
        };
        let signed = self.sign(self.root.as_ref(), root).await;
        serde_json::to_vec(&signed).unwrap()
    }

    async fn targets_bytes(
        &self,
        version: u64,
        expires: DateTime<Utc>,
        target_name: &str,
        target_bytes: &[u8],
    ) -> Vec<u8> {
        let mut hashes = BTreeMap::new();
        hashes.insert("sha256".to_string(), hex::encode(digest(&SHA256, target_bytes)));
        let mut targets_map = BTreeMap::new();
        targets_map.insert(
            target_name.to_string(),
            TargetFile {
                length: target_bytes.len() as u64,
                hashes,
                custom: None,
                _extra: HashMap::new(),
            },
        );
        let targets = Targets {
            _type: RoleType::Targets,
            spec_version: "1.0.0".to_string(),
            version,
            expires,
            targets: targets_map,
            delegations: None,
            _extra: HashMap::new(),
        };
        let signed = self.sign(self.targets.as_ref(), targets).await;
        serde_json::to_vec(&signed).unwrap()
    }

    fn file_metadata_for(&self, bytes: &[u8], version: u64) -> FileMetadata {
        let mut hashes = BTreeMap::new();
        hashes.insert("sha256".to_string(), hex::encode(digest(&SHA256, bytes)));
        FileMetadata {
            version,
            length: Some(bytes.len() as u64),
            hashes: Some(hashes),
            _extra: HashMap::new(),
        }
    }

    async fn snapshot_bytes(
        &self,
        version: u64,
        expires: DateTime<Utc>,
        targets_version: u64,
        targets_bytes: &[u8],
    ) -> Vec<u8> {
        let mut meta = BTreeMap::new();
        meta.insert(
            "targets.json".to_string(),
            self.file_metadata_for(targets_bytes, targets_version),
        );
        let snapshot = Snapshot {
            _type: RoleType::Snapshot,
            spec_version: "1.0.0".to_string(),
            version,
            expires,
            meta,
            _extra: HashMap::new(),
        };
        let signed = self.sign(self.snapshot.as_ref(), snapshot).await;
        serde_json::to_vec(&signed).unwrap()
    }

    async fn timestamp_bytes(
        &self,
        version: u64,
        expires: DateTime<Utc>,
        snapshot_version: u64,
        snapshot_bytes: &[u8],
    ) -> Vec<u8> {
        let mut meta = BTreeMap::new();
        meta.insert(
            "snapshot.json".to_string(),
            self.file_metadata_for(snapshot_bytes, snapshot_version),
        );
        let timestamp = Timestamp {
            _type: RoleType::Timestamp,
            spec_version: "1.0.0".to_string(),
            version,
            expires,
            meta,
            _extra: HashMap::new(),
        };
        let signed = self.sign(self.timestamp.as_ref(), timestamp).await;
        serde_json::to_vec(&signed).unwrap()
    }
}

#[tokio::test]
async fn replaying_an_older_timestamp_is_a_rollback_attack() {
    let fixture = Fixture::new();
    let expires = reference_now() + Duration::days(365);

    let root_bytes = fixture.root_bytes(1, expires).await;
    let mut set = TrustedMetadataSet::new(root_bytes, Limits::default()).unwrap();
    set.check_final_root(&FixedClock(reference_now())).unwrap();

    let targets_v1 = fixture.targets_bytes(1, expires, "hello.txt", b"Hello, world!").await;
    let snapshot_v1 = fixture.snapshot_bytes(1, expires, 1, &targets_v1).await;
    let timestamp_v1 = fixture.timestamp_bytes(1, expires, 1, &snapshot_v1).await;
    set.update_timestamp(timestamp_v1.clone(), &FixedClock(reference_now()))
        .unwrap();
    set.update_snapshot(snapshot_v1, &FixedClock(reference_now())).unwrap();

    let targets_v2 = fixture.targets_bytes(2, expires, "hello.txt", b"Hello, world! v2").await;
    let snapshot_v2 = fixture.snapshot_bytes(2, expires, 2, &targets_v2).await;
    let timestamp_v2 = fixture.timestamp_bytes(2, expires, 2, &snapshot_v2).await;
    set.update_timestamp(timestamp_v2, &FixedClock(reference_now()))
        .unwrap();
    set.update_snapshot(snapshot_v2, &FixedClock(reference_now())).unwrap();
    assert_eq!(set.snapshot().unwrap().version, 2);

    // Replaying the version-1 timestamp (same version as a prior one the attacker observed, but
    // old relative to what's now trusted) must be rejected before its snapshot is ever consulted.
    let err = set
        .update_timestamp(timestamp_v1, &FixedClock(reference_now()))
        .unwrap_err();
    assert!(matches!(
        err,
        tuf::Error::RollbackAttack { .. } | tuf::Error::EqualVersionNumber { .. }
    ));
}

#[tokio::test]
async fn expired_timestamp_is_rejected() {
    let fixture = Fixture::new();
    let expires = reference_now() + Duration::days(1);

    let root_bytes = fixture.root_bytes(1, expires).await;
    let mut set = TrustedMetadataSet::new(root_bytes, Limits::default()).unwrap();
    // A clock far enough past `expires` that the root check itself would also fail is
    // deliberately avoided here - this test pins the clock to just past the role's own expiry.
    let clock = FixedClock(expires + Duration::days(2));
    // Root has the same `expires` as the other roles in this fixture, so it is checked first.
    let err = set.check_final_root(&clock).unwrap_err();
    assert!(matches!(err, tuf::Error::ExpiredMetadata { .. }));
}

#[tokio::test]
async fn expired_targets_is_rejected_even_when_root_and_timestamp_are_fresh() {
    let fixture = Fixture::new();
    let root_expires = reference_now() + Duration::days(3650);
    let soon = reference_now() + Duration::hours(1);

    let root_bytes = fixture.root_bytes(1, root_expires).await;
    let mut set = TrustedMetadataSet::new(root_bytes, Limits::default()).unwrap();
    let clock = FixedClock(reference_now() + Duration::days(2));
    set.check_final_root(&clock).unwrap();

    let targets_bytes = fixture.targets_bytes(1, soon, "hello.txt", b"Hello, world!").await;
    let snapshot_bytes = fixture.snapshot_bytes(1, root_expires, 1, &targets_bytes).await;
    let timestamp_bytes = fixture
        .timestamp_bytes(1, root_expires, 1, &snapshot_bytes)
        .await;
    set.update_timestamp(timestamp_bytes, &clock).unwrap();
    set.update_snapshot(snapshot_bytes, &clock).unwrap();

    // `soon` has already passed relative to `clock` (pinned two days after `reference_now`).
    let err = set.update_targets(targets_bytes, &clock).unwrap_err();
    assert!(matches!(err, tuf::Error::ExpiredMetadata { .. }));
}

#[tokio::test]
async fn fresh_repo_with_generous_expiry_refreshes_cleanly() {
    let fetcher = Arc::new(MapFetcher::new());
    let repo = build_basic_repo(days(30)).await;
    populate_fetcher(&fetcher, "http://metadata.example/", &repo);
    let mut updater = Updater::new(
        repo.root.bytes().to_vec(),
        Url::parse("http://metadata.example/").unwrap(),
        Url::parse("http://targets.example/").unwrap(),
        fetcher.clone(),
        None,
        Settings::default(),
    )
    .await
    .unwrap()
    .with_clock(Arc::new(FixedClock(reference_now())));
    updater.refresh().await.expect("should not be expired");
}
