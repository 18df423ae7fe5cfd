// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

// Not every integration test file uses every helper here.
#![allow(dead_code)]

use async_trait::async_trait;
use aws_lc_rs::rand::SystemRandom;
use aws_lc_rs::signature::Ed25519KeyPair;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tuf::builder::{RepositoryBuilder, SignedRepository};
use tuf::crypto::{Signer, SigningKey};
use tuf::error::{self, Result};
use tuf::trust::Clock;
use tuf::updater::{Cache, Fetcher};

/// An in-memory [`Fetcher`] backed by a fixed `url -> bytes` map, built up via [`MapFetcher::insert`]
/// and then swapped piece by piece as a test simulates a repository evolving.
#[derive(Default)]
pub struct MapFetcher {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MapFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, bytes: Vec<u8>) {
        self.entries.lock().unwrap().insert(url.into(), bytes);
    }

    pub fn remove(&self, url: &str) {
        self.entries.lock().unwrap().remove(url);
    }
}

#[async_trait]
impl Fetcher for MapFetcher {
    async fn fetch(&self, url: &str, max_bytes: u64, _deadline: Duration) -> Result<Vec<u8>> {
        let bytes = self
            .entries
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| error::NotFoundSnafu { url: url.to_string() }.build())?;
        if bytes.len() as u64 > max_bytes {
            return error::OversizedTargetSnafu {
                path: url.to_string(),
                limit: max_bytes,
            }
            .fail();
        }
        Ok(bytes)
    }
}

/// An in-memory [`Cache`], so tests can exercise the "admit from cache, then admit from network"
/// path without touching a filesystem.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().unwrap().get(name).cloned())
    }

    async fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(name);
        Ok(())
    }
}

/// A [`Clock`] that always reports the same instant, so expiration checks are deterministic.
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// A point in time comfortably in the past, for constructing already-expired fixtures.
pub fn long_ago() -> DateTime<Utc> {
    "2000-01-01T00:00:00Z".parse().unwrap()
}

/// A point in time comfortably in the future, used as the fixed "now" for most tests so that
/// metadata expiring "soon" in wall-clock terms never makes a test flaky.
pub fn reference_now() -> DateTime<Utc> {
    "2026-01-01T00:00:00Z".parse().unwrap()
}

/// A point far enough past any wall-clock-relative expiry that [`build_basic_repo`]'s output
/// (which stamps `expires` off the real clock, not [`reference_now`]) is guaranteed expired by
/// the time a test checks it.
pub fn far_future() -> DateTime<Utc> {
    Utc::now() + ChronoDuration::days(3650)
}

pub fn days(n: i64) -> ChronoDuration {
    ChronoDuration::days(n)
}

/// Generates a fresh Ed25519 signer. Each call produces an independent key, which is how these
/// tests get distinct "old key" vs. "new key" signers for root rotation scenarios.
pub fn new_ed25519_signer() -> Box<dyn Signer> {
    let rng = SystemRandom::new();
    let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).expect("key generation");
    let keypair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).expect("parse freshly generated key");
    Box::new(SigningKey::Ed25519(keypair))
}

/// Builds a minimal, internally consistent repository: one target (`hello.txt` containing
/// `"Hello, world!"`), signed by freshly generated single Ed25519 keys per role, each role
/// expiring `expires_in` from now (`reference_now()` if the caller is also using a [`FixedClock`]
/// with that same instant).
pub async fn build_basic_repo(expires_in: ChronoDuration) -> SignedRepository {
    RepositoryBuilder::new()
        .consistent_snapshot(false)
        .version(1)
        .expires_in(expires_in)
        .add_target("hello.txt", b"Hello, world!")
        .sign_root(new_ed25519_signer())
        .sign_timestamp(new_ed25519_signer())
        .sign_snapshot(new_ed25519_signer())
        .sign_targets(new_ed25519_signer())
        .build()
        .await
        .expect("basic repo should build")
}

/// Assembles the `MapFetcher` entries a [`tuf::updater::Updater`] expects for a non-consistent-
/// snapshot repository built from `repo`, rooted at `metadata_base_url`/`targets_base_url`.
pub fn populate_fetcher(fetcher: &MapFetcher, metadata_base_url: &str, repo: &SignedRepository) {
    fetcher.insert(
        format!("{metadata_base_url}1.root.json"),
        repo.root.bytes().to_vec(),
    );
    fetcher.insert(
        format!("{metadata_base_url}timestamp.json"),
        repo.timestamp.bytes().to_vec(),
    );
    fetcher.insert(
        format!("{metadata_base_url}snapshot.json"),
        repo.snapshot.bytes().to_vec(),
    );
    fetcher.insert(
        format!("{metadata_base_url}targets.json"),
        repo.targets.bytes().to_vec(),
    );
    for (name, signed) in &repo.delegated {
        fetcher.insert(
            format!("{metadata_base_url}{name}.json"),
            signed.bytes().to_vec(),
        );
    }
}
