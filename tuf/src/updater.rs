// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [`Updater`]: orchestrates `refresh()`, `get_target_info()`, and `download_target()` against a
//! caller-supplied [`Fetcher`], admitting every document it receives through
//! [`crate::trust::TrustedMetadataSet`].

use crate::delegation::{self, DelegationLimits, DelegationLoader};
use crate::error::{self, IntegrityFailureKind, Result};
use crate::metadata::{RoleType, TargetFile};
use crate::trust::{Clock, Limits, SystemClock, TrustedMetadataSet};
use async_trait::async_trait;
use log::error as log_error;
use snafu::{ensure, OptionExt, ResultExt};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// The network collaborator this crate's trust logic is built against. Implementations may
/// retry/backoff internally; from this crate's point of view one call is one logical fetch.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches `url`, failing if the response exceeds `max_bytes` or `deadline` elapses first.
    async fn fetch(&self, url: &str, max_bytes: u64, deadline: Duration) -> Result<Vec<u8>>;
}

/// An optional local persistence layer for admitted metadata bytes. A cache hit is fed through
/// the same admission path as a network response - it is a hint, never a trust shortcut.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;
    async fn write(&self, name: &str, bytes: &[u8]) -> Result<()>;
    async fn delete(&self, name: &str) -> Result<()>;
}

/// Tunables for one [`Updater`]: metadata size ceilings, delegation traversal bounds, and the
/// per-fetch deadline.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub limits: Limits,
    pub delegation_limits: DelegationLimits,
    pub fetch_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            limits: Limits::default(),
            delegation_limits: DelegationLimits::default(),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

/// Orchestrates metadata refresh and target resolution/download for one repository.
pub struct Updater {
    metadata_base_url: Url,
    targets_base_url: Url,
    fetcher: Arc<dyn Fetcher>,
    cache: Option<Arc<dyn Cache>>,
    clock: Arc<dyn Clock>,
    settings: Settings,
    set: TrustedMetadataSet,
    refreshed: bool,
}

impl Updater {
    /// Bootstraps trust from `initial_root_bytes` (the out-of-band trust anchor) and prepares to
    /// fetch subsequent metadata/targets from the given base URLs.
    pub async fn new(
        initial_root_bytes: Vec<u8>,
        metadata_base_url: Url,
        targets_base_url: Url,
        fetcher: Arc<dyn Fetcher>,
        cache: Option<Arc<dyn Cache>>,
        settings: Settings,
    ) -> Result<Self> {
        let set = TrustedMetadataSet::new(initial_root_bytes, settings.limits)?;
        Ok(Updater {
            metadata_base_url,
            targets_base_url,
            fetcher,
            cache,
            clock: Arc::new(SystemClock),
            settings,
            set,
            refreshed: false,
        })
    }

    /// Overrides the clock used for expiration checks. Intended for tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn trusted_root(&self) -> &crate::metadata::Root {
        self.set.root()
    }

    async fn fetch_metadata(&self, filename: &str, role: RoleType) -> Result<Vec<u8>> {
        let url = format!("{}{}", self.metadata_base_url, filename);
        self.fetcher
            .fetch(
                &url,
                self.settings.limits.for_role(role),
                self.settings.fetch_timeout,
            )
            .await
    }

    async fn fetch_metadata_optional(
        &self,
        filename: &str,
        role: RoleType,
    ) -> Result<Option<Vec<u8>>> {
        match self.fetch_metadata(filename, role).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(crate::error::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Walks root → timestamp → snapshot → targets, admitting each into the
    /// `TrustedMetadataSet`. On success, `get_target_info`/`download_target` become usable.
    pub async fn refresh(&mut self) -> Result<()> {
        // 1. Root rotation walk.
        loop {
            let next_version = self.set.root().version + 1;
            let filename = format!("{next_version}.root.json");
            match self
                .fetch_metadata_optional(&filename, RoleType::Root)
                .await?
            {
                Some(bytes) => self.set.update_root(bytes)?,
                None => break,
            }
        }

        // 2. Final root expiration check.
        self.set.check_final_root(self.clock.as_ref())?;

        // 3. Timestamp (never version-prefixed).
        let timestamp_bytes = self
            .fetch_metadata("timestamp.json", RoleType::Timestamp)
            .await?;
        self.set
            .update_timestamp(timestamp_bytes, self.clock.as_ref())?;

        // 4. Snapshot.
        let consistent = self.set.root().consistent_snapshot;
        let snapshot_version = self
            .set
            .timestamp()
            .expect("just admitted")
            .snapshot_meta()?
            .version;
        let snapshot_filename = if consistent {
            format!("{snapshot_version}.snapshot.json")
        } else {
            "snapshot.json".to_string()
        };
        let snapshot_bytes = self
            .fetch_metadata(&snapshot_filename, RoleType::Snapshot)
            .await?;
        self.set
            .update_snapshot(snapshot_bytes, self.clock.as_ref())?;

        // 5. Top-level targets.
        let targets_version = self
            .set
            .snapshot()
            .expect("just admitted")
            .meta
            .get("targets.json")
            .context(error::MalformedMetadataSnafu {
                role: RoleType::Snapshot,
                message: "snapshot.json is missing the targets.json entry".to_string(),
            })?
            .version;
        let targets_filename = if consistent {
            format!("{targets_version}.targets.json")
        } else {
            "targets.json".to_string()
        };
        let targets_bytes = self
            .fetch_metadata(&targets_filename, RoleType::Targets)
            .await?;
        self.set
            .update_targets(targets_bytes, self.clock.as_ref())?;

        self.refreshed = true;
        Ok(())
    }

    fn require_refreshed(&self) -> Result<()> {
        ensure!(self.refreshed, error::NotInitializedSnafu);
        Ok(())
    }

    /// Resolves `path` through the delegation DAG, fetching any delegated roles along the way
    /// that have not yet been admitted. Fails fast with `NotInitialized` if `refresh()` has never
    /// completed - this method never triggers an implicit refresh (see design notes).
    pub async fn get_target_info(&mut self, path: &str) -> Result<Option<TargetFile>> {
        self.require_refreshed()?;
        let clock = Arc::clone(&self.clock);
        // `RoleLoader` borrows only the fields it needs (not `self.set`) so it can be handed to
        // the resolver alongside a simultaneous `&mut self.set`.
        let loader = RoleLoader {
            metadata_base_url: &self.metadata_base_url,
            fetcher: &self.fetcher,
            cache: &self.cache,
            limits: self.settings.limits,
            fetch_timeout: self.settings.fetch_timeout,
        };
        let hit = delegation::resolve(
            path,
            &mut self.set,
            clock.as_ref(),
            &loader,
            self.settings.delegation_limits,
        )
        .await?;
        Ok(hit.map(|(target_file, _role)| target_file))
    }

    /// Downloads and verifies the bytes for a [`TargetFile`] previously returned by
    /// `get_target_info`. If `local_dest` is given, the verified bytes are also written there;
    /// the returned path is `local_dest` in that case, or `path` otherwise.
    pub async fn download_target(
        &self,
        target_file: &TargetFile,
        path: &str,
        local_dest: Option<&std::path::Path>,
    ) -> Result<(String, Vec<u8>)> {
        let consistent = self.set.root().consistent_snapshot;
        let url = if consistent {
            let (_alg, digest) = target_file
                .hashes
                .iter()
                .next()
                .context(error::MalformedMetadataSnafu {
                    role: RoleType::Targets,
                    message: format!("target {path:?} has no hashes"),
                })?;
            let basename = path.rsplit('/').next().unwrap_or(path);
            format!("{}{}.{}", self.targets_base_url, digest, basename)
        } else {
            format!("{}{}", self.targets_base_url, path)
        };

        let bytes = self
            .fetcher
            .fetch(&url, target_file.length, self.settings.fetch_timeout)
            .await?;

        if bytes.len() as u64 != target_file.length {
            log_error!(
                "target {path:?} is {} bytes, expected {}",
                bytes.len(),
                target_file.length
            );
            return error::IntegrityFailureSnafu {
                path: path.to_string(),
                kind: IntegrityFailureKind::Length,
            }
            .fail();
        }
        for (alg, expected_hex) in &target_file.hashes {
            let actual_hex = match alg.as_str() {
                "sha256" => {
                    hex::encode(aws_lc_rs::digest::digest(&aws_lc_rs::digest::SHA256, &bytes))
                }
                "sha512" => {
                    hex::encode(aws_lc_rs::digest::digest(&aws_lc_rs::digest::SHA512, &bytes))
                }
                _ => continue,
            };
            if &actual_hex != expected_hex {
                log_error!("target {path:?} failed {alg} integrity check");
                return error::IntegrityFailureSnafu {
                    path: path.to_string(),
                    kind: IntegrityFailureKind::Hash,
                }
                .fail();
            }
        }

        let written_path = if let Some(dest) = local_dest {
            tokio::fs::write(dest, &bytes)
                .await
                .context(error::LocalWriteSnafu {
                    path: dest.to_path_buf(),
                })?;
            dest.display().to_string()
        } else {
            path.to_string()
        };

        Ok((written_path, bytes))
    }
}

/// Borrows only the fields of [`Updater`] needed to fetch a delegated role on demand, so that
/// `get_target_info` can hold this alongside a live `&mut` borrow of the `TrustedMetadataSet`.
struct RoleLoader<'a> {
    metadata_base_url: &'a Url,
    fetcher: &'a Arc<dyn Fetcher>,
    cache: &'a Option<Arc<dyn Cache>>,
    limits: Limits,
    fetch_timeout: Duration,
}

impl<'a> RoleLoader<'a> {
    async fn fetch(&self, filename: &str, role: RoleType) -> Result<Vec<u8>> {
        let url = format!("{}{}", self.metadata_base_url, filename);
        self.fetcher
            .fetch(&url, self.limits.for_role(role), self.fetch_timeout)
            .await
    }
}

#[async_trait]
impl<'a> DelegationLoader for RoleLoader<'a> {
    async fn load_delegated_role(
        &self,
        name: &str,
        parent_name: &str,
        set: &mut TrustedMetadataSet,
        clock: &dyn Clock,
    ) -> Result<()> {
        let consistent = set.root().consistent_snapshot;
        let filename = if consistent {
            let version = set
                .snapshot()
                .context(error::NotInitializedSnafu)?
                .meta
                .get(&format!("{name}.json"))
                .context(error::MalformedMetadataSnafu {
                    role: RoleType::Snapshot,
                    message: format!("snapshot.json is missing the {name}.json entry"),
                })?
                .version;
            format!("{version}.{name}.json")
        } else {
            format!("{name}.json")
        };

        let bytes = if let Some(cache) = self.cache {
            if let Some(cached) = cache.read(&filename).await? {
                cached
            } else {
                let fetched = self.fetch(&filename, RoleType::Targets).await?;
                cache.write(&filename, &fetched).await?;
                fetched
            }
        } else {
            self.fetch(&filename, RoleType::Targets).await?
        };

        set.update_delegated_targets(name, parent_name, bytes, clock)
    }
}
