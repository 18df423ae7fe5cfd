// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! TAP 4 multi-repository consensus: a thin policy layer composing several independent
//! [`Updater`]s under a path-mapping `Map` document.

use crate::error::{self, Result};
use crate::metadata::TargetFile;
use crate::updater::Updater;
use futures::future::join_all;
use globset::GlobBuilder;
use serde::{Deserialize, Serialize};
use snafu::OptionExt;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

/// One entry in a [`Map`]'s `repositories` table: enough to construct an [`Updater`] for that
/// repository. Constructing the actual `Updater`s (which requires a `Fetcher`) is left to the
/// caller; this struct only carries the configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub metadata_url: String,
    pub targets_url: String,
}

/// One `mapping` rule: for any target path matched by `paths`, consult `repositories` and
/// require `threshold` of them to agree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingRule {
    pub paths: Vec<String>,
    pub repositories: Vec<String>,
    pub threshold: u64,
    #[serde(default)]
    pub terminating: bool,
}

impl MappingRule {
    fn path_is_match(&self, path: &str) -> Result<bool> {
        for pattern in &self.paths {
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| {
                    error::MalformedMetadataSnafu {
                        role: crate::metadata::RoleType::Targets,
                        message: format!("multi-repo mapping rule has an invalid pattern {pattern:?}: {e}"),
                    }
                    .build()
                })?;
            if glob.compile_matcher().is_match(path) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// The `map.json` document: named repositories plus an ordered list of mapping rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Map {
    pub repositories: BTreeMap<String, RepositoryConfig>,
    pub mapping: Vec<MappingRule>,
}

/// Composes one [`Updater`] per configured repository under a [`Map`]'s policy.
pub struct MultiRepoClient {
    map: Map,
    updaters: HashMap<String, Mutex<Updater>>,
}

impl MultiRepoClient {
    /// Builds a client from a parsed `map.json` and the already-constructed, already-bootstrapped
    /// `Updater` for each named repository. Every name in `map.repositories` must have a
    /// corresponding entry in `updaters`.
    pub fn new(map: Map, updaters: HashMap<String, Updater>) -> Self {
        MultiRepoClient {
            map,
            updaters: updaters.into_iter().map(|(k, v)| (k, Mutex::new(v))).collect(),
        }
    }

    /// Refreshes every configured repository concurrently. Each repository has its own isolated
    /// `TrustedMetadataSet`; a failure in one does not prevent the others from refreshing.
    pub async fn refresh_all(&self) -> HashMap<String, Result<()>> {
        let names: Vec<&String> = self.updaters.keys().collect();
        let futures = names.iter().map(|name| {
            let name = (*name).clone();
            async move {
                let mut updater = self.updaters[&name].lock().await;
                (name, updater.refresh().await)
            }
        });
        join_all(futures).await.into_iter().collect()
    }

    /// Resolves `path` per TAP 4: walks `mapping` rules in order, and for the first rule whose
    /// `paths` matches, queries every named repository concurrently and requires `threshold`
    /// agreeing `(length, hashes)` results before returning.
    pub async fn get_target_info(
        &self,
        path: &str,
    ) -> Result<Option<(TargetFile, Vec<String>)>> {
        for rule in &self.map.mapping {
            if !rule.path_is_match(path)? {
                continue;
            }

            let lookups = rule.repositories.iter().map(|name| {
                let path = path.to_string();
                async move {
                    let Some(updater) = self.updaters.get(name) else {
                        return (name.clone(), None);
                    };
                    let mut updater = updater.lock().await;
                    let result = updater.get_target_info(&path).await;
                    (name.clone(), result.ok().flatten())
                }
            });
            let results = join_all(lookups).await;

            // Group by (length, hashes) equality, ignoring `custom`. Repos that errored or had
            // no entry for `path` contribute no vote.
            let mut groups: Vec<(TargetFile, Vec<String>)> = Vec::new();
            for (name, target_file) in results {
                continue_unless_some(&mut groups, name, target_file);
            }

            for (target_file, agreeing) in &groups {
                if agreeing.len() as u64 >= rule.threshold {
                    return Ok(Some((target_file.clone(), agreeing.clone())));
                }
            }

            if rule.terminating {
                return Ok(None);
            }
        }
        Ok(None)
    }

    /// Downloads `path` from whichever of `agreeing`'s repositories (as returned by
    /// `get_target_info`) is asked first; every named repository already agrees on
    /// `target_file`'s `(length, hashes)`, so any one of them is an equally trustworthy source.
    pub async fn download_target(
        &self,
        target_file: &TargetFile,
        path: &str,
        agreeing: &[String],
        local_dest: Option<&std::path::Path>,
    ) -> Result<(String, Vec<u8>)> {
        let name = agreeing
            .first()
            .context(error::MalformedMetadataSnafu {
                role: crate::metadata::RoleType::Targets,
                message: format!("no agreeing repository given for target {path:?}"),
            })?;
        let updater = self
            .updaters
            .get(name)
            .context(error::MalformedMetadataSnafu {
                role: crate::metadata::RoleType::Targets,
                message: format!("{name:?} is not a configured repository"),
            })?;
        updater
            .lock()
            .await
            .download_target(target_file, path, local_dest)
            .await
    }
}

fn continue_unless_some(
    groups: &mut Vec<(TargetFile, Vec<String>)>,
    name: String,
    target_file: Option<TargetFile>,
) {
    let Some(target_file) = target_file else {
        return;
    };
    for (existing, names) in groups.iter_mut() {
        if existing.consensus_eq(&target_file) {
            names.push(name);
            return;
        }
    }
    groups.push((target_file, vec![name]));
}
