// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The delegation resolver: a depth- and visit-bounded DFS over the DAG of delegated targets
//! roles rooted at the top-level `targets` role.

use crate::error::{self, Result};
use crate::metadata::TargetFile;
use crate::trust::{Clock, TrustedMetadataSet};
use async_recursion::async_recursion;
use async_trait::async_trait;
use snafu::ensure;
use std::collections::HashSet;

/// Default maximum delegation depth (how many `delegations.roles` hops deep the DFS will go).
pub const DEFAULT_MAX_DEPTH: u32 = 32;
/// Default maximum number of distinct delegated roles visited across one lookup.
pub const DEFAULT_MAX_VISITED: u32 = DEFAULT_MAX_DEPTH * DEFAULT_MAX_DEPTH;

/// Bounds on the resolver's traversal, mirroring [`crate::trust::Limits`] for metadata size.
#[derive(Debug, Clone, Copy)]
pub struct DelegationLimits {
    pub max_depth: u32,
    pub max_visited: u32,
}

impl Default for DelegationLimits {
    fn default() -> Self {
        DelegationLimits {
            max_depth: DEFAULT_MAX_DEPTH,
            max_visited: DEFAULT_MAX_VISITED,
        }
    }
}

/// Fetches and admits a single delegated targets role on demand, during resolution. Implemented
/// by [`crate::updater::Updater`]; split out as its own trait so the resolver can be unit tested
/// without a full `Updater`.
#[async_trait]
pub trait DelegationLoader: Send + Sync {
    async fn load_delegated_role(
        &self,
        name: &str,
        parent_name: &str,
        set: &mut TrustedMetadataSet,
        clock: &dyn Clock,
    ) -> Result<()>;
}

/// Resolves `path` against `set`'s admitted (and lazily-fetched) targets metadata, per the
/// pre-order DFS with an explicit `visited` set described in this crate's design notes.
pub async fn resolve(
    path: &str,
    set: &mut TrustedMetadataSet,
    clock: &dyn Clock,
    loader: &dyn DelegationLoader,
    limits: DelegationLimits,
) -> Result<Option<(TargetFile, String)>> {
    let mut visited = HashSet::new();
    let mut visit_count = 0u32;
    resolve_inner(
        path,
        "targets",
        0,
        set,
        clock,
        loader,
        limits,
        &mut visited,
        &mut visit_count,
    )
    .await
}

#[async_recursion]
#[allow(clippy::too_many_arguments)]
async fn resolve_inner(
    path: &str,
    role_name: &str,
    depth: u32,
    set: &mut TrustedMetadataSet,
    clock: &(dyn Clock + 'async_recursion),
    loader: &(dyn DelegationLoader + 'async_recursion),
    limits: DelegationLimits,
    visited: &mut HashSet<String>,
    visit_count: &mut u32,
) -> Result<Option<(TargetFile, String)>> {
    {
        ensure!(
            depth <= limits.max_depth,
            error::DelegationLimitExceededSnafu {
                path: path.to_string(),
            }
        );
        *visit_count += 1;
        ensure!(
            *visit_count <= limits.max_visited,
            error::DelegationLimitExceededSnafu {
                path: path.to_string(),
            }
        );

        let current = if role_name == "targets" {
            set.targets()
        } else {
            set.delegated(role_name)
        }
        .context_not_initialized()?;

        if let Some(target_file) = current.find_target(path) {
            return Ok(Some((target_file.clone(), role_name.to_string())));
        }

        let Some(delegations) = current.delegations.clone() else {
            return Ok(None);
        };

        for delegated_role in &delegations.roles {
            if !delegated_role.path_is_match(path)? {
                continue;
            }
            if visited.contains(&delegated_role.name) {
                // Cycle: this role was already resolved on this lookup's path.
                continue;
            }
            visited.insert(delegated_role.name.clone());

            if set.delegated(&delegated_role.name).is_none() {
                loader
                    .load_delegated_role(&delegated_role.name, role_name, set, clock)
                    .await?;
            }

            let hit = resolve_inner(
                path,
                &delegated_role.name,
                depth + 1,
                set,
                clock,
                loader,
                limits,
                visited,
                visit_count,
            )
            .await?;

            if hit.is_some() {
                return Ok(hit);
            }
            if delegated_role.terminating {
                return Ok(None);
            }
        }

        Ok(None)
    }
}

trait NotInitializedExt<T> {
    fn context_not_initialized(self) -> Result<T>;
}

impl<T> NotInitializedExt<T> for Option<T> {
    fn context_not_initialized(self) -> Result<T> {
        self.ok_or_else(|| error::NotInitializedSnafu.build())
    }
}
