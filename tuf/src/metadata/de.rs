// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Small `serde(deserialize_with = ...)` helpers shared by the role structs in
//! [`super`].

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

/// Deserializes a role's `version` field, rejecting `0` - every role version in TUF is `>= 1`.
pub(super) fn deserialize_version<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let version = u64::deserialize(deserializer)?;
    if version == 0 {
        return Err(D::Error::custom("role version must be >= 1, got 0"));
    }
    Ok(version)
}
