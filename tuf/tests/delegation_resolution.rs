// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! S5: a path matching a terminating delegation stops the search there, even when a later
//! sibling delegation would otherwise have matched too.

mod test_utils;

use std::sync::Arc;
use test_utils::*;
use tuf::builder::RepositoryBuilder;
use tuf::updater::{Settings, Updater};
use url::Url;

async fn updater_for(repo: &tuf::builder::SignedRepository, fetcher: Arc<MapFetcher>) -> Updater {
    populate_fetcher(&fetcher, "http://metadata.example/", repo);
    Updater::new(
        repo.root.bytes().to_vec(),
        Url::parse("http://metadata.example/").unwrap(),
        Url::parse("http://targets.example/").unwrap(),
        fetcher,
        None,
        Settings::default(),
    )
    .await
    .unwrap()
    .with_clock(Arc::new(FixedClock(reference_now())))
}

#[tokio::test]
async fn delegated_target_is_resolved_through_one_hop() {
    let repo = RepositoryBuilder::new()
        .consistent_snapshot(false)
        .version(1)
        .expires_in(days(7))
        .sign_root(new_ed25519_signer())
        .sign_timestamp(new_ed25519_signer())
        .sign_snapshot(new_ed25519_signer())
        .sign_targets(new_ed25519_signer())
        .delegate_role(
            "team-a",
            vec!["team-a/*".to_string()],
            1,
            false,
            vec![new_ed25519_signer()],
        )
        .add_delegated_target("team-a", "team-a/build.bin", b"binary contents")
        .build()
        .await
        .expect("repo with one delegation should build");

    let mut updater = updater_for(&repo, Arc::new(MapFetcher::new())).await;
    updater.refresh().await.unwrap();

    let target = updater
        .get_target_info("team-a/build.bin")
        .await
        .unwrap()
        .expect("delegated target should resolve");
    assert_eq!(target.length, "binary contents".len() as u64);
}

#[tokio::test]
async fn terminating_delegation_stops_the_search_even_without_a_hit() {
    // `team-a` is terminating and matches first; `team-b` would also match and does have the
    // target, but since `team-a` is visited first and is terminating, the search must stop at
    // `team-a` without a hit rather than fall through to `team-b`.
    let repo = RepositoryBuilder::new()
        .consistent_snapshot(false)
        .version(1)
        .expires_in(days(7))
        .sign_root(new_ed25519_signer())
        .sign_timestamp(new_ed25519_signer())
        .sign_snapshot(new_ed25519_signer())
        .sign_targets(new_ed25519_signer())
        .delegate_role(
            "team-a",
            vec!["shared/*".to_string()],
            1,
            true,
            vec![new_ed25519_signer()],
        )
        .delegate_role(
            "team-b",
            vec!["shared/*".to_string()],
            1,
            false,
            vec![new_ed25519_signer()],
        )
        .add_delegated_target("team-b", "shared/thing.bin", b"from team b")
        .build()
        .await
        .expect("repo with two delegations should build");

    let mut updater = updater_for(&repo, Arc::new(MapFetcher::new())).await;
    updater.refresh().await.unwrap();

    let result = updater.get_target_info("shared/thing.bin").await.unwrap();
    assert_eq!(result, None);
}

#[tokio::test]
async fn unmatched_path_never_triggers_a_delegated_fetch() {
    let fetcher = Arc::new(MapFetcher::new());

    let repo = RepositoryBuilder::new()
        .consistent_snapshot(false)
        .version(1)
        .expires_in(days(7))
        .add_target("hello.txt", b"Hello, world!")
        .sign_root(new_ed25519_signer())
        .sign_timestamp(new_ed25519_signer())
        .sign_snapshot(new_ed25519_signer())
        .sign_targets(new_ed25519_signer())
        .delegate_role(
            "team-a",
            vec!["team-a/*".to_string()],
            1,
            false,
            vec![new_ed25519_signer()],
        )
        .build()
        .await
        .unwrap();

    // Deliberately omit `team-a.json` from the fetcher; if the resolver tried to fetch it for a
    // path that doesn't match `team-a/*`, this test would fail with a `NotFound` error instead of
    // a clean `None`.
    populate_fetcher(&fetcher, "http://metadata.example/", &repo);
    fetcher.remove("http://metadata.example/team-a.json");

    let mut updater = Updater::new(
        repo.root.bytes().to_vec(),
        Url::parse("http://metadata.example/").unwrap(),
        Url::parse("http://targets.example/").unwrap(),
        fetcher,
        None,
        Settings::default(),
    )
    .await
    .unwrap()
    .with_clock(Arc::new(FixedClock(reference_now())));
    updater.refresh().await.unwrap();

    let target = updater.get_target_info("hello.txt").await.unwrap();
    assert!(target.is_some());

    let miss = updater.get_target_info("unrelated/path.bin").await.unwrap();
    assert_eq!(miss, None);
}
