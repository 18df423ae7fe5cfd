// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! S6: TAP 4 multi-repository consensus - a target is only trusted once enough of the mapped
//! repositories agree on its `(length, hashes)`.

mod test_utils;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use test_utils::*;
use tuf::multi_repo::{Map, MappingRule, MultiRepoClient, RepositoryConfig};
use tuf::updater::{Settings, Updater};
use url::Url;

async fn updater_from(repo: &tuf::builder::SignedRepository, metadata_url: &str, targets_url: &str) -> Updater {
    let fetcher = Arc::new(MapFetcher::new());
    populate_fetcher(&fetcher, metadata_url, repo);
    Updater::new(
        repo.root.bytes().to_vec(),
        Url::parse(metadata_url).unwrap(),
        Url::parse(targets_url).unwrap(),
        fetcher,
        None,
        Settings::default(),
    )
    .await
    .unwrap()
    .with_clock(Arc::new(FixedClock(reference_now())))
}

fn two_repo_map(threshold: u64) -> Map {
    let mut repositories = BTreeMap::new();
    repositories.insert(
        "repo-a".to_string(),
        RepositoryConfig {
            metadata_url: "http://a.example/".to_string(),
            targets_url: "http://a-targets.example/".to_string(),
        },
    );
    repositories.insert(
        "repo-b".to_string(),
        RepositoryConfig {
            metadata_url: "http://b.example/".to_string(),
            targets_url: "http://b-targets.example/".to_string(),
        },
    );
    Map {
        repositories,
        mapping: vec![MappingRule {
            paths: vec!["*".to_string()],
            repositories: vec!["repo-a".to_string(), "repo-b".to_string()],
            threshold,
            terminating: true,
        }],
    }
}

#[tokio::test]
async fn agreeing_repositories_reach_threshold() {
    let repo_a = build_basic_repo(days(7)).await;
    let repo_b = build_basic_repo(days(7)).await;

    let updater_a = updater_from(&repo_a, "http://a.example/", "http://a-targets.example/").await;
    let updater_b = updater_from(&repo_b, "http://b.example/", "http://b-targets.example/").await;

    let mut updaters = HashMap::new();
    updaters.insert("repo-a".to_string(), updater_a);
    updaters.insert("repo-b".to_string(), updater_b);

    let client = MultiRepoClient::new(two_repo_map(2), updaters);
    let results = client.refresh_all().await;
    for result in results.values() {
        assert!(result.is_ok());
    }

    let (target, agreeing) = client
        .get_target_info("hello.txt")
        .await
        .unwrap()
        .expect("both repos agree on hello.txt");
    assert_eq!(target.length, 13);
    assert_eq!(agreeing.len(), 2);
}

#[tokio::test]
async fn single_dissenting_repository_blocks_a_threshold_of_two() {
    let repo_a = build_basic_repo(days(7)).await;
    // A differently built repo, so its per-target hash differs even where the path matches.
    let repo_b = basic_repo_with_different_content().await;

    let updater_a = updater_from(&repo_a, "http://a.example/", "http://a-targets.example/").await;
    let updater_b = updater_from(&repo_b, "http://b.example/", "http://b-targets.example/").await;

    let mut updaters = HashMap::new();
    updaters.insert("repo-a".to_string(), updater_a);
    updaters.insert("repo-b".to_string(), updater_b);

    let client = MultiRepoClient::new(two_repo_map(2), updaters);
    client.refresh_all().await;

    let result = client.get_target_info("hello.txt").await.unwrap();
    assert_eq!(result, None);
}

#[tokio::test]
async fn threshold_of_one_is_satisfied_by_either_repository_alone() {
    let repo_a = build_basic_repo(days(7)).await;
    let repo_b = basic_repo_with_different_content().await;

    let updater_a = updater_from(&repo_a, "http://a.example/", "http://a-targets.example/").await;
    let updater_b = updater_from(&repo_b, "http://b.example/", "http://b-targets.example/").await;

    let mut updaters = HashMap::new();
    updaters.insert("repo-a".to_string(), updater_a);
    updaters.insert("repo-b".to_string(), updater_b);

    let client = MultiRepoClient::new(two_repo_map(1), updaters);
    client.refresh_all().await;

    let (_, agreeing) = client
        .get_target_info("hello.txt")
        .await
        .unwrap()
        .expect("threshold of one is satisfied by whichever repo is grouped first");
    assert_eq!(agreeing.len(), 1);
}

/// A second "hello.txt", but with different content, so its hash never matches `repo_a`'s copy -
/// used to simulate a dissenting repository in the consensus tests above.
async fn basic_repo_with_different_content() -> tuf::builder::SignedRepository {
    tuf::builder::RepositoryBuilder::new()
        .consistent_snapshot(false)
        .version(1)
        .expires_in(days(7))
        .add_target("hello.txt", b"Hello, world?!")
        .sign_root(new_ed25519_signer())
        .sign_timestamp(new_ed25519_signer())
        .sign_snapshot(new_ed25519_signer())
        .sign_targets(new_ed25519_signer())
        .build()
        .await
        .expect("second basic repo should build")
}
