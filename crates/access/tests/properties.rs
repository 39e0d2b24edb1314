//! End-to-end checks of the access plane's guarantees, one test per
//! property, run through the `AccessPoint` trait object the way node agents
//! and auth servers use it.
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::{sync::Arc, time::Duration};

use certplane_access::{
    AccessError, AccessPoint, Authorization, CertKind, ErrorKind, HostCertificateRequest, Role,
    assert_error_kind,
    testutil::{generate_public_key, sample_server, test_access_point},
};
use tokio::task::JoinSet;

fn access_point() -> Arc<dyn AccessPoint> {
    Arc::new(test_access_point())
}

fn host_request(node_id: &str, role: Role) -> HostCertificateRequest {
    HostCertificateRequest::builder()
        .node_id(node_id)
        .role(role)
        .public_key(generate_public_key())
        .validity(Duration::from_secs(3600))
        .build()
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn heartbeat_is_idempotent() {
    let access = access_point();
    let server = sample_server("node-1");

    access.upsert_server(&server, Duration::from_secs(30)).await.expect("first heartbeat");
    access.upsert_server(&server, Duration::from_secs(30)).await.expect("second heartbeat");

    let servers = access.servers().await.expect("list servers");
    assert_eq!(servers.iter().filter(|s| s.id == "node-1").count(), 1);
}

#[tokio::test]
async fn concurrent_heartbeats_for_one_node_converge() {
    let access = access_point();
    let mut tasks = JoinSet::new();
    for i in 0..16 {
        let access = Arc::clone(&access);
        tasks.spawn(async move {
            let mut server = sample_server("node-1");
            server.addr = format!("10.0.0.{i}:3022");
            access.upsert_server(&server, Duration::from_secs(30)).await
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.expect("task panicked").expect("heartbeat");
    }

    let servers = access.servers().await.expect("list servers");
    assert_eq!(servers.len(), 1);
}

#[tokio::test]
async fn expired_heartbeats_disappear_and_permanent_ones_stay() {
    let access = access_point();
    access.upsert_server(&sample_server("short"), Duration::from_secs(1)).await.unwrap();
    access.upsert_server(&sample_server("forever"), Duration::ZERO).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let ids: Vec<String> =
        access.servers().await.unwrap().into_iter().map(|server| server.id).collect();
    assert_eq!(ids, vec!["forever".to_owned()]);
    assert_error_kind!(access.server("short").await, NotFound);
}

#[tokio::test]
async fn sub_second_ttl_is_rejected() {
    let access = access_point();
    let result = access.upsert_server(&sample_server("node-1"), Duration::from_millis(500)).await;
    assert!(matches!(result, Err(AccessError::InvalidTtl(_))), "{result:?}");
    assert!(access.servers().await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Provisioning and signing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_redemption_succeeds_exactly_once() {
    const REDEEMERS: usize = 32;

    let access = access_point();
    let token = access.create_token(Role::Node, Duration::from_secs(60)).await.unwrap();

    let mut tasks = JoinSet::new();
    for _ in 0..REDEEMERS {
        let access = Arc::clone(&access);
        let secret = token.expose_secret().to_owned();
        tasks.spawn(async move { access.redeem_token(&secret).await });
    }

    let mut successes = 0;
    let mut not_found = 0;
    while let Some(result) = tasks.join_next().await {
        match result.expect("task panicked") {
            Ok(grant) => {
                assert_eq!(grant.role(), Role::Node);
                successes += 1;
            },
            Err(err) => {
                assert_eq!(err.kind(), ErrorKind::TokenNotFound, "{err}");
                not_found += 1;
            },
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(not_found, REDEEMERS - 1);
}

#[tokio::test]
async fn signing_without_redemption_is_denied() {
    let access = access_point();
    access.initialize_authority(CertKind::Host).await.unwrap();

    // A grant from an unrelated access point was never issued here.
    let elsewhere = test_access_point();
    let token = elsewhere.create_token(Role::Node, Duration::from_secs(60)).await.unwrap();
    let foreign_grant = elsewhere.redeem_token(token.expose_secret()).await.unwrap();

    let result = access
        .sign_host_certificate(
            Authorization::Provisioned(foreign_grant),
            host_request("node-1", Role::Node),
        )
        .await;
    assert_error_kind!(result, PermissionDenied);
}

#[tokio::test]
async fn redeemed_grant_signs_exactly_one_certificate() {
    let access = access_point();
    access.initialize_authority(CertKind::Host).await.unwrap();

    let token = access.create_token(Role::Proxy, Duration::from_secs(60)).await.unwrap();
    let grant = access.redeem_token(token.expose_secret()).await.unwrap();

    let signed = access
        .sign_host_certificate(
            Authorization::Provisioned(grant.clone()),
            host_request("proxy-1", Role::Proxy),
        )
        .await
        .expect("first signing");
    assert_eq!(signed.certificate.roles, vec![Role::Proxy]);
    access.verify_certificate(&signed.encoded).await.expect("certificate verifies");

    let reused = access
        .sign_host_certificate(
            Authorization::Provisioned(grant),
            host_request("proxy-2", Role::Proxy),
        )
        .await;
    assert_error_kind!(reused, PermissionDenied);
}

#[tokio::test]
async fn grant_cannot_be_used_for_another_role() {
    let access = access_point();
    access.initialize_authority(CertKind::Host).await.unwrap();

    let token = access.create_token(Role::Node, Duration::from_secs(60)).await.unwrap();
    let grant = access.redeem_token(token.expose_secret()).await.unwrap();

    let escalated = access
        .sign_host_certificate(
            Authorization::Provisioned(grant.clone()),
            host_request("node-1", Role::Auth),
        )
        .await;
    assert_error_kind!(escalated, PermissionDenied);

    // The rejected attempt did not burn the grant.
    access
        .sign_host_certificate(
            Authorization::Provisioned(grant),
            host_request("node-1", Role::Node),
        )
        .await
        .expect("signing in the granted role");
}

#[tokio::test]
async fn user_certificates_reject_provisioning_grants() {
    let access = access_point();
    access.initialize_authority(CertKind::User).await.unwrap();

    let token = access.create_token(Role::Node, Duration::from_secs(60)).await.unwrap();
    let grant = access.redeem_token(token.expose_secret()).await.unwrap();

    let request = certplane_access::UserCertificateRequest::builder()
        .user("alice")
        .public_key(generate_public_key())
        .roles(vec![Role::User])
        .validity(Duration::from_secs(600))
        .build();
    let result = access.sign_user_certificate(Authorization::Provisioned(grant), request).await;
    assert_error_kind!(result, PermissionDenied);
}

#[tokio::test]
async fn missing_authority_is_reported_before_the_grant_is_spent() {
    let access = access_point();
    let token = access.create_token(Role::Node, Duration::from_secs(60)).await.unwrap();
    let grant = access.redeem_token(token.expose_secret()).await.unwrap();

    let result = access
        .sign_host_certificate(
            Authorization::Provisioned(grant.clone()),
            host_request("node-1", Role::Node),
        )
        .await;
    assert_error_kind!(result, NotInitialized);

    access.initialize_authority(CertKind::Host).await.unwrap();
    access
        .sign_host_certificate(
            Authorization::Provisioned(grant),
            host_request("node-1", Role::Node),
        )
        .await
        .expect("grant still usable");
}

// ---------------------------------------------------------------------------
// User keys
// ---------------------------------------------------------------------------

#[tokio::test]
async fn authorized_key_round_trip() {
    let access = access_point();
    let key = generate_public_key();

    access.upsert_authorized_key("alice", &key).await.unwrap();
    access.upsert_authorized_key("alice", &key).await.unwrap();

    let keys = access.user_keys("alice").await.unwrap();
    assert_eq!(keys.iter().filter(|k| k.key.to_string() == key).count(), 1);

    access.remove_authorized_key("alice", &format!("{key} some-comment")).await.unwrap();
    let keys = access.user_keys("alice").await.unwrap();
    assert!(keys.iter().all(|k| k.key.to_string() != key));

    access.remove_authorized_key("alice", &key).await.expect("removal is idempotent");
}

// ---------------------------------------------------------------------------
// Remote trust
// ---------------------------------------------------------------------------

#[tokio::test]
async fn remote_trust_filtering() {
    let access = access_point();
    let key = generate_public_key();
    let added = access.add_remote_cert(CertKind::Host, "cluster-b", &key).await.unwrap();

    let found = access.remote_certs(Some(CertKind::Host), Some("cluster-b")).await.unwrap();
    assert_eq!(found, vec![added]);

    let other = access.remote_certs(Some(CertKind::Host), Some("cluster-c")).await.unwrap();
    assert!(other.is_empty());
}

// ---------------------------------------------------------------------------
// Web sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn session_expiry_is_isolated_per_user() {
    let access = access_point();
    access.create_web_session("alice", Duration::from_secs(1)).await.unwrap();
    let bob = access.create_web_session("bob", Duration::from_secs(60)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(access.web_session_keys("alice").await.unwrap().is_empty());
    let bob_keys = access.web_session_keys("bob").await.unwrap();
    assert_eq!(bob_keys.len(), 1);
    assert_eq!(bob_keys[0].key, bob.public_key);
}

#[tokio::test]
async fn destroying_a_session_leaves_others_alone() {
    let access = access_point();
    let first = access.create_web_session("alice", Duration::from_secs(60)).await.unwrap();
    let second = access.create_web_session("alice", Duration::from_secs(60)).await.unwrap();

    access.destroy_web_session(&first.id).await.unwrap();

    let keys = access.web_session_keys("alice").await.unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].key, second.public_key);
    assert_error_kind!(access.web_session(&first.id).await, NotFound);
}

// ---------------------------------------------------------------------------
// Authority rotation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rotations_are_serialized() {
    let access = access_point();
    access.initialize_authority(CertKind::Host).await.unwrap();

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let access = Arc::clone(&access);
        tasks.spawn(async move { access.rotate_authority(CertKind::Host).await });
    }

    let mut rotated = 0;
    while let Some(result) = tasks.join_next().await {
        match result.expect("task panicked") {
            Ok(_) => rotated += 1,
            Err(err) => assert!(
                matches!(err.kind(), ErrorKind::RotationInProgress | ErrorKind::Conflict),
                "{err}"
            ),
        }
    }
    assert_eq!(rotated, 1);
    assert_eq!(access.ca_public_keys(CertKind::Host).await.unwrap().len(), 2);
}
