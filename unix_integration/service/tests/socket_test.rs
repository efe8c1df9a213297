#![deny(warnings)]
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeResolver, Harness};
use realmd_common::client::DaemonClient;
use realmd_common::config::AuthzPolicy;
use realmd_common::constants::ACTION_CONFIGURE_REALM;
use realmd_common::error::RealmError;
use realmd_common::proto::{ClientRequest, ClientResponse, CredentialArg, Options, RealmKind};
use realmd_service::daemon::Daemon;
use realmd_service::server::run_listener;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

const SSSD_CONF: &str = "[sssd]
domains = example.com

[domain/example.com]
id_provider = ad
krb5_realm = EXAMPLE.COM
";

#[tokio::test]
async fn test_requests_over_the_socket() {
    let harness = Harness::new();
    harness.write_file(&harness.config.sssd_conf, SSSD_CONF);
    let daemon = harness
        .daemon(FakeResolver::new().with_srv("_kerberos._udp.example.com", &[("dc1.example.com", 88)]))
        .await;

    let sock_path = harness.config.sock_path.clone();
    let listener = UnixListener::bind(&sock_path).expect("Failed to bind socket");
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let server = tokio::spawn(run_listener(listener, Arc::clone(&daemon), shutdown_rx));

    let mut client = DaemonClient::new(&sock_path, 10)
        .await
        .expect("Failed to connect");

    match client.call(ClientRequest::Status, None).await {
        Ok(ClientResponse::Status(status)) => {
            assert!(!status.busy);
            assert_eq!(status.realms, 1);
            assert!(status.holds.iter().any(|h| h.starts_with("connection-")));
        }
        other => panic!("unexpected response {:?}", other),
    }

    match client.call(ClientRequest::ListRealms, None).await {
        Ok(ClientResponse::Realms(realms)) => {
            assert_eq!(realms.len(), 1);
            assert_eq!(realms[0].name, "example.com");
            assert_eq!(realms[0].kind, RealmKind::SssdAd);
            assert!(realms[0].configured);
        }
        other => panic!("unexpected response {:?}", other),
    }

    let mut lines: Vec<String> = Vec::new();
    let res = client
        .call_with_diagnostics(
            ClientRequest::Discover {
                string: "example.com".to_string(),
                options: Options::default(),
            },
            None,
            |line| lines.push(line.to_string()),
        )
        .await;
    match res {
        Ok(ClientResponse::Discovered { relevance, realms }) => {
            assert_eq!(relevance, 100);
            assert_eq!(realms[0].kind, RealmKind::SssdAd);
            assert_eq!(realms[0].realm_name.as_deref(), Some("EXAMPLE.COM"));
        }
        other => panic!("unexpected response {:?}", other),
    }
    assert!(lines
        .iter()
        .any(|l| l.contains("Searching for kerberos SRV records on domain: example.com")));

    // Cancelling something that isn't running is not an error.
    assert!(matches!(
        client
            .call(
                ClientRequest::Cancel {
                    operation: "no-such-operation".to_string()
                },
                None
            )
            .await,
        Ok(ClientResponse::Success)
    ));

    drop(client);
    shutdown_tx.send(true).expect("Failed to signal shutdown");
    server.await.expect("listener task failed");
}

#[tokio::test]
async fn test_requests_on_one_connection_are_answered_in_order() {
    let harness = Harness::new();
    let daemon = harness.daemon(FakeResolver::new()).await;

    let sock_path = harness.config.sock_path.clone();
    let listener = UnixListener::bind(&sock_path).expect("Failed to bind socket");
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let server = tokio::spawn(run_listener(listener, Arc::clone(&daemon), shutdown_rx));

    let mut client = DaemonClient::new(&sock_path, 10)
        .await
        .expect("Failed to connect");
    for _ in 0..3 {
        assert!(matches!(
            client.call(ClientRequest::ListRealms, None).await,
            Ok(ClientResponse::Realms(realms)) if realms.is_empty()
        ));
        assert!(matches!(
            client.call(ClientRequest::Status, None).await,
            Ok(ClientResponse::Status(_))
        ));
    }

    drop(client);
    shutdown_tx.send(true).expect("Failed to signal shutdown");
    server.await.expect("listener task failed");
}

async fn send(stream: &mut UnixStream, req: &ClientRequest) {
    let mut line = serde_json::to_vec(req).expect("Failed to encode request");
    line.push(b'\n');
    stream.write_all(&line).await.expect("Failed to send request");
}

async fn wait_until_busy(daemon: &Daemon) {
    for _ in 0..250 {
        if daemon.is_busy() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("daemon never became busy");
}

#[tokio::test]
async fn test_cancel_on_the_same_connection() {
    let mut harness = Harness::new();
    harness.stub("host-soa", "exit 1");
    harness.stub("ipa-probe", "exit 1");
    harness.stub("kinit", "exec sleep 30");
    harness
        .config
        .authorization
        .insert(ACTION_CONFIGURE_REALM.to_string(), AuthzPolicy::Any);
    let daemon = harness
        .daemon(FakeResolver::new().with_srv("_kerberos._udp.example.org", &[("kdc.example.org", 88)]))
        .await;

    let sock_path = harness.config.sock_path.clone();
    let listener = UnixListener::bind(&sock_path).expect("Failed to bind socket");
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let server = tokio::spawn(run_listener(listener, Arc::clone(&daemon), shutdown_rx));

    let mut stream = UnixStream::connect(&sock_path)
        .await
        .expect("Failed to connect");
    let join = ClientRequest::Join {
        realm: "example.org".to_string(),
        credential: CredentialArg::password("administrator", "admin", "hunter2"),
        options: Options {
            operation: Some("join-1".to_string()),
            ..Default::default()
        },
    };
    send(&mut stream, &join).await;
    wait_until_busy(&daemon).await;
    send(
        &mut stream,
        &ClientRequest::Cancel {
            operation: "join-1".to_string(),
        },
    )
    .await;

    let (read_half, _write_half) = stream.split();
    let mut lines = BufReader::new(read_half).lines();
    let mut finals = Vec::new();
    while finals.len() < 2 {
        let line = tokio::time::timeout(Duration::from_secs(10), lines.next_line())
            .await
            .expect("cancel did not stop the join")
            .expect("Failed to read response")
            .expect("connection closed early");
        match serde_json::from_str::<ClientResponse>(&line).expect("Failed to decode response") {
            ClientResponse::Diagnostics(_) => {}
            resp => finals.push(resp),
        }
    }
    assert_eq!(finals[0], ClientResponse::Error(RealmError::cancelled()));
    assert_eq!(finals[1], ClientResponse::Success);
    assert!(!daemon.is_busy());

    drop(lines);
    drop(stream);
    shutdown_tx.send(true).expect("Failed to signal shutdown");
    server.await.expect("listener task failed");
}
