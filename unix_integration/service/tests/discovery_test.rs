#![deny(warnings)]
mod common;

use common::{FakeResolver, Harness};
use realmd_common::error::RealmError;
use realmd_common::proto::{Options, RealmKind};
use realmd_service::diagnostics::Invocation;
use realmd_service::disco::dns::DnsError;
use realmd_service::disco::{TYPE_KERBEROS, TYPE_KERBEROS_AD, TYPE_KERBEROS_IPA};

fn ad_resolver() -> FakeResolver {
    FakeResolver::new().with_srv("_kerberos._udp.example.com", &[("dc1.example.com", 88)])
}

#[tokio::test]
async fn test_discover_ad_domain() {
    let harness = Harness::new();
    let tools = harness.tools(ad_resolver());
    let inv = Invocation::detached();

    let disco = tools
        .probe
        .discover_ad("example.com", &inv)
        .await
        .expect("discovery failed")
        .expect("nothing discovered");

    assert_eq!(disco.domain(), Some("example.com"));
    assert_eq!(disco.realm(), Some("EXAMPLE.COM"));
    assert_eq!(disco.kdcs(), &["dc1.example.com:88".to_string()]);
    assert_eq!(disco.disco_type(), Some(TYPE_KERBEROS_AD));
    assert_eq!(disco.server_software(), Some("active-directory"));
    assert_eq!(harness.calls(), vec!["host-soa _msdcs.example.com".to_string()]);
}

#[tokio::test]
async fn test_discover_ad_needs_both_probes() {
    // SRV records but no _msdcs zone.
    let mut harness = Harness::new();
    harness.stub("host-soa", "exit 1");
    let tools = harness.tools(ad_resolver());
    let inv = Invocation::detached();
    assert_eq!(
        tools.probe.discover_ad("example.com", &inv).await,
        Ok(None)
    );

    // The zone, but no SRV records.
    let harness = Harness::new();
    let tools = harness.tools(FakeResolver::new());
    assert_eq!(
        tools.probe.discover_ad("example.com", &inv).await,
        Ok(None)
    );
}

#[tokio::test]
async fn test_discover_ad_reports_lookup_failure() {
    let harness = Harness::new();
    let tools = harness.tools(FakeResolver::new().with_srv_error(
        "_kerberos._udp.example.com",
        DnsError::Failed("SERVFAIL".to_string()),
    ));
    let inv = Invocation::detached();
    let res = tools.probe.discover_ad("example.com", &inv).await;
    assert!(matches!(res, Err(RealmError::Failed(_))));
}

#[tokio::test]
async fn test_discover_ad_hard_error_beats_not_found() {
    // The lookup fails outright while the zone probe just says no.
    let mut harness = Harness::new();
    harness.stub("host-soa", "exit 1");
    let tools = harness.tools(FakeResolver::new().with_srv_error(
        "_kerberos._udp.example.com",
        DnsError::Failed("SERVFAIL".to_string()),
    ));
    let inv = Invocation::detached();
    assert_eq!(
        tools.probe.discover_ad("example.com", &inv).await,
        Err(RealmError::Failed(
            "Couldn't look up SRV records for domain: example.com: SERVFAIL".to_string()
        ))
    );

    // No SRV records while the zone probe can't even be started.
    let mut harness = Harness::new();
    harness.config.commands.insert(
        "host-soa".to_string(),
        harness.root().join("missing-host-soa").display().to_string(),
    );
    let tools = harness.tools(FakeResolver::new());
    match tools.probe.discover_ad("example.com", &inv).await {
        Err(RealmError::Internal(msg)) => assert!(msg.starts_with("Couldn't run command")),
        other => panic!("unexpected result {:?}", other),
    }
}

#[tokio::test]
async fn test_discover_ad_is_cached() {
    let harness = Harness::new();
    let tools = harness.tools(ad_resolver());
    let inv = Invocation::detached();

    let first = tools.probe.discover_ad("example.com", &inv).await;
    let second = tools.probe.discover_ad("example.com", &inv).await;
    assert_eq!(first, second);
    assert_eq!(harness.calls().len(), 1);

    tools.probe.clear_cache().await;
    let _ = tools.probe.discover_ad("example.com", &inv).await;
    assert_eq!(harness.calls().len(), 2);
}

#[tokio::test]
async fn test_discover_kerberos_kinds() {
    let inv = Invocation::detached();

    // Plain kerberos, realm name from the TXT record.
    let mut harness = Harness::new();
    harness.stub("ipa-probe", "exit 22");
    let tools = harness.tools(
        FakeResolver::new()
            .with_srv("_kerberos._udp.example.org", &[("kdc.example.org", 88)])
            .with_txt("_kerberos.example.org", "CORP.EXAMPLE.ORG"),
    );
    let disco = tools
        .probe
        .discover_kerberos("example.org", &inv)
        .await
        .expect("discovery failed")
        .expect("nothing discovered");
    assert_eq!(disco.realm(), Some("CORP.EXAMPLE.ORG"));
    assert_eq!(disco.disco_type(), Some(TYPE_KERBEROS));

    // An IPA server answers the probe.
    let harness = Harness::new();
    let tools = harness.tools(
        FakeResolver::new().with_srv("_kerberos._udp.example.org", &[("ipa.example.org", 88)]),
    );
    let disco = tools
        .probe
        .discover_kerberos("example.org", &inv)
        .await
        .expect("discovery failed")
        .expect("nothing discovered");
    assert_eq!(disco.realm(), Some("EXAMPLE.ORG"));
    assert_eq!(disco.disco_type(), Some(TYPE_KERBEROS_IPA));
    assert!(harness.called("ipa-probe"));

    // Active Directory, found through the msdcs records.
    let harness = Harness::new();
    let tools = harness.tools(
        FakeResolver::new()
            .with_srv("_kerberos._udp.example.com", &[("dc1.example.com", 88)])
            .with_srv("_kerberos._tcp.dc._msdcs.example.com", &[("dc1.example.com", 88)]),
    );
    let disco = tools
        .probe
        .discover_kerberos("example.com", &inv)
        .await
        .expect("discovery failed")
        .expect("nothing discovered");
    assert_eq!(disco.disco_type(), Some(TYPE_KERBEROS_AD));
}

#[tokio::test]
async fn test_discover_kerberos_tolerates_temporary_failure() {
    let harness = Harness::new();
    let tools = harness.tools(FakeResolver::new().with_srv_error(
        "_kerberos._udp.example.org",
        DnsError::TemporaryFailure("timed out".to_string()),
    ));
    let inv = Invocation::detached();
    assert_eq!(
        tools.probe.discover_kerberos("example.org", &inv).await,
        Ok(None)
    );
}

#[tokio::test]
async fn test_daemon_discovers_ad_with_sssd_first() {
    let harness = Harness::new();
    let daemon = harness.daemon(ad_resolver()).await;
    let inv = Invocation::detached();

    let discovered = daemon
        .discover("EXAMPLE.COM", &Options::default(), &inv)
        .await
        .expect("discovery failed");
    assert_eq!(discovered.relevance, 100);
    let kinds: Vec<RealmKind> = discovered.realms.iter().map(|r| r.kind()).collect();
    assert_eq!(kinds[0], RealmKind::SssdAd);
    assert!(kinds.contains(&RealmKind::SambaAd));
    assert!(discovered.realms.iter().all(|r| r.name() == "example.com"));

    // Asking for winbind leaves only the samba realm.
    let options = Options {
        client_software: Some("winbind".to_string()),
        ..Default::default()
    };
    let discovered = daemon
        .discover("example.com", &options, &inv)
        .await
        .expect("discovery failed");
    let kinds: Vec<RealmKind> = discovered.realms.iter().map(|r| r.kind()).collect();
    assert_eq!(kinds, vec![RealmKind::SambaAd]);
}

#[tokio::test]
async fn test_daemon_discovers_nothing() {
    let mut harness = Harness::new();
    harness.stub("host-soa", "exit 1");
    let daemon = harness.daemon(FakeResolver::new()).await;
    let inv = Invocation::detached();

    let discovered = daemon
        .discover("nowhere.example", &Options::default(), &inv)
        .await
        .expect("discovery failed");
    assert!(discovered.is_empty());
    assert_eq!(discovered.relevance, 0);

    // Not a domain name at all.
    let discovered = daemon
        .discover("not a domain", &Options::default(), &inv)
        .await
        .expect("discovery failed");
    assert!(discovered.is_empty());
}

#[tokio::test]
async fn test_daemon_discovery_failure_is_summarised() {
    let harness = Harness::new();
    let daemon = harness
        .daemon(FakeResolver::new().with_srv_error(
            "_kerberos._udp.example.com",
            DnsError::Failed("SERVFAIL".to_string()),
        ))
        .await;
    let inv = Invocation::detached();
    let res = daemon
        .discover("example.com", &Options::default(), &inv)
        .await;
    assert_eq!(
        res.map(|d| d.relevance),
        Err(RealmError::Failed(
            "Failed to discover realm. See diagnostics.".to_string()
        ))
    );
}
