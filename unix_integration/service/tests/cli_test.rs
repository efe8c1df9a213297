#![deny(warnings)]
use clap::Parser;
use serial_test::serial;

#[allow(dead_code)]
mod opt {
    include!("../src/opt/realm.rs");
}

use opt::{RealmOpt, RealmParser};

#[test]
fn test_join_arguments() {
    sketching::test_init();
    let opt = RealmParser::try_parse_from([
        "realm",
        "join",
        "-U",
        "admin",
        "--client-software",
        "winbind",
        "--computer-ou",
        "OU=Linux,DC=example,DC=com",
        "example.com",
    ])
    .expect("parse failed");
    match opt.commands {
        RealmOpt::Join {
            realm,
            user,
            computer_ou,
            software,
            ..
        } => {
            assert_eq!(realm, "example.com");
            assert_eq!(user.as_deref(), Some("admin"));
            assert_eq!(computer_ou.as_deref(), Some("OU=Linux,DC=example,DC=com"));
            assert_eq!(software.client_software.as_deref(), Some("winbind"));
            assert_eq!(software.server_software, None);
        }
        other => panic!("unexpected command {:?}", other),
    }
}

#[test]
fn test_permit_and_leave_arguments() {
    sketching::test_init();
    let opt = RealmParser::try_parse_from([
        "realm", "permit", "-x", "-R", "example.com", "alice", "bob",
    ])
    .expect("parse failed");
    match opt.commands {
        RealmOpt::Permit {
            all,
            withdraw,
            realm,
            logins,
        } => {
            assert!(!all);
            assert!(withdraw);
            assert_eq!(realm.as_deref(), Some("example.com"));
            assert_eq!(logins, vec!["alice".to_string(), "bob".to_string()]);
        }
        other => panic!("unexpected command {:?}", other),
    }

    let opt = RealmParser::try_parse_from(["realm", "leave"]).expect("parse failed");
    assert!(matches!(
        opt.commands,
        RealmOpt::Leave {
            realm: None,
            user: None,
            remove: false
        }
    ));

    assert!(RealmParser::try_parse_from(["realm", "join"]).is_err());
}

#[test]
#[serial]
fn test_debug_from_environment() {
    sketching::test_init();
    std::env::set_var("REALM_DEBUG", "true");
    let opt = RealmParser::try_parse_from(["realm", "list"]).expect("parse failed");
    std::env::remove_var("REALM_DEBUG");
    assert!(opt.debug);
}

#[test]
#[serial]
fn test_debug_defaults_off() {
    sketching::test_init();
    std::env::remove_var("REALM_DEBUG");
    let opt = RealmParser::try_parse_from(["realm", "-v", "status"]).expect("parse failed");
    assert!(!opt.debug);
    assert!(opt.verbose);
    assert!(matches!(opt.commands, RealmOpt::Status));
}
