//! Loading and saving policy through the file adapter.

mod helpers;

use gatehouse::authz::{AuthzError, Enforcer, ErrorKind};
use helpers::{models, TestFiles};

#[test]
fn test_load_policy_file() {
    let files = TestFiles::new(
        models::RBAC,
        "# staff may read reports\n\
         p, staff, /reports, GET\n\
         \n\
         g, alice, staff\n",
    );
    let e = Enforcer::from_files(files.model_path(), Some(files.policy_path())).unwrap();

    assert!(e.enforce(["alice", "/reports", "GET"]).unwrap());
    assert_eq!(e.get_policy(), vec![vec!["staff", "/reports", "GET"]]);
    assert_eq!(e.get_grouping_policy(), vec![vec!["alice", "staff"]]);
}

#[test]
fn test_save_then_reload_keeps_rules() {
    let files = TestFiles::new(models::RBAC, "p, staff, /reports, GET\n");
    let e = Enforcer::from_files(files.model_path(), Some(files.policy_path())).unwrap();

    e.add_policy(["auditor", "/logs, archived", "GET"]).unwrap();
    e.add_role_for_user("bob", "auditor", None).unwrap();
    e.save_policy().unwrap();

    let saved = files.read_policy();
    assert!(saved.contains("p, staff, /reports, GET"));
    assert!(saved.contains("g, bob, auditor"));

    let reopened = Enforcer::from_files(files.model_path(), Some(files.policy_path())).unwrap();
    assert_eq!(reopened.get_policy(), e.get_policy());
    assert!(reopened.enforce(["bob", "/logs, archived", "GET"]).unwrap());
}

#[test]
fn test_reload_replaces_in_memory_changes() {
    let files = TestFiles::new(models::ACL, "p, alice, /data, GET\n");
    let e = Enforcer::from_files(files.model_path(), Some(files.policy_path())).unwrap();

    e.add_policy(["mallory", "/data", "GET"]).unwrap();
    files.write_policy("p, bob, /data, GET\n");
    e.load_policy().unwrap();

    assert!(e.enforce(["bob", "/data", "GET"]).unwrap());
    assert!(!e.enforce(["alice", "/data", "GET"]).unwrap());
    assert!(!e.enforce(["mallory", "/data", "GET"]).unwrap());
}

#[test]
fn test_failed_reload_keeps_current_rules() {
    let files = TestFiles::new(models::ACL, "p, alice, /data, GET\n");
    let e = Enforcer::from_files(files.model_path(), Some(files.policy_path())).unwrap();

    // Two values where the model declares three.
    files.write_policy("p, bob, /data\n");
    let err = e.load_policy().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Mutation);
    assert!(e.enforce(["alice", "/data", "GET"]).unwrap());
    assert!(!e.enforce(["bob", "/data", "GET"]).unwrap());
}

#[test]
fn test_missing_policy_file() {
    let files = TestFiles::new(models::ACL, "");
    let missing = files.dir().join("absent.csv");

    let err = Enforcer::from_files(files.model_path(), Some(&missing))
        .err()
        .unwrap();
    assert!(matches!(err, AuthzError::PolicyLoadError { .. }));
}

#[test]
fn test_without_adapter_persistence_is_unavailable() {
    let files = TestFiles::new(models::ACL, "");
    let e = Enforcer::from_files(files.model_path(), None).unwrap();

    assert!(matches!(e.load_policy(), Err(AuthzError::NoAdapter)));
    assert!(matches!(e.save_policy(), Err(AuthzError::NoAdapter)));
}

#[test]
fn test_load_model_keeps_rules() {
    let files = TestFiles::new(models::ACL, "p, alice, /data/:id, GET\n");
    let e = Enforcer::from_files(files.model_path(), Some(files.policy_path())).unwrap();
    assert!(!e.enforce(["alice", "/data/1", "GET"]).unwrap());

    let patterned = models::ACL.replace("r.obj == p.obj", "keyMatch2(r.obj, p.obj)");
    e.load_model(&patterned).unwrap();
    assert!(e.enforce(["alice", "/data/1", "GET"]).unwrap());

    // A model whose rules are wider than the stored ones is refused.
    let err = e.load_model(models::PRIORITY).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Mutation);
    assert!(e.enforce(["alice", "/data/1", "GET"]).unwrap());
}
