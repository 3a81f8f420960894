//! Integration tests for rootbuild-privs crate.

use rootbuild_privs::{Credentials, Identity, MemoryCredentials, PrivError, PrivilegeManager};
use std::fs;
use tempfile::TempDir;

fn manager() -> (MemoryCredentials, PrivilegeManager) {
    let creds = MemoryCredentials::sudo_session();
    let privs = PrivilegeManager::new(Box::new(creds.clone()), Identity::new(1000, 1000));
    (creds, privs)
}

// Stack balance tests

#[test]
fn test_nested_transitions_restore_original_state() {
    let (creds, mut privs) = manager();
    let before = creds.credentials();

    privs.drop_privs_temp().unwrap();
    privs.become_user(2000, 2000).unwrap();
    privs.drop_privs_temp().unwrap();
    assert_eq!(privs.depth(), 3);
    for _ in 0..3 {
        privs.restore_privs().unwrap();
    }

    assert_eq!(creds.credentials(), before);
    privs.check_balanced(0).unwrap();
}

#[test]
fn test_restore_on_empty_stack_fails() {
    let (_, mut privs) = manager();
    assert!(matches!(privs.restore_privs(), Err(PrivError::StackUnderflow)));
}

#[test]
fn test_unbalanced_stack_detected() {
    let (_, mut privs) = manager();
    privs.drop_privs_temp().unwrap();
    assert!(matches!(
        privs.check_balanced(0),
        Err(PrivError::Unbalanced { expected: 0, actual: 1 })
    ));
}

#[test]
fn test_drop_forever_cannot_return() {
    let (creds, mut privs) = manager();
    privs.drop_privs_forever().unwrap();
    assert_eq!(creds.saved_uid(), 1000);
    assert_eq!(privs.depth(), 0);
    assert!(privs.become_user(0, 0).is_err());
}

// Scoped helpers

#[test]
fn test_elevated_restores_after_failure() {
    let (creds, mut privs) = manager();
    privs.drop_privs_temp().unwrap();
    let inside = creds.clone();
    let result: Result<(), PrivError> = privs.elevated(move |_| {
        assert_eq!(inside.credentials(), Credentials::root());
        Err(PrivError::Identity("boom".into()))
    });
    assert!(result.is_err());
    assert_eq!(creds.credentials().euid, 1000);
    assert_eq!(privs.depth(), 1);
}

#[test]
fn test_change_owner_recursive_leaves_stack() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("build/SPECS")).unwrap();
    fs::write(dir.path().join("build/SPECS/hello.spec"), "Name: hello").unwrap();

    let (creds, mut privs) = manager();
    privs.drop_privs_temp().unwrap();
    privs.change_owner(&dir.path().join("build"), None, true).unwrap();

    assert_eq!(privs.depth(), 1);
    assert_eq!(creds.credentials().euid, 1000);
    let chowned = creds.chowned();
    assert_eq!(chowned.len(), 3);
    assert!(chowned.iter().all(|(_, uid, gid)| (*uid, *gid) == (1000, 1000)));
}
