//! The unprivileged identity builds run as.

use crate::{PrivError, ROOT};
use std::fmt;

/// Name of the group whose gid unprivileged work runs under.
pub const BUILD_GROUP: &str = "rootbuild";

/// A uid/gid pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
}

impl Identity {
    pub const fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }

    /// The superuser.
    pub const fn root() -> Self {
        Self::new(ROOT, ROOT)
    }

    /// Work out who invoked us.
    ///
    /// The uid comes from `SUDO_UID` or `USERHELPER_UID` when the tool was
    /// started through one of them, else the real uid. The gid is the
    /// `rootbuild` group when it exists, else the real gid.
    #[cfg(unix)]
    pub fn from_env() -> Result<Self, PrivError> {
        let real_uid = nix::unistd::getuid().as_raw();
        let real_gid = nix::unistd::getgid().as_raw();
        let group_gid = nix::unistd::Group::from_name(BUILD_GROUP)
            .map_err(|e| PrivError::Identity(format!("group lookup failed: {e}")))?
            .map(|group| group.gid.as_raw());

        Self::resolve(|key| std::env::var(key).ok(), real_uid, real_gid, group_gid)
    }

    /// Pure part of [`Identity::from_env`].
    pub fn resolve(
        env: impl Fn(&str) -> Option<String>,
        real_uid: u32,
        real_gid: u32,
        group_gid: Option<u32>,
    ) -> Result<Self, PrivError> {
        let uid = match env("SUDO_UID").or_else(|| env("USERHELPER_UID")) {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .map_err(|_| PrivError::Identity(format!("invalid invoking uid '{raw}'")))?,
            None => real_uid,
        };
        Ok(Self::new(uid, group_gid.unwrap_or(real_gid)))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_of(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_sudo_uid_wins() {
        let id = Identity::resolve(
            env_of(&[("SUDO_UID", "1000"), ("USERHELPER_UID", "2000")]),
            0,
            0,
            Some(135),
        )
        .unwrap();
        assert_eq!(id, Identity::new(1000, 135));
    }

    #[test]
    fn test_userhelper_fallback() {
        let id = Identity::resolve(env_of(&[("USERHELPER_UID", "2000")]), 0, 0, None).unwrap();
        assert_eq!(id, Identity::new(2000, 0));
    }

    #[test]
    fn test_real_ids_without_sudo() {
        let id = Identity::resolve(env_of(&[]), 1234, 1234, None).unwrap();
        assert_eq!(id.to_string(), "1234:1234");
    }

    #[test]
    fn test_garbage_uid() {
        let result = Identity::resolve(env_of(&[("SUDO_UID", "abc")]), 0, 0, None);
        assert!(matches!(result, Err(PrivError::Identity(_))));
    }
}
