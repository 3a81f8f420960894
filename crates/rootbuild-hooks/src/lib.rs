//! Lifecycle hooks for rootbuild.
//!
//! The orchestrator calls named stages (`preinit`, `postbuild`, ...) on a
//! [`HookRegistry`]; extensions listed in an [`ExtensionTable`] register
//! callbacks for the stages they care about when they are initialized.
//!
//! Stage names are an agreement between the orchestrator and extensions.
//! The ones the orchestrator calls are listed in [`stages`].

pub mod extension;
pub mod registry;

pub use extension::{
    CURRENT_API_VERSION, ExtensionConfig, ExtensionDescriptor, ExtensionInit, ExtensionTable,
};
pub use registry::{Hook, HookRegistry, HookResult};

use std::error::Error;
use thiserror::Error;

/// Stage names called by the orchestrator.
pub mod stages {
    pub const PREINIT: &str = "preinit";
    pub const POSTINIT: &str = "postinit";
    pub const MOUNT_ROOT: &str = "mount_root";
    pub const POSTUMOUNT: &str = "postumount";
    pub const UMOUNT_ROOT: &str = "umount_root";
    pub const PREYUM: &str = "preyum";
    pub const POSTYUM: &str = "postyum";
    pub const PREBUILD: &str = "prebuild";
    pub const POSTBUILD: &str = "postbuild";
    pub const PRE_SRPM_BUILD: &str = "pre_srpm_build";
    pub const PROCESS_LOGS: &str = "process_logs";
    pub const INITFAILED: &str = "initfailed";
    pub const POSTCLEAN: &str = "postclean";
}

/// Errors from running hooks.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook for stage '{stage}' failed: {source}")]
    Callback {
        stage: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },

    #[error("feature {0} is not provided by any of the enabled extensions")]
    NotProvided(String),
}

/// Errors from loading extensions.
#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("extension '{0}' does not specify a required API version")]
    MissingApiVersion(String),

    #[error("extension '{name}' version mismatch - requested = {requested}, current = {current}")]
    VersionMismatch {
        name: String,
        requested: String,
        current: &'static str,
    },

    #[error("extension '{name}' failed to initialize: {source}")]
    Init {
        name: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}
