//! Bind host paths into the buildroot.
//! 将主机路径绑定到构建根中。

use super::create_target;
use crate::Sandbox;
use crate::config::{BindMountOptions, parse_options};
use rootbuild_hooks::{CURRENT_API_VERSION, ExtensionDescriptor, HookRegistry, stages};
use rootbuild_mount::{MountClass, MountPoint};
use std::error::Error;
use std::path::PathBuf;
use tracing::debug;

pub const NAME: &str = "bind_mount";

pub fn descriptor() -> ExtensionDescriptor<Sandbox> {
    ExtensionDescriptor {
        name: NAME,
        requires_api_version: Some(CURRENT_API_VERSION),
        init,
    }
}

fn init(
    registry: &mut HookRegistry<Sandbox>,
    options: &serde_json::Value,
    sandbox: &mut Sandbox,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    if sandbox.is_bootstrap {
        debug!("bind_mount skipped in bootstrap buildroot");
        return Ok(());
    }
    let opts: BindMountOptions = parse_options(NAME, options)?;

    let mut pairs: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(opts.dirs.len());
    for (source, dest) in &opts.dirs {
        let target = sandbox.chroot_path(dest);
        sandbox
            .mounts
            .add(MountPoint::bind(source, &target), MountClass::User);
        pairs.push((source.clone(), target));
    }

    let create_host_dirs = opts.create_dirs;
    registry.add_fn(stages::POSTINIT, move |_: &mut Sandbox| {
        for (source, target) in &pairs {
            if create_host_dirs && !source.exists() {
                std::fs::create_dir_all(source)?;
            }
            create_target(target, source.is_file())?;
        }
        Ok(())
    });
    Ok(())
}
