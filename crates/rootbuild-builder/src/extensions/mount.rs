//! Extra device or filesystem mounts inside the buildroot.
//! 构建根内额外的设备或文件系统挂载。

use crate::Sandbox;
use crate::config::{MountOptions, parse_options};
use rootbuild_hooks::{CURRENT_API_VERSION, ExtensionDescriptor, HookRegistry, stages};
use rootbuild_mount::{MountClass, MountPoint};
use std::error::Error;
use std::path::PathBuf;
use tracing::debug;

pub const NAME: &str = "mount";

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
        debug!("mount skipped in bootstrap buildroot");
        return Ok(());
    }
    let opts: MountOptions = parse_options(NAME, options)?;

    let mut targets: Vec<PathBuf> = Vec::with_capacity(opts.dirs.len());
    for (device, dest, fstype, mount_opts) in &opts.dirs {
        let target = sandbox.chroot_path(dest);
        let point = MountPoint::filesystem(device.as_str(), &target, fstype.as_str())
            .with_options(mount_opts.split(','));
        sandbox.mounts.add(point, MountClass::User);
        targets.push(target);
    }

    registry.add_fn(stages::POSTINIT, move |_: &mut Sandbox| {
        for target in &targets {
            std::fs::create_dir_all(target)?;
        }
        Ok(())
    });
    Ok(())
}
