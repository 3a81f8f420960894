//! Build in RAM: a tmpfs mounted over the buildroot.
//! 在内存中构建：将 tmpfs 挂载到构建根上。

use crate::Sandbox;
use crate::config::{TmpfsOptions, parse_options};
use rootbuild_hooks::{CURRENT_API_VERSION, ExtensionDescriptor, HookRegistry, stages};
use rootbuild_mount::{MountClass, MountPoint};
use std::error::Error;
use tracing::{info, warn};

pub const NAME: &str = "tmpfs";

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
    let opts: TmpfsOptions = parse_options(NAME, options)?;
    let ram = host_ram_mb();
    if !enough_ram(ram, opts.required_ram_mb) {
        warn!(
            ram_mb = ?ram,
            required_mb = opts.required_ram_mb,
            "tmpfs disabled: not enough host memory"
        );
        return Ok(());
    }

    let id = sandbox.mounts.add(
        MountPoint::tmpfs(&sandbox.root).with_options(opts.mount_options()),
        MountClass::Standalone,
    );
    registry.add_fn(stages::MOUNT_ROOT, move |sb: &mut Sandbox| {
        info!(path = %sb.root.display(), "mounting tmpfs root");
        sb.mount(id)?;
        Ok(())
    });
    let keep_mounted = opts.keep_mounted;
    registry.add_fn(stages::POSTUMOUNT, move |sb: &mut Sandbox| {
        if !keep_mounted {
            sb.unmount(id);
        }
        Ok(())
    });
    registry.add_fn(stages::UMOUNT_ROOT, move |sb: &mut Sandbox| {
        sb.unmount(id);
        Ok(())
    });
    Ok(())
}

/// Whether `ram_mb` of host memory meets `required_mb`.
/// 主机内存 `ram_mb` 是否满足 `required_mb`。
pub fn enough_ram(ram_mb: Option<u64>, required_mb: u64) -> bool {
    ram_mb.is_some_and(|ram| ram > required_mb)
}

/// Physical memory of the host in MB.
/// 主机物理内存（MB）。
#[cfg(unix)]
pub fn host_ram_mb() -> Option<u64> {
    // SAFETY: sysconf only reads system constants.
    let (page_size, pages) =
        unsafe { (libc::sysconf(libc::_SC_PAGESIZE), libc::sysconf(libc::_SC_PHYS_PAGES)) };
    if page_size <= 0 || pages <= 0 {
        return None;
    }
    Some((page_size as u64).saturating_mul(pages as u64) / (1024 * 1024))
}

#[cfg(not(unix))]
pub fn host_ram_mb() -> Option<u64> {
    None
}
