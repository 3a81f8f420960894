//! Buildroot configuration.
//! 构建根配置。
//!
//! Configuration is a single JSON document; every field has a default.
//! 配置是单个 JSON 文档，每个字段都有默认值。

use rootbuild_hooks::ExtensionConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors.
/// 配置错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid options for extension '{extension}': {source}")]
    Options {
        extension: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Invalid(String),
}

/// Buildroot configuration.
/// 构建根配置。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildrootConfig {
    /// Name of the buildroot. / 构建根名称。
    pub root: String,
    /// Directory holding all buildroots. / 存放所有构建根的目录。
    pub basedir: PathBuf,
    /// Where results are copied (default: `<basedir>/<root>/result`).
    /// 结果复制到的目录（默认：`<basedir>/<root>/result`）。
    pub resultdir: Option<PathBuf>,
    /// Home of the build user inside the buildroot. / 构建用户在构建根内的主目录。
    pub chroothome: String,
    /// Mount `/dev/shm` and `/dev/pts` ourselves. / 自行挂载 `/dev/shm` 和 `/dev/pts`。
    pub internal_dev_setup: bool,
    /// Extra directories created inside the buildroot. / 在构建根内额外创建的目录。
    pub extra_chroot_dirs: Vec<String>,
    /// Package manager binary. / 包管理器程序。
    pub package_manager: String,
    /// Packages installed when the buildroot is first set up.
    /// 首次准备构建根时安装的软件包。
    pub chroot_setup: Vec<String>,
    /// Extra arguments for every package manager call. / 每次调用包管理器时的额外参数。
    pub package_manager_args: Vec<String>,
    /// Build command run inside the buildroot, followed by the package path.
    /// It must leave its output under `<chroothome>/build/{RPMS,SRPMS}`.
    /// `{chroothome}` in an argument is replaced by `chroothome`.
    /// 在构建根内运行的构建命令，后接软件包路径。
    /// 其输出必须位于 `<chroothome>/build/{RPMS,SRPMS}` 下。
    /// 参数中的 `{chroothome}` 会被替换为 `chroothome`。
    pub build_command: Vec<String>,
    /// Enter a private mount namespace before touching mounts.
    /// 操作挂载前进入私有挂载命名空间。
    pub unshare_namespace: bool,
    /// Parallel builds per chain group. / 每个链式分组的并行构建数。
    pub max_jobs: usize,
    /// Run the package manager from a separate bootstrap buildroot.
    /// 从单独的引导构建根中运行包管理器。
    pub use_bootstrap: bool,
    /// Packages installed into the bootstrap buildroot.
    /// 安装到引导构建根中的软件包。
    pub bootstrap_chroot_setup: Vec<String>,
    /// Extensions, initialized in this order. / 扩展，按此顺序初始化。
    pub extensions: Vec<ExtensionConfig>,
}

impl Default for BuildrootConfig {
    fn default() -> Self {
        Self {
            root: "default".to_string(),
            basedir: PathBuf::from("/var/lib/rootbuild"),
            resultdir: None,
            chroothome: "/builddir".to_string(),
            internal_dev_setup: true,
            extra_chroot_dirs: Vec::new(),
            package_manager: "dnf".to_string(),
            chroot_setup: vec!["@buildsys-build".to_string()],
            package_manager_args: Vec::new(),
            build_command: vec![
                "rpmbuild".to_string(),
                "--rebuild".to_string(),
                "--define".to_string(),
                "_topdir {chroothome}/build".to_string(),
            ],
            unshare_namespace: true,
            max_jobs: num_cpus(),
            use_bootstrap: false,
            bootstrap_chroot_setup: vec!["dnf".to_string(), "dnf-plugins-core".to_string()],
            extensions: Vec::new(),
        }
    }
}

/// Get number of CPUs.
/// 获取 CPU 数量。
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

impl BuildrootConfig {
    /// Load and validate a configuration file.
    /// 加载并校验配置文件。
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Parse and validate a configuration string.
    /// 解析并校验配置字符串。
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root.is_empty() || self.root.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "root name '{}' must be a non-empty name without '/'",
                self.root
            )));
        }
        if self.max_jobs == 0 {
            return Err(ConfigError::Invalid("max_jobs must be at least 1".into()));
        }
        if self.build_command.is_empty() {
            return Err(ConfigError::Invalid("build_command is empty".into()));
        }
        if !self.chroothome.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "chroothome '{}' must be absolute",
                self.chroothome
            )));
        }
        Ok(())
    }

    /// Directory of this buildroot: `<basedir>/<root>`.
    /// 本构建根的目录：`<basedir>/<root>`。
    pub fn buildroot_dir(&self) -> PathBuf {
        self.basedir.join(&self.root)
    }

    /// The filesystem tree builds run in.
    /// 构建运行所在的文件系统树。
    pub fn rootdir(&self) -> PathBuf {
        self.buildroot_dir().join("root")
    }

    pub fn resultdir(&self) -> PathBuf {
        self.resultdir
            .clone()
            .unwrap_or_else(|| self.buildroot_dir().join("result"))
    }

    /// The build command with `{chroothome}` filled in.
    /// 填入 `{chroothome}` 后的构建命令。
    pub fn build_argv(&self) -> Vec<String> {
        let home = self.chroothome.trim_end_matches('/');
        self.build_command
            .iter()
            .map(|arg| arg.replace("{chroothome}", home))
            .collect()
    }

    /// Configuration of the matching bootstrap buildroot.
    /// 对应的引导构建根的配置。
    ///
    /// It gets its own result directory and installs only the package
    /// manager.
    /// 它拥有独立的结果目录，并且只安装包管理器。
    pub fn bootstrap(&self) -> Self {
        Self {
            root: format!("{}-bootstrap", self.root),
            resultdir: None,
            chroot_setup: self.bootstrap_chroot_setup.clone(),
            use_bootstrap: false,
            ..self.clone()
        }
    }
}

/// Decode an extension's options, using the defaults when none are given.
/// 解码扩展选项；未提供时使用默认值。
pub fn parse_options<T>(extension: &str, value: &serde_json::Value) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Default,
{
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value.clone()).map_err(|source| ConfigError::Options {
        extension: extension.to_string(),
        source,
    })
}

/// Options of the `tmpfs` extension.
/// `tmpfs` 扩展的选项。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TmpfsOptions {
    /// Minimum host RAM in MB. / 主机内存下限（MB）。
    pub required_ram_mb: u64,
    /// Passed as `size=`, e.g. `"2g"`. / 作为 `size=` 传递，例如 `"2g"`。
    pub max_fs_size: Option<String>,
    /// Mode of the tmpfs root. / tmpfs 根目录的权限模式。
    pub mode: String,
    /// Keep mounted after `postumount`. / `postumount` 之后仍保持挂载。
    pub keep_mounted: bool,
}

impl Default for TmpfsOptions {
    fn default() -> Self {
        Self {
            required_ram_mb: 900,
            max_fs_size: None,
            mode: "0755".to_string(),
            keep_mounted: false,
        }
    }
}

impl TmpfsOptions {
    /// Mount options for the tmpfs.
    /// tmpfs 的挂载选项。
    pub fn mount_options(&self) -> Vec<String> {
        let mut opts = vec![format!("mode={}", self.mode), "nr_inodes=0".to_string()];
        if let Some(size) = &self.max_fs_size {
            opts.push(format!("size={size}"));
        }
        opts
    }
}

/// Options of the `bind_mount` extension.
/// `bind_mount` 扩展的选项。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindMountOptions {
    /// `[host path, path inside the buildroot]` pairs. / `[主机路径, 构建根内路径]` 对。
    pub dirs: Vec<(PathBuf, PathBuf)>,
    /// Create missing host directories too. / 同时创建缺失的主机目录。
    pub create_dirs: bool,
}

/// Options of the `mount` extension.
/// `mount` 扩展的选项。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountOptions {
    /// `[device, path inside the buildroot, fstype, options]`.
    /// `[设备, 构建根内路径, 文件系统类型, 选项]`。
    pub dirs: Vec<(String, PathBuf, String, String)>,
}
