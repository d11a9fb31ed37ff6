//! Kernel and initramfs preparation.
//!
//! Two passes over a root's `boot` directory:
//!
//! 1. [`regenerate_initramfs`] runs inside the package install root. It
//!    throws away any initramfs a package scriptlet produced, rebuilds the
//!    module dependency index, and generates a fresh initramfs with dracut
//!    in a chroot. This crate is the only thing allowed to decide what goes
//!    into the initramfs.
//! 2. [`seal_boot_dir`] runs on the relocated `boot` of the final tree. It
//!    hashes kernel bytes followed by initramfs bytes with SHA-256 and
//!    appends `-<digest>` to both file names, so downstream tooling pairs
//!    them by digest instead of guessing.
//!
//! The generated initramfs is named `initramfs-<kernel-version>.img`.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use crate::common::{ensure_dir, path_exists, remove_path, write_file_with_dirs, OwnedPath};
use crate::error::{ComposeError, IoContext, Result};
use crate::process::{Cmd, CommandError};

pub const KERNEL_PREFIX: &str = "vmlinuz-";
pub const INITRAMFS_PREFIX: &str = "initramfs-";

/// Fixed machine identity baked into every composed image.
///
/// Pre-generated initramfs images are only reproducible when the machine id
/// is known ahead of time, so all composes share this value instead of a
/// per-install random one.
pub const MACHINE_ID: &str = "45bb3b96146aa94f299b9eb43646eb35";

/// Where the generator writes its image, relative to the root it runs in.
pub const GENERATED_INITRAMFS: &str = "tmp/initramfs.img";

/// Bootloader entries; regenerated by the deployment tooling, never shipped.
const LOADER_DIR: &str = "loader";

/// Dracut log location inside a root.
const DRACUT_LOG: &str = "var/log/dracut.log";

/// External programs that produce boot artifacts inside a root.
pub trait ArtifactGenerator {
    /// Rebuild kernel module dependency metadata for `kver`.
    fn update_module_deps(&self, root: &Path, kver: &str) -> Result<()>;

    /// Write an initramfs for `kver` to `output`, a path inside `root`
    /// (e.g. `/tmp/initramfs.img`).
    fn generate_initramfs(&self, root: &Path, kver: &str, output: &str) -> Result<()>;
}

/// Runs `depmod` and `dracut` through chroot(1).
#[derive(Debug, Default, Clone)]
pub struct ChrootGenerator;

impl ArtifactGenerator for ChrootGenerator {
    fn update_module_deps(&self, root: &Path, kver: &str) -> Result<()> {
        Cmd::chroot(root, "depmod")
            .arg(kver)
            .error_msg(format!("depmod {} failed", kver))
            .run()
            .map(|_| ())
            .map_err(|source| generator_failed("depmod", source))
    }

    fn generate_initramfs(&self, root: &Path, kver: &str, output: &str) -> Result<()> {
        Cmd::chroot(root, "dracut")
            .args(["-v", "--tmpdir=/tmp", "-f", output, kver])
            .error_msg(format!("dracut {} failed", kver))
            .run_interactive()
            .map(|_| ())
            .map_err(|source| generator_failed("dracut", source))
    }
}

fn generator_failed(step: &'static str, source: CommandError) -> ComposeError {
    ComposeError::GeneratorFailed { step, source }
}

/// A kernel image found in a boot directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelImage {
    pub path: PathBuf,
    pub version: String,
}

/// Kernel/initramfs pair after sealing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootArtifactSet {
    pub kernel: PathBuf,
    pub initramfs: PathBuf,
    pub kernel_version: String,
    /// Lowercase hex SHA-256 of kernel bytes then initramfs bytes.
    pub checksum: String,
}

/// Version string of a kernel file name: everything after the first hyphen.
pub fn kernel_version(file_name: &str) -> Option<&str> {
    file_name
        .split_once('-')
        .map(|(_, version)| version)
        .filter(|v| !v.is_empty())
}

fn entries_with_prefix(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir).at("failed to read", dir)? {
        let entry = entry.at("failed to read", dir)?;
        if entry.file_name().to_string_lossy().starts_with(prefix) {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Locate the single kernel image in `boot_dir`.
pub fn find_kernel(boot_dir: &Path) -> Result<KernelImage> {
    if !boot_dir.is_dir() {
        return Err(ComposeError::MissingKernel {
            dir: boot_dir.to_path_buf(),
        });
    }
    let mut kernels = entries_with_prefix(boot_dir, KERNEL_PREFIX)?;
    match kernels.len() {
        0 => Err(ComposeError::MissingKernel {
            dir: boot_dir.to_path_buf(),
        }),
        1 => {
            let path = kernels.remove(0);
            let name = file_name_of(&path);
            let version = kernel_version(&name)
                .ok_or_else(|| ComposeError::MissingKernel {
                    dir: boot_dir.to_path_buf(),
                })?
                .to_string();
            Ok(KernelImage { path, version })
        }
        _ => Err(ComposeError::AmbiguousKernel {
            dir: boot_dir.to_path_buf(),
            found: kernels.iter().map(|p| file_name_of(p)).collect(),
        }),
    }
}

/// Locate the single initramfs image in `boot_dir`.
pub fn find_initramfs(boot_dir: &Path) -> Result<PathBuf> {
    let mut images = entries_with_prefix(boot_dir, INITRAMFS_PREFIX)?;
    match images.len() {
        1 => Ok(images.remove(0)),
        _ => Err(ComposeError::MissingInitramfs {
            path: boot_dir.join(format!("{}*", INITRAMFS_PREFIX)),
        }),
    }
}

/// Regenerate the initramfs for the kernel installed in `root`.
///
/// Leaves `boot/initramfs-<kver>.img` next to the kernel and moves any
/// dracut log into `logs_dir`.
pub fn regenerate_initramfs(
    root: &Path,
    logs_dir: &Path,
    generator: &dyn ArtifactGenerator,
) -> Result<KernelImage> {
    let boot_dir = root.join("boot");

    if boot_dir.is_dir() {
        for stale in entries_with_prefix(&boot_dir, INITRAMFS_PREFIX)? {
            info!("Removing package-generated {}", stale.display());
            remove_path(&stale)?;
        }
    }

    let kernel = find_kernel(&boot_dir)?;
    info!("Kernel version is {}", kernel.version);

    remove_path(&boot_dir.join(LOADER_DIR))?;

    generator.update_module_deps(root, &kernel.version)?;

    info!("Hardcoding machine-id");
    write_file_with_dirs(root.join("etc/machine-id"), format!("{}\n", MACHINE_ID))?;

    let generated = root.join(GENERATED_INITRAMFS);
    remove_path(&generated)?;
    if let Some(parent) = generated.parent() {
        ensure_dir(parent)?;
    }
    generator.generate_initramfs(root, &kernel.version, &format!("/{}", GENERATED_INITRAMFS))?;

    if !generated.is_file() {
        return Err(ComposeError::MissingInitramfs { path: generated });
    }
    let dest = boot_dir.join(format!("{}{}.img", INITRAMFS_PREFIX, kernel.version));
    OwnedPath::claim(&generated)?.move_to(&dest)?;
    debug!("Initramfs placed at {}", dest.display());

    stash_dracut_log(root, logs_dir);

    Ok(kernel)
}

fn stash_dracut_log(root: &Path, logs_dir: &Path) {
    let Some(log) = OwnedPath::claim_existing(root.join(DRACUT_LOG)) else {
        return;
    };
    let dest = logs_dir.join("dracut.log");
    let moved = ensure_dir(logs_dir).and_then(|()| log.move_to(&dest));
    if let Err(e) = moved {
        warn!("Could not move dracut log to {}: {}", dest.display(), e);
    }
}

fn hash_into(hasher: &mut Sha256, path: &Path, missing: fn(PathBuf) -> ComposeError) -> Result<()> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(missing(path.to_path_buf())),
        Err(e) => return Err(ComposeError::io("failed to open", path, e)),
    };
    let len = file.metadata().at("failed to stat", path)?.len();
    if len == 0 {
        return Err(ComposeError::EmptyArtifact {
            path: path.to_path_buf(),
        });
    }
    io::copy(&mut file, hasher).at("failed to read", path)?;
    Ok(())
}

/// SHA-256 over kernel bytes followed by initramfs bytes, as lowercase hex.
///
/// Both files must exist and be non-empty.
pub fn boot_checksum(kernel: &Path, initramfs: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    hash_into(&mut hasher, kernel, |dir| ComposeError::MissingKernel { dir })?;
    hash_into(&mut hasher, initramfs, |path| ComposeError::MissingInitramfs { path })?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn with_suffix(path: &Path, checksum: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push("-");
    name.push(checksum);
    path.with_file_name(name)
}

/// Checksum and rename the kernel/initramfs pair in `boot_dir`.
pub fn seal_boot_dir(boot_dir: &Path) -> Result<BootArtifactSet> {
    let kernel = find_kernel(boot_dir)?;
    let initramfs = find_initramfs(boot_dir)?;

    let checksum = boot_checksum(&kernel.path, &initramfs)?;
    info!("Boot checksum is {}", checksum);

    let kernel_dest = with_suffix(&kernel.path, &checksum);
    let initramfs_dest = with_suffix(&initramfs, &checksum);
    for dest in [&kernel_dest, &initramfs_dest] {
        if path_exists(dest) {
            return Err(ComposeError::AlreadyExists { path: dest.clone() });
        }
    }

    let kernel_path = OwnedPath::claim(&kernel.path)?.move_to(&kernel_dest)?;
    let initramfs_path = OwnedPath::claim(&initramfs)?.move_to(&initramfs_dest)?;

    Ok(BootArtifactSet {
        kernel: kernel_path.into_path(),
        initramfs: initramfs_path.into_path(),
        kernel_version: kernel.version,
        checksum,
    })
}
