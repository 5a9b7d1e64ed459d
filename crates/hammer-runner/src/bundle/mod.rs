//! Student and grading bundle generation.
//!
//! `build_bundles` writes `<out>/student_bundle`, `<out>/grading_bundle` and
//! `<out>/lock.json`. Every bundle file is checksummed into the lock.

pub mod grading;
pub mod inventory;
pub mod student;

use anyhow::Context;
use hammer_core::lock::ChecksumLedger;
use hammer_core::{AssignmentSpec, ExecutionPlan, LockArtifact, NetworkPlan};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use tracing::info;

pub const STUDENT_BUNDLE: &str = "student_bundle";
pub const GRADING_BUNDLE: &str = "grading_bundle";
pub const LOCK_FILE: &str = "lock.json";

/// Everything a bundle writer reads. Built once per build.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub spec: &'a AssignmentSpec,
    /// Directory `provided_files` sources are resolved against.
    pub spec_dir: Option<&'a Path>,
    pub plan: &'a ExecutionPlan,
    pub network: &'a NetworkPlan,
    pub box_version: &'a str,
    pub out_dir: &'a Path,
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub student_bundle: PathBuf,
    pub grading_bundle: PathBuf,
    pub lock_path: PathBuf,
    pub lock: LockArtifact,
}

/// Join a relative path onto `root`, refusing anything that could leave it.
pub fn safe_join(root: &Path, relative: &str) -> anyhow::Result<PathBuf> {
    let rel = Path::new(relative);
    let escapes = rel.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if relative.is_empty() || escapes {
        anyhow::bail!("path '{}' escapes {:?}", relative, root);
    }
    Ok(root.join(rel))
}

/// Writes files under one bundle root and records their checksums.
pub struct BundleWriter<'l> {
    root: PathBuf,
    label: &'static str,
    ledger: &'l mut ChecksumLedger,
}

impl<'l> BundleWriter<'l> {
    /// Start a fresh bundle at `root`, removing a previous build of it.
    pub fn create(
        root: PathBuf,
        label: &'static str,
        ledger: &'l mut ChecksumLedger,
    ) -> anyhow::Result<Self> {
        if root.exists() {
            std::fs::remove_dir_all(&root).with_context(|| format!("remove {:?}", root))?;
        }
        std::fs::create_dir_all(&root).with_context(|| format!("create {:?}", root))?;
        Ok(Self {
            root,
            label,
            ledger,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mkdir(&self, relative: &str) -> anyhow::Result<PathBuf> {
        let dir = safe_join(&self.root, relative)?;
        std::fs::create_dir_all(&dir).with_context(|| format!("create {:?}", dir))?;
        Ok(dir)
    }

    pub fn write(&mut self, relative: &str, content: impl AsRef<[u8]>) -> anyhow::Result<PathBuf> {
        let path = safe_join(&self.root, relative)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("create {:?}", parent))?;
        }
        std::fs::write(&path, content.as_ref()).with_context(|| format!("write {:?}", path))?;
        self.ledger
            .record(format!("{}/{}", self.label, relative), content.as_ref());
        Ok(path)
    }

    pub fn write_json<T: Serialize>(&mut self, relative: &str, value: &T) -> anyhow::Result<PathBuf> {
        let mut content = serde_json::to_string_pretty(value)
            .with_context(|| format!("serialize {}", relative))?;
        content.push('\n');
        self.write(relative, content)
    }

    pub fn write_yaml<T: Serialize>(&mut self, relative: &str, value: &T) -> anyhow::Result<PathBuf> {
        let content =
            serde_yaml::to_string(value).with_context(|| format!("serialize {}", relative))?;
        self.write(relative, content)
    }

    /// Write a file only the owner can read.
    pub fn write_secret(&mut self, relative: &str, content: &str) -> anyhow::Result<PathBuf> {
        let path = self.write(relative, content)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("chmod {:?}", path))?;
        }
        Ok(path)
    }
}

/// Build both bundles and the lock artifact.
pub fn build_bundles(ctx: &RenderContext<'_>) -> anyhow::Result<BuildOutcome> {
    std::fs::create_dir_all(ctx.out_dir).with_context(|| format!("create {:?}", ctx.out_dir))?;
    let mut ledger = ChecksumLedger::new();

    let student_bundle = student::write_student_bundle(
        ctx,
        BundleWriter::create(ctx.out_dir.join(STUDENT_BUNDLE), STUDENT_BUNDLE, &mut ledger)?,
    )?;
    let grading_bundle = grading::write_grading_bundle(
        ctx,
        BundleWriter::create(ctx.out_dir.join(GRADING_BUNDLE), GRADING_BUNDLE, &mut ledger)?,
    )?;

    let files = ledger.len();
    let lock = LockArtifact::new(ctx.spec, ctx.network.clone(), ctx.box_version, ledger)?;
    let lock_path = ctx.out_dir.join(LOCK_FILE);
    let content = serde_json::to_string_pretty(&lock).context("serialize lock artifact")?;
    std::fs::write(&lock_path, content).with_context(|| format!("write {:?}", lock_path))?;

    info!(
        assignment_id = %ctx.spec.assignment_id,
        files,
        spec_hash = %lock.spec_hash,
        "bundles built"
    );

    Ok(BuildOutcome {
        student_bundle,
        grading_bundle,
        lock_path,
        lock,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_join_rejects_escapes() {
        let root = Path::new("/bundle");
        assert_eq!(
            safe_join(root, "files/motd").expect("relative path"),
            PathBuf::from("/bundle/files/motd")
        );
        assert!(safe_join(root, "../etc/passwd").is_err());
        assert!(safe_join(root, "files/../../x").is_err());
        assert!(safe_join(root, "/etc/passwd").is_err());
        assert!(safe_join(root, "").is_err());
    }

    #[test]
    fn test_writer_records_checksums_with_label() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut ledger = ChecksumLedger::new();
        {
            let mut writer =
                BundleWriter::create(dir.path().join("b"), "b", &mut ledger).expect("writer");
            writer.write("a/b.txt", "abc").expect("write file");
            writer
                .write_json("c.json", &serde_json::json!({"k": 1}))
                .expect("write json");
        }
        assert_eq!(ledger.len(), 2);
        assert_eq!(
            ledger.get("b/a/b.txt"),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        assert!(dir.path().join("b/a/b.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_secret_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tempdir");
        let mut ledger = ChecksumLedger::new();
        let mut writer = BundleWriter::create(dir.path().to_path_buf(), "g", &mut ledger)
            .expect("writer");
        let path = writer.write_secret(".vault_pass", "s3cret").expect("write secret");
        let mode = std::fs::metadata(path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
