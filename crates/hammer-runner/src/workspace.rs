//! The grading workspace: a copy of the student repository with the grading
//! bundle layered on top, re-pointed at one overlay phase at a time.

use crate::bundle::grading::{overlay_dir, VAULT_PASSWORD_FILE};
use crate::bundle::inventory::INVENTORY_PATH;
use anyhow::Context;
use hammer_core::{ConvergeResult, ExecutionPhase, OverlayPhase, PhaseVariablePlan};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const WORKSPACE_DIR: &str = "grading_workspace";
const PRISTINE_DIR: &str = ".hammer/pristine";
const HANDLER_RUNS_DIR: &str = ".handler_runs";
const CONVERGE_LOGS_DIR: &str = ".converge_logs";
const SNAPSHOTS_DIR: &str = ".snapshots";
const VAR_DIRS: [&str; 2] = ["group_vars", "host_vars"];

/// Recursively copy `src` into `dst`, skipping top-level entries `skip` names.
pub fn copy_tree(src: &Path, dst: &Path, skip: &[&str]) -> anyhow::Result<()> {
    std::fs::create_dir_all(dst).with_context(|| format!("create {:?}", dst))?;
    for entry in std::fs::read_dir(src).with_context(|| format!("read {:?}", src))? {
        let entry = entry?;
        let name = entry.file_name();
        if skip.iter().any(|s| name == *s) {
            continue;
        }
        let from = entry.path();
        let to = dst.join(&name);
        if entry.file_type()?.is_dir() {
            copy_tree(&from, &to, &[])?;
        } else {
            std::fs::copy(&from, &to).with_context(|| format!("copy {:?} -> {:?}", from, to))?;
        }
    }
    Ok(())
}

fn read_mapping(path: &Path) -> anyhow::Result<serde_yaml::Mapping> {
    let content = std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&content).with_context(|| format!("parse {:?}", path))?;
    Ok(match value {
        serde_yaml::Value::Mapping(map) => map,
        _ => serde_yaml::Mapping::new(),
    })
}

/// Layer every `*.yml` in `overlay` over the same-named file in `target`, key by key.
fn merge_var_files(overlay: &Path, target: &Path) -> anyhow::Result<usize> {
    if !overlay.is_dir() {
        return Ok(0);
    }
    std::fs::create_dir_all(target).with_context(|| format!("create {:?}", target))?;
    let mut merged = 0;
    for entry in std::fs::read_dir(overlay).with_context(|| format!("read {:?}", overlay))? {
        let path = entry?.path();
        if path.extension().map_or(true, |ext| ext != "yml") {
            continue;
        }
        let Some(name) = path.file_name() else {
            continue;
        };
        let dst = target.join(name);
        let mut vars = if dst.exists() {
            read_mapping(&dst)?
        } else {
            serde_yaml::Mapping::new()
        };
        for (k, v) in read_mapping(&path)? {
            vars.insert(k, v);
        }
        let content = serde_yaml::to_string(&vars)?;
        std::fs::write(&dst, content).with_context(|| format!("write {:?}", dst))?;
        merged += 1;
    }
    Ok(merged)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("create {:?}", parent))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct GradingWorkspace {
    root: PathBuf,
}

impl GradingWorkspace {
    /// Build `<out>/grading_workspace` from the student repository and the
    /// grading bundle. Any previous workspace is replaced.
    pub fn prepare(student_repo: &Path, grading_bundle: &Path, out_dir: &Path) -> anyhow::Result<Self> {
        if !student_repo.is_dir() {
            anyhow::bail!("Student repository not found at {:?}", student_repo);
        }
        if !grading_bundle.is_dir() {
            anyhow::bail!("Grading bundle not found at {:?}", grading_bundle);
        }

        let root = out_dir.join(WORKSPACE_DIR);
        if root.exists() {
            std::fs::remove_dir_all(&root).with_context(|| format!("remove {:?}", root))?;
        }

        copy_tree(student_repo, &root, &[".git"])?;
        // The student's own group_vars stay authoritative until an overlay is activated.
        copy_tree(grading_bundle, &root, &["group_vars"])?;

        let pristine = root.join(PRISTINE_DIR);
        for dir in VAR_DIRS {
            let src = root.join(dir);
            if src.is_dir() {
                copy_tree(&src, &pristine.join(dir), &[])?;
            }
        }

        debug!(workspace = %root.display(), "grading workspace prepared");
        Ok(Self { root })
    }

    /// Open an already prepared workspace.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn inventory(&self) -> PathBuf {
        self.root.join(INVENTORY_PATH)
    }

    pub fn tests_dir(&self, phase: ExecutionPhase) -> PathBuf {
        self.root.join("tests").join(phase.as_str())
    }

    pub fn vault_password_file(&self) -> Option<PathBuf> {
        let path = self.root.join(VAULT_PASSWORD_FILE);
        path.exists().then_some(path)
    }

    /// Reset variable directories to their pristine state and apply the overlay
    /// for `phase`. Returns the extra-vars file to pass to the converge.
    pub fn activate(&self, phase: OverlayPhase) -> anyhow::Result<PathBuf> {
        let pristine = self.root.join(PRISTINE_DIR);
        let overlay = self.root.join(overlay_dir(phase));

        for dir in VAR_DIRS {
            let live = self.root.join(dir);
            if live.exists() {
                std::fs::remove_dir_all(&live).with_context(|| format!("remove {:?}", live))?;
            }
            let saved = pristine.join(dir);
            if saved.is_dir() {
                copy_tree(&saved, &live, &[])?;
            }
            let merged = merge_var_files(&overlay.join(dir), &live)?;
            debug!(phase = %phase, dir, merged, "overlay variables applied");
        }

        self.apply_inventory_vars(&overlay.join("inventory_vars.json"))?;

        let extra_vars = overlay.join("extra_vars.json");
        if !extra_vars.exists() {
            write_json(&extra_vars, &serde_json::Map::new())?;
        }
        Ok(extra_vars)
    }

    fn apply_inventory_vars(&self, vars_file: &Path) -> anyhow::Result<()> {
        let inventory_path = self.inventory();
        let mut inventory = read_mapping(&inventory_path)?;

        let vars: serde_yaml::Mapping = if vars_file.exists() {
            let content = std::fs::read_to_string(vars_file)
                .with_context(|| format!("read {:?}", vars_file))?;
            serde_json::from_str(&content).with_context(|| format!("parse {:?}", vars_file))?
        } else {
            serde_yaml::Mapping::new()
        };

        let all_key = serde_yaml::Value::from("all");
        let all = inventory
            .entry(all_key)
            .or_insert_with(|| serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
        if let serde_yaml::Value::Mapping(all) = all {
            if vars.is_empty() {
                all.remove("vars");
            } else {
                all.insert("vars".into(), serde_yaml::Value::Mapping(vars));
            }
        }

        let content = serde_yaml::to_string(&inventory)?;
        std::fs::write(&inventory_path, content)
            .with_context(|| format!("write {:?}", inventory_path))?;
        Ok(())
    }

    /// Persist handler run counts where the phase's tests look for them.
    pub fn record_handler_runs(
        &self,
        phase: ExecutionPhase,
        converge: &ConvergeResult,
    ) -> anyhow::Result<PathBuf> {
        let path = self
            .root
            .join(HANDLER_RUNS_DIR)
            .join(format!("{}.json", phase));
        write_json(&path, &converge.handlers_run)?;
        Ok(path)
    }

    /// Persist the converge output that output checks match against.
    pub fn record_converge_log(&self, phase: ExecutionPhase, log: &str) -> anyhow::Result<PathBuf> {
        let dir = self.root.join(CONVERGE_LOGS_DIR);
        std::fs::create_dir_all(&dir).with_context(|| format!("create {:?}", dir))?;
        let path = dir.join(format!("{}.log", phase));
        std::fs::write(&path, log).with_context(|| format!("write {:?}", path))?;
        Ok(path)
    }

    /// Persist the resolved variables of a phase for its verification tests.
    pub fn record_snapshot(&self, vars: &PhaseVariablePlan) -> anyhow::Result<PathBuf> {
        let path = self
            .root
            .join(SNAPSHOTS_DIR)
            .join(format!("{}.json", vars.phase));
        write_json(&path, &vars.resolved)?;
        Ok(path)
    }
}
