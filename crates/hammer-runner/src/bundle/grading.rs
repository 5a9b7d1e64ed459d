//! The bundle the grader works from: resolved plan, per-phase check lists,
//! and the overlay files activated before each converge.

use super::inventory::{ansible_cfg, Inventory, INVENTORY_PATH};
use super::{BundleWriter, RenderContext};
use crate::testgen::write_phase_tests;
use hammer_core::spec::VarMap;
use hammer_core::{ExecutionPhase, OverlayPhase};
use serde_json::Value;
use std::path::PathBuf;

pub const PLAN_FILE: &str = "plan.json";
pub const VAULT_PASSWORD_FILE: &str = ".vault_pass";

/// Relative directory holding the overlay files for `phase`.
pub fn overlay_dir(phase: OverlayPhase) -> String {
    format!("overlays/{}", phase)
}

pub fn checks_file(phase: ExecutionPhase) -> String {
    format!("checks/{}.json", phase)
}

fn host_address(ctx: &RenderContext<'_>, node: &str) -> VarMap {
    let mut vars = VarMap::new();
    if let Some(ip) = ctx.network.ip_of(node) {
        vars.insert("ansible_host".to_string(), Value::String(ip.to_string()));
    }
    vars
}

fn write_overlay(
    ctx: &RenderContext<'_>,
    writer: &mut BundleWriter<'_>,
    phase: OverlayPhase,
) -> anyhow::Result<()> {
    let vars = ctx.plan.variables_for(phase.execution_phase());
    let dir = overlay_dir(phase);

    writer.write_json(&format!("{}/inventory_vars.json", dir), &vars.inventory_vars)?;
    writer.write_json(&format!("{}/extra_vars.json", dir), &vars.extra_vars)?;

    for (group, group_vars) in &vars.group_vars {
        writer.write_yaml(&format!("{}/group_vars/{}.yml", dir, group), group_vars)?;
    }
    // host_vars replace the base file on activation, so keep the address.
    for (host, host_vars) in &vars.host_vars {
        let mut merged = host_address(ctx, host);
        merged.extend(host_vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        writer.write_yaml(&format!("{}/host_vars/{}.yml", dir, host), &merged)?;
    }
    Ok(())
}

pub fn write_grading_bundle(
    ctx: &RenderContext<'_>,
    mut writer: BundleWriter<'_>,
) -> anyhow::Result<PathBuf> {
    let spec = ctx.spec;

    let inventory = Inventory::new(&spec.topology, ctx.network, &VarMap::new());
    writer.write(INVENTORY_PATH, inventory.to_yaml()?)?;
    writer.write("ansible.cfg", ansible_cfg(Some("roles")))?;
    writer.write_yaml("group_vars/all.yml", &VarMap::new())?;
    for node in &spec.topology.nodes {
        writer.write_yaml(
            &format!("host_vars/{}.yml", node.name),
            &host_address(ctx, &node.name),
        )?;
    }

    writer.write_json(PLAN_FILE, ctx.plan)?;
    for phase in ExecutionPhase::ALL {
        writer.write_json(&checks_file(phase), ctx.plan.contracts_for(phase))?;
        write_phase_tests(&mut writer, ctx.plan.contracts_for(phase))?;
    }

    for phase in OverlayPhase::ALL {
        write_overlay(ctx, &mut writer, phase)?;
    }

    writer.write_json("spec.json", spec)?;
    writer.write_json("topology.json", &spec.topology)?;

    if let Some(vault) = &spec.vault {
        writer.write_secret(VAULT_PASSWORD_FILE, &vault.vault_password)?;
    }

    Ok(writer.root().to_path_buf())
}
