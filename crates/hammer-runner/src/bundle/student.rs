//! The bundle handed to students: an inventory they can converge against,
//! the default variable values, and any files the assignment provides.

use super::inventory::{ansible_cfg, Inventory, INVENTORY_PATH};
use super::{safe_join, BundleWriter, RenderContext};
use anyhow::Context;
use hammer_core::spec::VarMap;
use hammer_core::OverlayPhase;
use serde_json::Value;
use std::path::PathBuf;

pub fn student_defaults(ctx: &RenderContext<'_>) -> VarMap {
    ctx.spec
        .variable_contracts
        .iter()
        .map(|v| (v.name.clone(), v.defaults.student.clone()))
        .collect()
}

fn readme(ctx: &RenderContext<'_>) -> String {
    let spec = ctx.spec;
    let mut out = format!(
        "# {} (v{})\n\nEntry point: `{}`\n\n## Nodes\n\n",
        spec.assignment_id, spec.assignment_version, spec.entrypoints.playbook_path
    );
    for node in &spec.topology.nodes {
        let ip = ctx.network.ip_of(&node.name).unwrap_or("unassigned");
        out.push_str(&format!(
            "- {} ({}) groups: {}\n",
            node.name,
            ip,
            node.groups.join(", ")
        ));
    }
    if !spec.variable_contracts.is_empty() {
        out.push_str("\n## Variables\n\n");
        for v in &spec.variable_contracts {
            out.push_str(&format!("- `{}` default `{}`\n", v.name, v.defaults.student));
        }
    }
    if !spec.entrypoints.required_roles.is_empty() {
        out.push_str("\n## Required roles\n\n");
        for role in &spec.entrypoints.required_roles {
            out.push_str(&format!("- {}\n", role));
        }
    }
    out
}

pub fn write_student_bundle(
    ctx: &RenderContext<'_>,
    mut writer: BundleWriter<'_>,
) -> anyhow::Result<PathBuf> {
    let spec = ctx.spec;

    let inventory = Inventory::new(&spec.topology, ctx.network, &VarMap::new());
    writer.write(INVENTORY_PATH, inventory.to_yaml()?)?;
    writer.write("ansible.cfg", ansible_cfg(Some("roles")))?;

    // Baseline group_vars for `all` layer over the student defaults.
    let mut all_vars = student_defaults(ctx);
    let baseline = spec.phase_overlays.get(OverlayPhase::Baseline);
    if let Some(all) = baseline.and_then(|o| o.group_vars.get("all")) {
        all_vars.extend(all.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    writer.write_yaml("group_vars/all.yml", &all_vars)?;

    if let Some(overlay) = baseline {
        for (group, vars) in overlay.group_vars.iter().filter(|(g, _)| g.as_str() != "all") {
            writer.write_yaml(&format!("group_vars/{}.yml", group), vars)?;
        }
    }

    for node in &spec.topology.nodes {
        let mut vars = VarMap::new();
        if let Some(ip) = ctx.network.ip_of(&node.name) {
            vars.insert("ansible_host".to_string(), Value::String(ip.to_string()));
        }
        writer.write_yaml(&format!("host_vars/{}.yml", node.name), &vars)?;
    }

    writer.write_json("topology.json", &spec.topology)?;
    writer.write("README.md", readme(ctx))?;

    writer.mkdir("roles")?;
    for role in &spec.entrypoints.required_roles {
        writer.mkdir(&format!("roles/{}", role))?;
    }

    if !spec.entrypoints.provided_files.is_empty() {
        let spec_dir = ctx
            .spec_dir
            .context("provided files need the specification directory")?;
        for file in &spec.entrypoints.provided_files {
            let source = safe_join(spec_dir, &file.source)?;
            let content =
                std::fs::read(&source).with_context(|| format!("read provided file {:?}", source))?;
            writer.write(&file.destination, content)?;
        }
    }

    Ok(writer.root().to_path_buf())
}
