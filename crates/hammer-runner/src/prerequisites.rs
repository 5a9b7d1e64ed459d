//! External tools a command needs on `PATH`.

use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tool {
    pub binary: &'static str,
    pub hint: &'static str,
}

pub const ANSIBLE_PLAYBOOK: Tool = Tool {
    binary: "ansible-playbook",
    hint: "pip install ansible-core",
};
pub const ANSIBLE: Tool = Tool {
    binary: "ansible",
    hint: "pip install ansible-core",
};
pub const PYTHON: Tool = Tool {
    binary: "python3",
    hint: "install python3 with pytest and pytest-json-report",
};
pub const VAGRANT: Tool = Tool {
    binary: "vagrant",
    hint: "https://developer.hashicorp.com/vagrant/install",
};

pub const BUILD_TOOLS: &[Tool] = &[ANSIBLE_PLAYBOOK];
pub const GRADE_TOOLS: &[Tool] = &[ANSIBLE_PLAYBOOK, ANSIBLE, PYTHON, VAGRANT];

/// Tools from `tools` that `lookup` cannot find.
pub fn missing_with<F>(tools: &[Tool], lookup: F) -> Vec<Tool>
where
    F: Fn(&str) -> Option<PathBuf>,
{
    tools
        .iter()
        .filter(|t| lookup(t.binary).is_none())
        .copied()
        .collect()
}

pub fn missing(tools: &[Tool]) -> Vec<Tool> {
    missing_with(tools, |bin| which::which(bin).ok())
}

/// Fail with one error naming every missing tool.
pub fn ensure(tools: &[Tool]) -> anyhow::Result<()> {
    report(missing(tools))
}

fn report(missing: Vec<Tool>) -> anyhow::Result<()> {
    if missing.is_empty() {
        return Ok(());
    }
    let lines: Vec<String> = missing
        .iter()
        .map(|t| format!("  {} ({})", t.binary, t.hint))
        .collect();
    anyhow::bail!("Missing prerequisites:\n{}", lines.join("\n"))
}
