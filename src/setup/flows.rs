//! Environment setup flows - fixed shell-command sequences

use crate::config::ToolConfig;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// One labelled shell command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShellStep {
    pub label: String,
    pub command: String,
}

impl ShellStep {
    pub fn new(label: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            command: command.into(),
        }
    }
}

/// Named setup flows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SetupFlow {
    /// Build the LiME kernel module and capture RAM
    Lime,
    /// Fetch the analysis tool and its Python dependencies
    Deploy,
    /// Reinstall Python dependencies
    Repair,
}

impl SetupFlow {
    pub const ALL: [SetupFlow; 3] = [SetupFlow::Lime, SetupFlow::Deploy, SetupFlow::Repair];

    pub fn title(self) -> &'static str {
        match self {
            SetupFlow::Lime => "LiME DEPLOYMENT ENGINE",
            SetupFlow::Deploy => "VOLATILITY 3 AUTO-DEPLOY",
            SetupFlow::Repair => "ENVIRONMENT REPAIR UTILITY",
        }
    }

    pub fn steps(self, tool: &ToolConfig) -> Vec<ShellStep> {
        match self {
            SetupFlow::Lime => lime_steps(),
            SetupFlow::Deploy => deploy_steps(&tool.python, cfg!(windows)),
            SetupFlow::Repair => repair_steps(&tool.python),
        }
    }
}

impl fmt::Display for SetupFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SetupFlow::Lime => "lime",
            SetupFlow::Deploy => "deploy",
            SetupFlow::Repair => "repair",
        };
        f.write_str(name)
    }
}

impl FromStr for SetupFlow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lime" => Ok(SetupFlow::Lime),
            "deploy" => Ok(SetupFlow::Deploy),
            "repair" => Ok(SetupFlow::Repair),
            other => Err(format!("unknown setup flow '{}' (lime, deploy, repair)", other)),
        }
    }
}

/// LiME steps; each is also offered on its own
pub fn lime_steps() -> Vec<ShellStep> {
    vec![
        ShellStep::new("UPDATE APT", "sudo apt update"),
        ShellStep::new(
            "HEADERS",
            "sudo apt install -y git build-essential linux-headers-$(uname -r)",
        ),
        ShellStep::new(
            "FETCH SOURCE",
            "sudo git clone https://github.com/504ensicsLabs/LiME.git",
        ),
        ShellStep::new("BUILD", "cd LiME/src && make"),
        ShellStep::new(
            "CAPTURE",
            "cd LiME/src && sudo insmod lime-$(uname -r).ko path=/tmp/ram_dump.lime format=lime",
        ),
    ]
}

fn quoted(python: &str) -> String {
    format!("\"{}\"", python)
}

pub fn deploy_steps(python: &str, windows: bool) -> Vec<ShellStep> {
    let py = quoted(python);
    let mut steps = Vec::new();
    if !windows {
        steps.push(ShellStep::new(
            "SYSTEM PACKAGES",
            "sudo apt update && sudo apt install -y python3-pip git python3-setuptools python3-dev",
        ));
    }
    steps.push(ShellStep::new(
        "UPGRADE PIP",
        format!("{} -m pip install --upgrade pip", py),
    ));
    steps.push(ShellStep::new(
        "CLONE",
        "git clone https://github.com/volatilityfoundation/volatility3.git",
    ));
    steps.push(ShellStep::new(
        "CORE MODULES",
        format!("{} -m pip install --user pefile pycryptodome yara-python capstone", py),
    ));
    let requirements = if windows {
        format!("{} -m pip install --user -r volatility3\\requirements.txt", py)
    } else {
        "pip3 install --user -r volatility3/requirements.txt".to_string()
    };
    steps.push(ShellStep::new("REQUIREMENTS", requirements));
    steps
}

pub fn repair_steps(python: &str) -> Vec<ShellStep> {
    let py = quoted(python);
    vec![
        ShellStep::new("UPGRADE PIP", format!("{} -m pip install --upgrade pip", py)),
        ShellStep::new(
            "CORE MODULES",
            format!(
                "{} -m pip install --user pefile pycryptodome yara-python yara-x capstone jsonschema",
                py
            ),
        ),
        ShellStep::new(
            "REQUIREMENTS",
            format!("{} -m pip install --user -r volatility3/requirements.txt", py),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lime_labels() {
        let labels: Vec<String> = lime_steps().into_iter().map(|s| s.label).collect();
        assert_eq!(labels, ["UPDATE APT", "HEADERS", "FETCH SOURCE", "BUILD", "CAPTURE"]);
    }

    #[test]
    fn test_deploy_platform_differences() {
        let unix = deploy_steps("python3", false);
        assert_eq!(unix[0].label, "SYSTEM PACKAGES");
        assert!(unix.last().unwrap().command.contains("volatility3/requirements.txt"));

        let windows = deploy_steps("python", true);
        assert_eq!(windows[0].label, "UPGRADE PIP");
        assert!(windows.last().unwrap().command.contains("volatility3\\requirements.txt"));
    }

    #[test]
    fn test_repair_uses_configured_python() {
        let steps = repair_steps("/opt/py/bin/python3");
        assert!(steps.iter().all(|s| s.command.starts_with("\"/opt/py/bin/python3\" -m pip")));
    }

    #[test]
    fn test_flow_parse() {
        assert_eq!("LiME".parse::<SetupFlow>(), Ok(SetupFlow::Lime));
        assert!("nuke".parse::<SetupFlow>().is_err());
    }
}
