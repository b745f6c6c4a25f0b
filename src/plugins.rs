//! Plugin registry - the analysis modules offered per target OS

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const LINUX_PLUGINS: &[&str] = &[
    "linux.cpuinfo.CpuInfo",
    "linux.dmesg.Dmesg",
    "linux.iomem.IOMem",
    "linux.slabinfo.SlabInfo",
    "linux.mounts.Mounts",
    "linux.pslist.PsList",
    "linux.psaux.PsAux",
    "linux.pstree.PsTree",
    "linux.lsof.Lsof",
    "linux.proc.Maps",
    "linux.bash.Bash",
    "linux.lsmod.LsMod",
    "linux.check_afinfo.Check_afinfo",
    "linux.check_tty.Check_tty",
    "linux.arp.Arp",
    "linux.ifconfig.Ifconfig",
    "linux.netstat.NetStat",
];

pub const WINDOWS_PLUGINS: &[&str] = &[
    "windows.info.Info",
    "windows.pslist.PsList",
    "windows.psscan.PsScan",
    "windows.pstree.PsTree",
    "windows.psxview.PsXView",
    "windows.cmdline.CmdLine",
    "windows.netstat.NetStat",
    "windows.netscan.NetScan",
    "windows.filescan.FileScan",
    "windows.handles.Handles",
    "windows.dlllist.DllList",
    "windows.malfind.MalFind",
    "windows.registry.hivelist.HiveList",
    "windows.registry.hivescan.HiveScan",
    "windows.registry.printkey.PrintKey",
    "windows.registry.userassist.UserAssist",
    "windows.getservicesids.GetServiceSIDs",
    "windows.getsids.GetSIDs",
    "windows.sessions.Sessions",
    "windows.driverscan.DriverScan",
    "windows.modules.Modules",
    "windows.modscan.ModScan",
    "windows.callbacks.Callbacks",
    "windows.idt.IDT",
    "windows.gdt.GDT",
    "windows.ssdt.SSDT",
    "windows.vaddump.VadDump",
    "windows.vadinfo.VadInfo",
    "windows.virtmap.VirtMap",
    "windows.mftscan.MFTScan",
    "windows.memmap.Memmap",
    "windows.ldrmodules.LdrModules",
    "windows.poolscanner.PoolScanner",
    "windows.privs.Privs",
    "windows.symlinkscan.SymlinkScan",
    "windows.verinfo.VerInfo",
    "windows.devicetree.DeviceTree",
    "windows.envars.Envars",
    "windows.joblinks.JobLinks",
    "windows.strings.Strings",
    "windows.moddump.ModDump",
    "windows.procdump.ProcDump",
    "windows.driversync.DriverSync",
    "windows.crashdump.CrashDump",
    "windows.svcscan.SvcScan",
    "windows.bigpools.BigPools",
    "windows.mutantscan.MutantScan",
];

/// Operating system the memory image was captured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetOs {
    Windows,
    Linux,
}

impl TargetOs {
    pub fn plugins(self) -> &'static [&'static str] {
        match self {
            TargetOs::Windows => WINDOWS_PLUGINS,
            TargetOs::Linux => LINUX_PLUGINS,
        }
    }

    pub fn toggle(self) -> Self {
        match self {
            TargetOs::Windows => TargetOs::Linux,
            TargetOs::Linux => TargetOs::Windows,
        }
    }

    /// Target OS implied by a plugin identifier's namespace
    pub fn of_plugin(plugin: &str) -> Option<Self> {
        match plugin.split('.').next() {
            Some("windows") => Some(TargetOs::Windows),
            Some("linux") => Some(TargetOs::Linux),
            _ => None,
        }
    }
}

impl fmt::Display for TargetOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetOs::Windows => write!(f, "windows"),
            TargetOs::Linux => write!(f, "linux"),
        }
    }
}

impl FromStr for TargetOs {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "windows" | "win" => Ok(TargetOs::Windows),
            "linux" => Ok(TargetOs::Linux),
            other => Err(format!("unknown target OS '{}' (expected windows or linux)", other)),
        }
    }
}

/// Cursor over one OS's plugin list
#[derive(Debug, Clone)]
pub struct PluginPicker {
    os: TargetOs,
    index: usize,
}

impl PluginPicker {
    pub fn new(os: TargetOs) -> Self {
        Self { os, index: 0 }
    }

    pub fn os(&self) -> TargetOs {
        self.os
    }

    pub fn selected(&self) -> &'static str {
        self.os.plugins()[self.index]
    }

    pub fn next(&mut self) {
        self.index = (self.index + 1) % self.os.plugins().len();
    }

    pub fn previous(&mut self) {
        let len = self.os.plugins().len();
        self.index = (self.index + len - 1) % len;
    }

    /// Switch OS and reset to its first plugin
    pub fn switch_os(&mut self) {
        self.os = self.os.toggle();
        self.index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_sizes() {
        assert_eq!(LINUX_PLUGINS.len(), 17);
        assert_eq!(WINDOWS_PLUGINS.len(), 47);
        assert!(LINUX_PLUGINS.iter().all(|p| TargetOs::of_plugin(p) == Some(TargetOs::Linux)));
        assert!(WINDOWS_PLUGINS.iter().all(|p| TargetOs::of_plugin(p) == Some(TargetOs::Windows)));
    }

    #[test]
    fn test_picker_wraps() {
        let mut picker = PluginPicker::new(TargetOs::Linux);
        assert_eq!(picker.selected(), "linux.cpuinfo.CpuInfo");
        picker.previous();
        assert_eq!(picker.selected(), "linux.netstat.NetStat");
        picker.next();
        assert_eq!(picker.selected(), "linux.cpuinfo.CpuInfo");

        picker.next();
        picker.switch_os();
        assert_eq!(picker.os(), TargetOs::Windows);
        assert_eq!(picker.selected(), "windows.info.Info");
    }

    #[test]
    fn test_parse_os() {
        assert_eq!("Linux".parse::<TargetOs>(), Ok(TargetOs::Linux));
        assert_eq!("win".parse::<TargetOs>(), Ok(TargetOs::Windows));
        assert!("macos".parse::<TargetOs>().is_err());
    }
}
