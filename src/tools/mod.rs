//! Pinned binary tools baked into the images.
//!
//! Each tool is downloaded from its release page, checked against a pinned
//! SHA-256 and its binaries copied into a bin directory. Groups mirror the
//! image variants: `base` for every image, `k8s` for the full one.

mod install;

pub use install::{
    download, ensure_destination, extract, install_tools, verify_sha256, InstallOptions,
};

use std::collections::BTreeMap;

/// How a release asset is packaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Archive {
    TarGz,
    TarXz,
    Zip,
    /// A bare executable, installed under the given name.
    Binary(&'static str),
}

/// A pinned release of one tool.
#[derive(Debug)]
pub struct Tool {
    pub name: &'static str,
    pub version: &'static str,
    pub sha256: &'static str,
    pub groups: &'static [&'static str],
    /// `{version}` is substituted.
    pub url_template: &'static str,
    pub archive: Archive,
    /// Executables to install. Empty installs every file.
    pub binaries: &'static [&'static str],
    /// Leading path components to ignore in the archive.
    pub strip_components: usize,
    /// Also installs `runtime/` to `~/.config/helix/runtime`.
    pub helix_runtime: bool,
    pub post_install_message: Option<&'static str>,
}

impl Tool {
    pub fn url(&self) -> String {
        self.url_template.replace("{version}", self.version)
    }
}

pub static TOOLS: &[Tool] = &[
    Tool {
        name: "zellij",
        version: "0.43.0",
        sha256: "00070e052a86e3072dbd626cc0a0295106e7ed74c42871ba38185d4ebbcae58a",
        groups: &["base"],
        url_template: "https://github.com/zellij-org/zellij/releases/download/v{version}/zellij-x86_64-unknown-linux-musl.tar.gz",
        archive: Archive::TarGz,
        binaries: &["zellij"],
        strip_components: 0,
        helix_runtime: false,
        post_install_message: None,
    },
    Tool {
        name: "helix",
        version: "25.07.1",
        sha256: "3f08e63ecd388fff657ad39722f88bb03dcf326f1f2da2700d99e1dc40ab2e8b",
        groups: &["base"],
        url_template: "https://github.com/helix-editor/helix/releases/download/{version}/helix-{version}-x86_64-linux.tar.xz",
        archive: Archive::TarXz,
        binaries: &["hx"],
        strip_components: 1,
        helix_runtime: true,
        post_install_message: None,
    },
    Tool {
        name: "yazi",
        version: "25.5.31",
        sha256: "a2fdc9c35719fa72d94820893eb2fedd93fd1c418c2cf568702643526c358f7a",
        groups: &["base"],
        url_template: "https://github.com/sxyazi/yazi/releases/download/v{version}/yazi-x86_64-unknown-linux-musl.zip",
        archive: Archive::Zip,
        binaries: &["yazi"],
        strip_components: 1,
        helix_runtime: false,
        post_install_message: None,
    },
    Tool {
        name: "starship",
        version: "1.24.1",
        sha256: "44a729c34aea5b0451fba49108cdc5ef6b1ae68db65e7623cc244a52efcd23d1",
        groups: &["base"],
        url_template: "https://github.com/starship/starship/releases/download/v{version}/starship-x86_64-unknown-linux-musl.tar.gz",
        archive: Archive::TarGz,
        binaries: &["starship"],
        strip_components: 0,
        helix_runtime: false,
        post_install_message: None,
    },
    Tool {
        name: "uv",
        version: "0.5.11",
        sha256: "5b77978bc8ded7e1b6ddb6d6a3e52f684bcc07c6d9be11d7b4fc3c1c23f4458f",
        groups: &["base"],
        url_template: "https://github.com/astral-sh/uv/releases/download/{version}/uv-x86_64-unknown-linux-musl.tar.gz",
        archive: Archive::TarGz,
        binaries: &["uv", "uvx"],
        strip_components: 1,
        helix_runtime: false,
        post_install_message: None,
    },
    Tool {
        name: "kubectl",
        version: "1.34.3",
        sha256: "ab60ca5f0fd60c1eb81b52909e67060e3ba0bd27e55a8ac147cbc2172ff14212",
        groups: &["k8s"],
        url_template: "https://dl.k8s.io/release/v{version}/bin/linux/amd64/kubectl",
        archive: Archive::Binary("kubectl"),
        binaries: &[],
        strip_components: 0,
        helix_runtime: false,
        post_install_message: None,
    },
    Tool {
        name: "talosctl",
        version: "1.9.1",
        sha256: "3dbc86618394db080a3465143c1bc45aefd4e299fc3f7e1429e93c255cf9c555",
        groups: &["k8s"],
        url_template: "https://github.com/siderolabs/talos/releases/download/v{version}/talosctl-linux-amd64",
        archive: Archive::Binary("talosctl"),
        binaries: &[],
        strip_components: 0,
        helix_runtime: false,
        post_install_message: None,
    },
    Tool {
        name: "cilium",
        version: "0.18.9",
        sha256: "15978aaf82373b0682aa87ab217848b3fb6e3cd80adad365d34696fe92543923",
        groups: &["k8s"],
        url_template: "https://github.com/cilium/cilium-cli/releases/download/v{version}/cilium-linux-amd64.tar.gz",
        archive: Archive::TarGz,
        binaries: &["cilium"],
        strip_components: 0,
        helix_runtime: false,
        post_install_message: None,
    },
    Tool {
        name: "kubectl-cnpg",
        version: "1.28.0",
        sha256: "d39f8623ff4de6bc7a3013e596b808432ae50773ddac56efe04e9ded2205bbf1",
        groups: &["k8s"],
        url_template: "https://github.com/cloudnative-pg/cloudnative-pg/releases/download/v{version}/kubectl-cnpg_{version}_linux_x86_64.tar.gz",
        archive: Archive::TarGz,
        binaries: &["kubectl-cnpg"],
        strip_components: 0,
        helix_runtime: false,
        post_install_message: None,
    },
    Tool {
        name: "direnv",
        version: "2.35.0",
        sha256: "55c294f4376397c68b1f659f049fb104dc2ecd0fcb15a15949d7f748e3f70b66",
        groups: &["base"],
        url_template: "https://github.com/direnv/direnv/releases/download/v{version}/direnv.linux-amd64",
        archive: Archive::Binary("direnv"),
        binaries: &[],
        strip_components: 0,
        helix_runtime: false,
        post_install_message: Some("add 'eval \"$(direnv hook bash)\"' to your .bashrc"),
    },
    Tool {
        name: "just",
        version: "1.40.0",
        sha256: "181b91d0ceebe8a57723fb648ed2ce1a44d849438ce2e658339df4f8db5f1263",
        groups: &["base"],
        url_template: "https://github.com/casey/just/releases/download/{version}/just-{version}-x86_64-unknown-linux-musl.tar.gz",
        archive: Archive::TarGz,
        binaries: &["just"],
        strip_components: 0,
        helix_runtime: false,
        post_install_message: None,
    },
];

pub fn find(name: &str) -> Option<&'static Tool> {
    TOOLS.iter().find(|t| t.name == name)
}

/// Tools keyed by group; a tool without groups lands in `other`.
pub fn by_group() -> BTreeMap<&'static str, Vec<&'static Tool>> {
    let mut groups: BTreeMap<&'static str, Vec<&'static Tool>> = BTreeMap::new();
    for tool in TOOLS {
        let names: &[&'static str] = if tool.groups.is_empty() {
            &["other"]
        } else {
            tool.groups
        };
        for group in names {
            groups.entry(*group).or_default().push(tool);
        }
    }
    groups
}

pub fn list_tools() {
    println!("available tools:\n");
    for (group, tools) in by_group() {
        println!("  [{}]", group);
        for tool in tools {
            println!("    {:15} v{}", tool.name, tool.version);
        }
        println!();
    }
}

/// Resolve the tool names an install request refers to.
///
/// `--all` wins, then `--group`, then explicit names (kept as given, so
/// unknown names are reported by the installer).
pub fn select(names: &[String], all: bool, groups: &[String]) -> Vec<String> {
    if all {
        TOOLS.iter().map(|t| t.name.to_string()).collect()
    } else if !groups.is_empty() {
        TOOLS
            .iter()
            .filter(|t| t.groups.iter().any(|g| groups.iter().any(|want| want == g)))
            .map(|t| t.name.to_string())
            .collect()
    } else {
        names.to_vec()
    }
}
