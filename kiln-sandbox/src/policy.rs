//! Source screening against categorized deny rules
//!
//! The rule table is evaluated top to bottom and the first hit blocks the
//! request. Generic categories come first; language-specific rules come
//! last and only apply to the resolved language. Blocklisting raises the
//! cost of naive attacks, it does not prove a snippet harmless.

use crate::error::ServiceError;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Bumped whenever a rule is added, removed or changes meaning
pub const RULESET_VERSION: u32 = 1;

/// Rule category, the only part of a verdict callers get to see
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyCategory {
    Destruction,
    SystemControl,
    ProcessControl,
    Privilege,
    Network,
    Gui,
    Packages,
    LanguageSpecific,
}

impl fmt::Display for PolicyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PolicyCategory::Destruction => "destruction",
            PolicyCategory::SystemControl => "system_control",
            PolicyCategory::ProcessControl => "process_control",
            PolicyCategory::Privilege => "privilege",
            PolicyCategory::Network => "network",
            PolicyCategory::Gui => "gui",
            PolicyCategory::Packages => "packages",
            PolicyCategory::LanguageSpecific => "language_specific",
        };
        f.write_str(label)
    }
}

/// Details of a blocking rule. Meant for audit logs, not for callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyBlock {
    pub category: PolicyCategory,
    pub rule_id: &'static str,
    pub description: &'static str,
    /// Source fragment that triggered the rule
    pub matched: String,
}

/// Outcome of screening one source text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "lowercase")]
pub enum PolicyVerdict {
    Allowed,
    Blocked(PolicyBlock),
}

impl PolicyVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyVerdict::Allowed)
    }

    pub fn category(&self) -> Option<PolicyCategory> {
        match self {
            PolicyVerdict::Allowed => None,
            PolicyVerdict::Blocked(block) => Some(block.category),
        }
    }
}

/// Rule shapes as written in the table
enum RuleKind {
    /// Any match of the pattern blocks
    Pattern(&'static str),
    /// Every pattern must match somewhere in the source
    AllOf(&'static [&'static str]),
    /// A destructive command whose arguments (captured as `args`) are
    /// checked against the home exemption. `flags` lists option letters of
    /// which at least one must be present; empty means always destructive.
    PathTarget {
        pattern: &'static str,
        flags: &'static str,
    },
    /// Importing `module` and then touching anything outside `allowed`
    ModuleUsage {
        module: &'static str,
        allowed: &'static [&'static str],
    },
}

struct RuleSpec {
    id: &'static str,
    category: PolicyCategory,
    /// Empty applies to every language
    languages: &'static [&'static str],
    description: &'static str,
    kind: RuleKind,
}

const ALL: &[&str] = &[];
const SHELLS: &[&str] = &["bash", "zsh", "fish"];
const SCRIPTING: &[&str] = &["ruby", "perl", "php"];
const NATIVE: &[&str] = &["c", "cpp"];
const PYTHON_OS_READ_ONLY: &[&str] = &["getcwd", "path", "listdir", "environ", "sep", "linesep", "name"];

const RULES: &[RuleSpec] = &[
    // destruction
    RuleSpec {
        id: "destruction.forced-delete",
        category: PolicyCategory::Destruction,
        languages: ALL,
        description: "recursive or forced rm outside the home directory",
        kind: RuleKind::PathTarget {
            pattern: r"\brm\s+(?P<args>[^\n;&|]*)",
            flags: "rRf",
        },
    },
    RuleSpec {
        id: "destruction.shred",
        category: PolicyCategory::Destruction,
        languages: ALL,
        description: "shred, rmdir or unlink outside the home directory",
        kind: RuleKind::PathTarget {
            pattern: r"\b(shred|rmdir|unlink)\s+(?P<args>[^\n;&|]*)",
            flags: "",
        },
    },
    RuleSpec {
        id: "destruction.disk-copy",
        category: PolicyCategory::Destruction,
        languages: ALL,
        description: "raw dd copy",
        kind: RuleKind::Pattern(r"\bdd\s+if="),
    },
    RuleSpec {
        id: "destruction.filesystem",
        category: PolicyCategory::Destruction,
        languages: ALL,
        description: "filesystem creation or wipe",
        kind: RuleKind::Pattern(r"\b(mkfs(\.\w+)?|wipefs|fdisk|parted)\b"),
    },
    RuleSpec {
        id: "destruction.raw-device",
        category: PolicyCategory::Destruction,
        languages: ALL,
        description: "redirect into a block device",
        kind: RuleKind::Pattern(r">\s*/dev/(sd[a-z]|nvme\d|vd[a-z]|hd[a-z]|mmcblk\d)"),
    },
    RuleSpec {
        id: "destruction.kernel-memory",
        category: PolicyCategory::Destruction,
        languages: ALL,
        description: "kernel memory device access",
        kind: RuleKind::Pattern(r"/dev/(mem|kmem|port)\b"),
    },
    RuleSpec {
        id: "destruction.critical-file-write",
        category: PolicyCategory::Destruction,
        languages: ALL,
        description: "write operator alongside a critical system path",
        kind: RuleKind::AllOf(&[
            r"/etc/(passwd|shadow|sudoers|fstab)\b|/boot/|/usr/lib/systemd|/dev/(sd[a-z]|nvme|vd[a-z])",
            r">|\||\b(rm|dd|mkfs|tee|truncate)\b",
        ]),
    },
    // system control
    RuleSpec {
        id: "system.power",
        category: PolicyCategory::SystemControl,
        languages: ALL,
        description: "reboot, shutdown, halt or poweroff",
        kind: RuleKind::Pattern(r"\b(reboot|shutdown|poweroff|halt)\b"),
    },
    RuleSpec {
        id: "system.runlevel",
        category: PolicyCategory::SystemControl,
        languages: ALL,
        description: "runlevel change",
        kind: RuleKind::Pattern(r"\b(init|telinit)\s+[06]\b"),
    },
    RuleSpec {
        id: "system.service-manager",
        category: PolicyCategory::SystemControl,
        languages: ALL,
        description: "service manager control",
        kind: RuleKind::Pattern(
            r"\bsystemctl\b|\bservice\s+\S+\s+(start|stop|restart|reload)\b",
        ),
    },
    // process control
    RuleSpec {
        id: "process.signal",
        category: PolicyCategory::ProcessControl,
        languages: ALL,
        description: "signalling other processes",
        kind: RuleKind::Pattern(r"\b(kill|pkill|killall)\b"),
    },
    RuleSpec {
        id: "process.fork-bomb",
        category: PolicyCategory::ProcessControl,
        languages: ALL,
        description: "fork bomb or explicit fork",
        kind: RuleKind::Pattern(r":\(\)\s*\{|\bfork\s*\("),
    },
    RuleSpec {
        id: "process.freeze",
        category: PolicyCategory::ProcessControl,
        languages: ALL,
        description: "unbounded shell loop or infinite stream",
        kind: RuleKind::Pattern(
            r"\bwhile\s+(true|:)\s*;\s*do|\byes\s*\||\bcat\s+/dev/(zero|urandom)\s*\|",
        ),
    },
    // privilege
    RuleSpec {
        id: "privilege.escalation",
        category: PolicyCategory::Privilege,
        languages: ALL,
        description: "sudo, doas, pkexec or su",
        kind: RuleKind::Pattern(r"\b(sudo|doas|pkexec)\b|\bsu\s+(-|root\b)"),
    },
    RuleSpec {
        id: "privilege.permissions",
        category: PolicyCategory::Privilege,
        languages: ALL,
        description: "ownership or mode change",
        kind: RuleKind::Pattern(r"\b(chmod|chown|chgrp)\b"),
    },
    RuleSpec {
        id: "privilege.accounts",
        category: PolicyCategory::Privilege,
        languages: ALL,
        description: "account management",
        kind: RuleKind::Pattern(r"\b(passwd|useradd|userdel|usermod|visudo)\b"),
    },
    // network
    RuleSpec {
        id: "network.listener",
        category: PolicyCategory::Network,
        languages: ALL,
        description: "netcat-style listener or relay",
        kind: RuleKind::Pattern(r"\bnc\s+-[a-z]*[el]|\b(ncat|netcat|socat)\b|/dev/(tcp|udp)/"),
    },
    RuleSpec {
        id: "network.download",
        category: PolicyCategory::Network,
        languages: ALL,
        description: "file download",
        kind: RuleKind::Pattern(r"\bcurl\s+.*-[oO]\b|\bwget\s+"),
    },
    // gui
    RuleSpec {
        id: "gui.session",
        category: PolicyCategory::Gui,
        languages: ALL,
        description: "window manager or desktop session control",
        kind: RuleKind::Pattern(
            r"\b(i3-msg|xdotool|wmctrl|xsetroot|notify-send|zenity|xkill)\b",
        ),
    },
    // packages
    RuleSpec {
        id: "packages.system",
        category: PolicyCategory::Packages,
        languages: ALL,
        description: "system package manager",
        kind: RuleKind::Pattern(r"\b(apt|apt-get|pacman|yum|dnf|zypper|apk|snap)\s+\S"),
    },
    RuleSpec {
        id: "packages.language",
        category: PolicyCategory::Packages,
        languages: ALL,
        description: "language package install",
        kind: RuleKind::Pattern(
            r"\b(npm|pnpm|yarn)\s+(install|add|i)\b|\bpip3?\s+install\b|\b(gem|cargo|go)\s+install\b",
        ),
    },
    // language specific
    RuleSpec {
        id: "python.os-usage",
        category: PolicyCategory::LanguageSpecific,
        languages: &["python"],
        description: "os module beyond read-only introspection",
        kind: RuleKind::ModuleUsage {
            module: "os",
            allowed: PYTHON_OS_READ_ONLY,
        },
    },
    RuleSpec {
        id: "python.subprocess",
        category: PolicyCategory::LanguageSpecific,
        languages: &["python"],
        description: "subprocess or pty spawning",
        kind: RuleKind::Pattern(r"\b(subprocess|pty)\b|\bos\.system\b"),
    },
    RuleSpec {
        id: "python.dynamic-code",
        category: PolicyCategory::LanguageSpecific,
        languages: &["python"],
        description: "dynamic import or evaluation",
        kind: RuleKind::Pattern(r"\b__import__\b|\bimportlib\b|\b(eval|exec|compile)\s*\("),
    },
    RuleSpec {
        id: "python.shutil-destructive",
        category: PolicyCategory::LanguageSpecific,
        languages: &["python"],
        description: "recursive tree removal",
        kind: RuleKind::Pattern(r"\bshutil\.(rmtree|chown)\b"),
    },
    RuleSpec {
        id: "javascript.child-process",
        category: PolicyCategory::LanguageSpecific,
        languages: &["javascript"],
        description: "child process spawning",
        kind: RuleKind::Pattern(
            r"child_process|\b(spawn|spawnSync|execSync|execFile|execFileSync)\s*\(",
        ),
    },
    RuleSpec {
        id: "javascript.filesystem",
        category: PolicyCategory::LanguageSpecific,
        languages: &["javascript"],
        description: "fs module",
        kind: RuleKind::Pattern(
            r#"require\s*\(\s*['"](node:)?fs(/promises)?['"]\s*\)|from\s+['"](node:)?fs(/promises)?['"]"#,
        ),
    },
    RuleSpec {
        id: "javascript.process-control",
        category: PolicyCategory::LanguageSpecific,
        languages: &["javascript"],
        description: "process exit or abort",
        kind: RuleKind::Pattern(r"\bprocess\.(exit|kill|abort)\b"),
    },
    RuleSpec {
        id: "javascript.dynamic-code",
        category: PolicyCategory::LanguageSpecific,
        languages: &["javascript"],
        description: "eval or Function constructor",
        kind: RuleKind::Pattern(r"\beval\s*\(|\bnew\s+Function\s*\("),
    },
    RuleSpec {
        id: "shell.chained-danger",
        category: PolicyCategory::LanguageSpecific,
        languages: SHELLS,
        description: "command chaining together with rm, kill, sudo or chmod",
        kind: RuleKind::AllOf(&[r"[|&;]", r"\b(rm|kill|sudo|chmod)\b"]),
    },
    RuleSpec {
        id: "script.shell-out",
        category: PolicyCategory::LanguageSpecific,
        languages: SCRIPTING,
        description: "shell-out call, backticks or %x",
        kind: RuleKind::Pattern(
            r"\b(system|exec|spawn|shell_exec|passthru|popen|proc_open|pcntl_exec)\s*\(|`[^`]+`|%x[({\[]",
        ),
    },
    RuleSpec {
        id: "native.shell-out",
        category: PolicyCategory::LanguageSpecific,
        languages: NATIVE,
        description: "system, popen, exec family or posix_spawn",
        kind: RuleKind::Pattern(
            r"\b(system|popen|execl|execlp|execle|execv|execvp|execvpe|execve|posix_spawnp?)\s*\(",
        ),
    },
    RuleSpec {
        id: "go.os-exec",
        category: PolicyCategory::LanguageSpecific,
        languages: &["go"],
        description: "os/exec or raw syscall process control",
        kind: RuleKind::Pattern(r#""os/exec"|\bsyscall\.(Exec|ForkExec|Kill)\b"#),
    },
    RuleSpec {
        id: "rust.process",
        category: PolicyCategory::LanguageSpecific,
        languages: &["rust"],
        description: "std::process::Command",
        kind: RuleKind::Pattern(r"\bprocess::Command\b|\bCommand::new\b"),
    },
    RuleSpec {
        id: "java.process",
        category: PolicyCategory::LanguageSpecific,
        languages: &["java", "kotlin"],
        description: "Runtime.exec or ProcessBuilder",
        kind: RuleKind::Pattern(r"Runtime\.getRuntime\(\)\.exec|\bProcessBuilder\b"),
    },
    RuleSpec {
        id: "nim.osproc",
        category: PolicyCategory::LanguageSpecific,
        languages: &["nim"],
        description: "osproc module or shell command helpers",
        kind: RuleKind::Pattern(r"\bosproc\b|\b(execProcess|execCmd|execCmdEx|startProcess|execShellCmd)\b"),
    },
    RuleSpec {
        id: "zig.process",
        category: PolicyCategory::LanguageSpecific,
        languages: &["zig"],
        description: "child process spawning or exec",
        kind: RuleKind::Pattern(r"\b(std\.)?process\.(Child|ChildProcess|exec|execv|execve)\b|\bChildProcess\b"),
    },
];

enum Matcher {
    Pattern(Regex),
    AllOf(Vec<Regex>),
    PathTarget {
        pattern: Regex,
        flags: &'static str,
    },
    ModuleUsage {
        imported: Regex,
        aliased: Regex,
        attribute: Regex,
        from_import: Regex,
        allowed: &'static [&'static str],
    },
}

impl Matcher {
    fn compile(id: &'static str, kind: &RuleKind) -> Result<Self, ServiceError> {
        let build = |pattern: &str| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .multi_line(true)
                .build()
                .map_err(|source| ServiceError::Pattern { name: id, source })
        };

        Ok(match kind {
            RuleKind::Pattern(pattern) => Matcher::Pattern(build(pattern)?),
            RuleKind::AllOf(patterns) => Matcher::AllOf(
                patterns
                    .iter()
                    .map(|p| build(p))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            RuleKind::PathTarget { pattern, flags } => Matcher::PathTarget {
                pattern: build(pattern)?,
                flags: *flags,
            },
            RuleKind::ModuleUsage { module, allowed } => {
                let module = regex::escape(module);
                Matcher::ModuleUsage {
                    imported: build(&format!(
                        r"^\s*(import\s+[\w \t,]*\b{module}\b|from\s+{module}\b)"
                    ))?,
                    aliased: build(&format!(r"^\s*import\s+{module}\s+as\b"))?,
                    attribute: build(&format!(r"\b{module}\.(\w+)"))?,
                    from_import: build(&format!(r"^\s*from\s+{module}\s+import\s+([^\n]+)"))?,
                    allowed: *allowed,
                }
            }
        })
    }

    /// Returns the offending fragment, if any
    fn find(&self, source: &str, home: Option<&Path>) -> Option<String> {
        match self {
            Matcher::Pattern(pattern) => pattern.find(source).map(|m| m.as_str().to_string()),
            Matcher::AllOf(patterns) => {
                let mut fragments = Vec::with_capacity(patterns.len());
                for pattern in patterns {
                    fragments.push(pattern.find(source)?.as_str().to_string());
                }
                Some(fragments.join(" … "))
            }
            Matcher::PathTarget { pattern, flags } => {
                find_unexempt_target(pattern, flags, source, home)
            }
            Matcher::ModuleUsage {
                imported,
                aliased,
                attribute,
                from_import,
                allowed,
            } => {
                if !imported.is_match(source) {
                    return None;
                }
                if let Some(m) = aliased.find(source) {
                    return Some(m.as_str().to_string());
                }
                for caps in attribute.captures_iter(source) {
                    if !allowed.contains(&&caps[1]) {
                        return Some(caps[0].to_string());
                    }
                }
                for caps in from_import.captures_iter(source) {
                    let names = caps[1]
                        .split(|c: char| c == ',' || c == '(' || c == ')')
                        .filter_map(|item| item.split_whitespace().next());
                    for name in names {
                        if !allowed.contains(&name) {
                            return Some(caps[0].trim().to_string());
                        }
                    }
                }
                None
            }
        }
    }
}

fn find_unexempt_target(
    pattern: &Regex,
    flags: &str,
    source: &str,
    home: Option<&Path>,
) -> Option<String> {
    for caps in pattern.captures_iter(source) {
        let args = caps.name("args").map(|m| m.as_str()).unwrap_or_default();
        let tokens: Vec<&str> = args.split_whitespace().collect();

        if !flags.is_empty() && !tokens.iter().any(|t| is_destructive_flag(t, flags)) {
            continue;
        }

        let mut targets = tokens
            .iter()
            .filter(|t| !t.starts_with('-'))
            .map(|t| t.trim_matches(|c| c == '"' || c == '\''))
            .peekable();

        // No target at all is treated as unsafe
        if targets.peek().is_none() || !targets.all(|t| within_home(home, t)) {
            return Some(caps[0].trim_end().to_string());
        }
    }
    None
}

fn is_destructive_flag(token: &str, flags: &str) -> bool {
    if let Some(long) = token.strip_prefix("--") {
        return matches!(long, "recursive" | "force");
    }
    token
        .strip_prefix('-')
        .is_some_and(|short| short.chars().any(|c| flags.contains(c)))
}

fn within_home(home: Option<&Path>, target: &str) -> bool {
    let Some(home) = home else {
        return false;
    };
    let path = Path::new(target);
    path.is_absolute()
        && !path.components().any(|c| matches!(c, Component::ParentDir))
        && path.starts_with(home)
        && path != home
}

struct Rule {
    id: &'static str,
    category: PolicyCategory,
    languages: &'static [&'static str],
    description: &'static str,
    matcher: Matcher,
}

impl Rule {
    fn applies_to(&self, language: &str) -> bool {
        self.languages.is_empty() || self.languages.contains(&language)
    }
}

/// Compiled rule set, built once per engine
pub struct PolicyEngine {
    rules: Vec<Rule>,
    home: Option<PathBuf>,
}

impl PolicyEngine {
    /// Compile the rule table. `home` is the one path prefix destructive
    /// file commands may target.
    pub fn new(home: Option<PathBuf>) -> Result<Self, ServiceError> {
        let rules = RULES
            .iter()
            .map(|spec| {
                Ok(Rule {
                    id: spec.id,
                    category: spec.category,
                    languages: spec.languages,
                    description: spec.description,
                    matcher: Matcher::compile(spec.id, &spec.kind)?,
                })
            })
            .collect::<Result<Vec<_>, ServiceError>>()?;

        Ok(Self { rules, home })
    }

    pub fn version(&self) -> u32 {
        RULESET_VERSION
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn home(&self) -> Option<&Path> {
        self.home.as_deref()
    }

    /// Screen `source` as `language`. First matching rule wins.
    pub fn evaluate(&self, source: &str, language: &str) -> PolicyVerdict {
        let home = self.home.as_deref();
        self.rules
            .iter()
            .filter(|rule| rule.applies_to(language))
            .find_map(|rule| {
                rule.matcher.find(source, home).map(|matched| {
                    PolicyVerdict::Blocked(PolicyBlock {
                        category: rule.category,
                        rule_id: rule.id,
                        description: rule.description,
                        matched,
                    })
                })
            })
            .unwrap_or(PolicyVerdict::Allowed)
    }
}
