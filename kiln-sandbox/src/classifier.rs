//! Language detection for requests submitted as "auto"
//!
//! Detection is a pure function of the text: the shebang on the first line
//! wins, then idiom rules in a fixed priority order (strong structural
//! signatures before loose ones), then the configured default.

use crate::error::ServiceError;
use crate::language::{self, LanguageProfile};
use regex::{Regex, RegexBuilder};

/// Interpreter names recognized on a `#!` line, checked in order
const SHEBANGS: &[(&str, &str)] = &[
    (r"\bpython", "python"),
    (r"\b(node|nodejs)\b", "javascript"),
    (r"\bperl", "perl"),
    (r"\bruby", "ruby"),
    (r"\bphp", "php"),
    (r"\blua", "lua"),
    (r"\bfish\b", "fish"),
    (r"\bzsh\b", "zsh"),
    (r"\bRscript\b", "r"),
    (r"\bjulia\b", "julia"),
    (r"\b[gm]?awk\b", "awk"),
    (r"\b(bash|sh|dash|ksh)\b", "bash"),
];

#[derive(Debug, Clone, Copy)]
enum Match {
    Any,
    All,
}

/// Idiom rules as (language, mode, patterns), highest priority first
const IDIOMS: &[(&str, Match, &[&str])] = &[
    ("php", Match::Any, &[r"^<\?php"]),
    ("go", Match::Any, &[r"^package\s+main\b", r"^func\s+main\s*\("]),
    (
        "cpp",
        Match::All,
        &[
            r"^#include\s*<",
            r"std::|\bcout\b|\bcin\b|#include\s*<(iostream|vector|string|map|algorithm)>",
        ],
    ),
    ("c", Match::All, &[r"^#include\s*<", r"\bint\s+main\s*\("]),
    ("rust", Match::Any, &[r"^fn\s+main\b", r"^use\s+(std|crate)::"]),
    (
        "zig",
        Match::Any,
        &[r"^const\s+std\s*=\s*@import\b", r"^pub\s+fn\s+main\s*\(\)\s*!?\s*void"],
    ),
    ("java", Match::Any, &[r"^public\s+(final\s+)?class\s+\w+"]),
    ("kotlin", Match::Any, &[r"^fun\s+main\s*\("]),
    ("haskell", Match::Any, &[r"^module\s+Main\b", r"^import\s+Data\."]),
    ("nim", Match::Any, &[r"^proc\s+\w+", r"^import\s+std/"]),
    ("python", Match::Any, &[r"^(import|from|def|class)\s", r"^print\s*\("]),
    (
        "javascript",
        Match::Any,
        &[r"console\.log", r"\b(const|let)\s+\w+\s*=", r"=>"],
    ),
    ("perl", Match::Any, &[r"^use\s+(strict|warnings)", r"^\s*my\s+[$@%]\w+"]),
    ("ruby", Match::Any, &[r"^require\s", r"^puts\s", r"^def\s+\w+\s*$"]),
    ("lua", Match::Any, &[r"^local\s", r"^function\s+\w+\s*\("]),
    ("ocaml", Match::All, &[r"^let\s+\w+.*=", r";;"]),
    ("r", Match::Any, &[r"^library\s*\(", r"\w\s*<-\s*"]),
    ("julia", Match::All, &[r"^using\s+\w+", r"^function\s"]),
    ("awk", Match::Any, &[r"^BEGIN\s*\{", r"^END\s*\{"]),
    (
        "bash",
        Match::Any,
        &[r"^\s*(echo|printf|ls|cd|pwd|export)\s", r"^\s*for\s+\w+\s+in\s.*;\s*do"],
    ),
];

struct IdiomRule {
    language: &'static str,
    mode: Match,
    patterns: Vec<Regex>,
}

impl IdiomRule {
    fn matches(&self, source: &str) -> bool {
        match self.mode {
            Match::Any => self.patterns.iter().any(|p| p.is_match(source)),
            Match::All => self.patterns.iter().all(|p| p.is_match(source)),
        }
    }
}

/// Best-guess language detection
pub struct LanguageClassifier {
    default: &'static LanguageProfile,
    shebangs: Vec<(Regex, &'static str)>,
    idioms: Vec<IdiomRule>,
}

impl LanguageClassifier {
    /// Build a classifier falling back to `default`
    pub fn new(default: &'static LanguageProfile) -> Result<Self, ServiceError> {
        let shebangs = SHEBANGS
            .iter()
            .map(|&(pattern, language)| Ok((compile(pattern, false, language)?, language)))
            .collect::<Result<Vec<_>, ServiceError>>()?;

        let idioms = IDIOMS
            .iter()
            .map(|&(language, mode, patterns)| {
                let patterns = patterns
                    .iter()
                    .map(|p| compile(p, true, language))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(IdiomRule {
                    language,
                    mode,
                    patterns,
                })
            })
            .collect::<Result<Vec<_>, ServiceError>>()?;

        Ok(Self {
            default,
            shebangs,
            idioms,
        })
    }

    /// The fallback profile
    pub fn default_profile(&self) -> &'static LanguageProfile {
        self.default
    }

    /// Detect the language of `source`. Never fails; unmatched text gets
    /// the default profile.
    pub fn classify(&self, source: &str) -> &'static LanguageProfile {
        let detected = self
            .from_shebang(source)
            .or_else(|| self.from_idioms(source));

        detected
            .and_then(language::lookup)
            .unwrap_or(self.default)
    }

    fn from_shebang(&self, source: &str) -> Option<&'static str> {
        let first = source.trim_start_matches('\u{feff}').lines().next()?;
        if !first.starts_with("#!") {
            return None;
        }
        self.shebangs
            .iter()
            .find(|(pattern, _)| pattern.is_match(first))
            .map(|(_, language)| *language)
    }

    fn from_idioms(&self, source: &str) -> Option<&'static str> {
        self.idioms
            .iter()
            .find(|rule| rule.matches(source))
            .map(|rule| rule.language)
    }
}

fn compile(pattern: &str, multi_line: bool, name: &'static str) -> Result<Regex, ServiceError> {
    RegexBuilder::new(pattern)
        .multi_line(multi_line)
        .build()
        .map_err(|source| ServiceError::Pattern { name, source })
}
