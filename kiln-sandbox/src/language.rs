//! Built-in language profiles

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const SOURCE: &str = "{source}";
const ARTIFACT: &str = "{artifact}";

/// Program plus arguments, with `{source}` and `{artifact}` placeholders.
/// Placeholders may sit inside a larger argument, as in `-o:{artifact}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTemplate {
    pub program: &'static str,
    pub args: &'static [&'static str],
}

impl CommandTemplate {
    const fn new(program: &'static str, args: &'static [&'static str]) -> Self {
        Self { program, args }
    }

    /// Substitute workspace paths into the template
    pub fn render(&self, source: &Path, artifact: &Path) -> (String, Vec<String>) {
        let source = source.display().to_string();
        let artifact = artifact.display().to_string();
        let fill = |part: &str| -> String {
            part.replace(SOURCE, &source).replace(ARTIFACT, &artifact)
        };
        (fill(self.program), self.args.iter().map(|a| fill(a)).collect())
    }
}

/// How one language is materialized and executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageProfile {
    pub id: &'static str,
    pub extension: &'static str,
    pub aliases: &'static [&'static str],
    /// File name the compiler writes inside the workspace
    pub artifact: &'static str,
    pub run: CommandTemplate,
    pub compile: Option<CommandTemplate>,
    pub run_timeout: Duration,
    pub compile_timeout: Duration,
}

impl LanguageProfile {
    pub fn is_compiled(&self) -> bool {
        self.compile.is_some()
    }

    fn matches(&self, name: &str) -> bool {
        self.id.eq_ignore_ascii_case(name)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }

    pub fn info(&self) -> LanguageInfo {
        LanguageInfo {
            id: self.id.to_string(),
            extension: self.extension.to_string(),
            compiled: self.is_compiled(),
            run_timeout_ms: self.run_timeout.as_millis() as u64,
            compile_timeout_ms: self.compile.map(|_| self.compile_timeout.as_millis() as u64),
        }
    }
}

/// Introspection view of a profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub id: String,
    pub extension: String,
    pub compiled: bool,
    pub run_timeout_ms: u64,
    pub compile_timeout_ms: Option<u64>,
}

const fn interpreted(
    id: &'static str,
    extension: &'static str,
    aliases: &'static [&'static str],
    run: CommandTemplate,
    secs: u64,
) -> LanguageProfile {
    LanguageProfile {
        id,
        extension,
        aliases,
        artifact: "artifact",
        run,
        compile: None,
        run_timeout: Duration::from_secs(secs),
        compile_timeout: Duration::ZERO,
    }
}

const fn compiled(
    id: &'static str,
    extension: &'static str,
    aliases: &'static [&'static str],
    compile: CommandTemplate,
    compile_secs: u64,
    run_secs: u64,
) -> LanguageProfile {
    LanguageProfile {
        id,
        extension,
        aliases,
        artifact: "artifact",
        run: CommandTemplate::new(ARTIFACT, &[]),
        compile: Some(compile),
        run_timeout: Duration::from_secs(run_secs),
        compile_timeout: Duration::from_secs(compile_secs),
    }
}

static PROFILES: &[LanguageProfile] = &[
    interpreted(
        "python",
        ".py",
        &["py", "python3"],
        CommandTemplate::new("python3", &[SOURCE]),
        10,
    ),
    interpreted(
        "javascript",
        ".js",
        &["js", "node", "nodejs"],
        CommandTemplate::new("node", &[SOURCE]),
        10,
    ),
    interpreted("bash", ".sh", &["sh", "shell"], CommandTemplate::new("bash", &[SOURCE]), 5),
    interpreted("ruby", ".rb", &["rb"], CommandTemplate::new("ruby", &[SOURCE]), 10),
    interpreted("perl", ".pl", &["pl"], CommandTemplate::new("perl", &[SOURCE]), 10),
    interpreted("lua", ".lua", &[], CommandTemplate::new("lua", &[SOURCE]), 10),
    interpreted("php", ".php", &[], CommandTemplate::new("php", &[SOURCE]), 10),
    interpreted("awk", ".awk", &[], CommandTemplate::new("awk", &["-f", SOURCE]), 10),
    interpreted("haskell", ".hs", &["hs"], CommandTemplate::new("runghc", &[SOURCE]), 15),
    interpreted("ocaml", ".ml", &["ml"], CommandTemplate::new("ocaml", &[SOURCE]), 10),
    interpreted("r", ".r", &["rscript"], CommandTemplate::new("Rscript", &[SOURCE]), 10),
    interpreted("julia", ".jl", &["jl"], CommandTemplate::new("julia", &[SOURCE]), 20),
    interpreted("fish", ".fish", &[], CommandTemplate::new("fish", &[SOURCE]), 5),
    interpreted("zsh", ".zsh", &[], CommandTemplate::new("zsh", &[SOURCE]), 5),
    interpreted("java", ".java", &[], CommandTemplate::new("java", &[SOURCE]), 15),
    LanguageProfile {
        id: "kotlin",
        extension: ".kt",
        aliases: &["kt"],
        artifact: "artifact.jar",
        run: CommandTemplate::new("java", &["-jar", ARTIFACT]),
        compile: Some(CommandTemplate::new(
            "kotlinc",
            &[SOURCE, "-include-runtime", "-d", ARTIFACT],
        )),
        run_timeout: Duration::from_secs(10),
        compile_timeout: Duration::from_secs(30),
    },
    compiled(
        "c",
        ".c",
        &[],
        CommandTemplate::new("gcc", &[SOURCE, "-o", ARTIFACT, "-O2"]),
        15,
        10,
    ),
    compiled(
        "cpp",
        ".cpp",
        &["c++", "cxx", "cc"],
        CommandTemplate::new("g++", &[SOURCE, "-o", ARTIFACT, "-O2"]),
        20,
        10,
    ),
    compiled(
        "rust",
        ".rs",
        &["rs"],
        CommandTemplate::new("rustc", &[SOURCE, "-o", ARTIFACT, "-O"]),
        20,
        10,
    ),
    compiled(
        "go",
        ".go",
        &["golang"],
        CommandTemplate::new("go", &["build", "-o", ARTIFACT, SOURCE]),
        15,
        10,
    ),
    compiled(
        "nim",
        ".nim",
        &[],
        CommandTemplate::new("nim", &["c", "--hints:off", "-o:{artifact}", SOURCE]),
        20,
        10,
    ),
    compiled(
        "zig",
        ".zig",
        &[],
        CommandTemplate::new("zig", &["build-exe", "-femit-bin={artifact}", SOURCE]),
        30,
        10,
    ),
];

/// Every built-in profile, in table order
pub fn profiles() -> &'static [LanguageProfile] {
    PROFILES
}

/// Find a profile by identifier or alias, case-insensitively
pub fn lookup(name: &str) -> Option<&'static LanguageProfile> {
    let name = name.trim();
    PROFILES.iter().find(|profile| profile.matches(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;

    #[test]
    fn test_lookup_by_alias() {
        assert_eq!(lookup("py").map(|p| p.id), Some("python"));
        assert_eq!(lookup("Node").map(|p| p.id), Some("javascript"));
        assert_eq!(lookup("c++").map(|p| p.id), Some("cpp"));
        assert_eq!(lookup("golang").map(|p| p.id), Some("go"));
        assert!(lookup("cobol").is_none());
        assert!(lookup("auto").is_none());
    }

    #[test]
    fn test_identifiers_and_aliases_are_unique() {
        let mut seen = HashSet::new();
        for profile in profiles() {
            assert!(seen.insert(profile.id), "duplicate {}", profile.id);
            for alias in profile.aliases {
                assert!(seen.insert(*alias), "duplicate alias {}", alias);
            }
        }
    }

    #[test]
    fn test_compiled_profiles_run_the_artifact() {
        let source = PathBuf::from("/w/main.c");
        let artifact = PathBuf::from("/w/artifact");
        let c = lookup("c").unwrap();
        assert!(c.is_compiled());

        let (program, args) = c.compile.unwrap().render(&source, &artifact);
        assert_eq!(program, "gcc");
        assert_eq!(args, vec!["/w/main.c", "-o", "/w/artifact", "-O2"]);

        let (program, args) = c.run.render(&source, &artifact);
        assert_eq!(program, "/w/artifact");
        assert!(args.is_empty());
    }

    #[test]
    fn test_interpreted_profile_info() {
        let awk = lookup("awk").unwrap();
        let (program, args) = awk
            .run
            .render(Path::new("/w/main.awk"), Path::new("/w/artifact"));
        assert_eq!(program, "awk");
        assert_eq!(args, vec!["-f", "/w/main.awk"]);

        let info = lookup("bash").unwrap().info();
        assert_eq!(info.extension, ".sh");
        assert!(!info.compiled);
        assert_eq!(info.run_timeout_ms, 5000);
        assert_eq!(info.compile_timeout_ms, None);
    }

    #[test]
    fn test_placeholders_inside_arguments() {
        let nim = lookup("nim").unwrap();
        let (program, args) = nim
            .compile
            .unwrap()
            .render(Path::new("/w/main.nim"), Path::new("/w/artifact"));
        assert_eq!(program, "nim");
        assert_eq!(args, vec!["c", "--hints:off", "-o:/w/artifact", "/w/main.nim"]);

        let zig = lookup("zig").unwrap();
        let (_, args) = zig
            .compile
            .unwrap()
            .render(Path::new("/w/main.zig"), Path::new("/w/artifact"));
        assert_eq!(args, vec!["build-exe", "-femit-bin=/w/artifact", "/w/main.zig"]);
    }

    #[test]
    fn test_kotlin_runs_jar_through_java() {
        let kotlin = lookup("kt").unwrap();
        assert_eq!(kotlin.id, "kotlin");
        assert_eq!(kotlin.artifact, "artifact.jar");
        assert!(kotlin.is_compiled());

        let source = Path::new("/w/main.kt");
        let jar = Path::new("/w/artifact.jar");
        let (program, args) = kotlin.compile.unwrap().render(source, jar);
        assert_eq!(program, "kotlinc");
        assert_eq!(args, vec!["/w/main.kt", "-include-runtime", "-d", "/w/artifact.jar"]);

        let (program, args) = kotlin.run.render(source, jar);
        assert_eq!(program, "java");
        assert_eq!(args, vec!["-jar", "/w/artifact.jar"]);
        assert_eq!(kotlin.info().compile_timeout_ms, Some(30_000));
    }
}
