use regex::Regex;
use std::sync::OnceLock;

/// A deny-list entry: a label for logs and the pattern that triggers it.
struct DangerousPattern {
    label: &'static str,
    pattern: Regex,
}

fn builtin_patterns() -> &'static [DangerousPattern] {
    static PATTERNS: OnceLock<Vec<DangerousPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let table: &[(&'static str, &'static str)] = &[
            ("no-preserve-root", r"--no-preserve-root"),
            ("filesystem format", r"\bmkfs(?:\.\w+)?\b"),
            ("raw disk write", r"\bdd\s+if=/dev/(?:zero|random|urandom)\b"),
            ("raw disk write", r"\bdd\b[^|;&]*\bof=/dev/(?:sd|hd|nvme|disk|mmcblk)"),
            ("device redirect", r">\s*/dev/(?:sd|hd|nvme|disk|mmcblk)"),
            ("world-writable root", r"\bchmod\s+-R\s+777\s+/(?:\s|$)"),
        ];
        table
            .iter()
            .map(|&(label, pattern)| DangerousPattern {
                label,
                pattern: Regex::new(pattern).expect("built-in deny pattern"),
            })
            .collect()
    })
}

/// Fail-closed check performed before any process is created.
pub struct CommandValidator {
    extra_patterns: Vec<String>,
}

impl CommandValidator {
    pub fn new(extra_patterns: Vec<String>) -> Self {
        Self {
            extra_patterns: extra_patterns
                .into_iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Returns the label of the first deny-list entry the command matches.
    pub fn dangerous_match(&self, command: &str) -> Option<String> {
        let lowered = command.to_lowercase();

        if is_fork_bomb(&lowered) {
            return Some("fork bomb".to_string());
        }
        if deletes_root_recursively(&lowered) {
            return Some("recursive root deletion".to_string());
        }

        if let Some(hit) = builtin_patterns()
            .iter()
            .find(|p| p.pattern.is_match(&lowered))
        {
            return Some(hit.label.to_string());
        }

        self.extra_patterns
            .iter()
            .find(|p| lowered.contains(p.as_str()))
            .map(|p| format!("configured pattern '{}'", p))
    }

    pub fn is_dangerous_command(&self, command: &str) -> bool {
        self.dangerous_match(command).is_some()
    }
}

impl Default for CommandValidator {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Any `rm` invocation with a recursive flag, in any spelling, aimed at `/` or `/*`.
fn deletes_root_recursively(lowered: &str) -> bool {
    static RM: OnceLock<Regex> = OnceLock::new();
    let rm = RM.get_or_init(|| Regex::new(r"\brm\s+([^;&|\n]*)").expect("built-in rm pattern"));

    rm.captures_iter(lowered).any(|caps| {
        let mut recursive = false;
        let mut targets_root = false;
        for arg in caps[1].split_whitespace() {
            match arg.trim_matches(|c| c == '"' || c == '\'') {
                "--recursive" => recursive = true,
                "/" | "/*" => targets_root = true,
                flag if flag.starts_with("--") => {}
                flag if flag.starts_with('-') => recursive |= flag.contains('r'),
                _ => {}
            }
        }
        recursive && targets_root
    })
}

fn is_fork_bomb(lowered: &str) -> bool {
    let compact: String = lowered.chars().filter(|c| !c.is_whitespace()).collect();
    compact.contains(":(){:|:&};:") || compact.contains("(){:|:&};")
}
