//! Declarative sub-extraction rules shared by the classifier and the variable resolver.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::{debug, trace};

pub const PACKAGE_NAME: &str = "package_name";
pub const MODULE_NAME: &str = "module_name";
pub const NPM_PACKAGE: &str = "npm_package";
pub const COMMAND_NAME: &str = "command_name";
pub const FILE_PATH: &str = "file_path";
pub const DIRECTORY_PATH: &str = "directory_path";
pub const SOURCE_FILE: &str = "source_file";
pub const LINE_NUMBER: &str = "line_number";
pub const PROPERTY_NAME: &str = "property_name";
pub const COMPONENT_NAME: &str = "component_name";
pub const ORIGINAL_COMMAND: &str = "original_command";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    ErrorText,
    Command,
}

struct RuleSpec {
    variable: &'static str,
    source: Source,
    pattern: &'static str,
    group: usize,
}

const fn rule(variable: &'static str, source: Source, pattern: &'static str, group: usize) -> RuleSpec {
    RuleSpec {
        variable,
        source,
        pattern,
        group,
    }
}

const JS_STACK_FRAME: &str = r"\(?((?:[A-Za-z]:)?[^\s():]+\.[cm]?[jt]sx?):(\d+):(\d+)\)?";
const CRA_LINT_LOCATION: &str = r"(?m)^(?:\./)?([^\s:]+\.[cm]?[jt]sx?)\s*\n\s*Line (\d+)";

/// Rules per variable are tried in this order; the first that captures wins.
const RULES: &[RuleSpec] = &[
    rule(PACKAGE_NAME, Source::ErrorText, r"No module named '?([A-Za-z0-9_\-]+)", 1),
    rule(
        PACKAGE_NAME,
        Source::ErrorText,
        r"Could not find a version that satisfies the requirement ([^\s(]+)",
        1,
    ),
    rule(MODULE_NAME, Source::ErrorText, r"No module named '?([^'\s]+)'?", 1),
    rule(
        NPM_PACKAGE,
        Source::ErrorText,
        r"Can't resolve '((?:@[^'/\s]+/)?[^'./\s][^'/\s]*)",
        1,
    ),
    rule(
        NPM_PACKAGE,
        Source::ErrorText,
        r"'((?:@[^'/\s]+/)?[^'@/\s]+)(?:@[^'\s]*)?' is not in (?:the npm|this) registry",
        1,
    ),
    rule(
        NPM_PACKAGE,
        Source::Command,
        r"\b(?:npm\s+(?:install|i|add)|yarn\s+add|pnpm\s+add)\s+(?:-\S+\s+)*([^\s-]\S*)",
        1,
    ),
    rule(COMMAND_NAME, Source::ErrorText, r"command not found: (\S+)", 1),
    rule(COMMAND_NAME, Source::ErrorText, r"([^\s:]+): command not found", 1),
    rule(FILE_PATH, Source::ErrorText, r"Permission denied: '([^']+)'", 1),
    rule(FILE_PATH, Source::ErrorText, r"'?([^\s:']+)'?: Permission denied", 1),
    rule(
        FILE_PATH,
        Source::ErrorText,
        r"(?i)permission denied[^\n']*'([^'\n]*\.\w+)'",
        1,
    ),
    rule(
        FILE_PATH,
        Source::ErrorText,
        r"(?i)'([^'\n]*\.\w+)'[^\n']*permission denied",
        1,
    ),
    rule(DIRECTORY_PATH, Source::ErrorText, r"No such file or directory:? '([^']+)'", 1),
    rule(DIRECTORY_PATH, Source::ErrorText, r"'([^']+)': No such file or directory", 1),
    rule(DIRECTORY_PATH, Source::ErrorText, r"([^\s:']+): No such file or directory", 1),
    rule(SOURCE_FILE, Source::ErrorText, r#"File "([^"]+)", line (\d+)"#, 1),
    rule(SOURCE_FILE, Source::ErrorText, CRA_LINT_LOCATION, 1),
    rule(SOURCE_FILE, Source::ErrorText, r"File: ([^\n:]+):(\d+)", 1),
    rule(SOURCE_FILE, Source::ErrorText, JS_STACK_FRAME, 1),
    rule(LINE_NUMBER, Source::ErrorText, r#"File "([^"]+)", line (\d+)"#, 2),
    rule(LINE_NUMBER, Source::ErrorText, CRA_LINT_LOCATION, 2),
    rule(LINE_NUMBER, Source::ErrorText, r"File: ([^\n:]+):(\d+)", 2),
    rule(LINE_NUMBER, Source::ErrorText, JS_STACK_FRAME, 2),
    rule(PROPERTY_NAME, Source::ErrorText, r"Cannot read propert(?:y|ies) '([^']+)' of", 1),
    rule(PROPERTY_NAME, Source::ErrorText, r"\(reading '([^']+)'\)", 1),
    rule(COMPONENT_NAME, Source::ErrorText, r"Check the render method of `([A-Za-z0-9_$]+)`", 1),
    rule(
        COMPONENT_NAME,
        Source::ErrorText,
        r"Element type is invalid: expected .* for <([A-Z][a-zA-Z0-9]+)",
        1,
    ),
    rule(ORIGINAL_COMMAND, Source::Command, r"(?s)\A\s*(.*\S)\s*\z", 1),
];

const PATH_GRAMMAR: &str = r"^[\w./\\@+,=:%~][\w./\\@+,=:%~ -]*$";
const IDENTIFIER_GRAMMAR: &str = r"^[A-Za-z_$][\w$]*$";

/// Shape a captured value must have before it is accepted. Values taken
/// from tool output end up in commands, so anything outside these is
/// treated as not found. `original_command` is the user's own input and
/// has no grammar.
const GRAMMARS: &[(&str, &str)] = &[
    (
        PACKAGE_NAME,
        r"^[A-Za-z0-9][A-Za-z0-9._-]*(?:\[[A-Za-z0-9._,-]+\])?(?:(?:==|>=|<=|~=|!=|<|>)[A-Za-z0-9.*+!_-]+)?$",
    ),
    (MODULE_NAME, r"^[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*$"),
    (
        NPM_PACKAGE,
        r"^(?:@[a-z0-9][\w.-]*/)?[a-z0-9][\w.-]*(?:@[\w.^~*<>=-]+)?$",
    ),
    (COMMAND_NAME, r"^[A-Za-z0-9_][\w.+-]*$"),
    (FILE_PATH, PATH_GRAMMAR),
    (DIRECTORY_PATH, PATH_GRAMMAR),
    (SOURCE_FILE, PATH_GRAMMAR),
    (LINE_NUMBER, r"^\d+$"),
    (PROPERTY_NAME, IDENTIFIER_GRAMMAR),
    (COMPONENT_NAME, IDENTIFIER_GRAMMAR),
];

struct CompiledRule {
    variable: &'static str,
    source: Source,
    pattern: Regex,
    group: usize,
}

pub struct ExtractionTable {
    rules: Vec<CompiledRule>,
    grammars: BTreeMap<&'static str, Regex>,
}

impl ExtractionTable {
    /// The process-wide table.
    pub fn shared() -> &'static ExtractionTable {
        static TABLE: OnceLock<ExtractionTable> = OnceLock::new();
        TABLE.get_or_init(|| ExtractionTable {
            rules: RULES
                .iter()
                .map(|spec| CompiledRule {
                    variable: spec.variable,
                    source: spec.source,
                    pattern: Regex::new(spec.pattern).expect("built-in extraction pattern"),
                    group: spec.group,
                })
                .collect(),
            grammars: GRAMMARS
                .iter()
                .map(|(variable, pattern)| {
                    (*variable, Regex::new(pattern).expect("built-in value grammar"))
                })
                .collect(),
        })
    }

    fn accepts(&self, variable: &str, value: &str) -> bool {
        match self.grammars.get(variable) {
            Some(grammar) if !grammar.is_match(value) => {
                debug!(variable, %value, "rejected extracted value");
                false
            }
            _ => true,
        }
    }

    pub fn knows(&self, variable: &str) -> bool {
        self.rules.iter().any(|r| r.variable == variable)
    }

    pub fn extract(&self, variable: &str, command: &str, error_text: &str) -> Option<String> {
        self.rules
            .iter()
            .filter(|r| r.variable == variable)
            .find_map(|r| {
                let haystack = match r.source {
                    Source::ErrorText => error_text,
                    Source::Command => command,
                };
                let value = r.pattern.captures(haystack)?.get(r.group)?.as_str().trim();
                (!value.is_empty() && self.accepts(variable, value)).then(|| value.to_string())
            })
            .map(|value| {
                trace!(variable, %value, "extracted variable");
                value
            })
    }

    /// Every variable the table can extract from this failure.
    pub fn extract_all(&self, command: &str, error_text: &str) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for rule in &self.rules {
            if out.contains_key(rule.variable) {
                continue;
            }
            if let Some(value) = self.extract(rule.variable, command, error_text) {
                out.insert(rule.variable.to_string(), value);
            }
        }
        out
    }
}
