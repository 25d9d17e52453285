use regex::{Captures, Regex};
use tracing::debug;

use super::extract::ExtractionTable;
use super::{ErrorRecord, ErrorType};

struct RuleSpec {
    pattern: &'static str,
    error_type: ErrorType,
    description: &'static str,
    query: &'static str,
    explanation: &'static str,
    causes: &'static [&'static str],
}

const PACKAGE_CAUSES: &[&str] = &[
    "The package is not installed in your current environment",
    "The package name is misspelled in your code",
    "You're using a virtual environment that doesn't have this package",
];

const RULES: &[RuleSpec] = &[
    RuleSpec {
        pattern: r"ImportError: No module named '?([^'\s]+)'?",
        error_type: ErrorType::PythonImportError,
        description: "Python module import error",
        query: "python ImportError {0}",
        explanation: "A Python module is missing from your environment. Python tried to use a component that isn't installed.",
        causes: PACKAGE_CAUSES,
    },
    RuleSpec {
        pattern: r"ModuleNotFoundError: No module named '?([^'\s]+)'?",
        error_type: ErrorType::PythonModuleNotFound,
        description: "Python module not found",
        query: "python ModuleNotFoundError {0}",
        explanation: "Python couldn't find a module you're trying to use. This typically means the module isn't installed in your environment.",
        causes: &[
            "The package is not installed in your current environment",
            "The package name is misspelled in your code",
            "You're using a different Python interpreter than expected",
        ],
    },
    RuleSpec {
        pattern: r"SyntaxError: (.+)",
        error_type: ErrorType::PythonSyntaxError,
        description: "Python syntax error",
        query: "python SyntaxError",
        explanation: "There's an error in your Python code syntax, typically a typo, an unbalanced bracket or incorrect indentation.",
        causes: &[
            "Missing or extra parentheses, brackets, or quotes",
            "Incorrect indentation",
            "Forgetting colons after if/for/while statements",
        ],
    },
    RuleSpec {
        pattern: r"TypeError: (.+)",
        error_type: ErrorType::PythonTypeError,
        description: "Python type error",
        query: "python TypeError {0}",
        explanation: "",
        causes: &[],
    },
    RuleSpec {
        pattern: r"ValueError: (.+)",
        error_type: ErrorType::PythonValueError,
        description: "Python value error",
        query: "python ValueError {0}",
        explanation: "",
        causes: &[],
    },
    RuleSpec {
        pattern: r"AttributeError: .* has no attribute '(.+)'",
        error_type: ErrorType::PythonAttributeError,
        description: "Python attribute error",
        query: "python AttributeError {0}",
        explanation: "",
        causes: &[],
    },
    RuleSpec {
        pattern: r"command not found: (\S+)|([^\s:]+): command not found",
        error_type: ErrorType::ShellCommandNotFound,
        description: "Shell command not found",
        query: "command not found {0}{1}",
        explanation: "The shell couldn't find the program you asked it to run.",
        causes: &[
            "The program is not installed",
            "The program is installed but not on your PATH",
            "The command name is misspelled",
        ],
    },
    RuleSpec {
        pattern: r"No such file or directory",
        error_type: ErrorType::FileNotFound,
        description: "File or directory not found",
        query: "no such file or directory",
        explanation: "The system can't find the file or directory you're trying to access. It either doesn't exist or is in a different location.",
        causes: &[
            "The path is incorrect",
            "The file/directory was moved or deleted",
            "You're in the wrong working directory",
            "Case sensitivity issues (especially on Linux/macOS)",
        ],
    },
    RuleSpec {
        pattern: r"Permission denied",
        error_type: ErrorType::PermissionDenied,
        description: "Permission denied for file or directory",
        query: "shell permission denied",
        explanation: "You don't have sufficient permissions to access or modify the file or directory.",
        causes: &[
            "File is owned by another user",
            "File permissions are restrictive",
            "Directory permissions prevent access",
            "Need to use sudo/admin privileges",
        ],
    },
    RuleSpec {
        pattern: r"fatal: not a git repository",
        error_type: ErrorType::GitNotARepo,
        description: "Not a git repository",
        query: "git fatal not a repository",
        explanation: "Git was run outside of a repository.",
        causes: &[
            "The repository hasn't been initialized yet",
            "You're in the wrong directory",
        ],
    },
    RuleSpec {
        pattern: r"fatal: unable to access '(.+)': (SSL certificate problem|Could not resolve host)",
        error_type: ErrorType::GitConnectionError,
        description: "Git connection or SSL error",
        query: "git connection error SSL certificate",
        explanation: "",
        causes: &[],
    },
    RuleSpec {
        pattern: r"error: failed to push some refs to '(.+)'",
        error_type: ErrorType::GitPushError,
        description: "Git push error",
        query: "git failed to push refs",
        explanation: "",
        causes: &[],
    },
    RuleSpec {
        pattern: r"Could not find a version that satisfies the requirement (.+)",
        error_type: ErrorType::PipPackageNotFound,
        description: "Pip could not find the package",
        query: "pip could not find version requirement {0}",
        explanation: "",
        causes: &[],
    },
    RuleSpec {
        pattern: r"Timeout|timed out",
        error_type: ErrorType::Timeout,
        description: "Operation timed out",
        query: "command timeout error",
        explanation: "",
        causes: &[],
    },
    RuleSpec {
        pattern: r"MemoryError",
        error_type: ErrorType::MemoryError,
        description: "Process ran out of memory",
        query: "process memory error",
        explanation: "",
        causes: &[],
    },
    RuleSpec {
        pattern: r"Segmentation fault",
        error_type: ErrorType::SegmentationFault,
        description: "Segmentation fault (memory access violation)",
        query: "segmentation fault",
        explanation: "",
        causes: &[],
    },
    RuleSpec {
        pattern: r"React Hook .+ is called conditionally",
        error_type: ErrorType::ReactHookConditional,
        description: "React Hook called conditionally",
        query: "react hook called conditionally error",
        explanation: "You're using a React Hook inside a conditional statement, but Hooks must be called at the top level of a component function.",
        causes: &[
            "Using a Hook (useState, useEffect, etc.) inside an if statement or loop",
            "Calling Hooks conditionally breaks React's Hook rules",
            "Hook call order must be consistent between renders",
        ],
    },
    RuleSpec {
        pattern: r"Element type is invalid: expected a string.*but got: (undefined|null|object)",
        error_type: ErrorType::ReactInvalidElement,
        description: "React invalid element type",
        query: "react invalid element type error",
        explanation: "React couldn't render your component because something that should be a valid React element is invalid.",
        causes: &[
            "A component you're importing doesn't exist or has a different name",
            "You forgot to export a component",
            "You're using a named import when the component is a default export (or vice versa)",
        ],
    },
    RuleSpec {
        pattern: r"Cannot read propert(?:y|ies) '([^']+)' of (?:undefined|null)|Cannot read properties of (?:undefined|null) \(reading '([^']+)'\)",
        error_type: ErrorType::JsUndefinedProperty,
        description: "JavaScript undefined property access",
        query: "javascript cannot read property {0}{1} of undefined",
        explanation: "Your code is trying to access a property of an object that doesn't exist (undefined or null).",
        causes: &[
            "Data hasn't loaded yet (common in React with API calls)",
            "Typo in property or variable name",
            "Missing conditional check before accessing nested properties",
        ],
    },
    RuleSpec {
        pattern: r"(?s)(?:Failed to compile.*)?Module not found: (?:Error: )?Can't resolve '([^']+)'",
        error_type: ErrorType::ReactModuleNotFound,
        description: "React module resolution error",
        query: "react can't resolve module {0}",
        explanation: "The React build process can't find a module or file that your code is trying to import.",
        causes: &[
            "The package isn't installed (run npm install or yarn add)",
            "There's a typo in the import path",
            "You're using a relative path that's incorrect",
        ],
    },
    RuleSpec {
        pattern: r"npm ERR! code E404",
        error_type: ErrorType::NpmPackageNotFound,
        description: "NPM package not found",
        query: "npm package not found 404",
        explanation: "NPM couldn't find the package you're trying to install. The package name might be misspelled or it may not exist.",
        causes: &[
            "Package name is misspelled",
            "Package doesn't exist in the npm registry",
            "Package was deprecated or removed",
            "Using a private package without proper authentication",
        ],
    },
    RuleSpec {
        pattern: r"npm ERR! code ENOSELF",
        error_type: ErrorType::NpmInvalidSelfOperation,
        description: "NPM invalid self operation",
        query: "npm ENOSELF error",
        explanation: "You're trying to install a package as a dependency of itself, which isn't allowed.",
        causes: &[
            "Attempting to install a package inside its own directory",
            "Incorrect working directory when running npm commands",
        ],
    },
    RuleSpec {
        pattern: r"npm ERR! code EPERM",
        error_type: ErrorType::NpmPermissionError,
        description: "NPM permission error",
        query: "npm permission error EPERM",
        explanation: "NPM doesn't have sufficient permissions to complete the operation.",
        causes: &[
            "Trying to install packages globally without admin privileges",
            "Another process has locked the file/directory",
            "Antivirus blocking file operations",
        ],
    },
];

const UNKNOWN_EXPLANATION: &str = "This appears to be an error that isn't in the known pattern table. \
The search results below may still point in the right direction.";

const UNKNOWN_CAUSES: &[&str] = &[
    "The error might be specific to the tool or framework you're using",
    "It could be a newer error that's not in the pattern table",
    "The error might be caused by a combination of factors",
];

struct Rule {
    pattern: Regex,
    spec: &'static RuleSpec,
}

/// Ordered detection table; the first rule that matches decides the record.
pub struct ErrorClassifier {
    rules: Vec<Rule>,
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self {
            rules: RULES
                .iter()
                .map(|spec| Rule {
                    pattern: Regex::new(spec.pattern).expect("built-in detection pattern"),
                    spec,
                })
                .collect(),
        }
    }

    /// Never fails: unmatched text becomes an `Unknown` record.
    pub fn classify(&self, command: &str, return_code: i32, error_text: &str) -> ErrorRecord {
        let matched = self
            .rules
            .iter()
            .find_map(|rule| rule.pattern.captures(error_text).map(|caps| (rule.spec, caps)));

        let (error_type, description, search_query, user_explanation, common_causes) = match matched {
            Some((spec, caps)) => (
                spec.error_type,
                spec.description.to_string(),
                fill_query(spec.query, &caps),
                if spec.explanation.is_empty() {
                    spec.description.to_string()
                } else {
                    spec.explanation.to_string()
                },
                spec.causes.iter().map(|c| c.to_string()).collect(),
            ),
            None => (
                ErrorType::Unknown,
                "Unknown error".to_string(),
                unknown_query(return_code, error_text),
                UNKNOWN_EXPLANATION.to_string(),
                UNKNOWN_CAUSES.iter().map(|c| c.to_string()).collect(),
            ),
        };

        debug!(%error_type, %search_query, "classified error");

        ErrorRecord {
            raw_text: error_text.to_string(),
            command: command.to_string(),
            return_code,
            error_type,
            description,
            search_query,
            user_explanation,
            common_causes,
            solutions: Vec::new(),
            sources: Vec::new(),
            variables: ExtractionTable::shared().extract_all(command, error_text),
            degraded: Vec::new(),
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Substitutes `{0}`, `{1}`... with capture groups 1, 2...; missing groups become empty.
fn fill_query(template: &str, caps: &Captures<'_>) -> String {
    let mut query = template.to_string();
    for i in 1..caps.len() {
        let value = caps.get(i).map(|m| m.as_str().trim()).unwrap_or("");
        query = query.replace(&format!("{{{}}}", i - 1), value);
    }
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn unknown_query(return_code: i32, error_text: &str) -> String {
    let tokens: Vec<&str> = error_text.split_whitespace().take(10).collect();
    format!("error {} {}", return_code, tokens.join(" "))
        .trim_end()
        .to_string()
}
