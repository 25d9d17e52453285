use regex::Regex;
use std::sync::OnceLock;

/// One solution proposed by the language model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedSolution {
    pub description: String,
    pub command: Option<String>,
    pub explanation: Option<String>,
}

fn block_separator() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:SOLUTION|Solution)\s*\d+\s*:").expect("solution separator"))
}

fn field_label() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(DESCRIPTION|Description|COMMAND|Command|EXPLANATION|Explanation)\s*:")
            .expect("field label")
    })
}

fn fenced_code() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[\w+.-]*[ \t]*\r?\n(.*?)```").expect("fenced code"))
}

/// Parses replies of the form
///
/// ```text
/// SOLUTION 1:
/// DESCRIPTION: ...
/// COMMAND: ...
/// EXPLANATION: ...
/// ```
///
/// Blocks without a description are dropped.
pub fn parse_generated_solutions(text: &str) -> Vec<GeneratedSolution> {
    block_separator()
        .split(text)
        .filter(|block| !block.trim().is_empty())
        .filter_map(parse_block)
        .collect()
}

fn parse_block(block: &str) -> Option<GeneratedSolution> {
    let labels: Vec<_> = field_label().captures_iter(block).collect();

    let mut description = None;
    let mut command = None;
    let mut explanation = None;

    for (i, caps) in labels.iter().enumerate() {
        let (Some(whole), Some(label)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let end = labels
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(block.len());
        let value = block[whole.end()..end].trim();
        if value.is_empty() {
            continue;
        }

        match label.as_str().to_ascii_lowercase().as_str() {
            "description" => description = Some(value.to_string()),
            "command" => command = clean_command(value),
            "explanation" => explanation = Some(value.to_string()),
            _ => {}
        }
    }

    Some(GeneratedSolution {
        description: description?,
        command,
        explanation,
    })
}

fn clean_command(value: &str) -> Option<String> {
    let unfenced = fenced_code()
        .captures(value)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(value);
    let command = unfenced.trim().trim_matches('`').trim();

    let lowered = command.to_ascii_lowercase();
    if command.is_empty() || matches!(lowered.as_str(), "n/a" | "none" | "(none)" | "-") {
        None
    } else {
        Some(command.to_string())
    }
}

/// The first fenced code block of a reply, or the whole reply when it has none.
pub fn extract_code_block(text: &str) -> String {
    fenced_code()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| text.to_string())
}
