use std::borrow::Cow;
use tracing::debug;

use super::extract::{ExtractionTable, ORIGINAL_COMMAND};
use super::Solution;

/// Fills `{variable}` placeholders from the failing command and its error text.
/// Unresolved placeholders are left verbatim.
pub struct VariableResolver {
    table: &'static ExtractionTable,
}

impl VariableResolver {
    pub fn new() -> Self {
        Self {
            table: ExtractionTable::shared(),
        }
    }

    pub fn fill_variables(&self, solutions: Vec<Solution>, command: &str, error_text: &str) -> Vec<Solution> {
        solutions
            .into_iter()
            .map(|solution| self.fill(solution, command, error_text))
            .collect()
    }

    pub fn fill(&self, mut solution: Solution, command: &str, error_text: &str) -> Solution {
        let Some(template) = solution.command_template.clone() else {
            return solution;
        };

        let mut resolved = template;
        for variable in &solution.variables {
            if let Some(value) = self.table.extract(variable, command, error_text) {
                let value = if variable == ORIGINAL_COMMAND {
                    Cow::Borrowed(value.as_str())
                } else {
                    shell_quote(&value)
                };
                resolved = resolved.replace(&format!("{{{}}}", variable), &value);
            }
        }

        let leftover = super::placeholders(&resolved);
        if !leftover.is_empty() {
            debug!(command = %resolved, ?leftover, "solution has unresolved placeholders");
        }
        solution.resolved_command = Some(resolved);
        solution
    }

    /// Resolves a bare template string; `None` if any placeholder stays unfilled.
    pub fn resolve_template(&self, template: &str, command: &str, error_text: &str) -> Option<String> {
        let solution = self.fill(Solution::command("", template), command, error_text);
        if solution.is_executable() {
            solution.resolved_command
        } else {
            None
        }
    }
}

/// Single-quotes `value` for a POSIX shell unless every character is inert.
pub fn shell_quote(value: &str) -> Cow<'_, str> {
    let inert = |c: char| c.is_ascii_alphanumeric() || "@%+=:,./_-".contains(c);
    if !value.is_empty() && value.chars().all(inert) {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(format!("'{}'", value.replace('\'', r"'\''")))
    }
}

impl Default for VariableResolver {
    fn default() -> Self {
        Self::new()
    }
}
