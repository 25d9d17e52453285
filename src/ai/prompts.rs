//! Prompt text sent to the language model.

pub const SOLUTIONS_SYSTEM_PROMPT: &str = "You are an expert at solving technical errors. \
Analyze the error and suggest practical solutions. For each solution give a clear description \
of what to do, the exact command to run if one applies, and why it should work.\n\
\n\
Answer in exactly this format:\n\
SOLUTION 1:\n\
DESCRIPTION: Brief description of the solution\n\
COMMAND: command to run (or N/A)\n\
EXPLANATION: Why this solution should work\n\
\n\
SOLUTION 2:\n\
...";

pub const SOLUTIONS_TEMPERATURE: f32 = 0.2;
pub const SOLUTIONS_MAX_TOKENS: u32 = 800;

pub const EXPLANATION_TEMPERATURE: f32 = 0.3;
pub const EXPLANATION_MAX_TOKENS: u32 = 300;

pub const SYNTAX_FIX_TEMPERATURE: f32 = 0.2;

/// Title and snippet of a search result used as extra context.
pub struct ContextSnippet<'a> {
    pub title: &'a str,
    pub snippet: &'a str,
}

fn render_context(context: &[ContextSnippet<'_>]) -> String {
    if context.is_empty() {
        return String::new();
    }
    let mut out = String::from("Relevant information:\n\n");
    for (i, item) in context.iter().take(3).enumerate() {
        out.push_str(&format!("Source {}: {}\n{}\n\n", i + 1, item.title, item.snippet));
    }
    out
}

pub fn solutions_prompt(error_type: &str, error_text: &str, context: &[ContextSnippet<'_>]) -> String {
    format!(
        "Error type: {}\nError message:\n```\n{}\n```\n\n{}Please provide 1-3 practical solutions for this error.",
        error_type,
        error_text.trim(),
        render_context(context)
    )
}

pub fn explanation_prompt(
    error_type: &str,
    description: &str,
    error_text: &str,
    context: &[ContextSnippet<'_>],
) -> String {
    format!(
        "You are an expert at explaining technical errors in a way that's easy to understand.\n\
         \n\
         Explain the following error in plain language a developer would understand. Cover what \
         the error means, its most likely causes and how serious it is. Keep it under 200 words.\n\
         \n\
         Error type: {}\n\
         Error description: {}\n\
         Error message:\n```\n{}\n```\n\n{}",
        error_type,
        description,
        error_text.trim(),
        render_context(context)
    )
}

pub fn syntax_fix_prompt(error_text: &str, file_content: &str, line_number: usize) -> String {
    format!(
        "Fix the syntax error in this Python file.\n\
         \n\
         Error:\n{}\n\
         \n\
         File content:\n```python\n{}\n```\n\
         \n\
         The error is on line {}.\n\
         \n\
         Reply with only the complete fixed file inside a single ```python code block.",
        error_text.trim(),
        file_content,
        line_number
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solutions_prompt_includes_at_most_three_sources() {
        let context: Vec<_> = (0..5)
            .map(|_| ContextSnippet {
                title: "title",
                snippet: "snippet",
            })
            .collect();
        let prompt = solutions_prompt("python_module_not_found", "No module named 'x'", &context);

        assert!(prompt.contains("Source 3: title"));
        assert!(!prompt.contains("Source 4"));
        assert!(prompt.contains("No module named 'x'"));
    }
}
