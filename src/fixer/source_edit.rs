//! Line-oriented rewrites of JavaScript sources.

use regex::Regex;
use std::sync::OnceLock;

const HOOK_SCAN_LINES: usize = 10;
const CONDITION_SCAN_LINES: usize = 20;
const PROPERTY_SCAN_RADIUS: usize = 5;

fn hook_call() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"((?:const|let|var)\s+(?:\[[^\]]*\]|\{[^}]*\}|[A-Za-z_$][\w$]*)\s*=\s*)?(\buse[A-Z]\w*\s*\((?:[^()]|\([^()]*\))*\))\s*;?")
            .expect("built-in hook pattern")
    })
}

fn conditional() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:\}\s*)?(?:else\s+)?(?:if|for|while)\s*\(").expect("built-in conditional pattern")
    })
}

fn indentation(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

fn join(lines: &[String], trailing_newline: bool) -> String {
    let mut out = lines.join("\n");
    if trailing_newline {
        out.push('\n');
    }
    out
}

/// Moves a hook called inside a conditional to just above that conditional.
/// `line` is the 1-based line the linter reported; the hook is looked for on
/// that line and the few after it. Returns `None` when no such pattern is found.
pub fn hoist_conditional_hook(source: &str, line: usize) -> Option<String> {
    let mut lines: Vec<String> = source.lines().map(str::to_string).collect();
    let start = line.checked_sub(1)?;
    if start >= lines.len() {
        return None;
    }

    let end = (start + HOOK_SCAN_LINES).min(lines.len());
    let hook_line = (start..end).find(|&i| hook_call().is_match(&lines[i]))?;

    let hook_indent = indentation(&lines[hook_line]).len();
    let lowest = hook_line.saturating_sub(CONDITION_SCAN_LINES);
    let condition_line = (lowest..=hook_line).rev().find(|&i| {
        conditional().is_match(&lines[i])
            && (i == hook_line || indentation(&lines[i]).len() < hook_indent)
    })?;

    let caps = hook_call().captures(&lines[hook_line])?;
    let whole = caps.get(0)?.range();
    let declaration = caps.get(1).map_or("", |m| m.as_str());
    let call = caps.get(2)?.as_str();
    let hoisted = format!(
        "{}{}{};",
        indentation(&lines[condition_line]),
        declaration,
        call
    );

    let mut remaining = lines[hook_line].clone();
    remaining.replace_range(whole, "");
    if remaining.trim().is_empty() {
        lines.remove(hook_line);
    } else {
        lines[hook_line] = remaining;
    }
    lines.insert(condition_line, hoisted);

    Some(join(&lines, source.ends_with('\n')))
}

/// Wraps the statement that reads `property` near `line` (1-based) in a guard
/// on the object it is read from. Returns the new source and the guarded
/// object expression.
pub fn guard_property_access(source: &str, line: usize, property: &str) -> Option<(String, String)> {
    let mut lines: Vec<String> = source.lines().map(str::to_string).collect();
    let center = line.checked_sub(1)?.min(lines.len().checked_sub(1)?);

    let access = Regex::new(&format!(
        r"([A-Za-z_$][\w$]*(?:\??\.[A-Za-z_$][\w$]*)*)(\??\.){}\b",
        regex::escape(property)
    ))
    .ok()?;

    let candidates = std::iter::once(center).chain((1..=PROPERTY_SCAN_RADIUS).flat_map(|d| {
        [center.checked_sub(d), Some(center + d)]
            .into_iter()
            .flatten()
    }));

    for i in candidates.filter(|&i| i < lines.len()) {
        let Some(caps) = access.captures(&lines[i]) else {
            continue;
        };
        // Already optional-chained, so it cannot be the failing access.
        if &caps[2] == "?." {
            continue;
        }
        let object = caps[1].replace("?.", ".");
        let indent = indentation(&lines[i]).to_string();
        let body = lines[i].trim_start().to_string();
        let wrapped = format!("{indent}if ({object}) {{\n{indent}  {body}\n{indent}}}");
        lines[i] = wrapped;
        return Some((join(&lines, source.ends_with('\n')), object));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hoists_hook_above_the_conditional() {
        let source = "\
function Counter({ enabled }) {
  if (enabled) {
    const [count, setCount] = useState(0);
    return count;
  }
  return null;
}
";
        let fixed = hoist_conditional_hook(source, 3).unwrap();
        assert_eq!(
            fixed,
            "\
function Counter({ enabled }) {
  const [count, setCount] = useState(0);
  if (enabled) {
    return count;
  }
  return null;
}
"
        );
    }

    #[test]
    fn hook_on_the_condition_line() {
        let source = "  if (ready) useEffect(() => load(), []);\n";
        let fixed = hoist_conditional_hook(source, 1).unwrap();
        assert_eq!(fixed, "  useEffect(() => load(), []);\n  if (ready) \n");
    }

    #[test]
    fn no_conditional_means_no_edit() {
        let source = "function A() {\n  const [a] = useState(1);\n  return a;\n}";
        assert_eq!(hoist_conditional_hook(source, 2), None);
        assert_eq!(hoist_conditional_hook(source, 99), None);
        assert_eq!(hoist_conditional_hook(source, 0), None);
    }

    #[test]
    fn guards_the_object_chain() {
        let source = "\
function Profile({ user }) {
  const label = user.profile.name;
  return label;
}";
        let (fixed, object) = guard_property_access(source, 2, "name").unwrap();
        assert_eq!(object, "user.profile");
        assert_eq!(
            fixed,
            "\
function Profile({ user }) {
  if (user.profile) {
    const label = user.profile.name;
  }
  return label;
}"
        );
    }

    #[test]
    fn searches_nearby_lines() {
        let source = "a();\nb();\nconsole.log(item.title);\n";
        let (fixed, object) = guard_property_access(source, 1, "title").unwrap();
        assert_eq!(object, "item");
        assert!(fixed.contains("if (item) {\n  console.log(item.title);\n}"));
        assert!(fixed.ends_with('\n'));
    }

    #[test]
    fn optional_chains_are_skipped() {
        let source = "const t = item?.title;";
        assert_eq!(guard_property_access(source, 1, "title"), None);
        assert_eq!(guard_property_access("", 1, "title"), None);
    }
}
