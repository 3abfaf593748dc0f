//! Prompt templates, loaded at compile time and treated strictly as data.
//! Templating is plain `{placeholder}` substitution — never code execution.

pub const PERSONA: &str = include_str!("../prompts/persona.md");
pub const TOOLS_SECTION: &str = include_str!("../prompts/tools_section.md");
pub const CLASSIFIER: &str = include_str!("../prompts/classifier.md");
pub const INTENT: &str = include_str!("../prompts/intent.md");
pub const REVISION: &str = include_str!("../prompts/revision.md");
pub const SAFETY: &str = include_str!("../prompts/safety.md");

/// Substitute `{key}` placeholders. Unknown placeholders are left intact
/// so a template typo shows up in output rather than vanishing silently.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_all_occurrences() {
        let out = render("{a} and {b} and {a}", &[("a", "x"), ("b", "y")]);
        assert_eq!(out, "x and y and x");
    }

    #[test]
    fn unknown_placeholders_survive() {
        let out = render("{a} {missing}", &[("a", "x")]);
        assert_eq!(out, "x {missing}");
    }

    #[test]
    fn templates_carry_their_placeholders() {
        assert!(PERSONA.contains("{domain}"));
        assert!(PERSONA.contains("{tools_section}"));
        assert!(CLASSIFIER.contains("{message}"));
        assert!(CLASSIFIER.contains("{history}"));
        assert!(INTENT.contains("{message}"));
        assert!(REVISION.contains("{draft}"));
        assert!(REVISION.contains("{context}"));
        assert!(SAFETY.contains("{response}"));
    }
}
