//! Minimal `{{placeholder}}` substitution for prompt templates.
//!
//! Substitution is a single left-to-right pass: values are inserted verbatim
//! and never re-scanned, so a query containing `{{context}}` stays literal.

use std::collections::HashMap;

/// Placeholders every prompt template may reference, with their binding names.
const TOKENS: [(&str, &str); 2] = [("{{context}}", "context"), ("{{query}}", "query")];

/// Render `template`, replacing every literal `{{context}}` and `{{query}}`.
///
/// Placeholders without a binding render as the empty string. Any other
/// braces in the template are copied through untouched.
pub fn render(template: &str, bindings: &HashMap<&str, &str>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some((start, token, name)) = next_token(rest) {
        out.push_str(&rest[..start]);
        out.push_str(bindings.get(name).copied().unwrap_or_default());
        rest = &rest[start + token.len()..];
    }

    out.push_str(rest);
    out
}

fn next_token(text: &str) -> Option<(usize, &'static str, &'static str)> {
    TOKENS
        .iter()
        .filter_map(|&(token, name)| text.find(token).map(|at| (at, token, name)))
        .min_by_key(|(at, _, _)| *at)
}
