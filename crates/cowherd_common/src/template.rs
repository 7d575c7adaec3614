//! Minimal `{{placeholder}}` template rendering for notification
//! bodies.

/// Replace every `{{key}}` token in `template` with its value from
/// `vars`. Tokens without a matching key are left in place verbatim.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = &after[..end];
                match vars.iter().find(|(k, _)| *k == key) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        // keep the placeholder in place
                        out.push_str("{{");
                        out.push_str(key);
                        out.push_str("}}");
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                // unterminated token, emit the remainder as-is
                out.push_str("{{");
                out.push_str(after);
                return out;
            }
        }
    }

    out.push_str(rest);
    out
}
