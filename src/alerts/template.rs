//! `{{variable}}` placeholder substitution

use std::collections::HashMap;

/// Replace every `{{name}}` with its value. Placeholders with no supplied
/// value, and unterminated `{{`, are copied through verbatim.
pub fn render(template: &str, variables: &HashMap<String, String>) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        output.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];

        let Some(close) = after_open.find("}}") else {
            output.push_str(&rest[open..]);
            return output;
        };

        let name = after_open[..close].trim();
        match variables.get(name) {
            Some(value) => output.push_str(value),
            None => output.push_str(&rest[open..open + 2 + close + 2]),
        }
        rest = &after_open[close + 2..];
    }

    output.push_str(rest);
    output
}
