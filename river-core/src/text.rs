/// Appended when a cleaned string is cut at the length limit.
const TRUNCATION_SUFFIX: &str = " ...";

/// Strip markup from feed-supplied text and cap its length.
///
/// Tags are dropped, common entities decoded, whitespace collapsed. The
/// result is truncated to `limit` characters plus a ` ...` suffix.
pub fn clean_text(raw: &str, limit: usize) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_tag = false;
    let mut entity: Option<String> = None;

    for ch in raw.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if in_tag => {}
            '&' => entity = Some(String::new()),
            ';' if entity.is_some() => {
                let name = entity.take().unwrap_or_default();
                decode_entity(&name, &mut out);
            }
            _ if entity.is_some() => {
                let mut name = entity.take().unwrap_or_default();
                name.push(ch);
                // An unterminated "entity" this long is just text.
                if name.len() > 8 {
                    out.push('&');
                    out.push_str(&name);
                } else {
                    entity = Some(name);
                }
            }
            _ => out.push(ch),
        }
    }
    if let Some(name) = entity {
        out.push('&');
        out.push_str(&name);
    }

    let collapsed = out.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate(&collapsed, limit)
}

fn decode_entity(name: &str, out: &mut String) {
    match name {
        "amp" => out.push('&'),
        "lt" => out.push('<'),
        "gt" => out.push('>'),
        "quot" => out.push('"'),
        "apos" | "#39" => out.push('\''),
        "nbsp" => out.push(' '),
        _ if name.starts_with('#') => {
            if let Some(ch) = numeric_entity(name).and_then(char::from_u32) {
                out.push(ch);
            }
        }
        _ => {
            out.push('&');
            out.push_str(name);
            out.push(';');
        }
    }
}

fn numeric_entity(name: &str) -> Option<u32> {
    if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        name.strip_prefix('#')?.parse().ok()
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(limit).collect();
        cut.push_str(TRUNCATION_SUFFIX);
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags() {
        assert_eq!(clean_text("<p>Hello</p>", 280), "Hello");
        assert_eq!(clean_text("<div><b>Bold</b> text</div>", 280), "Bold text");
    }

    #[test]
    fn decodes_entities() {
        assert_eq!(clean_text("&amp;", 280), "&");
        assert_eq!(clean_text("&lt;tag&gt;", 280), "<tag>");
        assert_eq!(clean_text("A&nbsp;B", 280), "A B");
        assert_eq!(clean_text("&#65;&#x42;", 280), "AB");
    }

    #[test]
    fn keeps_unknown_entities_verbatim() {
        assert_eq!(clean_text("&bogus;", 280), "&bogus;");
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(clean_text("  a \n\t b   c ", 280), "a b c");
    }

    #[test]
    fn truncates_with_suffix() {
        let long = "x".repeat(300);
        let cleaned = clean_text(&long, 280);
        assert_eq!(cleaned.chars().count(), 280 + 4);
        assert!(cleaned.ends_with(" ..."));
    }

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(clean_text("short", 280), "short");
    }
}
