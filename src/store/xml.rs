//! Minimal helpers for the handful of XML documents the S3 API exchanges.

/// Extract the content of the first `<tag>..</tag>` occurrence.
pub(crate) fn tag(xml: &str, name: &str) -> Option<String> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");

    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(unescape(&xml[start..start + end]))
}

/// All inner `<name>..</name>` blocks, in document order.
pub(crate) fn blocks<'a>(xml: &'a str, name: &str) -> Vec<&'a str> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");

    let mut found = Vec::new();
    let mut cursor = 0;
    while let Some(start) = xml[cursor..].find(&open) {
        let content = cursor + start + open.len();
        match xml[content..].find(&close) {
            Some(end) => {
                found.push(&xml[content..content + end]);
                cursor = content + end + close.len();
            }
            None => break,
        }
    }
    found
}

/// Escape text placed inside an element.
pub(crate) fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_returns_first_occurrence() {
        let xml = "<R><Key>a</Key><Key>b</Key></R>";
        assert_eq!(tag(xml, "Key"), Some("a".to_string()));
        assert_eq!(tag(xml, "Missing"), None);
    }

    #[test]
    fn tag_unescapes_entities() {
        let xml = "<Key>a&amp;b &lt;c&gt;</Key>";
        assert_eq!(tag(xml, "Key"), Some("a&b <c>".to_string()));
    }

    #[test]
    fn blocks_walks_the_document() {
        let xml = "<L><Contents><Key>a</Key></Contents><Contents><Key>b</Key></Contents></L>";
        let contents = blocks(xml, "Contents");
        assert_eq!(contents.len(), 2);
        assert_eq!(tag(contents[1], "Key"), Some("b".to_string()));
    }

    #[test]
    fn escape_round_trips() {
        let text = "a&b<c>\"d'";
        assert_eq!(unescape(&escape(text)), text);
    }
}
