use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader as XmlReader;

/// Find the text content of the first `<tag>…</tag>` element in XML.
/// Skips over nested elements; returns `None` if not found or empty.
pub fn text(xml: &str, tag: &str) -> Option<String> {
    let tag_bytes = tag.as_bytes();
    let mut reader = XmlReader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut in_tag = false;
    let mut depth: usize = 0;

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) => {
                if !in_tag && e.local_name().as_ref() == tag_bytes {
                    in_tag = true;
                    depth = 0;
                } else if in_tag {
                    depth += 1;
                }
            }
            Ok(XmlEvent::End(_)) => {
                if in_tag {
                    if depth == 0 {
                        return None;
                    }
                    depth -= 1;
                }
            }
            Ok(XmlEvent::Text(e)) if in_tag && depth == 0 => {
                return e.unescape().ok().map(|s| s.into_owned());
            }
            Ok(XmlEvent::Eof) | Err(_) => break,
            _ => {}
        }
    }
    None
}

/// Collect text content of every `<tag>…</tag>` element in XML.
pub fn all_texts(xml: &str, tag: &str) -> Vec<String> {
    let tag_bytes = tag.as_bytes();
    let mut reader = XmlReader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut result = Vec::new();
    let mut depth: usize = 0;

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) => {
                if depth == 0 && e.local_name().as_ref() == tag_bytes {
                    depth = 1;
                } else if depth > 0 {
                    depth += 1;
                }
            }
            Ok(XmlEvent::End(_)) => {
                if depth > 0 {
                    depth -= 1;
                }
            }
            Ok(XmlEvent::Text(e)) if depth == 1 => {
                if let Ok(s) = e.unescape() {
                    result.push(s.into_owned());
                }
            }
            Ok(XmlEvent::Eof) | Err(_) => break,
            _ => {}
        }
    }
    result
}

/// Slice out the raw inner XML of each top-level `<tag>…</tag>` occurrence,
/// so callers can re-parse a repeated structured element (one block per
/// instance, per fleet error, ...) field by field with [`text`].
pub fn all_blocks(xml: &str, tag: &str) -> Vec<String> {
    let open = format!("<{}>", tag);
    let open_attr = format!("<{} ", tag);
    let close = format!("</{}>", tag);
    let mut result = Vec::new();
    let mut rest = xml;
    loop {
        let start = match rest.find(&open).into_iter().chain(rest.find(&open_attr)).min() {
            Some(pos) => pos,
            None => break,
        };
        let after_open = &rest[start..];
        let open_end = match after_open.find('>') {
            Some(pos) => pos + 1,
            None => break,
        };
        let Some(close_pos) = after_open.find(&close) else { break };
        result.push(after_open[open_end..close_pos].to_string());
        rest = &after_open[close_pos + close.len()..];
    }
    result
}

/// Parse the AWS error code from a Query-API error XML response.
pub fn error_code(xml: &str) -> String {
    text(xml, "Code").or_else(|| text(xml, "code")).unwrap_or_else(|| "Unknown".into())
}

/// Parse the AWS error message from a Query-API error XML response.
pub fn error_message(xml: &str) -> String {
    text(xml, "Message").or_else(|| text(xml, "message")).unwrap_or_else(|| "unknown error".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_simple_element() {
        let xml = "<Response><fleetId>fleet-123</fleetId></Response>";
        assert_eq!(text(xml, "fleetId"), Some("fleet-123".into()));
    }

    #[test]
    fn returns_none_for_missing() {
        let xml = "<Response><fleetId>fleet-123</fleetId></Response>";
        assert_eq!(text(xml, "missing"), None);
    }

    #[test]
    fn collects_multiple_elements() {
        let xml = "<Response><instanceId>i-1</instanceId><instanceId>i-2</instanceId></Response>";
        assert_eq!(all_texts(xml, "instanceId"), vec!["i-1".to_string(), "i-2".to_string()]);
    }

    #[test]
    fn parses_error_code_and_message() {
        let xml = "<Response><Errors><Error><Code>RequestLimitExceeded</Code><Message>slow down</Message></Error></Errors></Response>";
        assert_eq!(error_code(xml), "RequestLimitExceeded");
        assert_eq!(error_message(xml), "slow down");
    }

    #[test]
    fn all_blocks_splits_sibling_items() {
        let xml = "<instancesSet><item><instanceId>i-1</instanceId></item><item><instanceId>i-2</instanceId></item></instancesSet>";
        let blocks = all_blocks(xml, "item");
        assert_eq!(blocks.len(), 2);
        assert_eq!(text(&blocks[0], "instanceId"), Some("i-1".into()));
        assert_eq!(text(&blocks[1], "instanceId"), Some("i-2".into()));
    }
}
