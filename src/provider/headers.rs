use chrono::{DateTime, Utc};

use super::MessageHeader;

pub fn extract_header<'a>(headers: &'a [MessageHeader], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Splits a `From:` style value into display name and address.
pub fn parse_from_header(raw: Option<&str>) -> (Option<String>, Option<String>) {
    let Some(raw) = raw else {
        return (None, None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return (None, None);
    }

    // "Display Name <email@example.com>"
    if let (Some(angle_start), Some(angle_end)) = (raw.rfind('<'), raw.rfind('>')) {
        if angle_start < angle_end {
            let address = raw[angle_start + 1..angle_end].trim();
            let name = raw[..angle_start].trim().trim_matches('"').trim();
            return (
                (!name.is_empty()).then(|| name.to_string()),
                (!address.is_empty()).then(|| address.to_string()),
            );
        }
    }

    if raw.contains('@') {
        return (None, Some(raw.to_string()));
    }

    (Some(raw.to_string()), None)
}

/// Reduces any sender string to the lowercase bare address used for
/// whitelist lookups and storage.
pub fn normalize_address(raw: &str) -> Option<String> {
    let (_, address) = parse_from_header(Some(raw));
    let address = address?
        .trim()
        .trim_matches(|c| c == '<' || c == '>' || c == '"')
        .to_ascii_lowercase();
    address.contains('@').then_some(address)
}

pub fn parse_address_list(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };

    let mut addresses = Vec::new();
    // Commas inside quoted display names do not separate entries.
    let mut in_quotes = false;
    let mut current = String::new();

    for ch in raw.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => {
                addresses.extend(normalize_address(&current));
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    addresses.extend(normalize_address(&current));

    addresses
}

/// Accepts RFC 2822 `Date:` headers and RFC 3339 timestamps.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn html_to_text(html: &str) -> Option<String> {
    let rendered = std::panic::catch_unwind(|| {
        html2text::from_read(html.as_bytes(), 120)
            .lines()
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n")
    })
    .ok()?;
    let trimmed = rendered.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::{normalize_address, parse_address_list, parse_date, parse_from_header};

    #[test]
    fn from_header_with_quoted_display_name() {
        let (name, address) = parse_from_header(Some("\"Rivera, Sam\" <Sam@Build.example>"));
        assert_eq!(name.as_deref(), Some("Rivera, Sam"));
        assert_eq!(address.as_deref(), Some("Sam@Build.example"));

        let (name, address) = parse_from_header(Some("Just A Name"));
        assert_eq!(name.as_deref(), Some("Just A Name"));
        assert!(address.is_none());
    }

    #[test]
    fn addresses_normalize_to_lowercase_bare_form() {
        assert_eq!(
            normalize_address("Jane Owner <Jane@Home.Example>").as_deref(),
            Some("jane@home.example")
        );
        assert_eq!(
            normalize_address("  builder@example.com ").as_deref(),
            Some("builder@example.com")
        );
        assert!(normalize_address("undisclosed-recipients:;").is_none());
    }

    #[test]
    fn address_list_respects_quoted_commas() {
        let parsed = parse_address_list(Some(
            "\"Rivera, Sam\" <sam@build.example>, owner@home.example, not-an-address",
        ));
        assert_eq!(parsed, vec!["sam@build.example", "owner@home.example"]);
    }

    #[test]
    fn dates_parse_from_either_format() {
        let rfc2822 = parse_date("Mon, 02 Mar 2026 09:00:00 -0500").expect("rfc2822");
        let rfc3339 = parse_date("2026-03-02T14:00:00Z").expect("rfc3339");
        assert_eq!(rfc2822, rfc3339);
        assert!(parse_date("yesterday").is_none());
    }
}
