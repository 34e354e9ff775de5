//! Parsers for the proxy list formats published by free providers.
//!
//! Every parser tolerates schema drift: a row that cannot be understood is
//! skipped and the rest of the listing is kept.

use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

use crate::proxy::{Endpoint, Scheme};

/// Parse a newline-delimited list of `host:port` or `scheme://host:port` lines.
pub(crate) fn parse_plain_list(content: &str, default_scheme: Scheme) -> Vec<Endpoint> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || !line.contains(':') {
                return None;
            }
            // some lists append country codes or latency after whitespace
            let address = line.split_whitespace().next()?;
            Endpoint::parse_with_default(address, default_scheme).ok()
        })
        .collect()
}

/// Parse a JSON listing.
///
/// Accepts a top-level array of rows or an object wrapping it under
/// `proxies` or `data`. Rows may be objects carrying `ip`/`host`/`address`,
/// `port` (number or string) and `protocol` or `protocols`, or plain
/// address strings.
pub(crate) fn parse_json_list(content: &str, default_scheme: Scheme) -> Option<Vec<Endpoint>> {
    let value: Value = serde_json::from_str(content).ok()?;
    let rows = match &value {
        Value::Array(rows) => rows,
        Value::Object(map) => ["proxies", "data"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))?,
        _ => return None,
    };

    Some(
        rows.iter()
            .filter_map(|row| json_row(row, default_scheme))
            .collect(),
    )
}

fn json_row(row: &Value, default_scheme: Scheme) -> Option<Endpoint> {
    if let Some(address) = row.as_str() {
        return Endpoint::parse_with_default(address, default_scheme).ok();
    }

    let host = ["ip", "host", "address"]
        .iter()
        .find_map(|key| row.get(*key).and_then(Value::as_str))?;
    let port = match row.get("port")? {
        Value::Number(n) => u16::try_from(n.as_u64()?).ok()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };

    let scheme = match row.get("protocol") {
        Some(Value::String(name)) => Scheme::from_name(name)?,
        _ => match row.get("protocols").and_then(Value::as_array) {
            Some(names) => names
                .iter()
                .filter_map(Value::as_str)
                .find_map(Scheme::from_name)?,
            None => default_scheme,
        },
    };

    if host.trim().is_empty() || port == 0 {
        return None;
    }
    Some(Endpoint::new(scheme, host, port))
}

/// Parse an HTML listing table.
///
/// Column positions are located from the header row (`IP Address`, `Port`,
/// `Https`); without a recognisable header the first two cells are taken as
/// host and port. A row whose `Https` cell reads `yes` yields an https
/// endpoint, otherwise `default_scheme` is used.
pub(crate) fn parse_html_table(content: &str, default_scheme: Scheme) -> Vec<Endpoint> {
    let (Ok(row_selector), Ok(header_selector), Ok(cell_selector)) = (
        Selector::parse("table tr"),
        Selector::parse("th"),
        Selector::parse("td"),
    ) else {
        return Vec::new();
    };

    let document = Html::parse_document(content);
    let mut columns = Columns::default();
    let mut endpoints = Vec::new();

    for row in document.select(&row_selector) {
        let headers: Vec<String> = row.select(&header_selector).map(cell_text).collect();
        if !headers.is_empty() {
            columns = Columns::from_headers(&headers);
            continue;
        }

        let cells: Vec<String> = row.select(&cell_selector).map(cell_text).collect();
        if let Some(endpoint) = columns.endpoint(&cells, default_scheme) {
            endpoints.push(endpoint);
        }
    }

    endpoints
}

#[derive(Debug, Clone, Copy)]
struct Columns {
    host: usize,
    port: usize,
    https: Option<usize>,
}

impl Default for Columns {
    fn default() -> Self {
        Self {
            host: 0,
            port: 1,
            https: None,
        }
    }
}

impl Columns {
    fn from_headers(headers: &[String]) -> Self {
        let defaults = Columns::default();
        Self {
            host: header_position(headers, |h| {
                h == "ip" || h.starts_with("ip address") || h == "host"
            })
            .unwrap_or(defaults.host),
            port: header_position(headers, |h| h == "port").unwrap_or(defaults.port),
            https: header_position(headers, |h| h == "https"),
        }
    }

    fn endpoint(&self, cells: &[String], default_scheme: Scheme) -> Option<Endpoint> {
        let host = cells.get(self.host)?;
        let port: u16 = cells.get(self.port)?.parse().ok()?;
        if port == 0 || host.is_empty() || host.contains(char::is_whitespace) {
            return None;
        }

        let scheme = match self.https.and_then(|i| cells.get(i)) {
            Some(flag) if flag.eq_ignore_ascii_case("yes") => Scheme::Https,
            _ => default_scheme,
        };
        // re-parse so hosts that are not valid URL hosts are dropped
        Endpoint::parse_with_default(&format!("{}:{}", host, port), scheme).ok()
    }
}

fn header_position(headers: &[String], pred: impl Fn(&str) -> bool) -> Option<usize> {
    headers
        .iter()
        .position(|h| pred(h.to_ascii_lowercase().as_str()))
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_list_skips_comments_and_garbage() {
        let content = "\
# free list
1.1.1.1:8080
socks5://2.2.2.2:1080
  3.3.3.3:3128   US  120ms

not-a-proxy
4.4.4.4:notaport
";
        let endpoints = parse_plain_list(content, Scheme::Http);
        let rendered: Vec<String> = endpoints.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "http://1.1.1.1:8080",
                "socks5://2.2.2.2:1080",
                "http://3.3.3.3:3128",
            ]
        );
    }

    #[test]
    fn json_wrapped_rows_with_protocol_field() {
        let content = r#"{"proxies": [
            {"ip": "5.5.5.5", "port": 80, "protocol": "http"},
            {"ip": "6.6.6.6", "port": "1080", "protocol": "socks5"},
            {"ip": "7.7.7.7", "port": 70000, "protocol": "http"},
            {"ip": "8.8.8.8", "protocol": "http"},
            {"ip": "9.9.9.9", "port": 1, "protocol": "carrier-pigeon"}
        ]}"#;
        let endpoints = parse_json_list(content, Scheme::Http).unwrap();
        let rendered: Vec<String> = endpoints.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["http://5.5.5.5:80", "socks5://6.6.6.6:1080"]);
    }

    #[test]
    fn json_protocols_array_and_bare_strings() {
        let content = r#"{"data": [
            {"ip": "10.0.0.1", "port": "8080", "protocols": ["socks4"]},
            {"host": "10.0.0.2", "port": 3128}
        ]}"#;
        let endpoints = parse_json_list(content, Scheme::Https).unwrap();
        assert_eq!(endpoints[0].to_string(), "socks4://10.0.0.1:8080");
        assert_eq!(endpoints[1].to_string(), "https://10.0.0.2:3128");

        let endpoints = parse_json_list(r#"["10.0.0.3:81", 42]"#, Scheme::Http).unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].to_string(), "http://10.0.0.3:81");
    }

    #[test]
    fn json_rejects_unrecognised_documents() {
        assert!(parse_json_list("<html></html>", Scheme::Http).is_none());
        assert!(parse_json_list(r#"{"items": []}"#, Scheme::Http).is_none());
        assert!(parse_json_list("17", Scheme::Http).is_none());
    }

    #[test]
    fn html_table_uses_header_positions_and_https_flag() {
        let content = r#"
<html><body><table class="table">
<thead><tr><th>IP Address</th><th>Port</th><th>Code</th><th>Google</th><th>Https</th></tr></thead>
<tbody>
<tr><td>11.0.0.1</td><td>8080</td><td>US</td><td>no</td><td>yes</td></tr>
<tr><td>11.0.0.2</td><td>3128</td><td>DE</td><td>no</td><td>no</td></tr>
<tr><td>broken row</td></tr>
<tr><td>11.0.0.3</td><td>port?</td><td>FR</td><td>no</td><td>yes</td></tr>
</tbody></table></body></html>"#;
        let endpoints = parse_html_table(content, Scheme::Http);
        let rendered: Vec<String> = endpoints.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec!["https://11.0.0.1:8080", "http://11.0.0.2:3128"]
        );
    }

    #[test]
    fn html_table_without_header_uses_first_columns() {
        let content = "<table><tr><td>12.0.0.1</td><td>1080</td></tr></table>";
        let endpoints = parse_html_table(content, Scheme::Socks5);
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].to_string(), "socks5://12.0.0.1:1080");
    }
}
