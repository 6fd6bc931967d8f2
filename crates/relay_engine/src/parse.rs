use std::sync::LazyLock;

use regex::Regex;
use relay_core::{CanonicalAddress, ParserKind};
use scraper::{Html, Selector};

static IPV4_PORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}:\d{1,5}\b").expect("valid regex")
});

/// Turns decoded source text into raw address tokens. Pure: no I/O, no
/// validation beyond what the format itself implies.
pub trait TokenParser: Send + Sync {
    fn parse(&self, text: &str) -> Vec<String>;
}

pub fn parser_for(kind: ParserKind) -> Box<dyn TokenParser> {
    match kind {
        ParserKind::Lines => Box::new(LineParser),
        ParserKind::Pattern => Box::new(PatternParser),
        ParserKind::HtmlTable => Box::new(HtmlTableParser),
    }
}

/// One entry per line. Blank lines and `#` comments are skipped; only the
/// first whitespace-delimited field is kept, so lists annotated with country
/// codes or anonymity levels still yield the address.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineParser;

impl TokenParser for LineParser {
    fn parse(&self, text: &str) -> Vec<String> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_whitespace().next())
            .map(ToOwned::to_owned)
            .collect()
    }
}

/// Scans free-form text for dotted-quad `ip:port` tokens.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternParser;

impl TokenParser for PatternParser {
    fn parse(&self, text: &str) -> Vec<String> {
        IPV4_PORT
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect()
    }
}

/// Reads `<tr>` rows of HTML tables. A row yields a token either from a cell
/// that already holds `host:port`, or from a host cell directly followed by a
/// port cell (the layout of the free-proxy-list family of pages).
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlTableParser;

impl TokenParser for HtmlTableParser {
    fn parse(&self, text: &str) -> Vec<String> {
        let doc = Html::parse_document(text);
        let (Ok(row_sel), Ok(cell_sel)) = (Selector::parse("tr"), Selector::parse("td")) else {
            return Vec::new();
        };

        let mut tokens = Vec::new();
        for row in doc.select(&row_sel) {
            let cells: Vec<String> = row
                .select(&cell_sel)
                .map(|cell| cell.text().collect::<String>().trim().to_string())
                .collect();

            if let Some(token) = cells.iter().find(|cell| is_address(cell)) {
                tokens.push(token.clone());
                continue;
            }
            if let Some(token) = cells
                .windows(2)
                .filter(|pair| pair[0].contains('.'))
                .map(|pair| format!("{}:{}", pair[0], pair[1]))
                .find(|candidate| is_address(candidate))
            {
                tokens.push(token);
            }
        }
        tokens
    }
}

fn is_address(text: &str) -> bool {
    !text.is_empty() && CanonicalAddress::parse(text).is_ok()
}
