//! Line-preserving INI document

use crate::{ConfigError, IniParser, Rule};
use pest::iterators::Pair;
use pest::Parser;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Section { name: String, raw: String },
    /// `raw` is dropped once the value changes
    Entry { key: String, value: String, raw: Option<String> },
    /// Comments and blank lines
    Verbatim(String),
}

/// Parsed configuration file.
///
/// Keeps every line of the source so rendering an unmodified document gives
/// back the original text. Section names are case-sensitive, keys are not.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigDocument {
    lines: Vec<Line>,
}

impl ConfigDocument {
    /// Parse INI text
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut pairs = IniParser::parse(Rule::file, text)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        let file = pairs
            .next()
            .ok_or_else(|| ConfigError::Parse("empty parse tree".to_string()))?;

        let mut lines = Vec::new();
        for pair in file.into_inner() {
            match pair.as_rule() {
                Rule::section => lines.push(parse_section(pair)?),
                Rule::entry => lines.push(parse_entry(pair)?),
                Rule::comment | Rule::blank => lines.push(Line::Verbatim(pair.as_str().to_string())),
                _ => {}
            }
        }

        Ok(Self { lines })
    }

    /// Value of `key` in `section`, trimmed
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        let mut current: Option<&str> = None;
        for line in &self.lines {
            match line {
                Line::Section { name, .. } => current = Some(name),
                Line::Entry { key: k, value, .. } if current == Some(section) => {
                    if k.eq_ignore_ascii_case(key) {
                        return Some(value);
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Section names in file order
    pub fn sections(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                Line::Section { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.sections().contains(&section)
    }

    /// Set `key` in `section`.
    ///
    /// An existing key keeps its position; a new key goes after the last
    /// entry of the section; a missing section is appended at the end.
    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        let mut in_section = false;
        let mut existing = None;
        let mut insert_at = None;

        for (index, line) in self.lines.iter().enumerate() {
            match line {
                Line::Section { name, .. } => {
                    in_section = name == section;
                    if in_section {
                        insert_at = Some(index + 1);
                    }
                }
                Line::Entry { key: k, .. } if in_section => {
                    if k.eq_ignore_ascii_case(key) {
                        existing = Some(index);
                        break;
                    }
                    insert_at = Some(index + 1);
                }
                _ => {}
            }
        }

        let entry = |key: &str| Line::Entry {
            key: key.to_string(),
            value: value.to_string(),
            raw: None,
        };

        if let Some(index) = existing {
            if let Some(Line::Entry { key: k, .. }) = self.lines.get(index) {
                let replacement = entry(k);
                self.lines[index] = replacement;
            }
            return;
        }

        if let Some(index) = insert_at {
            self.lines.insert(index, entry(key));
            return;
        }

        // Keep the final empty line (trailing newline) last
        let end = match self.lines.last() {
            Some(Line::Verbatim(raw)) if raw.is_empty() => self.lines.len() - 1,
            _ => self.lines.len(),
        };
        let mut appended = Vec::new();
        if end > 0 && !matches!(self.lines.get(end - 1), Some(Line::Verbatim(raw)) if raw.trim().is_empty()) {
            appended.push(Line::Verbatim(String::new()));
        }
        appended.push(Line::Section {
            name: section.to_string(),
            raw: format!("[{}]", section),
        });
        appended.push(entry(key));
        if end == self.lines.len() {
            appended.push(Line::Verbatim(String::new()));
        }
        self.lines.splice(end..end, appended);
    }

    /// Render back to INI text
    pub fn render(&self) -> String {
        self.lines
            .iter()
            .map(|line| match line {
                Line::Section { raw, .. } => raw.clone(),
                Line::Entry { raw: Some(raw), .. } => raw.clone(),
                Line::Entry { key, value, raw: None } => format!("{} = {}", key, value),
                Line::Verbatim(raw) => raw.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for ConfigDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn parse_section(pair: Pair<Rule>) -> Result<Line, ConfigError> {
    let raw = pair.as_str().to_string();
    for inner_pair in pair.into_inner() {
        if inner_pair.as_rule() == Rule::section_name {
            return Ok(Line::Section {
                name: inner_pair.as_str().trim().to_string(),
                raw,
            });
        }
    }
    Err(ConfigError::Parse(format!("missing section name in '{}'", raw)))
}

fn parse_entry(pair: Pair<Rule>) -> Result<Line, ConfigError> {
    let raw = pair.as_str().to_string();
    let mut key = None;
    let mut value = String::new();

    for inner_pair in pair.into_inner() {
        match inner_pair.as_rule() {
            Rule::key => key = Some(inner_pair.as_str().trim().to_string()),
            Rule::value => value = inner_pair.as_str().trim().to_string(),
            _ => {}
        }
    }

    let key = key
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ConfigError::Parse(format!("missing key in '{}'", raw)))?;

    Ok(Line::Entry {
        key,
        value,
        raw: Some(raw),
    })
}
