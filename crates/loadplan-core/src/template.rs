//! `{alias}` templates for mapping-level SQL fragments.
//!
//! Filter conditions, mapping `where` restrictions and ordering clauses are
//! declared once per mapping and rendered against whatever table alias the
//! statement assigns, e.g. `{alias}.active = 1` becomes `orders0_.active = 1`.

use std::sync::OnceLock;

use regex::Regex;

use crate::Result;
use crate::error::{Error, MappingErrorKind};

const ALIAS_PLACEHOLDER: &str = "alias";

fn placeholder_regex() -> Result<&'static Regex> {
    static PLACEHOLDER: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{([^{}]*)\}"))
        .as_ref()
        .map_err(|e| Error::mapping(MappingErrorKind::InvalidFragment, e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Alias,
}

/// A parsed SQL fragment with `{alias}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl SqlTemplate {
    /// Parse a template.
    ///
    /// Only `{alias}` is recognised. Any other placeholder name or an
    /// unbalanced brace is a mapping error.
    #[allow(clippy::result_large_err)]
    pub fn parse(source: &str) -> Result<Self> {
        let regex = placeholder_regex()?;
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in regex.captures_iter(source) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if name.as_str().trim() != ALIAS_PLACEHOLDER {
                return Err(Error::mapping(
                    MappingErrorKind::InvalidFragment,
                    format!(
                        "unknown placeholder '{{{}}}' in fragment '{}'",
                        name.as_str(),
                        source
                    ),
                ));
            }
            push_literal(&mut segments, &source[last..whole.start()], source)?;
            segments.push(Segment::Alias);
            last = whole.end();
        }
        push_literal(&mut segments, &source[last..], source)?;

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Render with the given table alias.
    pub fn render(&self, alias: &str) -> String {
        let mut out = String::with_capacity(self.source.len() + alias.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Alias => out.push_str(alias),
            }
        }
        out
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_empty(&self) -> bool {
        self.source.trim().is_empty()
    }
}

#[allow(clippy::result_large_err)]
fn push_literal(segments: &mut Vec<Segment>, text: &str, source: &str) -> Result<()> {
    if text.contains('{') || text.contains('}') {
        return Err(Error::mapping(
            MappingErrorKind::InvalidFragment,
            format!("unbalanced brace in fragment '{}'", source),
        ));
    }
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_string()));
    }
    Ok(())
}
