//! The collaborator replies in one of two shapes: strict JSON for tag
//! analysis, or loosely marker-sectioned free text for summaries. Each
//! shape has its own parse path; the sectioned path is lenient and never
//! fails, substituting defaults for missing sections.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use teampulse_schema::{MessageType, TagCategory, Urgency};

pub const DEFAULT_SUMMARY_TEXT: &str = "No summary available.";
pub const DEFAULT_SENTIMENT: &str = "neutral";

#[derive(Debug, Clone, PartialEq)]
pub struct TagSuggestion {
    pub name: String,
    pub category: TagCategory,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct TagAnalysis {
    pub suggestions: Vec<TagSuggestion>,
    pub urgency: Urgency,
    pub message_type: MessageType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectionedReply {
    pub greeting: Option<String>,
    pub summary: String,
    pub key_topics: Vec<String>,
    pub sentiment: String,
    pub highlights: Vec<String>,
    pub action_items: Vec<String>,
}

impl Default for SectionedReply {
    fn default() -> Self {
        Self {
            greeting: None,
            summary: DEFAULT_SUMMARY_TEXT.to_string(),
            key_topics: vec![],
            sentiment: DEFAULT_SENTIMENT.to_string(),
            highlights: vec![],
            action_items: vec![],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTagAnalysis {
    #[serde(default)]
    tags: Vec<RawSuggestion>,
    #[serde(default)]
    urgency: Option<String>,
    #[serde(default)]
    message_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSuggestion {
    name: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

fn parse_category(raw: Option<&str>) -> TagCategory {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("keyword") => TagCategory::Keyword,
        Some("person") => TagCategory::Person,
        Some("squad") => TagCategory::Squad,
        _ => TagCategory::Custom,
    }
}

/// Strict parse path for tag analysis. Tolerates code fences and prose
/// around the payload by extracting the outermost JSON object, but a
/// payload that still fails to deserialize is an error the caller
/// degrades from.
pub fn parse_tagging(raw: &str) -> Result<TagAnalysis> {
    let body = extract_json_object(raw)
        .ok_or_else(|| anyhow!("no JSON object in model reply"))?;
    let parsed: RawTagAnalysis = serde_json::from_str(body)?;

    let suggestions = parsed
        .tags
        .into_iter()
        .filter(|t| !t.name.trim().is_empty())
        .map(|t| TagSuggestion {
            name: t.name.trim().to_ascii_lowercase(),
            category: parse_category(t.category.as_deref()),
            confidence: t.confidence.unwrap_or(0.0).clamp(0.0, 1.0),
        })
        .collect();

    Ok(TagAnalysis {
        suggestions,
        urgency: Urgency::parse_lenient(parsed.urgency.as_deref().unwrap_or("")),
        message_type: MessageType::parse_lenient(parsed.message_type.as_deref().unwrap_or("")),
    })
}

fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

const SECTION_MARKERS: &[&str] = &[
    "GREETING:",
    "SUMMARY:",
    "KEY_TOPICS:",
    "SENTIMENT:",
    "HIGHLIGHTS:",
    "ACTION_ITEMS:",
];

/// Lenient parse path for marker-delimited summary text. Never fails:
/// absent or malformed sections fall back to their defaults.
pub fn parse_sectioned(raw: &str) -> SectionedReply {
    let mut sections: Vec<(usize, String)> = Vec::new();
    let mut current: Option<usize> = None;

    for line in raw.lines() {
        let trimmed = line.trim();
        let marker = SECTION_MARKERS
            .iter()
            .position(|m| trimmed.to_ascii_uppercase().starts_with(m));
        match marker {
            Some(idx) => {
                let rest = trimmed[SECTION_MARKERS[idx].len()..].trim().to_string();
                sections.push((idx, rest));
                current = Some(sections.len() - 1);
            }
            None => {
                if let Some(i) = current {
                    if !trimmed.is_empty() {
                        let body = &mut sections[i].1;
                        if !body.is_empty() {
                            body.push('\n');
                        }
                        body.push_str(trimmed);
                    }
                }
            }
        }
    }

    let mut reply = SectionedReply::default();
    for (idx, body) in sections {
        let body = body.trim().to_string();
        if body.is_empty() {
            continue;
        }
        match SECTION_MARKERS[idx] {
            "GREETING:" => reply.greeting = Some(body),
            "SUMMARY:" => reply.summary = body,
            "KEY_TOPICS:" => reply.key_topics = parse_list(&body),
            "SENTIMENT:" => reply.sentiment = body.to_ascii_lowercase(),
            "HIGHLIGHTS:" => reply.highlights = parse_list(&body),
            "ACTION_ITEMS:" => reply.action_items = parse_list(&body),
            _ => {}
        }
    }
    reply
}

/// List sections arrive either as comma-separated inline text or as
/// bullet lines.
fn parse_list(body: &str) -> Vec<String> {
    let bullets: Vec<String> = body
        .lines()
        .map(str::trim)
        .filter_map(|l| l.strip_prefix("- ").or_else(|| l.strip_prefix("* ")))
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    if !bullets.is_empty() {
        return bullets;
    }
    body.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
