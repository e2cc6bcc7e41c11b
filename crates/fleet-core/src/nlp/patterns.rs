//! The declarative pattern table: `(regex, action, weight)` triples
//! compiled once at process startup instead of an if/elif matching ladder.
//!
//! Every regex uses named capture groups; group names double as slot
//! names, so extraction in [`super::parser`] is generic rather than
//! per-pattern.

use crate::intent::Action;
use regex::Regex;
use std::sync::OnceLock;

/// The order categories are tried in when two patterns tie on confidence —
/// earlier categories win.
pub const CATEGORY_ORDER: &[&str] = &[
    "connect",
    "emergency",
    "flight_control",
    "movement",
    "rotation",
    "altitude",
    "camera",
    "vision",
    "status",
];

pub struct PatternEntry {
    pub category: &'static str,
    pub action: Action,
    pub weight: f64,
    pub source: &'static str,
}

impl PatternEntry {
    fn regex(&self) -> &'static Regex {
        regex_for(self.source)
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex().is_match(text)
    }

    pub fn captures<'t>(&self, text: &'t str) -> Option<regex::Captures<'t>> {
        self.regex().captures(text)
    }

    /// Named capture groups declared in this pattern's regex, e.g.
    /// `["direction", "distance", "unit"]`.
    pub fn capture_names(&self) -> Vec<&'static str> {
        self.regex().capture_names().flatten().collect()
    }
}

fn regex_for(source: &'static str) -> &'static Regex {
    static CACHE: OnceLock<std::sync::Mutex<std::collections::HashMap<&'static str, &'static Regex>>> =
        OnceLock::new();
    let cache = CACHE.get_or_init(|| std::sync::Mutex::new(std::collections::HashMap::new()));
    let mut guard = cache.lock().expect("pattern regex cache poisoned");
    if let Some(re) = guard.get(source) {
        return re;
    }
    let compiled: &'static Regex = Box::leak(Box::new(
        Regex::new(source).expect("built-in NL pattern failed to compile"),
    ));
    guard.insert(source, compiled);
    compiled
}

/// The full table, ordered within each category roughly from most to
/// least specific. English patterns carry full weight; bilingual (JA)
/// variants are weighted slightly lower because transliteration leaves
/// more ambiguity in word boundaries.
pub fn table() -> &'static [PatternEntry] {
    static TABLE: OnceLock<Vec<PatternEntry>> = OnceLock::new();
    TABLE.get_or_init(|| {
        vec![
            PatternEntry {
                category: "connect",
                action: Action::Connect,
                weight: 1.0,
                source: r"(?i)^connect(?:\s+to)?(?:\s+drone\s+(?P<drone_id>[a-z0-9_-]+))?$",
            },
            PatternEntry {
                category: "connect",
                action: Action::Disconnect,
                weight: 1.0,
                source: r"(?i)^disconnect(?:\s+from)?(?:\s+drone\s+(?P<drone_id>[a-z0-9_-]+))?$",
            },
            PatternEntry {
                category: "connect",
                action: Action::Connect,
                weight: 0.9,
                source: r"^(?:ドローン(?P<drone_id>[A-Za-z0-9_-]+)に)?接続(?:して)?$",
            },
            PatternEntry {
                category: "connect",
                action: Action::Disconnect,
                weight: 0.9,
                source: r"^(?:ドローン(?P<drone_id>[A-Za-z0-9_-]+)(?:から)?)?切断(?:して)?$",
            },
            PatternEntry {
                category: "emergency",
                action: Action::Emergency,
                weight: 1.0,
                source: r"(?i)^(?:emergency\s*stop|kill\s+it|abort)$",
            },
            PatternEntry {
                category: "emergency",
                action: Action::Emergency,
                weight: 0.95,
                source: r"^緊急停止(?:して)?$",
            },
            PatternEntry {
                category: "flight_control",
                action: Action::Takeoff,
                weight: 1.0,
                source: r"(?i)^(?:take\s*off|launch)$",
            },
            PatternEntry {
                category: "flight_control",
                action: Action::Land,
                weight: 1.0,
                source: r"(?i)^(?:land|touch\s*down)$",
            },
            PatternEntry {
                category: "flight_control",
                action: Action::Takeoff,
                weight: 0.9,
                source: r"^離陸(?:して)?$",
            },
            PatternEntry {
                category: "flight_control",
                action: Action::Land,
                weight: 0.9,
                source: r"^着陸(?:して)?$",
            },
            PatternEntry {
                category: "movement",
                action: Action::Move,
                weight: 1.0,
                source: r"(?i)^(?:go\s+|move\s+)?(?P<direction>forward|backward|back|left|right|up|down)\s+(?P<distance>\d+(?:\.\d+)?)\s*(?P<unit>centimeters|cm|meters|m)?$",
            },
            PatternEntry {
                category: "movement",
                action: Action::Move,
                weight: 0.85,
                source: r"^(?P<direction>前|後ろ|後|左|右|上|下)に?(?P<distance>\d+(?:\.\d+)?)\s*(?P<unit>センチ|メートル|cm|m)?(?:進んで|移動して)?$",
            },
            PatternEntry {
                category: "rotation",
                action: Action::Rotate,
                weight: 1.0,
                source: r"(?i)^(?:rotate|turn)\s+(?P<direction>clockwise|cw|counterclockwise|counter-clockwise|ccw)\s+(?P<angle>\d+(?:\.\d+)?)\s*(?:deg(?:rees)?)?$",
            },
            PatternEntry {
                category: "rotation",
                action: Action::Rotate,
                weight: 0.85,
                source: r"^(?P<direction>時計回り|反時計回り)に(?P<angle>\d+(?:\.\d+)?)度?回転(?:して)?$",
            },
            PatternEntry {
                category: "altitude",
                action: Action::Altitude,
                weight: 1.0,
                source: r"(?i)^(?:set\s+)?altitude(?:\s+to)?\s+(?P<target>\d+(?:\.\d+)?)\s*(?P<unit>centimeters|cm|meters|m)?$",
            },
            PatternEntry {
                category: "altitude",
                action: Action::Altitude,
                weight: 0.7,
                source: r"(?i)^go\s+(?:a\s+)?(?:little\s+|bit\s+)?(?P<rel>higher|lower)$",
            },
            PatternEntry {
                category: "camera",
                action: Action::Photo,
                weight: 1.0,
                source: r"(?i)^(?:take\s+(?:a\s+)?photo|capture\s+(?:an?\s+)?image)$",
            },
            PatternEntry {
                category: "camera",
                action: Action::Streaming,
                weight: 1.0,
                source: r"(?i)^start(?:\s+video)?\s+stream(?:ing)?$",
            },
            PatternEntry {
                category: "camera",
                action: Action::Streaming,
                weight: 1.0,
                source: r"(?i)^stop(?:\s+video)?\s+stream(?:ing)?$",
            },
            PatternEntry {
                category: "vision",
                action: Action::Detection,
                weight: 1.0,
                source: r"(?i)^(?:detect|find)\s+(?:objects?|people)$",
            },
            PatternEntry {
                category: "vision",
                action: Action::Tracking,
                weight: 1.0,
                source: r"(?i)^track\s+(?P<model_id>[a-z0-9_-]+)$",
            },
            PatternEntry {
                category: "vision",
                action: Action::LearningData,
                weight: 1.0,
                source: r"(?i)^(?:collect|gather)\s+learning\s+data$",
            },
            PatternEntry {
                category: "status",
                action: Action::Status,
                weight: 1.0,
                source: r"(?i)^(?:status|report|how\s+is\s+(?:it|the\s+drone))$",
            },
        ]
    })
}

/// Crude rejection list for obviously hostile input before any pattern
/// matching is attempted. This is a floor,
/// not a substitute for input validation at the HTTP/MCP boundary.
pub fn contains_banned_content(text: &str) -> bool {
    let lower = text.to_lowercase();
    const BANNED: &[&str] = &["<script", "javascript:", "eval(", "../", "..\\"];
    BANNED.iter().any(|needle| lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_compiles_every_pattern() {
        for entry in table() {
            assert!(entry.regex().as_str().len() > 0);
        }
    }

    #[test]
    fn flags_script_injection() {
        assert!(contains_banned_content("<script>alert(1)</script>"));
        assert!(!contains_banned_content("move forward 50 cm"));
    }
}
