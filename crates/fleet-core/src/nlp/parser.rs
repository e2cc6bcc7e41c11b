//! Slot extraction, scoring, and alternative-ranking for the pattern
//! table in [`super::patterns`].

use super::context::ContextMemory;
use super::patterns::{self, PatternEntry, CATEGORY_ORDER};
use crate::errors::{ErrorCode, FleetError};
use crate::ids::DroneId;
use crate::intent::{Action, Alternative, Intent, SlotValue, required_slots};
use std::collections::HashMap;

/// Minimum confidence an alternative must clear to be surfaced
/// (the next two candidates scoring above 0.4).
const ALTERNATIVE_THRESHOLD: f64 = 0.4;
const MAX_ALTERNATIVES: usize = 2;
/// Default step applied to relative altitude follow-ups ("a bit higher").
const RELATIVE_ALTITUDE_STEP_CM: f64 = 30.0;

pub struct NlParser {
    context: ContextMemory,
}

impl Default for NlParser {
    fn default() -> Self {
        Self::new()
    }
}

impl NlParser {
    pub fn new() -> Self {
        Self {
            context: ContextMemory::new(),
        }
    }

    /// Parse a single utterance into an [`Intent`]. Deterministic and
    /// side-effect free apart from updating the bounded context window
    /// used to resolve the *next* utterance.
    pub fn parse(&mut self, text: &str) -> Result<Intent, FleetError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(FleetError::new(
                ErrorCode::InvalidParameter,
                "empty command text",
            ));
        }
        if patterns::contains_banned_content(trimmed) {
            return Err(FleetError::new(
                ErrorCode::ForbiddenPattern,
                format!("rejected input matching a banned pattern: {trimmed:?}"),
            )
            .with_user_message("That command was rejected for security reasons."));
        }

        let mut candidates: Vec<(usize, &'static PatternEntry, HashMap<String, SlotValue>, f64)> =
            Vec::new();

        for entry in patterns::table() {
            let Some(captures) = entry.captures(trimmed) else {
                continue;
            };
            let mut params = HashMap::new();
            let mut drone_id = None;
            for name in entry.capture_names() {
                let Some(m) = captures.name(name) else {
                    continue;
                };
                let raw = m.as_str();
                if name == "drone_id" {
                    drone_id = DroneId::parse(raw).ok();
                    continue;
                }
                if let Some((key, value)) = normalize_slot(name, raw, &captures) {
                    params.insert(key, value);
                }
            }
            let confidence = score(entry.action, entry.weight, &params);
            let category_rank = CATEGORY_ORDER
                .iter()
                .position(|c| *c == entry.category)
                .unwrap_or(usize::MAX);
            if let Some(d) = drone_id {
                params.insert("__drone_id".to_string(), SlotValue::Text(d.to_string()));
            }
            candidates.push((category_rank, entry, params, confidence));
        }

        if candidates.is_empty() {
            return Err(FleetError::new(
                ErrorCode::InvalidParameter,
                format!("no recognized command pattern for input: {trimmed:?}"),
            )
            .with_user_message("I didn't understand that command.")
            .with_suggestion("Try a command like \"move forward 50 cm\" or \"take off\"."));
        }

        candidates.sort_by(|a, b| {
            b.3.partial_cmp(&a.3)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        let (_, best_entry, mut best_params, mut best_confidence) = {
            let (rank, entry, params, confidence) = candidates.remove(0);
            (rank, entry, params, confidence)
        };

        let target_drone = best_params
            .remove("__drone_id")
            .and_then(|v| v.as_text().and_then(|s| DroneId::parse(s).ok()))
            .or_else(|| self.context.last_target_drone());

        apply_context_inheritance(
            best_entry.action,
            &mut best_params,
            &self.context,
            &mut best_confidence,
        );

        let required = required_slots(best_entry.action);
        let missing_slots: Vec<String> = required
            .iter()
            .filter(|slot| !best_params.contains_key(**slot))
            .map(|s| s.to_string())
            .collect();

        let alternatives = candidates
            .into_iter()
            .filter(|(_, entry, _, confidence)| {
                *confidence >= ALTERNATIVE_THRESHOLD && entry.action != best_entry.action
            })
            .take(MAX_ALTERNATIVES)
            .map(|(_, entry, params, confidence)| Alternative {
                action: entry.action,
                parameters: params,
                confidence,
            })
            .collect();

        let intent = Intent {
            action: best_entry.action,
            parameters: best_params,
            confidence: best_confidence,
            alternatives,
            missing_slots,
            target_drone,
        };

        self.context.record(&intent);
        Ok(intent)
    }

    /// Parse a single utterance that may chain several commands together
    /// ("connect and take off and move right 50cm and land", or the
    /// Japanese te-form equivalent "...に接続して離陸して...") into one
    /// [`Intent`] per clause, in the order given. Each clause is parsed
    /// against the same context window in sequence, so a drone id or
    /// altitude named in an earlier clause is inherited by a later one
    /// exactly as it would be across two separate calls to [`Self::parse`].
    pub fn parse_sequence(&mut self, text: &str) -> Result<Vec<Intent>, FleetError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(FleetError::new(ErrorCode::InvalidParameter, "empty command text"));
        }
        if patterns::contains_banned_content(trimmed) {
            return Err(FleetError::new(
                ErrorCode::ForbiddenPattern,
                format!("rejected input matching a banned pattern: {trimmed:?}"),
            )
            .with_user_message("That command was rejected for security reasons."));
        }

        let clauses = split_clauses(trimmed);
        clauses.iter().map(|clause| self.parse(clause)).collect()
    }
}

/// Splits a compound command into individually-parseable clauses.
///
/// Japanese te-form chaining ("して") is split right after each
/// occurrence, so the conjunction stays attached to the clause it
/// belongs to (patterns that expect an optional "...して" suffix, e.g.
/// movement and connect, still match). English falls back to splitting
/// on literal " and "/" then " conjunctions. A string with neither is
/// treated as a single clause.
fn split_clauses(text: &str) -> Vec<String> {
    if text.contains("して") {
        let mut segments = Vec::new();
        let mut last_end = 0;
        for (idx, _) in text.match_indices("して") {
            let end = idx + "して".len();
            let segment = text[last_end..end].trim();
            if !segment.is_empty() {
                segments.push(segment.to_string());
            }
            last_end = end;
        }
        let tail = text[last_end..].trim();
        if !tail.is_empty() {
            segments.push(tail.to_string());
        }
        if !segments.is_empty() {
            return segments;
        }
    }

    let lower = text.to_lowercase();
    if lower.contains(" and ") || lower.contains(" then ") {
        return text
            .split([',', ';'])
            .flat_map(|s| split_on_conjunction(s))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    vec![text.to_string()]
}

fn split_on_conjunction(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = text;
    loop {
        let lower = rest.to_lowercase();
        let next = [" and then ", " and ", " then "]
            .iter()
            .filter_map(|sep| lower.find(sep).map(|idx| (idx, sep.len())))
            .min_by_key(|(idx, _)| *idx);
        match next {
            Some((idx, len)) => {
                out.push(&rest[..idx]);
                rest = &rest[idx + len..];
            }
            None => {
                out.push(rest);
                break;
            }
        }
    }
    out
}

fn score(action: Action, weight: f64, params: &HashMap<String, SlotValue>) -> f64 {
    let required = required_slots(action);
    if required.is_empty() {
        return weight;
    }
    let filled = required.iter().filter(|s| params.contains_key(**s)).count();
    weight * (filled as f64 / required.len() as f64)
}

/// Resolve relative follow-ups ("go a bit higher") against the last
/// absolute value recorded for the same action. Only altitude currently
/// has a relative form.
fn apply_context_inheritance(
    action: Action,
    params: &mut HashMap<String, SlotValue>,
    context: &ContextMemory,
    confidence: &mut f64,
) {
    if action != Action::Altitude || params.contains_key("target") {
        return;
    }
    let Some(rel) = params.remove("rel") else {
        return;
    };
    let Some(base) = context.last_number_for(Action::Altitude, "target") else {
        params.insert("rel".to_string(), rel);
        return;
    };
    let delta = match rel.as_text() {
        Some("higher") => RELATIVE_ALTITUDE_STEP_CM,
        Some("lower") => -RELATIVE_ALTITUDE_STEP_CM,
        _ => 0.0,
    };
    params.insert("target".to_string(), SlotValue::Number(base + delta));
    *confidence = (*confidence + 1.0).min(1.0).max(0.6);
}

fn normalize_slot(
    name: &str,
    raw: &str,
    captures: &regex::Captures<'_>,
) -> Option<(String, SlotValue)> {
    match name {
        "direction" => Some(("direction".to_string(), SlotValue::Text(normalize_direction(raw)))),
        "distance" => {
            let value = raw.parse::<f64>().ok()?;
            let unit = captures.name("unit").map(|m| m.as_str());
            Some(("distance".to_string(), SlotValue::Number(to_centimeters(value, unit))))
        }
        "angle" => {
            let value = raw.parse::<f64>().ok()?;
            Some(("angle".to_string(), SlotValue::Number(value)))
        }
        "target" => {
            let value = raw.parse::<f64>().ok()?;
            let unit = captures.name("unit").map(|m| m.as_str());
            Some(("target".to_string(), SlotValue::Number(to_centimeters(value, unit))))
        }
        "model_id" => Some(("model_id".to_string(), SlotValue::Text(raw.to_string()))),
        "rel" => Some(("rel".to_string(), SlotValue::Text(raw.to_lowercase()))),
        "unit" => None,
        _ => None,
    }
}

fn normalize_direction(raw: &str) -> String {
    match raw {
        "forward" | "前" => "forward",
        "backward" | "back" | "後ろ" | "後" => "back",
        "left" | "左" => "left",
        "right" | "右" => "right",
        "up" | "上" => "up",
        "down" | "下" => "down",
        "clockwise" | "cw" | "時計回り" => "clockwise",
        "counterclockwise" | "counter-clockwise" | "ccw" | "反時計回り" => "counter_clockwise",
        other => other,
    }
    .to_string()
}

fn to_centimeters(value: f64, unit: Option<&str>) -> f64 {
    match unit {
        Some("m") | Some("meters") | Some("メートル") => value * 100.0,
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_takeoff() {
        let mut parser = NlParser::new();
        let intent = parser.parse("take off").unwrap();
        assert_eq!(intent.action, Action::Takeoff);
        assert!(intent.is_complete());
    }

    #[test]
    fn parses_move_with_unit_conversion() {
        let mut parser = NlParser::new();
        let intent = parser.parse("move forward 2 m").unwrap();
        assert_eq!(intent.action, Action::Move);
        assert_eq!(intent.number("distance"), Some(200.0));
        assert_eq!(intent.text("direction"), Some("forward"));
    }

    #[test]
    fn parses_japanese_rotation() {
        let mut parser = NlParser::new();
        let intent = parser.parse("時計回りに90度回転して").unwrap();
        assert_eq!(intent.action, Action::Rotate);
        assert_eq!(intent.number("angle"), Some(90.0));
    }

    #[test]
    fn incomplete_command_reports_missing_slots() {
        let mut parser = NlParser::new();
        let intent = parser.parse("track").unwrap_err();
        assert_eq!(intent.code, ErrorCode::InvalidParameter);
    }

    #[test]
    fn relative_altitude_inherits_last_absolute_target() {
        let mut parser = NlParser::new();
        parser.parse("set altitude to 100 cm").unwrap();
        let intent = parser.parse("go a little higher").unwrap();
        assert_eq!(intent.action, Action::Altitude);
        assert_eq!(intent.number("target"), Some(130.0));
    }

    #[test]
    fn banned_pattern_is_rejected() {
        let mut parser = NlParser::new();
        let err = parser.parse("<script>alert(1)</script>").unwrap_err();
        assert_eq!(err.code, ErrorCode::ForbiddenPattern);
    }

    #[test]
    fn remembers_target_drone_across_commands() {
        let mut parser = NlParser::new();
        parser.parse("connect to drone D1").unwrap();
        let intent = parser.parse("take off").unwrap();
        assert_eq!(intent.target_drone.unwrap().as_str(), "D1");
    }

    #[test]
    fn splits_japanese_compound_command_into_four_intents() {
        let mut parser = NlParser::new();
        let intents = parser
            .parse_sequence("ドローンD1に接続して離陸して右に50センチ移動して着陸")
            .unwrap();
        let actions: Vec<Action> = intents.iter().map(|i| i.action).collect();
        assert_eq!(
            actions,
            vec![Action::Connect, Action::Takeoff, Action::Move, Action::Land]
        );
        assert!(intents.iter().all(|i| i.target_drone.as_ref().unwrap().as_str() == "D1"));
        assert_eq!(intents[2].text("direction"), Some("right"));
        assert_eq!(intents[2].number("distance"), Some(50.0));
    }

    #[test]
    fn splits_english_compound_command() {
        let mut parser = NlParser::new();
        let intents = parser.parse_sequence("take off and move forward 30 cm and land").unwrap();
        let actions: Vec<Action> = intents.iter().map(|i| i.action).collect();
        assert_eq!(actions, vec![Action::Takeoff, Action::Move, Action::Land]);
    }

    #[test]
    fn single_clause_sequence_matches_parse() {
        let mut parser = NlParser::new();
        let intents = parser.parse_sequence("take off").unwrap();
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].action, Action::Takeoff);
    }
}
