//! Command router (spec §4.3): turns a finalized human transcript into a
//! floor-control decision, with fuzzy keyword matching and short-term
//! conversational context.

use regex::Regex;
use std::sync::OnceLock;
use va_core::SpeakerId;

/// The floor-control action a routed command resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterAction {
    Address,
    Thinking,
    Broadcast,
    BargeInControl,
    DuckingControl,
}

/// A fully parsed routing decision.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDecision {
    pub raw: String,
    pub normalized: String,
    pub targets: Vec<SpeakerId>,
    pub remainder: String,
    pub action: RouterAction,
    pub duration_ms: Option<u64>,
    pub confidence: f32,
    pub matched_keywords: Vec<String>,
    pub fuzzy_matched: bool,
    pub context_snapshot: CommandContext,
}

/// Rolling context carried between successive calls to [`CommandRouter::route`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandContext {
    pub last_addressed: Option<Vec<SpeakerId>>,
    pub last_action: Option<RouterAction>,
    pub updated_at_ms: Option<u64>,
}

struct AddressKeyword {
    word: &'static str,
    targets: &'static [SpeakerId],
}

const ADDRESS_KEYWORDS: &[AddressKeyword] = &[
    AddressKeyword { word: "claude", targets: &[SpeakerId::Host] },
    AddressKeyword { word: "host", targets: &[SpeakerId::Host] },
    AddressKeyword { word: "guest", targets: &[SpeakerId::Guest] },
    AddressKeyword { word: "basil", targets: &[SpeakerId::Human] },
    AddressKeyword { word: "both", targets: &[SpeakerId::Host, SpeakerId::Guest] },
    AddressKeyword { word: "everyone", targets: &[SpeakerId::Host, SpeakerId::Guest] },
    AddressKeyword { word: "all", targets: &[SpeakerId::Host, SpeakerId::Guest] },
    AddressKeyword { word: "showrunner", targets: &[SpeakerId::Host] },
    AddressKeyword { word: "autopilot", targets: &[SpeakerId::Host] },
];

const THINKING_KEYWORDS: &[&str] = &[
    "thinking", "think", "pause", "wait", "hold", "moment", "beat", "countdown", "processing",
    "consider", "ponder", "reflect",
];

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static router regex is valid")
}

struct KeywordPatterns {
    direct: Regex,
    prefix: Regex,
    inline: Regex,
}

/// Per-keyword address regexes, compiled once and reused across calls.
fn keyword_patterns() -> &'static [KeywordPatterns] {
    static CELL: OnceLock<Vec<KeywordPatterns>> = OnceLock::new();
    CELL.get_or_init(|| {
        ADDRESS_KEYWORDS
            .iter()
            .map(|kw| KeywordPatterns {
                direct: re(&format!(r"(?i)^(hey\s+)?@?{}[:\-,\s]+", regex::escape(kw.word))),
                prefix: re(&format!(r"(?i)^{}[,\s]+", regex::escape(kw.word))),
                inline: re(&format!(r"(?i)[\s,:\-]{}[\s,:\-]", regex::escape(kw.word))),
            })
            .collect()
    })
}

macro_rules! cached_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static CELL: OnceLock<Regex> = OnceLock::new();
            CELL.get_or_init(|| re($pattern))
        }
    };
}

cached_regex!(barge_in_stop_re, r"(?i)\b(stop|halt|interrupt|quiet|silence)\b");
cached_regex!(barge_in_hold_re, r"(?i)\b(hold\s+up|wait\s+a\s+minute)\b");
cached_regex!(barge_in_mute_re, r"(?i)\bmute\s+(everyone|all)\b");
cached_regex!(ducking_lower_re, r"(?i)\b(lower|reduce|quieter|softer)\s+(volume|sound)\b");
cached_regex!(ducking_turn_down_re, r"(?i)\bturn\s+down\b");
cached_regex!(ducking_volume_down_re, r"(?i)\bvolume\s+down\b");

cached_regex!(thinking_mode_re, r"(?i)thinking\s+mode");
cached_regex!(take_a_beat_re, r"(?i)take\s+a\s+(beat|moment|second)");
cached_regex!(need_to_think_re, r"(?i)need\s+to\s+think");
cached_regex!(
    give_time_re,
    r"(?i)give\s+(me|us|them)\s+(\d+)?\s*(seconds?|minutes?|time)"
);
cached_regex!(time_to_think_re, r"(?i)time\s+to\s+(think|process|consider)");
cached_regex!(let_think_re, r"(?i)let\s+(me|us|them)\s+(think|process|ponder)");
cached_regex!(pause_for_re, r"(?i)pause\s+(for|to)");

cached_regex!(continuation_also_re, r"(?i)^(and\s+)?(also|too|as well)");
cached_regex!(continuation_continue_re, r"(?i)^continue");
cached_regex!(continuation_same_re, r"(?i)^same\s+to\s+you");
cached_regex!(continuation_you_too_re, r"(?i)^you\s+too");
cached_regex!(continuation_ditto_re, r"(?i)\b(same|ditto)\b");

cached_regex!(explicit_seconds_re, r"(?i)(\d+)\s*(seconds?|secs?|s\b)");
cached_regex!(explicit_minutes_re, r"(?i)(\d+)\s*(minutes?|mins?|m\b)");
cached_regex!(quick_pause_re, r"(?i)(quick|brief|short)\s+(moment|pause|beat)");
cached_regex!(long_pause_re, r"(?i)long\s+(moment|pause|beat)");

/// Levenshtein edit distance between two lowercase strings (no crate; a
/// direct dynamic-programming implementation).
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (la, lb) = (a.len(), b.len());
    if la == 0 {
        return lb;
    }
    if lb == 0 {
        return la;
    }
    let mut prev: Vec<usize> = (0..=lb).collect();
    let mut curr = vec![0usize; lb + 1];
    for i in 1..=la {
        curr[0] = i;
        for j in 1..=lb {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[lb]
}

fn clamp01(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

/// Stateful router: holds the rolling [`CommandContext`] between calls.
pub struct CommandRouter {
    context: CommandContext,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self {
            context: CommandContext::default(),
        }
    }

    pub fn context(&self) -> &CommandContext {
        &self.context
    }

    /// Route one finalized transcript. Returns `None` for empty or
    /// whitespace-only input (spec §4.3 errors).
    pub fn route(&mut self, raw: &str, now_ms: u64) -> Option<RouteDecision> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }

        if let Some(decision) = self.pre_action_intent(raw, &normalized, now_ms) {
            return Some(decision);
        }

        let (targets, remainder, confidence, matched_keywords, fuzzy_matched) =
            self.parse_address(&normalized);

        let targets = if targets.is_empty() {
            self.contextual_continuation(&normalized)
        } else {
            targets
        };

        let text_for_action = if matched_keywords.is_empty() {
            normalized.as_str()
        } else {
            remainder.as_str()
        };

        let (action, duration_ms) = self.detect_action(text_for_action, &targets);

        let targets = if action == RouterAction::Thinking && targets.is_empty() {
            vec![SpeakerId::Host]
        } else {
            targets
        };

        if action == RouterAction::Address && targets.is_empty() {
            return None;
        }

        if !targets.is_empty() {
            self.context.last_addressed = Some(targets.clone());
            self.context.last_action = Some(action);
            self.context.updated_at_ms = Some(now_ms);
        }

        Some(RouteDecision {
            raw: raw.to_string(),
            normalized,
            targets,
            remainder,
            action,
            duration_ms,
            confidence,
            matched_keywords,
            fuzzy_matched,
            context_snapshot: self.context.clone(),
        })
    }

    fn pre_action_intent(&mut self, raw: &str, normalized: &str, now_ms: u64) -> Option<RouteDecision> {
        let targets = vec![SpeakerId::Host, SpeakerId::Guest];

        let (action, confidence) = if barge_in_mute_re().is_match(normalized) {
            (RouterAction::BargeInControl, 0.85)
        } else if barge_in_stop_re().is_match(normalized) {
            (RouterAction::BargeInControl, 0.8)
        } else if barge_in_hold_re().is_match(normalized) {
            (RouterAction::BargeInControl, 0.75)
        } else if ducking_volume_down_re().is_match(normalized) {
            (RouterAction::DuckingControl, 0.8)
        } else if ducking_lower_re().is_match(normalized) {
            (RouterAction::DuckingControl, 0.8)
        } else if ducking_turn_down_re().is_match(normalized) {
            (RouterAction::DuckingControl, 0.75)
        } else {
            return None;
        };

        self.context.last_addressed = Some(targets.clone());
        self.context.last_action = Some(action);
        self.context.updated_at_ms = Some(now_ms);

        Some(RouteDecision {
            raw: raw.to_string(),
            normalized: normalized.to_string(),
            targets,
            remainder: normalized.to_string(),
            action,
            duration_ms: None,
            confidence,
            matched_keywords: vec![],
            fuzzy_matched: false,
            context_snapshot: self.context.clone(),
        })
    }

    /// Address parsing, first match wins: direct prefix, keyword prefix,
    /// inline, fuzzy.
    fn parse_address(&self, normalized: &str) -> (Vec<SpeakerId>, String, f32, Vec<String>, bool) {
        let patterns = keyword_patterns();

        for (kw, p) in ADDRESS_KEYWORDS.iter().zip(patterns.iter()) {
            if let Some(m) = p.direct.find(normalized) {
                let remainder = normalized[m.end()..].trim().to_string();
                return (kw.targets.to_vec(), remainder, 0.9, vec![kw.word.to_string()], false);
            }
        }

        for (kw, p) in ADDRESS_KEYWORDS.iter().zip(patterns.iter()) {
            if let Some(m) = p.prefix.find(normalized) {
                let remainder = normalized[m.end()..].trim().to_string();
                return (kw.targets.to_vec(), remainder, 0.7, vec![kw.word.to_string()], false);
            }
        }

        let head = &normalized[..normalized.len().min(20)];
        let padded = format!(" {head} ");
        for (kw, p) in ADDRESS_KEYWORDS.iter().zip(patterns.iter()) {
            if let Some(m) = p.inline.find(&padded) {
                // `padded` is `normalized` shifted right by the one leading
                // padding byte, so `m.end()` in `padded`-space is one past
                // the matching position in `normalized`-space.
                let cut = m.end().saturating_sub(1).min(normalized.len());
                let remainder = normalized.get(cut..).unwrap_or("").trim().to_string();
                return (kw.targets.to_vec(), remainder, 0.55, vec![kw.word.to_string()], false);
            }
        }

        let tokens: Vec<&str> = normalized.split_whitespace().take(3).collect();
        let mut best: Option<(f32, &AddressKeyword, &str)> = None;
        for token in &tokens {
            let cleaned: String = token.chars().filter(|c| c.is_alphanumeric()).collect();
            if cleaned.is_empty() {
                continue;
            }
            for kw in ADDRESS_KEYWORDS {
                let d = levenshtein(&cleaned, kw.word);
                if d == 0 || d > 2 {
                    continue;
                }
                let similarity = 1.0 - d as f32 / kw.word.len() as f32;
                if similarity < 0.6 {
                    continue;
                }
                if best.map(|(s, ..)| similarity > s).unwrap_or(true) {
                    best = Some((similarity, kw, token));
                }
            }
        }
        if let Some((similarity, kw, token)) = best {
            let remainder = normalized.replacen(token, "", 1).trim().to_string();
            return (
                kw.targets.to_vec(),
                remainder,
                0.7 * similarity,
                vec![kw.word.to_string()],
                true,
            );
        }

        (vec![], normalized.to_string(), 0.0, vec![], false)
    }

    fn contextual_continuation(&self, normalized: &str) -> Vec<SpeakerId> {
        let matches = continuation_also_re().is_match(normalized)
            || continuation_continue_re().is_match(normalized)
            || continuation_same_re().is_match(normalized)
            || continuation_you_too_re().is_match(normalized)
            || continuation_ditto_re().is_match(normalized);
        if matches {
            self.context.last_addressed.clone().unwrap_or_default()
        } else {
            vec![]
        }
    }

    fn detect_action(&self, text: &str, targets: &[SpeakerId]) -> (RouterAction, Option<u64>) {
        let has_thinking_keyword = THINKING_KEYWORDS.iter().any(|kw| {
            text.split(|c: char| !c.is_alphanumeric())
                .any(|tok| tok == *kw)
        });
        let has_thinking_pattern = thinking_mode_re().is_match(text)
            || take_a_beat_re().is_match(text)
            || need_to_think_re().is_match(text)
            || give_time_re().is_match(text)
            || time_to_think_re().is_match(text)
            || let_think_re().is_match(text)
            || pause_for_re().is_match(text);

        if has_thinking_keyword || has_thinking_pattern {
            (RouterAction::Thinking, Some(self.extract_duration(text)))
        } else if !targets.is_empty() {
            (RouterAction::Address, None)
        } else {
            (RouterAction::Broadcast, None)
        }
    }

    fn extract_duration(&self, text: &str) -> u64 {
        if let Some(caps) = explicit_seconds_re().captures(text) {
            if let Ok(n) = caps[1].parse::<u64>() {
                return n * 1000;
            }
        }
        if let Some(caps) = explicit_minutes_re().captures(text) {
            if let Ok(n) = caps[1].parse::<u64>() {
                return n * 60_000;
            }
        }
        if quick_pause_re().is_match(text) {
            return 10_000;
        }
        if long_pause_re().is_match(text) {
            return 60_000;
        }
        30_000
    }
}

impl Default for CommandRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_none() {
        let mut r = CommandRouter::new();
        assert!(r.route("", 0).is_none());
        assert!(r.route("   ", 0).is_none());
    }

    #[test]
    fn thinking_extraction_scenario() {
        let mut r = CommandRouter::new();
        let d = r.route("Both of you, take 10 seconds to think", 0).unwrap();
        assert_eq!(d.targets, vec![SpeakerId::Host, SpeakerId::Guest]);
        assert_eq!(d.action, RouterAction::Thinking);
        assert_eq!(d.duration_ms, Some(10_000));
        assert!(d.confidence >= 0.7);
    }

    #[test]
    fn fuzzy_host_address_scenario() {
        let mut r = CommandRouter::new();
        let d = r.route("Claud, respond", 0).unwrap();
        assert_eq!(d.targets, vec![SpeakerId::Host]);
        assert!(d.fuzzy_matched);
        assert!(d.confidence > 0.5 && d.confidence <= 0.7);
        assert!(!d.remainder.contains("claud"));
    }

    #[test]
    fn inline_address_remainder_keeps_first_character() {
        let mut r = CommandRouter::new();
        let d = r.route("so claude what do you", 0).unwrap();
        assert_eq!(d.targets, vec![SpeakerId::Host]);
        assert_eq!(d.remainder, "what do you");
    }

    #[test]
    fn context_carry_scenario() {
        let mut r = CommandRouter::new();
        let first = r.route("Claude, hello", 0).unwrap();
        assert_eq!(first.targets, vec![SpeakerId::Host]);

        let second = r.route("Also respond to this", 1000).unwrap();
        assert_eq!(second.targets, vec![SpeakerId::Host]);
        assert_eq!(second.context_snapshot.last_addressed, Some(vec![SpeakerId::Host]));
    }

    #[test]
    fn barge_in_control_bypasses_address_parsing() {
        let mut r = CommandRouter::new();
        let d = r.route("Everyone stop talking now", 0).unwrap();
        assert_eq!(d.action, RouterAction::BargeInControl);
        assert_eq!(d.targets, vec![SpeakerId::Host, SpeakerId::Guest]);
    }

    #[test]
    fn ducking_control_detected() {
        let mut r = CommandRouter::new();
        let d = r.route("please turn down the volume", 0).unwrap();
        assert_eq!(d.action, RouterAction::DuckingControl);
    }

    #[test]
    fn broadcast_when_no_targets_and_no_thinking() {
        let mut r = CommandRouter::new();
        let d = r.route("that's a great point", 0).unwrap();
        assert_eq!(d.action, RouterAction::Broadcast);
        assert!(d.targets.is_empty());
    }

    #[test]
    fn levenshtein_basic_cases() {
        assert_eq!(levenshtein("claude", "claude"), 0);
        assert_eq!(levenshtein("claude", "claud"), 1);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
    }

    #[test]
    fn router_is_idempotent_given_same_context() {
        let mut r1 = CommandRouter::new();
        let mut r2 = CommandRouter::new();
        let a = r1.route("Claude, hello", 0).unwrap();
        let b = r2.route("Claude, hello", 0).unwrap();
        assert_eq!(a.targets, b.targets);
        assert_eq!(a.action, b.action);
        assert_eq!(a.confidence, b.confidence);
    }
}
