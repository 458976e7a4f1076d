//! Barge-in manager (spec §4.4): mediates overlapping speech between the
//! three parties, with grace periods, priority-based authorization, and
//! ducking callbacks.

use std::collections::{HashMap, VecDeque};
use va_core::SpeakerId;

const HISTORY_CAP: usize = 100;

/// Interruption handling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BargeInMode {
    Immediate,
    Graceful,
    SentenceComplete,
    Disabled,
}

impl Default for BargeInMode {
    fn default() -> Self {
        BargeInMode::Graceful
    }
}

/// Relative interruption authority. The human is not represented here —
/// per spec it is implicitly priority 100 and always allowed to interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low = 25,
    Medium = 50,
    High = 75,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

const HUMAN_PRIORITY: i32 = 100;

#[derive(Debug, Clone, Copy)]
pub struct BargeInConfig {
    pub mode: BargeInMode,
    pub grace_period_ms: u64,
    pub sentence_completion_max_ms: u64,
    pub ducking_enabled: bool,
    pub ducking_lead_time_ms: u64,
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            mode: BargeInMode::Graceful,
            grace_period_ms: 300,
            sentence_completion_max_ms: 2000,
            ducking_enabled: true,
            ducking_lead_time_ms: 150,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SpeakerEntry {
    speaking: bool,
    priority: Priority,
    started_at_ms: u64,
    last_activity_at_ms: u64,
    allow_interruption: bool,
}

impl Default for SpeakerEntry {
    fn default() -> Self {
        Self {
            speaking: false,
            priority: Priority::Medium,
            started_at_ms: 0,
            last_activity_at_ms: 0,
            allow_interruption: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BargeInEventKind {
    Start,
    Complete,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct BargeInEvent {
    pub kind: BargeInEventKind,
    pub timestamp_ms: u64,
    pub interrupter: SpeakerId,
    pub interrupted: Vec<SpeakerId>,
    pub mode: BargeInMode,
    pub confidence: f32,
    pub grace_period_used: bool,
    pub ducking_applied: bool,
}

#[derive(Debug, Clone)]
struct PendingBargeIn {
    interrupter: SpeakerId,
    confidence: f32,
    targets: Vec<SpeakerId>,
    scheduled_at_ms: u64,
    grace_period_used: bool,
}

/// The directives the manager issues back to its host (the Session). The
/// manager itself never calls out; the caller drives timers and applies
/// these directives, matching the spec's "ports, not callbacks" redesign.
#[derive(Debug, Clone)]
pub enum BargeInDirective {
    /// Start a ducking ramp (or stop one) for the given targets.
    Ducking { targets: Vec<SpeakerId>, on: bool },
    /// A grace timer should be (re)scheduled, to fire `expire_pending` at
    /// `deadline_ms` unless cancelled first.
    ScheduleTimer { deadline_ms: u64 },
    /// Any previously scheduled timer should be cancelled.
    CancelTimer,
    /// The interruption happened: these speakers are no longer speaking.
    BargeInStarted(BargeInEvent),
    BargeInCompleted(BargeInEvent),
    BargeInCancelled(BargeInEvent),
}

/// Barge-in state machine. Pure and synchronous: it emits directives for
/// its caller to execute (send ducking requests, arm timers) rather than
/// performing I/O itself, per spec §5 ("pure computation must not suspend").
pub struct BargeInManager {
    config: BargeInConfig,
    speakers: HashMap<SpeakerId, SpeakerEntry>,
    pending: Option<PendingBargeIn>,
    history: VecDeque<BargeInEvent>,
}

impl BargeInManager {
    pub fn new(config: BargeInConfig) -> Self {
        Self {
            config,
            speakers: HashMap::new(),
            pending: None,
            history: VecDeque::with_capacity(HISTORY_CAP),
        }
    }

    pub fn set_priority(&mut self, speaker: SpeakerId, priority: Priority) {
        self.entry(speaker).priority = priority;
    }

    pub fn set_allow_interruption(&mut self, speaker: SpeakerId, allow: bool) {
        self.entry(speaker).allow_interruption = allow;
    }

    fn entry(&mut self, speaker: SpeakerId) -> &mut SpeakerEntry {
        self.speakers.entry(speaker).or_default()
    }

    fn priority_value(&self, speaker: SpeakerId) -> i32 {
        if speaker == SpeakerId::Human {
            HUMAN_PRIORITY
        } else {
            self.speakers.get(&speaker).copied().unwrap_or_default().priority as i32
        }
    }

    /// A speaker started talking. Returns directives to execute, in order.
    pub fn on_speech_start(&mut self, speaker: SpeakerId, confidence: f32, now_ms: u64) -> Vec<BargeInDirective> {
        {
            let e = self.entry(speaker);
            e.speaking = true;
            e.started_at_ms = now_ms;
            e.last_activity_at_ms = now_ms;
        }

        if self.config.mode == BargeInMode::Disabled {
            return vec![];
        }

        let active_others: Vec<SpeakerId> = self
            .speakers
            .iter()
            .filter(|(&id, e)| id != speaker && e.speaking)
            .map(|(&id, _)| id)
            .collect();
        if active_others.is_empty() {
            return vec![];
        }

        let targets: Vec<SpeakerId> = active_others
            .into_iter()
            .filter(|id| self.speakers.get(id).map(|e| e.allow_interruption).unwrap_or(true))
            .collect();
        if targets.is_empty() {
            return vec![];
        }

        let interrupter_priority = self.priority_value(speaker);
        let authorized = speaker == SpeakerId::Human
            || targets.iter().all(|t| interrupter_priority > self.priority_value(*t));
        if !authorized {
            return vec![];
        }

        match self.config.mode {
            BargeInMode::Immediate => self.execute_interruption(speaker, confidence, targets, now_ms, false),
            BargeInMode::Graceful => {
                self.schedule_pending(speaker, confidence, targets, now_ms, self.config.grace_period_ms)
            }
            BargeInMode::SentenceComplete => self.schedule_pending(
                speaker,
                confidence,
                targets,
                now_ms,
                self.config.sentence_completion_max_ms,
            ),
            BargeInMode::Disabled => unreachable!(),
        }
    }

    fn schedule_pending(
        &mut self,
        interrupter: SpeakerId,
        confidence: f32,
        targets: Vec<SpeakerId>,
        now_ms: u64,
        timeout_ms: u64,
    ) -> Vec<BargeInDirective> {
        let mut directives = vec![];
        if self.config.ducking_enabled {
            directives.push(BargeInDirective::Ducking {
                targets: targets.clone(),
                on: true,
            });
        }
        let deadline = now_ms + timeout_ms;
        self.pending = Some(PendingBargeIn {
            interrupter,
            confidence,
            targets,
            scheduled_at_ms: deadline,
            grace_period_used: true,
        });
        directives.push(BargeInDirective::ScheduleTimer { deadline_ms: deadline });
        directives
    }

    fn execute_interruption(
        &mut self,
        interrupter: SpeakerId,
        confidence: f32,
        targets: Vec<SpeakerId>,
        now_ms: u64,
        grace_period_used: bool,
    ) -> Vec<BargeInDirective> {
        for t in &targets {
            if let Some(e) = self.speakers.get_mut(t) {
                e.speaking = false;
            }
        }
        let start_event = BargeInEvent {
            kind: BargeInEventKind::Start,
            timestamp_ms: now_ms,
            interrupter,
            interrupted: targets.clone(),
            mode: self.config.mode,
            confidence,
            grace_period_used,
            ducking_applied: self.config.ducking_enabled,
        };
        let complete_event = BargeInEvent {
            kind: BargeInEventKind::Complete,
            ..start_event.clone()
        };
        self.push_history(start_event.clone());
        self.push_history(complete_event.clone());
        vec![
            BargeInDirective::BargeInStarted(start_event),
            BargeInDirective::BargeInCompleted(complete_event),
        ]
    }

    /// A previously scheduled timer fired. No-op if the interrupter already
    /// stopped speaking (cancelled via `on_speech_end`) or there is no
    /// longer a pending entry matching `interrupter`.
    pub fn expire_pending(&mut self, now_ms: u64) -> Vec<BargeInDirective> {
        let Some(pending) = self.pending.take() else {
            return vec![];
        };
        let still_speaking = self
            .speakers
            .get(&pending.interrupter)
            .map(|e| e.speaking)
            .unwrap_or(false);
        if !still_speaking {
            return vec![];
        }
        self.execute_interruption(
            pending.interrupter,
            pending.confidence,
            pending.targets,
            now_ms,
            pending.grace_period_used,
        )
    }

    /// A speaker stopped talking. Cancels any pending barge-in they were
    /// driving.
    pub fn on_speech_end(&mut self, speaker: SpeakerId, _confidence: f32, now_ms: u64) -> Vec<BargeInDirective> {
        if let Some(e) = self.speakers.get_mut(&speaker) {
            e.speaking = false;
            e.last_activity_at_ms = now_ms;
        }

        let Some(pending) = &self.pending else {
            return vec![];
        };
        if pending.interrupter != speaker {
            return vec![];
        }
        let pending = self.pending.take().unwrap();
        let cancelled_event = BargeInEvent {
            kind: BargeInEventKind::Cancelled,
            timestamp_ms: now_ms,
            interrupter: pending.interrupter,
            interrupted: pending.targets.clone(),
            mode: self.config.mode,
            confidence: pending.confidence,
            grace_period_used: pending.grace_period_used,
            ducking_applied: self.config.ducking_enabled,
        };
        self.push_history(cancelled_event.clone());

        let mut directives = vec![];
        if self.config.ducking_enabled {
            directives.push(BargeInDirective::Ducking {
                targets: pending.targets,
                on: false,
            });
        }
        directives.push(BargeInDirective::BargeInCancelled(cancelled_event));
        directives
    }

    fn push_history(&mut self, event: BargeInEvent) {
        self.history.push_back(event);
        while self.history.len() > HISTORY_CAP {
            self.history.pop_front();
        }
    }

    pub fn history(&self) -> &VecDeque<BargeInEvent> {
        &self.history
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Derived statistics over the bounded history.
    pub fn stats(&self) -> BargeInStats {
        let completions = self
            .history
            .iter()
            .filter(|e| e.kind == BargeInEventKind::Complete)
            .count();
        let mut mode_tally: HashMap<&'static str, usize> = HashMap::new();
        let mut confidence_sum = 0.0f32;
        let mut confidence_n = 0usize;
        let mut grace_used = 0usize;
        for e in self.history.iter().filter(|e| e.kind == BargeInEventKind::Complete) {
            let key = match e.mode {
                BargeInMode::Immediate => "immediate",
                BargeInMode::Graceful => "graceful",
                BargeInMode::SentenceComplete => "sentence_complete",
                BargeInMode::Disabled => "disabled",
            };
            *mode_tally.entry(key).or_insert(0) += 1;
            confidence_sum += e.confidence;
            confidence_n += 1;
            if e.grace_period_used {
                grace_used += 1;
            }
        }
        BargeInStats {
            total_completions: completions,
            mode_tally,
            average_confidence: if confidence_n > 0 {
                confidence_sum / confidence_n as f32
            } else {
                0.0
            },
            grace_period_usage_rate: if completions > 0 {
                grace_used as f32 / completions as f32
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct BargeInStats {
    pub total_completions: usize,
    pub mode_tally: HashMap<&'static str, usize>,
    pub average_confidence: f32,
    pub grace_period_usage_rate: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn barge_in_cancellation_scenario() {
        let mut mgr = BargeInManager::new(BargeInConfig::default());
        mgr.on_speech_start(SpeakerId::Host, 0.9, 0);

        let directives = mgr.on_speech_start(SpeakerId::Human, 0.85, 0);
        assert!(matches!(directives[0], BargeInDirective::Ducking { on: true, .. }));
        assert!(matches!(directives[1], BargeInDirective::ScheduleTimer { .. }));

        let cancel_directives = mgr.on_speech_end(SpeakerId::Human, 0.85, 150);
        assert!(matches!(cancel_directives[0], BargeInDirective::Ducking { on: false, .. }));
        assert!(matches!(cancel_directives[1], BargeInDirective::BargeInCancelled(_)));

        let expired = mgr.expire_pending(300);
        assert!(expired.is_empty(), "cancelled pending must not re-fire");
        assert_eq!(mgr.stats().total_completions, 0);
    }

    #[test]
    fn graceful_barge_in_scenario() {
        let mut mgr = BargeInManager::new(BargeInConfig::default());
        mgr.on_speech_start(SpeakerId::Host, 0.9, 0);
        mgr.on_speech_start(SpeakerId::Human, 0.85, 0);

        let directives = mgr.expire_pending(300);
        assert!(matches!(directives[0], BargeInDirective::BargeInStarted(_)));
        assert!(matches!(directives[1], BargeInDirective::BargeInCompleted(_)));

        let stats = mgr.stats();
        assert_eq!(stats.total_completions, 1);
        assert_eq!(stats.grace_period_usage_rate, 1.0);
    }

    #[test]
    fn immediate_mode_completes_in_same_turn() {
        let mut mgr = BargeInManager::new(BargeInConfig {
            mode: BargeInMode::Immediate,
            ..BargeInConfig::default()
        });
        mgr.on_speech_start(SpeakerId::Host, 0.9, 0);
        let directives = mgr.on_speech_start(SpeakerId::Human, 0.95, 10);
        assert!(matches!(directives[0], BargeInDirective::BargeInStarted(_)));
        assert!(matches!(directives[1], BargeInDirective::BargeInCompleted(_)));
    }

    #[test]
    fn disabled_mode_never_interrupts() {
        let mut mgr = BargeInManager::new(BargeInConfig {
            mode: BargeInMode::Disabled,
            ..BargeInConfig::default()
        });
        mgr.on_speech_start(SpeakerId::Host, 0.9, 0);
        let directives = mgr.on_speech_start(SpeakerId::Human, 0.95, 10);
        assert!(directives.is_empty());
    }

    #[test]
    fn lower_priority_agent_cannot_interrupt_higher_priority() {
        let mut mgr = BargeInManager::new(BargeInConfig {
            mode: BargeInMode::Immediate,
            ..BargeInConfig::default()
        });
        mgr.set_priority(SpeakerId::Host, Priority::High);
        mgr.set_priority(SpeakerId::Guest, Priority::Low);
        mgr.on_speech_start(SpeakerId::Host, 0.9, 0);
        let directives = mgr.on_speech_start(SpeakerId::Guest, 0.9, 10);
        assert!(directives.is_empty());
    }

    #[test]
    fn history_bounded_to_100() {
        let mut mgr = BargeInManager::new(BargeInConfig {
            mode: BargeInMode::Immediate,
            ..BargeInConfig::default()
        });
        for t in 0..150u64 {
            mgr.on_speech_start(SpeakerId::Host, 0.9, t * 10);
            mgr.on_speech_start(SpeakerId::Human, 0.9, t * 10 + 1);
            mgr.on_speech_end(SpeakerId::Human, 0.9, t * 10 + 2);
        }
        assert!(mgr.history().len() <= HISTORY_CAP);
    }
}
