//! Pattern grammar for the backend's free-text broadcast lines.
//!
//! A single line can carry several facts at once (agent attribution plus a
//! task transition), so matching returns every signal found, in a fixed order.

use crate::AgentId;
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSignal {
    Dispatched {
        pokemon: String,
        location: String,
        element: String,
    },
    AgentLog {
        agent_id: AgentId,
        agent_name: String,
        text: String,
    },
    TaskProcessing {
        agent_id: AgentId,
        pokemon: String,
        location: String,
    },
    TaskCaptured {
        agent_id: AgentId,
        pokemon: String,
        location: String,
        element: String,
    },
    TaskFailed {
        agent_id: AgentId,
        pokemon: String,
        location: String,
    },
    EscapeObserved,
}

impl LogSignal {
    pub fn agent_id(&self) -> Option<AgentId> {
        match self {
            LogSignal::AgentLog { agent_id, .. }
            | LogSignal::TaskProcessing { agent_id, .. }
            | LogSignal::TaskCaptured { agent_id, .. }
            | LogSignal::TaskFailed { agent_id, .. } => Some(*agent_id),
            LogSignal::Dispatched { .. } | LogSignal::EscapeObserved => None,
        }
    }
}

pub struct LogGrammar {
    spawned: Regex,
    attributed: Regex,
    processing: Regex,
    captured: Regex,
    failed: Regex,
}

impl LogGrammar {
    pub fn new() -> Self {
        Self {
            spawned: compile(r"Spawned\s+(\w+)\s+pokemon:\s+(\w+)\s+at\s+(.+)\s+with"),
            attributed: compile(r"\[(\d+) ID \| ([^\]]+)\] (.+)"),
            processing: compile(r"Agent processing task: (\w+) at (.+)"),
            captured: compile(r"Agent captured (\w+) at (.+) \[(\w+)\]!"),
            failed: compile(r"Agent failed task: (\w+) at (.+)"),
        }
    }

    pub fn shared() -> &'static LogGrammar {
        static GRAMMAR: OnceLock<LogGrammar> = OnceLock::new();
        GRAMMAR.get_or_init(LogGrammar::new)
    }

    /// Scan one message. Order of the result: dispatch, attribution, task
    /// transition, escape.
    pub fn scan(&self, message: &str) -> Vec<LogSignal> {
        let mut signals = Vec::new();

        if let Some(caps) = self.spawned.captures(message) {
            signals.push(LogSignal::Dispatched {
                element: caps[1].to_string(),
                pokemon: caps[2].to_string(),
                location: caps[3].trim().to_string(),
            });
        }

        if let Some((agent_id, agent_name, text)) = self.attribution(message) {
            signals.push(LogSignal::AgentLog {
                agent_id,
                agent_name,
                text,
            });

            if let Some(caps) = self.processing.captures(message) {
                signals.push(LogSignal::TaskProcessing {
                    agent_id,
                    pokemon: caps[1].to_string(),
                    location: caps[2].trim().to_string(),
                });
            }
            if let Some(caps) = self.captured.captures(message) {
                signals.push(LogSignal::TaskCaptured {
                    agent_id,
                    pokemon: caps[1].to_string(),
                    location: caps[2].trim().to_string(),
                    element: caps[3].to_string(),
                });
            }
            if let Some(caps) = self.failed.captures(message) {
                signals.push(LogSignal::TaskFailed {
                    agent_id,
                    pokemon: caps[1].to_string(),
                    location: caps[2].trim().to_string(),
                });
            }
        }

        if message.contains("Missed opportunity") || message.contains("escaped") {
            signals.push(LogSignal::EscapeObserved);
        }

        signals
    }

    fn attribution(&self, message: &str) -> Option<(AgentId, String, String)> {
        let caps = self.attributed.captures(message)?;
        // Ids too large for the local id type cannot name a tracked agent.
        let agent_id = caps[1].parse::<AgentId>().ok()?;
        Some((agent_id, caps[2].to_string(), caps[3].to_string()))
    }
}

impl Default for LogGrammar {
    fn default() -> Self {
        Self::new()
    }
}

pub fn scan(message: &str) -> Vec<LogSignal> {
    LogGrammar::shared().scan(message)
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid regex")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_line_yields_dispatch() {
        let signals = scan("Spawned fire pokemon: Charmander at Route 3 with capture time 4s");
        assert_eq!(
            signals,
            vec![LogSignal::Dispatched {
                pokemon: "Charmander".to_string(),
                location: "Route 3".to_string(),
                element: "fire".to_string(),
            }]
        );
    }

    #[test]
    fn attributed_processing_line_yields_log_then_transition() {
        let signals = scan("[7 ID | Rocket Agent] Agent processing task: Pikachu at Cerulean City");
        assert_eq!(signals.len(), 2);
        assert_eq!(
            signals[0],
            LogSignal::AgentLog {
                agent_id: 7,
                agent_name: "Rocket Agent".to_string(),
                text: "Agent processing task: Pikachu at Cerulean City".to_string(),
            }
        );
        assert_eq!(
            signals[1],
            LogSignal::TaskProcessing {
                agent_id: 7,
                pokemon: "Pikachu".to_string(),
                location: "Cerulean City".to_string(),
            }
        );
    }

    #[test]
    fn captured_line_extracts_element() {
        let signals =
            scan("[7 ID | Rocket Agent]  Agent captured Pikachu at Cerulean City [lighting]!");
        assert_eq!(
            signals.last(),
            Some(&LogSignal::TaskCaptured {
                agent_id: 7,
                pokemon: "Pikachu".to_string(),
                location: "Cerulean City".to_string(),
                element: "lighting".to_string(),
            })
        );
    }

    #[test]
    fn failed_line_is_not_an_escape() {
        let signals = scan("[2 ID | Jessie] Agent failed task: Eevee at Viridian Forest");
        assert!(matches!(
            signals.last(),
            Some(LogSignal::TaskFailed { agent_id: 2, .. })
        ));
        assert!(!signals.contains(&LogSignal::EscapeObserved));
    }

    #[test]
    fn every_matching_transition_fires_in_order() {
        let signals = scan(
            "[7 ID | Rocket Agent] Agent processing task: Pikachu at Route 1; \
             Agent captured Eevee at Route 2 [normal]!",
        );
        let kinds: Vec<&str> = signals
            .iter()
            .map(|signal| match signal {
                LogSignal::AgentLog { .. } => "log",
                LogSignal::TaskProcessing { .. } => "processing",
                LogSignal::TaskCaptured { .. } => "captured",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["log", "processing", "captured"]);
        assert!(matches!(
            &signals[2],
            LogSignal::TaskCaptured { pokemon, element, .. } if pokemon == "Eevee" && element == "normal"
        ));
    }

    #[test]
    fn transition_without_attribution_is_ignored() {
        let signals = scan("Agent processing task: Pikachu at Cerulean City");
        assert!(signals.is_empty());
    }

    #[test]
    fn escape_markers() {
        assert_eq!(
            scan("[DLQ] Missed opportunity! Onix escaped from Pewter (rock)"),
            vec![LogSignal::EscapeObserved]
        );
        assert_eq!(scan("Psyduck escaped"), vec![LogSignal::EscapeObserved]);
        assert!(scan("Client registered!").is_empty());
    }

    #[test]
    fn oversized_agent_id_is_not_attributed() {
        let signals = scan("[99999999999999999999999 ID | Ghost] Agent processing task: Gastly at Tower");
        assert!(signals.is_empty());
    }
}
