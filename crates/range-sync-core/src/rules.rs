//! Rule matching and the rule-set document shape.
//!
//! [`RuleMatcher`] is pure and stateless over a frozen [`RuleSet`]:
//! matching an event never mutates anything and never fails. Loading
//! a new rule set is an atomic pointer publish — any match already in
//! flight keeps using the `Arc` it first read.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::model::{Action, Event, Rule, RuleMatch};

/// An immutable, named collection of rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    pub name: String,
    pub rules: Vec<Rule>,
}

/// On-disk document shape for a rule set (YAML or JSON). Field names
/// here (`send_to`) are the document's vocabulary; [`RuleSetDocument::validate_and_build`]
/// translates them into the core's [`Action`] vocabulary (`target`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSetDocument {
    pub name: String,
    pub rules: Vec<RuleDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDocument {
    pub when: RuleMatchDocument,
    pub then: Vec<ActionDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleMatchDocument {
    pub event_type: String,
    #[serde(default)]
    pub from: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDocument {
    pub send_to: String,
    pub command: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub compensate_command: Option<String>,
    #[serde(default)]
    pub compensate_params: Option<serde_json::Value>,
}

impl RuleSetDocument {
    /// Validate the document per the loader contract (non-empty
    /// `event_type`, at least one action per rule, non-empty
    /// `send_to`/`command` per action) and translate it into a
    /// [`RuleSet`]. Collects every problem instead of failing on the
    /// first, so an operator sees the whole picture in one pass.
    pub fn validate_and_build(self) -> Result<RuleSet, Vec<String>> {
        let mut problems = Vec::new();
        let mut rules = Vec::with_capacity(self.rules.len());

        for (rule_index, rule_doc) in self.rules.into_iter().enumerate() {
            if rule_doc.when.event_type.trim().is_empty() {
                problems.push(format!("rules[{rule_index}].when.event_type is empty"));
            }
            if rule_doc.then.is_empty() {
                problems.push(format!("rules[{rule_index}].then has no actions"));
            }

            let mut actions = Vec::with_capacity(rule_doc.then.len());
            for (action_index, action_doc) in rule_doc.then.into_iter().enumerate() {
                if action_doc.send_to.trim().is_empty() {
                    problems.push(format!(
                        "rules[{rule_index}].then[{action_index}].send_to is empty"
                    ));
                }
                if action_doc.command.trim().is_empty() {
                    problems.push(format!(
                        "rules[{rule_index}].then[{action_index}].command is empty"
                    ));
                }
                actions.push(Action {
                    target: action_doc.send_to,
                    command: action_doc.command,
                    params: action_doc.params,
                    compensate_command: action_doc.compensate_command,
                    compensate_params: action_doc.compensate_params,
                });
            }

            rules.push(Rule {
                when: RuleMatch {
                    event_type: rule_doc.when.event_type,
                    from: rule_doc.when.from,
                },
                then: actions,
            });
        }

        if problems.is_empty() {
            Ok(RuleSet {
                name: self.name,
                rules,
            })
        } else {
            Err(problems)
        }
    }
}

/// Pure, stateless matcher over a frozen [`RuleSet`]. Swapping the set
/// is an atomic `Arc` publish; readers never block on a writer and
/// never observe a torn update.
pub struct RuleMatcher {
    current: RwLock<Arc<RuleSet>>,
}

impl RuleMatcher {
    pub fn new(rule_set: RuleSet) -> Self {
        RuleMatcher {
            current: RwLock::new(Arc::new(rule_set)),
        }
    }

    /// Atomically publish a new rule set. Any match already reading
    /// the old `Arc` finishes against it; subsequent matches see the
    /// new one.
    pub fn swap(&self, rule_set: RuleSet) {
        *self.current.write().unwrap() = Arc::new(rule_set);
    }

    /// The concatenation, in declared rule order, of the `then`-lists
    /// of every rule whose predicate matches `event`. An empty result
    /// is a normal outcome, not an error.
    pub fn matching_actions(&self, event: &Event) -> Vec<Action> {
        let rule_set = self.current.read().unwrap().clone();
        rule_set
            .rules
            .iter()
            .filter(|rule| rule_matches(&rule.when, event))
            .flat_map(|rule| rule.then.iter().cloned())
            .collect()
    }

    pub fn rule_set_name(&self) -> String {
        self.current.read().unwrap().name.clone()
    }
}

fn rule_matches(when: &RuleMatch, event: &Event) -> bool {
    if when.event_type != event.event_type {
        return false;
    }
    match &when.from {
        Some(from) => from == &event.source,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_rule_set() -> RuleSet {
        RuleSet {
            name: "test-scenario".to_string(),
            rules: vec![Rule {
                when: RuleMatch {
                    event_type: "attack.detected".to_string(),
                    from: Some("cyber".to_string()),
                },
                then: vec![Action {
                    target: "vr".to_string(),
                    command: "show_alert".to_string(),
                    params: json!({"msg": "!"}),
                    compensate_command: None,
                    compensate_params: None,
                }],
            }],
        }
    }

    #[test]
    fn matches_event_type_and_source() {
        let matcher = RuleMatcher::new(sample_rule_set());
        let event = Event {
            source: "cyber".to_string(),
            event_type: "attack.detected".to_string(),
            payload: json!({}),
        };
        let actions = matcher.matching_actions(&event);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].target, "vr");
    }

    #[test]
    fn no_match_on_wrong_source() {
        let matcher = RuleMatcher::new(sample_rule_set());
        let event = Event {
            source: "sensor".to_string(),
            event_type: "attack.detected".to_string(),
            payload: json!({}),
        };
        assert!(matcher.matching_actions(&event).is_empty());
    }

    #[test]
    fn no_match_on_wrong_event_type_produces_empty_not_error() {
        let matcher = RuleMatcher::new(sample_rule_set());
        let event = Event {
            source: "cyber".to_string(),
            event_type: "nothing.relevant".to_string(),
            payload: json!({}),
        };
        assert!(matcher.matching_actions(&event).is_empty());
    }

    #[test]
    fn rule_with_no_from_matches_any_source() {
        let mut rule_set = sample_rule_set();
        rule_set.rules[0].when.from = None;
        let matcher = RuleMatcher::new(rule_set);
        let event = Event {
            source: "whoever".to_string(),
            event_type: "attack.detected".to_string(),
            payload: json!({}),
        };
        assert_eq!(matcher.matching_actions(&event).len(), 1);
    }

    #[test]
    fn swap_replaces_the_whole_set_atomically() {
        let matcher = RuleMatcher::new(sample_rule_set());
        matcher.swap(RuleSet {
            name: "v2".to_string(),
            rules: vec![],
        });
        assert_eq!(matcher.rule_set_name(), "v2");
        let event = Event {
            source: "cyber".to_string(),
            event_type: "attack.detected".to_string(),
            payload: json!({}),
        };
        assert!(matcher.matching_actions(&event).is_empty());
    }

    #[test]
    fn document_validation_rejects_empty_event_type_and_empty_then() {
        let doc = RuleSetDocument {
            name: "bad".to_string(),
            rules: vec![RuleDocument {
                when: RuleMatchDocument {
                    event_type: "".to_string(),
                    from: None,
                },
                then: vec![],
            }],
        };
        let problems = doc.validate_and_build().unwrap_err();
        assert_eq!(problems.len(), 2);
    }

    #[test]
    fn document_validation_rejects_empty_send_to_and_command() {
        let doc = RuleSetDocument {
            name: "bad".to_string(),
            rules: vec![RuleDocument {
                when: RuleMatchDocument {
                    event_type: "x".to_string(),
                    from: None,
                },
                then: vec![ActionDocument {
                    send_to: "".to_string(),
                    command: "".to_string(),
                    params: json!({}),
                    compensate_command: None,
                    compensate_params: None,
                }],
            }],
        };
        let problems = doc.validate_and_build().unwrap_err();
        assert_eq!(problems.len(), 2);
    }

    #[test]
    fn document_validation_accepts_a_well_formed_document() {
        let doc = RuleSetDocument {
            name: "good".to_string(),
            rules: vec![RuleDocument {
                when: RuleMatchDocument {
                    event_type: "attack.detected".to_string(),
                    from: Some("cyber".to_string()),
                },
                then: vec![ActionDocument {
                    send_to: "vr".to_string(),
                    command: "show_alert".to_string(),
                    params: json!({}),
                    compensate_command: Some("hide_alert".to_string()),
                    compensate_params: None,
                }],
            }],
        };
        let rule_set = doc.validate_and_build().unwrap();
        assert_eq!(rule_set.name, "good");
        assert_eq!(rule_set.rules[0].then[0].target, "vr");
    }
}
