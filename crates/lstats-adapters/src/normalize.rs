//! Raw record to canonical match. Pure: no I/O, no clock.

use lstats_core::{CanonicalMatch, Platform};
use serde_json::Value;
use thiserror::Error;

use crate::encode::{unwrap_extended, Object};
use crate::rules::{apply_rules, ChampionCatalog, RuleContext, MATCH_RULES, PARTICIPANT_RULES, STATS_RULES};

/// Structurally unusable input. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("garbage input{}: {reason}", .rule.map(|r| format!(" ({r})")).unwrap_or_default())]
pub struct GarbageInputError {
    pub reason: String,
    pub rule: Option<&'static str>,
}

impl GarbageInputError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            rule: None,
        }
    }

    pub(crate) fn in_rule(mut self, rule: &'static str) -> Self {
        self.rule.get_or_insert(rule);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    champions: ChampionCatalog,
}

impl Normalizer {
    pub fn new(champions: ChampionCatalog) -> Self {
        Self { champions }
    }

    pub fn champions(&self) -> &ChampionCatalog {
        &self.champions
    }

    pub fn normalize(&self, raw: &Value) -> Result<CanonicalMatch, GarbageInputError> {
        let Value::Object(raw) = raw else {
            return Err(GarbageInputError::new("raw match record is not an object"));
        };
        let mut doc = raw.clone();

        let mut ctx = RuleContext {
            champions: &self.champions,
            match_platform: None,
        };
        apply_rules(MATCH_RULES, &mut doc, &ctx)?;
        ctx.match_platform = doc
            .get("platform")
            .and_then(Value::as_str)
            .and_then(|p| p.parse::<Platform>().ok());

        let Some(Value::Array(participants)) = doc.get_mut("participants") else {
            return Err(GarbageInputError::new("match has no participant list"));
        };
        for (index, participant) in participants.iter_mut().enumerate() {
            let Value::Object(participant) = participant else {
                return Err(GarbageInputError::new(format!("participants[{index}] is not an object")));
            };
            apply_rules(PARTICIPANT_RULES, participant, &ctx)?;
            if let Some(Value::Object(stats)) = participant.get_mut("stats") {
                apply_rules(STATS_RULES, stats, &ctx)?;
            }
        }

        let Value::Object(doc) = unwrap_extended(Value::Object(doc)) else {
            return Err(GarbageInputError::new("match document collapsed to a scalar"));
        };
        check_rosters(&doc)?;

        CanonicalMatch::from_document(doc).map_err(|err| GarbageInputError::new(err.to_string()))
    }
}

/// Two equal, non-empty sides, and at least one human.
fn check_rosters(doc: &Object) -> Result<(), GarbageInputError> {
    let participants = doc
        .get("participants")
        .and_then(Value::as_array)
        .ok_or_else(|| GarbageInputError::new("match has no participant list"))?;
    let (mut blue, mut red, mut humans) = (0usize, 0usize, 0usize);
    for participant in participants {
        match participant.get("teamId").and_then(Value::as_i64) {
            Some(100) => blue += 1,
            Some(200) => red += 1,
            _ => return Err(GarbageInputError::new("participant has no team side")),
        }
        if participant.get("isBot").and_then(Value::as_bool) != Some(true) {
            humans += 1;
        }
    }
    if blue == 0 || blue != red {
        return Err(GarbageInputError::new(format!(
            "uneven rosters: {blue} blue vs {red} red"
        )));
    }
    if humans == 0 {
        return Err(GarbageInputError::new("every participant is a bot"));
    }
    Ok(())
}
