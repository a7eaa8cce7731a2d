//! Ordered rule tables that repair each historical record shape.
//!
//! Every rule is a no-op when the shape it repairs is absent, so the full
//! table runs against every record regardless of vintage. Order matters:
//! later rules may rely on fields produced by earlier ones.

use std::collections::BTreeMap;
use std::fmt;

use lstats_core::{Continent, Platform, Region, BOT_ACCOUNT_ID, BOT_IDENTITY, BOT_PUUID};
use serde_json::{json, Value};

use crate::encode::{
    float_value, is_blank, remove_all, rename, scalar_f64, scalar_i64, scalar_str, set_fallback, Object,
};
use crate::normalize::GarbageInputError;

/// Champion ids above this are not real champions.
pub const MAX_CHAMPION_ID: i64 = 3000;

pub const PLAYER_SCORE_SLOTS: usize = 12;

pub const PING_FIELDS: &[&str] = &[
    "allInPings",
    "assistMePings",
    "baitPings",
    "basicPings",
    "commandPings",
    "dangerPings",
    "enemyMissingPings",
    "enemyVisionPings",
    "getBackPings",
    "holdPings",
    "needVisionPings",
    "onMyWayPings",
    "pushPings",
    "retreatPings",
    "visionClearedPings",
];

/// Fields that stay on the participant when a flat current-API participant is
/// split into participant + stat block.
const PARTICIPANT_LEVEL_FIELDS: &[&str] = &[
    "participantId",
    "puuid",
    "summonerId",
    "summonerName",
    "summonerLevel",
    "profileIcon",
    "riotIdGameName",
    "riotIdName",
    "riotIdTagline",
    "isBot",
    "platformId",
    "championId",
    "championName",
    "teamId",
    "teamPosition",
    "individualPosition",
    "perks",
    "missions",
    "challenges",
    "placement",
    "subteamPlacement",
    "playerSubteamId",
    "playerAugment1",
    "playerAugment2",
    "playerAugment3",
    "playerAugment4",
    "playerAugment5",
    "playerAugment6",
    "eligibleForProgression",
    "teamEarlySurrendered",
    "totalAllyJungleMinionsKilled",
    "totalEnemyJungleMinionsKilled",
];

const LEGACY_PARTICIPANT_FIELDS: &[&str] = &[
    "timeline",
    "accountId",
    "currentAccountId",
    "currentPlatformId",
    "rankLastSeason",
    "matchHistoryUri",
    "highestAchievedSeasonTier",
];

const LEGACY_STAT_SCORES: &[&str] = &[
    "combatPlayerScore",
    "objectivePlayerScore",
    "totalPlayerScore",
    "totalScoreRank",
    "unrealKills",
    "altarsCaptured",
    "altarsNeutralized",
    "nodeCapture",
    "nodeCaptureAssist",
    "nodeNeutralize",
    "nodeNeutralizeAssist",
    "teamObjective",
];

const NULLABLE_OBJECTIVE_COUNTERS: &[&str] = &[
    "turretKills",
    "inhibitorKills",
    "nexusKills",
    "turretTakedowns",
    "inhibitorTakedowns",
    "nexusTakedowns",
];

const ECONOMY_FIELDS: &[&str] = &["itemsPurchased", "consumablesPurchased", "bountyLevel"];

const QUEUE_IDS: &[(&str, i64)] = &[
    ("CUSTOM", 0),
    ("NORMAL_5x5_DRAFT", 400),
    ("RANKED_SOLO_5x5", 420),
    ("NORMAL_5x5_BLIND", 430),
    ("RANKED_FLEX_SR", 440),
    ("ARAM", 450),
    ("ARAM_5x5", 450),
    ("NORMAL_5V5_QUICKPLAY", 490),
    ("CLASH", 700),
    ("BOT_5x5_INTRO", 830),
    ("BOT_5x5_BEGINNER", 840),
    ("BOT_5x5_INTERMEDIATE", 850),
    ("URF", 900),
    ("ONE_FOR_ALL", 1020),
    ("ARENA", 1700),
];

/// Record shape a rule repairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Vintage {
    /// Documents exported from the legacy document database.
    MongoExport,
    /// Records keyed by a region code instead of a platform.
    V3Region,
    /// Object-model dumps from the v4 client library.
    V4,
    /// `metadata` + `info` envelopes from the current match API.
    V5Api,
    /// Invariants every canonical record satisfies.
    Current,
}

impl fmt::Display for Vintage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Vintage::MongoExport => "mongo-export",
            Vintage::V3Region => "v3-region",
            Vintage::V4 => "v4",
            Vintage::V5Api => "v5-api",
            Vintage::Current => "current",
        };
        f.write_str(name)
    }
}

/// Champion id to display name, for records that predate `championName`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChampionCatalog {
    names: BTreeMap<i64, String>,
}

impl ChampionCatalog {
    pub fn new(names: impl IntoIterator<Item = (i64, String)>) -> Self {
        Self {
            names: names.into_iter().collect(),
        }
    }

    /// Reads `{"266": "Aatrox", ...}`.
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        use anyhow::Context;
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let raw: BTreeMap<String, String> =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        let mut names = BTreeMap::new();
        for (id, name) in raw {
            let id = id
                .parse::<i64>()
                .with_context(|| format!("champion id {id:?} in {}", path.display()))?;
            names.insert(id, name);
        }
        Ok(Self { names })
    }

    pub fn name(&self, champion_id: i64) -> Option<&str> {
        self.names.get(&champion_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Read-only inputs available to every rule.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub champions: &'a ChampionCatalog,
    /// Platform of the enclosing match, once the match table has run.
    pub match_platform: Option<Platform>,
}

pub type RuleFn = fn(&mut Object, &RuleContext<'_>) -> Result<(), GarbageInputError>;

#[derive(Clone, Copy)]
pub struct Rule {
    pub vintage: Vintage,
    pub name: &'static str,
    pub apply: RuleFn,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("vintage", &self.vintage)
            .field("name", &self.name)
            .finish()
    }
}

pub fn apply_rules(rules: &[Rule], doc: &mut Object, ctx: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    for rule in rules {
        (rule.apply)(doc, ctx).map_err(|err| err.in_rule(rule.name))?;
    }
    Ok(())
}

pub const MATCH_RULES: &[Rule] = &[
    Rule { vintage: Vintage::MongoExport, name: "drop-object-id", apply: drop_object_id },
    Rule { vintage: Vintage::V5Api, name: "flatten-api-envelope", apply: flatten_api_envelope },
    Rule { vintage: Vintage::V4, name: "rename-platform-id", apply: rename_platform_id },
    Rule { vintage: Vintage::V3Region, name: "region-to-platform", apply: region_to_platform },
    Rule { vintage: Vintage::V4, name: "split-composite-identity", apply: split_composite_identity },
    Rule { vintage: Vintage::Current, name: "reject-zero-identity", apply: reject_zero_identity },
    Rule { vintage: Vintage::Current, name: "resolve-routing", apply: resolve_routing },
    Rule { vintage: Vintage::V4, name: "drop-season", apply: drop_season },
    Rule { vintage: Vintage::V4, name: "default-metadata", apply: default_match_metadata },
    Rule { vintage: Vintage::V4, name: "derive-durations", apply: derive_durations },
    Rule { vintage: Vintage::V4, name: "derive-timestamps", apply: derive_timestamps },
    Rule { vintage: Vintage::V4, name: "queue-name-to-id", apply: queue_name_to_id },
    Rule { vintage: Vintage::V4, name: "prune-team-rosters", apply: prune_team_rosters },
];

pub const PARTICIPANT_RULES: &[Rule] = &[
    Rule { vintage: Vintage::V5Api, name: "relocate-flat-stats", apply: relocate_flat_stats },
    Rule { vintage: Vintage::Current, name: "reject-unknown-champion", apply: reject_unknown_champion },
    Rule { vintage: Vintage::V4, name: "mark-bots", apply: mark_bots },
    Rule { vintage: Vintage::V4, name: "resolve-participant-platform", apply: resolve_participant_platform },
    Rule { vintage: Vintage::MongoExport, name: "drop-legacy-participant-fields", apply: drop_legacy_participant_fields },
    Rule { vintage: Vintage::V4, name: "participant-id-fallback", apply: participant_id_fallback },
    Rule { vintage: Vintage::V4, name: "riot-id-fallback", apply: riot_id_fallback },
    Rule { vintage: Vintage::V4, name: "champion-name-from-catalog", apply: champion_name_from_catalog },
    Rule { vintage: Vintage::V4, name: "stat-runes-to-stat-perks", apply: stat_runes_to_stat_perks },
    Rule { vintage: Vintage::V4, name: "legacy-runes", apply: legacy_runes },
    Rule { vintage: Vintage::V4, name: "side-to-team-id", apply: side_to_team_id },
    Rule { vintage: Vintage::Current, name: "require-stat-block", apply: require_stat_block },
    Rule { vintage: Vintage::V4, name: "player-scores-to-participant", apply: player_scores_to_participant },
    Rule { vintage: Vintage::V4, name: "default-pings", apply: default_pings },
];

pub const STATS_RULES: &[Rule] = &[
    Rule { vintage: Vintage::V4, name: "drop-legacy-scores", apply: drop_legacy_scores },
    Rule { vintage: Vintage::V4, name: "null-objective-counters", apply: null_objective_counters },
    Rule { vintage: Vintage::V4, name: "rename-legacy-stats", apply: rename_legacy_stats },
    Rule { vintage: Vintage::V4, name: "default-economy", apply: default_economy },
];

fn garbage(reason: impl Into<String>) -> GarbageInputError {
    GarbageInputError::new(reason)
}

fn parse_platform(text: &str) -> Option<Platform> {
    text.parse::<Platform>()
        .or_else(|_| text.parse::<Region>().map(Region::platform))
        .ok()
}

// ---- match table ----

fn drop_object_id(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    doc.remove("_id");
    Ok(())
}

fn flatten_api_envelope(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    let Some(info) = doc.remove("info") else {
        return Ok(());
    };
    let Value::Object(info) = info else {
        return Err(garbage("api envelope `info` is not an object"));
    };
    let metadata = doc.remove("metadata");
    for (key, value) in info {
        let key = match key.as_str() {
            "gameId" => "id",
            "platformId" => "platform",
            "queueId" => "queue",
            "gameMode" => "mode",
            "gameType" => "type",
            "gameVersion" => "version",
            "mapId" => "map",
            "gameName" => "name",
            other => other,
        };
        doc.insert(key.to_string(), value);
    }
    if let Some(creation_ms) = doc.remove("gameCreation").as_ref().and_then(scalar_f64) {
        doc.insert("creation".into(), float_value(creation_ms / 1000.0));
    }
    if let Some(key) = metadata
        .as_ref()
        .and_then(|m| m.get("matchId"))
        .and_then(scalar_str)
    {
        if let Some(number) = key.rsplit_once('_').and_then(|(_, n)| n.parse::<i64>().ok()) {
            set_fallback(doc, "matchId", json!(number));
        }
    }
    Ok(())
}

fn rename_platform_id(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    rename(doc, "platformId", "platform");
    Ok(())
}

fn region_to_platform(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    let Some(region) = doc.remove("region") else {
        return Ok(());
    };
    if doc.contains_key("platform") {
        return Ok(());
    }
    let text = scalar_str(&region).ok_or_else(|| garbage("region is not a string"))?;
    let platform = parse_platform(&text).ok_or_else(|| garbage(format!("unknown region {text:?}")))?;
    doc.insert("platform".into(), json!(platform.as_str()));
    Ok(())
}

fn split_composite_identity(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    let Some(Value::String(composite)) = doc.get("id").cloned() else {
        return Ok(());
    };
    let (prefix, number) = match composite.rsplit_once('_') {
        Some((prefix, number)) => (Some(prefix), number),
        None => (None, composite.as_str()),
    };
    let number = number
        .trim()
        .parse::<i64>()
        .map_err(|_| garbage(format!("unparseable match identity {composite:?}")))?;
    doc.insert("id".into(), json!(number));
    set_fallback(doc, "matchId", json!(number));
    if let Some(prefix) = prefix {
        if !doc.contains_key("platform") {
            let platform = parse_platform(prefix)
                .ok_or_else(|| garbage(format!("unknown platform in match identity {composite:?}")))?;
            doc.insert("platform".into(), json!(platform.as_str()));
        }
    }
    Ok(())
}

fn reject_zero_identity(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    let id = doc.get("id").and_then(scalar_i64).unwrap_or(0);
    if id == 0 {
        return Err(garbage("match identity resolves to zero"));
    }
    set_fallback(doc, "matchId", json!(id));
    Ok(())
}

fn resolve_routing(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    let text = doc
        .get("platform")
        .and_then(scalar_str)
        .ok_or_else(|| garbage("match has no platform"))?;
    let platform = parse_platform(&text).ok_or_else(|| garbage(format!("unknown platform {text:?}")))?;
    doc.insert("platform".into(), json!(platform.as_str()));

    let continent = match doc.get("continent").and_then(scalar_str) {
        Some(text) => {
            let continent = text
                .parse::<Continent>()
                .map_err(|_| garbage(format!("unknown continent {text:?}")))?;
            if continent != platform.continent() {
                return Err(garbage(format!(
                    "platform {platform} is not served by continent {continent}"
                )));
            }
            continent
        }
        None => platform.continent(),
    };
    doc.insert("continent".into(), json!(continent.as_str()));
    Ok(())
}

fn drop_season(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    doc.remove("season");
    Ok(())
}

fn default_match_metadata(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    set_fallback(doc, "name", json!(""));
    set_fallback(doc, "privateGame", json!(false));
    set_fallback(doc, "tournamentCode", json!(""));
    set_fallback(doc, "endOfGameResult", json!("GameComplete"));
    Ok(())
}

fn derive_durations(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    let seconds = doc
        .get("duration")
        .or_else(|| doc.get("gameDuration"))
        .and_then(|v| scalar_i64(v).or_else(|| scalar_f64(v).map(|f| f.round() as i64)))
        .ok_or_else(|| garbage("match has no duration"))?;
    set_fallback(doc, "duration", json!(seconds));
    set_fallback(doc, "gameDuration", json!(seconds));
    Ok(())
}

fn derive_timestamps(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    let start_ms = doc.get("gameStartTimestamp").and_then(scalar_i64);
    let creation = doc
        .get("creation")
        .and_then(scalar_f64)
        .or_else(|| start_ms.map(|ms| ms as f64 / 1000.0));
    let start = doc.get("start").and_then(scalar_f64).or(creation);
    let (Some(creation), Some(start)) = (creation, start) else {
        return Err(garbage("match has no start time"));
    };
    doc.insert("creation".into(), float_value(creation));
    doc.insert("start".into(), float_value(start));

    let start_ms = match start_ms {
        Some(ms) => ms,
        None => seconds_to_millis(start).ok_or_else(|| garbage(format!("start time {start} out of range")))?,
    };
    set_fallback(doc, "gameStartTimestamp", json!(start_ms));
    if !doc.contains_key("gameEndTimestamp") {
        let duration = doc.get("duration").and_then(scalar_i64).unwrap_or(0);
        let end_ms = duration
            .checked_mul(1000)
            .and_then(|d| start_ms.checked_add(d))
            .ok_or_else(|| garbage(format!("duration {duration} out of range")))?;
        doc.insert("gameEndTimestamp".into(), json!(end_ms));
    }
    Ok(())
}

fn seconds_to_millis(seconds: f64) -> Option<i64> {
    let ms = (seconds * 1000.0).round();
    // i64::MAX as f64 rounds up to 2^63, which is itself out of range.
    (ms.is_finite() && ms >= i64::MIN as f64 && ms < i64::MAX as f64).then_some(ms as i64)
}

fn queue_name_to_id(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    let Some(Value::String(name)) = doc.get("queue") else {
        return Ok(());
    };
    let id = QUEUE_IDS
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(name))
        .map(|(_, id)| *id)
        .ok_or_else(|| garbage(format!("unknown queue {name:?}")))?;
    doc.insert("queue".into(), json!(id));
    Ok(())
}

fn prune_team_rosters(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    let Some(Value::Array(teams)) = doc.get_mut("teams") else {
        return Ok(());
    };
    for team in teams.iter_mut() {
        if let Value::Object(team) = team {
            team.remove("participants");
            side_to_team_id_inner(team)?;
        }
    }
    Ok(())
}

// ---- participant table ----

fn relocate_flat_stats(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    if doc.contains_key("stats") {
        return Ok(());
    }
    let moved: Vec<String> = doc
        .keys()
        .filter(|key| {
            !PARTICIPANT_LEVEL_FIELDS.contains(&key.as_str())
                && !PING_FIELDS.contains(&key.as_str())
                && !key.starts_with("playerScore")
        })
        .cloned()
        .collect();
    let mut stats = Object::new();
    for key in moved {
        if let Some(value) = doc.remove(&key) {
            stats.insert(key, value);
        }
    }
    doc.insert("stats".into(), Value::Object(stats));
    Ok(())
}

fn reject_unknown_champion(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    let champion = doc
        .get("championId")
        .and_then(scalar_i64)
        .ok_or_else(|| garbage("participant has no champion"))?;
    if !(1..=MAX_CHAMPION_ID).contains(&champion) {
        return Err(garbage(format!("champion id {champion} out of range")));
    }
    Ok(())
}

fn mark_bots(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    let legacy_bot = doc.get("accountId").is_some_and(|v| {
        scalar_str(v).as_deref() == Some(BOT_ACCOUNT_ID) || scalar_i64(v) == Some(0)
    });
    let api_bot = doc.get("puuid").and_then(scalar_str).as_deref() == Some(BOT_PUUID);
    if legacy_bot || api_bot {
        doc.insert("puuid".into(), json!(BOT_IDENTITY));
        if is_blank(doc.get("summonerId")) || doc.get("summonerId").and_then(scalar_str).as_deref() == Some(BOT_PUUID) {
            doc.insert("summonerId".into(), json!(BOT_IDENTITY));
        }
        doc.insert("isBot".into(), json!(true));
    } else {
        set_fallback(doc, "isBot", json!(false));
    }
    Ok(())
}

fn resolve_participant_platform(doc: &mut Object, ctx: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    if is_blank(doc.get("platformId")) {
        match doc.get("currentPlatformId").cloned() {
            Some(current) if !is_blank(Some(&current)) => {
                doc.insert("platformId".into(), current);
            }
            _ => match ctx.match_platform {
                Some(platform) => {
                    doc.insert("platformId".into(), json!(platform.as_str()));
                }
                None => return Err(garbage("participant has no platform")),
            },
        }
    }
    let text = doc
        .get("platformId")
        .and_then(scalar_str)
        .ok_or_else(|| garbage("participant platformId is not a string"))?;
    let platform = parse_platform(&text).ok_or_else(|| garbage(format!("unknown participant platform {text:?}")))?;
    doc.insert("platformId".into(), json!(platform.as_str()));
    Ok(())
}

fn drop_legacy_participant_fields(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    remove_all(doc, LEGACY_PARTICIPANT_FIELDS);
    Ok(())
}

fn participant_id_fallback(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    if let Some(id) = doc.remove("id") {
        set_fallback(doc, "participantId", id);
    }
    Ok(())
}

fn riot_id_fallback(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    if !is_blank(doc.get("riotIdGameName")) {
        return Ok(());
    }
    let fallback = ["summonerName", "summonerId"]
        .iter()
        .filter_map(|key| doc.get(*key))
        .find(|v| !is_blank(Some(v)))
        .cloned();
    if let Some(name) = fallback {
        doc.insert("riotIdGameName".into(), name);
    }
    Ok(())
}

fn champion_name_from_catalog(doc: &mut Object, ctx: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    if !is_blank(doc.get("championName")) {
        return Ok(());
    }
    let Some(champion) = doc.get("championId").and_then(scalar_i64) else {
        return Ok(());
    };
    // Unknown names stay missing; the reconciler reports them.
    if let Some(name) = ctx.champions.name(champion) {
        doc.insert("championName".into(), json!(name));
    }
    Ok(())
}

fn stat_runes_to_stat_perks(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    let Some(stat_runes) = doc.remove("stat_runes") else {
        return Ok(());
    };
    let shards = match &stat_runes {
        Value::Array(items) if items.len() == 3 => items,
        _ => return Err(garbage("stat_runes is not a list of three shards")),
    };
    doc.insert(
        "stat_perks".into(),
        json!({
            "offense": shards[0],
            "flex": shards[1],
            "defense": shards[2],
        }),
    );
    Ok(())
}

fn legacy_runes(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    match doc.remove("runes") {
        Some(list @ Value::Array(_)) => {
            doc.insert("legacy_runes".into(), list);
        }
        Some(tree @ Value::Object(_)) => {
            doc.insert("perks".into(), tree);
        }
        Some(Value::Null) | None => {}
        Some(_) => return Err(garbage("runes is neither a list nor a rune tree")),
    }
    Ok(())
}

fn side_to_team_id_inner(doc: &mut Object) -> Result<(), GarbageInputError> {
    let source = match doc.remove("side") {
        Some(side) => side,
        None => match doc.get("teamId") {
            Some(Value::String(_)) => doc.remove("teamId").unwrap_or(Value::Null),
            _ => return Ok(()),
        },
    };
    let team = match &source {
        Value::String(name) => match name.to_ascii_lowercase().as_str() {
            "blue" | "100" => 100,
            "red" | "200" => 200,
            _ => return Err(garbage(format!("unknown side {name:?}"))),
        },
        other => match scalar_i64(other) {
            Some(id @ (100 | 200)) => id,
            _ => return Err(garbage(format!("unknown side {other}"))),
        },
    };
    doc.insert("teamId".into(), json!(team));
    Ok(())
}

fn side_to_team_id(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    side_to_team_id_inner(doc)
}

fn require_stat_block(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    match doc.get("stats") {
        Some(Value::Object(_)) => Ok(()),
        _ => Err(garbage("participant has no stat block")),
    }
}

fn player_scores_to_participant(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    let mut scores = Vec::with_capacity(PLAYER_SCORE_SLOTS);
    if let Some(Value::Object(stats)) = doc.get_mut("stats") {
        for slot in 0..PLAYER_SCORE_SLOTS {
            let key = format!("playerScore{slot}");
            scores.push((key.clone(), stats.remove(&key)));
        }
    }
    for (key, from_stats) in scores {
        let value = from_stats.unwrap_or_else(|| json!(0));
        set_fallback(doc, &key, value);
    }
    if !doc.contains_key("missions") {
        let missions: Object = (0..PLAYER_SCORE_SLOTS)
            .map(|slot| {
                let key = format!("playerScore{slot}");
                let value = doc.get(&key).cloned().unwrap_or_else(|| json!(0));
                (key, value)
            })
            .collect();
        doc.insert("missions".into(), Value::Object(missions));
    }
    Ok(())
}

fn default_pings(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    for field in PING_FIELDS {
        set_fallback(doc, field, json!(0));
    }
    Ok(())
}

// ---- stats table ----

fn drop_legacy_scores(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    remove_all(doc, LEGACY_STAT_SCORES);
    Ok(())
}

fn null_objective_counters(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    for field in NULLABLE_OBJECTIVE_COUNTERS {
        if let Some(value @ Value::Null) = doc.get_mut(*field) {
            *value = json!(0);
        }
    }
    Ok(())
}

fn rename_legacy_stats(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    rename(doc, "magicalDamageTaken", "magicDamageTaken");
    rename(doc, "totalTimeCrowdControlDealt", "totalTimeCCDealt");
    Ok(())
}

fn default_economy(doc: &mut Object, _: &RuleContext<'_>) -> Result<(), GarbageInputError> {
    for field in ECONOMY_FIELDS {
        set_fallback(doc, field, json!(0));
    }
    Ok(())
}
