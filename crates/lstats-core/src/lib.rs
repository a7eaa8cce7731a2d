//! Core domain model for match ingestion: routing values, natural identities,
//! tracked entities and canonical match documents.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const CRATE_NAME: &str = "lstats-core";

/// Account identity the provider reports for non-human participants.
pub const BOT_ACCOUNT_ID: &str = "0";
/// Player identity the current API reports for non-human participants.
pub const BOT_PUUID: &str = "BOT";
/// Identity synthesized for non-human participants in canonical records.
pub const BOT_IDENTITY: &str = "A_BOT";

/// Game server a match was played on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "BR1")]
    Br1,
    #[serde(rename = "EUN1")]
    Eun1,
    #[serde(rename = "EUW1")]
    Euw1,
    #[serde(rename = "JP1")]
    Jp1,
    #[serde(rename = "KR")]
    Kr,
    #[serde(rename = "LA1")]
    La1,
    #[serde(rename = "LA2")]
    La2,
    #[serde(rename = "ME1")]
    Me1,
    #[serde(rename = "NA1")]
    Na1,
    #[serde(rename = "OC1")]
    Oc1,
    #[serde(rename = "PH2")]
    Ph2,
    #[serde(rename = "RU")]
    Ru,
    #[serde(rename = "SG2")]
    Sg2,
    #[serde(rename = "TH2")]
    Th2,
    #[serde(rename = "TR1")]
    Tr1,
    #[serde(rename = "TW2")]
    Tw2,
    #[serde(rename = "VN2")]
    Vn2,
}

impl Platform {
    pub const ALL: [Platform; 17] = [
        Platform::Br1,
        Platform::Eun1,
        Platform::Euw1,
        Platform::Jp1,
        Platform::Kr,
        Platform::La1,
        Platform::La2,
        Platform::Me1,
        Platform::Na1,
        Platform::Oc1,
        Platform::Ph2,
        Platform::Ru,
        Platform::Sg2,
        Platform::Th2,
        Platform::Tr1,
        Platform::Tw2,
        Platform::Vn2,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Br1 => "BR1",
            Platform::Eun1 => "EUN1",
            Platform::Euw1 => "EUW1",
            Platform::Jp1 => "JP1",
            Platform::Kr => "KR",
            Platform::La1 => "LA1",
            Platform::La2 => "LA2",
            Platform::Me1 => "ME1",
            Platform::Na1 => "NA1",
            Platform::Oc1 => "OC1",
            Platform::Ph2 => "PH2",
            Platform::Ru => "RU",
            Platform::Sg2 => "SG2",
            Platform::Th2 => "TH2",
            Platform::Tr1 => "TR1",
            Platform::Tw2 => "TW2",
            Platform::Vn2 => "VN2",
        }
    }

    /// Regional routing value that serves match data for this platform.
    pub fn continent(self) -> Continent {
        match self {
            Platform::Br1 | Platform::La1 | Platform::La2 | Platform::Na1 => Continent::Americas,
            Platform::Eun1 | Platform::Euw1 | Platform::Me1 | Platform::Ru | Platform::Tr1 => {
                Continent::Europe
            }
            Platform::Jp1 | Platform::Kr => Continent::Asia,
            Platform::Oc1
            | Platform::Ph2
            | Platform::Sg2
            | Platform::Th2
            | Platform::Tw2
            | Platform::Vn2 => Continent::Sea,
        }
    }

    pub fn region(self) -> Region {
        match self {
            Platform::Br1 => Region::Br,
            Platform::Eun1 => Region::Eune,
            Platform::Euw1 => Region::Euw,
            Platform::Jp1 => Region::Jp,
            Platform::Kr => Region::Kr,
            Platform::La1 => Region::Lan,
            Platform::La2 => Region::Las,
            Platform::Me1 => Region::Me,
            Platform::Na1 => Region::Na,
            Platform::Oc1 => Region::Oce,
            Platform::Ph2 => Region::Ph,
            Platform::Ru => Region::Ru,
            Platform::Sg2 => Region::Sg,
            Platform::Th2 => Region::Th,
            Platform::Tr1 => Region::Tr,
            Platform::Tw2 => Region::Tw,
            Platform::Vn2 => Region::Vn,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == upper)
            .ok_or_else(|| IdentityError::UnknownPlatform(s.to_string()))
    }
}

/// Legacy region code, used by older record vintages in place of a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Region {
    Br,
    Eune,
    Euw,
    Jp,
    Kr,
    Lan,
    Las,
    Me,
    Na,
    Oce,
    Ph,
    Ru,
    Sg,
    Th,
    Tr,
    Tw,
    Vn,
}

impl Region {
    pub fn as_str(self) -> &'static str {
        match self {
            Region::Br => "BR",
            Region::Eune => "EUNE",
            Region::Euw => "EUW",
            Region::Jp => "JP",
            Region::Kr => "KR",
            Region::Lan => "LAN",
            Region::Las => "LAS",
            Region::Me => "ME",
            Region::Na => "NA",
            Region::Oce => "OCE",
            Region::Ph => "PH",
            Region::Ru => "RU",
            Region::Sg => "SG",
            Region::Th => "TH",
            Region::Tr => "TR",
            Region::Tw => "TW",
            Region::Vn => "VN",
        }
    }

    pub fn platform(self) -> Platform {
        match self {
            Region::Br => Platform::Br1,
            Region::Eune => Platform::Eun1,
            Region::Euw => Platform::Euw1,
            Region::Jp => Platform::Jp1,
            Region::Kr => Platform::Kr,
            Region::Lan => Platform::La1,
            Region::Las => Platform::La2,
            Region::Me => Platform::Me1,
            Region::Na => Platform::Na1,
            Region::Oce => Platform::Oc1,
            Region::Ph => Platform::Ph2,
            Region::Ru => Platform::Ru,
            Region::Sg => Platform::Sg2,
            Region::Th => Platform::Th2,
            Region::Tr => Platform::Tr1,
            Region::Tw => Platform::Tw2,
            Region::Vn => Platform::Vn2,
        }
    }
}

impl FromStr for Region {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Platform::ALL
            .into_iter()
            .map(Platform::region)
            .find(|r| r.as_str() == upper)
            .ok_or_else(|| IdentityError::UnknownRegion(s.to_string()))
    }
}

/// Regional routing value (the provider calls these "regions" in the match API).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Continent {
    Americas,
    Asia,
    Europe,
    Sea,
}

impl Continent {
    pub fn as_str(self) -> &'static str {
        match self {
            Continent::Americas => "AMERICAS",
            Continent::Asia => "ASIA",
            Continent::Europe => "EUROPE",
            Continent::Sea => "SEA",
        }
    }
}

impl fmt::Display for Continent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Continent {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AMERICAS" => Ok(Continent::Americas),
            "ASIA" => Ok(Continent::Asia),
            "EUROPE" => Ok(Continent::Europe),
            "SEA" => Ok(Continent::Sea),
            _ => Err(IdentityError::UnknownContinent(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("unknown platform {0:?}")]
    UnknownPlatform(String),
    #[error("unknown region {0:?}")]
    UnknownRegion(String),
    #[error("unknown continent {0:?}")]
    UnknownContinent(String),
    #[error("match document has no usable {0}")]
    MissingField(&'static str),
    #[error("platform {platform} is served by {expected}, document says {actual}")]
    ContinentMismatch {
        platform: Platform,
        expected: Continent,
        actual: Continent,
    },
    #[error("malformed match key {0:?}")]
    MalformedKey(String),
}

/// Composite natural identity of a stored match. Uniqueness in the store is
/// enforced over all four parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MatchIdentity {
    pub platform: Platform,
    pub continent: Continent,
    pub match_id: i64,
    pub id: i64,
}

impl MatchIdentity {
    pub fn new(platform: Platform, match_id: i64) -> Self {
        Self {
            platform,
            continent: platform.continent(),
            match_id,
            id: match_id,
        }
    }

    /// Provider-facing key, e.g. `NA1_12345`. Also used as the watermark value.
    pub fn key(&self) -> String {
        format!("{}_{}", self.platform, self.match_id)
    }

    pub fn parse_key(key: &str) -> Result<Self, IdentityError> {
        let (platform, number) = key
            .rsplit_once('_')
            .ok_or_else(|| IdentityError::MalformedKey(key.to_string()))?;
        let platform = platform.parse::<Platform>()?;
        let match_id = number
            .parse::<i64>()
            .map_err(|_| IdentityError::MalformedKey(key.to_string()))?;
        Ok(Self::new(platform, match_id))
    }
}

impl fmt::Display for MatchIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.platform, self.continent, self.match_id, self.id
        )
    }
}

/// A player whose match history is ingested. Registration owns everything but
/// the watermark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntity {
    pub id: i64,
    pub account_id: String,
    pub platform: Platform,
    #[serde(default)]
    pub profile: Value,
    pub last_seen_match_identity: Option<String>,
}

impl TrackedEntity {
    pub fn display_name(&self) -> String {
        let name = self.profile.get("name").and_then(Value::as_str);
        let tagline = self.profile.get("tagline").and_then(Value::as_str);
        match (name, tagline) {
            (Some(name), Some(tagline)) => format!("{name}#{tagline}"),
            (Some(name), None) => name.to_string(),
            _ => self.account_id.clone(),
        }
    }
}

/// Runtime type of one document field, as recorded by the expected schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Null,
    Bool,
    Integer,
    Float,
    String,
    Array,
    Object,
}

impl FieldType {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => FieldType::Null,
            Value::Bool(_) => FieldType::Bool,
            Value::Number(n) if n.is_i64() || n.is_u64() => FieldType::Integer,
            Value::Number(_) => FieldType::Float,
            Value::String(_) => FieldType::String,
            Value::Array(_) => FieldType::Array,
            Value::Object(_) => FieldType::Object,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Null => "null",
            FieldType::Bool => "bool",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::String => "string",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which level of the canonical document a field belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Match,
    Participant,
    Stats,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [RecordKind::Match, RecordKind::Participant, RecordKind::Stats];

    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Match => "match",
            RecordKind::Participant => "participant",
            RecordKind::Stats => "stats",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized match document together with its natural identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMatch {
    pub identity: MatchIdentity,
    pub document: Map<String, Value>,
}

impl CanonicalMatch {
    pub fn from_document(document: Map<String, Value>) -> Result<Self, IdentityError> {
        let platform = document
            .get("platform")
            .and_then(Value::as_str)
            .ok_or(IdentityError::MissingField("platform"))?
            .parse::<Platform>()?;
        let continent = document
            .get("continent")
            .and_then(Value::as_str)
            .ok_or(IdentityError::MissingField("continent"))?
            .parse::<Continent>()?;
        if platform.continent() != continent {
            return Err(IdentityError::ContinentMismatch {
                platform,
                expected: platform.continent(),
                actual: continent,
            });
        }
        let match_id = document
            .get("matchId")
            .and_then(Value::as_i64)
            .ok_or(IdentityError::MissingField("matchId"))?;
        let id = document
            .get("id")
            .and_then(Value::as_i64)
            .ok_or(IdentityError::MissingField("id"))?;

        Ok(Self {
            identity: MatchIdentity {
                platform,
                continent,
                match_id,
                id,
            },
            document,
        })
    }

    pub fn key(&self) -> String {
        self.identity.key()
    }

    pub fn participants(&self) -> &[Value] {
        self.document
            .get("participants")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        let millis = self.document.get("gameStartTimestamp")?.as_i64()?;
        Utc.timestamp_millis_opt(millis).single()
    }

    pub fn duration_secs(&self) -> Option<i64> {
        self.document.get("duration")?.as_i64()
    }

    pub fn queue(&self) -> Option<i64> {
        self.document.get("queue")?.as_i64()
    }

    pub fn mode(&self) -> Option<&str> {
        self.document.get("mode")?.as_str()
    }

    pub fn is_tournament(&self) -> bool {
        self.document
            .get("tournamentCode")
            .and_then(Value::as_str)
            .is_some_and(|code| !code.is_empty())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.document)
    }
}
