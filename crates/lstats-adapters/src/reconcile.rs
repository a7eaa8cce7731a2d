//! Expected schema, allow-lists and drift detection.
//!
//! The expected schema is derived offline from the stored corpus
//! (`derive-schema`), written to disk with a fingerprint, and loaded once per
//! process. Reconciliation is strict: nothing is coerced, and every violation
//! in a record is reported, not just the first.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;

use anyhow::{bail, Context, Result};
use lstats_core::{CanonicalMatch, FieldType, RecordKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

pub const SCHEMA_FILE_VERSION: u32 = 1;
pub const ALLOWLIST_FILE: &str = "schema_allowlists.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub declared_type: FieldType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpectedSchema {
    match_fields: BTreeMap<String, FieldType>,
    participant_fields: BTreeMap<String, FieldType>,
    stats_fields: BTreeMap<String, FieldType>,
    derived_from_records: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct SchemaFile {
    version: u32,
    fingerprint: String,
    derived_from_records: usize,
    #[serde(rename = "match")]
    match_fields: Vec<FieldSpec>,
    participant: Vec<FieldSpec>,
    stats: Vec<FieldSpec>,
}

fn to_specs(fields: &BTreeMap<String, FieldType>) -> Vec<FieldSpec> {
    fields
        .iter()
        .map(|(name, declared_type)| FieldSpec {
            name: name.clone(),
            declared_type: *declared_type,
        })
        .collect()
}

fn from_specs(specs: Vec<FieldSpec>) -> BTreeMap<String, FieldType> {
    specs
        .into_iter()
        .map(|spec| (spec.name, spec.declared_type))
        .collect()
}

impl ExpectedSchema {
    pub fn new(
        match_fields: BTreeMap<String, FieldType>,
        participant_fields: BTreeMap<String, FieldType>,
        stats_fields: BTreeMap<String, FieldType>,
    ) -> Self {
        Self {
            match_fields,
            participant_fields,
            stats_fields,
            derived_from_records: 0,
        }
    }

    pub fn fields(&self, kind: RecordKind) -> &BTreeMap<String, FieldType> {
        match kind {
            RecordKind::Match => &self.match_fields,
            RecordKind::Participant => &self.participant_fields,
            RecordKind::Stats => &self.stats_fields,
        }
    }

    pub fn derived_from_records(&self) -> usize {
        self.derived_from_records
    }

    pub fn is_empty(&self) -> bool {
        RecordKind::ALL.iter().all(|kind| self.fields(*kind).is_empty())
    }

    /// SHA-256 over one `kind<TAB>name<TAB>type` line per field, kinds in
    /// match/participant/stats order.
    pub fn fingerprint(&self) -> String {
        let mut canonical = String::new();
        for kind in RecordKind::ALL {
            for (name, declared) in self.fields(kind) {
                let _ = writeln!(canonical, "{kind}\t{name}\t{declared}");
            }
        }
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let file: SchemaFile =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        if file.version != SCHEMA_FILE_VERSION {
            bail!(
                "{} has schema file version {}, expected {SCHEMA_FILE_VERSION}",
                path.display(),
                file.version
            );
        }
        let schema = Self {
            match_fields: from_specs(file.match_fields),
            participant_fields: from_specs(file.participant),
            stats_fields: from_specs(file.stats),
            derived_from_records: file.derived_from_records,
        };
        let actual = schema.fingerprint();
        if actual != file.fingerprint {
            bail!(
                "{} fingerprint mismatch (file says {}, contents hash to {actual}); re-run derive-schema",
                path.display(),
                file.fingerprint
            );
        }
        Ok(schema)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let file = SchemaFile {
            version: SCHEMA_FILE_VERSION,
            fingerprint: self.fingerprint(),
            derived_from_records: self.derived_from_records,
            match_fields: to_specs(&self.match_fields),
            participant: to_specs(&self.participant_fields),
            stats: to_specs(&self.stats_fields),
        };
        let text = serde_json::to_string_pretty(&file).context("serializing expected schema")?;
        std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))
    }
}

/// Accumulates observed field types across stored canonical documents.
#[derive(Debug, Default)]
pub struct SchemaDeriver {
    counts: BTreeMap<RecordKind, BTreeMap<String, BTreeMap<FieldType, usize>>>,
    records: usize,
    skipped: usize,
}

impl SchemaDeriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn tally(&mut self, kind: RecordKind, object: &Map<String, Value>) {
        let by_field = self.counts.entry(kind).or_default();
        for (name, value) in object {
            *by_field
                .entry(name.clone())
                .or_default()
                .entry(FieldType::of(value))
                .or_default() += 1;
        }
    }

    /// Returns false when the document was skipped (not a match object, or
    /// every participant is a bot).
    pub fn observe(&mut self, document: &Value) -> bool {
        let Some(doc) = document.as_object() else {
            self.skipped += 1;
            return false;
        };
        let participants: Vec<&Map<String, Value>> = doc
            .get("participants")
            .and_then(Value::as_array)
            .map(|ps| ps.iter().filter_map(Value::as_object).collect())
            .unwrap_or_default();
        let all_bots = !participants.is_empty()
            && participants
                .iter()
                .all(|p| p.get("isBot").and_then(Value::as_bool) == Some(true));
        if all_bots {
            self.skipped += 1;
            return false;
        }

        self.tally(RecordKind::Match, doc);
        for participant in participants {
            self.tally(RecordKind::Participant, participant);
            if let Some(stats) = participant.get("stats").and_then(Value::as_object) {
                self.tally(RecordKind::Stats, stats);
            }
        }
        self.records += 1;
        true
    }

    pub fn records(&self) -> usize {
        self.records
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Freezes the observations. A field seen with several types takes the
    /// most frequent one.
    pub fn finish(self) -> ExpectedSchema {
        let mut resolved: BTreeMap<RecordKind, BTreeMap<String, FieldType>> = BTreeMap::new();
        for (kind, fields) in self.counts {
            let out = resolved.entry(kind).or_default();
            for (name, types) in fields {
                let Some((&winner, _)) = types
                    .iter()
                    .max_by(|(ta, ca), (tb, cb)| ca.cmp(cb).then_with(|| tb.cmp(ta)))
                else {
                    continue;
                };
                if types.len() > 1 {
                    warn!(
                        kind = %kind,
                        field = %name,
                        observed = ?types,
                        chosen = %winner,
                        "field observed with conflicting types"
                    );
                }
                out.insert(name, winner);
            }
        }
        let mut take = |kind| resolved.remove(&kind).unwrap_or_default();
        ExpectedSchema {
            match_fields: take(RecordKind::Match),
            participant_fields: take(RecordKind::Participant),
            stats_fields: take(RecordKind::Stats),
            derived_from_records: self.records,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct KindAllowList {
    #[serde(default)]
    pub extra: BTreeSet<String>,
    #[serde(default)]
    pub missing: BTreeSet<String>,
}

/// Closed sets of tolerated extra and missing fields, per record kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AllowLists {
    pub version: u32,
    #[serde(rename = "match", default)]
    pub match_fields: KindAllowList,
    #[serde(default)]
    pub participant: KindAllowList,
    #[serde(default)]
    pub stats: KindAllowList,
}

impl AllowLists {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing allow-lists")
    }

    pub fn from_workspace_root(root: &Path) -> Result<Self> {
        let path = root.join("rules").join(ALLOWLIST_FILE);
        let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn for_kind(&self, kind: RecordKind) -> &KindAllowList {
        match kind {
            RecordKind::Match => &self.match_fields,
            RecordKind::Participant => &self.participant,
            RecordKind::Stats => &self.stats,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaViolation {
    #[error("{location} has extra fields: {}", .fields.join(", "))]
    ExtraFields {
        kind: RecordKind,
        location: String,
        fields: Vec<String>,
    },
    #[error("{location} is missing fields: {}", .fields.join(", "))]
    MissingFields {
        kind: RecordKind,
        location: String,
        fields: Vec<String>,
    },
    #[error("{location}.{field} is {observed}, expected {expected}")]
    IncorrectType {
        kind: RecordKind,
        location: String,
        field: String,
        expected: FieldType,
        observed: FieldType,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("schema drift in {match_key}: {}", summarize(.violations))]
pub struct ReconcileError {
    pub match_key: String,
    pub violations: Vec<SchemaViolation>,
}

fn summarize(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Checks one object against its expected field set. All three checks run to
/// completion; allow-listed extra fields are not type-checked.
pub fn reconcile_fields(
    candidate: &Map<String, Value>,
    kind: RecordKind,
    location: &str,
    expected: &BTreeMap<String, FieldType>,
    allow: &KindAllowList,
) -> Vec<SchemaViolation> {
    let mut violations = Vec::new();

    let extra: Vec<String> = candidate
        .keys()
        .filter(|name| !expected.contains_key(*name) && !allow.extra.contains(*name))
        .cloned()
        .collect();
    if !extra.is_empty() {
        violations.push(SchemaViolation::ExtraFields {
            kind,
            location: location.to_string(),
            fields: extra,
        });
    }

    let missing: Vec<String> = expected
        .keys()
        .filter(|name| !candidate.contains_key(*name) && !allow.missing.contains(*name))
        .cloned()
        .collect();
    if !missing.is_empty() {
        violations.push(SchemaViolation::MissingFields {
            kind,
            location: location.to_string(),
            fields: missing,
        });
    }

    for (name, value) in candidate {
        if allow.extra.contains(name) {
            continue;
        }
        let Some(&declared) = expected.get(name) else {
            continue;
        };
        let observed = FieldType::of(value);
        if observed != declared {
            violations.push(SchemaViolation::IncorrectType {
                kind,
                location: location.to_string(),
                field: name.clone(),
                expected: declared,
                observed,
            });
        }
    }

    violations
}

/// Reconciles whole canonical matches. Without an established schema every
/// record is accepted; `derive-schema` establishes one.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    schema: Option<ExpectedSchema>,
    allowlists: AllowLists,
}

impl Reconciler {
    pub fn new(schema: Option<ExpectedSchema>, allowlists: AllowLists) -> Self {
        let schema = schema.filter(|s| !s.is_empty());
        Self { schema, allowlists }
    }

    pub fn is_enforcing(&self) -> bool {
        self.schema.is_some()
    }

    pub fn schema(&self) -> Option<&ExpectedSchema> {
        self.schema.as_ref()
    }

    pub fn reconcile(&self, record: &CanonicalMatch) -> Result<(), ReconcileError> {
        let Some(schema) = &self.schema else {
            return Ok(());
        };
        let check = |object: &Map<String, Value>, kind: RecordKind, location: &str| {
            reconcile_fields(object, kind, location, schema.fields(kind), self.allowlists.for_kind(kind))
        };

        let mut violations = check(&record.document, RecordKind::Match, "match");
        for (index, participant) in record.participants().iter().enumerate() {
            let Some(participant) = participant.as_object() else {
                continue;
            };
            let location = format!("participants[{index}]");
            violations.extend(check(participant, RecordKind::Participant, &location));
            if let Some(stats) = participant.get("stats").and_then(Value::as_object) {
                violations.extend(check(stats, RecordKind::Stats, &format!("{location}.stats")));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ReconcileError {
                match_key: record.key(),
                violations,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Normalizer;
    use serde_json::json;
    use std::path::PathBuf;

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .expect("workspace root")
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test documents are objects"),
        }
    }

    fn expected(pairs: &[(&str, FieldType)]) -> BTreeMap<String, FieldType> {
        pairs.iter().map(|(n, t)| (n.to_string(), *t)).collect()
    }

    fn canonical(match_id: i64) -> CanonicalMatch {
        let participant = |n: i64, team: i64| {
            json!({
                "participantId": n,
                "puuid": format!("puuid-{n}"),
                "platformId": "NA1",
                "championId": 1,
                "teamId": team,
                "isBot": false,
                "stats": {"kills": n, "win": team == 100},
            })
        };
        let raw = json!({
            "id": match_id,
            "platform": "NA1",
            "creation": 1_700_000_000.0,
            "duration": 1800,
            "queue": 420,
            "mode": "CLASSIC",
            "participants": [participant(1, 100), participant(2, 200)],
        });
        Normalizer::default().normalize(&raw).unwrap()
    }

    #[test]
    fn missing_required_field_is_reported_alone() {
        let schema = expected(&[("kills", FieldType::Integer), ("deaths", FieldType::Integer)]);
        let candidate = object(json!({"kills": 3}));
        let violations = reconcile_fields(
            &candidate,
            RecordKind::Stats,
            "stats",
            &schema,
            &KindAllowList::default(),
        );
        assert_eq!(
            violations,
            vec![SchemaViolation::MissingFields {
                kind: RecordKind::Stats,
                location: "stats".into(),
                fields: vec!["deaths".into()],
            }]
        );
    }

    #[test]
    fn every_violation_is_reported() {
        let schema = expected(&[
            ("a", FieldType::Integer),
            ("b", FieldType::String),
            ("c", FieldType::Bool),
        ]);
        let candidate = object(json!({"a": 1.5, "b": "x", "x": 1, "y": 2}));
        let violations = reconcile_fields(
            &candidate,
            RecordKind::Match,
            "match",
            &schema,
            &KindAllowList::default(),
        );
        assert_eq!(violations.len(), 3);
        assert!(violations.contains(&SchemaViolation::ExtraFields {
            kind: RecordKind::Match,
            location: "match".into(),
            fields: vec!["x".into(), "y".into()],
        }));
        assert!(violations.contains(&SchemaViolation::MissingFields {
            kind: RecordKind::Match,
            location: "match".into(),
            fields: vec!["c".into()],
        }));
        assert!(violations.contains(&SchemaViolation::IncorrectType {
            kind: RecordKind::Match,
            location: "match".into(),
            field: "a".into(),
            expected: FieldType::Integer,
            observed: FieldType::Float,
        }));
    }

    #[test]
    fn allow_listed_fields_are_tolerated() {
        let schema = expected(&[("perks", FieldType::Object), ("masteries", FieldType::Object)]);
        let allow = KindAllowList {
            extra: ["masteries".to_string(), "legacy_runes".to_string()].into(),
            missing: ["perks".to_string()].into(),
        };
        let candidate = object(json!({"masteries": [1, 2], "legacy_runes": []}));
        assert!(reconcile_fields(&candidate, RecordKind::Participant, "p", &schema, &allow).is_empty());
    }

    #[test]
    fn derived_schema_accepts_its_own_corpus() {
        let records: Vec<CanonicalMatch> = (1..=3).map(canonical).collect();
        let mut deriver = SchemaDeriver::new();
        for record in &records {
            assert!(deriver.observe(&record.document.clone().into()));
        }
        let schema = deriver.finish();
        assert_eq!(schema.derived_from_records(), 3);
        assert_eq!(schema.fields(RecordKind::Stats)["kills"], FieldType::Integer);

        let reconciler = Reconciler::new(Some(schema), AllowLists::default());
        for record in &records {
            reconciler.reconcile(record).unwrap();
        }
    }

    #[test]
    fn drift_names_the_participant() {
        let mut deriver = SchemaDeriver::new();
        deriver.observe(&canonical(1).into_value());
        let reconciler = Reconciler::new(Some(deriver.finish()), AllowLists::default());

        let mut drifted = canonical(2);
        let participants = drifted
            .document
            .get_mut("participants")
            .and_then(Value::as_array_mut)
            .unwrap();
        participants[1]["stats"]
            .as_object_mut()
            .unwrap()
            .remove("kills");

        let err = reconciler.reconcile(&drifted).unwrap_err();
        assert_eq!(err.match_key, "NA1_2");
        assert_eq!(
            err.violations,
            vec![SchemaViolation::MissingFields {
                kind: RecordKind::Stats,
                location: "participants[1].stats".into(),
                fields: vec!["kills".into()],
            }]
        );
    }

    #[test]
    fn conflicting_types_resolve_to_the_most_frequent() {
        let mut deriver = SchemaDeriver::new();
        for value in [json!(1), json!(2), json!(null)] {
            let mut doc = canonical(5).into_value();
            doc["tournamentCode"] = value;
            deriver.observe(&doc);
        }
        let schema = deriver.finish();
        assert_eq!(schema.fields(RecordKind::Match)["tournamentCode"], FieldType::Integer);
    }

    #[test]
    fn all_bot_documents_are_skipped() {
        let mut deriver = SchemaDeriver::new();
        let mut doc = canonical(1).into_value();
        for p in doc["participants"].as_array_mut().unwrap() {
            p["isBot"] = json!(true);
        }
        assert!(!deriver.observe(&doc));
        assert_eq!(deriver.skipped(), 1);
        assert!(deriver.finish().is_empty());
    }

    #[test]
    fn schema_file_round_trips_with_fingerprint() {
        let mut deriver = SchemaDeriver::new();
        deriver.observe(&canonical(1).into_value());
        let schema = deriver.finish();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema").join("expected_schema.json");
        schema.save(&path).unwrap();
        assert_eq!(ExpectedSchema::load(&path).unwrap(), schema);

        let tampered = std::fs::read_to_string(&path)
            .unwrap()
            .replace("\"integer\"", "\"float\"");
        std::fs::write(&path, tampered).unwrap();
        let err = ExpectedSchema::load(&path).unwrap_err();
        assert!(err.to_string().contains("fingerprint mismatch"), "{err}");
    }

    #[test]
    fn workspace_allowlists_parse() {
        let allow = AllowLists::from_workspace_root(&workspace_root()).unwrap();
        assert_eq!(allow.version, 1);
        assert!(allow.participant.extra.contains("legacy_runes"));
        assert!(allow.stats.missing.contains("wardsPlaced"));
        assert!(allow.match_fields.extra.is_empty());
    }

    #[test]
    fn reconciler_without_schema_accepts_everything() {
        let reconciler = Reconciler::new(None, AllowLists::default());
        assert!(!reconciler.is_enforcing());
        reconciler.reconcile(&canonical(1)).unwrap();
    }
}
