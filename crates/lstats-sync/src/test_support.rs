use async_trait::async_trait;
use lstats_adapters::{AllowLists, Canonicalizer, Normalizer, Reconciler, SchemaDeriver};
use lstats_core::{Platform, TrackedEntity};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::notify::{FailureNotifier, Notification};

/// Keeps every notification for assertions.
#[derive(Default)]
pub struct RecordingNotifier {
    pub seen: Mutex<Vec<Notification>>,
}

#[async_trait]
impl FailureNotifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) {
        self.seen.lock().await.push(notification.clone());
    }
}

pub fn entity(id: i64, account_id: &str, watermark: Option<&str>) -> TrackedEntity {
    TrackedEntity {
        id,
        account_id: account_id.to_string(),
        platform: Platform::Na1,
        profile: json!({"name": account_id, "tagline": "NA1"}),
        last_seen_match_identity: watermark.map(str::to_string),
    }
}

/// A current-API record for `NA1_{game_id}` with one player per side.
pub fn api_match(game_id: i64) -> Value {
    let player = |n: i64, team: i64| {
        json!({
            "participantId": n,
            "puuid": format!("puuid-{n}"),
            "summonerId": format!("summ-{n}"),
            "riotIdGameName": format!("player{n}"),
            "riotIdTagline": "NA1",
            "championId": 100 + n,
            "championName": "Ahri",
            "teamId": team,
            "kills": 4,
            "deaths": 2,
            "win": team == 100,
            "perks": {"statPerks": {"offense": 5008, "flex": 5008, "defense": 5002}, "styles": []},
        })
    };
    json!({
        "metadata": {"matchId": format!("NA1_{game_id}"), "participants": ["puuid-1", "puuid-2"]},
        "info": {
            "gameId": game_id,
            "platformId": "NA1",
            "gameCreation": 1_700_000_000_000_i64,
            "gameStartTimestamp": 1_700_000_005_000_i64,
            "gameEndTimestamp": 1_700_001_805_000_i64,
            "gameDuration": 1800,
            "queueId": 420,
            "gameMode": "CLASSIC",
            "teams": [{"teamId": 100, "win": true}, {"teamId": 200, "win": false}],
            "participants": [player(1, 100), player(2, 200)],
        },
    })
}

/// Same shape as [`api_match`] plus a field the schema has never seen.
pub fn drifted_match(game_id: i64) -> Value {
    let mut raw = api_match(game_id);
    raw["info"]["surpriseField"] = json!(true);
    raw
}

/// Same shape as [`api_match`] with one player's kill count absent.
pub fn incomplete_match(game_id: i64) -> Value {
    let mut raw = api_match(game_id);
    if let Some(player) = raw["info"]["participants"][0].as_object_mut() {
        player.remove("kills");
    }
    raw
}

/// A record with a zeroed identity.
pub fn garbage_match(game_id: i64) -> Value {
    let mut raw = api_match(game_id);
    raw["info"]["gameId"] = json!(0);
    raw["metadata"]["matchId"] = json!("NA1_0");
    raw
}

/// Canonicalizer enforcing a schema derived from a single clean record.
pub fn enforcing_canonicalizer() -> Canonicalizer {
    let normalizer = Normalizer::default();
    let sample = normalizer
        .normalize(&api_match(1))
        .expect("sample normalizes")
        .into_value();
    let mut deriver = SchemaDeriver::new();
    assert!(deriver.observe(&sample));
    Canonicalizer::new(normalizer, Reconciler::new(Some(deriver.finish()), AllowLists::default()))
}
