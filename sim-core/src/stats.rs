//! Cross-session player totals, mirrored to the server.
//!
//! Every mutation asks for a sync. At most one sync is on the wire at a time;
//! mutations made while it is in flight mark the store dirty and a single
//! follow-up sync carries the newest snapshot once the first one resolves.

use crate::api::{ApiOutbox, ApiOutcome, ApiPurpose, HttpMethod, PLAYER_STATS_PATH};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

pub const PLAYER_STATS_STORAGE_KEY: &str = "player-stats-storage";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStats {
    pub total_score: i64,
    pub high_score: i64,
    pub enemies_destroyed: i64,
    pub games_played: i64,
    pub time_played_minutes: i64,
    pub streak_days: i64,
    pub social_shares: i64,
    pub friends_invited: i64,
}

impl Default for GameStats {
    fn default() -> Self {
        Self {
            total_score: 0,
            high_score: 0,
            enemies_destroyed: 0,
            games_played: 0,
            time_played_minutes: 0,
            streak_days: 1,
            social_shares: 0,
            friends_invited: 0,
        }
    }
}

impl GameStats {
    fn field_mut(&mut self, key: StatKey) -> &mut i64 {
        match key {
            StatKey::TotalScore => &mut self.total_score,
            StatKey::HighScore => &mut self.high_score,
            StatKey::EnemiesDestroyed => &mut self.enemies_destroyed,
            StatKey::GamesPlayed => &mut self.games_played,
            StatKey::TimePlayedMinutes => &mut self.time_played_minutes,
            StatKey::StreakDays => &mut self.streak_days,
            StatKey::SocialShares => &mut self.social_shares,
            StatKey::FriendsInvited => &mut self.friends_invited,
        }
    }

    /// Server payload to local stats. Missing or null fields read as 0 and
    /// the streak is not stored server side, so it restarts at 1.
    pub fn from_server(data: &Value) -> Self {
        let field = |name: &str| data.get(name).and_then(Value::as_i64).unwrap_or(0);
        Self {
            total_score: field("totalScore"),
            high_score: field("highScore"),
            enemies_destroyed: field("enemiesDestroyed"),
            games_played: field("gamesPlayed"),
            time_played_minutes: field("timePlayedMinutes"),
            streak_days: 1,
            social_shares: field("socialShares"),
            friends_invited: field("friendsInvited"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatKey {
    TotalScore,
    HighScore,
    EnemiesDestroyed,
    GamesPlayed,
    TimePlayedMinutes,
    StreakDays,
    SocialShares,
    FriendsInvited,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatsPatch {
    pub total_score: Option<i64>,
    pub high_score: Option<i64>,
    pub enemies_destroyed: Option<i64>,
    pub games_played: Option<i64>,
    pub time_played_minutes: Option<i64>,
    pub streak_days: Option<i64>,
    pub social_shares: Option<i64>,
    pub friends_invited: Option<i64>,
}

impl StatsPatch {
    pub fn apply(&self, stats: &mut GameStats) {
        let pairs = [
            (self.total_score, StatKey::TotalScore),
            (self.high_score, StatKey::HighScore),
            (self.enemies_destroyed, StatKey::EnemiesDestroyed),
            (self.games_played, StatKey::GamesPlayed),
            (self.time_played_minutes, StatKey::TimePlayedMinutes),
            (self.streak_days, StatKey::StreakDays),
            (self.social_shares, StatKey::SocialShares),
            (self.friends_invited, StatKey::FriendsInvited),
        ];
        for (value, key) in pairs {
            if let Some(value) = value {
                *stats.field_mut(key) = value;
            }
        }
    }
}

/// Body of `POST /api/player-stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSyncBody {
    pub farcaster_fid: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub profile_picture: Option<String>,
    #[serde(flatten)]
    pub stats: GameStats,
}

/// The record kept under [`PLAYER_STATS_STORAGE_KEY`] in host local storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedPlayerStats {
    pub stats: GameStats,
    #[serde(alias = "farcasterFid")]
    pub farcaster_id: Option<i64>,
    pub display_name: Option<String>,
    pub profile_picture: Option<String>,
    pub last_synced: Option<i64>,
}

#[derive(Debug, Default)]
pub struct PlayerStatsStore {
    stats: GameStats,
    farcaster_fid: Option<i64>,
    display_name: Option<String>,
    profile_picture: Option<String>,
    is_loading: bool,
    last_synced: Option<i64>,
    sync_in_flight: bool,
    sync_dirty: bool,
}

impl PlayerStatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &GameStats {
        &self.stats
    }

    pub fn farcaster_fid(&self) -> Option<i64> {
        self.farcaster_fid
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn profile_picture(&self) -> Option<&str> {
        self.profile_picture.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn last_synced(&self) -> Option<i64> {
        self.last_synced
    }

    pub fn update_stats(&mut self, patch: StatsPatch, outbox: &mut ApiOutbox) {
        patch.apply(&mut self.stats);
        self.sync_with_database(outbox);
    }

    pub fn increment_stat(&mut self, key: StatKey, amount: i64, outbox: &mut ApiOutbox) {
        *self.stats.field_mut(key) += amount;
        self.sync_with_database(outbox);
    }

    pub fn set_user_data(
        &mut self,
        fid: i64,
        display_name: impl Into<String>,
        profile_picture: impl Into<String>,
    ) {
        self.farcaster_fid = Some(fid);
        self.display_name = Some(display_name.into());
        self.profile_picture = Some(profile_picture.into());
        self.clear_sync_state();
    }

    /// A new identity starts a fresh sync chain; an answer the host never
    /// delivered for the previous one no longer blocks syncing.
    fn clear_sync_state(&mut self) {
        self.sync_in_flight = false;
        self.sync_dirty = false;
    }

    pub fn reset_stats(&mut self, outbox: &mut ApiOutbox) {
        self.stats = GameStats::default();
        self.sync_with_database(outbox);
    }

    pub fn sync_with_database(&mut self, outbox: &mut ApiOutbox) {
        let Some(fid) = self.farcaster_fid else {
            return;
        };
        if self.sync_in_flight {
            self.sync_dirty = true;
            return;
        }

        let body = StatsSyncBody {
            farcaster_fid: fid,
            display_name: self.display_name.clone(),
            profile_picture: self.profile_picture.clone(),
            stats: self.stats,
        };
        let body = match serde_json::to_value(&body) {
            Ok(body) => body,
            Err(err) => {
                error!(%err, "failed to encode player stats");
                return;
            }
        };

        outbox.queue(
            HttpMethod::Post,
            PLAYER_STATS_PATH,
            Some(body),
            false,
            ApiPurpose::SyncStats,
        );
        self.sync_in_flight = true;
    }

    pub fn on_sync_resolved(&mut self, outcome: &ApiOutcome, outbox: &mut ApiOutbox, now: i64) {
        self.sync_in_flight = false;
        if outcome.is_success() {
            self.last_synced = Some(now);
        } else {
            error!(status = outcome.status, body = %outcome.body, "failed to sync player stats");
        }

        if self.sync_dirty {
            self.sync_dirty = false;
            self.sync_with_database(outbox);
        }
    }

    pub fn load_player_stats(&mut self, fid: i64, outbox: &mut ApiOutbox) {
        self.is_loading = true;
        outbox.queue(
            HttpMethod::Get,
            format!("{PLAYER_STATS_PATH}/{fid}"),
            None,
            false,
            ApiPurpose::LoadStats { fid },
        );
    }

    pub fn on_load_resolved(&mut self, fid: i64, outcome: &ApiOutcome, now: i64) {
        self.is_loading = false;
        if !outcome.is_success() {
            if outcome.status == 0 {
                error!(fid, body = %outcome.body, "failed to load player stats");
            } else {
                warn!(fid, status = outcome.status, "no player stats on server");
            }
            return;
        }

        match outcome.json() {
            Ok(data) => {
                self.stats = GameStats::from_server(&data);
                self.farcaster_fid = Some(fid);
                self.last_synced = Some(now);
                info!(fid, "player stats loaded");
            }
            Err(err) => error!(fid, %err, "failed to load player stats"),
        }
    }

    pub fn persisted(&self) -> PersistedPlayerStats {
        PersistedPlayerStats {
            stats: self.stats,
            farcaster_id: self.farcaster_fid,
            display_name: self.display_name.clone(),
            profile_picture: self.profile_picture.clone(),
            last_synced: self.last_synced,
        }
    }

    pub fn hydrate(&mut self, record: PersistedPlayerStats) {
        self.stats = record.stats;
        self.farcaster_fid = record.farcaster_id;
        self.display_name = record.display_name;
        self.profile_picture = record.profile_picture;
        self.last_synced = record.last_synced;
        self.clear_sync_state();
    }
}
