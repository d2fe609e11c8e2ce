//! Persistence for players, sessions, rankings and the high-score board.
//!
//! [`Storage`] is implemented by [`SqlStorageBackend`] (durable object SQLite)
//! and [`MemoryStorage`] (process maps). Both run synchronously inside one
//! durable object turn, so a multi-step operation never interleaves with
//! another request.

mod memory;
mod sql;

pub use memory::MemoryStorage;
pub use sql::SqlStorageBackend;

use crate::config::StorageBackendKind;
use galaxiga_core::{SessionSubmission, StatsPatch};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_TOP_PLAYERS_LIMIT: usize = 10;
pub const DEFAULT_SEARCH_LIMIT: usize = 20;
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;
pub const RECENT_SESSIONS_LIMIT: usize = 10;
pub const RANKING_CATEGORY_SCORE: &str = "score";
pub const HIGH_SCORE_DEDUP_WINDOW_MS: i64 = 60_000;
const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const MS_PER_MINUTE: f64 = 60_000.0;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("user {0} not found")]
    UserNotFound(i64),
    #[error("storage backend error: {0}")]
    Backend(#[from] worker::Error),
    #[error("storage decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub profile_picture: Option<String>,
    pub farcaster_fid: Option<i64>,
    pub created_at: i64,
    pub last_active: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub profile_picture: Option<String>,
    #[serde(default)]
    pub farcaster_fid: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStats {
    pub user_id: i64,
    pub total_score: i64,
    pub high_score: i64,
    pub enemies_destroyed: i64,
    pub games_played: i64,
    pub time_played_minutes: i64,
    pub streak_days: i64,
    pub social_shares: i64,
    pub friends_invited: i64,
    pub last_played_at: Option<i64>,
    pub updated_at: i64,
}

impl PlayerStats {
    pub fn seeded(user_id: i64, now: i64) -> Self {
        Self {
            user_id,
            total_score: 0,
            high_score: 0,
            enemies_destroyed: 0,
            games_played: 0,
            time_played_minutes: 0,
            streak_days: 1,
            social_shares: 0,
            friends_invited: 0,
            last_played_at: None,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, patch: &StatsPatch, now: i64) {
        let fields = [
            (patch.total_score, &mut self.total_score),
            (patch.high_score, &mut self.high_score),
            (patch.enemies_destroyed, &mut self.enemies_destroyed),
            (patch.games_played, &mut self.games_played),
            (patch.time_played_minutes, &mut self.time_played_minutes),
            (patch.streak_days, &mut self.streak_days),
            (patch.social_shares, &mut self.social_shares),
            (patch.friends_invited, &mut self.friends_invited),
        ];
        for (value, field) in fields {
            if let Some(value) = value {
                *field = value;
            }
        }
        self.updated_at = now;
    }

    pub fn record_session(&mut self, session: &SessionSubmission, now: i64) {
        self.games_played += 1;
        self.total_score += session.score;
        self.enemies_destroyed += session.enemies_killed;
        self.time_played_minutes += session_minutes(session);
        self.high_score = self.high_score.max(session.score);
        self.last_played_at = Some(now);
        self.updated_at = now;
    }
}

pub fn session_minutes(session: &SessionSubmission) -> i64 {
    (session.game_time as f64 / MS_PER_MINUTE).round() as i64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSessionRecord {
    pub id: i64,
    pub user_id: i64,
    pub score: i64,
    pub level: i64,
    pub game_time: i64,
    pub enemies_killed: i64,
    pub power_ups_collected: i64,
    pub accuracy: f64,
    pub played_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRanking {
    pub user_id: i64,
    pub category: String,
    pub timeframe: Timeframe,
    pub rank: i64,
    pub score: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHighScore {
    pub score: i64,
    pub level: i64,
    pub game_time: i64,
    pub enemies_killed: i64,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighScore {
    pub id: i64,
    pub user_id: i64,
    pub score: i64,
    pub level: i64,
    pub game_time: i64,
    pub enemies_killed: i64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    Daily,
    Weekly,
    Monthly,
    #[default]
    All,
}

impl Timeframe {
    pub const ALL: [Timeframe; 4] = [
        Timeframe::Daily,
        Timeframe::Weekly,
        Timeframe::Monthly,
        Timeframe::All,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::Daily => "daily",
            Timeframe::Weekly => "weekly",
            Timeframe::Monthly => "monthly",
            Timeframe::All => "all",
        }
    }

    /// Earliest `played_at` that counts; `None` for all-time.
    pub fn cutoff(self, now: i64) -> Option<i64> {
        match self {
            Timeframe::Daily => Some(now - DAY_MS),
            Timeframe::Weekly => Some(now - 7 * DAY_MS),
            Timeframe::Monthly => Some(now - 30 * DAY_MS),
            Timeframe::All => None,
        }
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "daily" => Ok(Timeframe::Daily),
            "weekly" => Ok(Timeframe::Weekly),
            "monthly" => Ok(Timeframe::Monthly),
            "all" => Ok(Timeframe::All),
            other => Err(format!("unknown timeframe `{other}`")),
        }
    }
}

/// All-time board row. `level` carries games played.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllTimeEntry {
    pub user_id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub profile_picture: Option<String>,
    pub score: i64,
    pub total_score: i64,
    pub level: i64,
    pub enemies_destroyed: i64,
    pub games_played: i64,
    pub time_played_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodEntry {
    pub user_id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub profile_picture: Option<String>,
    pub score: i64,
    pub level: i64,
    pub enemies_killed: i64,
    pub game_time: i64,
    pub played_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TopPlayer {
    AllTime(AllTimeEntry),
    Period(PeriodEntry),
}

impl TopPlayer {
    pub fn user_id(&self) -> i64 {
        match self {
            TopPlayer::AllTime(entry) => entry.user_id,
            TopPlayer::Period(entry) => entry.user_id,
        }
    }

    pub fn score(&self) -> i64 {
        match self {
            TopPlayer::AllTime(entry) => entry.score,
            TopPlayer::Period(entry) => entry.score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProfile {
    pub user: Option<User>,
    pub stats: Option<PlayerStats>,
    pub rankings: Vec<PlayerRanking>,
    pub recent_sessions: Vec<GameSessionRecord>,
}

pub trait Storage {
    fn get_user(&self, id: i64) -> StorageResult<Option<User>>;
    fn get_user_by_username(&self, username: &str) -> StorageResult<Option<User>>;
    fn get_user_by_farcaster_fid(&self, fid: i64) -> StorageResult<Option<User>>;
    fn create_user(&mut self, user: NewUser, now: i64) -> StorageResult<User>;

    fn get_player_stats(&self, user_id: i64) -> StorageResult<Option<PlayerStats>>;
    fn update_player_stats(&mut self, user_id: i64, patch: &StatsPatch, now: i64)
        -> StorageResult<()>;
    /// Inserts the session, then folds it into the player's stats row if
    /// one exists. Both steps finish before the call returns.
    fn save_game_session(
        &mut self,
        user_id: i64,
        session: &SessionSubmission,
        now: i64,
    ) -> StorageResult<()>;
    fn recent_sessions(&self, user_id: i64, limit: usize) -> StorageResult<Vec<GameSessionRecord>>;

    fn get_player_rankings(&self, user_id: i64) -> StorageResult<Vec<PlayerRanking>>;
    /// `category` is accepted for API compatibility; every category ranks by score.
    fn get_top_players(
        &self,
        category: &str,
        timeframe: Timeframe,
        limit: usize,
        now: i64,
    ) -> StorageResult<Vec<TopPlayer>>;
    fn search_players(&self, query: &str, limit: usize) -> StorageResult<Vec<User>>;
    fn replace_rankings(
        &mut self,
        category: &str,
        timeframe: Timeframe,
        rankings: Vec<PlayerRanking>,
    ) -> StorageResult<()>;

    fn save_high_score(&mut self, user_id: i64, score: NewHighScore, now: i64)
        -> StorageResult<()>;
    fn get_leaderboard(&self, limit: usize) -> StorageResult<Vec<HighScore>>;

    fn get_player_profile(&self, user_id: i64) -> StorageResult<PlayerProfile> {
        Ok(PlayerProfile {
            user: self.get_user(user_id)?,
            stats: self.get_player_stats(user_id)?,
            rankings: self.get_player_rankings(user_id)?,
            recent_sessions: self.recent_sessions(user_id, RECENT_SESSIONS_LIMIT)?,
        })
    }

    /// Rebuilds the score rankings for every timeframe, one row per player
    /// holding their best score in that window.
    fn update_player_rankings(&mut self, now: i64) -> StorageResult<()> {
        for timeframe in Timeframe::ALL {
            let board = self.get_top_players(RANKING_CATEGORY_SCORE, timeframe, usize::MAX, now)?;
            let rankings = best_per_player(board)
                .into_iter()
                .enumerate()
                .map(|(index, entry)| PlayerRanking {
                    user_id: entry.user_id(),
                    category: RANKING_CATEGORY_SCORE.to_string(),
                    timeframe,
                    rank: index as i64 + 1,
                    score: entry.score(),
                    updated_at: now,
                })
                .collect();
            self.replace_rankings(RANKING_CATEGORY_SCORE, timeframe, rankings)?;
        }
        Ok(())
    }
}

/// Keeps the first entry per user of a board already sorted by score desc.
fn best_per_player(board: Vec<TopPlayer>) -> Vec<TopPlayer> {
    let mut seen = std::collections::HashSet::new();
    board
        .into_iter()
        .filter(|entry| seen.insert(entry.user_id()))
        .collect()
}

pub fn sort_leaderboard(scores: &mut [HighScore]) {
    scores.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(b.level.cmp(&a.level))
            .then(a.game_time.cmp(&b.game_time))
    });
}

/// Opens the configured backend. A SQL backend that fails to open stays an
/// error; it never degrades to memory.
pub fn open_backend(
    kind: &StorageBackendKind,
    open_sql: impl FnOnce() -> StorageResult<Box<dyn Storage>>,
) -> StorageResult<Box<dyn Storage>> {
    match kind {
        StorageBackendKind::Sql => open_sql(),
        StorageBackendKind::Memory => Ok(Box::new(MemoryStorage::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_sql_open_is_not_replaced_by_memory() {
        let result = open_backend(&StorageBackendKind::Sql, || {
            Err(StorageError::Backend(worker::Error::RustError(
                "no such table".into(),
            )))
        });
        assert!(matches!(result, Err(StorageError::Backend(_))));
    }

    #[test]
    fn memory_backend_ignores_sql_opener() {
        let mut opened_sql = false;
        let result = open_backend(&StorageBackendKind::Memory, || {
            opened_sql = true;
            Ok(Box::new(MemoryStorage::new()) as Box<dyn Storage>)
        });
        assert!(result.is_ok());
        assert!(!opened_sql);
    }

    fn entry(id: i64, score: i64, level: i64, game_time: i64) -> HighScore {
        HighScore {
            id,
            user_id: id,
            score,
            level,
            game_time,
            enemies_killed: 0,
            timestamp: 0,
        }
    }

    #[test]
    fn leaderboard_breaks_ties_by_level_then_faster_time() {
        let mut scores = vec![
            entry(1, 500, 2, 90_000),
            entry(2, 500, 3, 120_000),
            entry(3, 500, 3, 60_000),
            entry(4, 800, 1, 10_000),
        ];
        sort_leaderboard(&mut scores);
        let order: Vec<i64> = scores.iter().map(|score| score.id).collect();
        assert_eq!(order, vec![4, 3, 2, 1]);
    }

    #[test]
    fn timeframe_cutoffs() {
        let now = 100 * DAY_MS;
        assert_eq!(Timeframe::Daily.cutoff(now), Some(99 * DAY_MS));
        assert_eq!(Timeframe::Weekly.cutoff(now), Some(93 * DAY_MS));
        assert_eq!(Timeframe::Monthly.cutoff(now), Some(70 * DAY_MS));
        assert_eq!(Timeframe::All.cutoff(now), None);
        assert_eq!("weekly".parse::<Timeframe>(), Ok(Timeframe::Weekly));
        assert!("yearly".parse::<Timeframe>().is_err());
    }

    #[test]
    fn recording_a_session_raises_high_score_only_upward() {
        let mut stats = PlayerStats::seeded(1, 0);
        let session = |score| SessionSubmission {
            score,
            level: 2,
            game_time: 150_000,
            enemies_killed: 4,
            power_ups_collected: 1,
            accuracy: 0.5,
        };

        stats.record_session(&session(300), 10);
        stats.record_session(&session(100), 20);

        assert_eq!(stats.games_played, 2);
        assert_eq!(stats.total_score, 400);
        assert_eq!(stats.enemies_destroyed, 8);
        assert_eq!(stats.time_played_minutes, 6);
        assert_eq!(stats.high_score, 300);
        assert_eq!(stats.last_played_at, Some(20));
    }
}
