use super::{
    session_minutes, AllTimeEntry, GameSessionRecord, HighScore, NewHighScore, NewUser,
    PeriodEntry, PlayerRanking, PlayerStats, Storage, StorageError, StorageResult, Timeframe,
    TopPlayer, User,
};
use galaxiga_core::{SessionSubmission, StatsPatch};
use serde::Deserialize;
use worker::{Result, SqlStorage, SqlStorageValue};

pub struct SqlStorageBackend {
    sql: SqlStorage,
}

#[derive(Debug, Deserialize)]
struct IdRow {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct UserRow {
    id: i64,
    username: String,
    display_name: Option<String>,
    profile_picture: Option<String>,
    farcaster_fid: Option<i64>,
    created_at: i64,
    last_active: i64,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            display_name: row.display_name,
            profile_picture: row.profile_picture,
            farcaster_fid: row.farcaster_fid,
            created_at: row.created_at,
            last_active: row.last_active,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlayerStatsRow {
    user_id: i64,
    total_score: i64,
    high_score: i64,
    enemies_destroyed: i64,
    games_played: i64,
    time_played_minutes: i64,
    streak_days: i64,
    social_shares: i64,
    friends_invited: i64,
    last_played_at: Option<i64>,
    updated_at: i64,
}

impl From<PlayerStatsRow> for PlayerStats {
    fn from(row: PlayerStatsRow) -> Self {
        Self {
            user_id: row.user_id,
            total_score: row.total_score,
            high_score: row.high_score,
            enemies_destroyed: row.enemies_destroyed,
            games_played: row.games_played,
            time_played_minutes: row.time_played_minutes,
            streak_days: row.streak_days,
            social_shares: row.social_shares,
            friends_invited: row.friends_invited,
            last_played_at: row.last_played_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GameSessionRow {
    id: i64,
    user_id: i64,
    score: i64,
    level: i64,
    game_time: i64,
    enemies_killed: i64,
    power_ups_collected: i64,
    accuracy: f64,
    played_at: i64,
}

impl From<GameSessionRow> for GameSessionRecord {
    fn from(row: GameSessionRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            score: row.score,
            level: row.level,
            game_time: row.game_time,
            enemies_killed: row.enemies_killed,
            power_ups_collected: row.power_ups_collected,
            accuracy: row.accuracy,
            played_at: row.played_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RankingRow {
    user_id: i64,
    category: String,
    timeframe: String,
    rank: i64,
    score: i64,
    updated_at: i64,
}

#[derive(Debug, Deserialize)]
struct HighScoreRow {
    id: i64,
    user_id: i64,
    score: i64,
    level: i64,
    game_time: i64,
    enemies_killed: i64,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct AllTimeRow {
    user_id: i64,
    username: String,
    display_name: Option<String>,
    profile_picture: Option<String>,
    score: i64,
    total_score: i64,
    level: i64,
    enemies_destroyed: i64,
    games_played: i64,
    time_played_minutes: i64,
}

#[derive(Debug, Deserialize)]
struct PeriodRow {
    user_id: i64,
    username: String,
    display_name: Option<String>,
    profile_picture: Option<String>,
    score: i64,
    level: i64,
    enemies_killed: i64,
    game_time: i64,
    played_at: i64,
}

const USER_COLUMNS: &str =
    "id, username, display_name, profile_picture, farcaster_fid, created_at, last_active";

fn nullable<T: Into<SqlStorageValue>>(value: Option<T>) -> SqlStorageValue {
    value.map(Into::into).unwrap_or(SqlStorageValue::Null)
}

/// SQLite treats a negative LIMIT as unbounded.
fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(-1)
}

fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

impl SqlStorageBackend {
    pub fn new(sql: SqlStorage) -> Result<Self> {
        let backend = Self { sql };
        backend.initialize_schema()?;
        Ok(backend)
    }

    fn initialize_schema(&self) -> Result<()> {
        self.sql.exec(
            "
            CREATE TABLE IF NOT EXISTS users (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              username TEXT NOT NULL UNIQUE,
              display_name TEXT,
              profile_picture TEXT,
              farcaster_fid INTEGER UNIQUE,
              created_at INTEGER NOT NULL,
              last_active INTEGER NOT NULL
            )
            ",
            None,
        )?;

        self.sql.exec(
            "
            CREATE TABLE IF NOT EXISTS player_stats (
              user_id INTEGER PRIMARY KEY,
              total_score INTEGER NOT NULL DEFAULT 0,
              high_score INTEGER NOT NULL DEFAULT 0,
              enemies_destroyed INTEGER NOT NULL DEFAULT 0,
              games_played INTEGER NOT NULL DEFAULT 0,
              time_played_minutes INTEGER NOT NULL DEFAULT 0,
              streak_days INTEGER NOT NULL DEFAULT 1,
              social_shares INTEGER NOT NULL DEFAULT 0,
              friends_invited INTEGER NOT NULL DEFAULT 0,
              last_played_at INTEGER,
              updated_at INTEGER NOT NULL
            )
            ",
            None,
        )?;

        self.sql.exec(
            "
            CREATE TABLE IF NOT EXISTS game_sessions (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              user_id INTEGER NOT NULL,
              score INTEGER NOT NULL,
              level INTEGER NOT NULL,
              game_time INTEGER NOT NULL,
              enemies_killed INTEGER NOT NULL,
              power_ups_collected INTEGER NOT NULL,
              accuracy REAL NOT NULL,
              played_at INTEGER NOT NULL
            )
            ",
            None,
        )?;

        self.sql.exec(
            "CREATE INDEX IF NOT EXISTS idx_game_sessions_user_played ON game_sessions (user_id, played_at)",
            None,
        )?;

        self.sql.exec(
            "CREATE INDEX IF NOT EXISTS idx_game_sessions_played ON game_sessions (played_at)",
            None,
        )?;

        self.sql.exec(
            "
            CREATE TABLE IF NOT EXISTS player_rankings (
              user_id INTEGER NOT NULL,
              category TEXT NOT NULL,
              timeframe TEXT NOT NULL,
              rank INTEGER NOT NULL,
              score INTEGER NOT NULL,
              updated_at INTEGER NOT NULL,
              PRIMARY KEY (user_id, category, timeframe)
            )
            ",
            None,
        )?;

        self.sql.exec(
            "
            CREATE TABLE IF NOT EXISTS high_scores (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              user_id INTEGER NOT NULL,
              score INTEGER NOT NULL,
              level INTEGER NOT NULL,
              game_time INTEGER NOT NULL,
              enemies_killed INTEGER NOT NULL,
              timestamp INTEGER NOT NULL
            )
            ",
            None,
        )?;

        Ok(())
    }

    fn first_user(&self, filter: &str, value: SqlStorageValue) -> Result<Option<User>> {
        let rows: Vec<UserRow> = self
            .sql
            .exec(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE {filter} LIMIT 1"),
                Some(vec![value]),
            )?
            .to_array()?;
        Ok(rows.into_iter().next().map(User::from))
    }
}

impl Storage for SqlStorageBackend {
    fn get_user(&self, id: i64) -> StorageResult<Option<User>> {
        Ok(self.first_user("id = ?", id.into())?)
    }

    fn get_user_by_username(&self, username: &str) -> StorageResult<Option<User>> {
        Ok(self.first_user("username = ?", username.into())?)
    }

    fn get_user_by_farcaster_fid(&self, fid: i64) -> StorageResult<Option<User>> {
        Ok(self.first_user("farcaster_fid = ?", fid.into())?)
    }

    fn create_user(&mut self, user: NewUser, now: i64) -> StorageResult<User> {
        let rows: Vec<IdRow> = self
            .sql
            .exec(
                "
                INSERT INTO users (username, display_name, profile_picture, farcaster_fid, created_at, last_active)
                VALUES (?, ?, ?, ?, ?, ?)
                RETURNING id
                ",
                Some(vec![
                    user.username.as_str().into(),
                    nullable(user.display_name.clone()),
                    nullable(user.profile_picture.clone()),
                    nullable(user.farcaster_fid),
                    now.into(),
                    now.into(),
                ]),
            )?
            .to_array()?;
        let id = rows
            .into_iter()
            .next()
            .map(|row| row.id)
            .ok_or_else(|| worker::Error::RustError("user insert returned no id".into()))?;

        let seeded = PlayerStats::seeded(id, now);
        self.sql.exec(
            "
            INSERT INTO player_stats (
              user_id, total_score, high_score, enemies_destroyed, games_played,
              time_played_minutes, streak_days, social_shares, friends_invited, updated_at
            )
            VALUES (?, 0, 0, 0, 0, 0, ?, 0, 0, ?)
            ",
            Some(vec![id.into(), seeded.streak_days.into(), now.into()]),
        )?;

        Ok(User {
            id,
            username: user.username,
            display_name: user.display_name,
            profile_picture: user.profile_picture,
            farcaster_fid: user.farcaster_fid,
            created_at: now,
            last_active: now,
        })
    }

    fn get_player_stats(&self, user_id: i64) -> StorageResult<Option<PlayerStats>> {
        let rows: Vec<PlayerStatsRow> = self
            .sql
            .exec(
                "
                SELECT user_id, total_score, high_score, enemies_destroyed, games_played,
                       time_played_minutes, streak_days, social_shares, friends_invited,
                       last_played_at, updated_at
                FROM player_stats
                WHERE user_id = ?
                LIMIT 1
                ",
                Some(vec![user_id.into()]),
            )?
            .to_array()?;
        Ok(rows.into_iter().next().map(PlayerStats::from))
    }

    fn update_player_stats(
        &mut self,
        user_id: i64,
        patch: &StatsPatch,
        now: i64,
    ) -> StorageResult<()> {
        self.sql.exec(
            "
            UPDATE player_stats SET
              total_score = COALESCE(?, total_score),
              high_score = COALESCE(?, high_score),
              enemies_destroyed = COALESCE(?, enemies_destroyed),
              games_played = COALESCE(?, games_played),
              time_played_minutes = COALESCE(?, time_played_minutes),
              streak_days = COALESCE(?, streak_days),
              social_shares = COALESCE(?, social_shares),
              friends_invited = COALESCE(?, friends_invited),
              updated_at = ?
            WHERE user_id = ?
            ",
            Some(vec![
                nullable(patch.total_score),
                nullable(patch.high_score),
                nullable(patch.enemies_destroyed),
                nullable(patch.games_played),
                nullable(patch.time_played_minutes),
                nullable(patch.streak_days),
                nullable(patch.social_shares),
                nullable(patch.friends_invited),
                now.into(),
                user_id.into(),
            ]),
        )?;
        Ok(())
    }

    fn save_game_session(
        &mut self,
        user_id: i64,
        session: &SessionSubmission,
        now: i64,
    ) -> StorageResult<()> {
        self.sql.exec(
            "
            INSERT INTO game_sessions (
              user_id, score, level, game_time, enemies_killed, power_ups_collected, accuracy, played_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ",
            Some(vec![
                user_id.into(),
                session.score.into(),
                i64::from(session.level).into(),
                session.game_time.into(),
                session.enemies_killed.into(),
                session.power_ups_collected.into(),
                session.accuracy.into(),
                now.into(),
            ]),
        )?;

        self.sql.exec(
            "
            UPDATE player_stats SET
              games_played = games_played + 1,
              total_score = total_score + ?,
              enemies_destroyed = enemies_destroyed + ?,
              time_played_minutes = time_played_minutes + ?,
              high_score = MAX(high_score, ?),
              last_played_at = ?,
              updated_at = ?
            WHERE user_id = ?
            ",
            Some(vec![
                session.score.into(),
                session.enemies_killed.into(),
                session_minutes(session).into(),
                session.score.into(),
                now.into(),
                now.into(),
                user_id.into(),
            ]),
        )?;

        Ok(())
    }

    fn recent_sessions(&self, user_id: i64, limit: usize) -> StorageResult<Vec<GameSessionRecord>> {
        let rows: Vec<GameSessionRow> = self
            .sql
            .exec(
                "
                SELECT id, user_id, score, level, game_time, enemies_killed,
                       power_ups_collected, accuracy, played_at
                FROM game_sessions
                WHERE user_id = ?
                ORDER BY played_at DESC, id DESC
                LIMIT ?
                ",
                Some(vec![user_id.into(), sql_limit(limit).into()]),
            )?
            .to_array()?;
        Ok(rows.into_iter().map(GameSessionRecord::from).collect())
    }

    fn get_player_rankings(&self, user_id: i64) -> StorageResult<Vec<PlayerRanking>> {
        let rows: Vec<RankingRow> = self
            .sql
            .exec(
                "
                SELECT user_id, category, timeframe, rank, score, updated_at
                FROM player_rankings
                WHERE user_id = ?
                ",
                Some(vec![user_id.into()]),
            )?
            .to_array()?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let timeframe = row.timeframe.parse().ok()?;
                Some(PlayerRanking {
                    user_id: row.user_id,
                    category: row.category,
                    timeframe,
                    rank: row.rank,
                    score: row.score,
                    updated_at: row.updated_at,
                })
            })
            .collect())
    }

    fn get_top_players(
        &self,
        _category: &str,
        timeframe: Timeframe,
        limit: usize,
        now: i64,
    ) -> StorageResult<Vec<TopPlayer>> {
        let Some(cutoff) = timeframe.cutoff(now) else {
            let rows: Vec<AllTimeRow> = self
                .sql
                .exec(
                    "
                    SELECT u.id AS user_id, u.username, u.display_name, u.profile_picture,
                           s.high_score AS score, s.total_score, s.games_played AS level,
                           s.enemies_destroyed, s.games_played, s.time_played_minutes
                    FROM player_stats s
                    JOIN users u ON u.id = s.user_id
                    ORDER BY s.high_score DESC
                    LIMIT ?
                    ",
                    Some(vec![sql_limit(limit).into()]),
                )?
                .to_array()?;

            return Ok(rows
                .into_iter()
                .map(|row| {
                    TopPlayer::AllTime(AllTimeEntry {
                        user_id: row.user_id,
                        username: row.username,
                        display_name: row.display_name,
                        profile_picture: row.profile_picture,
                        score: row.score,
                        total_score: row.total_score,
                        level: row.level,
                        enemies_destroyed: row.enemies_destroyed,
                        games_played: row.games_played,
                        time_played_minutes: row.time_played_minutes,
                    })
                })
                .collect());
        };

        let rows: Vec<PeriodRow> = self
            .sql
            .exec(
                "
                SELECT u.id AS user_id, u.username, u.display_name, u.profile_picture,
                       g.score, g.level, g.enemies_killed, g.game_time, g.played_at
                FROM game_sessions g
                JOIN users u ON u.id = g.user_id
                WHERE g.played_at >= ?
                ORDER BY g.score DESC, g.game_time ASC
                LIMIT ?
                ",
                Some(vec![cutoff.into(), sql_limit(limit).into()]),
            )?
            .to_array()?;

        Ok(rows
            .into_iter()
            .map(|row| {
                TopPlayer::Period(PeriodEntry {
                    user_id: row.user_id,
                    username: row.username,
                    display_name: row.display_name,
                    profile_picture: row.profile_picture,
                    score: row.score,
                    level: row.level,
                    enemies_killed: row.enemies_killed,
                    game_time: row.game_time,
                    played_at: row.played_at,
                })
            })
            .collect())
    }

    fn search_players(&self, query: &str, limit: usize) -> StorageResult<Vec<User>> {
        let pattern = like_pattern(query);
        let rows: Vec<UserRow> = self
            .sql
            .exec(
                &format!(
                    "
                    SELECT {USER_COLUMNS}
                    FROM users
                    WHERE username LIKE ? ESCAPE '\\' OR display_name LIKE ? ESCAPE '\\'
                    LIMIT ?
                    "
                ),
                Some(vec![
                    pattern.as_str().into(),
                    pattern.as_str().into(),
                    sql_limit(limit).into(),
                ]),
            )?
            .to_array()?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    fn replace_rankings(
        &mut self,
        category: &str,
        timeframe: Timeframe,
        rankings: Vec<PlayerRanking>,
    ) -> StorageResult<()> {
        self.sql.exec(
            "DELETE FROM player_rankings WHERE category = ? AND timeframe = ?",
            Some(vec![category.into(), timeframe.as_str().into()]),
        )?;

        for ranking in rankings {
            self.sql.exec(
                "
                INSERT INTO player_rankings (user_id, category, timeframe, rank, score, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(user_id, category, timeframe) DO UPDATE SET
                  rank = excluded.rank,
                  score = excluded.score,
                  updated_at = excluded.updated_at
                ",
                Some(vec![
                    ranking.user_id.into(),
                    ranking.category.as_str().into(),
                    ranking.timeframe.as_str().into(),
                    ranking.rank.into(),
                    ranking.score.into(),
                    ranking.updated_at.into(),
                ]),
            )?;
        }

        Ok(())
    }

    fn save_high_score(
        &mut self,
        user_id: i64,
        score: NewHighScore,
        now: i64,
    ) -> StorageResult<()> {
        if self.get_user(user_id)?.is_none() {
            return Err(StorageError::UserNotFound(user_id));
        }

        self.sql.exec(
            "
            INSERT INTO high_scores (user_id, score, level, game_time, enemies_killed, timestamp)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
            Some(vec![
                user_id.into(),
                score.score.into(),
                score.level.into(),
                score.game_time.into(),
                score.enemies_killed.into(),
                score.timestamp.unwrap_or(now).into(),
            ]),
        )?;
        Ok(())
    }

    fn get_leaderboard(&self, limit: usize) -> StorageResult<Vec<HighScore>> {
        let rows: Vec<HighScoreRow> = self
            .sql
            .exec(
                "
                SELECT id, user_id, score, level, game_time, enemies_killed, timestamp
                FROM high_scores
                ORDER BY score DESC, level DESC, game_time ASC
                LIMIT ?
                ",
                Some(vec![sql_limit(limit).into()]),
            )?
            .to_array()?;

        Ok(rows
            .into_iter()
            .map(|row| HighScore {
                id: row.id,
                user_id: row.user_id,
                score: row.score,
                level: row.level,
                game_time: row.game_time,
                enemies_killed: row.enemies_killed,
                timestamp: row.timestamp,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("ace"), "%ace%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn unbounded_limit_maps_to_negative() {
        assert_eq!(sql_limit(10), 10);
        assert_eq!(sql_limit(usize::MAX), -1);
    }
}
