use super::{
    sort_leaderboard, AllTimeEntry, GameSessionRecord, HighScore, NewHighScore, NewUser,
    PeriodEntry, PlayerRanking, PlayerStats, Storage, StorageError, StorageResult, Timeframe,
    TopPlayer, User, HIGH_SCORE_DEDUP_WINDOW_MS,
};
use galaxiga_core::{SessionSubmission, StatsPatch};
use std::collections::BTreeMap;

/// Process-local backend. State lives as long as the hosting durable object.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    users: BTreeMap<i64, User>,
    stats: BTreeMap<i64, PlayerStats>,
    sessions: Vec<GameSessionRecord>,
    rankings: Vec<PlayerRanking>,
    high_scores: Vec<HighScore>,
    next_user_id: i64,
    next_session_id: i64,
    next_high_score_id: i64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            next_user_id: 1,
            next_session_id: 1,
            next_high_score_id: 1,
            ..Self::default()
        }
    }

    fn user_matching(&self, predicate: impl Fn(&User) -> bool) -> Option<User> {
        self.users.values().find(|user| predicate(user)).cloned()
    }
}

impl Storage for MemoryStorage {
    fn get_user(&self, id: i64) -> StorageResult<Option<User>> {
        Ok(self.users.get(&id).cloned())
    }

    fn get_user_by_username(&self, username: &str) -> StorageResult<Option<User>> {
        Ok(self.user_matching(|user| user.username == username))
    }

    fn get_user_by_farcaster_fid(&self, fid: i64) -> StorageResult<Option<User>> {
        Ok(self.user_matching(|user| user.farcaster_fid == Some(fid)))
    }

    fn create_user(&mut self, user: NewUser, now: i64) -> StorageResult<User> {
        let id = self.next_user_id;
        self.next_user_id += 1;
        let user = User {
            id,
            username: user.username,
            display_name: user.display_name,
            profile_picture: user.profile_picture,
            farcaster_fid: user.farcaster_fid,
            created_at: now,
            last_active: now,
        };
        self.users.insert(id, user.clone());
        Ok(user)
    }

    fn get_player_stats(&self, user_id: i64) -> StorageResult<Option<PlayerStats>> {
        Ok(self.stats.get(&user_id).cloned())
    }

    fn update_player_stats(
        &mut self,
        user_id: i64,
        patch: &StatsPatch,
        now: i64,
    ) -> StorageResult<()> {
        self.stats
            .entry(user_id)
            .or_insert_with(|| PlayerStats::seeded(user_id, now))
            .apply(patch, now);
        Ok(())
    }

    fn save_game_session(
        &mut self,
        user_id: i64,
        session: &SessionSubmission,
        now: i64,
    ) -> StorageResult<()> {
        let id = self.next_session_id;
        self.next_session_id += 1;
        self.sessions.push(GameSessionRecord {
            id,
            user_id,
            score: session.score,
            level: i64::from(session.level),
            game_time: session.game_time,
            enemies_killed: session.enemies_killed,
            power_ups_collected: session.power_ups_collected,
            accuracy: session.accuracy,
            played_at: now,
        });

        if let Some(stats) = self.stats.get_mut(&user_id) {
            stats.record_session(session, now);
        }
        Ok(())
    }

    fn recent_sessions(&self, user_id: i64, limit: usize) -> StorageResult<Vec<GameSessionRecord>> {
        let mut sessions: Vec<GameSessionRecord> = self
            .sessions
            .iter()
            .filter(|session| session.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.played_at.cmp(&a.played_at).then(b.id.cmp(&a.id)));
        sessions.truncate(limit);
        Ok(sessions)
    }

    fn get_player_rankings(&self, user_id: i64) -> StorageResult<Vec<PlayerRanking>> {
        Ok(self
            .rankings
            .iter()
            .filter(|ranking| ranking.user_id == user_id)
            .cloned()
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
            let mut board: Vec<AllTimeEntry> = self
                .stats
                .values()
                .filter_map(|stats| {
                    let user = self.users.get(&stats.user_id)?;
                    Some(AllTimeEntry {
                        user_id: user.id,
                        username: user.username.clone(),
                        display_name: user.display_name.clone(),
                        profile_picture: user.profile_picture.clone(),
                        score: stats.high_score,
                        total_score: stats.total_score,
                        level: stats.games_played,
                        enemies_destroyed: stats.enemies_destroyed,
                        games_played: stats.games_played,
                        time_played_minutes: stats.time_played_minutes,
                    })
                })
                .collect();
            board.sort_by(|a, b| b.score.cmp(&a.score));
            return Ok(board.into_iter().take(limit).map(TopPlayer::AllTime).collect());
        };

        let mut board: Vec<PeriodEntry> = self
            .sessions
            .iter()
            .filter(|session| session.played_at >= cutoff)
            .filter_map(|session| {
                let user = self.users.get(&session.user_id)?;
                Some(PeriodEntry {
                    user_id: user.id,
                    username: user.username.clone(),
                    display_name: user.display_name.clone(),
                    profile_picture: user.profile_picture.clone(),
                    score: session.score,
                    level: session.level,
                    enemies_killed: session.enemies_killed,
                    game_time: session.game_time,
                    played_at: session.played_at,
                })
            })
            .collect();
        board.sort_by(|a, b| b.score.cmp(&a.score).then(a.game_time.cmp(&b.game_time)));
        Ok(board.into_iter().take(limit).map(TopPlayer::Period).collect())
    }

    fn search_players(&self, query: &str, limit: usize) -> StorageResult<Vec<User>> {
        let needle = query.to_lowercase();
        let matches = |value: &str| value.to_lowercase().contains(&needle);
        Ok(self
            .users
            .values()
            .filter(|user| {
                matches(&user.username) || user.display_name.as_deref().is_some_and(matches)
            })
            .take(limit)
            .cloned()
            .collect())
    }

    fn replace_rankings(
        &mut self,
        category: &str,
        timeframe: Timeframe,
        rankings: Vec<PlayerRanking>,
    ) -> StorageResult<()> {
        self.rankings
            .retain(|ranking| !(ranking.category == category && ranking.timeframe == timeframe));
        self.rankings.extend(rankings);
        Ok(())
    }

    fn save_high_score(
        &mut self,
        user_id: i64,
        score: NewHighScore,
        now: i64,
    ) -> StorageResult<()> {
        if !self.users.contains_key(&user_id) {
            return Err(StorageError::UserNotFound(user_id));
        }

        let id = self.next_high_score_id;
        self.next_high_score_id += 1;
        let entry = HighScore {
            id,
            user_id,
            score: score.score,
            level: score.level,
            game_time: score.game_time,
            enemies_killed: score.enemies_killed,
            timestamp: score.timestamp.unwrap_or(now),
        };

        self.high_scores.retain(|existing| {
            !(existing.user_id == user_id
                && (existing.timestamp - now).abs() < HIGH_SCORE_DEDUP_WINDOW_MS)
        });
        self.high_scores.push(entry);
        Ok(())
    }

    fn get_leaderboard(&self, limit: usize) -> StorageResult<Vec<HighScore>> {
        let mut board = self.high_scores.clone();
        sort_leaderboard(&mut board);
        board.truncate(limit);
        Ok(board)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DEFAULT_LEADERBOARD_LIMIT, DEFAULT_SEARCH_LIMIT};

    const DAY: i64 = 24 * 60 * 60 * 1000;

    fn with_user(username: &str, display_name: Option<&str>) -> (MemoryStorage, User) {
        let mut storage = MemoryStorage::new();
        let user = storage
            .create_user(
                NewUser {
                    username: username.to_string(),
                    display_name: display_name.map(str::to_string),
                    ..NewUser::default()
                },
                0,
            )
            .unwrap();
        (storage, user)
    }

    fn high_score(score: i64, level: i64, game_time: i64) -> NewHighScore {
        NewHighScore {
            score,
            level,
            game_time,
            enemies_killed: 3,
            timestamp: None,
        }
    }

    fn session(score: i64, game_time: i64) -> SessionSubmission {
        SessionSubmission {
            score,
            level: 2,
            game_time,
            enemies_killed: 5,
            power_ups_collected: 1,
            accuracy: 0.4,
        }
    }

    #[test]
    fn create_user_assigns_sequential_ids_without_stats() {
        let (mut storage, first) = with_user("ace", None);
        let second = storage
            .create_user(
                NewUser {
                    username: "bolt".into(),
                    farcaster_fid: Some(77),
                    ..NewUser::default()
                },
                5,
            )
            .unwrap();

        assert_eq!((first.id, second.id), (1, 2));
        assert_eq!(storage.get_player_stats(first.id).unwrap(), None);
        assert_eq!(storage.get_user_by_username("bolt").unwrap(), Some(second.clone()));
        assert_eq!(storage.get_user_by_farcaster_fid(77).unwrap(), Some(second));
    }

    #[test]
    fn save_high_score_rejects_unknown_user_without_mutation() {
        let (mut storage, user) = with_user("ace", None);
        storage.save_high_score(user.id, high_score(100, 1, 1_000), 0).unwrap();

        let result = storage.save_high_score(999, high_score(5_000, 9, 10), 0);

        assert!(matches!(result, Err(StorageError::UserNotFound(999))));
        assert_eq!(storage.get_leaderboard(DEFAULT_LEADERBOARD_LIMIT).unwrap().len(), 1);
    }

    #[test]
    fn high_scores_within_a_minute_replace_each_other() {
        let (mut storage, user) = with_user("ace", None);
        storage.save_high_score(user.id, high_score(100, 1, 1_000), 10_000).unwrap();
        storage.save_high_score(user.id, high_score(300, 2, 2_000), 40_000).unwrap();
        let board = storage.get_leaderboard(DEFAULT_LEADERBOARD_LIMIT).unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].score, 300);

        storage.save_high_score(user.id, high_score(200, 2, 2_000), 200_000).unwrap();
        assert_eq!(storage.get_leaderboard(DEFAULT_LEADERBOARD_LIMIT).unwrap().len(), 2);
    }

    #[test]
    fn high_score_ids_stay_unique_after_dedup() {
        let (mut storage, user) = with_user("ace", None);
        storage.save_high_score(user.id, high_score(100, 1, 1_000), 10_000).unwrap();
        storage.save_high_score(user.id, high_score(300, 2, 2_000), 40_000).unwrap();
        storage.save_high_score(user.id, high_score(200, 2, 2_000), 200_000).unwrap();

        let ids: Vec<i64> = storage
            .get_leaderboard(DEFAULT_LEADERBOARD_LIMIT)
            .unwrap()
            .iter()
            .map(|entry| entry.id)
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn leaderboard_orders_by_score_level_then_time() {
        let mut storage = MemoryStorage::new();
        let mut ids = Vec::new();
        for name in ["a", "b", "c"] {
            ids.push(
                storage
                    .create_user(
                        NewUser {
                            username: name.into(),
                            ..NewUser::default()
                        },
                        0,
                    )
                    .unwrap()
                    .id,
            );
        }
        storage.save_high_score(ids[0], high_score(500, 3, 90_000), 0).unwrap();
        storage.save_high_score(ids[1], high_score(500, 3, 45_000), 0).unwrap();
        storage.save_high_score(ids[2], high_score(500, 4, 99_000), 0).unwrap();

        let board = storage.get_leaderboard(2).unwrap();
        let users: Vec<i64> = board.iter().map(|score| score.user_id).collect();
        assert_eq!(users, vec![ids[2], ids[1]]);
    }

    #[test]
    fn update_player_stats_upserts() {
        let (mut storage, user) = with_user("ace", None);
        storage
            .update_player_stats(
                user.id,
                &StatsPatch {
                    social_shares: Some(2),
                    ..StatsPatch::default()
                },
                50,
            )
            .unwrap();

        let stats = storage.get_player_stats(user.id).unwrap().unwrap();
        assert_eq!(stats.social_shares, 2);
        assert_eq!(stats.streak_days, 1);
        assert_eq!(stats.updated_at, 50);
    }

    #[test]
    fn game_session_folds_into_existing_stats() {
        let (mut storage, user) = with_user("ace", None);
        storage.update_player_stats(user.id, &StatsPatch::default(), 0).unwrap();

        storage.save_game_session(user.id, &session(700, 90_000), 1_000).unwrap();
        storage.save_game_session(user.id, &session(300, 30_000), 2_000).unwrap();

        let stats = storage.get_player_stats(user.id).unwrap().unwrap();
        assert_eq!(stats.games_played, 2);
        assert_eq!(stats.total_score, 1_000);
        assert_eq!(stats.enemies_destroyed, 10);
        assert_eq!(stats.time_played_minutes, 3);
        assert_eq!(stats.high_score, 700);

        let recent = storage.recent_sessions(user.id, 10).unwrap();
        assert_eq!(recent[0].score, 300);
    }

    #[test]
    fn game_session_without_stats_row_only_records_session() {
        let (mut storage, user) = with_user("ace", None);
        storage.save_game_session(user.id, &session(700, 90_000), 1_000).unwrap();

        assert_eq!(storage.get_player_stats(user.id).unwrap(), None);
        assert_eq!(storage.recent_sessions(user.id, 10).unwrap().len(), 1);
    }

    #[test]
    fn search_is_case_insensitive_over_username_and_display_name() {
        let (mut storage, _) = with_user("StarPilot", None);
        storage
            .create_user(
                NewUser {
                    username: "zz".into(),
                    display_name: Some("Pilot Zed".into()),
                    ..NewUser::default()
                },
                0,
            )
            .unwrap();
        storage
            .create_user(
                NewUser {
                    username: "other".into(),
                    ..NewUser::default()
                },
                0,
            )
            .unwrap();

        let found = storage.search_players("PILOT", DEFAULT_SEARCH_LIMIT).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(storage.search_players("pilot", 1).unwrap().len(), 1);
    }

    #[test]
    fn top_players_respect_timeframe_cutoffs() {
        let (mut storage, user) = with_user("ace", None);
        let now = 40 * DAY;
        storage.save_game_session(user.id, &session(100, 1), now - DAY / 2).unwrap();
        storage.save_game_session(user.id, &session(200, 1), now - 3 * DAY).unwrap();
        storage.save_game_session(user.id, &session(300, 1), now - 20 * DAY).unwrap();
        storage.save_game_session(user.id, &session(400, 1), now - 35 * DAY).unwrap();

        let scores = |timeframe| -> Vec<i64> {
            storage
                .get_top_players("score", timeframe, 10, now)
                .unwrap()
                .iter()
                .map(TopPlayer::score)
                .collect()
        };
        assert_eq!(scores(Timeframe::Daily), vec![100]);
        assert_eq!(scores(Timeframe::Weekly), vec![200, 100]);
        assert_eq!(scores(Timeframe::Monthly), vec![300, 200, 100]);
    }

    #[test]
    fn all_time_board_ranks_by_high_score_and_reports_games_as_level() {
        let (mut storage, ace) = with_user("ace", None);
        let bolt = storage
            .create_user(
                NewUser {
                    username: "bolt".into(),
                    ..NewUser::default()
                },
                0,
            )
            .unwrap();
        for (user, high, games) in [(&ace, 900, 4), (&bolt, 1_200, 2)] {
            storage
                .update_player_stats(
                    user.id,
                    &StatsPatch {
                        high_score: Some(high),
                        games_played: Some(games),
                        ..StatsPatch::default()
                    },
                    0,
                )
                .unwrap();
        }

        let board = storage.get_top_players("kills", Timeframe::All, 10, 0).unwrap();
        match &board[0] {
            TopPlayer::AllTime(entry) => {
                assert_eq!(entry.username, "bolt");
                assert_eq!(entry.level, 2);
            }
            other => panic!("expected all-time entry, got {other:?}"),
        }
        assert_eq!(board[1].user_id(), ace.id);
    }

    #[test]
    fn rankings_rebuild_per_timeframe_with_best_session() {
        let (mut storage, ace) = with_user("ace", None);
        let bolt = storage
            .create_user(
                NewUser {
                    username: "bolt".into(),
                    ..NewUser::default()
                },
                0,
            )
            .unwrap();
        let now = 10 * DAY;
        storage.save_game_session(ace.id, &session(500, 1), now - 1_000).unwrap();
        storage.save_game_session(ace.id, &session(900, 1), now - 2_000).unwrap();
        storage.save_game_session(bolt.id, &session(700, 1), now - 3_000).unwrap();

        storage.update_player_rankings(now).unwrap();
        storage.update_player_rankings(now).unwrap();

        let ace_rankings = storage.get_player_rankings(ace.id).unwrap();
        let daily = ace_rankings
            .iter()
            .find(|ranking| ranking.timeframe == Timeframe::Daily)
            .unwrap();
        assert_eq!((daily.rank, daily.score), (1, 900));
        assert_eq!(ace_rankings.len(), 3, "no stats row means no all-time ranking");

        let bolt_daily = storage.get_player_rankings(bolt.id).unwrap();
        assert_eq!(bolt_daily[0].rank, 2);
    }

    #[test]
    fn profile_bundles_user_stats_rankings_and_recent_sessions() {
        let (mut storage, user) = with_user("ace", Some("Ace"));
        storage.update_player_stats(user.id, &StatsPatch::default(), 0).unwrap();
        for index in 0..12 {
            storage.save_game_session(user.id, &session(index, 1), index).unwrap();
        }

        let profile = storage.get_player_profile(user.id).unwrap();
        assert_eq!(profile.user, Some(user));
        assert_eq!(profile.stats.map(|stats| stats.games_played), Some(12));
        assert!(profile.rankings.is_empty());
        assert_eq!(profile.recent_sessions.len(), 10);
        assert_eq!(profile.recent_sessions[0].score, 11);

        let missing = storage.get_player_profile(404).unwrap();
        assert_eq!(missing.user, None);
    }
}
