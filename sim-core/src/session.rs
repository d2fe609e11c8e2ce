use crate::api::{ApiOutbox, ApiOutcome, ApiPurpose, HttpMethod, SESSION_PATH};
use crate::stats::{PlayerStatsStore, StatsPatch};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

pub const STARTING_LIVES: i32 = 3;
pub const STARTING_LEVEL: i32 = 1;
const MS_PER_MINUTE: f64 = 60_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    #[default]
    Ready,
    Playing,
    Paused,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub enemies_killed: i64,
    pub power_ups_collected: i64,
    pub bullets_shot: i64,
    pub bullets_hit: i64,
    pub max_level: i32,
}

impl Default for SessionData {
    fn default() -> Self {
        Self::starting_at(0)
    }
}

impl SessionData {
    fn starting_at(start_time: i64) -> Self {
        Self {
            start_time,
            end_time: None,
            enemies_killed: 0,
            power_ups_collected: 0,
            bullets_shot: 0,
            bullets_hit: 0,
            max_level: STARTING_LEVEL,
        }
    }

    pub fn accuracy(&self) -> f64 {
        if self.bullets_shot > 0 {
            self.bullets_hit as f64 / self.bullets_shot as f64
        } else {
            0.0
        }
    }
}

/// Partial session data; `None` fields keep the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionOverrides {
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub enemies_killed: Option<i64>,
    pub power_ups_collected: Option<i64>,
    pub bullets_shot: Option<i64>,
    pub bullets_hit: Option<i64>,
    pub max_level: Option<i32>,
}

impl SessionOverrides {
    fn apply(&self, data: &mut SessionData) {
        if let Some(start_time) = self.start_time {
            data.start_time = start_time;
        }
        if let Some(end_time) = self.end_time {
            data.end_time = Some(end_time);
        }
        if let Some(enemies_killed) = self.enemies_killed {
            data.enemies_killed = enemies_killed;
        }
        if let Some(power_ups_collected) = self.power_ups_collected {
            data.power_ups_collected = power_ups_collected;
        }
        if let Some(bullets_shot) = self.bullets_shot {
            data.bullets_shot = bullets_shot;
        }
        if let Some(bullets_hit) = self.bullets_hit {
            data.bullets_hit = bullets_hit;
        }
        if let Some(max_level) = self.max_level {
            data.max_level = max_level;
        }
    }
}

/// Body of `POST /api/game/session`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSubmission {
    pub score: i64,
    pub level: i32,
    pub game_time: i64,
    pub enemies_killed: i64,
    pub power_ups_collected: i64,
    pub accuracy: f64,
}

impl SessionSubmission {
    pub fn minutes_played(&self) -> i64 {
        (self.game_time as f64 / MS_PER_MINUTE).round() as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    #[serde(flatten)]
    pub data: SessionData,
    pub game_time: i64,
    pub accuracy: f64,
}

#[derive(Debug, Clone)]
struct PendingSubmission {
    submission: SessionSubmission,
    final_data: SessionData,
    round: u64,
}

#[derive(Debug, Clone)]
pub struct GameSession {
    phase: GamePhase,
    score: i64,
    lives: i32,
    level: i32,
    data: SessionData,
    round: u64,
    pending: Option<PendingSubmission>,
}

impl Default for GameSession {
    fn default() -> Self {
        Self {
            phase: GamePhase::Ready,
            score: 0,
            lives: STARTING_LIVES,
            level: STARTING_LEVEL,
            data: SessionData::default(),
            round: 0,
            pending: None,
        }
    }
}

impl GameSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    pub fn score(&self) -> i64 {
        self.score
    }

    pub fn lives(&self) -> i32 {
        self.lives
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    pub fn data(&self) -> &SessionData {
        &self.data
    }

    /// True between `end_game` and the host answering the save request.
    pub fn is_saving(&self) -> bool {
        self.pending.is_some()
    }

    pub fn start_game(&mut self, now: i64) {
        self.phase = GamePhase::Playing;
        self.data = SessionData::starting_at(now);
        self.round += 1;
    }

    pub fn pause_game(&mut self) {
        self.phase = GamePhase::Paused;
    }

    pub fn resume_game(&mut self) {
        self.phase = GamePhase::Playing;
    }

    /// Builds the save payload and queues it. The phase only becomes
    /// `Ended` once the host resolves the request.
    pub fn end_game(
        &mut self,
        overrides: SessionOverrides,
        now: i64,
        outbox: &mut ApiOutbox,
    ) -> SessionSubmission {
        if let Some(pending) = &self.pending {
            return pending.submission.clone();
        }

        let game_time = now - self.data.start_time;
        let mut final_data = self.data;
        final_data.end_time = Some(now);
        overrides.apply(&mut final_data);

        let submission = SessionSubmission {
            score: self.score,
            level: final_data.max_level,
            game_time,
            enemies_killed: final_data.enemies_killed,
            power_ups_collected: final_data.power_ups_collected,
            accuracy: final_data.accuracy(),
        };

        match serde_json::to_value(&submission) {
            Ok(body) => {
                outbox.queue(
                    HttpMethod::Post,
                    SESSION_PATH,
                    Some(body),
                    true,
                    ApiPurpose::SaveSession,
                );
            }
            Err(err) => error!(%err, "failed to encode game session"),
        }

        self.pending = Some(PendingSubmission {
            submission: submission.clone(),
            final_data,
            round: self.round,
        });
        submission
    }

    pub fn resolve_submission(
        &mut self,
        outcome: &ApiOutcome,
        stats: &mut PlayerStatsStore,
        outbox: &mut ApiOutbox,
    ) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let submission = &pending.submission;

        if outcome.is_success() {
            info!(score = submission.score, "game session saved");
            let current = *stats.stats();
            stats.update_stats(
                StatsPatch {
                    games_played: Some(current.games_played + 1),
                    total_score: Some(current.total_score + submission.score),
                    enemies_destroyed: Some(current.enemies_destroyed + submission.enemies_killed),
                    time_played_minutes: Some(
                        current.time_played_minutes + submission.minutes_played(),
                    ),
                    ..StatsPatch::default()
                },
                outbox,
            );
            if submission.score > current.high_score {
                stats.update_stats(
                    StatsPatch {
                        high_score: Some(submission.score),
                        ..StatsPatch::default()
                    },
                    outbox,
                );
            }
        } else {
            error!(status = outcome.status, body = %outcome.body, "failed to save game session");
        }

        // A restart while the save was in flight already moved on to a new round.
        if pending.round == self.round {
            self.phase = GamePhase::Ended;
            self.data = pending.final_data;
        }
    }

    pub fn restart_game(&mut self) {
        self.phase = GamePhase::Ready;
        self.score = 0;
        self.lives = STARTING_LIVES;
        self.level = STARTING_LEVEL;
        self.data = SessionData::default();
        self.round += 1;
    }

    pub fn set_score(&mut self, score: i64) {
        self.score = score;
    }

    pub fn set_lives(&mut self, lives: i32) {
        self.lives = lives;
    }

    pub fn set_level(&mut self, level: i32) {
        self.level = level;
        self.data.max_level = self.data.max_level.max(level);
    }

    pub fn increment_level(&mut self) {
        self.set_level(self.level + 1);
    }

    pub fn update_session_data(&mut self, overrides: SessionOverrides) {
        overrides.apply(&mut self.data);
    }

    pub fn increment_enemies_killed(&mut self) {
        self.data.enemies_killed += 1;
    }

    pub fn increment_power_ups_collected(&mut self) {
        self.data.power_ups_collected += 1;
    }

    pub fn increment_bullet_stats(&mut self, shot: bool, hit: bool) {
        self.data.bullets_shot += i64::from(shot);
        self.data.bullets_hit += i64::from(hit);
    }

    pub fn session_stats(&self, now: i64) -> SessionSnapshot {
        let end = self.data.end_time.unwrap_or(now);
        SessionSnapshot {
            data: self.data,
            game_time: end - self.data.start_time,
            accuracy: self.data.accuracy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatKey;
    use serde_json::json;

    fn playing_at(now: i64) -> GameSession {
        let mut session = GameSession::new();
        session.start_game(now);
        session
    }

    #[test]
    fn new_session_is_ready_with_three_lives() {
        let session = GameSession::new();
        assert_eq!(session.phase(), GamePhase::Ready);
        assert_eq!((session.score(), session.lives(), session.level()), (0, 3, 1));
    }

    #[test]
    fn pause_and_resume_toggle_phase() {
        let mut session = playing_at(0);
        session.pause_game();
        assert_eq!(session.phase(), GamePhase::Paused);
        session.resume_game();
        assert_eq!(session.phase(), GamePhase::Playing);
    }

    #[test]
    fn set_level_only_raises_max_level() {
        let mut session = playing_at(0);
        session.set_level(4);
        session.set_level(2);
        session.increment_level();
        assert_eq!(session.level(), 3);
        assert_eq!(session.data().max_level, 4);
    }

    #[test]
    fn accuracy_is_zero_without_shots() {
        let mut session = playing_at(1_000);
        let mut outbox = ApiOutbox::new();

        let submission = session.end_game(SessionOverrides::default(), 61_000, &mut outbox);

        assert_eq!(submission.accuracy, 0.0);
        assert_eq!(submission.game_time, 60_000);
        assert_eq!(submission.level, 1);
    }

    #[test]
    fn end_game_queues_authenticated_save() {
        let mut session = playing_at(0);
        let mut outbox = ApiOutbox::new();
        session.set_score(1500);
        session.set_level(3);
        for hit in [true, false, true, true] {
            session.increment_bullet_stats(true, hit);
        }
        session.increment_enemies_killed();
        session.increment_power_ups_collected();

        let submission = session.end_game(
            SessionOverrides {
                enemies_killed: Some(12),
                ..SessionOverrides::default()
            },
            90_000,
            &mut outbox,
        );

        assert_eq!(submission.accuracy, 0.75);
        assert_eq!(submission.enemies_killed, 12);
        assert!(session.is_saving());
        assert_eq!(session.phase(), GamePhase::Playing);

        let request = outbox.drain().remove(0);
        assert!(request.requires_auth);
        assert_eq!(request.path, SESSION_PATH);
        assert_eq!(
            request.body,
            Some(json!({
                "score": 1500,
                "level": 3,
                "gameTime": 90_000,
                "enemiesKilled": 12,
                "powerUpsCollected": 1,
                "accuracy": 0.75
            }))
        );
    }

    #[test]
    fn successful_save_updates_player_stats() {
        let mut session = playing_at(0);
        let mut outbox = ApiOutbox::new();
        let mut stats = PlayerStatsStore::new();
        stats.increment_stat(StatKey::HighScore, 100, &mut outbox);
        session.set_score(400);
        session.update_session_data(SessionOverrides {
            enemies_killed: Some(9),
            ..SessionOverrides::default()
        });

        session.end_game(SessionOverrides::default(), 150_000, &mut outbox);
        session.resolve_submission(&ApiOutcome::new(201, "{}"), &mut stats, &mut outbox);

        let totals = stats.stats();
        assert_eq!(totals.games_played, 1);
        assert_eq!(totals.total_score, 400);
        assert_eq!(totals.enemies_destroyed, 9);
        assert_eq!(totals.time_played_minutes, 3);
        assert_eq!(totals.high_score, 400);
        assert_eq!(session.phase(), GamePhase::Ended);
        assert_eq!(session.data().end_time, Some(150_000));
        assert!(!session.is_saving());
    }

    #[test]
    fn failed_save_still_ends_the_game() {
        let mut session = playing_at(0);
        let mut outbox = ApiOutbox::new();
        let mut stats = PlayerStatsStore::new();
        session.set_score(999);

        session.end_game(SessionOverrides::default(), 10_000, &mut outbox);
        session.resolve_submission(&ApiOutcome::new(401, "unauthorized"), &mut stats, &mut outbox);

        assert_eq!(session.phase(), GamePhase::Ended);
        assert_eq!(stats.stats().games_played, 0);
        assert_eq!(stats.stats().high_score, 0);
    }

    #[test]
    fn lower_score_keeps_high_score() {
        let mut session = playing_at(0);
        let mut outbox = ApiOutbox::new();
        let mut stats = PlayerStatsStore::new();
        stats.increment_stat(StatKey::HighScore, 5_000, &mut outbox);
        session.set_score(10);

        session.end_game(SessionOverrides::default(), 1_000, &mut outbox);
        session.resolve_submission(&ApiOutcome::new(200, ""), &mut stats, &mut outbox);

        assert_eq!(stats.stats().high_score, 5_000);
        assert_eq!(stats.stats().total_score, 10);
    }

    #[test]
    fn restart_during_save_keeps_new_round_ready() {
        let mut session = playing_at(0);
        let mut outbox = ApiOutbox::new();
        let mut stats = PlayerStatsStore::new();
        session.set_score(50);

        session.end_game(SessionOverrides::default(), 1_000, &mut outbox);
        session.restart_game();
        session.resolve_submission(&ApiOutcome::new(200, ""), &mut stats, &mut outbox);

        assert_eq!(session.phase(), GamePhase::Ready);
        assert_eq!(session.score(), 0);
        assert_eq!(stats.stats().total_score, 50);
    }

    #[test]
    fn session_stats_uses_clock_while_running() {
        let mut session = playing_at(2_000);
        session.increment_bullet_stats(true, true);
        session.increment_bullet_stats(true, false);

        let running = session.session_stats(5_000);
        assert_eq!(running.game_time, 3_000);
        assert_eq!(running.accuracy, 0.5);

        session.update_session_data(SessionOverrides {
            end_time: Some(4_000),
            ..SessionOverrides::default()
        });
        assert_eq!(session.session_stats(99_000).game_time, 2_000);
    }

    #[test]
    fn ending_a_paused_game_saves_and_ends() {
        let mut session = playing_at(0);
        let mut outbox = ApiOutbox::new();
        let mut stats = PlayerStatsStore::new();
        session.set_score(250);
        session.pause_game();

        let submission = session.end_game(SessionOverrides::default(), 30_000, &mut outbox);
        assert_eq!(submission.score, 250);
        assert_eq!(submission.game_time, 30_000);
        assert_eq!(session.phase(), GamePhase::Paused);
        assert_eq!(outbox.drain().len(), 1);

        session.resolve_submission(&ApiOutcome::new(201, "{}"), &mut stats, &mut outbox);
        assert_eq!(session.phase(), GamePhase::Ended);
        assert_eq!(stats.stats().games_played, 1);
    }

    #[test]
    fn per_projectile_shots_keep_accuracy_bounded() {
        let mut session = playing_at(0);
        for _ in 0..5 {
            session.increment_bullet_stats(true, false);
        }
        for _ in 0..5 {
            session.increment_bullet_stats(false, true);
        }
        let mut outbox = ApiOutbox::new();

        let submission = session.end_game(SessionOverrides::default(), 1_000, &mut outbox);
        assert_eq!(submission.accuracy, 1.0);
    }

    #[test]
    fn restart_resets_counters() {
        let mut session = playing_at(0);
        session.set_lives(1);
        session.set_score(77);
        session.increment_enemies_killed();

        session.restart_game();

        assert_eq!(session.phase(), GamePhase::Ready);
        assert_eq!((session.score(), session.lives(), session.level()), (0, 3, 1));
        assert_eq!(*session.data(), SessionData::default());
    }
}
