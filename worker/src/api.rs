//! `/api/*` routes served by the store durable object.
//!
//! Handlers run synchronously against [`Storage`] and return an [`ApiReply`];
//! the durable object turns that into a `Response`.

use crate::auth::authenticate_bearer;
use crate::storage::{
    NewHighScore, NewUser, Storage, StorageError, StorageResult, Timeframe, User,
    DEFAULT_LEADERBOARD_LIMIT, DEFAULT_SEARCH_LIMIT, DEFAULT_TOP_PLAYERS_LIMIT,
    RANKING_CATEGORY_SCORE,
};
use galaxiga_core::{SessionSubmission, StatsPatch, StatsSyncBody};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use worker::Method;

const MAX_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiRoute {
    SaveGameSession,
    GetPlayerStats { fid: i64 },
    SyncPlayerStats,
    GetLeaderboard { limit: usize },
    SaveHighScore,
    TopPlayers {
        category: String,
        timeframe: Timeframe,
        limit: usize,
    },
    SearchPlayers { query: String, limit: usize },
    PlayerProfile { user_id: i64 },
    RefreshRankings,
    CreateUser,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiReply {
    pub status: u16,
    pub body: Value,
}

impl ApiReply {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn created(body: Value) -> Self {
        Self { status: 201, body }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": message.into() }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ApiInput {
    pub body: Option<String>,
    pub authorization: Option<String>,
    pub now: i64,
    pub auth_leeway_seconds: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HighScorePayload {
    user_id: i64,
    #[serde(flatten)]
    score: NewHighScore,
}

fn query_value<'a>(query: &'a [(String, String)], key: &str) -> Option<&'a str> {
    query
        .iter()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.as_str())
}

fn query_limit(query: &[(String, String)], default: usize) -> usize {
    query_value(query, "limit")
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|limit| *limit > 0)
        .map(|limit| limit.min(MAX_LIMIT))
        .unwrap_or(default)
}

/// `Err` carries the reply for a malformed request on a known path.
pub fn parse_route(
    method: &Method,
    path: &str,
    query: &[(String, String)],
) -> Option<Result<ApiRoute, ApiReply>> {
    let segments: Vec<&str> = path.trim_end_matches('/').split('/').skip(1).collect();
    if segments.first() != Some(&"api") {
        return None;
    }

    let route = match (method, &segments[1..]) {
        (Method::Post, ["game", "session"]) => Ok(ApiRoute::SaveGameSession),
        (Method::Get, ["player-stats", fid]) => fid
            .parse::<i64>()
            .map(|fid| ApiRoute::GetPlayerStats { fid })
            .map_err(|_| ApiReply::error(400, "invalid farcaster id")),
        (Method::Post, ["player-stats"]) => Ok(ApiRoute::SyncPlayerStats),
        (Method::Get, ["leaderboard"]) => Ok(ApiRoute::GetLeaderboard {
            limit: query_limit(query, DEFAULT_LEADERBOARD_LIMIT),
        }),
        (Method::Post, ["leaderboard"]) => Ok(ApiRoute::SaveHighScore),
        (Method::Get, ["players", "top"]) => query_value(query, "timeframe")
            .unwrap_or("all")
            .parse::<Timeframe>()
            .map(|timeframe| ApiRoute::TopPlayers {
                category: query_value(query, "category")
                    .unwrap_or(RANKING_CATEGORY_SCORE)
                    .to_string(),
                timeframe,
                limit: query_limit(query, DEFAULT_TOP_PLAYERS_LIMIT),
            })
            .map_err(|error| ApiReply::error(400, error)),
        (Method::Get, ["players", "search"]) => match query_value(query, "q") {
            Some(q) if !q.trim().is_empty() => Ok(ApiRoute::SearchPlayers {
                query: q.trim().to_string(),
                limit: query_limit(query, DEFAULT_SEARCH_LIMIT),
            }),
            _ => Err(ApiReply::error(400, "missing search query")),
        },
        (Method::Post, ["players", "rankings"]) => Ok(ApiRoute::RefreshRankings),
        (Method::Get, ["players", id, "profile"]) => id
            .parse::<i64>()
            .map(|user_id| ApiRoute::PlayerProfile { user_id })
            .map_err(|_| ApiReply::error(400, "invalid player id")),
        (Method::Post, ["users"]) => Ok(ApiRoute::CreateUser),
        _ => return None,
    };

    Some(route)
}

fn decode_body<T: DeserializeOwned>(body: Option<&str>, what: &str) -> Result<T, ApiReply> {
    let body = body
        .filter(|body| !body.trim().is_empty())
        .ok_or_else(|| ApiReply::error(400, format!("missing {what} payload")))?;
    serde_json::from_str(body).map_err(|_| ApiReply::error(400, format!("invalid {what} payload")))
}

fn to_json<T: serde::Serialize>(value: &T) -> StorageResult<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Finds the player by farcaster id, registering them on first contact.
fn ensure_player(
    storage: &mut dyn Storage,
    fid: i64,
    display_name: Option<String>,
    profile_picture: Option<String>,
    now: i64,
) -> StorageResult<User> {
    if let Some(user) = storage.get_user_by_farcaster_fid(fid)? {
        return Ok(user);
    }

    let mut username = format!("player_{fid}");
    let mut suffix = 1;
    while storage.get_user_by_username(&username)?.is_some() {
        suffix += 1;
        username = format!("player_{fid}_{suffix}");
    }

    storage.create_user(
        NewUser {
            username,
            display_name,
            profile_picture,
            farcaster_fid: Some(fid),
        },
        now,
    )
}

/// Storage failures other than a missing user come back as `Err` so the
/// caller can log them before answering 500.
pub fn handle_api_request(
    route: ApiRoute,
    input: &ApiInput,
    storage: &mut dyn Storage,
) -> StorageResult<ApiReply> {
    let now = input.now;
    let body = input.body.as_deref();

    let reply = match route {
        ApiRoute::SaveGameSession => {
            let player = match authenticate_bearer(
                input.authorization.as_deref(),
                now / 1000,
                input.auth_leeway_seconds,
            ) {
                Ok(player) => player,
                Err(error) => return Ok(ApiReply::error(401, format!("{error}"))),
            };
            let session: SessionSubmission = match decode_body(body, "game session") {
                Ok(session) => session,
                Err(reply) => return Ok(reply),
            };

            let user = ensure_player(storage, player.fid, None, None, now)?;
            storage.save_game_session(user.id, &session, now)?;
            ApiReply::created(json!({ "ok": true, "userId": user.id }))
        }
        ApiRoute::GetPlayerStats { fid } => {
            let Some(user) = storage.get_user_by_farcaster_fid(fid)? else {
                return Ok(ApiReply::error(404, "player not found"));
            };
            match storage.get_player_stats(user.id)? {
                Some(stats) => ApiReply::ok(to_json(&stats)?),
                None => ApiReply::error(404, "player stats not found"),
            }
        }
        ApiRoute::SyncPlayerStats => {
            let sync: StatsSyncBody = match decode_body(body, "player stats") {
                Ok(sync) => sync,
                Err(reply) => return Ok(reply),
            };
            let user = ensure_player(
                storage,
                sync.farcaster_fid,
                sync.display_name,
                sync.profile_picture,
                now,
            )?;
            let stats = sync.stats;
            storage.update_player_stats(
                user.id,
                &StatsPatch {
                    total_score: Some(stats.total_score),
                    high_score: Some(stats.high_score),
                    enemies_destroyed: Some(stats.enemies_destroyed),
                    games_played: Some(stats.games_played),
                    time_played_minutes: Some(stats.time_played_minutes),
                    streak_days: Some(stats.streak_days),
                    social_shares: Some(stats.social_shares),
                    friends_invited: Some(stats.friends_invited),
                },
                now,
            )?;
            ApiReply::ok(json!({ "ok": true, "userId": user.id }))
        }
        ApiRoute::GetLeaderboard { limit } => ApiReply::ok(to_json(&storage.get_leaderboard(limit)?)?),
        ApiRoute::SaveHighScore => {
            let payload: HighScorePayload = match decode_body(body, "high score") {
                Ok(payload) => payload,
                Err(reply) => return Ok(reply),
            };
            match storage.save_high_score(payload.user_id, payload.score, now) {
                Ok(()) => ApiReply::created(json!({ "ok": true })),
                Err(StorageError::UserNotFound(user_id)) => {
                    ApiReply::error(404, format!("user {user_id} not found"))
                }
                Err(error) => return Err(error),
            }
        }
        ApiRoute::TopPlayers {
            category,
            timeframe,
            limit,
        } => ApiReply::ok(to_json(
            &storage.get_top_players(&category, timeframe, limit, now)?,
        )?),
        ApiRoute::SearchPlayers { query, limit } => {
            ApiReply::ok(to_json(&storage.search_players(&query, limit)?)?)
        }
        ApiRoute::PlayerProfile { user_id } => {
            storage.update_player_rankings(now)?;
            let profile = storage.get_player_profile(user_id)?;
            if profile.user.is_none() {
                return Ok(ApiReply::error(404, "player not found"));
            }
            ApiReply::ok(to_json(&profile)?)
        }
        ApiRoute::RefreshRankings => {
            storage.update_player_rankings(now)?;
            ApiReply::ok(json!({ "ok": true }))
        }
        ApiRoute::CreateUser => {
            let user: NewUser = match decode_body(body, "user") {
                Ok(user) => user,
                Err(reply) => return Ok(reply),
            };
            if user.username.trim().is_empty() {
                return Ok(ApiReply::error(400, "username is required"));
            }
            if storage.get_user_by_username(&user.username)?.is_some() {
                return Ok(ApiReply::error(409, "username already taken"));
            }
            ApiReply::created(to_json(&storage.create_user(user, now)?)?)
        }
    };

    Ok(reply)
}
