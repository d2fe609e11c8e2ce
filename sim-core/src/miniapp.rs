//! Mini-app host integration.
//!
//! The host page owns the SDK. This side decides who the player is from the
//! context the host reports, and queues [`HostAction`]s for the host to run.

use crate::api::ApiOutbox;
use crate::stats::{PlayerStatsStore, StatKey};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

const TEST_PFP_URL: &str = "https://images.unsplash.com/photo-1535713875002-d1d0cf377fde?w=100&h=100&fit=crop&crop=face&facepad=2&fm=jpg&q=80";
const NONCE_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const NONCE_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiniAppUser {
    pub fid: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub pfp_url: Option<String>,
}

impl MiniAppUser {
    /// Used when the host runs us outside a mini-app client.
    pub fn test_user() -> Self {
        Self {
            fid: 12345,
            username: Some("testgamer".into()),
            display_name: Some("Test Gamer".into()),
            pfp_url: Some(TEST_PFP_URL.into()),
        }
    }

    /// Used when the host could not read its context at all.
    pub fn standalone_user() -> Self {
        Self {
            fid: 54321,
            username: Some("standalonegamer".into()),
            display_name: Some("Standalone Gamer".into()),
            pfp_url: Some(TEST_PFP_URL.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostContext {
    #[serde(default)]
    pub user: Option<MiniAppUser>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HostContextReport {
    Ok {
        #[serde(default)]
        context: Option<HostContext>,
    },
    Error {
        #[serde(default)]
        message: String,
    },
}

pub fn resolve_host_context(report: &HostContextReport) -> MiniAppUser {
    match report {
        HostContextReport::Ok { context } => {
            match context.as_ref().and_then(|context| context.user.clone()) {
                Some(user) => {
                    info!(fid = user.fid, "user found in host context");
                    user
                }
                None => {
                    info!("no user in host context, using test user");
                    MiniAppUser::test_user()
                }
            }
        }
        HostContextReport::Error { message } => {
            warn!(%message, "host context unavailable, using standalone user");
            MiniAppUser::standalone_user()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum HostAction {
    Ready,
    SignIn { nonce: String },
    ComposeCast { text: String, embeds: Vec<String> },
    AddMiniApp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HostActionKind {
    Ready,
    SignIn,
    ComposeCast,
    AddMiniApp,
}

/// What the host reports back after running a [`HostAction`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostActionResult {
    pub action: HostActionKind,
    pub ok: bool,
    #[serde(default)]
    pub user: Option<MiniAppUser>,
    #[serde(default)]
    pub error: Option<String>,
}

pub fn sign_in_nonce<R: Rng>(rng: &mut R) -> String {
    (0..NONCE_LEN)
        .map(|_| NONCE_ALPHABET[rng.random_range(0..NONCE_ALPHABET.len())] as char)
        .collect()
}

pub fn format_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        grouped.push('-');
    }
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    grouped
}

pub fn share_text(score: i64) -> String {
    format!(
        "🚀 Just scored {} points in Galaxiga Classic Space Shooter! Think you can beat my high score? 👾",
        format_thousands(score)
    )
}

#[derive(Debug, Default)]
pub struct MiniApp {
    is_ready: bool,
    user: Option<MiniAppUser>,
    is_connected: bool,
    actions: Vec<HostAction>,
}

impl MiniApp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ready does not wait for the host context.
    pub fn initialize(&mut self) {
        self.is_ready = true;
        info!("mini-app initialization completed");
    }

    pub fn is_ready(&self) -> bool {
        self.is_ready
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected
    }

    pub fn user(&self) -> Option<&MiniAppUser> {
        self.user.as_ref()
    }

    pub fn apply_context(&mut self, report: &HostContextReport) -> &MiniAppUser {
        self.is_connected = true;
        self.user.insert(resolve_host_context(report))
    }

    pub fn notify_ready(&mut self) {
        self.actions.push(HostAction::Ready);
    }

    pub fn sign_in<R: Rng>(&mut self, rng: &mut R) {
        self.actions.push(HostAction::SignIn {
            nonce: sign_in_nonce(rng),
        });
    }

    pub fn share_score(&mut self, score: i64, origin: impl Into<String>) {
        self.actions.push(HostAction::ComposeCast {
            text: share_text(score),
            embeds: vec![origin.into()],
        });
    }

    pub fn add_to_app(&mut self) {
        self.actions.push(HostAction::AddMiniApp);
    }

    pub fn drain_actions(&mut self) -> Vec<HostAction> {
        std::mem::take(&mut self.actions)
    }

    /// Returns the newly signed-in user, if any.
    pub fn resolve_action(
        &mut self,
        result: HostActionResult,
        stats: &mut PlayerStatsStore,
        outbox: &mut ApiOutbox,
    ) -> Option<MiniAppUser> {
        if !result.ok {
            let reason = result.error.as_deref().unwrap_or("unknown error");
            error!(action = ?result.action, %reason, "host action failed");
            return None;
        }

        match result.action {
            HostActionKind::SignIn => {
                let user = result.user?;
                self.is_connected = true;
                self.user = Some(user.clone());
                Some(user)
            }
            HostActionKind::ComposeCast => {
                stats.increment_stat(StatKey::SocialShares, 1, outbox);
                None
            }
            HostActionKind::Ready | HostActionKind::AddMiniApp => None,
        }
    }
}
