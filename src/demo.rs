//! Demo modules for the binary

use module_persistence::{LoadContext, ModuleId, PersistentModule};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// User preferences; loaded first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub volume: u8,
    pub difficulty: Difficulty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Normal,
    Hard,
}

impl Difficulty {
    fn xp_multiplier(self) -> f64 {
        match self {
            Difficulty::Easy => 0.5,
            Difficulty::Normal => 1.0,
            Difficulty::Hard => 1.5,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            volume: 80,
            difficulty: Difficulty::Normal,
        }
    }
}

impl PersistentModule for Settings {
    fn id(&self) -> &str {
        "Settings"
    }

    fn load_priority(&self) -> i32 {
        1
    }
}

/// Player progression counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerStats {
    pub level: u32,
    pub experience: u64,
    pub play_time_secs: u64,
    /// Derived from `Settings` after load; not persisted
    #[serde(skip)]
    pub xp_multiplier: f64,
}

impl PlayerStats {
    /// Award experience, levelling up every 1000 points
    pub fn gain(&mut self, base_xp: u64) {
        let multiplier = if self.xp_multiplier > 0.0 {
            self.xp_multiplier
        } else {
            1.0
        };
        self.experience += (base_xp as f64 * multiplier).round() as u64;
        self.level = (self.experience / 1000) as u32 + 1;
    }
}

#[async_trait::async_trait]
impl PersistentModule for PlayerStats {
    fn id(&self) -> &str {
        "PlayerStats"
    }

    fn dependencies(&self) -> Vec<ModuleId> {
        vec!["Settings".to_string()]
    }

    fn load_priority(&self) -> i32 {
        10
    }

    async fn after_load(&mut self, ctx: &LoadContext) {
        if let Some(settings) = ctx.get_module::<Settings>().await {
            let difficulty = settings.read().await.difficulty;
            self.xp_multiplier = difficulty.xp_multiplier();
            debug!(?difficulty, "Applied difficulty to player stats");
        }
    }
}

/// Campaign progress
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameProgress {
    pub checkpoint: String,
    pub completed_levels: Vec<String>,
    /// Stamped on every save
    pub last_saved_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl PersistentModule for GameProgress {
    fn id(&self) -> &str {
        "GameProgress"
    }

    fn dependencies(&self) -> Vec<ModuleId> {
        vec!["PlayerStats".to_string()]
    }

    fn load_priority(&self) -> i32 {
        50
    }

    fn before_save(&mut self) {
        self.last_saved_at = Some(chrono::Utc::now());
    }
}
