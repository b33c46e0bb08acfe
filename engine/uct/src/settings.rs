//! Settings file loading.
//!
//! Search and player configuration load from a `config.toml` with sections
//! `[search]`, `[player]`, `[playout]` and `[record]`, each field optional
//! and defaulting. Environment variables override file values with the
//! pattern `GOBAN_<SECTION>_<KEY>`, e.g.
//!
//! ```text
//! GOBAN_SEARCH_MAX_GAMES=50000
//! GOBAN_SEARCH_NUM_THREADS=8
//! GOBAN_PLAYER_REUSE_SUBTREE=true
//! GOBAN_PLAYOUT_MERCY_RULE=false
//! ```

use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{PlayerConfig, SearchConfig};

/// Standard locations searched for the settings file.
pub const CONFIG_SEARCH_PATHS: &[&str] = &["config.toml", "../config.toml", "/etc/goban/config.toml"];

/// Playout-phase knobs, consumed by the game-side state.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlayoutSettings {
    /// End a simulation early once the stone difference is decisive.
    pub mercy_rule: bool,
    /// Collect per-point ownership statistics.
    pub territory_statistics: bool,
    /// Weight of the score magnitude in terminal evaluations.
    pub score_modification: f32,
}

impl Default for PlayoutSettings {
    fn default() -> Self {
        PlayoutSettings {
            mercy_rule: true,
            territory_statistics: false,
            score_modification: 0.02,
        }
    }
}

/// Auto-save of simulated games; disabled unless a directory is set.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RecordSettings {
    pub auto_save_dir: Option<String>,
    pub auto_save_prefix: Option<String>,
}

/// Root settings structure matching config.toml.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub search: SearchConfig,
    pub player: PlayerConfig,
    pub playout: PlayoutSettings,
    pub record: RecordSettings,
}

/// Load settings, searching `GOBAN_CONFIG` first and then the standard
/// locations, and apply environment overrides. Missing or malformed files
/// fall back to the built-in defaults.
pub fn load_settings() -> Settings {
    if let Ok(path) = std::env::var("GOBAN_CONFIG") {
        let path = Path::new(&path);
        if path.exists() {
            info!("loading settings from GOBAN_CONFIG: {}", path.display());
            return load_from_path(path);
        }
        warn!("GOBAN_CONFIG={} not found, searching defaults", path.display());
    }
    for candidate in CONFIG_SEARCH_PATHS {
        let path = Path::new(candidate);
        if path.exists() {
            info!("loading settings from {}", path.display());
            return load_from_path(path);
        }
    }
    debug!("no config.toml found, using built-in defaults");
    apply_env_overrides(Settings::default())
}

/// Load settings from a specific file, then apply environment overrides.
pub fn load_from_path(path: &Path) -> Settings {
    let settings = match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => settings,
            Err(err) => {
                warn!("failed to parse {}: {err}, using defaults", path.display());
                Settings::default()
            }
        },
        Err(err) => {
            warn!("failed to read {}: {err}, using defaults", path.display());
            Settings::default()
        }
    };
    apply_env_overrides(settings)
}

macro_rules! env_override {
    // Any field whose type implements FromStr.
    ($settings:expr, $section:ident . $field:ident, $key:expr) => {
        if let Ok(value) = std::env::var($key) {
            match value.parse() {
                Ok(parsed) => $settings.$section.$field = parsed,
                Err(_) => warn!("ignoring unparsable {}={}", $key, value),
            }
        }
    };
    // Optional string field.
    ($settings:expr, $section:ident . $field:ident, $key:expr, optional) => {
        if let Ok(value) = std::env::var($key) {
            $settings.$section.$field = Some(value);
        }
    };
}

/// Apply `GOBAN_<SECTION>_<KEY>` environment overrides.
pub fn apply_env_overrides(mut settings: Settings) -> Settings {
    env_override!(settings, search.max_games, "GOBAN_SEARCH_MAX_GAMES");
    env_override!(settings, search.max_nodes, "GOBAN_SEARCH_MAX_NODES");
    env_override!(settings, search.max_time, "GOBAN_SEARCH_MAX_TIME");
    env_override!(settings, search.num_threads, "GOBAN_SEARCH_NUM_THREADS");
    env_override!(settings, search.num_playouts, "GOBAN_SEARCH_NUM_PLAYOUTS");
    env_override!(
        settings,
        search.expand_threshold,
        "GOBAN_SEARCH_EXPAND_THRESHOLD"
    );
    env_override!(
        settings,
        search.first_play_urgency,
        "GOBAN_SEARCH_FIRST_PLAY_URGENCY"
    );
    env_override!(settings, search.bias_constant, "GOBAN_SEARCH_BIAS_CONSTANT");
    env_override!(settings, search.no_bias_term, "GOBAN_SEARCH_NO_BIAS_TERM");
    env_override!(settings, search.rave, "GOBAN_SEARCH_RAVE");
    env_override!(
        settings,
        search.rave_check_same,
        "GOBAN_SEARCH_RAVE_CHECK_SAME"
    );
    env_override!(
        settings,
        search.rave_weight_initial,
        "GOBAN_SEARCH_RAVE_WEIGHT_INITIAL"
    );
    env_override!(
        settings,
        search.rave_weight_final,
        "GOBAN_SEARCH_RAVE_WEIGHT_FINAL"
    );
    env_override!(settings, search.lock_free, "GOBAN_SEARCH_LOCK_FREE");
    env_override!(settings, search.virtual_loss, "GOBAN_SEARCH_VIRTUAL_LOSS");
    env_override!(settings, search.move_select, "GOBAN_SEARCH_MOVE_SELECT");
    env_override!(settings, search.live_gfx, "GOBAN_SEARCH_LIVE_GFX");
    env_override!(
        settings,
        search.live_gfx_interval,
        "GOBAN_SEARCH_LIVE_GFX_INTERVAL"
    );

    env_override!(settings, player.search_mode, "GOBAN_PLAYER_SEARCH_MODE");
    env_override!(
        settings,
        player.prior_knowledge,
        "GOBAN_PLAYER_PRIOR_KNOWLEDGE"
    );
    env_override!(settings, player.ignore_clock, "GOBAN_PLAYER_IGNORE_CLOCK");
    env_override!(settings, player.ponder, "GOBAN_PLAYER_PONDER");
    env_override!(settings, player.reuse_subtree, "GOBAN_PLAYER_REUSE_SUBTREE");
    env_override!(
        settings,
        player.use_root_filter,
        "GOBAN_PLAYER_USE_ROOT_FILTER"
    );
    env_override!(
        settings,
        player.resign_threshold,
        "GOBAN_PLAYER_RESIGN_THRESHOLD"
    );
    env_override!(settings, player.early_pass, "GOBAN_PLAYER_EARLY_PASS");
    env_override!(settings, player.max_games, "GOBAN_PLAYER_MAX_GAMES");
    env_override!(settings, player.max_time, "GOBAN_PLAYER_MAX_TIME");

    env_override!(settings, playout.mercy_rule, "GOBAN_PLAYOUT_MERCY_RULE");
    env_override!(
        settings,
        playout.territory_statistics,
        "GOBAN_PLAYOUT_TERRITORY_STATISTICS"
    );
    env_override!(
        settings,
        playout.score_modification,
        "GOBAN_PLAYOUT_SCORE_MODIFICATION"
    );

    env_override!(settings, record.auto_save_dir, "GOBAN_RECORD_AUTO_SAVE_DIR", optional);
    env_override!(
        settings,
        record.auto_save_prefix,
        "GOBAN_RECORD_AUTO_SAVE_PREFIX",
        optional
    );

    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MoveSelect, SearchMode};
    use std::io::Write as _;
    use std::sync::Mutex;

    /// Serialises tests that read or write the process environment.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_defaults_without_file() {
        let _guard = ENV_LOCK.lock().unwrap();
        let settings = apply_env_overrides(Settings::default());
        assert_eq!(settings.search.num_threads, 1);
        assert!(settings.playout.mercy_rule);
        assert!(settings.record.auto_save_dir.is_none());
        settings.search.validate().unwrap();
        settings.player.validate().unwrap();
    }

    #[test]
    fn test_load_from_toml() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[search]
max_games = 5000
num_threads = 4
lock_free = true
move_select = "bound"

[player]
search_mode = "one_ply"
reuse_subtree = true

[playout]
territory_statistics = true
score_modification = 0.05

[record]
auto_save_dir = "/tmp/games"
"#
        )
        .unwrap();
        let settings = load_from_path(file.path());
        assert_eq!(settings.search.max_games, 5000);
        assert_eq!(settings.search.num_threads, 4);
        assert!(settings.search.lock_free);
        assert_eq!(settings.search.move_select, MoveSelect::Bound);
        assert_eq!(settings.player.search_mode, SearchMode::OnePly);
        assert!(settings.player.reuse_subtree);
        assert!(settings.playout.territory_statistics);
        assert!((settings.playout.score_modification - 0.05).abs() < 1e-6);
        assert_eq!(settings.record.auto_save_dir.as_deref(), Some("/tmp/games"));
        // Unset fields keep their defaults.
        assert_eq!(settings.search.expand_threshold, 1);
        assert!(settings.player.ignore_clock);
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[search\nmax_games = ").unwrap();
        let settings = load_from_path(file.path());
        assert_eq!(settings.search.max_games, SearchConfig::default().max_games);
    }

    #[test]
    fn test_env_override() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("GOBAN_SEARCH_MAX_GAMES", "777");
        std::env::set_var("GOBAN_SEARCH_MOVE_SELECT", "estimate");
        std::env::set_var("GOBAN_PLAYER_PONDER", "true");
        std::env::set_var("GOBAN_SEARCH_NUM_THREADS", "not-a-number");
        let settings = apply_env_overrides(Settings::default());
        std::env::remove_var("GOBAN_SEARCH_MAX_GAMES");
        std::env::remove_var("GOBAN_SEARCH_MOVE_SELECT");
        std::env::remove_var("GOBAN_PLAYER_PONDER");
        std::env::remove_var("GOBAN_SEARCH_NUM_THREADS");

        assert_eq!(settings.search.max_games, 777);
        assert_eq!(settings.search.move_select, MoveSelect::Estimate);
        assert!(settings.player.ponder);
        // Unparsable values are ignored.
        assert_eq!(settings.search.num_threads, 1);
    }
}
