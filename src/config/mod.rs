//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::util::time::DEFAULT_TICK_RATE;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS (comma-separated), any origin when unset
    pub client_origin: Option<String>,
    /// Shared secret for identity tickets, identities are accepted unverified when unset
    pub identity_secret: Option<String>,
    /// Maximum concurrently connected endpoints
    pub max_clients: usize,
    /// Simulation ticks per second
    pub tick_rate: u32,
    /// Seed for the session RNG, random when unset
    pub session_seed: Option<u64>,
    /// Replication batches buffered per observer before it must resync
    pub replication_buffer: usize,
    /// Gameplay tuning
    pub game: GameSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
            client_origin: None,
            identity_secret: None,
            max_clients: 16,
            tick_rate: DEFAULT_TICK_RATE,
            session_seed: None,
            replication_buffer: 256,
            game: GameSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| defaults.server_addr.to_string())
        };

        let mut game = defaults.game;
        game.move_speed = env_parse("AVATAR_MOVE_SPEED", game.move_speed)?;
        game.heat_time = env_parse("HEAT_TIME", game.heat_time)?;
        game.cool_time = env_parse("COOL_TIME", game.cool_time)?;
        game.avatar_options = env_parse("AVATAR_OPTIONS", game.avatar_options)?;
        game.enemy_spawning = env_parse("ENEMY_SPAWNING", game.enemy_spawning)?;
        game.validate()?;

        let tick_rate = env_parse("TICK_RATE", defaults.tick_rate)?;
        if tick_rate == 0 {
            return Err(ConfigError::Invalid("TICK_RATE"));
        }

        let replication_buffer = env_parse("REPLICATION_BUFFER", defaults.replication_buffer)?;
        if replication_buffer == 0 {
            return Err(ConfigError::Invalid("REPLICATION_BUFFER"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            client_origin: env::var("CLIENT_ORIGIN").ok(),
            identity_secret: env::var("IDENTITY_SECRET").ok().filter(|s| !s.is_empty()),
            max_clients: env_parse("MAX_CLIENTS", defaults.max_clients)?,
            tick_rate,
            session_seed: env::var("SESSION_SEED")
                .ok()
                .map(|s| s.parse().map_err(|_| ConfigError::Invalid("SESSION_SEED")))
                .transpose()?,
            replication_buffer,
            game,
        })
    }
}

/// Gameplay tuning shared by the simulation systems
#[derive(Clone, Debug)]
pub struct GameSettings {
    /// Avatar pursuit speed (units per second)
    pub move_speed: f32,
    /// Seconds of continuous fire from cold to overheated
    pub heat_time: f32,
    /// Seconds to cool from fully heated to cold
    pub cool_time: f32,
    /// Number of selectable avatar variants
    pub avatar_options: usize,
    /// Beam ray length
    pub beam_range: f32,
    /// Beam damage per second of contact
    pub beam_damage_rate: f32,
    /// Score awarded per unit of damage dealt
    pub score_per_damage: f32,
    /// Health lost when an avatar runs into an enemy
    pub collision_damage: f32,
    /// Grace delay before a dead avatar is removed
    pub avatar_despawn_delay: f64,
    /// Grace delay before a dead enemy is removed
    pub enemy_despawn_delay: f64,
    /// Enemy spawner toggle
    pub enemy_spawning: bool,
    pub enemy_speed_min: f32,
    pub enemy_speed_max: f32,
    /// Seconds between enemy spawns (random in range)
    pub enemy_spawn_min: f64,
    pub enemy_spawn_max: f64,
    /// Controllers and spawns are confined to |x| <= this
    pub arena_half_width: f32,
    pub enemy_spawn_z: f32,
    /// Enemies past this z are removed
    pub enemy_exit_z: f32,
    pub avatar_radius: f32,
    pub enemy_radius: f32,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            move_speed: 100.0,
            heat_time: 2.0,
            cool_time: 4.0,
            avatar_options: 3,
            beam_range: 300.0,
            beam_damage_rate: 2.0,
            score_per_damage: 10.0,
            collision_damage: 0.37,
            avatar_despawn_delay: 1.5,
            enemy_despawn_delay: 3.0,
            enemy_spawning: true,
            enemy_speed_min: 15.0,
            enemy_speed_max: 40.0,
            enemy_spawn_min: 2.0,
            enemy_spawn_max: 5.0,
            arena_half_width: 400.0,
            enemy_spawn_z: 400.0,
            enemy_exit_z: -100.0,
            avatar_radius: 10.0,
            enemy_radius: 15.0,
        }
    }
}

impl GameSettings {
    /// Reject settings the simulation cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.move_speed > 0.0) {
            return Err(ConfigError::Invalid("AVATAR_MOVE_SPEED"));
        }
        if !(self.heat_time > 0.0) {
            return Err(ConfigError::Invalid("HEAT_TIME"));
        }
        if !(self.cool_time > 0.0) {
            return Err(ConfigError::Invalid("COOL_TIME"));
        }
        if self.avatar_options == 0 {
            return Err(ConfigError::Invalid("AVATAR_OPTIONS"));
        }
        if self.enemy_speed_min > self.enemy_speed_max {
            return Err(ConfigError::Invalid("enemy speed range"));
        }
        if self.enemy_spawn_min <= 0.0 || self.enemy_spawn_min > self.enemy_spawn_max {
            return Err(ConfigError::Invalid("enemy spawn interval"));
        }
        Ok(())
    }
}

/// Parse an optional environment variable, falling back to `default` when unset
fn env_parse<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        assert!(GameSettings::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_non_positive_times() {
        let settings = GameSettings {
            heat_time: 0.0,
            ..GameSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid("HEAT_TIME"))
        ));

        let settings = GameSettings {
            cool_time: f32::NAN,
            ..GameSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid("COOL_TIME"))
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_ranges() {
        let settings = GameSettings {
            enemy_speed_min: 50.0,
            enemy_speed_max: 10.0,
            ..GameSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_env_parse_falls_back_when_unset() {
        let value: u32 = env_parse("SPACEWAR_TEST_SURELY_UNSET_VAR", 7).unwrap();
        assert_eq!(value, 7);
    }
}
