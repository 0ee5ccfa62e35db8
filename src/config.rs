use crate::amas::config::AMASConfig;

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub users: usize,
    pub events_per_user: usize,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            users: 4,
            events_per_user: 40,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub amas: AMASConfig,
    pub simulation: SimulationConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let defaults = SimulationConfig::default();
        let simulation = SimulationConfig {
            users: std::env::var("SIM_USERS")
                .ok()
                .and_then(|value| value.parse::<usize>().ok())
                .unwrap_or(defaults.users)
                .max(1),
            events_per_user: std::env::var("SIM_EVENTS_PER_USER")
                .ok()
                .and_then(|value| value.parse::<usize>().ok())
                .unwrap_or(defaults.events_per_user),
            seed: std::env::var("SIM_SEED")
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(defaults.seed),
        };

        Self {
            log_level,
            amas: AMASConfig::from_env(),
            simulation,
        }
    }
}
