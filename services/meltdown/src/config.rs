use meltdown_execution::PhaseConfig;
use meltdown_types::meltdown::{INVESTMENT_MS, REGISTRATION_MS, ROUND_MS};

/// Buffered events per `/ws` subscriber before it starts lagging.
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceConfig {
    pub phases: PhaseConfig,
    /// Required on `POST /meltdown` when set.
    pub admin_token: Option<String>,
    pub event_buffer: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            phases: PhaseConfig::default(),
            admin_token: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source, falling back to defaults for
    /// anything missing or unparseable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let phases = PhaseConfig::new(
            read_ms(&lookup, "MELTDOWN_REGISTRATION_MS", REGISTRATION_MS),
            read_ms(&lookup, "MELTDOWN_INVESTMENT_MS", INVESTMENT_MS),
            read_ms(&lookup, "MELTDOWN_ROUND_MS", ROUND_MS),
        );
        phases.validate().map_err(anyhow::Error::msg)?;

        let admin_token = lookup("MELTDOWN_ADMIN_TOKEN")
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        let event_buffer = read_usize(&lookup, "MELTDOWN_EVENT_BUFFER", DEFAULT_EVENT_BUFFER).max(1);

        Ok(Self {
            phases,
            admin_token,
            event_buffer,
        })
    }
}

fn read_ms(lookup: &impl Fn(&str) -> Option<String>, key: &str, fallback: u64) -> u64 {
    lookup(key)
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .unwrap_or(fallback)
}

fn read_usize(lookup: &impl Fn(&str) -> Option<String>, key: &str, fallback: usize) -> usize {
    lookup(key)
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .unwrap_or(fallback)
}
