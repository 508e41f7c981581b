//! Orchestrator configuration

use std::time::Duration;

/// Tunables for the chat session core
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Prompts longer than this (in chars) are silently truncated
    pub max_prompt_length: usize,
    /// How many times recovery checks relay readiness
    pub relay_ready_attempts: u32,
    /// Delay between relay readiness checks
    pub relay_ready_delay: Duration,
    /// Wall-clock limit for the headless prompt path
    pub headless_timeout: Duration,
    pub headless_poll_interval: Duration,
    /// Capacity of the outward event bus
    pub event_capacity: usize,
    pub max_title_length: usize,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            max_prompt_length: 4000,
            relay_ready_attempts: 20,
            relay_ready_delay: Duration::from_millis(250),
            headless_timeout: Duration::from_secs(120),
            headless_poll_interval: Duration::from_millis(100),
            event_capacity: 256,
            max_title_length: 60,
        }
    }
}

impl AssistantConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from `ASSISTANT_*` keys resolved through `lookup`. Missing or
    /// unparseable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse = |key: &str| lookup(key).and_then(|raw| parse_value(key, &raw));
        let defaults = Self::default();
        Self {
            max_prompt_length: parse("ASSISTANT_MAX_PROMPT_LENGTH")
                .map_or(defaults.max_prompt_length, |v: u64| {
                    usize::try_from(v).unwrap_or(usize::MAX)
                }),
            relay_ready_attempts: parse("ASSISTANT_RELAY_READY_ATTEMPTS")
                .map_or(defaults.relay_ready_attempts, |v| {
                    u32::try_from(v).unwrap_or(u32::MAX)
                }),
            relay_ready_delay: parse("ASSISTANT_RELAY_READY_DELAY_MS")
                .map_or(defaults.relay_ready_delay, Duration::from_millis),
            headless_timeout: parse("ASSISTANT_HEADLESS_TIMEOUT_SECS")
                .map_or(defaults.headless_timeout, Duration::from_secs),
            event_capacity: parse("ASSISTANT_EVENT_CAPACITY")
                .map_or(defaults.event_capacity, |v| {
                    usize::try_from(v).unwrap_or(usize::MAX)
                }),
            ..defaults
        }
    }
}

fn parse_value(key: &str, raw: &str) -> Option<u64> {
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable config value");
            None
        }
    }
}
