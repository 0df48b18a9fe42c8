use anyhow::Result;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub log_level: String,
    pub gemini: GeminiConfig,
    pub kafka: KafkaConfig,
    pub schedule: ScheduleConfig,
    pub pipeline: PipelineSettings,
    pub taxonomy_path: Option<String>,
    pub locations_path: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub audit_topic: String,
    pub sasl_mechanism: String,
    pub username: String,
    pub password: String,
    pub security_protocol: String,
    pub max_retries: u32,
    pub circuit_breaker_cooldown: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    /// 5- or 6-field cron expression for generation runs.
    pub generation_cron: String,
    /// 5- or 6-field cron expression for update scans.
    pub update_scan_cron: String,
    /// Offset east of UTC the cron expressions are evaluated in.
    pub utc_offset_minutes: i32,
    /// How often the scheduler wakes up to check the cadences.
    pub tick_secs: u64,
}

/// Thresholds and windows shared by the generation and update pipelines.
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineSettings {
    pub duplicate_similarity_threshold: f64,
    pub duplicate_lookback_days: i64,
    pub update_cooldown_hours: i64,
    pub update_confidence_threshold: f64,
    pub triage_approve_threshold: f64,
    pub triage_pending_threshold: f64,
    pub discovery_horizon_days: i64,
    pub validity_window_days: i64,
    pub call_delay_ms: u64,
    pub alerts_per_run: u32,
    pub global_alerts_per_run: u32,
}

impl PipelineSettings {
    pub fn call_delay(&self) -> Duration {
        Duration::from_millis(self.call_delay_ms)
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            duplicate_similarity_threshold: 0.8,
            duplicate_lookback_days: 7,
            update_cooldown_hours: 48,
            update_confidence_threshold: 0.7,
            triage_approve_threshold: 0.9,
            triage_pending_threshold: 0.5,
            discovery_horizon_days: 14,
            validity_window_days: 15,
            call_delay_ms: 1000,
            alerts_per_run: 8,
            global_alerts_per_run: 2,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let db_host = env_or("DB_HOST", "localhost");
        let db_port = env_or("DB_PORT", "5432");
        let db_name = env_or("DB_DATABASE", "disruption_alerts");
        let db_user = env_or("DB_USER", "alerts");
        let db_pwd = env_or("DB_PWD", "alerts");

        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}",
            db_user, db_pwd, db_host, db_port, db_name
        );

        let log_level = env_or("LOG_LEVEL", "info");

        let gemini = GeminiConfig {
            api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            model: env_or("GEMINI_MODEL", "gemini-1.5-pro"),
            base_url: env_or(
                "GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com",
            ),
            temperature: env_parse("GENERATION_TEMPERATURE", 0.4),
            top_p: env_parse("GENERATION_TOP_P", 0.9),
            top_k: env_parse("GENERATION_TOP_K", 40),
            max_output_tokens: env_parse("GENERATION_MAX_OUTPUT_TOKENS", 8192),
        };

        let kafka = KafkaConfig {
            bootstrap_servers: env::var("KAFKA_BOOTSTRAP_SERVERS").unwrap_or_default(),
            audit_topic: env_or("KAFKA_AUDIT_TOPIC", "disruption-alerts-audit"),
            sasl_mechanism: env_or("KAFKA_SASL_MECHANISM", "SCRAM-SHA-256"),
            username: env::var("KAFKA_USERNAME").unwrap_or_default(),
            password: env::var("KAFKA_PASSWORD").unwrap_or_default(),
            security_protocol: env_or("KAFKA_SECURITY_PROTOCOL", "SASL_PLAINTEXT"),
            max_retries: env_parse("KAFKA_MAX_RETRIES", 5),
            circuit_breaker_cooldown: env_parse("KAFKA_CIRCUIT_BREAKER_COOLDOWN", 300),
        };

        let schedule = ScheduleConfig {
            // Monday and Thursday, 06:00
            generation_cron: env_or("GENERATION_CRON", "0 6 * * Mon,Thu"),
            update_scan_cron: env_or("UPDATE_SCAN_CRON", "0 7 1/2 * *"),
            utc_offset_minutes: env_parse("SCHEDULE_UTC_OFFSET_MINUTES", 0),
            tick_secs: env_parse("SCHEDULER_TICK_SECS", 30),
        };

        let defaults = PipelineSettings::default();
        let pipeline = PipelineSettings {
            duplicate_similarity_threshold: env_parse(
                "DUPLICATE_SIMILARITY_THRESHOLD",
                defaults.duplicate_similarity_threshold,
            ),
            duplicate_lookback_days: env_parse(
                "DUPLICATE_LOOKBACK_DAYS",
                defaults.duplicate_lookback_days,
            ),
            update_cooldown_hours: env_parse(
                "UPDATE_COOLDOWN_HOURS",
                defaults.update_cooldown_hours,
            ),
            update_confidence_threshold: env_parse(
                "UPDATE_CONFIDENCE_THRESHOLD",
                defaults.update_confidence_threshold,
            ),
            triage_approve_threshold: env_parse(
                "TRIAGE_APPROVE_THRESHOLD",
                defaults.triage_approve_threshold,
            ),
            triage_pending_threshold: env_parse(
                "TRIAGE_PENDING_THRESHOLD",
                defaults.triage_pending_threshold,
            ),
            discovery_horizon_days: env_parse(
                "DISCOVERY_HORIZON_DAYS",
                defaults.discovery_horizon_days,
            ),
            validity_window_days: env_parse("VALIDITY_WINDOW_DAYS", defaults.validity_window_days),
            call_delay_ms: env_parse("CALL_DELAY_MS", defaults.call_delay_ms),
            alerts_per_run: env_parse("ALERTS_PER_RUN", defaults.alerts_per_run),
            global_alerts_per_run: env_parse(
                "GLOBAL_ALERTS_PER_RUN",
                defaults.global_alerts_per_run,
            ),
        };

        let taxonomy_path = env::var("TAXONOMY_PATH").ok().filter(|p| !p.is_empty());
        let locations_path = env::var("LOCATIONS_PATH").ok().filter(|p| !p.is_empty());

        Ok(Self {
            database_url,
            log_level,
            gemini,
            kafka,
            schedule,
            pipeline,
            taxonomy_path,
            locations_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_defaults_match_documented_values() {
        let s = PipelineSettings::default();
        assert_eq!(s.duplicate_similarity_threshold, 0.8);
        assert_eq!(s.duplicate_lookback_days, 7);
        assert_eq!(s.update_cooldown_hours, 48);
        assert_eq!(s.update_confidence_threshold, 0.7);
        assert_eq!(s.triage_approve_threshold, 0.9);
        assert_eq!(s.triage_pending_threshold, 0.5);
        assert_eq!(s.validity_window_days, 15);
        assert_eq!(s.call_delay(), Duration::from_secs(1));
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        env::set_var("DISRUPTION_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_parse("DISRUPTION_TEST_GARBAGE", 7u32), 7);
        env::remove_var("DISRUPTION_TEST_GARBAGE");
    }
}
