use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which record store backs the running service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Mongo,
    Memory,
}

#[derive(Clone)]
pub struct Config {
    pub bind_address: String,
    pub frontend_origin: String,
    pub store_backend: StoreBackend,
    pub mongo_uri: Option<String>,
    pub database_name: String,
    pub jwt_secret: String,
    pub mail_api_url: String,
    pub mail_api_key: String,
    pub sender_email: String,
    pub voting_window: Duration,
    pub sweep_interval: Duration,
    pub workflow: WorkflowSettings,
}

/// Knobs the lifecycle managers read at runtime.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    /// Cohort every new application is filed under.
    pub program: String,
    /// Base URL used in links inside emails.
    pub app_url: String,
    pub contact_email: String,
    pub kick_out_threshold: usize,
    /// Trainees with this email domain are never swept.
    pub test_email_domain: String,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            program: "summer-2018".to_string(),
            app_url: "http://localhost:3000".to_string(),
            contact_email: "contact@localhost".to_string(),
            kick_out_threshold: 7,
            test_email_domain: "example.com".to_string(),
        }
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

/// Whole-unit duration from the environment; oversized values clamp instead
/// of overflowing.
fn duration_or(name: &str, default: u64, unit_secs: u64) -> Duration {
    Duration::from_secs(parsed_or(name, default).saturating_mul(unit_secs))
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let defaults = WorkflowSettings::default();

        let store_backend = match var_or("STORE_BACKEND", "mongo").as_str() {
            "memory" => StoreBackend::Memory,
            _ => StoreBackend::Mongo,
        };

        Self {
            bind_address: var_or("BIND_ADDRESS", "0.0.0.0:8080"),
            frontend_origin: var_or("FRONTEND_ORIGIN", "http://localhost:3000"),
            store_backend,
            mongo_uri: env::var("MONGO_URI").ok(),
            database_name: var_or("DATABASE_NAME", "trainees_db"),
            jwt_secret: var_or("JWT_SECRET", "secret"),
            mail_api_url: var_or("MAIL_API_URL", "http://localhost:9025"),
            mail_api_key: var_or("MAIL_API_KEY", ""),
            sender_email: var_or("SENDER_EMAIL", "no-reply@localhost"),
            voting_window: duration_or("VOTING_WINDOW_HOURS", 72, 3600),
            sweep_interval: duration_or("SWEEP_INTERVAL_MINUTES", 60, 60),
            workflow: WorkflowSettings {
                program: var_or("PROGRAM", &defaults.program),
                app_url: var_or("APP_URL", &defaults.app_url),
                contact_email: var_or("CONTACT_EMAIL", &defaults.contact_email),
                kick_out_threshold: parsed_or("KICK_OUT_THRESHOLD", defaults.kick_out_threshold),
                test_email_domain: var_or("TEST_EMAIL_DOMAIN", &defaults.test_email_domain),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_clamp_huge_values() {
        env::set_var("TEST_HUGE_WINDOW_HOURS", u64::MAX.to_string());
        assert_eq!(
            duration_or("TEST_HUGE_WINDOW_HOURS", 72, 3600),
            Duration::from_secs(u64::MAX)
        );
        env::remove_var("TEST_HUGE_WINDOW_HOURS");
    }

    #[test]
    fn durations_fall_back_on_garbage() {
        env::set_var("TEST_GARBAGE_SWEEP_MINUTES", "soon");
        assert_eq!(
            duration_or("TEST_GARBAGE_SWEEP_MINUTES", 60, 60),
            Duration::from_secs(3600)
        );
        env::remove_var("TEST_GARBAGE_SWEEP_MINUTES");
    }
}
