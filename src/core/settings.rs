//! Settings the engine components read.

use chrono::Duration;

/// Engine-level switches, built from the loaded configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Host whose descriptions this process declares
    pub host_name: String,

    /// Overwrite persisted descriptions on breaking changes
    pub allow_breaking_changes: bool,

    /// Allow commands against descriptions marked under development
    pub allow_under_development: bool,

    /// Recurring planner window length, in hours
    pub look_ahead_hours: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            host_name: "processmanager".to_string(),
            allow_breaking_changes: false,
            allow_under_development: false,
            look_ahead_hours: 24,
        }
    }
}

impl EngineSettings {
    pub fn look_ahead(&self) -> Duration {
        Duration::hours(i64::from(self.look_ahead_hours))
    }
}
