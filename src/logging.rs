use std::str::FromStr;

use tracing::{warn, Level};

use hinge_settings::LoggingSettings;
use hinge_telemetry::TelemetryConfig;

/// Map the `logging` settings section onto a telemetry config. Unparseable
/// levels fall back to `info` (base) or are dropped (module overrides).
pub fn telemetry_config(settings: &LoggingSettings) -> TelemetryConfig {
    let log_level = Level::from_str(&settings.level).unwrap_or_else(|_| {
        warn!(level = %settings.level, "invalid log level, using info");
        Level::INFO
    });
    let module_levels = settings
        .modules
        .iter()
        .filter_map(|(module, level)| match Level::from_str(level) {
            Ok(level) => Some((module.clone(), level)),
            Err(_) => {
                warn!(module = %module, level = %level, "invalid module log level, ignoring");
                None
            }
        })
        .collect();

    TelemetryConfig {
        log_level,
        module_levels,
        json: settings.json,
    }
}
