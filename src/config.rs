use log::warn;

use crate::calc;

/// Platform configuration consumed once at startup from the environment.
#[derive(Debug, Clone, Default)]
pub struct PlatformConfig {
    /// Overrides the derived platform epoch (the August that starts the
    /// current school year) when set to a valid YYYY-MM value.
    pub epoch_override: Option<(i32, u32)>,
    /// Gates the one-shot admin bootstrap method.
    pub admin_setup_enabled: bool,
}

impl PlatformConfig {
    pub fn from_env() -> Self {
        Self::from_values(
            std::env::var("FEEBOOK_PLATFORM_EPOCH").ok().as_deref(),
            std::env::var("FEEBOOK_ADMIN_SETUP").ok().as_deref(),
        )
    }

    fn from_values(epoch: Option<&str>, admin_setup: Option<&str>) -> Self {
        let epoch_override = epoch.and_then(|raw| match calc::parse_month_key(raw) {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                warn!("ignoring invalid FEEBOOK_PLATFORM_EPOCH value: {}", raw);
                None
            }
        });
        Self {
            epoch_override,
            admin_setup_enabled: admin_setup.map(flag_enabled).unwrap_or(false),
        }
    }
}

fn flag_enabled(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
