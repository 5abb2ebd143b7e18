use crate::error::FieldError;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

pub const THEME_SLUGS: &[&str] = &["neutral", "uee", "crusader", "drake", "rsi"];

/// Parses a `"dow HH:MM"` weekly-digest schedule (e.g. `"mon 09:00"`) into
/// its weekday and time-of-day components. `dow` is matched on its first
/// three letters, case-insensitively, so `"Mon"`/`"monday"` both work.
pub fn parse_weekly_schedule(value: &str) -> Option<(chrono::Weekday, &str)> {
    let value = value.trim();
    let (dow, time) = value.split_once(char::is_whitespace)?;
    let time = time.trim();
    let prefix: String = dow.chars().take(3).collect::<String>().to_lowercase();
    let weekday = match prefix.as_str() {
        "mon" => chrono::Weekday::Mon,
        "tue" => chrono::Weekday::Tue,
        "wed" => chrono::Weekday::Wed,
        "thu" => chrono::Weekday::Thu,
        "fri" => chrono::Weekday::Fri,
        "sat" => chrono::Weekday::Sat,
        "sun" => chrono::Weekday::Sun,
        _ => return None,
    };
    if time.is_empty() {
        return None;
    }
    Some((weekday, time))
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OutputsConfig {
    #[serde(default)]
    pub discord_webhook: String,
    #[serde(default)]
    pub email_to: String,
}

impl Default for OutputsConfig {
    fn default() -> Self {
        Self {
            discord_webhook: String::new(),
            email_to: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PatchNotesConfig {
    pub enabled: bool,
    pub include_ptu: bool,
}

impl Default for PatchNotesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include_ptu: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RoadmapConfig {
    pub enabled: bool,
}

impl Default for RoadmapConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StatusConfig {
    pub enabled: bool,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ThisWeekConfig {
    pub enabled: bool,
}

impl Default for ThisWeekConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InsideStarCitizenConfig {
    pub enabled: bool,
    pub channels: Vec<String>,
}

impl Default for InsideStarCitizenConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: vec!["rsi_official".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RedditSourceConfig {
    pub enabled: bool,
    pub subs: Vec<String>,
    pub feed: Vec<String>,
    pub min_upvotes: i32,
    #[serde(default)]
    pub include_keywords: Vec<String>,
    #[serde(default)]
    pub exclude_keywords: Vec<String>,
    #[serde(default)]
    pub exclude_flairs: Vec<String>,
}

impl Default for RedditSourceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            subs: vec!["starcitizen".to_string()],
            feed: vec!["new".to_string()],
            min_upvotes: 50,
            include_keywords: Vec::new(),
            exclude_keywords: Vec::new(),
            exclude_flairs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct SourcesConfig {
    #[serde(default)]
    pub patch_notes: PatchNotesConfig,
    #[serde(default)]
    pub roadmap: RoadmapConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub this_week: ThisWeekConfig,
    #[serde(default)]
    pub inside_sc: InsideStarCitizenConfig,
    #[serde(default)]
    pub reddit: RedditSourceConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ScheduleConfig {
    pub digest_daily: String,
    /// `"dow HH:MM"` (e.g. `"mon 09:00"`), or empty to disable. See
    /// [`parse_weekly_schedule`].
    #[serde(default)]
    pub digest_weekly: String,
    pub priority_poll_minutes: u32,
    pub standard_poll_hours: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            digest_daily: "09:00".to_string(),
            digest_weekly: String::new(),
            priority_poll_minutes: 60,
            standard_poll_hours: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppearanceConfig {
    pub theme: String,
}

impl Default for AppearanceConfig {
    fn default() -> Self {
        Self {
            theme: "neutral".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StarlinkerConfig {
    pub timezone: String,
    pub quiet_hours: Vec<String>,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub outputs: OutputsConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub appearance: AppearanceConfig,
}

impl Default for StarlinkerConfig {
    fn default() -> Self {
        Self {
            timezone: "America/New_York".to_string(),
            quiet_hours: vec!["23:00".to_string(), "07:00".to_string()],
            schedule: ScheduleConfig::default(),
            outputs: OutputsConfig::default(),
            sources: SourcesConfig::default(),
            appearance: AppearanceConfig::default(),
        }
    }
}

impl StarlinkerConfig {
    /// Re-validates the whole config, collecting every violation rather than
    /// stopping at the first so a single rejected `PATCH`/`PUT` reports all
    /// of its problems at once.
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        if self.quiet_hours.len() != 2 {
            errors.push(FieldError {
                path: "quiet_hours".to_string(),
                message: format!(
                    "must define exactly a start and end, got {}",
                    self.quiet_hours.len()
                ),
            });
        }
        if !THEME_SLUGS.contains(&self.appearance.theme.as_str()) {
            errors.push(FieldError {
                path: "appearance.theme".to_string(),
                message: format!("'{}' is not recognised", self.appearance.theme),
            });
        }
        let weekly = self.schedule.digest_weekly.trim();
        if !weekly.is_empty() && parse_weekly_schedule(weekly).is_none() {
            errors.push(FieldError {
                path: "schedule.digest_weekly".to_string(),
                message: format!("'{weekly}' is not a valid \"dow HH:MM\" schedule"),
            });
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Layered configuration: built-in defaults, then `Starlinker.toml`,
    /// then `STARLINKER_`-prefixed environment variables — same precedence
    /// as the teacher's ingest config.
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file("Starlinker.toml"))
            .merge(Env::prefixed("STARLINKER_"))
    }

    pub fn load() -> figment::Result<Self> {
        Self::figment().extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(StarlinkerConfig::default().validate().is_ok());
    }

    #[test]
    fn bad_theme_is_rejected() {
        let mut cfg = StarlinkerConfig::default();
        cfg.appearance.theme = "magenta".to_string();
        let errors = cfg.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.path == "appearance.theme"));
    }

    #[test]
    fn quiet_hours_must_have_two_entries() {
        let mut cfg = StarlinkerConfig::default();
        cfg.quiet_hours = vec!["23:00".to_string()];
        let errors = cfg.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.path == "quiet_hours"));
    }

    #[test]
    fn malformed_weekly_schedule_is_rejected() {
        let mut cfg = StarlinkerConfig::default();
        cfg.schedule.digest_weekly = "09:00".to_string();
        let errors = cfg.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.path == "schedule.digest_weekly"));
    }

    #[test]
    fn weekly_schedule_parses_dow_and_time() {
        let (weekday, time) = parse_weekly_schedule("mon 09:00").unwrap();
        assert_eq!(weekday, chrono::Weekday::Mon);
        assert_eq!(time, "09:00");
        assert!(parse_weekly_schedule("09:00").is_none());
        assert_eq!(
            parse_weekly_schedule("FRIDAY 18:30").unwrap().0,
            chrono::Weekday::Fri
        );
    }
}
