use crate::config::{StarlinkerConfig, THEME_SLUGS};
use crate::error::StoreError;
use crate::pool::ConnectionPool;
use crate::schema::settings;
use chrono::Utc;
use diesel::prelude::*;
use serde_json::{Map, Value};

const SETTINGS_KEY: &str = "starlinker.config";

/// Merges `patch` into `base` key by key; a nested object in both `base`
/// and `patch` is merged recursively instead of replacing `base`'s object
/// wholesale, so e.g. patching `outputs.discord_webhook` alone leaves
/// `outputs.email_to` untouched.
fn deep_merge(base: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        if let Value::Object(patch_obj) = value {
            if let Some(Value::Object(existing)) = base.get_mut(key) {
                deep_merge(existing, patch_obj);
                continue;
            }
        }
        base.insert(key.clone(), value.clone());
    }
}

/// Maps the single stored settings row onto [`StarlinkerConfig`], the same
/// role the Python `SettingsRepository` adapter plays over pydantic models.
pub struct SettingsRepository {
    pool: ConnectionPool,
}

impl SettingsRepository {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    fn get_raw(&self) -> Result<Option<Value>, StoreError> {
        let mut conn = self.pool.get()?;
        let row: Option<String> = settings::table
            .filter(settings::key.eq(SETTINGS_KEY))
            .select(settings::value_json)
            .first(&mut conn)
            .optional()?;
        Ok(match row {
            Some(text) => Some(serde_json::from_str(&text)?),
            None => None,
        })
    }

    fn put_raw(&self, value: &Value) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let payload = serde_json::to_string(value)?;
        let now = Utc::now().to_rfc3339();
        diesel::insert_into(settings::table)
            .values((
                settings::key.eq(SETTINGS_KEY),
                settings::value_json.eq(&payload),
                settings::updated_at.eq(&now),
            ))
            .on_conflict(settings::key)
            .do_update()
            .set((
                settings::value_json.eq(&payload),
                settings::updated_at.eq(&now),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    /// Loads the stored config, seeding it with defaults on first run.
    pub fn load(&self) -> Result<StarlinkerConfig, StoreError> {
        match self.get_raw()? {
            Some(raw) => Ok(serde_json::from_value(raw)?),
            None => {
                let config = StarlinkerConfig::default();
                self.save(&config)?;
                Ok(config)
            }
        }
    }

    /// Re-validates before writing; an invalid config is rejected and the
    /// previously stored row is left untouched.
    pub fn save(&self, config: &StarlinkerConfig) -> Result<(), StoreError> {
        config.validate().map_err(StoreError::Validation)?;
        let value = serde_json::to_value(config)?;
        self.put_raw(&value)
    }

    /// Deep-merges `patch` over the stored config (nested objects merge
    /// key-by-key rather than being replaced wholesale), re-validates the
    /// result, and persists it. On validation failure the prior config is
    /// left untouched.
    pub fn apply_patch(&self, patch: &Map<String, Value>) -> Result<StarlinkerConfig, StoreError> {
        let current = self.load()?;
        let mut merged = serde_json::to_value(&current)?;
        if let Value::Object(map) = &mut merged {
            deep_merge(map, patch);
        }
        let config: StarlinkerConfig = serde_json::from_value(merged)?;
        self.save(&config)?;
        Ok(config)
    }

    pub fn default_config(&self) -> StarlinkerConfig {
        StarlinkerConfig::default()
    }

    /// A best-effort schema description for the admin UI, not a full JSON
    /// Schema document.
    pub fn config_schema(&self) -> Value {
        serde_json::json!({
            "timezone": "string (IANA tz name)",
            "quiet_hours": "[start: HH:MM, end: HH:MM]",
            "schedule": {
                "digest_daily": "HH:MM",
                "digest_weekly": "\"dow HH:MM\" (e.g. \"mon 09:00\") or empty to disable",
                "priority_poll_minutes": "integer",
                "standard_poll_hours": "integer",
            },
            "outputs": {"discord_webhook": "string", "email_to": "string"},
            "appearance": {"theme": THEME_SLUGS},
        })
    }

    pub fn missing_prerequisites(&self, config: Option<&StarlinkerConfig>) -> Result<Vec<String>, StoreError> {
        let owned;
        let cfg = match config {
            Some(c) => c,
            None => {
                owned = self.load()?;
                &owned
            }
        };
        let mut missing = Vec::new();
        if cfg.outputs.discord_webhook.is_empty() && cfg.outputs.email_to.is_empty() {
            missing.push("digest_output".to_string());
        }
        if cfg.timezone.is_empty() {
            missing.push("timezone".to_string());
        }
        Ok(missing)
    }

    pub fn export_raw(&self) -> Result<Value, StoreError> {
        Ok(self.get_raw()?.unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::get_pool;

    fn repo() -> SettingsRepository {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap().to_string();
        crate::migrations::run_migrations(&path).unwrap();
        let pool = get_pool(&path, 4).unwrap();
        SettingsRepository::new(pool)
    }

    #[test]
    fn load_seeds_defaults_on_first_run() {
        let repo = repo();
        let cfg = repo.load().unwrap();
        assert_eq!(cfg, StarlinkerConfig::default());
    }

    #[test]
    fn apply_patch_updates_and_persists() {
        let repo = repo();
        let mut patch = Map::new();
        patch.insert("timezone".to_string(), Value::String("UTC".to_string()));
        let updated = repo.apply_patch(&patch).unwrap();
        assert_eq!(updated.timezone, "UTC");
        assert_eq!(repo.load().unwrap().timezone, "UTC");
    }

    #[test]
    fn missing_prerequisites_flags_absent_outputs() {
        let repo = repo();
        let missing = repo.missing_prerequisites(None).unwrap();
        assert!(missing.contains(&"digest_output".to_string()));
    }

    #[test]
    fn patching_one_output_field_preserves_the_other() {
        let repo = repo();
        let mut seed = Map::new();
        let mut outputs = Map::new();
        outputs.insert("email_to".to_string(), Value::String("a@x.com".to_string()));
        seed.insert("outputs".to_string(), Value::Object(outputs));
        repo.apply_patch(&seed).unwrap();

        let mut patch = Map::new();
        let mut outputs = Map::new();
        outputs.insert(
            "discord_webhook".to_string(),
            Value::String("https://discord.example/hook".to_string()),
        );
        patch.insert("outputs".to_string(), Value::Object(outputs));
        let updated = repo.apply_patch(&patch).unwrap();

        assert_eq!(updated.outputs.discord_webhook, "https://discord.example/hook");
        assert_eq!(updated.outputs.email_to, "a@x.com");
    }

    #[test]
    fn invalid_patch_is_rejected_and_leaves_prior_config_untouched() {
        let repo = repo();
        let mut patch = Map::new();
        let mut appearance = Map::new();
        appearance.insert("theme".to_string(), Value::String("unknown".to_string()));
        patch.insert("appearance".to_string(), Value::Object(appearance));

        assert!(matches!(
            repo.apply_patch(&patch),
            Err(StoreError::Validation(_))
        ));
        assert_eq!(repo.load().unwrap().appearance.theme, "neutral");
    }
}
