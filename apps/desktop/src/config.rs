use std::{fs, path::Path, time::Duration};

use anyhow::{anyhow, Context};
use chrono::{FixedOffset, Local, Offset};
use client_core::SyncConfig;
use serde::Deserialize;
use shared::domain::UserId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_url: String,
    pub room_id: String,
    pub user_id: String,
    pub user_name: String,
    pub send_timeout_secs: u64,
    /// Day headers use this offset; the machine's local offset when unset.
    pub utc_offset_minutes: Option<i32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/rooms.db".into(),
            room_id: "room1".into(),
            user_id: "user1".into(),
            user_name: "user1".into(),
            send_timeout_secs: 10,
            utc_offset_minutes: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    database_url: Option<String>,
    room_id: Option<String>,
    user_id: Option<String>,
    user_name: Option<String>,
    send_timeout_secs: Option<u64>,
    utc_offset_minutes: Option<i32>,
}

impl Settings {
    pub fn day_offset(&self) -> anyhow::Result<FixedOffset> {
        match self.utc_offset_minutes {
            Some(minutes) => minutes
                .checked_mul(60)
                .and_then(FixedOffset::east_opt)
                .ok_or_else(|| anyhow!("utc offset of {minutes} minutes is out of range")),
            None => Ok(Local::now().offset().fix()),
        }
    }

    pub fn sync_config(&self) -> anyhow::Result<SyncConfig> {
        Ok(
            SyncConfig::new(UserId::new(self.user_id.clone()), self.user_name.clone())
                .with_send_timeout(Duration::from_secs(self.send_timeout_secs))
                .with_day_offset(self.day_offset()?),
        )
    }

    fn apply_file(&mut self, file: FileSettings) {
        if let Some(v) = file.database_url {
            self.database_url = v;
        }
        if let Some(v) = file.room_id {
            self.room_id = v;
        }
        if let Some(v) = file.user_id {
            self.user_id = v;
        }
        if let Some(v) = file.user_name {
            self.user_name = v;
        }
        if let Some(v) = file.send_timeout_secs {
            self.send_timeout_secs = v;
        }
        if file.utc_offset_minutes.is_some() {
            self.utc_offset_minutes = file.utc_offset_minutes;
        }
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("APP__DATABASE_URL") {
            self.database_url = v;
        }
        if let Some(v) = lookup("APP__ROOM_ID") {
            self.room_id = v;
        }
        if let Some(v) = lookup("APP__USER_ID") {
            self.user_id = v;
        }
        if let Some(v) = lookup("APP__USER_NAME") {
            self.user_name = v;
        }
        if let Some(v) = lookup("APP__SEND_TIMEOUT_SECS") {
            if let Ok(parsed) = v.parse::<u64>() {
                self.send_timeout_secs = parsed;
            }
        }
        if let Some(v) = lookup("APP__UTC_OFFSET_MINUTES") {
            if let Ok(parsed) = v.parse::<i32>() {
                self.utc_offset_minutes = Some(parsed);
            }
        }
    }
}

/// Defaults, then the optional toml file, then `APP__*` environment variables.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
        let file: FileSettings = toml::from_str(&raw)
            .with_context(|| format!("invalid settings file '{}'", path.display()))?;
        settings.apply_file(file);
    }

    settings.apply_env(|key| std::env::var(key).ok());
    settings.database_url = normalize_database_url(&settings.database_url);
    Ok(settings)
}

pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}
