//! 应用配置：从 config/default.toml、可选配置文件与环境变量加载
//!
//! 加载顺序（后者覆盖前者）：
//! 1. `config/default.toml`（也查找 `../config/default.toml`、`default.toml`）
//! 2. 显式配置文件（`STANDBY_CONFIG` 或命令行第一个参数）：`.toml` / `.json` 按扩展名解析，
//!    其它扩展名（如 `app.conf`）按 INI 解析；INI 的 `[DEFAULT]` 段兼容旧键名
//!    `srt_id`、`srt_password`、`telegram_bot_token`、`telegram_chat_id`、`phone_number`、`port`、`log_level`
//! 3. 环境变量 `STANDBY__*`（双下划线表示嵌套，如 `STANDBY__WEB__PORT=8080`）

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::core::worker::WorkerSettings;

/// 指定配置文件路径的环境变量
pub const CONFIG_ENV: &str = "STANDBY_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub web: WebSection,
    pub srt: SrtSection,
    pub telegram: TelegramSection,
    pub worker: WorkerSection,
    pub liveness: LivenessSection,
    pub booking: BookingSection,
    pub log: LogSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub host: String,
    pub port: u16,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

/// 表单的默认账号与手机号
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SrtSection {
    pub id: String,
    pub password: String,
    pub phone_number: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TelegramSection {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub poll_interval_ms: u64,
    pub overload_backoff_secs: u64,
    pub error_backoff_secs: u64,
    pub event_capacity: usize,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            overload_backoff_secs: 5,
            error_backoff_secs: 10,
            event_capacity: crate::core::events::DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl WorkerSection {
    pub fn settings(&self) -> WorkerSettings {
        WorkerSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            overload_backoff: Duration::from_secs(self.overload_backoff_secs),
            error_backoff: Duration::from_secs(self.error_backoff_secs),
            event_capacity: self.event_capacity,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LivenessSection {
    pub check_interval_secs: u64,
    pub inactivity_timeout_secs: u64,
}

impl Default for LivenessSection {
    fn default() -> Self {
        Self {
            check_interval_secs: 15,
            inactivity_timeout_secs: 30,
        }
    }
}

impl LivenessSection {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BookingSection {
    /// "srt" 或 "mock"
    pub provider: String,
    pub base_url: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for BookingSection {
    fn default() -> Self {
        Self {
            provider: "srt".to_string(),
            base_url: None,
            request_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// 旧版 INI `[DEFAULT]` 段
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LegacySection {
    srt_id: Option<String>,
    srt_password: Option<String>,
    telegram_bot_token: Option<String>,
    telegram_chat_id: Option<String>,
    phone_number: Option<String>,
    port: Option<String>,
    log_level: Option<String>,
}

impl LegacySection {
    /// 旧键名 → 新键路径
    fn entries(self) -> Vec<(&'static str, String)> {
        [
            ("srt.id", self.srt_id),
            ("srt.password", self.srt_password),
            ("telegram.bot_token", self.telegram_bot_token),
            ("telegram.chat_id", self.telegram_chat_id),
            ("srt.phone_number", self.phone_number),
            ("web.port", self.port),
            ("log.level", self.log_level.map(|l| l.to_lowercase())),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
        .collect()
    }
}

fn file_format(path: &Path) -> FileFormat {
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => FileFormat::Toml,
        Some("json") => FileFormat::Json,
        _ => FileFormat::Ini,
    }
}

/// 把显式配置文件里的 `[DEFAULT]` 段映射为新键
fn legacy_overrides(explicit: &Config) -> Result<Option<Config>, ConfigError> {
    let legacy = ["DEFAULT", "default"]
        .iter()
        .find_map(|name| explicit.get::<LegacySection>(name).ok());
    let Some(legacy) = legacy else {
        return Ok(None);
    };

    let entries = legacy.entries();
    if entries.is_empty() {
        return Ok(None);
    }
    let mut builder = Config::builder();
    for (key, value) in entries {
        builder = builder.set_override(key, value)?;
    }
    builder.build().map(Some)
}

pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if Path::new(&path).exists() {
            builder = builder.add_source(File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            let explicit = Config::builder()
                .add_source(File::from(path.clone()).format(file_format(path)))
                .build()?;
            let legacy = legacy_overrides(&explicit)?;
            builder = builder.add_source(explicit);
            if let Some(legacy) = legacy {
                builder = builder.add_source(legacy);
            }
        } else {
            tracing::warn!("config file not found: {}", path.display());
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("STANDBY")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 配置文件路径：`STANDBY_CONFIG` 优先，其次命令行第一个参数
pub fn config_path_from_env() -> Option<PathBuf> {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .or_else(|| std::env::args_os().nth(1).map(PathBuf::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.web.port, 5000);
        assert_eq!(cfg.worker.settings(), WorkerSettings::default());
        assert_eq!(cfg.liveness.check_interval(), Duration::from_secs(15));
        assert_eq!(cfg.liveness.inactivity_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.booking.provider, "srt");
        assert_eq!(cfg.log.level, "info");
    }

    #[test]
    fn test_load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "standby.toml",
            r#"
[web]
port = 8080

[srt]
id = "user@example.com"

[worker]
poll_interval_ms = 250

[booking]
provider = "mock"
"#,
        );
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.web.port, 8080);
        assert_eq!(cfg.srt.id, "user@example.com");
        assert_eq!(cfg.worker.poll_interval_ms, 250);
        assert_eq!(cfg.worker.error_backoff_secs, 10);
        assert_eq!(cfg.booking.provider, "mock");
    }

    #[test]
    fn test_load_legacy_ini() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "app.conf",
            "[DEFAULT]\nsrt_id = 010-1111-2222\nsrt_password = secret\ntelegram_bot_token = tok\ntelegram_chat_id = 42\nphone_number = 010-1111-2222\nport = 5050\nlog_level = DEBUG\n",
        );
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.srt.id, "010-1111-2222");
        assert_eq!(cfg.srt.password, "secret");
        assert_eq!(cfg.telegram.bot_token, "tok");
        assert_eq!(cfg.telegram.chat_id, "42");
        assert_eq!(cfg.srt.phone_number, "010-1111-2222");
        assert_eq!(cfg.web.port, 5050);
        assert_eq!(cfg.log.level, "debug");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let cfg = load_config(Some(PathBuf::from("/nonexistent/standby.toml"))).unwrap();
        assert_eq!(cfg.liveness.inactivity_timeout_secs, 30);
    }
}
