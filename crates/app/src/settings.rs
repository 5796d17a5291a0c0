use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use invoice_desk_backend::{AssistantConfig, DEFAULT_REPLY_DELAY, SIMULATED_PROVIDER_ID};
use invoice_desk_session::{
    CaptureOptions, DEFAULT_JPEG_QUALITY, PasswordPolicy, UploadPolicy, VideoConstraints,
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const SETTINGS_DIRECTORY_NAME: &str = "invoice-desk";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "INVOICE_DESK_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Blank means the provider's default model.
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_reply_delay_ms")]
    pub reply_delay_ms: u64,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: default_endpoint(),
            model: String::new(),
            reply_delay_ms: default_reply_delay_ms(),
        }
    }
}

impl AssistantSettings {
    pub fn to_assistant_config(&self) -> AssistantConfig {
        AssistantConfig::new(&self.provider_id, &self.api_key, &self.endpoint, &self.model)
            .with_reply_delay(Duration::from_millis(self.reply_delay_ms))
    }

    fn normalized(mut self) -> Self {
        self.provider_id = if self.provider_id.trim().is_empty() {
            default_provider_id()
        } else {
            self.provider_id.trim().to_ascii_lowercase()
        };
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = if self.endpoint.trim().is_empty() {
            default_endpoint()
        } else {
            self.endpoint.trim().to_string()
        };
        self.model = self.model.trim().to_string();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSettings {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// Image served as the camera feed by the still-image device.
    #[serde(default)]
    pub still_image_path: Option<PathBuf>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            jpeg_quality: default_jpeg_quality(),
            still_image_path: None,
        }
    }
}

impl CaptureSettings {
    pub fn to_capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            constraints: VideoConstraints {
                width: self.width,
                height: self.height,
            },
            jpeg_quality: self.jpeg_quality,
            policy: UploadPolicy::invoice_capture(),
        }
    }

    fn normalized(mut self) -> Self {
        if self.width == 0 || self.height == 0 {
            self.width = default_width();
            self.height = default_height();
        }
        if self.jpeg_quality == 0 {
            self.jpeg_quality = default_jpeg_quality();
        }
        self.jpeg_quality = self.jpeg_quality.min(100);
        self.still_image_path = self
            .still_image_path
            .filter(|path| !path.as_os_str().is_empty());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default)]
    pub password: PasswordPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub assistant: AssistantSettings,
    #[serde(default)]
    pub capture: CaptureSettings,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default = "default_inbox_dir")]
    pub inbox_dir: PathBuf,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            assistant: AssistantSettings::default(),
            capture: CaptureSettings::default(),
            auth: AuthSettings::default(),
            inbox_dir: default_inbox_dir(),
        }
    }
}

impl AppSettings {
    pub fn normalized(mut self) -> Self {
        self.assistant = self.assistant.normalized();
        self.capture = self.capture.normalized();
        self.auth.password = self.auth.password.normalized();
        if self.inbox_dir.as_os_str().is_empty() {
            self.inbox_dir = default_inbox_dir();
        }
        self
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<AppSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".invoice-desk"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_layers(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<AppSettings> {
        self.settings.load_full()
    }

    /// Applies one edit on top of the current settings, writes the file, then swaps.
    ///
    /// The in-memory settings only change once the file is on disk.
    pub fn apply(&self, edit: SettingsEdit) -> Result<Arc<AppSettings>, SettingsError> {
        let mut next = (*self.settings()).clone();
        edit.apply_to(&mut next);
        let next = Arc::new(next.normalized());

        let json = serde_json::to_vec_pretty(next.as_ref()).context(EncodeSnafu {
            stage: "encode-settings",
        })?;
        replace_file(&self.config_path, &json)?;

        self.settings.store(Arc::clone(&next));
        tracing::info!(path = ?self.config_path, edit = ?edit, "settings saved");
        Ok(next)
    }

    fn load_layers(path: &Path) -> AppSettings {
        if !path.exists() {
            tracing::info!(path = ?path, "settings file not found, using defaults and environment");
        }

        let figment = Figment::from(Serialized::defaults(AppSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        match figment.extract::<AppSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(path = ?path, error = %error, "failed to parse settings, using defaults");
                AppSettings::default()
            }
        }
    }

}

/// One console-editable setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsEdit {
    ReplyDelayMs(u64),
    Model(String),
    JpegQuality(u8),
    StillImage(Option<PathBuf>),
}

impl SettingsEdit {
    fn apply_to(&self, settings: &mut AppSettings) {
        match self {
            Self::ReplyDelayMs(delay) => settings.assistant.reply_delay_ms = *delay,
            Self::Model(model) => settings.assistant.model = model.clone(),
            Self::JpegQuality(quality) => settings.capture.jpeg_quality = *quality,
            Self::StillImage(path) => settings.capture.still_image_path = path.clone(),
        }
    }
}

/// Writes `<path>.tmp` and renames it over `path`, so readers never see a partial file.
fn replace_file(path: &Path, contents: &[u8]) -> Result<(), SettingsError> {
    if let Some(directory) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(directory).context(PrepareDirectorySnafu {
            stage: "prepare-settings-directory",
            path: directory.to_path_buf(),
        })?;
    }

    let staging = path.with_extension("json.tmp");
    std::fs::write(&staging, contents).context(StageSnafu {
        stage: "stage-settings-file",
        path: staging.clone(),
    })?;
    std::fs::rename(&staging, path).context(CommitSnafu {
        stage: "commit-settings-file",
        path: path.to_path_buf(),
    })
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("cannot encode settings on `{stage}`: {source}"))]
    Encode {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("cannot create {path:?} on `{stage}`: {source}"))]
    PrepareDirectory {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("cannot write staged settings {path:?} on `{stage}`: {source}"))]
    Stage {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("cannot move staged settings into {path:?} on `{stage}`: {source}"))]
    Commit {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

fn default_provider_id() -> String {
    SIMULATED_PROVIDER_ID.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_reply_delay_ms() -> u64 {
    DEFAULT_REPLY_DELAY.as_millis() as u64
}

fn default_width() -> u32 {
    VideoConstraints::default().width
}

fn default_height() -> u32 {
    VideoConstraints::default().height
}

fn default_jpeg_quality() -> u8 {
    DEFAULT_JPEG_QUALITY
}

fn default_inbox_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|path| path.join(SETTINGS_DIRECTORY_NAME).join("inbox"))
        .unwrap_or_else(|| PathBuf::from(".invoice-desk/inbox"))
}
