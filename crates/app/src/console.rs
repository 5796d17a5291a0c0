use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone};
use invoice_desk_backend::{AssistantBackend, InvoiceProcessor, InvoiceUpload, create_assistant};
use invoice_desk_session::{
    AdminSection, ArtifactId, AuthPage, AuthSession, CaptureError, CaptureOptions,
    CaptureSessionController, ChatMessage, ChatTurnController, DashboardView, LoginForm,
    MediaSource, NavigationState, Page, PasswordChangeForm, SelectedFile, Sender, SignupForm,
    UploadPolicy, mime_type_for_name, select_page,
};
use snafu::{OptionExt, ResultExt, Snafu, ensure};

use crate::device::{StillImageSource, describe_acquisition_error};
use crate::settings::{AppSettings, SettingsEdit, SettingsStore};

pub const HELP: &str = "\
commands:
  login <email> <password>
  signup <name> <email> <password> <confirm>
  logout
  camera start|stop|capture
  upload <path> [mime]
  clear
  submit
  say <text>
  profile <name> <email>
  password <current> <new> <confirm>
  settings [delay <ms>|model <id>|quality <1-100>|image <path>|image none]   (admin)
  menu <section>        (admin: dashboard users invoices forms reports files security settings)
  auth login|signup
  status
  help
  quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraAction {
    Start,
    Stop,
    Capture,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { email: String, password: String },
    Signup {
        name: String,
        email: String,
        password: String,
        confirm_password: String,
    },
    Logout,
    Camera(CameraAction),
    Upload { path: PathBuf, mime_type: Option<String> },
    Clear,
    Submit,
    Say(String),
    Profile { name: String, email: String },
    Password {
        current_password: String,
        new_password: String,
        confirm_password: String,
    },
    /// `None` shows the current settings.
    Settings(Option<SettingsEdit>),
    Menu(AdminSection),
    ShowAuthPage(AuthPage),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConsoleError {
    #[snafu(display("unknown command '{name}', try `help`"))]
    UnknownCommand { stage: &'static str, name: String },
    #[snafu(display("usage: {usage}"))]
    Usage {
        stage: &'static str,
        usage: &'static str,
    },
    #[snafu(display("unknown menu section '{section}'"))]
    UnknownSection { stage: &'static str, section: String },
    #[snafu(display("failed to read {path:?} on `{stage}`: {source}"))]
    ReadUpload {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type ConsoleResult<T> = Result<T, ConsoleError>;

/// Parses one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> ConsoleResult<Option<Command>> {
    let line = line.trim();
    let Some((name, rest)) = split_first(line) else {
        return Ok(None);
    };
    let args: Vec<&str> = rest.split_whitespace().collect();

    let command = match name.to_ascii_lowercase().as_str() {
        "login" => {
            ensure!(
                args.len() == 2,
                UsageSnafu {
                    stage: "parse-login",
                    usage: "login <email> <password>",
                }
            );
            Command::Login {
                email: args[0].to_string(),
                password: args[1].to_string(),
            }
        }
        "signup" => {
            // The name may contain spaces; the last three words are fixed.
            ensure!(
                args.len() >= 4,
                UsageSnafu {
                    stage: "parse-signup",
                    usage: "signup <name> <email> <password> <confirm>",
                }
            );
            let split = args.len() - 3;
            Command::Signup {
                name: args[..split].join(" "),
                email: args[split].to_string(),
                password: args[split + 1].to_string(),
                confirm_password: args[split + 2].to_string(),
            }
        }
        "logout" => Command::Logout,
        "camera" => {
            let action = match args.as_slice() {
                ["start"] => CameraAction::Start,
                ["stop"] => CameraAction::Stop,
                ["capture"] => CameraAction::Capture,
                _ => {
                    return UsageSnafu {
                        stage: "parse-camera",
                        usage: "camera start|stop|capture",
                    }
                    .fail();
                }
            };
            Command::Camera(action)
        }
        "upload" => match args.as_slice() {
            [path] => Command::Upload {
                path: PathBuf::from(path),
                mime_type: None,
            },
            [path, mime_type] => Command::Upload {
                path: PathBuf::from(path),
                mime_type: Some(mime_type.to_string()),
            },
            _ => {
                return UsageSnafu {
                    stage: "parse-upload",
                    usage: "upload <path> [mime]",
                }
                .fail();
            }
        },
        "clear" => Command::Clear,
        "submit" => Command::Submit,
        "say" => Command::Say(rest.trim().to_string()),
        "profile" => {
            ensure!(
                args.len() >= 2,
                UsageSnafu {
                    stage: "parse-profile",
                    usage: "profile <name> <email>",
                }
            );
            let split = args.len() - 1;
            Command::Profile {
                name: args[..split].join(" "),
                email: args[split].to_string(),
            }
        }
        "password" => {
            let [current, new, confirm] = args.as_slice() else {
                return UsageSnafu {
                    stage: "parse-password",
                    usage: "password <current> <new> <confirm>",
                }
                .fail();
            };
            Command::Password {
                current_password: current.to_string(),
                new_password: new.to_string(),
                confirm_password: confirm.to_string(),
            }
        }
        "settings" => Command::Settings(parse_settings_edit(&args)?),
        "menu" => {
            let [section] = args.as_slice() else {
                return UsageSnafu {
                    stage: "parse-menu",
                    usage: "menu <section>",
                }
                .fail();
            };
            let parsed = AdminSection::parse(section).context(UnknownSectionSnafu {
                stage: "parse-menu",
                section: section.to_string(),
            })?;
            Command::Menu(parsed)
        }
        "auth" => match args.as_slice() {
            ["login"] => Command::ShowAuthPage(AuthPage::Login),
            ["signup"] => Command::ShowAuthPage(AuthPage::Signup),
            _ => {
                return UsageSnafu {
                    stage: "parse-auth",
                    usage: "auth login|signup",
                }
                .fail();
            }
        },
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => {
            return UnknownCommandSnafu {
                stage: "parse-command",
                name: other.to_string(),
            }
            .fail();
        }
    };

    Ok(Some(command))
}

const SETTINGS_USAGE: &str =
    "settings [delay <ms>|model <id>|quality <1-100>|image <path>|image none]";

fn parse_settings_edit(args: &[&str]) -> ConsoleResult<Option<SettingsEdit>> {
    let edit = match args {
        [] => return Ok(None),
        ["delay", ms] => ms.parse().ok().map(SettingsEdit::ReplyDelayMs),
        ["model", model] => Some(SettingsEdit::Model(model.to_string())),
        ["quality", quality] => quality
            .parse()
            .ok()
            .filter(|quality| (1..=100).contains(quality))
            .map(SettingsEdit::JpegQuality),
        ["image", "none"] => Some(SettingsEdit::StillImage(None)),
        ["image", path] => Some(SettingsEdit::StillImage(Some(PathBuf::from(path)))),
        _ => None,
    };
    edit.map(Some).context(UsageSnafu {
        stage: "parse-settings",
        usage: SETTINGS_USAGE,
    })
}

fn split_first(line: &str) -> Option<(&str, &str)> {
    if line.is_empty() {
        return None;
    }
    Some(line.split_once(char::is_whitespace).unwrap_or((line, "")))
}

/// `HH:MM` in the local time zone for a message timestamp.
pub fn clock_text(unix_ms: u64) -> String {
    clock_text_in(unix_ms, &Local)
}

pub fn clock_text_in<Tz>(unix_ms: u64, zone: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    i64::try_from(unix_ms)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map(|instant| instant.with_timezone(zone).format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string())
}

pub fn render_message(message: &ChatMessage) -> String {
    let speaker = match message.sender {
        Sender::User => "you",
        Sender::Assistant => "assistant",
    };
    format!(
        "[{} #{}] {speaker}: {}",
        clock_text(message.sent_at_unix_ms),
        message.id.0,
        message.text
    )
}

/// Controllers mounted for the end-user dashboard. Torn down on sign-out.
struct Workspace {
    capture: CaptureSessionController,
    chat: ChatTurnController,
}

impl Workspace {
    fn dispose(&self) {
        self.capture.dispose();
        self.chat.dispose();
    }
}

pub enum Flow {
    Continue(Vec<String>),
    Quit,
}

/// The presentation stand-in: routes commands to whichever page is active.
pub struct Console {
    auth: AuthSession,
    media: Arc<dyn MediaSource>,
    assistant: Arc<dyn AssistantBackend>,
    processor: Arc<dyn InvoiceProcessor>,
    capture_options: CaptureOptions,
    settings: Option<Arc<SettingsStore>>,
    nav: NavigationState,
    workspace: Option<Workspace>,
}

impl Console {
    pub fn new(
        auth: AuthSession,
        media: Arc<dyn MediaSource>,
        assistant: Arc<dyn AssistantBackend>,
        processor: Arc<dyn InvoiceProcessor>,
        capture_options: CaptureOptions,
    ) -> Self {
        Self {
            auth,
            media,
            assistant,
            processor,
            capture_options,
            settings: None,
            nav: NavigationState::default(),
            workspace: None,
        }
    }

    /// Enables the admin `settings` command, which saves through `store`.
    pub fn with_settings(mut self, store: Arc<SettingsStore>) -> Self {
        self.settings = Some(store);
        self
    }

    pub fn page(&self) -> Page {
        select_page(self.auth.current_user().as_ref(), &self.nav)
    }

    pub fn prompt(&self) -> String {
        match self.page() {
            Page::Auth(AuthPage::Login) => "login> ".to_string(),
            Page::Auth(AuthPage::Signup) => "signup> ".to_string(),
            Page::Dashboard(DashboardView::Workspace) => "invoices> ".to_string(),
            Page::Dashboard(DashboardView::Admin(section)) => format!("admin/{}> ", section.id()),
        }
    }

    /// Keeps the mounted controllers in step with the page: mount on entering the
    /// workspace, tear down on leaving it.
    fn sync_workspace(&mut self) {
        let on_workspace = self.page() == Page::Dashboard(DashboardView::Workspace);
        match (&self.workspace, on_workspace) {
            (None, true) => {
                self.workspace = Some(Workspace {
                    capture: CaptureSessionController::with_options(
                        Arc::clone(&self.media),
                        self.capture_options,
                    ),
                    chat: ChatTurnController::new(Arc::clone(&self.assistant)),
                });
                tracing::debug!("workspace mounted");
            }
            (Some(workspace), false) => {
                workspace.dispose();
                self.workspace = None;
                tracing::debug!("workspace torn down");
            }
            _ => {}
        }
    }

    pub async fn execute(&mut self, command: Command) -> Flow {
        let lines = match command {
            Command::Quit => {
                self.shutdown();
                return Flow::Quit;
            }
            Command::Help => vec![HELP.to_string()],
            Command::Status => self.status(),
            Command::ShowAuthPage(page) => {
                self.nav.auth_page = page;
                vec![format!("showing {page:?} page")]
            }
            Command::Login { email, password } => {
                let form = LoginForm { email, password };
                match self.auth.login(form).await {
                    Ok(user) => vec![format!("signed in as {} ({:?})", user.name, user.role)],
                    Err(error) => vec![format!("error: {error}")],
                }
            }
            Command::Signup {
                name,
                email,
                password,
                confirm_password,
            } => {
                let form = SignupForm {
                    name,
                    email,
                    password,
                    confirm_password,
                };
                match self.auth.register(form).await {
                    Ok(user) => vec![format!("account created for {}", user.email)],
                    Err(error) => vec![format!("error: {error}")],
                }
            }
            Command::Logout => {
                self.auth.logout();
                self.nav.auth_page = AuthPage::Login;
                vec!["signed out".to_string()]
            }
            Command::Profile { name, email } => match self.auth.update_profile(&name, &email).await
            {
                Ok(user) => vec![format!("profile updated: {} <{}>", user.name, user.email)],
                Err(error) => vec![format!("error: {error}")],
            },
            Command::Password {
                current_password,
                new_password,
                confirm_password,
            } => {
                let form = PasswordChangeForm {
                    current_password,
                    new_password,
                    confirm_password,
                };
                match self.auth.change_password(form).await {
                    Ok(()) => vec!["password changed".to_string()],
                    Err(error) => vec![format!("error: {error}")],
                }
            }
            Command::Settings(edit) => match self.page() {
                Page::Dashboard(DashboardView::Admin(_)) => {
                    self.nav.admin_section = AdminSection::Settings;
                    self.edit_settings(edit)
                }
                _ => vec!["error: settings need an administrator".to_string()],
            },
            Command::Menu(section) => match self.page() {
                Page::Dashboard(DashboardView::Admin(_)) => {
                    self.nav.admin_section = section;
                    vec![format!("{} ({})", section.label(), section.id())]
                }
                _ => vec!["error: the admin menu needs an administrator".to_string()],
            },
            command => self.execute_panel(command).await,
        };

        self.sync_workspace();
        Flow::Continue(lines)
    }

    async fn execute_panel(&mut self, command: Command) -> Vec<String> {
        self.sync_workspace();
        match (self.page(), &self.workspace) {
            (Page::Dashboard(DashboardView::Workspace), Some(workspace)) => {
                self.execute_workspace(workspace, command).await
            }
            (Page::Dashboard(DashboardView::Admin(_)), _) => match command {
                Command::Upload { path, mime_type } => {
                    let outcome = self.upload_template(&path, mime_type).await;
                    vec![outcome.unwrap_or_else(|line| line)]
                }
                _ => vec!["error: not available on the admin dashboard".to_string()],
            },
            _ => vec!["error: sign in first".to_string()],
        }
    }

    async fn execute_workspace(&self, workspace: &Workspace, command: Command) -> Vec<String> {
        let capture = &workspace.capture;
        let result = match command {
            Command::Camera(CameraAction::Start) => capture
                .start_camera()
                .await
                .map(|()| format!("camera on ({} track)", capture.held_track_count())),
            Command::Camera(CameraAction::Stop) => {
                capture.stop_camera();
                Ok(format!("camera {}", capture.state()))
            }
            Command::Camera(CameraAction::Capture) => capture.capture_photo().map(|artifact| {
                format!(
                    "captured {} ({} bytes)",
                    artifact.file_name, artifact.size_bytes
                )
            }),
            Command::Upload { path, mime_type } => match read_selected_file(&path, mime_type).await
            {
                Ok(file) => capture.select_file(file).map(|artifact| {
                    format!(
                        "selected {} ({}, {} bytes)",
                        artifact.file_name, artifact.mime_type, artifact.size_bytes
                    )
                }),
                Err(error) => return vec![format!("error: {error}")],
            },
            Command::Clear => capture
                .clear_artifact()
                .map(|()| "artifact cleared".to_string()),
            Command::Submit => capture
                .submit(self.processor.as_ref())
                .await
                .map(|receipt| match receipt.location {
                    Some(location) => format!("submitted as {} -> {location}", receipt.reference),
                    None => format!("submitted as {}", receipt.reference),
                }),
            Command::Say(text) => return say(&workspace.chat, &text).await,
            _ => return vec!["error: not available here".to_string()],
        };

        match result {
            Ok(line) => vec![line],
            Err(CaptureError::MediaAcquisition { source, .. }) => {
                vec![format!("alert: {}", describe_acquisition_error(&source))]
            }
            Err(error) => vec![format!("error: {error}")],
        }
    }

    fn edit_settings(&mut self, edit: Option<SettingsEdit>) -> Vec<String> {
        let Some(store) = self.settings.clone() else {
            return vec!["error: settings are read-only in this session".to_string()];
        };
        let Some(edit) = edit else {
            return describe_settings(&store.settings());
        };

        match store.apply(edit) {
            Ok(saved) => {
                self.adopt_settings(&saved);
                let mut lines = vec![format!("saved to {}", store.config_path().display())];
                lines.extend(describe_settings(&saved));
                lines
            }
            Err(error) => {
                tracing::warn!(error = %error, "settings not saved");
                vec![format!("error: {error}")]
            }
        }
    }

    /// Later workspace mounts pick up the new assistant, camera, and capture options.
    fn adopt_settings(&mut self, settings: &AppSettings) {
        match create_assistant(settings.assistant.to_assistant_config()) {
            Ok(assistant) => self.assistant = assistant,
            Err(error) => {
                tracing::warn!(error = %error, "keeping previous assistant");
            }
        }
        self.media = Arc::new(StillImageSource::new(
            settings.capture.still_image_path.clone(),
        ));
        self.capture_options = settings.capture.to_capture_options();
    }

    /// Administrative template upload: validated against the template policy, then
    /// handed straight to the processor.
    async fn upload_template(&self, path: &Path, mime_type: Option<String>) -> Result<String, String> {
        let file = read_selected_file(path, mime_type)
            .await
            .map_err(|error| format!("error: {error}"))?;
        UploadPolicy::form_template()
            .validate(&file)
            .map_err(|error| format!("error: {error}"))?;

        let upload = InvoiceUpload {
            reference: ArtifactId::new_v7().to_string(),
            file_name: file.name,
            mime_type: file.mime_type,
            bytes: file.bytes.into(),
        };
        let receipt = self
            .processor
            .process(upload)
            .await
            .map_err(|error| format!("error: upload failed: {error}"))?;
        Ok(format!("template uploaded as {}", receipt.reference))
    }

    fn status(&self) -> Vec<String> {
        let mut lines = vec![format!("page: {:?}", self.page())];
        match self.auth.current_user() {
            Some(user) => lines.push(format!("user: {} <{}> {:?}", user.name, user.email, user.role)),
            None => lines.push("user: signed out".to_string()),
        }
        if let Some(error) = self.auth.last_error() {
            lines.push(format!("last error: {error}"));
        }
        if let Some(workspace) = &self.workspace {
            let capture = &workspace.capture;
            lines.push(format!(
                "capture: {}{}",
                capture.state(),
                if capture.is_acquiring() {
                    " (waiting for camera)"
                } else {
                    ""
                }
            ));
            if let Some(artifact) = capture.pending_artifact() {
                lines.push(format!(
                    "pending: {} {} ({} bytes, {:?})",
                    artifact.id, artifact.file_name, artifact.size_bytes, artifact.origin
                ));
            }
            lines.extend(workspace.chat.messages().iter().map(render_message));
            if workspace.chat.turn_state().awaiting_reply {
                lines.push("assistant is typing...".to_string());
            }
        }
        lines
    }

    pub fn shutdown(&mut self) {
        if let Some(workspace) = self.workspace.take() {
            workspace.dispose();
        }
    }
}

fn describe_settings(settings: &AppSettings) -> Vec<String> {
    let model = if settings.assistant.model.is_empty() {
        "(provider default)"
    } else {
        settings.assistant.model.as_str()
    };
    let image = settings
        .capture
        .still_image_path
        .as_ref()
        .map_or_else(|| "(none)".to_string(), |path| path.display().to_string());
    vec![
        format!(
            "assistant: {} model {model}, reply delay {} ms",
            settings.assistant.provider_id, settings.assistant.reply_delay_ms
        ),
        format!(
            "capture: {}x{} jpeg {} image {image}",
            settings.capture.width, settings.capture.height, settings.capture.jpeg_quality
        ),
        format!(
            "passwords: {}..={} characters",
            settings.auth.password.min_len, settings.auth.password.max_len
        ),
        format!("inbox: {}", settings.inbox_dir.display()),
    ]
}

async fn say(chat: &ChatTurnController, text: &str) -> Vec<String> {
    let pending = match chat.send_message(text) {
        Ok(pending) => pending,
        Err(error) => return vec![format!("error: {error}")],
    };
    let sent = pending.message_id;
    pending.wait().await;

    chat.messages()
        .iter()
        .filter(|message| message.id >= sent)
        .map(render_message)
        .collect()
}

async fn read_selected_file(path: &Path, mime_type: Option<String>) -> ConsoleResult<SelectedFile> {
    let bytes = tokio::fs::read(path).await.context(ReadUploadSnafu {
        stage: "read-upload",
        path: path.to_path_buf(),
    })?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mime_type = mime_type.unwrap_or_else(|| mime_type_for_name(&name).to_string());
    Ok(SelectedFile::new(name, mime_type, bytes))
}
