use snafu::Snafu;

/// Failure to obtain a live stream from the capture device.
///
/// Surfaced to the user as a dismissable alert; never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum MediaAcquisitionError {
    #[snafu(display("camera permission was denied: {details}"))]
    PermissionDenied { stage: &'static str, details: String },
    #[snafu(display("no camera is available: {details}"))]
    DeviceUnavailable { stage: &'static str, details: String },
    #[snafu(display("the camera is in use by another application: {details}"))]
    DeviceBusy { stage: &'static str, details: String },
}

impl MediaAcquisitionError {
    /// Human-readable cause shown in the alert.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::PermissionDenied { .. } => {
                "Không thể truy cập camera. Vui lòng cho phép quyền truy cập."
            }
            Self::DeviceUnavailable { .. } => "Không tìm thấy camera trên thiết bị này.",
            Self::DeviceBusy { .. } => "Camera đang được ứng dụng khác sử dụng.",
        }
    }
}

/// Locally resolved input problems. These never reach a backend call.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ValidationError {
    #[snafu(display("'{file_name}' has unsupported type '{mime_type}' for {policy}"))]
    UnsupportedFileType {
        stage: &'static str,
        policy: &'static str,
        file_name: String,
        mime_type: String,
    },
    #[snafu(display("'{file_name}' is {size_bytes} bytes, above the {max_bytes} byte limit"))]
    FileTooLarge {
        stage: &'static str,
        file_name: String,
        size_bytes: u64,
        max_bytes: u64,
    },
    #[snafu(display("'{file_name}' is empty"))]
    EmptyFile {
        stage: &'static str,
        file_name: String,
    },
    #[snafu(display("'{email}' is not a valid email address"))]
    InvalidEmail { stage: &'static str, email: String },
    #[snafu(display("password must be at least {min_len} characters"))]
    PasswordTooShort { stage: &'static str, min_len: usize },
    #[snafu(display("password must be at most {max_len} characters"))]
    PasswordTooLong { stage: &'static str, max_len: usize },
    #[snafu(display("password confirmation does not match"))]
    PasswordMismatch { stage: &'static str },
    #[snafu(display("name must be at least {min_len} characters"))]
    NameTooShort { stage: &'static str, min_len: usize },
    #[snafu(display("name must be at most {max_len} characters"))]
    NameTooLong { stage: &'static str, max_len: usize },
    #[snafu(display("{field} is required"))]
    RequiredField {
        stage: &'static str,
        field: &'static str,
    },
}

pub type ValidationResult<T> = Result<T, ValidationError>;
