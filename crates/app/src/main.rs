use std::sync::Arc;

use invoice_desk::console::{Console, Flow, HELP, parse_command};
use invoice_desk::device::StillImageSource;
use invoice_desk::settings::SettingsStore;
use invoice_desk_backend::{InboxProcessor, MockAuthBackend, SimulatedAssistant, create_assistant};
use invoice_desk_session::AuthSession;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let store = Arc::new(SettingsStore::load());
    let settings = store.settings();
    tracing::info!(config_path = ?store.config_path(), "settings loaded");

    let assistant = match create_assistant(settings.assistant.to_assistant_config()) {
        Ok(assistant) => assistant,
        Err(error) => {
            tracing::warn!(error = %error, "assistant unavailable, falling back to simulated replies");
            Arc::new(SimulatedAssistant::default())
        }
    };
    tracing::info!(provider = assistant.id(), "assistant ready");

    let auth = AuthSession::new(Arc::new(MockAuthBackend::new()), settings.auth.password);
    let mut console = Console::new(
        auth,
        Arc::new(StillImageSource::new(settings.capture.still_image_path.clone())),
        assistant,
        Arc::new(InboxProcessor::new(settings.inbox_dir.clone())),
        settings.capture.to_capture_options(),
    )
    .with_settings(Arc::clone(&store));

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    if let Err(error) = emit(&mut stdout, &format!("{HELP}\n")).await {
        tracing::warn!(error = %error, "failed to write output");
        console.shutdown();
        return;
    }

    loop {
        if let Err(error) = emit(&mut stdout, &console.prompt()).await {
            tracing::warn!(error = %error, "failed to write prompt");
            break;
        }

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(error) => {
                tracing::warn!(error = %error, "failed to read input");
                break;
            }
        };

        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(error) => {
                if let Err(error) = emit(&mut stdout, &format!("{error}\n")).await {
                    tracing::warn!(error = %error, "failed to write output");
                    break;
                }
                continue;
            }
        };

        let output = match console.execute(command).await {
            Flow::Continue(output) => output,
            Flow::Quit => break,
        };
        let text: String = output.iter().map(|line| format!("{line}\n")).collect();
        if let Err(error) = emit(&mut stdout, &text).await {
            tracing::warn!(error = %error, "failed to write output");
            break;
        }
    }

    console.shutdown();
    tracing::info!("bye");
}

async fn emit<W: AsyncWrite + Unpin>(out: &mut W, text: &str) -> std::io::Result<()> {
    out.write_all(text.as_bytes()).await?;
    out.flush().await
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use super::*;

    struct ClosedPipe;

    impl AsyncWrite for ClosedPipe {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn emit_writes_and_flushes() {
        let mut out = Vec::new();
        emit(&mut out, "ready> ").await.unwrap();
        assert_eq!(out, b"ready> ");
    }

    #[tokio::test]
    async fn emit_reports_broken_pipe() {
        let error = emit(&mut ClosedPipe, "lost\n").await.unwrap_err();
        assert_eq!(error.kind(), std::io::ErrorKind::BrokenPipe);
    }
}
