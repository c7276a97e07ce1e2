use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex};

pub mod api;
pub mod auth;
pub mod compositor;
pub mod config;
pub mod cost;
pub mod error;
pub mod ffmpeg;
pub mod init;
pub mod platform;
pub mod prompts;
pub mod timeline;
pub mod workflow;

pub use compositor::{ComposedClip, compose};
pub use error::ComposeError;
pub use timeline::{Timeline, TransitionPolicy, TransitionSpec};

pub type GeneratorLogHook = Arc<Mutex<dyn Fn(&str) + Send + Sync + 'static>>;

static LOG_HOOK: Lazy<Mutex<Option<GeneratorLogHook>>> = Lazy::new(|| Mutex::new(None));

pub fn set_log_hook(hook: Option<GeneratorLogHook>) {
    if let Ok(mut guard) = LOG_HOOK.lock() {
        *guard = hook;
    }
}

pub fn logv(tag: &str, message: &str) {
    match tag {
        "WARN" => tracing::warn!("{}", message),
        "OK" => tracing::info!(status = "ok", "{}", message),
        _ => tracing::info!("{}", message),
    }

    if let Ok(guard) = LOG_HOOK.lock() {
        if let Some(hook) = guard.as_ref() {
            if let Ok(callback) = hook.lock() {
                let line = format!("[{}] {}", tag, message);
                callback(&line);
            }
        }
    }
}

pub fn logi(message: impl AsRef<str>) {
    logv("INFO", message.as_ref());
}

pub fn logok(message: impl AsRef<str>) {
    logv("OK", message.as_ref());
}

pub fn logw(message: impl AsRef<str>) {
    logv("WARN", message.as_ref());
}
