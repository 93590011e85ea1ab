//! Shared test utilities for eventsync crates.
//!
//! Environment guards for tests that touch `EVENTSYNC_*` variables, and
//! legacy-export record fixtures. The fixtures deliberately mix field
//! spellings the way real exports do.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, MutexGuard};

/// Serialize tests that mutate process-global state (env vars).
///
/// Acquire this guard at the start of any test that modifies environment
/// variables to prevent race conditions between parallel tests.
pub fn env_guard() -> MutexGuard<'static, ()> {
    static TEST_SERIAL: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));
    TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner())
}

/// Restores an environment variable to its previous state on drop.
pub struct EnvVarGuard {
    key: &'static str,
    previous: Option<String>,
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        match &self.previous {
            Some(v) => std::env::set_var(self.key, v),
            None => std::env::remove_var(self.key),
        }
    }
}

/// Sets (or with `None`, removes) an environment variable until the guard
/// drops.
///
/// # Example
/// ```
/// let _lock = eventsync_test_utils::env_guard();
/// let _guard = eventsync_test_utils::set_env_var("EVENTSYNC_DOC_VAR", Some("1"));
/// assert_eq!(std::env::var("EVENTSYNC_DOC_VAR").unwrap(), "1");
/// ```
pub fn set_env_var(key: &'static str, value: Option<&str>) -> EnvVarGuard {
    let previous = std::env::var(key).ok();
    match value {
        Some(val) => std::env::set_var(key, val),
        None => std::env::remove_var(key),
    }
    EnvVarGuard { key, previous }
}

/// Clears every variable in `keys` for the guard's lifetime.
pub fn clear_env_vars(keys: &[&'static str]) -> Vec<EnvVarGuard> {
    keys.iter().map(|key| set_env_var(key, None)).collect()
}

/// Writes a config file into `dir` and returns its path.
pub fn write_config(dir: &Path, name: &str, contents: &str) -> std::io::Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, contents)?;
    Ok(path)
}

/// Legacy room record.
pub fn room(id: u64, name: &str) -> Value {
    json!({ "Id": id, "RoomName": name, "Capacity": "120" })
}

/// Legacy session record, times as `YYYY-MM-DD HH:MM:SS`.
pub fn session(id: &str, title: &str, start: &str, end: &str) -> Value {
    json!({
        "SessionId": id,
        "Title": title,
        "StartTime": start,
        "EndTime": end,
        "Abstract": format!("About {title}"),
    })
}

/// Legacy sub-session record.
pub fn sub_session(id: &str, title: &str) -> Value {
    json!({ "sub_session_id": id, "title": title, "description": null })
}

/// Legacy user record.
pub fn user(id: &str, email: &str, first: &str, last: &str) -> Value {
    json!({
        "user_id": id,
        "Email": email,
        "first_name": first,
        "last_name": last,
        "company": "Acme",
    })
}

/// Legacy user record flagged as a room moderator.
pub fn moderator(id: &str, email: &str, first: &str, last: &str, role: &str) -> Value {
    let mut value = user(id, email, first, last);
    if let Some(obj) = value.as_object_mut() {
        obj.insert("isModerator".into(), json!(true));
        obj.insert("role".into(), json!(role));
    }
    value
}

/// Legacy file record pointing at downloadable content.
pub fn file(id: &str, name: &str, storage_key: &str) -> Value {
    json!({
        "FileId": id,
        "fileName": name,
        "storageKey": storage_key,
        "contentType": "application/pdf",
    })
}

/// Three sub-sessions for `session_id`, named "Part 1".."Part 3".
pub fn three_parts(session_id: &str) -> Vec<Value> {
    (1..=3)
        .map(|n| sub_session(&format!("{session_id}-{n}"), &format!("Part {n}")))
        .collect()
}
