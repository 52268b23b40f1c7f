// turing-core/src/commands/init.rs

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct InitReport {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub created_root: bool,
    pub created_config: bool,
}

static INIT: OnceCell<InitReport> = OnceCell::new();

/// Idempotent process-wide initializer for the root named by `TURING_ROOT`.
pub fn ensure_initialized_once() -> Result<&'static InitReport> {
    INIT.get_or_try_init(ensure_initialized)
}

/// Data root. `TURING_ROOT` overrides the default `.turing`.
pub fn turing_root() -> PathBuf {
    std::env::var_os("TURING_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".turing"))
}

pub fn ensure_initialized() -> Result<InitReport> {
    ensure_initialized_at(&turing_root())
}

/// Create `root` and a default `config.toml` if missing. An existing config
/// is never touched.
pub fn ensure_initialized_at(root: &Path) -> Result<InitReport> {
    let created_root = !root.is_dir();
    fs::create_dir_all(root).with_context(|| format!("creating data root {}", root.display()))?;

    let config_path = root.join("config.toml");
    let created_config = write_if_absent(&config_path, DEFAULT_CONFIG_TOML)?;

    Ok(InitReport {
        root: root.to_path_buf(),
        config_path,
        created_root,
        created_config,
    })
}

/// Returns whether the file was written. The existence check and the
/// create are one `create_new` open.
fn write_if_absent(path: &Path, content: &str) -> Result<bool> {
    let mut f = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e).with_context(|| format!("creating {}", path.display())),
    };
    f.write_all(content.as_bytes())
        .and_then(|()| f.sync_all())
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(true)
}

const DEFAULT_CONFIG_TOML: &str = r#"[system]
name = "turing"

[storage]
db_path = "turing.db"          # relative to the data root
write_retries = 3
retry_backoff_ms = 250

[pipeline]
queue_delay_ms = 4000          # hold before the dispatcher sees an event
commit_delay_secs = 30         # grace window for late bans/deletions

[generation]
chain_order = 2
max_attempts = 1000

[moderation]
always_ignored = ["100135110", "19264788", "786049415", "95174992", "854854747"]
blocked_words = []
# timeout_lookback_secs = 60  # default: a timeout hides all earlier history
"#;
