use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".browser-mcp"))
            .unwrap_or_else(|| PathBuf::from(".browser-mcp"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    /// Root for per-session browser user data directories.
    pub fn profiles_dir(&self) -> PathBuf {
        self.base.join("profiles")
    }

    pub fn profile_dir(&self, session_id: &str) -> PathBuf {
        let safe = session_id.replace([':', '/', '\\'], "_");
        self.profiles_dir().join(safe)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base.join("logs")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
