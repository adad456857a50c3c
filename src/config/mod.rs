use std::{
    collections::HashMap,
    env,
    fs,
    io::{BufRead, BufReader},
    path::PathBuf,
    time::Duration,
};

use directories::BaseDirs;

use crate::process::locator;

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
}

impl Config {
    pub fn load() -> Self {
        let config_path = default_config_path();
        let mut cfg = Self::from_map(default_map());

        // Read .robotrc if exists
        if config_path.exists() {
            if let Ok(file) = fs::File::open(&config_path) {
                let reader = BufReader::new(file);
                cfg.merge_lines(reader.lines().map_while(Result::ok));
            }
        }

        // Overlay environment variables (take precedence)
        for (k, v) in env::vars() {
            if is_config_key(&k) {
                cfg.inner.insert(k, v);
            }
        }

        cfg
    }

    fn from_map(inner: HashMap<String, String>) -> Self {
        Self { inner }
    }

    fn merge_lines<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            let line = line.as_ref().trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((k, v)) = line.split_once('=') {
                self.inner.insert(k.trim().to_string(), v.trim().to_string());
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        // ENV first
        if let Ok(v) = env::var(key) {
            return Some(v);
        }
        self.inner.get(key).cloned()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.trim().parse::<u64>().ok())
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).filter(|v| !v.trim().is_empty()).map(PathBuf::from)
    }

    pub fn log_filter(&self) -> String {
        self.get("ROBOT_LOG").unwrap_or_else(|| "info".to_string())
    }

    pub fn settings(&self) -> Settings {
        let candidates = match self.get("ROBOT_PYTHON_CANDIDATES") {
            Some(v) if !v.trim().eq_ignore_ascii_case("auto") => parse_candidates(&v),
            _ => Vec::new(),
        };
        let candidates = if candidates.is_empty() {
            locator::default_candidates()
        } else {
            candidates
        };

        Settings {
            candidates,
            temp_dir: self.get_path("ROBOT_TEMP_DIR").unwrap_or_else(env::temp_dir),
            probe_timeout: Duration::from_secs(self.get_u64("ROBOT_PROBE_TIMEOUT").unwrap_or(10)),
        }
    }
}

/// Typed runner configuration derived from [`Config`].
#[derive(Debug, Clone)]
pub struct Settings {
    /// Interpreter command names, probed in order.
    pub candidates: Vec<String>,
    /// Where script files are written; also the working directory of executions.
    pub temp_dir: PathBuf,
    pub probe_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            candidates: locator::default_candidates(),
            temp_dir: env::temp_dir(),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

fn parse_candidates(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_config_key(k: &str) -> bool {
    k.starts_with("ROBOT_")
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("robot_studio").join(".robotrc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();

    m.insert(
        "ROBOT_TEMP_DIR".into(),
        env::temp_dir().to_string_lossy().into_owned(),
    );
    m.insert("ROBOT_PYTHON_CANDIDATES".into(), "auto".into());
    m.insert("ROBOT_PROBE_TIMEOUT".into(), "10".into());
    m.insert("ROBOT_LOG".into(), "info".into());
    m.insert("ROBOT_SUBSCRIBE_ALL".into(), "false".into());

    m
}
