use std::{collections::HashMap, fs, path::PathBuf};

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_base_url: String,
    pub ws_url: Option<String>,
    pub session_file: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8080".into(),
            ws_url: None,
            session_file: PathBuf::from("./desk-session.json"),
        }
    }
}

impl Settings {
    /// Realtime endpoint, derived from the API host unless overridden.
    pub fn realtime_url(&self) -> String {
        if let Some(ws_url) = &self.ws_url {
            return ws_url.clone();
        }
        let base = self
            .api_base_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{}/ws", base.trim_end_matches('/'))
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("desk.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("api_base_url") {
                settings.api_base_url = v.clone();
            }
            if let Some(v) = file_cfg.get("ws_url") {
                settings.ws_url = Some(v.clone());
            }
            if let Some(v) = file_cfg.get("session_file") {
                settings.session_file = PathBuf::from(v);
            }
        }
    }

    if let Ok(v) = std::env::var("DESK__API_BASE_URL") {
        settings.api_base_url = v;
    }
    if let Ok(v) = std::env::var("DESK__WS_URL") {
        settings.ws_url = Some(v);
    }
    if let Ok(v) = std::env::var("DESK__SESSION_FILE") {
        settings.session_file = PathBuf::from(v);
    }

    settings
}
