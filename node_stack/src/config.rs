use {
    serde::{Deserialize, Serialize},
    std::path::PathBuf,
};

pub const DEFAULT_HTTP_PORT: u16 = 5050;
pub const DEFAULT_WS_PORT: u16 = 5051;

/// Node configuration. Everything has a workable default; embedders
/// typically deserialize this from a config file and override a few
/// fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub name: String,
    pub node_id: String,
    pub version: String,
    #[serde(rename = "dataDir")]
    pub data_dir: PathBuf,
    pub http_host: String,
    pub http_port: u16,
    pub http_origins: Vec<String>,
    pub http_modules: Vec<String>,
    pub ws_host: String,
    pub ws_port: u16,
    pub ws_origins: Vec<String>,
    pub ws_modules: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "nodekit".into(),
            node_id: String::new(),
            version: env!("CARGO_PKG_VERSION").into(),
            data_dir: default_data_dir(),
            http_host: "localhost".into(),
            http_port: DEFAULT_HTTP_PORT,
            http_origins: Vec::new(),
            http_modules: Vec::new(),
            ws_host: "localhost".into(),
            ws_port: DEFAULT_WS_PORT,
            ws_origins: Vec::new(),
            ws_modules: Vec::new(),
        }
    }
}

impl Config {
    pub fn ws_endpoint(&self) -> String {
        format!("{}:{}", self.ws_host, self.ws_port)
    }

    pub fn http_endpoint(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

/// The default data directory, placed in the user's home directory.
pub fn default_data_dir() -> PathBuf {
    match home_dir() {
        Some(home) => {
            if cfg!(target_os = "macos") {
                home.join("Library").join("nodekit")
            } else if cfg!(target_os = "windows") {
                home.join("AppData").join("Roaming").join("nodekit")
            } else {
                home.join(".nodekit")
            }
        }
        None => PathBuf::new(),
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}
