use std::path::PathBuf;

const DEFAULT_DB_PATH: &str = "data/uni_result.sqlite";
const DEFAULT_UNIVERSITY: &str = "Guru Gobind Singh Indraprastha University";
const DEFAULT_SESSION_START: u32 = 2020;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStoreKind {
    Local { root: PathBuf },
    Drive { parent_folder_id: String, token: String },
}

/// Process-wide settings, read once from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub university_name: String,
    /// Oldest admission year whose results are still parsed.
    pub session_start: u32,
    /// Local mirror where result CSVs are staged before upload.
    pub results_dir: PathBuf,
    pub log_dir: PathBuf,
    pub file_store: FileStoreKind,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let session_start = match std::env::var("SESSION_START") {
            Ok(v) => v
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("SESSION_START must be a year, got '{}'", v))?,
            Err(_) => DEFAULT_SESSION_START,
        };

        let file_store = match env_or("FILE_STORE", "local").as_str() {
            "local" => FileStoreKind::Local {
                root: PathBuf::from(env_or("LOCAL_STORE_ROOT", "data/remote")),
            },
            "drive" => FileStoreKind::Drive {
                parent_folder_id: std::env::var("GOOGLE_PARENT_FOLDER_ID").map_err(|_| {
                    anyhow::anyhow!("GOOGLE_PARENT_FOLDER_ID must be set for the drive store")
                })?,
                token: std::env::var("GOOGLE_DRIVE_TOKEN").map_err(|_| {
                    anyhow::anyhow!("GOOGLE_DRIVE_TOKEN must be set for the drive store")
                })?,
            },
            other => anyhow::bail!("unknown FILE_STORE '{}', expected 'local' or 'drive'", other),
        };

        Ok(Self {
            db_path: PathBuf::from(env_or("RESULT_DB_PATH", DEFAULT_DB_PATH)),
            university_name: env_or("UNIVERSITY_NAME", DEFAULT_UNIVERSITY),
            session_start,
            results_dir: PathBuf::from(env_or("LOCAL_RESULT_FOLDER_PATH", "data/results")),
            log_dir: PathBuf::from(env_or("LOG_FOLDER_PATH", "logs")),
            file_store,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            university_name: DEFAULT_UNIVERSITY.to_string(),
            session_start: DEFAULT_SESSION_START,
            results_dir: PathBuf::from("data/results"),
            log_dir: PathBuf::from("logs"),
            file_store: FileStoreKind::Local {
                root: PathBuf::from("data/remote"),
            },
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
