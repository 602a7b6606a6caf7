use std::path::PathBuf;
use std::str::FromStr;

use crate::engine::AdmissionPolicy;

/// Server settings, read once from `WAITROOM_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    /// Rooms seeded into an empty store, ids counting up from 0.
    pub rooms: Vec<String>,
    pub admission: AdmissionPolicy,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "waitroom".into(),
            max_connections: 256,
            compact_threshold: 1000,
            rooms: vec!["Front".into(), "Back".into()],
            admission: AdmissionPolicy::Advisory,
            tls_cert: None,
            tls_key: None,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let defaults = Self::default();
        let rooms = match get("WAITROOM_ROOMS") {
            Some(list) => parse_rooms(&list)?,
            None => defaults.rooms,
        };
        Ok(Self {
            bind: get("WAITROOM_BIND").unwrap_or(defaults.bind),
            port: parsed(&get, "WAITROOM_PORT")?.unwrap_or(defaults.port),
            data_dir: get("WAITROOM_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            password: get("WAITROOM_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(&get, "WAITROOM_MAX_CONNECTIONS")?
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&get, "WAITROOM_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            rooms,
            admission: parsed(&get, "WAITROOM_ADMISSION")?.unwrap_or(defaults.admission),
            tls_cert: get("WAITROOM_TLS_CERT"),
            tls_key: get("WAITROOM_TLS_KEY"),
            metrics_port: parsed(&get, "WAITROOM_METRICS_PORT")?,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("rooms.wal")
    }
}

fn parsed<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get(key)
        .map(|raw| raw.trim().parse().map_err(|e| format!("{key}={raw}: {e}")))
        .transpose()
}

fn parse_rooms(list: &str) -> Result<Vec<String>, String> {
    let rooms: Vec<String> = list
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if rooms.is_empty() {
        return Err("WAITROOM_ROOMS names no rooms".into());
    }
    Ok(rooms)
}
