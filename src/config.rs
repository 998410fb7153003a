use crate::{backend::supabase::SupabaseConfig, services::countdown::Ceremony};
use anyhow::{Context, Result, bail};
use chrono::{DateTime, TimeDelta};
use clap::Parser;
use serde::Serialize;
use std::{env, fmt, str::FromStr, time::Duration};

const DEFAULT_CEREMONY_AT: &str = "2025-12-20T16:20:00+09:00";

/// Which backend implementation serves storage and tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Supabase,
    Local,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "supabase" => Ok(Self::Supabase),
            "local" => Ok(Self::Local),
            other => bail!("unknown backend `{}` (expected `supabase` or `local`)", other),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: BackendKind,
    pub supabase: Option<SupabaseConfig>,
    pub gallery_bucket: String,
    pub gallery_folder: String,
    pub storage_dir: String,
    pub database_url: String,
    pub public_base_url: String,
    pub change_poll_interval: Duration,
    pub reencode_uploads: bool,
    pub admin_token: Option<String>,
    pub kakao_js_key: Option<String>,
    pub naver_map_client_id: Option<String>,
    pub ceremony: Ceremony,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Wedding invitation backend")]
pub struct Args {
    /// Host to bind to (overrides WEDDING_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides WEDDING_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// `supabase` or `local` (overrides WEDDING_BACKEND)
    #[arg(long)]
    pub backend: Option<String>,

    /// Directory where local objects are stored (overrides WEDDING_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Local database URL (overrides WEDDING_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Run local migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// What the page may know about the configuration.
#[derive(Serialize, Debug)]
pub struct PublicConfig {
    pub kakao_js_key: Option<String>,
    pub naver_map_client_id: Option<String>,
    pub features: Features,
    pub google_calendar_link: String,
}

#[derive(Serialize, Debug)]
pub struct Features {
    pub kakao_share: bool,
    pub naver_map: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let cfg = Self::from_sources(&args, |key| env::var(key).ok())?;
        Ok((cfg, args.migrate))
    }

    /// Merge CLI arguments over values from `lookup` (CLI wins).
    pub fn from_sources(args: &Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let host = args.host.clone().unwrap_or_else(|| or("WEDDING_HOST", "0.0.0.0"));
        let port = match args.port {
            Some(port) => port,
            None => parse_var(&var, "WEDDING_PORT", 3000)?,
        };
        let backend = match args.backend.clone().or_else(|| var("WEDDING_BACKEND")) {
            Some(value) => value.parse().context("parsing WEDDING_BACKEND")?,
            None => BackendKind::Supabase,
        };

        let supabase = match backend {
            BackendKind::Supabase => {
                let url = var("SUPABASE_URL")
                    .context("SUPABASE_URL must be set when using the supabase backend")?;
                let anon_key = var("SUPABASE_ANON_KEY")
                    .context("SUPABASE_ANON_KEY must be set when using the supabase backend")?;
                Some(SupabaseConfig::new(url, anon_key))
            }
            BackendKind::Local => None,
        };

        let public_base_url = match (&supabase, var("WEDDING_PUBLIC_BASE_URL")) {
            (_, Some(url)) => url,
            (Some(supabase), None) => supabase.url.clone(),
            (None, None) => format!("http://localhost:{}", port),
        };

        let poll_secs: u64 = parse_var(&var, "WEDDING_CHANGE_POLL_SECS", 5)?;
        if poll_secs == 0 {
            bail!("WEDDING_CHANGE_POLL_SECS must be at least 1");
        }

        let cfg = Self {
            host,
            port,
            backend,
            supabase,
            gallery_bucket: or("WEDDING_GALLERY_BUCKET", "wedding-gallery"),
            gallery_folder: or("WEDDING_GALLERY_FOLDER", ""),
            storage_dir: args
                .storage_dir
                .clone()
                .unwrap_or_else(|| or("WEDDING_STORAGE_DIR", "./data/objects")),
            database_url: args
                .database_url
                .clone()
                .unwrap_or_else(|| or("WEDDING_DATABASE_URL", "sqlite://./data/meta/wedding.db")),
            public_base_url,
            change_poll_interval: Duration::from_secs(poll_secs),
            reencode_uploads: parse_var(&var, "WEDDING_REENCODE_UPLOADS", true)?,
            admin_token: var("WEDDING_ADMIN_TOKEN"),
            kakao_js_key: var("KAKAO_JS_KEY"),
            naver_map_client_id: var("NAVER_MAP_CLIENT_ID"),
            ceremony: ceremony_from(&var)?,
        };

        if cfg.kakao_js_key.is_none() {
            tracing::warn!("KAKAO_JS_KEY not set, share button disabled");
        }
        if cfg.naver_map_client_id.is_none() {
            tracing::warn!("NAVER_MAP_CLIENT_ID not set, map embed disabled");
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn public_view(&self) -> PublicConfig {
        PublicConfig {
            kakao_js_key: self.kakao_js_key.clone(),
            naver_map_client_id: self.naver_map_client_id.clone(),
            features: Features {
                kakao_share: self.kakao_js_key.is_some(),
                naver_map: self.naver_map_client_id.is_some(),
            },
            google_calendar_link: self.ceremony.google_calendar_link(),
        }
    }
}

// Keys stay out of the startup log.
impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("backend", &self.backend)
            .field("supabase_url", &self.supabase.as_ref().map(|s| &s.url))
            .field("gallery_bucket", &self.gallery_bucket)
            .field("gallery_folder", &self.gallery_folder)
            .field("storage_dir", &self.storage_dir)
            .field("database_url", &self.database_url)
            .field("public_base_url", &self.public_base_url)
            .field("change_poll_interval", &self.change_poll_interval)
            .field("reencode_uploads", &self.reencode_uploads)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<set>"))
            .field("kakao_js_key", &self.kakao_js_key.is_some())
            .field("naver_map_client_id", &self.naver_map_client_id.is_some())
            .field("ceremony_at", &self.ceremony.starts_at)
            .finish()
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        None => Ok(default),
    }
}

fn ceremony_from(var: &impl Fn(&str) -> Option<String>) -> Result<Ceremony> {
    let at = var("WEDDING_CEREMONY_AT").unwrap_or_else(|| DEFAULT_CEREMONY_AT.to_string());
    let starts_at = DateTime::parse_from_rfc3339(at.trim())
        .with_context(|| format!("parsing WEDDING_CEREMONY_AT value `{}` as RFC 3339", at))?;
    let minutes: i64 = parse_var(var, "WEDDING_CEREMONY_MINUTES", 120)?;

    Ok(Ceremony {
        groom: var("WEDDING_GROOM").unwrap_or_else(|| "Groom".into()),
        bride: var("WEDDING_BRIDE").unwrap_or_else(|| "Bride".into()),
        starts_at,
        duration: TimeDelta::minutes(minutes),
        venue: var("WEDDING_VENUE").unwrap_or_else(|| "Wedding Hall".into()),
        hall: var("WEDDING_HALL"),
        address: var("WEDDING_ADDRESS").unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(args: &Args, pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_sources(args, |key| env.get(key).cloned())
    }

    const SUPABASE: &[(&str, &str)] = &[
        ("SUPABASE_URL", "https://abc.supabase.co/"),
        ("SUPABASE_ANON_KEY", "anon"),
    ];

    #[test]
    fn supabase_backend_requires_url_and_key() {
        let err = load(&Args::default(), &[("SUPABASE_ANON_KEY", "anon")])
            .err()
            .unwrap();
        assert!(err.to_string().contains("SUPABASE_URL"));

        let err = load(&Args::default(), &[("SUPABASE_URL", "https://x.co")])
            .err()
            .unwrap();
        assert!(err.to_string().contains("SUPABASE_ANON_KEY"));
    }

    #[test]
    fn defaults_with_supabase() {
        let cfg = load(&Args::default(), SUPABASE).unwrap();
        assert_eq!(cfg.backend, BackendKind::Supabase);
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.gallery_bucket, "wedding-gallery");
        assert_eq!(cfg.public_base_url, "https://abc.supabase.co");
        assert_eq!(cfg.change_poll_interval, Duration::from_secs(5));
        assert!(cfg.reencode_uploads);
        assert!(cfg.admin_token.is_none());
    }

    #[test]
    fn local_backend_needs_no_supabase_keys() {
        let cfg = load(&Args::default(), &[("WEDDING_BACKEND", "local"), ("WEDDING_PORT", "8080")]).unwrap();
        assert_eq!(cfg.backend, BackendKind::Local);
        assert!(cfg.supabase.is_none());
        assert_eq!(cfg.public_base_url, "http://localhost:8080");
    }

    #[test]
    fn cli_overrides_environment() {
        let args = Args {
            host: Some("127.0.0.1".into()),
            port: Some(9000),
            backend: Some("local".into()),
            ..Args::default()
        };
        let cfg = load(&args, &[("WEDDING_HOST", "10.0.0.1"), ("WEDDING_PORT", "1")]).unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:9000");
        assert_eq!(cfg.backend, BackendKind::Local);
    }

    #[test]
    fn missing_sdk_keys_only_disable_features() {
        let cfg = load(&Args::default(), SUPABASE).unwrap();
        let view = cfg.public_view();
        assert!(!view.features.kakao_share);
        assert!(!view.features.naver_map);

        let mut pairs = SUPABASE.to_vec();
        pairs.push(("KAKAO_JS_KEY", "k"));
        let view = load(&Args::default(), &pairs).unwrap().public_view();
        assert!(view.features.kakao_share);
        assert_eq!(view.kakao_js_key.as_deref(), Some("k"));
    }

    #[test]
    fn invalid_values_are_reported() {
        let mut pairs = SUPABASE.to_vec();
        pairs.push(("WEDDING_PORT", "http"));
        assert!(load(&Args::default(), &pairs).is_err());

        let mut pairs = SUPABASE.to_vec();
        pairs.push(("WEDDING_CEREMONY_AT", "next saturday"));
        assert!(load(&Args::default(), &pairs).is_err());

        let mut pairs = SUPABASE.to_vec();
        pairs.push(("WEDDING_CHANGE_POLL_SECS", "0"));
        assert!(load(&Args::default(), &pairs).is_err());
    }

    #[test]
    fn ceremony_details_come_from_environment() {
        let mut pairs = SUPABASE.to_vec();
        pairs.extend([
            ("WEDDING_CEREMONY_AT", "2026-05-02T12:00:00+09:00"),
            ("WEDDING_VENUE", "Garden"),
            ("WEDDING_HALL", "Hall B"),
            ("WEDDING_CEREMONY_MINUTES", "90"),
        ]);
        let cfg = load(&Args::default(), &pairs).unwrap();
        assert_eq!(cfg.ceremony.venue_label(), "Garden Hall B");
        assert_eq!(cfg.ceremony.duration, TimeDelta::minutes(90));
        assert_eq!(cfg.ceremony.starts_at.to_rfc3339(), "2026-05-02T12:00:00+09:00");
    }
}
