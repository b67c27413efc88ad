use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Host used when none is configured.
pub const DEFAULT_HOST: &str = "knoema.com";

/// Per-call HTTP timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(600_000);

/// How requests are authenticated. The strategies are mutually exclusive.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Credentials {
    #[default]
    Anonymous,
    /// Access token sent as the `access_token` query parameter.
    Token(String),
    /// Client identifier sent as the `client_id` query parameter, without signing.
    ClientId(String),
    /// Client identifier and shared secret; every request carries a signed
    /// `Authorization` header.
    Signed {
        client_id: String,
        client_secret: String,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::Token(_) => f.write_str("Token(<redacted>)"),
            Self::ClientId(id) => f.debug_tuple("ClientId").field(id).finish(),
            Self::Signed { client_id, .. } => f
                .debug_struct("Signed")
                .field("client_id", client_id)
                .field("client_secret", &"<redacted>")
                .finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Platform host, e.g. `knoema.com`, or a full base such as `http://localhost:8080`.
    pub host: String,
    pub credentials: Credentials,
    /// Whether to verify TLS certificates.
    pub verify: bool,
    /// Overall timeout of a single HTTP call.
    pub timeout: Duration,
    /// Whether bulk transfers draw progress bars on stderr.
    pub progress: bool,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            credentials: Credentials::Anonymous,
            verify: true,
            timeout: DEFAULT_TIMEOUT,
            progress: true,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.credentials = Credentials::Token(token.into());
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.credentials = Credentials::ClientId(client_id.into());
        self
    }

    pub fn with_credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.credentials = Credentials::Signed {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        };
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST)
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
struct RawConfig {
    host: Option<String>,
    token: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    verify: Option<bool>,
    timeout_ms: Option<u64>,
}

impl RawConfig {
    fn or(self, other: RawConfig) -> RawConfig {
        RawConfig {
            host: self.host.or(other.host),
            token: self.token.or(other.token),
            client_id: self.client_id.or(other.client_id),
            client_secret: self.client_secret.or(other.client_secret),
            verify: self.verify.or(other.verify),
            timeout_ms: self.timeout_ms.or(other.timeout_ms),
        }
    }

    fn has_credentials(&self) -> bool {
        self.token.is_some() || self.client_id.is_some() || self.client_secret.is_some()
    }

    fn without_credentials(self) -> RawConfig {
        RawConfig {
            token: None,
            client_id: None,
            client_secret: None,
            ..self
        }
    }
}

/// Loads configuration from (in order of precedence) the given `host`,
/// environment variables and the first rc file found.
pub(crate) fn load_config(host: Option<String>) -> Result<ClientConfig> {
    let explicit = RawConfig {
        host,
        ..RawConfig::default()
    };
    let mut raw = explicit.or(raw_from_env(|name| std::env::var(name).ok())?);

    for rc_path in rc_candidates() {
        if rc_path.exists() {
            let mut from_file = read_rc(&rc_path)?;
            // Credentials are taken from a single source as a whole.
            if raw.has_credentials() {
                from_file = from_file.without_credentials();
            }
            raw = raw.or(from_file);
            break;
        }
    }

    resolve(raw)
}

fn raw_from_env(var: impl Fn(&str) -> Option<String>) -> Result<RawConfig> {
    Ok(RawConfig {
        host: var("KNOEMA_HOST"),
        token: var("KNOEMA_TOKEN"),
        client_id: var("KNOEMA_CLIENT_ID"),
        client_secret: var("KNOEMA_CLIENT_SECRET"),
        verify: var("KNOEMA_VERIFY").map(|v| parse_bool(&v)),
        timeout_ms: var("KNOEMA_TIMEOUT_MS")
            .map(|v| parse_timeout(&v, "KNOEMA_TIMEOUT_MS"))
            .transpose()?,
    })
}

fn resolve(raw: RawConfig) -> Result<ClientConfig> {
    let non_empty = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

    let host = non_empty(raw.host).unwrap_or_else(|| DEFAULT_HOST.to_string());
    let token = non_empty(raw.token);
    let client_id = non_empty(raw.client_id);
    let client_secret = non_empty(raw.client_secret);

    let credentials = match (token, client_id, client_secret) {
        (None, None, None) => Credentials::Anonymous,
        (Some(token), None, None) => Credentials::Token(token),
        (None, Some(id), None) => Credentials::ClientId(id),
        (None, Some(client_id), Some(client_secret)) => Credentials::Signed {
            client_id,
            client_secret,
        },
        (None, None, Some(_)) => {
            return Err(Error::Config(
                "client_secret is set but client_id is missing".to_string(),
            ));
        }
        (Some(_), _, _) => {
            return Err(Error::Config(
                "token and client_id/client_secret are mutually exclusive".to_string(),
            ));
        }
    };

    let mut cfg = ClientConfig::new(host);
    cfg.credentials = credentials;
    cfg.verify = raw.verify.unwrap_or(true);
    if let Some(ms) = raw.timeout_ms {
        cfg.timeout = Duration::from_millis(ms);
    }
    Ok(cfg)
}

fn read_rc(path: &Path) -> Result<RawConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "failed to read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_rc(&text)
}

fn parse_rc(text: &str) -> Result<RawConfig> {
    let mut cfg = RawConfig::default();

    // A key may have its value on the following line.
    let mut pending_key: Option<&str> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(pk) = pending_key.take() {
            if !line.contains(':') || !is_known_key(line.split(':').next().unwrap_or("")) {
                set_rc_value(&mut cfg, pk, strip_quotes(line))?;
                continue;
            }
        }

        if let Some((k, v)) = line.split_once(':') {
            let k = k.trim();
            let v = strip_quotes(v.trim());
            if !is_known_key(k) {
                continue;
            }
            if v.is_empty() {
                pending_key = Some(k);
            } else {
                set_rc_value(&mut cfg, k, v)?;
            }
        }
    }

    Ok(cfg)
}

fn is_known_key(k: &str) -> bool {
    matches!(
        k.trim(),
        "host" | "token" | "client_id" | "client_secret" | "verify" | "timeout"
    )
}

fn set_rc_value(cfg: &mut RawConfig, key: &str, value: &str) -> Result<()> {
    match key {
        "host" => cfg.host = Some(value.to_string()),
        "token" => cfg.token = Some(value.to_string()),
        "client_id" => cfg.client_id = Some(value.to_string()),
        "client_secret" => cfg.client_secret = Some(value.to_string()),
        "verify" => cfg.verify = Some(parse_bool(value)),
        "timeout" => cfg.timeout_ms = Some(parse_timeout(value, "timeout")?),
        _ => {}
    }
    Ok(())
}

fn parse_bool(v: &str) -> bool {
    !matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

fn parse_timeout(v: &str, name: &str) -> Result<u64> {
    v.trim().parse::<u64>().map_err(|_| {
        Error::Config(format!(
            "{} must be a whole number of milliseconds, got {:?}",
            name, v
        ))
    })
}

/// Drops one pair of matching surrounding quotes, if any.
fn strip_quotes(value: &str) -> &str {
    let value = value.trim();
    ['"', '\'']
        .into_iter()
        .find_map(|q| value.strip_prefix(q)?.strip_suffix(q))
        .unwrap_or(value)
}

/// rc files to try, most specific first. `KNOEMA_RC` replaces the search.
fn rc_candidates() -> Vec<PathBuf> {
    if let Some(explicit) = std::env::var_os("KNOEMA_RC") {
        return vec![PathBuf::from(explicit)];
    }
    let local = std::env::current_dir().ok();
    let home = dirs::home_dir();
    [local, home]
        .into_iter()
        .flatten()
        .map(|dir| dir.join(".knoemarc"))
        .collect()
}
