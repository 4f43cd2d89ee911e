use std::path::PathBuf;

const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub document_store_path: PathBuf,
    pub backup_dir: PathBuf,
    pub retention_days: u32,
    pub automated_backups: bool,
    pub auth: AuthConfig,
    pub frontend_url: String,
    pub log_level: String,
}

/// Azure AD identifiers used to validate bearer tokens.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub authority_host: String,
}

impl AuthConfig {
    /// Expected `iss` claim for v2.0 tokens of this tenant.
    pub fn issuer(&self) -> String {
        format!("{}/{}/v2.0", self.authority(), self.tenant_id)
    }

    pub fn jwks_uri(&self) -> String {
        format!("{}/{}/discovery/v2.0/keys", self.authority(), self.tenant_id)
    }

    fn authority(&self) -> &str {
        self.authority_host.trim_end_matches('/')
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("{key} must be configured"))
        };

        let auth = AuthConfig {
            tenant_id: required("AZURE_TENANT_ID")?,
            client_id: required("AZURE_CLIENT_ID")?,
            authority_host: lookup("AZURE_AUTHORITY_HOST")
                .unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.into()),
        };

        Ok(Self {
            port: lookup("PORT").and_then(|v| v.parse().ok()).unwrap_or(3001),
            document_store_path: PathBuf::from(
                lookup("DOCUMENT_STORE_PATH").unwrap_or_else(|| "./data/documents.db".into()),
            ),
            backup_dir: PathBuf::from(
                lookup("BACKUP_DIRECTORY").unwrap_or_else(|| "./backups".into()),
            ),
            retention_days: lookup("BACKUP_RETENTION_DAYS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            automated_backups: lookup("ENABLE_AUTOMATED_BACKUPS")
                .map(|v| v == "true")
                .unwrap_or(true),
            auth,
            frontend_url: lookup("FRONTEND_URL").unwrap_or_else(|| "http://localhost:3000".into()),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".into()),
        })
    }
}
