use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use reqwest::header::COOKIE;

use crate::error::{QuirrusError, Result};

/// How requests against the Cirrus API are authenticated.
#[derive(Clone)]
pub enum Credentials {
    /// `Authorization: Bearer <token>`
    Token(String),
    /// Raw `Cookie` header value, as captured from a browser session.
    Cookie(String),
}

impl Credentials {
    /// Picks the first available source: explicit token, explicit cookie,
    /// then the credentials file.
    pub fn resolve(
        token: Option<&str>,
        cookie: Option<&str>,
        credentials_file: &Path,
    ) -> Result<Self> {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            info!("Using token authentication");
            return Ok(Self::Token(token.trim().to_string()));
        }

        if let Some(cookie) = cookie.filter(|c| !c.trim().is_empty()) {
            info!("Using cookie authentication");
            return Ok(Self::Cookie(cookie.trim().to_string()));
        }

        if credentials_file.is_file() {
            info!(
                "Using credentials configured in '{}'",
                credentials_file.display()
            );
            return Ok(Self::Cookie(load_cookies(credentials_file)?));
        }

        Err(QuirrusError::MissingAuthentication(
            credentials_file.display().to_string(),
        ))
    }

    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::Token(token) => request.bearer_auth(token),
            Self::Cookie(cookie) => request.header(COOKIE, cookie),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Credentials::Token(***)"),
            Self::Cookie(_) => f.write_str("Credentials::Cookie(***)"),
        }
    }
}

pub fn load_cookies(credentials_file: &Path) -> Result<String> {
    Ok(fs::read_to_string(credentials_file)?.trim().to_string())
}

/// Writes the cookie header value, creating parent directories as needed.
pub fn store_cookies(credentials_file: &Path, cookies: &str) -> Result<PathBuf> {
    if let Some(parent) = credentials_file.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(credentials_file, cookies.trim())?;
    Ok(credentials_file.to_path_buf())
}
