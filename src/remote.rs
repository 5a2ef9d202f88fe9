use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use serde::Deserialize;
use url::Url;

use crate::config::TlsKeys;

/// Name of the remote pointing at the configured ostree server.
pub const PRIMARY_REMOTE_NAME: &str = "treehub";

/// Presigned object-store origins handed out by the gateway all register
/// under this name.
pub const GCS_REMOTE_NAME: &str = "gcs";

pub const CORRELATION_HEADER: &str = "X-Correlation-ID";

/// One fetch origin: base URL, per-request headers and optional client-cert
/// material for the tree tool. `is_remote_set` tracks whether the tree tool
/// has this origin registered yet.
#[derive(Debug, Clone)]
pub struct Remote {
    pub name: String,
    pub base_url: String,
    pub headers: HashMap<String, String>,
    pub keys: Option<TlsKeys>,
    pub is_remote_set: bool,
}

impl Remote {
    fn primary(base_url: &str, target_name: &str, keys: Option<TlsKeys>) -> Self {
        Self {
            name: PRIMARY_REMOTE_NAME.to_string(),
            base_url: base_url.to_string(),
            headers: HashMap::from([(CORRELATION_HEADER.to_string(), target_name.to_string())]),
            keys,
            is_remote_set: false,
        }
    }

    fn gcs(entry: DownloadUrlEntry, target_name: &str) -> Self {
        Self {
            name: GCS_REMOTE_NAME.to_string(),
            base_url: entry.download_url,
            headers: HashMap::from([
                (CORRELATION_HEADER.to_string(), target_name.to_string()),
                ("Authorization".to_string(), format!("Bearer {}", entry.access_token)),
            ]),
            keys: None,
            is_remote_set: false,
        }
    }
}

#[derive(Deserialize, Debug)]
struct DownloadUrlEntry {
    download_url: String,
    access_token: String,
}

/// Ordered fetch origins for one target, highest precedence first: the
/// gateway's presigned URLs in the order it returned them, then the
/// configured server. A gateway failure leaves just the configured server.
pub fn get_remotes(http: &reqwest::blocking::Client, ostree_server: &str, target_name: &str, keys: Option<TlsKeys>) -> Vec<Remote> {
    let primary = Remote::primary(ostree_server, target_name, keys);

    if !ostree_server.starts_with("http") {
        return vec![primary];
    }

    match fetch_download_urls(http, ostree_server) {
        Ok(entries) => assemble_remotes(entries, target_name, primary),
        Err(err) => {
            warn!("no additional download URLs from the gateway: {err:#}");
            vec![primary]
        }
    }
}

fn fetch_download_urls(http: &reqwest::blocking::Client, ostree_server: &str) -> Result<Vec<DownloadUrlEntry>> {
    let url = Url::parse(&format!("{}/download-urls", ostree_server.trim_end_matches('/'))).context("bad gateway URL")?;

    #[rustfmt::skip]
    let resp = http.post(url.clone())
        .send()
        .context(format!("POST {url} failed"))?;

    if !resp.status().is_success() {
        bail!("POST {} returned status code {}", url, resp.status());
    }

    let body = resp.bytes().context("failed to read download-urls body")?;
    let entries: Vec<DownloadUrlEntry> = serde_json::from_slice(&body).context("failed to parse download-urls body")?;

    debug!("gateway returned {} presigned origin(s)", entries.len());
    Ok(entries)
}

fn assemble_remotes(entries: Vec<DownloadUrlEntry>, target_name: &str, primary: Remote) -> Vec<Remote> {
    let mut remotes: Vec<Remote> = entries.into_iter().map(|e| Remote::gcs(e, target_name)).collect();
    remotes.push(primary);
    remotes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(url: &str, token: &str) -> DownloadUrlEntry {
        DownloadUrlEntry {
            download_url: url.to_string(),
            access_token: token.to_string(),
        }
    }

    #[test]
    fn gateway_origins_come_first_in_array_order() {
        let primary = Remote::primary("https://g/", "tgt", None);
        let remotes = assemble_remotes(vec![entry("https://a/", "t1"), entry("https://b/", "t2")], "tgt", primary);

        let order: Vec<(&str, &str)> = remotes.iter().map(|r| (r.name.as_str(), r.base_url.as_str())).collect();
        assert_eq!(order, vec![("gcs", "https://a/"), ("gcs", "https://b/"), ("treehub", "https://g/")]);

        assert_eq!(remotes[0].headers[CORRELATION_HEADER], "tgt");
        assert_eq!(remotes[0].headers["Authorization"], "Bearer t1");
        assert_eq!(remotes[1].headers["Authorization"], "Bearer t2");
        assert!(!remotes[2].headers.contains_key("Authorization"));
    }

    #[test]
    fn primary_alone_when_gateway_gives_nothing() {
        let primary = Remote::primary("https://g/", "tgt", None);
        let remotes = assemble_remotes(Vec::new(), "tgt", primary);

        assert_eq!(remotes.len(), 1);
        assert_eq!(remotes[0].name, PRIMARY_REMOTE_NAME);
    }

    #[test]
    fn parses_gateway_body() {
        let body = r#"[{"download_url": "https://a/", "access_token": "t1"}]"#;
        let entries: Vec<DownloadUrlEntry> = serde_json::from_str(body).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].download_url, "https://a/");
    }
}
