use ct_codecs::{Base64, Encoder};
use log::debug;
use serde::Deserialize;

use crate::{Error, Uri};

/// Fallback when the treehub URL gives us nothing to deduce from.
pub const DEFAULT_HUB_CREDS_URL: &str = "https://ota-lite.foundries.io:8443/hub-creds/";

/// The basic-auth endpoint lives next to treehub: everything from the
/// `treehub` path component onward is replaced with `hub-creds/`.
pub fn hub_creds_url(treehub_url: &str) -> String {
    match treehub_url.find("treehub") {
        Some(at) => format!("{}hub-creds/", &treehub_url[..at]),
        None => DEFAULT_HUB_CREDS_URL.to_string(),
    }
}

#[derive(Deserialize)]
struct HubCreds {
    #[serde(rename = "Username")]
    username: String,
    #[serde(rename = "Secret")]
    secret: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: String,
}

/// Two-leg registry auth: basic material from the hub-creds gateway
/// endpoint, then a pull-scoped bearer token from the registry itself.
#[derive(Clone)]
pub struct Credentials {
    hub_creds_url: String,
}

impl Credentials {
    pub fn for_treehub(treehub_url: &str) -> Self {
        Self {
            hub_creds_url: hub_creds_url(treehub_url),
        }
    }

    pub fn basic_header(&self, http: &reqwest::blocking::Client) -> Result<String, Error> {
        #[rustfmt::skip]
        let resp = http.get(&self.hub_creds_url)
            .send()
            .map_err(|err| Error::SendRequest(self.hub_creds_url.clone(), err))?;

        if !resp.status().is_success() {
            return Err(Error::RequestFailed(self.hub_creds_url.clone(), resp.status()));
        }

        let creds: HubCreds = serde_json::from_slice(&resp.bytes().map_err(|err| Error::SendRequest(self.hub_creds_url.clone(), err))?)?;

        if creds.username.is_empty() {
            return Err(Error::EmptyCredentials("Username".to_string()));
        }
        if creds.secret.is_empty() {
            return Err(Error::EmptyCredentials("Secret".to_string()));
        }

        let pair = format!("{}:{}", creds.username, creds.secret);
        let encoded = Base64::encode_to_string(pair.as_bytes()).map_err(Error::Encode)?;

        Ok(format!("basic {encoded}"))
    }

    pub fn bearer_header(&self, http: &reqwest::blocking::Client, uri: &Uri) -> Result<String, Error> {
        let basic = self.basic_header(http)?;

        #[rustfmt::skip]
        let token_url = format!(
            "https://{}/token-auth/?service=registry&scope=repository:{}:pull",
            uri.host(), uri.repo()
        );
        debug!("fetching registry token from {token_url}");

        #[rustfmt::skip]
        let resp = http.get(&token_url)
            .header("authorization", &basic)
            .send()
            .map_err(|err| Error::SendRequest(token_url.clone(), err))?;

        if !resp.status().is_success() {
            return Err(Error::RequestFailed(token_url, resp.status()));
        }

        let body = resp.bytes().map_err(|err| Error::SendRequest(token_url, err))?;
        let token: TokenResponse = serde_json::from_slice(&body)?;

        if token.token.is_empty() {
            return Err(Error::EmptyToken);
        }

        Ok(format!("bearer {}", token.token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deduces_hub_creds_from_treehub_url() {
        assert_eq!(hub_creds_url("https://api.example.io:8443/treehub/"), "https://api.example.io:8443/hub-creds/");
        assert_eq!(hub_creds_url("https://api.example.io/treehub/api/v3/"), "https://api.example.io/hub-creds/");
    }

    #[test]
    fn falls_back_to_default() {
        assert_eq!(hub_creds_url("https://ostree.example.io/repo/"), DEFAULT_HUB_CREDS_URL);
    }

    #[test]
    fn creds_must_be_complete() {
        let creds: Result<HubCreds, _> = serde_json::from_str(r#"{"Username": "u"}"#);
        assert!(creds.is_err());
    }
}
