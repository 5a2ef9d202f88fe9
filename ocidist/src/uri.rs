use std::fmt;
use std::str;

use crate::{Error, Sha256Sum};

/// A pinned app reference: `<registry host>/<factory>/<app>@sha256:<64 hex>`.
///
/// The host is everything left of the factory segment, so registries living
/// under a path prefix parse the same way as bare hostnames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    host: String,
    factory: String,
    app: String,
    digest: Sha256Sum,
}

impl Uri {
    pub fn parse(uri: &str) -> Result<Self, Error> {
        let (name, digest) = uri.rsplit_once('@').ok_or_else(|| Error::MissingDigest(uri.to_string()))?;

        #[rustfmt::skip]
        let hash_hex = digest.strip_prefix("sha256:")
            .ok_or_else(|| Error::UnsupportedDigest(digest.to_string()))?;

        let digest = Sha256Sum::from_hex(hash_hex).map_err(|_| Error::InvalidDigest(hash_hex.to_string()))?;

        let (prefix, app) = name.rsplit_once('/').ok_or_else(|| Error::MissingRepoPath(name.to_string()))?;
        let (host, factory) = prefix.rsplit_once('/').ok_or_else(|| Error::MissingRepoPath(name.to_string()))?;

        if host.is_empty() || factory.is_empty() || app.is_empty() {
            return Err(Error::MissingRepoPath(name.to_string()));
        }

        Ok(Self {
            host: host.to_string(),
            factory: factory.to_string(),
            app: app.to_string(),
            digest,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn factory(&self) -> &str {
        &self.factory
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn repo(&self) -> String {
        format!("{}/{}", self.factory, self.app)
    }

    pub fn digest(&self) -> &Sha256Sum {
        &self.digest
    }

    /// Same repository, different pinned digest. Used to address the blobs a
    /// manifest refers to.
    pub fn with_digest(&self, digest: Sha256Sum) -> Self {
        Self {
            digest,
            ..self.clone()
        }
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}@sha256:{}", self.host, self.factory, self.app, self.digest)
    }
}

impl str::FromStr for Uri {
    type Err = Error;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        Self::parse(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pinned_app() {
        let hash = "a".repeat(64);
        let uri = Uri::parse(&format!("hub.foundries.io/myfactory/nginx@sha256:{hash}")).unwrap();

        assert_eq!(uri.host(), "hub.foundries.io");
        assert_eq!(uri.factory(), "myfactory");
        assert_eq!(uri.app(), "nginx");
        assert_eq!(uri.repo(), "myfactory/nginx");
        assert_eq!(uri.digest().to_string(), hash);
    }

    #[test]
    fn display_round_trips() {
        let raw = format!("hub.foundries.io/myfactory/nginx@sha256:{}", "5".repeat(64));
        assert_eq!(Uri::parse(&raw).unwrap().to_string(), raw);
    }

    #[test]
    fn rejects_missing_repo_path() {
        let err = Uri::parse(&format!("nginx@sha256:{}", "a".repeat(64))).unwrap_err();
        assert!(matches!(err, Error::MissingRepoPath(_)));

        let err = Uri::parse(&format!("hub/nginx@sha256:{}", "a".repeat(64))).unwrap_err();
        assert!(matches!(err, Error::MissingRepoPath(_)));
    }

    #[test]
    fn rejects_unsupported_digest_type() {
        assert!(matches!(Uri::parse("x/y@xyz:abc"), Err(Error::UnsupportedDigest(_))));
        assert!(matches!(Uri::parse("x/y/z"), Err(Error::MissingDigest(_))));
    }

    #[test]
    fn rejects_short_hash() {
        let err = Uri::parse(&format!("hub/f/app@sha256:{}", "a".repeat(63))).unwrap_err();
        assert!(matches!(err, Error::InvalidDigest(_)));
    }

    #[test]
    fn with_digest_keeps_repo() {
        let uri = Uri::parse(&format!("hub/f/app@sha256:{}", "a".repeat(64))).unwrap();
        let blob = uri.with_digest(Sha256Sum::from_hex(&"b".repeat(64)).unwrap());
        assert_eq!(blob.repo(), "f/app");
        assert_eq!(blob.digest().to_string(), "b".repeat(64));
    }
}
