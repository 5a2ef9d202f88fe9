use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use log::{debug, info};
use sha2::{Digest, Sha256};
use url::Url;

use crate::{Credentials, Error, Sha256Sum, Uri};

/// Hard cap on manifest bodies; reads stop at the limit.
pub const MANIFEST_MAX_SIZE: usize = 16 * 1024 * 1024;

pub const OCI_MANIFEST_FORMAT: &str = "application/vnd.oci.image.manifest.v1+json";

const COPY_CHUNK: usize = 64 * 1024;

pub struct Client {
    http: reqwest::blocking::Client,
    creds: Credentials,
}

impl Client {
    pub fn new(http: reqwest::blocking::Client, creds: Credentials) -> Self {
        Self {
            http,
            creds,
        }
    }

    /// One pull-scoped token per repository. The contract does not cache
    /// tokens; callers wanting fewer round-trips hold on to the result and
    /// retry on 401.
    pub fn token_for(&self, uri: &Uri) -> Result<String, Error> {
        self.creds.bearer_header(&self.http, uri)
    }

    pub fn get_manifest(&self, uri: &Uri, token: &str, accept: &str) -> Result<serde_json::Value, Error> {
        let url = Url::parse(&format!("https://{}/v2/{}/manifests/sha256:{}", uri.host(), uri.repo(), uri.digest()))?;
        debug!("fetching manifest {url}");

        #[rustfmt::skip]
        let resp = self.http.get(url.clone())
            .header("authorization", token)
            .header("accept", accept)
            .send()
            .map_err(|err| Error::SendRequest(url.to_string(), err))?;

        if !resp.status().is_success() {
            return Err(Error::RequestFailed(url.to_string(), resp.status()));
        }

        let body = read_capped(resp, MANIFEST_MAX_SIZE)?;

        let actual = Sha256Sum::of(&body);
        if actual != *uri.digest() {
            return Err(Error::DigestMismatch {
                expected: uri.digest().to_string(),
                actual: actual.to_string(),
            });
        }

        Ok(serde_json::from_slice(&body)?)
    }

    /// Stream a blob to `path`, hashing as it is written. On any failure the
    /// partial file is removed; on success the file holds exactly
    /// `expected_size` bytes matching the URI digest.
    pub fn download_blob(&self, uri: &Uri, token: &str, path: &Path, expected_size: u64) -> Result<(), Error> {
        let url = Url::parse(&format!("https://{}/v2/{}/blobs/sha256:{}", uri.host(), uri.repo(), uri.digest()))?;
        info!("downloading blob {url} to {}", path.display());

        #[rustfmt::skip]
        let resp = self.http.get(url.clone())
            .header("authorization", token)
            .send()
            .map_err(|err| Error::SendRequest(url.to_string(), err))?;

        if !resp.status().is_success() {
            return Err(Error::RequestFailed(url.to_string(), resp.status()));
        }

        copy_verified(resp, path, expected_size, uri.digest())
    }
}

fn read_capped(src: impl Read, limit: usize) -> Result<Vec<u8>, Error> {
    let mut body = Vec::new();

    let mut capped = src.take(limit as u64 + 1);
    capped.read_to_end(&mut body).map_err(Error::ReadBody)?;

    if body.len() > limit {
        return Err(Error::ManifestTooLarge {
            limit,
        });
    }

    Ok(body)
}

// Separate from the HTTP layer so the size/hash failure modes are testable
// without a registry on the other end.
fn copy_verified(mut src: impl Read, path: &Path, expected_size: u64, expected: &Sha256Sum) -> Result<(), Error> {
    let result = (|| {
        let mut file = File::create(path).map_err(Error::CreateFile)?;
        let mut hasher = Sha256::new();
        let mut written: u64 = 0;
        let mut buf = vec![0u8; COPY_CHUNK];

        loop {
            let n = src.read(&mut buf).map_err(Error::ReadBody)?;
            if n == 0 {
                break;
            }

            written += n as u64;
            // more bytes than the manifest promised, stop mid-stream
            if written > expected_size {
                return Err(Error::SizeExceeded {
                    expected: expected_size,
                });
            }

            hasher.update(&buf[..n]);
            file.write_all(&buf[..n]).map_err(Error::WriteFile)?;
        }

        if written != expected_size {
            return Err(Error::SizeMismatch {
                expected: expected_size,
                actual: written,
            });
        }

        let actual = Sha256Sum::from_bytes(hasher.finalize().into());
        if actual != *expected {
            return Err(Error::DigestMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }

        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(path);
    }

    result
}
