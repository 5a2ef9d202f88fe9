use std::fmt;

#[derive(Debug)]
pub enum Error {
    MissingDigest(String),
    UnsupportedDigest(String),
    InvalidDigest(String),
    MissingRepoPath(String),
    ParseUrl(url::ParseError),
    Encode(ct_codecs::Error),
    SendRequest(String, reqwest::Error),
    RequestFailed(String, reqwest::StatusCode),
    ReadBody(std::io::Error),
    ParseJson(serde_json::Error),
    EmptyCredentials(String),
    EmptyToken,
    ManifestTooLarge {
        limit: usize,
    },
    DigestMismatch {
        expected: String,
        actual: String,
    },
    SizeExceeded {
        expected: u64,
    },
    SizeMismatch {
        expected: u64,
        actual: u64,
    },
    CreateFile(std::io::Error),
    WriteFile(std::io::Error),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::MissingDigest(uri) => write!(f, "no digest separator `@` in {uri}"),
            Error::UnsupportedDigest(digest) => write!(f, "unsupported digest type in {digest}, expected sha256:"),
            Error::InvalidDigest(hash) => write!(f, "digest is not 64 lowercase hex characters: {hash}"),
            Error::MissingRepoPath(name) => write!(f, "expected <host>/<factory>/<app>, got {name}"),
            Error::ParseUrl(err) => write!(f, "failed to parse URL: {err}"),
            Error::Encode(err) => write!(f, "failed to encode: {err}"),
            Error::SendRequest(url, err) => write!(f, "failed to send request to {url}: {err}"),
            Error::RequestFailed(url, status) => write!(f, "request to {url} returned status code {status}"),
            Error::ReadBody(err) => write!(f, "failed to read response body: {err}"),
            Error::ParseJson(err) => write!(f, "failed to parse JSON body: {err}"),
            Error::EmptyCredentials(field) => write!(f, "auth endpoint returned an empty {field}"),
            Error::EmptyToken => write!(f, "token endpoint returned an empty token"),
            Error::ManifestTooLarge {
                limit,
            } => write!(f, "manifest exceeds the {limit} byte limit"),
            Error::DigestMismatch {
                expected,
                actual,
            } => {
                write!(f, "digest mismatch: expected {expected}, got {actual}")
            }
            Error::SizeExceeded {
                expected,
            } => write!(f, "received more than the expected {expected} bytes"),
            Error::SizeMismatch {
                expected,
                actual,
            } => {
                write!(f, "size mismatch: expected {expected} bytes, got {actual}")
            }
            Error::CreateFile(err) => write!(f, "failed to create file: {err}"),
            Error::WriteFile(err) => write!(f, "failed to write file: {err}"),
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::ParseUrl(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ParseJson(err)
    }
}
