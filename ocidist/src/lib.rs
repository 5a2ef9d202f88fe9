mod digest;
pub use self::digest::Sha256Sum;

mod uri;
pub use self::uri::Uri;

mod error;
pub use self::error::Error;

pub mod auth;
pub use auth::Credentials;

mod client;
pub use client::Client;
pub use client::MANIFEST_MAX_SIZE;
pub use client::OCI_MANIFEST_FORMAT;
