use secure_string::SecureString;
use serde::{Deserialize, Deserializer};
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// Defines a connection handle for a Redis server, consisting primarily of a
/// connection URL, along with a bit of metadata for logging/debugging
/// purposes.
///
/// This handle by itself does not implement any connection logic.
#[derive(Clone, PartialEq)]
pub struct Handle {
    name: Arc<str>,
    identifier: Arc<str>,
    dsn: SecureString,
}

/// Groups the pieces of a Redis URL for convenient passing into
/// [`Handle::new`].
pub struct DsnChunks<H, P>
where
    H: AsRef<str>,
    P: Into<SecureString>,
{
    /// The `localhost` part of `redis://localhost:6379/0`.
    pub host: H,
    /// The `6379` part of `redis://localhost:6379/0`.
    pub port: u16,
    /// The `0` part of `redis://localhost:6379/0`: the database index.
    pub db: i64,
    /// The optional password, spliced in as
    /// `redis://:password@localhost:6379/0`.
    pub password: Option<P>,
}

impl Handle {
    /// Creates a new handle with the given name and composes the URL from
    /// the given [`chunks`](DsnChunks).
    ///
    /// Takes care of securing the password against _accidental_
    /// debug-printing.
    pub fn new<H, P>(name: impl AsRef<str>, chunks: DsnChunks<H, P>) -> Self
    where
        H: AsRef<str>,
        P: Into<SecureString>,
    {
        let name = Arc::from(name.as_ref());
        let host = chunks.host.as_ref();

        let identifier: Arc<str> =
            Arc::from(format!("redis://{}:{}/{}", host, chunks.port, chunks.db));

        let dsn = match chunks.password {
            Some(password) => SecureString::from(format!(
                "redis://:{}@{}:{}/{}",
                password.into().unsecure(),
                host,
                chunks.port,
                chunks.db,
            )),
            None => SecureString::from(identifier.as_ref()),
        };

        Self {
            name,
            identifier,
            dsn,
        }
    }

    /// Creates a new handle directly from a full Redis URL, bypassing the
    /// component fields.
    pub fn from_url(name: impl AsRef<str>, url: impl AsRef<str>) -> Self {
        let url = url.as_ref();

        Self {
            name: Arc::from(name.as_ref()),
            identifier: Arc::from(Self::redact(url)),
            dsn: SecureString::from(url),
        }
    }

    /// Strips the userinfo part out of a URL, leaving an identifier that is
    /// safe for logging.
    fn redact(url: &str) -> String {
        match (url.split_once("://"), url.rfind('@')) {
            (Some((scheme, _)), Some(at)) => format!("{}://{}", scheme, &url[at + 1..]),
            _ => url.to_owned(),
        }
    }
}

impl Handle {
    /// Reports the handle name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reports the handle identifier, which is the connection URL with any
    /// credentials removed. This identifier is generally safe for debug
    /// logging.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Reports the handle DSN.
    pub fn dsn(&self) -> &SecureString {
        &self.dsn
    }
}

impl Handle {
    fn default_name() -> &'static str {
        "default"
    }

    fn default_host() -> &'static str {
        "localhost"
    }

    fn default_port() -> u16 {
        6379
    }

    fn default_db() -> i64 {
        0
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::new(
            Self::default_name(),
            DsnChunks {
                host: Self::default_host(),
                port: Self::default_port(),
                db: Self::default_db(),
                password: None::<&str>,
            },
        )
    }
}

/// Omits `dsn` from the debug representation; it adds no valuable debug
/// information beyond the identifier.
impl Debug for Handle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("name", &self.name)
            .field("identifier", &self.identifier)
            .finish()
    }
}

impl Display for Handle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.identifier)
    }
}

impl AsRef<Handle> for Handle {
    fn as_ref(&self) -> &Handle {
        self
    }
}

const _: () = {
    /// The raw, permissively-defaulted shape of a handle in configuration
    /// input.
    #[derive(Deserialize)]
    #[serde(default)]
    struct RawHandle {
        name: String,
        host: String,
        port: u16,
        db: i64,
        password: Option<String>,
        url: Option<String>,
    }

    impl Default for RawHandle {
        fn default() -> Self {
            Self {
                name: Handle::default_name().to_owned(),
                host: Handle::default_host().to_owned(),
                port: Handle::default_port(),
                db: Handle::default_db(),
                password: None,
                url: None,
            }
        }
    }

    impl<'de> Deserialize<'de> for Handle {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw = RawHandle::deserialize(deserializer)?;

            // A full URL overrides the component fields
            Ok(match raw.url {
                Some(url) => Handle::from_url(raw.name, url),
                None => Handle::new(
                    raw.name,
                    DsnChunks {
                        host: raw.host,
                        port: raw.port,
                        db: raw.db,
                        password: raw.password,
                    },
                ),
            })
        }
    }
};
