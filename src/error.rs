// src/error.rs

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("environment variable {0} could not be parsed")]
    ParseEnv(String),

    #[error("test connection with database timed out")]
    DbConnTimeout,

    #[error("storage layer requires optimize_channels() before starting")]
    UncachedChannels,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Parse(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Parse(s.to_string())
    }
}

/// Wrap an error with the current source location, so a fatal log line shows
/// where each propagation step happened. An optional second argument attaches
/// a free-form context payload:
///
/// ```ignore
/// return Err(wrap_err!(err));
/// error!("{}", wrap_err!(err, { "channel": name }));
/// ```
#[macro_export]
macro_rules! wrap_err {
    ($err:expr) => {
        $crate::error::Envelope::new($err, ::std::module_path!(), ::core::option::Option::None)
    };
    ($err:expr, $ctx:tt) => {
        $crate::error::Envelope::new(
            $err,
            ::std::module_path!(),
            ::core::option::Option::Some(::serde_json::json!($ctx)),
        )
    };
}

/// Contextual envelope attached to an error at a propagation site.
///
/// Envelopes nest: wrapping an `Envelope` in another `Envelope` extends the
/// breadcrumb trail, and `Display` renders the deepest message once followed
/// by every caller site in outer-to-inner order. The cause chain stays
/// reachable through [`std::error::Error::source`] for programmatic
/// inspection.
#[derive(Debug)]
pub struct Envelope {
    /// Correlation id for log grepping. Derived from the capture time and the
    /// message through a non-cryptographic hash; fast, not safe.
    pub id: String,
    pub file: &'static str,
    pub line: u32,
    pub caller: &'static str,
    pub at: DateTime<Utc>,
    pub context: Option<serde_json::Value>,
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl Envelope {
    /// Not meant to be called directly; use [`wrap_err!`] so the caller name
    /// is captured at the wrapping site.
    #[track_caller]
    pub fn new<E>(err: E, caller: &'static str, context: Option<serde_json::Value>) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let loc = std::panic::Location::caller();
        let now = Utc::now();
        let source = err.into();
        Self {
            id: id(now, &source.to_string()),
            file: loc.file(),
            line: loc.line(),
            caller,
            at: now,
            context,
            source,
        }
    }

    /// The innermost `Envelope` in the chain.
    pub fn cause(&self) -> &Envelope {
        let mut cur = self;
        while let Some(inner) = cur.source.downcast_ref::<Envelope>() {
            cur = inner;
        }
        cur
    }

    /// The first non-envelope error at the bottom of the chain.
    pub fn root_cause(&self) -> &(dyn std::error::Error + 'static) {
        &*self.cause().source
    }

    /// True when any error in the cause chain downcasts to `E`.
    pub fn is<E: std::error::Error + 'static>(&self) -> bool {
        let mut src: &(dyn std::error::Error + 'static) = &*self.source;
        loop {
            if src.downcast_ref::<E>().is_some() {
                return true;
            }
            match src.source() {
                Some(next) => src = next,
                None => return false,
            }
        }
    }

    /// Single-line breadcrumb string with the caller info of every envelope
    /// in the chain, outer to inner. Suitable for storage.
    pub fn trace(&self) -> String {
        use fmt::Write;
        let mut out = String::new();
        let mut cur = Some(self);
        while let Some(env) = cur {
            if !out.is_empty() {
                out.push('|');
            }
            let _ = write!(out, "{}:{}#{}", env.file, env.line, env.caller);
            cur = env.source.downcast_ref::<Envelope>();
        }
        out
    }

    fn root_message(&self) -> String {
        self.root_cause().to_string()
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.id, self.root_message())?;
        let mut cur = Some(self);
        while let Some(env) = cur {
            write!(f, " <{}:{}#{}", env.file, env.line, env.caller)?;
            if let Some(ctx) = &env.context {
                write!(f, " ctx:{}", ctx)?;
            }
            write!(f, ">")?;
            cur = env.source.downcast_ref::<Envelope>();
        }
        Ok(())
    }
}

impl std::error::Error for Envelope {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.source)
    }
}

/// Hash (capture-unix-seconds, message) into a short correlation id.
fn id(t: DateTime<Utc>, msg: &str) -> String {
    let hashed = fnv64a(format!("{}{}", t.timestamp(), msg).as_bytes());
    BASE64.encode(hashed.to_string())
}

fn fnv64a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_deepest_message_once_with_breadcrumbs() {
        let inner = wrap_err!(Error::DbConnTimeout);
        let outer = wrap_err!(inner, { "attempt": 3 });

        let rendered = outer.to_string();
        assert_eq!(
            rendered.matches("test connection with database timed out").count(),
            1
        );
        // Outer site first, then the inner one.
        let first = rendered.find("ctx:{\"attempt\":3}").unwrap();
        let breadcrumbs = rendered.matches("#modtrack::error::tests").count();
        assert_eq!(breadcrumbs, 2);
        assert!(first < rendered.rfind('<').unwrap());
    }

    #[test]
    fn cause_chain_survives_wrapping() {
        let outer = wrap_err!(wrap_err!(Error::UncachedChannels));
        assert!(outer.is::<Error>());
        assert!(matches!(
            outer.root_cause().downcast_ref::<Error>(),
            Some(Error::UncachedChannels)
        ));
        assert_eq!(outer.trace().split('|').count(), 2);
    }

    #[test]
    fn fnv64a_matches_reference_vectors() {
        // Published FNV-1a test vectors.
        assert_eq!(fnv64a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv64a(b"a"), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(fnv64a(b"foobar"), 0x85944171f73967e8);
    }

    #[test]
    fn id_is_stable_for_same_second_and_message() {
        let t = Utc::now();
        assert_eq!(id(t, "boom"), id(t, "boom"));
        assert_ne!(id(t, "boom"), id(t, "other"));
    }
}
