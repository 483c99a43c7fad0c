//! Source URL parsing.

use std::path::PathBuf;
use std::str::FromStr;

use url::Url;

use crate::error::CaptureError;
use crate::CaptureResult;

/// A parsed source identifier with typed query access.
#[derive(Debug, Clone)]
pub struct SourceUrl {
    url: Url,
}

impl SourceUrl {
    /// Parse a source identifier.
    pub fn parse(source: &str) -> CaptureResult<Self> {
        let url = Url::parse(source).map_err(|e| CaptureError::InvalidSource {
            source_name: source.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { url })
    }

    /// URL scheme.
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Host part, which names the generator for `test://` sources.
    pub fn kind(&self) -> Option<&str> {
        self.url.host_str()
    }

    /// Typed query parameter; `Ok(None)` when absent.
    pub fn param<T: FromStr>(&self, name: &str) -> CaptureResult<Option<T>> {
        let Some((_, value)) = self.url.query_pairs().find(|(key, _)| key == name) else {
            return Ok(None);
        };
        value
            .parse()
            .map(Some)
            .map_err(|_| CaptureError::InvalidParameter {
                name: name.to_string(),
                value: value.into_owned(),
            })
    }

    /// Typed query parameter with a default.
    pub fn param_or<T: FromStr>(&self, name: &str, default: T) -> CaptureResult<T> {
        Ok(self.param(name)?.unwrap_or(default))
    }

    /// Local path of a `file://` source.
    pub fn file_path(&self) -> CaptureResult<PathBuf> {
        self.url
            .to_file_path()
            .map_err(|_| CaptureError::InvalidSource {
                source_name: self.url.to_string(),
                message: "not a local file path".to_string(),
            })
    }
}
