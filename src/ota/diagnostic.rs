//! Diagnostic payload attached to error responses: `{"code":N,"message":"..."}`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, HostError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic<'a> {
    pub code: i32,
    pub message: &'a str,
}

impl<'a> Diagnostic<'a> {
    pub fn new(code: i32, message: &'a str) -> Self {
        Self { code, message }
    }

    /// Host failure, falling back to a generic message when the host gave
    /// none.
    pub fn from_host(e: &'a HostError, fallback: &'a str) -> Self {
        Self::new(e.code, e.message().unwrap_or(fallback))
    }

    /// Serialize as JSON into `out`, returning the length written.
    pub fn write_json(&self, out: &mut [u8]) -> Result<usize> {
        let json = serde_json::to_vec(self).map_err(|_| Error::BadData)?;
        out.get_mut(..json.len())
            .ok_or(Error::NoMemory)?
            .copy_from_slice(&json);
        Ok(json.len())
    }
}
