//! Firmware update hand-off.
//!
//! Control payloads from the broker name the image to fetch as an
//! `http://host[:port]/path` URL. [`FirmwareUpdate`] is the seam the
//! session manager hands them to; [`ImageSource::parse`] splits the URL for
//! the task that streams the image.

use core::ffi::CStr;

use crate::error::Error;

/// Receives verbatim control payloads from the firmware-update topic.
pub trait FirmwareUpdate {
    fn apply(&mut self, payload: &CStr);
}

/// Location of a firmware image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImageSource<'a> {
    pub host: &'a str,
    pub port: u16,
    pub path: &'a str,
}

impl<'a> ImageSource<'a> {
    pub const DEFAULT_PORT: u16 = 80;

    /// Parse `http://host[:port][/path]`. Surrounding whitespace is ignored
    /// and a missing path means `/`.
    pub fn parse(payload: &'a CStr) -> Result<Self, Error> {
        let url = payload.to_str().map_err(|_| Error::InvalidPayload)?.trim();
        let rest = url.strip_prefix("http://").ok_or(Error::InvalidPayload)?;

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| Error::InvalidPayload)?),
            None => (authority, Self::DEFAULT_PORT),
        };
        if host.is_empty() || port == 0 {
            return Err(Error::InvalidPayload);
        }
        Ok(Self { host, port, path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &CStr) -> Result<ImageSource<'_>, Error> {
        ImageSource::parse(s)
    }

    #[test]
    fn test_parse_full_url() {
        let src = parse(c"http://updates.local:8080/fw/tracker.bin").unwrap();
        assert_eq!(src.host, "updates.local");
        assert_eq!(src.port, 8080);
        assert_eq!(src.path, "/fw/tracker.bin");
    }

    #[test]
    fn test_parse_defaults() {
        let src = parse(c"http://10.0.0.2").unwrap();
        assert_eq!(src.host, "10.0.0.2");
        assert_eq!(src.port, 80);
        assert_eq!(src.path, "/");
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let src = parse(c" http://h/a.bin\n").unwrap();
        assert_eq!(src.host, "h");
        assert_eq!(src.path, "/a.bin");
    }

    #[test]
    fn test_parse_rejects_bad_urls() {
        assert_eq!(parse(c"https://h/a.bin"), Err(Error::InvalidPayload));
        assert_eq!(parse(c"http:///a.bin"), Err(Error::InvalidPayload));
        assert_eq!(parse(c"http://h:99999/a"), Err(Error::InvalidPayload));
        assert_eq!(parse(c"http://h:0/a"), Err(Error::InvalidPayload));
        assert_eq!(parse(c"firmware"), Err(Error::InvalidPayload));
        assert_eq!(parse(c""), Err(Error::InvalidPayload));
    }
}
