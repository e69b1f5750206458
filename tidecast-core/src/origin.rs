//! Origin address construction.
//!
//! The origin address is the URL the controller is told to fetch. Its path is
//! also the route the origin server serves, so both are derived from the same
//! encoding of the logical name.

use crate::config::ServerConfig;
use crate::source::MediaRequest;

/// Logical name that publishes a stream at the bare origin.
pub const STREAM_MARKER: &str = "-";

/// URL of the form `scheme://host:port[/name]` pointing at the origin server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OriginAddress {
    url: String,
    path_start: usize,
}

impl OriginAddress {
    /// Builds the address for `name`.
    ///
    /// - `-` yields no trailing slash and no path
    /// - `/` yields a trailing slash and no path
    /// - anything else is appended as `/` plus the percent-encoded name
    ///
    /// # Examples
    /// ```
    /// use tidecast_core::OriginAddress;
    ///
    /// let origin = OriginAddress::build("http", "10.0.0.5", 8080, "movie.mp4");
    /// assert_eq!(origin.as_str(), "http://10.0.0.5:8080/movie.mp4");
    /// ```
    pub fn build(scheme: &str, host: &str, port: u16, name: &str) -> Self {
        let authority = if host.contains(':') && !host.starts_with('[') {
            format!("{scheme}://[{host}]:{port}")
        } else {
            format!("{scheme}://{host}:{port}")
        };
        let path_start = authority.len();
        let url = authority + &encode_path(name);

        Self { url, path_start }
    }

    /// Builds the address for a request, honouring advertise overrides.
    ///
    /// `bound_port` is the port the origin server actually listens on.
    pub fn for_request(
        request: &MediaRequest,
        local_host: &str,
        bound_port: u16,
        server: &ServerConfig,
    ) -> Self {
        let host = server.advertise_host.as_deref().unwrap_or(local_host);
        let port = server.advertise_port.unwrap_or(bound_port);
        Self::build(request.scheme(), host, port, &request.logical_name())
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Path component exactly as announced; empty for the stream marker.
    pub fn path(&self) -> &str {
        &self.url[self.path_start..]
    }

    /// Request path the origin server must answer on.
    pub fn route(&self) -> &str {
        match self.path() {
            "" => "/",
            path => path,
        }
    }
}

impl std::fmt::Display for OriginAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}

fn encode_path(name: &str) -> String {
    match name {
        STREAM_MARKER | "" => String::new(),
        "/" => "/".to_string(),
        _ => {
            let segments: Vec<String> = name
                .trim_start_matches('/')
                .split('/')
                .map(|segment| urlencoding::encode(segment).into_owned())
                .collect();
            format!("/{}", segments.join("/"))
        }
    }
}
