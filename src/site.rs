//! Site lookup and outbound identity headers
//!
//! The application decides which site (board backend) a URL belongs to and
//! what cookies and user agent go out with requests to it. The handshake
//! asks through this trait instead of knowing about sites itself.

use url::Url;

/// Site lookup plus cookie / user-agent formatting
pub trait SiteContext: Send + Sync {
    /// Name of the site serving `url`, if it is known
    fn site_name(&self, url: &Url) -> Option<String>;

    /// User-Agent header value for `site`
    fn user_agent(&self, site: Option<&str>) -> Option<String>;

    /// Formatted Cookie header value for a request to `url`
    fn cookie_header(&self, site: Option<&str>, url: &Url) -> Option<String>;
}

/// Context that knows no sites and adds no headers
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSite;

impl SiteContext for NoSite {
    fn site_name(&self, _url: &Url) -> Option<String> {
        None
    }

    fn user_agent(&self, _site: Option<&str>) -> Option<String> {
        None
    }

    fn cookie_header(&self, _site: Option<&str>, _url: &Url) -> Option<String> {
        None
    }
}

/// Fixed user agent and per-host cookies
///
/// Hosts map to themselves as site names. Useful when the application has
/// a single identity for every site.
#[derive(Debug, Clone, Default)]
pub struct StaticSite {
    user_agent: Option<String>,
    cookies: Vec<(String, String)>,
}

impl StaticSite {
    /// Create a context with the given user agent
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: Some(user_agent.into()),
            cookies: Vec::new(),
        }
    }

    /// Send `cookie` (already `name=value` formatted) to `host`
    pub fn cookie(mut self, host: impl Into<String>, cookie: impl Into<String>) -> Self {
        self.cookies.push((host.into(), cookie.into()));
        self
    }
}

impl SiteContext for StaticSite {
    fn site_name(&self, url: &Url) -> Option<String> {
        url.host_str().map(str::to_owned)
    }

    fn user_agent(&self, _site: Option<&str>) -> Option<String> {
        self.user_agent.clone()
    }

    fn cookie_header(&self, site: Option<&str>, _url: &Url) -> Option<String> {
        let site = site?;
        let cookies: Vec<&str> = self
            .cookies
            .iter()
            .filter(|(host, _)| host.eq_ignore_ascii_case(site))
            .map(|(_, cookie)| cookie.as_str())
            .collect();
        if cookies.is_empty() {
            None
        } else {
            Some(cookies.join("; "))
        }
    }
}
