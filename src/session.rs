//! Stateful browsing session: navigation, redirects, cookies, form actions.
//!
//! Every navigating call runs the whole request → redirects → parse sequence
//! inside one retry loop. Lookups (forms, buttons, fields, links) happen
//! before that loop and are never retried.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{self, CachedResponse, ResponseCache, DEFAULT_EXPIRY};
use crate::dom::{Document, Matcher, NodeId};
use crate::error::{BrowseError, Result};
use crate::forms::{build_forms, Bucket, Forms};
use crate::http::{HttpTransport, Method, Request, Response, Transport};
use crate::script::Script;
use crate::submit::build_submission;
use crate::text::strip_formatting_tags;

pub const DEFAULT_USER_AGENT: &str = concat!("formwalk/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Tries per navigating action, including the first.
    pub attempts: usize,
    pub retry_delay: Duration,
    pub max_redirects: usize,
    /// Connect and read deadline of the HTTP transport.
    pub timeout: Duration,
    pub user_agent: String,
    /// Response cache directory; `None` disables caching.
    pub cache_dir: Option<PathBuf>,
    pub cache_expiry: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay: Duration::from_secs(2),
            max_redirects: 10,
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            cache_dir: None,
            cache_expiry: DEFAULT_EXPIRY,
        }
    }
}

/// Everything a caller can ask a session to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Navigate {
        url: String,
    },
    Press {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        form: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        button: Option<String>,
    },
    Click {
        href: String,
    },
    Fill {
        field: String,
        value: String,
    },
    Check {
        field: String,
    },
    Uncheck {
        field: String,
    },
    SetRadio {
        field: String,
        value: String,
    },
    SelectOption {
        select: String,
        option: String,
    },
}

impl Action {
    /// Whether the action issues a request and replaces the current page.
    pub fn navigates(&self) -> bool {
        matches!(
            self,
            Action::Navigate { .. } | Action::Press { .. } | Action::Click { .. }
        )
    }
}

/// The current page, parsed. Replaced wholesale on every navigation.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: Url,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Raw response body, before formatting tags were stripped.
    pub body: String,
    pub document: Document,
    pub forms: Forms,
    /// Every element carrying an `href`, in document order.
    pub links: Vec<NodeId>,
}

impl Page {
    pub fn new(url: Url, status: u16, headers: Vec<(String, String)>, body: String) -> Self {
        debug!(url = %url, body_len = body.len(), "parsing page");
        let markup = strip_formatting_tags(&body);
        let document = Document::parse(&markup);
        let forms = build_forms(&markup);
        let links = document.find_descendants(
            document.root(),
            &Matcher::any().with_test(|el| el.has_attr("href")),
        );
        Self {
            url,
            status,
            headers,
            body,
            document,
            forms,
            links,
        }
    }

    fn from_response(url: Url, response: Response) -> Self {
        Self::new(url, response.status, response.headers, response.body)
    }

    pub fn title(&self) -> String {
        self.document.title()
    }

    pub fn link_href(&self, id: NodeId) -> Option<&str> {
        self.document.attr(id, "href")
    }

    /// `href` of the first link equal to `href`, ignoring ASCII case.
    pub fn find_link(&self, href: &str) -> Option<&str> {
        let wanted = href.trim();
        self.links
            .iter()
            .filter_map(|&id| self.link_href(id))
            .find(|h| h.trim().eq_ignore_ascii_case(wanted))
    }
}

pub struct Session<T: Transport = HttpTransport> {
    config: SessionConfig,
    transport: T,
    /// Domain and path scoped, shared with whoever else holds the `Arc`.
    cookies: Arc<Jar>,
    cache: Option<ResponseCache>,
    location: Option<Url>,
    page: Option<Page>,
}

impl Session<HttpTransport> {
    pub fn new(config: SessionConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config.user_agent, config.timeout)?;
        Ok(Self::with_transport(config, transport))
    }
}

impl<T: Transport> Session<T> {
    pub fn with_transport(config: SessionConfig, transport: T) -> Self {
        let cache = config
            .cache_dir
            .clone()
            .map(|dir| ResponseCache::with_base(dir).with_expiry(config.cache_expiry));
        Self {
            config,
            transport,
            cookies: Arc::new(Jar::default()),
            cache,
            location: None,
            page: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn cookies(&self) -> &Arc<Jar> {
        &self.cookies
    }

    /// Use `jar` for cookies from now on, e.g. one shared with another session.
    pub fn with_cookies(mut self, jar: Arc<Jar>) -> Self {
        self.cookies = jar;
        self
    }

    /// The `Cookie` header this session would send to `url`.
    pub fn cookie_header(&self, url: &Url) -> Option<String> {
        let value = self.cookies.cookies(url)?;
        value.to_str().ok().map(str::to_string)
    }

    pub fn location(&self) -> Option<&Url> {
        self.location.as_ref()
    }

    pub fn page(&self) -> Result<&Page> {
        self.page.as_ref().ok_or(BrowseError::NoPage)
    }

    fn page_mut(&mut self) -> Result<&mut Page> {
        self.page.as_mut().ok_or(BrowseError::NoPage)
    }

    /// Run one action.
    pub fn perform(&mut self, action: &Action) -> Result<()> {
        debug!(action = ?action, "performing action");
        match action {
            Action::Navigate { url } => self.navigate(url).map(|_| ()),
            Action::Press { form, button } => {
                self.press(form.as_deref(), button.as_deref()).map(|_| ())
            }
            Action::Click { href } => self.click(href).map(|_| ()),
            Action::Fill { field, value } => self.fill(field, value),
            Action::Check { field } => self.check(field),
            Action::Uncheck { field } => self.uncheck(field),
            Action::SetRadio { field, value } => self.set_radio(field, value),
            Action::SelectOption { select, option } => self.select_option(select, option),
        }
    }

    /// Navigate to the script's start URL (when set), then run its actions in order.
    pub fn run_script(&mut self, script: &Script) -> Result<&Page> {
        info!(script = %script.name, actions = script.actions.len(), "running script");
        if !script.start_url.is_empty() {
            self.navigate(&script.start_url)?;
        }
        for (step, action) in script.actions.iter().enumerate() {
            debug!(step = step, "script step");
            self.perform(action)?;
        }
        self.page()
    }

    /// Install a page from markup already in hand, as if it had been fetched.
    pub fn load_html(&mut self, html: &str, url: &str) -> Result<&Page> {
        let url = parse_url(url)?;
        Ok(self.install(Page::new(url, 200, Vec::new(), html.to_string())))
    }

    /// GET `url`, resolved against the current location when relative.
    pub fn navigate(&mut self, url: &str) -> Result<&Page> {
        let target = self.resolve(url)?;
        info!(url = %target, "navigating");
        self.load(Request::get(target), true)
    }

    /// Follow a link of the current page whose `href` matches, ignoring case.
    pub fn click(&mut self, href: &str) -> Result<&Page> {
        let page = self.page()?;
        let link = page
            .find_link(href)
            .ok_or_else(|| BrowseError::not_found("link", href))?;
        let target = page
            .url
            .join(link.trim())
            .map_err(|source| BrowseError::InvalidUrl {
                url: link.to_string(),
                source,
            })?;
        info!(href = %href, url = %target, "clicking link");
        self.load(Request::get(target), true)
    }

    /// Submit a form through a button.
    ///
    /// `form = None` searches every form in document order. `button = None`
    /// submits the form without a button pair.
    pub fn press(&mut self, form: Option<&str>, button: Option<&str>) -> Result<&Page> {
        let page = self.page()?;
        let (index, button_id) = locate_button(&page.forms, form, button)?;
        let target_form = page
            .forms
            .get_index(index)
            .ok_or_else(|| BrowseError::not_found("form", form.unwrap_or_default()))?;
        let request = build_submission(target_form, button_id, &page.url)?;
        info!(
            form = %target_form.name,
            method = %request.method,
            url = %request.url,
            "submitting form"
        );
        self.load(request, false)
    }

    /// Set a text field or textarea, found by name, label, then preceding text.
    pub fn fill(&mut self, field: &str, value: &str) -> Result<()> {
        let page = self.page_mut()?;
        let (index, id) = page
            .forms
            .find_field(&[Bucket::Textboxes, Bucket::Textareas], field)
            .ok_or_else(|| BrowseError::not_found("field", field))?;
        if let Some(form) = page.forms.get_index_mut(index) {
            form.set_value(id, value);
            debug!(form = %form.name, field = %field, "filled field");
        }
        Ok(())
    }

    pub fn check(&mut self, field: &str) -> Result<()> {
        self.set_checkbox(field, true)
    }

    pub fn uncheck(&mut self, field: &str) -> Result<()> {
        self.set_checkbox(field, false)
    }

    fn set_checkbox(&mut self, field: &str, checked: bool) -> Result<()> {
        let page = self.page_mut()?;
        let (index, id) = page
            .forms
            .find_field(&[Bucket::Checkboxes], field)
            .ok_or_else(|| BrowseError::not_found("checkbox", field))?;
        if let Some(form) = page.forms.get_index_mut(index) {
            form.set_checked(id, checked);
            debug!(form = %form.name, field = %field, checked = checked, "checkbox set");
        }
        Ok(())
    }

    /// Select `value` within the radio group `field` of the first form that has it.
    pub fn set_radio(&mut self, field: &str, value: &str) -> Result<()> {
        let page = self.page_mut()?;
        let index = page
            .forms
            .iter()
            .position(|f| !f.radio_group(field).is_empty())
            .ok_or_else(|| BrowseError::not_found("radio group", field))?;
        match page.forms.get_index_mut(index) {
            Some(form) => form.set_radio(field, value),
            None => Err(BrowseError::not_found("radio group", field)),
        }
    }

    pub fn select_option(&mut self, select: &str, option: &str) -> Result<()> {
        let page = self.page_mut()?;
        let (index, id) = page
            .forms
            .find_field(&[Bucket::Selectboxes], select)
            .ok_or_else(|| BrowseError::not_found("select", select))?;
        match page.forms.get_index_mut(index) {
            Some(form) => form.select_option(id, option),
            None => Err(BrowseError::not_found("select", select)),
        }
    }

    fn resolve(&self, target: &str) -> Result<Url> {
        let joined = match &self.location {
            Some(base) => base.join(target.trim()),
            None => Url::parse(target.trim()),
        };
        joined.map_err(|source| BrowseError::InvalidUrl {
            url: target.to_string(),
            source,
        })
    }

    /// Fetch and install a page. `cacheable` GETs go through the cache when one is configured.
    fn load(&mut self, request: Request, cacheable: bool) -> Result<&Page> {
        let cache_key = match (&self.cache, request.method) {
            (Some(_), Method::Get) if cacheable => Some(cache::key(
                request.method,
                &request.url,
                request.body.as_deref(),
            )),
            _ => None,
        };

        let cached = match (&self.cache, &cache_key) {
            (Some(cache), Some(key)) => cache.get(key).unwrap_or_else(|e| {
                warn!(key = %key, error = %e, "cache read failed");
                None
            }),
            _ => None,
        };
        if let Some(entry) = cached {
            let url = Url::parse(&entry.final_url).unwrap_or_else(|_| request.url.clone());
            info!(url = %url, "loaded from cache");
            // Only the final hop's cookies are stored with the entry.
            self.store_cookies(&entry.response, &url);
            return Ok(self.install(Page::from_response(url, entry.response)));
        }

        let what = format!("{} {}", request.method, request.url);
        let page = self.with_retry(&what, |session| {
            let (url, response) = session.fetch(request.clone())?;
            Ok(Page::from_response(url, response))
        })?;

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            let response = Response {
                status: page.status,
                headers: page.headers.clone(),
                body: page.body.clone(),
            };
            let entry = CachedResponse::new(request.method, &request.url, &page.url, response);
            if let Err(e) = cache.put(key, &entry) {
                warn!(key = %key, error = %e, "cache write failed");
            }
        }

        Ok(self.install(page))
    }

    /// Run `op` up to `attempts` times, sleeping `retry_delay` between tries.
    /// Only transport, HTTP and redirect failures are retried.
    fn with_retry<R>(
        &mut self,
        what: &str,
        mut op: impl FnMut(&mut Self) -> Result<R>,
    ) -> Result<R> {
        let attempts = self.config.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(self) {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= attempts => {
                    warn!(what = %what, attempts = attempts, error = %e, "giving up");
                    return Err(BrowseError::ExhaustedRetries {
                        attempts,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!(
                        what = %what,
                        attempt = attempt,
                        attempts = attempts,
                        error = %e,
                        "attempt failed, retrying"
                    );
                    thread::sleep(self.config.retry_delay);
                    attempt += 1;
                }
            }
        }
    }

    /// Send `request`, following redirects until a final response arrives.
    /// Cookies set on any hop go into the jar and out on later hops whose URL they match.
    fn fetch(&mut self, mut request: Request) -> Result<(Url, Response)> {
        let mut hops = 0usize;
        loop {
            if let Some(cookie) = self.cookie_header(&request.url) {
                request.set_header("Cookie", &cookie);
            }
            debug!(method = %request.method, url = %request.url, hop = hops, "requesting");
            let response = self.transport.send(&request)?;
            self.store_cookies(&response, &request.url);

            if response.is_redirect() {
                let location = response.header("location").ok_or_else(|| {
                    BrowseError::Redirect(format!(
                        "{} from {} without Location",
                        response.status, request.url
                    ))
                })?;
                let next = request
                    .url
                    .join(location.trim())
                    .map_err(|source| BrowseError::InvalidUrl {
                        url: location.to_string(),
                        source,
                    })?;
                hops += 1;
                if hops > self.config.max_redirects {
                    return Err(BrowseError::Redirect(format!(
                        "more than {} redirects, last to {next}",
                        self.config.max_redirects
                    )));
                }
                debug!(status = response.status, from = %request.url, to = %next, "redirecting");
                request = request.redirected(next);
                continue;
            }

            if response.is_error() {
                return Err(BrowseError::Http {
                    status: response.status,
                    url: request.url.to_string(),
                });
            }
            return Ok((request.url, response));
        }
    }

    fn store_cookies(&self, response: &Response, url: &Url) {
        let values: Vec<HeaderValue> = response
            .header_values("set-cookie")
            .filter_map(|v| HeaderValue::from_str(v).ok())
            .collect();
        if !values.is_empty() {
            debug!(url = %url, count = values.len(), "storing cookies");
            self.cookies.set_cookies(&mut values.iter(), url);
        }
    }

    fn install(&mut self, page: Page) -> &Page {
        info!(
            url = %page.url,
            status = page.status,
            forms = page.forms.len(),
            links = page.links.len(),
            "page loaded"
        );
        self.location = Some(page.url.clone());
        // The old page (and every form document it owns) goes before the new one lands.
        self.page = None;
        self.page.insert(page)
    }
}

fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url.trim()).map_err(|source| BrowseError::InvalidUrl {
        url: url.to_string(),
        source,
    })
}

/// Form index and button for a press. Forms are tried in document order.
fn locate_button(
    forms: &Forms,
    form: Option<&str>,
    button: Option<&str>,
) -> Result<(usize, Option<NodeId>)> {
    let candidates: Vec<usize> = match form {
        Some(name) => vec![forms
            .position(name)
            .ok_or_else(|| BrowseError::not_found("form", name))?],
        None => (0..forms.len()).collect(),
    };
    let Some(&first) = candidates.first() else {
        return Err(BrowseError::not_found("form", "(any)"));
    };

    match button {
        None => Ok((first, None)),
        Some(selector) => candidates
            .iter()
            .find_map(|&i| {
                forms
                    .get_index(i)?
                    .find_button(selector)
                    .map(|b| (i, Some(b)))
            })
            .ok_or_else(|| BrowseError::not_found("button", selector)),
    }
}
