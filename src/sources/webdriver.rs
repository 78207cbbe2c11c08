//! Minimal W3C WebDriver client (chromedriver, geckodriver, selenium grid).
//!
//! Only the handful of commands the browser-driven sources need: new session,
//! navigate, find elements, click, type, run a script, read the page source
//! and delete the session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::browser::{Browser, Locator, PageDriver};

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const ENTER_KEY: char = '\u{E007}';
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
const SCROLL_SCRIPT: &str = "window.scrollTo(0, document.body.scrollHeight);";

#[derive(Debug, Error)]
pub enum WebDriverError {
    #[error("webdriver transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid webdriver url: {0}")]
    Url(#[from] url::ParseError),
    #[error("webdriver {error}: {message}")]
    Protocol { error: String, message: String },
    #[error("malformed webdriver response: {0}")]
    Malformed(String),
}

/// Session factory for a WebDriver endpoint such as `http://localhost:9515`.
pub struct WebDriver {
    endpoint: String,
    client: reqwest::Client,
}

impl WebDriver {
    pub fn new(endpoint: &str) -> Result<Self, WebDriverError> {
        let url = Url::parse(endpoint)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(WebDriverError::Malformed(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }
        let client = reqwest::Client::builder().timeout(COMMAND_TIMEOUT).build()?;
        Ok(Self {
            endpoint: url.as_str().trim_end_matches('/').to_string(),
            client,
        })
    }
}

pub fn capabilities(headless: bool) -> Value {
    let mut args = vec!["--no-sandbox", "--disable-gpu", "--disable-dev-shm-usage"];
    if headless {
        args.insert(0, "--headless=new");
    }
    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "goog:chromeOptions": { "args": args }
            }
        }
    })
}

#[async_trait]
impl Browser for WebDriver {
    async fn open(&self, headless: bool) -> Result<Box<dyn PageDriver>> {
        let url = format!("{}/session", self.endpoint);
        let value = call(&self.client, Method::POST, &url, Some(capabilities(headless))).await?;
        let id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| WebDriverError::Malformed("no sessionId in new session response".into()))?;
        debug!("Started webdriver session {}", id);
        Ok(Box::new(WebDriverSession {
            client: self.client.clone(),
            session_url: format!("{}/session/{}", self.endpoint, id),
            closed: AtomicBool::new(false),
        }))
    }
}

/// One browser session. Deleted on [`PageDriver::close`], or in the
/// background when dropped without being closed.
pub struct WebDriverSession {
    client: reqwest::Client,
    session_url: String,
    closed: AtomicBool,
}

impl WebDriverSession {
    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, WebDriverError> {
        let url = if path.is_empty() {
            self.session_url.clone()
        } else {
            format!("{}/{}", self.session_url, path)
        };
        call(&self.client, method, &url, body).await
    }

    async fn find_all(&self, locator: Locator) -> Result<Vec<String>, WebDriverError> {
        let value = self
            .command(Method::POST, "elements", Some(locator_body(locator)))
            .await?;
        Ok(element_ids(&value))
    }

    async fn find_first(&self, locator: Locator) -> Result<Option<String>, WebDriverError> {
        Ok(self.find_all(locator).await?.into_iter().next())
    }
}

#[async_trait]
impl PageDriver for WebDriverSession {
    async fn goto(&self, url: &str) -> Result<()> {
        self.command(Method::POST, "url", Some(json!({ "url": url }))).await?;
        Ok(())
    }

    async fn count(&self, locator: Locator) -> Result<usize> {
        Ok(self.find_all(locator).await?.len())
    }

    async fn click(&self, locator: Locator) -> Result<bool> {
        let Some(id) = self.find_first(locator).await? else {
            return Ok(false);
        };
        self.command(Method::POST, &format!("element/{}/click", id), Some(json!({})))
            .await?;
        Ok(true)
    }

    async fn submit_text(&self, locator: Locator, text: &str) -> Result<bool> {
        let Some(id) = self.find_first(locator).await? else {
            return Ok(false);
        };
        self.command(Method::POST, &format!("element/{}/clear", id), Some(json!({})))
            .await?;
        let keys = format!("{}{}", text, ENTER_KEY);
        self.command(
            Method::POST,
            &format!("element/{}/value", id),
            Some(json!({ "text": keys })),
        )
        .await?;
        Ok(true)
    }

    async fn scroll_to_bottom(&self) -> Result<()> {
        self.command(
            Method::POST,
            "execute/sync",
            Some(json!({ "script": SCROLL_SCRIPT, "args": [] })),
        )
        .await?;
        Ok(())
    }

    async fn page_source(&self) -> Result<String> {
        let value = self.command(Method::GET, "source", None).await?;
        match value {
            Value::String(html) => Ok(html),
            other => Err(WebDriverError::Malformed(format!("page source was {}", kind(&other))).into()),
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.command(Method::DELETE, "", None).await?;
        Ok(())
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("Leaking webdriver session {} (no runtime to close it)", self.session_url);
            return;
        };
        let client = self.client.clone();
        let url = self.session_url.clone();
        handle.spawn(async move {
            if let Err(e) = client.delete(&url).send().await {
                debug!("Background close of {} failed: {}", url, e);
            }
        });
    }
}

async fn call(
    client: &reqwest::Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, WebDriverError> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request.send().await?;
    let status = response.status();
    let payload: Value = response.json().await?;
    unwrap_value(status, payload)
}

/// Pull `value` out of a response envelope, turning error payloads into
/// [`WebDriverError::Protocol`].
fn unwrap_value(status: StatusCode, mut payload: Value) -> Result<Value, WebDriverError> {
    let value = payload.get_mut("value").map(Value::take).unwrap_or(Value::Null);
    if status.is_success() {
        return Ok(value);
    }
    let field = |name: &str| {
        value
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let error = field("error");
    Err(WebDriverError::Protocol {
        error: if error.is_empty() { status.to_string() } else { error },
        message: field("message"),
    })
}

fn locator_body(locator: Locator) -> Value {
    let (using, value) = match locator {
        Locator::Css(css) => ("css selector", css),
        Locator::XPath(xpath) => ("xpath", xpath),
    };
    json!({ "using": using, "value": value })
}

fn element_ids(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|elements| {
            elements
                .iter()
                .filter_map(|e| e.get(ELEMENT_KEY).and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
