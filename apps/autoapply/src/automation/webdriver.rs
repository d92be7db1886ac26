/// Minimal W3C WebDriver client (chromedriver, geckodriver, Selenium Grid).
///
/// Only the commands the application worker needs are wrapped. Every response
/// is the standard `{"value": ...}` envelope; protocol errors carry an `error`
/// code that decides whether a failure is per-page or fatal for the session.
use std::time::Duration;

use base64::Engine as _;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

/// Key under which W3C drivers return element references.
pub(crate) const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

#[derive(Debug, Error)]
pub enum WebDriverError {
    #[error("WebDriver HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebDriver error '{error}': {message}")]
    Protocol { error: String, message: String },

    #[error("malformed WebDriver response: {0}")]
    Malformed(String),
}

impl WebDriverError {
    /// The session or the driver is gone; nothing on this page can be retried.
    pub fn is_session_fatal(&self) -> bool {
        match self {
            WebDriverError::Http(e) => e.is_connect(),
            WebDriverError::Protocol { error, message } => {
                matches!(
                    error.as_str(),
                    "invalid session id" | "session not created" | "no such window"
                ) || (error == "unknown error"
                    && (message.contains("chrome not reachable")
                        || message.contains("disconnected")))
            }
            WebDriverError::Malformed(_) => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            WebDriverError::Http(e) => e.is_timeout(),
            WebDriverError::Protocol { error, .. } => {
                matches!(error.as_str(), "timeout" | "script timeout")
            }
            WebDriverError::Malformed(_) => false,
        }
    }

    fn is_no_such_element(&self) -> bool {
        matches!(self, WebDriverError::Protocol { error, .. } if error == "no such element")
    }

    fn is_stale(&self) -> bool {
        matches!(self, WebDriverError::Protocol { error, .. } if error == "stale element reference")
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    message: String,
}

/// Locator strategy parsed from a profile selector. `xpath:` prefixes select
/// XPath; everything else is CSS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator<'a> {
    pub using: &'static str,
    pub value: &'a str,
}

impl<'a> Locator<'a> {
    pub fn parse(selector: &'a str) -> Self {
        match selector.strip_prefix("xpath:") {
            Some(xpath) => Locator {
                using: "xpath",
                value: xpath.trim(),
            },
            None => Locator {
                using: "css selector",
                value: selector.trim(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef(String);

/// Capabilities for a new browser session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub headless: bool,
    pub page_load_timeout: Duration,
}

impl SessionOptions {
    fn capabilities(&self) -> Value {
        let mut args = vec![
            "--window-size=1280,800",
            "--no-sandbox",
            "--disable-dev-shm-usage",
        ];
        if self.headless {
            args.push("--headless=new");
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "pageLoadStrategy": "normal",
                    "goog:chromeOptions": { "args": args }
                }
            }
        })
    }
}

#[derive(Clone)]
pub struct WebDriverClient {
    client: Client,
    base_url: String,
}

impl WebDriverClient {
    /// `command_timeout` bounds each HTTP round trip to the driver.
    pub fn new(base_url: &str, command_timeout: Duration) -> Result<Self, WebDriverError> {
        Ok(Self {
            client: Client::builder().timeout(command_timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, WebDriverError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(&body);
        } else if method == Method::POST {
            request = request.json(&json!({}));
        }

        let response = request.send().await?;
        let status = response.status();
        let mut envelope: Value = response.json().await?;
        let value = envelope
            .get_mut("value")
            .map(Value::take)
            .ok_or_else(|| WebDriverError::Malformed(format!("{method} {path}: missing value")))?;

        if !status.is_success() {
            let body: ErrorBody = serde_json::from_value(value)
                .map_err(|e| WebDriverError::Malformed(format!("{method} {path} ({status}): {e}")))?;
            debug!("WebDriver {method} {path} failed: {}", body.error);
            return Err(WebDriverError::Protocol {
                error: body.error,
                message: body.message,
            });
        }
        Ok(value)
    }

    pub async fn new_session(&self, options: &SessionOptions) -> Result<Session, WebDriverError> {
        let value = self
            .command(Method::POST, "/session", Some(options.capabilities()))
            .await?;
        let id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| WebDriverError::Malformed("new session without sessionId".to_string()))?
            .to_string();

        let session = Session {
            driver: self.clone(),
            id,
        };
        let timeout_ms = options.page_load_timeout.as_millis() as u64;
        let configured = session
            .post(
                "timeouts",
                json!({ "pageLoad": timeout_ms, "script": timeout_ms, "implicit": 0 }),
            )
            .await;
        if let Err(e) = configured {
            let id = session.id.clone();
            if let Err(close_err) = session.close().await {
                debug!("Closing half-configured session {id} failed: {close_err}");
            }
            return Err(e);
        }
        Ok(session)
    }
}

/// One live browser session.
pub struct Session {
    driver: WebDriverClient,
    id: String,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, WebDriverError> {
        self.driver
            .command(Method::POST, &format!("/session/{}/{}", self.id, path), Some(body))
            .await
    }

    async fn get(&self, path: &str) -> Result<Value, WebDriverError> {
        self.driver
            .command(Method::GET, &format!("/session/{}/{}", self.id, path), None)
            .await
    }

    pub async fn goto(&self, url: &str) -> Result<(), WebDriverError> {
        self.post("url", json!({ "url": url })).await.map(|_| ())
    }

    pub async fn source(&self) -> Result<String, WebDriverError> {
        Ok(self.get("source").await?.as_str().unwrap_or_default().to_string())
    }

    /// `None` when nothing matches.
    pub async fn find(&self, selector: &str) -> Result<Option<ElementRef>, WebDriverError> {
        let locator = Locator::parse(selector);
        match self
            .post("element", json!({ "using": locator.using, "value": locator.value }))
            .await
        {
            Ok(value) => element_ref(&value).map(Some),
            Err(e) if e.is_no_such_element() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn find_all(&self, selector: &str) -> Result<Vec<ElementRef>, WebDriverError> {
        let locator = Locator::parse(selector);
        let value = self
            .post("elements", json!({ "using": locator.using, "value": locator.value }))
            .await?;
        value
            .as_array()
            .map(|items| items.iter().map(element_ref).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    /// First displayed match across `selectors`, tried in order.
    pub async fn find_visible(&self, selectors: &[String]) -> Result<Option<ElementRef>, WebDriverError> {
        for selector in selectors {
            for element in self.find_all(selector).await? {
                match self.is_displayed(&element).await {
                    Ok(true) => return Ok(Some(element)),
                    Ok(false) => {}
                    Err(e) if e.is_stale() => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(None)
    }

    /// Polls `find_visible` until a match appears or `timeout` elapses.
    pub async fn wait_for_visible(
        &self,
        selectors: &[String],
        timeout: Duration,
        poll: Duration,
    ) -> Result<Option<ElementRef>, WebDriverError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(element) = self.find_visible(selectors).await? {
                return Ok(Some(element));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(poll).await;
        }
    }

    pub async fn is_displayed(&self, element: &ElementRef) -> Result<bool, WebDriverError> {
        Ok(self
            .get(&format!("element/{}/displayed", element.0))
            .await?
            .as_bool()
            .unwrap_or(false))
    }

    pub async fn is_selected(&self, element: &ElementRef) -> Result<bool, WebDriverError> {
        Ok(self
            .get(&format!("element/{}/selected", element.0))
            .await?
            .as_bool()
            .unwrap_or(false))
    }

    pub async fn tag_name(&self, element: &ElementRef) -> Result<String, WebDriverError> {
        Ok(self
            .get(&format!("element/{}/name", element.0))
            .await?
            .as_str()
            .unwrap_or_default()
            .to_ascii_lowercase())
    }

    pub async fn text(&self, element: &ElementRef) -> Result<String, WebDriverError> {
        Ok(self
            .get(&format!("element/{}/text", element.0))
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    pub async fn click(&self, element: &ElementRef) -> Result<(), WebDriverError> {
        self.post(&format!("element/{}/click", element.0), json!({}))
            .await
            .map(|_| ())
    }

    pub async fn clear(&self, element: &ElementRef) -> Result<(), WebDriverError> {
        self.post(&format!("element/{}/clear", element.0), json!({}))
            .await
            .map(|_| ())
    }

    /// Types into an element. For `<input type=file>` the text is a local path.
    pub async fn send_keys(&self, element: &ElementRef, text: &str) -> Result<(), WebDriverError> {
        self.post(&format!("element/{}/value", element.0), json!({ "text": text }))
            .await
            .map(|_| ())
    }

    pub async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value, WebDriverError> {
        self.post("execute/sync", json!({ "script": script, "args": args }))
            .await
    }

    /// Passes an element to `execute` as a script argument.
    pub fn element_arg(element: &ElementRef) -> Value {
        json!({ ELEMENT_KEY: element.0 })
    }

    /// Visible text of the document body.
    pub async fn page_text(&self) -> Result<String, WebDriverError> {
        let value = self
            .execute(
                "return document.body ? document.body.innerText : '';",
                Vec::new(),
            )
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// PNG of the current viewport.
    pub async fn screenshot(&self) -> Result<Vec<u8>, WebDriverError> {
        let value = self.get("screenshot").await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| WebDriverError::Malformed("screenshot is not a string".to_string()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| WebDriverError::Malformed(format!("screenshot base64: {e}")))
    }

    pub async fn close(self) -> Result<(), WebDriverError> {
        self.driver
            .command(Method::DELETE, &format!("/session/{}", self.id), None)
            .await
            .map(|_| ())
    }
}

fn element_ref(value: &Value) -> Result<ElementRef, WebDriverError> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(|id| ElementRef(id.to_string()))
        .ok_or_else(|| WebDriverError::Malformed(format!("not an element reference: {value}")))
}
