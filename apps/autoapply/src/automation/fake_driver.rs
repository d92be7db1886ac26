//! In-process WebDriver endpoint for worker and client tests.
//!
//! Each configured selector matches exactly one displayed element. Everything
//! else answers `no such element`, the way a real driver does.

use std::sync::{Arc, Mutex};

use axum::{
    body::Bytes,
    extract::State,
    http::{Method, StatusCode, Uri},
    Json, Router,
};
use base64::Engine as _;
use serde_json::{json, Value};

use super::webdriver::ELEMENT_KEY;

pub const SESSION_ID: &str = "fake-session";

#[derive(Default)]
struct Page {
    elements: Vec<String>,
    text: String,
    /// Text shown once the element matching the selector is clicked.
    after_click: Option<(String, String)>,
    /// Protocol error code returned by every script execution.
    script_error: Option<String>,
    fail_timeouts: bool,
}

#[derive(Default)]
pub struct FakeDriver {
    page: Mutex<Page>,
    log: Mutex<Vec<String>>,
}

pub struct FakeDriverServer {
    pub base_url: String,
    pub driver: Arc<FakeDriver>,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for FakeDriverServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl FakeDriver {
    pub fn new(elements: &[&str], text: &str) -> Self {
        let driver = Self::default();
        {
            let mut page = driver.page.lock().unwrap();
            page.elements = elements.iter().map(|s| s.to_string()).collect();
            page.text = text.to_string();
        }
        driver
    }

    pub fn on_click(self, selector: &str, text: &str) -> Self {
        self.page.lock().unwrap().after_click = Some((selector.to_string(), text.to_string()));
        self
    }

    pub fn script_error(self, code: &str) -> Self {
        self.page.lock().unwrap().script_error = Some(code.to_string());
        self
    }

    pub fn failing_timeouts(self) -> Self {
        self.page.lock().unwrap().fail_timeouts = true;
        self
    }

    pub async fn serve(self) -> FakeDriverServer {
        let driver = Arc::new(self);
        let app = Router::new().fallback(handle).with_state(driver.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        FakeDriverServer {
            base_url,
            driver,
            handle,
        }
    }

    /// `"METHOD /path"` for every command received, in order.
    pub fn requests(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn received(&self, request: &str) -> usize {
        self.requests().iter().filter(|r| r.as_str() == request).count()
    }

    /// Path of commands addressed to the element matching `selector`.
    pub fn element_path(&self, selector: &str, command: &str) -> String {
        let page = self.page.lock().unwrap();
        let index = page
            .elements
            .iter()
            .position(|s| s == selector)
            .expect("selector is not on the page");
        format!("/session/{SESSION_ID}/element/el-{index}/{command}")
    }

    fn respond(&self, method: &Method, parts: &[&str], body: &Value) -> (StatusCode, Value) {
        let mut page = self.page.lock().unwrap();
        let lookup = |page: &Page| {
            let wanted = body["value"].as_str().unwrap_or_default();
            page.elements.iter().position(|s| s == wanted)
        };

        match (method.as_str(), parts) {
            ("POST", ["session"]) => ok(json!({ "sessionId": SESSION_ID, "capabilities": {} })),
            ("DELETE", ["session", _]) => ok(Value::Null),
            ("POST", ["session", _, "timeouts"]) if page.fail_timeouts => {
                error(StatusCode::BAD_REQUEST, "invalid argument")
            }
            ("POST", ["session", _, "timeouts" | "url"]) => ok(Value::Null),
            ("POST", ["session", _, "element"]) => match lookup(&*page) {
                Some(index) => ok(element(index)),
                None => error(StatusCode::NOT_FOUND, "no such element"),
            },
            ("POST", ["session", _, "elements"]) => {
                ok(json!(lookup(&*page).map(element).into_iter().collect::<Vec<_>>()))
            }
            ("POST", ["session", _, "execute", "sync"]) => {
                if let Some(code) = &page.script_error {
                    return error(StatusCode::INTERNAL_SERVER_ERROR, code);
                }
                if body["script"].as_str().unwrap_or_default().contains("innerText") {
                    ok(json!(page.text))
                } else {
                    ok(json!(true))
                }
            }
            ("POST", ["session", _, "element", id, "click"]) => {
                let clicked = page.after_click.as_ref().and_then(|(selector, text)| {
                    let index = page.elements.iter().position(|s| s == selector)?;
                    (*id == format!("el-{index}")).then(|| text.clone())
                });
                if let Some(text) = clicked {
                    page.text = text;
                }
                ok(Value::Null)
            }
            ("POST", ["session", _, "element", _, "clear" | "value"]) => ok(Value::Null),
            ("GET", ["session", _, "element", _, "displayed"]) => ok(json!(true)),
            ("GET", ["session", _, "element", _, "selected"]) => ok(json!(false)),
            ("GET", ["session", _, "element", _, "name"]) => ok(json!("input")),
            ("GET", ["session", _, "element", _, "text"]) => ok(json!("")),
            ("GET", ["session", _, "screenshot"]) => {
                ok(json!(base64::engine::general_purpose::STANDARD.encode(b"png")))
            }
            ("GET", ["session", _, "source"]) => ok(json!("<html></html>")),
            _ => error(StatusCode::NOT_FOUND, "unknown command"),
        }
    }
}

async fn handle(
    State(driver): State<Arc<FakeDriver>>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let path = uri.path().to_string();
    driver.log.lock().unwrap().push(format!("{method} {path}"));
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let parts: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    let (status, value) = driver.respond(&method, &parts, &body);
    (status, Json(json!({ "value": value })))
}

fn element(index: usize) -> Value {
    json!({ ELEMENT_KEY: format!("el-{index}") })
}

fn ok(value: Value) -> (StatusCode, Value) {
    (StatusCode::OK, value)
}

fn error(status: StatusCode, code: &str) -> (StatusCode, Value) {
    (status, json!({ "error": code, "message": "" }))
}
