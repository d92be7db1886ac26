use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::classifier::{ListingState, OutcomeClassifier, SubmissionVerdict};
use super::profile::{ConsentTarget, FormProfile};
use super::screenshots::{CaptureStep, ScreenshotStore};
use super::webdriver::{ElementRef, Session, SessionOptions, WebDriverClient, WebDriverError};
use super::{AutomationWorker, EngineError, DRY_RUN_NOTE};
use crate::cv::MaterializedCv;
use crate::models::ApplicationRow;
use crate::pipeline::state_machine::{AttemptReport, Outcome};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Wait for optional UI (second apply step) that may legitimately be absent.
const OPTIONAL_STEP_TIMEOUT: Duration = Duration::from_secs(3);
/// Extra headroom on each driver round trip beyond the page timeout.
const COMMAND_MARGIN: Duration = Duration::from_secs(30);
const MAX_METADATA_CHARS: usize = 200;
const UPLOAD_FIELD_MISSING: &str = "CV upload field not found";

const SELECT_OPTION_SCRIPT: &str = r#"
const [select, wanted] = arguments;
const needle = String(wanted).toLowerCase();
const option = Array.from(select.options).find(o =>
    o.value.toLowerCase() === needle || o.text.toLowerCase().includes(needle));
if (!option) { return false; }
select.value = option.value;
select.dispatchEvent(new Event('change', { bubbles: true }));
return true;
"#;

const JS_CLICK_SCRIPT: &str = "arguments[0].click(); return true;";

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub webdriver_url: String,
    pub headless: bool,
    /// Pause before every simulated interaction.
    pub slow_mo: Duration,
    /// Bound for page loads and for every element wait.
    pub page_timeout: Duration,
    pub dry_run: bool,
}

/// `AutomationWorker` backed by a WebDriver session that is reused across the
/// records of a run and closed by `shutdown`.
pub struct BrowserWorker {
    driver: WebDriverClient,
    settings: BrowserSettings,
    profile: FormProfile,
    classifier: Arc<dyn OutcomeClassifier>,
    screenshots: ScreenshotStore,
    session: Mutex<Option<Session>>,
}

impl BrowserWorker {
    pub fn new(
        settings: BrowserSettings,
        profile: FormProfile,
        classifier: Arc<dyn OutcomeClassifier>,
        screenshots: ScreenshotStore,
    ) -> Result<Self, WebDriverError> {
        let driver = WebDriverClient::new(&settings.webdriver_url, settings.page_timeout + COMMAND_MARGIN)?;
        Ok(Self {
            driver,
            settings,
            profile,
            classifier,
            screenshots,
            session: Mutex::new(None),
        })
    }

    async fn start_session(&self) -> Result<Session, EngineError> {
        let options = SessionOptions {
            headless: self.settings.headless,
            page_load_timeout: self.settings.page_timeout,
        };
        let session = self
            .driver
            .new_session(&options)
            .await
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        info!(
            "Browser session {} started (headless={})",
            session.id(),
            self.settings.headless
        );
        Ok(session)
    }
}

#[async_trait]
impl AutomationWorker for BrowserWorker {
    async fn submit(
        &self,
        application: &ApplicationRow,
        cv: &MaterializedCv,
    ) -> Result<AttemptReport, EngineError> {
        let mut guard = self.session.lock().await;
        let session = match guard.take() {
            Some(session) => session,
            None => self.start_session().await?,
        };

        let mut attempt = Attempt::new(self, &session, application);
        let result = attempt.run(cv).await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => match failure_outcome(&e) {
                Ok(outcome) => {
                    if attempt.capture(CaptureStep::Error).await.is_err() {
                        let report = attempt.into_report(outcome);
                        discard(session).await;
                        return Ok(report);
                    }
                    outcome
                }
                Err(lost) => {
                    warn!(application_id = %application.id, "Browser session lost: {e}");
                    discard(session).await;
                    return Err(lost);
                }
            },
        };
        let report = attempt.into_report(outcome);
        *guard = Some(session);
        Ok(report)
    }

    async fn shutdown(&self) {
        if let Some(session) = self.session.lock().await.take() {
            let id = session.id().to_string();
            match session.close().await {
                Ok(()) => info!("Browser session {id} closed"),
                Err(e) => warn!("Failed to close browser session {id}: {e}"),
            }
        }
    }
}

async fn discard(session: Session) {
    if let Err(e) = session.close().await {
        debug!("Closing lost session failed: {e}");
    }
}

/// Skip reason for a listing that cannot take an application.
fn listing_outcome(state: &ListingState) -> Option<Outcome> {
    let reason = match state {
        ListingState::Open => return None,
        ListingState::Closed => "Job listing is closed or no longer available",
        ListingState::AlreadyApplied => "Already applied to this job",
        ListingState::ExternalOnly => "Listing only accepts applications on an external site",
    };
    Some(Outcome::skipped(reason))
}

fn verdict_outcome(verdict: SubmissionVerdict) -> Outcome {
    match verdict {
        SubmissionVerdict::Accepted => Outcome::success(),
        SubmissionVerdict::AlreadyApplied => Outcome::skipped("Already applied to this job"),
        SubmissionVerdict::Rejected(signal) => {
            Outcome::failed(format!("Submission rejected: page reported '{signal}'"))
        }
        SubmissionVerdict::Unknown => Outcome::failed("Submission could not be verified"),
    }
}

/// Driver errors that end an attempt. A lost session aborts the run; anything
/// else is a retryable failure of this record.
fn failure_outcome(error: &WebDriverError) -> Result<Outcome, EngineError> {
    if error.is_session_fatal() {
        Err(EngineError::SessionLost(error.to_string()))
    } else if error.is_timeout() {
        Ok(Outcome::failed(format!("Timeout: {error}")))
    } else {
        Ok(Outcome::failed(error.to_string()))
    }
}

/// Keeps non-fatal driver errors out of the control flow.
fn tolerate<T>(result: Result<T, WebDriverError>) -> Result<Option<T>, WebDriverError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_session_fatal() => Err(e),
        Err(e) => {
            debug!("Ignoring WebDriver error: {e}");
            Ok(None)
        }
    }
}

/// Trimmed text when it is longer than `min_chars`, clipped to the metadata limit.
fn clip(text: &str, min_chars: usize) -> Option<String> {
    let text = text.trim();
    if text.chars().count() <= min_chars {
        return None;
    }
    Some(text.chars().take(MAX_METADATA_CHARS).collect())
}

/// State of one application attempt on the shared session.
struct Attempt<'a> {
    worker: &'a BrowserWorker,
    session: &'a Session,
    application: &'a ApplicationRow,
    last_capture: Option<String>,
    job_title: Option<String>,
    company_name: Option<String>,
}

impl<'a> Attempt<'a> {
    fn new(worker: &'a BrowserWorker, session: &'a Session, application: &'a ApplicationRow) -> Self {
        Self {
            worker,
            session,
            application,
            last_capture: None,
            job_title: None,
            company_name: None,
        }
    }

    fn into_report(self, outcome: Outcome) -> AttemptReport {
        info!(
            application_id = %self.application.id,
            outcome = outcome.label(),
            "Attempt finished"
        );
        let mut report = AttemptReport::new(outcome).with_screenshot(self.last_capture);
        report.job_title = self.job_title;
        report.company_name = self.company_name;
        report
    }

    async fn run(&mut self, cv: &MaterializedCv) -> Result<Outcome, WebDriverError> {
        let session = self.session;
        let worker = self.worker;
        let profile = &worker.profile;
        let timeout = worker.settings.page_timeout;

        info!(application_id = %self.application.id, "Opening {}", self.application.job_url);
        session.goto(&self.application.job_url).await?;
        self.dismiss_cookie_banner().await?;
        self.capture(CaptureStep::PageLoaded).await?;
        self.discover_metadata().await?;

        let listing = worker.classifier.listing_state(&session.page_text().await?);
        if let Some(skip) = listing_outcome(&listing) {
            self.capture(CaptureStep::Skipped).await?;
            return Ok(skip);
        }

        if session.find_visible(&profile.form).await?.is_none() {
            let Some(button) = session
                .wait_for_visible(&profile.apply_button, timeout, POLL_INTERVAL)
                .await?
            else {
                self.capture(CaptureStep::ApplyButtonMissing).await?;
                return Ok(Outcome::failed("Apply button not found"));
            };
            self.click(&button).await?;
            self.capture(CaptureStep::AfterApplyClick).await?;

            if !profile.apply_mode.is_empty() {
                if let Some(mode) = session
                    .wait_for_visible(&profile.apply_mode, OPTIONAL_STEP_TIMEOUT, POLL_INTERVAL)
                    .await?
                {
                    self.click(&mode).await?;
                }
            }
        }

        if session
            .wait_for_visible(&profile.form, timeout, POLL_INTERVAL)
            .await?
            .is_none()
        {
            self.capture(CaptureStep::FormMissing).await?;
            return Ok(Outcome::failed("Application form not found"));
        }
        self.capture(CaptureStep::FormVisible).await?;

        if let Some(outcome) = self.fill_form(cv).await? {
            self.capture(CaptureStep::Error).await?;
            return Ok(outcome);
        }
        self.capture(CaptureStep::BeforeSubmit).await?;

        if worker.settings.dry_run {
            info!(application_id = %self.application.id, "Dry run: form filled, not submitting");
            return Ok(Outcome::Success {
                note: Some(DRY_RUN_NOTE.to_string()),
            });
        }

        let Some(submit) = session.find_visible(&profile.submit_button).await? else {
            self.capture(CaptureStep::Error).await?;
            return Ok(Outcome::failed("Submit button not found"));
        };
        self.click(&submit).await?;

        let verdict = self.await_verdict().await?;
        let step = if verdict == SubmissionVerdict::Accepted {
            CaptureStep::Success
        } else {
            CaptureStep::AfterSubmit
        };
        self.capture(step).await?;
        Ok(verdict_outcome(verdict))
    }

    async fn pause(&self) {
        let slow_mo = self.worker.settings.slow_mo;
        if !slow_mo.is_zero() {
            tokio::time::sleep(slow_mo).await;
        }
    }

    /// Native click, falling back to a script click when something overlays the element.
    async fn click(&self, element: &ElementRef) -> Result<(), WebDriverError> {
        self.pause().await;
        match self.session.click(element).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_session_fatal() || e.is_timeout() => Err(e),
            Err(e) => {
                debug!("Native click failed ({e}), using script click");
                self.session
                    .execute(JS_CLICK_SCRIPT, vec![Session::element_arg(element)])
                    .await
                    .map(|_| ())
            }
        }
    }

    async fn dismiss_cookie_banner(&self) -> Result<(), WebDriverError> {
        let banner = tolerate(self.session.find_visible(&self.worker.profile.cookie_accept).await)?;
        if let Some(Some(button)) = banner {
            if tolerate(self.click(&button).await)?.is_some() {
                debug!("Cookie banner dismissed");
            }
        }
        Ok(())
    }

    async fn discover_metadata(&mut self) -> Result<(), WebDriverError> {
        let worker = self.worker;
        let profile = &worker.profile;
        if self.application.job_title.is_none() {
            self.job_title = self.read_text(&profile.job_title, 3).await?;
        }
        if self.application.company_name.is_none() {
            self.company_name = self.read_text(&profile.company_name, 2).await?;
        }
        if self.job_title.is_some() || self.company_name.is_some() {
            debug!(
                application_id = %self.application.id,
                "Discovered job {:?} at {:?}",
                self.job_title,
                self.company_name
            );
        }
        Ok(())
    }

    async fn read_text(&self, selectors: &[String], min_chars: usize) -> Result<Option<String>, WebDriverError> {
        for selector in selectors {
            let Some(Some(element)) = tolerate(self.session.find(selector).await)? else {
                continue;
            };
            if let Some(text) = tolerate(self.session.text(&element).await)? {
                if let Some(text) = clip(&text, min_chars) {
                    return Ok(Some(text));
                }
            }
        }
        Ok(None)
    }

    /// Fills candidate data, attaches the CV and sets consents. Returns an
    /// outcome only when the form cannot take the CV.
    async fn fill_form(&self, cv: &MaterializedCv) -> Result<Option<Outcome>, WebDriverError> {
        let app = self.application;
        let fields = &self.worker.profile.fields;

        self.fill(&fields.first_name, &app.candidate_first_name, "first_name").await?;
        self.fill(&fields.last_name, &app.candidate_last_name, "last_name").await?;
        self.fill(&fields.email, &app.candidate_email, "email").await?;
        if let Some(phone) = app.candidate_phone.as_deref().filter(|p| !p.is_empty()) {
            self.fill(&fields.phone, phone, "phone").await?;
        }
        if let Some(message) = app.candidate_message.as_deref().filter(|m| !m.is_empty()) {
            self.fill(&fields.message, message, "message").await?;
        }
        for (key, value) in app.profile_entries() {
            match self.worker.profile.profile_fields.get(&key) {
                Some(selectors) => self.fill(selectors, &value, &key).await?,
                None => debug!("No selectors configured for profile field '{key}'"),
            }
        }

        // File inputs are frequently styled away, so presence is enough.
        let mut file_input = None;
        for selector in &self.worker.profile.file_input {
            if let Some(Some(element)) = tolerate(self.session.find(selector).await)? {
                file_input = Some(element);
                break;
            }
        }
        let Some(file_input) = file_input else {
            return Ok(Some(Outcome::failed(UPLOAD_FIELD_MISSING)));
        };
        self.pause().await;
        self.session
            .send_keys(&file_input, &cv.path().to_string_lossy())
            .await?;
        info!(
            application_id = %app.id,
            "Attached CV {} ({} bytes)",
            cv.file_name(),
            cv.size()
        );

        let consents = &self.worker.profile.consents;
        self.consent(&consents.privacy, app.accept_privacy, "privacy").await?;
        self.consent(&consents.marketing, app.accept_marketing, "marketing").await?;
        self.consent(&consents.third_party, app.accept_third_party, "third_party").await?;
        self.consent(&consents.cv_database, app.accept_cv_database, "cv_database").await?;
        Ok(None)
    }

    async fn fill(&self, selectors: &[String], value: &str, label: &str) -> Result<(), WebDriverError> {
        let Some(element) = self.session.find_visible(selectors).await? else {
            warn!(application_id = %self.application.id, "No visible field for '{label}'");
            return Ok(());
        };
        self.pause().await;

        if self.session.tag_name(&element).await? == "select" {
            let matched = self
                .session
                .execute(
                    SELECT_OPTION_SCRIPT,
                    vec![Session::element_arg(&element), json!(value)],
                )
                .await?;
            if !matched.as_bool().unwrap_or(false) {
                warn!(application_id = %self.application.id, "No option matching '{value}' for '{label}'");
            }
            return Ok(());
        }

        tolerate(self.session.clear(&element).await)?;
        self.session.send_keys(&element, value).await
    }

    async fn consent(&self, target: &ConsentTarget, accepted: bool, label: &str) -> Result<(), WebDriverError> {
        let selectors = if accepted { &target.accept } else { &target.decline };
        for selector in selectors {
            let Some(Some(element)) = tolerate(self.session.find(selector).await)? else {
                continue;
            };
            if tolerate(self.session.is_selected(&element).await)? != Some(true) {
                self.click(&element).await?;
            }
            debug!("Consent '{label}' set to {accepted}");
            return Ok(());
        }
        if accepted {
            warn!(application_id = %self.application.id, "Consent control for '{label}' not found");
        }
        Ok(())
    }

    /// Polls the page text until the classifier recognises a verdict or the
    /// page timeout elapses.
    async fn await_verdict(&self) -> Result<SubmissionVerdict, WebDriverError> {
        let deadline = tokio::time::Instant::now() + self.worker.settings.page_timeout;
        loop {
            let verdict = match tolerate(self.session.page_text().await)? {
                Some(text) => self.worker.classifier.verdict(&text),
                None => SubmissionVerdict::Unknown,
            };
            if verdict != SubmissionVerdict::Unknown || tokio::time::Instant::now() >= deadline {
                return Ok(verdict);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Captures the page when the screenshot policy wants `step`. Only a lost
    /// session is an error; any other capture problem is logged.
    async fn capture(&mut self, step: CaptureStep) -> Result<(), WebDriverError> {
        let worker = self.worker;
        let store = &worker.screenshots;
        if !store.wants(step) {
            return Ok(());
        }
        let Some(png) = tolerate(self.session.screenshot().await)? else {
            return Ok(());
        };
        let html = tolerate(self.session.source().await)?.unwrap_or_default();
        match store.save(self.application.id, step, png, html).await {
            Ok(path) => self.last_capture = Some(path.to_string_lossy().into_owned()),
            Err(e) => warn!(application_id = %self.application.id, "Failed to save screenshot: {e:#}"),
        }
        Ok(())
    }
}
