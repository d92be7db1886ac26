use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Selector candidates and page-text signals describing how to drive an
/// application form.
///
/// Every list is tried in order and the first visible match wins. Selectors are
/// CSS unless prefixed with `xpath:`. The built-in default targets common
/// English and Italian job boards; a JSON file can replace any subset of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FormProfile {
    pub cookie_accept: Vec<String>,
    /// Button that reveals the application form.
    pub apply_button: Vec<String>,
    /// Optional second step after the apply button (e.g. "apply directly" in a modal).
    pub apply_mode: Vec<String>,
    /// Any visible match means the form is ready to fill.
    pub form: Vec<String>,
    pub fields: FieldSelectors,
    /// `candidate_profile` key → selectors of the field that receives its value.
    pub profile_fields: BTreeMap<String, Vec<String>>,
    pub file_input: Vec<String>,
    pub consents: ConsentSelectors,
    pub submit_button: Vec<String>,
    pub job_title: Vec<String>,
    pub company_name: Vec<String>,
    pub signals: SignalPatterns,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldSelectors {
    pub first_name: Vec<String>,
    pub last_name: Vec<String>,
    pub email: Vec<String>,
    pub phone: Vec<String>,
    pub message: Vec<String>,
}

/// Where to click to give, or refuse, one consent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsentTarget {
    pub accept: Vec<String>,
    pub decline: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsentSelectors {
    pub privacy: ConsentTarget,
    pub marketing: ConsentTarget,
    pub third_party: ConsentTarget,
    pub cv_database: ConsentTarget,
}

/// Lowercase substrings matched against the visible page text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalPatterns {
    pub closed: Vec<String>,
    /// The only signals treated as a duplicate submission.
    pub already_applied: Vec<String>,
    /// The listing accepts applications only on another site.
    pub external_only: Vec<String>,
    pub success: Vec<String>,
    pub error: Vec<String>,
}

impl Default for SignalPatterns {
    fn default() -> Self {
        Self {
            closed: strings(&[
                "no longer accepting applications",
                "this job is no longer available",
                "this position has been filled",
                "job has expired",
                "offerta scaduta",
                "annuncio scaduto",
                "offerta non più disponibile",
                "annuncio non è più disponibile",
            ]),
            already_applied: strings(&[
                "you have already applied",
                "already applied to this job",
                "hai già inviato la tua candidatura",
                "ti sei già candidato",
                "candidatura già inviata",
            ]),
            external_only: strings(&[
                "apply on company website",
                "candidati sul sito dell'azienda",
            ]),
            success: strings(&[
                "thank you for applying",
                "thank you for your application",
                "application has been submitted",
                "application received",
                "grazie per la tua candidatura",
                "candidatura inviata",
                "candidatura ricevuta",
                "candidatura è stata inviata",
            ]),
            error: strings(&[
                "an error occurred",
                "please correct the errors",
                "this field is required",
                "si è verificato un errore",
                "campo obbligatorio",
                "errore durante l'invio",
            ]),
        }
    }
}

impl Default for FormProfile {
    fn default() -> Self {
        let mut consents = ConsentSelectors::default();
        consents.privacy.accept = strings(&[
            "input[name='consenso']",
            "input[name*='privacy']",
            "input[type='checkbox'][name*='consent']",
        ]);
        consents.marketing = ConsentTarget {
            accept: strings(&["input[name='consensonl'][value='1']", "input[name*='marketing'][value='1']"]),
            decline: strings(&["input[name='consensonl'][value='0']", "input[name*='marketing'][value='0']"]),
        };
        consents.third_party = ConsentTarget {
            accept: strings(&["input[name='consensoterzi'][value='1']"]),
            decline: strings(&["input[name='consensoterzi'][value='0']"]),
        };
        consents.cv_database = ConsentTarget {
            accept: strings(&["input[name='deposito'][value='1']"]),
            decline: strings(&["input[name='deposito'][value='0']"]),
        };

        Self {
            cookie_accept: strings(&[
                "#onetrust-accept-btn-handler",
                "#accept-choices",
                ".fc-consent-root .fc-cta-consent",
                "button.cookie-accept",
                "#cookie-accept",
                "xpath://button[contains(., 'Accept all') or contains(., 'Accetta tutti')]",
            ]),
            apply_button: strings(&[
                "a.btn-inviacandidatura",
                "[data-testid='apply-button']",
                "button.apply-button",
                "a.apply-button",
                "xpath://a[contains(., 'Apply now') or contains(., 'Candidati subito') or contains(., \"Rispondi all'offerta\")]",
                "xpath://button[contains(., 'Apply') or contains(., 'Candidati')]",
            ]),
            apply_mode: strings(&[
                "a[href='#collapseDiretta']",
                "xpath://a[contains(., 'Candidatura diretta') or contains(., 'Apply directly')]",
            ]),
            form: strings(&[
                "#frmOfferta input[name='nome']",
                "form#application-form",
                "form.application-form",
                "form input[type='file']",
            ]),
            fields: FieldSelectors {
                first_name: strings(&[
                    "input[name='nome']",
                    "input[name='first_name']",
                    "input[name*='firstname' i]",
                    "input[autocomplete='given-name']",
                ]),
                last_name: strings(&[
                    "input[name='cognome']",
                    "input[name='last_name']",
                    "input[name*='lastname' i]",
                    "input[autocomplete='family-name']",
                ]),
                email: strings(&["form input[type='email']", "input[name='email']"]),
                phone: strings(&[
                    "input[name='cellulare']",
                    "input[type='tel']",
                    "input[name*='phone' i]",
                ]),
                message: strings(&[
                    "textarea[name='presentazione']",
                    "textarea[name*='cover' i]",
                    "textarea[name*='message' i]",
                    "form textarea",
                ]),
            },
            profile_fields: BTreeMap::new(),
            file_input: strings(&[
                "input[type='file']",
                "input[name*='cv' i]",
                "input[name*='curriculum' i]",
                "input[accept*='pdf']",
            ]),
            consents,
            submit_button: strings(&[
                "#frmOfferta button[type='submit']",
                "form button[type='submit']",
                "form input[type='submit']",
                "xpath://button[contains(., 'Invia candidatura') or contains(., 'Submit application')]",
            ]),
            job_title: strings(&["h1.job-title", ".titolo-offerta", "h1"]),
            company_name: strings(&[".company-name", ".azienda", "[class*='company']"]),
            signals: SignalPatterns::default(),
        }
    }
}

impl FormProfile {
    /// Built-in profile, or the JSON file at `path` layered over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read form profile {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Invalid form profile {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
