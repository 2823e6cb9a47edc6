//! Upstream portal models
//!
//! Types exchanged with the portal collaborator and the payload layout the
//! gateway keeps inside a session.

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::{SessionPayload, SessionRecord};

/// Default account type for direct logins (student)
pub const DEFAULT_ACCOUNT_TYPE: u8 = 3;

/// Days covered by a homework query without an explicit end date
const HOMEWORK_WINDOW_DAYS: u64 = 14;

/// Days covered by a timetable query without an explicit end date
const TIMETABLE_WINDOW_DAYS: u64 = 7;

/// How the upstream login is performed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "auth_type", rename_all = "lowercase")]
pub enum LoginMode {
    /// Portal identity and password
    Direct {
        /// 1 = teacher, 2 = parent, 3 = student
        account_type: u8,
    },
    /// Regional identity provider (CAS)
    Cas {
        /// Provider id, see `upstream::SUPPORTED_PROVIDERS`
        provider: String,
    },
}

impl Default for LoginMode {
    fn default() -> Self {
        Self::Direct {
            account_type: DEFAULT_ACCOUNT_TYPE,
        }
    }
}

/// Raw upstream credentials presented at login
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalLogin {
    /// Full portal URL
    pub portal_url: String,
    /// Portal or identity-provider username
    pub username: String,
    /// Password
    pub secret: String,
    /// Login mode
    #[serde(default)]
    pub mode: LoginMode,
}

impl fmt::Debug for PortalLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortalLogin")
            .field("portal_url", &self.portal_url)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("mode", &self.mode)
            .finish()
    }
}

impl PortalLogin {
    /// Direct login with the default account type
    pub fn direct(
        portal_url: impl Into<String>,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            portal_url: portal_url.into(),
            username: username.into(),
            secret: secret.into(),
            mode: LoginMode::default(),
        }
    }

    /// Login through a CAS identity provider
    pub fn cas(
        portal_url: impl Into<String>,
        username: impl Into<String>,
        secret: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            portal_url: portal_url.into(),
            username: username.into(),
            secret: secret.into(),
            mode: LoginMode::Cas {
                provider: provider.into(),
            },
        }
    }

    /// Check the request shape before anything is sent upstream.
    ///
    /// Returns a human-readable reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        if !self.portal_url.starts_with("https://") {
            return Err("Portal URL must start with https://".to_string());
        }
        if self.username.trim().is_empty() {
            return Err("Username is required".to_string());
        }
        if self.secret.is_empty() {
            return Err("Password is required".to_string());
        }
        match &self.mode {
            LoginMode::Direct { account_type } => {
                let url = self.portal_url.to_lowercase();
                if !url.contains("index-education.net") && !url.contains("pronote") {
                    return Err("Portal URL does not point at a portal instance".to_string());
                }
                if !(1..=3).contains(account_type) {
                    return Err(format!("Unknown account type {}", account_type));
                }
            }
            LoginMode::Cas { provider } => {
                if provider.trim().is_empty() {
                    return Err("Identity provider is required".to_string());
                }
            }
        }
        Ok(())
    }

    /// Derive the user id bound into the session and its credentials
    pub fn user_id_for(&self, facts: &SessionFacts) -> String {
        match &self.mode {
            LoginMode::Direct { .. } => format!("{}_{}", self.username, facts.correlation_id),
            LoginMode::Cas { provider } => {
                format!("{}_{}_{}", self.username, provider, facts.correlation_id)
            }
        }
    }
}

/// Facts returned by a successful upstream login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFacts {
    /// Student display name
    pub display_name: String,
    /// Class or organizational unit
    #[serde(default)]
    pub unit: Option<String>,
    /// School name
    #[serde(default)]
    pub establishment: Option<String>,
    /// Upstream connection id
    pub correlation_id: String,
}

/// Everything the gateway keeps in a session to log in again later
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalPayload {
    pub portal_url: String,
    pub username: String,
    /// Kept so that re-authentication works on a cold session; the session
    /// store only persists the payload encrypted.
    pub secret: String,
    pub mode: LoginMode,
    pub session_info: SessionFacts,
}

impl fmt::Debug for PortalPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortalPayload")
            .field("portal_url", &self.portal_url)
            .field("username", &self.username)
            .field("mode", &self.mode)
            .field("session_info", &self.session_info)
            .finish_non_exhaustive()
    }
}

impl PortalPayload {
    pub fn new(login: PortalLogin, session_info: SessionFacts) -> Self {
        Self {
            portal_url: login.portal_url,
            username: login.username,
            secret: login.secret,
            mode: login.mode,
            session_info,
        }
    }

    /// The login that reproduces this session upstream
    pub fn login(&self) -> PortalLogin {
        PortalLogin {
            portal_url: self.portal_url.clone(),
            username: self.username.clone(),
            secret: self.secret.clone(),
            mode: self.mode.clone(),
        }
    }

    pub fn to_session_payload(&self) -> Result<SessionPayload, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(self)?)
    }

    pub fn from_session(record: &SessionRecord) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(record.payload.clone()))
    }
}

/// A read against the portal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PortalQuery {
    /// Assignments due in a date range
    Homework {
        #[serde(default)]
        from: Option<NaiveDate>,
        #[serde(default)]
        to: Option<NaiveDate>,
    },
    /// Lessons in a date range
    Timetable {
        #[serde(default)]
        from: Option<NaiveDate>,
        #[serde(default)]
        to: Option<NaiveDate>,
    },
    /// Grades, optionally restricted to one period
    Grades {
        #[serde(default)]
        period: Option<String>,
    },
}

impl PortalQuery {
    pub fn kind(&self) -> &'static str {
        match self {
            PortalQuery::Homework { .. } => "homework",
            PortalQuery::Timetable { .. } => "timetable",
            PortalQuery::Grades { .. } => "grades",
        }
    }

    /// Fill in missing date bounds relative to `today`.
    ///
    /// Homework starts today and spans two weeks; the timetable starts on
    /// the Monday of the current week and spans one week. An explicit start
    /// date moves the default end date along with it.
    ///
    /// Returns a human-readable reason when a default end date falls
    /// outside the supported calendar.
    pub fn with_defaults(self, today: NaiveDate) -> Result<Self, String> {
        match self {
            PortalQuery::Homework { from, to } => {
                let from = from.unwrap_or(today);
                let to = match to {
                    Some(to) => to,
                    None => window_end(from, HOMEWORK_WINDOW_DAYS)?,
                };
                Ok(PortalQuery::Homework {
                    from: Some(from),
                    to: Some(to),
                })
            }
            PortalQuery::Timetable { from, to } => {
                let from = match from {
                    Some(from) => from,
                    None => today
                        .checked_sub_days(Days::new(u64::from(
                            today.weekday().num_days_from_monday(),
                        )))
                        .ok_or_else(|| format!("No Monday before {}", today))?,
                };
                let to = match to {
                    Some(to) => to,
                    None => window_end(from, TIMETABLE_WINDOW_DAYS)?,
                };
                Ok(PortalQuery::Timetable {
                    from: Some(from),
                    to: Some(to),
                })
            }
            grades @ PortalQuery::Grades { .. } => Ok(grades),
        }
    }
}

fn window_end(from: NaiveDate, days: u64) -> Result<NaiveDate, String> {
    from.checked_add_days(Days::new(days))
        .ok_or_else(|| format!("Date range starting {} is out of range", from))
}

/// Records returned for one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    pub kind: String,
    pub records: Vec<Value>,
    pub count: usize,
}

impl FetchResult {
    pub fn new(kind: &str, records: Vec<Value>) -> Self {
        Self {
            kind: kind.to_string(),
            count: records.len(),
            records,
        }
    }
}
