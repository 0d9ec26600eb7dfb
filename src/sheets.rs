use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, RequestBuilder, Response, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::errors::{AppError, AppResult};
use crate::records::ApplicationTable;

const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const ERROR_BODY_LIMIT: usize = 300;

pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key_id: Option<String>,
    pub token_uri: Option<String>,
    private_key: SecretString,
}

#[derive(Deserialize)]
struct ServiceAccountKeyRaw {
    client_email: String,
    private_key: String,
    #[serde(default)]
    private_key_id: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> AppResult<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(AppError::Auth(format!(
                    "service account file {} not found",
                    path.display()
                )))
            }
            Err(err) => {
                return Err(AppError::Auth(format!(
                    "cannot read service account file {}: {err}",
                    path.display()
                )))
            }
        };
        let raw: ServiceAccountKeyRaw = serde_json::from_str(&contents)
            .map_err(|err| AppError::Auth(format!("invalid service account file: {err}")))?;
        Ok(Self {
            client_email: raw.client_email,
            private_key_id: raw.private_key_id,
            token_uri: raw.token_uri,
            private_key: SecretString::new(raw.private_key.into()),
        })
    }
}

#[derive(Clone)]
pub struct Session {
    access_token: SecretString,
    expires_at: DateTime<Utc>,
}

impl Session {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    fn is_expired(&self) -> bool {
        let buffer = Duration::minutes(5);
        Utc::now() + buffer >= self.expires_at
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenSuccessResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct ValueRangeResponse {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Clone)]
pub struct SheetsClient {
    http: Client,
    api_base: String,
    token_endpoint: Option<String>,
    timeout_secs: u64,
}

impl SheetsClient {
    pub fn new(config: &RuntimeConfig) -> AppResult<Self> {
        let http = Client::builder()
            .user_agent(concat!("apptrack/", env!("CARGO_PKG_VERSION")))
            .timeout(config.remote_timeout())
            .build()?;
        Ok(Self {
            http,
            api_base: config.sheets_api_base.trim_end_matches('/').to_string(),
            token_endpoint: config.token_endpoint.clone(),
            timeout_secs: config.remote_timeout_secs,
        })
    }

    pub async fn authenticate(&self, credentials_path: &Path) -> AppResult<Session> {
        let key = ServiceAccountKey::from_file(credentials_path)?;
        let token_uri = self
            .token_endpoint
            .clone()
            .or_else(|| key.token_uri.clone())
            .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string());

        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &key.client_email,
            scope: SHEETS_SCOPE,
            aud: &token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = key.private_key_id.clone();
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.expose_secret().as_bytes())
            .map_err(|err| AppError::Auth(format!("invalid service account private key: {err}")))?;
        let assertion = encode(&header, &claims, &signing_key)?;

        let response = self
            .send(
                self.http
                    .post(&token_uri)
                    .form(&[("grant_type", JWT_GRANT_TYPE), ("assertion", assertion.as_str())]),
            )
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Auth(format!(
                "token exchange rejected ({status}): {}",
                truncate(&body)
            )));
        }
        let token: TokenSuccessResponse = response.json().await?;
        debug!(
            target: "sheets",
            account = %key.client_email,
            expires_in = token.expires_in,
            "obtained sheets access token"
        );
        Ok(Session {
            access_token: SecretString::new(token.access_token.into()),
            expires_at: Utc::now() + Duration::seconds(token.expires_in as i64),
        })
    }

    /// Swallowing variant used where a failed read must look like an empty
    /// sheet.
    pub async fn read_all(
        &self,
        session: &Session,
        spreadsheet_id: &str,
        range: &str,
    ) -> ApplicationTable {
        match self.try_read_all(session, spreadsheet_id, range).await {
            Ok(table) => table,
            Err(err) => {
                warn!(target: "sheets", ?err, "reading google sheet failed; treating as empty");
                ApplicationTable::new()
            }
        }
    }

    pub async fn try_read_all(
        &self,
        session: &Session,
        spreadsheet_id: &str,
        range: &str,
    ) -> AppResult<ApplicationTable> {
        let url = self.values_url(spreadsheet_id, range)?;
        let response = self
            .send(self.http.get(url).bearer_auth(session.access_token.expose_secret()))
            .await?;
        let response = check(response, "values.get").await?;
        let body: ValueRangeResponse = response.json().await?;
        if body.values.is_empty() {
            debug!(target: "sheets", "no data found in google sheet");
            return Ok(ApplicationTable::new());
        }
        let grid: Vec<Vec<String>> = body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect();
        ApplicationTable::from_grid(&grid)
            .map_err(|err| AppError::RemoteCall(format!("sheet contents invalid: {err}")))
    }

    /// Clears `range`, then writes the header and every row from its origin.
    /// Not atomic: a failure between the two calls leaves the range empty.
    pub async fn overwrite_all(
        &self,
        session: &Session,
        spreadsheet_id: &str,
        range: &str,
        table: &ApplicationTable,
    ) -> AppResult<()> {
        let token = session.access_token.expose_secret();

        let clear_url = self.values_url_with_suffix(spreadsheet_id, range, ":clear")?;
        let response = self
            .send(self.http.post(clear_url).bearer_auth(token).json(&json!({})))
            .await?;
        check(response, "values.clear").await?;

        let mut update_url = self.values_url(spreadsheet_id, range)?;
        update_url
            .query_pairs_mut()
            .append_pair("valueInputOption", "RAW");
        let body = json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": table.to_grid(),
        });
        let response = self
            .send(self.http.put(update_url).bearer_auth(token).json(&body))
            .await?;
        check(response, "values.update").await?;

        info!(target: "sheets", rows = table.len(), "google sheet overwritten");
        Ok(())
    }

    /// Structural delete of one 1-based row (the header is row 1).
    pub async fn delete_row(
        &self,
        session: &Session,
        spreadsheet_id: &str,
        sheet_id: i64,
        row_index: usize,
    ) -> AppResult<()> {
        if row_index == 0 {
            return Err(AppError::Validation("sheet rows are numbered from 1".into()));
        }
        let mut url = self.api_url()?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config("invalid Sheets API base".into()))?
            .push("spreadsheets")
            .push(&format!("{spreadsheet_id}:batchUpdate"));
        let body = json!({
            "requests": [{
                "deleteDimension": {
                    "range": {
                        "sheetId": sheet_id,
                        "dimension": "ROWS",
                        "startIndex": row_index - 1,
                        "endIndex": row_index,
                    }
                }
            }]
        });
        let response = self
            .send(
                self.http
                    .post(url)
                    .bearer_auth(session.access_token.expose_secret())
                    .json(&body),
            )
            .await?;
        check(response, "spreadsheets.batchUpdate").await?;
        info!(target: "sheets", row_index, "row deleted from google sheet");
        Ok(())
    }

    async fn send(&self, request: RequestBuilder) -> AppResult<Response> {
        request.send().await.map_err(|err| {
            if err.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else {
                AppError::from(err)
            }
        })
    }

    fn api_url(&self) -> AppResult<Url> {
        Url::parse(&self.api_base)
            .map_err(|err| AppError::Config(format!("invalid Sheets API base URL: {err}")))
    }

    fn values_url(&self, spreadsheet_id: &str, range: &str) -> AppResult<Url> {
        self.values_url_with_suffix(spreadsheet_id, range, "")
    }

    fn values_url_with_suffix(
        &self,
        spreadsheet_id: &str,
        range: &str,
        suffix: &str,
    ) -> AppResult<Url> {
        let mut url = self.api_url()?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config("invalid Sheets API base".into()))?
            .push("spreadsheets")
            .push(spreadsheet_id)
            .push("values")
            .push(&format!("{range}{suffix}"));
        Ok(url)
    }
}

async fn check(response: Response, operation: &str) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AppError::RemoteCall(format!(
        "{operation} failed ({status}): {}",
        truncate(&body)
    )))
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(ERROR_BODY_LIMIT).collect()
}

#[async_trait]
pub trait RemoteTable: Send + Sync {
    async fn read_all(&self) -> AppResult<ApplicationTable>;
    async fn overwrite_all(&self, table: &ApplicationTable) -> AppResult<()>;
    /// `row_index` is 1-based and counts the header row.
    async fn delete_row(&self, row_index: usize) -> AppResult<()>;
}

/// [`RemoteTable`] backed by Google Sheets. Authenticates lazily and again
/// whenever the cached token is about to expire.
pub struct SheetsRemote {
    client: SheetsClient,
    credentials_path: PathBuf,
    spreadsheet_id: String,
    range: String,
    sheet_id: i64,
    session: AsyncMutex<Option<Session>>,
}

impl SheetsRemote {
    pub fn new(
        client: SheetsClient,
        credentials_path: impl Into<PathBuf>,
        spreadsheet_id: impl Into<String>,
        range: impl Into<String>,
        sheet_id: i64,
    ) -> Self {
        Self {
            client,
            credentials_path: credentials_path.into(),
            spreadsheet_id: spreadsheet_id.into(),
            range: range.into(),
            sheet_id,
            session: AsyncMutex::new(None),
        }
    }

    async fn session(&self) -> AppResult<Session> {
        let mut cached = self.session.lock().await;
        if let Some(session) = cached.as_ref().filter(|session| !session.is_expired()) {
            return Ok(session.clone());
        }
        let session = self.client.authenticate(&self.credentials_path).await?;
        debug!(target: "sheets", expires_at = %session.expires_at(), "sheets session refreshed");
        *cached = Some(session.clone());
        Ok(session)
    }
}

#[async_trait]
impl RemoteTable for SheetsRemote {
    async fn read_all(&self) -> AppResult<ApplicationTable> {
        let session = self.session().await?;
        self.client
            .try_read_all(&session, &self.spreadsheet_id, &self.range)
            .await
    }

    async fn overwrite_all(&self, table: &ApplicationTable) -> AppResult<()> {
        let session = self.session().await?;
        self.client
            .overwrite_all(&session, &self.spreadsheet_id, &self.range, table)
            .await
    }

    async fn delete_row(&self, row_index: usize) -> AppResult<()> {
        let session = self.session().await?;
        self.client
            .delete_row(&session, &self.spreadsheet_id, self.sheet_id, row_index)
            .await
    }
}
