//! Clients for the hosted backend: auth tokens, table rows, object storage.
//! All three share one HTTP client and the same session handle, so a sign-in
//! through [`AuthClient`] is immediately visible to the other two.

mod auth;
mod rows;
mod storage;

pub use auth::{AuthClient, SignUpOutcome};
pub use rows::{Query, RowsClient};
pub use storage::{ObjectStore, SupabaseStorage, UploadOptions};

use crate::config::Config;
use crate::session::SessionContext;

pub struct Backend {
    pub auth: AuthClient,
    pub rows: RowsClient,
    pub storage: SupabaseStorage,
}

impl Backend {
    pub fn new(http: reqwest::Client, config: &Config, session: SessionContext) -> Self {
        let url = config.backend.url.trim_end_matches('/').to_string();
        let key = config.backend.anon_key.clone();
        Self {
            auth: AuthClient::new(http.clone(), url.clone(), key.clone(), session.clone()),
            rows: RowsClient::new(http.clone(), url.clone(), key.clone(), session.clone()),
            storage: SupabaseStorage::new(http, url, key, session),
        }
    }
}
