use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result, RowsOp};
use crate::session::SessionContext;

/// Postgres unique-violation, the code behind a duplicate like.
const UNIQUE_VIOLATION: &str = "23505";

/// Client for the row API under `/rest/v1`. Queries are built with
/// [`RowsClient::from`] in the same shape the table endpoints expect:
/// filters become query parameters, writes go through `Prefer` headers.
pub struct RowsClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    session: SessionContext,
}

impl RowsClient {
    pub fn new(
        http: reqwest::Client,
        base_url: String,
        anon_key: String,
        session: SessionContext,
    ) -> Self {
        Self {
            http,
            base_url,
            anon_key,
            session,
        }
    }

    /// Start a query against one table.
    pub fn from(&self, table: &str) -> Query {
        Query {
            http: self.http.clone(),
            url: format!("{}/rest/v1/{}", self.base_url, table),
            anon_key: self.anon_key.clone(),
            session: self.session.clone(),
            select: None,
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    /// Call a database function under `/rest/v1/rpc`.
    pub async fn rpc(&self, function: &str, args: Value) -> Result<Value> {
        let token = self.bearer().await;
        let response = self
            .http
            .post(format!("{}/rest/v1/rpc/{}", self.base_url, function))
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .json(&args)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(error_from(RowsOp::Write, status, response.json().await.ok()));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Decode(format!("rpc {function} response: {e}")))
    }

    async fn bearer(&self) -> String {
        self.session
            .access_token()
            .await
            .unwrap_or_else(|| self.anon_key.clone())
    }
}

/// One pending table request. Filters accumulate in call order.
pub struct Query {
    http: reqwest::Client,
    url: String,
    anon_key: String,
    session: SessionContext,
    select: Option<String>,
    filters: Vec<(String, String)>,
    order: Option<String>,
    limit: Option<usize>,
}

impl Query {
    pub fn select(mut self, columns: &str) -> Self {
        self.select = Some(columns.to_string());
        self
    }

    pub fn eq(mut self, column: &str, value: &str) -> Self {
        self.filters.push((column.to_string(), format!("eq.{value}")));
        self
    }

    /// Case-insensitive substring match on one column.
    pub fn ilike(mut self, column: &str, needle: &str) -> Self {
        self.filters
            .push((column.to_string(), format!("ilike.*{needle}*")));
        self
    }

    /// Rows where the column contains any of the needles, as a single
    /// disjunction parameter.
    pub fn or_ilike(mut self, column: &str, needles: &[String]) -> Self {
        let clauses: Vec<String> = needles
            .iter()
            .map(|needle| format!("{column}.ilike.*{needle}*"))
            .collect();
        self.filters
            .push(("or".to_string(), format!("({})", clauses.join(","))));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        let direction = if ascending { "asc" } else { "desc" };
        self.order = Some(format!("{column}.{direction}"));
        self
    }

    pub fn limit(mut self, count: usize) -> Self {
        self.limit = Some(count);
        self
    }

    fn params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(select) = &self.select {
            params.push(("select".to_string(), select.clone()));
        }
        params.extend(self.filters.iter().cloned());
        if let Some(order) = &self.order {
            params.push(("order".to_string(), order.clone()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }

    async fn bearer(&self) -> String {
        self.session
            .access_token()
            .await
            .unwrap_or_else(|| self.anon_key.clone())
    }

    pub async fn fetch<T: DeserializeOwned>(self) -> Result<Vec<T>> {
        let token = self.bearer().await;
        let response = self
            .http
            .get(&self.url)
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .query(&self.params())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(error_from(RowsOp::Read, status, response.json().await.ok()));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Decode(format!("row response: {e}")))
    }

    /// First row of the query, if any.
    pub async fn fetch_one<T: DeserializeOwned>(self) -> Result<Option<T>> {
        let rows: Vec<T> = self.limit(1).fetch().await?;
        Ok(rows.into_iter().next())
    }

    /// Insert without reading the row back.
    pub async fn insert<T: Serialize>(self, row: &T) -> Result<()> {
        let token = self.bearer().await;
        let response = self
            .http
            .post(&self.url)
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .header("Prefer", "return=minimal")
            .json(row)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(error_from(RowsOp::Write, status, response.json().await.ok()));
        }
        Ok(())
    }

    /// Insert and read back the stored row, generated columns included.
    pub async fn insert_returning<T: Serialize, R: DeserializeOwned>(self, row: &T) -> Result<R> {
        let token = self.bearer().await;
        let response = self
            .http
            .post(&self.url)
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .header("Prefer", "return=representation")
            .header("Accept", "application/vnd.pgrst.object+json")
            .json(row)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(error_from(RowsOp::Write, status, response.json().await.ok()));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Decode(format!("inserted row response: {e}")))
    }

    /// Delete every row matching the filters. Matching nothing is not an
    /// error, which is what makes removing an absent like a no-op.
    pub async fn delete(self) -> Result<()> {
        let token = self.bearer().await;
        let response = self
            .http
            .delete(&self.url)
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .query(&self.params())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(error_from(RowsOp::Write, status, response.json().await.ok()));
        }
        Ok(())
    }
}

#[derive(Debug, serde::Deserialize)]
struct RowsErrorBody {
    code: Option<String>,
    message: Option<String>,
}

fn error_from(op: RowsOp, status: StatusCode, body: Option<RowsErrorBody>) -> Error {
    let code = body.as_ref().and_then(|b| b.code.clone());
    let message = body
        .and_then(|b| b.message)
        .unwrap_or_else(|| status.to_string());
    if status == StatusCode::CONFLICT || code.as_deref() == Some(UNIQUE_VIOLATION) {
        return Error::Conflict(message);
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::AuthRequired,
        _ => Error::Rows {
            op,
            detail: format!("HTTP {}: {message}", status.as_u16()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn client() -> RowsClient {
        RowsClient::new(
            reqwest::Client::new(),
            "https://example.supabase.co".into(),
            "anon".into(),
            SessionContext::new(),
        )
    }

    #[test]
    fn search_query_builds_ilike_order_and_limit() {
        let query = client()
            .from("images")
            .select("*")
            .ilike("tags", "paris")
            .order("created_at", false)
            .limit(5);
        assert_eq!(query.url, "https://example.supabase.co/rest/v1/images");
        assert_eq!(
            query.params(),
            vec![
                ("select".to_string(), "*".to_string()),
                ("tags".to_string(), "ilike.*paris*".to_string()),
                ("order".to_string(), "created_at.desc".to_string()),
                ("limit".to_string(), "5".to_string()),
            ]
        );
    }

    #[test]
    fn or_ilike_builds_one_disjunction_parameter() {
        let tags = vec!["paris".to_string(), "wine".to_string()];
        let query = client().from("images").or_ilike("tags", &tags);
        assert_eq!(
            query.params(),
            vec![(
                "or".to_string(),
                "(tags.ilike.*paris*,tags.ilike.*wine*)".to_string()
            )]
        );
    }

    #[test]
    fn unique_violation_maps_to_conflict() {
        let body = RowsErrorBody {
            code: Some(UNIQUE_VIOLATION.to_string()),
            message: Some("duplicate key value violates unique constraint".into()),
        };
        let err = error_from(RowsOp::Write, StatusCode::CONFLICT, Some(body));
        assert_eq!(err.kind(), ErrorKind::Conflict);

        // some deployments answer 409 without a body
        let err = error_from(RowsOp::Write, StatusCode::CONFLICT, None);
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn auth_failures_map_to_permission() {
        let err = error_from(RowsOp::Read, StatusCode::UNAUTHORIZED, None);
        assert_eq!(err.kind(), ErrorKind::Permission);
        let err = error_from(RowsOp::Read, StatusCode::INTERNAL_SERVER_ERROR, None);
        assert_eq!(err.kind(), ErrorKind::Network);
    }

    #[test]
    fn failed_reads_and_writes_carry_their_own_copy() {
        let read = error_from(RowsOp::Read, StatusCode::INTERNAL_SERVER_ERROR, None);
        assert_eq!(
            read.user_message(),
            "Failed to load image information. Please try again."
        );
        let write = error_from(RowsOp::Write, StatusCode::INTERNAL_SERVER_ERROR, None);
        assert_eq!(
            write.user_message(),
            "Failed to save image information. Please try again."
        );
    }
}
