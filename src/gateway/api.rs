//! Raw gateway calls with pacing, retry and error classification

use reqwest::multipart::Form;
use reqwest::{Client, RequestBuilder};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::retry::{classify, delay_for_attempt, is_recoverable};
use super::types::GatewayResponse;
use crate::{Error, Result};

impl super::GatewayClient {
    /// Call a gateway method with a JSON body
    ///
    /// # Errors
    ///
    /// Returns `Error::RateLimited`, `Error::SessionInvalid` or
    /// `Error::Gateway` once retries are exhausted
    pub(crate) async fn call<B, T>(&self, method: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(method, |client, url| client.post(url).json(body))
            .await
    }

    /// Call a gateway method with a multipart body
    ///
    /// `form` is invoked once per attempt since forms cannot be reused.
    ///
    /// # Errors
    ///
    /// Same as [`Self::call`]
    pub(crate) async fn call_multipart<T, F>(&self, method: &str, form: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn() -> Form + Send + Sync,
    {
        self.execute(method, |client, url| client.post(url).multipart(form()))
            .await
    }

    /// Download a file by its gateway file path
    ///
    /// # Errors
    ///
    /// Returns `Error::Gateway` if the download fails
    pub(crate) async fn download_file(&self, file_path: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/file/bot{}/{file_path}",
            self.base_url,
            self.token.expose_secret()
        );

        self.limiter.until_ready().await;
        let client = self.client()?;
        let response = client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| Error::Gateway(format!("file download error: {}", e.without_url())))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, &body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Gateway(format!("file read error: {}", e.without_url())))?;
        tracing::debug!(bytes = bytes.len(), "file downloaded");
        Ok(bytes.to_vec())
    }

    async fn execute<T, F>(&self, method: &str, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn(&Client, &str) -> RequestBuilder + Send + Sync,
    {
        let url = format!(
            "{}/bot{}/{method}",
            self.base_url,
            self.token.expose_secret()
        );
        let mut attempt = 0u32;

        loop {
            self.limiter.until_ready().await;
            let client = self.client()?;

            let failure = match build(&client, &url)
                .timeout(self.request_timeout)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.map_err(|e| {
                        Error::Gateway(format!("{method}: response read error: {}", e.without_url()))
                    })?;

                    if (200..300).contains(&status) {
                        return parse_envelope(method, &body);
                    }
                    if attempt >= self.retry.max_retries || !is_recoverable(status, &body) {
                        return Err(classify(status, &body));
                    }
                    format!("status {status}")
                }
                Err(e) => {
                    let e = e.without_url();
                    let transient = e.is_timeout() || e.is_connect() || e.is_request();
                    if attempt >= self.retry.max_retries || !transient {
                        return Err(Error::Gateway(format!("{method}: {e}")));
                    }
                    e.to_string()
                }
            };

            let delay = delay_for_attempt(&self.retry, attempt);
            tracing::warn!(
                method,
                attempt = attempt + 1,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %failure,
                "gateway call failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Unwrap the `{ok, result}` envelope
fn parse_envelope<T: DeserializeOwned>(method: &str, body: &str) -> Result<T> {
    let parsed: GatewayResponse<T> = serde_json::from_str(body)
        .map_err(|e| Error::Gateway(format!("{method}: response parse error: {e}")))?;

    match parsed.result {
        Some(result) if parsed.ok => Ok(result),
        _ => {
            let code = parsed.error_code.unwrap_or(400);
            tracing::debug!(method, code, description = ?parsed.description, "gateway reported failure");
            Err(classify(code, body))
        }
    }
}
