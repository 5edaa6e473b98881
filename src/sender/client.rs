use crate::error::{ConfigError, Error};
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use std::time::Duration;
use url::Url;

/// Thin wrapper around `reqwest` that knows the batch endpoint, the write
/// key and the library user agent.
#[derive(Debug, Clone)]
pub struct HttpSender {
    client: reqwest::Client,
    upload_url: Url,
    write_key: String,
    user_agent: String,
}

impl HttpSender {
    pub fn new(
        endpoint: &str,
        write_key: String,
        timeout: Duration,
        transport: Option<reqwest::Client>,
    ) -> Result<Self, Error> {
        let upload_url = format!("{}/v1/batch", endpoint.trim_end_matches('/'))
            .parse::<Url>()
            .map_err(|_| ConfigError::new("Endpoint", endpoint, "not a valid URL"))?;

        let client = match transport {
            Some(client) => client,
            None => reqwest::Client::builder().timeout(timeout).build()?,
        };

        Ok(Self {
            client,
            upload_url,
            write_key,
            user_agent: format!("{} (version: {})", crate::NAME, crate::VERSION),
        })
    }

    pub fn upload_url(&self) -> &Url {
        &self.upload_url
    }

    /// POSTs a serialized batch. The write key rides as the basic-auth user
    /// name with an empty password; reqwest supplies Content-Length from the
    /// body.
    pub async fn send(&self, body: Vec<u8>) -> Result<reqwest::Response, reqwest::Error> {
        self.client
            .post(self.upload_url.clone())
            .header(USER_AGENT, &self.user_agent)
            .header(CONTENT_TYPE, "application/json")
            .basic_auth(&self.write_key, Some(""))
            .body(body)
            .send()
            .await
    }
}
