//! HTTP POST sink.

use std::time::Duration;

use log::Level;
use reqwest::{
    blocking::Client,
    header::{ACCEPT, CONTENT_TYPE},
    StatusCode, Url,
};
use thiserror::Error;

use super::{DeliveryOutcome, OutputSink};
use crate::hound_log;

/// Fixed per-request timeout.
pub const POST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
enum PostError {
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error("server answered {0}")]
    Status(StatusCode),
}

/// One synchronous `POST` per event; anything but a 2xx is a failure.
pub struct HttpSink {
    url: Url,
    client: Client,
}

impl HttpSink {
    pub fn new(url: Url) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(POST_TIMEOUT).build()?;
        Ok(Self { url, client })
    }

    fn post(&self, json: &str) -> Result<(), PostError> {
        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(json.to_owned())
            .send()?;
        let status = response.status();
        // Body is read so the connection completes, then discarded.
        let _ = response.bytes()?;
        if !status.is_success() {
            return Err(PostError::Status(status));
        }
        Ok(())
    }
}

impl OutputSink for HttpSink {
    fn deliver(&mut self, json: &str) -> DeliveryOutcome {
        match self.post(json) {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(e) => {
                hound_log!(Level::Error, "output", "POST to {} failed: {}", self.url, e);
                DeliveryOutcome::NetworkPostFailed
            }
        }
    }
}
