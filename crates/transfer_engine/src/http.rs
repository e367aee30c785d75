use std::time::Duration;

use serde::Deserialize;

pub(crate) fn build_client(
    connect_timeout: Duration,
    request_timeout: Option<Duration>,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder().connect_timeout(connect_timeout);
    if let Some(timeout) = request_timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Best available explanation for a non-success response: the `error` or
/// `message` field of a JSON body, else the status line.
pub(crate) async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(|body| body.error.or(body.message))
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| status.to_string())
}

pub(crate) fn describe(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("request timed out: {err}")
    } else if err.is_connect() {
        format!("could not connect: {err}")
    } else {
        err.to_string()
    }
}
