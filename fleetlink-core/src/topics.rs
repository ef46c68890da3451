//! Topic and username construction and parsing.
//!
//! String layouts here are an interoperability contract with the
//! provisioning service and must be reproduced bit-for-bit:
//! - subscribe filter: `$dps/registrations/res/#`
//! - register publish: `$dps/registrations/PUT/iotdps-register/?$rid=<rid>`
//! - poll publish:
//!   `$dps/registrations/GET/iotdps-get-operationstatus/?$rid=<rid>&operationId=<op>`
//! - response topic:
//!   `$dps/registrations/res/<status>/?$rid=<rid>[&retry-after=<secs>]`
//! - username:
//!   `<idScope>/registrations/<registrationId>/api-version=<v>&ClientVersion=<enc-ua>`

use std::time::Duration;

/// Subscription filter covering every response for this connection.
pub const RESPONSE_TOPIC_FILTER: &str = "$dps/registrations/res/#";

/// Prefix shared by all response topics.
pub const RESPONSE_TOPIC_PREFIX: &str = "$dps/registrations/res/";

/// API version used when no certificate issuance is requested.
pub const STABLE_API_VERSION: &str = "2019-03-31";

/// Preview API version required for CSR-based certificate issuance.
pub const PREVIEW_API_VERSION: &str = "2021-11-01-preview";

/// Topic for the initial registration publish.
#[must_use]
pub fn register_topic(request_id: &str) -> String {
    format!("$dps/registrations/PUT/iotdps-register/?$rid={request_id}")
}

/// Topic for an operation-status poll publish.
#[must_use]
pub fn poll_topic(request_id: &str, operation_id: &str) -> String {
    format!(
        "$dps/registrations/GET/iotdps-get-operationstatus/?$rid={request_id}&operationId={operation_id}"
    )
}

/// Connection username for one attempt.
///
/// The user agent is percent-encoded; everything else is inserted verbatim.
#[must_use]
pub fn username(
    id_scope: &str,
    registration_id: &str,
    api_version: &str,
    user_agent: &str,
) -> String {
    format!(
        "{id_scope}/registrations/{registration_id}/api-version={api_version}&ClientVersion={}",
        urlencoding::encode(user_agent)
    )
}

/// Errors from response-topic parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TopicError {
    /// The topic is not under the response prefix.
    #[error("not a response topic")]
    NotResponseTopic,

    /// The status segment is missing or not a number.
    #[error("malformed status segment")]
    InvalidStatus,

    /// No `$rid` property was present.
    #[error("missing request id")]
    MissingRequestId,
}

/// Parsed response topic.
///
/// The status code travels in the topic, separately from the JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseTopic {
    /// HTTP-style status code segment.
    pub status: u16,
    /// Correlation id echoed from the matching publish.
    pub request_id: String,
    /// Server hint for the next poll, when present.
    pub retry_after: Option<Duration>,
}

impl ResponseTopic {
    /// Parse a raw topic.
    ///
    /// # Errors
    ///
    /// Fails if the topic is not under [`RESPONSE_TOPIC_PREFIX`], the status
    /// segment is not numeric, or no `$rid` property is present. A malformed
    /// `retry-after` is ignored rather than rejected.
    pub fn parse(topic: &str) -> Result<Self, TopicError> {
        let rest = topic
            .strip_prefix(RESPONSE_TOPIC_PREFIX)
            .ok_or(TopicError::NotResponseTopic)?;

        let (status_segment, properties) = rest
            .split_once('/')
            .ok_or(TopicError::InvalidStatus)?;
        let status: u16 = status_segment
            .parse()
            .map_err(|_| TopicError::InvalidStatus)?;

        let mut request_id = None;
        let mut retry_after = None;
        for pair in properties.trim_start_matches('?').split('&') {
            match pair.split_once('=') {
                Some(("$rid", value)) if !value.is_empty() => {
                    request_id = Some(value.to_string());
                }
                Some(("retry-after", value)) => {
                    retry_after = value.parse::<u64>().ok().map(Duration::from_secs);
                }
                _ => {}
            }
        }

        Ok(Self {
            status,
            request_id: request_id.ok_or(TopicError::MissingRequestId)?,
            retry_after,
        })
    }

    /// Returns true for 2xx status segments.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
