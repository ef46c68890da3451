//! Protocol engine: the registration state machine.
//!
//! One engine instance drives one registration attempt end-to-end:
//! connect, authenticate, subscribe, publish the registration request,
//! correlate responses, poll an in-progress assignment, and produce a
//! terminal result. Attempts never share state; run concurrent attempts on
//! separate engine instances.
//!
//! State machine:
//! `Disconnected → Connecting → SubscribedAwaitingInitial →
//! (Assigning ⇄ Polling) → Terminal`. Terminal states are absorbing: once
//! one is reached the connection is torn down and no further messages are
//! sent or processed for the attempt.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use fleetlink_core::topics::{self, ResponseTopic};
use fleetlink_core::wire::{PollPayload, RegisterPayload, RegistrationResponse, ServiceErrorBody};
use fleetlink_core::{RegistrationIdentity, RegistrationResult, RegistrationStatus};

use crate::error::ProvisionError;
use crate::transport::{AuthStrategy, ConnectOptions, Transport, TransportError};

/// Tunables for one attempt. No global state; everything is passed through
/// the call chain.
#[derive(Debug, Clone)]
pub struct ProtocolSettings {
    /// Advertised client version, percent-encoded into the username.
    pub user_agent: String,
    /// Overall attempt deadline, independent of the per-poll timeout.
    pub overall_timeout: Duration,
    /// Fixed interval between status polls, unless the service sends a
    /// `retry-after` hint.
    pub poll_interval: Duration,
    /// How long to wait for each poll response.
    pub poll_response_timeout: Duration,
    /// Bound on the number of status polls per attempt.
    pub max_polls: u32,
    /// MQTT keep-alive.
    pub keep_alive: Duration,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            user_agent: concat!("fleetlink/", env!("CARGO_PKG_VERSION")).to_string(),
            overall_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(2),
            poll_response_timeout: Duration::from_secs(4),
            max_polls: 20,
            keep_alive: Duration::from_secs(30),
        }
    }
}

/// Everything the engine needs for one attempt.
pub struct RegisterRequest<'a> {
    pub identity: &'a RegistrationIdentity,
    pub auth: AuthStrategy,
    /// Base64 DER CSR body, present only when requesting issuance.
    pub csr_der_base64: Option<String>,
}

/// Progress of one attempt through the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Disconnected,
    Connecting,
    SubscribedAwaitingInitial,
    Assigning,
    Polling,
    /// Absorbing. The outcome itself travels in the returned result.
    Terminal,
}

impl AttemptState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal)
    }
}

/// Transient per-attempt session. Created when registration starts,
/// destroyed on terminal state or cancellation.
struct RegistrationAttempt {
    /// Correlation id; generated fresh per attempt, never reused.
    request_id: String,
    operation_id: Option<String>,
    deadline: Instant,
    poll_count: u32,
    state: AttemptState,
}

impl RegistrationAttempt {
    fn new(overall_timeout: Duration) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            operation_id: None,
            deadline: Instant::now() + overall_timeout,
            poll_count: 0,
            state: AttemptState::Disconnected,
        }
    }

    fn transition(&mut self, next: AttemptState) {
        tracing::trace!(from = ?self.state, to = ?next, "attempt state transition");
        self.state = next;
    }
}

/// Correlation-id-keyed dispatch for inbound responses.
///
/// An entry is armed before each wait and removed the instant it resolves,
/// so a duplicate delivery of an already-resolved response, or a response
/// for a prior attempt's request id, is a no-op.
#[derive(Debug, Default)]
struct ResponseRouter {
    pending: HashSet<String>,
}

impl ResponseRouter {
    fn arm(&mut self, request_id: &str) {
        self.pending.insert(request_id.to_string());
    }

    /// Parse a topic and resolve its entry, if one is armed.
    fn resolve(&mut self, topic: &str) -> Option<ResponseTopic> {
        let parsed = ResponseTopic::parse(topic).ok()?;
        if self.pending.remove(&parsed.request_id) {
            Some(parsed)
        } else {
            None
        }
    }
}

/// What a correlated response means for the attempt.
#[derive(Debug)]
enum Disposition {
    /// A terminal status: assigned, failed or disabled.
    Complete(RegistrationResult),
    /// Assignment still in progress; keep polling.
    Continue {
        operation_id: Option<String>,
        retry_after: Option<Duration>,
    },
}

/// The registration protocol engine.
///
/// Generic over [`Transport`] so tests can drive it with an in-memory fake.
pub struct ProtocolEngine<T: Transport> {
    transport: T,
    settings: ProtocolSettings,
}

impl<T: Transport> ProtocolEngine<T> {
    pub fn new(transport: T) -> Self {
        Self::with_settings(transport, ProtocolSettings::default())
    }

    pub fn with_settings(transport: T, settings: ProtocolSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &ProtocolSettings {
        &self.settings
    }

    /// Execute one bounded registration attempt.
    ///
    /// Cancellation is checked at every suspension point; a canceled attempt
    /// disconnects rather than lingering. The transport is torn down on
    /// every exit path, success and failure alike. Repeating a failed
    /// attempt is the caller's decision; the engine never retries.
    pub async fn register(
        &mut self,
        request: RegisterRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<RegistrationResult, ProvisionError> {
        let mut attempt = RegistrationAttempt::new(self.settings.overall_timeout);
        tracing::debug!(
            registration_id = %request.identity.registration_id,
            request_id = %attempt.request_id,
            csr = request.csr_der_base64.is_some(),
            "starting registration attempt"
        );

        let result = self.run_attempt(&mut attempt, &request, cancel).await;
        attempt.transition(AttemptState::Terminal);

        if let Err(e) = self.transport.disconnect().await {
            tracing::debug!(error = %e, "disconnect after attempt returned an error");
        }

        match &result {
            Ok(outcome) => tracing::info!(
                registration_id = %outcome.registration_id,
                status = ?outcome.status,
                "registration attempt finished"
            ),
            Err(e) => tracing::warn!(error = %e, "registration attempt failed"),
        }
        result
    }

    async fn run_attempt(
        &mut self,
        attempt: &mut RegistrationAttempt,
        request: &RegisterRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<RegistrationResult, ProvisionError> {
        let identity = request.identity;

        // Certificate issuance requires the preview API surface.
        let api_version = if request.csr_der_base64.is_some() {
            topics::PREVIEW_API_VERSION
        } else {
            identity.api_version.as_str()
        };
        let options = ConnectOptions {
            host: identity.host.clone(),
            port: identity.port,
            client_id: identity.registration_id.clone(),
            username: topics::username(
                &identity.id_scope,
                &identity.registration_id,
                api_version,
                &self.settings.user_agent,
            ),
            auth: request.auth.clone(),
            keep_alive: self.settings.keep_alive,
        };

        attempt.transition(AttemptState::Connecting);
        guarded(cancel, attempt.deadline, self.transport.connect(&options)).await?;

        guarded(
            cancel,
            attempt.deadline,
            self.transport.subscribe(topics::RESPONSE_TOPIC_FILTER),
        )
        .await?;
        attempt.transition(AttemptState::SubscribedAwaitingInitial);

        let payload = serde_json::to_vec(&RegisterPayload {
            registration_id: &identity.registration_id,
            csr: request.csr_der_base64.as_deref(),
        })
        .expect("register payload serializes to JSON");
        let topic = topics::register_topic(&attempt.request_id);
        guarded(cancel, attempt.deadline, self.transport.publish(&topic, payload)).await?;

        let mut router = ResponseRouter::default();
        let (meta, body) = await_response(
            &mut self.transport,
            &mut router,
            &attempt.request_id,
            attempt.deadline,
            cancel,
        )
        .await?;

        let (operation_id, mut interval) =
            match interpret_response(&identity.registration_id, &meta, &body)? {
                Disposition::Complete(result) => return Ok(result),
                Disposition::Continue {
                    operation_id,
                    retry_after,
                } => {
                    attempt.transition(AttemptState::Assigning);
                    let operation_id =
                        operation_id.ok_or_else(|| ProvisionError::Protocol {
                            status: meta.status,
                            message: "assigning response carried no operationId".to_string(),
                            error_code: None,
                            tracking_id: None,
                        })?;
                    (operation_id, retry_after.unwrap_or(self.settings.poll_interval))
                }
            };
        attempt.operation_id = Some(operation_id.clone());

        // Assignment is in progress: poll on a fixed interval, bounded by
        // max_polls and by the overall deadline.
        while attempt.poll_count < self.settings.max_polls {
            guarded(cancel, attempt.deadline, async {
                tokio::time::sleep(interval).await;
                Ok(())
            })
            .await?;

            attempt.transition(AttemptState::Polling);
            attempt.poll_count += 1;
            tracing::debug!(
                poll = attempt.poll_count,
                operation_id = %operation_id,
                "polling operation status"
            );

            let payload = serde_json::to_vec(&PollPayload {
                operation_id: &operation_id,
                registration_id: &identity.registration_id,
            })
            .expect("poll payload serializes to JSON");
            let topic = topics::poll_topic(&attempt.request_id, &operation_id);
            guarded(cancel, attempt.deadline, self.transport.publish(&topic, payload)).await?;

            let wait_deadline = Instant::now()
                .checked_add(self.settings.poll_response_timeout)
                .map_or(attempt.deadline, |t| t.min(attempt.deadline));
            let response = await_response(
                &mut self.transport,
                &mut router,
                &attempt.request_id,
                wait_deadline,
                cancel,
            )
            .await;

            let (meta, body) = match response {
                Ok(resolved) => resolved,
                // A missed poll response consumes one poll attempt; only the
                // overall deadline ends the attempt here.
                Err(ProvisionError::TimedOut) => {
                    if Instant::now() >= attempt.deadline {
                        return Err(ProvisionError::TimedOut);
                    }
                    interval = self.settings.poll_interval;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match interpret_response(&identity.registration_id, &meta, &body)? {
                Disposition::Complete(result) => return Ok(result),
                Disposition::Continue { retry_after, .. } => {
                    attempt.transition(AttemptState::Assigning);
                    interval = retry_after.unwrap_or(self.settings.poll_interval);
                }
            }
        }

        Err(ProvisionError::TimedOut)
    }
}

/// Await a transport future under both cancellation and a deadline.
async fn guarded<T>(
    cancel: &CancellationToken,
    deadline: Instant,
    operation: impl std::future::Future<Output = Result<T, TransportError>>,
) -> Result<T, ProvisionError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ProvisionError::Canceled),
        outcome = tokio::time::timeout_at(deadline, operation) => match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ProvisionError::Connection(e)),
            Err(_) => Err(ProvisionError::TimedOut),
        },
    }
}

/// Wait until an inbound message resolves the armed correlation entry.
///
/// Messages that are not response topics, carry a different request id, or
/// duplicate an already-resolved response are ignored. Safe under
/// at-least-once delivery.
async fn await_response<T: Transport>(
    transport: &mut T,
    router: &mut ResponseRouter,
    request_id: &str,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<(ResponseTopic, Vec<u8>), ProvisionError> {
    router.arm(request_id);
    loop {
        let message = guarded(cancel, deadline, transport.recv()).await?;
        match router.resolve(&message.topic) {
            Some(parsed) => return Ok((parsed, message.payload)),
            None => {
                tracing::debug!(topic = %message.topic, "ignoring uncorrelated message");
            }
        }
    }
}

/// Map a correlated response onto the attempt's next step.
///
/// The topic status segment is inspected first: 401 terminates immediately
/// as an authentication failure, any other non-success status terminates as
/// a protocol failure carrying the error body. Success bodies are parsed
/// into the closed status model.
fn interpret_response(
    registration_id: &str,
    meta: &ResponseTopic,
    body: &[u8],
) -> Result<Disposition, ProvisionError> {
    if meta.status == 401 {
        return Err(ProvisionError::Auth {
            status: meta.status,
        });
    }
    if !meta.is_success() {
        return Err(protocol_error(meta.status, body));
    }

    let response: RegistrationResponse =
        serde_json::from_slice(body).map_err(|e| ProvisionError::Protocol {
            status: meta.status,
            message: format!("malformed response body: {e}"),
            error_code: None,
            tracking_id: None,
        })?;

    match response.status {
        RegistrationStatus::Assigned
        | RegistrationStatus::Failed
        | RegistrationStatus::Disabled => {
            Ok(Disposition::Complete(result_from(registration_id, response)))
        }
        RegistrationStatus::Assigning => Ok(Disposition::Continue {
            operation_id: response.operation_id,
            retry_after: meta.retry_after,
        }),
        RegistrationStatus::Unassigned => Err(ProvisionError::Protocol {
            status: meta.status,
            message: "service reported an unassigned registration mid-attempt".to_string(),
            error_code: None,
            tracking_id: None,
        }),
    }
}

fn result_from(registration_id: &str, response: RegistrationResponse) -> RegistrationResult {
    let state = response.registration_state.unwrap_or_default();
    RegistrationResult {
        registration_id: state
            .registration_id
            .unwrap_or_else(|| registration_id.to_string()),
        device_id: state.device_id,
        assigned_hub: state.assigned_hub,
        status: response.status,
        substatus: state.substatus,
        issued_certificate_chain: state.issued_certificate_chain,
        error_code: state.error_code,
        error_message: state.error_message,
    }
}

fn protocol_error(status: u16, body: &[u8]) -> ProvisionError {
    match serde_json::from_slice::<ServiceErrorBody>(body) {
        Ok(parsed) => ProvisionError::Protocol {
            status,
            message: parsed
                .message
                .unwrap_or_else(|| "no error message".to_string()),
            error_code: parsed.error_code,
            tracking_id: parsed.tracking_id,
        },
        Err(_) => ProvisionError::Protocol {
            status,
            message: String::from_utf8_lossy(body).into_owned(),
            error_code: None,
            tracking_id: None,
        },
    }
}
