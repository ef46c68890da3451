//! JSON payloads exchanged with the provisioning service.
//!
//! Field names are part of the wire contract and must be reproduced
//! bit-for-bit, hence the explicit camelCase renames.

use serde::{Deserialize, Serialize};

use crate::registration::{IssuedCertificateChain, RegistrationStatus};

/// Body of the registration request publish.
///
/// `csr` is present only when this attempt requests issuance of a new
/// certificate, and carries raw base64 DER (no PEM envelope).
#[derive(Debug, Serialize)]
pub struct RegisterPayload<'a> {
    #[serde(rename = "registrationId")]
    pub registration_id: &'a str,
    #[serde(rename = "csr", skip_serializing_if = "Option::is_none")]
    pub csr: Option<&'a str>,
}

/// Body of an operation-status poll publish.
#[derive(Debug, Serialize)]
pub struct PollPayload<'a> {
    #[serde(rename = "operationId")]
    pub operation_id: &'a str,
    #[serde(rename = "registrationId")]
    pub registration_id: &'a str,
}

/// Response body for both the initial registration and status polls.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationResponse {
    /// Server-assigned token for polling an in-progress assignment.
    #[serde(rename = "operationId", default)]
    pub operation_id: Option<String>,
    /// Operation status; unknown strings fail deserialization.
    pub status: RegistrationStatus,
    /// Per-device registration state, populated on terminal statuses.
    #[serde(rename = "registrationState", default)]
    pub registration_state: Option<DeviceRegistrationState>,
}

/// Per-device registration state embedded in a response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceRegistrationState {
    #[serde(rename = "registrationId", default)]
    pub registration_id: Option<String>,
    #[serde(rename = "deviceId", default)]
    pub device_id: Option<String>,
    #[serde(rename = "assignedHub", default)]
    pub assigned_hub: Option<String>,
    #[serde(default)]
    pub substatus: Option<String>,
    #[serde(rename = "issuedCertificateChain", default)]
    pub issued_certificate_chain: Option<IssuedCertificateChain>,
    #[serde(rename = "errorCode", default)]
    pub error_code: Option<i64>,
    #[serde(rename = "errorMessage", default)]
    pub error_message: Option<String>,
}

/// Error body returned with non-success topic status codes.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceErrorBody {
    #[serde(rename = "errorCode", default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(rename = "trackingId", default)]
    pub tracking_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_payload_without_csr() {
        let payload = RegisterPayload {
            registration_id: "device-01",
            csr: None,
        };
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"registrationId":"device-01"}"#
        );
    }

    #[test]
    fn register_payload_with_csr() {
        let payload = RegisterPayload {
            registration_id: "device-01",
            csr: Some("TUlJQ1dq"),
        };
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"registrationId":"device-01","csr":"TUlJQ1dq"}"#
        );
    }

    #[test]
    fn poll_payload_layout() {
        let payload = PollPayload {
            operation_id: "op-1",
            registration_id: "device-01",
        };
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"operationId":"op-1","registrationId":"device-01"}"#
        );
    }

    #[test]
    fn assigned_response_parses_with_chain() {
        let body = r#"{
            "operationId": "op-1",
            "status": "assigned",
            "registrationState": {
                "registrationId": "device-01",
                "deviceId": "dev01",
                "assignedHub": "hub.example.net",
                "substatus": "initialAssignment",
                "issuedCertificateChain": ["leafB64", "intB64", "rootB64"]
            }
        }"#;
        let parsed: RegistrationResponse = serde_json::from_str(body).unwrap();

        assert_eq!(parsed.status, RegistrationStatus::Assigned);
        let state = parsed.registration_state.unwrap();
        assert_eq!(state.device_id.as_deref(), Some("dev01"));
        assert_eq!(state.assigned_hub.as_deref(), Some("hub.example.net"));
        let chain = state.issued_certificate_chain.unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.leaf(), Some("leafB64"));
    }

    #[test]
    fn assigning_response_parses_without_state() {
        let parsed: RegistrationResponse =
            serde_json::from_str(r#"{"operationId":"op-1","status":"assigning"}"#).unwrap();
        assert_eq!(parsed.status, RegistrationStatus::Assigning);
        assert_eq!(parsed.operation_id.as_deref(), Some("op-1"));
        assert!(parsed.registration_state.is_none());
    }

    #[test]
    fn unknown_status_fails_parsing() {
        assert!(
            serde_json::from_str::<RegistrationResponse>(r#"{"status":"hibernating"}"#).is_err()
        );
    }

    #[test]
    fn missing_status_fails_parsing() {
        assert!(serde_json::from_str::<RegistrationResponse>(r#"{"operationId":"x"}"#).is_err());
    }

    #[test]
    fn failed_response_carries_error_fields() {
        let body = r#"{
            "status": "failed",
            "registrationState": {
                "registrationId": "device-01",
                "errorCode": 400207,
                "errorMessage": "Custom allocation failed with status code: 400"
            }
        }"#;
        let parsed: RegistrationResponse = serde_json::from_str(body).unwrap();
        let state = parsed.registration_state.unwrap();
        assert_eq!(state.error_code, Some(400207));
        assert!(state.error_message.unwrap().contains("Custom allocation"));
    }

    #[test]
    fn service_error_body_parses() {
        let body = r#"{"errorCode":401002,"trackingId":"0c0a-...","message":"Unauthorized"}"#;
        let parsed: ServiceErrorBody = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.error_code, Some(401002));
        assert_eq!(parsed.message.as_deref(), Some("Unauthorized"));
        assert!(parsed.tracking_id.is_some());
    }
}
