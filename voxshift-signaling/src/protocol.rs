//! Signaling protocol messages
//!
//! Requests travel as `{"id", "method", "data"}` envelopes and are answered
//! with exactly one `{"id", "data"}` or `{"id", "error", "errorCode"}`.
//! Pushes from the server carry an `event` name instead of an id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use voxshift_core::{
    ConsumerType, DtlsParameters, IceServer, MediaKind, RtpCapabilities, RtpParameters,
    TransportParameters, VoxError, VoxResult,
};

/// Request envelope as it appears on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Correlation id chosen by the client
    pub id: u64,
    /// Operation name
    pub method: String,
    /// Operation payload
    #[serde(default)]
    pub data: Value,
}

/// `connectTransport` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransportRequest {
    /// Transport to connect
    pub transport_id: String,
    /// Remote DTLS parameters
    pub dtls_parameters: DtlsParameters,
}

/// `createProducerTransport` and `createConsumerTransport` result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportResponse {
    /// Parameters of the new transport
    #[serde(flatten)]
    pub parameters: TransportParameters,
    /// ICE servers the server is configured with
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ice_servers: Vec<IceServer>,
}

/// `produce` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceRequest {
    /// Transport to produce on
    pub transport_id: String,
    /// Media kind
    pub kind: MediaKind,
    /// What the peer is going to send
    pub rtp_parameters: RtpParameters,
}

/// `produce` result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProduceResponse {
    /// New producer id
    pub id: String,
}

/// `consume` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRequest {
    /// Transport to consume on
    pub transport_id: String,
    /// Producer to consume
    pub producer_id: String,
    /// Receive capabilities of the peer
    pub rtp_capabilities: RtpCapabilities,
}

/// `consume` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeResponse {
    /// New consumer id
    pub id: String,
    /// Producer being consumed
    pub producer_id: String,
    /// Media kind
    pub kind: MediaKind,
    /// What the peer is going to receive
    pub rtp_parameters: RtpParameters,
    /// Consumer type
    #[serde(rename = "type")]
    pub consumer_type: ConsumerType,
    /// Whether the producer is paused right now
    pub producer_paused: bool,
}

/// Payload naming a consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerRequest {
    /// Target consumer
    pub consumer_id: String,
}

/// Payload naming a producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerRequest {
    /// Target producer
    pub producer_id: String,
}

/// Payload naming a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportRequest {
    /// Target transport
    pub transport_id: String,
}

/// A decoded peer → server request
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingRequest {
    /// Router capability set
    GetRouterRtpCapabilities,
    /// New transport for sending
    CreateProducerTransport,
    /// New transport for receiving
    CreateConsumerTransport,
    /// Finish DTLS setup of a transport
    ConnectTransport(ConnectTransportRequest),
    /// Start sending a track
    Produce(ProduceRequest),
    /// Start receiving a producer
    Consume(ConsumeRequest),
    /// Resume a consumer
    Resume(ConsumerRequest),
    /// Live producer ids
    GetProducers,
    /// Pause a consumer
    PauseConsumer(ConsumerRequest),
    /// Pause a producer
    PauseProducer(ProducerRequest),
    /// Resume a producer
    ResumeProducer(ProducerRequest),
    /// Close a producer
    CloseProducer(ProducerRequest),
    /// Close a transport
    CloseTransport(TransportRequest),
}

impl SignalingRequest {
    /// Wire name of the operation
    pub fn method(&self) -> &'static str {
        match self {
            SignalingRequest::GetRouterRtpCapabilities => "getRouterRtpCapabilities",
            SignalingRequest::CreateProducerTransport => "createProducerTransport",
            SignalingRequest::CreateConsumerTransport => "createConsumerTransport",
            SignalingRequest::ConnectTransport(_) => "connectTransport",
            SignalingRequest::Produce(_) => "produce",
            SignalingRequest::Consume(_) => "consume",
            SignalingRequest::Resume(_) => "resume",
            SignalingRequest::GetProducers => "getProducers",
            SignalingRequest::PauseConsumer(_) => "pauseConsumer",
            SignalingRequest::PauseProducer(_) => "pauseProducer",
            SignalingRequest::ResumeProducer(_) => "resumeProducer",
            SignalingRequest::CloseProducer(_) => "closeProducer",
            SignalingRequest::CloseTransport(_) => "closeTransport",
        }
    }

    /// Decode a request from its method name and payload
    ///
    /// Operations without input ignore whatever payload was sent.
    pub fn parse(method: &str, data: Value) -> VoxResult<Self> {
        let request = match method {
            "getRouterRtpCapabilities" => SignalingRequest::GetRouterRtpCapabilities,
            "createProducerTransport" => SignalingRequest::CreateProducerTransport,
            "createConsumerTransport" => SignalingRequest::CreateConsumerTransport,
            "getProducers" => SignalingRequest::GetProducers,
            "connectTransport" => SignalingRequest::ConnectTransport(payload(method, data)?),
            "produce" => SignalingRequest::Produce(payload(method, data)?),
            "consume" => SignalingRequest::Consume(payload(method, data)?),
            "resume" => SignalingRequest::Resume(payload(method, data)?),
            "pauseConsumer" => SignalingRequest::PauseConsumer(payload(method, data)?),
            "pauseProducer" => SignalingRequest::PauseProducer(payload(method, data)?),
            "resumeProducer" => SignalingRequest::ResumeProducer(payload(method, data)?),
            "closeProducer" => SignalingRequest::CloseProducer(payload(method, data)?),
            "closeTransport" => SignalingRequest::CloseTransport(payload(method, data)?),
            other => {
                return Err(VoxError::InvalidMessage {
                    message: other.to_string(),
                    source: format!("unknown method {}", other).into(),
                })
            }
        };
        Ok(request)
    }

    /// Decode a full request envelope
    pub fn from_envelope(envelope: RequestEnvelope) -> VoxResult<Self> {
        Self::parse(&envelope.method, envelope.data)
    }

    /// Wrap the request in an envelope with correlation id `id`
    pub fn into_envelope(self, id: u64) -> VoxResult<RequestEnvelope> {
        let method = self.method().to_string();
        let data = match self {
            SignalingRequest::GetRouterRtpCapabilities
            | SignalingRequest::CreateProducerTransport
            | SignalingRequest::CreateConsumerTransport
            | SignalingRequest::GetProducers => Value::Null,
            SignalingRequest::ConnectTransport(p) => to_data(&p)?,
            SignalingRequest::Produce(p) => to_data(&p)?,
            SignalingRequest::Consume(p) => to_data(&p)?,
            SignalingRequest::Resume(p) | SignalingRequest::PauseConsumer(p) => to_data(&p)?,
            SignalingRequest::PauseProducer(p)
            | SignalingRequest::ResumeProducer(p)
            | SignalingRequest::CloseProducer(p) => to_data(&p)?,
            SignalingRequest::CloseTransport(p) => to_data(&p)?,
        };
        Ok(RequestEnvelope { id, method, data })
    }
}

fn payload<T: serde::de::DeserializeOwned>(method: &str, data: Value) -> VoxResult<T> {
    serde_json::from_value(data).map_err(|e| VoxError::InvalidMessage {
        message: method.to_string(),
        source: e.into(),
    })
}

/// Serialize a response or request payload
pub fn to_data<T: Serialize>(value: &T) -> VoxResult<Value> {
    serde_json::to_value(value).map_err(|e| VoxError::InvalidMessage {
        message: "unserializable payload".to_string(),
        source: e.into(),
    })
}

/// Answer to one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingResponse {
    /// Id of the request being answered
    pub id: u64,
    /// Result on success
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    /// Error message on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine readable error code on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl SignalingResponse {
    /// Successful answer
    pub fn ok(id: u64, data: Value) -> Self {
        Self {
            id,
            data,
            error: None,
            error_code: None,
        }
    }

    /// Failed answer
    pub fn error(id: u64, error: &VoxError) -> Self {
        Self {
            id,
            data: Value::Null,
            error: Some(error.to_string()),
            error_code: Some(error.error_code()),
        }
    }

    /// Turn the answer back into a result
    pub fn into_result(self) -> VoxResult<Value> {
        match self.error {
            Some(message) => Err(VoxError::Remote {
                code: self.error_code.unwrap_or_else(|| "UNKNOWN".to_string()),
                message,
            }),
            None => Ok(self.data),
        }
    }
}

/// Unsolicited server → peer message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerPush {
    /// Another peer started producing
    NewProducer {
        /// New producer
        #[serde(rename = "producerId")]
        producer_id: String,
    },
    /// A consumer of this peer closed because its producer went away
    ConsumerClosed {
        /// Closed consumer
        #[serde(rename = "consumerId")]
        consumer_id: String,
    },
}

impl From<voxshift_core::RoomNotification> for ServerPush {
    fn from(notification: voxshift_core::RoomNotification) -> Self {
        match notification {
            voxshift_core::RoomNotification::NewProducer { producer_id } => {
                ServerPush::NewProducer { producer_id }
            }
            voxshift_core::RoomNotification::ConsumerClosed { consumer_id } => {
                ServerPush::ConsumerClosed { consumer_id }
            }
        }
    }
}

/// Anything the SFU endpoint sends to a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Answer to a request
    Response(SignalingResponse),
    /// Server push
    Push(ServerPush),
}

/// Session description kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Offer
    Offer,
    /// Answer
    Answer,
}

/// An SDP offer or answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub kind: SdpType,
    /// SDP body
    pub sdp: String,
}

/// A connectivity candidate in the browser's `RTCIceCandidateInit` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateInit {
    /// Candidate line, empty for the end-of-candidates marker
    pub candidate: String,
    /// Media section id
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Media section index
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidateInit {
    /// Whether this is the end-of-candidates marker
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.trim().is_empty()
    }
}

/// Control signals between peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerControl {
    /// The sender is ready to receive queued candidates
    RequestIceCandidates,
}

/// Peer-to-peer message carried by the relay endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PeerMessage {
    /// Offer or answer
    Description(SessionDescription),
    /// One connectivity candidate
    Candidate {
        /// The candidate
        candidate: IceCandidateInit,
    },
    /// Control signal
    Control {
        /// Signal kind
        #[serde(rename = "type")]
        kind: PeerControl,
    },
}

impl PeerMessage {
    /// `request_ice_candidates` signal
    pub fn request_ice_candidates() -> Self {
        PeerMessage::Control {
            kind: PeerControl::RequestIceCandidates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_parsing() {
        let envelope: RequestEnvelope = serde_json::from_value(json!({
            "id": 7,
            "method": "connectTransport",
            "data": {
                "transportId": "t1",
                "dtlsParameters": {
                    "role": "client",
                    "fingerprints": [{"algorithm": "sha-256", "value": "AB:CD"}]
                }
            }
        }))
        .unwrap();
        assert_eq!(envelope.id, 7);

        match SignalingRequest::from_envelope(envelope).unwrap() {
            SignalingRequest::ConnectTransport(req) => {
                assert_eq!(req.transport_id, "t1");
                assert_eq!(req.dtls_parameters.fingerprints.len(), 1);
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_no_input_methods_ignore_payload() {
        let request = SignalingRequest::parse("getProducers", json!({})).unwrap();
        assert_eq!(request, SignalingRequest::GetProducers);

        let envelope: RequestEnvelope =
            serde_json::from_str(r#"{"id": 1, "method": "createProducerTransport"}"#).unwrap();
        assert_eq!(envelope.data, Value::Null);
    }

    #[test]
    fn test_unknown_method_and_bad_payload() {
        let err = SignalingRequest::parse("joinRoom", Value::Null).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_MESSAGE");

        let err = SignalingRequest::parse("resume", json!({"consumer": "c1"})).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_MESSAGE");
    }

    #[test]
    fn test_response_shapes() {
        let ok = serde_json::to_value(SignalingResponse::ok(3, json!(["p1"]))).unwrap();
        assert_eq!(ok, json!({"id": 3, "data": ["p1"]}));

        let empty = serde_json::to_value(SignalingResponse::ok(4, Value::Null)).unwrap();
        assert_eq!(empty, json!({"id": 4}));

        let err = SignalingResponse::error(5, &VoxError::not_found("transport", "t9"));
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["errorCode"], "NOT_FOUND");
        assert_eq!(value["error"], "transport not found: t9");

        let remote = err.into_result().unwrap_err();
        assert!(remote.is_not_found());
    }

    #[test]
    fn test_transport_response_is_flat() {
        let value = json!({
            "id": "t1",
            "iceParameters": {"usernameFragment": "uf", "password": "pw", "iceLite": true},
            "iceCandidates": [],
            "dtlsParameters": {"role": "auto", "fingerprints": []},
            "iceServers": [{"urls": ["turn:turn.example.org:3478"], "username": "u", "credential": "p"}]
        });
        let response: TransportResponse = serde_json::from_value(value).unwrap();
        assert_eq!(response.parameters.id, "t1");
        assert_eq!(response.ice_servers[0].username.as_deref(), Some("u"));

        let bare = TransportResponse {
            ice_servers: Vec::new(),
            ..response
        };
        let encoded = serde_json::to_value(&bare).unwrap();
        assert_eq!(encoded["id"], "t1");
        assert!(encoded.get("iceServers").is_none());
    }

    #[test]
    fn test_server_message_discrimination() {
        let push: ServerMessage =
            serde_json::from_str(r#"{"event": "newProducer", "data": {"producerId": "p1"}}"#)
                .unwrap();
        assert_eq!(
            push,
            ServerMessage::Push(ServerPush::NewProducer {
                producer_id: "p1".to_string()
            })
        );

        let response: ServerMessage = serde_json::from_str(r#"{"id": 2}"#).unwrap();
        assert!(matches!(response, ServerMessage::Response(r) if r.id == 2));
    }

    #[test]
    fn test_peer_message_shapes() {
        let offer: PeerMessage = serde_json::from_str(r#"{"type": "offer", "sdp": "v=0"}"#).unwrap();
        assert!(matches!(
            offer,
            PeerMessage::Description(SessionDescription {
                kind: SdpType::Offer,
                ..
            })
        ));

        let control: PeerMessage =
            serde_json::from_str(r#"{"type": "request_ice_candidates"}"#).unwrap();
        assert_eq!(control, PeerMessage::request_ice_candidates());

        let candidate: PeerMessage = serde_json::from_str(
            r#"{"candidate": {"candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host", "sdpMid": "0", "sdpMLineIndex": 0}}"#,
        )
        .unwrap();
        match candidate {
            PeerMessage::Candidate { candidate } => {
                assert_eq!(candidate.sdp_m_line_index, Some(0));
                assert!(!candidate.is_end_of_candidates());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }
}
