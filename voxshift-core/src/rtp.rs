//! RTP capability and parameter types exchanged over signaling
//!
//! Field names serialize in camelCase so that browser-side SFU clients can
//! send their device capabilities unchanged.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Media kind carried by a producer or consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// RTCP feedback mechanism declared for a codec
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RtcpFeedback {
    /// Feedback type, e.g. `nack` or `transport-cc`
    #[serde(rename = "type")]
    pub kind: String,
    /// Optional parameter, e.g. `pli` for `nack pli`
    #[serde(default)]
    pub parameter: String,
}

impl RtcpFeedback {
    /// Feedback entry without a parameter
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            parameter: String::new(),
        }
    }
}

/// A codec a router or device is able to send or receive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    /// Media kind
    pub kind: MediaKind,
    /// MIME type, e.g. `audio/opus`
    pub mime_type: String,
    /// Payload type the owner prefers for this codec
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_payload_type: Option<u8>,
    /// Clock rate in Hz
    pub clock_rate: u32,
    /// Channel count (audio only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    /// Codec specific parameters
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// Supported RTCP feedback
    #[serde(default)]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

/// RTP header extension supported by a router or device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpHeaderExtension {
    /// Media kind the extension applies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MediaKind>,
    /// Extension URI
    pub uri: String,
    /// Preferred extension id
    pub preferred_id: u16,
}

/// The full capability set of a router or a receiving device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    /// Supported codecs
    #[serde(default)]
    pub codecs: Vec<RtpCodecCapability>,
    /// Supported header extensions
    #[serde(default)]
    pub header_extensions: Vec<RtpHeaderExtension>,
}

/// Codec parameters of a concrete RTP stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecParameters {
    /// MIME type
    pub mime_type: String,
    /// Payload type used on the wire
    pub payload_type: u8,
    /// Clock rate in Hz
    pub clock_rate: u32,
    /// Channel count (audio only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    /// Codec specific parameters
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// RTCP feedback in use for this stream
    #[serde(default)]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

/// Encoding of an RTP stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpEncodingParameters {
    /// SSRC of the encoding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssrc: Option<u32>,
    /// Bitrate ceiling for the encoding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u32>,
}

/// RTCP settings of an RTP stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcpParameters {
    /// Canonical name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cname: Option<String>,
    /// Whether reduced-size RTCP is used
    #[serde(default = "default_reduced_size")]
    pub reduced_size: bool,
}

fn default_reduced_size() -> bool {
    true
}

impl Default for RtcpParameters {
    fn default() -> Self {
        Self {
            cname: None,
            reduced_size: true,
        }
    }
}

/// Parameters describing what a producer sends or a consumer receives
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpParameters {
    /// Media section id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    /// Codecs in use, first one is the active codec
    pub codecs: Vec<RtpCodecParameters>,
    /// Encodings
    #[serde(default)]
    pub encodings: Vec<RtpEncodingParameters>,
    /// RTCP settings
    #[serde(default)]
    pub rtcp: RtcpParameters,
}

impl RtpParameters {
    /// SSRC of the first encoding, if declared
    pub fn primary_ssrc(&self) -> Option<u32> {
        self.encodings.first().and_then(|e| e.ssrc)
    }
}

/// An RTP packet travelling through the router
///
/// The router never inspects the payload; consumers only rewrite the header
/// fields that are negotiated per consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPacket {
    /// RTP payload type
    pub payload_type: u8,
    /// RTP sequence number
    pub sequence_number: u16,
    /// RTP timestamp in codec clock units
    pub timestamp: u32,
    /// Synchronization source
    pub ssrc: u32,
    /// Encoded media payload
    pub payload: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_accept_browser_shape() {
        let json = r#"{
            "codecs": [{
                "kind": "audio",
                "mimeType": "audio/opus",
                "preferredPayloadType": 100,
                "clockRate": 48000,
                "channels": 2,
                "parameters": {"minptime": 10, "useinbandfec": 1},
                "rtcpFeedback": [{"type": "nack", "parameter": ""}, {"type": "transport-cc"}]
            }],
            "headerExtensions": []
        }"#;

        let caps: RtpCapabilities = serde_json::from_str(json).unwrap();
        assert_eq!(caps.codecs.len(), 1);
        let opus = &caps.codecs[0];
        assert_eq!(opus.kind, MediaKind::Audio);
        assert_eq!(opus.channels, Some(2));
        assert_eq!(opus.rtcp_feedback[1], RtcpFeedback::new("transport-cc"));
    }

    #[test]
    fn test_rtp_parameters_defaults() {
        let json = r#"{"codecs": [{"mimeType": "audio/opus", "payloadType": 111, "clockRate": 48000}]}"#;
        let params: RtpParameters = serde_json::from_str(json).unwrap();
        assert!(params.rtcp.reduced_size);
        assert!(params.encodings.is_empty());
        assert_eq!(params.primary_ssrc(), None);
    }
}
