//! Capability negotiation between the router and remote peers
//!
//! Everything here is side-effect free: the router computes its capability set
//! once at start-up, and consume requests are checked structurally against the
//! producer's codec parameters.

use crate::error::{VoxError, VoxResult};
use crate::rtp::{
    MediaKind, RtcpFeedback, RtpCapabilities, RtpCodecCapability, RtpCodecParameters,
    RtpEncodingParameters, RtpParameters,
};
use std::collections::HashSet;

/// First dynamic RTP payload type handed out to router codecs
const DYNAMIC_PAYLOAD_TYPE_START: u8 = 100;
/// Last usable dynamic RTP payload type
const DYNAMIC_PAYLOAD_TYPE_END: u8 = 127;

/// Compute the router capability set from the configured media codecs
///
/// Assigns preferred payload types to codecs that do not carry one and rejects
/// duplicate or malformed entries.
pub fn generate_router_rtp_capabilities(
    media_codecs: &[RtpCodecCapability],
) -> VoxResult<RtpCapabilities> {
    if media_codecs.is_empty() {
        return Err(VoxError::Initialization {
            reason: "router needs at least one media codec".to_string(),
        });
    }

    let mut used_payload_types: HashSet<u8> = media_codecs
        .iter()
        .filter_map(|c| c.preferred_payload_type)
        .collect();
    let mut next_dynamic = DYNAMIC_PAYLOAD_TYPE_START;
    let mut codecs: Vec<RtpCodecCapability> = Vec::with_capacity(media_codecs.len());

    for codec in media_codecs {
        validate_codec_capability(codec)?;

        if codecs.iter().any(|existing| {
            codec_matches(
                &existing.mime_type,
                existing.clock_rate,
                existing.channels,
                &codec.mime_type,
                codec.clock_rate,
                codec.channels,
            )
        }) {
            return Err(VoxError::Initialization {
                reason: format!("duplicate media codec {}", codec.mime_type),
            });
        }

        let mut codec = codec.clone();
        if codec.preferred_payload_type.is_none() {
            while used_payload_types.contains(&next_dynamic) {
                if next_dynamic == DYNAMIC_PAYLOAD_TYPE_END {
                    return Err(VoxError::ResourceExhausted {
                        resource: "dynamic payload types".to_string(),
                    });
                }
                next_dynamic += 1;
            }
            codec.preferred_payload_type = Some(next_dynamic);
            used_payload_types.insert(next_dynamic);
        }
        codecs.push(codec);
    }

    Ok(RtpCapabilities {
        codecs,
        header_extensions: Vec::new(),
    })
}

fn validate_codec_capability(codec: &RtpCodecCapability) -> VoxResult<()> {
    let prefix = format!("{}/", codec.kind);
    if !codec.mime_type.to_lowercase().starts_with(&prefix) {
        return Err(VoxError::Initialization {
            reason: format!(
                "codec mime type {} does not match kind {}",
                codec.mime_type, codec.kind
            ),
        });
    }
    if codec.clock_rate == 0 {
        return Err(VoxError::Initialization {
            reason: format!("codec {} has a zero clock rate", codec.mime_type),
        });
    }
    Ok(())
}

/// Structural codec comparison: MIME type (case-insensitive), clock rate, channels
///
/// A missing channel count on an audio codec means mono.
pub fn codec_matches(
    mime_a: &str,
    clock_a: u32,
    channels_a: Option<u8>,
    mime_b: &str,
    clock_b: u32,
    channels_b: Option<u8>,
) -> bool {
    mime_a.eq_ignore_ascii_case(mime_b)
        && clock_a == clock_b
        && channels_a.unwrap_or(1) == channels_b.unwrap_or(1)
}

fn feedback_compatible(producer: &[RtcpFeedback], remote: &[RtcpFeedback]) -> bool {
    producer.is_empty() || producer.iter().any(|fb| remote.contains(fb))
}

fn find_remote_codec<'a>(
    producer_codec: &RtpCodecParameters,
    remote: &'a RtpCapabilities,
) -> Option<&'a RtpCodecCapability> {
    remote.codecs.iter().find(|remote_codec| {
        codec_matches(
            &producer_codec.mime_type,
            producer_codec.clock_rate,
            producer_codec.channels,
            &remote_codec.mime_type,
            remote_codec.clock_rate,
            remote_codec.channels,
        ) && feedback_compatible(&producer_codec.rtcp_feedback, &remote_codec.rtcp_feedback)
    })
}

/// Whether a peer declaring `remote` capabilities can receive a stream
/// described by `producer_parameters`
///
/// Returns false (never an error) when no codec and feedback profile is shared.
pub fn can_consume(producer_parameters: &RtpParameters, remote: &RtpCapabilities) -> bool {
    producer_parameters
        .codecs
        .iter()
        .any(|codec| find_remote_codec(codec, remote).is_some())
}

/// Check that a producer only sends codecs the router supports
pub fn validate_producer_parameters(
    kind: MediaKind,
    parameters: &RtpParameters,
    router: &RtpCapabilities,
) -> VoxResult<()> {
    let Some(primary) = parameters.codecs.first() else {
        return Err(VoxError::rejected("produce", "rtpParameters carry no codecs"));
    };

    let supported = router.codecs.iter().any(|router_codec| {
        router_codec.kind == kind
            && codec_matches(
                &router_codec.mime_type,
                router_codec.clock_rate,
                router_codec.channels,
                &primary.mime_type,
                primary.clock_rate,
                primary.channels,
            )
    });

    if supported {
        Ok(())
    } else {
        Err(VoxError::rejected(
            "produce",
            format!(
                "codec {}/{} is not supported by the router",
                primary.mime_type, primary.clock_rate
            ),
        ))
    }
}

/// Build the RTP parameters a new consumer will receive
///
/// Picks the first producer codec the remote side can receive, keeps the
/// remote's preferred payload type, narrows RTCP feedback to the shared set and
/// assigns the consumer its own SSRC.
pub fn consumer_rtp_parameters(
    producer_id: &str,
    producer_parameters: &RtpParameters,
    remote: &RtpCapabilities,
    ssrc: u32,
) -> VoxResult<RtpParameters> {
    for codec in &producer_parameters.codecs {
        if let Some(remote_codec) = find_remote_codec(codec, remote) {
            let rtcp_feedback = codec
                .rtcp_feedback
                .iter()
                .filter(|fb| remote_codec.rtcp_feedback.contains(fb))
                .cloned()
                .collect();

            return Ok(RtpParameters {
                mid: None,
                codecs: vec![RtpCodecParameters {
                    mime_type: codec.mime_type.clone(),
                    payload_type: remote_codec
                        .preferred_payload_type
                        .unwrap_or(codec.payload_type),
                    clock_rate: codec.clock_rate,
                    channels: codec.channels,
                    parameters: codec.parameters.clone(),
                    rtcp_feedback,
                }],
                encodings: vec![RtpEncodingParameters {
                    ssrc: Some(ssrc),
                    max_bitrate: None,
                }],
                rtcp: producer_parameters.rtcp.clone(),
            });
        }
    }

    Err(VoxError::Unsatisfiable {
        producer_id: producer_id.to_string(),
    })
}
