//! # Realtime Wire Protocol
//!
//! JSON messages exchanged with the VoiceLive realtime endpoint (OpenAI-realtime
//! compatible). Only the subset the bridge uses is modeled; unknown server events
//! deserialize to `ServerEvent::Unknown` and are ignored.
//!
//! ## Client → Server:
//! - `session.update`: tenant configuration, sent once after connecting
//! - `input_audio_buffer.append`: one base64 PCM16 frame
//! - `response.cancel`: barge-in, the caller started talking over the agent
//!
//! ## Server → Client (mapped to `Event`):
//! - `response.audio.delta` → `Event::AudioOut`
//! - `response.audio_transcript.done` / `...input_audio_transcription.completed` → `Event::TranscriptDone`
//! - `input_audio_buffer.speech_started|stopped` → `Event::SpeechStarted|SpeechStopped`
//! - `error` → `Event::Error`

use crate::tenant::TenantConfig;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeOnly {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceSettings {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub rate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnDetectionSettings {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

/// Vendor-side session configuration, built from a `TenantConfig`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSettings {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: VoiceSettings,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub turn_detection: TurnDetectionSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_echo_cancellation: Option<TypeOnly>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_noise_reduction: Option<TypeOnly>,
    pub temperature: f32,
    pub max_response_output_tokens: u32,
}

impl SessionSettings {
    /// Map local parameter names onto the vendor schema.
    ///
    /// `top_p` and the penalties have no counterpart in the realtime session and stay local.
    pub fn from_tenant(config: &TenantConfig) -> Self {
        Self {
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions: config.instructions.clone(),
            voice: VoiceSettings {
                name: config.voice.name.clone(),
                kind: "azure-standard".to_string(),
                rate: format!("{:.2}", config.voice.rate),
                pitch: config.voice.pitch.clone(),
            },
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            turn_detection: TurnDetectionSettings {
                kind: "server_vad".to_string(),
                threshold: config.turn_detection.threshold,
                prefix_padding_ms: config.turn_detection.prefix_padding_ms,
                silence_duration_ms: config.turn_detection.silence_duration_ms,
            },
            input_audio_echo_cancellation: config.audio.echo_cancellation.then(|| TypeOnly {
                kind: "server_echo_cancellation".to_string(),
            }),
            input_audio_noise_reduction: config
                .audio
                .noise_reduction
                .as_ref()
                .map(|kind| TypeOnly { kind: kind.clone() }),
            temperature: config.generation.temperature,
            max_response_output_tokens: config.generation.max_tokens,
        }
    }
}

/// Messages the bridge sends upstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionSettings },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend { audio: String },

    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    pub fn audio(pcm16: &[u8]) -> Self {
        ClientEvent::InputAudioAppend {
            audio: BASE64.encode(pcm16),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Messages the realtime service sends.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated {},

    #[serde(rename = "session.updated")]
    SessionUpdated {},

    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },

    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted {
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {},

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {},

    #[serde(rename = "error")]
    Error { error: ErrorDetail },

    #[serde(other)]
    Unknown,
}

/// Who produced a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    Agent,
    Caller,
}

/// Upstream events as the bridge consumes them.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// PCM16 audio to play to the caller
    AudioOut(Vec<u8>),
    TranscriptDone { speaker: Speaker, text: String },
    SpeechStarted,
    SpeechStopped,
    /// `fatal` errors end the bridge; the rest are logged
    Error {
        code: Option<String>,
        message: String,
        fatal: bool,
    },
}

/// Error codes produced by routine conversation flow (barge-in races and the like).
const RECOVERABLE_ERROR_CODES: &[&str] = &[
    "response_cancel_not_active",
    "conversation_already_has_active_response",
    "input_audio_buffer_commit_empty",
];

pub fn is_fatal_error_code(code: Option<&str>) -> bool {
    !code.is_some_and(|code| RECOVERABLE_ERROR_CODES.contains(&code))
}

impl ServerEvent {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Events the bridge reacts to; session lifecycle and unknown events map to `None`.
    pub fn into_event(self) -> Option<Event> {
        match self {
            ServerEvent::AudioDelta { delta } => match BASE64.decode(delta.as_bytes()) {
                Ok(pcm) => Some(Event::AudioOut(pcm)),
                Err(err) => {
                    warn!(error = %err, "Dropping undecodable audio delta");
                    None
                }
            },
            ServerEvent::AudioTranscriptDone { transcript } => Some(Event::TranscriptDone {
                speaker: Speaker::Agent,
                text: transcript,
            }),
            ServerEvent::InputTranscriptionCompleted { transcript } => {
                Some(Event::TranscriptDone {
                    speaker: Speaker::Caller,
                    text: transcript,
                })
            }
            ServerEvent::SpeechStarted {} => Some(Event::SpeechStarted),
            ServerEvent::SpeechStopped {} => Some(Event::SpeechStopped),
            ServerEvent::Error { error } => Some(Event::Error {
                fatal: is_fatal_error_code(error.code.as_deref()),
                code: error.code,
                message: error.message,
            }),
            ServerEvent::SessionCreated {} | ServerEvent::SessionUpdated {} | ServerEvent::Unknown => {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_config;
    use serde_json::json;

    #[test]
    fn test_session_update_payload() {
        let mut config = sample_config("pt-BR-FranciscaNeural");
        config.voice.rate = 1.1;
        config.audio.noise_reduction = None;

        let event = ClientEvent::SessionUpdate {
            session: SessionSettings::from_tenant(&config),
        };
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "session.update");
        let session = &value["session"];
        assert_eq!(session["voice"]["name"], "pt-BR-FranciscaNeural");
        assert_eq!(session["voice"]["type"], "azure-standard");
        assert_eq!(session["voice"]["rate"], "1.10");
        assert!(session["voice"].get("pitch").is_none());
        assert_eq!(session["modalities"], json!(["text", "audio"]));
        assert_eq!(session["input_audio_format"], "pcm16");
        assert_eq!(session["turn_detection"]["type"], "server_vad");
        assert_eq!(session["turn_detection"]["silence_duration_ms"], 500);
        assert_eq!(
            session["input_audio_echo_cancellation"]["type"],
            "server_echo_cancellation"
        );
        assert!(session.get("input_audio_noise_reduction").is_none());
        assert_eq!(session["max_response_output_tokens"], 800);
        assert!(session.get("top_p").is_none());
    }

    #[test]
    fn test_audio_and_cancel_messages() {
        let value = serde_json::to_value(ClientEvent::audio(&[1, 0, 2, 0])).unwrap();
        assert_eq!(value, json!({"type": "input_audio_buffer.append", "audio": "AQACAA=="}));

        let value = serde_json::to_value(ClientEvent::ResponseCancel).unwrap();
        assert_eq!(value, json!({"type": "response.cancel"}));
    }

    #[test]
    fn test_server_events_map_to_bridge_events() {
        let audio = ServerEvent::parse(
            r#"{"type":"response.audio.delta","response_id":"r1","delta":"AQACAA=="}"#,
        )
        .unwrap();
        assert_eq!(audio.into_event(), Some(Event::AudioOut(vec![1, 0, 2, 0])));

        let said = ServerEvent::parse(
            r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"oi"}"#,
        )
        .unwrap();
        assert_eq!(
            said.into_event(),
            Some(Event::TranscriptDone {
                speaker: Speaker::Caller,
                text: "oi".to_string()
            })
        );

        let started =
            ServerEvent::parse(r#"{"type":"input_audio_buffer.speech_started","audio_start_ms":10}"#)
                .unwrap();
        assert_eq!(started.into_event(), Some(Event::SpeechStarted));

        let created = ServerEvent::parse(r#"{"type":"session.created","session":{"id":"s"}}"#).unwrap();
        assert_eq!(created, ServerEvent::SessionCreated {});
        assert_eq!(created.into_event(), None);

        let other = ServerEvent::parse(r#"{"type":"rate_limits.updated","rate_limits":[]}"#).unwrap();
        assert_eq!(other, ServerEvent::Unknown);
    }

    #[test]
    fn test_error_classification() {
        let fatal = ServerEvent::parse(
            r#"{"type":"error","error":{"type":"invalid_request_error","code":"invalid_voice","message":"unknown voice"}}"#,
        )
        .unwrap();
        assert_eq!(
            fatal.into_event(),
            Some(Event::Error {
                code: Some("invalid_voice".to_string()),
                message: "unknown voice".to_string(),
                fatal: true
            })
        );

        let benign = ServerEvent::parse(
            r#"{"type":"error","error":{"code":"response_cancel_not_active","message":"no response"}}"#,
        )
        .unwrap();
        assert!(matches!(benign.into_event(), Some(Event::Error { fatal: false, .. })));
        assert!(is_fatal_error_code(None));
    }
}
