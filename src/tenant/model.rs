//! # Tenant Data Model
//!
//! `RoutingKey` identifies the inbound line (a SIP/phone number), `TenantConfig` is the
//! immutable set of voice, generation and turn-detection parameters a tenant's calls run
//! with. `TenantRecord` is the lenient storage shape: every field optional, defaults
//! filled in by `into_config`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest routing key accepted, in bytes.
pub const MAX_ROUTING_KEY_LEN: usize = 128;

/// Identifier of the inbound tenant/line, e.g. `+5511999990001`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RoutingKey(String);

impl RoutingKey {
    /// Build a key from untrusted input (URL path segment).
    ///
    /// Surrounding whitespace is trimmed; empty or oversized keys are rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() > MAX_ROUTING_KEY_LEN {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a tenant inside the configuration store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub String);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceParams {
    /// Vendor voice id, e.g. `pt-BR-FranciscaNeural`
    pub name: String,
    /// Speaking rate multiplier (1.0 = normal)
    pub rate: f32,
    /// Optional pitch adjustment passed through verbatim (e.g. `+5%`)
    pub pitch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
}

/// Server-side voice activity detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnDetection {
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for TurnDetection {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 100,
            silence_duration_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioParams {
    pub echo_cancellation: bool,
    /// Noise suppression type, `None` disables it
    pub noise_reduction: Option<String>,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_reduction: Some("azure_deep_noise_suppression".to_string()),
        }
    }
}

/// Everything an upstream session for one tenant is parameterized with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Realtime model; `None` uses the deployment default (`upstream.default_model`)
    pub model: Option<String>,
    pub voice: VoiceParams,
    pub generation: GenerationParams,
    pub turn_detection: TurnDetection,
    pub audio: AudioParams,
    pub instructions: String,
    pub active: bool,
}

pub const DEFAULT_VOICE: &str = "en-US-Andrew:DragonHDLatestNeural";
pub const DEFAULT_INSTRUCTIONS: &str = "Você é um assistente útil.";

/// Turn-detection block as stored; missing members fall back individually.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TurnDetectionRecord {
    pub threshold: Option<f32>,
    pub prefix_padding_ms: Option<u32>,
    pub silence_duration_ms: Option<u32>,
}

/// Audio block as stored (`audio` in JSON files, `audio_config` in the database).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AudioRecord {
    pub echo_cancellation: Option<bool>,
    /// `null` disables noise reduction, an absent key keeps the default
    #[serde(default, deserialize_with = "explicit_option")]
    pub noise_reduction: Option<Option<String>>,
}

/// Distinguishes `"key": null` (Some(None)) from a missing key (None).
fn explicit_option<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// A tenant configuration row as persisted by the store.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TenantRecord {
    pub model: Option<String>,
    pub voice: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub speech_rate: Option<f32>,
    pub pitch: Option<String>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub turn_detection: Option<TurnDetectionRecord>,
    #[serde(alias = "audio_config")]
    pub audio: Option<AudioRecord>,
    pub instructions: Option<String>,
    pub active: Option<bool>,
}

impl TenantRecord {
    /// Fill in defaults. `tenant_active` is the tenant-level flag; a record that is itself
    /// marked inactive also yields an inactive config.
    pub fn into_config(self, tenant_active: bool) -> TenantConfig {
        let turn = self.turn_detection.unwrap_or_default();
        let audio = self.audio.unwrap_or_default();
        let audio_defaults = AudioParams::default();
        let turn_defaults = TurnDetection::default();

        TenantConfig {
            model: self.model.filter(|model| !model.trim().is_empty()),
            voice: VoiceParams {
                name: self.voice.unwrap_or_else(|| DEFAULT_VOICE.to_string()),
                rate: self.speech_rate.unwrap_or(1.0),
                pitch: self.pitch,
            },
            generation: GenerationParams {
                temperature: self.temperature.unwrap_or(0.7),
                max_tokens: self.max_tokens.unwrap_or(800),
                top_p: self.top_p.unwrap_or(0.9),
                frequency_penalty: self.frequency_penalty.unwrap_or(0.0),
                presence_penalty: self.presence_penalty.unwrap_or(0.0),
            },
            turn_detection: TurnDetection {
                threshold: turn.threshold.unwrap_or(turn_defaults.threshold),
                prefix_padding_ms: turn.prefix_padding_ms.unwrap_or(turn_defaults.prefix_padding_ms),
                silence_duration_ms: turn
                    .silence_duration_ms
                    .unwrap_or(turn_defaults.silence_duration_ms),
            },
            audio: AudioParams {
                echo_cancellation: audio
                    .echo_cancellation
                    .unwrap_or(audio_defaults.echo_cancellation),
                noise_reduction: audio.noise_reduction.unwrap_or(audio_defaults.noise_reduction),
            },
            instructions: self
                .instructions
                .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
            active: tenant_active && self.active.unwrap_or(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_key_parsing() {
        assert_eq!(
            RoutingKey::parse(" +5511999990001 ").unwrap().as_str(),
            "+5511999990001"
        );
        assert!(RoutingKey::parse("").is_none());
        assert!(RoutingKey::parse("   ").is_none());
        assert!(RoutingKey::parse(&"9".repeat(MAX_ROUTING_KEY_LEN + 1)).is_none());
    }

    #[test]
    fn test_empty_record_uses_defaults() {
        let config = TenantRecord::default().into_config(true);
        assert_eq!(config.model, None);
        assert_eq!(config.voice.name, DEFAULT_VOICE);
        assert_eq!(config.voice.rate, 1.0);
        assert_eq!(config.generation.max_tokens, 800);
        assert_eq!(config.generation.top_p, 0.9);
        assert_eq!(config.turn_detection, TurnDetection::default());
        assert!(config.audio.echo_cancellation);
        assert_eq!(
            config.audio.noise_reduction.as_deref(),
            Some("azure_deep_noise_suppression")
        );
        assert!(config.active);
    }

    #[test]
    fn test_database_row_mapping() {
        let row = r#"{
            "client_id": "c0ffee",
            "voice": "pt-BR-FranciscaNeural",
            "temperature": 0.6,
            "max_tokens": 400,
            "speech_rate": 1.2,
            "turn_detection": {"threshold": 0.7, "silence_duration_ms": 800},
            "audio_config": {"echo_cancellation": false, "noise_reduction": null},
            "instructions": "Atenda clientes da clínica."
        }"#;
        let record: TenantRecord = serde_json::from_str(row).unwrap();
        let config = record.into_config(true);

        assert_eq!(config.voice.name, "pt-BR-FranciscaNeural");
        assert_eq!(config.voice.rate, 1.2);
        assert_eq!(config.generation.temperature, 0.6);
        assert_eq!(config.generation.max_tokens, 400);
        assert_eq!(config.turn_detection.threshold, 0.7);
        assert_eq!(config.turn_detection.prefix_padding_ms, 100);
        assert_eq!(config.turn_detection.silence_duration_ms, 800);
        assert!(!config.audio.echo_cancellation);
        assert_eq!(config.audio.noise_reduction, None);
        assert_eq!(config.instructions, "Atenda clientes da clínica.");
    }

    #[test]
    fn test_inactive_flags_propagate() {
        assert!(!TenantRecord::default().into_config(false).active);

        let record = TenantRecord {
            active: Some(false),
            ..Default::default()
        };
        assert!(!record.into_config(true).active);
    }
}
