//! Extension pour lire les réglages de diffusion depuis partyconfig

use std::time::Duration;

use partyconfig::Config;

use crate::{ProxySettings, TokenSettings, TranscoderSettings};

/// Trait d'extension de `partyconfig::Config` pour le proxy et le live
pub trait StreamConfigExt {
    /// Réglages lus sous `party.proxy`
    fn proxy_settings(&self) -> ProxySettings;

    /// Réglages lus sous `party.stream`
    fn transcoder_settings(&self) -> TranscoderSettings;

    fn token_settings(&self) -> TokenSettings;
}

impl StreamConfigExt for Config {
    fn proxy_settings(&self) -> ProxySettings {
        let referer = self.get_proxy_referer();
        ProxySettings {
            max_content_length: self.get_proxy_max_content_mb().saturating_mul(1024 * 1024),
            ready_timeout: Duration::from_millis(self.get_proxy_ready_timeout_ms()),
            referer: (!referer.is_empty()).then_some(referer),
        }
    }

    fn transcoder_settings(&self) -> TranscoderSettings {
        TranscoderSettings {
            ffmpeg_path: self.get_ffmpeg_path(),
            bitrate: self.get_stream_bitrate(),
            chunk_size: self.get_stream_chunk_size(),
            enabled: self.get_stream_enabled(),
        }
    }

    fn token_settings(&self) -> TokenSettings {
        TokenSettings {
            ttl: Duration::from_secs(self.get_stream_token_ttl_hours().max(1) * 3600),
            idle: Duration::from_secs(self.get_stream_token_idle_hours().max(1) * 3600),
        }
    }
}
