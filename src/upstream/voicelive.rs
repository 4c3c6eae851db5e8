//! Azure VoiceLive connector over `tokio-tungstenite`.
//!
//! `wss://{endpoint}/voice-live/realtime?api-version={v}&model={model}`, authenticated
//! with the `api-key` header. Text frames carry one JSON event each.

use crate::config::UpstreamConfig;
use crate::error::UpstreamError;
use crate::upstream::protocol::{ClientEvent, ServerEvent};
use crate::upstream::transport::{UpstreamChannel, UpstreamConnector, UpstreamSink};
use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

const REALTIME_PATH: &str = "/voice-live/realtime";

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

pub struct VoiceLiveConnector {
    endpoint: String,
    api_key: String,
    api_version: String,
}

impl VoiceLiveConnector {
    pub fn new(config: &UpstreamConfig) -> Self {
        if config.endpoint.is_empty() || config.api_key.is_empty() {
            warn!("VoiceLive endpoint or API key not configured; sessions will fail to open");
        }
        Self {
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            api_version: config.api_version.clone(),
        }
    }

    /// Realtime URL for `model`. `https`/`http` endpoints are mapped to `wss`/`ws`.
    pub fn realtime_url(&self, model: &str) -> Result<Url, UpstreamError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| UpstreamError::Unavailable(format!("invalid endpoint: {e}")))?;

        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => {
                return Err(UpstreamError::Unavailable(format!(
                    "unsupported endpoint scheme: {other}"
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| UpstreamError::Unavailable("cannot rewrite endpoint scheme".to_string()))?;

        let path = format!("{}{}", url.path().trim_end_matches('/'), REALTIME_PATH);
        url.set_path(&path);
        url.query_pairs_mut()
            .clear()
            .append_pair("api-version", &self.api_version)
            .append_pair("model", model);
        Ok(url)
    }
}

#[async_trait]
impl UpstreamConnector for VoiceLiveConnector {
    async fn connect(&self, model: &str) -> Result<UpstreamChannel, UpstreamError> {
        let url = self.realtime_url(model)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| UpstreamError::Unavailable(e.to_string()))?;
        let api_key = HeaderValue::from_str(&self.api_key)
            .map_err(|_| UpstreamError::Unavailable("API key is not a valid header".to_string()))?;
        request.headers_mut().insert("api-key", api_key);

        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| UpstreamError::Unavailable(format!("connect failed: {e}")))?;
        info!(host = url.host_str().unwrap_or(""), model = model, status = %response.status(), "Connected to VoiceLive");

        let (writer, reader) = stream.split();
        let events = reader
            .filter_map(|message| {
                futures_util::future::ready(match message {
                    Ok(Message::Text(text)) => match ServerEvent::parse(&text) {
                        Ok(event) => Some(Ok(event)),
                        Err(err) => {
                            warn!(error = %err, "Ignoring undecodable upstream event");
                            None
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        debug!(frame = ?frame, "Upstream sent close");
                        None
                    }
                    Ok(_) => None,
                    Err(tungstenite::Error::ConnectionClosed) => None,
                    Err(err) => Some(Err(UpstreamError::Unavailable(err.to_string()))),
                })
            })
            .boxed();

        Ok(UpstreamChannel {
            sink: Box::new(VoiceLiveSink {
                writer: Mutex::new(writer),
            }),
            events,
        })
    }
}

struct VoiceLiveSink {
    writer: Mutex<WsWriter>,
}

#[async_trait]
impl UpstreamSink for VoiceLiveSink {
    async fn send(&self, event: ClientEvent) -> Result<(), UpstreamError> {
        let payload =
            serde_json::to_string(&event).map_err(|e| UpstreamError::Unavailable(e.to_string()))?;
        self.writer
            .lock()
            .await
            .send(Message::Text(payload))
            .await
            .map_err(|e| match e {
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                    UpstreamError::Closed
                }
                other => UpstreamError::Unavailable(other.to_string()),
            })
    }

    async fn close(&self) -> Result<(), UpstreamError> {
        match self.writer.lock().await.close().await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(err) => Err(UpstreamError::Unavailable(err.to_string())),
        }
    }
}
