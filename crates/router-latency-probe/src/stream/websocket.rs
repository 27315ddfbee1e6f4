use crate::{
    Error, Result,
    event::{Envelope, Event, LifecycleEvent, LogEvent},
    stream::{EventStream, EventSupplier},
};
use async_trait::async_trait;
use futures::{StreamExt, future};
use rustls::{
    ClientConfig, DigitallySignedStruct, SignatureScheme,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    pki_types::{CertificateDer, ServerName, UnixTime},
};
use serde::Deserialize;
use std::sync::Arc;
use tokio_tungstenite::{
    Connector, connect_async_tls_with_config,
    tungstenite::{
        self, Message,
        client::IntoClientRequest,
        http::{HeaderValue, header::AUTHORIZATION},
    },
};
use tracing::{debug, info, warn};
use url::Url;

/// Subscribes to an application's event stream over a websocket.
///
/// Each text or binary frame carries one JSON encoded envelope.
pub struct WebsocketSupplier {
    endpoint: Url,
    skip_tls_verification: bool,
}

impl WebsocketSupplier {
    pub fn new(endpoint: Url, skip_tls_verification: bool) -> Self {
        if skip_tls_verification {
            warn!(%endpoint, "event stream certificates will not be verified");
        }
        Self {
            endpoint,
            skip_tls_verification,
        }
    }

    /// `None` keeps the default webpki-rooted connector.
    fn connector(&self) -> Option<Connector> {
        self.skip_tls_verification.then(|| {
            let config = ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
                .with_no_client_auth();
            Connector::Rustls(Arc::new(config))
        })
    }

    pub fn stream_url(&self, app_guid: &str) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(["apps", app_guid, "stream"]);
        Ok(url)
    }
}

#[async_trait]
impl EventSupplier for WebsocketSupplier {
    async fn subscribe(&self, token: &str, app_guid: &str) -> Result<EventStream> {
        let url = self.stream_url(app_guid)?;
        let mut request = url.as_str().into_client_request()?;
        let auth = HeaderValue::from_str(token)
            .map_err(|err| tungstenite::Error::HttpFormat(err.into()))?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        let (socket, response) =
            connect_async_tls_with_config(request, None, false, self.connector()).await?;
        info!(%url, status = %response.status(), "subscribed to event stream");
        metrics::counter!("router_probe_stream_connected").increment(1);

        let events = socket
            .filter_map(|frame| {
                future::ready(match frame {
                    Ok(Message::Text(text)) => decode_frame(text.as_bytes()),
                    Ok(Message::Binary(data)) => decode_frame(&data),
                    Ok(Message::Close(close)) => Some(Err(Error::StreamDisconnected(format!(
                        "closed by server: {close:?}"
                    )))),
                    Ok(_) => None,
                    Err(err) => Some(Err(err.into())),
                })
            })
            .boxed();

        Ok(events)
    }
}

/// Accepts any server certificate, for foundations with self-signed certs.
#[derive(Debug)]
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
        ]
    }
}

fn decode_frame(data: &[u8]) -> Option<Result<Envelope>> {
    match serde_json::from_slice::<WireEnvelope>(data) {
        Ok(wire) => Some(Ok(wire.into())),
        Err(err) => {
            debug!(error = %err, "skipping undecodable frame");
            metrics::counter!("router_probe_frames_undecodable").increment(1);
            None
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    origin: String,
    event_type: String,
    #[serde(default)]
    http_start_stop: Option<WireStartStop>,
    #[serde(default)]
    log_message: Option<WireLogMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireStartStop {
    start_timestamp: i64,
    stop_timestamp: i64,
    #[serde(default)]
    uri: String,
}

#[derive(Debug, Deserialize)]
struct WireLogMessage {
    message: String,
}

impl From<WireEnvelope> for Envelope {
    fn from(wire: WireEnvelope) -> Self {
        let event = match (wire.event_type.as_str(), wire.http_start_stop, wire.log_message) {
            ("HttpStartStop", Some(ss), _) => Event::Lifecycle(LifecycleEvent {
                uri: ss.uri,
                start_timestamp: ss.start_timestamp,
                stop_timestamp: ss.stop_timestamp,
            }),
            ("LogMessage", _, Some(log)) => Event::Log(LogEvent {
                message: log.message.into_bytes(),
            }),
            _ => Event::Other(wire.event_type),
        };

        Envelope {
            origin: wire.origin,
            event,
        }
    }
}
