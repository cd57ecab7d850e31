//! Gemini transport: one request line over TLS, one header line back.
//!
//! ```text
//! C: gemini://example.org/feed.gmi\r\n
//! S: 20 text/gemini; charset=utf-8\r\n
//! S: <body until close>
//! ```
//!
//! Gemini servers almost always present self-signed certificates, so the TLS
//! layer accepts any certificate. No trust-on-first-use pinning is kept.

use std::net::SocketAddr;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use url::{Host, Url};

use super::fetcher::{FetchError, RawFeedPayload};
use super::parser::media_type_essence;
use crate::util::ensure_public_ip;

pub const DEFAULT_PORT: u16 = 1965;

/// Longest request URL the protocol allows, in bytes.
const MAX_REQUEST_URL: usize = 1024;

/// Status, space, 1024-byte META and CRLF.
const MAX_HEADER_LEN: u64 = 2 + 1 + 1024 + 2;

/// Parsed `<STATUS> <META>` response header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub status: u8,
    pub meta: String,
}

impl Header {
    pub fn is_success(&self) -> bool {
        (20..30).contains(&self.status)
    }
}

/// Builds the TLS connector used for every Gemini request.
pub fn connector() -> Result<TlsConnector, FetchError> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| FetchError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Fetches `url` over Gemini and returns the body of a 2x response.
///
/// The host is resolved once and every address it resolves to must be
/// public; the connection goes to those checked addresses, never to a second
/// lookup.
pub async fn fetch(
    connector: &TlsConnector,
    url: &Url,
    max_size: usize,
) -> Result<RawFeedPayload, FetchError> {
    if url.as_str().len() > MAX_REQUEST_URL {
        return Err(FetchError::InvalidUrl(format!(
            "request URL exceeds {MAX_REQUEST_URL} bytes"
        )));
    }
    let host = request_host(url)?;
    let port = url.port().unwrap_or(DEFAULT_PORT);
    let addrs = resolve_public(&host, port).await?;

    fetch_from(connector, url, &host, &addrs, max_size).await
}

fn request_host(url: &Url) -> Result<String, FetchError> {
    match url.host() {
        Some(Host::Domain(domain)) => Ok(domain.to_owned()),
        Some(Host::Ipv4(ip)) => Ok(ip.to_string()),
        Some(Host::Ipv6(ip)) => Ok(ip.to_string()),
        None => Err(FetchError::InvalidUrl("URL has no host".to_string())),
    }
}

async fn resolve_public(host: &str, port: u16) -> Result<Vec<SocketAddr>, FetchError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port)).await?.collect();
    if addrs.is_empty() {
        return Err(FetchError::InvalidUrl(format!("{host} did not resolve")));
    }
    for addr in &addrs {
        ensure_public_ip(&addr.ip())?;
    }
    Ok(addrs)
}

/// Runs one request against already-resolved addresses.
async fn fetch_from(
    connector: &TlsConnector,
    url: &Url,
    host: &str,
    addrs: &[SocketAddr],
    max_size: usize,
) -> Result<RawFeedPayload, FetchError> {
    let server_name =
        ServerName::try_from(host.to_owned()).map_err(|e| FetchError::Tls(e.to_string()))?;
    let tcp = TcpStream::connect(addrs).await?;
    let mut stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| FetchError::Tls(e.to_string()))?;

    stream.write_all(format!("{url}\r\n").as_bytes()).await?;
    stream.flush().await?;

    let mut reader = BufReader::new(stream);
    let header = read_header(&mut reader).await?;
    tracing::debug!(url = %url, status = header.status, meta = %header.meta, "Gemini response");

    if !header.is_success() {
        return Err(FetchError::UpstreamError {
            status: u16::from(header.status),
            meta: header.meta,
        });
    }

    let media_type = media_type_essence(&header.meta)
        .ok_or_else(|| FetchError::UnintelligibleContentType(header.meta.clone()))?;
    let body = read_body(&mut reader, max_size).await?;

    Ok(RawFeedPayload {
        url: url.clone(),
        media_type,
        body,
    })
}

/// Reads and validates the response header line.
pub async fn read_header<R>(reader: &mut R) -> Result<Header, FetchError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    (&mut *reader)
        .take(MAX_HEADER_LEN)
        .read_until(b'\n', &mut line)
        .await?;

    let line = line
        .strip_suffix(b"\r\n")
        .ok_or_else(|| FetchError::InvalidHeader("missing CRLF terminator".to_string()))?;
    let line = std::str::from_utf8(line)
        .map_err(|_| FetchError::InvalidHeader("header is not UTF-8".to_string()))?;

    let (code, meta) = match line.get(..2) {
        Some(code) if code.bytes().all(|b| b.is_ascii_digit()) => (code, &line[2..]),
        _ => return Err(FetchError::InvalidHeader(format!("bad status in {line:?}"))),
    };
    let meta = match meta.strip_prefix(' ') {
        Some(meta) => meta,
        None if meta.is_empty() => meta,
        None => return Err(FetchError::InvalidHeader(format!("bad separator in {line:?}"))),
    };

    Ok(Header {
        status: code
            .parse()
            .map_err(|_| FetchError::InvalidHeader(format!("bad status in {line:?}")))?,
        meta: meta.to_string(),
    })
}

/// Reads the body until the server closes, failing once it passes `limit`.
///
/// Many servers close without a TLS `close_notify`; that truncation is the
/// normal end of a Gemini response and is not treated as an error.
pub async fn read_body<R>(reader: &mut R, limit: usize) -> Result<Vec<u8>, FetchError>
where
    R: AsyncRead + Unpin,
{
    let mut body = Vec::new();
    let bound = (limit as u64).saturating_add(1);
    match (&mut *reader).take(bound).read_to_end(&mut body).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            tracing::trace!(received = body.len(), "Gemini server closed without close_notify");
        }
        Err(e) => return Err(e.into()),
    }

    if body.len() > limit {
        return Err(FetchError::ResponseTooLarge);
    }
    Ok(body)
}

/// Certificate verifier that trusts every server certificate while still
/// checking handshake signatures.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
