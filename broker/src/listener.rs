// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Binds each configured listener and runs its accept loop, handing each new
//! connection a `Session` and spawning its read loop.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig as RustlsServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::config::{ListenerConfig, Protocol};
use crate::error::{Error, ErrorKind};
use crate::server::Server;
use crate::session::Session;
use crate::stream::Stream;
use crate::types::SessionKind;

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, Error> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| {
            Error::from_string(ErrorKind::CertError, format!("failed to load {path:?}: {err}"))
        })
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, Error> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|err| {
            Error::from_string(ErrorKind::CertError, format!("failed to load {path:?}: {err}"))
        })?
        .ok_or_else(|| Error::new(ErrorKind::CertError, "no private key found"))
}

fn build_tls_acceptor(listener_config: &ListenerConfig) -> Result<TlsAcceptor, Error> {
    let cert_file = listener_config
        .cert_file()
        .ok_or_else(|| Error::new(ErrorKind::CertError, "cert_file is required"))?;
    let key_file = listener_config
        .key_file()
        .ok_or_else(|| Error::new(ErrorKind::CertError, "key_file is required"))?;

    let certs = load_certs(cert_file)?;
    let key = load_key(key_file)?;

    let config = RustlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| {
            Error::from_string(ErrorKind::CertError, format!("bad tls cert/key pair: {err}"))
        })?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

async fn accept_stream(
    listener_config: &ListenerConfig,
    tcp: TcpStream,
    tls_acceptor: Option<&TlsAcceptor>,
) -> Result<Stream, Error> {
    match (listener_config.protocol(), tls_acceptor) {
        (Protocol::Mqtt, _) => Ok(Stream::Tcp(tcp)),
        (Protocol::Mqtts, Some(acceptor)) => {
            let tls = acceptor.accept(tcp).await?;
            Ok(Stream::Tls(Box::new(tls)))
        }
        (Protocol::Ws, _) => {
            let ws = accept_ws(tcp, listener_config.path()).await?;
            Ok(Stream::Ws(Box::new(ws)))
        }
        (Protocol::Wss, Some(acceptor)) => {
            let tls = acceptor.accept(tcp).await?;
            let ws = accept_ws(tls, listener_config.path()).await?;
            Ok(Stream::Wss(Box::new(ws)))
        }
        (Protocol::Mqtts | Protocol::Wss, None) => Err(Error::new(
            ErrorKind::CertError,
            "tls listener has no acceptor configured",
        )),
    }
}

async fn accept_ws<S>(
    stream: S,
    path: Option<&str>,
) -> Result<tokio_tungstenite::WebSocketStream<S>, Error>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    use tokio_tungstenite::tungstenite::handshake::server as ws_server;
    let expected_path = path.map(str::to_string);
    let check_path = move |request: &ws_server::Request,
                            response: ws_server::Response|
          -> Result<ws_server::Response, ws_server::ErrorResponse> {
        match &expected_path {
            Some(expected) if request.uri().path() != expected => {
                let resp = http::Response::builder()
                    .status(http::StatusCode::NOT_FOUND)
                    .body(None)
                    .expect("static response body");
                Err(resp)
            }
            _ => Ok(response),
        }
    };
    Ok(tokio_tungstenite::accept_hdr_async(stream, check_path).await?)
}

/// Binds every configured listener and spawns its accept loop as a background
/// task on the current runtime. Returns once all listeners are bound; the
/// accept loops themselves run until the process exits.
///
/// # Errors
///
/// Returns error if any listener address fails to bind or a TLS listener is
/// missing certificate material.
pub async fn run_listeners(server: &Arc<Server>) -> Result<(), Error> {
    for listener_config in server.config.listeners() {
        let tcp_listener = TcpListener::bind(listener_config.address()).await?;
        let tls_acceptor = match listener_config.protocol() {
            Protocol::Mqtts | Protocol::Wss => Some(build_tls_acceptor(listener_config)?),
            Protocol::Mqtt | Protocol::Ws => None,
        };
        log::info!(
            "listening on {} ({:?})",
            listener_config.address(),
            listener_config.protocol()
        );

        let listener_config = listener_config.clone();
        let server = Arc::clone(server);
        tokio::spawn(async move {
            accept_loop(tcp_listener, listener_config, tls_acceptor, server).await;
        });
    }
    Ok(())
}

async fn accept_loop(
    tcp_listener: TcpListener,
    listener_config: ListenerConfig,
    tls_acceptor: Option<TlsAcceptor>,
    server: Arc<Server>,
) {
    loop {
        let (tcp, peer_addr) = match tcp_listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                log::error!("accept failed on {}: {err}", listener_config.address());
                continue;
            }
        };

        let stream = match accept_stream(&listener_config, tcp, tls_acceptor.as_ref()).await {
            Ok(stream) => stream,
            Err(err) => {
                log::warn!("handshake with {peer_addr} failed: {err}");
                continue;
            }
        };

        let kind = match (listener_config.is_peer(), listener_config.protocol()) {
            (true, _) => SessionKind::PeerInbound,
            (false, Protocol::Ws | Protocol::Wss) => SessionKind::LocalWs,
            (false, Protocol::Mqtt | Protocol::Mqtts) => SessionKind::LocalTcp,
        };

        let session_id = server.next_session_id();
        let session = Arc::new(Session::new(session_id, kind, stream));
        let server = Arc::clone(&server);
        tokio::spawn(async move { session.read_loop(server).await });
    }
}
