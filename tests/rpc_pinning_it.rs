// std
use std::{
	io::{Read, Write},
	net::{Ipv4Addr, TcpListener},
	path::{Path, PathBuf},
	thread,
};
// crates.io
use rustls::{
	ServerConfig, ServerConnection, StreamOwned,
	pki_types::{CertificateDer, PrivateKeyDer, pem::PemObject},
};
// self
use quota_agent::{
	_preludet::*,
	config::{ClientIdentity, RpcConfig},
	error::RpcError,
	rpc::{BackendRpc, PinnedConnector, RpcConnector},
};

const SECRET: &str = "shared-secret";
const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 2\r\n\
	connection: close\r\n\r\n{}";

fn fixture(name: &str) -> PathBuf {
	Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures").join("tls").join(name)
}

fn read_fixture(name: &str) -> Vec<u8> {
	std::fs::read(fixture(name)).expect("TLS fixture should be readable.")
}

/// Serves `{}` over TLS with the `backend.pem` leaf followed by its issuing `ca.pem`.
fn start_tls_backend() -> u16 {
	let chain = [read_fixture("backend.pem"), read_fixture("ca.pem")]
		.iter()
		.flat_map(|pem| CertificateDer::pem_slice_iter(pem))
		.collect::<Result<Vec<_>, _>>()
		.expect("Certificate chain should parse.");
	let key = PrivateKeyDer::from_pem_slice(&read_fixture("backend-key.pem"))
		.expect("Private key should parse.");
	let config = ServerConfig::builder_with_provider(Arc::new(
		rustls::crypto::ring::default_provider(),
	))
	.with_safe_default_protocol_versions()
	.expect("Protocol versions should be supported.")
	.with_no_client_auth()
	.with_single_cert(chain, key)
	.expect("Server certificate should be accepted.");
	let config = Arc::new(config);
	let listener =
		TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("Loopback listener should bind.");
	let port = listener.local_addr().expect("Listener should have an address.").port();

	thread::spawn(move || {
		for tcp in listener.incoming().flatten() {
			let Ok(connection) = ServerConnection::new(config.clone()) else {
				continue;
			};
			let mut tls = StreamOwned::new(connection, tcp);

			if read_request(&mut tls).is_some() {
				let _ = tls.write_all(RESPONSE);

				tls.conn.send_close_notify();

				let _ = tls.flush();
			}
		}
	});

	port
}

fn read_request(stream: &mut impl Read) -> Option<()> {
	let mut buf = Vec::new();
	let mut chunk = [0_u8; 1024];

	loop {
		if let Some(end) = buf.windows(4).position(|window| window == b"\r\n\r\n") {
			let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
			let length = head
				.lines()
				.find_map(|line| line.strip_prefix("content-length:"))
				.and_then(|value| value.trim().parse::<usize>().ok())
				.unwrap_or(0);

			while buf.len() < end + 4 + length {
				let read = stream.read(&mut chunk).ok()?;

				if read == 0 {
					return None;
				}

				buf.extend_from_slice(&chunk[..read]);
			}

			return Some(());
		}

		let read = stream.read(&mut chunk).ok()?;

		if read == 0 {
			return None;
		}

		buf.extend_from_slice(&chunk[..read]);
	}
}

fn pinned_to(name: &str) -> PinnedConnector {
	PinnedConnector::new(RpcConfig::default(), ClientIdentity::default(), fixture(name))
}

#[tokio::test]
async fn pinned_leaf_certificate_is_trusted() {
	let port = start_tls_backend();
	let client = pinned_to("backend.pem").connect(port, SECRET).expect("Client should build.");

	client.heartbeat().await.expect("A pinned leaf should complete the handshake.");
}

#[tokio::test]
async fn pinned_issuer_in_the_presented_chain_is_trusted() {
	let port = start_tls_backend();
	let client = pinned_to("ca.pem").connect(port, SECRET).expect("Client should build.");

	client.heartbeat().await.expect("A pinned intermediate should complete the handshake.");
}

#[tokio::test]
async fn unexpected_certificate_is_a_pin_mismatch() {
	let port = start_tls_backend();
	let client = pinned_to("other.pem").connect(port, SECRET).expect("Client should build.");
	let err = client.heartbeat().await.expect_err("An unpinned certificate must be refused.");

	assert!(matches!(err, Error::Rpc(RpcError::PinMismatch)), "Unexpected error: {err:?}.");
	assert!(err.is_backend_unreachable());
}
