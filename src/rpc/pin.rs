//! TLS trust policy that accepts exactly one pinned certificate.

// std
use std::{
	path::Path,
	sync::atomic::{AtomicBool, AtomicU64, Ordering},
};
// crates.io
use rustls::{
	CertificateError, DigitallySignedStruct, SignatureScheme,
	client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
	crypto::{self, CryptoProvider},
	pki_types::{CertificateDer, ServerName, UnixTime, pem::PemObject},
};
// self
use crate::{_prelude::*, error::RpcError};

static MISMATCH_LOGGED: AtomicBool = AtomicBool::new(false);

/// Accepts a server only when its leaf or chain contains the pinned DER bytes.
///
/// The system trust store is never consulted. Signatures are still verified with the ring
/// provider so the peer must hold the pinned certificate's private key.
#[derive(Debug)]
pub struct PinnedCertVerifier {
	pinned: CertificateDer<'static>,
	provider: Arc<CryptoProvider>,
	mismatches: AtomicU64,
}
impl PinnedCertVerifier {
	/// Pins `pinned`.
	pub fn new(pinned: CertificateDer<'static>) -> Self {
		Self {
			pinned,
			provider: Arc::new(crypto::ring::default_provider()),
			mismatches: AtomicU64::new(0),
		}
	}

	/// Loads the first certificate block of the PEM file at `path`.
	pub fn from_pem_file(path: &Path) -> Result<Self> {
		let certificate_error =
			|reason: String| RpcError::Certificate { path: path.to_path_buf(), reason };
		let pem = std::fs::read(path).map_err(|e| certificate_error(e.to_string()))?;

		Ok(Self::new(Self::first_certificate(&pem).map_err(certificate_error)?))
	}

	/// Extracts the DER bytes of the first `CERTIFICATE` block in `pem`.
	pub fn first_certificate(pem: &[u8]) -> Result<CertificateDer<'static>, String> {
		match CertificateDer::pem_slice_iter(pem).next() {
			Some(Ok(cert)) => Ok(cert),
			Some(Err(e)) => Err(format!("invalid PEM: {e}")),
			None => Err("no certificate block found".into()),
		}
	}

	/// Crypto provider used for handshake signatures.
	pub fn provider(&self) -> Arc<CryptoProvider> {
		self.provider.clone()
	}

	/// Number of handshakes rejected so far.
	pub fn mismatch_count(&self) -> u64 {
		self.mismatches.load(Ordering::Relaxed)
	}

	fn matches(&self, end_entity: &CertificateDer<'_>, intermediates: &[CertificateDer<'_>]) -> bool {
		let pinned = self.pinned.as_ref();

		end_entity.as_ref() == pinned || intermediates.iter().any(|cert| cert.as_ref() == pinned)
	}

	fn record_mismatch(&self) {
		self.mismatches.fetch_add(1, Ordering::Relaxed);

		if !MISMATCH_LOGGED.swap(true, Ordering::Relaxed) {
			tracing::warn!("TLS pin mismatch: backend presented an unexpected certificate");
		}
	}
}
impl ServerCertVerifier for PinnedCertVerifier {
	fn verify_server_cert(
		&self,
		end_entity: &CertificateDer<'_>,
		intermediates: &[CertificateDer<'_>],
		_server_name: &ServerName<'_>,
		_ocsp_response: &[u8],
		_now: UnixTime,
	) -> Result<ServerCertVerified, rustls::Error> {
		if self.matches(end_entity, intermediates) {
			Ok(ServerCertVerified::assertion())
		} else {
			self.record_mismatch();

			Err(rustls::Error::InvalidCertificate(CertificateError::ApplicationVerificationFailure))
		}
	}

	fn verify_tls12_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		crypto::verify_tls12_signature(
			message,
			cert,
			dss,
			&self.provider.signature_verification_algorithms,
		)
	}

	fn verify_tls13_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		crypto::verify_tls13_signature(
			message,
			cert,
			dss,
			&self.provider.signature_verification_algorithms,
		)
	}

	fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
		self.provider.signature_verification_algorithms.supported_schemes()
	}
}
